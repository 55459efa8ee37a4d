//! Chunked bulk transfer engine.
//!
//! Uploads and downloads move through the same loop shape: pick one chunk
//! size for the whole call, then for each chunk send a LOADRAM/DUMPRAM
//! command and immediately move the bulk payload — the protocol has no
//! acknowledgement frame between the two. Position tracking advances by
//! bytes actually moved, so a short transfer resumes cleanly instead of
//! failing.

use std::io::{Read, Seek, SeekFrom, Write};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::error::DeviceError;
use crate::events::{SessionEvent, SessionObserver, TransferDirection};
use crate::protocol::constants::{
    BULK_RETRY_ATTEMPTS, BULK_RETRY_DELAY_MS, CHUNK_UNIT, CMD_DUMPRAM, CMD_LOADRAM,
    DOWNLOAD_SIZE_FALLBACK,
};
use crate::protocol::{Bank, CommandFrame};
use crate::retry::retry_with_recovery;
use crate::transport::{TransportError, UsbTransport};

/// Ideal chunk size for a transfer of `size` total bytes, before clamping.
/// Larger transfers get larger chunks to keep bulk throughput up.
fn ideal_chunk_size(size: u64) -> u64 {
    let units = if size > 16 * 1024 * 1024 {
        32
    } else if size > 2 * 1024 * 1024 {
        16
    } else {
        4
    };
    units * CHUNK_UNIT
}

/// Chunk size used for a transfer of `size` total bytes. Computed once per
/// call; a transfer smaller than the ideal chunk runs as a single chunk.
pub fn chunk_size_for(size: u64) -> u64 {
    ideal_chunk_size(size).min(size)
}

/// The second LOADRAM/DUMPRAM parameter: chunk byte count in the low 24
/// bits, bank id in the high 8.
fn pack_size_and_bank(len: usize, bank: Bank) -> u32 {
    (len as u32 & 0x00FF_FFFF) | ((bank.id() as u32) << 24)
}

/// Upload from `source` into a memory bank on the device.
///
/// When `size` is `None` it is derived from the remaining readable length
/// of `source` (current position to end, position untouched). Returns the
/// number of bytes moved.
#[instrument(skip(transport, observer, source))]
pub fn upload<T, R, O>(
    transport: &T,
    observer: &O,
    source: &mut R,
    size: Option<u64>,
    offset: u32,
    bank: Bank,
) -> Result<u64, DeviceError>
where
    T: UsbTransport + ?Sized,
    R: Read + Seek,
    O: SessionObserver + ?Sized,
{
    let size = match size {
        Some(size) => size,
        None => remaining_len(source)?,
    };
    if size == 0 {
        debug!("Nothing to upload");
        return Ok(0);
    }

    let chunk_size = chunk_size_for(size) as usize;
    transport.set_chunk_size(chunk_size)?;
    info!(
        kbytes = size / 1024,
        offset = %format!("0x{:06X}", offset),
        chunk_size,
        "Uploading"
    );
    observer.on_event(&SessionEvent::TransferStarted {
        direction: TransferDirection::Upload,
        total: size,
        offset,
        bank,
    });

    let mut buffer = vec![0u8; chunk_size];
    let mut moved: u64 = 0;
    let mut offset = offset;

    while moved < size {
        let want = chunk_size.min((size - moved) as usize);
        source.read_exact(&mut buffer[..want])?;

        let frame = CommandFrame::new(CMD_LOADRAM, &[offset, pack_size_and_bank(want, bank)])?;
        transport.write(frame.as_bytes())?;

        let sent = with_bulk_retry(transport, observer, TransferDirection::Upload, moved, || {
            transport.write(&buffer[..want])
        })?;

        if sent < want {
            // Push unsent bytes back so the next chunk resumes exactly
            // where the link stopped.
            source.seek(SeekFrom::Current(-((want - sent) as i64)))?;
        }

        offset = offset.wrapping_add(sent as u32);
        moved += sent as u64;
        observer.on_event(&SessionEvent::TransferProgress {
            direction: TransferDirection::Upload,
            transferred: moved,
            total: size,
        });
    }

    observer.on_event(&SessionEvent::TransferComplete {
        direction: TransferDirection::Upload,
        bytes: moved,
    });
    Ok(moved)
}

/// Download from a memory bank on the device into `sink`.
///
/// The device has no bank-capacity query, so when `size` is `None` the
/// transfer falls back to a fixed 256 MiB upper bound. Returns the number
/// of bytes moved.
#[instrument(skip(transport, observer, sink))]
pub fn download<T, W, O>(
    transport: &T,
    observer: &O,
    sink: &mut W,
    size: Option<u64>,
    offset: u32,
    bank: Bank,
) -> Result<u64, DeviceError>
where
    T: UsbTransport + ?Sized,
    W: Write,
    O: SessionObserver + ?Sized,
{
    let size = size.unwrap_or(DOWNLOAD_SIZE_FALLBACK);
    if size == 0 {
        debug!("Nothing to download");
        return Ok(0);
    }

    let chunk_size = chunk_size_for(size) as usize;
    transport.set_chunk_size(chunk_size)?;
    info!(kbytes = size / 1024, chunk_size, "Downloading");
    observer.on_event(&SessionEvent::TransferStarted {
        direction: TransferDirection::Download,
        total: size,
        offset,
        bank,
    });

    let mut buffer = vec![0u8; chunk_size];
    let mut moved: u64 = 0;
    let mut offset = offset;

    while moved < size {
        let want = chunk_size.min((size - moved) as usize);

        let frame = CommandFrame::new(CMD_DUMPRAM, &[offset, pack_size_and_bank(want, bank)])?;
        transport.write(frame.as_bytes())?;

        let received = with_bulk_retry(
            transport,
            observer,
            TransferDirection::Download,
            moved,
            || transport.read(&mut buffer[..want]),
        )?;

        sink.write_all(&buffer[..received])?;

        offset = offset.wrapping_add(received as u32);
        moved += received as u64;
        observer.on_event(&SessionEvent::TransferProgress {
            direction: TransferDirection::Download,
            transferred: moved,
            total: size,
        });
    }

    observer.on_event(&SessionEvent::TransferComplete {
        direction: TransferDirection::Download,
        bytes: moved,
    });
    Ok(moved)
}

/// One bulk attempt with the shared retry policy: zero progress or a link
/// error retries after a short delay and a buffer purge; exhaustion aborts
/// the call carrying the bytes moved in prior chunks.
fn with_bulk_retry<T, O, F>(
    transport: &T,
    observer: &O,
    direction: TransferDirection,
    moved: u64,
    mut bulk_op: F,
) -> Result<usize, DeviceError>
where
    T: UsbTransport + ?Sized,
    O: SessionObserver + ?Sized,
    F: FnMut() -> Result<usize, TransportError>,
{
    retry_with_recovery(
        BULK_RETRY_ATTEMPTS,
        |attempt| {
            if attempt > 0 {
                observer.on_event(&SessionEvent::TransferRetry { direction, attempt });
            }
            match bulk_op() {
                Ok(0) => Err(TransportError::Stalled),
                Ok(n) => Ok(n),
                Err(e) => Err(e),
            }
        },
        |err| {
            debug!(error = %err, "Bulk transfer failed, purging and retrying");
            thread::sleep(Duration::from_millis(BULK_RETRY_DELAY_MS));
            let _ = transport.purge();
            true
        },
    )
    .map_err(|source| DeviceError::RetryExhausted {
        direction,
        attempts: BULK_RETRY_ATTEMPTS,
        bytes_transferred: moved,
        source,
    })
}

fn remaining_len<R: Seek>(source: &mut R) -> std::io::Result<u64> {
    let current = source.stream_position()?;
    let end = source.seek(SeekFrom::End(0))?;
    source.seek(SeekFrom::Start(current))?;
    Ok(end.saturating_sub(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::MockTransport;
    use std::io::Cursor;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_chunk_size_tiers() {
        assert_eq!(chunk_size_for(MIB), 4 * 131072);
        assert_eq!(chunk_size_for(2 * MIB), 4 * 131072);
        assert_eq!(chunk_size_for(2 * MIB + 1), 2 * MIB + 1);
        assert_eq!(chunk_size_for(8 * MIB), 16 * 131072);
        assert_eq!(chunk_size_for(16 * MIB), 16 * 131072);
        assert_eq!(chunk_size_for(64 * MIB), 32 * 131072);
    }

    #[test]
    fn test_chunk_size_monotone_and_aligned() {
        let mut last = 0;
        for size in (0..256 * MIB).step_by(7 * 1024 * 1024 + 13) {
            let ideal = ideal_chunk_size(size);
            assert_eq!(ideal % 131072, 0);
            assert!(ideal >= last);
            last = ideal;
            assert_eq!(chunk_size_for(size), ideal.min(size));
        }
    }

    #[test]
    fn test_chunk_clamps_to_small_size() {
        assert_eq!(chunk_size_for(100), 100);
        assert_eq!(chunk_size_for(1), 1);
        assert_eq!(chunk_size_for(0), 0);
    }

    #[test]
    fn test_pack_size_and_bank() {
        assert_eq!(pack_size_and_bank(0x123456, Bank::Eeprom16), 0x0612_3456);
        assert_eq!(pack_size_and_bank(524288, Bank::CartRom), 0x0108_0000);
    }

    #[test]
    fn test_upload_one_mib_runs_two_chunks() {
        let mock = MockTransport::new();
        let data: Vec<u8> = (0..MIB).map(|i| i as u8).collect();
        let mut source = Cursor::new(data.clone());

        let moved = upload(&mock, &NullObserver, &mut source, None, 0, Bank::CartRom).unwrap();
        assert_eq!(moved, MIB);
        assert_eq!(mock.chunk_sizes(), vec![524288]);

        let writes = mock.writes();
        assert_eq!(writes.len(), 4); // cmd, bulk, cmd, bulk

        // First chunk: offset 0, 524288 bytes to bank 1.
        assert_eq!(
            writes[0],
            &[0x20, b'C', b'M', b'D', 0, 0, 0, 0, 0x01, 0x08, 0x00, 0x00]
        );
        assert_eq!(writes[1], &data[..524288]);

        // Second chunk resumes at offset 524288.
        assert_eq!(
            writes[2],
            &[0x20, b'C', b'M', b'D', 0x00, 0x08, 0x00, 0x00, 0x01, 0x08, 0x00, 0x00]
        );
        assert_eq!(writes[3], &data[524288..]);
    }

    #[test]
    fn test_upload_small_size_single_clamped_chunk() {
        let mock = MockTransport::new();
        let mut source = Cursor::new(vec![0x5A; 100]);

        let moved = upload(&mock, &NullObserver, &mut source, None, 0, Bank::Sram256).unwrap();
        assert_eq!(moved, 100);
        assert_eq!(mock.chunk_sizes(), vec![100]);

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[0],
            &[0x20, b'C', b'M', b'D', 0, 0, 0, 0, 0x02, 0x00, 0x00, 0x64]
        );
        assert_eq!(writes[1].len(), 100);
    }

    #[test]
    fn test_upload_derives_size_from_current_position() {
        let mock = MockTransport::new();
        let data: Vec<u8> = (0u8..10).collect();
        let mut source = Cursor::new(data);
        source.set_position(4);

        let moved = upload(&mock, &NullObserver, &mut source, None, 0, Bank::CartRom).unwrap();
        assert_eq!(moved, 6);
        assert_eq!(mock.writes()[1], &[4, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_upload_retry_then_success_purges_between_attempts() {
        let mock = MockTransport::new();
        mock.fail_bulk_writes(2);
        let mut source = Cursor::new(vec![0u8; 100]);

        let moved = upload(&mock, &NullObserver, &mut source, None, 0, Bank::CartRom).unwrap();
        assert_eq!(moved, 100);
        assert_eq!(mock.purge_count(), 2);
        assert_eq!(mock.bulk_writes().len(), 1);
    }

    #[test]
    fn test_upload_aborts_after_five_attempts() {
        let mock = MockTransport::new();
        mock.fail_bulk_writes(5);
        let mut source = Cursor::new(vec![0u8; 100]);

        let err = upload(&mock, &NullObserver, &mut source, None, 0, Bank::CartRom).unwrap_err();
        match err {
            DeviceError::RetryExhausted {
                attempts,
                bytes_transferred,
                ..
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(bytes_transferred, 0);
            }
            other => panic!("unexpected error: {other}"),
        }
        // Recovery (sleep + purge) runs before each of the four retries.
        assert_eq!(mock.purge_count(), 4);
    }

    #[test]
    fn test_download_one_mib_two_chunks() {
        let mock = MockTransport::new();
        mock.queue_response(&vec![0xAA; 524288]);
        mock.queue_response(&vec![0xBB; 524288]);
        let mut sink = Vec::new();

        let moved = download(
            &mock,
            &NullObserver,
            &mut sink,
            Some(MIB),
            0,
            Bank::CartRom,
        )
        .unwrap();
        assert_eq!(moved, MIB);
        assert_eq!(sink.len(), MIB as usize);
        assert!(sink[..524288].iter().all(|&b| b == 0xAA));
        assert!(sink[524288..].iter().all(|&b| b == 0xBB));

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[0],
            &[0x30, b'C', b'M', b'D', 0, 0, 0, 0, 0x01, 0x08, 0x00, 0x00]
        );
        assert_eq!(
            writes[1],
            &[0x30, b'C', b'M', b'D', 0x00, 0x08, 0x00, 0x00, 0x01, 0x08, 0x00, 0x00]
        );
    }

    #[test]
    fn test_download_stalls_abort_with_zero_progress() {
        let mock = MockTransport::new();
        let mut sink = Vec::new();

        let err = download(
            &mock,
            &NullObserver,
            &mut sink,
            Some(100),
            0,
            Bank::FlashRam1M,
        )
        .unwrap_err();
        match err {
            DeviceError::RetryExhausted {
                attempts,
                bytes_transferred,
                source,
                ..
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(bytes_transferred, 0);
                assert!(matches!(source, TransportError::Stalled));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(sink.is_empty());
    }

    #[test]
    fn test_download_reports_partial_progress_on_failure() {
        let mock = MockTransport::new();
        mock.queue_response(&vec![0xCC; 524288]);
        let mut sink = Vec::new();

        let err = download(&mock, &NullObserver, &mut sink, Some(MIB), 0, Bank::CartRom)
            .unwrap_err();
        assert_eq!(err.bytes_transferred(), Some(524288));
        // The first chunk landed before the failure.
        assert_eq!(sink.len(), 524288);
    }

    #[test]
    fn test_download_partial_chunk_advances_position() {
        let mock = MockTransport::new();
        // The link delivers the 100-byte chunk in two short reads.
        mock.queue_response(&vec![0x11; 60]);
        mock.queue_response(&vec![0x22; 40]);
        let mut sink = Vec::new();

        let moved = download(
            &mock,
            &NullObserver,
            &mut sink,
            Some(100),
            0x40,
            Bank::CartRom,
        )
        .unwrap();
        assert_eq!(moved, 100);
        assert_eq!(sink.len(), 100);

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        // Second command resumes at 0x40 + 60, asking for the remaining 40.
        assert_eq!(
            writes[1],
            &[0x30, b'C', b'M', b'D', 0, 0, 0, 0x7C, 0x01, 0x00, 0x00, 0x28]
        );
    }
}
