//! Mock transport for testing.

use std::collections::VecDeque;
use std::sync::Mutex;

use super::traits::{TransportError, UsbTransport};
use crate::protocol::constants::{FTDI_VENDOR_ID, HW2_PRODUCT_ID};

/// Writes at or below this length are command frames; larger ones are bulk
/// payload. Lets tests fail bulk traffic without breaking command sends.
const COMMAND_WRITE_MAX: usize = 32;

/// Mock transport for unit testing the protocol engine.
///
/// Captures every write, serves reads from a queue of canned responses, and
/// can inject failures to exercise the retry paths.
pub struct MockTransport {
    /// Queued responses returned on read, one queue entry per read call.
    read_queue: Mutex<VecDeque<Vec<u8>>>,
    /// Captured writes.
    write_log: Mutex<Vec<Vec<u8>>>,
    /// Remaining bulk-sized writes to fail.
    failing_bulk_writes: Mutex<u32>,
    /// Remaining reads to fail.
    failing_reads: Mutex<u32>,
    /// Number of purge calls observed.
    purges: Mutex<u32>,
    /// Chunk sizes pushed down by the engine.
    chunk_sizes: Mutex<Vec<usize>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            read_queue: Mutex::new(VecDeque::new()),
            write_log: Mutex::new(Vec::new()),
            failing_bulk_writes: Mutex::new(0),
            failing_reads: Mutex::new(0),
            purges: Mutex::new(0),
            chunk_sizes: Mutex::new(Vec::new()),
        }
    }

    /// Queue a response to be returned on the next read.
    pub fn queue_response(&self, bytes: &[u8]) {
        self.read_queue.lock().unwrap().push_back(bytes.to_vec());
    }

    /// Get all captured writes.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Captured writes longer than a command frame, i.e. bulk payloads.
    pub fn bulk_writes(&self) -> Vec<Vec<u8>> {
        self.writes()
            .into_iter()
            .filter(|w| w.len() > COMMAND_WRITE_MAX)
            .collect()
    }

    /// Fail the next `n` bulk-sized writes with a write error.
    pub fn fail_bulk_writes(&self, n: u32) {
        *self.failing_bulk_writes.lock().unwrap() = n;
    }

    /// Fail the next `n` reads with a read error.
    pub fn fail_reads(&self, n: u32) {
        *self.failing_reads.lock().unwrap() = n;
    }

    pub fn purge_count(&self) -> u32 {
        *self.purges.lock().unwrap()
    }

    /// Chunk sizes the engine negotiated, in order.
    pub fn chunk_sizes(&self) -> Vec<usize> {
        self.chunk_sizes.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl UsbTransport for MockTransport {
    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        if data.len() > COMMAND_WRITE_MAX {
            let mut failing = self.failing_bulk_writes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(TransportError::WriteFailed("injected failure".into()));
            }
        }
        self.write_log.lock().unwrap().push(data.to_vec());
        Ok(data.len())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        {
            let mut failing = self.failing_reads.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(TransportError::ReadFailed("injected failure".into()));
            }
        }
        let mut queue = self.read_queue.lock().unwrap();
        match queue.front_mut() {
            // An empty queue models a link that produced no data.
            None => Ok(0),
            Some(front) => {
                let n = front.len().min(buf.len());
                buf[..n].copy_from_slice(&front[..n]);
                if n < front.len() {
                    front.drain(..n);
                } else {
                    queue.pop_front();
                }
                Ok(n)
            }
        }
    }

    fn purge(&self) -> Result<(), TransportError> {
        *self.purges.lock().unwrap() += 1;
        Ok(())
    }

    fn set_chunk_size(&self, bytes: usize) -> Result<(), TransportError> {
        self.chunk_sizes.lock().unwrap().push(bytes);
        Ok(())
    }

    fn vendor_id(&self) -> u16 {
        FTDI_VENDOR_ID
    }

    fn product_id(&self) -> u16 {
        HW2_PRODUCT_ID
    }
}
