//! Device session - owns the opened transport and the handshake result.

use std::io::{Read, Seek, Write};
use std::sync::Arc;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::DeviceError;
use crate::events::{SessionEvent, SessionObserver, TracingObserver};
use crate::protocol::constants::{
    CMD_GETVER, CMD_SETCIC, DEV_MAGIC, GETVER_RESPONSE_LEN, HANDSHAKE_ATTEMPTS,
};
use crate::protocol::{Bank, Cic, CommandFrame, VersionInfo};
use crate::retry::retry_with_recovery;
use crate::transfer;
use crate::transport::{FtdiTransport, TransportError, UsbTransport};

/// Configuration for a device session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// USB read/write timeout in seconds.
    pub timeout_secs: u64,
    /// Suppress progress output.
    pub quiet: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 5,
            quiet: false,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// A handshake attempt either failed on the link or got a response with
/// the wrong magic word.
enum HandshakeError {
    Link(TransportError),
    BadMagic(u32),
}

/// An opened device plus its identity, once the handshake has run.
///
/// Not reentrant: one session, one in-flight operation. The wire protocol
/// has no framing to distinguish interleaved command/response pairs, so a
/// command's bulk payload must complete before the next frame is sent.
pub struct DeviceSession<T: UsbTransport, O: SessionObserver> {
    transport: T,
    observer: Arc<O>,
    hw_version: u8,
    version: Option<VersionInfo>,
}

impl DeviceSession<FtdiTransport, TracingObserver> {
    /// Open the first attached device with the default tracing observer.
    pub fn open(config: &SessionConfig) -> Result<Self, DeviceError> {
        Self::open_with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: SessionObserver + 'static> DeviceSession<FtdiTransport, O> {
    /// Open the first attached device, run the handshake, and return a
    /// ready session.
    pub fn open_with_observer(
        config: &SessionConfig,
        observer: Arc<O>,
    ) -> Result<Self, DeviceError> {
        let transport = FtdiTransport::open(Duration::from_secs(config.timeout_secs))?;
        let hw_version = transport.hw_version();
        observer.on_event(&SessionEvent::DeviceOpened {
            vid: transport.vendor_id(),
            pid: transport.product_id(),
            hw_version,
        });

        let mut session = Self::with_transport(transport, hw_version, observer);
        session.get_version()?;
        Ok(session)
    }
}

impl<T: UsbTransport, O: SessionObserver> DeviceSession<T, O> {
    /// Wrap an already-open transport. The handshake has not run yet.
    pub fn with_transport(transport: T, hw_version: u8, observer: Arc<O>) -> Self {
        Self {
            transport,
            observer,
            hw_version,
            version: None,
        }
    }

    /// Hardware version (1 or 2) learned from USB enumeration.
    pub fn hw_version(&self) -> u8 {
        self.hw_version
    }

    /// Identity from the handshake, if it has run.
    pub fn version_info(&self) -> Option<&VersionInfo> {
        self.version.as_ref()
    }

    /// Run the version handshake: send GETVER, read the 64-byte response,
    /// and validate the magic word, retrying the whole exchange on mismatch.
    ///
    /// Four consecutive mismatches mean the link is wedged; the only
    /// recovery the protocol offers is a physical power cycle, which the
    /// surfaced error spells out.
    #[instrument(skip(self))]
    pub fn get_version(&mut self) -> Result<VersionInfo, DeviceError> {
        let frame = CommandFrame::new(CMD_GETVER, &[])?;

        let result = retry_with_recovery(
            HANDSHAKE_ATTEMPTS,
            |attempt| {
                self.transport
                    .write(frame.as_bytes())
                    .map_err(HandshakeError::Link)?;

                let mut response = [0u8; GETVER_RESPONSE_LEN];
                self.transport
                    .read_exact(&mut response)
                    .map_err(HandshakeError::Link)?;

                let magic = BigEndian::read_u32(&response[4..8]);
                if magic != DEV_MAGIC {
                    warn!(
                        attempt,
                        magic = %format!("0x{:08X}", magic),
                        expected = %format!("0x{:08X}", DEV_MAGIC),
                        "Incorrect magic in version response"
                    );
                    self.observer
                        .on_event(&SessionEvent::HandshakeRejected { attempt, magic });
                    return Err(HandshakeError::BadMagic(magic));
                }
                Ok(response)
            },
            |_err| true,
        );

        match result {
            Ok(response) => {
                let variant = [response[0], response[1], response[2]];
                let version = VersionInfo::new(variant, self.hw_version);
                info!(version = %version, "Device identified");
                self.observer.on_event(&SessionEvent::HandshakeComplete {
                    variant: version.variant_str(),
                    hw_version: self.hw_version,
                });
                self.version = Some(version);
                Ok(version)
            }
            Err(HandshakeError::BadMagic(_)) => Err(DeviceError::CommunicationFailure {
                attempts: HANDSHAKE_ATTEMPTS,
            }),
            Err(HandshakeError::Link(e)) => Err(DeviceError::Transport(e)),
        }
    }

    /// Upload from `source` into a memory bank. See [`transfer::upload`].
    pub fn upload<R: Read + Seek>(
        &mut self,
        source: &mut R,
        size: Option<u64>,
        offset: u32,
        bank: Bank,
    ) -> Result<u64, DeviceError> {
        transfer::upload(
            &self.transport,
            self.observer.as_ref(),
            source,
            size,
            offset,
            bank,
        )
    }

    /// Download a memory bank into `sink`. See [`transfer::download`].
    pub fn download<W: Write>(
        &mut self,
        sink: &mut W,
        size: Option<u64>,
        offset: u32,
        bank: Bank,
    ) -> Result<u64, DeviceError> {
        transfer::download(
            &self.transport,
            self.observer.as_ref(),
            sink,
            size,
            offset,
            bank,
        )
    }

    /// Select the CIC the device emulates. Revision "A" hardware cannot do
    /// this; the call fails before anything touches the wire.
    #[instrument(skip(self))]
    pub fn set_cic(&mut self, cic: Cic) -> Result<(), DeviceError> {
        let version = self.version.ok_or(DeviceError::HandshakeRequired)?;
        if !version.supports_cic_select() {
            return Err(DeviceError::CapabilityUnsupported {
                variant: version.variant_str(),
            });
        }

        info!(cic = %cic, "Selecting CIC mode");
        let frame = CommandFrame::new(CMD_SETCIC, &[cic.request_param()])?;
        self.transport.write(frame.as_bytes())?;
        self.observer.on_event(&SessionEvent::CicSelected { cic });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;
    use crate::transport::MockTransport;

    fn version_response(variant: &[u8; 3], magic: u32) -> Vec<u8> {
        let mut response = vec![0u8; GETVER_RESPONSE_LEN];
        response[..3].copy_from_slice(variant);
        BigEndian::write_u32(&mut response[4..8], magic);
        response
    }

    fn session(mock: MockTransport) -> DeviceSession<MockTransport, NullObserver> {
        DeviceSession::with_transport(mock, 2, Arc::new(NullObserver))
    }

    #[test]
    fn test_handshake_accepts_first_matching_response() {
        let mock = MockTransport::new();
        mock.queue_response(&version_response(b"B2F", DEV_MAGIC));

        let mut session = session(mock);
        let version = session.get_version().unwrap();
        assert_eq!(version.variant(), *b"B2F");
        assert_eq!(version.hw_version(), 2);
        assert_eq!(session.version_info(), Some(&version));

        let writes = session.transport.writes();
        assert_eq!(writes, vec![vec![0x80, b'C', b'M', b'D']]);
    }

    #[test]
    fn test_handshake_retries_mismatched_magic() {
        let mock = MockTransport::new();
        mock.queue_response(&version_response(b"B2F", 0xDEAD_BEEF));
        mock.queue_response(&version_response(b"B2F", 0));
        mock.queue_response(&version_response(b"B2F", DEV_MAGIC));

        let mut session = session(mock);
        let version = session.get_version().unwrap();
        assert_eq!(version.variant(), *b"B2F");
        // One GETVER frame per attempt.
        assert_eq!(session.transport.writes().len(), 3);
    }

    #[test]
    fn test_handshake_rejects_after_exactly_four_tries() {
        let mock = MockTransport::new();
        for _ in 0..6 {
            mock.queue_response(&version_response(b"B2F", 0x1234_5678));
        }

        let mut session = session(mock);
        let err = session.get_version().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::CommunicationFailure { attempts: 4 }
        ));
        assert_eq!(session.transport.writes().len(), 4);
        assert!(session.version_info().is_none());
    }

    #[test]
    fn test_handshake_surfaces_link_stall() {
        let mock = MockTransport::new();

        let mut session = session(mock);
        let err = session.get_version().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::Transport(TransportError::Stalled)
        ));
    }

    #[test]
    fn test_set_cic_requires_handshake() {
        let mock = MockTransport::new();
        let mut session = session(mock);
        assert!(matches!(
            session.set_cic(Cic::Cic6102),
            Err(DeviceError::HandshakeRequired)
        ));
    }

    #[test]
    fn test_set_cic_rejected_on_revision_a_sends_nothing() {
        let mock = MockTransport::new();
        mock.queue_response(&version_response(b"A2B", DEV_MAGIC));

        let mut session = session(mock);
        session.get_version().unwrap();
        let frames_before = session.transport.writes().len();

        let err = session.set_cic(Cic::Cic6102).unwrap_err();
        match err {
            DeviceError::CapabilityUnsupported { variant } => assert_eq!(variant, "A2B"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.transport.writes().len(), frames_before);
    }

    #[test]
    fn test_set_cic_sends_single_frame() {
        let mock = MockTransport::new();
        mock.queue_response(&version_response(b"B2F", DEV_MAGIC));

        let mut session = session(mock);
        session.get_version().unwrap();
        session.set_cic(Cic::Cic6102).unwrap();

        let writes = session.transport.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[1], vec![0x72, b'C', b'M', b'D', 0x80, 0, 0, 0x01]);
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = SessionConfig {
            timeout_secs: 9,
            quiet: true,
        };
        let text = toml::to_string(&config).unwrap();
        let parsed: SessionConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
