use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use suota_proto::DeviceStatus;

use crate::transport::TransportError;

/// Protocol step a device status or timeout belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Start,
    Block { offset: usize },
    QueuedStatus,
    End,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Start => write!(f, "start command"),
            Step::Block { offset } => write!(f, "block at offset {offset}"),
            Step::QueuedStatus => write!(f, "queued status"),
            Step::End => write!(f, "end command"),
        }
    }
}

/// Why an acknowledged write did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteFailure {
    NoConfirmation(Duration),
    Rejected(u8),
    Transport(String),
}

impl fmt::Display for WriteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteFailure::NoConfirmation(timeout) => write!(f, "no write confirmation within {timeout:?}"),
            WriteFailure::Rejected(code) => write!(f, "write status 0x{code:02X}"),
            WriteFailure::Transport(e) => write!(f, "{e}"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SuotaError {
    #[error("cannot read firmware image {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("firmware image is {size} bytes, the limit is {max} bytes")]
    ImageTooLarge { size: usize, max: usize },
    #[error("firmware image is empty")]
    EmptyImage,
    #[error("unusable transfer limits: mtu {mtu}, patch data size {patch_size}")]
    InvalidParameters { mtu: usize, patch_size: usize },
    #[error("cannot read {characteristic}: no response within {timeout:?}")]
    NegotiationTimeout {
        characteristic: &'static str,
        timeout: Duration,
    },
    #[error("cannot write patch length for block at offset {offset}: {failure}")]
    PatchLengthWrite { offset: usize, failure: WriteFailure },
    #[error("cannot write chunk at image offset {offset}: {source}")]
    ChunkWrite {
        offset: usize,
        #[source]
        source: TransportError,
    },
    #[error("{step}: device is already updated, {status}")]
    SameImage { step: Step, status: DeviceStatus },
    #[error("{step}: invalid product header, {status}")]
    InvalidProductHeader { step: Step, status: DeviceStatus },
    #[error("{step}: device reported {status}")]
    DeviceReported { step: Step, status: DeviceStatus },
    #[error("{step}: no status notification within {timeout:?}")]
    StatusTimeout { step: Step, timeout: Duration },
    #[error("cannot connect to {address} within {timeout:?}")]
    ConnectionTimeout { address: String, timeout: Duration },
    #[error("no device in SUOTA mode found within {window:?}")]
    ScanTimeout { window: Duration },
    #[error("service discovery on {address} did not complete")]
    BrowseTimeout { address: String },
    #[error("device {address} does not support SUOTA: {reason}")]
    UnsupportedDevice { address: String, reason: String },
    #[error("link dropped before block at offset {offset}")]
    DisconnectedDuringTransfer { offset: usize },
    #[error("device did not disconnect within {timeout:?} after reboot")]
    RebootTimeout { timeout: Duration },
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl SuotaError {
    /// Map a non-success device status to the matching error
    pub fn from_status(step: Step, status: DeviceStatus) -> Self {
        match status {
            DeviceStatus::SameImageError => SuotaError::SameImage { step, status },
            DeviceStatus::InvalidProductHeader => SuotaError::InvalidProductHeader { step, status },
            _ => SuotaError::DeviceReported { step, status },
        }
    }

    /// Image errors end the process, everything else can be retried
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SuotaError::Io { .. } | SuotaError::ImageTooLarge { .. } | SuotaError::EmptyImage
        )
    }

    /// Status code the device reported, if this error came from one
    pub fn device_status(&self) -> Option<DeviceStatus> {
        match self {
            SuotaError::SameImage { status, .. }
            | SuotaError::InvalidProductHeader { status, .. }
            | SuotaError::DeviceReported { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_distinguishes_variants() {
        let same = SuotaError::from_status(Step::Start, DeviceStatus::SameImageError);
        assert!(matches!(same, SuotaError::SameImage { step: Step::Start, .. }));

        let header = SuotaError::from_status(Step::Block { offset: 244 }, DeviceStatus::InvalidProductHeader);
        assert!(matches!(header, SuotaError::InvalidProductHeader { .. }));

        let crc = SuotaError::from_status(Step::End, DeviceStatus::CrcError);
        assert_eq!(crc.device_status(), Some(DeviceStatus::CrcError));
        assert_eq!(crc.to_string(), "end command: device reported 0x04 (SUOTA_STATUS_CRC_ERR)");
    }

    #[test]
    fn only_image_errors_are_fatal() {
        assert!(SuotaError::ImageTooLarge { size: 1, max: 0 }.is_fatal());
        assert!(!SuotaError::ScanTimeout { window: Duration::from_secs(1) }.is_fatal());
    }
}
