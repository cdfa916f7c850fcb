//! User facing milestones of an update

use std::time::Duration;

use suota_proto::{DeviceStatus, SuotaVersion};

use crate::params::TransferParameters;
use crate::segment::Block;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Progress {
    Uploading(f64),
    Complete,
}

impl Progress {
    /// Progress once `block` has been confirmed
    pub fn after(block: &Block, total: usize) -> Self {
        if block.end() >= total {
            Progress::Complete
        } else {
            Progress::Uploading((block.end() * 100) as f64 / total as f64)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Milestone {
    Scanning,
    DeviceFound { address: String },
    Connecting { address: String },
    Connected { address: String },
    FirmwareVersion(String),
    FirmwareVersionUnavailable,
    SuotaVersion(SuotaVersion),
    Parameters(TransferParameters),
    UpdateStarted(DeviceStatus),
    Progress(Progress),
    /// A status that was still queued once the last block went out
    QueuedStatus(DeviceStatus),
    UpdateConfirmed(DeviceStatus),
    ImageSent { elapsed: Duration },
    Rebooting,
    Updated { address: String },
}

/// Receives milestones as the update goes
pub trait Report {
    fn report(&mut self, milestone: Milestone);
}

impl<F: FnMut(Milestone)> Report for F {
    fn report(&mut self, milestone: Milestone) {
        self(milestone)
    }
}
