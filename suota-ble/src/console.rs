use suota_engine::{Milestone, Progress, Report};

/// Prints milestones for the operator
pub struct Console;

pub fn describe(milestone: &Milestone) -> String {
    match milestone {
        Milestone::Scanning => "Looking for a device in SUOTA mode...".to_string(),
        Milestone::DeviceFound { address } => format!("Found device ({address})"),
        Milestone::Connecting { address } => format!("Connecting to {address}..."),
        Milestone::Connected { address } => format!("Connected to {address}"),
        Milestone::FirmwareVersion(version) => format!("Current firmware version: {version}"),
        Milestone::FirmwareVersionUnavailable => "Cannot read firmware version!".to_string(),
        Milestone::SuotaVersion(version) => format!("SUOTA version: {version}"),
        Milestone::Parameters(params) => format!("Device supports SUOTA ({params})"),
        Milestone::UpdateStarted(status) => format!("Update started: {status}"),
        Milestone::Progress(Progress::Uploading(percent)) => format!("Uploading : {percent:.1} %"),
        Milestone::Progress(Progress::Complete) => "Upload complete.".to_string(),
        Milestone::QueuedStatus(status) => format!("OK: {status}"),
        Milestone::UpdateConfirmed(status) => format!("Update successful: {status}"),
        Milestone::ImageSent { elapsed } => format!("Image sent in {:.2}s", elapsed.as_secs_f64()),
        Milestone::Rebooting => "Rebooting device.".to_string(),
        Milestone::Updated { address } => format!("{address} updated successfully!"),
    }
}

impl Report for Console {
    fn report(&mut self, milestone: Milestone) {
        println!("{}", describe(&milestone));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use suota_proto::DeviceStatus;

    use super::*;

    #[test]
    fn progress_lines() {
        assert_eq!(describe(&Milestone::Progress(Progress::Uploading(24.37))), "Uploading : 24.4 %");
        assert_eq!(describe(&Milestone::Progress(Progress::Complete)), "Upload complete.");
    }

    #[test]
    fn status_lines_carry_symbolic_names() {
        assert_eq!(
            describe(&Milestone::UpdateStarted(DeviceStatus::ImgStarted)),
            "Update started: 0x10 (SUOTA_STATUS_IMG_STARTED)"
        );
        assert_eq!(
            describe(&Milestone::ImageSent { elapsed: Duration::from_millis(12_340) }),
            "Image sent in 12.34s"
        );
    }
}
