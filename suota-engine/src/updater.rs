//! Session orchestration: scan, connect, browse, negotiate, transfer, reboot

use std::time::Duration;

use log::{debug, info, warn};
use suota_proto::{DeviceStatus, SuotaVersion, adv, mem_dev};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{Step, SuotaError};
use crate::gatt::Gatt;
use crate::image::Image;
use crate::params::{TransferParameters, negotiate};
use crate::report::{Milestone, Report};
use crate::session::{Session, SuotaHandles};
use crate::transfer::TransferDriver;
use crate::transport::{EventQueues, LinkState, ServiceTable, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Discovering,
    Connecting,
    Connected,
    CapabilityCheck,
    Transferring,
    Finalizing,
    Rebooting,
    Disconnected(AttemptOutcome),
}

/// What a successful update found out along the way
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateReport {
    pub address: String,
    pub firmware_version: Option<String>,
    pub suota_version: SuotaVersion,
    pub parameters: TransferParameters,
    pub blocks: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Question {
    UpdateAnother,
    RetryAfterFailure,
}

/// Asks the operator whether to go on
#[allow(async_fn_in_trait)]
pub trait Prompt {
    async fn confirm(&mut self, question: Question) -> bool;
}

#[derive(Debug)]
pub struct RunSummary {
    pub attempts: u32,
    pub last: Option<Result<UpdateReport, SuotaError>>,
}

impl RunSummary {
    pub fn succeeded(&self) -> bool {
        matches!(self.last, Some(Ok(_)))
    }
}

pub struct Updater<T> {
    transport: T,
    queues: EventQueues,
    config: Config,
    state: SessionState,
}

impl<T: Transport> Updater<T> {
    pub fn new(transport: T, queues: EventQueues, config: Config) -> Self {
        Self {
            transport,
            queues,
            config,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Keep updating devices until the operator says stop. Image errors end
    /// the run without asking.
    pub async fn run(&mut self, image: &Image, report: &mut impl Report, prompt: &mut impl Prompt) -> RunSummary {
        let mut summary = RunSummary { attempts: 0, last: None };
        loop {
            summary.attempts += 1;
            let result = self.update_once(image, report).await;

            let question = match &result {
                Ok(_) => Some(Question::UpdateAnother),
                Err(e) if e.is_fatal() => None,
                Err(e) => {
                    warn!("attempt {} failed: {e}", summary.attempts);
                    Some(Question::RetryAfterFailure)
                }
            };
            summary.last = Some(result);

            let Some(question) = question else {
                return summary;
            };
            if !prompt.confirm(question).await {
                return summary;
            }
        }
    }

    /// One full attempt against the first SUOTA device that shows up
    pub async fn update_once(&mut self, image: &Image, report: &mut impl Report) -> Result<UpdateReport, SuotaError> {
        self.queues.clear();

        let result = self.attempt(image, report).await;
        self.state = SessionState::Disconnected(match result {
            Ok(_) => AttemptOutcome::Success,
            Err(_) => AttemptOutcome::Failure,
        });
        result
    }

    async fn attempt(&mut self, image: &Image, report: &mut impl Report) -> Result<UpdateReport, SuotaError> {
        self.state = SessionState::Discovering;
        let address = self.discover(report).await?;

        self.state = SessionState::Connecting;
        self.connect(&address, report).await?;

        self.state = SessionState::Connected;
        let result = self.update_connected(address, image, report).await;
        if let Err(e) = &result {
            debug!("disconnecting after error: {e}");
            if let Err(e) = self.transport.disconnect_all().await {
                warn!("disconnect failed: {e}");
            }
        }
        result
    }

    async fn discover(&mut self, report: &mut impl Report) -> Result<String, SuotaError> {
        report.report(Milestone::Scanning);
        self.transport.start_scan(&adv::SUOTA_SIGNATURE).await?;

        let window = self.config.scan_window;
        let deadline = Instant::now() + window;
        let mut found = None;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(device) = self.queues.next_discovered(remaining).await else {
                break;
            };
            if adv::matches(&adv::SUOTA_SIGNATURE, &device.advertising_data) {
                found = Some(device.address);
                break;
            }
            debug!("ignoring {}", device.address);
        }

        if let Err(e) = self.transport.stop_scan().await {
            warn!("cannot stop scan: {e}");
        }

        let address = found.ok_or(SuotaError::ScanTimeout { window })?;
        report.report(Milestone::DeviceFound { address: address.clone() });
        Ok(address)
    }

    async fn connect(&mut self, address: &str, report: &mut impl Report) -> Result<(), SuotaError> {
        report.report(Milestone::Connecting { address: address.to_string() });
        if let Err(e) = self.transport.connect(address).await {
            self.abandon_connect().await;
            return Err(e.into());
        }

        let timeout = self.config.connect_window;
        let deadline = Instant::now() + timeout;
        while !self.queues.is_connected() {
            if Instant::now() >= deadline {
                self.abandon_connect().await;
                return Err(SuotaError::ConnectionTimeout {
                    address: address.to_string(),
                    timeout,
                });
            }
            tokio::time::sleep(self.config.connect_poll_interval).await;
        }

        report.report(Milestone::Connected { address: address.to_string() });
        Ok(())
    }

    async fn abandon_connect(&mut self) {
        if let Err(e) = self.transport.cancel_connect().await {
            warn!("cannot cancel connect: {e}");
        }
        if let Err(e) = self.transport.disconnect_all().await {
            warn!("disconnect failed: {e}");
        }
    }

    async fn browse(&mut self, address: &str) -> Result<ServiceTable, SuotaError> {
        self.transport.browse_services().await?;

        for _ in 0..self.config.browse_poll_attempts {
            if let LinkState::Browsed(table) = self.queues.link_state() {
                debug!(
                    "{address}: {} services, {} characteristics",
                    table.services.len(),
                    table.characteristics.len()
                );
                return Ok(table);
            }
            tokio::time::sleep(self.config.browse_poll_interval).await;
        }

        if let Err(e) = self.transport.cancel_connect().await {
            warn!("cannot cancel connect: {e}");
        }
        Err(SuotaError::BrowseTimeout { address: address.to_string() })
    }

    async fn update_connected(
        &mut self,
        address: String,
        image: &Image,
        report: &mut impl Report,
    ) -> Result<UpdateReport, SuotaError> {
        let table = self.browse(&address).await?;
        let handles = SuotaHandles::from_table(&table).map_err(|reason| SuotaError::UnsupportedDevice {
            address: address.clone(),
            reason,
        })?;
        let mut session = Session::new(address, handles);

        self.state = SessionState::CapabilityCheck;
        let mut gatt = Gatt::new(&mut self.transport, &mut self.queues, self.config.response_timeout);
        let checked = check_capabilities(&mut gatt, &session, report).await?;

        let mut driver = TransferDriver::new(&self.config, checked.parameters);

        self.state = SessionState::Transferring;
        let blocks = driver.send_image(&mut gatt, &mut session, image, report).await?;

        self.state = SessionState::Finalizing;
        driver.finish(&mut gatt, &session, report).await?;

        self.state = SessionState::Rebooting;
        driver.reboot(&mut gatt, &session, report).await?;

        report.report(Milestone::Updated { address: session.address.clone() });
        Ok(UpdateReport {
            address: session.address,
            firmware_version: checked.firmware_version,
            suota_version: checked.suota_version,
            parameters: checked.parameters,
            blocks,
            elapsed: session.elapsed,
        })
    }
}

struct Capabilities {
    firmware_version: Option<String>,
    suota_version: SuotaVersion,
    parameters: TransferParameters,
}

async fn check_capabilities<T: Transport>(
    gatt: &mut Gatt<'_, T>,
    session: &Session,
    report: &mut impl Report,
) -> Result<Capabilities, SuotaError> {
    let handles = &session.handles;

    let stale = gatt.queues().drain_notifications().len() + gatt.queues().drain_indications().len();
    if stale > 0 {
        debug!("dropped {stale} stale notifications");
    }
    gatt.subscribe(handles.serv_status).await?;

    let firmware_version = match handles.firmware_revision {
        Some(handle) => match gatt.read(handle, "DIS_FIRMWARE_REVISION").await {
            Ok(value) => Some(String::from_utf8_lossy(&value).trim_end_matches('\0').to_string()),
            Err(e) => {
                warn!("cannot read firmware version: {e}");
                None
            }
        },
        None => None,
    };
    match &firmware_version {
        Some(version) => report.report(Milestone::FirmwareVersion(version.clone())),
        None => report.report(Milestone::FirmwareVersionUnavailable),
    }

    let suota_version = SuotaVersion::from_bytes(&gatt.read(handles.version, "SUOTA_VERSION").await?);
    report.report(Milestone::SuotaVersion(suota_version));

    let parameters = negotiate(gatt, handles.mtu, handles.pd_char_size).await?;
    info!("{}: {parameters}", session.address);
    report.report(Milestone::Parameters(parameters));

    // the answer that matters is the status notification below
    if let Err(failure) = gatt.write_acked(handles.mem_dev, &mem_dev::START_SPI_BANK0).await {
        warn!("start command: {failure}");
    }
    let status = gatt.next_status(Step::Start).await?;
    if status != DeviceStatus::ImgStarted {
        return Err(SuotaError::from_status(Step::Start, status));
    }
    report.report(Milestone::UpdateStarted(status));

    Ok(Capabilities {
        firmware_version,
        suota_version,
        parameters,
    })
}
