//! Block by block image transfer, end of image and reboot

use data_encoding::HEXUPPER;
use log::{debug, info, warn};
use suota_proto::{mem_dev, patch_length};
use tokio::time::Instant;

use crate::config::{Config, PatchLengthPolicy};
use crate::error::{Step, SuotaError};
use crate::gatt::Gatt;
use crate::image::Image;
use crate::params::TransferParameters;
use crate::report::{Milestone, Progress, Report};
use crate::segment::{Block, chunks};
use crate::session::Session;
use crate::transport::{LinkState, Transport};

/// Counts unacknowledged writes in flight. It never gates a write; an
/// unbalanced decrement is only logged and counted.
#[derive(Debug, Default)]
pub struct WriteCompletionCounter {
    in_flight: i64,
    faults: u32,
}

impl WriteCompletionCounter {
    pub fn begin(&mut self) {
        self.in_flight += 1;
    }

    pub fn complete(&mut self) {
        if self.in_flight <= 0 {
            warn!("write completion without a pending write (counter {})", self.in_flight);
            self.faults += 1;
        }
        self.in_flight -= 1;
    }

    pub fn in_flight(&self) -> i64 {
        self.in_flight
    }

    pub fn faults(&self) -> u32 {
        self.faults
    }
}

pub struct TransferDriver<'c> {
    config: &'c Config,
    params: TransferParameters,
    counter: WriteCompletionCounter,
    announced: Option<usize>,
}

impl<'c> TransferDriver<'c> {
    pub fn new(config: &'c Config, params: TransferParameters) -> Self {
        Self {
            config,
            params,
            counter: WriteCompletionCounter::default(),
            announced: None,
        }
    }

    pub fn counter(&self) -> &WriteCompletionCounter {
        &self.counter
    }

    /// Send every block and wait for each one to be confirmed. Returns the
    /// number of blocks sent.
    pub async fn send_image<T: Transport>(
        &mut self,
        gatt: &mut Gatt<'_, T>,
        session: &mut Session,
        image: &Image,
        report: &mut impl Report,
    ) -> Result<usize, SuotaError> {
        session.reset_cursor();
        let started = Instant::now();

        let mut sent = 0;
        let mut block = Block::first(image.len(), self.params.block_size);
        loop {
            session.cursor.block = block;
            self.send_block(gatt, session, image, block).await?;
            sent += 1;
            session.elapsed = started.elapsed();

            report.report(Milestone::Progress(Progress::after(&block, image.len())));

            if block.is_last(image.len()) {
                break;
            }
            if !self.config.block_settle.is_zero() {
                tokio::time::sleep(self.config.block_settle).await;
            }
            block = block.next(image.len(), self.params.block_size);
        }

        if self.counter.faults() > 0 {
            warn!("{} write completion faults during transfer", self.counter.faults());
        }
        Ok(sent)
    }

    async fn send_block<T: Transport>(
        &mut self,
        gatt: &mut Gatt<'_, T>,
        session: &mut Session,
        image: &Image,
        block: Block,
    ) -> Result<(), SuotaError> {
        if !gatt.is_connected() {
            return Err(SuotaError::DisconnectedDuringTransfer { offset: block.offset });
        }

        self.announce(gatt, session, block).await?;

        for chunk in chunks(block.length, self.params.chunk_size) {
            session.cursor.chunk = chunk;
            let offset = session.cursor.image_offset();
            let data = image.slice(offset, chunk.length);
            debug!("chunk @{offset}: {}", HEXUPPER.encode(data));

            self.counter.begin();
            let written = gatt.write(session.handles.patch_data, data).await;
            self.counter.complete();
            written.map_err(|source| SuotaError::ChunkWrite { offset, source })?;
        }

        gatt.expect_completed(Step::Block { offset: block.offset }).await?;
        debug!("block @{} ({} bytes) confirmed", block.offset, block.length);
        Ok(())
    }

    /// Write the block length to SUOTA_PATCH_LEN, subject to the policy
    async fn announce<T: Transport>(
        &mut self,
        gatt: &mut Gatt<'_, T>,
        session: &Session,
        block: Block,
    ) -> Result<(), SuotaError> {
        if self.config.patch_length_policy == PatchLengthPolicy::OnChange && self.announced == Some(block.length) {
            return Ok(());
        }

        // derive() keeps block_size within u16
        let length = u16::try_from(block.length).unwrap_or(u16::MAX);
        gatt.write_acked(session.handles.patch_len, &patch_length(length))
            .await
            .map_err(|failure| SuotaError::PatchLengthWrite {
                offset: block.offset,
                failure,
            })?;
        self.announced = Some(block.length);
        debug!("patch length {length} for block @{}", block.offset);

        if !self.config.patch_length_settle.is_zero() {
            tokio::time::sleep(self.config.patch_length_settle).await;
        }
        Ok(())
    }

    /// Check statuses still queued, then send the end of image command and
    /// wait for the device to accept the image
    pub async fn finish<T: Transport>(
        &mut self,
        gatt: &mut Gatt<'_, T>,
        session: &Session,
        report: &mut impl Report,
    ) -> Result<(), SuotaError> {
        for queued in gatt.queues().drain_notifications() {
            let status = suota_proto::DeviceStatus::from_code(queued.value.first().copied().unwrap_or(0));
            if !status.is_success() {
                return Err(SuotaError::from_status(Step::QueuedStatus, status));
            }
            report.report(Milestone::QueuedStatus(status));
        }

        gatt.write(session.handles.mem_dev, &mem_dev::END).await?;
        let status = gatt.expect_completed(Step::End).await?;
        report.report(Milestone::UpdateConfirmed(status));
        report.report(Milestone::ImageSent { elapsed: session.elapsed });
        Ok(())
    }

    /// Send the reboot command and wait for the link to go down
    pub async fn reboot<T: Transport>(
        &mut self,
        gatt: &mut Gatt<'_, T>,
        session: &Session,
        report: &mut impl Report,
    ) -> Result<(), SuotaError> {
        report.report(Milestone::Rebooting);
        gatt.write(session.handles.mem_dev, &mem_dev::REBOOT).await?;
        gatt.disconnect_all().await;

        let timeout = self.config.reboot_timeout;
        match gatt.queues().wait_link(timeout, |state| !state.is_connected()).await {
            Some(LinkState::Disconnected) => {
                info!("{} disconnected after reboot", session.address);
                Ok(())
            }
            _ => Err(SuotaError::RebootTimeout { timeout }),
        }
    }
}
