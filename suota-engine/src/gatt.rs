//! Request/response helpers over a [`Transport`] and its event queues

use std::time::Duration;

use log::{debug, warn};
use suota_proto::{DeviceStatus, decode_le_uint};
use tokio::time::Instant;

use crate::error::{Step, SuotaError, WriteFailure};
use crate::transport::{EventQueues, Handle, Transport, TransportError};

/// A transport paired with its queues; every wait is bounded by `timeout`
pub struct Gatt<'a, T> {
    transport: &'a mut T,
    queues: &'a mut EventQueues,
    timeout: Duration,
}

impl<'a, T: Transport> Gatt<'a, T> {
    pub fn new(transport: &'a mut T, queues: &'a mut EventQueues, timeout: Duration) -> Self {
        Self { transport, queues, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn queues(&mut self) -> &mut EventQueues {
        &mut *self.queues
    }

    pub fn is_connected(&self) -> bool {
        self.queues.is_connected()
    }

    /// Read `handle` and wait for its value. Results for other handles are
    /// skipped without extending the deadline.
    pub async fn read(&mut self, handle: Handle, characteristic: &'static str) -> Result<Vec<u8>, SuotaError> {
        self.transport.read(handle).await?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.queues.next_read(remaining).await {
                Some(result) if result.handle == handle => return Ok(result.value),
                Some(result) => {
                    warn!("skipping read result for {} while waiting for {characteristic}", result.handle);
                }
                None => {
                    return Err(SuotaError::NegotiationTimeout {
                        characteristic,
                        timeout: self.timeout,
                    });
                }
            }
        }
    }

    pub async fn read_uint(&mut self, handle: Handle, characteristic: &'static str) -> Result<u32, SuotaError> {
        let value = self.read(handle, characteristic).await?;
        Ok(decode_le_uint(&value))
    }

    /// Write with response and wait for the confirmation
    pub async fn write_acked(&mut self, handle: Handle, value: &[u8]) -> Result<(), WriteFailure> {
        self.transport
            .write(handle, value, true)
            .await
            .map_err(|e| WriteFailure::Transport(e.to_string()))?;

        // confirmations for other handles are skipped, the deadline stays put
        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.queues.next_write_status(remaining).await {
                None => return Err(WriteFailure::NoConfirmation(self.timeout)),
                Some(status) if status.handle != handle => {
                    warn!("skipping write confirmation for {} while writing {handle}", status.handle);
                }
                Some(status) if status.is_ok() => {
                    debug!("write to {handle} confirmed");
                    return Ok(());
                }
                Some(status) => return Err(WriteFailure::Rejected(status.code)),
            }
        }
    }

    /// Write without response
    pub async fn write(&mut self, handle: Handle, value: &[u8]) -> Result<(), TransportError> {
        self.transport.write(handle, value, false).await
    }

    pub async fn subscribe(&mut self, handle: Handle) -> Result<(), TransportError> {
        self.transport.subscribe(handle).await
    }

    /// Next status notification from the device
    pub async fn next_status(&mut self, step: Step) -> Result<DeviceStatus, SuotaError> {
        match self.queues.next_notification(self.timeout).await {
            Some(notification) => {
                let code = notification.value.first().copied().unwrap_or(0);
                Ok(DeviceStatus::from_code(code))
            }
            None => Err(SuotaError::StatusTimeout { step, timeout: self.timeout }),
        }
    }

    /// Next status notification, which must be SUOTA_STATUS_CMP_OK
    pub async fn expect_completed(&mut self, step: Step) -> Result<DeviceStatus, SuotaError> {
        let status = self.next_status(step).await?;
        if status.is_success() {
            Ok(status)
        } else {
            Err(SuotaError::from_status(step, status))
        }
    }

    /// Best effort; a failure here only gets logged
    pub async fn disconnect_all(&mut self) {
        if let Err(e) = self.transport.disconnect_all().await {
            warn!("disconnect failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use suota_proto::ble;

    use super::*;
    use crate::mock::{self, MockDevice, Script};
    use crate::transport::{TransportEvent, WriteStatus, channel};

    const TIMEOUT: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn confirmation_for_another_handle_does_not_count() {
        let (sink, mut queues) = channel(8);
        let mut device = MockDevice::new(sink.clone(), Script { acks_patch_length: false, ..Script::default() });
        sink.deliver(TransportEvent::Write(WriteStatus { handle: Handle(0x24), code: 0 }))
            .await
            .unwrap();

        let mut gatt = Gatt::new(&mut device, &mut queues, TIMEOUT);
        let result = gatt.write_acked(mock::suota_handle(ble::PATCH_LEN_UUID), &[0xF4, 0x00]).await;

        assert_eq!(result, Err(WriteFailure::NoConfirmation(TIMEOUT)));
    }

    #[tokio::test]
    async fn stray_confirmation_is_skipped_before_the_real_one() {
        let (sink, mut queues) = channel(8);
        let mut device = MockDevice::new(sink.clone(), Script::default());
        sink.deliver(TransportEvent::Write(WriteStatus { handle: Handle(0x21), code: 0x0E }))
            .await
            .unwrap();

        let patch_len = mock::suota_handle(ble::PATCH_LEN_UUID);
        let mut gatt = Gatt::new(&mut device, &mut queues, TIMEOUT);
        assert_eq!(gatt.write_acked(patch_len, &[0xF4, 0x00]).await, Ok(()));
        assert!(gatt.queues().next_write_status(Duration::ZERO).await.is_none());
    }
}
