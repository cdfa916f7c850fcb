//! Connection scoped state

use std::time::Duration;

use suota_proto::ble;
use uuid::Uuid;

use crate::segment::TransferCursor;
use crate::transport::{Handle, ServiceTable};

/// Handles of the SUOTA characteristics on the connected device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuotaHandles {
    pub mem_dev: Handle,
    pub gpio_map: Handle,
    pub mem_info: Handle,
    pub patch_len: Handle,
    pub patch_data: Handle,
    pub serv_status: Handle,
    pub version: Handle,
    pub pd_char_size: Handle,
    pub mtu: Handle,
    /// Device Information firmware revision, optional
    pub firmware_revision: Option<Handle>,
}

impl SuotaHandles {
    /// Pick the SUOTA handles out of a browse result. Errors name what is
    /// missing.
    pub fn from_table(table: &ServiceTable) -> Result<Self, String> {
        if !table.has_service(Uuid::from_u128(ble::SERVICE_UUID)) {
            return Err(format!("service 0x{:04x} not found", ble::SERVICE_UUID16));
        }

        let missing: Vec<&str> = ble::SUOTA_CHARACTERISTICS
            .iter()
            .filter(|(_, uuid)| table.handle_of(Uuid::from_u128(*uuid)).is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(format!("missing characteristics {}", missing.join(", ")));
        }

        let handle = |uuid: u128| table.handle_of(Uuid::from_u128(uuid)).unwrap_or(Handle(0));
        Ok(Self {
            mem_dev: handle(ble::MEM_DEV_UUID),
            gpio_map: handle(ble::GPIO_MAP_UUID),
            mem_info: handle(ble::MEM_INFO_UUID),
            patch_len: handle(ble::PATCH_LEN_UUID),
            patch_data: handle(ble::PATCH_DATA_UUID),
            serv_status: handle(ble::SERV_STATUS_UUID),
            version: handle(ble::VERSION_UUID),
            pd_char_size: handle(ble::PD_CHAR_SIZE_UUID),
            mtu: handle(ble::MTU_UUID),
            firmware_revision: table.handle_of(Uuid::from_u128(ble::DIS_FIRMWARE_REVISION_UUID)),
        })
    }
}

/// One connection to one device; dropped on disconnect or success
#[derive(Debug, Clone)]
pub struct Session {
    pub address: String,
    pub handles: SuotaHandles,
    pub cursor: TransferCursor,
    /// Time spent writing blocks
    pub elapsed: Duration,
}

impl Session {
    pub fn new(address: String, handles: SuotaHandles) -> Self {
        Self {
            address,
            handles,
            cursor: TransferCursor::default(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn reset_cursor(&mut self) {
        self.cursor = TransferCursor::default();
        self.elapsed = Duration::ZERO;
    }
}
