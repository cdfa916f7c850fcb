//! BLE GATT service layout of a SUOTA capable device
//!
//! UUIDs are given as `u128` so this crate stays free of dependencies; callers
//! turn them into `uuid::Uuid` with `Uuid::from_u128`.

/// 16-bit UUID of the SUOTA service
pub const SERVICE_UUID16: u16 = 0xFEF5;

/// Device Information Service: Firmware Revision String characteristic
pub const DIS_FIRMWARE_REVISION_UUID16: u16 = 0x2A26;

/// Bluetooth SIG company identifier of Smart Sensor Devices, carried in the
/// manufacturer data of a dongle in SUOTA mode
pub const COMPANY_ID: u16 = 0x075B;

const BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805F9B34FB;

/// Expand a 16-bit SIG UUID onto the Bluetooth base UUID
pub const fn uuid16(short: u16) -> u128 {
    BASE_UUID | ((short as u128) << 96)
}

/// The 16-bit form of `uuid`, if it sits on the Bluetooth base UUID
pub const fn short_uuid(uuid: u128) -> Option<u16> {
    let short = (uuid >> 96) as u16;
    if uuid16(short) == uuid { Some(short) } else { None }
}

pub const SERVICE_UUID: u128 = uuid16(SERVICE_UUID16);
pub const DIS_FIRMWARE_REVISION_UUID: u128 = uuid16(DIS_FIRMWARE_REVISION_UUID16);

/// Memory device: start, end and reboot commands (write)
pub const MEM_DEV_UUID: u128 = 0x8082caa8_41a6_4021_91c6_56f9b954cc34;

/// GPIO map of the external memory (write)
pub const GPIO_MAP_UUID: u128 = 0x724249f0_5ec3_4b5f_8804_42345af08651;

/// Memory info (read)
pub const MEM_INFO_UUID: u128 = 0x6c53db25_47a1_45fe_a022_7c92fb334fd4;

/// Length of the next block, 2 bytes little endian (write with response)
pub const PATCH_LEN_UUID: u128 = 0x9d84b9a3_000c_49d8_9183_855b673fda31;

/// Chunk data (write without response)
pub const PATCH_DATA_UUID: u128 = 0x457871e8_d516_4ca1_9116_57d0b17b9cb2;

/// Status codes (notify)
pub const SERV_STATUS_UUID: u128 = 0x5f78df94_798c_46f5_990a_b3eb6a065c88;

/// SUOTA protocol version (read)
pub const VERSION_UUID: u128 = 0x64b4e8b5_0de5_401b_a21d_acc8db3b913a;

/// Largest patch data write the device accepts (read)
pub const PD_CHAR_SIZE_UUID: u128 = 0x42c3dfdd_77be_4d9c_8454_8f875267fb3b;

/// MTU negotiated by the device (read)
pub const MTU_UUID: u128 = 0xb7de1eea_823d_43bb_a3af_c4903dfce23c;

/// The nine characteristics every SUOTA service exposes
pub const SUOTA_CHARACTERISTICS: [(&str, u128); 9] = [
    ("SUOTA_MEM_DEV", MEM_DEV_UUID),
    ("SUOTA_GPIO_MAP", GPIO_MAP_UUID),
    ("SUOTA_MEM_INFO", MEM_INFO_UUID),
    ("SUOTA_PATCH_LEN", PATCH_LEN_UUID),
    ("SUOTA_PATCH_DATA", PATCH_DATA_UUID),
    ("SUOTA_SERV_STATUS", SERV_STATUS_UUID),
    ("SUOTA_VERSION", VERSION_UUID),
    ("SUOTA_PD_CHAR_SIZE", PD_CHAR_SIZE_UUID),
    ("SUOTA_MTU", MTU_UUID),
];
