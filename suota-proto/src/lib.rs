//! SUOTA wire protocol - status codes, memory device commands and framing

pub mod adv;
pub mod ble;

use std::fmt;

/// Largest firmware payload accepted, checksum byte excluded (300 KiB)
pub const MAX_IMAGE_SIZE: usize = 0x4B000;
pub const CHECKSUM_SIZE: usize = 1;

/// Fixed ATT overhead subtracted from the MTU to get the usable payload
pub const ATT_HEADER_SIZE: usize = 3;

// SUOTA_SERV_STATUS codes
pub const STATUS_SRV_STARTED: u8 = 0x01;
pub const STATUS_CMP_OK: u8 = 0x02;
pub const STATUS_SRV_EXIT: u8 = 0x03;
pub const STATUS_CRC_ERR: u8 = 0x04;
pub const STATUS_PATCH_LEN_ERR: u8 = 0x05;
pub const STATUS_EXT_MEM_ERR: u8 = 0x06;
pub const STATUS_INT_MEM_ERR: u8 = 0x07;
pub const STATUS_INVAL_MEM_TYPE: u8 = 0x08;
pub const STATUS_APP_ERROR: u8 = 0x09;
pub const STATUS_IMG_STARTED: u8 = 0x10;
pub const STATUS_INVALID_IMAGE_BANK: u8 = 0x11;
pub const STATUS_INVALID_IMAGE_HEADER: u8 = 0x12;
pub const STATUS_INVALID_IMAGE_SIZE: u8 = 0x13;
pub const STATUS_INVALID_PRODUCT_HEADER: u8 = 0x14;
pub const STATUS_SAME_IMAGE_ERROR: u8 = 0x15;
pub const STATUS_EXTERNAL_MEMORY_READ_ERROR: u8 = 0x16;

/// Status reported by the device on the SUOTA_SERV_STATUS characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceStatus {
    SrvStarted,
    CmpOk,
    SrvExit,
    CrcError,
    PatchLenError,
    ExtMemError,
    IntMemError,
    InvalidMemType,
    AppError,
    ImgStarted,
    InvalidImageBank,
    InvalidImageHeader,
    InvalidImageSize,
    InvalidProductHeader,
    SameImageError,
    ExtMemReadError,
    Unknown(u8),
}

impl DeviceStatus {
    pub fn from_code(code: u8) -> Self {
        match code {
            STATUS_SRV_STARTED => Self::SrvStarted,
            STATUS_CMP_OK => Self::CmpOk,
            STATUS_SRV_EXIT => Self::SrvExit,
            STATUS_CRC_ERR => Self::CrcError,
            STATUS_PATCH_LEN_ERR => Self::PatchLenError,
            STATUS_EXT_MEM_ERR => Self::ExtMemError,
            STATUS_INT_MEM_ERR => Self::IntMemError,
            STATUS_INVAL_MEM_TYPE => Self::InvalidMemType,
            STATUS_APP_ERROR => Self::AppError,
            STATUS_IMG_STARTED => Self::ImgStarted,
            STATUS_INVALID_IMAGE_BANK => Self::InvalidImageBank,
            STATUS_INVALID_IMAGE_HEADER => Self::InvalidImageHeader,
            STATUS_INVALID_IMAGE_SIZE => Self::InvalidImageSize,
            STATUS_INVALID_PRODUCT_HEADER => Self::InvalidProductHeader,
            STATUS_SAME_IMAGE_ERROR => Self::SameImageError,
            STATUS_EXTERNAL_MEMORY_READ_ERROR => Self::ExtMemReadError,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::SrvStarted => STATUS_SRV_STARTED,
            Self::CmpOk => STATUS_CMP_OK,
            Self::SrvExit => STATUS_SRV_EXIT,
            Self::CrcError => STATUS_CRC_ERR,
            Self::PatchLenError => STATUS_PATCH_LEN_ERR,
            Self::ExtMemError => STATUS_EXT_MEM_ERR,
            Self::IntMemError => STATUS_INT_MEM_ERR,
            Self::InvalidMemType => STATUS_INVAL_MEM_TYPE,
            Self::AppError => STATUS_APP_ERROR,
            Self::ImgStarted => STATUS_IMG_STARTED,
            Self::InvalidImageBank => STATUS_INVALID_IMAGE_BANK,
            Self::InvalidImageHeader => STATUS_INVALID_IMAGE_HEADER,
            Self::InvalidImageSize => STATUS_INVALID_IMAGE_SIZE,
            Self::InvalidProductHeader => STATUS_INVALID_PRODUCT_HEADER,
            Self::SameImageError => STATUS_SAME_IMAGE_ERROR,
            Self::ExtMemReadError => STATUS_EXTERNAL_MEMORY_READ_ERROR,
            Self::Unknown(code) => *code,
        }
    }

    /// Symbolic name as used in device documentation
    pub fn name(&self) -> &'static str {
        match self {
            Self::SrvStarted => "SUOTA_STATUS_SRV_STARTED",
            Self::CmpOk => "SUOTA_STATUS_CMP_OK",
            Self::SrvExit => "SUOTA_STATUS_SRV_EXIT",
            Self::CrcError => "SUOTA_STATUS_CRC_ERR",
            Self::PatchLenError => "SUOTA_STATUS_PATCH_LEN_ERR",
            Self::ExtMemError => "SUOTA_STATUS_EXT_MEM_ERR",
            Self::IntMemError => "SUOTA_STATUS_INT_MEM_ERR",
            Self::InvalidMemType => "SUOTA_STATUS_INVAL_MEM_TYPE",
            Self::AppError => "SUOTA_STATUS_APP_ERROR",
            Self::ImgStarted => "SUOTA_STATUS_IMG_STARTED",
            Self::InvalidImageBank => "SUOTA_STATUS_INVALID_IMAGE_BANK",
            Self::InvalidImageHeader => "SUOTA_STATUS_INVALID_IMAGE_HEADER",
            Self::InvalidImageSize => "SUOTA_STATUS_INVALID_IMAGE_SIZE",
            Self::InvalidProductHeader => "SUOTA_STATUS_INVALID_PRODUCT_HEADER",
            Self::SameImageError => "SUOTA_STATUS_SAME_IMAGE_ERROR",
            Self::ExtMemReadError => "SUOTA_STATUS_EXTERNAL_MEMORY_READ_ERROR",
            Self::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Self::CmpOk
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X} ({})", self.code(), self.name())
    }
}

/// Values written to the SUOTA_MEM_DEV characteristic.
/// Byte 3 carries the command or memory type.
pub mod mem_dev {
    /// Start an update into external SPI flash, image bank 0
    pub const START_SPI_BANK0: [u8; 4] = [0x00, 0x00, 0x00, 0x13];

    /// End of image, device verifies the checksum
    pub const END: [u8; 4] = [0x00, 0x00, 0x00, 0xFE];

    pub const REBOOT: [u8; 4] = [0x00, 0x00, 0x00, 0xFD];
}

/// Encode a block length for the SUOTA_PATCH_LEN characteristic
pub fn patch_length(len: u16) -> [u8; 2] {
    len.to_le_bytes()
}

/// XOR of every byte; the single trailing checksum of a SUOTA image
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, b| acc ^ b)
}

/// Decode a little-endian unsigned value of up to four bytes.
/// An empty value reads as zero, extra bytes are ignored.
pub fn decode_le_uint(data: &[u8]) -> u32 {
    data.iter()
        .take(4)
        .enumerate()
        .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (8 * i)))
}

/// SUOTA protocol version, reported in tenths (0x0B is 1.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuotaVersion(pub u8);

impl SuotaVersion {
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(data.first().copied().unwrap_or(0))
    }
}

impl fmt::Display for SuotaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0 / 10, self.0 % 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_both_ways() {
        for code in 0u8..=0x20 {
            assert_eq!(DeviceStatus::from_code(code).code(), code);
        }
        assert_eq!(DeviceStatus::from_code(0x15), DeviceStatus::SameImageError);
        assert_eq!(DeviceStatus::from_code(0x0A), DeviceStatus::Unknown(0x0A));
        assert!(DeviceStatus::from_code(0x02).is_success());
        assert!(!DeviceStatus::from_code(0x10).is_success());
    }

    #[test]
    fn status_display_names_code() {
        assert_eq!(
            DeviceStatus::SameImageError.to_string(),
            "0x15 (SUOTA_STATUS_SAME_IMAGE_ERROR)"
        );
        assert_eq!(DeviceStatus::Unknown(0x30).to_string(), "0x30 (UNKNOWN_ERROR)");
    }

    #[test]
    fn patch_length_is_little_endian() {
        assert_eq!(patch_length(244), [0xF4, 0x00]);
        assert_eq!(patch_length(0x01F8), [0xF8, 0x01]);
    }

    #[test]
    fn checksum_folds_xor() {
        assert_eq!(checksum(&[]), 0);
        assert_eq!(checksum(&[0x12, 0x34]), 0x26);
        assert_eq!(checksum(&[0xFF, 0xFF, 0x01]), 0x01);

        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let sum = checksum(&payload);
        let mut image = payload.to_vec();
        image.push(sum);
        // a payload with its checksum appended folds to zero
        assert_eq!(checksum(&image), 0);
    }

    #[test]
    fn le_uint_decoding() {
        assert_eq!(decode_le_uint(&[]), 0);
        assert_eq!(decode_le_uint(&[0xF7]), 247);
        assert_eq!(decode_le_uint(&[0xF7, 0x00]), 247);
        assert_eq!(decode_le_uint(&[0x00, 0x02]), 512);
        assert_eq!(decode_le_uint(&[1, 0, 0, 0, 9]), 1);
    }

    #[test]
    fn suota_version_display() {
        assert_eq!(SuotaVersion::from_bytes(&[0x0B]).to_string(), "1.1");
        assert_eq!(SuotaVersion::from_bytes(&[]).to_string(), "0.0");
    }

    #[test]
    fn mem_dev_commands() {
        assert_eq!(mem_dev::END[3], 0xFE);
        assert_eq!(mem_dev::REBOOT[3], 0xFD);
        assert_eq!(mem_dev::START_SPI_BANK0, [0, 0, 0, 0x13]);
    }
}
