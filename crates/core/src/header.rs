//! File and section headers of the FLW0 container.
//!
//! All fields are little-endian. The file header is 32 bytes, each section
//! header 16. Offsets and entry sizes are taken from the section headers as
//! written; nothing is recomputed.

use crate::alerts::Alerts;
use crate::error::ParseError;

/// "FLW0" as a little-endian u32.
pub const FLW0_TAG: u32 = 0x3057_4C46;

/// Number of sections an AI script container carries.
pub const EXPECTED_SECTIONS: u16 = 5;

pub const FILE_HEADER_SIZE: usize = 0x20;
pub const SECTION_HEADER_SIZE: usize = 0x10;

/// The 32-byte file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowHeader {
    pub file_type: u8,
    pub compression_flag: u8,
    pub user_id: u16,
    pub size: u32,
    pub tag: u32,
    pub mem_size: u32,
    pub num_sections: u16,
    pub storage_space: u32,
    pub pad: [u8; 10],
}

impl FlowHeader {
    /// Parse the header and validate the container identity.
    ///
    /// A wrong tag or section count is fatal; every other unexpected value
    /// is only worth a warning (real files are reverse engineered and the
    /// reserved fields are not fully understood).
    pub fn parse(data: &[u8], alerts: &mut Alerts) -> Result<FlowHeader, ParseError> {
        if data.len() < FILE_HEADER_SIZE {
            return Err(ParseError::Truncated(format!(
                "file header needs {} bytes, have {}",
                FILE_HEADER_SIZE,
                data.len()
            )));
        }
        let header = FlowHeader {
            file_type: data[0],
            compression_flag: data[1],
            user_id: u16::from_le_bytes([data[2], data[3]]),
            size: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            tag: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            mem_size: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            num_sections: u16::from_le_bytes([data[16], data[17]]),
            storage_space: u32::from_le_bytes([data[18], data[19], data[20], data[21]]),
            pad: data[22..32].try_into().expect("slice length checked above"),
        };

        if header.tag != FLW0_TAG {
            return Err(ParseError::HeaderMismatch(format!(
                "tag is {:#010x}, expected {:#010x} (\"FLW0\")",
                header.tag, FLW0_TAG
            )));
        }
        if header.num_sections != EXPECTED_SECTIONS {
            return Err(ParseError::HeaderMismatch(format!(
                "num_sections is {}, expected {}",
                header.num_sections, EXPECTED_SECTIONS
            )));
        }

        if header.file_type != 0 {
            alerts.warn(format!("file_type is not 0! It is: {:#04x}", header.file_type));
        }
        if header.compression_flag != 0 {
            alerts.warn(format!(
                "compression_flag is not 0! It is: {:#04x}",
                header.compression_flag
            ));
        }
        if header.user_id != 0 {
            alerts.warn(format!("user_id is not 0! It is: {:#06x}", header.user_id));
        }
        for p in header.pad {
            if p != 0 {
                alerts.warn(format!("found non-zero padding: {:#04x}", p));
            }
        }

        Ok(header)
    }

    /// Re-encode the header; parsing then encoding reproduces the original
    /// bytes for valid inputs.
    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut out = [0u8; FILE_HEADER_SIZE];
        out[0] = self.file_type;
        out[1] = self.compression_flag;
        out[2..4].copy_from_slice(&self.user_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.size.to_le_bytes());
        out[8..12].copy_from_slice(&self.tag.to_le_bytes());
        out[12..16].copy_from_slice(&self.mem_size.to_le_bytes());
        out[16..18].copy_from_slice(&self.num_sections.to_le_bytes());
        out[18..22].copy_from_slice(&self.storage_space.to_le_bytes());
        out[22..32].copy_from_slice(&self.pad);
        out
    }
}

/// A 16-byte section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub id: u32,
    pub entry_size: u32,
    pub num_entries: u32,
    pub offset: u32,
}

impl SectionHeader {
    pub fn parse(data: &[u8]) -> Result<SectionHeader, ParseError> {
        if data.len() < SECTION_HEADER_SIZE {
            return Err(ParseError::Truncated(format!(
                "section header needs {} bytes, have {}",
                SECTION_HEADER_SIZE,
                data.len()
            )));
        }
        Ok(SectionHeader {
            id: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            entry_size: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            num_entries: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            offset: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
        })
    }

    pub fn encode(&self) -> [u8; SECTION_HEADER_SIZE] {
        let mut out = [0u8; SECTION_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.id.to_le_bytes());
        out[4..8].copy_from_slice(&self.entry_size.to_le_bytes());
        out[8..12].copy_from_slice(&self.num_entries.to_le_bytes());
        out[12..16].copy_from_slice(&self.offset.to_le_bytes());
        out
    }
}
