//! Label records from the procedure-label and jump-label sections.

use crate::alerts::Alerts;
use crate::error::ParseError;

pub const LABEL_ENTRY_SIZE: usize = 0x20;
const LABEL_NAME_BYTES: usize = 24;

/// What a label marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// Entry of a procedure (section 0)
    Procedure,
    /// Internal jump target (section 1)
    Jump,
    /// A jump label whose name was chosen by a script author; kept as a
    /// real goto target in the output
    Special,
}

/// A 32-byte label record: a NUL-padded 24-byte name, a target location in
/// the instruction stream, and a reserved word.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    /// Index into the instruction stream this label points at
    pub target_location: u32,
    /// Index of this label within its own section; jump and call operands
    /// reference labels by this index
    pub index: u16,
    pub kind: LabelKind,
}

impl Label {
    /// Parse one label entry.
    ///
    /// Jump labels whose name does not start with `_` are reclassified as
    /// special: the game's own scripts prefix generated labels with an
    /// underscore, so anything else was named by hand. (This is a guess,
    /// but it has held up so far.)
    pub fn parse(
        data: &[u8],
        index: u16,
        kind: LabelKind,
        alerts: &mut Alerts,
    ) -> Result<Label, ParseError> {
        if data.len() < LABEL_ENTRY_SIZE {
            return Err(ParseError::Truncated(format!(
                "label entry needs {} bytes, have {}",
                LABEL_ENTRY_SIZE,
                data.len()
            )));
        }
        let name_len = data[..LABEL_NAME_BYTES]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(LABEL_NAME_BYTES);
        let name: String = data[..name_len].iter().map(|&b| b as char).collect();
        let target_location = u32::from_le_bytes([data[24], data[25], data[26], data[27]]);
        let pad = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);
        if pad != 0 {
            alerts.warn(format!("label {:?} has non-zero padding: {:#010x}", name, pad));
        }

        let kind = if kind == LabelKind::Jump && !name.is_empty() && !name.starts_with('_') {
            LabelKind::Special
        } else {
            kind
        };

        Ok(Label { name, target_location, index, kind })
    }
}
