//! Instruction decoding and disassembly rendering.
//!
//! Section 2 of the container is a sequence of 4-byte slots. A narrow
//! instruction occupies one slot (`u16` opcode, signed 16-bit operand); a
//! wide instruction occupies two (`u32` opcode, `u32` operand, the operand
//! being IEEE-754 bits for PUSHF/PUSHIF). The decoded list keeps a sentinel
//! `None` in the second slot of every wide instruction so that positions in
//! the list still match the locations jump operands refer to.

use crate::alerts::Alerts;
use crate::error::ParseError;
use crate::label::Label;
use crate::opcode::Opcode;

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Raw operand bits. Narrow operands are sign-extended from 16 bits;
    /// float operands keep their IEEE-754 bit pattern.
    pub operand: u32,
    pub wide: bool,
    pub float: bool,
    /// Index in the original instruction stream; -1 for synthetic
    /// instructions inserted by the block builder
    pub loc: i32,
}

impl Instruction {
    /// The operand as a signed integer.
    pub fn operand_i32(&self) -> i32 {
        self.operand as i32
    }

    /// The operand decoded as a float; only meaningful when `float` is set.
    pub fn operand_f32(&self) -> f32 {
        f32::from_bits(self.operand)
    }

    /// A synthetic GOTO making a fall-through edge explicit.
    pub fn synthetic_goto(target_index: u16) -> Instruction {
        Instruction {
            opcode: Opcode::Goto,
            operand: u32::from(target_index),
            wide: false,
            float: false,
            loc: -1,
        }
    }

    /// Render one disassembly line: location, raw little-endian bytes, and
    /// a readable form with jump/call operands resolved to label names.
    pub fn display(&self, proc_labels: &[Label], jump_labels: &[Label]) -> String {
        let raw = if self.wide {
            let op = (self.opcode as u32).to_le_bytes();
            let operand = self.operand.to_le_bytes();
            format!(
                "{:02x}{:02x} {:02x}{:02x}\n\t{:02x}{:02x} {:02x}{:02x}",
                op[0], op[1], op[2], op[3], operand[0], operand[1], operand[2], operand[3]
            )
        } else {
            let op = (self.opcode as u16).to_le_bytes();
            let operand = ((self.operand & 0xFFFF) as u16).to_le_bytes();
            format!("{:02x}{:02x} {:02x}{:02x}", op[0], op[1], operand[0], operand[1])
        };

        let operand_name = if self.opcode.is_caller() {
            match proc_labels.get(self.operand as usize) {
                Some(label) => format!("{} (loc {})", label.name, label.target_location),
                None => format!("<bad proc label {}>", self.operand),
            }
        } else if self.opcode.is_jumper() {
            match jump_labels.get(self.operand as usize) {
                Some(label) => format!("{} (loc {})", label.name, label.target_location),
                None => format!("<bad jump label {}>", self.operand),
            }
        } else if !self.opcode.has_operand() {
            String::new()
        } else if self.float {
            format!("{}", self.operand_f32())
        } else if self.wide {
            format!("{:#010x}", self.operand)
        } else {
            format!("{:#06x}", self.operand & 0xFFFF)
        };

        let readable = if operand_name.is_empty() {
            format!("# {}", self.opcode.mnemonic())
        } else {
            format!("# {} {}", self.opcode.mnemonic(), operand_name)
        };
        format!("{}\t{}\t{}", self.loc, raw, readable)
    }
}

/// Decode the instruction section from its 4-byte slots.
///
/// The result has exactly one entry per slot; wide instructions leave a
/// `None` in their second slot. Unknown opcodes are fatal.
pub fn decode_instructions(
    slots: &[[u8; 4]],
    alerts: &mut Alerts,
) -> Result<Vec<Option<Instruction>>, ParseError> {
    let mut instrs: Vec<Option<Instruction>> = Vec::with_capacity(slots.len());
    let mut skip = false;
    for (idx, slot) in slots.iter().enumerate() {
        if skip {
            skip = false;
            instrs.push(None);
            continue;
        }
        let slot_word = u32::from_le_bytes(*slot);
        // A wide instruction's first slot is the whole u32 opcode, so the
        // slot value itself identifies wideness.
        let wide = slot_word <= 0x03;
        if wide {
            let Some(operand_slot) = slots.get(idx + 1) else {
                return Err(ParseError::Truncated(format!(
                    "wide instruction at location {} is missing its operand slot",
                    idx
                )));
            };
            let opcode = match Opcode::from_raw(slot_word) {
                Some(op) => op,
                None => return Err(ParseError::UnknownOpcode { opcode: slot_word, loc: idx }),
            };
            instrs.push(Some(Instruction {
                opcode,
                operand: u32::from_le_bytes(*operand_slot),
                wide: true,
                float: opcode.has_float_operand(),
                loc: idx as i32,
            }));
            skip = true;
        } else {
            let raw_opcode = u32::from(u16::from_le_bytes([slot[0], slot[1]]));
            let opcode = match Opcode::from_raw(raw_opcode) {
                Some(op) => op,
                None => return Err(ParseError::UnknownOpcode { opcode: raw_opcode, loc: idx }),
            };
            let operand = i16::from_le_bytes([slot[2], slot[3]]);
            if !opcode.has_operand() && operand != 0 {
                alerts.warn(format!(
                    "Found a {} with a non-zero operand: {:#06x}",
                    opcode.mnemonic(),
                    operand
                ));
            }
            instrs.push(Some(Instruction {
                opcode,
                operand: operand as i32 as u32,
                wide: false,
                float: false,
                loc: idx as i32,
            }));
        }
    }
    Ok(instrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn narrow(opcode: u16, operand: i16) -> [u8; 4] {
        let mut slot = [0u8; 4];
        slot[0..2].copy_from_slice(&opcode.to_le_bytes());
        slot[2..4].copy_from_slice(&operand.to_le_bytes());
        slot
    }

    #[test]
    fn test_decode_narrow() {
        let mut alerts = Alerts::new();
        let instrs = decode_instructions(&[narrow(0x1D, 5), narrow(0x09, 0)], &mut alerts).unwrap();
        assert_eq!(instrs.len(), 2);
        let push = instrs[0].as_ref().unwrap();
        assert_eq!(push.opcode, Opcode::PushIs);
        assert_eq!(push.operand_i32(), 5);
        assert_eq!(push.loc, 0);
        assert!(!push.wide);
        assert_eq!(instrs[1].as_ref().unwrap().opcode, Opcode::End);
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_decode_negative_narrow_operand() {
        let mut alerts = Alerts::new();
        let instrs = decode_instructions(&[narrow(0x1D, -3)], &mut alerts).unwrap();
        assert_eq!(instrs[0].as_ref().unwrap().operand_i32(), -3);
    }

    #[test]
    fn test_decode_wide_reserves_sentinel() {
        let mut alerts = Alerts::new();
        let slots =
            [0x00u32.to_le_bytes(), 0x0001_0000u32.to_le_bytes(), narrow(0x09, 0)];
        let instrs = decode_instructions(&slots, &mut alerts).unwrap();
        assert_eq!(instrs.len(), 3);
        let push = instrs[0].as_ref().unwrap();
        assert_eq!(push.opcode, Opcode::PushI);
        assert!(push.wide);
        assert_eq!(push.operand, 0x0001_0000);
        assert!(instrs[1].is_none());
        // The END keeps its stream location despite the sentinel.
        assert_eq!(instrs[2].as_ref().unwrap().loc, 2);
    }

    #[test]
    fn test_decode_wide_float() {
        let mut alerts = Alerts::new();
        let slots = [0x01u32.to_le_bytes(), 1.5f32.to_bits().to_le_bytes()];
        let instrs = decode_instructions(&slots, &mut alerts).unwrap();
        let push = instrs[0].as_ref().unwrap();
        assert_eq!(push.opcode, Opcode::PushF);
        assert!(push.float);
        assert_eq!(push.operand_f32(), 1.5);
    }

    #[test]
    fn test_unknown_opcode_is_fatal() {
        let mut alerts = Alerts::new();
        assert!(matches!(
            decode_instructions(&[narrow(0x7F, 0)], &mut alerts),
            Err(ParseError::UnknownOpcode { opcode: 0x7F, loc: 0 })
        ));
    }

    #[test]
    fn test_truncated_wide_is_fatal() {
        let mut alerts = Alerts::new();
        assert!(matches!(
            decode_instructions(&[0x01u32.to_le_bytes()], &mut alerts),
            Err(ParseError::Truncated(_))
        ));
    }

    #[test]
    fn test_nonzero_operand_on_operandless_opcode_warns() {
        let mut alerts = Alerts::new();
        let instrs = decode_instructions(&[narrow(0x0E, 7)], &mut alerts).unwrap();
        assert_eq!(instrs[0].as_ref().unwrap().opcode, Opcode::Add);
        assert_eq!(alerts.len(), 1);
        assert!(alerts.messages()[0].contains("ADD"));
    }

    #[test]
    fn test_display_resolves_jump_label() {
        use crate::label::LabelKind;
        let jump_labels = vec![Label {
            name: "_LABEL001".to_string(),
            target_location: 9,
            index: 0,
            kind: LabelKind::Jump,
        }];
        let goto = Instruction {
            opcode: Opcode::Goto,
            operand: 0,
            wide: false,
            float: false,
            loc: 4,
        };
        let line = goto.display(&[], &jump_labels);
        assert!(line.starts_with("4\t"));
        assert!(line.ends_with("# GOTO _LABEL001 (loc 9)"));
    }
}
