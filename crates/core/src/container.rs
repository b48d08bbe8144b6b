//! Whole-file parsing of FLW0 containers.
//!
//! Section layout:
//!   0: procedure labels, 1: jump labels, 2: instructions,
//!   3: expected empty, 4: trailing zero padding.
//!
//! Sections 3 and 4 are only sanity checked, never consumed.

use tracing::debug;

use crate::alerts::Alerts;
use crate::block::FlowBlock;
use crate::error::ParseError;
use crate::graph::FlowBlockGraph;
use crate::header::{FILE_HEADER_SIZE, FlowHeader, SECTION_HEADER_SIZE, SectionHeader};
use crate::instruction::{Instruction, decode_instructions};
use crate::label::{LABEL_ENTRY_SIZE, Label, LabelKind};

/// A fully parsed script container: header, labels, decoded instructions,
/// and per-procedure flow blocks with reachability graphs.
#[derive(Debug)]
pub struct FlowFile {
    pub header: FlowHeader,
    pub section_headers: Vec<SectionHeader>,
    pub proc_labels: Vec<Label>,
    pub jump_labels: Vec<Label>,
    /// Decoded stream, sentinel slots included
    pub instructions: Vec<Option<Instruction>>,
    /// Flow blocks grouped per procedure, in label order
    pub flow_blocks: Vec<Vec<FlowBlock>>,
    /// One reachability graph per procedure
    pub block_graphs: Vec<FlowBlockGraph>,
    dce: bool,
}

impl FlowFile {
    /// Parse a container from its raw bytes.
    ///
    /// `dce` controls dead-instruction elimination inside blocks; it is
    /// always on for decompilation.
    pub fn parse(data: &[u8], dce: bool, alerts: &mut Alerts) -> Result<FlowFile, ParseError> {
        let header = FlowHeader::parse(data, alerts)?;
        debug!(sections = header.num_sections, "parsed FLW0 header");

        let mut section_headers = Vec::with_capacity(usize::from(header.num_sections));
        for idx in 0..usize::from(header.num_sections) {
            let base = FILE_HEADER_SIZE + SECTION_HEADER_SIZE * idx;
            let end = base + SECTION_HEADER_SIZE;
            if data.len() < end {
                return Err(ParseError::Truncated(format!(
                    "section header {} runs past end of file",
                    idx
                )));
            }
            section_headers.push(SectionHeader::parse(&data[base..end])?);
        }

        let section_entry = |sec: &SectionHeader, idx: u32| -> Result<&[u8], ParseError> {
            let entry_size = sec.entry_size as usize;
            let base = sec.offset as usize + entry_size * idx as usize;
            let end = base + entry_size;
            if data.len() < end {
                return Err(ParseError::Truncated(format!(
                    "section {} entry {} runs past end of file",
                    sec.id, idx
                )));
            }
            Ok(&data[base..end])
        };

        let parse_labels = |sec: &SectionHeader,
                            kind: LabelKind,
                            alerts: &mut Alerts|
         -> Result<Vec<Label>, ParseError> {
            if sec.entry_size as usize != LABEL_ENTRY_SIZE {
                alerts.warn(format!(
                    "label section {} has entry size {}, expected {}",
                    sec.id, sec.entry_size, LABEL_ENTRY_SIZE
                ));
            }
            let mut labels = Vec::with_capacity(sec.num_entries as usize);
            for idx in 0..sec.num_entries {
                labels.push(Label::parse(section_entry(sec, idx)?, idx as u16, kind, alerts)?);
            }
            Ok(labels)
        };

        let proc_labels = parse_labels(&section_headers[0], LabelKind::Procedure, alerts)?;
        let jump_labels = parse_labels(&section_headers[1], LabelKind::Jump, alerts)?;
        debug!(
            procedures = proc_labels.len(),
            jump_labels = jump_labels.len(),
            "parsed label sections"
        );

        let instr_sec = section_headers[2];
        if instr_sec.entry_size != 4 {
            alerts.warn(format!(
                "instruction section has entry size {}, expected 4",
                instr_sec.entry_size
            ));
        }
        let mut slots: Vec<[u8; 4]> = Vec::with_capacity(instr_sec.num_entries as usize);
        for idx in 0..instr_sec.num_entries {
            let entry = section_entry(&instr_sec, idx)?;
            slots.push([entry[0], entry[1], entry[2], entry[3]]);
        }
        let instructions = decode_instructions(&slots, alerts)?;

        if section_headers[3].num_entries > 0 {
            alerts.warn("Section 3 is not empty!");
        }
        let pad_sec = section_headers[4];
        for idx in 0..pad_sec.num_entries {
            let entry = section_entry(&pad_sec, idx)?;
            if entry.iter().any(|&b| b != 0) {
                alerts.warn(format!("Section 4 has non-zero padding at entry {}", idx));
            }
        }

        let (flow_blocks, block_graphs) =
            build_blocks(&proc_labels, &jump_labels, &instructions, dce, alerts);

        Ok(FlowFile {
            header,
            section_headers,
            proc_labels,
            jump_labels,
            instructions,
            flow_blocks,
            block_graphs,
            dce,
        })
    }

    /// Render the disassembly listing. With DCE enabled, unreachable
    /// non-procedure blocks are omitted.
    pub fn display_disassembly(&self) -> String {
        let mut out = format!(
            "Number of allocated storage spaces: {}\n\n",
            self.header.storage_space
        );
        let mut displayed = Vec::new();
        for proc_blocks in &self.flow_blocks {
            for block in proc_blocks {
                let live = block.label_kind == LabelKind::Procedure
                    || !self.dce
                    || self.block_graphs[block.procedure_id as usize]
                        .is_reachable(block.label_index);
                if live {
                    displayed.push(block.display(&self.proc_labels, &self.jump_labels));
                }
            }
        }
        out.push_str(&displayed.join("\n\n"));
        out
    }
}

/// Slice the instruction stream at label boundaries and group the blocks
/// per procedure.
fn build_blocks(
    proc_labels: &[Label],
    jump_labels: &[Label],
    instructions: &[Option<Instruction>],
    dce: bool,
    alerts: &mut Alerts,
) -> (Vec<Vec<FlowBlock>>, Vec<FlowBlockGraph>) {
    let mut all_labels: Vec<&Label> = proc_labels.iter().chain(jump_labels.iter()).collect();
    // Stable: a procedure label sharing a location with a jump label stays
    // in front of it.
    all_labels.sort_by_key(|l| l.target_location);

    let mut flow_blocks: Vec<Vec<FlowBlock>> = vec![Vec::new(); proc_labels.len()];
    let mut cur_procedure: Option<usize> = None;
    for (idx, label) in all_labels.iter().enumerate() {
        let end = all_labels
            .get(idx + 1)
            .map(|next| next.target_location as usize)
            .unwrap_or(instructions.len());
        let next_label = all_labels.get(idx + 1).copied();
        if label.kind == LabelKind::Procedure {
            cur_procedure = Some(cur_procedure.map_or(0, |p| p + 1));
        }
        let Some(proc_id) = cur_procedure else {
            alerts.warn(format!(
                "Label {:?} appears before the first procedure label; skipping its block.",
                label.name
            ));
            continue;
        };
        let start = (label.target_location as usize).min(instructions.len());
        let end = end.clamp(start, instructions.len());
        let block = FlowBlock::new(
            label,
            &instructions[start..end],
            proc_id as u32,
            next_label,
            dce,
            alerts,
        );
        flow_blocks[proc_id].push(block);
    }

    let block_graphs = flow_blocks
        .iter()
        .map(|proc_blocks| FlowBlockGraph::new(proc_blocks, alerts))
        .collect();

    (flow_blocks, block_graphs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;
    use crate::testing::build_container;

    #[test]
    fn test_parse_minimal_file() {
        // _main: PUSHIS 5; POPLIX 0; END
        let data = build_container(
            &[("_main", 0)],
            &[],
            &[(0x1D, 5), (0x20, 0), (0x09, 0)],
            4,
        );
        let mut alerts = Alerts::new();
        let flow = FlowFile::parse(&data, true, &mut alerts).unwrap();
        assert!(alerts.is_empty(), "unexpected alerts: {:?}", alerts.messages());
        assert_eq!(flow.flow_blocks.len(), 1);
        let block = &flow.flow_blocks[0][0];
        assert_eq!(block.instructions.len(), 3);
        assert_eq!(block.instructions[2].opcode, Opcode::End);
    }

    #[test]
    fn test_blocks_split_at_jump_labels() {
        // _main: PUSHIS 1; IF _L1; GOTO _L0
        // _L0:   END
        // _L1:   END
        let data = build_container(
            &[("_main", 0)],
            &[("_L0", 3), ("_L1", 4)],
            &[(0x1D, 1), (0x1C, 1), (0x0D, 0), (0x09, 0), (0x09, 0)],
            0,
        );
        let mut alerts = Alerts::new();
        let flow = FlowFile::parse(&data, true, &mut alerts).unwrap();
        assert_eq!(flow.flow_blocks[0].len(), 3);
        // Both jump blocks are reachable.
        assert!(flow.block_graphs[0].is_reachable(0));
        assert!(flow.block_graphs[0].is_reachable(1));
        // Plain-named labels stay Jump because of the underscore prefix.
        assert_eq!(flow.flow_blocks[0][1].label_kind, LabelKind::Jump);
    }

    #[test]
    fn test_disassembly_lists_all_blocks() {
        let data = build_container(
            &[("_main", 0)],
            &[("_L0", 3), ("_L1", 4)],
            &[(0x1D, 1), (0x1C, 1), (0x0D, 0), (0x09, 0), (0x09, 0)],
            7,
        );
        let mut alerts = Alerts::new();
        let flow = FlowFile::parse(&data, true, &mut alerts).unwrap();
        let listing = flow.display_disassembly();
        assert!(listing.starts_with("Number of allocated storage spaces: 7"));
        assert!(listing.contains("label: _main"));
        assert!(listing.contains("label: _L0"));
        assert!(listing.contains("# IF _L1 (loc 4)"));
    }

    #[test]
    fn test_unreachable_block_hidden_with_dce() {
        // _main: END; _L0: END  (nothing jumps to _L0)
        let data = build_container(
            &[("_main", 0)],
            &[("_L0", 1)],
            &[(0x09, 0), (0x09, 0)],
            0,
        );
        let mut alerts = Alerts::new();
        let flow = FlowFile::parse(&data, true, &mut alerts).unwrap();
        assert!(!flow.display_disassembly().contains("label: _L0"));

        let flow = FlowFile::parse(&data, false, &mut alerts).unwrap();
        assert!(flow.display_disassembly().contains("label: _L0"));
    }

    #[test]
    fn test_truncated_instruction_section() {
        let mut data = build_container(&[("_main", 0)], &[], &[(0x09, 0)], 0);
        data.truncate(data.len() - 2);
        let mut alerts = Alerts::new();
        assert!(matches!(
            FlowFile::parse(&data, true, &mut alerts),
            Err(ParseError::Truncated(_))
        ));
    }

    #[test]
    fn test_nonempty_section_3_warns() {
        let mut data = build_container(&[("_main", 0)], &[], &[(0x09, 0)], 0);
        // Patch section 3's num_entries (4th section header, third word).
        let base = FILE_HEADER_SIZE + 3 * SECTION_HEADER_SIZE + 8;
        data[base] = 1;
        // Give it a zero entry size so no bytes are actually read.
        let size_base = FILE_HEADER_SIZE + 3 * SECTION_HEADER_SIZE + 4;
        data[size_base] = 0;
        let mut alerts = Alerts::new();
        FlowFile::parse(&data, true, &mut alerts).unwrap();
        assert!(alerts.messages().iter().any(|m| m.contains("Section 3")));
    }
}
