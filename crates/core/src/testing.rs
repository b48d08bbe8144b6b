//! Helpers for assembling synthetic FLW0 containers in tests.
//!
//! Not part of the supported API surface; exists so downstream crates can
//! build byte-exact fixtures without duplicating the writer.

use crate::header::{
    EXPECTED_SECTIONS, FILE_HEADER_SIZE, FLW0_TAG, FlowHeader, SECTION_HEADER_SIZE, SectionHeader,
};
use crate::label::LABEL_ENTRY_SIZE;

/// Assemble a container from procedure labels, jump labels, and narrow
/// instruction words given as (opcode, operand) pairs.
pub fn build_container(
    procs: &[(&str, u32)],
    jumps: &[(&str, u32)],
    code: &[(u16, i16)],
    storage_space: u32,
) -> Vec<u8> {
    let label_bytes = |name: &str, loc: u32| -> Vec<u8> {
        let mut out = vec![0u8; LABEL_ENTRY_SIZE];
        out[..name.len()].copy_from_slice(name.as_bytes());
        out[24..28].copy_from_slice(&loc.to_le_bytes());
        out
    };

    let proc_section: Vec<u8> = procs.iter().flat_map(|(n, l)| label_bytes(n, *l)).collect();
    let jump_section: Vec<u8> = jumps.iter().flat_map(|(n, l)| label_bytes(n, *l)).collect();
    let code_section: Vec<u8> = code
        .iter()
        .flat_map(|(op, operand)| {
            let mut slot = [0u8; 4];
            slot[0..2].copy_from_slice(&op.to_le_bytes());
            slot[2..4].copy_from_slice(&operand.to_le_bytes());
            slot
        })
        .collect();

    let sections_base = FILE_HEADER_SIZE + 5 * SECTION_HEADER_SIZE;
    let mut section_headers = Vec::new();
    let mut payload = Vec::new();
    let mut offset = sections_base;
    for (id, entry_size, num_entries, bytes) in [
        (0u32, 32u32, procs.len() as u32, proc_section),
        (1, 32, jumps.len() as u32, jump_section),
        (2, 4, code.len() as u32, code_section),
        (3, 4, 0, Vec::new()),
        (4, 1, 0, Vec::new()),
    ] {
        section_headers.push(SectionHeader { id, entry_size, num_entries, offset: offset as u32 });
        offset += bytes.len();
        payload.extend_from_slice(&bytes);
    }

    let header = FlowHeader {
        file_type: 0,
        compression_flag: 0,
        user_id: 0,
        size: (sections_base + payload.len()) as u32,
        tag: FLW0_TAG,
        mem_size: 0,
        num_sections: EXPECTED_SECTIONS,
        storage_space,
        pad: [0; 10],
    };

    let mut data = Vec::new();
    data.extend_from_slice(&header.encode());
    for sec in &section_headers {
        data.extend_from_slice(&sec.encode());
    }
    data.extend_from_slice(&payload);
    data
}
