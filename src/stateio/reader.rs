use std::io::Read;

use byteorder::{LittleEndian, ReadBytesExt};

use super::StateHeader;
use crate::buffer::{MatchRow, MatchTable, MatchVariant};
use crate::error::{PipelineError, Result};
use crate::pair_index::num_pairs;
use crate::stage::PipelineStage;
use crate::types::{ImagePair, KeyIndexPair};

/// Upper bound on allocations sized from lengths found in the stream.
const MAX_PREALLOC: usize = 1 << 16;

/// A stream that ends early is a damaged file, not an I/O failure.
fn truncated(e: PipelineError) -> PipelineError {
    match e {
        PipelineError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
            PipelineError::Corrupt("state stream ends early".to_string())
        }
        other => other,
    }
}

fn read_len<R: Read>(r: &mut R, expected: usize, what: &str) -> Result<usize> {
    let len = r.read_u64::<LittleEndian>()?;
    if len != expected as u64 {
        return Err(PipelineError::Corrupt(format!(
            "{what}: length {len}, expected {expected}"
        )));
    }
    Ok(expected)
}

fn read_row<R: Read>(r: &mut R, cur: usize, capacity: usize, label: &str) -> Result<MatchRow> {
    let n = read_len(r, cur, &format!("{label} row {cur} counts"))?;
    let mut counts = Vec::with_capacity(n);
    for _ in 0..n {
        let c = r.read_u32::<LittleEndian>()?;
        if c as usize > capacity {
            return Err(PipelineError::Corrupt(format!(
                "{label} row {cur}: count {c} exceeds capacity {capacity}"
            )));
        }
        counts.push(c);
    }

    let slots = cur * capacity;
    let n = read_len(r, slots, &format!("{label} row {cur} distances"))?;
    let mut distances = Vec::with_capacity(n);
    for _ in 0..n {
        distances.push(r.read_f32::<LittleEndian>()?);
    }

    let n = read_len(r, slots, &format!("{label} row {cur} key indices"))?;
    let mut key_indices = Vec::with_capacity(n);
    for _ in 0..n {
        let src = r.read_u32::<LittleEndian>()?;
        let dst = r.read_u32::<LittleEndian>()?;
        key_indices.push(KeyIndexPair::new(src, dst));
    }

    Ok(MatchRow { counts, distances, key_indices })
}

/// Reads the fixed part of a state stream, up to and including the stage.
pub fn read_header<R: Read>(r: &mut R) -> Result<StateHeader> {
    read_header_inner(r).map_err(truncated)
}

fn read_header_inner<R: Read>(r: &mut R) -> Result<StateHeader> {
    let num_images = r.read_u32::<LittleEndian>()? as usize;

    let num_candidates = r.read_u64::<LittleEndian>()?;
    if num_candidates > num_pairs(num_images) as u64 {
        return Err(PipelineError::Corrupt(format!(
            "{num_candidates} candidate pairs for {num_images} images"
        )));
    }
    let mut candidate_pairs = Vec::with_capacity((num_candidates as usize).min(MAX_PREALLOC));
    for _ in 0..num_candidates {
        let i = r.read_u32::<LittleEndian>()? as usize;
        let j = r.read_u32::<LittleEndian>()? as usize;
        if i >= j || j >= num_images {
            return Err(PipelineError::Corrupt(format!(
                "candidate pair ({i}, {j}) outside {num_images} images"
            )));
        }
        candidate_pairs.push(ImagePair { i, j });
    }

    let raw_stage = r.read_i32::<LittleEndian>()?;
    let stage = PipelineStage::from_i32(raw_stage)
        .ok_or_else(|| PipelineError::Corrupt(format!("unknown stage {raw_stage}")))?;

    Ok(StateHeader { num_images, stage, candidate_pairs })
}

/// Reads the rows announced by `header` and copies them into `table`.
///
/// Every row is validated before the table is touched.
pub fn read_rows<R: Read>(r: &mut R, header: &StateHeader, table: &mut MatchTable) -> Result<()> {
    table.check_image_count(header.num_images)?;
    let raw_cap = table.capacity(MatchVariant::Raw);
    let filtered_cap = table.capacity(MatchVariant::Filtered);

    let mut rows = Vec::new();
    for cur in 1..header.num_images {
        if header.stage.has_raw_matches() {
            let row = read_row(r, cur, raw_cap, "raw").map_err(truncated)?;
            rows.push((MatchVariant::Raw, cur, row));
        }
        if header.stage.has_filtered_matches() {
            let row = read_row(r, cur, filtered_cap, "filtered").map_err(truncated)?;
            rows.push((MatchVariant::Filtered, cur, row));
        }
    }

    for (variant, cur, row) in &rows {
        table.write_row(*variant, *cur, row)?;
    }
    Ok(())
}

/// Parses a whole state stream into `table`. On error `table` is left untouched.
pub fn read_state<R: Read>(r: &mut R, table: &mut MatchTable) -> Result<StateHeader> {
    let header = read_header(r)?;
    read_rows(r, &header, table)?;
    Ok(header)
}
