//! Binary persistence of the match table and pipeline stage.
//!
//! Little-endian layout:
//!
//! ```text
//! u32                 image count N
//! u64, (u32, u32)*    candidate pairs
//! i32                 stage
//! for cur in 1..N:
//!     raw row       if stage >= HasRawMatches
//!     filtered row  if stage >= FilteredByGeometry
//! ```
//!
//! A row is three length-prefixed (`u64`) vectors: counts (`u32`), distances (`f32`) and
//! key index pairs (`u32`, `u32`). Slots past each pair's count are written as-is.

mod reader;
mod writer;

pub use reader::{read_header, read_rows, read_state};
pub use writer::{write_state, StateWriter};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::buffer::MatchTable;
use crate::error::Result;
use crate::stage::PipelineStage;
use crate::types::ImagePair;

/// Everything persisted besides the match records themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateHeader {
    pub num_images: usize,
    pub stage: PipelineStage,
    pub candidate_pairs: Vec<ImagePair>,
}

pub fn save_to_file(path: &Path, header: &StateHeader, table: &MatchTable) -> Result<()> {
    let mut writer = StateWriter::new(path)?;
    writer.write(header, table)?;
    writer.finish()
}

/// Reads a state file into `table`. On error `table` is left untouched.
pub fn load_from_file(path: &Path, table: &mut MatchTable) -> Result<StateHeader> {
    let mut reader = BufReader::new(File::open(path)?);
    read_state(&mut reader, table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::MatchVariant;
    use crate::error::PipelineError;
    use crate::types::Correspondence;

    fn filled_table() -> MatchTable {
        let mut table = MatchTable::reserve(6, 4, 2);
        table.write_raw(0, 1, &[Correspondence::new(3, 4, 0.25)]).unwrap();
        table
            .write_raw(1, 3, &[Correspondence::new(0, 1, f32::NAN), Correspondence::new(2, 2, 0.5)])
            .unwrap();
        table.write_filtered(1, 3, &[Correspondence::new(2, 2, 0.5)]).unwrap();
        table
    }

    fn header(stage: PipelineStage) -> StateHeader {
        StateHeader {
            num_images: 4,
            stage,
            candidate_pairs: vec![ImagePair::new(1, 3)],
        }
    }

    fn rows(table: &MatchTable, variant: MatchVariant) -> Vec<Vec<u8>> {
        (1..4).map(|cur| table.row(variant, cur).unwrap().to_bytes()).collect()
    }

    #[test]
    fn round_trip_through_memory() {
        let table = filled_table();
        let mut bytes = Vec::new();
        write_state(&mut bytes, &header(PipelineStage::FilteredByGeometry), &table).unwrap();

        let mut loaded = MatchTable::reserve(6, 4, 2);
        let got = read_state(&mut bytes.as_slice(), &mut loaded).unwrap();
        assert_eq!(got, header(PipelineStage::FilteredByGeometry));
        assert_eq!(rows(&loaded, MatchVariant::Raw), rows(&table, MatchVariant::Raw));
        assert_eq!(rows(&loaded, MatchVariant::Filtered), rows(&table, MatchVariant::Filtered));
    }

    #[test]
    fn early_stage_writes_no_rows() {
        let table = filled_table();
        let mut bytes = Vec::new();
        write_state(&mut bytes, &header(PipelineStage::Initialized), &table).unwrap();
        // count + pair list + stage
        assert_eq!(bytes.len(), 4 + 8 + 8 + 4);

        let mut loaded = MatchTable::reserve(6, 4, 2);
        read_state(&mut bytes.as_slice(), &mut loaded).unwrap();
        assert!(loaded.read(MatchVariant::Raw, 0, 1).unwrap().is_empty());
    }

    #[test]
    fn raw_only_stage_skips_filtered_rows() {
        let table = filled_table();
        let mut bytes = Vec::new();
        write_state(&mut bytes, &header(PipelineStage::HasRawMatches), &table).unwrap();
        let mut loaded = MatchTable::reserve(6, 4, 2);
        read_state(&mut bytes.as_slice(), &mut loaded).unwrap();
        assert_eq!(loaded.read(MatchVariant::Raw, 0, 1).unwrap().count(), 1);
        assert!(loaded.read(MatchVariant::Filtered, 1, 3).unwrap().is_empty());
    }

    #[test]
    fn truncated_stream_leaves_table_untouched() {
        let table = filled_table();
        let mut bytes = Vec::new();
        write_state(&mut bytes, &header(PipelineStage::FilteredByGeometry), &table).unwrap();
        bytes.truncate(bytes.len() - 3);

        let mut loaded = MatchTable::reserve(6, 4, 2);
        assert!(matches!(
            read_state(&mut bytes.as_slice(), &mut loaded),
            Err(PipelineError::Corrupt(_))
        ));
        assert!(loaded.read(MatchVariant::Raw, 0, 1).unwrap().is_empty());
    }

    #[test]
    fn capacity_mismatch_is_corrupt() {
        let table = filled_table();
        let mut bytes = Vec::new();
        write_state(&mut bytes, &header(PipelineStage::HasRawMatches), &table).unwrap();
        let mut wider = MatchTable::reserve(6, 8, 2);
        assert!(matches!(
            read_state(&mut bytes.as_slice(), &mut wider),
            Err(PipelineError::Corrupt(_))
        ));
    }

    #[test]
    fn unknown_stage_is_corrupt() {
        let mut bytes = Vec::new();
        write_state(&mut bytes, &header(PipelineStage::Initialized), &filled_table()).unwrap();
        let stage_at = bytes.len() - 4;
        bytes[stage_at..].copy_from_slice(&9i32.to_le_bytes());
        let mut loaded = MatchTable::reserve(6, 4, 2);
        assert!(matches!(
            read_state(&mut bytes.as_slice(), &mut loaded),
            Err(PipelineError::Corrupt(_))
        ));
    }

    #[test]
    fn oversized_header_is_corrupt() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        bytes.extend_from_slice(&(1u64 << 62).to_le_bytes());
        assert!(matches!(read_header(&mut bytes.as_slice()), Err(PipelineError::Corrupt(_))));

        // more candidates than pairs
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&4u64.to_le_bytes());
        assert!(matches!(read_header(&mut bytes.as_slice()), Err(PipelineError::Corrupt(_))));
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.bin");
        let table = filled_table();
        save_to_file(&path, &header(PipelineStage::FilteredByGeometry), &table).unwrap();

        let mut loaded = MatchTable::reserve(6, 4, 2);
        let got = load_from_file(&path, &mut loaded).unwrap();
        assert_eq!(got.stage, PipelineStage::FilteredByGeometry);
        assert_eq!(rows(&loaded, MatchVariant::Filtered), rows(&table, MatchVariant::Filtered));
    }
}
