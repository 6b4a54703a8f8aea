use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use super::StateHeader;
use crate::buffer::{MatchRow, MatchTable, MatchVariant};
use crate::error::Result;

fn write_len<W: Write>(w: &mut W, len: usize) -> Result<()> {
    w.write_u64::<LittleEndian>(len as u64)?;
    Ok(())
}

fn write_row<W: Write>(w: &mut W, row: &MatchRow) -> Result<()> {
    write_len(w, row.counts.len())?;
    for &c in &row.counts {
        w.write_u32::<LittleEndian>(c)?;
    }
    write_len(w, row.distances.len())?;
    for &d in &row.distances {
        w.write_f32::<LittleEndian>(d)?;
    }
    write_len(w, row.key_indices.len())?;
    for k in &row.key_indices {
        w.write_u32::<LittleEndian>(k.src)?;
        w.write_u32::<LittleEndian>(k.dst)?;
    }
    Ok(())
}

/// Serializes `header` and the rows its stage calls for.
pub fn write_state<W: Write>(w: &mut W, header: &StateHeader, table: &MatchTable) -> Result<()> {
    table.check_image_count(header.num_images)?;

    w.write_u32::<LittleEndian>(header.num_images as u32)?;
    write_len(w, header.candidate_pairs.len())?;
    for pair in &header.candidate_pairs {
        w.write_u32::<LittleEndian>(pair.i as u32)?;
        w.write_u32::<LittleEndian>(pair.j as u32)?;
    }
    w.write_i32::<LittleEndian>(header.stage.as_i32())?;

    for cur in 1..header.num_images {
        if header.stage.has_raw_matches() {
            write_row(w, &table.row(MatchVariant::Raw, cur)?)?;
        }
        if header.stage.has_filtered_matches() {
            write_row(w, &table.row(MatchVariant::Filtered, cur)?)?;
        }
    }
    Ok(())
}

pub struct StateWriter(BufWriter<File>);

impl StateWriter {
    pub fn new(path: &Path) -> Result<Self> {
        Ok(Self(BufWriter::new(File::create(path)?)))
    }

    pub fn write(&mut self, header: &StateHeader, table: &MatchTable) -> Result<()> {
        write_state(&mut self.0, header, table)
    }

    pub fn finish(mut self) -> Result<()> {
        self.0.flush()?;
        Ok(())
    }
}
