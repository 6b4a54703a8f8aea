//! Fixed-capacity correspondence storage for every image pair.
//!
//! A [`MatchStore`] is an arena of per-pair records addressed by
//! [`pair_index`](crate::pair_index::pair_index): one count per pair plus `capacity`
//! distance and key-index slots per pair. [`MatchTable`] owns a raw and a filtered store
//! reserved up front for the maximum image count. [`RowScratch`] is the per-row staging
//! area handed to engines, and [`MatchRow`] is the host-side copy of one row used for
//! persistence and inspection.

use tracing::warn;

use crate::error::{PipelineError, Result};
use crate::pair_index::{num_pairs, pair_index, row_range};
use crate::types::{Correspondence, ImagePair, KeyIndexPair};

/// Bit pattern of never-written slots.
const EMPTY_BITS: u32 = u32::MAX;
const EMPTY_KEYS: KeyIndexPair = KeyIndexPair::new(EMPTY_BITS, EMPTY_BITS);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchVariant {
    Raw,
    Filtered,
}

/// Owned copy of one pair's valid correspondences.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PairRecord {
    pub distances: Vec<f32>,
    pub key_indices: Vec<KeyIndexPair>,
}

impl PairRecord {
    pub fn count(&self) -> usize {
        self.distances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distances.is_empty()
    }

    pub fn correspondences(&self) -> impl Iterator<Item = Correspondence> + '_ {
        self.key_indices
            .iter()
            .zip(&self.distances)
            .map(|(&keys, &distance)| Correspondence { keys, distance })
    }
}

/// Host copy of one full row, including slots past each pair's count.
#[derive(Debug, Clone, Default)]
pub struct MatchRow {
    pub counts: Vec<u32>,
    pub distances: Vec<f32>,
    pub key_indices: Vec<KeyIndexPair>,
}

impl MatchRow {
    /// Byte-level view, used to compare rows including undefined slots.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            4 * (self.counts.len() + self.distances.len() + 2 * self.key_indices.len()),
        );
        out.extend_from_slice(bytemuck::cast_slice(&self.counts));
        out.extend_from_slice(bytemuck::cast_slice(&self.distances));
        out.extend_from_slice(bytemuck::cast_slice(&self.key_indices));
        out
    }
}

impl PartialEq for MatchRow {
    fn eq(&self, other: &Self) -> bool {
        self.counts == other.counts
            && self.key_indices == other.key_indices
            && self.distances.len() == other.distances.len()
            && self
                .distances
                .iter()
                .zip(&other.distances)
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }
}

/// Copies `matches` into one pair's slots, keeping at most `dist.len()` of them in
/// engine order. Returns the number kept.
fn fill_slots(dist: &mut [f32], keys: &mut [KeyIndexPair], matches: &[Correspondence]) -> usize {
    let kept = matches.len().min(dist.len());
    for (slot, m) in matches[..kept].iter().enumerate() {
        dist[slot] = m.distance;
        keys[slot] = m.keys;
    }
    kept
}

/// One variant (raw or filtered) of the per-pair arena.
#[derive(Debug, Clone)]
pub struct MatchStore {
    capacity: usize,
    counts: Vec<u32>,
    distances: Vec<f32>,
    key_indices: Vec<KeyIndexPair>,
}

impl MatchStore {
    fn reserve(max_images: usize, capacity: usize) -> Self {
        let pairs = num_pairs(max_images);
        Self {
            capacity,
            counts: vec![0; pairs],
            distances: vec![f32::from_bits(EMPTY_BITS); pairs * capacity],
            key_indices: vec![EMPTY_KEYS; pairs * capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn slots(&self, idx: usize) -> std::ops::Range<usize> {
        idx * self.capacity..(idx + 1) * self.capacity
    }

    fn row_slots(&self, cur: usize) -> std::ops::Range<usize> {
        let rows = row_range(cur);
        rows.start * self.capacity..rows.end * self.capacity
    }

    fn write(&mut self, idx: usize, matches: &[Correspondence]) -> usize {
        let slots = self.slots(idx);
        let kept = fill_slots(
            &mut self.distances[slots.clone()],
            &mut self.key_indices[slots],
            matches,
        );
        self.counts[idx] = kept as u32;
        kept
    }

    fn read(&self, idx: usize) -> PairRecord {
        let count = self.counts[idx] as usize;
        let start = idx * self.capacity;
        PairRecord {
            distances: self.distances[start..start + count].to_vec(),
            key_indices: self.key_indices[start..start + count].to_vec(),
        }
    }
}

/// Raw and filtered records for every pair among up to `max_images` images.
#[derive(Debug, Clone)]
pub struct MatchTable {
    max_images: usize,
    raw: MatchStore,
    filtered: MatchStore,
}

impl MatchTable {
    /// Allocates both variants for `max_images` images. Capacity never grows afterwards.
    pub fn reserve(max_images: usize, raw_capacity: usize, filtered_capacity: usize) -> Self {
        Self {
            max_images,
            raw: MatchStore::reserve(max_images, raw_capacity),
            filtered: MatchStore::reserve(max_images, filtered_capacity),
        }
    }

    pub fn max_images(&self) -> usize {
        self.max_images
    }

    pub fn capacity(&self, variant: MatchVariant) -> usize {
        self.store(variant).capacity
    }

    /// Fails when a run of `num_images` images would not fit the reservation.
    pub fn check_image_count(&self, num_images: usize) -> Result<()> {
        if num_images > self.max_images {
            return Err(PipelineError::CapacityExceeded {
                requested: num_images,
                max: self.max_images,
            });
        }
        Ok(())
    }

    fn store(&self, variant: MatchVariant) -> &MatchStore {
        match variant {
            MatchVariant::Raw => &self.raw,
            MatchVariant::Filtered => &self.filtered,
        }
    }

    fn store_mut(&mut self, variant: MatchVariant) -> &mut MatchStore {
        match variant {
            MatchVariant::Raw => &mut self.raw,
            MatchVariant::Filtered => &mut self.filtered,
        }
    }

    fn index_of(&self, i: usize, j: usize) -> Result<usize> {
        if i >= j || j >= self.max_images {
            return Err(PipelineError::PairOutOfRange {
                i,
                j,
                max_images: self.max_images,
            });
        }
        Ok(pair_index(i, j))
    }

    fn check_row(&self, cur: usize) -> Result<()> {
        if cur == 0 || cur >= self.max_images {
            return Err(PipelineError::PairOutOfRange {
                i: 0,
                j: cur,
                max_images: self.max_images,
            });
        }
        Ok(())
    }

    /// Replaces the record of pair `(i, j)`. Matches past the variant's capacity are
    /// dropped; the number kept is returned.
    pub fn write(
        &mut self,
        variant: MatchVariant,
        i: usize,
        j: usize,
        matches: &[Correspondence],
    ) -> Result<usize> {
        let idx = self.index_of(i, j)?;
        let kept = self.store_mut(variant).write(idx, matches);
        if kept < matches.len() {
            warn!(
                "{variant:?} record ({i}, {j}) truncated: {} matches, capacity {kept}",
                matches.len()
            );
        }
        Ok(kept)
    }

    pub fn write_raw(&mut self, i: usize, j: usize, matches: &[Correspondence]) -> Result<usize> {
        self.write(MatchVariant::Raw, i, j, matches)
    }

    pub fn write_filtered(
        &mut self,
        i: usize,
        j: usize,
        matches: &[Correspondence],
    ) -> Result<usize> {
        self.write(MatchVariant::Filtered, i, j, matches)
    }

    pub fn read(&self, variant: MatchVariant, i: usize, j: usize) -> Result<PairRecord> {
        let idx = self.index_of(i, j)?;
        Ok(self.store(variant).read(idx))
    }

    pub fn count(&self, variant: MatchVariant, pair: ImagePair) -> Result<usize> {
        let idx = self.index_of(pair.i, pair.j)?;
        Ok(self.store(variant).counts[idx] as usize)
    }

    /// Downloads row `cur` (pairs `(0..cur, cur)`) into host form.
    pub fn row(&self, variant: MatchVariant, cur: usize) -> Result<MatchRow> {
        self.check_row(cur)?;
        let store = self.store(variant);
        let slots = store.row_slots(cur);
        Ok(MatchRow {
            counts: store.counts[row_range(cur)].to_vec(),
            distances: store.distances[slots.clone()].to_vec(),
            key_indices: store.key_indices[slots].to_vec(),
        })
    }

    /// Uploads a host row into row `cur`. Sizes must match the row exactly.
    pub fn write_row(&mut self, variant: MatchVariant, cur: usize, row: &MatchRow) -> Result<()> {
        self.check_row(cur)?;
        let store = self.store_mut(variant);
        let slots = store.row_slots(cur);
        if row.counts.len() != cur
            || row.distances.len() != slots.len()
            || row.key_indices.len() != slots.len()
        {
            return Err(PipelineError::Corrupt(format!(
                "{variant:?} row {cur}: expected {cur} counts and {} slots, got {}/{}/{}",
                slots.len(),
                row.counts.len(),
                row.distances.len(),
                row.key_indices.len()
            )));
        }
        if let Some(&bad) = row.counts.iter().find(|&&c| c as usize > store.capacity) {
            return Err(PipelineError::Corrupt(format!(
                "{variant:?} row {cur}: count {bad} exceeds capacity {}",
                store.capacity
            )));
        }
        store.counts[row_range(cur)].copy_from_slice(&row.counts);
        store.distances[slots.clone()].copy_from_slice(&row.distances);
        store.key_indices[slots].copy_from_slice(&row.key_indices);
        Ok(())
    }

    /// Copies row `cur` into `scratch` in one pass. Capacities must agree.
    pub fn load_scratch(
        &self,
        variant: MatchVariant,
        cur: usize,
        scratch: &mut RowScratch,
    ) -> Result<()> {
        self.check_row(cur)?;
        let store = self.store(variant);
        scratch.check_capacity(variant, store.capacity)?;
        let slots = store.row_slots(cur);
        scratch.cur = cur;
        scratch.counts.clear();
        scratch.counts.extend_from_slice(&store.counts[row_range(cur)]);
        scratch.distances.clear();
        scratch.distances.extend_from_slice(&store.distances[slots.clone()]);
        scratch.key_indices.clear();
        scratch.key_indices.extend_from_slice(&store.key_indices[slots]);
        Ok(())
    }

    /// Copies a fully staged row back into the table.
    pub fn store_scratch(&mut self, variant: MatchVariant, scratch: &RowScratch) -> Result<()> {
        let cur = scratch.cur;
        self.check_row(cur)?;
        let store = self.store_mut(variant);
        scratch.check_capacity(variant, store.capacity)?;
        let slots = store.row_slots(cur);
        store.counts[row_range(cur)].copy_from_slice(&scratch.counts);
        store.distances[slots.clone()].copy_from_slice(&scratch.distances);
        store.key_indices[slots].copy_from_slice(&scratch.key_indices);
        Ok(())
    }
}

/// Staging area for the row currently being processed.
///
/// Reused across rows; [`RowScratch::reset`] rewrites every slot so nothing from the
/// previous row can leak into the next one.
#[derive(Debug, Clone)]
pub struct RowScratch {
    capacity: usize,
    cur: usize,
    counts: Vec<u32>,
    distances: Vec<f32>,
    key_indices: Vec<KeyIndexPair>,
}

impl RowScratch {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            cur: 0,
            counts: Vec::new(),
            distances: Vec::new(),
            key_indices: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cur(&self) -> usize {
        self.cur
    }

    fn check_capacity(&self, variant: MatchVariant, expected: usize) -> Result<()> {
        if self.capacity != expected {
            return Err(PipelineError::Configuration(format!(
                "scratch capacity {} does not match {variant:?} capacity {expected}",
                self.capacity
            )));
        }
        Ok(())
    }

    /// Prepares an empty row `cur`: zero counts, every slot rewritten.
    pub fn reset(&mut self, cur: usize) {
        self.cur = cur;
        self.counts.clear();
        self.counts.resize(cur, 0);
        self.distances.clear();
        self.distances.resize(cur * self.capacity, f32::from_bits(EMPTY_BITS));
        self.key_indices.clear();
        self.key_indices.resize(cur * self.capacity, EMPTY_KEYS);
    }

    /// Stores the matches of pair `(prev, cur)`. Returns the number kept.
    pub fn set_pair(&mut self, prev: usize, matches: &[Correspondence]) -> usize {
        let slots = prev * self.capacity..(prev + 1) * self.capacity;
        let kept = fill_slots(
            &mut self.distances[slots.clone()],
            &mut self.key_indices[slots],
            matches,
        );
        self.counts[prev] = kept as u32;
        kept
    }

    pub fn clear_pair(&mut self, prev: usize) {
        self.counts[prev] = 0;
    }

    /// Valid matches of pair `(prev, cur)`.
    pub fn pair(&self, prev: usize) -> Vec<Correspondence> {
        let count = self.counts[prev] as usize;
        let start = prev * self.capacity;
        self.key_indices[start..start + count]
            .iter()
            .zip(&self.distances[start..start + count])
            .map(|(&keys, &distance)| Correspondence { keys, distance })
            .collect()
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }
}
