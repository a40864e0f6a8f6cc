//! Per-tile per-position accumulated error (spec.md §4.6).
//!
//! Mirrors the self-disabling behavior NanoStats also uses: an unparseable
//! header is not a metric error (spec.md §4.9.2), it just stops the whole
//! component from accumulating further.

use crate::lut::error_rate;
use crate::record::RecordBatch;
use std::collections::HashMap;

struct TileData {
    length_counts: Vec<u64>,
    total_errors: Vec<f64>,
}

impl TileData {
    fn new(len: usize) -> Self {
        TileData {
            length_counts: vec![0u64; len],
            total_errors: vec![0.0; len],
        }
    }
}

pub struct PerTileQuality {
    max_length: usize,
    tiles: HashMap<u32, TileData>,
    skipped_reason: Option<String>,
}

impl Default for PerTileQuality {
    fn default() -> Self {
        Self::new()
    }
}

impl PerTileQuality {
    pub fn new() -> Self {
        PerTileQuality {
            max_length: 0,
            tiles: HashMap::new(),
            skipped_reason: None,
        }
    }

    pub fn add(&mut self, batch: &RecordBatch) {
        if self.skipped_reason.is_some() {
            return;
        }
        for view in batch.iter() {
            let name = view.name();
            match parse_tile(name) {
                Some(tile) => self.record(tile, view.sequence().len(), view.qualities()),
                None => {
                    self.skipped_reason = Some(String::from_utf8_lossy(name).into_owned());
                    return;
                }
            }
        }
    }

    fn ensure_capacity(&mut self, len: usize) {
        if len <= self.max_length {
            return;
        }
        for data in self.tiles.values_mut() {
            data.length_counts.resize(len, 0);
            data.total_errors.resize(len, 0.0);
        }
        self.max_length = len;
    }

    fn record(&mut self, tile: u32, len: usize, quals: &[u8]) {
        self.ensure_capacity(len);
        let max_length = self.max_length;
        let data = self.tiles.entry(tile).or_insert_with(|| TileData::new(max_length));
        if len == 0 {
            return;
        }
        data.length_counts[len - 1] += 1;
        for (pos, &qb) in quals.iter().enumerate() {
            let q = qb.saturating_sub(33);
            data.total_errors[pos] += error_rate(q);
        }
    }

    pub fn skipped_reason(&self) -> Option<&str> {
        self.skipped_reason.as_deref()
    }

    pub fn tile_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.tiles.keys().copied()
    }

    /// `(base_counts_per_position, total_errors_per_position)` for one
    /// tile, reverse-cumulative summed so position `pos` holds the count
    /// of reads reaching at least `pos+1` bases (spec.md §4.6).
    pub fn tile_quality(&self, tile: u32) -> Option<(Vec<u64>, Vec<f64>)> {
        let data = self.tiles.get(&tile)?;
        let mut cumulative = vec![0u64; self.max_length];
        let mut running = 0u64;
        for pos in (0..self.max_length).rev() {
            running += data.length_counts[pos];
            cumulative[pos] = running;
        }
        Some((cumulative, data.total_errors.clone()))
    }
}

/// The fifth colon-delimited field of an Illumina header
/// `instrument:run:flowcell:lane:tile:x:y[:UMI] …`, up to the first space.
fn parse_tile(name: &[u8]) -> Option<u32> {
    let header = match name.iter().position(|&b| b == b' ') {
        Some(i) => &name[..i],
        None => name,
    };
    let tile_field = header.split(|&b| b == b':').nth(4)?;
    std::str::from_utf8(tile_field).ok()?.parse().ok()
}
