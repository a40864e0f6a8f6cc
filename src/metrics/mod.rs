//! The family of metric accumulators (spec.md §2, §4). Each is pure with
//! respect to its own state, performs no I/O, and follows the same
//! trivial lifecycle: `Empty -> Accumulating -> Readable` (spec.md §4.9.1).

pub mod adapter_counter;
pub mod base_quality;
pub mod dedup;
pub mod insert_size;
pub mod nanostats;
pub mod overrepresented;
pub mod per_tile;

pub use adapter_counter::AdapterCounter;
pub use base_quality::BaseQualityTable;
pub use dedup::DedupEstimator;
pub use insert_size::InsertSizeMetrics;
pub use nanostats::{NanoInfo, NanoStats};
pub use overrepresented::OverrepresentedSequences;
pub use per_tile::PerTileQuality;
