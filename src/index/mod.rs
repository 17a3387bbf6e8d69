//! Geometry index of feature tables (the `nga_geometry_index` extension).
//!
//! The index is a plain table of per-feature envelopes plus a per-table record
//! of when the last full build completed. It stands in for an R-tree where
//! the SQLite build lacks one, and answers "which features may intersect this
//! box" without decoding any geometry.

mod envelope;
mod geometry_index;
mod indexer;
mod progress;
mod query;
mod source;
mod table_index;
mod timestamp;

pub use envelope::Envelope;
pub use geometry_index::{GeometryIndex, GeometryIndexIter, GeometryIndexKey, GeometryIndexStore};
pub use indexer::FeatureTableIndexer;
pub use progress::{IndexOptions, Progress};
pub use source::{
    ContentsStaleness, Extension, ExtensionRegistry, FeatureRow, GEOMETRY_INDEX_EXTENSION,
    GeometryDecoder, RowSource,
};
pub use table_index::{TableIndex, TableIndexStore};
pub use timestamp::Timestamp;
