//! Interfaces the indexer consumes from its host.
//!
//! [`crate::Gpkg`] and [`crate::GpkgLayer`] implement all of them against a
//! GeoPackage file. Other hosts (or tests) can supply their own.

use super::{Envelope, Timestamp};
use crate::error::Result;
use std::ops::ControlFlow;

/// A feature row as seen by the indexer.
#[derive(Clone, Copy, Debug)]
pub struct FeatureRow<'a> {
    pub feature_id: i64,
    /// The raw geometry value, `None` when the column is `NULL`.
    pub geometry: Option<&'a [u8]>,
}

/// Iterates the rows of one feature table.
pub trait RowSource {
    fn table_name(&self) -> &str;

    fn geometry_column(&self) -> &str;

    /// Number of rows the next [`RowSource::scan`] will visit. Used for
    /// progress reporting only.
    fn count(&self) -> Result<u64>;

    /// Visit every row once. The visitor returns [`ControlFlow::Break`] to
    /// stop the scan early; any cursor held by the scan is released before
    /// this returns.
    fn scan(&self, visit: &mut dyn FnMut(FeatureRow<'_>) -> Result<ControlFlow<()>>)
    -> Result<()>;
}

/// Derives envelopes from raw geometry values.
///
/// An `Err` means the value could not be decoded, and `Ok(None)` means the
/// geometry is empty. The indexer skips the row in both cases.
pub trait GeometryDecoder {
    fn envelope(&self, raw_geometry: &[u8]) -> Result<Option<Envelope>>;
}

/// Reports when the content of a table last changed.
pub trait ContentsStaleness {
    /// `None` if the table has no contents record or no recorded change.
    fn last_modified(&self, table_name: &str) -> Result<Option<Timestamp>>;
}

/// Presence bookkeeping for extensions registered on a table column.
pub trait ExtensionRegistry {
    fn has(&self, extension: &Extension<'_>, table_name: &str, column_name: &str) -> Result<bool>;

    fn register(&self, extension: &Extension<'_>, table_name: &str, column_name: &str)
    -> Result<()>;

    /// Returns whether a registration was removed.
    fn unregister(&self, extension: &Extension<'_>, table_name: &str) -> Result<bool>;

    /// Remove the registrations of `extension` on every table.
    fn unregister_all(&self, extension: &Extension<'_>) -> Result<usize>;
}

/// Identity of an extension as recorded in `gpkg_extensions`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Extension<'a> {
    pub name: &'a str,
    pub definition: &'a str,
    pub scope: &'a str,
}

/// The geometry index extension.
pub const GEOMETRY_INDEX_EXTENSION: Extension<'static> = Extension {
    name: "nga_geometry_index",
    definition: "http://ngageoint.github.io/GeoPackage/docs/extensions/geometry-index.html",
    scope: "read-write",
};
