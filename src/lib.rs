//! Geometry index extension for GeoPackage feature tables, built on top of
//! rusqlite.
//!
//! ## Overview
//!
//! - `Gpkg` represents the whole GeoPackage data.
//! - `GpkgLayer` represents a single feature layer in the data.
//! - `GpkgFeature` represents a single feature in the layer.
//! - `FeatureTableIndexer` maintains the geometry index of one layer.
//!
//! The geometry index (`nga_geometry_index` extension) stores one envelope per
//! feature in `nga_geometry_index`, and the time of the last complete build in
//! `nga_table_index`. Envelopes carry X and Y, plus Z and M when the geometry
//! has them. A query with an envelope returns the entries whose envelope
//! overlaps it, without decoding any geometry.
//!
//! An index is fresh while its build time is not older than
//! `gpkg_contents.last_change` of the table. Writes through `GpkgLayer` update
//! that column, so `FeatureTableIndexer::index(false)` rebuilds only when
//! something changed since the last build.
//!
//! ## Short usage
//!
//! ```no_run
//! use rusqlite_gpkg_index::{Envelope, Gpkg};
//!
//! let gpkg = Gpkg::open("data/example.gpkg")?;
//! for layer_name in gpkg.list_layers()? {
//!     let indexer = gpkg.feature_indexer(&layer_name)?;
//!     let indexed = indexer.index(false)?;
//!     println!("{layer_name}: {indexed} features indexed");
//!
//!     let bbox = Envelope::new(139.0, 140.0, 35.0, 36.0);
//!     println!("{} features in bbox", indexer.count(Some(&bbox))?);
//!     for feature in indexer.query_features(Some(&bbox))? {
//!         let _geom = feature.geometry()?;
//!     }
//! }
//! # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
//! ```
//!
//! ## Keeping the index in sync
//!
//! Full builds stamp the table as indexed. Single features can be indexed or
//! removed without a rebuild; this does not change the stamp.
//!
//! ```no_run
//! use geo_types::Point;
//! use rusqlite_gpkg_index::{Gpkg, Value};
//!
//! let gpkg = Gpkg::open("data/example.gpkg")?;
//! let layer = gpkg.open_layer("points")?;
//! let indexer = gpkg.feature_indexer("points")?;
//!
//! let point = Point::new(1.0, 2.0);
//! let id = layer.insert(point, [Value::from("alpha".to_string())])?;
//! indexer.index_geometry(id, &point)?;
//!
//! layer.delete(id)?;
//! indexer.delete_index_for_feature(id)?;
//! # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
//! ```
//!
//! ## Progress and cancellation
//!
//! Long builds can report progress and be cancelled through `Progress`. A
//! cancelled build leaves the table unstamped, so the next `index(false)`
//! starts over.
//!
//! ```no_run
//! use rusqlite_gpkg_index::{Gpkg, IndexOptions, Progress};
//!
//! struct Printer {
//!     done: u64,
//!     max: u64,
//! }
//!
//! impl Progress for Printer {
//!     fn set_max(&mut self, max: u64) {
//!         self.max = max;
//!     }
//!
//!     fn add_progress(&mut self, rows: u64) {
//!         self.done += rows;
//!         println!("{}/{}", self.done, self.max);
//!     }
//! }
//!
//! let gpkg = Gpkg::open("data/example.gpkg")?;
//! let indexer = gpkg
//!     .feature_indexer("points")?
//!     .with_options(IndexOptions::default().progress_interval(10_000));
//! indexer.index_with_progress(true, &mut Printer { done: 0, max: 0 })?;
//! # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
//! ```
mod error;
mod gpkg;
mod index;
mod sql_functions;

mod conversions;
mod ogc_sql;
mod types;

pub use error::{GpkgError, Result};
pub use gpkg::{Gpkg, GpkgFeature, GpkgFeatureIterator, GpkgGeometryDecoder, GpkgLayer};
pub use index::{
    ContentsStaleness, Envelope, Extension, ExtensionRegistry, FeatureRow, FeatureTableIndexer,
    GEOMETRY_INDEX_EXTENSION, GeometryDecoder, GeometryIndex, GeometryIndexIter,
    GeometryIndexKey, GeometryIndexStore, IndexOptions, Progress, RowSource, TableIndex,
    TableIndexStore, Timestamp,
};
pub use sql_functions::register_spatial_functions;
pub use types::{ColumnSpec, ColumnType};

// Re-export types used in public fields to keep the public API stable.
pub use rusqlite::types::Value;
pub use wkb::reader::{Dimension, GeometryType};
