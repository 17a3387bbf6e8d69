//! GeoPackage surface backed by rusqlite: the package, its feature layers,
//! and the collaborators the geometry index needs from them.

mod feature;
mod gpkg;
mod layer;

pub use feature::{GpkgFeature, GpkgFeatureIterator, GpkgGeometryDecoder};
pub use gpkg::Gpkg;
pub use layer::GpkgLayer;

pub(crate) use feature::{gpkg_geometry_envelope, wkb_to_gpkg_geometry};
