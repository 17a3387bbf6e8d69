use std::error::Error;
use std::fmt;

/// Crate error type for GeoPackage and geometry index operations.
#[derive(Debug)]
pub enum GpkgError {
    /// Wraps errors returned by `rusqlite`.
    Sql(rusqlite::Error),
    /// Wraps errors returned by the `wkb` crate.
    Wkb(wkb::error::WkbError),
    /// A free-form error message.
    Message(String),
    /// A geometry type in metadata could not be mapped to a supported WKB geometry type.
    UnsupportedGeometryType(String),
    /// Invalid or mixed `z` / `m` dimension flags in GeoPackage metadata.
    InvalidDimension { z: i8, m: i8 },
    /// Invalid GeoPackage geometry flags byte.
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob is too short for the fixed header.
    InvalidGpkgGeometryLength { len: usize, minimum: usize },
    /// GeoPackage geometry blob is too short for the declared envelope payload.
    InvalidGpkgGeometryEnvelope { len: usize, required: usize },
    /// An envelope has a min greater than its max on some axis, or a NaN bound.
    InvalidEnvelope { axis: &'static str, min: f64, max: f64 },
    /// A stored datetime could not be parsed.
    InvalidTimestamp(String),
    /// The feature table to index does not exist.
    MissingFeatureTable { table_name: String },
    /// Layer schema has no primary key column.
    MissingPrimaryKeyColumn { layer_name: String },
    /// Layer schema has no geometry column.
    MissingGeometryColumn { layer_name: String },
    /// Layer schema has multiple primary key columns, which is unsupported.
    CompositePrimaryKeyUnsupported { layer_name: String },
    ReadOnly,
}

impl fmt::Display for GpkgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(err) => write!(f, "{err}"),
            Self::Wkb(err) => write!(f, "{err}"),
            Self::Message(message) => write!(f, "{message}"),
            Self::UnsupportedGeometryType(ty) => write!(f, "unsupported geometry type: {ty}"),
            Self::InvalidDimension { z, m } => {
                write!(f, "invalid or mixed geometry dimension (z={z}, m={m})")
            }
            Self::InvalidGpkgGeometryFlags(flags) => {
                write!(f, "invalid gpkg geometry flags: {flags:#04x}")
            }
            Self::InvalidGpkgGeometryLength { len, minimum } => {
                write!(
                    f,
                    "invalid gpkg geometry length: got {len} bytes, expected at least {minimum}"
                )
            }
            Self::InvalidGpkgGeometryEnvelope { len, required } => {
                write!(
                    f,
                    "invalid gpkg geometry envelope length: got {len} bytes, required {required}"
                )
            }
            Self::InvalidEnvelope { axis, min, max } => {
                write!(f, "invalid envelope on {axis} axis: min {min} > max {max}")
            }
            Self::InvalidTimestamp(value) => write!(f, "invalid timestamp: {value}"),
            Self::MissingFeatureTable { table_name } => {
                write!(f, "feature table does not exist: {table_name}")
            }
            Self::MissingPrimaryKeyColumn { layer_name } => {
                write!(f, "no primary key column found for layer: {layer_name}")
            }
            Self::MissingGeometryColumn { layer_name } => {
                write!(f, "no geometry column found for layer: {layer_name}")
            }
            Self::CompositePrimaryKeyUnsupported { layer_name } => write!(
                f,
                "composite primary keys are not supported yet for layer: {layer_name}"
            ),
            Self::ReadOnly => write!(f, "operation not allowed on read-only connection"),
        }
    }
}

impl Error for GpkgError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sql(err) => Some(err),
            Self::Wkb(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for GpkgError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

impl From<wkb::error::WkbError> for GpkgError {
    fn from(err: wkb::error::WkbError) -> Self {
        Self::Wkb(err)
    }
}

impl From<&str> for GpkgError {
    fn from(message: &str) -> Self {
        Self::Message(message.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GpkgError>;
