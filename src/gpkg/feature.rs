use crate::error::{GpkgError, Result};
use crate::index::{Envelope, GeometryDecoder};
use rusqlite::types::{FromSql, FromSqlError, Type, Value, ValueRef};
use std::collections::HashMap;
use std::sync::Arc;
use wkb::reader::Wkb;

/// A single feature with geometry bytes and owned properties.
#[derive(Clone, Debug)]
pub struct GpkgFeature {
    pub(super) id: i64,
    pub(super) geometry: Option<Vec<u8>>,
    pub(super) properties: Vec<Value>,
    pub(super) property_index_by_name: Arc<HashMap<String, usize>>,
}

impl GpkgFeature {
    /// Return the primary key value.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Decode the geometry column into WKB.
    pub fn geometry(&self) -> Result<Wkb<'_>> {
        let bytes = self.geometry.as_ref().ok_or_else(|| {
            GpkgError::Sql(rusqlite::Error::InvalidColumnType(
                0,
                "geometry".to_string(),
                Type::Null,
            ))
        })?;
        gpkg_geometry_to_wkb(bytes)
    }

    /// The raw GeoPackage geometry blob, if the geometry is not `NULL`.
    pub fn geometry_blob(&self) -> Option<&[u8]> {
        self.geometry.as_deref()
    }

    /// The envelope of the geometry, or `None` for `NULL` and empty geometries.
    pub fn envelope(&self) -> Result<Option<Envelope>> {
        match &self.geometry {
            Some(bytes) => gpkg_geometry_envelope(bytes),
            None => Ok(None),
        }
    }

    /// Read a property by column name using rusqlite's `FromSql` conversion.
    pub fn property<T: FromSql>(&self, name: &str) -> Result<T> {
        let idx = *self.property_index_by_name.get(name).ok_or_else(|| {
            GpkgError::Sql(rusqlite::Error::InvalidColumnName(name.to_string()))
        })?;
        let value = self
            .properties
            .get(idx)
            .ok_or(GpkgError::Sql(rusqlite::Error::InvalidColumnIndex(idx)))?;
        let value_ref = ValueRef::from(value);
        FromSql::column_result(value_ref).map_err(|err| match err {
            FromSqlError::InvalidType => GpkgError::Sql(rusqlite::Error::InvalidColumnType(
                idx,
                name.to_string(),
                value_ref.data_type(),
            )),
            FromSqlError::OutOfRange(i) => {
                GpkgError::Sql(rusqlite::Error::IntegralValueOutOfRange(idx, i))
            }
            FromSqlError::Other(err) => GpkgError::Sql(rusqlite::Error::FromSqlConversionFailure(
                idx,
                value_ref.data_type(),
                err,
            )),
            err => GpkgError::Sql(rusqlite::Error::FromSqlConversionFailure(
                idx,
                value_ref.data_type(),
                Box::new(err),
            )),
        })
    }
}

/// Owned iterator over features.
pub struct GpkgFeatureIterator {
    pub(super) features: std::vec::IntoIter<GpkgFeature>,
}

impl Iterator for GpkgFeatureIterator {
    type Item = GpkgFeature;

    fn next(&mut self) -> Option<Self::Item> {
        self.features.next()
    }
}

/// Decodes GeoPackage binary geometry blobs.
///
/// The envelope stored in the blob header is used when present; otherwise the
/// WKB payload is decoded and scanned.
#[derive(Clone, Copy, Debug, Default)]
pub struct GpkgGeometryDecoder;

impl GeometryDecoder for GpkgGeometryDecoder {
    fn envelope(&self, raw_geometry: &[u8]) -> Result<Option<Envelope>> {
        gpkg_geometry_envelope(raw_geometry)
    }
}

const GPKG_HEADER_SIZE: usize = 8;
const GPKG_MAGIC: [u8; 2] = [0x47, 0x50];
const FLAG_LITTLE_ENDIAN: u8 = 0b0000_0001;
const FLAG_ENVELOPE_MASK: u8 = 0b0000_1110;
const FLAG_EMPTY: u8 = 0b0001_0000;

struct GpkgHeader {
    flags: u8,
    envelope_size: usize,
}

impl GpkgHeader {
    fn is_empty(&self) -> bool {
        self.flags & FLAG_EMPTY != 0
    }

    fn wkb_offset(&self) -> usize {
        GPKG_HEADER_SIZE + self.envelope_size
    }
}

// cf. https://www.geopackage.org/spec140/index.html#gpb_format
fn parse_gpkg_header(b: &[u8]) -> Result<GpkgHeader> {
    if b.len() < GPKG_HEADER_SIZE {
        return Err(GpkgError::InvalidGpkgGeometryLength {
            len: b.len(),
            minimum: GPKG_HEADER_SIZE,
        });
    }
    if b[0..2] != GPKG_MAGIC {
        return Err(GpkgError::Message(format!(
            "invalid gpkg geometry magic: {:#04x} {:#04x}",
            b[0], b[1]
        )));
    }

    let flags = b[3];
    let envelope_size: usize = match flags & FLAG_ENVELOPE_MASK {
        0b00000000 => 0,  // no envelope
        0b00000010 => 32, // envelope is [minx, maxx, miny, maxy], 32 bytes
        0b00000100 => 48, // envelope is [minx, maxx, miny, maxy, minz, maxz], 48 bytes
        0b00000110 => 48, // envelope is [minx, maxx, miny, maxy, minm, maxm], 48 bytes
        0b00001000 => 64, // envelope is [minx, maxx, miny, maxy, minz, maxz, minm, maxm], 64 bytes
        _ => {
            return Err(GpkgError::InvalidGpkgGeometryFlags(flags));
        }
    };

    let required = GPKG_HEADER_SIZE + envelope_size;
    if b.len() < required {
        return Err(GpkgError::InvalidGpkgGeometryEnvelope {
            len: b.len(),
            required,
        });
    }

    Ok(GpkgHeader {
        flags,
        envelope_size,
    })
}

/// Strip GeoPackage header and envelope bytes to access raw WKB.
pub(crate) fn gpkg_geometry_to_wkb(b: &[u8]) -> Result<Wkb<'_>> {
    let header = parse_gpkg_header(b)?;
    Ok(Wkb::try_new(&b[header.wkb_offset()..])?)
}

/// Envelope of a GeoPackage geometry blob; `None` if the geometry is empty.
pub(crate) fn gpkg_geometry_envelope(b: &[u8]) -> Result<Option<Envelope>> {
    let header = parse_gpkg_header(b)?;
    if header.is_empty() {
        return Ok(None);
    }

    if header.envelope_size == 0 {
        let wkb = Wkb::try_new(&b[header.wkb_offset()..])?;
        return Ok(Envelope::from_geometry(&wkb));
    }

    let little_endian = header.flags & FLAG_LITTLE_ENDIAN != 0;
    let values: Vec<f64> = b[GPKG_HEADER_SIZE..header.wkb_offset()]
        .chunks_exact(8)
        .map(|chunk| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            if little_endian {
                f64::from_le_bytes(bytes)
            } else {
                f64::from_be_bytes(bytes)
            }
        })
        .collect();

    // Writers may emit a NaN envelope for empty geometries.
    if values[..4].iter().any(|v| v.is_nan()) {
        return Ok(None);
    }

    let mut envelope = Envelope::new(values[0], values[1], values[2], values[3]);
    match header.flags & FLAG_ENVELOPE_MASK {
        0b00000100 => envelope = envelope.with_z(values[4], values[5]),
        0b00000110 => envelope = envelope.with_m(values[4], values[5]),
        0b00001000 => {
            envelope = envelope
                .with_z(values[4], values[5])
                .with_m(values[6], values[7])
        }
        _ => {}
    }
    Ok(Some(envelope))
}

/// Wrap WKB into a GeoPackage geometry blob.
///
/// Non-point geometries get a header envelope matching their dimensions, and
/// empty geometries get the empty flag.
pub(crate) fn wkb_to_gpkg_geometry(wkb: Wkb<'_>, srs_id: u32) -> Result<Vec<u8>> {
    let envelope = Envelope::from_geometry(&wkb);
    let is_point = wkb.geometry_type() == wkb::reader::GeometryType::Point;

    let mut flags = FLAG_LITTLE_ENDIAN;
    let mut envelope_values: Vec<f64> = Vec::new();
    match envelope {
        None => flags |= FLAG_EMPTY,
        Some(_) if is_point => {}
        Some(envelope) => {
            envelope_values.extend([
                envelope.min_x,
                envelope.max_x,
                envelope.min_y,
                envelope.max_y,
            ]);
            let indicator = match (envelope.z_range(), envelope.m_range()) {
                (None, None) => 1,
                (Some(z), None) => {
                    envelope_values.extend([z.0, z.1]);
                    2
                }
                (None, Some(m)) => {
                    envelope_values.extend([m.0, m.1]);
                    3
                }
                (Some(z), Some(m)) => {
                    envelope_values.extend([z.0, z.1, m.0, m.1]);
                    4
                }
            };
            flags |= indicator << 1;
        }
    }

    let capacity = GPKG_HEADER_SIZE + envelope_values.len() * 8 + wkb.buf().len();
    let mut geom = Vec::with_capacity(capacity);
    geom.extend_from_slice(&GPKG_MAGIC);
    geom.push(0x00); // version
    geom.push(flags);
    geom.extend_from_slice(&srs_id.to_le_bytes());
    for value in envelope_values {
        geom.extend_from_slice(&value.to_le_bytes());
    }
    geom.extend_from_slice(wkb.buf());

    Ok(geom)
}

#[cfg(test)]
mod tests {
    use super::{
        GpkgGeometryDecoder, gpkg_geometry_envelope, gpkg_geometry_to_wkb, wkb_to_gpkg_geometry,
    };
    use crate::Result;
    use crate::error::GpkgError;
    use crate::index::{Envelope, GeometryDecoder};
    use geo_traits::GeometryTrait;
    use geo_types::{LineString, Point};
    use std::str::FromStr;
    use wkb::reader::Wkb;

    fn blob<G: GeometryTrait<T = f64>>(geometry: G) -> Result<Vec<u8>> {
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, &geometry, &Default::default())?;
        wkb_to_gpkg_geometry(Wkb::try_new(&wkb)?, 4326)
    }

    #[test]
    fn gpkg_geometry_roundtrip() -> Result<()> {
        let point = Point::new(3.0, -1.0);
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, &point, &Default::default())?;
        let wkb = Wkb::try_new(&wkb)?;
        let expected = wkb.buf().to_vec();
        let gpkg_blob = wkb_to_gpkg_geometry(wkb, 4326)?;

        let recovered = gpkg_geometry_to_wkb(&gpkg_blob)?;
        assert_eq!(recovered.buf(), expected.as_slice());
        Ok(())
    }

    #[test]
    fn gpkg_geometry_rejects_invalid_flags() {
        let mut blob = vec![0x47, 0x50, 0x00, 0x0A, 0, 0, 0, 0];
        blob.extend_from_slice(&[0; 16]);
        let result = gpkg_geometry_to_wkb(&blob);
        assert!(matches!(
            result,
            Err(GpkgError::InvalidGpkgGeometryFlags(_))
        ));
    }

    #[test]
    fn gpkg_geometry_rejects_truncated_blobs() {
        assert!(matches!(
            gpkg_geometry_envelope(&[0x47, 0x50, 0x00]),
            Err(GpkgError::InvalidGpkgGeometryLength { len: 3, minimum: 8 })
        ));
        // declares an xy envelope but carries no envelope bytes
        assert!(matches!(
            gpkg_geometry_envelope(&[0x47, 0x50, 0x00, 0x03, 0, 0, 0, 0]),
            Err(GpkgError::InvalidGpkgGeometryEnvelope { len: 8, required: 40 })
        ));
        assert!(gpkg_geometry_envelope(&[0x00, 0x00, 0x00, 0x01, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn line_blobs_carry_header_envelope() -> Result<()> {
        let line = LineString::from(vec![(0.0, 3.0), (2.0, -1.0)]);
        let blob = blob(line)?;
        assert_eq!(blob[3] & 0b0000_1110, 0b0000_0010);
        assert_eq!(
            gpkg_geometry_envelope(&blob)?,
            Some(Envelope::new(0.0, 2.0, -1.0, 3.0))
        );
        Ok(())
    }

    #[test]
    fn zm_blobs_carry_zm_header_envelope() -> Result<()> {
        let polygon = wkt::Wkt::<f64>::from_str(
            "POLYGON ZM ((0 0 1 10, 2 0 2 11, 2 2 3 12, 0 0 1 10))",
        )
        .map_err(|err| GpkgError::Message(err.to_string()))?;
        let blob = blob(polygon)?;
        assert_eq!(blob[3] & 0b0000_1110, 0b0000_1000);
        assert_eq!(
            gpkg_geometry_envelope(&blob)?,
            Some(
                Envelope::new(0.0, 2.0, 0.0, 2.0)
                    .with_z(1.0, 3.0)
                    .with_m(10.0, 12.0)
            )
        );
        Ok(())
    }

    #[test]
    fn empty_geometry_sets_empty_flag() -> Result<()> {
        let line: LineString<f64> = LineString::new(Vec::new());
        let blob = blob(line)?;
        assert_ne!(blob[3] & 0b0001_0000, 0);
        assert_eq!(GpkgGeometryDecoder.envelope(&blob)?, None);
        Ok(())
    }

    #[test]
    fn decoder_scans_wkb_without_header_envelope() -> Result<()> {
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(
            &mut wkb,
            &LineString::from(vec![(1.0, 1.0), (4.0, -2.0)]),
            &Default::default(),
        )?;
        // header without envelope, as written by other tools
        let mut blob = vec![0x47, 0x50, 0x00, 0x01];
        blob.extend_from_slice(&4326u32.to_le_bytes());
        blob.extend_from_slice(&wkb);

        assert_eq!(
            GpkgGeometryDecoder.envelope(&blob)?,
            Some(Envelope::new(1.0, 4.0, -2.0, 1.0))
        );
        Ok(())
    }

    #[test]
    fn big_endian_header_envelope() -> Result<()> {
        let mut wkb = Vec::new();
        wkb::writer::write_geometry(&mut wkb, &Point::new(0.0, 0.0), &Default::default())?;
        let mut blob = vec![0x47, 0x50, 0x00, 0b0000_0010];
        blob.extend_from_slice(&4326u32.to_be_bytes());
        for value in [-1.0f64, 1.0, -2.0, 2.0] {
            blob.extend_from_slice(&value.to_be_bytes());
        }
        blob.extend_from_slice(&wkb);

        assert_eq!(
            gpkg_geometry_envelope(&blob)?,
            Some(Envelope::new(-1.0, 1.0, -2.0, 2.0))
        );
        Ok(())
    }
}
