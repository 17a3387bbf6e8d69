use crate::error::{GpkgError, Result};
use geo_traits::{
    CoordTrait, Dimensions, GeometryCollectionTrait, GeometryTrait, LineStringTrait, LineTrait,
    MultiLineStringTrait, MultiPointTrait, MultiPolygonTrait, PointTrait, PolygonTrait, RectTrait,
    TriangleTrait,
};

/// Axis-aligned bounds of a geometry in 2 to 4 dimensions.
///
/// X and Y are always present. The Z and M ranges are present only when the
/// source geometry carries those dimensions; a `min_*` is `Some` iff the
/// matching `max_*` is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Envelope {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub min_z: Option<f64>,
    pub max_z: Option<f64>,
    pub min_m: Option<f64>,
    pub max_m: Option<f64>,
}

impl Envelope {
    /// Create a planar envelope.
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64) -> Self {
        Self {
            min_x,
            max_x,
            min_y,
            max_y,
            min_z: None,
            max_z: None,
            min_m: None,
            max_m: None,
        }
    }

    /// Set the Z range.
    pub fn with_z(mut self, min_z: f64, max_z: f64) -> Self {
        self.min_z = Some(min_z);
        self.max_z = Some(max_z);
        self
    }

    /// Set the M range.
    pub fn with_m(mut self, min_m: f64, max_m: f64) -> Self {
        self.min_m = Some(min_m);
        self.max_m = Some(max_m);
        self
    }

    pub fn has_z(&self) -> bool {
        self.z_range().is_some()
    }

    pub fn has_m(&self) -> bool {
        self.m_range().is_some()
    }

    pub fn z_range(&self) -> Option<(f64, f64)> {
        self.min_z.zip(self.max_z)
    }

    pub fn m_range(&self) -> Option<(f64, f64)> {
        self.min_m.zip(self.max_m)
    }

    /// Compute the envelope of a geometry by scanning all of its coordinates.
    ///
    /// Returns `None` for empty geometries. The Z and M ranges are filled in
    /// only when the geometry declares that dimension.
    ///
    /// ```
    /// use geo_types::LineString;
    /// use rusqlite_gpkg_index::Envelope;
    ///
    /// let line = LineString::from(vec![(0.0, 3.0), (2.0, -1.0)]);
    /// let envelope = Envelope::from_geometry(&line).expect("non-empty");
    /// assert_eq!(envelope, Envelope::new(0.0, 2.0, -1.0, 3.0));
    /// ```
    pub fn from_geometry<G: GeometryTrait<T = f64>>(geometry: &G) -> Option<Self> {
        let (has_z, has_m) = match geometry.dim() {
            Dimensions::Xyz => (true, false),
            Dimensions::Xym => (false, true),
            Dimensions::Xyzm => (true, true),
            _ => (false, false),
        };

        let mut builder = EnvelopeBuilder::default();
        add_geometry(&mut builder, geometry);
        builder.build(has_z, has_m)
    }

    /// Whether the two envelopes share at least one point.
    ///
    /// X and Y are always compared. Z and M are compared only when both sides
    /// carry the range; an axis present on one side only does not constrain
    /// the result.
    pub fn intersects(&self, other: &Envelope) -> bool {
        overlaps((self.min_x, self.max_x), (other.min_x, other.max_x))
            && overlaps((self.min_y, self.max_y), (other.min_y, other.max_y))
            && overlaps_if_both(self.z_range(), other.z_range())
            && overlaps_if_both(self.m_range(), other.m_range())
    }

    /// Grow this envelope so that it also covers `other`.
    ///
    /// A Z or M range survives only if both envelopes have it.
    pub fn expand_to_include(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
        let z = union_range(self.z_range(), other.z_range());
        self.min_z = z.map(|(min, _)| min);
        self.max_z = z.map(|(_, max)| max);
        let m = union_range(self.m_range(), other.m_range());
        self.min_m = m.map(|(min, _)| min);
        self.max_m = m.map(|(_, max)| max);
    }

    /// Check that every present axis has `min <= max` and that no bound is NaN.
    pub fn validate(&self) -> Result<()> {
        validate_axis("x", Some((self.min_x, self.max_x)))?;
        validate_axis("y", Some((self.min_y, self.max_y)))?;
        validate_axis("z", self.z_range())?;
        validate_axis("m", self.m_range())?;
        if self.min_z.is_some() != self.max_z.is_some() {
            return Err(GpkgError::Message(
                "envelope z range must have both bounds".to_string(),
            ));
        }
        if self.min_m.is_some() != self.max_m.is_some() {
            return Err(GpkgError::Message(
                "envelope m range must have both bounds".to_string(),
            ));
        }
        Ok(())
    }
}

fn overlaps(a: (f64, f64), b: (f64, f64)) -> bool {
    a.0 <= b.1 && a.1 >= b.0
}

fn overlaps_if_both(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => overlaps(a, b),
        _ => true,
    }
}

fn union_range(a: Option<(f64, f64)>, b: Option<(f64, f64)>) -> Option<(f64, f64)> {
    let (a, b) = (a?, b?);
    Some((a.0.min(b.0), a.1.max(b.1)))
}

fn validate_axis(axis: &'static str, range: Option<(f64, f64)>) -> Result<()> {
    match range {
        Some((min, max)) if min.is_nan() || max.is_nan() || min > max => {
            Err(GpkgError::InvalidEnvelope { axis, min, max })
        }
        _ => Ok(()),
    }
}

#[derive(Default)]
struct EnvelopeBuilder {
    xy: Option<[f64; 4]>,
    z: Option<(f64, f64)>,
    m: Option<(f64, f64)>,
}

impl EnvelopeBuilder {
    fn add_coord<C: CoordTrait<T = f64>>(&mut self, coord: &C) {
        let (x, y) = coord.x_y();
        // Empty points are encoded with NaN coordinates in WKB.
        if x.is_nan() || y.is_nan() {
            return;
        }

        self.xy = Some(match self.xy {
            Some([min_x, max_x, min_y, max_y]) => {
                [min_x.min(x), max_x.max(x), min_y.min(y), max_y.max(y)]
            }
            None => [x, x, y, y],
        });

        let (z, m) = match coord.dim() {
            Dimensions::Xyz => (coord.nth(2), None),
            Dimensions::Xym => (None, coord.nth(2)),
            Dimensions::Xyzm => (coord.nth(2), coord.nth(3)),
            _ => (None, None),
        };
        extend_range(&mut self.z, z);
        extend_range(&mut self.m, m);
    }

    fn build(self, has_z: bool, has_m: bool) -> Option<Envelope> {
        let [min_x, max_x, min_y, max_y] = self.xy?;
        let mut envelope = Envelope::new(min_x, max_x, min_y, max_y);
        if let Some((min_z, max_z)) = self.z.filter(|_| has_z) {
            envelope = envelope.with_z(min_z, max_z);
        }
        if let Some((min_m, max_m)) = self.m.filter(|_| has_m) {
            envelope = envelope.with_m(min_m, max_m);
        }
        Some(envelope)
    }
}

fn extend_range(range: &mut Option<(f64, f64)>, value: Option<f64>) {
    let Some(value) = value.filter(|v| !v.is_nan()) else {
        return;
    };
    *range = Some(match *range {
        Some((min, max)) => (min.min(value), max.max(value)),
        None => (value, value),
    });
}

fn add_geometry<G: GeometryTrait<T = f64>>(builder: &mut EnvelopeBuilder, geom: &G) {
    use geo_traits::GeometryType as GeoType;

    match geom.as_type() {
        GeoType::Point(point) => {
            if let Some(coord) = point.coord() {
                builder.add_coord(&coord);
            }
        }
        GeoType::LineString(line) => add_line_string(builder, line),
        GeoType::Polygon(poly) => add_polygon(builder, poly),
        GeoType::MultiPoint(multi) => {
            for point in multi.points() {
                if let Some(coord) = point.coord() {
                    builder.add_coord(&coord);
                }
            }
        }
        GeoType::MultiLineString(multi) => {
            for line in multi.line_strings() {
                add_line_string(builder, &line);
            }
        }
        GeoType::MultiPolygon(multi) => {
            for poly in multi.polygons() {
                add_polygon(builder, &poly);
            }
        }
        GeoType::GeometryCollection(collection) => {
            for sub_geom in collection.geometries() {
                add_geometry(builder, &sub_geom);
            }
        }
        GeoType::Rect(rect) => {
            builder.add_coord(&rect.min());
            builder.add_coord(&rect.max());
        }
        GeoType::Triangle(triangle) => {
            builder.add_coord(&triangle.first());
            builder.add_coord(&triangle.second());
            builder.add_coord(&triangle.third());
        }
        GeoType::Line(line) => {
            builder.add_coord(&line.start());
            builder.add_coord(&line.end());
        }
    }
}

fn add_line_string<L: LineStringTrait<T = f64>>(builder: &mut EnvelopeBuilder, line: &L) {
    for coord in line.coords() {
        builder.add_coord(&coord);
    }
}

fn add_polygon<P: PolygonTrait<T = f64>>(builder: &mut EnvelopeBuilder, poly: &P) {
    // Interior rings lie inside the exterior ring of a valid polygon, but
    // they are scanned anyway so that invalid input still gets a covering box.
    if let Some(ring) = poly.exterior() {
        add_line_string(builder, &ring);
    }
    for ring in poly.interiors() {
        add_line_string(builder, &ring);
    }
}

#[cfg(test)]
mod tests {
    use super::Envelope;
    use crate::Result;
    use crate::error::GpkgError;
    use geo_types::{Geometry, GeometryCollection, LineString, MultiPoint, Point, Polygon};
    use std::str::FromStr;
    use wkt::Wkt;

    fn wkt(text: &str) -> Result<Wkt<f64>> {
        Wkt::from_str(text).map_err(|err| GpkgError::Message(err.to_string()))
    }

    #[test]
    fn envelope_of_point() {
        let envelope = Envelope::from_geometry(&Point::new(1.5, -2.0)).expect("envelope");
        assert_eq!(envelope, Envelope::new(1.5, 1.5, -2.0, -2.0));
        assert!(!envelope.has_z());
        assert!(!envelope.has_m());
    }

    #[test]
    fn envelope_of_polygon_and_collection() {
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 3.0), (0.0, 0.0)]),
            vec![],
        );
        let envelope = Envelope::from_geometry(&polygon).expect("envelope");
        assert_eq!(envelope, Envelope::new(0.0, 4.0, 0.0, 3.0));

        let collection = GeometryCollection::from(vec![
            Geometry::Point(Point::new(5.0, -1.0)),
            Geometry::MultiPoint(MultiPoint::from(vec![
                Point::new(-2.0, 2.0),
                Point::new(1.0, 3.0),
            ])),
        ]);
        let envelope = Envelope::from_geometry(&collection).expect("envelope");
        assert_eq!(envelope, Envelope::new(-2.0, 5.0, -1.0, 3.0));
    }

    #[test]
    fn empty_geometries_have_no_envelope() -> Result<()> {
        let line: LineString<f64> = LineString::new(Vec::new());
        assert!(Envelope::from_geometry(&line).is_none());
        assert!(Envelope::from_geometry(&wkt("POINT EMPTY")?).is_none());
        assert!(Envelope::from_geometry(&wkt("GEOMETRYCOLLECTION EMPTY")?).is_none());
        Ok(())
    }

    #[test]
    fn envelope_carries_declared_z_and_m() -> Result<()> {
        let envelope = Envelope::from_geometry(&wkt("LINESTRING Z (0 0 5, 1 2 -3)")?)
            .expect("envelope");
        assert_eq!(envelope, Envelope::new(0.0, 1.0, 0.0, 2.0).with_z(-3.0, 5.0));

        let envelope =
            Envelope::from_geometry(&wkt("LINESTRING M (0 0 5, 1 1 6)")?).expect("envelope");
        assert_eq!(envelope, Envelope::new(0.0, 1.0, 0.0, 1.0).with_m(5.0, 6.0));

        let envelope = Envelope::from_geometry(&wkt(
            "POLYGON ZM ((0 0 1 10, 2 0 2 11, 2 2 3 12, 0 0 1 10))",
        )?)
        .expect("envelope");
        assert_eq!(
            envelope,
            Envelope::new(0.0, 2.0, 0.0, 2.0)
                .with_z(1.0, 3.0)
                .with_m(10.0, 12.0)
        );
        Ok(())
    }

    #[test]
    fn intersects_is_overlap_not_containment() {
        let a = Envelope::new(0.0, 10.0, 0.0, 10.0);
        let touching = Envelope::new(10.0, 20.0, 5.0, 6.0);
        let partial = Envelope::new(5.0, 15.0, -5.0, 5.0);
        let disjoint = Envelope::new(10.5, 20.0, 0.0, 10.0);

        assert!(a.intersects(&touching));
        assert!(a.intersects(&partial));
        assert!(!a.intersects(&disjoint));
    }

    #[test]
    fn intersects_is_symmetric() {
        let bounds = [-2.0, -1.0, 0.0, 0.5, 1.0, 3.0];
        let mut envelopes = Vec::new();
        for &min in &bounds {
            for &max in bounds.iter().filter(|&&max| max >= min) {
                envelopes.push(Envelope::new(min, max, 0.0, 1.0));
                envelopes.push(Envelope::new(0.0, 1.0, min, max).with_z(min, max));
                envelopes.push(Envelope::new(min, max, min, max).with_m(min, max));
            }
        }

        for a in &envelopes {
            for b in &envelopes {
                assert_eq!(a.intersects(b), b.intersects(a), "{a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn one_sided_axes_do_not_constrain() {
        let planar = Envelope::new(0.0, 1.0, 0.0, 1.0);
        let with_z = Envelope::new(0.0, 1.0, 0.0, 1.0).with_z(100.0, 200.0);
        let other_z = Envelope::new(0.0, 1.0, 0.0, 1.0).with_z(-5.0, -1.0);

        assert!(planar.intersects(&with_z));
        assert!(with_z.intersects(&planar));
        assert!(!with_z.intersects(&other_z));

        let with_m = Envelope::new(0.0, 1.0, 0.0, 1.0).with_m(0.0, 1.0);
        assert!(with_z.intersects(&with_m));
    }

    #[test]
    fn expand_to_include_unions_shared_axes() {
        let mut envelope = Envelope::new(0.0, 1.0, 0.0, 1.0).with_z(0.0, 1.0);
        envelope.expand_to_include(&Envelope::new(-1.0, 0.5, 2.0, 3.0).with_z(5.0, 6.0));
        assert_eq!(envelope, Envelope::new(-1.0, 1.0, 0.0, 3.0).with_z(0.0, 6.0));

        envelope.expand_to_include(&Envelope::new(0.0, 0.0, 0.0, 0.0));
        assert!(!envelope.has_z());
    }

    #[test]
    fn validate_rejects_inverted_ranges() {
        assert!(Envelope::new(0.0, 1.0, 0.0, 1.0).validate().is_ok());
        assert!(matches!(
            Envelope::new(1.0, 0.0, 0.0, 1.0).validate(),
            Err(GpkgError::InvalidEnvelope { axis: "x", .. })
        ));
        assert!(matches!(
            Envelope::new(0.0, 1.0, 0.0, 1.0).with_m(2.0, 1.0).validate(),
            Err(GpkgError::InvalidEnvelope { axis: "m", .. })
        ));
        assert!(matches!(
            Envelope::new(0.0, f64::NAN, 0.0, 1.0).validate(),
            Err(GpkgError::InvalidEnvelope { axis: "x", .. })
        ));

        let mut half = Envelope::new(0.0, 1.0, 0.0, 1.0);
        half.min_z = Some(0.0);
        assert!(half.validate().is_err());
    }
}
