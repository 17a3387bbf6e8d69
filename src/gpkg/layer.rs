use crate::error::Result;
use crate::index::{FeatureRow, RowSource, Timestamp};
use crate::ogc_sql::{
    SQL_UPDATE_LAST_CHANGE, sql_count_rows, sql_delete_all, sql_delete_feature,
    sql_insert_feature, sql_select_features, sql_select_geometries,
};
use crate::types::ColumnSpec;
use geo_traits::GeometryTrait;
use rusqlite::params_from_iter;
use rusqlite::types::{Value, ValueRef};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use wkb::reader::Wkb;

use super::{Gpkg, GpkgFeature, GpkgFeatureIterator, wkb_to_gpkg_geometry};

#[derive(Debug)]
/// A GeoPackage feature layer with geometry metadata and column specs.
pub struct GpkgLayer<'a> {
    pub(super) conn: &'a Gpkg,
    pub layer_name: String,
    pub geometry_column: String,
    pub primary_key_column: String,
    pub geometry_type: wkb::reader::GeometryType,
    pub geometry_dimension: wkb::reader::Dimension,
    pub srs_id: u32,
    pub property_columns: Vec<ColumnSpec>,
    property_index_by_name: Arc<HashMap<String, usize>>,
    insert_sql: String,
    update_sql: String,
}

// When issueing the SELECT query, always place these columns first so that
// we don't need to find the positions every time.
const GEOMETRY_INDEX: usize = 0;
const PRIMARY_INDEX: usize = 1;

impl<'a> GpkgLayer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        conn: &'a Gpkg,
        layer_name: String,
        geometry_column: String,
        primary_key_column: String,
        geometry_type: wkb::reader::GeometryType,
        geometry_dimension: wkb::reader::Dimension,
        srs_id: u32,
        property_columns: Vec<ColumnSpec>,
    ) -> Self {
        let insert_sql = Self::build_insert_sql(&layer_name, &geometry_column, &property_columns);
        let update_sql = Self::build_update_sql(
            &layer_name,
            &geometry_column,
            &primary_key_column,
            &property_columns,
        );
        let property_index_by_name =
            Arc::new(Self::build_property_index_by_name(&property_columns));

        Self {
            conn,
            layer_name,
            geometry_column,
            primary_key_column,
            geometry_type,
            geometry_dimension,
            srs_id,
            property_columns,
            property_index_by_name,
            insert_sql,
            update_sql,
        }
    }

    /// Iterate over features in the layer in primary key order.
    ///
    /// ```no_run
    /// use rusqlite_gpkg_index::Gpkg;
    ///
    /// let gpkg = Gpkg::open_read_only("data/example.gpkg")?;
    /// let layer = gpkg.open_layer("points")?;
    /// for feature in layer.features()? {
    ///     let _id = feature.id();
    ///     let _geom = feature.geometry()?;
    /// }
    /// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
    /// ```
    pub fn features(&self) -> Result<GpkgFeatureIterator> {
        self.select_features(None, &[])
    }

    /// Look up one feature by primary key.
    pub fn feature(&self, id: i64) -> Result<Option<GpkgFeature>> {
        let filter = format!(r#""{}" = ?"#, self.primary_key_column);
        let mut features = self.select_features(Some(&filter), &[Value::Integer(id)])?;
        Ok(features.next())
    }

    /// Features matching a SQL condition on the layer table.
    pub(crate) fn features_where(
        &self,
        filter: &str,
        params: &[Value],
    ) -> Result<GpkgFeatureIterator> {
        self.select_features(Some(filter), params)
    }

    fn select_features(
        &self,
        filter: Option<&str>,
        params: &[Value],
    ) -> Result<GpkgFeatureIterator> {
        let columns = self.property_columns.iter().map(|spec| spec.name.as_str());

        let sql = sql_select_features(
            &self.layer_name,
            &self.geometry_column,
            &self.primary_key_column,
            columns,
            filter,
        );
        let mut stmt = self.conn.connection().prepare(&sql)?;
        let features = stmt
            .query_map(params_from_iter(params), |row| {
                let geometry = match row.get_ref(GEOMETRY_INDEX)? {
                    ValueRef::Blob(bytes) => Some(bytes.to_vec()),
                    ValueRef::Null => None,
                    other => {
                        return Err(rusqlite::Error::InvalidColumnType(
                            GEOMETRY_INDEX,
                            self.geometry_column.clone(),
                            other.data_type(),
                        ));
                    }
                };
                let id = match row.get_ref(PRIMARY_INDEX)? {
                    ValueRef::Integer(id) => id,
                    other => {
                        return Err(rusqlite::Error::InvalidColumnType(
                            PRIMARY_INDEX,
                            self.primary_key_column.clone(),
                            other.data_type(),
                        ));
                    }
                };
                let properties = (0..self.property_columns.len())
                    .map(|idx| row.get::<_, Value>(idx + 2))
                    .collect::<rusqlite::Result<Vec<Value>>>()?;

                Ok(GpkgFeature {
                    id,
                    geometry,
                    properties,
                    property_index_by_name: Arc::clone(&self.property_index_by_name),
                })
            })?
            .collect::<std::result::Result<Vec<GpkgFeature>, _>>()?;

        Ok(GpkgFeatureIterator {
            features: features.into_iter(),
        })
    }

    /// Remove all rows from the layer.
    ///
    /// ```no_run
    /// use rusqlite_gpkg_index::Gpkg;
    ///
    /// let gpkg = Gpkg::open("data/example.gpkg")?;
    /// let layer = gpkg.open_layer("points")?;
    /// layer.truncate()?;
    /// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
    /// ```
    pub fn truncate(&self) -> Result<usize> {
        self.ensure_writable()?;
        let sql = sql_delete_all(&self.layer_name);
        let deleted = self.conn.connection().execute(&sql, [])?;
        self.touch()?;
        Ok(deleted)
    }

    /// Remove one feature by primary key. Returns the number of removed rows.
    pub fn delete(&self, id: i64) -> Result<usize> {
        self.ensure_writable()?;
        let sql = sql_delete_feature(&self.layer_name, &self.primary_key_column);
        let deleted = self.conn.connection().execute(&sql, [id])?;
        self.touch()?;
        Ok(deleted)
    }

    /// Insert a feature with geometry and ordered property values. Returns the
    /// primary key of the new row.
    ///
    /// ```no_run
    /// use geo_types::Point;
    /// use rusqlite_gpkg_index::{Gpkg, Value};
    ///
    /// let gpkg = Gpkg::open("data/example.gpkg")?;
    /// let layer = gpkg.open_layer("points")?;
    ///
    /// let properties = vec![Value::Text("alpha".to_string()), Value::Integer(1)];
    /// let id = layer.insert(Point::new(1.0, 2.0), properties)?;
    /// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
    /// ```
    pub fn insert<G, P>(&self, geometry: G, properties: P) -> Result<i64>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        let geom = self.geom_from_geometry(geometry)?;

        let params = std::iter::once(Value::Blob(geom)).chain(properties);

        let mut stmt = self.conn.connection().prepare_cached(&self.insert_sql)?;
        stmt.execute(params_from_iter(params))?;
        let id = self.conn.connection().last_insert_rowid();
        self.touch()?;
        Ok(id)
    }

    /// Update the feature with geometry and ordered property values.
    ///
    /// ```no_run
    /// use geo_types::Point;
    /// use rusqlite_gpkg_index::{Gpkg, Value};
    ///
    /// let gpkg = Gpkg::open("data/example.gpkg")?;
    /// let layer = gpkg.open_layer("points")?;
    /// layer.update(Point::new(3.0, 4.0), vec![Value::from("beta".to_string()), Value::from(false)], 1)?;
    /// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
    /// ```
    pub fn update<G, P>(&self, geometry: G, properties: P, id: i64) -> Result<()>
    where
        G: GeometryTrait<T = f64>,
        P: IntoIterator<Item = Value>,
    {
        let geom = self.geom_from_geometry(geometry)?;

        let params = std::iter::once(Value::Blob(geom))
            .chain(properties)
            .chain(std::iter::once(Value::Integer(id)));

        let mut stmt = self.conn.connection().prepare_cached(&self.update_sql)?;
        stmt.execute(params_from_iter(params))?;
        self.touch()?;
        Ok(())
    }

    // Record the content change in gpkg_contents so that geometry indexes built
    // before it read as stale.
    fn touch(&self) -> Result<()> {
        self.conn.connection().execute(
            SQL_UPDATE_LAST_CHANGE,
            rusqlite::params![self.layer_name, Timestamp::now()],
        )?;
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.conn.ensure_writable()
    }

    fn build_insert_sql(
        layer_name: &str,
        geometry_column: &str,
        property_columns: &[ColumnSpec],
    ) -> String {
        let mut columns = Vec::with_capacity(property_columns.len() + 1);
        columns.push(format!(r#""{}""#, geometry_column));
        columns.extend(
            property_columns
                .iter()
                .map(|spec| format!(r#""{}""#, spec.name)),
        );

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<String>>()
            .join(",");

        sql_insert_feature(layer_name, &columns.join(","), &placeholders)
    }

    fn build_update_sql(
        layer_name: &str,
        geometry_column: &str,
        primary_key_column: &str,
        property_columns: &[ColumnSpec],
    ) -> String {
        let mut column_names = Vec::with_capacity(property_columns.len() + 1);
        column_names.push(geometry_column);
        column_names.extend(property_columns.iter().map(|spec| spec.name.as_str()));

        let assignments = column_names
            .iter()
            .enumerate()
            .map(|(idx, name)| format!(r#""{}"=?{}"#, name, idx + 1))
            .collect::<Vec<String>>()
            .join(",");
        let id_idx = column_names.len() + 1;

        format!(
            r#"UPDATE "{}" SET {} WHERE "{}"=?{}"#,
            layer_name, assignments, primary_key_column, id_idx
        )
    }

    fn build_property_index_by_name(property_columns: &[ColumnSpec]) -> HashMap<String, usize> {
        property_columns
            .iter()
            .enumerate()
            .map(|(idx, column)| (column.name.clone(), idx))
            .collect()
    }

    fn geom_from_geometry<G>(&self, geometry: G) -> Result<Vec<u8>>
    where
        G: GeometryTrait<T = f64>,
    {
        self.ensure_writable()?;

        let mut buf = Vec::new();
        wkb::writer::write_geometry(&mut buf, &geometry, &Default::default())?;
        let wkb = Wkb::try_new(&buf)?;
        wkb_to_gpkg_geometry(wkb, self.srs_id)
    }
}

impl RowSource for GpkgLayer<'_> {
    fn table_name(&self) -> &str {
        &self.layer_name
    }

    fn geometry_column(&self) -> &str {
        &self.geometry_column
    }

    fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .connection()
            .query_row(&sql_count_rows(&self.layer_name), [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn scan(
        &self,
        visit: &mut dyn FnMut(FeatureRow<'_>) -> Result<ControlFlow<()>>,
    ) -> Result<()> {
        let sql = sql_select_geometries(
            &self.layer_name,
            &self.geometry_column,
            &self.primary_key_column,
        );
        let mut stmt = self.conn.connection().prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let feature_id: i64 = row.get(0)?;
            let geometry = match row.get_ref(1)? {
                ValueRef::Blob(bytes) => Some(bytes),
                ValueRef::Null => None,
                other => {
                    tracing::debug!(
                        table = %self.layer_name,
                        feature_id,
                        column_type = %other.data_type(),
                        "geometry column holds a non-blob value"
                    );
                    None
                }
            };
            if visit(FeatureRow {
                feature_id,
                geometry,
            })?
            .is_break()
            {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Result;
    use crate::conversions::geometry_type_to_str;
    use crate::error::GpkgError;
    use crate::gpkg::Gpkg;
    use crate::index::{ContentsStaleness, RowSource, Timestamp};
    use crate::types::{ColumnSpec, ColumnType};
    use geo_traits::GeometryTrait;
    use geo_types::{LineString, Point, Polygon};
    use rusqlite::types::Value;
    use std::ops::ControlFlow;
    use std::str::FromStr;
    use wkb::reader::{Dimension, GeometryType, Wkb};
    use wkt::Wkt;

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "name".to_string(),
                column_type: ColumnType::Varchar,
            },
            ColumnSpec {
                name: "value".to_string(),
                column_type: ColumnType::Integer,
            },
        ]
    }

    fn gpkg_blob_from_geometry<G: GeometryTrait<T = f64>>(
        geometry: G,
        srs_id: u32,
    ) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        wkb::writer::write_geometry(&mut buf, &geometry, &Default::default())?;
        let wkb = Wkb::try_new(&buf)?;
        super::super::wkb_to_gpkg_geometry(wkb, srs_id)
    }

    #[test]
    fn creates_layer_metadata() -> Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        gpkg.new_layer(
            "points",
            "geom".to_string(),
            GeometryType::Point,
            Dimension::Xyz,
            4326,
            &columns(),
        )?;

        let (geometry_type_name, srs_id, z, m): (String, u32, i8, i8) =
            gpkg.connection().query_row(
                "SELECT geometry_type_name, srs_id, z, m FROM gpkg_geometry_columns WHERE table_name = 'points'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        assert_eq!(
            geometry_type_name,
            geometry_type_to_str(GeometryType::Point)
        );
        assert_eq!(srs_id, 4326);
        assert_eq!(z, 1);
        assert_eq!(m, 0);

        let layer = gpkg.open_layer("points")?;
        assert_eq!(layer.primary_key_column, "fid");
        assert_eq!(layer.geometry_column, "geom");
        assert_eq!(layer.geometry_dimension, Dimension::Xyz);
        let names: Vec<&str> = layer
            .property_columns
            .iter()
            .map(|spec| spec.name.as_str())
            .collect();
        assert_eq!(names, vec!["name", "value"]);

        Ok(())
    }

    #[test]
    fn inserts_and_updates_by_primary_key() -> Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        let layer = gpkg.new_layer(
            "points",
            "geom".to_string(),
            GeometryType::Point,
            Dimension::Xy,
            4326,
            &columns(),
        )?;

        let id = layer.insert(
            Point::new(1.0, 2.0),
            [Value::from("alpha".to_string()), Value::from(7_i64)],
        )?;
        layer.update(
            Point::new(4.0, 5.0),
            [Value::from("beta".to_string()), Value::from(9_i64)],
            id,
        )?;

        let feature = layer.feature(id)?.ok_or("missing feature")?;
        assert_eq!(
            feature.geometry_blob(),
            Some(gpkg_blob_from_geometry(Point::new(4.0, 5.0), 4326)?.as_slice())
        );
        let name: String = feature.property("name")?;
        let value: i64 = feature.property("value")?;
        assert_eq!(name, "beta");
        assert_eq!(value, 9);

        assert!(layer.feature(id + 1)?.is_none());
        Ok(())
    }

    #[test]
    fn features_keep_null_geometries_and_properties() -> Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        let layer = gpkg.new_layer(
            "points",
            "geom".to_string(),
            GeometryType::Point,
            Dimension::Xy,
            4326,
            &columns(),
        )?;
        layer.insert(Point::new(0.0, 0.0), [Value::from("a".to_string()), Value::Null])?;
        gpkg.connection()
            .execute("INSERT INTO points (geom, name) VALUES (NULL, 'b')", [])?;

        let features = layer.features()?.collect::<Vec<_>>();
        assert_eq!(features.len(), 2);
        assert!(features[0].geometry_blob().is_some());
        assert_eq!(features[0].property::<Option<i64>>("value")?, None);
        assert!(features[1].geometry_blob().is_none());
        assert!(features[1].envelope()?.is_none());
        assert!(features[1].geometry().is_err());
        Ok(())
    }

    #[test]
    fn writes_stamp_last_change() -> Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        let layer = gpkg.new_layer(
            "points",
            "geom".to_string(),
            GeometryType::Point,
            Dimension::Xy,
            4326,
            &[],
        )?;
        let old = Timestamp::from_str("2000-01-01T00:00:00.000Z")?;
        let reset = || -> Result<()> {
            gpkg.connection().execute(
                "UPDATE gpkg_contents SET last_change = ?1 WHERE table_name = 'points'",
                [old],
            )?;
            Ok(())
        };

        reset()?;
        let id = layer.insert(Point::new(0.0, 0.0), [])?;
        assert!(gpkg.last_modified("points")? > Some(old));

        reset()?;
        layer.update(Point::new(1.0, 1.0), [], id)?;
        assert!(gpkg.last_modified("points")? > Some(old));

        reset()?;
        assert_eq!(layer.delete(id)?, 1);
        assert!(gpkg.last_modified("points")? > Some(old));

        reset()?;
        layer.truncate()?;
        assert!(gpkg.last_modified("points")? > Some(old));
        Ok(())
    }

    #[test]
    fn truncates_rows() -> Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        let layer = gpkg.new_layer(
            "points",
            "geom".to_string(),
            GeometryType::Point,
            Dimension::Xy,
            4326,
            &columns()[..1],
        )?;

        layer.insert(Point::new(0.0, 0.0), [Value::from("a".to_string())])?;
        layer.insert(Point::new(1.0, 1.0), [Value::from("b".to_string())])?;

        assert_eq!(layer.truncate()?, 2);
        assert_eq!(RowSource::count(&layer)?, 0);

        Ok(())
    }

    #[test]
    fn rejects_invalid_property_count() -> Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        let layer = gpkg.new_layer(
            "points",
            "geom".to_string(),
            GeometryType::Point,
            Dimension::Xy,
            4326,
            &columns(),
        )?;

        let result = layer.insert(Point::new(0.0, 0.0), [Value::from("only".to_string())]);
        match result {
            Err(GpkgError::Sql(rusqlite::Error::InvalidParameterCount(_, _))) => {}
            e => panic!("expected InvalidParameterCount error: {e:?}"),
        }

        Ok(())
    }

    #[test]
    fn stores_z_and_m_geometries() -> Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        let layer = gpkg.new_layer(
            "polygons_zm",
            "geom".to_string(),
            GeometryType::Polygon,
            Dimension::Xyzm,
            4326,
            &[],
        )?;
        let polygon = Wkt::<f64>::from_str("POLYGON ZM ((0 0 1 10, 2 0 2 11, 2 2 3 12, 0 0 1 10))")
            .map_err(|err| GpkgError::Message(err.to_string()))?;
        let id = layer.insert(polygon, [])?;

        let feature = layer.feature(id)?.ok_or("missing feature")?;
        let geom = feature.geometry()?;
        assert_eq!(geom.geometry_type(), GeometryType::Polygon);
        assert_eq!(geom.dimension(), Dimension::Xyzm);
        let envelope = feature.envelope()?.ok_or("missing envelope")?;
        assert_eq!(envelope.z_range(), Some((1.0, 3.0)));
        assert_eq!(envelope.m_range(), Some((10.0, 12.0)));
        Ok(())
    }

    #[test]
    fn scan_visits_rows_in_order_and_stops_on_break() -> Result<()> {
        let gpkg = Gpkg::new_in_memory()?;
        let layer = gpkg.new_layer(
            "lines",
            "geom".to_string(),
            GeometryType::LineString,
            Dimension::Xy,
            4326,
            &[],
        )?;
        layer.insert(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]), [])?;
        gpkg.connection()
            .execute("INSERT INTO lines (geom) VALUES (NULL)", [])?;
        layer.insert(
            Polygon::new(
                LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
                vec![],
            ),
            [],
        )?;
        assert_eq!(RowSource::count(&layer)?, 3);

        let mut seen = Vec::new();
        layer.scan(&mut |row| {
            seen.push((row.feature_id, row.geometry.is_some()));
            Ok(ControlFlow::Continue(()))
        })?;
        assert_eq!(seen, vec![(1, true), (2, false), (3, true)]);

        let mut visited = 0;
        layer.scan(&mut |_row| {
            visited += 1;
            Ok(ControlFlow::Break(()))
        })?;
        assert_eq!(visited, 1);

        // The cursor is released once scan returns.
        layer.truncate()?;
        Ok(())
    }

    #[test]
    fn writes_reject_read_only() -> Result<()> {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("rusqlite_gpkg_index_ro_{nanos}.gpkg"));
        {
            let gpkg = Gpkg::new(&path)?;
            gpkg.new_layer(
                "points",
                "geom".to_string(),
                GeometryType::Point,
                Dimension::Xy,
                4326,
                &[],
            )?;
        }

        let gpkg = Gpkg::open_read_only(&path)?;
        let layer = gpkg.open_layer("points")?;
        assert!(matches!(
            layer.insert(Point::new(0.0, 0.0), []),
            Err(GpkgError::ReadOnly)
        ));
        assert!(matches!(layer.delete(1), Err(GpkgError::ReadOnly)));
        assert!(matches!(layer.truncate(), Err(GpkgError::ReadOnly)));

        drop(layer);
        drop(gpkg);
        let _ = std::fs::remove_file(&path);
        Ok(())
    }
}
