use crate::conversions::{
    column_type_from_str, column_type_to_str, dimension_from_zm, dimension_to_zm,
    geometry_type_from_str, geometry_type_to_str,
};
use crate::error::{GpkgError, Result};
use crate::index::{
    ContentsStaleness, Extension, ExtensionRegistry, FeatureTableIndexer,
    GEOMETRY_INDEX_EXTENSION, TableIndexStore, Timestamp,
};
use crate::ogc_sql::{
    SQL_DELETE_EXTENSION, SQL_DELETE_EXTENSION_ALL_TABLES, SQL_DELETE_EXTENSIONS_FOR_TABLE,
    SQL_DELETE_GPKG_CONTENTS, SQL_DELETE_GPKG_GEOMETRY_COLUMNS, SQL_EXTENSION_EXISTS,
    SQL_GPKG_EXTENSIONS, SQL_INSERT_EXTENSION, SQL_INSERT_GPKG_CONTENTS,
    SQL_INSERT_GPKG_GEOMETRY_COLUMNS, SQL_LIST_LAYERS, SQL_SELECT_GEOMETRY_COLUMN_META,
    SQL_SELECT_LAST_CHANGE, initialize_gpkg, sql_create_table, sql_drop_table, sql_table_columns,
    table_exists,
};
use crate::sql_functions::register_spatial_functions;
use crate::types::{ColumnSpec, ColumnSpecs};
use rusqlite::{OpenFlags, OptionalExtension};
use std::path::Path;

use super::layer::GpkgLayer;

const GPKG_CONTENTS: &str = "gpkg_contents";
const GPKG_EXTENSIONS: &str = "gpkg_extensions";

#[derive(Debug)]
/// GeoPackage connection wrapper owning the layers and their geometry indexes.
pub struct Gpkg {
    conn: rusqlite::Connection,
    read_only: bool,
}

impl Gpkg {
    /// Open a GeoPackage in read-only mode.
    pub fn open_read_only<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = rusqlite::Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: true,
        })
    }

    /// Open a GeoPackage in read-write mode.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GpkgError::Message(format!(
                "GeoPackage file does not exist: {}",
                path.display()
            )));
        }

        let conn = rusqlite::Connection::open(path)?;
        register_spatial_functions(&conn)?;
        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a new GeoPackage
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Err(GpkgError::Message(format!(
                "GeoPackage file already exists: {}",
                path.display()
            )));
        }

        let conn = rusqlite::Connection::open(path)?;

        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;

        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Create a new GeoPackage in memory
    pub fn new_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;

        initialize_gpkg(&conn)?;
        register_spatial_functions(&conn)?;

        Ok(Self {
            conn,
            read_only: false,
        })
    }

    /// Expert-only: register a spatial reference system in gpkg_spatial_ref_sys.
    ///
    /// Layers must reference an `srs_id` that already exists in
    /// `gpkg_spatial_ref_sys`. Only WGS 84 and the two undefined systems are
    /// registered when a package is created; anything else has to be inserted
    /// here first, with a full WKT definition. No validation is performed.
    ///
    /// ```
    /// # use rusqlite_gpkg_index::Gpkg;
    /// let gpkg = Gpkg::new_in_memory()?;
    /// gpkg.register_srs(
    ///     "WGS 84 / Pseudo-Mercator",
    ///     3857,
    ///     "EPSG",
    ///     3857,
    ///     r#"PROJCS["WGS 84 / Pseudo-Mercator",AUTHORITY["EPSG","3857"]]"#,
    ///     "Web Mercator",
    /// )?;
    /// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
    /// ```
    pub fn register_srs(
        &self,
        srs_name: &str,
        srs_id: i32,
        organization: &str,
        organization_coordsys_id: i32,
        definition: &str,
        description: &str,
    ) -> Result<()> {
        self.ensure_writable()?;

        self.conn.execute(
            "INSERT INTO gpkg_spatial_ref_sys \
            (srs_name, srs_id, organization, organization_coordsys_id, definition, description) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                srs_name,
                srs_id,
                organization,
                organization_coordsys_id,
                definition,
                description
            ],
        )?;
        Ok(())
    }

    /// List the names of the feature layers.
    pub fn list_layers(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(SQL_LIST_LAYERS)?;
        let layers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(layers)
    }

    /// Load a layer definition and metadata by name.
    pub fn open_layer<'a>(&'a self, layer_name: &str) -> Result<GpkgLayer<'a>> {
        let (geometry_column, geometry_type, geometry_dimension, srs_id) =
            self.get_geometry_column_and_srs_id(layer_name)?;
        let column_specs = self.get_column_specs(layer_name)?;
        let property_columns = column_specs
            .other_columns
            .into_iter()
            .filter(|spec| spec.name != geometry_column && spec.name != column_specs.primary_key)
            .collect();

        Ok(GpkgLayer::new(
            self,
            layer_name.to_string(),
            geometry_column,
            column_specs.primary_key,
            geometry_type,
            geometry_dimension,
            srs_id,
            property_columns,
        ))
    }

    /// Create a new feature layer with an `fid` primary key.
    pub fn new_layer<'a>(
        &'a self,
        layer_name: &str,
        geometry_column: String,
        geometry_type: wkb::reader::GeometryType,
        geometry_dimension: wkb::reader::Dimension,
        srs_id: u32,
        other_column_specs: &[ColumnSpec],
    ) -> Result<GpkgLayer<'a>> {
        self.ensure_writable()?;

        if self.table_exists(layer_name)? {
            return Err(GpkgError::Message(format!(
                "Layer already exists: {layer_name}"
            )));
        }

        let srs_exists: i64 = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM gpkg_spatial_ref_sys WHERE srs_id = ?1)",
            rusqlite::params![srs_id],
            |row| row.get(0),
        )?;
        if srs_exists == 0 {
            return Err(GpkgError::Message(format!(
                "srs_id {srs_id} not found in gpkg_spatial_ref_sys"
            )));
        }

        let geometry_type_name = geometry_type_to_str(geometry_type);
        let (z, m) = dimension_to_zm(geometry_dimension);

        let mut column_defs = Vec::with_capacity(other_column_specs.len() + 2);
        column_defs.push("fid INTEGER PRIMARY KEY AUTOINCREMENT".to_string());
        column_defs.push(format!(r#""{}" BLOB"#, geometry_column));
        for spec in other_column_specs {
            let col_type = column_type_to_str(spec.column_type);
            column_defs.push(format!(r#""{}" {col_type}"#, spec.name));
        }

        let create_sql = sql_create_table(layer_name, &column_defs.join(", "));
        self.conn.execute_batch(&create_sql)?;

        self.conn.execute(
            SQL_INSERT_GPKG_CONTENTS,
            rusqlite::params![layer_name, layer_name, Timestamp::now(), srs_id],
        )?;
        self.conn.execute(
            SQL_INSERT_GPKG_GEOMETRY_COLUMNS,
            rusqlite::params![
                layer_name,
                geometry_column,
                geometry_type_name,
                srs_id,
                z,
                m
            ],
        )?;

        Ok(GpkgLayer::new(
            self,
            layer_name.to_string(),
            geometry_column,
            "fid".to_string(),
            geometry_type,
            geometry_dimension,
            srs_id,
            other_column_specs.to_vec(),
        ))
    }

    /// Delete a layer together with its metadata and geometry index.
    pub fn delete_layer(&self, layer_name: &str) -> Result<()> {
        self.ensure_writable()?;

        // Fails for anything that is not a feature layer.
        self.get_geometry_column_and_srs_id(layer_name)?;

        TableIndexStore::new(&self.conn).delete(layer_name)?;
        if self.table_exists(GPKG_EXTENSIONS)? {
            self.conn
                .execute(SQL_DELETE_EXTENSIONS_FOR_TABLE, [layer_name])?;
        }
        self.conn
            .execute(SQL_DELETE_GPKG_GEOMETRY_COLUMNS, [layer_name])?;
        self.conn.execute(SQL_DELETE_GPKG_CONTENTS, [layer_name])?;
        self.conn.execute_batch(&sql_drop_table(layer_name))?;
        Ok(())
    }

    /// An indexer for the geometry index of a feature layer.
    pub fn feature_indexer<'a>(
        &'a self,
        layer_name: &str,
    ) -> Result<FeatureTableIndexer<'a, GpkgLayer<'a>>> {
        Ok(self.feature_indexer_for(self.open_layer(layer_name)?))
    }

    /// An indexer for an already opened layer.
    pub fn feature_indexer_for<'a>(
        &'a self,
        layer: GpkgLayer<'a>,
    ) -> FeatureTableIndexer<'a, GpkgLayer<'a>> {
        FeatureTableIndexer::new(&self.conn, layer, self, self)
    }

    /// Names of the tables that have a geometry index, complete or not.
    pub fn indexed_tables(&self) -> Result<Vec<String>> {
        TableIndexStore::new(&self.conn).list()
    }

    /// Remove the geometry index of every table and every registration of
    /// the extension. Returns whether anything was removed.
    pub fn delete_all_geometry_indexes(&self) -> Result<bool> {
        self.ensure_writable()?;
        let tables = TableIndexStore::new(&self.conn).delete_all()?;
        let registrations = self.unregister_all(&GEOMETRY_INDEX_EXTENSION)?;
        tracing::debug!(tables, registrations, "all geometry indexes deleted");
        Ok(tables > 0 || registrations > 0)
    }

    /// The underlying SQLite connection.
    pub fn connection(&self) -> &rusqlite::Connection {
        &self.conn
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        Ok(table_exists(&self.conn, table_name)?)
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(GpkgError::ReadOnly);
        }
        Ok(())
    }

    /// Resolve the table columns and map SQLite types.
    pub(crate) fn get_column_specs(&self, layer_name: &str) -> Result<ColumnSpecs> {
        let query = sql_table_columns(layer_name);
        let mut stmt = self.conn.prepare(&query)?;

        let mut primary_key: Option<String> = None;
        let column_specs = stmt.query_map([], |row| {
            let name: String = row.get(0)?;
            let column_type_str: String = row.get(1)?;
            let primary_key: i32 = row.get(2)?;
            let primary_key = primary_key != 0;

            // cf. https://www.geopackage.org/spec140/index.html#_sqlite_container
            let column_type = column_type_from_str(&column_type_str).ok_or_else(|| {
                rusqlite::Error::InvalidColumnType(
                    1,
                    format!("Unexpected type {}", column_type_str),
                    rusqlite::types::Type::Text,
                )
            })?;

            Ok((name, column_type, primary_key))
        })?;

        let result: std::result::Result<Vec<(String, crate::types::ColumnType, bool)>, _> =
            column_specs.collect();
        let mut other_columns = Vec::new();
        for (name, column_type, is_primary_key) in result? {
            if is_primary_key {
                if primary_key.is_some() {
                    return Err(GpkgError::CompositePrimaryKeyUnsupported {
                        layer_name: layer_name.to_string(),
                    });
                }
                primary_key = Some(name.clone());
            }
            other_columns.push(ColumnSpec { name, column_type });
        }

        let primary_key = primary_key.ok_or_else(|| GpkgError::MissingPrimaryKeyColumn {
            layer_name: layer_name.to_string(),
        })?;

        Ok(ColumnSpecs {
            primary_key,
            other_columns,
        })
    }

    /// Resolve the geometry column metadata and SRS information for a layer.
    pub(crate) fn get_geometry_column_and_srs_id(
        &self,
        layer_name: &str,
    ) -> Result<(
        String,
        wkb::reader::GeometryType,
        wkb::reader::Dimension,
        u32,
    )> {
        let mut stmt = self.conn.prepare(SQL_SELECT_GEOMETRY_COLUMN_META)?;

        let (geometry_column, geometry_type_str, z, m, srs_id) = stmt
            .query_row([layer_name], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i8>(2)?,
                    row.get::<_, i8>(3)?,
                    row.get::<_, u32>(4)?,
                ))
            })
            .optional()?
            .ok_or_else(|| GpkgError::MissingGeometryColumn {
                layer_name: layer_name.to_string(),
            })?;

        let geometry_type = geometry_type_from_str(&geometry_type_str)?;
        let geometry_dimension = dimension_from_zm(z, m)?;

        Ok((geometry_column, geometry_type, geometry_dimension, srs_id))
    }
}

impl ContentsStaleness for Gpkg {
    fn last_modified(&self, table_name: &str) -> Result<Option<Timestamp>> {
        if !self.table_exists(GPKG_CONTENTS)? {
            return Ok(None);
        }
        let last_change = self
            .conn
            .prepare_cached(SQL_SELECT_LAST_CHANGE)?
            .query_row([table_name], |row| row.get::<_, Option<Timestamp>>(0))
            .optional()?;
        Ok(last_change.flatten())
    }
}

impl ExtensionRegistry for Gpkg {
    fn has(&self, extension: &Extension<'_>, table_name: &str, column_name: &str) -> Result<bool> {
        if !self.table_exists(GPKG_EXTENSIONS)? {
            return Ok(false);
        }
        let exists = self.conn.prepare_cached(SQL_EXTENSION_EXISTS)?.query_row(
            rusqlite::params![extension.name, table_name, column_name],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn register(
        &self,
        extension: &Extension<'_>,
        table_name: &str,
        column_name: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        if self.has(extension, table_name, column_name)? {
            return Ok(());
        }
        self.conn.execute_batch(SQL_GPKG_EXTENSIONS)?;
        self.conn.execute(
            SQL_INSERT_EXTENSION,
            rusqlite::params![
                table_name,
                column_name,
                extension.name,
                extension.definition,
                extension.scope
            ],
        )?;
        tracing::debug!(
            extension = extension.name,
            table = table_name,
            column = column_name,
            "extension registered"
        );
        Ok(())
    }

    fn unregister(&self, extension: &Extension<'_>, table_name: &str) -> Result<bool> {
        self.ensure_writable()?;
        if !self.table_exists(GPKG_EXTENSIONS)? {
            return Ok(false);
        }
        let deleted = self
            .conn
            .execute(SQL_DELETE_EXTENSION, [extension.name, table_name])?;
        Ok(deleted > 0)
    }

    fn unregister_all(&self, extension: &Extension<'_>) -> Result<usize> {
        self.ensure_writable()?;
        if !self.table_exists(GPKG_EXTENSIONS)? {
            return Ok(0);
        }
        Ok(self
            .conn
            .execute(SQL_DELETE_EXTENSION_ALL_TABLES, [extension.name])?)
    }
}
