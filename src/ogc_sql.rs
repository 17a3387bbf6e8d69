// cf. https://www.geopackage.org/spec140/index.html#table_definition_sql

// gpkg_contents: lists all geospatial contents in the package with identifying
// and descriptive metadata for user display and access.
pub(crate) const SQL_GPKG_CONTENTS: &str = "
CREATE TABLE gpkg_contents (
  table_name TEXT NOT NULL PRIMARY KEY,
  data_type TEXT NOT NULL,
  identifier TEXT UNIQUE,
  description TEXT DEFAULT '',
  last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now')),
  min_x DOUBLE,
  min_y DOUBLE,
  max_x DOUBLE,
  max_y DOUBLE,
  srs_id INTEGER,
  CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
";

// gpkg_extensions: declares which extensions apply to the GeoPackage, a table,
// or a column so clients can detect requirements without scanning user tables.
pub(crate) const SQL_GPKG_EXTENSIONS: &str = "
CREATE TABLE IF NOT EXISTS gpkg_extensions (
  table_name TEXT,
  column_name TEXT,
  extension_name TEXT NOT NULL,
  definition TEXT NOT NULL,
  scope TEXT NOT NULL,
  CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
);
";

// gpkg_geometry_columns: identifies geometry columns and geometry types for
// vector feature user data tables.
pub(crate) const SQL_GPKG_GEOMETRY_COLUMNS: &str = "
CREATE TABLE gpkg_geometry_columns (
  table_name TEXT NOT NULL,
  column_name TEXT NOT NULL,
  geometry_type_name TEXT NOT NULL,
  srs_id INTEGER NOT NULL,
  z TINYINT NOT NULL,
  m TINYINT NOT NULL,
  CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
  CONSTRAINT uk_gc_table_name UNIQUE (table_name),
  CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
  CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys (srs_id)
);
";

// gpkg_spatial_ref_sys: the SRS catalog referenced by gpkg_contents and
// gpkg_geometry_columns to describe spatial reference systems.
pub(crate) const SQL_GPKG_SPATIAL_REF_SYS: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
  srs_name TEXT NOT NULL,
  srs_id INTEGER PRIMARY KEY,
  organization TEXT NOT NULL,
  organization_coordsys_id INTEGER NOT NULL,
  definition  TEXT NOT NULL,
  description TEXT
);
";

pub(crate) const SQL_LIST_LAYERS: &str =
    "SELECT table_name FROM gpkg_contents WHERE data_type = 'features'";

pub(crate) const SQL_TABLE_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)";

pub(crate) const SQL_INSERT_GPKG_CONTENTS: &str = "
INSERT INTO gpkg_contents
  (table_name, data_type, identifier, description, last_change, srs_id)
VALUES
  (?1, 'features', ?2, '', ?3, ?4)
";

pub(crate) const SQL_INSERT_GPKG_GEOMETRY_COLUMNS: &str = "
INSERT INTO gpkg_geometry_columns
  (table_name, column_name, geometry_type_name, srs_id, z, m)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6)
";

pub(crate) const SQL_SELECT_GEOMETRY_COLUMN_META: &str = "
SELECT column_name, geometry_type_name, z, m, srs_id
FROM gpkg_geometry_columns
WHERE table_name = ?
";

pub(crate) const SQL_SELECT_LAST_CHANGE: &str =
    "SELECT last_change FROM gpkg_contents WHERE table_name = ?1";

pub(crate) const SQL_UPDATE_LAST_CHANGE: &str =
    "UPDATE gpkg_contents SET last_change = ?2 WHERE table_name = ?1";

pub(crate) const SQL_DELETE_GPKG_CONTENTS: &str = "DELETE FROM gpkg_contents WHERE table_name = ?1";

pub(crate) const SQL_DELETE_GPKG_GEOMETRY_COLUMNS: &str =
    "DELETE FROM gpkg_geometry_columns WHERE table_name = ?1";

// Extension registry statements. A NULL column name is matched with IS so that
// table-scoped registrations are found as well.
pub(crate) const SQL_EXTENSION_EXISTS: &str = "
SELECT EXISTS(
  SELECT 1 FROM gpkg_extensions
  WHERE extension_name = ?1 AND table_name = ?2 AND column_name IS ?3
)";

pub(crate) const SQL_INSERT_EXTENSION: &str = "
INSERT OR IGNORE INTO gpkg_extensions
  (table_name, column_name, extension_name, definition, scope)
VALUES
  (?1, ?2, ?3, ?4, ?5)
";

pub(crate) const SQL_DELETE_EXTENSION: &str =
    "DELETE FROM gpkg_extensions WHERE extension_name = ?1 AND table_name = ?2";

pub(crate) const SQL_DELETE_EXTENSION_ALL_TABLES: &str =
    "DELETE FROM gpkg_extensions WHERE extension_name = ?1";

pub(crate) const SQL_DELETE_EXTENSIONS_FOR_TABLE: &str =
    "DELETE FROM gpkg_extensions WHERE table_name = ?1";

// cf. http://ngageoint.github.io/GeoPackage/docs/extensions/geometry-index.html
//
// nga_table_index: one row per indexed feature table, stamped when a full
// index build completes.
pub(crate) const SQL_NGA_TABLE_INDEX: &str = "
CREATE TABLE IF NOT EXISTS nga_table_index (
  table_name TEXT NOT NULL PRIMARY KEY,
  last_indexed DATETIME
);
";

// nga_geometry_index: the envelope of each indexed feature row.
pub(crate) const SQL_NGA_GEOMETRY_INDEX: &str = "
CREATE TABLE IF NOT EXISTS nga_geometry_index (
  table_name TEXT NOT NULL,
  geom_id INTEGER NOT NULL,
  min_x DOUBLE NOT NULL,
  max_x DOUBLE NOT NULL,
  min_y DOUBLE NOT NULL,
  max_y DOUBLE NOT NULL,
  min_z DOUBLE,
  max_z DOUBLE,
  min_m DOUBLE,
  max_m DOUBLE,
  CONSTRAINT pk_ngi PRIMARY KEY (table_name, geom_id),
  CONSTRAINT fk_ngi_nti_tn FOREIGN KEY (table_name) REFERENCES nga_table_index(table_name)
);
";

pub(crate) const SQL_SELECT_TABLE_INDEX: &str =
    "SELECT table_name, last_indexed FROM nga_table_index WHERE table_name = ?1";

pub(crate) const SQL_LIST_TABLE_INDEXES: &str =
    "SELECT table_name FROM nga_table_index ORDER BY table_name";

pub(crate) const SQL_UPSERT_TABLE_INDEX: &str = "
INSERT INTO nga_table_index (table_name, last_indexed)
VALUES (?1, ?2)
ON CONFLICT (table_name) DO UPDATE SET last_indexed = excluded.last_indexed
";

pub(crate) const SQL_INSERT_TABLE_INDEX_IF_MISSING: &str =
    "INSERT OR IGNORE INTO nga_table_index (table_name, last_indexed) VALUES (?1, NULL)";

pub(crate) const SQL_DELETE_TABLE_INDEX: &str =
    "DELETE FROM nga_table_index WHERE table_name = ?1";

pub(crate) const SQL_DELETE_ALL_TABLE_INDEXES: &str = "DELETE FROM nga_table_index";

pub(crate) const SQL_UPSERT_GEOMETRY_INDEX: &str = "
INSERT OR REPLACE INTO nga_geometry_index
  (table_name, geom_id, min_x, max_x, min_y, max_y, min_z, max_z, min_m, max_m)
VALUES
  (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
";

pub(crate) const SQL_DELETE_GEOMETRY_INDEX: &str =
    "DELETE FROM nga_geometry_index WHERE table_name = ?1 AND geom_id = ?2";

pub(crate) const SQL_DELETE_GEOMETRY_INDEX_TABLE: &str =
    "DELETE FROM nga_geometry_index WHERE table_name = ?1";

pub(crate) const SQL_DELETE_ALL_GEOMETRY_INDEXES: &str = "DELETE FROM nga_geometry_index";

pub(crate) const SQL_GEOMETRY_INDEX_BOUNDS: &str = "
SELECT MIN(min_x), MAX(max_x), MIN(min_y), MAX(max_y),
       MIN(min_z), MAX(max_z), MIN(min_m), MAX(max_m),
       COUNT(*), COUNT(min_z), COUNT(min_m)
FROM nga_geometry_index
WHERE table_name = ?1
";

pub(crate) const GEOMETRY_INDEX_COLUMNS: &str =
    "table_name, geom_id, min_x, max_x, min_y, max_y, min_z, max_z, min_m, max_m";

pub(crate) fn sql_create_table(layer_name: &str, column_defs: &str) -> String {
    format!(r#"CREATE TABLE "{}" ({})"#, layer_name, column_defs)
}

pub(crate) fn sql_drop_table(layer_name: &str) -> String {
    format!(r#"DROP TABLE IF EXISTS "{layer_name}""#)
}

pub(crate) fn sql_table_columns(layer_name: &str) -> String {
    format!("SELECT name, type, pk FROM pragma_table_info('{layer_name}')")
}

/// Build a feature SELECT with the geometry and primary key columns first.
///
/// `filter` is appended as a `WHERE` clause when given.
pub(crate) fn sql_select_features<'a, I>(
    layer_name: &'a str,
    geometry_column: &'a str,
    primary_key_column: &'a str,
    other_columns: I,
    filter: Option<&str>,
) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let joined = other_columns
        .into_iter()
        .map(|name| format!(r#""{}""#, name))
        .collect::<Vec<String>>()
        .join(", ");

    let columns = if joined.is_empty() {
        format!(r#""{geometry_column}", "{primary_key_column}""#,)
    } else {
        format!(r#""{geometry_column}", "{primary_key_column}", {joined}"#,)
    };

    let where_clause = match filter {
        Some(filter) => format!("WHERE {filter} "),
        None => String::new(),
    };

    format!(
        r#"SELECT {columns} FROM "{layer_name}" {where_clause}ORDER BY "{primary_key_column}""#,
    )
}

pub(crate) fn sql_select_geometries(
    layer_name: &str,
    geometry_column: &str,
    primary_key_column: &str,
) -> String {
    format!(
        r#"SELECT "{primary_key_column}", "{geometry_column}" FROM "{layer_name}" ORDER BY "{primary_key_column}""#
    )
}

pub(crate) fn sql_count_rows(layer_name: &str) -> String {
    format!(r#"SELECT COUNT(*) FROM "{layer_name}""#)
}

pub(crate) fn sql_delete_all(layer_name: &str) -> String {
    format!(r#"DELETE FROM "{}""#, layer_name)
}

pub(crate) fn sql_delete_feature(layer_name: &str, primary_key_column: &str) -> String {
    format!(r#"DELETE FROM "{layer_name}" WHERE "{primary_key_column}" = ?1"#)
}

pub(crate) fn sql_insert_feature(layer_name: &str, columns: &str, values: &str) -> String {
    format!(
        r#"INSERT INTO "{}" ({}) VALUES ({})"#,
        layer_name, columns, values
    )
}

pub(crate) fn initialize_gpkg(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    // "GPKG" in ASCII, cf. https://www.geopackage.org/spec140/index.html#_file_format
    conn.pragma_update(None, "application_id", 0x47504B47)?;
    conn.pragma_update(None, "user_version", 10400)?;
    conn.execute_batch(SQL_GPKG_SPATIAL_REF_SYS)?;
    register_default_srs_ids(conn)?;
    conn.execute_batch(SQL_GPKG_CONTENTS)?;
    conn.execute_batch(SQL_GPKG_GEOMETRY_COLUMNS)?;
    conn.execute_batch(SQL_GPKG_EXTENSIONS)?;
    Ok(())
}

// gpkg_spatial_ref_sys requires the WKT of the SRS, but there is no good source
// for arbitrary codes here. Only the three mandatory entries are registered.
fn register_default_srs_ids(conn: &rusqlite::Connection) -> rusqlite::Result<()> {
    const EPSG4326_WKT: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

    let sql = "INSERT INTO gpkg_spatial_ref_sys \
            (srs_name, srs_id, organization, organization_coordsys_id, definition, description) \
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
    conn.execute(
        sql,
        rusqlite::params!["WGS 84", 4326, "EPSG", 4326, EPSG4326_WKT, "WGS 84"],
    )?;
    conn.execute(
        sql,
        rusqlite::params![
            "Undefined Cartesian SRS",
            -1,
            "NONE",
            -1,
            "undefined",
            "undefined Cartesian coordinate reference system"
        ],
    )?;
    conn.execute(
        sql,
        rusqlite::params![
            "Undefined geographic SRS",
            0,
            "NONE",
            0,
            "undefined",
            "undefined geographic coordinate reference system"
        ],
    )?;
    Ok(())
}

pub(crate) fn table_exists(conn: &rusqlite::Connection, table_name: &str) -> rusqlite::Result<bool> {
    conn.prepare_cached(SQL_TABLE_EXISTS)?
        .query_row([table_name], |row| row.get(0))
}
