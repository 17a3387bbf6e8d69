use super::{GeometryIndexStore, Timestamp};
use crate::error::Result;
use crate::ogc_sql::{
    SQL_DELETE_ALL_TABLE_INDEXES, SQL_DELETE_TABLE_INDEX, SQL_INSERT_TABLE_INDEX_IF_MISSING,
    SQL_LIST_TABLE_INDEXES, SQL_NGA_TABLE_INDEX, SQL_SELECT_TABLE_INDEX, SQL_UPSERT_TABLE_INDEX,
    table_exists,
};
use rusqlite::{Connection, params};

const NGA_TABLE_INDEX: &str = "nga_table_index";

/// Per-table index metadata.
///
/// `last_indexed` is `None` until a full build of the table completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableIndex {
    pub table_name: String,
    pub last_indexed: Option<Timestamp>,
}

/// Persistent [`TableIndex`] records in `nga_table_index`.
#[derive(Clone, Copy, Debug)]
pub struct TableIndexStore<'a> {
    conn: &'a Connection,
}

impl<'a> TableIndexStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(table_exists(self.conn, NGA_TABLE_INDEX)?)
    }

    /// Create the backing table. Returns `true` if it did not exist before.
    pub fn create_if_missing(&self) -> Result<bool> {
        if self.exists()? {
            return Ok(false);
        }
        self.conn.execute_batch(SQL_NGA_TABLE_INDEX)?;
        Ok(true)
    }

    pub fn get(&self, table_name: &str) -> Result<Option<TableIndex>> {
        if !self.exists()? {
            return Ok(None);
        }
        let mut stmt = self.conn.prepare_cached(SQL_SELECT_TABLE_INDEX)?;
        let mut rows = stmt.query_map([table_name], |row| {
            Ok(TableIndex {
                table_name: row.get(0)?,
                last_indexed: row.get(1)?,
            })
        })?;
        Ok(rows.next().transpose()?)
    }

    pub fn upsert(&self, table_index: &TableIndex) -> Result<()> {
        self.conn
            .prepare_cached(SQL_UPSERT_TABLE_INDEX)?
            .execute(params![table_index.table_name, table_index.last_indexed])?;
        Ok(())
    }

    /// Insert an unstamped record unless one already exists.
    pub fn ensure(&self, table_name: &str) -> Result<()> {
        self.conn
            .prepare_cached(SQL_INSERT_TABLE_INDEX_IF_MISSING)?
            .execute([table_name])?;
        Ok(())
    }

    /// Remove the record of a table along with all of its geometry index
    /// entries. Returns whether a record existed.
    pub fn delete(&self, table_name: &str) -> Result<bool> {
        GeometryIndexStore::new(self.conn).delete_table(table_name)?;
        if !self.exists()? {
            return Ok(false);
        }
        let deleted = self.conn.execute(SQL_DELETE_TABLE_INDEX, [table_name])?;
        Ok(deleted > 0)
    }

    /// Remove every record and every geometry index entry. Returns the
    /// number of removed table records.
    pub fn delete_all(&self) -> Result<u64> {
        GeometryIndexStore::new(self.conn).delete_all()?;
        if !self.exists()? {
            return Ok(0);
        }
        let deleted = self.conn.execute(SQL_DELETE_ALL_TABLE_INDEXES, [])?;
        Ok(deleted as u64)
    }

    /// Names of all tables with a record, indexed or not.
    pub fn list(&self) -> Result<Vec<String>> {
        if !self.exists()? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare_cached(SQL_LIST_TABLE_INDEXES)?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::{TableIndex, TableIndexStore};
    use crate::Result;
    use crate::index::{Envelope, GeometryIndex, GeometryIndexStore, Timestamp};
    use rusqlite::Connection;
    use std::str::FromStr;

    fn stores(conn: &Connection) -> Result<(TableIndexStore<'_>, GeometryIndexStore<'_>)> {
        let tables = TableIndexStore::new(conn);
        let geometries = GeometryIndexStore::new(conn);
        assert!(tables.create_if_missing()?);
        assert!(geometries.create_if_missing()?);
        assert!(!tables.create_if_missing()?);
        Ok((tables, geometries))
    }

    #[test]
    fn upsert_and_get() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        let (tables, _) = stores(&conn)?;

        assert_eq!(tables.get("roads")?, None);
        tables.ensure("roads")?;
        assert_eq!(
            tables.get("roads")?,
            Some(TableIndex {
                table_name: "roads".to_string(),
                last_indexed: None,
            })
        );

        let stamped = TableIndex {
            table_name: "roads".to_string(),
            last_indexed: Some(Timestamp::from_str("2024-05-01T10:20:30.456Z")?),
        };
        tables.upsert(&stamped)?;
        assert_eq!(tables.get("roads")?, Some(stamped.clone()));

        // ensure() leaves an existing stamp alone
        tables.ensure("roads")?;
        assert_eq!(tables.get("roads")?, Some(stamped));
        Ok(())
    }

    #[test]
    fn reads_against_missing_table_are_empty() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        let tables = TableIndexStore::new(&conn);
        assert_eq!(tables.get("roads")?, None);
        assert!(tables.list()?.is_empty());
        assert!(!tables.delete("roads")?);
        assert_eq!(tables.delete_all()?, 0);
        Ok(())
    }

    #[test]
    fn delete_cascades_to_geometry_entries() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        let (tables, geometries) = stores(&conn)?;

        for table_name in ["rivers", "roads"] {
            tables.ensure(table_name)?;
            for id in 1..=3 {
                geometries.upsert(&GeometryIndex::new(
                    table_name,
                    id,
                    Envelope::new(0.0, 1.0, 0.0, 1.0),
                ))?;
            }
        }
        assert_eq!(tables.list()?, vec!["rivers".to_string(), "roads".to_string()]);

        assert!(tables.delete("roads")?);
        assert!(!tables.delete("roads")?);
        assert_eq!(geometries.count("roads", None)?, 0);
        assert_eq!(geometries.count("rivers", None)?, 3);

        assert_eq!(tables.delete_all()?, 1);
        assert_eq!(geometries.count("rivers", None)?, 0);
        assert!(tables.list()?.is_empty());
        Ok(())
    }
}
