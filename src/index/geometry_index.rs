use super::Envelope;
use super::query::IndexFilter;
use crate::error::Result;
use crate::ogc_sql::{
    GEOMETRY_INDEX_COLUMNS, SQL_DELETE_ALL_GEOMETRY_INDEXES, SQL_DELETE_GEOMETRY_INDEX,
    SQL_DELETE_GEOMETRY_INDEX_TABLE, SQL_GEOMETRY_INDEX_BOUNDS, SQL_NGA_GEOMETRY_INDEX,
    SQL_UPSERT_GEOMETRY_INDEX, table_exists,
};
use rusqlite::types::Value;
use rusqlite::{Connection, Row, params, params_from_iter};

const NGA_GEOMETRY_INDEX: &str = "nga_geometry_index";

/// Identifies one indexed feature row.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryIndexKey {
    pub table_name: String,
    pub feature_id: i64,
}

/// The stored envelope of one feature row.
#[derive(Clone, Debug, PartialEq)]
pub struct GeometryIndex {
    pub table_name: String,
    pub feature_id: i64,
    pub envelope: Envelope,
}

impl GeometryIndex {
    pub fn new(table_name: impl Into<String>, feature_id: i64, envelope: Envelope) -> Self {
        Self {
            table_name: table_name.into(),
            feature_id,
            envelope,
        }
    }

    pub fn key(&self) -> GeometryIndexKey {
        GeometryIndexKey {
            table_name: self.table_name.clone(),
            feature_id: self.feature_id,
        }
    }
}

fn row_to_geometry_index(row: &Row<'_>) -> rusqlite::Result<GeometryIndex> {
    Ok(GeometryIndex {
        table_name: row.get(0)?,
        feature_id: row.get(1)?,
        envelope: Envelope {
            min_x: row.get(2)?,
            max_x: row.get(3)?,
            min_y: row.get(4)?,
            max_y: row.get(5)?,
            min_z: row.get(6)?,
            max_z: row.get(7)?,
            min_m: row.get(8)?,
            max_m: row.get(9)?,
        },
    })
}

/// Persistent `(table_name, feature_id) -> envelope` records in
/// `nga_geometry_index`.
///
/// Reads and deletes against a package where the table was never created
/// behave as if it were empty.
#[derive(Clone, Copy, Debug)]
pub struct GeometryIndexStore<'a> {
    conn: &'a Connection,
}

impl<'a> GeometryIndexStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(table_exists(self.conn, NGA_GEOMETRY_INDEX)?)
    }

    /// Create the backing table. Returns `true` if it did not exist before.
    pub fn create_if_missing(&self) -> Result<bool> {
        if self.exists()? {
            return Ok(false);
        }
        self.conn.execute_batch(SQL_NGA_GEOMETRY_INDEX)?;
        Ok(true)
    }

    /// Insert or replace the entry for `(table_name, feature_id)`.
    pub fn upsert(&self, entry: &GeometryIndex) -> Result<()> {
        entry.envelope.validate()?;
        let e = &entry.envelope;
        self.conn.prepare_cached(SQL_UPSERT_GEOMETRY_INDEX)?.execute(params![
            entry.table_name,
            entry.feature_id,
            e.min_x,
            e.max_x,
            e.min_y,
            e.max_y,
            e.min_z,
            e.max_z,
            e.min_m,
            e.max_m
        ])?;
        Ok(())
    }

    pub fn get(&self, table_name: &str, feature_id: i64) -> Result<Option<GeometryIndex>> {
        if !self.exists()? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT {GEOMETRY_INDEX_COLUMNS} FROM nga_geometry_index WHERE table_name = ?1 AND geom_id = ?2"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let mut rows = stmt.query_map(params![table_name, feature_id], row_to_geometry_index)?;
        Ok(rows.next().transpose()?)
    }

    /// Remove the entry of one feature. Returns the number of removed rows.
    pub fn delete_one(&self, table_name: &str, feature_id: i64) -> Result<u64> {
        if !self.exists()? {
            return Ok(0);
        }
        let deleted = self
            .conn
            .prepare_cached(SQL_DELETE_GEOMETRY_INDEX)?
            .execute(params![table_name, feature_id])?;
        Ok(deleted as u64)
    }

    /// Remove every entry of a table.
    pub fn delete_table(&self, table_name: &str) -> Result<u64> {
        if !self.exists()? {
            return Ok(0);
        }
        let deleted = self
            .conn
            .execute(SQL_DELETE_GEOMETRY_INDEX_TABLE, [table_name])?;
        Ok(deleted as u64)
    }

    /// Remove every entry of every table.
    pub fn delete_all(&self) -> Result<u64> {
        if !self.exists()? {
            return Ok(0);
        }
        let deleted = self.conn.execute(SQL_DELETE_ALL_GEOMETRY_INDEXES, [])?;
        Ok(deleted as u64)
    }

    /// Lazily iterate the entries of a table, optionally only those
    /// intersecting `envelope`, in `feature_id` order.
    ///
    /// Entries are fetched `chunk_limit` at a time. No cursor stays open
    /// between pages, and the prepared statement is finalized when the
    /// iterator is exhausted or dropped.
    pub fn query(
        &self,
        table_name: &str,
        envelope: Option<&Envelope>,
        chunk_limit: u32,
    ) -> Result<GeometryIndexIter<'a>> {
        let chunk_limit = chunk_limit.max(1);
        let filter = IndexFilter::new(table_name, envelope);
        let stmt = if self.exists()? {
            Some(self.conn.prepare(&filter.page_sql(chunk_limit))?)
        } else {
            None
        };
        let mut params = filter.params().to_vec();
        params.extend([Value::Null, Value::Null]);

        Ok(GeometryIndexIter {
            end_or_invalid_state: stmt.is_none(),
            stmt,
            params,
            buffer: Vec::new().into_iter(),
            chunk_limit,
        })
    }

    /// Count the entries [`GeometryIndexStore::query`] would yield.
    pub fn count(&self, table_name: &str, envelope: Option<&Envelope>) -> Result<u64> {
        if !self.exists()? {
            return Ok(0);
        }
        let filter = IndexFilter::new(table_name, envelope);
        let count: i64 = self.conn.prepare_cached(&filter.count_sql())?.query_row(
            params_from_iter(filter.params()),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// The union of all envelopes of a table, `None` if it has no entries.
    ///
    /// The Z (M) range is included only when every entry carries one.
    pub fn bounds(&self, table_name: &str) -> Result<Option<Envelope>> {
        if !self.exists()? {
            return Ok(None);
        }
        self.conn
            .prepare_cached(SQL_GEOMETRY_INDEX_BOUNDS)?
            .query_row([table_name], |row| {
                let count: i64 = row.get(8)?;
                if count == 0 {
                    return Ok(None);
                }
                let mut envelope = Envelope::new(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?);
                if row.get::<_, i64>(9)? == count {
                    envelope = envelope.with_z(row.get(4)?, row.get(5)?);
                }
                if row.get::<_, i64>(10)? == count {
                    envelope = envelope.with_m(row.get(6)?, row.get(7)?);
                }
                Ok(Some(envelope))
            })
            .map_err(Into::into)
    }
}

/// Lazy sequence of [`GeometryIndex`] entries returned by queries.
///
/// Each call to `next()` yields one entry, fetching the next page when the
/// buffered one runs out. Dropping the iterator early releases the statement.
pub struct GeometryIndexIter<'a> {
    stmt: Option<rusqlite::Statement<'a>>,
    // filter parameters followed by the last geom_id already returned, twice
    params: Vec<Value>,
    buffer: std::vec::IntoIter<GeometryIndex>,
    chunk_limit: u32,
    end_or_invalid_state: bool,
}

impl GeometryIndexIter<'_> {
    fn fetch_page(&mut self) -> Result<Vec<GeometryIndex>> {
        let Some(stmt) = self.stmt.as_mut() else {
            return Ok(Vec::new());
        };
        let page = stmt
            .query_map(params_from_iter(self.params.iter()), row_to_geometry_index)?
            .collect::<rusqlite::Result<Vec<GeometryIndex>>>()?;
        Ok(page)
    }
}

impl Iterator for GeometryIndexIter<'_> {
    type Item = Result<GeometryIndex>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(entry) = self.buffer.next() {
            return Some(Ok(entry));
        }
        if self.end_or_invalid_state {
            return None;
        }

        let page = match self.fetch_page() {
            Ok(page) => page,
            Err(e) => {
                self.end_or_invalid_state = true;
                self.stmt = None;
                return Some(Err(e));
            }
        };

        // A short page means there is nothing after it.
        if page.len() < self.chunk_limit as usize {
            self.end_or_invalid_state = true;
            self.stmt = None;
        }

        let last = page.last()?;
        let cursor_start = self.params.len().saturating_sub(2);
        for cursor in &mut self.params[cursor_start..] {
            *cursor = Value::Integer(last.feature_id);
        }
        self.buffer = page.into_iter();
        self.buffer.next().map(Ok)
    }
}
