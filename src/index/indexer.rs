use super::progress::NoProgress;
use super::query::IndexFilter;
use super::source::{
    ContentsStaleness, ExtensionRegistry, FeatureRow, GEOMETRY_INDEX_EXTENSION, GeometryDecoder,
    RowSource,
};
use super::{
    Envelope, GeometryIndex, GeometryIndexIter, GeometryIndexStore, IndexOptions, Progress,
    TableIndex, TableIndexStore, Timestamp,
};
use crate::error::{GpkgError, Result};
use crate::gpkg::{GpkgFeatureIterator, GpkgGeometryDecoder, GpkgLayer};
use crate::ogc_sql::table_exists;
use geo_traits::GeometryTrait;
use rusqlite::{Connection, MAIN_DB};
use std::ops::ControlFlow;

static GPKG_GEOMETRY_DECODER: GpkgGeometryDecoder = GpkgGeometryDecoder;

/// Maintains the geometry index of one feature table.
///
/// The indexer keeps `nga_geometry_index` in sync with the rows produced by
/// its [`RowSource`], and stamps `nga_table_index` when a full build
/// completes. A table is considered indexed while that stamp is not older
/// than the last content change reported by [`ContentsStaleness`].
///
/// Queries never trigger a rebuild. Call [`FeatureTableIndexer::index`] first
/// if freshness matters.
///
/// ```no_run
/// use rusqlite_gpkg_index::{Envelope, Gpkg};
///
/// let gpkg = Gpkg::open("data/example.gpkg")?;
/// let indexer = gpkg.feature_indexer("roads")?;
/// indexer.index(false)?;
/// for entry in indexer.query(Some(&Envelope::new(-10.0, 10.0, -10.0, 10.0)))? {
///     println!("{}", entry?.feature_id);
/// }
/// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
/// ```
pub struct FeatureTableIndexer<'a, R: RowSource> {
    conn: &'a Connection,
    rows: R,
    contents: &'a dyn ContentsStaleness,
    extensions: &'a dyn ExtensionRegistry,
    decoder: &'a dyn GeometryDecoder,
    options: IndexOptions,
}

impl<'a, R: RowSource> FeatureTableIndexer<'a, R> {
    /// Bind an indexer to the table `rows` iterates. Geometries are decoded as
    /// GeoPackage binary blobs unless [`FeatureTableIndexer::with_decoder`]
    /// says otherwise.
    pub fn new(
        conn: &'a Connection,
        rows: R,
        contents: &'a dyn ContentsStaleness,
        extensions: &'a dyn ExtensionRegistry,
    ) -> Self {
        Self {
            conn,
            rows,
            contents,
            extensions,
            decoder: &GPKG_GEOMETRY_DECODER,
            options: IndexOptions::default(),
        }
    }

    pub fn with_decoder(mut self, decoder: &'a dyn GeometryDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_options(mut self, options: IndexOptions) -> Self {
        self.options = options;
        self
    }

    pub fn table_name(&self) -> &str {
        self.rows.table_name()
    }

    pub fn options(&self) -> IndexOptions {
        self.options
    }

    pub fn row_source(&self) -> &R {
        &self.rows
    }

    /// Build the index unless it is already fresh. Returns the number of
    /// entries written.
    ///
    /// With `force`, the index is rebuilt even when it is fresh.
    pub fn index(&self, force: bool) -> Result<u64> {
        self.index_with_progress(force, &mut NoProgress)
    }

    /// Like [`FeatureTableIndexer::index`], reporting to `progress` and
    /// stopping early when it becomes inactive.
    ///
    /// A cancelled build keeps the entries written so far (unless
    /// [`Progress::cleanup_on_cancel`] asks otherwise) but leaves the table
    /// unstamped, so the next call rebuilds it.
    pub fn index_with_progress(&self, force: bool, progress: &mut dyn Progress) -> Result<u64> {
        let table_name = self.rows.table_name();
        if !force && self.is_indexed()? {
            tracing::debug!(table = table_name, "geometry index is up to date");
            return Ok(0);
        }

        let _span = tracing::debug_span!("rebuild_geometry_index", table = table_name).entered();
        if !table_exists(self.conn, table_name)? {
            return Err(GpkgError::MissingFeatureTable {
                table_name: table_name.to_string(),
            });
        }

        self.ensure_writable()?;
        tracing::info!(table = table_name, force, "rebuilding geometry index");
        let indexed = self.in_transaction(|| self.rebuild(progress))?;
        tracing::info!(table = table_name, indexed, "geometry index rebuilt");
        Ok(indexed)
    }

    fn rebuild(&self, progress: &mut dyn Progress) -> Result<u64> {
        let table_name = self.rows.table_name();
        self.extensions.register(
            &GEOMETRY_INDEX_EXTENSION,
            table_name,
            self.rows.geometry_column(),
        )?;

        let tables = TableIndexStore::new(self.conn);
        let geometries = GeometryIndexStore::new(self.conn);
        tables.create_if_missing()?;
        if !geometries.create_if_missing()? {
            geometries.delete_table(table_name)?;
        }
        // Unstamp first so an interrupted build reads as stale.
        tables.upsert(&TableIndex {
            table_name: table_name.to_string(),
            last_indexed: None,
        })?;

        progress.set_max(self.rows.count()?);

        let interval = self.options.progress_interval.max(1);
        let mut indexed = 0_u64;
        let mut pending = 0_u64;
        let mut cancelled = false;
        self.rows.scan(&mut |row| {
            if !progress.is_active() {
                cancelled = true;
                return Ok(ControlFlow::Break(()));
            }
            if self.index_row(&geometries, row)? {
                indexed += 1;
            }
            pending += 1;
            if pending >= interval {
                progress.add_progress(pending);
                pending = 0;
            }
            Ok(ControlFlow::Continue(()))
        })?;
        if pending > 0 {
            progress.add_progress(pending);
        }

        if cancelled {
            tracing::warn!(table = table_name, indexed, "geometry index build cancelled");
            if progress.cleanup_on_cancel() {
                geometries.delete_table(table_name)?;
            }
            return Ok(indexed);
        }

        tables.upsert(&TableIndex {
            table_name: table_name.to_string(),
            last_indexed: Some(Timestamp::now()),
        })?;
        Ok(indexed)
    }

    fn index_row(&self, geometries: &GeometryIndexStore<'_>, row: FeatureRow<'_>) -> Result<bool> {
        let Some(raw_geometry) = row.geometry else {
            return Ok(false);
        };
        let Some(envelope) = self.decode(row.feature_id, raw_geometry) else {
            return Ok(false);
        };
        geometries.upsert(&GeometryIndex::new(
            self.rows.table_name(),
            row.feature_id,
            envelope,
        ))?;
        Ok(true)
    }

    fn decode(&self, feature_id: i64, raw_geometry: &[u8]) -> Option<Envelope> {
        let decoded = self.decoder.envelope(raw_geometry).and_then(|envelope| {
            if let Some(envelope) = &envelope {
                envelope.validate()?;
            }
            Ok(envelope)
        });
        match decoded {
            Ok(Some(envelope)) => Some(envelope),
            Ok(None) => {
                tracing::debug!(
                    table = self.rows.table_name(),
                    feature_id,
                    "skipping empty geometry"
                );
                None
            }
            Err(err) => {
                tracing::debug!(
                    table = self.rows.table_name(),
                    feature_id,
                    error = %err,
                    "skipping undecodable geometry"
                );
                None
            }
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.conn.is_readonly(MAIN_DB)? {
            return Err(GpkgError::ReadOnly);
        }
        Ok(())
    }

    fn in_transaction<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        if !self.conn.is_autocommit() {
            return f();
        }
        let tx = self.conn.unchecked_transaction()?;
        let value = f()?;
        tx.commit()?;
        Ok(value)
    }

    /// Index a single feature row without touching the build stamp. Returns
    /// whether an entry was written; `NULL`, empty, and undecodable
    /// geometries are not indexed.
    pub fn index_one(&self, feature_id: i64, raw_geometry: Option<&[u8]>) -> Result<bool> {
        let Some(envelope) = raw_geometry.and_then(|raw| self.decode(feature_id, raw)) else {
            return Ok(false);
        };
        self.write_one(feature_id, envelope)?;
        Ok(true)
    }

    /// Index a single feature from an in-memory geometry.
    pub fn index_geometry<G: GeometryTrait<T = f64>>(
        &self,
        feature_id: i64,
        geometry: &G,
    ) -> Result<bool> {
        let Some(envelope) = Envelope::from_geometry(geometry) else {
            return Ok(false);
        };
        self.write_one(feature_id, envelope)?;
        Ok(true)
    }

    fn write_one(&self, feature_id: i64, envelope: Envelope) -> Result<()> {
        self.ensure_writable()?;
        let table_name = self.rows.table_name();
        self.extensions.register(
            &GEOMETRY_INDEX_EXTENSION,
            table_name,
            self.rows.geometry_column(),
        )?;
        let tables = TableIndexStore::new(self.conn);
        let geometries = GeometryIndexStore::new(self.conn);
        tables.create_if_missing()?;
        geometries.create_if_missing()?;
        tables.ensure(table_name)?;
        geometries.upsert(&GeometryIndex::new(table_name, feature_id, envelope))
    }

    /// Lazily iterate the index entries of the table, optionally only those
    /// intersecting `envelope`.
    pub fn query(&self, envelope: Option<&Envelope>) -> Result<GeometryIndexIter<'a>> {
        GeometryIndexStore::new(self.conn).query(
            self.rows.table_name(),
            envelope,
            self.options.chunk_limit,
        )
    }

    pub fn count(&self, envelope: Option<&Envelope>) -> Result<u64> {
        GeometryIndexStore::new(self.conn).count(self.rows.table_name(), envelope)
    }

    /// The union of all indexed envelopes, `None` if nothing is indexed.
    pub fn bounds(&self) -> Result<Option<Envelope>> {
        GeometryIndexStore::new(self.conn).bounds(self.rows.table_name())
    }

    /// Whether the extension is registered and the last full build is not
    /// older than the last content change.
    pub fn is_indexed(&self) -> Result<bool> {
        let table_name = self.rows.table_name();
        if !self.extensions.has(
            &GEOMETRY_INDEX_EXTENSION,
            table_name,
            self.rows.geometry_column(),
        )? {
            return Ok(false);
        }
        let Some(last_indexed) = self.last_indexed()? else {
            return Ok(false);
        };
        Ok(match self.contents.last_modified(table_name)? {
            Some(last_modified) => last_indexed >= last_modified,
            None => true,
        })
    }

    /// When the last full build completed.
    pub fn last_indexed(&self) -> Result<Option<Timestamp>> {
        let table_index = TableIndexStore::new(self.conn).get(self.rows.table_name())?;
        Ok(table_index.and_then(|table_index| table_index.last_indexed))
    }

    /// Remove the whole index of the table and its extension registration.
    /// Returns whether anything was removed.
    pub fn delete_index(&self) -> Result<bool> {
        self.ensure_writable()?;
        let table_name = self.rows.table_name();
        let deleted = TableIndexStore::new(self.conn).delete(table_name)?;
        let unregistered = self
            .extensions
            .unregister(&GEOMETRY_INDEX_EXTENSION, table_name)?;
        tracing::debug!(table = table_name, deleted, unregistered, "geometry index deleted");
        Ok(deleted || unregistered)
    }

    /// Remove the entry of one feature. Returns the number of removed entries.
    pub fn delete_index_for_feature(&self, feature_id: i64) -> Result<u64> {
        self.ensure_writable()?;
        GeometryIndexStore::new(self.conn).delete_one(self.rows.table_name(), feature_id)
    }
}

impl<'a> FeatureTableIndexer<'a, GpkgLayer<'a>> {
    /// The features whose index entry intersects `envelope`, or every indexed
    /// feature when `envelope` is `None`.
    pub fn query_features(&self, envelope: Option<&Envelope>) -> Result<GpkgFeatureIterator> {
        let layer = &self.rows;
        if !GeometryIndexStore::new(self.conn).exists()? {
            return layer.features_where("0", &[]);
        }
        let filter = IndexFilter::new(&layer.layer_name, envelope);
        let clause = format!(
            r#""{}" IN ({})"#,
            layer.primary_key_column,
            filter.feature_ids_sql()
        );
        layer.features_where(&clause, filter.params())
    }
}
