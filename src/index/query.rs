use super::Envelope;
use crate::ogc_sql::GEOMETRY_INDEX_COLUMNS;
use rusqlite::types::Value;

/// `WHERE` clause and parameters selecting the index entries of one table,
/// optionally restricted to those overlapping an envelope.
///
/// The SQL mirrors [`Envelope::intersects`]: Z and M only constrain entries
/// that carry the range themselves.
#[derive(Clone, Debug)]
pub(crate) struct IndexFilter {
    clause: String,
    params: Vec<Value>,
}

impl IndexFilter {
    pub(crate) fn new(table_name: &str, envelope: Option<&Envelope>) -> Self {
        let mut clause = String::from("table_name = ?");
        let mut params = vec![Value::Text(table_name.to_string())];

        if let Some(envelope) = envelope {
            clause.push_str(" AND min_x <= ? AND max_x >= ? AND min_y <= ? AND max_y >= ?");
            params.extend([
                Value::Real(envelope.max_x),
                Value::Real(envelope.min_x),
                Value::Real(envelope.max_y),
                Value::Real(envelope.min_y),
            ]);
            if let Some((min_z, max_z)) = envelope.z_range() {
                clause.push_str(
                    " AND (min_z IS NULL OR max_z IS NULL OR (min_z <= ? AND max_z >= ?))",
                );
                params.extend([Value::Real(max_z), Value::Real(min_z)]);
            }
            if let Some((min_m, max_m)) = envelope.m_range() {
                clause.push_str(
                    " AND (min_m IS NULL OR max_m IS NULL OR (min_m <= ? AND max_m >= ?))",
                );
                params.extend([Value::Real(max_m), Value::Real(min_m)]);
            }
        }

        Self { clause, params }
    }

    pub(crate) fn params(&self) -> &[Value] {
        &self.params
    }

    pub(crate) fn count_sql(&self) -> String {
        format!("SELECT COUNT(*) FROM nga_geometry_index WHERE {}", self.clause)
    }

    /// Keyset-paginated select: two extra trailing parameters both hold the
    /// last `geom_id` already returned, or `NULL` for the first page.
    pub(crate) fn page_sql(&self, limit: u32) -> String {
        format!(
            "SELECT {GEOMETRY_INDEX_COLUMNS} FROM nga_geometry_index \
             WHERE {} AND (? IS NULL OR geom_id > ?) ORDER BY geom_id LIMIT {limit}",
            self.clause
        )
    }

    /// Sub-select of matching feature ids, for joining with the feature table.
    pub(crate) fn feature_ids_sql(&self) -> String {
        format!("SELECT geom_id FROM nga_geometry_index WHERE {}", self.clause)
    }
}
