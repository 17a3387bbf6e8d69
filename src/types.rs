#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColumnType {
    Boolean,
    Varchar,
    Double,
    Integer,
    Geometry,
}

/// Name and type of a non-geometry, non-primary-key layer column.
#[derive(Clone, Debug)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Clone, Debug)]
pub(crate) struct ColumnSpecs {
    pub primary_key: String,
    pub other_columns: Vec<ColumnSpec>,
}
