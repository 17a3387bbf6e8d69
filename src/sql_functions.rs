use crate::error::Result;
use crate::gpkg::gpkg_geometry_envelope;
use crate::index::Envelope;
use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::{Type, ValueRef};
use rusqlite::{Connection, Error};

/// Register the spatial SQL helper functions in the provided connection.
///
/// `ST_MinX`, `ST_MaxX`, `ST_MinY`, `ST_MaxY`, `ST_MinZ`, `ST_MaxZ`, `ST_MinM`,
/// `ST_MaxM` and `ST_IsEmpty` all take a GeoPackage geometry blob. They return
/// `NULL` for a `NULL` geometry, and the bound functions also return `NULL`
/// for empty geometries or a missing dimension.
///
/// ```no_run
/// use rusqlite::Connection;
/// use rusqlite_gpkg_index::register_spatial_functions;
///
/// let conn = Connection::open_in_memory()?;
/// register_spatial_functions(&conn)?;
/// # Ok::<(), rusqlite_gpkg_index::GpkgError>(())
/// ```
pub fn register_spatial_functions(conn: &Connection) -> Result<()> {
    register_envelope_component(conn, "ST_MinX", |e| Some(e.min_x))?;
    register_envelope_component(conn, "ST_MaxX", |e| Some(e.max_x))?;
    register_envelope_component(conn, "ST_MinY", |e| Some(e.min_y))?;
    register_envelope_component(conn, "ST_MaxY", |e| Some(e.max_y))?;
    register_envelope_component(conn, "ST_MinZ", |e| e.min_z)?;
    register_envelope_component(conn, "ST_MaxZ", |e| e.max_z)?;
    register_envelope_component(conn, "ST_MinM", |e| e.min_m)?;
    register_envelope_component(conn, "ST_MaxM", |e| e.max_m)?;
    register_st_isempty(conn)?;
    Ok(())
}

fn register_st_isempty(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "ST_IsEmpty",
        1,
        FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let Some(envelope) = envelope_from_ctx(ctx)? else {
                return Ok(None);
            };
            Ok(Some(i64::from(envelope.is_none())))
        },
    )?;
    Ok(())
}

fn register_envelope_component<F>(conn: &Connection, name: &str, f: F) -> Result<()>
where
    F: Fn(Envelope) -> Option<f64> + Copy + Send + Sync + 'static,
{
    conn.create_scalar_function(name, 1, FunctionFlags::SQLITE_DETERMINISTIC, move |ctx| {
        let envelope = envelope_from_ctx(ctx)?.flatten();
        Ok(envelope.and_then(f))
    })?;
    Ok(())
}

// Outer None: NULL argument. Inner None: empty geometry.
fn envelope_from_ctx(ctx: &Context<'_>) -> std::result::Result<Option<Option<Envelope>>, Error> {
    match ctx.get_raw(0) {
        ValueRef::Null => Ok(None),
        ValueRef::Blob(blob) => {
            let envelope = gpkg_geometry_envelope(blob)
                .map_err(|err| Error::UserFunctionError(Box::new(err)))?;
            Ok(Some(envelope))
        }
        _ => Err(Error::InvalidFunctionParameterType(0, Type::Blob)),
    }
}
