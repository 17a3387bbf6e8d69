use crate::error::{GpkgError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SubsecRound, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use std::fmt;
use std::str::FromStr;

// cf. https://www.geopackage.org/spec140/index.html#_data_types (DATETIME)
const GPKG_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// A UTC instant with millisecond precision.
///
/// GeoPackage stores datetimes as ISO-8601 text with millisecond fractions,
/// so every `Timestamp` is truncated to milliseconds on construction. This
/// keeps an in-memory value equal to the same value after a round trip
/// through the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.trunc_subsecs(3))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(GPKG_DATETIME_FORMAT))
    }
}

impl FromStr for Timestamp {
    type Err = GpkgError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(datetime) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::from(datetime.with_timezone(&Utc)));
        }
        // SQLite's own datetime() output and other writers that drop the zone
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        {
            return Ok(Self::from(naive.and_utc()));
        }
        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| GpkgError::InvalidTimestamp(s.to_string()))?;
            return Ok(Self::from(midnight.and_utc()));
        }
        Err(GpkgError::InvalidTimestamp(s.to_string()))
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_string()))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|err: GpkgError| FromSqlError::Other(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;
    use crate::Result;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rusqlite::Connection;

    #[test]
    fn formats_in_gpkg_datetime_format() {
        let datetime = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let ts = Timestamp::from(datetime + Duration::microseconds(123_456));
        assert_eq!(ts.to_string(), "2024-03-05T07:08:09.123Z");
    }

    #[test]
    fn parses_common_datetime_variants() -> Result<()> {
        let expected = Timestamp::from(Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap());
        for text in [
            "2024-03-05T07:08:09.000Z",
            "2024-03-05T07:08:09Z",
            "2024-03-05T09:08:09+02:00",
            "2024-03-05 07:08:09",
            "2024-03-05T07:08:09",
        ] {
            assert_eq!(text.parse::<Timestamp>()?, expected, "{text}");
        }

        let date_only: Timestamp = "2024-03-05".parse()?;
        assert_eq!(
            date_only,
            Timestamp::from(Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap())
        );

        assert!("yesterday".parse::<Timestamp>().is_err());
        Ok(())
    }

    #[test]
    fn text_round_trip_preserves_ordering_at_millisecond_precision() -> Result<()> {
        let base: DateTime<Utc> = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let mut previous: Option<Timestamp> = None;
        for micros in (0..5_000).step_by(137) {
            let ts = Timestamp::from(base + Duration::microseconds(micros));
            let reloaded: Timestamp = ts.to_string().parse()?;
            assert_eq!(reloaded, ts);
            if let Some(previous) = previous {
                assert!(reloaded >= previous);
            }
            previous = Some(reloaded);
        }
        Ok(())
    }

    #[test]
    fn sqlite_strftime_matches_now_precision() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        let before = Timestamp::now();
        let stamped: Timestamp =
            conn.query_row("SELECT strftime('%Y-%m-%dT%H:%M:%fZ','now')", [], |row| {
                row.get(0)
            })?;
        let after = Timestamp::now();

        // SQLite and the process clock may disagree by a few milliseconds, but
        // both are millisecond values that parse without loss.
        assert_eq!(stamped.to_string().parse::<Timestamp>()?, stamped);
        assert!(stamped >= Timestamp::from(before.as_datetime() - Duration::seconds(1)));
        assert!(stamped <= Timestamp::from(after.as_datetime() + Duration::seconds(1)));
        Ok(())
    }

    #[test]
    fn sql_round_trip() -> Result<()> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("CREATE TABLE t (ts DATETIME)")?;
        let ts = Timestamp::now();
        conn.execute("INSERT INTO t VALUES (?1)", [ts])?;
        let loaded: Timestamp = conn.query_row("SELECT ts FROM t", [], |row| row.get(0))?;
        assert_eq!(loaded, ts);
        Ok(())
    }
}
