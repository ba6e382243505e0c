//! Column decoding helpers shared by the repositories

use rusqlite::types::Type;
use rusqlite::Row;
use std::str::FromStr;

/// Read a text column and parse it with `FromStr`
pub fn parse_column<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(error)))
}

/// Read an integer column stored as a 0/1 flag
pub fn bool_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<bool> {
    Ok(row.get::<_, i64>(idx)? != 0)
}
