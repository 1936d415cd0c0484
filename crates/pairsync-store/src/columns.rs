//! Column decoding helpers shared by the `row_to_*` mappers.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use uuid::Uuid;

use pairsync_shared::{IdentityId, ObjectHash, TopicId};

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

pub(crate) fn uuid(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let s: String = row.get(idx)?;
    Uuid::parse_str(&s).map_err(|e| conversion(idx, e))
}

pub(crate) fn identity(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<IdentityId> {
    let s: String = row.get(idx)?;
    IdentityId::from_hex(&s).map_err(|e| conversion(idx, e))
}

pub(crate) fn topic(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<TopicId> {
    let s: String = row.get(idx)?;
    TopicId::parse(&s).map_err(|e| conversion(idx, e))
}

pub(crate) fn hash(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<ObjectHash> {
    let s: String = row.get(idx)?;
    ObjectHash::from_hex(&s).map_err(|e| conversion(idx, e))
}

pub(crate) fn timestamp(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}
