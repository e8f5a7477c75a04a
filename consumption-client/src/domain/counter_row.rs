use serde::ser::{Serialize, SerializeMap, Serializer};
use sqlx::{postgres::PgRow, FromRow, Row};

use super::buckets::CounterColumn;

/// Live bucket values for one socket of one load class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRow {
    pub socket_id: String,
    values: [i64; CounterColumn::COUNT],
}

impl CounterRow {
    /// A freshly provisioned row with every counter at zero.
    pub fn new(socket_id: impl Into<String>) -> Self {
        Self {
            socket_id: socket_id.into(),
            values: [0; CounterColumn::COUNT],
        }
    }

    pub fn get(&self, column: CounterColumn) -> i64 {
        self.values[column.index()]
    }

    pub fn add(&mut self, column: CounterColumn, delta: i64) {
        let slot = &mut self.values[column.index()];
        *slot = slot.saturating_add(delta);
    }

    pub fn zero(&mut self, column: CounterColumn) {
        self.values[column.index()] = 0;
    }
}

impl<'r> FromRow<'r, PgRow> for CounterRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let mut counters = CounterRow::new(row.try_get::<String, _>("socket_id")?);
        for column in CounterColumn::all() {
            counters.values[column.index()] = row.try_get::<i64, _>(column.as_str())?;
        }
        Ok(counters)
    }
}

impl Serialize for CounterRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(CounterColumn::COUNT + 1))?;
        map.serialize_entry("socket_id", &self.socket_id)?;
        for column in CounterColumn::all() {
            map.serialize_entry(column.as_str(), &self.get(column))?;
        }
        map.end()
    }
}
