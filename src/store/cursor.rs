//! Lazy, restartable query results

use crate::filter::{keyset_after, order_by, OrderKey, Selection};
use crate::uri::ResourceUri;
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::FromSql;
use rusqlite::{Connection, params_from_iter};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::VecDeque;
use std::sync::Arc;

/// One result row, keyed by the projected column names
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    fn index_of(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn value(&self, column: &str) -> Option<&Value> {
        self.index_of(column).map(|i| &self.values[i])
    }

    /// Typed column access
    pub fn get<T: FromSql>(&self, column: &str) -> Result<T> {
        let idx = self
            .index_of(column)
            .ok_or_else(|| rusqlite::Error::InvalidColumnName(column.to_string()))?;
        let value = &self.values[idx];
        T::column_result(value.as_value_ref()).map_err(|e| {
            Error::Storage(rusqlite::Error::FromSqlConversionFailure(
                idx,
                value.as_value_ref().data_type(),
                Box::new(e),
            ))
        })
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(&self.values) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Rows matching a query, fetched a page at a time.
///
/// The cursor borrows the store's connection. Each page resumes after the
/// sort position of the last row handed out, so rows written or removed
/// between pages never shift the rows still to come. It yields each
/// matching row once and then ends; [`rewind`](Cursor::rewind) starts over
/// by re-running the query, so rows changed in the meantime show their new
/// contents.
pub struct Cursor<'a> {
    conn: &'a Connection,
    select: String,
    filter: Selection,
    keys: Vec<OrderKey>,
    order: String,
    columns: Arc<[String]>,
    page_size: usize,
    last: Option<Vec<Value>>,
    buffer: VecDeque<Row>,
    exhausted: bool,
    notification_uri: ResourceUri,
}

impl<'a> Cursor<'a> {
    pub(crate) fn open(
        conn: &'a Connection,
        table: &str,
        columns: Vec<String>,
        filter: Selection,
        keys: Vec<OrderKey>,
        page_size: usize,
        notification_uri: ResourceUri,
    ) -> Result<Self> {
        // sort keys ride along after the projection
        let selected: Vec<&str> = columns
            .iter()
            .map(String::as_str)
            .chain(keys.iter().map(|k| k.column))
            .collect();
        let mut cursor = Self {
            conn,
            select: format!("SELECT {} FROM {}", selected.join(", "), table),
            filter,
            order: order_by(&keys),
            keys,
            columns: columns.into(),
            page_size: page_size.max(1),
            last: None,
            buffer: VecDeque::new(),
            exhausted: false,
            notification_uri,
        };
        // surface statement errors at query time
        cursor.fetch_page()?;
        Ok(cursor)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Identifier whose change notifications invalidate these rows
    pub fn notification_uri(&self) -> &ResourceUri {
        &self.notification_uri
    }

    /// Start again from the first row
    pub fn rewind(&mut self) -> Result<()> {
        self.last = None;
        self.buffer.clear();
        self.exhausted = false;
        self.fetch_page()
    }

    fn page_sql(&self) -> (String, Vec<Value>) {
        let mut parts = Vec::with_capacity(2);
        let mut params = Vec::new();
        if !self.filter.clause.is_empty() {
            parts.push(format!("({})", self.filter.clause));
            params.extend(self.filter.params.iter().cloned());
        }
        if let Some(last) = &self.last {
            let after = keyset_after(&self.keys, last);
            parts.push(after.clause);
            params.extend(after.params);
        }
        params.push(Value::Integer(self.page_size as i64));

        let where_sql = if parts.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", parts.join(" AND "))
        };
        let sql = format!("{}{} ORDER BY {} LIMIT ?", self.select, where_sql, self.order);
        (sql, params)
    }

    fn fetch_page(&mut self) -> Result<()> {
        let (sql, params) = self.page_sql();
        let conn = self.conn;
        let width = self.columns.len();
        let mut stmt = conn.prepare_cached(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;

        let mut fetched = 0;
        while let Some(row) = rows.next()? {
            let mut values = (0..width + self.keys.len())
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            self.last = Some(values.split_off(width));
            self.buffer.push_back(Row {
                columns: Arc::clone(&self.columns),
                values,
            });
            fetched += 1;
        }

        if fetched < self.page_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for Cursor<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
