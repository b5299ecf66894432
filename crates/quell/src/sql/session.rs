//! Thin wrapper over a SQLite connection that materializes rows as records.

use rusqlite::Connection;

use quell_ast::error::Result;
use quell_ast::value::{Record, Value};

pub struct Session {
    connection: Connection,
}

impl Session {
    pub fn new(connection: Connection) -> Self {
        Session { connection }
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Session::new(Connection::open_in_memory()?))
    }

    /// Run DDL / fixture statements.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.connection.execute_batch(sql)?;
        Ok(())
    }

    /// Execute a SELECT and materialize every row as a [Value::Record] keyed
    /// by column name.
    pub fn query(&self, sql: &str) -> Result<Vec<Value>> {
        log::debug!(
            "executing\n{}",
            sqlformat::format(
                sql,
                &sqlformat::QueryParams::default(),
                sqlformat::FormatOptions::default(),
            )
        );

        let mut statement = self.connection.prepare(sql)?;
        let names: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect();

        let mut rows = statement.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = Record::new();
            for (index, name) in names.iter().enumerate() {
                record.insert(name.clone(), translate_value(row.get_ref(index)?));
            }
            records.push(Value::Record(record));
        }
        Ok(records)
    }

    /// Execute a SELECT expected to produce a single value.
    pub fn query_scalar(&self, sql: &str) -> Result<Value> {
        log::debug!("executing {sql}");
        let value = self
            .connection
            .query_row(sql, [], |row| row.get_ref(0).map(translate_value))?;
        Ok(value)
    }
}

fn translate_value(value: rusqlite::types::ValueRef) -> Value {
    match value {
        rusqlite::types::ValueRef::Null => Value::Null,
        rusqlite::types::ValueRef::Integer(i) => Value::Integer(i),
        rusqlite::types::ValueRef::Real(f) => Value::Float(f),
        rusqlite::types::ValueRef::Text(text) => {
            Value::String(String::from_utf8_lossy(text).into_owned())
        }
        // no value-model counterpart; surfaced as a missing value
        rusqlite::types::ValueRef::Blob(_) => Value::Null,
    }
}
