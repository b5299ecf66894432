//! Table and relationship metadata the relational compiler lowers against.

use std::collections::BTreeMap;

use quell_ast::error::{Error, Result};

/// A to-many relationship: the child table holds a foreign key referencing
/// the parent's primary key.
#[derive(Debug, Clone)]
pub struct Relation {
    pub table: String,
    pub foreign_key: String,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub name: String,
    pub primary_key: String,
    relations: BTreeMap<String, Relation>,
}

impl Table {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            primary_key: primary_key.into(),
            relations: BTreeMap::new(),
        }
    }

    /// Register a relationship under the field name expressions refer to it
    /// by, e.g. `has("items")`.
    pub fn with_relation(
        mut self,
        field: impl Into<String>,
        table: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relations.insert(
            field.into(),
            Relation {
                table: table.into(),
                foreign_key: foreign_key.into(),
            },
        );
        self
    }

    pub fn relation(&self, field: &str) -> Option<&Relation> {
        self.relations.get(field)
    }
}

/// The registry of tables; child tables for relationship traversal are
/// resolved here by name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: BTreeMap<String, Table>,
}

impl Schema {
    pub fn new() -> Self {
        Schema::default()
    }

    pub fn with_table(mut self, table: Table) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| {
            Error::access(name)
                .with_help("the table is not registered in the schema")
                .into()
        })
    }
}
