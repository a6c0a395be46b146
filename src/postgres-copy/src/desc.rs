// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Descriptions of the tables and entities that participate in a copy.

use std::fmt;

use postgres_protocol::escape::escape_identifier;
use serde::{Deserialize, Serialize};

/// A reference to a relation, optionally qualified by its schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
}

impl TableRef {
    /// An unqualified reference, resolved against the connection's
    /// `search_path`.
    pub fn new(name: impl Into<String>) -> TableRef {
        TableRef {
            schema: None,
            name: name.into(),
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> TableRef {
        TableRef {
            schema: Some(schema.into()),
            name: name.into(),
        }
    }
}

/// Renders the reference with every component quoted as an identifier.
impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(schema) = &self.schema {
            write!(f, "{}.", escape_identifier(schema))?;
        }
        f.write_str(&escape_identifier(&self.name))
    }
}

/// Describes a single column of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDesc {
    pub name: String,
    pub nullable: bool,
    /// Whether the column is stored in the table. Generated and otherwise
    /// computed columns are not, and are skipped when an entity is expanded
    /// into output columns.
    pub persisted: bool,
}

impl ColumnDesc {
    /// A nullable, persisted column.
    pub fn new(name: impl Into<String>) -> ColumnDesc {
        ColumnDesc {
            name: name.into(),
            nullable: true,
            persisted: true,
        }
    }

    pub fn not_null(mut self) -> ColumnDesc {
        self.nullable = false;
        self
    }

    pub fn computed(mut self) -> ColumnDesc {
        self.persisted = false;
        self
    }
}

/// Describes an entity: a named type bound to a table, whose persisted
/// columns are exposed in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDesc {
    pub name: String,
    pub table: TableRef,
    pub columns: Vec<ColumnDesc>,
}

impl EntityDesc {
    pub fn new(name: impl Into<String>, table: TableRef, columns: Vec<ColumnDesc>) -> EntityDesc {
        EntityDesc {
            name: name.into(),
            table,
            columns,
        }
    }

    /// The columns that map onto output columns, in declaration order.
    pub fn persisted_columns(&self) -> impl Iterator<Item = &ColumnDesc> {
        self.columns.iter().filter(|c| c.persisted)
    }
}
