// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Composes copy sources into PostgreSQL `SELECT` statements.
//!
//! Every statement is compiled twice: once with `$n` placeholders and
//! positional parameters, suitable for inspection or for running through the
//! extended query protocol, and once with every parameter inlined as an
//! escaped literal. `COPY` accepts no bind parameters, so the latter is what
//! gets wrapped in the final command.
//!
//! Composing a [`Query`] also resolves the name of every output column, so
//! that an export can later be re-imported into identically named columns.
//! Each select item must reduce to named columns; see [`classify`].

use postgres_protocol::escape::{escape_identifier, escape_literal};

use crate::catalog::Catalog;
use crate::desc::{EntityDesc, TableRef};
use crate::query::{Expr, FromItem, Query, SelectItem, Value};
use crate::CopyError;

/// What to export.
#[derive(Debug, Clone, PartialEq)]
pub enum CopySource {
    /// Columns of a table. An empty column list selects every column.
    Table {
        table: TableRef,
        columns: Vec<String>,
    },
    Query(Query),
    /// An already complete statement, used verbatim.
    Raw(String),
}

impl From<TableRef> for CopySource {
    fn from(table: TableRef) -> CopySource {
        CopySource::Table {
            table,
            columns: Vec::new(),
        }
    }
}

impl From<Query> for CopySource {
    fn from(query: Query) -> CopySource {
        CopySource::Query(query)
    }
}

/// How a select item maps onto output columns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Classified<'a> {
    /// One output column per persisted column of the entity.
    MappedEntity(&'a EntityDesc),
    /// A single output column with the given name.
    ColumnExpression(&'a str),
    /// Cannot be reduced to named output columns.
    Unsupported,
}

/// Classifies `item` against `catalog`.
pub fn classify<'a>(item: &'a SelectItem, catalog: &'a Catalog) -> Classified<'a> {
    match item {
        SelectItem::Entity(name) => match catalog.get(name) {
            Some(desc) => Classified::MappedEntity(desc),
            None => Classified::Unsupported,
        },
        SelectItem::Expr(Expr::Column { name, .. }) => Classified::ColumnExpression(name),
        SelectItem::Expr(Expr::Label { alias, .. }) => Classified::ColumnExpression(alias),
        SelectItem::Expr(_) => Classified::Unsupported,
    }
}

/// A composed `SELECT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedStatement {
    /// The statement with `$n` placeholders.
    pub sql: String,
    /// Values for the placeholders in `sql`, in order.
    pub params: Vec<Value>,
    /// Names of the output columns, in order. Empty when the source does not
    /// determine them, as for raw statements and `SELECT *`.
    pub labels: Vec<String>,
    literal_sql: String,
}

impl ComposedStatement {
    /// The statement with every parameter inlined as an escaped literal.
    pub fn to_literal_sql(&self) -> &str {
        &self.literal_sql
    }
}

/// Composes `source` into a statement, resolving entities through `catalog`.
///
/// # Errors
///
/// - A select item that is neither an entity nor a named expression.
/// - A select item or relation naming an entity missing from `catalog`.
/// - A query without any select items, or without a relation to select from.
pub fn compose(source: &CopySource, catalog: &Catalog) -> Result<ComposedStatement, CopyError> {
    let (sql, params, labels) = compile(source, catalog, ParamMode::Placeholder)?;
    let (literal_sql, _, _) = compile(source, catalog, ParamMode::Inline)?;
    Ok(ComposedStatement {
        sql,
        params,
        labels,
        literal_sql,
    })
}

/// Renders `value` as a self-contained SQL literal.
pub(crate) fn literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".into(),
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "'NaN'::float8".into(),
        Value::Float(f) if f.is_infinite() && *f > 0.0 => "'Infinity'::float8".into(),
        Value::Float(f) if f.is_infinite() => "'-Infinity'::float8".into(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => escape_literal(s),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamMode {
    Placeholder,
    Inline,
}

fn compile(
    source: &CopySource,
    catalog: &Catalog,
    mode: ParamMode,
) -> Result<(String, Vec<Value>, Vec<String>), CopyError> {
    let mut w = SqlWriter::new(mode);
    let labels = match source {
        CopySource::Table { table, columns } => {
            w.push("SELECT ");
            if columns.is_empty() {
                w.push("*");
            } else {
                w.push_list(columns, |w, c| w.push(&escape_identifier(c)));
            }
            w.push(" FROM ");
            w.push(&table.to_string());
            columns.clone()
        }
        CopySource::Query(query) => w.query(query, catalog)?,
        CopySource::Raw(sql) => {
            w.push(sql);
            Vec::new()
        }
    };
    Ok((w.sql, w.params, labels))
}

struct SqlWriter {
    sql: String,
    params: Vec<Value>,
    mode: ParamMode,
}

impl SqlWriter {
    fn new(mode: ParamMode) -> SqlWriter {
        SqlWriter {
            sql: String::new(),
            params: Vec::new(),
            mode,
        }
    }

    fn push(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    fn push_list<T>(&mut self, items: &[T], mut f: impl FnMut(&mut SqlWriter, &T)) {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            f(self, item);
        }
    }

    fn push_value(&mut self, value: &Value) {
        match self.mode {
            ParamMode::Placeholder => {
                self.params.push(value.clone());
                let placeholder = format!("${}", self.params.len());
                self.push(&placeholder);
            }
            ParamMode::Inline => self.push(&literal(value)),
        }
    }

    fn query(&mut self, query: &Query, catalog: &Catalog) -> Result<Vec<String>, CopyError> {
        if query.items.is_empty() {
            bail_generic!("query selects no columns");
        }
        let from = match &query.from {
            Some(from) => from.clone(),
            None => match query.items.iter().find_map(|item| match item {
                SelectItem::Entity(name) => Some(name),
                SelectItem::Expr(_) => None,
            }) {
                Some(name) => FromItem::Entity {
                    name: name.clone(),
                    alias: None,
                },
                None => bail_generic!("query has no FROM item and selects no entity"),
            },
        };

        self.push("SELECT ");
        let mut labels = Vec::new();
        for item in &query.items {
            let columns: Vec<(String, String)> = match classify(item, catalog) {
                Classified::MappedEntity(desc) => {
                    let qualifier = escape_identifier(&entity_qualifier(query, &from, desc));
                    desc.persisted_columns()
                        .map(|c| {
                            let name = escape_identifier(&c.name);
                            (format!("{qualifier}.{name}"), c.name.clone())
                        })
                        .collect()
                }
                Classified::ColumnExpression(label) => {
                    let expr = match item {
                        SelectItem::Expr(Expr::Label { expr, .. }) => &**expr,
                        SelectItem::Expr(expr) => expr,
                        SelectItem::Entity(_) => unreachable!("entities never classify as columns"),
                    };
                    vec![(self.fragment(expr), label.to_string())]
                }
                Classified::Unsupported => {
                    return Err(match item {
                        SelectItem::Entity(name) => CopyError::UnknownEntity(name.clone()),
                        SelectItem::Expr(expr) => {
                            let mut w = SqlWriter::new(ParamMode::Inline);
                            w.expr(expr);
                            CopyError::UnsupportedColumn(w.sql)
                        }
                    });
                }
            };
            for (sql, label) in columns {
                if !labels.is_empty() {
                    self.push(", ");
                }
                self.push(&sql);
                self.push(" AS ");
                self.push(&escape_identifier(&label));
                labels.push(label);
            }
        }

        self.push(" FROM ");
        self.from_item(&from, catalog)?;
        for join in &query.joins {
            self.push(" ");
            self.push(join.kind.as_sql());
            self.push(" ");
            self.from_item(&join.item, catalog)?;
            self.push(" ON ");
            self.expr(&join.on);
        }
        // Selected entities that no FROM or JOIN item brings into scope are
        // cross joined, so their columns always resolve.
        let mut extra: Vec<&TableRef> = Vec::new();
        for item in &query.items {
            if let Classified::MappedEntity(desc) = classify(item, catalog) {
                if introducing_item(query, &from, desc).is_none()
                    && !extra.contains(&&desc.table)
                {
                    extra.push(&desc.table);
                }
            }
        }
        for table in extra {
            self.push(", ");
            self.push(&table.to_string());
        }
        if let Some(filter) = &query.filter {
            self.push(" WHERE ");
            self.expr(filter);
        }
        if !query.order_by.is_empty() {
            self.push(" ORDER BY ");
            self.push_list(&query.order_by, |w, o| {
                w.expr(&o.expr);
                if o.desc {
                    w.push(" DESC");
                }
            });
        }
        if let Some(limit) = query.limit {
            self.push(&format!(" LIMIT {limit}"));
        }
        Ok(labels)
    }

    /// Writes `expr` to a detached buffer, sharing this writer's parameters.
    fn fragment(&mut self, expr: &Expr) -> String {
        let start = self.sql.len();
        self.expr(expr);
        self.sql.split_off(start)
    }

    fn from_item(&mut self, item: &FromItem, catalog: &Catalog) -> Result<(), CopyError> {
        let (table, alias) = match item {
            FromItem::Table { table, alias } => (table, alias),
            FromItem::Entity { name, alias } => (&catalog.entity(name)?.table, alias),
        };
        self.push(&table.to_string());
        if let Some(alias) = alias {
            self.push(" AS ");
            self.push(&escape_identifier(alias));
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Column { relation, name } => {
                if let Some(relation) = relation {
                    self.push(&escape_identifier(relation));
                    self.push(".");
                }
                self.push(&escape_identifier(name));
            }
            Expr::Value(value) => self.push_value(value),
            Expr::Raw(sql) => self.push(sql),
            Expr::Function { name, args } => {
                if is_plain_path(name) {
                    self.push(name);
                } else {
                    self.push(&escape_identifier(name));
                }
                self.push("(");
                self.push_list(args, |w, arg| w.expr(arg));
                self.push(")");
            }
            Expr::BinaryOp { left, op, right } => {
                self.push("(");
                self.expr(left);
                self.push(" ");
                self.push(op.as_sql());
                self.push(" ");
                self.expr(right);
                self.push(")");
            }
            Expr::Not(expr) => {
                self.push("(NOT ");
                self.expr(expr);
                self.push(")");
            }
            Expr::IsNull(expr) => {
                self.push("(");
                self.expr(expr);
                self.push(" IS NULL)");
            }
            // Aliases only matter in the select list.
            Expr::Label { expr, .. } => self.expr(expr),
        }
    }
}

/// The name an entity's columns are qualified with: the alias of the relation
/// that introduces the entity's table, or the bare table name.
fn entity_qualifier(query: &Query, from: &FromItem, desc: &EntityDesc) -> String {
    introducing_item(query, from, desc)
        .and_then(|item| match item {
            FromItem::Entity { alias, .. } | FromItem::Table { alias, .. } => alias.clone(),
        })
        .unwrap_or_else(|| desc.table.name.clone())
}

/// The first FROM or JOIN item that brings `desc` into scope, by entity name
/// or by table.
fn introducing_item<'a>(
    query: &'a Query,
    from: &'a FromItem,
    desc: &EntityDesc,
) -> Option<&'a FromItem> {
    std::iter::once(from)
        .chain(query.joins.iter().map(|j| &j.item))
        .find(|item| match item {
            FromItem::Entity { name, .. } => *name == desc.name,
            FromItem::Table { table, .. } => *table == desc.table,
        })
}

/// Whether `name` is a lowercase, optionally schema-qualified identifier that
/// can be written without quoting.
fn is_plain_path(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            let mut chars = part.chars();
            matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_lowercase())
                && chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
        })
}
