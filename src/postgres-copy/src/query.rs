// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! A small query representation: enough to select entities and expressions
//! from joined relations with a filter, which is what a copy source needs.
//!
//! Nothing here renders SQL; see [`crate::compose`].

use crate::catalog::Entity;
use crate::desc::TableRef;

/// A scalar value, either bound as a parameter or inlined as a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<bool> for Value {
    fn from(v: bool) -> Value {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Value {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Value {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Value {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Value {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Value {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Value {
        v.map_or(Value::Null, Into::into)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Plus,
    Minus,
    Multiply,
    Divide,
    Like,
}

impl BinaryOperator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            BinaryOperator::Eq => "=",
            BinaryOperator::NotEq => "<>",
            BinaryOperator::Lt => "<",
            BinaryOperator::LtEq => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::GtEq => ">=",
            BinaryOperator::And => "AND",
            BinaryOperator::Or => "OR",
            BinaryOperator::Plus => "+",
            BinaryOperator::Minus => "-",
            BinaryOperator::Multiply => "*",
            BinaryOperator::Divide => "/",
            BinaryOperator::Like => "LIKE",
        }
    }
}

/// A scalar expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A column, optionally qualified by the relation (table name or alias)
    /// it belongs to.
    Column {
        relation: Option<String>,
        name: String,
    },
    Value(Value),
    /// A verbatim SQL fragment. Never escaped or inspected.
    Raw(String),
    Function {
        name: String,
        args: Vec<Expr>,
    },
    BinaryOp {
        left: Box<Expr>,
        op: BinaryOperator,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    IsNull(Box<Expr>),
    /// An expression with an explicit output name.
    Label {
        expr: Box<Expr>,
        alias: String,
    },
}

impl Expr {
    pub fn column(name: impl Into<String>) -> Expr {
        Expr::Column {
            relation: None,
            name: name.into(),
        }
    }

    pub fn qualified_column(relation: impl Into<String>, name: impl Into<String>) -> Expr {
        Expr::Column {
            relation: Some(relation.into()),
            name: name.into(),
        }
    }

    pub fn value(v: impl Into<Value>) -> Expr {
        Expr::Value(v.into())
    }

    pub fn raw(sql: impl Into<String>) -> Expr {
        Expr::Raw(sql.into())
    }

    pub fn function(name: impl Into<String>, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn label(self, alias: impl Into<String>) -> Expr {
        Expr::Label {
            expr: Box::new(self),
            alias: alias.into(),
        }
    }

    pub fn binary(self, op: BinaryOperator, right: Expr) -> Expr {
        Expr::BinaryOp {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    pub fn equals(self, right: Expr) -> Expr {
        self.binary(BinaryOperator::Eq, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        self.binary(BinaryOperator::And, right)
    }

    pub fn or(self, right: Expr) -> Expr {
        self.binary(BinaryOperator::Or, right)
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

/// One entry of a query's select list.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    /// Every persisted column of the named entity.
    Entity(String),
    Expr(Expr),
}

impl SelectItem {
    pub fn entity<T: Entity>() -> SelectItem {
        SelectItem::Entity(T::NAME.to_string())
    }
}

impl From<Expr> for SelectItem {
    fn from(expr: Expr) -> SelectItem {
        SelectItem::Expr(expr)
    }
}

/// A relation in a `FROM` or `JOIN` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    Table {
        table: TableRef,
        alias: Option<String>,
    },
    /// The table of the named entity, resolved through the catalog.
    Entity {
        name: String,
        alias: Option<String>,
    },
}

impl FromItem {
    pub fn table(table: TableRef) -> FromItem {
        FromItem::Table { table, alias: None }
    }

    pub fn entity<T: Entity>() -> FromItem {
        FromItem::Entity {
            name: T::NAME.to_string(),
            alias: None,
        }
    }

    pub fn alias(self, alias: impl Into<String>) -> FromItem {
        let alias = Some(alias.into());
        match self {
            FromItem::Table { table, .. } => FromItem::Table { table, alias },
            FromItem::Entity { name, .. } => FromItem::Entity { name, alias },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Inner => "JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub item: FromItem,
    pub on: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub expr: Expr,
    pub desc: bool,
}

/// A `SELECT` over entities and expressions.
///
/// When no `FROM` item is given, the relation of the first selected entity is
/// used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub items: Vec<SelectItem>,
    pub from: Option<FromItem>,
    pub joins: Vec<Join>,
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderBy>,
    pub limit: Option<u64>,
}

impl Query {
    pub fn new() -> Query {
        Query::default()
    }

    /// Starts a query selecting every persisted column of `T` from its table.
    pub fn entity<T: Entity>() -> Query {
        Query::new().select(SelectItem::entity::<T>())
    }

    pub fn select(mut self, item: impl Into<SelectItem>) -> Query {
        self.items.push(item.into());
        self
    }

    pub fn from(mut self, item: FromItem) -> Query {
        self.from = Some(item);
        self
    }

    pub fn join(mut self, item: FromItem, on: Expr) -> Query {
        self.joins.push(Join {
            kind: JoinKind::Inner,
            item,
            on,
        });
        self
    }

    pub fn left_join(mut self, item: FromItem, on: Expr) -> Query {
        self.joins.push(Join {
            kind: JoinKind::Left,
            item,
            on,
        });
        self
    }

    /// Adds a filter, conjoined with any existing one.
    pub fn filter(mut self, predicate: Expr) -> Query {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(predicate),
            None => predicate,
        });
        self
    }

    pub fn order_by(mut self, expr: Expr, desc: bool) -> Query {
        self.order_by.push(OrderBy { expr, desc });
        self
    }

    pub fn limit(mut self, limit: u64) -> Query {
        self.limit = Some(limit);
        self
    }
}
