// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Bulk import and export of queries and tables via PostgreSQL `COPY`.
//!
//! Exporting composes a [`CopySource`] into a self-contained `SELECT`, wraps
//! it in `COPY (...) TO STDOUT` and streams the server's output into an
//! [`AsyncWrite`](tokio::io::AsyncWrite) sink. Importing wraps a target table
//! in `COPY ... FROM STDIN` and streams an
//! [`AsyncRead`](tokio::io::AsyncRead) source into it inside a transaction.
//!
//! Entities, i.e. named types bound to a table, are resolved through an
//! explicit [`Catalog`] rather than any global registry.
//!
//! # Useful references
//!
//!   * [PostgreSQL COPY](https://www.postgresql.org/docs/current/sql-copy.html)

macro_rules! bail_generic {
    ($fmt:expr, $($arg:tt)*) => {
        return Err($crate::CopyError::Generic(anyhow::anyhow!($fmt, $($arg)*)))
    };
    ($err:expr $(,)?) => {
        return Err($crate::CopyError::Generic(anyhow::anyhow!($err)))
    };
}

pub mod catalog;
pub mod compose;
pub mod connection;
pub mod copy;
pub mod desc;
pub mod error;
pub mod options;
pub mod query;
pub mod schemas;

#[cfg(test)]
mod testing;

pub use catalog::{Catalog, Entity};
pub use compose::{classify, compose, Classified, ComposedStatement, CopySource};
pub use connection::{
    make_tls, Config, Connector, CopyConnection, PostgresConnection, TlsConfig, TlsVerify,
};
pub use copy::{copy_from, copy_to, export_statement, import_statement, CopyTarget};
pub use desc::{ColumnDesc, EntityDesc, TableRef};
pub use error::CopyError;
pub use options::{CopyOptions, OptionValue};
pub use query::{BinaryOperator, Expr, FromItem, JoinKind, Query, SelectItem, Value};
