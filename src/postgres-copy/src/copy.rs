// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Bulk export and import via `COPY`.
//!
//! Each call opens a dedicated connection through the given [`Connector`],
//! runs exactly one `COPY` to completion and closes the connection again,
//! whether or not the copy succeeded. Nothing is retried.

use postgres_protocol::escape::escape_identifier;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, warn};

use crate::catalog::{Catalog, Entity};
use crate::compose::{compose, CopySource};
use crate::connection::{Connector, CopyConnection};
use crate::desc::TableRef;
use crate::options::CopyOptions;
use crate::CopyError;

/// Where to import into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyTarget {
    /// The table of the entity with this name, if the catalog knows it, and
    /// otherwise the unqualified table with this name.
    Named { name: String, columns: Vec<String> },
    Table { table: TableRef, columns: Vec<String> },
}

impl CopyTarget {
    pub fn named(name: impl Into<String>) -> CopyTarget {
        CopyTarget::Named {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    pub fn entity<T: Entity>() -> CopyTarget {
        CopyTarget::named(T::NAME)
    }

    /// Restricts the import to `columns`, in the order they appear in the
    /// source data.
    pub fn columns<I, S>(self, columns: I) -> CopyTarget
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = columns.into_iter().map(Into::into).collect();
        match self {
            CopyTarget::Named { name, .. } => CopyTarget::Named { name, columns },
            CopyTarget::Table { table, .. } => CopyTarget::Table { table, columns },
        }
    }

    /// Resolves the physical table to copy into.
    pub fn resolve(&self, catalog: &Catalog) -> TableRef {
        match self {
            CopyTarget::Named { name, .. } => match catalog.get(name) {
                Some(desc) => desc.table.clone(),
                None => TableRef::new(name.as_str()),
            },
            CopyTarget::Table { table, .. } => table.clone(),
        }
    }

    fn column_list(&self) -> &[String] {
        match self {
            CopyTarget::Named { columns, .. } | CopyTarget::Table { columns, .. } => columns,
        }
    }
}

impl From<TableRef> for CopyTarget {
    fn from(table: TableRef) -> CopyTarget {
        CopyTarget::Table {
            table,
            columns: Vec::new(),
        }
    }
}

/// Builds the `COPY (...) TO STDOUT` command exporting `source`.
pub fn export_statement(
    source: &CopySource,
    catalog: &Catalog,
    options: &CopyOptions,
) -> Result<String, CopyError> {
    let composed = compose(source, catalog)?;
    trace!(labels = ?composed.labels, "composed export source");
    Ok(format!(
        "COPY ({}) TO STDOUT{}",
        composed.to_literal_sql(),
        options.render()?
    ))
}

/// Builds the `COPY ... FROM STDIN` command importing into `target`.
pub fn import_statement(
    target: &CopyTarget,
    catalog: &Catalog,
    options: &CopyOptions,
) -> Result<String, CopyError> {
    let table = target.resolve(catalog);
    let columns = match target.column_list() {
        [] => String::new(),
        columns => {
            let columns: Vec<_> = columns.iter().map(|c| escape_identifier(c)).collect();
            format!(" ({})", columns.join(", "))
        }
    };
    Ok(format!(
        "COPY {table}{columns} FROM STDIN{}",
        options.render()?
    ))
}

/// Exports `source` into `sink`, returning the number of bytes written.
///
/// The bytes are whatever the server produces for `options`, e.g. CSV with
/// `FORMAT 'csv'`.
///
/// # Errors
///
/// Composition errors are raised before a connection is opened. Errors from
/// the server, the connection or `sink` are returned as is, after the
/// connection has been closed.
pub async fn copy_to<C, W>(
    source: &CopySource,
    sink: &mut W,
    connector: &C,
    catalog: &Catalog,
    options: &CopyOptions,
) -> Result<u64, CopyError>
where
    C: Connector + ?Sized,
    W: AsyncWrite + Unpin + Send,
{
    let statement = export_statement(source, catalog, options)?;
    debug!(%statement, "exporting");
    let mut conn = connector.connect().await?;
    let result = conn.copy_out(&statement, sink).await;
    conn.close().await;
    result
}

/// Imports `source` into `target`, returning the number of rows copied.
///
/// The import runs in its own transaction, which is committed once `source`
/// is exhausted and rolled back on any failure.
///
/// # Errors
///
/// Errors from the server, the connection or `source` are returned as is,
/// after the transaction has been rolled back and the connection closed.
pub async fn copy_from<C, R>(
    source: &mut R,
    target: &CopyTarget,
    connector: &C,
    catalog: &Catalog,
    options: &CopyOptions,
) -> Result<u64, CopyError>
where
    C: Connector + ?Sized,
    R: AsyncRead + Unpin + Send,
{
    let statement = import_statement(target, catalog, options)?;
    debug!(%statement, "importing");
    let mut conn = connector.connect().await?;
    let result = copy_in_transaction(&mut *conn, &statement, source).await;
    conn.close().await;
    result
}

async fn copy_in_transaction(
    conn: &mut dyn CopyConnection,
    statement: &str,
    source: &mut (dyn AsyncRead + Unpin + Send),
) -> Result<u64, CopyError> {
    conn.execute("BEGIN").await?;
    match conn.copy_in(statement, source).await {
        Ok(rows) => {
            trace!("committing COPY transaction");
            conn.execute("COMMIT").await?;
            Ok(rows)
        }
        Err(e) => {
            trace!("rolling back COPY transaction");
            if let Err(rollback) = conn.execute("ROLLBACK").await {
                warn!("failed to roll back COPY transaction: {rollback}");
            }
            Err(e)
        }
    }
}
