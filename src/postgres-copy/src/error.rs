// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Errors raised while composing or running a `COPY`.

/// An error representing failures to compose or run a bulk copy.
#[derive(Debug, thiserror::Error)]
pub enum CopyError {
    /// A select item cannot be reduced to a named output column.
    #[error("unsupported column expression {0}; give it an alias with Expr::label")]
    UnsupportedColumn(String),
    /// An entity was looked up that the catalog does not know about.
    #[error("entity {0:?} is not registered in the catalog")]
    UnknownEntity(String),
    /// A format option key that cannot be rendered into a `COPY` command.
    #[error("invalid COPY option name {0:?}")]
    InvalidOption(String),
    /// Error reported by the server or the connection to it.
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
    /// Error reading from the source or writing to the sink.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Error setting up postgres ssl.
    #[error(transparent)]
    Tls(#[from] openssl::error::ErrorStack),
    /// Any other error we bail on.
    #[error(transparent)]
    Generic(#[from] anyhow::Error),
}
