// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! An in-memory stand-in for a PostgreSQL server, and helpers for tests that
//! run against a live one.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_postgres::SimpleQueryMessage;
use tracing::info;
use uuid::Uuid;

use crate::connection::{Config, Connector, CopyConnection};
use crate::CopyError;

/// Served in chunks of this many bytes, to exercise streaming.
const CHUNK_SIZE: usize = 3;

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    /// Every statement run, in order.
    pub statements: Vec<String>,
    /// What `COPY ... TO STDOUT` produces.
    pub output: Vec<u8>,
    /// Data received by `COPY ... FROM STDIN` in the open transaction.
    pub staged: Vec<u8>,
    /// Committed data.
    pub table: Vec<u8>,
    pub connects: usize,
    pub closes: usize,
    /// Whether copies fail halfway through.
    pub fail: bool,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    pub fn serving(output: &[u8]) -> MemoryConnector {
        let connector = MemoryConnector::default();
        connector.lock().output = output.to_vec();
        connector
    }

    pub fn failing(self) -> MemoryConnector {
        self.lock().fail = true;
        self
    }

    pub fn state(&self) -> MemoryState {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("lock poisoned")
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Box<dyn CopyConnection>, CopyError> {
        self.lock().connects += 1;
        Ok(Box::new(MemoryConnection {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryConnection {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnection {
    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("lock poisoned")
    }
}

fn connection_lost() -> CopyError {
    CopyError::Generic(anyhow::anyhow!("connection lost mid-copy"))
}

#[async_trait]
impl CopyConnection for MemoryConnection {
    async fn copy_out(
        &mut self,
        statement: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, CopyError> {
        let (output, fail) = {
            let mut state = self.lock();
            state.statements.push(statement.to_string());
            (state.output.clone(), state.fail)
        };
        let output = if fail {
            &output[..output.len() / 2]
        } else {
            &output[..]
        };
        let mut written = 0;
        for chunk in output.chunks(CHUNK_SIZE) {
            sink.write_all(chunk).await?;
            written += chunk.len();
        }
        if fail {
            return Err(connection_lost());
        }
        sink.flush().await?;
        Ok(u64::try_from(written).expect("fits"))
    }

    async fn copy_in(
        &mut self,
        statement: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, CopyError> {
        self.lock().statements.push(statement.to_string());
        let mut received = Vec::new();
        source.read_to_end(&mut received).await?;
        let mut state = self.lock();
        if state.fail {
            return Err(connection_lost());
        }
        let rows = received.iter().filter(|b| **b == b'\n').count();
        state.staged.extend(received);
        Ok(u64::try_from(rows).expect("fits"))
    }

    async fn execute(&mut self, statement: &str) -> Result<(), CopyError> {
        let mut state = self.lock();
        state.statements.push(statement.to_string());
        match statement {
            "BEGIN" | "ROLLBACK" => state.staged.clear(),
            "COMMIT" => {
                let staged = std::mem::take(&mut state.staged);
                state.table.extend(staged);
            }
            _ => {}
        }
        Ok(())
    }

    async fn close(self: Box<Self>) {
        self.lock().closes += 1;
    }
}

/// A sink that fails any write past its first `capacity` bytes.
#[derive(Debug, Default)]
pub struct FailingSink {
    pub written: Vec<u8>,
    pub capacity: usize,
}

impl FailingSink {
    pub fn new(capacity: usize) -> FailingSink {
        FailingSink {
            written: Vec::new(),
            capacity,
        }
    }
}

impl AsyncWrite for FailingSink {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.written.len() + buf.len() > self.capacity {
            return Poll::Ready(Err(io::Error::other("sink is full")));
        }
        self.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// The server named by [`Config::EXTERNAL_TESTS_POSTGRES_URL`], or `None`
/// when the calling test should be skipped.
pub fn live_config() -> Result<Option<Config>, CopyError> {
    let config = Config::new_for_test()?;
    if config.is_none() {
        info!(
            "{} env not set: skipping test that uses external service",
            Config::EXTERNAL_TESTS_POSTGRES_URL
        );
    }
    Ok(config)
}

/// A table name no other test run uses.
pub fn unique_table(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

/// Runs `sql` on a fresh connection to `config`, returning every row in text
/// form.
pub async fn simple_query(
    config: &Config,
    sql: &str,
) -> Result<Vec<Vec<Option<String>>>, CopyError> {
    let conn = config.connect("postgres_copy_test").await?;
    let result = conn.client().simple_query(sql).await;
    Box::new(conn).close().await;
    let rows = result?
        .into_iter()
        .filter_map(|message| match message {
            SimpleQueryMessage::Row(row) => Some(
                (0..row.len())
                    .map(|i| row.get(i).map(str::to_string))
                    .collect(),
            ),
            _ => None,
        })
        .collect();
    Ok(rows)
}
