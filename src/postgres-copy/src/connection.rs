// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Connections that can run bulk copies.
//!
//! [`CopyConnection`] is the seam over the driver's native `COPY` support and
//! [`Connector`] hands out a fresh one per copy. [`Config`] implements the
//! latter on top of [`tokio_postgres`].

use std::pin::pin;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::BytesMut;
use futures::{SinkExt, TryStreamExt};
use openssl::pkey::PKey;
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use openssl::x509::X509;
use postgres_openssl::MakeTlsConnector;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tokio_postgres::config::Host;
use tokio_postgres::Client;
use tracing::{trace, warn};

use crate::CopyError;

/// Size of the chunks read from an import source.
const COPY_IN_CHUNK_SIZE: usize = 64 * 1024;

/// A connection dedicated to a single bulk copy.
#[async_trait]
pub trait CopyConnection: Send {
    /// Runs `statement`, a `COPY ... TO STDOUT`, writing everything the server
    /// sends to `sink`. Returns the number of bytes written.
    async fn copy_out(
        &mut self,
        statement: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, CopyError>;

    /// Runs `statement`, a `COPY ... FROM STDIN`, sending everything read from
    /// `source` until it is exhausted. Returns the number of rows the server
    /// reports as copied.
    async fn copy_in(
        &mut self,
        statement: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, CopyError>;

    /// Runs `statement` via the simple query protocol, discarding any rows.
    async fn execute(&mut self, statement: &str) -> Result<(), CopyError>;

    /// Closes the connection.
    async fn close(self: Box<Self>);
}

/// Opens connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn CopyConnection>, CopyError>;
}

/// Configuration for PostgreSQL connections.
///
/// This wraps [`tokio_postgres::Config`] to allow the configuration of TLS
/// certificates via a [`TlsConfig`].
#[derive(Debug, PartialEq, Clone)]
pub struct Config {
    inner: tokio_postgres::Config,
    tls: TlsConfig,
}

impl Config {
    pub const EXTERNAL_TESTS_POSTGRES_URL: &'static str = "MZ_POSTGRES_COPY_TEST_POSTGRES_URL";

    pub fn new(inner: tokio_postgres::Config) -> Result<Self, CopyError> {
        let config = Self {
            inner,
            tls: TlsConfig::default(),
        };

        // Early validate that the configuration contains only a single TCP
        // server.
        config.address()?;

        Ok(config)
    }

    /// Returns a new [`Config`] for use in tests against a live server.
    ///
    /// By default, tests that need a PostgreSQL server are no-ops so that
    /// `cargo test` works on new environments without any configuration. To
    /// activate them set the `MZ_POSTGRES_COPY_TEST_POSTGRES_URL` environment
    /// variable to a connection string whose user may create tables.
    pub fn new_for_test() -> Result<Option<Self>, CopyError> {
        let config = match std::env::var(Self::EXTERNAL_TESTS_POSTGRES_URL) {
            Ok(url) => url.parse()?,
            Err(_) => {
                if is_var_truthy("CI") {
                    panic!("CI is supposed to run this test but something has gone wrong!");
                }
                return Ok(None);
            }
        };
        Ok(Some(config))
    }

    pub fn tls(mut self, tls: TlsConfig) -> Config {
        self.tls = tls;
        self
    }

    pub fn inner(&self) -> &tokio_postgres::Config {
        &self.inner
    }

    /// Connects to the configured PostgreSQL database.
    pub async fn connect(&self, task_name: &str) -> Result<PostgresConnection, CopyError> {
        let tls = make_tls(&self.tls)?;
        let (client, connection) = self.inner.connect(tls.clone()).await?;
        let task_name = task_name.to_string();
        let task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("{task_name}: postgres connection failed: {e}");
            }
        });
        Ok(PostgresConnection { client, tls, task })
    }

    fn address(&self) -> Result<(&str, u16), CopyError> {
        match (self.inner.get_hosts(), self.inner.get_ports()) {
            ([Host::Tcp(host)], [port]) => Ok((host, *port)),
            _ => bail_generic!("only TCP connections to a single PostgreSQL server are supported"),
        }
    }
}

impl FromStr for Config {
    type Err = CopyError;

    /// Parses a libpq-style connection string or URL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Config::new(s.parse()?)
    }
}

#[async_trait]
impl Connector for Config {
    async fn connect(&self) -> Result<Box<dyn CopyConnection>, CopyError> {
        let conn = Config::connect(self, "postgres_copy").await?;
        Ok(Box::new(conn))
    }
}

/// A connection to a PostgreSQL server, driven by a spawned task.
pub struct PostgresConnection {
    client: Client,
    /// Used to open the side connection that cancel requests travel on.
    tls: MakeTlsConnector,
    task: JoinHandle<()>,
}

impl PostgresConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn stream_out(
        &mut self,
        statement: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, CopyError> {
        let mut stream = pin!(self.client.copy_out(statement).await?);
        let mut written: usize = 0;
        while let Some(bytes) = stream.try_next().await? {
            sink.write_all(&bytes).await?;
            written += bytes.len();
        }
        sink.flush().await?;
        trace!("copied {written} bytes out");
        Ok(u64::try_from(written).map_err(anyhow::Error::from)?)
    }
}

#[async_trait]
impl CopyConnection for PostgresConnection {
    async fn copy_out(
        &mut self,
        statement: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, CopyError> {
        let result = self.stream_out(statement, sink).await;
        // When the sink fails the server is still producing rows. Stop it
        // rather than draining the rest of the result on close.
        if let Err(CopyError::Io(e)) = &result {
            trace!("cancelling COPY TO STDOUT after sink error: {e}");
            let token = self.client.cancel_token();
            if let Err(e) = token.cancel_query(self.tls.clone()).await {
                warn!("failed to cancel COPY TO STDOUT: {e}");
            }
        }
        result
    }

    async fn copy_in(
        &mut self,
        statement: &str,
        source: &mut (dyn AsyncRead + Unpin + Send),
    ) -> Result<u64, CopyError> {
        let mut sink = pin!(self.client.copy_in(statement).await?);
        loop {
            let mut buf = BytesMut::with_capacity(COPY_IN_CHUNK_SIZE);
            if source.read_buf(&mut buf).await? == 0 {
                break;
            }
            sink.send(buf.freeze()).await?;
        }
        let rows = sink.as_mut().finish().await?;
        trace!("copied {rows} rows in");
        Ok(rows)
    }

    async fn execute(&mut self, statement: &str) -> Result<(), CopyError> {
        self.client.batch_execute(statement).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) {
        let PostgresConnection { client, task, .. } = *self;
        // Dropping the client terminates the session, after which the
        // connection task exits on its own.
        drop(client);
        if let Err(e) = task.await {
            warn!("postgres connection task failed: {e}");
        }
    }
}

fn is_var_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => value == "1" || value.eq_ignore_ascii_case("true"),
        Err(_) => false,
    }
}

/// How strictly the server's certificate is checked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVerify {
    /// Only verify against `root_cert`, if one is configured, like libpq's
    /// `sslmode=require`.
    #[default]
    None,
    /// Verify the certificate chain, like `sslmode=verify-ca`.
    Ca,
    /// Verify the certificate chain and hostname, like `sslmode=verify-full`.
    Full,
}

/// PEM-encoded TLS material for a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsConfig {
    pub verify: TlsVerify,
    pub root_cert: Option<Vec<u8>>,
    pub cert: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
}

/// Creates a TLS connector from `tls`.
///
/// Whether TLS is used at all is up to the `sslmode` of the
/// [`tokio_postgres::Config`] the connector is passed to.
pub fn make_tls(tls: &TlsConfig) -> Result<MakeTlsConnector, CopyError> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())?;
    // For more details, check out Table 33.1. SSL Mode Descriptions in
    // https://postgresql.org/docs/current/libpq-ssl.html#LIBPQ-SSL-PROTECTION.
    let (verify_mode, verify_hostname) = match tls.verify {
        // With a root CA, sslmode=require behaves like verify-ca.
        TlsVerify::None => match tls.root_cert {
            Some(_) => (SslVerifyMode::PEER, false),
            None => (SslVerifyMode::NONE, false),
        },
        TlsVerify::Ca => (SslVerifyMode::PEER, false),
        TlsVerify::Full => (SslVerifyMode::PEER, true),
    };
    builder.set_verify(verify_mode);

    match (&tls.cert, &tls.key) {
        (Some(cert), Some(key)) => {
            builder.set_certificate(&*X509::from_pem(cert)?)?;
            builder.set_private_key(&*PKey::private_key_from_pem(key)?)?;
        }
        (None, Some(_)) => {
            bail_generic!("must provide both sslcert and sslkey, but only provided sslkey")
        }
        (Some(_), None) => {
            bail_generic!("must provide both sslcert and sslkey, but only provided sslcert")
        }
        (None, None) => {}
    }
    if let Some(root_cert) = &tls.root_cert {
        builder
            .cert_store_mut()
            .add_cert(X509::from_pem(root_cert)?)?;
    }

    let mut tls_connector = MakeTlsConnector::new(builder.build());
    if verify_mode == SslVerifyMode::PEER && !verify_hostname {
        tls_connector.set_callback(|connect, _| {
            connect.set_verify_hostname(false);
            Ok(())
        });
    }
    Ok(tls_connector)
}
