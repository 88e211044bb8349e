//! PostgreSQL connection: startup handshake, authentication, and the simple
//! and extended query paths over a single exclusively-owned TCP stream.
//!
//! Queries are strictly sequential per connection: every call drains the
//! backend to ready-for-query before returning, so concurrent callers must
//! serialize access externally or corrupt the protocol stream.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::auth;
use super::context::QueryContext;
use super::error::{PgError, PgResult, ServerError};
use super::protocol::{
    BackendMessage, BindMessage, DescribeStatementMessage, ExecuteMessage, FrontendMessage,
    ParseMessage, QueryMessage, StartupMessage, SyncMessage, TerminateMessage, TransactionStatus,
};
use super::types::{self, Oid, Value};

/// Bound applied to every socket read and write; expiry is a transport
/// error, not a silent hang.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection parameters. Immutable after construction; a missing password
/// makes password-demanding auth methods fail.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: Option<String>,
    pub application_name: Option<String>,
    pub replication: Option<String>,
    pub io_timeout: Duration,
}

/// A single PostgreSQL connection.
#[derive(Debug)]
pub struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    config: Config,
    transaction_status: TransactionStatus,
    backend_pid: i32,
    closed: bool,
}

impl Connection {
    /// Open the TCP stream and drive the startup handshake to
    /// ready-for-query, negotiating authentication on the way.
    pub async fn connect(config: Config) -> PgResult<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = timeout(config.io_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| PgError::Timeout)??;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            config,
            transaction_status: TransactionStatus::Idle,
            backend_pid: 0,
            closed: false,
        };
        conn.startup().await?;
        info!(
            host = %conn.config.host,
            port = conn.config.port,
            database = %conn.config.database,
            "connected to postgres"
        );
        Ok(conn)
    }

    /// Run a statement, choosing the simple or extended path by whether
    /// positional parameters are supplied.
    pub async fn run_query(&mut self, stmt: &str, params: &[Value]) -> PgResult<QueryContext> {
        if params.is_empty() {
            self.run_simple_query(stmt).await
        } else {
            self.run_query_with_params(stmt, params, &[]).await
        }
    }

    /// Simple query path: one `Q` message, drained to ready-for-query.
    pub async fn run_simple_query(&mut self, stmt: &str) -> PgResult<QueryContext> {
        self.ensure_open()?;
        let mut ctx = QueryContext::new(stmt);
        self.send(&QueryMessage {
            query: stmt.to_string(),
        })
        .await?;
        self.drain_until_ready(&mut ctx).await?;
        Ok(ctx)
    }

    /// Extended query path: Parse, Describe, Bind, Execute against the
    /// unnamed statement/portal, each immediately followed by a Sync and a
    /// drain to ready-for-query. The per-step Sync keeps the server's
    /// implicit command boundary deterministic and recoverable after a
    /// partial failure.
    pub async fn run_query_with_params(
        &mut self,
        stmt: &str,
        params: &[Value],
        param_oids: &[Oid],
    ) -> PgResult<QueryContext> {
        self.ensure_open()?;
        let mut ctx = QueryContext::new(stmt);

        self.send_synced(&ParseMessage {
            name: String::new(),
            query: stmt.to_string(),
            param_oids: param_oids.to_vec(),
        })
        .await?;
        self.drain_until_ready(&mut ctx).await?;

        self.send_synced(&DescribeStatementMessage {
            name: String::new(),
        })
        .await?;
        self.drain_until_ready(&mut ctx).await?;

        let encoded: Vec<Option<String>> = params.iter().map(types::encode).collect();
        self.send_synced(&BindMessage {
            portal: String::new(),
            statement: String::new(),
            params: encoded,
        })
        .await?;
        self.drain_until_ready(&mut ctx).await?;

        self.send_synced(&ExecuteMessage {
            portal: String::new(),
            max_rows: 0,
        })
        .await?;
        self.drain_until_ready(&mut ctx).await?;

        Ok(ctx)
    }

    /// Close the underlying stream. Double-close is a no-op.
    pub async fn close(&mut self) -> PgResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        // Best effort: the server may already be gone.
        let _ = timeout(self.config.io_timeout, async {
            self.writer.write_all(&TerminateMessage.encode()).await?;
            self.writer.flush().await?;
            self.writer.shutdown().await
        })
        .await;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Last transaction status reported via ready-for-query.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn backend_pid(&self) -> i32 {
        self.backend_pid
    }

    // ========================================================================
    // Startup & dispatch
    // ========================================================================

    async fn startup(&mut self) -> PgResult<()> {
        self.send(&StartupMessage {
            user: self.config.user.clone(),
            database: self.config.database.clone(),
            application_name: self.config.application_name.clone(),
            replication: self.config.replication.clone(),
        })
        .await?;

        loop {
            match self.read_message().await? {
                BackendMessage::AuthenticationOk => {}
                BackendMessage::AuthenticationCleartextPassword => {
                    let response = auth::cleartext_response(&self.config)?;
                    self.send(&response).await?;
                }
                BackendMessage::AuthenticationMd5Password { salt } => {
                    let response = auth::md5_response(&self.config, salt)?;
                    self.send(&response).await?;
                }
                BackendMessage::ParameterStatus { name, value } => {
                    debug!(%name, %value, "server parameter");
                }
                BackendMessage::BackendKeyData { process_id, .. } => {
                    self.backend_pid = process_id;
                }
                BackendMessage::NoticeResponse { .. } => {}
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return Ok(());
                }
                BackendMessage::ErrorResponse { fields } => {
                    return Err(PgError::Server(ServerError::from_fields(&fields)));
                }
                other => {
                    return Err(PgError::Protocol(format!(
                        "unexpected message during startup: {other:?}"
                    )));
                }
            }
        }
    }

    /// Dispatch loop: read and route messages into the context until
    /// ready-for-query. A server error is recorded on the context and the
    /// drain continues, so the stream ends in a known state.
    async fn drain_until_ready(&mut self, ctx: &mut QueryContext) -> PgResult<()> {
        loop {
            match self.read_message().await? {
                BackendMessage::ReadyForQuery { status } => {
                    self.transaction_status = status;
                    return Ok(());
                }
                BackendMessage::RowDescription { fields } => {
                    ctx.record_row_description(fields);
                }
                BackendMessage::DataRow { values } => {
                    ctx.record_data_row(&values)?;
                }
                BackendMessage::CommandComplete { tag } => {
                    ctx.record_command_complete(&tag, self.transaction_status)?;
                }
                BackendMessage::ErrorResponse { fields } => {
                    ctx.record_error(ServerError::from_fields(&fields));
                }
                // Known tags with nothing to record in this phase.
                BackendMessage::ParseComplete
                | BackendMessage::BindComplete
                | BackendMessage::CloseComplete
                | BackendMessage::NoData
                | BackendMessage::EmptyQueryResponse
                | BackendMessage::ParameterDescription { .. }
                | BackendMessage::ParameterStatus { .. }
                | BackendMessage::BackendKeyData { .. }
                | BackendMessage::NoticeResponse { .. } => {}
                other => {
                    return Err(PgError::Protocol(format!(
                        "unexpected message during query: {other:?}"
                    )));
                }
            }
        }
    }

    // ========================================================================
    // Framing & I/O
    // ========================================================================

    /// Read one framed message: 5-byte header, then exactly `length - 4`
    /// payload bytes. No message is ever partially consumed.
    async fn read_message(&mut self) -> PgResult<BackendMessage> {
        let mut header = [0u8; 5];
        self.read_exact(&mut header).await?;
        let tag = header[0];
        let length = i32::from_be_bytes([header[1], header[2], header[3], header[4]]);
        if length < 4 {
            return Err(PgError::Protocol(format!(
                "frame length {length} below header size"
            )));
        }
        let mut payload = vec![0u8; length as usize - 4];
        self.read_exact(&mut payload).await?;
        debug!(tag = %(tag as char), length, "backend message");
        BackendMessage::decode(tag, Bytes::from(payload))
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> PgResult<()> {
        match timeout(self.config.io_timeout, self.reader.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(PgError::ConnectionClosed)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(PgError::Timeout),
        }
    }

    async fn send<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.write_all(&msg.encode()).await?;
        self.flush().await
    }

    /// Write a message immediately followed by a Sync, flushed together.
    async fn send_synced<M: FrontendMessage>(&mut self, msg: &M) -> PgResult<()> {
        self.write_all(&msg.encode()).await?;
        self.write_all(&SyncMessage.encode()).await?;
        self.flush().await
    }

    async fn write_all(&mut self, bytes: &[u8]) -> PgResult<()> {
        match timeout(self.config.io_timeout, self.writer.write_all(bytes)).await {
            Ok(result) => result.map_err(PgError::from),
            Err(_) => Err(PgError::Timeout),
        }
    }

    async fn flush(&mut self) -> PgResult<()> {
        match timeout(self.config.io_timeout, self.writer.flush()).await {
            Ok(result) => result.map_err(PgError::from),
            Err(_) => Err(PgError::Timeout),
        }
    }

    fn ensure_open(&self) -> PgResult<()> {
        if self.closed {
            Err(PgError::ConnectionClosed)
        } else {
            Ok(())
        }
    }
}
