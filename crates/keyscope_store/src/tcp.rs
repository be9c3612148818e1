//! RESP client over TCP.

use crate::connection::{Connection, Connector};
use crate::endpoint::Endpoint;
use crate::error::{StoreError, StoreResult};
use crate::resp::{encode_command, parse_reply, ParseStatus, RespValue};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Dials Redis-compatible servers over TCP.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    /// Creates a new TCP connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> StoreResult<Box<dyn Connection>> {
        let address = endpoint.address();
        let stream = tokio::time::timeout(endpoint.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| StoreError::Timeout)??;
        stream.set_nodelay(true)?;
        debug!(%address, "store.tcp.connected");

        let mut connection = TcpConnection::new(stream, endpoint.connect_timeout);
        if let Some(password) = &endpoint.password {
            connection
                .command(&[b"AUTH", password.as_bytes()])
                .await
                .map_err(|e| match e {
                    StoreError::Server(message) => StoreError::Auth(message),
                    other => other,
                })?;
        }
        Ok(Box::new(connection))
    }
}

/// One RESP connection.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    read_buffer: Vec<u8>,
    io_timeout: Duration,
}

impl TcpConnection {
    fn new(stream: TcpStream, io_timeout: Duration) -> Self {
        Self {
            stream,
            read_buffer: Vec::with_capacity(4096),
            io_timeout,
        }
    }

    /// Sends one command and waits for its reply.
    ///
    /// Error replies are turned into [`StoreError::Server`] or
    /// [`StoreError::WrongType`].
    pub async fn command(&mut self, args: &[&[u8]]) -> StoreResult<RespValue> {
        let request = encode_command(args);
        let reply = tokio::time::timeout(self.io_timeout, self.round_trip(&request))
            .await
            .map_err(|_| StoreError::Timeout)??;
        reply.into_result()
    }

    async fn round_trip(&mut self, request: &[u8]) -> StoreResult<RespValue> {
        self.stream.write_all(request).await?;

        let mut chunk = [0u8; 4096];
        loop {
            if let ParseStatus::Complete { value, consumed } = parse_reply(&self.read_buffer)? {
                self.read_buffer.drain(..consumed);
                return Ok(value);
            }
            let read = self.stream.read(&mut chunk).await?;
            if read == 0 {
                return Err(StoreError::Closed);
            }
            self.read_buffer.extend_from_slice(&chunk[..read]);
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn select(&mut self, db: u32) -> StoreResult<()> {
        let db = db.to_string();
        self.command(&[b"SELECT", db.as_bytes()]).await?;
        Ok(())
    }

    async fn keys(&mut self, pattern: &str) -> StoreResult<Vec<String>> {
        self.command(&[b"KEYS", pattern.as_bytes()])
            .await?
            .into_key_array()
    }

    async fn get(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.command(&[b"GET", key.as_bytes()]).await? {
            RespValue::Null => Ok(None),
            RespValue::Bulk(bytes) => Ok(Some(bytes)),
            RespValue::Simple(text) => Ok(Some(text.into_bytes())),
            other => Err(StoreError::Protocol(format!(
                "unexpected GET reply {other:?}"
            ))),
        }
    }

    async fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.command(&[b"SET", key.as_bytes(), value]).await?;
        Ok(())
    }

    async fn del(&mut self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut args: Vec<&[u8]> = Vec::with_capacity(keys.len() + 1);
        args.push(b"DEL");
        args.extend(keys.iter().map(|key| key.as_bytes()));
        let removed = self.command(&args).await?.into_integer()?;
        Ok(removed.max(0) as u64)
    }

    async fn dbsize(&mut self) -> StoreResult<u64> {
        let size = self.command(&[b"DBSIZE"]).await?.into_integer()?;
        Ok(size.max(0) as u64)
    }

    async fn config_get(&mut self, name: &str) -> StoreResult<Vec<String>> {
        self.command(&[b"CONFIG", b"GET", name.as_bytes()])
            .await?
            .into_string_array()
    }

    async fn flush_db(&mut self) -> StoreResult<()> {
        self.command(&[b"FLUSHDB"]).await?;
        Ok(())
    }
}
