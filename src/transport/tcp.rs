// src/transport/tcp.rs
use super::{Command, CommandReply, Connector, ProbeReply, ProxyChannel, Request, TransportError};
use crate::topology::ProxyEndpoint;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Newline-delimited JSON over plain TCP: one request per line, one reply
/// per line.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &ProxyEndpoint) -> Result<Box<dyn ProxyChannel>, TransportError> {
        let stream = TcpStream::connect((endpoint.host(), endpoint.port())).await?;
        stream.set_nodelay(true)?;

        tracing::trace!(proxy = %endpoint, "TCP connection established");
        Ok(Box::new(TcpChannel::new(stream)))
    }
}

struct TcpChannel {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    line: String,
}

impl TcpChannel {
    fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer: write,
            line: String::new(),
        }
    }

    async fn round_trip<T: DeserializeOwned>(&mut self, request: &Request) -> Result<T, TransportError> {
        let mut frame = serde_json::to_vec(request)?;
        frame.push(b'\n');
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;

        self.line.clear();
        if self.reader.read_line(&mut self.line).await? == 0 {
            return Err(TransportError::Closed);
        }

        Ok(serde_json::from_str(self.line.trim_end())?)
    }
}

#[async_trait]
impl ProxyChannel for TcpChannel {
    async fn probe(&mut self) -> Result<ProbeReply, TransportError> {
        self.round_trip(&Request::Probe).await
    }

    async fn command(&mut self, command: &Command) -> Result<CommandReply, TransportError> {
        self.round_trip(&Request::Command(command.clone())).await
    }
}
