// src/pool/connection.rs
use crate::topology::ProxyEndpoint;
use crate::transport::{Command, CommandReply, Connector, ProbeReply, ProxyChannel, TransportError};
use std::fmt;
use std::time::Duration;
use tokio::time::{error::Elapsed, timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Timed out connecting to {endpoint} after {timeout:?}")]
    ConnectTimeout {
        endpoint: ProxyEndpoint,
        timeout: Duration,
    },

    #[error("Socket timeout on {endpoint}: no reply within {timeout:?}")]
    SocketTimeout {
        endpoint: ProxyEndpoint,
        timeout: Duration,
    },

    #[error("Transport error on {endpoint}: {source}")]
    Transport {
        endpoint: ProxyEndpoint,
        #[source]
        source: TransportError,
    },

    #[error("Connection to {0} is closed")]
    Closed(ProxyEndpoint),
}

/// A single transport handle to one proxy. Every request is bounded by the
/// socket deadline; a timeout or transport error closes the connection for
/// good.
pub struct Connection {
    id: u64,
    endpoint: ProxyEndpoint,
    channel: Option<Box<dyn ProxyChannel>>,
    state: ConnectionState,
    socket_timeout: Duration,
    created_at: Instant,
    uses: u64,
}

impl Connection {
    pub async fn open(
        connector: &dyn Connector,
        endpoint: &ProxyEndpoint,
        id: u64,
        connect_timeout: Duration,
        socket_timeout: Duration,
    ) -> Result<Self, ConnectionError> {
        let channel = match timeout(connect_timeout, connector.connect(endpoint)).await {
            Ok(Ok(channel)) => channel,
            Ok(Err(source)) => {
                return Err(ConnectionError::Transport {
                    endpoint: endpoint.clone(),
                    source,
                })
            }
            Err(_) => {
                return Err(ConnectionError::ConnectTimeout {
                    endpoint: endpoint.clone(),
                    timeout: connect_timeout,
                })
            }
        };

        tracing::debug!(proxy = %endpoint, connection = id, "Connection opened");

        Ok(Self {
            id,
            endpoint: endpoint.clone(),
            channel: Some(channel),
            state: ConnectionState::Idle,
            socket_timeout,
            created_at: Instant::now(),
            uses: 0,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state != ConnectionState::Closed
    }

    pub fn uses(&self) -> u64 {
        self.uses
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub async fn probe(&mut self) -> Result<ProbeReply, ConnectionError> {
        let deadline = self.socket_timeout;
        let channel = self.channel_mut()?;
        let result = timeout(deadline, channel.probe()).await;
        self.finish(result)
    }

    pub async fn command(&mut self, command: &Command) -> Result<CommandReply, ConnectionError> {
        let deadline = self.socket_timeout;
        let channel = self.channel_mut()?;
        let result = timeout(deadline, channel.command(command)).await;
        self.finish(result)
    }

    pub fn close(&mut self) {
        if self.state != ConnectionState::Closed {
            tracing::debug!(proxy = %self.endpoint, connection = self.id, "Connection closed");
        }
        self.state = ConnectionState::Closed;
        self.channel = None;
    }

    pub(crate) fn mark_in_use(&mut self) {
        if self.is_open() {
            self.state = ConnectionState::InUse;
        }
    }

    pub(crate) fn mark_idle(&mut self) {
        if self.is_open() {
            self.state = ConnectionState::Idle;
        }
    }

    fn channel_mut(&mut self) -> Result<&mut Box<dyn ProxyChannel>, ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed(self.endpoint.clone()));
        }
        match self.channel.as_mut() {
            Some(channel) => Ok(channel),
            None => Err(ConnectionError::Closed(self.endpoint.clone())),
        }
    }

    fn finish<T>(&mut self, result: Result<Result<T, TransportError>, Elapsed>) -> Result<T, ConnectionError> {
        match result {
            Ok(Ok(reply)) => {
                self.uses += 1;
                Ok(reply)
            }
            Ok(Err(source)) => {
                self.close();
                Err(ConnectionError::Transport {
                    endpoint: self.endpoint.clone(),
                    source,
                })
            }
            Err(_) => {
                self.close();
                Err(ConnectionError::SocketTimeout {
                    endpoint: self.endpoint.clone(),
                    timeout: self.socket_timeout,
                })
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state)
            .field("uses", &self.uses)
            .finish_non_exhaustive()
    }
}
