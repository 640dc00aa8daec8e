//! Connection lifecycle and request/response primitives
//!
//! A [`Connection`] exclusively owns the open transport. It is the only
//! place the transport handle lives; nothing else ever gets a reference to
//! it outside a single primitive call.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{ProgrammerError, Result};
use crate::transport::{Connector, Transport};

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No transport open
    #[default]
    Disconnected,
    /// Transport is being opened
    Connecting,
    /// Transport open; protocol operations allowed
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// Reverts the state to `Disconnected` unless disarmed
///
/// Covers both a failed open and a connect future that is dropped while the
/// open is still pending.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<ConnectionState>,
    armed: bool,
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.send_replace(ConnectionState::Disconnected);
        }
    }
}

/// Owner of the transport
pub struct Connection<C: Connector> {
    connector: C,
    transport: Option<C::Transport>,
    state: watch::Sender<ConnectionState>,
    port: Option<String>,
}

impl<C: Connector> Connection<C> {
    /// Create a disconnected connection
    pub fn new(connector: C) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            connector,
            transport: None,
            state,
            port: None,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Port of the open connection
    pub fn port(&self) -> Option<&str> {
        self.port.as_deref()
    }

    /// Open `port` at `baud`
    ///
    /// On any failure the state returns to `Disconnected`; it never stays
    /// in `Connecting`.
    pub async fn connect(&mut self, port: &str, baud: u32) -> Result<()> {
        if self.state() == ConnectionState::Connected {
            return Err(ProgrammerError::AlreadyConnected);
        }
        if baud == 0 {
            return Err(ProgrammerError::InvalidParameter(
                "baud rate must be non-zero".into(),
            ));
        }

        self.state.send_replace(ConnectionState::Connecting);
        let mut guard = ConnectingGuard {
            state: &self.state,
            armed: true,
        };

        log::debug!("Opening {} at {} baud", port, baud);
        let transport = self.connector.open(port, baud).await.map_err(|e| {
            log::error!("Failed to open {}: {}", port, e);
            match e {
                ProgrammerError::TransportError(msg) => ProgrammerError::TransportError(msg),
                other => ProgrammerError::TransportError(format!("{}: {}", port, other)),
            }
        })?;

        guard.armed = false;
        drop(guard);

        self.transport = Some(transport);
        self.port = Some(port.to_string());
        self.state.send_replace(ConnectionState::Connected);
        log::info!("Connected to programmer on {}", port);
        Ok(())
    }

    /// Close the transport if open
    ///
    /// Always ends `Disconnected`; calling it while disconnected is a no-op.
    pub async fn disconnect(&mut self) {
        // State is settled before the close is awaited so that a dropped
        // disconnect still leaves a consistent connection behind
        let transport = self.transport.take();
        let port = self.port.take();
        self.state.send_replace(ConnectionState::Disconnected);

        if let Some(mut transport) = transport {
            if let Err(e) = transport.close().await {
                log::warn!("Error while closing transport: {}", e);
            }
            log::info!("Disconnected from {}", port.as_deref().unwrap_or("programmer"));
        }
    }

    /// Fail with `NotConnected` unless a transport is open
    pub fn ensure_connected(&self) -> Result<()> {
        match (self.state(), &self.transport) {
            (ConnectionState::Connected, Some(_)) => Ok(()),
            _ => Err(ProgrammerError::NotConnected),
        }
    }

    /// Send a command line
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        let transport = self.transport_mut()?;
        log::trace!(">> {}", command);
        let result = transport.write_line(command).await;
        self.check_fatal(result)
    }

    /// Write raw bytes
    pub async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let transport = self.transport_mut()?;
        let result = transport.write(data).await;
        self.check_fatal(result)
    }

    /// Wait up to `timeout` for the next line
    pub async fn await_line(&mut self, timeout: Duration) -> Result<String> {
        let transport = self.transport_mut()?;
        let result = match tokio::time::timeout(timeout, transport.read_line()).await {
            Ok(result) => result,
            Err(_) => return Err(ProgrammerError::Timeout(timeout)),
        };
        let line = self.check_fatal(result)?;
        log::trace!("<< {}", line);
        Ok(line)
    }

    /// Discard lines that are already waiting
    ///
    /// Late replies to an operation that timed out would otherwise be taken
    /// as the answer to the next command. Returns the number discarded.
    pub async fn discard_pending(&mut self) -> Result<usize> {
        let mut discarded = 0;
        loop {
            let transport = self.transport_mut()?;
            match tokio::time::timeout(Duration::ZERO, transport.read_line()).await {
                Ok(result) => {
                    let line = self.check_fatal(result)?;
                    log::debug!("Discarding stale line: {:?}", line);
                    discarded += 1;
                }
                Err(_) => return Ok(discarded),
            }
        }
    }

    fn transport_mut(&mut self) -> Result<&mut C::Transport> {
        if self.state() != ConnectionState::Connected {
            return Err(ProgrammerError::NotConnected);
        }
        self.transport.as_mut().ok_or(ProgrammerError::NotConnected)
    }

    /// Drop the transport after a transport-level failure
    fn check_fatal<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                log::error!("Transport failure, closing connection: {}", e);
                self.transport = None;
                self.port = None;
                self.state.send_replace(ConnectionState::Disconnected);
            }
        }
        result
    }
}
