//! Shared handle to a programmer session
//!
//! [`ProgrammerHandle`] lets several tasks use one programmer. Every call
//! goes through a FIFO-fair async mutex, so commands never interleave on the
//! wire, and the observable state is published as a [`SessionSnapshot`] on a
//! `watch` channel.

use std::fmt;

use tokio::sync::{watch, Mutex, MutexGuard};

use crate::connection::ConnectionState;
use crate::error::{ProgrammerError, Result};
use crate::protocol::{ProgrammerInfo, Step};
use crate::session::{step_failed, ProgrammerSession, SessionConfig};
use crate::transport::Connector;

/// Upload progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Bytes written so far
    pub sent: usize,
    /// Image size
    pub total: usize,
}

impl fmt::Display for TransferProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} bytes", self.sent, self.total)
    }
}

/// Observable state of a programmer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Connection state
    pub state: ConnectionState,
    /// Last status or error message
    pub status: String,
    /// Last info reported by the programmer; cleared on disconnect
    pub info: Option<ProgrammerInfo>,
    /// Upload progress while a load is running
    pub progress: Option<TransferProgress>,
}

/// Publishes `Disconnected` if a connect/disconnect is dropped part-way
struct Revert<'a> {
    snapshot: &'a watch::Sender<SessionSnapshot>,
    status: &'static str,
    armed: bool,
}

impl Drop for Revert<'_> {
    fn drop(&mut self) {
        if self.armed {
            let status = self.status;
            self.snapshot.send_modify(|s| {
                s.state = ConnectionState::Disconnected;
                s.status = status.to_string();
                s.info = None;
                s.progress = None;
            });
        }
    }
}

/// Serialized, observable access to a [`ProgrammerSession`]
pub struct ProgrammerHandle<C: Connector> {
    session: Mutex<ProgrammerSession<C>>,
    /// Live connection state, readable without taking the session lock
    connection: watch::Receiver<ConnectionState>,
    snapshot: watch::Sender<SessionSnapshot>,
    connect_requests: watch::Sender<u64>,
    disconnect_requests: watch::Sender<u64>,
}

impl<C: Connector> ProgrammerHandle<C> {
    /// Create a handle around a disconnected session
    pub fn new(connector: C, config: SessionConfig) -> Result<Self> {
        let session = ProgrammerSession::new(connector, config)?;
        let connection = session.connection().subscribe();
        let (snapshot, _) = watch::channel(SessionSnapshot {
            status: "Disconnected".into(),
            ..Default::default()
        });
        let (connect_requests, _) = watch::channel(0);
        let (disconnect_requests, _) = watch::channel(0);
        Ok(Self {
            session: Mutex::new(session),
            connection,
            snapshot,
            connect_requests,
            disconnect_requests,
        })
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch published state
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    /// Connect to `port` at `baud`
    ///
    /// A newer `connect` call supersedes this one, which then fails with
    /// [`ProgrammerError::Cancelled`]. While a connection is open, including
    /// while an operation is running on it, the call fails at once with
    /// [`ProgrammerError::AlreadyConnected`] and leaves that operation alone.
    pub async fn connect(&self, port: &str, baud: u32) -> Result<()> {
        if *self.connection.borrow() == ConnectionState::Connected {
            log::debug!("Connect to {} refused: already connected", port);
            return Err(ProgrammerError::AlreadyConnected);
        }

        let ticket = next_ticket(&self.connect_requests);
        let mut requests = self.connect_requests.subscribe();
        tokio::select! {
            biased;
            _ = requests.wait_for(|latest| *latest != ticket) => {
                log::debug!("Connect to {} superseded", port);
                Err(ProgrammerError::Cancelled("connect"))
            }
            result = self.connect_locked(port, baud) => result,
        }
    }

    async fn connect_locked(&self, port: &str, baud: u32) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.state() == ConnectionState::Connected {
            let err = ProgrammerError::AlreadyConnected;
            self.publish(&session, format!("Error: {}", err));
            return Err(err);
        }

        self.snapshot.send_modify(|s| {
            s.state = ConnectionState::Connecting;
            s.status = format!("Connecting to {}", port);
        });
        let mut revert = Revert {
            snapshot: &self.snapshot,
            status: "Connect cancelled",
            armed: true,
        };
        let result = session.connect(port, baud).await;
        revert.armed = false;

        self.finish(&session, result, |_| format!("Connected to {}", port))
    }

    /// Disconnect, superseding any earlier pending disconnect
    pub async fn disconnect(&self) -> Result<()> {
        let ticket = next_ticket(&self.disconnect_requests);
        let mut requests = self.disconnect_requests.subscribe();
        tokio::select! {
            biased;
            _ = requests.wait_for(|latest| *latest != ticket) => {
                Err(ProgrammerError::Cancelled("disconnect"))
            }
            _ = self.disconnect_locked() => Ok(()),
        }
    }

    async fn disconnect_locked(&self) {
        let mut session = self.session.lock().await;
        let mut revert = Revert {
            snapshot: &self.snapshot,
            status: "Disconnected",
            armed: true,
        };
        session.disconnect().await;
        revert.armed = false;
        self.publish(&session, "Disconnected".into());
    }

    /// Query programmer status
    pub async fn query_info(&self) -> Result<ProgrammerInfo> {
        let mut session = self.begin("Querying programmer").await;
        let result = session.query_info().await;
        self.finish(&session, result, |info| {
            format!("Programmer firmware {}", info.version)
        })
    }

    /// Upload a wire image
    ///
    /// Progress is published in [`SessionSnapshot::progress`]. Dropping the
    /// returned future after the upload started is not supported; see
    /// [`ProgrammerSession`].
    pub async fn load_data(&self, image: &[u8]) -> Result<()> {
        let mut session = self.begin("Uploading image").await;
        let result = self.load_locked(&mut session, image).await;
        self.finish(&session, result, |_| format!("Uploaded {} bytes", image.len()))
    }

    /// Burn the uploaded image into the EEPROM
    pub async fn burn_eeprom(&self) -> Result<()> {
        let mut session = self.begin("Burning EEPROM").await;
        let result = session.burn_eeprom().await;
        self.finish(&session, result, |_| "EEPROM burned".to_string())
    }

    /// Verify the EEPROM against the uploaded image
    pub async fn verify_eeprom(&self) -> Result<()> {
        let mut session = self.begin("Verifying EEPROM").await;
        let result = session.verify_eeprom().await;
        self.finish(&session, result, |_| "EEPROM verified".to_string())
    }

    /// Upload, burn and (optionally) verify without letting other callers in
    /// between the steps
    pub async fn program(&self, image: &[u8], verify: bool) -> Result<()> {
        let mut session = self.begin("Uploading image").await;
        let result = self.program_locked(&mut session, image, verify).await;
        self.finish(&session, result, |_| {
            if verify {
                "EEPROM programmed and verified".to_string()
            } else {
                "EEPROM programmed".to_string()
            }
        })
    }

    async fn program_locked(
        &self,
        session: &mut ProgrammerSession<C>,
        image: &[u8],
        verify: bool,
    ) -> Result<()> {
        self.load_locked(session, image)
            .await
            .map_err(|e| step_failed(Step::Load, e))?;

        self.set_status("Burning EEPROM");
        session
            .burn_eeprom()
            .await
            .map_err(|e| step_failed(Step::Burn, e))?;

        if verify {
            self.set_status("Verifying EEPROM");
            session
                .verify_eeprom()
                .await
                .map_err(|e| step_failed(Step::Verify, e))?;
        }
        Ok(())
    }

    async fn load_locked(&self, session: &mut ProgrammerSession<C>, image: &[u8]) -> Result<()> {
        let snapshot = &self.snapshot;
        snapshot.send_modify(|s| {
            s.progress = Some(TransferProgress {
                sent: 0,
                total: image.len(),
            })
        });
        session
            .load_data_with_progress(image, |sent, total| {
                snapshot.send_modify(|s| s.progress = Some(TransferProgress { sent, total }));
            })
            .await
    }

    /// Wait for the session and announce the operation
    async fn begin(&self, status: &str) -> MutexGuard<'_, ProgrammerSession<C>> {
        let session = self.session.lock().await;
        self.set_status(status);
        session
    }

    fn set_status(&self, status: &str) {
        self.snapshot.send_modify(|s| s.status = status.to_string());
    }

    /// Publish the outcome of an operation
    fn finish<T>(
        &self,
        session: &ProgrammerSession<C>,
        result: Result<T>,
        done: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        let status = match &result {
            Ok(value) => done(value),
            Err(e) => format!("Error: {}", e),
        };
        self.publish(session, status);
        result
    }

    fn publish(&self, session: &ProgrammerSession<C>, status: String) {
        let state = session.state();
        let info = session.info().cloned();
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.status = status;
            s.info = info;
            s.progress = None;
        });
    }
}

fn next_ticket(requests: &watch::Sender<u64>) -> u64 {
    let mut ticket = 0;
    requests.send_modify(|latest| {
        *latest += 1;
        ticket = *latest;
    });
    ticket
}
