//! Programmer session: the protocol engine
//!
//! [`ProgrammerSession`] sequences the info query, chunked upload, burn and
//! verify exchanges on top of a [`Connection`]. It must only ever be driven
//! by one caller at a time; [`crate::ProgrammerHandle`] provides the
//! serialization when several tasks share a programmer.
//!
//! # Cancellation
//!
//! Dropping an operation future while it waits for a response is harmless:
//! any late reply is discarded before the next command. Dropping
//! [`ProgrammerSession::load_data`] or [`ProgrammerSession::program`] after
//! the upload has started is not supported. The device is left expecting the
//! rest of the image and has no abort command; the next operation logs a
//! warning, and the device usually needs a reset before it answers again.

use std::time::Duration;

use tokio::time::Instant;

use crate::connection::{Connection, ConnectionState};
use crate::error::{ProgrammerError, Result};
use crate::protocol::{
    load_command, parse_info_line, InfoLine, LoadPhase, ProgrammerInfo, Step, CMD_BURN, CMD_INFO,
    CMD_VERIFY, RESP_OK,
};
use crate::transport::Connector;

/// Default upload chunk size in bytes
pub const DEFAULT_CHUNK_SIZE: usize = 6;
/// Default pause between upload chunks
pub const DEFAULT_CHUNK_DELAY: Duration = Duration::from_millis(30);
/// Default limit on every response wait
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Session tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Bytes per upload write; must not exceed the device receive buffer
    pub chunk_size: usize,
    /// Pause between consecutive upload writes
    pub chunk_delay: Duration,
    /// Limit applied to every response wait
    pub response_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_delay: DEFAULT_CHUNK_DELAY,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Check the configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ProgrammerError::InvalidParameter(
                "chunk size must be at least 1 byte".into(),
            ));
        }
        if self.response_timeout.is_zero() {
            return Err(ProgrammerError::InvalidParameter(
                "response timeout must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Protocol engine for one programmer
pub struct ProgrammerSession<C: Connector> {
    connection: Connection<C>,
    config: SessionConfig,
    info: Option<ProgrammerInfo>,
    /// Set while an upload is on the wire; still set afterwards means the
    /// upload future was dropped part-way
    upload_in_flight: bool,
}

impl<C: Connector> ProgrammerSession<C> {
    /// Create a disconnected session
    pub fn new(connector: C, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connection: Connection::new(connector),
            config,
            info: None,
            upload_in_flight: false,
        })
    }

    /// Underlying connection
    pub fn connection(&self) -> &Connection<C> {
        &self.connection
    }

    /// Connection state
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Last info reported by the programmer
    pub fn info(&self) -> Option<&ProgrammerInfo> {
        self.info.as_ref()
    }

    /// Current configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Replace the configuration
    pub fn set_config(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Open the programmer's port
    pub async fn connect(&mut self, port: &str, baud: u32) -> Result<()> {
        self.connection.connect(port, baud).await?;
        self.upload_in_flight = false;
        Ok(())
    }

    /// Close the port and forget the programmer info
    pub async fn disconnect(&mut self) {
        self.connection.disconnect().await;
        self.info = None;
        self.upload_in_flight = false;
    }

    /// Query programmer status with `I`
    ///
    /// Lines that are not JSON are skipped until a valid info object
    /// arrives or the response timeout runs out.
    pub async fn query_info(&mut self) -> Result<ProgrammerInfo> {
        self.begin_command().await?;
        let result = self.query_info_inner().await;
        self.end_command(result)
    }

    async fn query_info_inner(&mut self) -> Result<ProgrammerInfo> {
        let timeout = self.config.response_timeout;
        self.connection.send_command(CMD_INFO).await?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ProgrammerError::Timeout(timeout));
            }
            let line = match self.connection.await_line(remaining).await {
                Err(ProgrammerError::Timeout(_)) => return Err(ProgrammerError::Timeout(timeout)),
                other => other?,
            };
            match parse_info_line(&line)? {
                InfoLine::Info(info) => {
                    log::info!(
                        "Programmer firmware {} (free heap {} bytes, uptime {}s)",
                        info.version,
                        info.free_heap,
                        info.uptime
                    );
                    self.info = Some(info.clone());
                    return Ok(info);
                }
                InfoLine::Noise => log::debug!("Ignoring non-JSON line: {:?}", line),
            }
        }
    }

    /// Upload a wire image
    pub async fn load_data(&mut self, image: &[u8]) -> Result<()> {
        self.load_data_with_progress(image, |_, _| {}).await
    }

    /// Upload a wire image, reporting `(sent, total)` after every chunk
    pub async fn load_data_with_progress<F>(&mut self, image: &[u8], mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize) + Send,
    {
        self.begin_command().await?;
        let mut phase = LoadPhase::Idle;
        let result = self.run_load(image, &mut phase, &mut progress).await;
        if let Err(e) = &result {
            log::error!("Upload aborted while {:?}: {}", phase, e);
        }
        self.end_command(result)
    }

    async fn run_load<F>(&mut self, image: &[u8], phase: &mut LoadPhase, progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize) + Send,
    {
        let total = image.len();
        let timeout = self.config.response_timeout;

        log::debug!("Uploading {} byte image", total);
        self.connection.send_command(&load_command(total)).await?;
        *phase = LoadPhase::AwaitingGoAhead;

        while !phase.is_terminal() {
            *phase = match *phase {
                LoadPhase::AwaitingGoAhead | LoadPhase::AwaitingOk => {
                    let line = self.connection.await_line(timeout).await;
                    match line.and_then(|line| phase.on_line(&line)) {
                        Ok(next) => next,
                        Err(e) => {
                            *phase = LoadPhase::Failed;
                            return Err(e);
                        }
                    }
                }
                LoadPhase::Transferring => {
                    self.upload_in_flight = true;
                    if let Err(e) = self.send_chunks(image, progress).await {
                        *phase = LoadPhase::Failed;
                        return Err(e);
                    }
                    self.upload_in_flight = false;
                    LoadPhase::AwaitingOk
                }
                LoadPhase::Idle | LoadPhase::Done | LoadPhase::Failed => break,
            };
        }

        log::info!("Uploaded {} bytes", total);
        Ok(())
    }

    async fn send_chunks<F>(&mut self, image: &[u8], progress: &mut F) -> Result<()>
    where
        F: FnMut(usize, usize) + Send,
    {
        let total = image.len();
        let mut sent = 0;
        for (i, chunk) in image.chunks(self.config.chunk_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.config.chunk_delay).await;
            }
            self.connection.write_bytes(chunk).await?;
            sent += chunk.len();
            progress(sent, total);
        }
        Ok(())
    }

    /// Burn the uploaded image into the EEPROM with `B`
    pub async fn burn_eeprom(&mut self) -> Result<()> {
        self.simple_command(CMD_BURN).await?;
        log::info!("EEPROM burned");
        Ok(())
    }

    /// Verify the EEPROM against the uploaded image with `V`
    pub async fn verify_eeprom(&mut self) -> Result<()> {
        self.simple_command(CMD_VERIFY).await?;
        log::info!("EEPROM verified");
        Ok(())
    }

    /// Upload, burn and (optionally) verify
    ///
    /// Stops at the first failing step and reports it; nothing is rolled
    /// back because the device has no way to undo a burn.
    pub async fn program<F>(&mut self, image: &[u8], verify: bool, progress: F) -> Result<()>
    where
        F: FnMut(usize, usize) + Send,
    {
        self.load_data_with_progress(image, progress)
            .await
            .map_err(|e| step_failed(Step::Load, e))?;
        self.burn_eeprom()
            .await
            .map_err(|e| step_failed(Step::Burn, e))?;
        if verify {
            self.verify_eeprom()
                .await
                .map_err(|e| step_failed(Step::Verify, e))?;
        }
        Ok(())
    }

    /// Send a one-letter command and expect exactly `OK`
    async fn simple_command(&mut self, command: &str) -> Result<()> {
        self.begin_command().await?;
        let result = self.simple_command_inner(command).await;
        self.end_command(result)
    }

    async fn simple_command_inner(&mut self, command: &str) -> Result<()> {
        self.connection.send_command(command).await?;
        let line = self
            .connection
            .await_line(self.config.response_timeout)
            .await?;
        if line == RESP_OK {
            Ok(())
        } else {
            Err(ProgrammerError::UnexpectedResponse(line))
        }
    }

    /// Common checks before any command touches the transport
    async fn begin_command(&mut self) -> Result<()> {
        self.connection.ensure_connected()?;
        if self.upload_in_flight {
            log::warn!("A previous upload was interrupted; the programmer may need a reset");
            self.upload_in_flight = false;
        }
        let stale = self.connection.discard_pending().await;
        self.end_command(stale).map(|_| ())
    }

    /// Forget the programmer info once the connection has dropped
    fn end_command<T>(&mut self, result: Result<T>) -> Result<T> {
        if self.connection.state() == ConnectionState::Disconnected {
            self.info = None;
        }
        result
    }
}

pub(crate) fn step_failed(step: Step, source: ProgrammerError) -> ProgrammerError {
    match source {
        // Usage errors are reported as-is; nothing was attempted
        ProgrammerError::NotConnected => ProgrammerError::NotConnected,
        source => ProgrammerError::StepFailed {
            step,
            source: Box::new(source),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Event, MockConnector, INFO_JSON};

    async fn connected() -> (ProgrammerSession<MockConnector>, MockConnector) {
        let connector = MockConnector::new();
        let mut session = ProgrammerSession::new(connector.clone(), SessionConfig::default()).unwrap();
        session.connect("/dev/ttyMOCK0", 115200).await.unwrap();
        (session, connector)
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len as u8).collect()
    }

    #[test]
    fn test_config_validation() {
        let config = SessionConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(matches!(
            ProgrammerSession::new(MockConnector::new(), config),
            Err(ProgrammerError::InvalidParameter(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_info() {
        let (mut session, connector) = connected().await;

        let info = session.query_info().await.unwrap();
        assert_eq!(info.version, "2.1.0");
        assert_eq!(info.free_heap, 51200);
        assert_eq!(info.uptime, 3600);
        assert_eq!(session.info(), Some(&info));
        assert_eq!(connector.device().writes(), vec![b"I\n".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_info_skips_noise() {
        let (mut session, connector) = connected().await;
        connector.device().respond_with(|_| {
            vec![
                "ets Jun  8 2016 00:22:57".to_string(),
                "{not json".to_string(),
                INFO_JSON.to_string(),
            ]
        });

        let info = session.query_info().await.unwrap();
        assert_eq!(info.version, "2.1.0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_info_wrong_shape() {
        let (mut session, connector) = connected().await;
        connector
            .device()
            .respond_with(|_| vec![r#"{"version":"2.1.0"}"#.to_string()]);

        assert!(matches!(
            session.query_info().await,
            Err(ProgrammerError::DecodeError(_))
        ));
        assert_eq!(session.state(), ConnectionState::Connected);
        assert!(session.info().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_info_timeout() {
        let (mut session, connector) = connected().await;
        connector
            .device()
            .respond_with(|_| vec!["still booting".to_string()]);

        let start = Instant::now();
        let err = session.query_info().await.unwrap_err();
        assert!(matches!(err, ProgrammerError::Timeout(t) if t == DEFAULT_RESPONSE_TIMEOUT));
        assert!(start.elapsed() >= DEFAULT_RESPONSE_TIMEOUT);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_data_chunks() {
        let (mut session, connector) = connected().await;
        let data = image(13);

        let mut reports = Vec::new();
        session
            .load_data_with_progress(&data, |sent, total| reports.push((sent, total)))
            .await
            .unwrap();

        let writes = connector.device().writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0], b"L13\n".to_vec());
        assert_eq!(writes[1], data[0..6].to_vec());
        assert_eq!(writes[2], data[6..12].to_vec());
        assert_eq!(writes[3], data[12..13].to_vec());
        assert_eq!(reports, vec![(6, 13), (12, 13), (13, 13)]);

        let times = connector.device().write_times();
        assert!(times[2] - times[1] >= DEFAULT_CHUNK_DELAY);
        assert!(times[3] - times[2] >= DEFAULT_CHUNK_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_data_rejected() {
        let (mut session, connector) = connected().await;
        connector.device().respond_with(|_| vec!["ERR".to_string()]);

        match session.load_data(&image(13)).await {
            Err(ProgrammerError::UnexpectedResponse(line)) => assert_eq!(line, "ERR"),
            other => panic!("expected UnexpectedResponse, got {:?}", other),
        }
        // Nothing but the command went out
        assert_eq!(connector.device().writes(), vec![b"L13\n".to_vec()]);
        assert_eq!(session.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_data_bad_final_response() {
        let (mut session, connector) = connected().await;
        let mut received = 0;
        connector.device().respond_with(move |data| {
            if data.starts_with(b"L") {
                return vec!["GO_AHEAD".to_string()];
            }
            received += data.len();
            if received == 13 {
                vec!["CRC".to_string()]
            } else {
                Vec::new()
            }
        });

        assert!(matches!(
            session.load_data(&image(13)).await,
            Err(ProgrammerError::UnexpectedResponse(line)) if line == "CRC"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_data_missing_ok_times_out() {
        let (mut session, connector) = connected().await;
        connector.device().respond_with(|data| {
            if data.starts_with(b"L") {
                vec!["GO_AHEAD".to_string()]
            } else {
                Vec::new()
            }
        });

        assert!(matches!(
            session.load_data(&image(7)).await,
            Err(ProgrammerError::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_empty_image() {
        let (mut session, connector) = connected().await;
        session.load_data(&[]).await.unwrap();
        assert_eq!(connector.device().writes(), vec![b"L0\n".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burn_and_verify() {
        let (mut session, connector) = connected().await;
        session.burn_eeprom().await.unwrap();
        session.verify_eeprom().await.unwrap();
        assert_eq!(
            connector.device().writes(),
            vec![b"B\n".to_vec(), b"V\n".to_vec()]
        );

        connector
            .device()
            .respond_with(|_| vec!["VERIFY_FAIL 0x0C".to_string()]);
        assert!(matches!(
            session.verify_eeprom().await,
            Err(ProgrammerError::UnexpectedResponse(line)) if line == "VERIFY_FAIL 0x0C"
        ));
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let connector = MockConnector::new();
        let mut session = ProgrammerSession::new(connector.clone(), SessionConfig::default()).unwrap();

        assert!(matches!(
            session.burn_eeprom().await,
            Err(ProgrammerError::NotConnected)
        ));
        assert!(matches!(
            session.verify_eeprom().await,
            Err(ProgrammerError::NotConnected)
        ));
        assert!(matches!(
            session.query_info().await,
            Err(ProgrammerError::NotConnected)
        ));
        assert!(matches!(
            session.load_data(&image(4)).await,
            Err(ProgrammerError::NotConnected)
        ));
        assert!(connector.device().writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_program_workflow() {
        let (mut session, connector) = connected().await;
        session.program(&image(8), true, |_, _| {}).await.unwrap();

        let writes = connector.device().writes();
        assert_eq!(writes.first(), Some(&b"L8\n".to_vec()));
        assert_eq!(&writes[writes.len() - 2..], &[b"B\n".to_vec(), b"V\n".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_program_stops_at_failed_burn() {
        let (mut session, connector) = connected().await;
        let mut inner = crate::test_support::healthy_programmer();
        connector.device().respond_with(move |data| {
            if data == b"B\n" {
                vec!["BURN_ERR".to_string()]
            } else {
                inner(data)
            }
        });

        match session.program(&image(8), true, |_, _| {}).await {
            Err(ProgrammerError::StepFailed { step, source }) => {
                assert_eq!(step, Step::Burn);
                assert!(matches!(*source, ProgrammerError::UnexpectedResponse(_)));
            }
            other => panic!("expected burn failure, got {:?}", other),
        }
        // Verify was never attempted
        assert!(!connector.device().writes().contains(&b"V\n".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_lines_discarded() {
        let (mut session, connector) = connected().await;
        connector.device().push_lines(["OK"]);

        connector.device().respond_with(|_| vec!["NOPE".to_string()]);
        // Without discarding, the stale OK would be taken as the burn reply
        assert!(matches!(
            session.burn_eeprom().await,
            Err(ProgrammerError::UnexpectedResponse(line)) if line == "NOPE"
        ));
        assert!(connector
            .device()
            .events()
            .contains(&Event::Read("OK".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failure_clears_info() {
        let (mut session, connector) = connected().await;
        session.query_info().await.unwrap();

        connector.device().fail_writes();
        let err = session.burn_eeprom().await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(session.info().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_info() {
        let (mut session, _connector) = connected().await;
        session.query_info().await.unwrap();
        session.disconnect().await;
        assert!(session.info().is_none());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }
}
