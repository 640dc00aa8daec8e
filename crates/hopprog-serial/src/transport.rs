//! Transport layer abstraction for programmer communication
//!
//! A transport is a duplex byte stream with line-delimited reads. The
//! programmer has no framing beyond `\n`, so both implementations here share
//! [`LineBuffer`] to split the incoming byte stream.

use async_trait::async_trait;

use crate::error::{ProgrammerError, Result};

/// Duplex byte channel with line reads
#[async_trait]
pub trait Transport: Send {
    /// Write raw bytes
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Write a line followed by `\n`
    async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.write(&buf).await
    }

    /// Read the next non-empty line, without its terminator
    ///
    /// Must be cancel-safe: dropping the future before it completes loses no
    /// data, so callers can race it against a timeout.
    async fn read_line(&mut self) -> Result<String>;

    /// Close the transport
    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data).await
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        (**self).write_line(line).await
    }

    async fn read_line(&mut self) -> Result<String> {
        (**self).read_line().await
    }

    async fn close(&mut self) -> Result<()> {
        (**self).close().await
    }
}

/// Opens transports
///
/// The connection owns a connector and asks it for a fresh transport on
/// every connect.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport produced by this connector
    type Transport: Transport + 'static;

    /// Open `port` at `baud`
    async fn open(&self, port: &str, baud: u32) -> Result<Self::Transport>;
}

/// Splits a byte stream into trimmed, non-empty lines
///
/// Bytes are accumulated until a `\n` arrives. A trailing `\r` and
/// surrounding whitespace are stripped and blank lines are dropped.
/// Invalid UTF-8 is replaced rather than rejected so that a corrupted line
/// surfaces as an unexpected response instead of a transport failure.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Take the next complete line, if any
    pub fn next_line(&mut self) -> Option<String> {
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                return Some(line.to_string());
            }
        }
        None
    }

    /// Bytes received after the last complete line
    pub fn partial_len(&self) -> usize {
        self.pending.len()
    }
}

pub mod serial {
    //! Serial port transport implementation

    use super::*;
    use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
    use std::io::{Read, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::thread::JoinHandle;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Poll interval of the reader thread; bounds how long close() waits
    const READ_POLL: Duration = Duration::from_millis(50);

    /// Serial port transport
    ///
    /// Reads happen on a dedicated thread that splits the stream into lines
    /// and hands them over a channel, which keeps `read_line` cancel-safe.
    /// Writes run on tokio's blocking pool.
    pub struct SerialTransport {
        port: Arc<Mutex<Box<dyn SerialPort>>>,
        lines: mpsc::UnboundedReceiver<Result<String>>,
        stop: Arc<AtomicBool>,
        reader: Option<JoinHandle<()>>,
        device: String,
    }

    impl SerialTransport {
        /// Open a serial port at the given baud rate (8N1, no flow control)
        pub async fn open(device: &str, baud: u32) -> Result<Self> {
            let path = device.to_string();
            let (port, reader_port) = tokio::task::spawn_blocking(move || {
                let port = serialport::new(&path, baud)
                    .data_bits(DataBits::Eight)
                    .parity(Parity::None)
                    .stop_bits(StopBits::One)
                    .flow_control(FlowControl::None)
                    .timeout(READ_POLL)
                    .open()?;
                port.clear(ClearBuffer::Input)?;
                let reader_port = port.try_clone()?;
                Ok::<_, ProgrammerError>((port, reader_port))
            })
            .await
            .map_err(|e| ProgrammerError::TransportError(e.to_string()))??;

            let (tx, rx) = mpsc::unbounded_channel();
            let stop = Arc::new(AtomicBool::new(false));
            let reader = {
                let stop = Arc::clone(&stop);
                std::thread::Builder::new()
                    .name("hopprog-serial-rx".into())
                    .spawn(move || reader_loop(reader_port, tx, stop))?
            };

            log::info!("Opened serial port {} at {} baud", device, baud);

            Ok(Self {
                port: Arc::new(Mutex::new(port)),
                lines: rx,
                stop,
                reader: Some(reader),
                device: device.to_string(),
            })
        }

        /// Device path this transport was opened on
        pub fn device(&self) -> &str {
            &self.device
        }
    }

    fn reader_loop(
        mut port: Box<dyn SerialPort>,
        tx: mpsc::UnboundedSender<Result<String>>,
        stop: Arc<AtomicBool>,
    ) {
        let mut lines = LineBuffer::new();
        let mut buf = [0u8; 256];

        while !stop.load(Ordering::Relaxed) {
            match port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    lines.push(&buf[..n]);
                    while let Some(line) = lines.next_line() {
                        log::trace!("serial: << {}", line);
                        if tx.send(Ok(line)).is_err() {
                            return;
                        }
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(Err(ProgrammerError::from(e)));
                    return;
                }
            }
        }
    }

    #[async_trait]
    impl Transport for SerialTransport {
        async fn write(&mut self, data: &[u8]) -> Result<()> {
            let port = Arc::clone(&self.port);
            let data = data.to_vec();
            tokio::task::spawn_blocking(move || {
                let mut port = port
                    .lock()
                    .map_err(|_| ProgrammerError::TransportError("serial port lock poisoned".into()))?;
                port.write_all(&data)?;
                port.flush()?;
                Ok(())
            })
            .await
            .map_err(|e| ProgrammerError::TransportError(e.to_string()))?
        }

        async fn read_line(&mut self) -> Result<String> {
            match self.lines.recv().await {
                Some(line) => line,
                None => Err(ProgrammerError::TransportError(format!(
                    "{}: reader stopped",
                    self.device
                ))),
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.stop.store(true, Ordering::Relaxed);
            if let Some(reader) = self.reader.take() {
                tokio::task::spawn_blocking(move || reader.join())
                    .await
                    .map_err(|e| ProgrammerError::TransportError(e.to_string()))?
                    .map_err(|_| ProgrammerError::TransportError("reader thread panicked".into()))?;
            }
            log::info!("Closed serial port {}", self.device);
            Ok(())
        }
    }

    impl Drop for SerialTransport {
        fn drop(&mut self) {
            self.stop.store(true, Ordering::Relaxed);
        }
    }
}

pub mod tcp {
    //! TCP socket transport implementation
    //!
    //! Useful for programmers exposed through a serial-to-network bridge
    //! (ser2net and similar).

    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    /// TCP socket transport
    pub struct TcpTransport {
        stream: TcpStream,
        lines: LineBuffer,
        addr: String,
    }

    impl TcpTransport {
        /// Connect to a bridge at the specified host and port
        pub async fn connect(host: &str, port: u16) -> Result<Self> {
            let addr = format!("{}:{}", host, port);
            log::info!("Connecting to programmer bridge at {}", addr);

            let stream = TcpStream::connect(&addr)
                .await
                .map_err(|e| ProgrammerError::TransportError(format!("{}: {}", addr, e)))?;

            // Set TCP_NODELAY so small chunks go out immediately
            stream.set_nodelay(true).map_err(|e| {
                ProgrammerError::TransportError(format!("Failed to set TCP_NODELAY: {}", e))
            })?;

            log::info!("Connected to programmer bridge at {}", addr);

            Ok(Self {
                stream,
                lines: LineBuffer::new(),
                addr,
            })
        }
    }

    #[async_trait]
    impl Transport for TcpTransport {
        async fn write(&mut self, data: &[u8]) -> Result<()> {
            self.stream.write_all(data).await?;
            self.stream.flush().await?;
            Ok(())
        }

        async fn read_line(&mut self) -> Result<String> {
            loop {
                if let Some(line) = self.lines.next_line() {
                    log::trace!("tcp: << {}", line);
                    return Ok(line);
                }
                let mut buf = [0u8; 256];
                let n = self.stream.read(&mut buf).await?;
                if n == 0 {
                    return Err(ProgrammerError::TransportError(format!(
                        "{}: connection closed by peer",
                        self.addr
                    )));
                }
                self.lines.push(&buf[..n]);
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.stream.shutdown().await?;
            log::info!("Closed connection to {}", self.addr);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_splits_lines() {
        let mut lines = LineBuffer::new();
        lines.push(b"GO_A");
        assert_eq!(lines.next_line(), None);
        lines.push(b"HEAD\r\nOK\n{\"ver");
        assert_eq!(lines.next_line().as_deref(), Some("GO_AHEAD"));
        assert_eq!(lines.next_line().as_deref(), Some("OK"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.partial_len(), 5);
    }

    #[test]
    fn test_line_buffer_drops_blank_lines() {
        let mut lines = LineBuffer::new();
        lines.push(b"\r\n\n  \nOK\n");
        assert_eq!(lines.next_line().as_deref(), Some("OK"));
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.partial_len(), 0);
    }

    #[tokio::test]
    async fn test_tcp_transport_lines() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let bridge = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut command = [0u8; 2];
            socket.read_exact(&mut command).await.unwrap();
            assert_eq!(&command, b"I\n");

            socket.write_all(b"GO_A").await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            socket.write_all(b"HEAD\r\n\r\nOK\n").await.unwrap();
            // Dropping the socket closes the connection
        });

        let mut transport = tcp::TcpTransport::connect("127.0.0.1", port).await.unwrap();
        transport.write_line("I").await.unwrap();
        assert_eq!(transport.read_line().await.unwrap(), "GO_AHEAD");
        assert_eq!(transport.read_line().await.unwrap(), "OK");
        bridge.await.unwrap();

        assert!(matches!(
            transport.read_line().await,
            Err(ProgrammerError::TransportError(_))
        ));
    }

    #[test]
    fn test_line_buffer_lossy_utf8() {
        let mut lines = LineBuffer::new();
        lines.push(b"O\xFFK\n");
        assert_eq!(lines.next_line().as_deref(), Some("O\u{FFFD}K"));
    }
}
