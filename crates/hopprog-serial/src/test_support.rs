//! In-memory programmer for tests
//!
//! [`MockDevice`] records every write and answers through a responder
//! closure. The default responder behaves like a healthy programmer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{ProgrammerError, Result};
use crate::transport::{Connector, Transport};

pub const INFO_JSON: &str = r#"{"version":"2.1.0","free_heap":51200,"uptime":3600}"#;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<String> + Send>;

/// Something that crossed the mock wire, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Write(Vec<u8>),
    Read(String),
}

struct Inner {
    events: Vec<Event>,
    write_times: Vec<Instant>,
    pending: VecDeque<String>,
    responder: Responder,
    fail_writes: bool,
    close_count: usize,
    line_delay: Duration,
}

#[derive(Clone)]
pub struct MockDevice {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                events: Vec::new(),
                write_times: Vec::new(),
                pending: VecDeque::new(),
                responder: healthy_programmer(),
                fail_writes: false,
                close_count: 0,
                line_delay: Duration::ZERO,
            })),
            notify: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// Replace the responder
    pub fn respond_with(&self, f: impl FnMut(&[u8]) -> Vec<String> + Send + 'static) {
        self.lock().responder = Box::new(f);
    }

    /// Delay every line delivery by `delay`
    pub fn set_line_delay(&self, delay: Duration) {
        self.lock().line_delay = delay;
    }

    /// Queue lines as if the device sent them unprompted
    pub fn push_lines<'a>(&self, lines: impl IntoIterator<Item = &'a str>) {
        self.lock()
            .pending
            .extend(lines.into_iter().map(str::to_string));
        self.notify.notify_one();
    }

    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                Event::Write(data) => Some(data.clone()),
                Event::Read(_) => None,
            })
            .collect()
    }

    pub fn write_times(&self) -> Vec<Instant> {
        self.lock().write_times.clone()
    }

    pub fn close_count(&self) -> usize {
        self.lock().close_count
    }
}

/// Responder emulating a well-behaved programmer
pub fn healthy_programmer() -> Responder {
    let mut expecting = 0usize;
    Box::new(move |data: &[u8]| {
        if expecting > 0 {
            expecting = expecting.saturating_sub(data.len());
            return if expecting == 0 {
                vec!["OK".to_string()]
            } else {
                Vec::new()
            };
        }
        let line = String::from_utf8_lossy(data);
        let line = line.trim_end();
        match line {
            "I" => vec![INFO_JSON.to_string()],
            "B" | "V" => vec!["OK".to_string()],
            _ => match line.strip_prefix('L').and_then(|n| n.parse::<usize>().ok()) {
                Some(0) => vec!["GO_AHEAD".to_string(), "OK".to_string()],
                Some(n) => {
                    expecting = n;
                    vec!["GO_AHEAD".to_string()]
                }
                None => vec!["ERR".to_string()],
            },
        }
    })
}

pub struct MockTransport {
    device: MockDevice,
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let replies = {
            let mut inner = self.device.lock();
            if inner.fail_writes {
                return Err(ProgrammerError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "device unplugged",
                )));
            }
            inner.events.push(Event::Write(data.to_vec()));
            inner.write_times.push(Instant::now());
            let replies = (inner.responder)(data);
            inner.pending.extend(replies.iter().cloned());
            replies
        };
        if !replies.is_empty() {
            self.device.notify.notify_one();
        }
        Ok(())
    }

    async fn read_line(&mut self) -> Result<String> {
        loop {
            let (has_line, delay) = {
                let inner = self.device.lock();
                (!inner.pending.is_empty(), inner.line_delay)
            };
            if has_line {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let mut inner = self.device.lock();
                if let Some(line) = inner.pending.pop_front() {
                    inner.events.push(Event::Read(line.clone()));
                    return Ok(line);
                }
            }
            self.device.notify.notified().await;
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.device.lock().close_count += 1;
        Ok(())
    }
}

#[derive(Clone)]
pub struct MockConnector {
    device: MockDevice,
    fail: bool,
    open_delay: Duration,
    opened: Arc<Mutex<Vec<(String, u32)>>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            device: MockDevice::new(),
            fail: false,
            open_delay: Duration::ZERO,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn device(&self) -> &MockDevice {
        &self.device
    }

    pub fn opened(&self) -> Vec<(String, u32)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Transport = MockTransport;

    async fn open(&self, port: &str, baud: u32) -> Result<MockTransport> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        self.opened.lock().unwrap().push((port.to_string(), baud));
        if self.fail {
            return Err(ProgrammerError::TransportError(format!(
                "{}: No such file or directory",
                port
            )));
        }
        Ok(MockTransport {
            device: self.device.clone(),
        })
    }
}
