//! Transport seam.
//!
//! The connection manager never touches sockets. The host owns the real
//! connection (a browser WebSocket, a tungstenite stream, ...), implements
//! [`Transport`] for the outgoing half, and feeds incoming events back through
//! `ConnectionManager::handle_open`, `handle_frame`, `handle_close` and
//! `handle_error`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::TransportError;

/// Close code for an intentional shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Outgoing half of a text-frame transport.
///
/// Implementations must not call back into the connection manager
/// synchronously from these methods; report events on the next turn.
pub trait Transport {
    /// Begin opening a connection to `url`. Completion is reported later via
    /// `handle_open`; an `Err` here means the attempt failed immediately.
    fn open(&mut self, url: &str) -> Result<(), TransportError>;

    /// Write one text frame.
    fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// Close the current connection, if any.
    fn close(&mut self, code: u16, reason: &str);
}

/// Details of a transport close event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseFrame {
    pub fn normal() -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: String::new(),
            was_clean: true,
        }
    }

    /// Abnormal closure (1006), as reported when the peer vanishes.
    pub fn abnormal() -> Self {
        Self {
            code: 1006,
            reason: String::new(),
            was_clean: false,
        }
    }
}

/// In-memory transport that records everything written to it.
///
/// Clones share the same log, so a copy can be kept for inspection after the
/// original is handed to the connection manager.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    log: Rc<RefCell<MemoryLog>>,
}

#[derive(Debug, Default)]
struct MemoryLog {
    opens: Vec<String>,
    frames: Vec<String>,
    closes: Vec<u16>,
    fail_next_open: Option<String>,
    fail_sends: bool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// URLs passed to `open`, in order.
    pub fn opens(&self) -> Vec<String> {
        self.log.borrow().opens.clone()
    }

    /// Frames written, in order.
    pub fn frames(&self) -> Vec<String> {
        self.log.borrow().frames.clone()
    }

    /// Frames written, parsed as JSON.
    pub fn frames_json(&self) -> Vec<serde_json::Value> {
        self.log
            .borrow()
            .frames
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// `type` field of every frame written.
    pub fn frame_types(&self) -> Vec<String> {
        self.frames_json()
            .iter()
            .filter_map(|v| v.get("type").and_then(|t| t.as_str()).map(str::to_string))
            .collect()
    }

    pub fn closes(&self) -> Vec<u16> {
        self.log.borrow().closes.clone()
    }

    pub fn clear_frames(&self) {
        self.log.borrow_mut().frames.clear();
    }

    /// Make the next `open` fail with `reason`.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        self.log.borrow_mut().fail_next_open = Some(reason.into());
    }

    /// Make every `send` fail until turned off.
    pub fn set_fail_sends(&self, fail: bool) {
        self.log.borrow_mut().fail_sends = fail;
    }
}

impl Transport for MemoryTransport {
    fn open(&mut self, url: &str) -> Result<(), TransportError> {
        let mut log = self.log.borrow_mut();
        log.opens.push(url.to_string());
        match log.fail_next_open.take() {
            Some(reason) => Err(TransportError::Open(reason)),
            None => Ok(()),
        }
    }

    fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        let mut log = self.log.borrow_mut();
        if log.fail_sends {
            return Err(TransportError::Send("write failed".to_string()));
        }
        log.frames.push(frame.to_string());
        Ok(())
    }

    fn close(&mut self, code: u16, _reason: &str) {
        self.log.borrow_mut().closes.push(code);
    }
}
