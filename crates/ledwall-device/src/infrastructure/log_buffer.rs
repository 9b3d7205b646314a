//! Bounded in-memory log capture for GET_LOGS.
//!
//! [`LogBuffer`] is a `tracing_subscriber` writer: the device binary tees
//! its formatted log output into it, and the command handler drains it
//! when the server asks for logs.  Once full, the oldest bytes are dropped.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing_subscriber::fmt::MakeWriter;

use crate::application::handle_commands::LogSource;

/// Default capacity in bytes.
pub const LOG_BUFFER_SIZE: usize = 4096;

/// Cheaply cloneable handle to one shared ring of log bytes.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    bytes: Arc<Mutex<VecDeque<u8>>>,
    capacity: usize,
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(LOG_BUFFER_SIZE)
    }
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut bytes = self.lock();
        let keep = buf.len().min(self.capacity);
        let incoming = &buf[buf.len() - keep..];
        let overflow = (bytes.len() + incoming.len()).saturating_sub(self.capacity);
        bytes.drain(..overflow);
        bytes.extend(incoming);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl LogSource for LogBuffer {
    fn drain(&self) -> String {
        let bytes: Vec<u8> = self.lock().drain(..).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}
