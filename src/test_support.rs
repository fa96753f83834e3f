//! Scripted connector for unit tests.
//!
//! Every transport opened by a [`ScriptedConnector`] answers a written
//! request with the next entry of the connector's shared reply queue.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{HttpError, Result};
use crate::key::ConnectionKey;
use crate::transport::{Connector, Transport};

#[derive(Debug)]
enum Reply {
    Bytes(Vec<u8>),
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
struct Shared {
    replies: Mutex<VecDeque<Reply>>,
    written: Mutex<Vec<u8>>,
    connects: AtomicUsize,
    shutdowns: AtomicUsize,
    live: AtomicUsize,
    max_live: AtomicUsize,
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedConnector {
    shared: Arc<Shared>,
    refusals: Mutex<usize>,
}

impl ScriptedConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a raw response.
    pub(crate) fn reply(&self, bytes: &[u8]) {
        self.shared
            .replies
            .lock()
            .unwrap()
            .push_back(Reply::Bytes(bytes.to_vec()));
    }

    /// Queue a read failure.
    pub(crate) fn fail(&self, kind: io::ErrorKind) {
        self.shared.replies.lock().unwrap().push_back(Reply::Fail(kind));
    }

    /// Refuse the next connect attempt.
    pub(crate) fn refuse_next(&self) {
        *self.refusals.lock().unwrap() += 1;
    }

    pub(crate) fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdowns(&self) -> usize {
        self.shared.shutdowns.load(Ordering::SeqCst)
    }

    /// Most transports open at the same time.
    pub(crate) fn max_live(&self) -> usize {
        self.shared.max_live.load(Ordering::SeqCst)
    }

    /// Everything written so far, as text.
    pub(crate) fn written(&self) -> String {
        String::from_utf8_lossy(&self.shared.written.lock().unwrap()).into_owned()
    }

    /// Number of requests written so far.
    pub(crate) fn requests_written(&self) -> usize {
        self.written().matches(" HTTP/1.1\r\n").count()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, key: &ConnectionKey) -> Result<Box<dyn Transport>> {
        {
            let mut refusals = self.refusals.lock().unwrap();
            if *refusals > 0 {
                *refusals -= 1;
                return Err(HttpError::connect(
                    io::Error::from(io::ErrorKind::ConnectionRefused),
                    key.host(),
                    key.port(),
                ));
            }
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(ScriptedTransport {
            shared: Arc::clone(&self.shared),
            pending: false,
            buffer: VecDeque::new(),
            closed: false,
        }))
    }
}

#[derive(Debug)]
struct ScriptedTransport {
    shared: Arc<Shared>,
    pending: bool,
    buffer: VecDeque<u8>,
    closed: bool,
}

impl Read for ScriptedTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.buffer.is_empty() && self.pending {
            self.pending = false;
            match self.shared.replies.lock().unwrap().pop_front() {
                Some(Reply::Bytes(bytes)) => self.buffer.extend(bytes),
                Some(Reply::Fail(kind)) => return Err(io::Error::from(kind)),
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.buffer.len());
        for (slot, byte) in buf.iter_mut().zip(self.buffer.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.shared.written.lock().unwrap().extend_from_slice(buf);
        self.pending = true;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for ScriptedTransport {
    fn shutdown(&mut self) -> io::Result<()> {
        if !self.closed {
            self.closed = true;
            self.shared.shutdowns.fetch_add(1, Ordering::SeqCst);
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
