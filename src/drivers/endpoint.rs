use std::collections::VecDeque;
use std::io::{self, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serialport::SerialPort;

/// A connected byte-stream to the instrument.
///
/// `read` may block until bytes arrive, the endpoint closes, or an implementation-defined timeout
/// elapses (reported as [`ErrorKind::TimedOut`] so loops can re-check their cancellation flag).
/// `Ok(0)` means end of stream. Handles produced by [`Endpoint::try_clone`] share the underlying
/// connection, so closing any of them closes all of them.
pub trait Endpoint: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    fn is_connected(&self) -> bool;
    fn close(&mut self) -> io::Result<()>;
    fn try_clone(&self) -> io::Result<Box<dyn Endpoint>>;
}

/// Serial port endpoint. Radio links (RFCOMM and friends) show up as ordinary serial devices.
pub struct SerialEndpoint {
    port: Box<dyn SerialPort>,
    open: Arc<AtomicBool>,
}

impl SerialEndpoint {
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> io::Result<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(read_timeout)
            .open()
            .map_err(io::Error::from)?;
        Ok(Self {
            port,
            open: Arc::new(AtomicBool::new(true)),
        })
    }
    pub fn port_name(&self) -> Option<String> {
        self.port.name()
    }
}

impl Endpoint for SerialEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ErrorKind::NotConnected.into());
        }
        self.port.read(buf)
    }
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(ErrorKind::NotConnected.into());
        }
        self.port.write_all(bytes)?;
        self.port.flush()
    }
    fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }
    fn close(&mut self) -> io::Result<()> {
        // the OS handle goes away when the last clone is dropped
        self.open.store(false, Ordering::Release);
        Ok(())
    }
    fn try_clone(&self) -> io::Result<Box<dyn Endpoint>> {
        let port = self.port.try_clone().map_err(io::Error::from)?;
        Ok(Box::new(SerialEndpoint {
            port,
            open: Arc::clone(&self.open),
        }))
    }
}

/// Produces the chunks an endpoint should yield in reply to one write.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct ManualState {
    incoming: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    closed: bool,
    hung_up: bool,
    fail_writes: bool,
}

struct ManualShared {
    state: Mutex<ManualState>,
    arrived: Condvar,
    responder: Mutex<Option<Responder>>,
}

/// In-memory endpoint for tests and deterministic playback.
///
/// Reads hand out queued chunks in order (never merging two chunks into one read); writes are
/// recorded and passed to the optional responder, whose chunks are queued for reading.
#[derive(Clone)]
pub struct ManualEndpoint {
    shared: Arc<ManualShared>,
    read_timeout: Duration,
}

impl Default for ManualEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualEndpoint {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(ManualShared {
                state: Mutex::new(ManualState::default()),
                arrived: Condvar::new(),
                responder: Mutex::new(None),
            }),
            read_timeout: Duration::from_millis(20),
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_responder(self, responder: Responder) -> Self {
        *lock(&self.shared.responder) = Some(responder);
        self
    }

    /// Queues `chunks` to be read after the next write (the command).
    pub fn reply_once(self, chunks: Vec<Vec<u8>>) -> Self {
        let mut pending = Some(chunks);
        self.with_responder(Box::new(move |_| pending.take().unwrap_or_default()))
    }

    pub fn push_chunk(&self, bytes: impl Into<Vec<u8>>) {
        lock(&self.shared.state).incoming.push_back(bytes.into());
        self.shared.arrived.notify_all();
    }

    /// Ends the stream once queued chunks have been read, like a peer closing its side.
    pub fn hang_up(&self) {
        lock(&self.shared.state).hung_up = true;
        self.shared.arrived.notify_all();
    }

    pub fn fail_writes(&self, fail: bool) {
        lock(&self.shared.state).fail_writes = fail;
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.shared.state).written.clone()
    }

    pub fn written_text(&self) -> String {
        String::from_utf8_lossy(&self.written()).into_owned()
    }
}

impl Endpoint for ManualEndpoint {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = lock(&self.shared.state);
        loop {
            if state.closed {
                return Ok(0);
            }
            if let Some(mut chunk) = state.incoming.pop_front() {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                if n < chunk.len() {
                    state.incoming.push_front(chunk.split_off(n));
                }
                return Ok(n);
            }
            if state.hung_up {
                return Ok(0);
            }
            let (guard, wait) = self
                .shared
                .arrived
                .wait_timeout(state, self.read_timeout)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
            if wait.timed_out() && state.incoming.is_empty() && !state.closed && !state.hung_up {
                return Err(ErrorKind::TimedOut.into());
            }
        }
    }

    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return Err(ErrorKind::NotConnected.into());
            }
            if state.fail_writes {
                return Err(ErrorKind::BrokenPipe.into());
            }
            state.written.extend_from_slice(bytes);
        }
        let replies = match lock(&self.shared.responder).as_mut() {
            Some(responder) => responder(bytes),
            None => Vec::new(),
        };
        if !replies.is_empty() {
            lock(&self.shared.state).incoming.extend(replies);
            self.shared.arrived.notify_all();
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = lock(&self.shared.state);
        !state.closed
    }

    fn close(&mut self) -> io::Result<()> {
        lock(&self.shared.state).closed = true;
        self.shared.arrived.notify_all();
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Endpoint>> {
        Ok(Box::new(self.clone()))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
