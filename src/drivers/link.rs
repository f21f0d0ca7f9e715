use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use crate::drivers::{
    record_queue, AcquisitionError, Endpoint, FrameDecoder, Pop, Record, RecordConsumer,
    RecordProducer,
};

/// Tuning for the read/drain loop pair.
#[derive(Clone, Copy, Debug)]
pub struct LinkConfig {
    pub read_buffer_size: usize,
    pub poll_interval: Duration,
    pub max_pending_bytes: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 1024,
            poll_interval: Duration::from_millis(20),
            max_pending_bytes: 64 * 1024,
        }
    }
}

/// Why the drain loop stopped delivering records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkEnd {
    /// [`SerialLink::stop`] was called.
    Stopped,
    /// The endpoint reached end of stream or was closed.
    Closed,
    /// The read loop hit an I/O error.
    Failed(String),
}

/// Command writer plus a background read loop feeding a background drain loop.
///
/// The read loop never runs consumer code: decoded records go through the queue and are handed to
/// the consumer on the drain thread, so slow record handling cannot stall socket reads.
pub struct SerialLink {
    writer: Box<dyn Endpoint>,
    config: LinkConfig,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl SerialLink {
    /// Takes its own handle on `endpoint`; the caller keeps ownership of the connection.
    pub fn new(endpoint: &dyn Endpoint, config: LinkConfig) -> Result<Self, AcquisitionError> {
        Ok(Self {
            writer: endpoint.try_clone()?,
            config,
            running: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        })
    }

    /// Writes `command` verbatim. Failures are reported, never retried.
    pub fn send(&mut self, command: &str) -> Result<(), AcquisitionError> {
        self.writer.write(command.as_bytes())?;
        debug!("sent {:?}", command);
        Ok(())
    }

    /// Spawns the read and drain loops. `on_record` runs on the drain thread, once per record in
    /// decode order; `on_end` runs there once, after the last record.
    pub fn stream<F, E>(&mut self, on_record: F, on_end: E) -> Result<(), AcquisitionError>
    where
        F: FnMut(Record) + Send + 'static,
        E: FnOnce(LinkEnd) + Send + 'static,
    {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(AcquisitionError::Busy);
        }
        let reader = self.writer.try_clone()?;
        let (producer, consumer) = record_queue();
        let failure = Arc::new(Mutex::new(None));
        let config = self.config;

        let running = Arc::clone(&self.running);
        let read_failure = Arc::clone(&failure);
        let read_handle = thread::Builder::new()
            .name("link-read".into())
            .spawn(move || {
                if let Err(err) = read_loop(reader, producer, &running, config) {
                    warn!("read loop terminated: {err}");
                    *read_failure.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(err.to_string());
                }
            })?;

        let running = Arc::clone(&self.running);
        let drain_handle = thread::Builder::new()
            .name("link-drain".into())
            .spawn(move || {
                let mut on_record = on_record;
                let end = match drain_loop(&consumer, &mut on_record, &running, config.poll_interval)
                {
                    LinkEnd::Closed => {
                        let failed = failure.lock().unwrap_or_else(PoisonError::into_inner).take();
                        failed.map_or(LinkEnd::Closed, LinkEnd::Failed)
                    }
                    other => other,
                };
                running.store(false, Ordering::Release);
                debug!("drain loop finished: {end:?}");
                on_end(end);
            })?;

        self.handles = vec![read_handle, drain_handle];
        Ok(())
    }

    /// Asks both loops to finish. Safe to call from inside `on_record`.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Waits for both loops. Must not be called from the drain thread.
    pub fn join(&mut self) {
        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("link thread panicked");
            }
        }
    }
}

impl Drop for SerialLink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Reads while the endpoint is connected and `running` holds, pushing decoded records in order.
/// Read timeouts only re-check the flags; any other I/O error ends the loop and is returned.
pub fn read_loop(
    mut endpoint: Box<dyn Endpoint>,
    producer: RecordProducer,
    running: &AtomicBool,
    config: LinkConfig,
) -> Result<(), AcquisitionError> {
    let mut decoder = FrameDecoder::new(config.max_pending_bytes);
    let mut buf = vec![0u8; config.read_buffer_size.max(1)];
    while running.load(Ordering::Acquire) && endpoint.is_connected() {
        let n = match endpoint.read(&mut buf) {
            Ok(0) => {
                info!("endpoint reached end of stream");
                break;
            }
            Ok(n) => n,
            Err(err)
                if matches!(
                    err.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                continue
            }
            Err(err) => {
                if !endpoint.is_connected() {
                    // closed underneath us: that is how the loop gets cancelled
                    break;
                }
                return Err(err.into());
            }
        };
        let records = decoder.feed(&buf[..n]).unwrap_or_else(|err| {
            warn!("{err}");
            // lines finished before the overflow still go out now
            decoder.take_ready()
        });
        for record in records {
            if !producer.push(record) {
                debug!("record consumer gone, stopping read loop");
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Pops records with a bounded wait and hands each to `on_record` until stopped or the queue closes.
pub fn drain_loop<F>(
    consumer: &RecordConsumer,
    on_record: &mut F,
    running: &AtomicBool,
    poll_interval: Duration,
) -> LinkEnd
where
    F: FnMut(Record),
{
    loop {
        if !running.load(Ordering::Acquire) {
            return LinkEnd::Stopped;
        }
        match consumer.pop(poll_interval) {
            Pop::Record(record) => on_record(record),
            Pop::Empty => {}
            Pop::Closed => return LinkEnd::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ManualEndpoint;
    use std::sync::mpsc::channel;

    fn collect(endpoint: &ManualEndpoint) -> (Vec<String>, LinkEnd) {
        let mut link = SerialLink::new(endpoint, LinkConfig::default()).unwrap();
        let (tx, rx) = channel();
        let (end_tx, end_rx) = channel();
        link.stream(
            move |record: Record| {
                tx.send(record.into_string()).ok();
            },
            move |end| {
                end_tx.send(end).ok();
            },
        )
        .unwrap();
        let end = end_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        link.join();
        (rx.try_iter().collect(), end)
    }

    #[test]
    fn single_chunk_stream_reaches_consumer_in_order() {
        let endpoint = ManualEndpoint::new();
        endpoint.push_chunk(b"1.0,2.0\n3.0,4.0\ndone\n".to_vec());
        endpoint.hang_up();
        let (records, end) = collect(&endpoint);
        assert_eq!(records, ["1.0,2.0", "3.0,4.0", "done"]);
        assert_eq!(end, LinkEnd::Closed);
    }

    #[test]
    fn byte_by_byte_stream_yields_same_records() {
        let endpoint = ManualEndpoint::new();
        for byte in b"1.0,2.0\n3.0,4.0\ndone\n" {
            endpoint.push_chunk(vec![*byte]);
        }
        endpoint.hang_up();
        let (records, _) = collect(&endpoint);
        assert_eq!(records, ["1.0,2.0", "3.0,4.0", "done"]);
    }

    #[test]
    fn send_writes_command_verbatim() {
        let endpoint = ManualEndpoint::new();
        let mut link = SerialLink::new(&endpoint, LinkConfig::default()).unwrap();
        link.send("CV,-0.5,0.5,50,3\n").unwrap();
        assert_eq!(endpoint.written_text(), "CV,-0.5,0.5,50,3\n");
        endpoint.fail_writes(true);
        assert!(matches!(link.send("CA,0,1,sec\n"), Err(AcquisitionError::Io(_))));
    }

    #[test]
    fn slow_consumer_does_not_block_reader() {
        let endpoint = ManualEndpoint::new();
        for i in 0..50 {
            endpoint.push_chunk(format!("{i},0\n").into_bytes());
        }
        endpoint.hang_up();
        let mut link = SerialLink::new(&endpoint, LinkConfig::default()).unwrap();
        let (tx, rx) = channel();
        let (end_tx, end_rx) = channel();
        link.stream(
            move |record: Record| {
                thread::sleep(Duration::from_millis(2));
                tx.send(record.into_string()).ok();
            },
            move |end| {
                end_tx.send(end).ok();
            },
        )
        .unwrap();
        assert_eq!(end_rx.recv_timeout(Duration::from_secs(5)).unwrap(), LinkEnd::Closed);
        link.join();
        let got: Vec<String> = rx.try_iter().collect();
        assert_eq!(got.len(), 50);
        assert_eq!(got[49], "49,0");
    }

    #[test]
    fn stop_ends_both_loops() {
        let endpoint = ManualEndpoint::new();
        let mut link = SerialLink::new(&endpoint, LinkConfig::default()).unwrap();
        let (end_tx, end_rx) = channel();
        link.stream(|_| {}, move |end| {
            end_tx.send(end).ok();
        })
        .unwrap();
        assert!(link.is_running());
        link.stop();
        assert_eq!(end_rx.recv_timeout(Duration::from_secs(5)).unwrap(), LinkEnd::Stopped);
        link.join();
        assert!(!link.is_running());
    }

    #[test]
    fn records_before_an_overflow_arrive_before_end_of_stream() {
        let endpoint = ManualEndpoint::new();
        endpoint.push_chunk(b"1,2\ndone\n0123456789abcdef".to_vec());
        endpoint.hang_up();
        let config = LinkConfig {
            max_pending_bytes: 8,
            ..LinkConfig::default()
        };
        let mut link = SerialLink::new(&endpoint, config).unwrap();
        let (tx, rx) = channel();
        let (end_tx, end_rx) = channel();
        link.stream(
            move |record: Record| {
                tx.send(record.into_string()).ok();
            },
            move |end| {
                end_tx.send(end).ok();
            },
        )
        .unwrap();
        assert_eq!(end_rx.recv_timeout(Duration::from_secs(5)).unwrap(), LinkEnd::Closed);
        link.join();
        let got: Vec<String> = rx.try_iter().collect();
        assert_eq!(got, ["1,2", "done"]);
    }

    #[test]
    fn closing_endpoint_cancels_read_loop() {
        let endpoint = ManualEndpoint::new();
        let mut link = SerialLink::new(&endpoint, LinkConfig::default()).unwrap();
        let (end_tx, end_rx) = channel();
        link.stream(|_| {}, move |end| {
            end_tx.send(end).ok();
        })
        .unwrap();
        endpoint.clone().close().unwrap();
        assert_eq!(end_rx.recv_timeout(Duration::from_secs(5)).unwrap(), LinkEnd::Closed);
        link.join();
    }
}
