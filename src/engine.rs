// src/engine.rs
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::connection::ConnectionManager;
use crate::drivers::{
    AcquisitionError, Endpoint, LinkConfig, LinkEnd, Record, SerialLink, ZeroPhaseFilter,
};
use crate::recorder::Persistence;
use crate::settings::ConfigProvider;
use crate::types::*;

type RecordListener = Arc<dyn Fn(&Record) + Send + Sync>;
type StateListener = Arc<dyn Fn(SessionState) + Send + Sync>;

struct Inner {
    connection: Arc<ConnectionManager>,
    settings: Box<dyn ConfigProvider>,
    persistence: Box<dyn Persistence>,
    link_config: LinkConfig,
    state: Mutex<SessionState>,
    config: Mutex<Option<SessionConfig>>,
    link: Mutex<Option<SerialLink>>,
    raw: Mutex<Vec<RawSample>>,
    filtered: Mutex<Vec<FilteredSample>>,
    last_error: Mutex<Option<String>>,
    record_listeners: Mutex<Vec<RecordListener>>,
    state_listeners: Mutex<Vec<StateListener>>,
}

/// Drives one command/stream/filter/persist cycle at a time.
///
/// `Idle → Connecting → Sending → Streaming → Completing → Idle`, with `Error` (followed straight
/// away by `Idle`) reachable from every active state. Starting while a run is active is rejected.
pub struct MeasurementSession {
    inner: Arc<Inner>,
}

impl MeasurementSession {
    pub fn new(
        connection: Arc<ConnectionManager>,
        settings: impl ConfigProvider + 'static,
        persistence: impl Persistence + 'static,
    ) -> Self {
        Self::with_link_config(connection, settings, persistence, LinkConfig::default())
    }

    pub fn with_link_config(
        connection: Arc<ConnectionManager>,
        settings: impl ConfigProvider + 'static,
        persistence: impl Persistence + 'static,
        link_config: LinkConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection,
                settings: Box::new(settings),
                persistence: Box::new(persistence),
                link_config,
                state: Mutex::new(SessionState::Idle),
                config: Mutex::new(None),
                link: Mutex::new(None),
                raw: Mutex::new(Vec::new()),
                filtered: Mutex::new(Vec::new()),
                last_error: Mutex::new(None),
                record_listeners: Mutex::new(Vec::new()),
                state_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connects if needed, sends the command for `kind` and starts streaming.
    ///
    /// Returns once the instrument is streaming; completion happens in the background. On
    /// failure the session is back in `Idle` when this returns, and samples already collected
    /// by an earlier run are left alone only if the failure happened before the run began.
    pub fn start_measurement(
        &self,
        kind: MeasurementType,
        address: &str,
    ) -> Result<(), AcquisitionError> {
        let inner = &self.inner;
        let (config, first) = {
            let mut state = lock(&inner.state);
            if state.is_active() {
                warn!("start rejected: session is {}", *state);
                return Err(AcquisitionError::Busy);
            }
            let config = SessionConfig {
                measurement_type: kind,
                ..inner.settings.load()?
            };
            let first = if inner.connection.is_connected() {
                SessionState::Sending
            } else {
                SessionState::Connecting
            };
            *state = first;
            (config, first)
        };
        inner.announce(SessionState::Idle, first);

        // a finished run's loops may still be winding down
        let previous = lock(&inner.link).take();
        if let Some(mut previous) = previous {
            previous.stop();
            previous.join();
        }
        lock(&inner.raw).clear();
        lock(&inner.filtered).clear();
        *lock(&inner.last_error) = None;
        *lock(&inner.config) = Some(config.clone());
        info!("starting {} measurement", kind);

        let endpoint = match inner.acquire_endpoint(first, address) {
            Ok(endpoint) => endpoint,
            Err(err) => return Err(inner.abort(err)),
        };
        let mut link = match SerialLink::new(endpoint.as_ref(), inner.link_config) {
            Ok(link) => link,
            Err(err) => return Err(inner.abort(err)),
        };
        let command = config.command();
        if let Err(err) = link.send(&command) {
            return Err(inner.abort(err));
        }
        info!("sent {}", command.trim_end());
        if !inner.advance(SessionState::Sending, SessionState::Streaming) {
            return Err(AcquisitionError::Cancelled);
        }

        let on_record = {
            let inner = Arc::clone(inner);
            move |record: Record| inner.handle_record(record)
        };
        let on_end = {
            let inner = Arc::clone(inner);
            move |end: LinkEnd| inner.handle_end(end)
        };
        // hold the slot while spawning so a stop cannot miss this link
        let mut slot = lock(&inner.link);
        if let Err(err) = link.stream(on_record, on_end) {
            drop(slot);
            return Err(inner.abort(err));
        }
        *slot = Some(link);
        Ok(())
    }

    /// Abandons the active run: closes the connection and forces `Idle`.
    ///
    /// Samples received so far stay readable through [`MeasurementSession::raw_samples`].
    pub fn stop_measurement(&self) {
        let inner = &self.inner;
        let from = {
            let mut state = lock(&inner.state);
            if !state.is_active() {
                return;
            }
            std::mem::replace(&mut *state, SessionState::Idle)
        };
        info!("stopping measurement ({from})");
        inner.connection.disconnect();
        // joined outside the slot lock: the drain thread may still want it
        let link = lock(&inner.link).take();
        if let Some(mut link) = link {
            link.stop();
            link.join();
        }
        inner.announce(from, SessionState::Idle);
    }

    pub fn is_measuring(&self) -> bool {
        self.state().is_active()
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    /// Why the last run failed, if it did.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.inner.last_error).clone()
    }

    pub fn raw_samples(&self) -> Vec<RawSample> {
        lock(&self.inner.raw).clone()
    }

    /// Filtered trace of the last completed run.
    pub fn filtered_samples(&self) -> Vec<FilteredSample> {
        lock(&self.inner.filtered).clone()
    }

    /// The combined record of the last completed run, as handed to persistence.
    pub fn last_record(&self) -> Option<MeasurementRecord> {
        let kind = lock(&self.inner.config).as_ref()?.measurement_type;
        let filtered = self.filtered_samples();
        if filtered.is_empty() && !self.raw_samples().is_empty() {
            return None;
        }
        Some(MeasurementRecord::from_samples(kind, &self.raw_samples(), &filtered))
    }

    /// Called on the drain thread for every record, before the session acts on it.
    pub fn on_record_received(&self, callback: impl Fn(&Record) + Send + Sync + 'static) {
        lock(&self.inner.record_listeners).push(Arc::new(callback));
    }

    pub fn on_state_changed(&self, callback: impl Fn(SessionState) + Send + Sync + 'static) {
        lock(&self.inner.state_listeners).push(Arc::new(callback));
    }

    /// Polls until the session is idle. Returns `false` on timeout.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_measuring() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(10));
        }
        true
    }
}

impl Drop for MeasurementSession {
    fn drop(&mut self) {
        self.stop_measurement();
        let link = lock(&self.inner.link).take();
        if let Some(mut link) = link {
            link.stop();
            link.join();
        }
    }
}

impl Inner {
    fn acquire_endpoint(
        &self,
        first: SessionState,
        address: &str,
    ) -> Result<Box<dyn Endpoint>, AcquisitionError> {
        if first == SessionState::Sending {
            if let Some(endpoint) = self.connection.handle() {
                debug!("reusing live connection");
                return Ok(endpoint);
            }
            // dropped between the check and now
            if !self.advance(SessionState::Sending, SessionState::Connecting) {
                self.connection.disconnect();
                return Err(AcquisitionError::Cancelled);
            }
        }
        if address.is_empty() {
            return Err(AcquisitionError::NotConnected);
        }
        let endpoint = self.connection.reconnect(address)?;
        if !self.advance(SessionState::Connecting, SessionState::Sending) {
            // stopped while the connector was still opening: the stop already ran its disconnect
            self.connection.disconnect();
            return Err(AcquisitionError::Cancelled);
        }
        Ok(endpoint)
    }

    fn handle_record(&self, record: Record) {
        let listeners = lock(&self.record_listeners).clone();
        for listener in &listeners {
            listener(&record);
        }
        if *lock(&self.state) != SessionState::Streaming {
            debug!("ignoring record outside streaming: {:?}", record.as_str());
            return;
        }
        if record.is_sentinel() {
            self.complete();
            return;
        }
        if record.is_blank() {
            return;
        }
        match record.parse_sample() {
            Ok(sample) => lock(&self.raw).push(sample),
            Err(err) => debug!("dropped: {err}"),
        }
    }

    fn handle_end(&self, end: LinkEnd) {
        let reason = match end {
            LinkEnd::Stopped => return,
            LinkEnd::Closed => "stream closed before completion".to_owned(),
            LinkEnd::Failed(reason) => reason,
        };
        if *lock(&self.state) == SessionState::Streaming {
            self.abort(AcquisitionError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                reason,
            )));
        }
    }

    fn complete(&self) {
        if !self.advance(SessionState::Streaming, SessionState::Completing) {
            return;
        }
        if let Some(link) = lock(&self.link).as_ref() {
            link.stop();
        }
        let Some(config) = lock(&self.config).clone() else {
            error!("completing without a configuration");
            self.finish(SessionState::Completing);
            return;
        };
        let raw = lock(&self.raw).clone();
        let ys: Vec<f64> = raw.iter().map(|s| s.y).collect();
        let filtered: Vec<FilteredSample> = ZeroPhaseFilter::apply(&ys, config.filter_scan_rate())
            .into_iter()
            .zip(&raw)
            .map(|(y_filtered, s)| FilteredSample { x: s.x, y_filtered })
            .collect();
        if filtered.len() != raw.len() {
            error!("filter returned {} of {} samples", filtered.len(), raw.len());
        }
        *lock(&self.filtered) = filtered.clone();
        let record = MeasurementRecord::from_samples(config.measurement_type, &raw, &filtered);
        info!(
            "{} measurement complete: {} samples",
            config.measurement_type,
            record.len()
        );
        if let Err(err) = self.persistence.save(record) {
            error!("{err}");
            *lock(&self.last_error) = Some(err.to_string());
        }
        self.finish(SessionState::Completing);
    }

    fn finish(&self, from: SessionState) {
        if self.advance(from, SessionState::Idle) {
            debug!("session idle");
        }
    }

    /// Records `err`, passes through `Error` to `Idle` and drops the connection on I/O failures.
    fn abort(&self, err: AcquisitionError) -> AcquisitionError {
        let from = {
            let mut state = lock(&self.state);
            if !state.is_active() {
                // already stopped by someone else
                return err;
            }
            std::mem::replace(&mut *state, SessionState::Error)
        };
        error!("measurement failed while {from}: {err}");
        *lock(&self.last_error) = Some(err.to_string());
        self.announce(from, SessionState::Error);
        if let Some(link) = lock(&self.link).as_ref() {
            link.stop();
        }
        if matches!(err, AcquisitionError::Io(_)) {
            self.connection.disconnect();
        }
        self.advance(SessionState::Error, SessionState::Idle);
        err
    }

    /// Moves `from → to` only if the session is still in `from`.
    fn advance(&self, from: SessionState, to: SessionState) -> bool {
        {
            let mut state = lock(&self.state);
            if *state != from {
                return false;
            }
            *state = to;
        }
        self.announce(from, to);
        true
    }

    fn announce(&self, from: SessionState, to: SessionState) {
        info!("session {from} -> {to}");
        let listeners = lock(&self.state_listeners).clone();
        for listener in &listeners {
            listener(to);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
