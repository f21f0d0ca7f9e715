// src/connection.rs
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{info, warn};

use crate::drivers::{AcquisitionError, Endpoint, SerialEndpoint, SimulatedInstrument};

/// Address that selects the built-in simulated instrument.
pub const SIMULATOR_ADDRESS: &str = "sim";

/// Opens a fresh endpoint for an address. Device discovery happens elsewhere.
pub trait Connector: Send + Sync {
    fn open(&self, address: &str) -> io::Result<Box<dyn Endpoint>>;
}

/// Serial ports by path, or the simulator for [`SIMULATOR_ADDRESS`].
#[derive(Clone, Debug)]
pub struct DefaultConnector {
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub simulator: SimulatedInstrument,
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(100),
            simulator: SimulatedInstrument::default(),
        }
    }
}

impl Connector for DefaultConnector {
    fn open(&self, address: &str) -> io::Result<Box<dyn Endpoint>> {
        if address == SIMULATOR_ADDRESS {
            return Ok(Box::new(self.simulator.endpoint()));
        }
        Ok(Box::new(SerialEndpoint::open(
            address,
            self.baud_rate,
            self.read_timeout,
        )?))
    }
}

/// Point-in-time view of the connection, safe to hand to a UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub address: Option<String>,
    pub connected: bool,
}

#[derive(Default)]
struct ConnectionState {
    endpoint: Option<Box<dyn Endpoint>>,
    address: Option<String>,
    connected: bool,
}

/// Sole owner of the live endpoint. Sessions get their own handle via [`ConnectionManager::handle`]
/// and every read or write of the state happens under one lock.
pub struct ConnectionManager {
    connector: Box<dyn Connector>,
    state: Mutex<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            state: Mutex::new(ConnectionState::default()),
        }
    }

    /// Opens `address` and makes it the current endpoint, returning a handle to it.
    /// Any endpoint already held is closed first.
    pub fn connect(&self, address: &str) -> Result<Box<dyn Endpoint>, AcquisitionError> {
        let endpoint = self.connector.open(address)?;
        let handle = endpoint.try_clone()?;
        let mut state = self.lock();
        if let Some(mut previous) = state.endpoint.take() {
            if let Err(err) = previous.close() {
                warn!("closing previous endpoint failed: {err}");
            }
        }
        *state = ConnectionState {
            endpoint: Some(endpoint),
            address: Some(address.to_owned()),
            connected: true,
        };
        info!("connected to {address}");
        Ok(handle)
    }

    pub fn reconnect(&self, address: &str) -> Result<Box<dyn Endpoint>, AcquisitionError> {
        self.disconnect();
        self.connect(address)
    }

    /// Closes and forgets the current endpoint, if any.
    pub fn disconnect(&self) {
        let mut state = self.lock();
        if let Some(mut endpoint) = state.endpoint.take() {
            if let Err(err) = endpoint.close() {
                warn!("error while closing endpoint: {err}");
            }
            info!("disconnected");
        }
        state.connected = false;
        state.address = None;
    }

    /// Last known connectivity. The OS handle may have changed since.
    pub fn is_connected(&self) -> bool {
        let state = self.lock();
        state.connected && state.endpoint.as_ref().is_some_and(|e| e.is_connected())
    }

    pub fn status(&self) -> ConnectionStatus {
        let state = self.lock();
        ConnectionStatus {
            address: state.address.clone(),
            connected: state.connected
                && state.endpoint.as_ref().is_some_and(|e| e.is_connected()),
        }
    }

    /// A fresh handle on the live endpoint, or `None` when not connected.
    pub fn handle(&self) -> Option<Box<dyn Endpoint>> {
        let state = self.lock();
        let endpoint = state.endpoint.as_ref().filter(|e| state.connected && e.is_connected())?;
        match endpoint.try_clone() {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("could not clone endpoint handle: {err}");
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ManualEndpoint;
    use std::io::ErrorKind;
    use std::sync::Arc;

    struct FixedConnector {
        endpoint: ManualEndpoint,
        opens: Arc<Mutex<Vec<String>>>,
    }

    impl Connector for FixedConnector {
        fn open(&self, address: &str) -> io::Result<Box<dyn Endpoint>> {
            if address == "missing" {
                return Err(ErrorKind::NotFound.into());
            }
            self.opens.lock().unwrap().push(address.to_owned());
            Ok(Box::new(self.endpoint.clone()))
        }
    }

    fn manager() -> (ConnectionManager, ManualEndpoint, Arc<Mutex<Vec<String>>>) {
        let endpoint = ManualEndpoint::new();
        let opens = Arc::new(Mutex::new(Vec::new()));
        let manager = ConnectionManager::new(FixedConnector {
            endpoint: endpoint.clone(),
            opens: Arc::clone(&opens),
        });
        (manager, endpoint, opens)
    }

    #[test]
    fn connect_and_disconnect_update_state() {
        let (manager, endpoint, _) = manager();
        assert!(!manager.is_connected());
        assert!(manager.handle().is_none());
        manager.connect("/dev/rfcomm0").unwrap();
        assert!(manager.is_connected());
        assert_eq!(
            manager.status(),
            ConnectionStatus {
                address: Some("/dev/rfcomm0".into()),
                connected: true
            }
        );
        assert!(manager.handle().is_some());
        manager.disconnect();
        assert!(!manager.is_connected());
        assert!(!endpoint.is_connected());
        assert_eq!(manager.status().address, None);
    }

    #[test]
    fn failed_connect_is_reported_as_io() {
        let (manager, _, _) = manager();
        let err = manager.connect("missing").err().unwrap();
        assert!(matches!(err, AcquisitionError::Io(_)));
        assert!(!manager.is_connected());
    }

    #[test]
    fn reconnect_opens_a_new_endpoint() {
        let (manager, _, opens) = manager();
        manager.connect("a").unwrap();
        manager.reconnect("b").unwrap();
        assert_eq!(*opens.lock().unwrap(), ["a", "b"]);
        assert_eq!(manager.status().address.as_deref(), Some("b"));
    }

    #[test]
    fn closed_endpoint_reads_as_disconnected() {
        let (manager, endpoint, _) = manager();
        manager.connect("a").unwrap();
        endpoint.clone().close().unwrap();
        assert!(!manager.is_connected());
        assert!(manager.handle().is_none());
    }

    #[test]
    fn simulator_address_needs_no_hardware() {
        let manager = ConnectionManager::new(DefaultConnector::default());
        manager.connect(SIMULATOR_ADDRESS).unwrap();
        assert!(manager.is_connected());
    }
}
