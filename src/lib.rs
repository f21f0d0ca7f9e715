//! Cyclic voltammetry and chronoamperometry acquisition over a line-framed serial link.
//!
//! A [`MeasurementSession`] sends one command to the instrument, collects the `x,y` records it
//! streams back until `done`, conditions the trace with a zero-phase Butterworth low-pass and hands
//! the combined record to a [`Persistence`] sink.
pub mod connection;
pub mod drivers;
pub mod engine;
pub mod recorder;
pub mod settings;
pub mod types;

pub use connection::{ConnectionManager, ConnectionStatus, Connector, DefaultConnector};
pub use drivers::AcquisitionError;
pub use engine::MeasurementSession;
pub use recorder::{JsonFileRecorder, Persistence};
pub use settings::{ConfigProvider, JsonSettingsStore};
pub use types::{MeasurementRecord, MeasurementType, SessionConfig, SessionState};
