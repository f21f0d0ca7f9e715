// src/drivers/mod.rs
pub mod endpoint;
pub mod error;
pub mod filter;
pub mod framing;
pub mod link;
pub mod plot;
pub mod queue;
pub mod sim;
// re-exports for the session layer
pub use endpoint::{Endpoint, ManualEndpoint, Responder, SerialEndpoint};
pub use error::AcquisitionError;
pub use filter::{CutoffClass, FilterCoefficients, ZeroPhaseFilter, PADLEN};
pub use framing::{FrameDecoder, Record, SENTINEL};
pub use link::{drain_loop, read_loop, LinkConfig, LinkEnd, SerialLink};
pub use plot::{render_trace_png, PlotStyle};
pub use queue::{record_queue, Pop, RecordConsumer, RecordProducer};
pub use sim::SimulatedInstrument;
