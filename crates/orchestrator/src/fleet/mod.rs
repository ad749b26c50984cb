//! Topic-based command/acknowledgement protocol between the orchestrator and
//! edge gateways.

pub mod router;
pub mod transport;

pub use router::{FleetMessageRouter, IgnoredAck, IngestOutcome};
pub use transport::{FleetMessage, FleetTransport, LocalFleetBus, TransportError};
