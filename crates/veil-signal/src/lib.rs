//! Veil Signal
//!
//! Delivers each context's disabled-capability list without exposing it to
//! page scripts:
//! - Single-use response markers for top-level contexts
//! - Owner lookup for subframes and workers
//! - Secret handshake over a shared event environment

mod context;
mod error;
mod handshake;
mod hub;
mod jar;
mod lookup;
mod marker;
mod resolve;

pub use context::{ContextId, FrameKind};
pub use error::SignalError;
pub use handshake::{
    EnvEvent, HandshakeParty, Requester, Responder, SecretSlot, SharedEnvironment,
    DEFAULT_HANDSHAKE_TIMEOUT,
};
pub use hub::{SignalHub, SignalReading};
pub use jar::MarkerJar;
pub use lookup::OwnerLookup;
pub use marker::{Marker, MARKER_NAME};
pub use resolve::resolve_disabled_capabilities;

pub type Result<T> = std::result::Result<T, SignalError>;
