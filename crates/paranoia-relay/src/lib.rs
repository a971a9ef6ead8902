/// Paranoia Relay
///
/// Pairs two WebSocket clients on a passphrase-derived token and forwards
/// their end-to-end encrypted envelopes. The relay only ever opens the outer
/// envelope addressed to itself, which names the token; the peer-to-peer body
/// inside stays sealed.
///
/// - `registry`: token → session table with a lock per token
/// - `identity`: relay encryption and signing keys
/// - `router`: REGISTER / LINK / HANDSHAKE / MESSAGE handling and teardown
/// - `connection`: per-socket loop with heartbeat
/// - `server`: axum routes
pub mod connection;
pub mod error;
pub mod identity;
pub mod registry;
pub mod router;
pub mod server;

pub use error::RelayError;
pub use identity::RelayIdentity;
pub use registry::{ConnHandle, Outbound, Registry, RegistryStats};
pub use router::Relay;
