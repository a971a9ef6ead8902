/// Paranoia Client
///
/// - `engine`: sans-IO protocol state machine
/// - `transport`: drives an engine over a WebSocket to the relay
/// - `passphrase`: local passphrase checks
/// - `config`: environment settings
pub mod config;
pub mod engine;
pub mod error;
pub mod passphrase;
pub mod transport;

pub use config::ClientConfig;
pub use engine::{ChatEvent, ClientEngine, EngineState};
pub use error::ClientError;
pub use passphrase::PassphrasePolicy;
pub use transport::Session;
