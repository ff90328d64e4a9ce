//! Secret poller service.
//!
//! Fetches one Key Vault secret on a fixed cadence, authenticating with a
//! federated workload identity, and logs the outcome of every poll.

pub mod config;
pub mod poller;
pub mod shutdown;

pub use config::Config;
pub use poller::{PollStats, PollerConfig, SecretPoller};
pub use shutdown::{ShutdownSignal, ShutdownTrigger};
