//! parley control-plane server internals, exposed for the integration tests.

pub mod state;
pub mod tcp;

pub use state::ServerState;
pub use tcp::run_control_server;
