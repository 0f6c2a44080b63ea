//! Async (tokio) flavour of the connection
//!
//! - `AsyncConnection`: requests as futures, events dispatched to spawned
//!   handler tasks
//! - `Debouncer`: schedule-with-cancel-previous helper for event handlers

mod connection;
mod debounce;

pub use connection::{AsyncConnection, AsyncHandler};
pub use debounce::Debouncer;
