//! Long-lived client services.

mod replica;

pub use replica::{LocalReplica, StoreEvent};
