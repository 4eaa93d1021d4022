//! Client-side synchronization with the merge server.

mod connectivity;
mod coordinator;
mod memory;
mod remote;

pub use connectivity::{spawn_probe, Connectivity};
pub use coordinator::{CycleOutcome, DispatchOutcome, SyncCoordinator, SyncHandle};
pub use memory::InMemoryRemote;
pub use remote::{HttpRemote, RemoteAuthority, RemoteError, RemoteResult};
