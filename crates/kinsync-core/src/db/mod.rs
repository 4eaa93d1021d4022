//! Database layer for the local replica

mod connection;
mod migrations;
mod replica_repository;

pub use connection::Database;
pub use replica_repository::{LibSqlReplicaRepository, ReplicaRepository};
