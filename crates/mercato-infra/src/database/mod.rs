//! SQL persistence for the job queue.

mod connections;
pub mod entity;
mod sql_store;

pub use connections::DatabaseConfig;
pub use sea_orm::DbConn;
pub use sql_store::{EMBEDDED_WORKER_LEASE, SqlJobStore};

#[cfg(test)]
mod tests;
