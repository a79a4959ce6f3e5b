//! Background maintenance of the job table.

#[cfg(feature = "scheduler")]
pub mod maintenance;
#[cfg(feature = "scheduler")]
pub mod scheduler;
