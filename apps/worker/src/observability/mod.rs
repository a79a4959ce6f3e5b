//! Observability module - failed-job alerting.

mod alert;

pub use alert::FailedJobAlertLayer;
