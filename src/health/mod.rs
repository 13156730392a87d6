//! Health aggregation across data and web services
//!
//! [`HealthChecker`] runs each service through readiness, connection and
//! probe on a bounded pool and folds the outcomes into a [`HealthReport`].

mod checker;
mod state;

pub use checker::{run_bounded, HealthChecker};
pub use state::{HealthReport, ServiceHealth, ServiceStatus};
