//! Service layer for the queue service
//!
//! Application wiring, gateway command dispatch, and health checks for the
//! production binary.

pub mod app;
pub mod dispatcher;
pub mod health;

pub use app::{AppState, ServiceError};
pub use dispatcher::CommandDispatcher;
pub use health::{HealthCheck, HealthStatus, ServiceProbe};
