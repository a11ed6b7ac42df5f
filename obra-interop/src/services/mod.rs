//! Pipeline services
//!
//! Pure stages (validator, mapper) plus the two orchestrators that drive them
//! and the HTTP boundaries to the Regulator.

pub mod coordinator;
pub mod gateway;
pub mod mapper;
pub mod rate_limiter;
pub mod reconciler;
pub mod settlement_source;
pub mod validator;

pub use coordinator::{BatchCoordinator, BatchPolicy, BatchProgress, BatchRequest, BatchSummary};
pub use gateway::{HttpSubmissionGateway, SubmissionGateway};
pub use mapper::{map_record, map_with_schema, WireField, WireFormat, WirePayload, WireSchema};
pub use rate_limiter::RateLimiter;
pub use reconciler::ImportReconciler;
pub use settlement_source::{HttpSettlementSource, SettlementSource};
pub use validator::validate;
