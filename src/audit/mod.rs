//! Activity audit trail.
//!
//! - [`logger`]: per-request [`ActivityLogger`] extractor and builder
//! - [`record`]: the persisted [`ActivityRecord`]
//! - [`device`]: user-agent fingerprinting
//! - [`store`]: the [`AuditStore`] contract plus in-memory and tracing stores

pub mod device;
pub mod logger;
pub mod record;
pub mod store;

pub use device::{DeviceInfo, DeviceType};
pub use logger::{ActivityLogger, AuditSink, REQUEST_ID_HEADER};
pub use record::{ActionType, ActivityRecord, ActivityStatus};
pub use store::{AuditStore, InMemoryAuditStore, TracingAuditStore};
