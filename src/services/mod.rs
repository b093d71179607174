//! Service layer: sync scheduling, matching, policy and collaborators.

pub mod apply;
pub mod billing;
pub mod matching;
pub mod metrics;
pub mod policy;
pub mod provider;
pub mod retry;
pub mod sync;

pub use apply::PaymentApplicationService;
pub use matching::MatchingEngine;
pub use metrics::{get_metrics, init_metrics};
pub use sync::SyncScheduler;
