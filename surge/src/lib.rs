#![cfg_attr(docsrs, feature(doc_cfg))]
//! Open-loop, arrival-rate load generation for event-ingestion endpoints.
//!
//! A [`RunPlan`](plan::RunPlan) compiled from a [`RunConfig`](surge_core::RunConfig) describes
//! one or more scenarios, each a piecewise-linear arrival-rate schedule. A
//! [`LoadTest`](run::LoadTest) fires requests on that schedule regardless of how fast the target
//! answers, classifies every response, and evaluates the configured thresholds into a
//! [`RunSummary`](surge_core::RunSummary).

pub mod aggregator;
pub mod classifier;
pub mod plan;
pub mod pool;
pub mod run;
pub mod schedule;
pub mod scheduler;
pub mod stop;
pub mod supplier;
pub mod thresholds;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use surge_core as core;

pub mod prelude {
    pub use crate::plan::RunPlan;
    pub use crate::run::LoadTest;
    pub use crate::stop::{StopHandle, StopMode};
    pub use crate::supplier::{EventSupplier, RequestSupplier};
    #[cfg(feature = "http")]
    #[cfg_attr(docsrs, doc(cfg(feature = "http")))]
    pub use crate::transport::HttpTransport;
    pub use crate::transport::{Request, Transport, TransportResponse};

    pub use surge_core::{ConfigError, RunConfig, RunSummary};
}
