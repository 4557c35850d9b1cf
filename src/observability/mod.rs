//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Registry, health tracker, routing engine produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (tracing-subscriber fmt layer)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Metric updates are free when no recorder is installed
//! - Log level comes from config, `RUST_LOG` overrides it

pub mod logging;
pub mod metrics;
