//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Connection accepted (local port, destination)
//!     → engine.rs
//!         → port_map.rs (forward / fixed server / group scope)
//!         → affinity.rs (sticky entry for the destination, single use)
//!         → pinned index, else load_balancer::select
//!     → Arc<Server> (sentinel when nothing is selectable)
//!
//! Reload:
//!     new pool or new rules
//!     → PortMap rebuilt against the pool snapshot
//!     → stale per-port state dropped
//! ```
//!
//! # Design Decisions
//! - Rules and pool are frozen snapshots, swapped atomically
//! - Deterministic given the same state, except random algorithms
//! - Resolution never fails; exhaustion is a value

pub mod affinity;
pub mod engine;
pub mod port_map;

pub use engine::{BalanceSettings, ResolveRequest, RoutingEngine};
