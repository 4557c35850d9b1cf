//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Connection layer (outside this crate):
//!     connect / disconnect / error / latency / bytes
//!     → tracker.rs (per-server atomic counters)
//!     → selection reads the error streak and mean latency
//!
//! Persistence (store.rs):
//!     periodic timer or shutdown
//!     → registry health snapshots
//!     → JSON file, restored on next start
//! ```
//!
//! # Design Decisions
//! - Counters are passive: nothing here probes servers
//! - Health belongs to the server id and survives pool reloads

pub mod store;
pub mod tracker;
