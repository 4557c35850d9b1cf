//! Server registry subsystem.
//!
//! # Data Flow
//! ```text
//! RouterConfig.servers
//!     → server.rs (Server records, shared health handles)
//!     → pool.rs (ordered immutable Pool behind ArcSwap)
//!     → readers take one snapshot per decision
//! ```

pub mod pool;
pub mod server;

pub use pool::{Pool, ServerRegistry};
pub use server::Server;
