//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Build routing engine → Restore stats → Start tasks
//!
//! Shutdown (shutdown.rs):
//!     Ctrl-C → broadcast → admin server, watcher loop, stats saver stop
//!     → final stats save → exit
//! ```

pub mod shutdown;

pub use shutdown::Shutdown;
