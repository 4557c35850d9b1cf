//! Server selection subsystem.
//!
//! # Data Flow
//! ```text
//! Routing engine (per-port last index, pinned index, group scope)
//!     → SelectContext
//!     → Algorithm (validated at config load):
//!         - round_robin.rs (next enabled after the last pick)
//!         - random.rs (uniform, health gated, optionally group scoped)
//!         - low_exception.rs (fewest consecutive errors, then latency)
//!         - selected_first.rs (pinned index, scanning forward)
//!     → Some(index) or None (caller substitutes the sentinel server)
//! ```
//!
//! # Design Decisions
//! - Selectors are stateless; the per-port last index lives in the engine
//! - Disabled servers are never candidates
//! - A forced pick is always uniform random and bypasses health gating

pub mod low_exception;
pub mod random;
pub mod round_robin;
pub mod selected_first;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::registry::server::Server;

use self::low_exception::LowException;
use self::random::Random;
use self::round_robin::RoundRobin;
use self::selected_first::SelectedFirst;

/// Which servers a selection may consider, beyond being enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupFilter<'a> {
    /// Every enabled server.
    Any,
    /// Only servers of this group. Applies to every algorithm.
    Named(&'a str),
    /// Random picks stay in the group of the reference server (the last
    /// pick, else the pinned one).
    SameAsReference,
}

/// Inputs of one selection.
#[derive(Debug, Clone, Copy)]
pub struct SelectContext<'a> {
    pub pool: &'a [Arc<Server>],
    /// Index chosen by the previous selection on this port.
    pub last_index: Option<usize>,
    /// Operator-configured default index.
    pub pinned_index: Option<usize>,
    pub group: GroupFilter<'a>,
    /// Random skips servers whose error streak exceeds this.
    pub max_continuous_errors: u64,
}

impl<'a> SelectContext<'a> {
    pub fn new(pool: &'a [Arc<Server>]) -> Self {
        Self {
            pool,
            last_index: None,
            pinned_index: None,
            group: GroupFilter::Any,
            max_continuous_errors: 3,
        }
    }

    /// Whether the server at `index` may be selected at all.
    pub fn is_candidate(&self, index: usize) -> bool {
        match self.pool.get(index) {
            Some(server) => {
                server.enabled
                    && match self.group {
                        GroupFilter::Named(group) => server.group == group,
                        _ => true,
                    }
            }
            None => false,
        }
    }

    /// Indices of all candidates, in pool order.
    pub fn candidates(&self) -> Vec<usize> {
        (0..self.pool.len()).filter(|&i| self.is_candidate(i)).collect()
    }

    /// Group of the reference server used by [`GroupFilter::SameAsReference`].
    pub fn reference_group(&self) -> Option<&'a str> {
        let pool = self.pool;
        self.last_index
            .and_then(|i| pool.get(i))
            .or_else(|| self.pinned_index.and_then(|i| pool.get(i)))
            .map(|s| s.group.as_str())
    }
}

/// A server selection algorithm.
pub trait Selector: Send + Sync + fmt::Debug {
    /// Pick a pool index, or `None` when no candidate qualifies.
    fn select(&self, ctx: &SelectContext<'_>) -> Option<usize>;
}

/// The closed set of balancing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    RoundRobin,
    Random,
    LowException,
    SelectedFirst,
}

impl Algorithm {
    /// Parse a configured name, falling back to RoundRobin when unknown.
    pub fn from_name_or_default(name: &str) -> Self {
        match name.parse() {
            Ok(algorithm) => algorithm,
            Err(UnknownAlgorithm(name)) => {
                tracing::warn!(
                    algorithm = %name,
                    fallback = Algorithm::RoundRobin.as_str(),
                    "Unknown balance algorithm"
                );
                Algorithm::RoundRobin
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::RoundRobin => "RoundRobin",
            Algorithm::Random => "Random",
            Algorithm::LowException => "LowException",
            Algorithm::SelectedFirst => "SelectedFirst",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognised algorithm name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown balance algorithm: {0}")]
pub struct UnknownAlgorithm(pub String);

impl FromStr for Algorithm {
    type Err = UnknownAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "roundrobin" | "round_robin" | "orderedroundrobin" => Ok(Algorithm::RoundRobin),
            "random" => Ok(Algorithm::Random),
            "lowexception" | "low_exception" => Ok(Algorithm::LowException),
            "selectedfirst" | "selected_first" | "fixed" => Ok(Algorithm::SelectedFirst),
            _ => Err(UnknownAlgorithm(s.to_string())),
        }
    }
}

impl Selector for Algorithm {
    fn select(&self, ctx: &SelectContext<'_>) -> Option<usize> {
        match self {
            Algorithm::RoundRobin => RoundRobin.select(ctx),
            Algorithm::Random => Random::gated().select(ctx),
            Algorithm::LowException => LowException.select(ctx),
            Algorithm::SelectedFirst => SelectedFirst.select(ctx),
        }
    }
}

/// Run one selection.
///
/// `force_random` is the operator's "switch now": a uniform pick among
/// enabled servers with health gating disabled, whatever the algorithm.
pub fn select(ctx: &SelectContext<'_>, algorithm: Algorithm, force_random: bool) -> Option<usize> {
    if force_random {
        return Random::forced().select(ctx);
    }
    algorithm.select(ctx)
}
