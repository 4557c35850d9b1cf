//! Round-robin selection.

use crate::load_balancer::{SelectContext, Selector};

/// Picks the next enabled server strictly after the last pick, wrapping.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoundRobin;

impl Selector for RoundRobin {
    fn select(&self, ctx: &SelectContext<'_>) -> Option<usize> {
        let len = ctx.pool.len();
        if len == 0 {
            return None;
        }

        // No previous pick starts the rotation at index 0
        let start = ctx.last_index.map(|i| i + 1).unwrap_or(0);
        (0..len)
            .map(|offset| (start + offset) % len)
            .find(|&index| ctx.is_candidate(index))
    }
}
