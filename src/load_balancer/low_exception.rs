//! Lowest-exception selection.

use crate::load_balancer::{SelectContext, Selector};

/// Selects the enabled server with the fewest consecutive errors.
///
/// Ties go to the lowest average connect latency (unmeasured servers count
/// as zero so new servers get tried), then to the lowest pool index.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowException;

impl Selector for LowException {
    fn select(&self, ctx: &SelectContext<'_>) -> Option<usize> {
        ctx.candidates().into_iter().min_by_key(|&index| {
            let health = ctx.pool[index].health();
            (
                health.continuous_errors(),
                health.avg_latency_ms().unwrap_or(0),
                index,
            )
        })
    }
}
