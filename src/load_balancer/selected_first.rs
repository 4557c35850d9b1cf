//! Pinned-index selection.

use crate::load_balancer::{SelectContext, Selector};

/// Prefers the pinned index; if that server cannot be used, scans forward
/// (wrapping) for the first one that can.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectedFirst;

impl Selector for SelectedFirst {
    fn select(&self, ctx: &SelectContext<'_>) -> Option<usize> {
        scan_from(ctx, ctx.pinned_index.unwrap_or(0))
    }
}

/// First candidate at or after `start`, wrapping around the pool.
pub fn scan_from(ctx: &SelectContext<'_>, start: usize) -> Option<usize> {
    let len = ctx.pool.len();
    if len == 0 {
        return None;
    }
    let start = if start < len { start } else { 0 };
    (0..len)
        .map(|offset| (start + offset) % len)
        .find(|&index| ctx.is_candidate(index))
}
