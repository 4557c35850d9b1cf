//! Uniform random selection.

use rand::seq::SliceRandom;

use crate::load_balancer::{GroupFilter, SelectContext, Selector};

/// Uniform choice among enabled servers.
///
/// When gated, servers whose continuous-error streak exceeds the context
/// threshold are skipped. With [`GroupFilter::SameAsReference`] the choice is
/// restricted to the reference server's group; if that group has no
/// candidate the whole pool is used instead.
#[derive(Debug, Clone, Copy)]
pub struct Random {
    health_gated: bool,
}

impl Random {
    /// Regular balancing pick.
    pub fn gated() -> Self {
        Self { health_gated: true }
    }

    /// Operator override; health is ignored.
    pub fn forced() -> Self {
        Self { health_gated: false }
    }

    fn eligible(&self, ctx: &SelectContext<'_>) -> Vec<usize> {
        let mut candidates = ctx.candidates();
        if self.health_gated {
            candidates.retain(|&i| ctx.pool[i].health().continuous_errors() <= ctx.max_continuous_errors);
        }

        if ctx.group == GroupFilter::SameAsReference {
            if let Some(group) = ctx.reference_group() {
                let in_group: Vec<usize> = candidates
                    .iter()
                    .copied()
                    .filter(|&i| ctx.pool[i].group == group)
                    .collect();
                if !in_group.is_empty() {
                    return in_group;
                }
            }
        }
        candidates
    }
}

impl Selector for Random {
    fn select(&self, ctx: &SelectContext<'_>) -> Option<usize> {
        self.eligible(ctx).choose(&mut rand::thread_rng()).copied()
    }
}
