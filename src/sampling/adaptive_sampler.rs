use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use arc_swap::ArcSwap;
use thiserror::Error;
use tracing::{debug, error};

use crate::config::Config;
use crate::sampling::priority::{self, PRIORITY_BOOST, PriorityAdjustFn, TracePriority};
use crate::sampling::random::RandomSource;

pub const DEFAULT_TARGET: u32 = 10;
pub const MIN_TARGET: u32 = 1;
/// Largest target accepted. The backoff table holds about `target` entries.
pub const MAX_TARGET: u32 = 100_000;

const FIRST_INTERVAL_FINISHED: i32 = -1;
const BACKOFF_EXPONENT: f64 = 0.5;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerError {
    #[error("sampling target must be between {MIN_TARGET} and {MAX_TARGET}, got {0}")]
    InvalidTarget(u32),
}

/// Acceptance ceilings for candidates past the target within one interval.
///
/// Entry `i` bounds the chance of accepting the `(target + i + 1)`th sample.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn backoff_ceilings(target: u32) -> Vec<u32> {
    let base = f64::from(target);
    let floor = base.powf(BACKOFF_EXPONENT);
    let mut ceilings = Vec::with_capacity(target as usize);
    let mut ordinal = target;
    loop {
        let ratio = target as f32 / ordinal as f32;
        let ceiling = (base.powf(f64::from(ratio)) - floor).round_ties_even();
        if ceiling <= 0.0 {
            break;
        }
        ceilings.push(ceiling as u32);
        match ordinal.checked_add(1) {
            Some(next) => ordinal = next,
            None => break,
        }
    }
    ceilings
}

enum FirstInterval {
    Finished,
    Exhausted,
    Accepted,
}

/// Counters and table for one reporting interval at one target.
///
/// A state is never reset in place: interval rollover and reconfiguration
/// both publish a fresh one.
#[derive(Debug)]
pub struct SamplerState {
    target: u32,
    backoff_ceilings: Arc<[u32]>,
    first_interval_remaining: AtomicI32,
    seen_this_interval: AtomicU32,
    seen_last_interval: AtomicU32,
    accepted_this_interval: AtomicU32,
}

impl SamplerState {
    fn new(target: u32) -> Self {
        Self {
            target,
            backoff_ceilings: backoff_ceilings(target).into(),
            first_interval_remaining: AtomicI32::new(i32::try_from(target).unwrap_or(i32::MAX)),
            seen_this_interval: AtomicU32::new(0),
            seen_last_interval: AtomicU32::new(0),
            accepted_this_interval: AtomicU32::new(0),
        }
    }

    fn next_interval(&self) -> Self {
        Self {
            target: self.target,
            backoff_ceilings: Arc::clone(&self.backoff_ceilings),
            first_interval_remaining: AtomicI32::new(FIRST_INTERVAL_FINISHED),
            seen_this_interval: AtomicU32::new(0),
            seen_last_interval: AtomicU32::new(self.seen_this_interval.load(Ordering::Acquire)),
            accepted_this_interval: AtomicU32::new(0),
        }
    }

    fn retarget(&self, target: u32) -> Self {
        let remaining = self.first_interval_remaining.load(Ordering::Acquire);
        let first_interval_remaining = if remaining < 0 {
            FIRST_INTERVAL_FINISHED
        } else {
            let used = self.target.saturating_sub(remaining.unsigned_abs());
            i32::try_from(target.saturating_sub(used)).unwrap_or(i32::MAX)
        };
        Self {
            target,
            backoff_ceilings: backoff_ceilings(target).into(),
            first_interval_remaining: AtomicI32::new(first_interval_remaining),
            seen_this_interval: AtomicU32::new(self.seen_this_interval.load(Ordering::Acquire)),
            seen_last_interval: AtomicU32::new(self.seen_last_interval.load(Ordering::Acquire)),
            accepted_this_interval: AtomicU32::new(
                self.accepted_this_interval.load(Ordering::Acquire),
            ),
        }
    }

    fn take_first_interval_slot(&self) -> FirstInterval {
        let mut remaining = self.first_interval_remaining.load(Ordering::Acquire);
        loop {
            if remaining < 0 {
                return FirstInterval::Finished;
            }
            if remaining == 0 {
                return FirstInterval::Exhausted;
            }
            match self.first_interval_remaining.compare_exchange_weak(
                remaining,
                remaining - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return FirstInterval::Accepted,
                Err(actual) => {
                    remaining = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }

    fn ceiling_for(&self, accepted: u32) -> u32 {
        let index = (accepted - self.target) as usize;
        self.backoff_ceilings.get(index).copied().unwrap_or(0)
    }

    fn should_sample(&self, random: &RandomSource) -> bool {
        self.seen_this_interval.fetch_add(1, Ordering::AcqRel);

        match self.take_first_interval_slot() {
            FirstInterval::Accepted => return true,
            FirstInterval::Exhausted => return false,
            FirstInterval::Finished => {}
        }

        loop {
            let accepted = self.accepted_this_interval.load(Ordering::Acquire);
            let seen_last = self.seen_last_interval.load(Ordering::Acquire);
            let seen_before = self
                .seen_this_interval
                .load(Ordering::Acquire)
                .saturating_sub(1);

            let sampled = if accepted < self.target {
                // no baseline from a previous interval
                seen_last > 0 && random.next_below(seen_last) < self.target
            } else {
                let ceiling = self.ceiling_for(accepted);
                ceiling > 0 && seen_before > 0 && random.next_below(seen_before) < ceiling
            };

            if !sampled {
                return false;
            }

            // A lost race re-runs the whole decision against the new count.
            if self
                .accepted_this_interval
                .compare_exchange(accepted, accepted + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
            std::hint::spin_loop();
        }
    }
}

/// Picks roughly `target` candidates per reporting interval.
///
/// Decisions are lock-free apart from the shared random source. The harvest
/// scheduler owns the interval cadence and calls [`AdaptiveSampler::end_of_interval`].
#[derive(Debug)]
pub struct AdaptiveSampler {
    state: ArcSwap<SamplerState>,
    random: RandomSource,
    adjust: PriorityAdjustFn,
}

impl AdaptiveSampler {
    pub fn new(target: u32, seed: Option<u64>) -> Result<Self, SamplerError> {
        if !(MIN_TARGET..=MAX_TARGET).contains(&target) {
            return Err(SamplerError::InvalidTarget(target));
        }
        Ok(Self::build(target, seed))
    }

    fn build(target: u32, seed: Option<u64>) -> Self {
        Self {
            state: ArcSwap::from_pointee(SamplerState::new(target)),
            random: RandomSource::new(seed),
            adjust: priority::adjust,
        }
    }

    /// Replaces the function used to boost the priority of sampled traces.
    #[must_use]
    pub fn with_priority_adjustment(mut self, adjust: PriorityAdjustFn) -> Self {
        self.adjust = adjust;
        self
    }

    /// Decides whether the current candidate is sampled and boosts its
    /// priority when it is.
    pub fn compute_sampled(&self, priority: &TracePriority) -> bool {
        let state = self.state.load();
        let sampled = state.should_sample(&self.random);
        if sampled {
            priority.boost(self.adjust, PRIORITY_BOOST);
        }
        sampled
    }

    /// Rolls the counters into a new interval. First-interval acceptance
    /// never comes back once this has run.
    pub fn end_of_interval(&self) {
        self.state.rcu(|current| current.next_interval());
    }

    /// Switches to `new_target`, keeping the counters of the running interval.
    pub fn reconfigure(&self, new_target: u32) {
        let target = if !(MIN_TARGET..=MAX_TARGET).contains(&new_target) {
            error!(
                "Invalid sampling target {new_target}, using default of {DEFAULT_TARGET}"
            );
            DEFAULT_TARGET
        } else {
            new_target
        };
        self.state.rcu(|current| current.retarget(target));
        debug!("Adaptive sampler target set to {target}");
    }

    /// Applies a configuration snapshot. Ignored unless distributed tracing
    /// is on and a sampling target is configured.
    pub fn on_configuration_updated(&self, config: &Config) {
        if !config.distributed_tracing_enabled {
            return;
        }
        let Some(requested) = config.sampling_target else {
            return;
        };
        let target = match u32::try_from(requested) {
            Ok(target) if (MIN_TARGET..=MAX_TARGET).contains(&target) => target,
            _ => {
                error!(
                    "Invalid sampling target {requested}, using default of {DEFAULT_TARGET}"
                );
                DEFAULT_TARGET
            }
        };
        if target != self.target() {
            self.reconfigure(target);
        }
    }

    /// The random source decisions draw from, shared for priority creation.
    #[must_use]
    pub fn random(&self) -> &RandomSource {
        &self.random
    }

    #[must_use]
    pub fn target(&self) -> u32 {
        self.state.load().target
    }

    #[must_use]
    pub fn backoff_table(&self) -> Vec<u32> {
        self.state.load().backoff_ceilings.to_vec()
    }

    /// Most samples a single steady-state interval can accept.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn max_accepted_per_interval(&self) -> u32 {
        let state = self.state.load();
        state
            .target
            .saturating_add(state.backoff_ceilings.len() as u32)
    }

    #[must_use]
    pub fn in_first_interval(&self) -> bool {
        self.state
            .load()
            .first_interval_remaining
            .load(Ordering::Acquire)
            >= 0
    }

    #[must_use]
    pub fn seen_this_interval(&self) -> u32 {
        self.state.load().seen_this_interval.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn seen_last_interval(&self) -> u32 {
        self.state.load().seen_last_interval.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn accepted_this_interval(&self) -> u32 {
        self.state
            .load()
            .accepted_this_interval
            .load(Ordering::Acquire)
    }
}

impl Default for AdaptiveSampler {
    fn default() -> Self {
        Self::build(DEFAULT_TARGET, None)
    }
}
