use std::sync::atomic::{AtomicU32, Ordering};

use crate::sampling::random::RandomSource;

/// Added to the priority of every sampled trace.
pub const PRIORITY_BOOST: f32 = 1.0;

const PRECISION: f64 = 1_000_000.0;

/// Computes a boosted priority from the current one.
pub type PriorityAdjustFn = fn(current: f32, boost: f32) -> f32;

/// Default adjustment: add the boost and keep six decimals.
#[must_use]
pub fn adjust(current: f32, boost: f32) -> f32 {
    truncate(current + boost)
}

/// Draws the initial priority of a new transaction.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn create(random: &RandomSource) -> f32 {
    ((random.next_unit() * PRECISION).trunc() / PRECISION) as f32
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(priority: f32) -> f32 {
    ((f64::from(priority) * PRECISION).trunc() / PRECISION) as f32
}

/// Renders a priority with at most six decimals and no trailing zeros.
#[must_use]
pub fn format_priority(priority: f32) -> String {
    let fixed = format!("{priority:.6}");
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// A trace priority that may be boosted concurrently.
///
/// The value is stored as the bit pattern of an `f32`.
#[derive(Debug)]
pub struct TracePriority(AtomicU32);

impl TracePriority {
    #[must_use]
    pub fn new(priority: f32) -> Self {
        Self(AtomicU32::new(priority.to_bits()))
    }

    #[must_use]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, priority: f32) {
        self.0.store(priority.to_bits(), Ordering::Release);
    }

    /// Applies `adjust` until the write lands on an unchanged value.
    /// Returns the stored priority.
    pub fn boost(&self, adjust: PriorityAdjustFn, boost: f32) -> f32 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = adjust(f32::from_bits(current), boost).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return f32::from_bits(next),
                Err(actual) => {
                    current = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }
}

impl Default for TracePriority {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clone for TracePriority {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adjust_adds_boost_and_truncates() {
        assert!((adjust(0.5, PRIORITY_BOOST) - 1.5).abs() < f32::EPSILON);
        assert!((adjust(0.123_456_7, 1.0) - 1.123_456).abs() < 1e-6);
    }

    #[test]
    fn format_priority_drops_trailing_zeros() {
        assert_eq!(format_priority(0.123_456_7), "0.123457");
        assert_eq!(format_priority(1.123), "1.123");
        assert_eq!(format_priority(1.0), "1");
        assert_eq!(format_priority(0.0), "0");
        assert_eq!(format_priority(0.5), "0.5");
    }

    #[test]
    fn create_stays_below_one() {
        let random = RandomSource::new(Some(3));
        for _ in 0..100 {
            let priority = create(&random);
            assert!((0.0..1.0).contains(&priority));
        }
    }

    #[test]
    fn boost_is_applied_once_per_call() {
        let priority = TracePriority::new(0.25);
        let boosted = priority.boost(adjust, PRIORITY_BOOST);
        assert!((boosted - 1.25).abs() < f32::EPSILON);
        assert!((priority.get() - 1.25).abs() < f32::EPSILON);
    }

    #[test]
    fn concurrent_boosts_are_not_lost() {
        let priority = TracePriority::new(0.0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        priority.boost(adjust, 1.0);
                    }
                });
            }
        });
        assert!((priority.get() - 800.0).abs() < f32::EPSILON);
    }
}
