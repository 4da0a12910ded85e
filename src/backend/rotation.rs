//! Weighted round-robin over read-only backends.

/// Rotation cursor for weighted round-robin.
///
/// Each pass over the read-only partition runs with a weight threshold; a
/// slot is picked when its weight reaches the threshold. The threshold steps
/// down from `max_weight` to 1 and wraps, so over `max_weight` passes a slot
/// of weight `w` is picked exactly `w` times.
///
/// The registry owns this state and only touches it under its lock.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WeightedRotation {
    max_weight: u32,
    cur_weight: u32,
    next_index: usize,
}

impl WeightedRotation {
    /// Create an empty rotation with no eligible backends.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh pass after the membership changed.
    pub fn reset(&mut self, max_weight: u32) {
        self.max_weight = max_weight;
        self.cur_weight = 0;
        self.next_index = 0;
    }

    pub fn max_weight(&self) -> u32 {
        self.max_weight
    }

    pub fn cur_weight(&self) -> u32 {
        self.cur_weight
    }

    pub fn next_index(&self) -> usize {
        self.next_index
    }

    /// Pick the next slot in a partition of `len` slots.
    ///
    /// `weight_of(i)` gives slot `i`'s weight, or 0 if it must be skipped.
    /// Returns `None` if the partition is empty or nothing is eligible.
    ///
    /// The threshold is capped at the heaviest eligible weight, so a skipped
    /// heavy slot cannot force passes that pick nothing. A call visits at
    /// most `2 * len` slots after the initial weight scan.
    pub fn next<F>(&mut self, len: usize, weight_of: F) -> Option<usize>
    where
        F: Fn(usize) -> u32,
    {
        if len == 0 || self.max_weight == 0 {
            return None;
        }
        if self.next_index >= len {
            self.next_index = 0;
        }

        let eligible_max = (0..len).map(&weight_of).max().unwrap_or(0);
        if eligible_max == 0 {
            return None;
        }
        if self.cur_weight > eligible_max {
            self.cur_weight = eligible_max;
        }

        // The heaviest eligible slot meets every threshold, so it is reached
        // within one pass from wherever the cursor stands.
        for _ in 0..len.saturating_mul(2) {
            let index = self.next_index;
            self.next_index = (index + 1) % len;

            if index == 0 {
                self.cur_weight = if self.cur_weight <= 1 {
                    eligible_max
                } else {
                    self.cur_weight - 1
                };
            }

            let weight = weight_of(index);
            if weight > 0 && weight >= self.cur_weight {
                return Some(index);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation_for(weights: &[u32]) -> WeightedRotation {
        let mut rotation = WeightedRotation::new();
        rotation.reset(weights.iter().copied().max().unwrap_or(0));
        rotation
    }

    fn pick(rotation: &mut WeightedRotation, weights: &[u32]) -> Option<usize> {
        rotation.next(weights.len(), |i| weights[i])
    }

    #[test]
    fn test_empty_partition() {
        let mut rotation = WeightedRotation::new();
        assert!(rotation.next(0, |_| 1).is_none());
        assert_eq!(rotation, WeightedRotation::new());
    }

    #[test]
    fn test_single_backend_always_selected() {
        let weights = [1];
        let mut rotation = rotation_for(&weights);
        for _ in 0..10 {
            assert_eq!(pick(&mut rotation, &weights), Some(0));
        }
    }

    #[test]
    fn test_weighted_sequence() {
        let weights = [3, 1];
        let mut rotation = rotation_for(&weights);

        let picks: Vec<_> = (0..8).map(|_| pick(&mut rotation, &weights).unwrap()).collect();
        assert_eq!(picks, vec![0, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_exact_counts_per_cycle() {
        let weights = [5, 2, 3, 1];
        let total: u32 = weights.iter().sum();
        let mut rotation = rotation_for(&weights);

        for cycle in 0..4 {
            let mut counts = [0u32; 4];
            for _ in 0..total {
                counts[pick(&mut rotation, &weights).unwrap()] += 1;
            }
            assert_eq!(counts, weights, "cycle {}", cycle);
        }
    }

    #[test]
    fn test_fairness_over_long_run() {
        let weights = [4, 1, 2];
        let k = 250;
        let total: u32 = weights.iter().sum();
        let mut rotation = rotation_for(&weights);

        let mut counts = [0u32; 3];
        for _ in 0..k * total {
            counts[pick(&mut rotation, &weights).unwrap()] += 1;
        }

        for (count, weight) in counts.iter().zip(weights) {
            assert_eq!(*count, k * weight);
        }
    }

    #[test]
    fn test_equal_weights_round_robin() {
        let weights = [2, 2, 2];
        let mut rotation = rotation_for(&weights);

        let picks: Vec<_> = (0..6).map(|_| pick(&mut rotation, &weights).unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn test_ineligible_slots_skipped() {
        let weights = [3, 0, 1];
        let mut rotation = rotation_for(&[3, 2, 1]);

        for _ in 0..20 {
            assert_ne!(pick(&mut rotation, &weights), Some(1));
        }
    }

    #[test]
    fn test_skipped_heavy_slot_does_not_stall() {
        let weights = [5_000_000, 1, 0];
        let mut rotation = rotation_for(&weights);
        let visits = std::cell::Cell::new(0usize);

        for _ in 0..50 {
            visits.set(0);
            let picked = rotation.next(weights.len(), |i| {
                visits.set(visits.get() + 1);
                // Slot 0 is down.
                if i == 0 { 0 } else { weights[i] }
            });
            assert_eq!(picked, Some(1));
            assert!(visits.get() <= 3 * weights.len(), "visited {} slots", visits.get());
        }
    }

    #[test]
    fn test_weights_kept_when_heaviest_slot_skipped() {
        let mut rotation = rotation_for(&[9, 3, 1]);
        let live = [0, 3, 1];

        let mut counts = [0u32; 3];
        for _ in 0..40 {
            counts[pick(&mut rotation, &live).unwrap()] += 1;
        }
        assert_eq!(counts, [0, 30, 10]);
    }

    #[test]
    fn test_nothing_eligible_returns_none() {
        let mut rotation = rotation_for(&[3, 2]);
        assert!(rotation.next(2, |_| 0).is_none());
    }

    #[test]
    fn test_cursor_clamped_after_shrink() {
        let mut rotation = rotation_for(&[1, 1, 1]);
        for _ in 0..2 {
            pick(&mut rotation, &[1, 1, 1]);
        }
        assert_eq!(rotation.next_index(), 2);

        // Partition shrank without a reset.
        assert!(rotation.next(1, |_| 1).is_some());
        assert!(rotation.next_index() < 1);
    }

    #[test]
    fn test_reset_starts_fresh_pass() {
        let weights = [2, 1];
        let mut rotation = rotation_for(&weights);
        pick(&mut rotation, &weights);
        assert_eq!(rotation.cur_weight(), 2);

        rotation.reset(5);
        assert_eq!(rotation.max_weight(), 5);
        assert_eq!(rotation.cur_weight(), 0);
        assert_eq!(rotation.next_index(), 0);
    }
}
