//! Load-aware batch sizing.

/// Load above which the batch size is halved.
const HIGH_LOAD: f64 = 0.8;

/// Load below which the batch size is grown by half.
const LOW_LOAD: f64 = 0.3;

/// Recommend how many items to process at once given the current system load.
///
/// `system_load` is clamped to `[0, 1]`:
/// - above 0.8: `base_limit / 2`
/// - below 0.3: `min(base_limit * 1.5, total_items)`
/// - otherwise: `min(base_limit, total_items)`
pub fn recommend_batch_size(base_limit: usize, total_items: usize, system_load: f64) -> usize {
    let load = if system_load.is_nan() { 0.5 } else { system_load.clamp(0.0, 1.0) };

    if load > HIGH_LOAD {
        base_limit / 2
    } else if load < LOW_LOAD {
        ((base_limit as f64 * 1.5) as usize).min(total_items)
    } else {
        base_limit.min(total_items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_high_load_halves() {
        assert_eq!(recommend_batch_size(50, 100, 0.9), 25);
        assert_eq!(recommend_batch_size(51, 100, 0.95), 25);
    }

    #[test]
    fn test_low_load_grows() {
        assert_eq!(recommend_batch_size(50, 100, 0.2), 75);
        assert_eq!(recommend_batch_size(80, 100, 0.2), 100);
    }

    #[test]
    fn test_normal_load() {
        assert_eq!(recommend_batch_size(50, 100, 0.5), 50);
        assert_eq!(recommend_batch_size(50, 20, 0.5), 20);
    }

    #[test]
    fn test_boundaries_and_clamping() {
        assert_eq!(recommend_batch_size(50, 100, 0.8), 50);
        assert_eq!(recommend_batch_size(50, 100, 0.3), 50);
        assert_eq!(recommend_batch_size(50, 100, 7.0), 25);
        assert_eq!(recommend_batch_size(50, 100, -1.0), 75);
    }
}
