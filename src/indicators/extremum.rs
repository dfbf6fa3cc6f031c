/// Highest value of the `period` bars before each bar (the bar itself excluded)
pub fn rolling_max_prior(values: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling_prior(values, period, f64::max)
}

/// Lowest value of the `period` bars before each bar (the bar itself excluded)
pub fn rolling_min_prior(values: &[f64], period: usize) -> Vec<Option<f64>> {
    rolling_prior(values, period, f64::min)
}

fn rolling_prior(values: &[f64], period: usize, pick: fn(f64, f64) -> f64) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }

    for i in period..values.len() {
        out[i] = values[i - period..i].iter().copied().reduce(pick);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excludes_current_bar() {
        let highs = vec![1.0, 5.0, 3.0, 10.0];
        let max = rolling_max_prior(&highs, 2);

        assert_eq!(max[0], None);
        assert_eq!(max[1], None);
        assert_eq!(max[2], Some(5.0));
        // 10.0 is the current bar and must not count
        assert_eq!(max[3], Some(5.0));
    }

    #[test]
    fn test_rolling_min() {
        let lows = vec![4.0, 2.0, 3.0, 1.0, 6.0];
        let min = rolling_min_prior(&lows, 3);
        assert_eq!(min[3], Some(2.0));
        assert_eq!(min[4], Some(1.0));
    }
}
