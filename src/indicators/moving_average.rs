/// Span of the trend average
pub const TREND_SPAN: usize = 200;

/// Recursive EMA over the whole series, seeded with the first price
///
/// `alpha = 2 / (span + 1)`. Defined from the first bar on, so the output
/// has the same length as the input.
pub fn ema_series(prices: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());

    let mut ema = match prices.first() {
        Some(&first) => first,
        None => return out,
    };

    for &price in prices {
        ema = alpha * price + (1.0 - alpha) * ema;
        out.push(ema);
    }

    out
}

/// EMA-200 trend average
pub fn trend_average(prices: &[f64]) -> Vec<f64> {
    ema_series(prices, TREND_SPAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ema_series_flat_input() {
        let prices = vec![50.0; 10];
        let series = ema_series(&prices, 3);
        assert_eq!(series.len(), 10);
        assert!(series.iter().all(|&v| v == 50.0));
    }

    #[test]
    fn test_ema_series_recursion() {
        let prices = vec![10.0, 20.0];
        let series = ema_series(&prices, 3); // alpha = 0.5
        assert_eq!(series[0], 10.0);
        assert_eq!(series[1], 15.0);
    }

    #[test]
    fn test_trend_average_lags_price() {
        let prices: Vec<f64> = (0..300).map(|i| 100.0 + i as f64).collect();
        let trend = trend_average(&prices);
        assert!(trend[299] < prices[299]);
    }
}
