/// Bollinger bands aligned to the input series
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub middle: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// Rolling mean ± `dev` population standard deviations over `period` bars
///
/// The first `period - 1` entries of each band are `None`.
pub fn bollinger_bands(prices: &[f64], period: usize, dev: f64) -> BollingerBands {
    let n = prices.len();
    let mut bands = BollingerBands {
        middle: vec![None; n],
        upper: vec![None; n],
        lower: vec![None; n],
    };

    if period == 0 || n < period {
        return bands;
    }

    for end in period..=n {
        let window = &prices[end - period..end];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance = window.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / period as f64;
        let std_dev = variance.sqrt();

        let i = end - 1;
        bands.middle[i] = Some(mean);
        bands.upper[i] = Some(mean + dev * std_dev);
        bands.lower[i] = Some(mean - dev * std_dev);
    }

    bands
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_series_collapses_bands() {
        let prices = vec![100.0; 25];
        let bands = bollinger_bands(&prices, 20, 2.0);

        assert!(bands.upper[18].is_none());
        assert_eq!(bands.middle[19], Some(100.0));
        assert_eq!(bands.upper[24], Some(100.0));
        assert_eq!(bands.lower[24], Some(100.0));
    }

    #[test]
    fn test_known_window() {
        // mean 3, population variance 2
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let bands = bollinger_bands(&prices, 5, 1.0);

        let std_dev = 2.0_f64.sqrt();
        assert_eq!(bands.middle[4], Some(3.0));
        assert!((bands.upper[4].unwrap() - (3.0 + std_dev)).abs() < 1e-12);
        assert!((bands.lower[4].unwrap() - (3.0 - std_dev)).abs() < 1e-12);
    }

    #[test]
    fn test_insufficient_history() {
        let bands = bollinger_bands(&[1.0, 2.0], 5, 2.0);
        assert!(bands.middle.iter().all(|v| v.is_none()));
        assert_eq!(bands.lower.len(), 2);
    }
}
