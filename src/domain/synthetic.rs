//! Seeded synthetic bar series for demos and reproducible tests.

use chrono::{Duration, NaiveDateTime};
use rand::Rng;

use super::error::QuantsimError;
use super::ohlcv::{Bar, BarSeries};

/// Daily random walk with uniform close-to-close returns in
/// `[-volatility, volatility]`.
///
/// The caller owns the RNG, so the same seed always yields the same series.
pub fn random_walk<R: Rng + ?Sized>(
    rng: &mut R,
    start: NaiveDateTime,
    bars: usize,
    start_price: f64,
    volatility: f64,
) -> Result<BarSeries, QuantsimError> {
    if !start_price.is_finite() || start_price <= 0.0 {
        return Err(QuantsimError::InvalidParameter {
            name: "start_price".into(),
            reason: format!("{start_price} must be positive"),
        });
    }
    if !volatility.is_finite() || !(0.0..1.0).contains(&volatility) {
        return Err(QuantsimError::InvalidParameter {
            name: "volatility".into(),
            reason: format!("{volatility} outside [0, 1)"),
        });
    }

    let mut series = Vec::with_capacity(bars);
    let mut prev_close = start_price;
    for i in 0..bars {
        let open = prev_close;
        let ret = if volatility > 0.0 {
            rng.gen_range(-volatility..=volatility)
        } else {
            0.0
        };
        let close = open * (1.0 + ret);
        let wick = volatility / 2.0;
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..=wick));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..=wick));
        let volume = rng.gen_range(1_000.0..10_000.0_f64).round();

        series.push(Bar {
            timestamp: start + Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume,
        });
        prev_close = close;
    }

    BarSeries::new(series)
}
