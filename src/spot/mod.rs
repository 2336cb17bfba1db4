pub(crate) mod analysis;
pub(crate) mod areas;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// One hourly spot price observation
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub country: String,
    pub value: f64,
}

/// Synthetic day-ahead price generator.
///
/// Every call draws fresh waveform parameters, so repeated requests over
/// the same range produce different curves, like a live feed would. The
/// random source is injected so tests can pin a seed.
pub struct SpotGenerator<R: Rng> {
    rng: R,
}

impl SpotGenerator<StdRng> {
    /// Generator for live requests, seeded from the OS
    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }

    /// Reproducible generator for tests
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: Rng> SpotGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    /// Build the hourly panel for `[start, end]` inclusive, one 24-point
    /// day curve per (day, country). An inverted range or an empty
    /// country set yields an empty series.
    ///
    /// Each day curve is a diurnal hump `peak - sin(2πh/23 - π/4)` scaled
    /// by a uniform base level, with Gaussian noise per hour and a floor
    /// at zero.
    pub fn generate(
        &mut self,
        start: NaiveDate,
        end: NaiveDate,
        countries: &[&str],
    ) -> Vec<PricePoint> {
        let mut series = Vec::new();
        if start > end {
            return series;
        }
        for day in start.iter_days().take_while(|d| *d <= end) {
            let midnight = day.and_time(NaiveTime::MIN).and_utc();
            for country in countries {
                series.extend(self.day_curve(midnight, country));
            }
        }
        series
    }

    fn day_curve(&mut self, midnight: DateTime<Utc>, country: &str) -> Vec<PricePoint> {
        let base: f64 = self.rng.gen_range(20.0..60.0);
        let volatility: f64 = self.rng.gen_range(0.3..0.8);
        let peak_factor: f64 = self.rng.gen_range(1.5..2.5);
        // sigma is strictly positive, Normal::new cannot fail here
        let noise = Normal::new(0.0, base * volatility * 0.1)
            .expect("noise standard deviation is positive");

        (0..24)
            .map(|hour| {
                let x = 2.0 * PI * hour as f64 / 23.0;
                let shape = peak_factor - (x - PI / 4.0).sin();
                let value = (base * shape + noise.sample(&mut self.rng)).max(0.0);
                PricePoint {
                    timestamp: midnight + Duration::hours(hour),
                    country: country.to_string(),
                    value,
                }
            })
            .collect()
    }
}
