use crate::spot::PricePoint;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

/// Temporal bucket size for resampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl FromStr for Granularity {
    type Err = String;

    /// Accepts the UI step keys (H/D/W/M) and the long names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "H" | "HOURLY" => Ok(Self::Hourly),
            "D" | "DAILY" => Ok(Self::Daily),
            "W" | "WEEKLY" => Ok(Self::Weekly),
            "M" | "MONTHLY" => Ok(Self::Monthly),
            other => Err(format!("unknown granularity: {other}")),
        }
    }
}

/// Mean price of one country over one calendar bucket
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedPoint {
    pub period_start: DateTime<Utc>,
    pub country: String,
    pub mean_value: f64,
}

/// Result of resampling: hourly passes the series through untouched
#[derive(Debug, Clone, PartialEq)]
pub enum Resampled {
    Hourly(Vec<PricePoint>),
    Bucketed(Vec<AggregatedPoint>),
}

/// Start of the calendar bucket containing `ts`. Weeks are ISO weeks,
/// labelled by their Monday.
fn bucket_start(ts: DateTime<Utc>, granularity: Granularity) -> DateTime<Utc> {
    let day = ts.date_naive();
    let bucket_day = match granularity {
        Granularity::Hourly => day,
        Granularity::Daily => day,
        Granularity::Weekly => day - Duration::days(day.weekday().num_days_from_monday() as i64),
        Granularity::Monthly => NaiveDate::from_ymd_opt(day.year(), day.month(), 1)
            .expect("first of month is always a valid date"),
    };
    bucket_day.and_time(NaiveTime::MIN).and_utc()
}

/// Downsample a price series to the requested granularity.
///
/// Points are grouped by (country, calendar bucket) and averaged; output
/// is ordered by country, then bucket. Buckets with no input rows are
/// simply absent. Hourly returns the input unchanged.
pub fn resample(series: Vec<PricePoint>, granularity: Granularity) -> Resampled {
    if granularity == Granularity::Hourly {
        return Resampled::Hourly(series);
    }

    let mut buckets: BTreeMap<(String, DateTime<Utc>), (f64, usize)> = BTreeMap::new();
    for point in &series {
        let key = (point.country.clone(), bucket_start(point.timestamp, granularity));
        let entry = buckets.entry(key).or_insert((0.0, 0));
        entry.0 += point.value;
        entry.1 += 1;
    }

    let aggregated = buckets
        .into_iter()
        .map(|((country, period_start), (sum, count))| AggregatedPoint {
            period_start,
            country,
            mean_value: sum / count as f64,
        })
        .collect();

    Resampled::Bucketed(aggregated)
}

/// Full-range mean per country, the scalar that colors the map
pub fn country_means(series: &[PricePoint]) -> HashMap<String, f64> {
    let mut sums: HashMap<String, (f64, usize)> = HashMap::new();
    for point in series {
        let entry = sums.entry(point.country.clone()).or_insert((0.0, 0));
        entry.0 += point.value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(country, (sum, count))| (country, sum / count as f64))
        .collect()
}
