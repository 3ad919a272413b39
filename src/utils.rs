/// Returns timestamp in ns
#[cfg(unix)]
#[inline(never)]
pub fn mono_time_ns() -> u64 {
    use libc::{CLOCK_MONOTONIC, clock_gettime, timespec};
    unsafe {
        let mut ts = timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        clock_gettime(CLOCK_MONOTONIC, &mut ts);
        (ts.tv_sec as u64) * 1_000_000_000 + (ts.tv_nsec as u64)
    }
}

/// Latency samples of one benchmark series.
///
/// Samples are recorded unsorted on the hot path; [`summary`](Self::summary)
/// sorts once at the end.
#[derive(Debug, Clone)]
pub struct LatencySamples {
    name: String,
    samples: Vec<u64>,
}

/// Quantiles reported for every series.
pub const REPORTED_QUANTILES: [f64; 9] = [0.1, 0.5, 0.75, 0.9, 0.95, 0.99, 0.999, 0.9999, 0.99999];

/// Sorted view over a finished series.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencySummary {
    pub name: String,
    pub count: usize,
    pub min: u64,
    pub max: u64,
    pub quantiles: Vec<(f64, u64)>,
}

impl LatencySamples {
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            samples: Vec::with_capacity(capacity),
        }
    }

    #[inline(always)]
    pub fn record(&mut self, value: u64) {
        self.samples.push(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Sorts the samples and extracts min, max and [`REPORTED_QUANTILES`].
    ///
    /// Returns `None` for an empty series.
    pub fn summary(&mut self) -> Option<LatencySummary> {
        self.samples.sort_unstable();
        let (&min, &max) = (self.samples.first()?, self.samples.last()?);
        let quantiles = REPORTED_QUANTILES
            .iter()
            .map(|&p| (p, quantile(&self.samples, p)))
            .collect();
        Some(LatencySummary {
            name: self.name.clone(),
            count: self.samples.len(),
            min,
            max,
            quantiles,
        })
    }
}

/// Nearest-rank quantile of sorted, non-empty `samples`.
///
/// # Panics
///
/// Panics if `samples` is empty or `p` is outside `0.0..=1.0`.
pub fn quantile(samples: &[u64], p: f64) -> u64 {
    let n = samples.len();
    assert!(n > 0);
    assert!((0.0..=1.0).contains(&p));
    let idx = ((n - 1) as f64 * p).round() as usize;
    samples[idx]
}

impl LatencySummary {
    pub fn csv_header() -> String {
        let mut header = String::from("name,n,min,max");
        for p in REPORTED_QUANTILES {
            header.push(',');
            header.push_str(&p.to_string());
        }
        header
    }

    pub fn csv_row(&self) -> String {
        let mut row = format!("{},{},{},{}", self.name, self.count, self.min, self.max);
        for (_, value) in &self.quantiles {
            row.push(',');
            row.push_str(&value.to_string());
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn mono_time_ns_is_monotonic_non_decreasing() {
        let t1 = mono_time_ns();
        let t2 = mono_time_ns();
        assert!(t1 > 0);
        assert!(
            t2 >= t1,
            "mono_time_ns should be monotonic: t2={} < t1={}",
            t2,
            t1
        );
    }

    #[cfg(unix)]
    #[test]
    fn mono_time_ns_increases_over_sleep() {
        let t1 = mono_time_ns();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t2 = mono_time_ns();
        assert!(t2 > t1, "mono_time_ns should increase over time: t2={} <= t1={}", t2, t1);
    }

    #[test]
    fn summary_sorts_and_picks_nearest_rank() {
        let mut samples = LatencySamples::with_capacity("offer", 8);
        for value in [5, 1, 9, 3, 7] {
            samples.record(value);
        }
        assert_eq!(samples.len(), 5);

        let summary = samples.summary().unwrap();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.min, 1);
        assert_eq!(summary.max, 9);
        // n = 5: idx = round(4 * p)
        assert_eq!(summary.quantiles[1], (0.5, 5));
        assert_eq!(summary.quantiles[3], (0.9, 9));
    }

    #[test]
    fn empty_series_has_no_summary() {
        let mut samples = LatencySamples::with_capacity("empty", 0);
        assert!(samples.is_empty());
        assert!(samples.summary().is_none());
    }

    #[test]
    #[should_panic]
    fn quantile_panics_on_p_above_one() {
        quantile(&[42], 1.1);
    }

    #[test]
    fn csv_row_matches_header_columns() {
        let mut samples = LatencySamples::with_capacity("claim", 3);
        for value in [10, 20, 30] {
            samples.record(value);
        }
        let summary = samples.summary().unwrap();

        let header_columns = LatencySummary::csv_header().split(',').count();
        let row = summary.csv_row();
        assert_eq!(row.split(',').count(), header_columns);
        assert!(row.starts_with("claim,3,10,30,"));
    }
}
