//! Numeric primitives used by the built-in checks.
//!
//! All statistics are computed in `f64` regardless of the pixel type. The
//! variance is the population variance (divisor `n`).

use crate::image::Frame;

/// Mean, median and variance of a set of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    /// Arithmetic mean.
    pub mean: f64,
    /// Median (average of the two middle samples for even counts).
    pub median: f64,
    /// Population variance.
    pub variance: f64,
}

/// Per-row statistics of a frame (one entry per row, top to bottom).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSummaries {
    /// Row means.
    pub mean: Vec<f64>,
    /// Row medians.
    pub median: Vec<f64>,
    /// Row variances.
    pub variance: Vec<f64>,
}

/// Compute the summary of `values`. Returns `None` for an empty slice.
pub fn summary(values: &[f32]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let n = count_as_f64(values.len());
    let mean = values.iter().map(|v| f64::from(*v)).sum::<f64>() / n;
    let variance = values
        .iter()
        .map(|v| {
            let d = f64::from(*v) - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    let samples: Vec<f64> = values.iter().map(|v| f64::from(*v)).collect();
    let median = median(&samples)?;
    Some(Summary {
        mean,
        median,
        variance,
    })
}

/// Median of `values`. NaN if any sample is NaN, `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    if values.iter().any(|v| v.is_nan()) {
        return Some(f64::NAN);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted.get(mid).copied()
    } else {
        let upper = sorted.get(mid).copied()?;
        let lower = sorted.get(mid.checked_sub(1)?).copied()?;
        Some((lower + upper) / 2.0)
    }
}

/// Per-row statistics of `frame`. Rows of zero width are skipped.
pub fn row_summaries(frame: &Frame) -> RowSummaries {
    let mut rows = RowSummaries::default();
    for row in frame.rows() {
        if let Some(s) = summary(row) {
            rows.mean.push(s.mean);
            rows.median.push(s.median);
            rows.variance.push(s.variance);
        }
    }
    rows
}

/// Convert a sample count to `f64` for averaging.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn count_as_f64(n: usize) -> f64 {
    n as f64
}
