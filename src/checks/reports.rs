//! Verdicts rendered from check results.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{info, warn};

use super::badpixels::{PIXELS_BELOW_ADC, PIXELS_BELOW_ADC_KEY};
use super::overscan::{OVERSCAN, OVER_SCAN, PRE_SCAN, SCIENCE_STATS, SCIENCE_STATS_KEY};
use super::{numbers, object, quadrant_of, CheckError, Report};
use crate::image::Image;
use crate::instrument::InstrumentCatalog;
use crate::stats::count_as_f64;
use crate::storage::Storage;

/// Registered name of the summary over-scan report.
pub const POSTSCAN_REP: &str = "POSTSCAN_REP";
/// Registered name of the line-listing over-scan report.
pub const FULL_POSTSCAN_REP: &str = "FULL_POSTSCAN_REP";
/// Registered name of [`PreScanReport`].
pub const PRESCAN_REP: &str = "PRESCAN_REP";
/// Registered name of [`ScienceStatsReport`].
pub const SCIENCES_STATS_REP: &str = "SCIENCES_STATS_REP";
/// Registered name of [`PixelsBelowAdcReport`].
pub const PIXELS_BELOW_ADC_REP: &str = "PIXELS_BELOW_ADC_REP";

/// Verdict tag for results within limits.
pub const NOMINAL: &str = "Nominal";

/// How [`PostScanReport`] words its warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostScanStyle {
    /// Count and percentage of offending lines.
    Summary,
    /// Indices of the offending lines.
    Full,
}

/// Flags over-scan rows whose average exceeds the quadrant threshold.
#[derive(Debug, Clone)]
pub struct PostScanReport {
    style: PostScanStyle,
    catalog: Arc<InstrumentCatalog>,
}

impl PostScanReport {
    /// Report in `style`, reading thresholds from `catalog`.
    pub fn new(style: PostScanStyle, catalog: Arc<InstrumentCatalog>) -> Self {
        Self { style, catalog }
    }

    fn warning(&self, averages: &[f64], offending: &[usize]) -> String {
        match self.style {
            PostScanStyle::Summary => {
                let percent =
                    100.0 * count_as_f64(offending.len()) / count_as_f64(averages.len());
                format!(
                    "WARNING: Exceeding value in {}({percent:.2}%) of lines",
                    offending.len()
                )
            }
            PostScanStyle::Full => {
                let lines: Vec<String> = offending.iter().map(ToString::to_string).collect();
                format!("WARNING: Exceeding value in lines: {}", lines.join(" "))
            }
        }
    }
}

impl Report for PostScanReport {
    fn name(&self) -> &str {
        match self.style {
            PostScanStyle::Summary => POSTSCAN_REP,
            PostScanStyle::Full => FULL_POSTSCAN_REP,
        }
    }

    fn check_dependency(&self) -> Option<&str> {
        Some(OVERSCAN)
    }

    fn run_report(&self, image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        let threshold = quadrant_of(&self.catalog, image)?.overscan_threshold;
        let over_scan = object(&storage.result, self.name(), OVER_SCAN)?;
        let averages = numbers(over_scan, self.name(), "average")?;

        let offending: Vec<usize> = averages
            .iter()
            .enumerate()
            .filter(|(_, avg)| **avg > threshold)
            .map(|(line, _)| line)
            .collect();

        let result = if offending.is_empty() {
            info!(report = self.name(), image = %image.name, "over scan thresholds are OK");
            NOMINAL.to_owned()
        } else {
            warn!(
                report = self.name(),
                image = %image.name,
                lines = offending.len(),
                threshold,
                "over scan thresholds exceeded"
            );
            self.warning(&averages, &offending)
        };
        storage
            .report
            .insert(OVER_SCAN.to_owned(), json!({"Result": result}));
        Ok(())
    }
}

/// Copies a check result object into the report and tags it nominal.
fn copy_nominal(
    storage: &mut Storage,
    component: &str,
    key: &str,
) -> Result<(), CheckError> {
    let mut section = object(&storage.result, component, key)?.clone();
    section.insert("Result".to_owned(), Value::from(NOMINAL));
    storage.report.insert(key.to_owned(), Value::Object(section));
    Ok(())
}

/// Reports the pre-scan statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreScanReport;

impl Report for PreScanReport {
    fn name(&self) -> &str {
        PRESCAN_REP
    }

    fn check_dependency(&self) -> Option<&str> {
        Some(OVERSCAN)
    }

    fn run_report(&self, _image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        copy_nominal(storage, PRESCAN_REP, PRE_SCAN)
    }
}

/// Reports the science-region statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScienceStatsReport;

impl Report for ScienceStatsReport {
    fn name(&self) -> &str {
        SCIENCES_STATS_REP
    }

    fn check_dependency(&self) -> Option<&str> {
        Some(SCIENCE_STATS)
    }

    fn run_report(&self, _image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        copy_nominal(storage, SCIENCES_STATS_REP, SCIENCE_STATS_KEY)
    }
}

/// Reports how many science pixels sit below the over-scan level.
#[derive(Debug, Clone, Copy, Default)]
pub struct PixelsBelowAdcReport;

impl Report for PixelsBelowAdcReport {
    fn name(&self) -> &str {
        PIXELS_BELOW_ADC_REP
    }

    fn check_dependency(&self) -> Option<&str> {
        Some(PIXELS_BELOW_ADC)
    }

    fn run_report(&self, image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        let number = object(&storage.result, PIXELS_BELOW_ADC_REP, PIXELS_BELOW_ADC_KEY)?
            .get("Number")
            .and_then(Value::as_u64)
            .ok_or_else(|| super::missing(PIXELS_BELOW_ADC_REP, "Pixels_below_ADC.Number"))?;
        let result = if number == 0 {
            NOMINAL.to_owned()
        } else {
            warn!(report = PIXELS_BELOW_ADC_REP, image = %image.name, number, "pixels below over-scan level");
            format!("WARNING: {number} pixels below over-scan level")
        };
        storage.report.insert(
            PIXELS_BELOW_ADC_KEY.to_owned(),
            json!({"Number": number, "Result": result}),
        );
        Ok(())
    }
}
