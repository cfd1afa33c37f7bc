//! Pre-scan, over-scan and science-region statistics.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::{crop, quadrant_of, Check, CheckError};
use crate::image::{Image, Region};
use crate::instrument::InstrumentCatalog;
use crate::stats::{self, Summary};
use crate::storage::Storage;

/// Registered name of [`OverscanCheck`].
pub const OVERSCAN: &str = "OVERSCAN";
/// Registered name of [`ScienceStatsCheck`].
pub const SCIENCE_STATS: &str = "SCIENCE STATS";

/// Result key of the whole-region pre-scan statistics.
pub const PRE_SCAN: &str = "Pre-Scan";
/// Result key of the per-row over-scan statistics.
pub const OVER_SCAN: &str = "Over-Scan";
/// Result key of the science-region statistics.
pub const SCIENCE_STATS_KEY: &str = "ScienceStats";

/// Pre-scan statistics over the whole region and over-scan statistics per row.
#[derive(Debug, Clone)]
pub struct OverscanCheck {
    catalog: Arc<InstrumentCatalog>,
}

impl OverscanCheck {
    /// Check reading geometry from `catalog`.
    pub fn new(catalog: Arc<InstrumentCatalog>) -> Self {
        Self { catalog }
    }
}

impl Check for OverscanCheck {
    fn name(&self) -> &str {
        OVERSCAN
    }

    fn run_check(&self, image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        let quadrant = quadrant_of(&self.catalog, image)?;

        info!(check = OVERSCAN, image = %image.name, "measuring pre scan");
        let prescan = crop(image, &quadrant.prescan)?;
        let pre = region_summary(OVERSCAN, prescan.pixels(), &quadrant.prescan)?;
        storage.result.insert(
            PRE_SCAN.to_owned(),
            json!({"average": pre.mean, "median": pre.median, "var": pre.variance}),
        );

        info!(check = OVERSCAN, image = %image.name, "measuring over scan");
        let overscan = crop(image, &quadrant.overscan)?;
        let rows = stats::row_summaries(&overscan);
        storage.result.insert(
            OVER_SCAN.to_owned(),
            json!({"average": rows.mean, "median": rows.median, "var": rows.variance}),
        );
        Ok(())
    }
}

/// Science-region statistics plus whether any pixel is exactly zero.
#[derive(Debug, Clone)]
pub struct ScienceStatsCheck {
    catalog: Arc<InstrumentCatalog>,
}

impl ScienceStatsCheck {
    /// Check reading geometry from `catalog`.
    pub fn new(catalog: Arc<InstrumentCatalog>) -> Self {
        Self { catalog }
    }
}

impl Check for ScienceStatsCheck {
    fn name(&self) -> &str {
        SCIENCE_STATS
    }

    fn run_check(&self, image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        let quadrant = quadrant_of(&self.catalog, image)?;
        let science = crop(image, &quadrant.science)?;

        info!(check = SCIENCE_STATS, image = %image.name, "measuring statistics");
        let s = region_summary(SCIENCE_STATS, science.pixels(), &quadrant.science)?;
        let zeros = science.pixels().iter().any(|p| *p == 0.0);
        storage.result.insert(
            SCIENCE_STATS_KEY.to_owned(),
            json!({"average": s.mean, "median": s.median, "var": s.variance, "zeros": zeros}),
        );
        Ok(())
    }
}

fn region_summary(component: &str, pixels: &[f32], region: &Region) -> Result<Summary, CheckError> {
    stats::summary(pixels).ok_or_else(|| CheckError::NoSamples {
        component: component.to_owned(),
        region: *region,
    })
}
