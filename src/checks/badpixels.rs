//! Science pixels sitting below the over-scan (bias) level.

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::overscan::{OVERSCAN, OVER_SCAN};
use super::{crop, numbers, object, quadrant_of, Check, CheckError};
use crate::image::Image;
use crate::instrument::InstrumentCatalog;
use crate::stats;
use crate::storage::Storage;

/// Registered name of [`PixelsBelowAdcCheck`].
pub const PIXELS_BELOW_ADC: &str = "PIXELS BELOW ADC";
/// Result key written by [`PixelsBelowAdcCheck`].
pub const PIXELS_BELOW_ADC_KEY: &str = "Pixels_below_ADC";

/// Counts science pixels strictly below the median of the over-scan row medians.
#[derive(Debug, Clone)]
pub struct PixelsBelowAdcCheck {
    catalog: Arc<InstrumentCatalog>,
    dependencies: Vec<String>,
}

impl PixelsBelowAdcCheck {
    /// Check reading geometry from `catalog`.
    pub fn new(catalog: Arc<InstrumentCatalog>) -> Self {
        Self {
            catalog,
            dependencies: vec![OVERSCAN.to_owned()],
        }
    }
}

impl Check for PixelsBelowAdcCheck {
    fn name(&self) -> &str {
        PIXELS_BELOW_ADC
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn run_check(&self, image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        let over_scan = object(&storage.result, PIXELS_BELOW_ADC, OVER_SCAN)?;
        let medians = numbers(over_scan, PIXELS_BELOW_ADC, "median")?;
        let level = stats::median(&medians)
            .ok_or_else(|| super::missing(PIXELS_BELOW_ADC, "Over-Scan.median"))?;
        info!(check = PIXELS_BELOW_ADC, image = %image.name, level, "measuring pixels below over-scan level");

        let quadrant = quadrant_of(&self.catalog, image)?;
        let science = crop(image, &quadrant.science)?;
        let count = science
            .pixels()
            .iter()
            .filter(|p| f64::from(**p) < level)
            .count();
        storage
            .result
            .insert(PIXELS_BELOW_ADC_KEY.to_owned(), json!({"Number": count}));
        Ok(())
    }
}
