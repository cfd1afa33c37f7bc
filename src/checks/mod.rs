//! Check and report capabilities plus the built-in catalog.
//!
//! A [`Check`] measures image data into `Storage.result`; a [`Report`]
//! interprets earlier results into `Storage.report`. Both are stateless
//! values shared behind `Arc`, so one instance can serve every image.

pub mod badpixels;
pub mod overscan;
pub mod reports;

use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::image::{Frame, Image, ImageError, Region};
use crate::instrument::{InstrumentCatalog, InstrumentError, Quadrant};
use crate::registry::{RegistryBuilder, RegistryError};
use crate::storage::Storage;

pub use badpixels::PixelsBelowAdcCheck;
pub use overscan::{OverscanCheck, ScienceStatsCheck};
pub use reports::{
    PixelsBelowAdcReport, PostScanReport, PostScanStyle, PreScanReport, ScienceStatsReport,
};

/// Errors raised inside a check or report body.
#[derive(Debug, Error)]
pub enum CheckError {
    /// Image data could not be sliced.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Geometry lookup failed.
    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    /// A result the component depends on is absent or malformed.
    #[error("{component}: missing or malformed result {key:?}")]
    MissingResult {
        /// Component that needed the result.
        component: String,
        /// Result key (dotted path).
        key: String,
    },

    /// A region held no samples.
    #[error("{component}: region {region} holds no samples")]
    NoSamples {
        /// Component that read the region.
        component: String,
        /// The region.
        region: Region,
    },

    /// Any other failure raised by a component body.
    #[error("{component}: {detail}")]
    Failed {
        /// Component that failed.
        component: String,
        /// What went wrong.
        detail: String,
    },
}

/// Measurement routine.
pub trait Check: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// Names of checks that must run before this one.
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Measure `image` into `storage.result`.
    ///
    /// # Errors
    ///
    /// Returns an error if the measurement cannot be made.
    fn run_check(&self, image: &Image, storage: &mut Storage) -> Result<(), CheckError>;
}

/// Interpretive routine over earlier check results.
pub trait Report: Send + Sync {
    /// Registered name.
    fn name(&self) -> &str;

    /// The check whose results this report reads, if any.
    fn check_dependency(&self) -> Option<&str> {
        None
    }

    /// Names of reports that must run before this one.
    fn dependencies(&self) -> &[String] {
        &[]
    }

    /// Render verdicts into `storage.report`.
    ///
    /// # Errors
    ///
    /// Returns an error if required results are missing.
    fn run_report(&self, image: &Image, storage: &mut Storage) -> Result<(), CheckError>;
}

/// Register every built-in check and report as a cached singleton.
///
/// # Errors
///
/// Returns [`RegistryError::DuplicateName`] if any name is already taken.
pub fn register_builtins(
    builder: &mut RegistryBuilder,
    catalog: Arc<InstrumentCatalog>,
) -> Result<(), RegistryError> {
    let geometry = Arc::clone(&catalog);
    builder.subscribe_check(
        overscan::OVERSCAN,
        move || OverscanCheck::new(Arc::clone(&geometry)),
        true,
    )?;
    let geometry = Arc::clone(&catalog);
    builder.subscribe_check(
        overscan::SCIENCE_STATS,
        move || ScienceStatsCheck::new(Arc::clone(&geometry)),
        true,
    )?;
    let geometry = Arc::clone(&catalog);
    builder.subscribe_check(
        badpixels::PIXELS_BELOW_ADC,
        move || PixelsBelowAdcCheck::new(Arc::clone(&geometry)),
        true,
    )?;

    let geometry = Arc::clone(&catalog);
    builder.subscribe_report(
        reports::POSTSCAN_REP,
        move || PostScanReport::new(PostScanStyle::Summary, Arc::clone(&geometry)),
        true,
    )?;
    let geometry = Arc::clone(&catalog);
    builder.subscribe_report(
        reports::FULL_POSTSCAN_REP,
        move || PostScanReport::new(PostScanStyle::Full, Arc::clone(&geometry)),
        true,
    )?;
    builder.subscribe_report(reports::PRESCAN_REP, PreScanReport::default, true)?;
    builder.subscribe_report(
        reports::SCIENCES_STATS_REP,
        ScienceStatsReport::default,
        true,
    )?;
    builder.subscribe_report(
        reports::PIXELS_BELOW_ADC_REP,
        PixelsBelowAdcReport::default,
        true,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers shared by the built-ins
// ---------------------------------------------------------------------------

/// Geometry of the quadrant `image` was read from.
pub(crate) fn quadrant_of<'a>(
    catalog: &'a InstrumentCatalog,
    image: &Image,
) -> Result<&'a Quadrant, CheckError> {
    let (detector, quadrant) = image.location()?;
    Ok(catalog.get(&image.instrument)?.quadrant(detector, quadrant)?)
}

/// Copy `region` out of the image frame.
pub(crate) fn crop(image: &Image, region: &Region) -> Result<Frame, CheckError> {
    Ok(image.data.region(region)?)
}

/// Object stored under `key` in `source`.
pub(crate) fn object<'a>(
    source: &'a Map<String, Value>,
    component: &str,
    key: &str,
) -> Result<&'a Map<String, Value>, CheckError> {
    source
        .get(key)
        .and_then(Value::as_object)
        .ok_or_else(|| missing(component, key))
}

/// Numeric array stored under `key` in `source`; `null` entries read as NaN.
pub(crate) fn numbers(
    source: &Map<String, Value>,
    component: &str,
    key: &str,
) -> Result<Vec<f64>, CheckError> {
    let values = source
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| missing(component, key))?;
    Ok(values
        .iter()
        .map(|v| v.as_f64().unwrap_or(f64::NAN))
        .collect())
}

pub(crate) fn missing(component: &str, key: &str) -> CheckError {
    CheckError::MissingResult {
        component: component.to_owned(),
        key: key.to_owned(),
    }
}
