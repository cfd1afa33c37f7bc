//! Image handles and the loader seam.
//!
//! The pipeline only sees [`Image`]: a name, instrument/mode identity, an
//! optional detector/quadrant coordinate, header fields and a row-major
//! pixel [`Frame`]. Loading is behind [`ImageLoader`]; [`FitsLoader`]
//! decodes work items of the form `path` or `path[N]`.

pub mod fits;
pub mod supplier;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub use fits::{FitsError, FitsFile, Header, HeaderValue};

/// Observing mode assumed when the header does not declare one.
pub const DEFAULT_OBSERVING_MODE: &str = "SCIENCE";

/// Errors raised while building an image handle.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Reading the underlying file failed.
    #[error(transparent)]
    Fits(#[from] FitsError),

    /// The header does not identify a supported instrument.
    #[error("unknown image format: {0}")]
    UnknownFormat(String),

    /// Frame dimensions and pixel count disagree.
    #[error("frame of {width}x{height} cannot hold {len} pixels")]
    Shape {
        /// Declared width.
        width: usize,
        /// Declared height.
        height: usize,
        /// Number of pixels supplied.
        len: usize,
    },

    /// A region does not fit inside the frame.
    #[error("region {region} outside {width}x{height} frame")]
    RegionOutOfBounds {
        /// Offending region.
        region: Region,
        /// Frame width.
        width: usize,
        /// Frame height.
        height: usize,
    },

    /// The image lacks the detector/quadrant coordinate geometry lookups need.
    #[error("image {image} has no {coordinate} coordinate")]
    MissingCoordinate {
        /// Image name.
        image: String,
        /// `detector` or `quadrant`.
        coordinate: &'static str,
    },
}

/// Rectangular region, 1-based and inclusive on both corners.
///
/// Deserialized from `[[x0, y0], [x1, y1]]`, where `x` is the column and `y`
/// the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(from = "[[usize; 2]; 2]")]
pub struct Region {
    /// First column.
    pub x0: usize,
    /// First row.
    pub y0: usize,
    /// Last column.
    pub x1: usize,
    /// Last row.
    pub y1: usize,
}

impl From<[[usize; 2]; 2]> for Region {
    fn from(corners: [[usize; 2]; 2]) -> Self {
        let [[x0, y0], [x1, y1]] = corners;
        Self { x0, y0, x1, y1 }
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[[{}, {}], [{}, {}]]", self.x0, self.y0, self.x1, self.y1)
    }
}

/// Row-major 2-D pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: usize,
    height: usize,
    pixels: Vec<f32>,
}

impl Frame {
    /// Wrap `pixels` as a `width` x `height` frame.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::Shape`] if the pixel count does not match.
    pub fn new(width: usize, height: usize, pixels: Vec<f32>) -> Result<Self, ImageError> {
        if width.checked_mul(height) != Some(pixels.len()) {
            return Err(ImageError::Shape {
                width,
                height,
                len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    pub fn height(&self) -> usize {
        self.height
    }

    /// All pixels, row by row.
    pub fn pixels(&self) -> &[f32] {
        &self.pixels
    }

    /// Iterate over rows.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        self.pixels.chunks_exact(self.width.max(1))
    }

    /// Copy out `region`.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::RegionOutOfBounds`] if the region is empty,
    /// inverted, or extends past the frame.
    pub fn region(&self, region: &Region) -> Result<Self, ImageError> {
        let out_of_bounds = || ImageError::RegionOutOfBounds {
            region: *region,
            width: self.width,
            height: self.height,
        };
        if region.x0 == 0
            || region.y0 == 0
            || region.x0 > region.x1
            || region.y0 > region.y1
            || region.x1 > self.width
            || region.y1 > self.height
        {
            return Err(out_of_bounds());
        }

        let col_start = region.x0.saturating_sub(1);
        let row_start = region.y0.saturating_sub(1);
        let width = region.x1.saturating_sub(col_start);
        let height = region.y1.saturating_sub(row_start);

        let mut pixels = Vec::with_capacity(width.saturating_mul(height));
        for row in self.rows().skip(row_start).take(height) {
            let cols = row
                .get(col_start..region.x1)
                .ok_or_else(out_of_bounds)?;
            pixels.extend_from_slice(cols);
        }
        Self::new(width, height, pixels)
    }
}

/// One image (a single detector quadrant) ready for processing.
#[derive(Debug, Clone)]
pub struct Image {
    /// Display name: file base name plus `[N]` extension suffix.
    pub name: String,
    /// Instrument identifier used for schema and geometry lookups.
    pub instrument: String,
    /// Observing mode used for schema lookups.
    pub observing_mode: String,
    /// Detector index in the instrument's detector list.
    pub detector: Option<usize>,
    /// Quadrant index in the detector's quadrant list.
    pub quadrant: Option<usize>,
    /// Header of the HDU the image was read from.
    pub header: Header,
    /// Pixel data.
    pub data: Frame,
}

impl Image {
    /// The detector and quadrant indices.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::MissingCoordinate`] if either is unknown.
    pub fn location(&self) -> Result<(usize, usize), ImageError> {
        let detector = self.detector.ok_or_else(|| ImageError::MissingCoordinate {
            image: self.name.clone(),
            coordinate: "detector",
        })?;
        let quadrant = self.quadrant.ok_or_else(|| ImageError::MissingCoordinate {
            image: self.name.clone(),
            coordinate: "quadrant",
        })?;
        Ok((detector, quadrant))
    }
}

/// Builds image handles from work-item identifiers.
pub trait ImageLoader: Send {
    /// Load the image referenced by `item`.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be opened or decoded.
    fn load(&mut self, item: &str) -> Result<Image, ImageError>;
}

/// Split `path[N]` into the path and extension; a bare path is extension 1.
pub fn parse_item(item: &str) -> (PathBuf, usize) {
    if let Some(body) = item.strip_suffix(']') {
        if let Some((path, ext)) = body.rsplit_once('[') {
            if let Ok(ext) = ext.parse::<usize>() {
                if !path.is_empty() {
                    return (PathBuf::from(path), ext);
                }
            }
        }
    }
    (PathBuf::from(item), 1)
}

/// Header-driven loader for FITS work items.
#[derive(Debug)]
pub struct FitsLoader {
    known_instruments: Vec<String>,
    grid_columns: usize,
    cached: Option<Arc<FitsFile>>,
}

impl FitsLoader {
    /// Create a loader that maps `INSTRUME` values onto `known_instruments`.
    ///
    /// `grid_columns` is the detector-grid width used to turn `CCDX`/`CCDY`
    /// into a detector index.
    pub fn new(known_instruments: Vec<String>, grid_columns: usize) -> Self {
        Self {
            known_instruments,
            grid_columns,
            cached: None,
        }
    }

    /// Open `path`, reusing the HDU index when the file was the last one read.
    fn open(&mut self, path: &Path) -> Result<Arc<FitsFile>, ImageError> {
        if let Some(cached) = &self.cached {
            if cached.path() == path {
                return Ok(Arc::clone(cached));
            }
        }
        debug!(path = %path.display(), "opening FITS file");
        let file = Arc::new(FitsFile::open(path)?);
        self.cached = Some(Arc::clone(&file));
        Ok(file)
    }

    /// Map a raw `INSTRUME` value onto a known instrument name.
    fn instrument_name(&self, raw: &str) -> String {
        let upper = raw.trim().to_uppercase();
        self.known_instruments
            .iter()
            .find(|known| upper.contains(known.as_str()))
            .cloned()
            .unwrap_or(upper)
    }

    fn detector_index(&self, header: &Header) -> Option<usize> {
        if let Some(d) = header.get_int("DETECTOR") {
            return usize::try_from(d).ok();
        }
        let x = usize::try_from(header.get_int("CCDX")?).ok()?;
        let y = usize::try_from(header.get_int("CCDY")?).ok()?;
        y.checked_mul(self.grid_columns)?.checked_add(x)
    }
}

impl ImageLoader for FitsLoader {
    fn load(&mut self, item: &str) -> Result<Image, ImageError> {
        let (path, extension) = parse_item(item);
        let file = self.open(&path)?;
        let header = file
            .header(extension)
            .cloned()
            .ok_or_else(|| ImageError::UnknownFormat(item.to_owned()))?;
        let raw_instrument = header
            .get_str("INSTRUME")
            .ok_or_else(|| ImageError::UnknownFormat(item.to_owned()))?;
        let instrument = self.instrument_name(raw_instrument);
        let data = file.read_image(extension)?;

        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Image {
            name: format!("{base}[{extension}]"),
            instrument,
            observing_mode: header
                .get_str("OBSMODE")
                .map(str::to_owned)
                .unwrap_or_else(|| DEFAULT_OBSERVING_MODE.to_owned()),
            detector: self.detector_index(&header),
            quadrant: header
                .get_int("QUADRANT")
                .and_then(|q| usize::try_from(q).ok()),
            header,
            data,
        })
    }
}
