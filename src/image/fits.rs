//! Minimal FITS reader.
//!
//! Supports what the pipeline needs: walking the HDU list of a
//! (multi-extension) file, reading header cards, and decoding a 2-D image
//! HDU into a row-major `f32` [`Frame`]. Tables and random groups are
//! skipped over but never decoded.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::Frame;

/// FITS logical record size in bytes.
pub const BLOCK_LEN: usize = 2880;
/// Header card size in bytes.
const CARD_LEN: usize = 80;

/// Errors raised while reading FITS files.
#[derive(Debug, Error)]
pub enum FitsError {
    /// Underlying I/O failure.
    #[error("FITS I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file structure does not follow the FITS standard.
    #[error("malformed FITS file {path}: {detail}")]
    Malformed {
        /// File being read.
        path: PathBuf,
        /// What was wrong.
        detail: String,
    },

    /// The requested HDU does not exist.
    #[error("HDU {index} not present in {path} ({count} HDUs)")]
    MissingHdu {
        /// File being read.
        path: PathBuf,
        /// Requested HDU index.
        index: usize,
        /// Number of HDUs in the file.
        count: usize,
    },

    /// The requested HDU is not a 2-D image.
    #[error("HDU {index} of {path} is not a 2-D image (NAXIS = {naxis})")]
    NotAnImage {
        /// File being read.
        path: PathBuf,
        /// Requested HDU index.
        index: usize,
        /// Dimensionality found in the header.
        naxis: i64,
    },
}

/// A typed header value.
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    /// Logical `T` / `F`.
    Bool(bool),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Quoted string value (trailing blanks removed).
    Str(String),
}

/// Keyword/value pairs of one HDU header. Commentary cards are dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header {
    cards: BTreeMap<String, HeaderValue>,
}

impl Header {
    /// Insert or replace a keyword.
    pub fn insert(&mut self, keyword: impl Into<String>, value: HeaderValue) {
        self.cards.insert(keyword.into(), value);
    }

    /// Raw value of a keyword.
    pub fn get(&self, keyword: &str) -> Option<&HeaderValue> {
        self.cards.get(keyword)
    }

    /// Whether the keyword is present.
    pub fn contains(&self, keyword: &str) -> bool {
        self.cards.contains_key(keyword)
    }

    /// String value of a keyword.
    pub fn get_str(&self, keyword: &str) -> Option<&str> {
        match self.cards.get(keyword)? {
            HeaderValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Integer value of a keyword; integral floats are accepted.
    #[allow(clippy::cast_possible_truncation)]
    pub fn get_int(&self, keyword: &str) -> Option<i64> {
        match self.cards.get(keyword)? {
            HeaderValue::Int(i) => Some(*i),
            HeaderValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Floating-point value of a keyword; integers are widened.
    #[allow(clippy::cast_precision_loss)]
    pub fn get_float(&self, keyword: &str) -> Option<f64> {
        match self.cards.get(keyword)? {
            HeaderValue::Float(f) => Some(*f),
            HeaderValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Number of keywords.
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    /// Whether the header holds no keywords.
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Header plus the location of the data unit inside the file.
#[derive(Debug, Clone)]
struct Hdu {
    header: Header,
    data_offset: u64,
}

/// An opened FITS file with its HDU index. Data units are read on demand.
#[derive(Debug)]
pub struct FitsFile {
    path: PathBuf,
    hdus: Vec<Hdu>,
}

impl FitsFile {
    /// Open `path` and index every HDU header.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid FITS.
    pub fn open(path: &Path) -> Result<Self, FitsError> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut hdus = Vec::new();
        let mut offset: u64 = 0;

        while offset < file_len {
            reader.seek(SeekFrom::Start(offset))?;
            let Some((header, header_len)) = read_header(&mut reader, path)? else {
                break;
            };
            let data_len = padded(data_size(&header, path)?);
            let data_offset = offset
                .checked_add(header_len)
                .ok_or_else(|| malformed(path, "file offset overflow"))?;
            offset = data_offset
                .checked_add(data_len)
                .ok_or_else(|| malformed(path, "file offset overflow"))?;
            hdus.push(Hdu {
                header,
                data_offset,
            });
        }

        if hdus.is_empty() {
            return Err(malformed(path, "no HDU found"));
        }

        Ok(Self {
            path: path.to_path_buf(),
            hdus,
        })
    }

    /// Path the file was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of HDUs, primary included.
    pub fn hdu_count(&self) -> usize {
        self.hdus.len()
    }

    /// Header of HDU `index` (0 = primary).
    pub fn header(&self, index: usize) -> Option<&Header> {
        self.hdus.get(index).map(|h| &h.header)
    }

    /// Decode HDU `index` as a 2-D image, applying `BSCALE`/`BZERO`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HDU is missing, not a 2-D image, or truncated.
    pub fn read_image(&self, index: usize) -> Result<Frame, FitsError> {
        let hdu = self.hdus.get(index).ok_or_else(|| FitsError::MissingHdu {
            path: self.path.clone(),
            index,
            count: self.hdus.len(),
        })?;
        let header = &hdu.header;
        let naxis = header.get_int("NAXIS").unwrap_or(0);
        if naxis != 2 {
            return Err(FitsError::NotAnImage {
                path: self.path.clone(),
                index,
                naxis,
            });
        }
        let width = axis_len(header, 1, &self.path)?;
        let height = axis_len(header, 2, &self.path)?;
        let bitpix = header
            .get_int("BITPIX")
            .ok_or_else(|| malformed(&self.path, "missing BITPIX"))?;
        let sample = SampleType::from_bitpix(bitpix)
            .ok_or_else(|| malformed(&self.path, &format!("unsupported BITPIX {bitpix}")))?;
        let count = width
            .checked_mul(height)
            .ok_or_else(|| malformed(&self.path, "image too large"))?;
        let byte_len = count
            .checked_mul(sample.width())
            .ok_or_else(|| malformed(&self.path, "image too large"))?;

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(hdu.data_offset))?;
        let mut raw = vec![0_u8; byte_len];
        file.read_exact(&mut raw)?;

        let bscale = header.get_float("BSCALE").unwrap_or(1.0);
        let bzero = header.get_float("BZERO").unwrap_or(0.0);
        let pixels = raw
            .chunks_exact(sample.width())
            .map(|chunk| to_f32(sample.decode(chunk) * bscale + bzero))
            .collect();

        Frame::new(width, height, pixels).map_err(|e| malformed(&self.path, &e.to_string()))
    }
}

/// Pixel encodings allowed by `BITPIX`.
#[derive(Debug, Clone, Copy)]
enum SampleType {
    U8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl SampleType {
    fn from_bitpix(bitpix: i64) -> Option<Self> {
        match bitpix {
            8 => Some(Self::U8),
            16 => Some(Self::I16),
            32 => Some(Self::I32),
            64 => Some(Self::I64),
            -32 => Some(Self::F32),
            -64 => Some(Self::F64),
            _ => None,
        }
    }

    fn width(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
        }
    }

    /// Decode one big-endian sample. `chunk` is exactly `width()` bytes.
    #[allow(clippy::cast_precision_loss)]
    fn decode(self, chunk: &[u8]) -> f64 {
        match self {
            Self::U8 => chunk.first().copied().map(f64::from).unwrap_or(0.0),
            Self::I16 => <[u8; 2]>::try_from(chunk)
                .map(|b| f64::from(i16::from_be_bytes(b)))
                .unwrap_or(0.0),
            Self::I32 => <[u8; 4]>::try_from(chunk)
                .map(|b| f64::from(i32::from_be_bytes(b)))
                .unwrap_or(0.0),
            Self::I64 => <[u8; 8]>::try_from(chunk)
                .map(|b| i64::from_be_bytes(b) as f64)
                .unwrap_or(0.0),
            Self::F32 => <[u8; 4]>::try_from(chunk)
                .map(|b| f64::from(f32::from_be_bytes(b)))
                .unwrap_or(0.0),
            Self::F64 => <[u8; 8]>::try_from(chunk)
                .map(f64::from_be_bytes)
                .unwrap_or(0.0),
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn to_f32(value: f64) -> f32 {
    value as f32
}

/// Read header blocks until the `END` card.
///
/// Returns `None` at a clean end of file, otherwise the header and the
/// number of bytes it occupied (a multiple of [`BLOCK_LEN`]).
fn read_header<R: Read>(reader: &mut R, path: &Path) -> Result<Option<(Header, u64)>, FitsError> {
    let mut header = Header::default();
    let mut consumed: u64 = 0;
    let mut block = [0_u8; BLOCK_LEN];

    loop {
        let read = read_block(reader, &mut block)?;
        if read == 0 && consumed == 0 {
            return Ok(None);
        }
        if read < BLOCK_LEN {
            return Err(malformed(path, "truncated header block"));
        }
        consumed = consumed.saturating_add(BLOCK_LEN as u64);

        for card in block.chunks_exact(CARD_LEN) {
            let card = String::from_utf8_lossy(card);
            let keyword = card.get(..8).unwrap_or("").trim_end();
            if keyword == "END" {
                return Ok(Some((header, consumed)));
            }
            if keyword.is_empty() || card.get(8..10) != Some("= ") {
                continue;
            }
            if let Some(value) = parse_value(card.get(10..).unwrap_or("")) {
                header.insert(keyword, value);
            }
        }
    }
}

/// Fill `block`, tolerating short reads. Returns the number of bytes read.
fn read_block<R: Read>(reader: &mut R, block: &mut [u8]) -> Result<usize, FitsError> {
    let mut filled = 0;
    while filled < block.len() {
        let Some(rest) = block.get_mut(filled..) else {
            break;
        };
        let n = reader.read(rest)?;
        if n == 0 {
            break;
        }
        filled = filled.saturating_add(n);
    }
    Ok(filled)
}

/// Parse the value field of a card (the text after `"= "`).
fn parse_value(field: &str) -> Option<HeaderValue> {
    let field = field.trim_start();
    if let Some(rest) = field.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    value.push('\'');
                    chars.next();
                    continue;
                }
                break;
            }
            value.push(c);
        }
        return Some(HeaderValue::Str(value.trim_end().to_owned()));
    }

    let raw = field.split('/').next().unwrap_or("").trim();
    match raw {
        "" => None,
        "T" => Some(HeaderValue::Bool(true)),
        "F" => Some(HeaderValue::Bool(false)),
        _ => raw
            .parse::<i64>()
            .map(HeaderValue::Int)
            .ok()
            .or_else(|| raw.replace('D', "E").parse::<f64>().ok().map(HeaderValue::Float)),
    }
}

/// Size in bytes of the data unit described by `header` (unpadded).
fn data_size(header: &Header, path: &Path) -> Result<u64, FitsError> {
    let naxis = header.get_int("NAXIS").unwrap_or(0);
    if naxis <= 0 {
        return Ok(0);
    }
    let bitpix = header
        .get_int("BITPIX")
        .ok_or_else(|| malformed(path, "missing BITPIX"))?;
    let mut elements: u64 = 1;
    let mut axis: i64 = 1;
    while axis <= naxis {
        let len = header
            .get_int(&format!("NAXIS{axis}"))
            .and_then(|v| u64::try_from(v).ok())
            .ok_or_else(|| malformed(path, &format!("missing NAXIS{axis}")))?;
        elements = elements
            .checked_mul(len)
            .ok_or_else(|| malformed(path, "data unit too large"))?;
        axis = axis.saturating_add(1);
    }
    let pcount = header
        .get_int("PCOUNT")
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(0);
    let gcount = header
        .get_int("GCOUNT")
        .and_then(|v| u64::try_from(v).ok())
        .unwrap_or(1);
    let bits = bitpix.unsigned_abs();
    elements
        .checked_add(pcount)
        .and_then(|n| n.checked_mul(gcount))
        .and_then(|n| n.checked_mul(bits))
        .map(|n| n / 8)
        .ok_or_else(|| malformed(path, "data unit too large"))
}

/// Round a data length up to a whole number of blocks.
fn padded(len: u64) -> u64 {
    let block = BLOCK_LEN as u64;
    len.div_ceil(block).saturating_mul(block)
}

fn axis_len(header: &Header, axis: u8, path: &Path) -> Result<usize, FitsError> {
    header
        .get_int(&format!("NAXIS{axis}"))
        .and_then(|v| usize::try_from(v).ok())
        .ok_or_else(|| malformed(path, &format!("missing NAXIS{axis}")))
}

fn malformed(path: &Path, detail: &str) -> FitsError {
    FitsError::Malformed {
        path: path.to_path_buf(),
        detail: detail.to_owned(),
    }
}
