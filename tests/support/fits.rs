//! Minimal FITS writer and on-disk fixtures for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use detqa::config::Config;

const BLOCK: usize = 2880;

/// 6x4 quadrant: columns 1-2 prescan, 3-4 science, 5-6 overscan.
pub const GEOMETRY: &str = r#"
name = "VIS"
detectors = 1

[defaults]
overscan_threshold = 100.0

[[quadrant]]
prescan = [[1, 1], [2, 4]]
science = [[3, 1], [4, 4]]
overscan = [[5, 1], [6, 4]]
"#;

/// One image extension.
pub struct Extension {
    pub instrument: &'static str,
    pub mode: &'static str,
    pub overscan: f32,
    pub detector: u8,
}

impl Extension {
    pub fn vis(mode: &'static str, overscan: f32) -> Self {
        Self {
            instrument: "VIS",
            mode,
            overscan,
            detector: 0,
        }
    }

    /// VIS science extension claiming a detector the geometry lacks.
    pub fn off_geometry() -> Self {
        Self {
            detector: 9,
            ..Self::vis("SCIENCE", 10.0)
        }
    }

    /// Rows of `[1, 3, s, s+1, o, o]`.
    fn pixels(&self) -> Vec<f32> {
        let mut pixels = Vec::with_capacity(24);
        for row in 0..4_u8 {
            let science = f32::from(row) * 2.0 + 5.0;
            pixels.extend_from_slice(&[1.0, 3.0, science, science + 1.0]);
            pixels.extend_from_slice(&[self.overscan, self.overscan]);
        }
        pixels
    }
}

fn card(out: &mut Vec<u8>, text: &str) {
    let mut bytes = format!("{text:<80}").into_bytes();
    bytes.truncate(80);
    out.extend_from_slice(&bytes);
}

fn pad(out: &mut Vec<u8>, fill: u8) {
    while out.len() % BLOCK != 0 {
        out.push(fill);
    }
}

fn end_header(out: &mut Vec<u8>) {
    card(out, "END");
    pad(out, b' ');
}

/// Write a primary HDU followed by `extensions` as 6x4 float images.
pub fn write_fits(path: &Path, extensions: &[Extension]) {
    let mut out = Vec::new();
    card(&mut out, "SIMPLE  =                    T");
    card(&mut out, "BITPIX  =                    8");
    card(&mut out, "NAXIS   =                    0");
    card(&mut out, "EXTEND  =                    T");
    end_header(&mut out);

    for ext in extensions {
        card(&mut out, "XTENSION= 'IMAGE   '");
        card(&mut out, "BITPIX  =                  -32");
        card(&mut out, "NAXIS   =                    2");
        card(&mut out, "NAXIS1  =                    6");
        card(&mut out, "NAXIS2  =                    4");
        card(&mut out, "PCOUNT  =                    0");
        card(&mut out, "GCOUNT  =                    1");
        card(&mut out, &format!("INSTRUME= '{:<8}'", ext.instrument));
        card(&mut out, &format!("OBSMODE = '{:<8}'", ext.mode));
        card(&mut out, &format!("DETECTOR= {:>20}", ext.detector));
        card(&mut out, "QUADRANT=                    0");
        end_header(&mut out);
        for value in ext.pixels() {
            out.extend_from_slice(&value.to_be_bytes());
        }
        pad(&mut out, 0);
    }
    std::fs::write(path, out).expect("should write FITS file");
}

/// Input directory with `files` FITS files of `per_file` science extensions
/// each, plus the geometry file. Returns the geometry path.
pub fn populate(dir: &Path, files: usize, per_file: usize) -> PathBuf {
    let geometry = dir.join("geometry.toml");
    std::fs::write(&geometry, GEOMETRY).expect("should write geometry");
    for f in 0..files {
        let extensions: Vec<Extension> = (0..per_file)
            .map(|_| Extension::vis("SCIENCE", 10.0))
            .collect();
        write_fits(&dir.join(format!("frame{f}.fits")), &extensions);
    }
    geometry
}

/// Default config pointed at `geometry`.
pub fn config(geometry: &Path) -> Config {
    let mut config = Config::default();
    config.pipeline.instrument_files = vec![geometry.to_path_buf()];
    config
}
