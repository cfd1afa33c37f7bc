//! detqa: distributed quality assessment of per-detector instrument images.
//!
//! Each image gets a dependency-ordered plan of checks (measurements) and
//! reports (verdicts) resolved from a sealed [`registry`] by the
//! [`configurator`]. A [`processor`] runs the plan and hands the finished
//! [`storage`] record to the [`output`] layer. The [`distribution`] layer
//! lets many workers pull images from one enumerator while single-writer
//! sinks collect their results.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;

pub mod image;
pub mod instrument;
pub mod stats;

pub mod checks;
pub mod configurator;
pub mod registry;
pub mod storage;

pub mod processor;

pub mod distribution;
pub mod output;

pub mod controller;
