//! Per-image execution plans.
//!
//! The [`Schema`] names the reports that apply to an instrument and
//! observing mode. The [`Configurator`] expands those names through the
//! [`Registry`] into an [`ExecutionPlan`]: reports (after their report
//! dependencies) and then the checks they read (after their check
//! dependencies). Every dependency precedes its dependents and each name
//! appears once, at its first-resolved position.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::checks::{Check, Report};
use crate::image::Image;
use crate::registry::{Registry, RegistryError};

/// Schema shipped with the crate.
const BUILTIN_SCHEMA: &str = include_str!("../config/schema.toml");

/// Schema bucket applied to every observing mode.
pub const COMMON: &str = "COMMON";

/// Errors raised while loading a schema or resolving a plan.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The schema file could not be read.
    #[error("failed to read schema {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The schema is not a table of instrument tables of name lists.
    #[error("failed to parse schema: {0}")]
    Parse(#[from] toml::de::Error),

    /// Dependencies loop back on themselves.
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// A registry failure that resolution cannot recover from.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// `instrument -> observing mode -> ordered report names`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    instruments: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

impl Schema {
    /// Parse a TOML schema.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed input.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Read and parse a TOML schema file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        info!(path = %path.display(), "importing schema");
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// The embedded default schema.
    ///
    /// # Errors
    ///
    /// Returns an error only if the embedded document is broken.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_toml_str(BUILTIN_SCHEMA)
    }

    /// Build a schema in code.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, String, Vec<String>)>,
    {
        let mut instruments: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for (instrument, mode, names) in entries {
            instruments.entry(instrument).or_default().insert(mode, names);
        }
        Self { instruments }
    }

    /// `COMMON` names followed by the names for `observing_mode`.
    ///
    /// Unknown instruments or modes contribute nothing.
    pub fn names(&self, instrument: &str, observing_mode: &str) -> Vec<String> {
        let Some(modes) = self.instruments.get(instrument) else {
            warn!(instrument, "instrument not present in schema");
            return Vec::new();
        };
        let mut names = modes.get(COMMON).cloned().unwrap_or_default();
        if observing_mode != COMMON {
            names.extend(modes.get(observing_mode).cloned().unwrap_or_default());
        }
        names
    }

    /// Instruments the schema knows about.
    pub fn instruments(&self) -> impl Iterator<Item = &str> {
        self.instruments.keys().map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// ExecutionPlan
// ---------------------------------------------------------------------------

/// Ordered, deduplicated checks followed by reports.
#[derive(Clone, Default)]
pub struct ExecutionPlan {
    /// Checks in execution order.
    pub checks: Vec<Arc<dyn Check>>,
    /// Reports in execution order.
    pub reports: Vec<Arc<dyn Report>>,
}

impl ExecutionPlan {
    /// Check names in order.
    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Report names in order.
    pub fn report_names(&self) -> Vec<&str> {
        self.reports.iter().map(|r| r.name()).collect()
    }

    /// Whether the plan has neither checks nor reports.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty() && self.reports.is_empty()
    }
}

impl fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("checks", &self.check_names())
            .field("reports", &self.report_names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Configurator
// ---------------------------------------------------------------------------

/// Resolves images to execution plans.
#[derive(Debug, Clone)]
pub struct Configurator {
    registry: Arc<Registry>,
    schema: Schema,
}

impl Configurator {
    /// Resolve through `registry` using `schema`.
    pub fn new(registry: Arc<Registry>, schema: Schema) -> Self {
        Self { registry, schema }
    }

    /// The registry plans are built from.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Plan for `image`.
    ///
    /// Names missing from the registry are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Cycle`] if dependencies loop.
    pub fn get_configuration(&self, image: &Image) -> Result<ExecutionPlan, ConfigError> {
        self.plan_for(&image.instrument, &image.observing_mode, &image.name)
    }

    /// Plan for an image of `instrument` in `observing_mode`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Cycle`] if dependencies loop.
    pub fn plan_for(
        &self,
        instrument: &str,
        observing_mode: &str,
        image_name: &str,
    ) -> Result<ExecutionPlan, ConfigError> {
        info!(image = %image_name, instrument, observing_mode, "configuring reports");
        let names = self.schema.names(instrument, observing_mode);
        if names.is_empty() {
            warn!(image = %image_name, "no reports configured for image");
            return Ok(ExecutionPlan::default());
        }
        debug!(image = %image_name, names = %names.join(", "), "reports to configure");
        self.resolve_names(&names)
    }

    /// Plan for an explicit list of report names.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Cycle`] if dependencies loop.
    pub fn resolve_names(&self, report_names: &[String]) -> Result<ExecutionPlan, ConfigError> {
        let mut reports = Expansion::new("report");
        for name in report_names {
            reports.visit(name, &|n: &str| -> Result<_, RegistryError> {
                let report = self.registry.build_report(n)?;
                let deps = report.dependencies().to_vec();
                Ok((report, deps))
            })?;
        }

        let check_names: Vec<String> = reports
            .out
            .iter()
            .filter_map(|r| r.check_dependency().map(str::to_owned))
            .collect();

        let mut checks = Expansion::new("check");
        for name in &check_names {
            checks.visit(name, &|n: &str| -> Result<_, RegistryError> {
                let check = self.registry.build_check(n)?;
                let deps = check.dependencies().to_vec();
                Ok((check, deps))
            })?;
        }

        Ok(ExecutionPlan {
            checks: checks.out,
            reports: reports.out,
        })
    }
}

/// Dependency-first depth-first expansion with name dedup and cycle detection.
struct Expansion<T> {
    kind: &'static str,
    done: HashSet<String>,
    stack: Vec<String>,
    out: Vec<T>,
}

impl<T> Expansion<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            done: HashSet::new(),
            stack: Vec::new(),
            out: Vec::new(),
        }
    }

    fn visit<F>(&mut self, name: &str, build: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Result<(T, Vec<String>), RegistryError>,
    {
        if self.done.contains(name) {
            return Ok(());
        }
        if let Some(start) = self.stack.iter().position(|n| n == name) {
            let mut cycle: Vec<String> = self.stack.get(start..).unwrap_or_default().to_vec();
            cycle.push(name.to_owned());
            return Err(ConfigError::Cycle(cycle));
        }

        let (item, dependencies) = match build(name) {
            Ok(built) => built,
            Err(e @ (RegistryError::NotFound(_) | RegistryError::KindMismatch { .. })) => {
                warn!(kind = self.kind, name, error = %e, "unable to configure");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.stack.push(name.to_owned());
        for dependency in &dependencies {
            self.visit(dependency, build)?;
        }
        self.stack.pop();

        self.done.insert(name.to_owned());
        self.out.push(item);
        Ok(())
    }
}
