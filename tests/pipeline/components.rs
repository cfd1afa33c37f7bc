//! Recording checks and reports for plan and processor tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use detqa::checks::{Check, CheckError, Report};
use detqa::configurator::{Configurator, Schema};
use detqa::image::{Frame, Header, Image, ImageError, ImageLoader};
use detqa::registry::RegistryBuilder;
use detqa::storage::Storage;

/// Check that records its run position in `result[name]`.
pub struct StepCheck {
    pub name: String,
    pub deps: Vec<String>,
    pub fail: bool,
}

impl Check for StepCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.deps
    }

    fn run_check(&self, _image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        if self.fail {
            return Err(CheckError::Failed {
                component: self.name.clone(),
                detail: "forced failure".to_owned(),
            });
        }
        let position = storage.result.len();
        storage.result.insert(self.name.clone(), json!(position));
        Ok(())
    }
}

/// Report that records which of its check's results it saw.
pub struct StepReport {
    pub name: String,
    pub check: Option<String>,
    pub deps: Vec<String>,
}

impl Report for StepReport {
    fn name(&self) -> &str {
        &self.name
    }

    fn check_dependency(&self) -> Option<&str> {
        self.check.as_deref()
    }

    fn dependencies(&self) -> &[String] {
        &self.deps
    }

    fn run_report(&self, _image: &Image, storage: &mut Storage) -> Result<(), CheckError> {
        let seen = self
            .check
            .as_ref()
            .is_some_and(|c| storage.result.contains_key(c));
        storage
            .report
            .insert(self.name.clone(), json!({"Result": "Nominal", "seen": seen}));
        Ok(())
    }
}

/// Builder helpers.
pub struct Components {
    pub builder: RegistryBuilder,
    pub constructed: Arc<AtomicUsize>,
}

impl Components {
    pub fn new() -> Self {
        Self {
            builder: RegistryBuilder::new(),
            constructed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn check(&mut self, name: &str, deps: &[&str], cached: bool) -> &mut Self {
        self.check_with(name, deps, cached, false)
    }

    pub fn failing_check(&mut self, name: &str) -> &mut Self {
        self.check_with(name, &[], true, true)
    }

    fn check_with(&mut self, name: &str, deps: &[&str], cached: bool, fail: bool) -> &mut Self {
        let owned = name.to_owned();
        let deps: Vec<String> = deps.iter().map(|d| (*d).to_owned()).collect();
        let counter = Arc::clone(&self.constructed);
        self.builder
            .subscribe_check(
                name,
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    StepCheck {
                        name: owned.clone(),
                        deps: deps.clone(),
                        fail,
                    }
                },
                cached,
            )
            .expect("unique check name");
        self
    }

    pub fn report(&mut self, name: &str, check: Option<&str>, deps: &[&str]) -> &mut Self {
        let owned = name.to_owned();
        let check = check.map(str::to_owned);
        let deps: Vec<String> = deps.iter().map(|d| (*d).to_owned()).collect();
        self.builder
            .subscribe_report(
                name,
                move || StepReport {
                    name: owned.clone(),
                    check: check.clone(),
                    deps: deps.clone(),
                },
                true,
            )
            .expect("unique report name");
        self
    }

    /// Configurator whose `TEST` instrument runs `names` in `SCIENCE` mode.
    pub fn configurator(self, names: &[&str]) -> Configurator {
        let schema = Schema::from_entries([(
            "TEST".to_owned(),
            "SCIENCE".to_owned(),
            names.iter().map(|n| (*n).to_owned()).collect(),
        )]);
        Configurator::new(Arc::new(self.builder.seal()), schema)
    }
}

/// Synthetic image of the `TEST` instrument.
pub fn image(name: &str, instrument: &str) -> Image {
    Image {
        name: name.to_owned(),
        instrument: instrument.to_owned(),
        observing_mode: "SCIENCE".to_owned(),
        detector: Some(0),
        quadrant: Some(0),
        header: Header::default(),
        data: Frame::new(1, 1, vec![0.0]).expect("frame"),
    }
}

/// Loader mapping `name` or `name@INSTRUMENT` items onto synthetic images.
pub struct SyntheticLoader;

impl ImageLoader for SyntheticLoader {
    fn load(&mut self, item: &str) -> Result<Image, ImageError> {
        let (name, instrument) = item.split_once('@').unwrap_or((item, "TEST"));
        Ok(image(name, instrument))
    }
}
