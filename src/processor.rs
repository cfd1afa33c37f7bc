//! Per-image orchestration.
//!
//! A [`Processor`] pulls work items from a [`WorkSource`], loads each into an
//! [`Image`], asks the [`Configurator`] for its plan and runs the plan's
//! checks then reports against that image's [`Storage`](crate::storage::Storage),
//! flushing the storage to the output as soon as the image is done.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::checks::CheckError;
use crate::configurator::{ConfigError, Configurator, ExecutionPlan};
use crate::distribution::{DistributionError, WorkSource};
use crate::image::{Image, ImageError, ImageLoader};
use crate::output::{Output, OutputError};
use crate::storage::ResultsContainer;

/// Errors raised while processing.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Pulling work failed.
    #[error(transparent)]
    Distribution(#[from] DistributionError),

    /// A work item could not be loaded.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Plan resolution failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A check or report body failed.
    #[error("{component} failed on {image}: {source}")]
    Component {
        /// Image being processed.
        image: String,
        /// Check or report name.
        component: String,
        /// Underlying error.
        source: CheckError,
    },

    /// Writing results failed.
    #[error(transparent)]
    Output(#[from] OutputError),

    /// The image resolved to zero checks; it is skipped.
    #[error("no checks configured for {0}")]
    NoChecks(String),
}

/// Counts from one [`Processor::process`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Images whose storage was written.
    pub processed: usize,
    /// Images skipped because no checks applied.
    pub skipped: usize,
}

/// Sequential per-image pipeline.
pub struct Processor<S, L, O> {
    source: S,
    loader: L,
    configurator: Arc<Configurator>,
    results: ResultsContainer<O>,
}

impl<S, L, O> std::fmt::Debug for Processor<S, L, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor").finish_non_exhaustive()
    }
}

impl<S, L, O> Processor<S, L, O>
where
    S: WorkSource,
    L: ImageLoader,
    O: Output,
{
    /// Processor pulling from `source` and writing to `output`.
    pub fn new(source: S, loader: L, configurator: Arc<Configurator>, output: O) -> Self {
        Self {
            source,
            loader,
            configurator,
            results: ResultsContainer::new(output),
        }
    }

    /// Process every item of the work source.
    ///
    /// An empty work set is logged and is not an error; the output is then
    /// never opened.
    ///
    /// # Errors
    ///
    /// Returns the first non-recoverable failure. The output is closed
    /// before returning either way.
    pub async fn process(&mut self) -> Result<ProcessSummary, ProcessError> {
        info!("processing starts");
        let total = self.source.total().await?;
        if total == 0 {
            warn!("no data elements found for processing");
            return Ok(ProcessSummary::default());
        }
        info!(total, "data elements to process");

        self.results.open().await?;
        let outcome = self.drain(total).await;
        let closed = self.results.close().await;
        let summary = outcome?;
        closed?;
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            "processing ends"
        );
        Ok(summary)
    }

    async fn drain(&mut self, total: usize) -> Result<ProcessSummary, ProcessError> {
        let mut summary = ProcessSummary::default();
        let mut seen: usize = 0;
        while let Some(item) = self.source.next_item().await? {
            seen = seen.saturating_add(1);
            let image = self.loader.load(&item)?;
            info!(image = %image.name, n = seen, total, "processing data element");
            match self.process_image(&image).await {
                Ok(()) => summary.processed = summary.processed.saturating_add(1),
                Err(ProcessError::NoChecks(name)) => {
                    info!(image = %name, "no processing as no checks were configured");
                    summary.skipped = summary.skipped.saturating_add(1);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    /// Resolve and run the plan for one image, then flush its storage.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::NoChecks`] when nothing applies, or the
    /// first check/report/output failure.
    pub async fn process_image(&mut self, image: &Image) -> Result<(), ProcessError> {
        info!(image = %image.name, "processing of data element starts");
        let plan = self.configurator.get_configuration(image)?;
        let result = self.run(image, &plan).await;
        info!(image = %image.name, "processing of data element ends");
        result
    }

    async fn run(&mut self, image: &Image, plan: &ExecutionPlan) -> Result<(), ProcessError> {
        if plan.checks.is_empty() {
            return Err(ProcessError::NoChecks(image.name.clone()));
        }

        let executed = Self::execute(image, plan, self.results.get_storage(&image.name));
        if let Err(e) = executed {
            self.results.discard(&image.name);
            return Err(e);
        }
        self.results.dump_storage(&image.name).await?;
        Ok(())
    }

    fn execute(
        image: &Image,
        plan: &ExecutionPlan,
        storage: &mut crate::storage::Storage,
    ) -> Result<(), ProcessError> {
        let checks = plan.checks.len();
        for (i, check) in plan.checks.iter().enumerate() {
            let n = i.saturating_add(1);
            info!(check = check.name(), image = %image.name, n, of = checks, "check starts");
            check
                .run_check(image, storage)
                .map_err(|source| ProcessError::Component {
                    image: image.name.clone(),
                    component: check.name().to_owned(),
                    source,
                })?;
            info!(check = check.name(), image = %image.name, "check finished successfully");
        }

        let reports = plan.reports.len();
        for (i, report) in plan.reports.iter().enumerate() {
            let n = i.saturating_add(1);
            info!(report = report.name(), image = %image.name, n, of = reports, "report starts");
            report
                .run_report(image, storage)
                .map_err(|source| ProcessError::Component {
                    image: image.name.clone(),
                    component: report.name().to_owned(),
                    source,
                })?;
            info!(report = report.name(), image = %image.name, "report finished successfully");
        }
        Ok(())
    }

    /// Give back the output.
    pub fn into_output(self) -> O {
        self.results.into_output()
    }
}
