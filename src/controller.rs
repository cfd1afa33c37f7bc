//! Run modes: local, multi-process, in-process tasks, and the worker side.
//!
//! The multi-process controller owns the work queue and both sinks. It
//! spawns `detqa worker` children pointed at the bound addresses, waits for
//! every child to exit, and only then sends `END` to each sink so no
//! worker's results are cut off.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument as _};

use crate::checks::register_builtins;
use crate::config::Config;
use crate::configurator::{Configurator, ExecutionPlan, Schema};
use crate::distribution::{spawn_enumerator, QueueHandle, RemoteWorkSource, WorkQueueServer};
use crate::image::supplier::MultiExtensionSupplier;
use crate::image::{FitsLoader, Image, ImageLoader};
use crate::instrument::{Instrument, InstrumentCatalog};
use crate::output::{
    send_end_signal, serve_sink, ChannelOutput, ConsoleOutput, DocumentWriter, FileOutput,
    FormatKind, Output, OutputComposite, Selector, Sink, SinkMessage, SocketOutput,
};
use crate::processor::{ProcessSummary, Processor};
use crate::registry::RegistryBuilder;

// ── Pipeline wiring ──

/// Everything a processor needs, built once before any work starts.
#[derive(Debug, Clone)]
pub struct Pipeline {
    configurator: Arc<Configurator>,
    instruments: Vec<String>,
    grid_columns: usize,
}

impl Pipeline {
    /// Load geometry and schema, register the built-in components and seal
    /// the registry.
    ///
    /// # Errors
    ///
    /// Returns an error if a geometry or schema file is unreadable, or if
    /// registration fails.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut catalog = InstrumentCatalog::new();
        if config.pipeline.instrument_files.is_empty() {
            catalog.insert(Instrument::builtin_vis().context("embedded VIS geometry is invalid")?);
        } else {
            for path in &config.pipeline.instrument_files {
                let instrument = Instrument::load(path)
                    .with_context(|| format!("failed to load instrument {}", path.display()))?;
                catalog.insert(instrument);
            }
        }
        let instruments = catalog.names();
        let grid_columns = catalog.grid_columns();

        let mut builder = RegistryBuilder::new();
        register_builtins(&mut builder, Arc::new(catalog))
            .context("failed to register built-in checks")?;
        let registry = Arc::new(builder.seal());

        let schema = match &config.pipeline.schema_file {
            Some(path) => Schema::load(path)
                .with_context(|| format!("failed to load schema {}", path.display()))?,
            None => Schema::builtin().context("embedded schema is invalid")?,
        };

        info!(
            instruments = ?instruments,
            components = registry.names().len(),
            "pipeline ready"
        );
        Ok(Self {
            configurator: Arc::new(Configurator::new(registry, schema)),
            instruments,
            grid_columns,
        })
    }

    /// Shared configurator.
    pub fn configurator(&self) -> Arc<Configurator> {
        Arc::clone(&self.configurator)
    }

    /// Fresh loader that knows the catalog's instruments.
    pub fn loader(&self) -> FitsLoader {
        FitsLoader::new(self.instruments.clone(), self.grid_columns)
    }

    /// Load one work item and resolve its plan without running it.
    ///
    /// # Errors
    ///
    /// Returns an error if the item cannot be loaded or resolution fails.
    pub fn inspect(&self, item: &str) -> anyhow::Result<(Image, ExecutionPlan)> {
        let image = self
            .loader()
            .load(item)
            .with_context(|| format!("failed to load {item}"))?;
        let plan = self
            .configurator
            .get_configuration(&image)
            .with_context(|| format!("failed to resolve plan for {}", image.name))?;
        Ok((image, plan))
    }
}

/// Paths and sizing shared by every run mode.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Directory holding the input files.
    pub input_dir: PathBuf,
    /// Report document path.
    pub report_path: PathBuf,
    /// Results document path.
    pub results_path: PathBuf,
    /// Worker count for distributed modes.
    pub workers: usize,
    /// Forwarded to worker processes.
    pub verbose: bool,
    /// Forwarded to worker processes.
    pub config_path: Option<PathBuf>,
}

/// Outcome of a distributed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Workers started.
    pub workers: usize,
    /// Workers that exited unsuccessfully.
    pub failed_workers: usize,
    /// Items handed out by the work queue.
    pub items_served: usize,
    /// Entries in the report document.
    pub reports_written: usize,
    /// Entries in the results document.
    pub results_written: usize,
}

/// Addresses a worker process connects to.
#[derive(Debug, Clone, Copy)]
pub struct WorkerEndpoints {
    /// Work queue.
    pub queue: SocketAddr,
    /// Report sink.
    pub report_sink: SocketAddr,
    /// Results sink.
    pub result_sink: SocketAddr,
}

fn supplier(config: &Config, input_dir: &Path) -> anyhow::Result<MultiExtensionSupplier> {
    MultiExtensionSupplier::new(input_dir, &config.input.pattern)
        .with_context(|| format!("bad input pattern for {}", input_dir.display()))
}

async fn document(
    path: &Path,
    format: FormatKind,
    config: &Config,
) -> anyhow::Result<DocumentWriter<tokio::fs::File>> {
    let file = tokio::fs::File::create(path)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;
    Ok(DocumentWriter::new(
        file,
        format.build(),
        config.output.ordering,
    ))
}

// ── Local ──

/// Path that sends a local run's document to standard output.
pub const STDOUT_PATH: &str = "-";

async fn local_output(
    path: &Path,
    format: FormatKind,
    selector: Selector,
    config: &Config,
) -> anyhow::Result<Box<dyn Output>> {
    let ordering = config.output.ordering;
    if path == Path::new(STDOUT_PATH) {
        return Ok(Box::new(ConsoleOutput::console(format.build(), selector, ordering)));
    }
    let file = FileOutput::create(path, format.build(), selector, ordering)
        .await
        .with_context(|| format!("failed to create {}", path.display()))?;
    Ok(Box::new(file))
}

/// Process every item sequentially in this process, writing both documents
/// directly.
///
/// # Errors
///
/// Returns an error if setup fails or processing aborts.
pub async fn run_local(config: &Config, options: &RunOptions) -> anyhow::Result<ProcessSummary> {
    let pipeline = Pipeline::from_config(config)?;
    let (queue, enumerator) = spawn_enumerator(
        Box::new(supplier(config, &options.input_dir)?),
        config.transport.channel_capacity,
    );

    let report = local_output(
        &options.report_path,
        config.output.report_format,
        Selector::Report,
        config,
    )
    .await?;
    let result = local_output(
        &options.results_path,
        config.output.result_format,
        Selector::Result,
        config,
    )
    .await?;
    let outputs: Vec<Box<dyn Output>> = vec![report, result];
    let outputs = OutputComposite::new(outputs);

    let mut processor = Processor::new(queue, pipeline.loader(), pipeline.configurator(), outputs);
    let summary = processor.process().await.context("processing failed")?;
    drop(processor);
    let served = enumerator.await.context("enumerator panicked")?;
    info!(served, "local run finished");
    Ok(summary)
}

// ── Multi-process ──

/// Run the queue and both sinks here and process in `options.workers`
/// child processes.
///
/// # Errors
///
/// Returns an error if a listener cannot be bound, a child cannot be
/// spawned, or a sink fails to write its document. Failed workers are
/// logged and counted, not fatal.
pub async fn run_distributed(
    config: &Config,
    options: &RunOptions,
) -> anyhow::Result<RunSummary> {
    // Fail on bad schema or geometry before anything is spawned.
    Pipeline::from_config(config)?;
    let transport = &config.transport;

    let (queue, enumerator) = spawn_enumerator(
        Box::new(supplier(config, &options.input_dir)?),
        transport.channel_capacity,
    );
    let server = WorkQueueServer::bind(transport.queue_addr(), queue).await?;
    let queue_addr = server.local_addr()?;
    let queue_task = tokio::spawn(server.serve());

    let report_listener = TcpListener::bind(transport.report_addr())
        .await
        .with_context(|| format!("failed to bind report sink {}", transport.report_addr()))?;
    let result_listener = TcpListener::bind(transport.result_addr())
        .await
        .with_context(|| format!("failed to bind result sink {}", transport.result_addr()))?;
    let endpoints = WorkerEndpoints {
        queue: queue_addr,
        report_sink: report_listener.local_addr()?,
        result_sink: result_listener.local_addr()?,
    };

    let report_sink = Sink::new(
        "report",
        document(&options.report_path, config.output.report_format, config).await?,
    );
    let result_sink = Sink::new(
        "result",
        document(&options.results_path, config.output.result_format, config).await?,
    );
    let report_task = tokio::spawn(serve_sink(
        report_listener,
        report_sink,
        transport.channel_capacity,
    ));
    let result_task = tokio::spawn(serve_sink(
        result_listener,
        result_sink,
        transport.channel_capacity,
    ));
    info!(
        queue = %endpoints.queue,
        report = %endpoints.report_sink,
        result = %endpoints.result_sink,
        workers = options.workers,
        "controller listening"
    );

    let exe = std::env::current_exe().context("failed to determine current executable path")?;
    let mut children = Vec::with_capacity(options.workers);
    for id in 0..options.workers {
        let mut cmd = tokio::process::Command::new(&exe);
        cmd.arg("worker")
            .arg("--id")
            .arg(id.to_string())
            .arg("--queue")
            .arg(endpoints.queue.to_string())
            .arg("--report-sink")
            .arg(endpoints.report_sink.to_string())
            .arg("--result-sink")
            .arg(endpoints.result_sink.to_string())
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true);
        if let Some(path) = &options.config_path {
            cmd.arg("--config").arg(path);
        }
        if options.verbose {
            cmd.arg("-v");
        }
        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn worker {id}"))?;
        children.push((id, child));
    }

    let mut failed_workers: usize = 0;
    for (id, mut child) in children {
        match child.wait().await {
            Ok(status) if status.success() => info!(worker = id, "worker finished"),
            Ok(status) => {
                error!(worker = id, %status, "worker failed");
                failed_workers = failed_workers.saturating_add(1);
            }
            Err(e) => {
                error!(worker = id, error = %e, "failed to wait for worker");
                failed_workers = failed_workers.saturating_add(1);
            }
        }
    }

    send_end_signal(endpoints.report_sink)
        .await
        .context("failed to signal report sink")?;
    send_end_signal(endpoints.result_sink)
        .await
        .context("failed to signal result sink")?;
    let reports_written = report_task.await.context("report sink panicked")??;
    let results_written = result_task.await.context("result sink panicked")??;

    queue_task.abort();
    let _ = queue_task.await;
    let items_served = enumerator.await.context("enumerator panicked")?;

    Ok(RunSummary {
        workers: options.workers,
        failed_workers,
        items_served,
        reports_written,
        results_written,
    })
}

/// Worker process body: pull from the controller's queue and push to its
/// sinks until the queue is exhausted.
///
/// # Errors
///
/// Returns an error if setup fails or processing aborts.
pub async fn run_worker(
    config: &Config,
    id: usize,
    endpoints: WorkerEndpoints,
) -> anyhow::Result<ProcessSummary> {
    async move {
        let pipeline = Pipeline::from_config(config)?;
        let outputs: Vec<Box<dyn Output>> = vec![
            Box::new(SocketOutput::new(endpoints.report_sink, Selector::Report)),
            Box::new(SocketOutput::new(endpoints.result_sink, Selector::Result)),
        ];
        let outputs = OutputComposite::new(outputs);
        let mut processor = Processor::new(
            RemoteWorkSource::new(endpoints.queue),
            pipeline.loader(),
            pipeline.configurator(),
            outputs,
        );
        let summary = processor.process().await.context("processing failed")?;
        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            "worker done"
        );
        Ok::<_, anyhow::Error>(summary)
    }
    .instrument(info_span!("worker", id))
    .await
}

// ── In-process tasks ──

/// Same topology as [`run_distributed`] with tokio tasks and channels in
/// place of processes and sockets.
///
/// # Errors
///
/// Returns an error if setup fails or a sink fails to write its document.
/// Failed worker tasks are logged and counted.
pub async fn run_in_process(
    config: &Config,
    options: &RunOptions,
) -> anyhow::Result<RunSummary> {
    let pipeline = Pipeline::from_config(config)?;
    let capacity = config.transport.channel_capacity;
    let (queue, enumerator) = spawn_enumerator(
        Box::new(supplier(config, &options.input_dir)?),
        capacity,
    );

    let (report_tx, report_rx) = mpsc::channel(capacity);
    let (result_tx, result_rx) = mpsc::channel(capacity);
    let mut report_sink = Sink::new(
        "report",
        document(&options.report_path, config.output.report_format, config).await?,
    );
    let mut result_sink = Sink::new(
        "result",
        document(&options.results_path, config.output.result_format, config).await?,
    );
    let report_task = tokio::spawn(async move { report_sink.run(report_rx).await });
    let result_task = tokio::spawn(async move { result_sink.run(result_rx).await });

    let mut workers = JoinSet::new();
    for id in 0..options.workers {
        workers.spawn(
            worker_task(
                queue.clone(),
                pipeline.clone(),
                ChannelOutput::new(report_tx.clone(), Selector::Report),
                ChannelOutput::new(result_tx.clone(), Selector::Result),
            )
            .instrument(info_span!("worker", id)),
        );
    }
    drop(queue);

    let mut failed_workers: usize = 0;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok(summary)) => info!(
                processed = summary.processed,
                skipped = summary.skipped,
                "worker task finished"
            ),
            Ok(Err(e)) => {
                error!(error = %e, "worker task failed");
                failed_workers = failed_workers.saturating_add(1);
            }
            Err(e) => {
                error!(error = %e, "worker task aborted");
                failed_workers = failed_workers.saturating_add(1);
            }
        }
    }

    for (label, tx) in [("report", report_tx), ("result", result_tx)] {
        if tx.send(SinkMessage::End).await.is_err() {
            warn!(sink = label, "sink stopped before END");
        }
    }
    let reports_written = report_task.await.context("report sink panicked")??;
    let results_written = result_task.await.context("result sink panicked")??;
    let items_served = enumerator.await.context("enumerator panicked")?;

    Ok(RunSummary {
        workers: options.workers,
        failed_workers,
        items_served,
        reports_written,
        results_written,
    })
}

async fn worker_task(
    queue: QueueHandle,
    pipeline: Pipeline,
    report: ChannelOutput,
    result: ChannelOutput,
) -> anyhow::Result<ProcessSummary> {
    let outputs: Vec<Box<dyn Output>> = vec![Box::new(report), Box::new(result)];
    let mut processor = Processor::new(
        queue,
        pipeline.loader(),
        pipeline.configurator(),
        OutputComposite::new(outputs),
    );
    Ok(processor.process().await?)
}
