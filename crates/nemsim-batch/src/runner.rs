use crate::manifest::{write_batch_manifest, BatchManifest, BatchWindowRecord};
use crate::window::{run_window, RunVerdict, WindowContext, WindowReport, WindowTask};
use anyhow::{Context, Result};
use chrono::Utc;
use nemsim_core::MARKET_DATETIME_FORMAT;
use nemsim_io::write_outcome;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use tracing::{error, info};

/// Windows to run and where their results go.
pub struct BatchRunnerConfig {
    pub tasks: Vec<WindowTask>,
    pub output_root: PathBuf,
    /// Worker threads; 0 uses one per CPU
    pub threads: usize,
    pub context: WindowContext,
}

/// Summary returned after the run so callers can report counts and the manifest location.
pub struct BatchSummary {
    pub success: usize,
    pub failure: usize,
    pub manifest_path: PathBuf,
    pub windows: Vec<BatchWindowRecord>,
}

impl BatchSummary {
    /// Worst verdict across all windows.
    pub fn verdict(&self) -> RunVerdict {
        self.windows
            .iter()
            .map(|w| w.status)
            .max()
            .unwrap_or(RunVerdict::Clean)
    }
}

pub fn run_batch(config: BatchRunnerConfig) -> Result<BatchSummary> {
    let BatchRunnerConfig {
        tasks,
        output_root,
        threads,
        context,
    } = config;
    fs::create_dir_all(&output_root)
        .with_context(|| format!("creating batch output root '{}'", output_root.display()))?;

    let thread_count = if threads == 0 {
        num_cpus::get()
    } else {
        threads
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .thread_name(|i| format!("nemsim-window-{i}"))
        .build()
        .context("building Rayon thread pool for batch windows")?;

    let process = tasks
        .first()
        .map(|t| t.process.as_str().to_string())
        .unwrap_or_default();
    info!(windows = tasks.len(), threads = thread_count, "starting batch");

    // Each worker owns its task and reports back over the channel.
    let (tx, rx) = mpsc::channel::<(usize, BatchWindowRecord)>();
    let context = &context;
    let output_root_ref = &output_root;
    pool.scope(move |scope| {
        for (position, task) in tasks.into_iter().enumerate() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let record = run_and_export(task, context, output_root_ref);
                // The receiver outlives the scope, so sending cannot fail.
                let _ = tx.send((position, record));
            });
        }
    });

    let mut indexed: Vec<(usize, BatchWindowRecord)> = rx.into_iter().collect();
    indexed.sort_by_key(|(position, _)| *position);
    let windows: Vec<BatchWindowRecord> = indexed.into_iter().map(|(_, r)| r).collect();

    let success = windows
        .iter()
        .filter(|w| w.status <= RunVerdict::Discrepancy)
        .count();
    let failure = windows.len() - success;

    let manifest = BatchManifest {
        created_at: Utc::now(),
        process,
        num_windows: windows.len(),
        success,
        failure,
        windows: windows.clone(),
    };
    let manifest_path = output_root.join("batch_manifest.json");
    write_batch_manifest(&manifest_path, &manifest)?;
    info!(success, failure, manifest = %manifest_path.display(), "batch finished");
    Ok(BatchSummary {
        success,
        failure,
        manifest_path,
        windows,
    })
}

fn run_and_export(
    task: WindowTask,
    context: &WindowContext,
    output_root: &Path,
) -> BatchWindowRecord {
    let window_id = task.window_id.clone();
    let process = task.process.as_str().to_string();
    let start = task.start.format(MARKET_DATETIME_FORMAT).to_string();
    let output = output_root.join(&window_id);

    let result = run_window(task, context).and_then(|report| {
        write_outcome(&output, &report.outcome, &report.prices)?;
        Ok(report)
    });
    match result {
        Ok(report) => record_for(&report, process, start, &output),
        Err(err) => {
            error!(window = %window_id, error = %format!("{err:#}"), "batch window failed");
            BatchWindowRecord {
                window_id,
                process,
                start,
                status: RunVerdict::Error,
                intervals: 0,
                solved: 0,
                failures: 0,
                warnings: 0,
                error: Some(format!("{err:#}")),
                output: output.display().to_string(),
            }
        }
    }
}

fn record_for(
    report: &WindowReport,
    process: String,
    start: String,
    output: &Path,
) -> BatchWindowRecord {
    let records = report.outcome.records();
    let failures = report.outcome.failures().count();
    BatchWindowRecord {
        window_id: report.window_id.clone(),
        process,
        start,
        status: report.verdict(),
        intervals: records.len(),
        solved: records.len() - failures,
        failures,
        warnings: report.warnings.len(),
        error: None,
        output: output.display().to_string(),
    }
}
