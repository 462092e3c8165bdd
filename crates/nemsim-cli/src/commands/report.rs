use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use nemsim_batch::{load_batch_manifest, RunVerdict};
use tabwriter::TabWriter;

pub fn handle(path: &Path) -> Result<RunVerdict> {
    let manifest = load_batch_manifest(path)?;
    println!(
        "{} batch of {}: {} succeeded, {} failed",
        manifest.process,
        manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        manifest.success,
        manifest.failure
    );
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "WINDOW\tSTATUS\tSOLVED\tWARNINGS\tERROR")?;
    for window in &manifest.windows {
        writeln!(
            writer,
            "{}\t{}\t{}/{}\t{}\t{}",
            window.window_id,
            window.status.as_str(),
            window.solved,
            window.intervals,
            window.warnings,
            window.error.as_deref().unwrap_or("-")
        )?;
    }
    writer.flush()?;
    Ok(manifest.verdict())
}
