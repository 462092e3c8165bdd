use std::io::{self, Write};
use std::path::Path;

use anyhow::Result;
use chrono::NaiveDateTime;
use nemsim_core::{ProcessKind, MARKET_DATETIME_FORMAT};
use tabwriter::TabWriter;

use crate::commands::util::scheduler;

pub fn handle(
    start: NaiveDateTime,
    process: ProcessKind,
    interval_counts: Option<&Path>,
) -> Result<()> {
    let plan = scheduler(interval_counts)?.plan(process, start)?;
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "INDEX\tTIME\tMINUTES")?;
    for (index, time) in plan.times().iter().enumerate() {
        writeln!(
            writer,
            "{}\t{}\t{}",
            index,
            time.format(MARKET_DATETIME_FORMAT),
            plan.interval_minutes(index)
        )?;
    }
    writer.flush()?;
    println!(
        "{} intervals, horizon {} min",
        plan.len(),
        plan.horizon().num_minutes()
    );
    Ok(())
}
