use crate::report;
use anyhow::{Context, Result};
use ccsession::{ChainStatus, SessionKeeper};
use std::process::ExitCode;

pub fn run(keeper: &SessionKeeper) -> Result<ExitCode> {
    if !keeper.config().resolver().exists() {
        println!("No Claude data directory found.");
        return Ok(ExitCode::SUCCESS);
    }
    let reports = keeper.scan().context("failed to list sessions")?;
    if reports.is_empty() {
        println!("No sessions found.");
        return Ok(ExitCode::SUCCESS);
    }

    for report in &reports {
        println!("{}", report::summary_line(report));
    }

    let count = |status: ChainStatus| reports.iter().filter(|r| r.status == status).count();
    println!(
        "\n{} sessions: {} healthy, {} fixable, {} unfixable, {} error",
        reports.len(),
        count(ChainStatus::Healthy),
        count(ChainStatus::Fixable),
        count(ChainStatus::Unfixable),
        count(ChainStatus::Error),
    );
    if count(ChainStatus::Fixable) > 0 {
        println!("Run 'ccsession fix --all' to repair fixable sessions.");
    }

    let worst = reports
        .iter()
        .map(|r| r.status)
        .max()
        .unwrap_or(ChainStatus::Healthy);
    Ok(ExitCode::from(worst.exit_code()))
}
