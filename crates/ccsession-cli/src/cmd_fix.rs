use crate::report;
use anyhow::{Context, Result, bail};
use ccsession::{FixOutcome, SessionKeeper};
use std::process::ExitCode;

pub fn run(
    keeper: &SessionKeeper,
    session: Option<String>,
    dry_run: bool,
    all: bool,
) -> Result<ExitCode> {
    if all {
        return fix_all(keeper);
    }
    let Some(session) = session else {
        bail!("give a session id or --all");
    };
    if dry_run {
        return preview(keeper, &session);
    }

    let outcome = keeper
        .fix(&session)
        .with_context(|| format!("cannot fix session {}", session))?;
    match outcome {
        FixOutcome::AlreadyHealthy => {
            println!("Session {} is already healthy, nothing to do.", session);
            Ok(ExitCode::SUCCESS)
        }
        FixOutcome::NotFixable(report) => {
            print!("{}", report::detail(&report));
            eprintln!("\nSession {} cannot be fixed automatically.", report.session_id);
            Ok(ExitCode::from(report.exit_code()))
        }
        FixOutcome::Committed { backup, rewired } => {
            let location = keeper.find_session(&session)?;
            println!("Fixed {}: rewired {} records.", location.session_id, rewired);
            println!("Backup: {}", backup.display());
            println!("{}", report::undo_hint(&location.session_id));
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn preview(keeper: &SessionKeeper, session: &str) -> Result<ExitCode> {
    let (report, diff) = keeper
        .fix_preview(session)
        .with_context(|| format!("cannot preview fix for {}", session))?;
    match diff {
        Some(diff) => {
            println!(
                "Would rewire {} records in {} (dry run, nothing written):\n",
                report.rewires().len(),
                report.path.display()
            );
            print!("{}", diff);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            println!("Session {} is {}, nothing to fix.", report.session_id, report.status);
            Ok(ExitCode::from(report.exit_code()))
        }
    }
}

fn fix_all(keeper: &SessionKeeper) -> Result<ExitCode> {
    let attempts = keeper.fix_all().context("failed to list sessions")?;
    if attempts.is_empty() {
        println!("Every session is healthy.");
        return Ok(ExitCode::SUCCESS);
    }

    let (mut fixed, mut skipped, mut failed) = (0, 0, 0);
    for attempt in &attempts {
        match &attempt.result {
            Ok(FixOutcome::Committed { backup, rewired }) => {
                fixed += 1;
                println!(
                    "fixed   {}  rewired {}  backup {}",
                    attempt.session_id,
                    rewired,
                    backup.display()
                );
            }
            Ok(FixOutcome::NotFixable(report)) => {
                skipped += 1;
                println!("skipped {}  {}", attempt.session_id, report.status);
            }
            Ok(FixOutcome::AlreadyHealthy) => {}
            Err(e) => {
                failed += 1;
                println!("FAILED  {}  {}", attempt.session_id, e);
            }
        }
    }

    println!("\n{} fixed, {} failed, {} skipped.", fixed, failed, skipped);
    if fixed > 0 {
        println!("To undo any fix: ccsession restore <session-id>");
    }
    Ok(if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
