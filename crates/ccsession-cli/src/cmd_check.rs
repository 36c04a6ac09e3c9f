use crate::report;
use anyhow::{Context, Result, bail};
use ccsession::{ChainStatus, SessionKeeper};
use std::path::PathBuf;
use std::process::ExitCode;

pub fn run(
    keeper: &SessionKeeper,
    session: Option<String>,
    file: Option<PathBuf>,
) -> Result<ExitCode> {
    let report = match (session, file) {
        (_, Some(file)) => keeper.check_file(&file),
        (Some(session), None) => keeper
            .check(&session)
            .with_context(|| format!("cannot check session {}", session))?,
        (None, None) => bail!("give a session id or --file"),
    };

    print!("{}", report::detail(&report));
    if report.status == ChainStatus::Fixable {
        println!("\nRun 'ccsession fix {}' to repair.", report.session_id);
    }
    Ok(ExitCode::from(report.exit_code()))
}
