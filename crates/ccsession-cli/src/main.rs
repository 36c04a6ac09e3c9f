mod cmd_archive;
mod cmd_check;
mod cmd_clone;
mod cmd_delete;
mod cmd_fix;
mod cmd_lineage;
mod cmd_restore;
mod cmd_scan;
mod cmd_unarchive;
mod report;

use anyhow::Result;
use ccsession::{Config, DeleteOptions, PathResolver, SessionKeeper};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ccsession")]
#[command(about = "Diagnose, repair, clone, archive and delete Claude Code session transcripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Claude data directory (default: ~/.claude)
    #[arg(long, global = true, env = "CCSESSION_CLAUDE_DIR")]
    claude_dir: Option<PathBuf>,

    /// Where backups and the lineage ledger live (default: ~/.claude-session-mcp)
    #[arg(long, global = true, env = "CCSESSION_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check every session; exit code is the worst status found
    Scan,
    /// Check one session
    Check {
        /// Session id or unique prefix
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        session: Option<String>,

        /// Check a transcript file directly
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Rewire orphaned records, with a backup
    Fix {
        /// Session id or unique prefix
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        session: Option<String>,

        /// Print the diff without writing anything
        #[arg(long, conflicts_with = "all")]
        dry_run: bool,

        /// Fix every fixable session
        #[arg(long)]
        all: bool,
    },
    /// Undo a fix from its backup
    Restore {
        /// Session id or unique prefix
        #[arg(required_unless_present = "list", conflicts_with = "list")]
        session: Option<String>,

        /// List backups instead
        #[arg(long)]
        list: bool,
    },
    /// Copy a session under a new identity
    Clone {
        /// Session id or unique prefix
        session: String,

        /// Project path for the clone (default: the source project)
        #[arg(long)]
        project: Option<PathBuf>,

        /// Keep absolute paths as they are
        #[arg(long)]
        no_translate: bool,
    },
    /// Write a self-contained archive of a session
    Archive {
        /// Session id or unique prefix
        session: String,

        /// Output directory (default: current directory)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Archive file name (default: session-<prefix>-<timestamp>.json)
        #[arg(long)]
        name: Option<String>,
    },
    /// Restore a session from an archive
    Unarchive {
        /// Archive file
        archive: PathBuf,

        /// Project path to restore into (default: the archived project)
        #[arg(long)]
        project: Option<PathBuf>,

        /// Keep the original ids and restore task files
        #[arg(long)]
        in_place: bool,

        /// Keep absolute paths as they are
        #[arg(long)]
        no_translate: bool,
    },
    /// Remove a session and all of its artifacts, keeping an archive to undo from
    Delete {
        /// Session id or unique prefix
        session: String,

        /// Required to delete a native (not cloned or restored) session
        #[arg(long)]
        force: bool,

        /// List what would be removed without touching anything
        #[arg(long)]
        dry_run: bool,

        /// Do not keep the archive once the delete succeeds
        #[arg(long)]
        no_backup: bool,
    },
    /// Show where a session came from and what was cloned from it
    Lineage {
        /// Session id or unique prefix
        session: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        _ => LevelFilter::DEBUG,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn build_config(cli: &Cli) -> Config {
    let mut resolver = PathResolver::new();
    if let Some(dir) = &cli.claude_dir {
        resolver = resolver.with_claude_dir(dir);
    }
    let mut config = Config::new().with_resolver(resolver);
    if let Some(dir) = &cli.state_dir {
        config = config.with_state_dir(dir);
    }
    config
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let keeper = SessionKeeper::new(build_config(&cli));

    match cli.command {
        Commands::Scan => cmd_scan::run(&keeper),
        Commands::Check { session, file } => cmd_check::run(&keeper, session, file),
        Commands::Fix {
            session,
            dry_run,
            all,
        } => cmd_fix::run(&keeper, session, dry_run, all),
        Commands::Restore { session, list } => cmd_restore::run(&keeper, session, list),
        Commands::Clone {
            session,
            project,
            no_translate,
        } => cmd_clone::run(&keeper, &session, project, !no_translate),
        Commands::Archive {
            session,
            output,
            name,
        } => cmd_archive::run(&keeper, &session, output, name),
        Commands::Unarchive {
            archive,
            project,
            in_place,
            no_translate,
        } => cmd_unarchive::run(&keeper, archive, project, in_place, !no_translate),
        Commands::Delete {
            session,
            force,
            dry_run,
            no_backup,
        } => {
            let options = DeleteOptions {
                force,
                dry_run,
                no_backup,
            };
            cmd_delete::run(&keeper, &session, options)
        }
        Commands::Lineage { session, json } => cmd_lineage::run(&keeper, &session, json),
    }
}
