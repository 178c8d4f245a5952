use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sheetscan::config::Config;
use sheetscan::export::Exporter;
use sheetscan::pipeline::{status_report, Pipeline, ProjectOutcome};
use sheetscan::state::StateStore;

#[derive(Parser)]
#[command(name = "sheetscan")]
#[command(about = "Resumable batch extraction of engineering-drawing regions")]
struct Args {
    /// Directory holding one sub-directory per project
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Directory for per-project state files
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Directory for CSV and JSONL exports
    #[arg(long, global = true)]
    export_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract every pending image; all projects when none is given
    #[command(alias = "run-extraction")]
    Extract {
        project: Option<String>,

        /// Images per extraction call
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Regenerate CSV and JSONL exports from saved state
    #[command(alias = "run-export")]
    Export { project: Option<String> },
    /// Show discovered, done and pending counts without extracting
    Status { project: Option<String> },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    dotenvy::dotenv().ok();
    init_logging();

    let mut config = Config::from_env();
    if let Some(root) = args.root {
        config.root_dir = root;
    }
    if let Some(state_dir) = args.state_dir {
        config.state_dir = state_dir;
    }
    if let Some(export_dir) = args.export_dir {
        config.export_dir = export_dir;
    }

    match args.command {
        Command::Extract {
            project,
            batch_size,
        } => {
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            run_extraction(&config, project.as_deref()).await
        }
        Command::Export { project } => run_export(&config, project.as_deref()),
        Command::Status { project } => run_status(&config, project.as_deref()),
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sheetscan=info".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let (json_layer, text_layer) = if json {
        (
            Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)),
            None,
        )
    } else {
        (
            None,
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();
}

async fn run_extraction(config: &Config, project: Option<&str>) -> anyhow::Result<ExitCode> {
    config.validate_for_extraction()?;
    let pipeline = Pipeline::from_config(config)?;

    let report = pipeline.run(project).await?;

    let mut exit = ExitCode::SUCCESS;
    for outcome in &report.projects {
        match outcome {
            ProjectOutcome::Completed(summary) => println!(
                "{}: {} discovered, {} already done, {} processed, {} failed (pending)",
                summary.project_id,
                summary.discovered,
                summary.already_done,
                summary.newly_processed,
                summary.failed_pending
            ),
            ProjectOutcome::Failed { project_id, error } => {
                println!("{project_id}: aborted: {error}");
                exit = ExitCode::FAILURE;
            }
        }
    }

    Ok(exit)
}

fn run_export(config: &Config, project: Option<&str>) -> anyhow::Result<ExitCode> {
    config.validate_for_export()?;
    let exporter = Exporter::new(StateStore::new(config.state_dir.clone()), config.export_dir.clone());

    let results = match project {
        Some(project_id) => vec![(project_id.to_string(), exporter.export_project(project_id))],
        None => exporter.export_all()?,
    };

    let mut exit = ExitCode::SUCCESS;
    for (project_id, result) in results {
        match result {
            Ok(summary) => println!(
                "{project_id}: {} rows -> {}, {}",
                summary.rows,
                summary.csv_path.display(),
                summary.jsonl_path.display()
            ),
            Err(error) => {
                println!("{project_id}: export failed: {error}");
                exit = ExitCode::FAILURE;
            }
        }
    }

    Ok(exit)
}

fn run_status(config: &Config, project: Option<&str>) -> anyhow::Result<ExitCode> {
    config.validate_for_status()?;
    let store = StateStore::new(config.state_dir.clone());

    let mut exit = ExitCode::SUCCESS;
    for (project_id, result) in status_report(&config.root_dir, &store, project)? {
        match result {
            Ok(status) => println!(
                "{project_id}: {} discovered, {} done, {} pending, {} orphaned",
                status.discovered, status.done, status.pending, status.orphaned
            ),
            Err(error) => {
                println!("{project_id}: {error}");
                exit = ExitCode::FAILURE;
            }
        }
    }

    Ok(exit)
}
