use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use rqg::config::{OutputSettings, OutputSinkKind, RunConfig, SchemaMode, UniquenessMode};
use rqg::error::RunError;
use rqg::grammars;

#[derive(Parser)]
#[command(name = "rqg")]
#[command(about = "Random query generator for PostgreSQL-compatible databases")]
#[command(long_about = None)]
struct Cli {
    /// YAML run configuration; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Built-in grammar to run (smoke, ddl_churn)
    #[arg(long)]
    grammar: Option<String>,

    /// Total queries to attempt
    #[arg(long)]
    count: Option<u64>,

    /// Wall-clock cap in seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Worker thread count (default: CPU count)
    #[arg(long)]
    workers: Option<u32>,

    /// Master seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Endpoint DSN; generation-only when absent
    #[arg(long, env = "RQG_DSN")]
    dsn: Option<String>,

    /// Introspect the target schema before the run
    #[arg(long)]
    introspect: bool,

    /// Build the schema snapshot from a DDL file
    #[arg(long)]
    ddl_file: Option<PathBuf>,

    /// Write generated statements to this file, one per line
    #[arg(long)]
    output: Option<PathBuf>,

    /// Checkpoint file for resume support
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// Disable the uniqueness filter
    #[arg(long)]
    no_uniqueness: bool,

    /// Stop on the first SQL error
    #[arg(long)]
    stop_on_error: bool,
}

impl Cli {
    fn into_config(self) -> Result<RunConfig, RunError> {
        let mut config = match &self.config {
            Some(path) => RunConfig::from_yaml_file(path)?,
            None => RunConfig::default(),
        };
        if let Some(grammar) = self.grammar {
            config.grammar = grammar;
        }
        if let Some(count) = self.count {
            config.count = Some(count);
        }
        if let Some(duration) = self.duration {
            config.duration_secs = Some(duration);
        }
        if let Some(workers) = self.workers {
            config.workers = Some(workers);
        }
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(dsn) = self.dsn {
            config.dsn = Some(dsn);
        }
        if self.introspect {
            config.schema.mode = SchemaMode::Introspect;
        }
        if let Some(ddl_file) = self.ddl_file {
            config.schema.mode = SchemaMode::DdlFile;
            config.schema.source = Some(ddl_file.display().to_string());
        }
        if let Some(output) = self.output {
            config.output = OutputSettings {
                sink: OutputSinkKind::File,
                path: Some(output),
            };
        }
        if let Some(checkpoint) = self.checkpoint {
            config.checkpoint.path = Some(checkpoint);
        }
        if self.no_uniqueness {
            config.uniqueness.mode = UniquenessMode::Off;
        }
        if self.stop_on_error {
            config.continue_on_error = false;
        }
        Ok(config)
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let config = cli.into_config()?;
    let grammar = grammars::builtin(&config.grammar).ok_or_else(|| {
        RunError::Config(format!(
            "unknown grammar '{}' (built-in: {})",
            config.grammar,
            grammars::builtin_names().join(", ")
        ))
    })?;
    rqg::run::run(&config, grammar, None).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e}");
        std::process::exit(e.exit_code());
    }
}
