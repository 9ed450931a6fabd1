//! codegen CLI
//!
//! Submits a generate or modify request, polls the task until it finishes and
//! prints the resulting project as JSON.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use codegen::project::read_file_map;
use codegen::{GenerationRequest, GeneratorConfig, Orchestrator, TaskStatus};
use llm::remote::OpenAiCompatibleClient;
use llm::RemoteLlmConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "codegen")]
#[command(about = "Generate multi-file projects from natural-language descriptions", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(flatten)]
    options: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalOptions {
    /// YAML configuration file
    #[arg(short, long, global = true, env = "CODEGEN_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of an OpenAI-compatible API
    #[arg(long, global = true, env = "CODEGEN_BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// Model identifier (overrides the configuration)
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Environment variable holding the API key
    #[arg(long, global = true, default_value = "OPENAI_API_KEY")]
    api_key_env: String,

    /// Write the result here instead of stdout
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Poll interval in milliseconds
    #[arg(long, global = true, default_value_t = 500)]
    poll_interval_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new project
    Generate {
        /// What to build
        description: String,
    },

    /// Modify an existing project
    Modify {
        /// What to change
        instruction: String,
        /// JSON file mapping paths to contents
        #[arg(short, long)]
        files: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let options = cli.options;

    let mut config = match &options.config {
        Some(path) => GeneratorConfig::from_file_with_env(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GeneratorConfig::from_env()?,
    };
    if let Some(model) = options.model {
        config = config.with_model(model);
    }
    config.validate()?;

    let remote = RemoteLlmConfig::from_env(&options.api_key_env, &options.base_url, &config.model)?;
    let gateway = Arc::new(OpenAiCompatibleClient::new(remote)?);
    let orchestrator = Orchestrator::new(gateway, &config);

    let request = match cli.command {
        Commands::Generate { description } => GenerationRequest::generate(description),
        Commands::Modify { instruction, files } => {
            let files = read_file_map(&files)
                .with_context(|| format!("loading project from {}", files.display()))?;
            GenerationRequest::modify(instruction, files)
        }
    };

    let id = orchestrator.submit(request);
    info!(task_id = %id, model = %config.model, "Submitted");

    let poll_interval = Duration::from_millis(options.poll_interval_ms.max(10));
    let snapshot = orchestrator.wait(id, poll_interval).await?;

    if snapshot.status != TaskStatus::Completed {
        bail!(
            "task {} ended {}: {}",
            id,
            snapshot.status,
            snapshot.error.unwrap_or_default()
        );
    }
    let Some(result) = snapshot.result else {
        bail!("task {} completed without a result", id);
    };

    for note in &result.notes {
        info!("{}", note);
    }
    info!(
        provenance = %result.provenance,
        files = result.files.len(),
        rounds = result.rounds,
        tokens = result.usage.total_tokens,
        "Done"
    );

    let json = serde_json::to_string_pretty(&result)?;
    match options.output {
        Some(path) => std::fs::write(&path, json)
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{}", json),
    }

    Ok(())
}
