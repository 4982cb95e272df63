//! `textflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `validate`     — build and validate every pipeline graph.
//! - `run`          — run one graph now and wait for everything it chains.
//! - `schedule`     — fire the daily initializer until Ctrl-C.
//! - `prepare-data` — tokenize a dataset into a TFRecord file.

mod config;
mod pipelines;

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use engine::{validate_dag, Initializer, RunRequest};
use notify::NotificationChannel;
use prep::{HfTokenizer, PrepareDataConfig};

use crate::config::PipelineConfig;

#[derive(Parser)]
#[command(name = "textflow", about = "Text preprocessing pipeline orchestrator", version)]
struct Cli {
    /// Pipeline configuration file (TOML).
    #[arg(long, global = true, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `[notify] webhook_url`.
    #[arg(long, global = true, env = "WEBHOOK_URL")]
    webhook_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate every pipeline graph and print its execution order.
    Validate,
    /// Run a graph now; waits for the runs it chains as well.
    Run {
        /// Graph name, e.g. `Data_Validation_Pipeline`.
        graph: String,
        /// JSON handed to the root tasks.
        #[arg(long)]
        conf: Option<String>,
    },
    /// Start the daily initializer and keep firing until Ctrl-C.
    Schedule,
    /// Tokenize a JSON-lines dataset into `{output_dir}/{dataset_name}.tfrecord`.
    PrepareData(PrepareDataArgs),
}

#[derive(clap::Args)]
struct PrepareDataArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output_dir: PathBuf,
    #[arg(long)]
    dataset_name: String,
    /// Local Hugging Face `tokenizer.json`; defaults to the tokenizer of
    /// `--model-name` from the Hub.
    #[arg(long)]
    tokenizer: Option<PathBuf>,
    /// Label map as JSON, e.g. `{"neg": 0, "pos": 1}`.
    #[arg(long)]
    label_map: String,
    #[arg(long, default_value = "text")]
    feature_name: String,
    #[arg(long, default_value = "label")]
    label_name: String,
    #[arg(long, default_value_t = 128)]
    max_sequence_length: usize,
    #[arg(long, default_value = "bert-base-multilingual-cased")]
    model_name: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.webhook_url {
        config.notify.webhook_url = Some(url);
    }
    let channel = NotificationChannel::new(config.notify.clone())
        .context("cannot build the notification channel")?;

    match cli.command {
        Command::Validate => {
            let orch = pipelines::orchestrator(&config, channel)?;
            for name in orch.graph_names() {
                if let Some(graph) = orch.graph(&name) {
                    let order = validate_dag(&graph)?;
                    println!("{name}: {}", order.join(" -> "));
                }
            }
        }

        Command::Run { graph, conf } => {
            let conf = match conf {
                Some(raw) => serde_json::from_str(&raw).context("--conf is not valid JSON")?,
                None => Value::Null,
            };
            let orch = pipelines::orchestrator(&config, channel)?;
            let run = orch.run(&graph, RunRequest::manual().with_conf(conf)).await?;
            orch.wait_idle().await;

            for chained in orch.history(None) {
                println!("{} {} {}", chained.graph, chained.run_id, chained.status);
            }
            if !run.status.is_success() {
                bail!("run {} of {graph} failed", run.run_id);
            }
        }

        Command::Schedule => {
            let orch = pipelines::orchestrator(&config, channel)?;
            let initializer = Initializer::for_graph(orch.clone(), pipelines::INIT_GRAPH)?;

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(initializer.run(cancel.clone()));

            tokio::signal::ctrl_c().await.context("cannot listen for Ctrl-C")?;
            info!("Ctrl-C received, waiting for in-flight runs");
            cancel.cancel();
            handle.await.context("initializer task failed")?;
            orch.wait_idle().await;
        }

        Command::PrepareData(args) => {
            let label_map: BTreeMap<String, i64> =
                serde_json::from_str(&args.label_map).context("--label-map is not a JSON object of ids")?;
            let prep_config = PrepareDataConfig {
                input_path: Some(args.input),
                output_dir: args.output_dir,
                dataset_name: args.dataset_name,
                feature_name: args.feature_name,
                label_name: args.label_name,
                label_map,
                tokenizer_path: args.tokenizer,
                max_sequence_length: args.max_sequence_length,
                model_name: args.model_name,
            };
            let tokenizer = {
                let prep_config = prep_config.clone();
                tokio::task::spawn_blocking(move || HfTokenizer::for_config(&prep_config))
                    .await
                    .context("tokenizer loading task failed")??
            };

            let summary = prep::prepare_data(&prep_config, Value::Null, &tokenizer, &channel).await?;
            println!("{} records written to {}", summary.records, summary.path.display());
        }
    }

    Ok(())
}
