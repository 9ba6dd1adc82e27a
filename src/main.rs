use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use ripple::config::Config;
use ripple::extract::{ExtractProfile, Extractor};
use ripple::orchestration::{Orchestrator, RunOptions};
use ripple::pipeline::{BuildContext, Pipeline};
use ripple::sink::JsonFileSink;
use ripple::stream::{Encoding, EventStream};
use ripple::{rlog, Error, Result};

/// Ripple - streaming orchestrator for dependent generation tasks
#[derive(Parser, Debug)]
#[command(name = "ripple")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RIPPLE_DEBUG=1           Enable debug logging (alternative to --debug)\n    RIPPLE_LOG=<level>       Log level: error, warn, info, debug or trace\n    RIPPLE_LOG_FILE=<path>   Write the log somewhere other than ~/.ripple/ripple.log")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.ripple/ripple.log)
    #[arg(short = 'd', long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a pipeline file and print progress events as they happen
    Run {
        /// Pipeline definition (TOML)
        pipeline: PathBuf,

        /// Read the pipeline input from a file instead of stdin
        #[arg(long, short = 'i')]
        input: Option<PathBuf>,

        /// Correlation id echoed in the final event
        #[arg(long)]
        correlation_id: Option<String>,

        /// Emit newline-delimited JSON instead of SSE frames
        #[arg(long)]
        ndjson: bool,

        /// Write the merged results to this file
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Use this config file instead of ~/.ripple/ripple.toml
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Recover a structured value from model output on stdin
    Extract {
        /// Field to salvage from truncated output
        #[arg(long, short = 'f')]
        field: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on debug flag
    ripple::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            pipeline,
            input,
            correlation_id,
            ndjson,
            output,
            config,
        } => {
            let encoding = if ndjson {
                Encoding::NdJson
            } else {
                Encoding::Sse
            };
            run_pipeline(
                &pipeline,
                input.as_deref(),
                correlation_id,
                encoding,
                output,
                config.as_deref(),
            )
        }
        Command::Extract { field } => run_extract(field),
    }
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Execute a pipeline, streaming encoded events to stdout.
fn run_pipeline(
    pipeline_path: &Path,
    input: Option<&Path>,
    correlation_id: Option<String>,
    encoding: Encoding,
    output: Option<PathBuf>,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let pipeline = Pipeline::load(pipeline_path)?;
    let input = read_input(input)?;
    rlog!(
        "Run command: pipeline={}, tasks={}, backend={:?}",
        pipeline_path.display(),
        pipeline.tasks.len(),
        config.backend.kind
    );

    let ctx = BuildContext {
        options: config.generation_options(),
        retry: config.retry_policy(),
        cache: config.result_cache(),
    };
    let seeds = pipeline.build(&input, &ctx);

    let mut orchestrator = Orchestrator::new(config.build_backend()?);
    if let Some(path) = output {
        orchestrator = orchestrator.with_sink(Arc::new(JsonFileSink::new(path)));
    }
    let options = RunOptions {
        correlation_id: correlation_id.or(pipeline.correlation_id.clone()),
        ..RunOptions::default()
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let (event_tx, event_rx) = mpsc::channel(64);
        let cancel = options.cancel.clone();

        let run = async {
            tokio::select! {
                result = orchestrator.run(seeds, options, event_tx) => result,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    Err(Error::Cancelled)
                }
            }
        };
        let print = async {
            let mut stream = EventStream::new(event_rx, encoding);
            let mut stdout = tokio::io::stdout();
            while let Some(frame) = stream.next().await {
                stdout.write_all(frame.as_bytes()).await?;
                stdout.flush().await?;
            }
            Ok::<(), Error>(())
        };

        let (result, printed) = tokio::join!(run, print);
        printed?;
        result.map(|_| ())
    })
}

/// Run the extractor over stdin and print the outcome as JSON.
fn run_extract(field: Option<String>) -> Result<()> {
    let raw = read_input(None)?;
    let profile = match field {
        Some(field) => ExtractProfile::new().with_salvage_field(field),
        None => ExtractProfile::new(),
    };
    let extraction = Extractor::new(profile).extract(&raw);
    rlog!(
        "Extract command: strategy={}, ok={}",
        extraction.strategy,
        extraction.ok
    );

    let json_output = serde_json::json!({
        "strategy": extraction.strategy,
        "ok": extraction.ok,
        "value": extraction.value,
    });
    println!("{}", serde_json::to_string_pretty(&json_output)?);
    Ok(())
}
