use anyhow::{Context, Result};
use aura_agents::check_cli_available;
use aura_models::{FeedbackRating, TriggerKind, TriggerMetadata, WorkflowId, WorkflowState};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aura", about = "Multi-opinion trading signal workflow")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/aura.toml", global = true)]
    config: String,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    /// Pretty-print the output JSON
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one workflow per instrument and print the finished records.
    ///
    /// Without --feedback each run waits out the feedback window;
    /// pass --feedback-timeout 0 to skip it.
    Run {
        #[arg(required = true)]
        instruments: Vec<String>,

        #[arg(long, value_enum, default_value_t = TriggerArg::Manual)]
        trigger: TriggerArg,

        /// Scheduler name, event id or user that requested the run
        #[arg(long)]
        source: Option<String>,

        #[arg(long, default_value = "1h")]
        timeframe: String,

        /// Rate every signal as soon as it is ready (good_signal or bad_signal)
        #[arg(long)]
        feedback: Option<FeedbackRating>,

        #[arg(long, requires = "feedback")]
        note: Option<String>,

        /// Override workflow.feedback_timeout_seconds
        #[arg(long)]
        feedback_timeout: Option<u64>,
    },

    /// Print the record of a workflow from the archive.
    Status { workflow_id: WorkflowId },

    /// Print feedback statistics.
    Stats {
        /// Width of the recent window in days
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Print the most recent archived runs for an instrument.
    History {
        instrument: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TriggerArg {
    Manual,
    Scheduled,
    Event,
}

impl From<TriggerArg> for TriggerKind {
    fn from(arg: TriggerArg) -> Self {
        match arg {
            TriggerArg::Manual => TriggerKind::Manual,
            TriggerArg::Scheduled => TriggerKind::Scheduled,
            TriggerArg::Event => TriggerKind::Event,
        }
    }
}

fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let output = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = aura::load_config(&cli.config)?;

    match cli.command {
        Command::Run {
            instruments,
            trigger,
            source,
            timeframe,
            feedback,
            note,
            feedback_timeout,
        } => {
            if let Some(seconds) = feedback_timeout {
                config.workflow.feedback_timeout_seconds = seconds;
            }
            if !check_cli_available().await {
                warn!("claude CLI not found on PATH; producers will fail and signals will fall back to HOLD");
            }

            let coordinator =
                aura::build_coordinator(&config).context("Failed to build coordinator")?;

            let mut metadata = TriggerMetadata::new(trigger.into()).with_timeframe(timeframe);
            if let Some(source) = source {
                metadata = metadata.with_source(source);
            }

            let ids = coordinator.start_batch(instruments, metadata);
            let mut records = Vec::with_capacity(ids.len());
            for id in ids {
                let ready = coordinator
                    .wait_for_state(id, WorkflowState::AwaitingFeedback)
                    .await
                    .with_context(|| format!("Failed to follow workflow {id}"))?;
                if let Some(result) = ready.synthesis_result() {
                    info!(
                        workflow_id = %id,
                        instrument = %result.asset,
                        direction = %result.direction,
                        confidence = %result.confidence,
                        "Signal ready"
                    );
                }

                if let (Some(rating), WorkflowState::AwaitingFeedback) = (feedback, ready.state()) {
                    coordinator
                        .submit_feedback(id, rating, note.clone())
                        .await
                        .with_context(|| format!("Failed to submit feedback for {id}"))?;
                }

                records.push(
                    coordinator
                        .wait_for_completion(id)
                        .await
                        .with_context(|| format!("Failed to complete workflow {id}"))?,
                );
            }

            if let [record] = records.as_slice() {
                print_json(record, cli.pretty)?;
            } else {
                print_json(&records, cli.pretty)?;
            }
        }

        Command::Status { workflow_id } => {
            let coordinator =
                aura::build_coordinator(&config).context("Failed to build coordinator")?;
            let record = coordinator
                .get_workflow_status(workflow_id)
                .await
                .with_context(|| format!("Failed to look up workflow {workflow_id}"))?;
            print_json(&record, cli.pretty)?;
        }

        Command::Stats { days } => {
            let coordinator =
                aura::build_coordinator(&config).context("Failed to build coordinator")?;
            let report = coordinator
                .feedback_stats(days)
                .await
                .context("Failed to read feedback statistics")?;
            print_json(&report, cli.pretty)?;
        }

        Command::History { instrument, limit } => {
            let coordinator =
                aura::build_coordinator(&config).context("Failed to build coordinator")?;
            let records = coordinator
                .history(&instrument, limit)
                .await
                .with_context(|| format!("Failed to read history for {instrument}"))?;
            print_json(&records, cli.pretty)?;
        }
    }

    Ok(())
}
