use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use sab_contracts::config::{config_override_path, PipelineConfig};
use sab_contracts::events::EventWriter;
use sab_contracts::outputs::FilenameLookup;
use sab_engine::{
    DisplayOptions, GenerateParams, HttpSettings, OpenAiChatClient, Pipeline, PipelineOutcome,
    SwarmHttpClient, SystemDisplay,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const DEFAULT_MODEL: &str = "OfficialStableDiffusion/sd3_medium_incl_clips";

#[derive(Debug, Parser)]
#[command(name = "sabcli", version, about = "SwarmUI image generation from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate an image, optionally enriching the prompt and refining it
    /// through vision critique.
    GenerateImage(GenerateArgs),
    /// Print the text back.
    Echo(EchoArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long, default_value = "localhost")]
    hostname: String,
    #[arg(long, default_value_t = 7801)]
    port: u16,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    session_id: Option<String>,
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,
    #[arg(long, default_value_t = 1)]
    images: u32,
    /// Extra request field; repeatable, applied in order.
    #[arg(
        short = 'd',
        long = "dynamic",
        num_args = 2,
        value_names = ["KEY", "VALUE"],
        action = ArgAction::Append
    )]
    dynamic: Vec<String>,
    #[arg(long, default_value = "./output")]
    output: PathBuf,
    #[arg(short = 'e', long)]
    enrich_prompt: bool,
    #[arg(short = 's', long)]
    style: Option<String>,
    /// Render each saved image in the terminal.
    #[arg(long)]
    show: bool,
    /// Open each saved image in the system viewer.
    #[arg(long)]
    open: bool,
    #[arg(long)]
    analyze: bool,
    #[arg(long, default_value_t = 1)]
    iterations: u32,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Append run events as JSON lines to this file.
    #[arg(long)]
    events: Option<PathBuf>,
    /// Transport timeout in seconds.
    #[arg(long)]
    timeout: Option<f64>,
}

#[derive(Debug, Parser)]
struct EchoArgs {
    text: String,
    #[arg(short = 'r', long)]
    reverse: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("sabcli error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Command::GenerateImage(args) => run_generate(args),
        Command::Echo(args) => {
            println!("{}", echo_text(&args.text, args.reverse));
            Ok(0)
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,sab_engine=info,sab_contracts=info,sabcli=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let config_path = config_override_path(args.config.clone());
    let config = PipelineConfig::load(config_path.as_deref())?;
    debug!(config = ?config_path, "configuration loaded");

    let settings = HttpSettings {
        timeout: args.timeout.map(timeout_from_secs).transpose()?,
    };
    let images = SwarmHttpClient::for_host(&args.hostname, args.port, &settings)?;
    let chat = OpenAiChatClient::from_env(&settings)?;
    let display = SystemDisplay::from_config(&config.display);
    let events = EventWriter::for_invocation(args.events.clone());
    let pipeline = Pipeline::new(&config, &images, &chat, &FilenameLookup, &display, events);

    let params = generate_params(args)?;
    let outcome = pipeline.run(&params)?;
    for line in outcome_lines(&outcome) {
        println!("{line}");
    }
    Ok(0)
}

/// Console report for a finished run, one entry per printed line.
fn outcome_lines(outcome: &PipelineOutcome) -> Vec<String> {
    let mut lines = Vec::new();
    match outcome {
        PipelineOutcome::Existing { path, .. } => {
            lines.push(format!("Image already exists at {}", path.display()));
        }
        PipelineOutcome::Generated {
            result,
            saved,
            rounds,
            ..
        } => {
            lines.push(format!("Generation result: {}", result.raw));
            lines.push(format!("Image saved to {}", saved.path.display()));
            for (index, round) in rounds.iter().enumerate() {
                lines.push(format!("Revised prompt ({}): {}", index + 1, round.revised_prompt));
                lines.push(format!("Generation result: {}", round.result.raw));
                lines.push(format!("Image saved to {}", round.saved.path.display()));
            }
        }
        PipelineOutcome::NoImage { saved } => {
            for image in saved {
                lines.push(format!("Image saved to {}", image.path.display()));
            }
            lines.push("No image was returned by the server.".to_string());
        }
    }
    lines
}

fn generate_params(args: GenerateArgs) -> Result<GenerateParams> {
    Ok(GenerateParams {
        overrides: dynamic_pairs(&args.dynamic)?,
        prompt: args.prompt,
        session_id: args.session_id,
        model: Some(args.model),
        images: args.images,
        output_dir: args.output,
        enrich: args.enrich_prompt,
        style: args.style,
        display: DisplayOptions {
            render_in_terminal: args.show,
            open_in_viewer: args.open,
        },
        analysis_rounds: if args.analyze { args.iterations } else { 0 },
    })
}

fn dynamic_pairs(values: &[String]) -> Result<Vec<(String, String)>> {
    if values.len() % 2 != 0 {
        bail!("--dynamic takes a KEY and a VALUE");
    }
    Ok(values
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

fn timeout_from_secs(seconds: f64) -> Result<Duration> {
    if seconds <= 0.0 {
        bail!("--timeout must be positive, got {seconds}");
    }
    Duration::try_from_secs_f64(seconds).with_context(|| format!("invalid --timeout {seconds}"))
}

fn echo_text(text: &str, reverse: bool) -> String {
    if reverse {
        text.chars().rev().collect()
    } else {
        text.to_string()
    }
}
