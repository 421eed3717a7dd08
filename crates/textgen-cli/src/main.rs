use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use textgen_backend::Runtime;
use textgen_backend_llamacpp::LlamaRuntime;
use textgen_common::config::GenConfig;
use textgen_common::{GenError, Result};
use textgen_core::prompt::build_prompt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "textgen", version, about = "Single-turn text generation over llama.cpp")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a reply for one user message and print it
    Run(RunArgs),
    /// Print the templated prompt without loading a model
    Prompt(ConfigArgs),
    Version,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    /// YAML config file; overrides TEXTGEN_CONFIG
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// User message to answer
    #[arg(short = 'p', long)]
    message: Option<String>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    config: ConfigArgs,
    /// GGUF model file
    #[arg(short, long)]
    model: Option<PathBuf>,
    #[arg(short = 'n', long)]
    max_tokens: Option<usize>,
    #[arg(short, long)]
    temperature: Option<f32>,
    #[arg(long)]
    seed: Option<u32>,
    /// Context window in tokens
    #[arg(long)]
    ctx: Option<u32>,
    /// Maximum tokens per decode call
    #[arg(long)]
    batch: Option<u32>,
    #[arg(long)]
    gpu_layers: Option<u32>,
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Prompt(args) => show_prompt(args),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };
    exit_code(result)
}

fn exit_code(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &ConfigArgs) -> Result<GenConfig> {
    let mut cfg = match &args.config {
        Some(path) => GenConfig::from_file(path)?,
        None => GenConfig::load()?,
    };
    if let Some(message) = &args.message { cfg.user_message = message.clone(); }
    Ok(cfg)
}

fn run(args: RunArgs) -> Result<()> {
    let mut cfg = load_config(&args.config)?;
    if let Some(v) = args.model { cfg.model_path = v; }
    if let Some(v) = args.max_tokens { cfg.max_tokens = Some(v); }
    if let Some(v) = args.temperature { cfg.temperature = v; }
    if let Some(v) = args.seed { cfg.seed = v; }
    if let Some(v) = args.ctx { cfg.context_length = v; }
    if let Some(v) = args.batch { cfg.batch_capacity = v; }
    if let Some(v) = args.gpu_layers { cfg.gpu_layers = Some(v); }

    let runtime = acquire_runtime()?;
    complete(&runtime, &cfg, &mut std::io::stdout().lock())
}

fn acquire_runtime() -> Result<LlamaRuntime> {
    LlamaRuntime::init().ok_or(GenError::BackendUnavailable)
}

/// Writes the (possibly partial) text, then fails if generation stopped on
/// an error so the process still exits non-zero.
fn complete(runtime: &dyn Runtime, cfg: &GenConfig, out: &mut dyn Write) -> Result<()> {
    let completion = textgen_core::generate(runtime, cfg)?;
    writeln!(out, "{}", completion.text).map_err(|e| GenError::Output(e.to_string()))?;
    match completion.error() {
        Some(e) => Err(e.clone()),
        None => Ok(()),
    }
}

fn show_prompt(args: ConfigArgs) -> Result<()> {
    let cfg = load_config(&args)?;
    println!("{}", build_prompt(&cfg.user_message, &cfg.system));
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    // stdout carries only generated text
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use textgen_backend::mock::{MockRuntime, MockScript};
    use textgen_common::DecodeStage;

    fn mock_config() -> GenConfig {
        GenConfig { seed: 42, ..GenConfig::default() }
    }

    #[test]
    fn clean_run_prints_text_and_succeeds() {
        let runtime = MockRuntime::new(MockScript::replying("SELECT 1;"));
        let mut out = Vec::new();
        let result = complete(&runtime, &mock_config(), &mut out);
        assert_eq!(result, Ok(()));
        assert_eq!(String::from_utf8(out).expect("utf8"), "SELECT 1;\n");
    }

    #[test]
    fn step_failure_prints_partial_text_then_fails() {
        let script = MockScript { fail_decode_at: Some(3), ..MockScript::replying("SELECT 1") };
        let runtime = MockRuntime::new(script);
        let mut out = Vec::new();
        let result = complete(&runtime, &mock_config(), &mut out);
        assert_eq!(result, Err(GenError::Decode { stage: DecodeStage::Step, code: -2 }));
        assert_eq!(String::from_utf8(out).expect("utf8"), "SEL\n");
    }

    #[test]
    fn second_backend_is_reported_as_unavailable() {
        let held = acquire_runtime().expect("first runtime");
        assert!(matches!(acquire_runtime(), Err(GenError::BackendUnavailable)));
        drop(held);
        assert!(acquire_runtime().is_ok());
    }

    #[test]
    fn prefill_failure_prints_nothing() {
        let script = MockScript { fail_decode_at: Some(0), ..MockScript::replying("SELECT 1") };
        let runtime = MockRuntime::new(script);
        let mut out = Vec::new();
        let result = complete(&runtime, &mock_config(), &mut out);
        assert!(matches!(result, Err(GenError::Decode { stage: DecodeStage::Prefill, .. })));
        assert!(out.is_empty());
    }

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from(["textgen", "run", "-m", "m.gguf", "-p", "hallo", "-n", "32", "--seed", "7"]).expect("parse");
        let Commands::Run(args) = cli.command else { panic!("expected run") };
        assert_eq!(args.model, Some(PathBuf::from("m.gguf")));
        assert_eq!(args.config.message.as_deref(), Some("hallo"));
        assert_eq!(args.max_tokens, Some(32));
        assert_eq!(args.seed, Some(7));
    }

    #[test]
    fn prompt_takes_config_file() {
        let cli = Cli::try_parse_from(["textgen", "prompt", "--config", "gen.yaml"]).expect("parse");
        assert!(matches!(cli.command, Commands::Prompt(ConfigArgs { config: Some(_), message: None })));
    }
}
