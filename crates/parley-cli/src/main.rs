use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use log::LevelFilter;
use parley_core::{
    ConfigLoader, Llm, LlmOperateResponse, LlmStreamChunk, OperateOptions, ParleyConfig,
    ResponseContent, Turns, UsageItem,
};
use std::env;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "parley.yaml";

#[derive(Parser, Debug)]
#[clap(name = "parley", author, version = "0.1.0", about = "Run a prompt through an LLM provider")]
struct Cli {
    #[clap(
        long,
        short,
        help = "Configuration file (defaults to ./parley.yaml when present)"
    )]
    config: Option<PathBuf>,

    #[clap(long, short, help = "Provider name: anthropic, openai, gemini or openrouter")]
    provider: Option<String>,

    #[clap(long, short, help = "Model identifier; the provider is inferred when omitted")]
    model: Option<String>,

    #[clap(long, help = "Maximum number of model turns")]
    turns: Option<usize>,

    #[clap(long, help = "Print text as it arrives")]
    stream: bool,

    #[clap(long, help = "System prompt")]
    system: Option<String>,

    #[clap(long, short, help = "Log level, overriding the configuration")]
    log_level: Option<String>,

    /// Prompt sent as the user message
    prompt: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let rust_log = env::var("RUST_LOG").ok().filter(|v| !v.is_empty());
    init_logging(rust_log.as_deref(), cli.log_level.as_deref());

    let mut config = load_config(cli.config.as_deref()).await?;
    apply_overrides(&mut config, &cli);

    if let Some(level) = configured_level(rust_log.as_deref(), &cli, &config) {
        log::set_max_level(level);
    }

    config.validate()?;
    let llm = Llm::new(config)?;

    let options = OperateOptions {
        system: cli.system.clone(),
        ..Default::default()
    };

    if cli.stream {
        run_stream(&llm, cli.prompt, options).await
    } else {
        run_operate(&llm, cli.prompt, options).await
    }
}

/// Starts logging before the configuration is read. `RUST_LOG` directives
/// win over `--log-level`; the configured level applies once loaded.
fn init_logging(rust_log: Option<&str>, cli_level: Option<&str>) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Trace);
    if let Some(spec) = rust_log {
        builder.parse_filters(spec);
    }
    builder.init();

    let level = match rust_log {
        Some(_) => LevelFilter::Trace,
        None => cli_level
            .and_then(|l| l.parse().ok())
            .unwrap_or(LevelFilter::Info),
    };
    log::set_max_level(level);
}

/// Level from the configuration file, when nothing more specific was given.
fn configured_level(
    rust_log: Option<&str>,
    cli: &Cli,
    config: &ParleyConfig,
) -> Option<LevelFilter> {
    if rust_log.is_some() || cli.log_level.is_some() {
        return None;
    }
    config.logging.level.parse().ok()
}

async fn load_config(path: Option<&Path>) -> Result<ParleyConfig> {
    match path {
        Some(path) => ConfigLoader::from_file(path)
            .await
            .with_context(|| format!("loading {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            Ok(ConfigLoader::from_file(DEFAULT_CONFIG_FILE).await?)
        }
        None => Ok(ParleyConfig::default()),
    }
}

/// Command-line flags win over the file. A model given without a provider
/// drops the configured provider so it is inferred from the model.
fn apply_overrides(config: &mut ParleyConfig, cli: &Cli) {
    if let Some(model) = &cli.model {
        config.llm.model = Some(model.clone());
        if cli.provider.is_none() {
            config.llm.provider = None;
        }
    }
    if let Some(provider) = &cli.provider {
        config.llm.provider = Some(provider.clone());
    }
    if let Some(turns) = cli.turns {
        config.turns = Some(Turns::from(turns));
    }
}

async fn run_operate(llm: &Llm, prompt: String, options: OperateOptions) -> Result<()> {
    let response = llm.operate(prompt, options).await?;

    match &response.content {
        Some(ResponseContent::Text(text)) => println!("{}", text),
        Some(ResponseContent::Structured(value)) => {
            println!("{}", serde_json::to_string_pretty(value)?)
        }
        None => {}
    }
    if let Some(error) = &response.error {
        eprintln!(
            "{} {}: {}",
            error.status,
            error.title,
            error.detail.as_deref().unwrap_or("")
        );
    }
    print_usage(&response);
    Ok(())
}

async fn run_stream(llm: &Llm, prompt: String, options: OperateOptions) -> Result<()> {
    let mut chunks = llm.stream(prompt, options);
    let mut stdout = io::stdout();
    let mut failed = None;

    while let Some(chunk) = chunks.next().await {
        match chunk {
            LlmStreamChunk::Text { content } => {
                print!("{}", content);
                stdout.flush()?;
            }
            LlmStreamChunk::Error { error } => {
                eprintln!(
                    "\n{} {}: {}",
                    error.status,
                    error.title,
                    error.detail.as_deref().unwrap_or("")
                );
                failed = Some(error.status);
            }
            LlmStreamChunk::Done { usage } => {
                println!();
                eprintln!("{}", usage_summary(&usage));
            }
            LlmStreamChunk::ToolCall { .. }
            | LlmStreamChunk::ToolResult { .. }
            | LlmStreamChunk::Reasoning { .. } => {}
        }
    }

    match failed {
        Some(status) => anyhow::bail!("stream ended with error status {}", status),
        None => Ok(()),
    }
}

fn print_usage(response: &LlmOperateResponse) {
    eprintln!("{}", usage_summary(&response.usage));
    if response.fallback_used == Some(true) {
        eprintln!(
            "answered by fallback {} ({} {})",
            response.fallback_attempts.unwrap_or_default(),
            response.provider,
            response.model
        );
    }
}

fn usage_summary(usage: &[UsageItem]) -> String {
    let total = parley_core::core_types::sum_usage(usage);
    format!(
        "usage: {} requests, {} input / {} output / {} reasoning tokens",
        usage.len(),
        total.input,
        total.output,
        total.reasoning
    )
}
