use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use evalbox_bridge::{BridgeClient, ChatShapeReport};
use evalbox_core::{EvalboxConfig, EvaluationOutcome};
use evalbox_harness::{deadline_from_secs, Evaluator};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PROBE_PROMPT: &str = "Hello, respond with just 'Hi there!'";
const CHAT_PROMPT: &str = "Hello! Can you write a simple Python function that adds two numbers?";

#[derive(Parser)]
#[command(name = "evalbox")]
#[command(about = "evalbox - deadline-bounded candidate evaluation", long_about = None)]
struct Cli {
    /// Config file (.json, .yaml or .yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a candidate program
    Eval {
        /// Candidate source file
        path: PathBuf,

        /// Deadline in seconds
        #[arg(short, long, default_value = "30")]
        timeout: f64,

        /// Entry operation to invoke
        #[arg(short, long)]
        entry: Option<String>,

        /// Address-space cap for the candidate, in MiB
        #[arg(long)]
        memory_mb: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List models served by the bridge
    Models {
        /// Bridge base URL (the /v1 root)
        #[arg(long)]
        api_base: Option<String>,
    },

    /// Send a raw chat request and describe the response shape
    Probe {
        #[arg(short, long)]
        model: Option<String>,

        #[arg(short, long)]
        prompt: Option<String>,
    },

    /// Run a typed chat completion against the bridge
    Chat {
        #[arg(short, long)]
        model: Option<String>,

        #[arg(short, long)]
        prompt: Option<String>,
    },

    /// Load, validate and summarize a config file
    Config {
        file: PathBuf,
    },

    /// Check config, bridge health and chat, and optionally a candidate
    Doctor {
        /// Candidate to evaluate as an extra check
        #[arg(long)]
        candidate: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Eval {
            path,
            timeout,
            entry,
            memory_mb,
            format,
        } => cmd_eval(config_path, &path, timeout, entry, memory_mb, format).await,
        Commands::Models { api_base } => {
            cmd_models(config_path, api_base).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Probe { model, prompt } => {
            cmd_probe(config_path, model, prompt).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Chat { model, prompt } => {
            cmd_chat(config_path, model, prompt).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { file } => {
            cmd_config(&file)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Doctor { candidate } => cmd_doctor(config_path, candidate.as_deref()).await,
    }
}

/// Defaults, then the optional file, then the environment.
fn load_config(path: Option<&Path>) -> Result<EvalboxConfig> {
    let mut config = match path {
        Some(path) => EvalboxConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EvalboxConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn bridge_client(config: &EvalboxConfig) -> Result<BridgeClient> {
    Ok(BridgeClient::from_config(&config.llm)?)
}

fn pick_model(config: &EvalboxConfig, model: Option<String>) -> Result<String> {
    match model.or_else(|| config.llm.primary_model().map(str::to_string)) {
        Some(model) => Ok(model),
        None => anyhow::bail!("No model given and none configured"),
    }
}

fn exit_code(outcome: &EvaluationOutcome) -> u8 {
    match outcome {
        EvaluationOutcome::Success { .. } => 0,
        EvaluationOutcome::Failure { .. } => 1,
        EvaluationOutcome::TimedOut { .. } => 2,
    }
}

fn render_outcome(outcome: &EvaluationOutcome) -> String {
    match outcome {
        EvaluationOutcome::Success { value } => format!("SUCCESS: {}", value),
        EvaluationOutcome::Failure {
            kind,
            message,
            trace,
        } => {
            let mut out = format!("ERROR: {}: {}", kind.as_str(), message);
            if !trace.trim().is_empty() {
                out.push('\n');
                out.push_str(trace.trim_end());
            }
            out
        }
        EvaluationOutcome::TimedOut { limit } => {
            format!("TIMEOUT: exceeded {}s", limit.as_secs_f64())
        }
    }
}

async fn cmd_eval(
    config_path: Option<&Path>,
    path: &Path,
    timeout: f64,
    entry: Option<String>,
    memory_mb: Option<u64>,
    format: OutputFormat,
) -> Result<ExitCode> {
    let mut config = load_config(config_path)?;
    if let Some(entry) = entry {
        config.evaluator.entry = entry;
    }
    if memory_mb.is_some() {
        config.evaluator.memory_limit_mb = memory_mb;
    }
    config.evaluator.validate()?;

    let evaluator = Evaluator::new(config.evaluator);
    let deadline = deadline_from_secs(timeout);
    info!(
        "Evaluating {} with entry `{}` and deadline {:?}",
        path.display(),
        evaluator.config().entry,
        deadline
    );
    let outcome = evaluator.evaluate(path, deadline).await;
    info!(status = outcome.status(), "Evaluation finished");

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text => println!("{}", render_outcome(&outcome)),
    }

    Ok(ExitCode::from(exit_code(&outcome)))
}

async fn cmd_models(config_path: Option<&Path>, api_base: Option<String>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(api_base) = api_base {
        config.llm.api_base = api_base;
    }
    let client = bridge_client(&config)?;
    info!("Listing models at {}", client.api_base());
    let models = client.list_models().await?;

    println!();
    println!("Models at {}:", client.api_base());
    println!("{:-<60}", "");
    println!("  {:<4} {:<36} {}", "#", "ID", "Owner");
    println!("{:-<60}", "");
    for (i, m) in models.iter().enumerate() {
        let owner = m.owned_by.as_deref().unwrap_or("-");
        println!("  {:<4} {:<36} {}", i + 1, m.id, owner);
    }
    println!();

    Ok(())
}

fn print_shape(report: &ChatShapeReport) {
    println!("Status:          {}", report.status);
    println!(
        "Content-Type:    {}",
        report.content_type.as_deref().unwrap_or("-")
    );
    match report.json_kind {
        Some(kind) => println!("JSON kind:       {:?}", kind),
        None => println!("JSON kind:       not JSON"),
    }
    if report.double_encoded {
        println!("Double-encoded:  yes (JSON object inside a JSON string)");
    }
    if !report.keys.is_empty() {
        println!("Keys:            {}", report.keys.join(", "));
    }
    println!(
        "Choices:         {}",
        if report.has_choices {
            report.choice_count.to_string()
        } else {
            "missing".to_string()
        }
    );
    if let Some(content) = &report.first_content {
        println!("First content:   {}", content);
    }
    println!("OpenAI-shaped:   {}", report.is_openai_compatible());
    println!();
    println!("Body:");
    println!("{}", report.body);
}

async fn cmd_probe(
    config_path: Option<&Path>,
    model: Option<String>,
    prompt: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let model = pick_model(&config, model)?;
    let prompt = prompt.unwrap_or_else(|| PROBE_PROMPT.to_string());
    let client = bridge_client(&config)?;

    println!("Probing {}/chat/completions with model {}", client.api_base(), model);
    println!("{:-<60}", "");
    let report = client.inspect_chat(&model, &prompt).await?;
    print_shape(&report);

    Ok(())
}

async fn cmd_chat(
    config_path: Option<&Path>,
    model: Option<String>,
    prompt: Option<String>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let model = pick_model(&config, model)?;
    let prompt = prompt.unwrap_or_else(|| CHAT_PROMPT.to_string());
    let client = bridge_client(&config)?;

    let reply = client
        .chat(
            &model,
            &prompt,
            Some(config.llm.max_tokens),
            Some(config.llm.temperature),
        )
        .await?;

    println!("Model: {}", reply.model);
    if let Some(tokens) = reply.total_tokens {
        println!("Tokens: {}", tokens);
    }
    println!("{:-<60}", "");
    println!("{}", reply.content);

    Ok(())
}

fn cmd_config(file: &Path) -> Result<()> {
    let config = load_config(Some(file))?;

    println!("Config {} is valid", file.display());
    println!("{:-<60}", "");
    println!("  Bridge:          {}", config.llm.api_base);
    for m in &config.llm.models {
        println!("  Model:           {} (weight {})", m.name, m.weight);
    }
    println!("  Temperature:     {}", config.llm.temperature);
    println!("  Max tokens:      {}", config.llm.max_tokens);
    println!("  Python:          {}", config.evaluator.python);
    println!("  Node:            {}", config.evaluator.node);
    println!("  Entry:           {}", config.evaluator.entry);
    println!("  Output limit:    {} bytes", config.evaluator.output_limit_bytes);
    match config.evaluator.memory_limit_mb {
        Some(mb) => println!("  Memory limit:    {} MiB", mb),
        None => println!("  Memory limit:    none"),
    }
    println!("  Max iterations:  {}", config.max_iterations);

    Ok(())
}

struct Check {
    name: &'static str,
    result: Result<String>,
}

impl Check {
    fn line(&self) -> String {
        match &self.result {
            Ok(detail) => format!("✅ {}: {}", self.name, detail),
            Err(e) => format!("❌ {}: {:#}", self.name, e),
        }
    }
}

async fn cmd_doctor(config_path: Option<&Path>, candidate: Option<&Path>) -> Result<ExitCode> {
    let mut checks = Vec::new();

    let config = load_config(config_path);
    checks.push(Check {
        name: "config",
        result: config
            .as_ref()
            .map(|c| format!("bridge {}", c.llm.api_base))
            .map_err(|e| anyhow::anyhow!("{:#}", e)),
    });
    let config = config.unwrap_or_default();

    match bridge_client(&config) {
        Ok(client) => {
            checks.push(Check {
                name: "bridge health",
                result: client
                    .list_models()
                    .await
                    .map(|models| format!("{} models available", models.len()))
                    .map_err(Into::into),
            });

            let chat = match pick_model(&config, None) {
                Ok(model) => client
                    .chat(&model, PROBE_PROMPT, Some(config.llm.max_tokens), None)
                    .await
                    .map(|reply| format!("{} replied {:?}", reply.model, reply.content.trim()))
                    .map_err(Into::into),
                Err(e) => Err(e),
            };
            checks.push(Check {
                name: "chat completion",
                result: chat,
            });
        }
        Err(e) => checks.push(Check {
            name: "bridge client",
            result: Err(e),
        }),
    }

    if let Some(candidate) = candidate {
        let evaluator = Evaluator::new(config.evaluator.clone());
        let outcome = evaluator.evaluate(candidate, deadline_from_secs(30.0)).await;
        let result = if outcome.is_success() {
            Ok(render_outcome(&outcome))
        } else {
            Err(anyhow::anyhow!(render_outcome(&outcome)))
        };
        checks.push(Check {
            name: "candidate",
            result,
        });
    }

    println!();
    for check in &checks {
        println!("{}", check.line());
    }
    let passed = checks.iter().filter(|c| c.result.is_ok()).count();
    if passed < checks.len() {
        warn!("{} of {} doctor checks failed", checks.len() - passed, checks.len());
    }
    println!();
    println!("{}/{} checks passed", passed, checks.len());

    Ok(if passed == checks.len() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
