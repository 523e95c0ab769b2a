use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use evaluation::{parse_request, EvaluationInput, PersonaSet, RuntimeOptions, StreamReader};
use review_agents::server::{self, AppState};
use review_agents::{BackendRegistry, EvaluationOrchestrator, ServiceConfig};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "review-agents", about = "Multi-persona presentation review")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve {
        /// Listen address (overrides REVIEW_BIND).
        #[arg(long)]
        bind: Option<std::net::SocketAddr>,
    },
    /// Review one request file and print the response JSON.
    Review {
        #[arg(long)]
        input: PathBuf,
        /// Print stream frames as they arrive, then the rebuilt response.
        #[arg(long)]
        stream: bool,
        /// Heuristics only.
        #[arg(long)]
        no_llm: bool,
        /// Persona TOML file (overrides REVIEW_PERSONAS).
        #[arg(long)]
        personas: Option<PathBuf>,
    },
    /// Print the configured persona panel.
    Personas {
        #[arg(long)]
        personas: Option<PathBuf>,
    },
    /// Suggest a slide order for one request file.
    Reshuffle {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        no_llm: bool,
    },
    /// Chart the emotional arc of one request file.
    Arc {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        no_llm: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ServiceConfig::from_env();

    match cli.command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            let personas = config.load_personas()?;
            info!(
                bind = %config.bind,
                personas = personas.len(),
                provider = %config.defaults.provider,
                use_llm = config.defaults.use_llm,
                "review service starting"
            );
            let state = Arc::new(AppState {
                personas,
                defaults: config.defaults.clone(),
                registry: BackendRegistry::global(),
            });
            server::serve(state, config.bind).await?;
        }
        Command::Review {
            input,
            stream,
            no_llm,
            personas,
        } => {
            if personas.is_some() {
                config.personas_path = personas;
            }
            let panel = config.load_personas()?;
            let (request, opts) = load_request(&input, &config.defaults, no_llm)?;
            let orchestrator = EvaluationOrchestrator::for_request(BackendRegistry::global(), &opts);

            let response = if stream {
                let mut events =
                    orchestrator.evaluate_streaming(request, panel.into_vec(), opts)?;
                let mut reader = StreamReader::new();
                while let Some(event) = events.next().await {
                    let frame = event.to_frame()?;
                    eprint!("{frame}");
                    reader.feed(&frame);
                }
                reader
                    .finish()
                    .context("stream ended without a consensus")?
            } else {
                orchestrator
                    .evaluate_blocking(request, panel.as_slice(), &opts)
                    .await?
            };
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Personas { personas } => {
            if personas.is_some() {
                config.personas_path = personas;
            }
            print_panel(&config.load_personas()?);
        }
        Command::Reshuffle { input, no_llm } => {
            let (request, opts) = load_request(&input, &config.defaults, no_llm)?;
            let orchestrator = EvaluationOrchestrator::for_request(BackendRegistry::global(), &opts);
            let suggestion = orchestrator.reshuffle(&request, &opts).await?;
            println!("{}", serde_json::to_string_pretty(&suggestion)?);
        }
        Command::Arc { input, no_llm } => {
            let (request, opts) = load_request(&input, &config.defaults, no_llm)?;
            let orchestrator = EvaluationOrchestrator::for_request(BackendRegistry::global(), &opts);
            let arc = orchestrator.emotional_arc(&request, &opts).await?;
            println!("{}", serde_json::to_string_pretty(&arc)?);
        }
    }

    Ok(())
}

fn load_request(
    path: &Path,
    defaults: &RuntimeOptions,
    no_llm: bool,
) -> Result<(EvaluationInput, RuntimeOptions)> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading request {}", path.display()))?;
    let body: serde_json::Value = serde_json::from_str(&raw)
        .with_context(|| format!("parsing request {}", path.display()))?;
    let (input, mut opts) = parse_request(&body, defaults)
        .with_context(|| format!("invalid request {}", path.display()))?;
    if no_llm {
        opts.use_llm = false;
    }
    Ok((input, opts))
}

fn print_panel(panel: &PersonaSet) {
    for persona in panel.as_slice() {
        let [clarity, uniqueness, persuasiveness] = persona.weighting.shares();
        println!(
            "{:<16} {:<28} clarity {:>3.0}%  uniqueness {:>3.0}%  persuasiveness {:>3.0}%",
            persona.persona_id,
            persona.display_role(),
            clarity * 100.0,
            uniqueness * 100.0,
            persuasiveness * 100.0
        );
    }
}
