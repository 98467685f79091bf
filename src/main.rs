use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use voice_orchestrator::config::{AgentConfiguration, OrchestratorConfig, SessionMode};
use voice_orchestrator::core::integrations::{GOOGLE_DOCS, GOOGLE_SHEETS, Integrations};
use voice_orchestrator::core::providers::{
    build_instructions, map_grok_voice, resolve_llm_provider, resolve_realtime_provider,
    resolve_stt_provider, resolve_tts_provider,
};
use voice_orchestrator::core::realtime::RealtimeVendor;
use voice_orchestrator::core::tools::{
    GoogleDocsTools, GoogleSheetsTools, InMemoryContactStore, ToolRouter,
};
use voice_orchestrator::core::TenantId;

/// Voice orchestrator - inspect agent configurations offline
#[derive(Parser, Debug)]
#[command(name = "voice-orchestrator")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Report the session mode, providers and instructions an agent selects
    Check {
        /// Agent configuration (JSON or YAML)
        #[arg(short = 'a', long = "agent", value_name = "FILE")]
        agent: PathBuf,
    },

    /// Print the tool definitions an agent enables
    Tools {
        /// Agent configuration (JSON or YAML)
        #[arg(short = 'a', long = "agent", value_name = "FILE")]
        agent: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => OrchestratorConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => OrchestratorConfig::from_env().map_err(|e| anyhow!(e.to_string()))?,
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    match cli.command {
        Commands::Check { agent } => check(&load_agent(&agent)?, &config),
        Commands::Tools { agent } => tools(&load_agent(&agent)?, &config),
    }
}

fn load_agent(path: &Path) -> anyhow::Result<AgentConfiguration> {
    let agent = AgentConfiguration::from_file(path)
        .with_context(|| format!("Failed to load agent configuration from {}", path.display()))?;
    info!(path = %path.display(), mode = agent.mode().as_str(), "Agent configuration loaded");
    Ok(agent)
}

fn check(agent: &AgentConfiguration, config: &OrchestratorConfig) -> anyhow::Result<()> {
    println!("mode: {}", agent.mode().as_str());

    let greeting = match agent.mode() {
        SessionMode::Realtime => {
            let name = agent.realtime_provider().unwrap_or_default();
            let vendor = resolve_realtime_provider(name)
                .ok_or_else(|| anyhow!("Unsupported realtime provider: {name}"))?;
            let model = agent
                .realtime_model
                .as_deref()
                .unwrap_or(vendor.default_model());
            let voice = match vendor {
                RealtimeVendor::Grok => map_grok_voice(&agent.voice),
                RealtimeVendor::OpenAI => agent.voice.as_str(),
            };
            println!("realtime: {} (model {model}, voice {voice})", vendor.as_str());
            println!("credential: {}", vendor.credential_provider());
            // Integrated providers speak the greeting from their instructions
            agent.initial_greeting()
        }
        SessionMode::Pipeline => {
            let stt = resolve_stt_provider(&agent.stt_provider)
                .ok_or_else(|| anyhow!("Unsupported stt provider: {}", agent.stt_provider))?;
            let llm = resolve_llm_provider(&agent.llm_provider)
                .ok_or_else(|| anyhow!("Unsupported llm provider: {}", agent.llm_provider))?;
            let tts = resolve_tts_provider(&agent.tts_provider)
                .ok_or_else(|| anyhow!("Unsupported tts provider: {}", agent.tts_provider))?;
            println!("stt: {stt:?} (model {})", agent.stt_model);
            println!("llm: {llm:?} (model {})", agent.llm_model);
            println!("tts: {tts:?} (model {}, voice {})", agent.tts_model, agent.tts_voice_id);
            if let Some(greeting) = agent.initial_greeting() {
                println!("greeting: {greeting}");
            }
            None
        }
    };

    println!("temperature: {}", agent.effective_temperature());
    println!();
    println!(
        "{}",
        build_instructions(
            &agent.system_prompt,
            greeting,
            &agent.language,
            agent.timezone_or(&config.default_timezone),
        )
    );
    Ok(())
}

fn tools(agent: &AgentConfiguration, config: &OrchestratorConfig) -> anyhow::Result<()> {
    let enabled = &agent.enabled_tools;

    // CRM tools need only a contact store; integration tools need credentials
    let offline = ToolRouter::for_session(
        enabled,
        config.tool_timeout,
        &TenantId::new("cli"),
        &Integrations::new(),
        Some(Arc::new(InMemoryContactStore::new())),
    );
    let sheets = ToolRouter::new(enabled, config.tool_timeout)
        .with_backend(Arc::new(GoogleSheetsTools::new("", None)));
    let docs = ToolRouter::new(enabled, config.tool_timeout)
        .with_backend(Arc::new(GoogleDocsTools::new("", None)));

    let definitions = offline.get_all_tool_definitions(enabled);
    println!("{}", serde_json::to_string_pretty(&definitions)?);

    for name in enabled {
        if offline.has_tool(name) {
            continue;
        }
        if sheets.has_tool(name) {
            println!("{name}: requires the {GOOGLE_SHEETS} integration");
        } else if docs.has_tool(name) {
            println!("{name}: requires the {GOOGLE_DOCS} integration");
        } else {
            println!("{name}: unknown tool");
        }
    }
    Ok(())
}
