use crate::llm::{LlmSettings, Provider};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default text of the feedback prompt shown when a run suspends.
pub const DEFAULT_FEEDBACK_MESSAGE: &str =
    "How do these recommendations look? Let me know if you'd like something different.";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Workflow engine (`scripted` or `chat`)
    #[arg(long, env = "WORKFLOW_ENGINE")]
    pub engine: Option<String>,

    /// Seconds a suspended run waits for feedback
    #[arg(long, env = "FEEDBACK_TTL_SECS")]
    pub feedback_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub runs: RunsConfig,
    pub registry: RegistryConfig,
    pub workflow: WorkflowConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    /// Time allowed to produce response headers. Streams are not cut.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RunsConfig {
    /// Capacity of the queue between the engine worker and the run task.
    pub queue_capacity: usize,
    /// Capacity of the queue between the run task and the HTTP response.
    pub outbound_capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RegistryConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Scripted,
    Chat,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    pub engine: EngineKind,
    pub feedback_message: String,
    pub feedback_options: Vec<String>,
    /// Pause between scripted steps, so progress is visible in a browser.
    pub step_delay_ms: u64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 8000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 30)?
            .set_default("runs.queue_capacity", 64)?
            .set_default("runs.outbound_capacity", 64)?
            .set_default("registry.ttl_secs", 1800)?
            .set_default("registry.sweep_interval_secs", 60)?
            .set_default("workflow.engine", "scripted")?
            .set_default("workflow.feedback_message", DEFAULT_FEEDBACK_MESSAGE)?
            .set_default(
                "workflow.feedback_options",
                vec![
                    "Thanks for the recommendations! These look perfect.",
                    "More budget-friendly options",
                    "Show me more upscale choices",
                ],
            )?
            .set_default("workflow.step_delay_ms", 0)?;

        // Explicit file wins over ./config.yaml.
        match &cli.config {
            Some(path) => builder = builder.add_source(File::with_name(path)),
            None if Path::new("config.yaml").exists() => {
                builder = builder.add_source(File::with_name("config.yaml"));
            }
            None => {}
        }

        // CREW_SERVER__PORT=9000, CREW_WORKFLOW__ENGINE=chat, ...
        builder = builder.add_source(
            Environment::with_prefix("CREW")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("workflow.feedback_options")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(engine) = cli.engine {
            builder = builder.set_override("workflow.engine", engine.to_lowercase())?;
        }
        if let Some(ttl) = cli.feedback_ttl_secs {
            builder = builder.set_override("registry.ttl_secs", ttl)?;
        }

        let cfg = builder.build()?;
        let app: Self = cfg.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.runs.queue_capacity == 0 || self.runs.outbound_capacity == 0 {
            return Err(config::ConfigError::Message(
                "runs.queue_capacity and runs.outbound_capacity must be positive".into(),
            ));
        }
        if self.registry.sweep_interval_secs == 0 {
            return Err(config::ConfigError::Message(
                "registry.sweep_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "Missing required env var: LLM_BASE_URL".to_string())?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL")
        .map_err(|_| "Missing required env var: LLM_MODEL".to_string())?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let mut provider = Provider::detect_from_url(&base_url);
    if let Provider::AzureOpenAI { .. } = provider {
        let deployment_name =
            std::env::var("AZURE_DEPLOYMENT_NAME").unwrap_or_else(|_| model.clone());
        let api_version = std::env::var("AZURE_API_VERSION")
            .unwrap_or_else(|_| "2024-08-01-preview".to_string());
        provider = Provider::AzureOpenAI {
            deployment_name,
            api_version,
        };
    }

    let temperature = std::env::var("LLM_TEMPERATURE")
        .ok()
        .and_then(|s| s.parse().ok());

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        provider,
        temperature,
    })
}
