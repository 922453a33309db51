use clap::Parser;
use config::{Config, Environment, File, FileFormat, Value};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Default generation prompt. `$search_results$` is mandatory for the
/// knowledge base to inject retrieved passages.
pub const DEFAULT_GENERATION_PROMPT: &str = "You are a question answering agent. \
I will provide you with a set of search results. The user will provide you with a question. \
Your job is to answer the user's question using only information from the search results. \
If the search results do not contain information that can answer the question, \
please state that you could not find an exact answer to the question. \
The current time is {current_time}.\n\n\
Here are the search results in numbered order:\n$search_results$\n\n$output_format_instructions$";

/// Default orchestration prompt. `$conversation_history$` and
/// `$output_format_instructions$` are mandatory.
pub const DEFAULT_ORCHESTRATION_PROMPT: &str = "You are a query creation agent. \
You will be provided with a function and a description of what it searches over. \
The user will provide you a question, and your job is to determine the optimal query \
to use based on the user's question. The current time is {current_time}.\n\n\
Here is the conversation history:\n$conversation_history$\n\n$output_format_instructions$";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path (YAML)
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Enable rate limiting
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// AWS region of the knowledge base
    #[arg(long, env = "AWS_REGION")]
    pub aws_region: Option<String>,

    /// Knowledge base identifier
    #[arg(long, env = "KB_ID")]
    pub kb_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub resilience: ResilienceConfig,
    pub bedrock: ChatConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub request_timeout_secs: u64,
    /// Idle conversations older than this are dropped by the sweeper.
    pub conversation_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub rate_limit_enabled: bool,
    pub requests_per_second: u32,
    pub burst_size: u32,
}

/// Everything a chat turn needs to call the knowledge base.
///
/// Built once at startup and shared read-only.
#[derive(Debug, Deserialize, Clone)]
pub struct ChatConfig {
    pub aws_region: String,
    pub account_id: String,
    pub kb_id: String,
    pub inference_model_id: String,
    pub rerank_model_id: String,
    /// `HYBRID` or `SEMANTIC`.
    pub search_type: String,
    pub n_source_chunks: u32,
    pub n_re_ranked_docs: u32,
    /// `QUERY_DECOMPOSITION` is the only mode the API accepts today.
    pub query_split_type: String,
    pub enable_guardrails: bool,
    #[serde(default)]
    pub guardrail_id: Option<String>,
    #[serde(default)]
    pub guardrail_version: Option<String>,
    pub stream_timeout_secs: u64,
    /// Override for the runtime endpoint (tests, VPC endpoints).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    pub generation_config: StageConfig,
    pub orchestration_config: StageConfig,
}

/// Prompt and inference settings for one model stage.
#[derive(Debug, Deserialize, Clone)]
pub struct StageConfig {
    pub prompt: String,
    pub model_config: ModelConfig,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct ModelConfig {
    pub max_tokens: u32,
    pub temp: f32,
    pub top_p: f32,
}

impl ChatConfig {
    /// ARN of the inference profile used for generation.
    pub fn generation_model_arn(&self) -> String {
        format!(
            "arn:aws:bedrock:{}:{}:inference-profile/{}",
            self.aws_region, self.account_id, self.inference_model_id
        )
    }

    /// ARN of the reranking foundation model.
    pub fn rerank_model_arn(&self) -> String {
        format!(
            "arn:aws:bedrock:{}::foundation-model/{}",
            self.aws_region, self.rerank_model_id
        )
    }

    /// Base URL of the agent runtime endpoint.
    pub fn endpoint(&self) -> String {
        self.endpoint_url.clone().unwrap_or_else(|| {
            format!("https://bedrock-agent-runtime.{}.amazonaws.com", self.aws_region)
        })
    }

    pub fn stream_deadline(&self) -> Duration {
        Duration::from_secs(self.stream_timeout_secs)
    }

    /// Reject settings that would only fail later at the API.
    pub fn validate(&self) -> Result<(), String> {
        for (key, value) in [
            ("bedrock.aws_region", &self.aws_region),
            ("bedrock.account_id", &self.account_id),
            ("bedrock.kb_id", &self.kb_id),
            ("bedrock.inference_model_id", &self.inference_model_id),
            ("bedrock.rerank_model_id", &self.rerank_model_id),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{key} must be set"));
            }
        }

        if self.enable_guardrails && (self.guardrail_id.is_none() || self.guardrail_version.is_none())
        {
            return Err(
                "bedrock.guardrail_id and bedrock.guardrail_version are required when guardrails are enabled"
                    .to_string(),
            );
        }

        Ok(())
    }
}

/// Top-level table used by older config files for the knowledge base settings.
const LEGACY_BEDROCK_TABLE: &str = "bedrock_configuration";

/// Settings from a legacy `bedrock_configuration` table, as `bedrock.*` keys.
///
/// They rank just below the file's own `bedrock` table and above the
/// built-in defaults. `bedrock_query_split_type` maps to `query_split_type`.
fn legacy_bedrock_settings<S>(file: S) -> Result<Vec<(String, Value)>, config::ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let Ok(table) = Config::builder()
        .add_source(file)
        .build()?
        .get_table(LEGACY_BEDROCK_TABLE)
    else {
        return Ok(Vec::new());
    };

    let mut settings = Vec::new();
    for (key, value) in table {
        let key = match key.as_str() {
            "bedrock_query_split_type" => "query_split_type".to_string(),
            _ => key,
        };
        flatten_into(format!("bedrock.{key}"), value, &mut settings);
    }
    Ok(settings)
}

/// Leaf values of a nested table keyed by dotted path.
fn flatten_into(path: String, value: Value, out: &mut Vec<(String, Value)>) {
    match value.clone().into_table() {
        Ok(table) => {
            for (key, child) in table {
                flatten_into(format!("{path}.{key}"), child, out);
            }
        }
        Err(_) => out.push((path, value)),
    }
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

        let mut builder = Config::builder();

        // 1. Defaults
        builder = builder
            .set_default("server.port", 8501)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.request_timeout_secs", 180)?
            .set_default("server.conversation_ttl_secs", 3600)?
            .set_default("resilience.rate_limit_enabled", true)?
            .set_default("resilience.requests_per_second", 5)?
            .set_default("resilience.burst_size", 10)?
            .set_default("bedrock.aws_region", "us-east-1")?
            .set_default("bedrock.account_id", "")?
            .set_default("bedrock.kb_id", "")?
            .set_default("bedrock.inference_model_id", "")?
            .set_default("bedrock.rerank_model_id", "")?
            .set_default("bedrock.search_type", "HYBRID")?
            .set_default("bedrock.n_source_chunks", 20)?
            .set_default("bedrock.n_re_ranked_docs", 5)?
            .set_default("bedrock.query_split_type", "QUERY_DECOMPOSITION")?
            .set_default("bedrock.enable_guardrails", false)?
            .set_default("bedrock.stream_timeout_secs", 120)?
            .set_default("bedrock.generation_config.prompt", DEFAULT_GENERATION_PROMPT)?
            .set_default("bedrock.generation_config.model_config.max_tokens", 2048)?
            .set_default("bedrock.generation_config.model_config.temp", 0.0)?
            .set_default("bedrock.generation_config.model_config.top_p", 0.9)?
            .set_default(
                "bedrock.orchestration_config.prompt",
                DEFAULT_ORCHESTRATION_PROMPT,
            )?
            .set_default("bedrock.orchestration_config.model_config.max_tokens", 2048)?
            .set_default("bedrock.orchestration_config.model_config.temp", 0.0)?
            .set_default("bedrock.orchestration_config.model_config.top_p", 0.9)?;

        // 2. Config file: explicit path, else ./config.yaml when present
        let file = match &cli.config {
            Some(path) => File::new(path, FileFormat::Yaml),
            None => File::new("config.yaml", FileFormat::Yaml).required(false),
        };
        for (key, value) in legacy_bedrock_settings(file.clone())? {
            builder = builder.set_default(key, value)?;
        }
        builder = builder.add_source(file);

        // 3. Environment variables (prefixed with KBCHAT_), e.g. KBCHAT_BEDROCK__KB_ID=abc
        builder = builder.add_source(
            Environment::with_prefix("KBCHAT")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        if let Ok(val) = env::var("AWS_ACCOUNT_ID") {
            builder = builder.set_override("bedrock.account_id", val)?;
        }

        // 4. CLI flags (and the plain env vars clap maps onto them) win
        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(rl) = cli.rate_limit_enabled {
            builder = builder.set_override("resilience.rate_limit_enabled", rl)?;
        }
        if let Some(region) = cli.aws_region {
            builder = builder.set_override("bedrock.aws_region", region)?;
        }
        if let Some(kb_id) = cli.kb_id {
            builder = builder.set_override("bedrock.kb_id", kb_id)?;
        }

        let cfg: AppConfig = builder.build()?.try_deserialize()?;
        cfg.bedrock
            .validate()
            .map_err(config::ConfigError::Message)?;
        Ok(cfg)
    }
}
