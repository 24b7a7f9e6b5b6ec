use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_CHAT_MODEL: &str = "gpt-5-mini";
const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-1";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Aura router.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the OpenAI-compatible API used for chat, vision, and transcription.
    pub llm_base_url: String,
    /// Optional bearer token sent to the language model provider.
    pub llm_api_key: Option<String>,
    /// Model used to classify incoming requests.
    pub classifier_model: String,
    /// Model used to fuse several partial answers.
    pub synthesis_model: String,
    /// Model used by the text agent to answer over retrieved context.
    pub agent_model: String,
    /// Vision-capable model used by the image agent.
    pub vision_model: String,
    /// Speech-to-text model used by the audio agent.
    pub transcription_model: String,
    /// Per-request timeout applied by the HTTP clients, in seconds.
    pub llm_request_timeout_secs: u64,
    /// Base URL of the Qdrant instance holding document chunks.
    pub qdrant_url: String,
    /// Name of the Qdrant collection searched by the text agent.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Embedding provider used to vectorize queries.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the stored vectors.
    pub embedding_dimension: usize,
    /// Optional Ollama base URL for the Ollama embedding provider.
    pub ollama_url: Option<String>,
    /// Number of chunks retrieved for each text query.
    pub retrieval_top_k: usize,
    /// Minimum similarity score accepted from Qdrant.
    pub retrieval_score_threshold: Option<f32>,
    /// Query length (in characters) above which an image request counts as multi-modal.
    /// Has no routing effect under the current override order; see `RoutingPolicy`.
    pub multi_modal_query_threshold: usize,
    /// Run multi-modal sub-agents concurrently instead of one after another.
    pub concurrent_fanout: bool,
    /// Upper bound for every outbound workflow step, in seconds.
    pub step_timeout_secs: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends for query vectorization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible embeddings API.
    OpenAI,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            llm_base_url: load_env_or("LLM_BASE_URL", DEFAULT_LLM_BASE_URL),
            llm_api_key: load_env_optional("LLM_API_KEY"),
            classifier_model: load_env_or("CLASSIFIER_MODEL", DEFAULT_CHAT_MODEL),
            synthesis_model: load_env_or("SYNTHESIS_MODEL", DEFAULT_CHAT_MODEL),
            agent_model: load_env_or("AGENT_MODEL", DEFAULT_CHAT_MODEL),
            vision_model: load_env_or("VISION_MODEL", DEFAULT_CHAT_MODEL),
            transcription_model: load_env_or("TRANSCRIPTION_MODEL", DEFAULT_TRANSCRIPTION_MODEL),
            llm_request_timeout_secs: parse_optional("LLM_REQUEST_TIMEOUT_SECS")?.unwrap_or(60),
            qdrant_url: load_env("QDRANT_URL")?,
            qdrant_collection_name: load_env("QDRANT_COLLECTION_NAME")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?
                .parse()
                .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string()))?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .map_err(|_| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            retrieval_top_k: parse_optional("RETRIEVAL_TOP_K")?.unwrap_or(5),
            retrieval_score_threshold: parse_optional("RETRIEVAL_SCORE_THRESHOLD")?,
            multi_modal_query_threshold: parse_optional("ROUTER_MULTI_MODAL_THRESHOLD")?
                .unwrap_or(20),
            concurrent_fanout: load_env_optional("ROUTER_CONCURRENT_FANOUT")
                .map(|value| {
                    parse_bool(&value).ok_or_else(|| {
                        ConfigError::InvalidValue("ROUTER_CONCURRENT_FANOUT".to_string())
                    })
                })
                .transpose()?
                .unwrap_or(false),
            step_timeout_secs: parse_optional("ROUTER_STEP_TIMEOUT_SECS")?.unwrap_or(120),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or(key: &str, default: &str) -> String {
    load_env_optional(key).unwrap_or_else(|| default.to_string())
}

fn parse_optional<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        llm_base_url = %config.llm_base_url,
        classifier_model = %config.classifier_model,
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        embedding_provider = ?config.embedding_provider,
        concurrent_fanout = config.concurrent_fanout,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}
