use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Discord session and endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    /// User token used for REST and gateway authentication
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Base64 encoded `X-Super-Properties` header (optional)
    #[serde(default)]
    pub super_properties: Option<String>,
    /// `"<guild_id>/<channel_id>"` or `"<channel_id>"`. Empty means the bot DM channel.
    #[serde(default)]
    pub channel: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Minimum pause between two REST calls (milliseconds)
    #[serde(default = "default_min_request_interval")]
    pub min_request_interval_ms: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            user_agent: default_user_agent(),
            locale: default_locale(),
            super_properties: None,
            channel: String::new(),
            api_url: default_api_url(),
            gateway_url: default_gateway_url(),
            min_request_interval_ms: default_min_request_interval(),
        }
    }
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_api_url() -> String {
    "https://discord.com/api/v9".to_string()
}

fn default_gateway_url() -> String {
    "wss://gateway.discord.gg/?v=9&encoding=json".to_string()
}

fn default_min_request_interval() -> u64 {
    2000
}

/// Supported generation bots
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BotKind {
    #[default]
    Midjourney,
    Bluewillow,
}

impl BotKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BotKind::Midjourney => "midjourney",
            BotKind::Bluewillow => "bluewillow",
        }
    }
}

/// What to generate and how aggressively
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    #[serde(default)]
    pub bot: BotKind,
    /// Literal prompts or paths to files containing one prompt per line
    #[serde(default)]
    pub prompts: Vec<String>,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub suffix: String,
    #[serde(default)]
    pub variation: bool,
    #[serde(default)]
    pub upscale: bool,
    /// Parallel lanes (0 = the bot's maximum)
    #[serde(default)]
    pub concurrency: usize,
    /// Pause between two prompts of the same lane (milliseconds)
    #[serde(default = "default_wait")]
    pub wait_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub banned_words: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            bot: BotKind::default(),
            prompts: Vec::new(),
            prefix: String::new(),
            suffix: String::new(),
            variation: false,
            upscale: false,
            concurrency: 0,
            wait_ms: default_wait(),
            max_attempts: default_max_attempts(),
            banned_words: Vec::new(),
        }
    }
}

fn default_wait() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    5
}

/// Album output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    /// Album (job) identifier. Empty means a new timestamped album.
    #[serde(default)]
    pub album: String,
    #[serde(default)]
    pub download: bool,
    #[serde(default)]
    pub thumbnail: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            album: String::new(),
            download: false,
            thumbnail: false,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

/// Job persistence backend
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Fs,
    Sqlite,
}

/// Job store configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite database file (used when backend = "sqlite")
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("gridforge.db")
}

/// Gallery server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8080
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub discord: SanitizedDiscordConfig,
    pub generation: SanitizedGenerationConfig,
    pub output: OutputConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
}

/// Discord config with the token hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedDiscordConfig {
    pub token_configured: bool,
    pub channel: String,
    pub locale: String,
    pub api_url: String,
}

/// Generation config without the prompt list
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGenerationConfig {
    pub bot: String,
    pub prompt_sources: usize,
    pub variation: bool,
    pub upscale: bool,
    pub concurrency: usize,
    pub wait_ms: u64,
    pub max_attempts: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            discord: SanitizedDiscordConfig {
                token_configured: !config.discord.token.is_empty(),
                channel: config.discord.channel.clone(),
                locale: config.discord.locale.clone(),
                api_url: config.discord.api_url.clone(),
            },
            generation: SanitizedGenerationConfig {
                bot: config.generation.bot.as_str().to_string(),
                prompt_sources: config.generation.prompts.len(),
                variation: config.generation.variation,
                upscale: config.generation.upscale,
                concurrency: config.generation.concurrency,
                wait_ms: config.generation.wait_ms,
                max_attempts: config.generation.max_attempts,
            },
            output: config.output.clone(),
            store: config.store.clone(),
            server: config.server.clone(),
        }
    }
}
