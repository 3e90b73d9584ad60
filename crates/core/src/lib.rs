pub mod bot;
pub mod config;
pub mod correlator;
pub mod engine;
pub mod imaging;
pub mod job;
pub mod metrics;
pub mod testing;
pub mod transport;

pub use bot::{
    create_bot_client, BannedWordValidator, BotClient, BotError, ChatBotAdapter, ErrorKind,
    Preview, PromptValidator,
};
pub use config::{
    load_config, load_config_from_str, validate_config, validate_for_generation, BotKind, Config,
    ConfigError, SanitizedConfig,
};
pub use correlator::{Correlator, SearchKey};
pub use engine::{BulkScheduler, EngineConfig, EngineEvent, GeneratedImage};
pub use job::{
    create_job_store, Job, JobConfig, JobError, JobOutcome, JobRunner, JobStatus, JobStore,
    JobSummary, Progress,
};
pub use transport::{DiscordTransport, Transport, TransportError};
