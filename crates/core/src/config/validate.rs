use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Output directory is set
/// - Server port is not 0
/// - At least one attempt per bot operation
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.output.dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "output.dir cannot be empty".to_string(),
        ));
    }

    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    if config.generation.max_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "generation.max_attempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}

/// Validate the parts of the configuration a generation run depends on.
pub fn validate_for_generation(config: &Config) -> Result<(), ConfigError> {
    validate_config(config)?;

    if config.discord.token.is_empty() {
        return Err(ConfigError::ValidationError(
            "discord.token is required".to_string(),
        ));
    }

    if config.discord.user_agent.is_empty() {
        return Err(ConfigError::ValidationError(
            "discord.user_agent cannot be empty".to_string(),
        ));
    }

    if config.discord.channel.split('/').count() > 2 {
        return Err(ConfigError::ValidationError(format!(
            "discord.channel must be \"<guild>/<channel>\" or \"<channel>\", got {:?}",
            config.discord.channel
        )));
    }

    Ok(())
}
