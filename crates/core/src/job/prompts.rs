//! Prompt list building.

use std::path::Path;

use tracing::debug;

use super::types::JobError;

/// Expand prompt sources into the sorted prompt list of a new job.
///
/// A source naming an existing file contributes its non-blank lines
/// (trimmed); any other source is a literal prompt. `prefix` and `suffix`
/// are applied to every prompt.
pub fn build_prompts(sources: &[String], prefix: &str, suffix: &str) -> Result<Vec<String>, JobError> {
    let mut prompts = Vec::new();
    for source in sources {
        let path = Path::new(source);
        if !path.is_file() {
            prompts.push(source.clone());
            continue;
        }
        let content = std::fs::read_to_string(path).map_err(|source| JobError::PromptFile {
            path: path.to_path_buf(),
            source,
        })?;
        let before = prompts.len();
        prompts.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string),
        );
        debug!(file = %path.display(), prompts = prompts.len() - before, "Read prompt file");
    }

    let mut prompts: Vec<String> = prompts
        .into_iter()
        .map(|prompt| format!("{}{}{}", prefix, prompt, suffix))
        .collect();
    prompts.sort();
    Ok(prompts)
}
