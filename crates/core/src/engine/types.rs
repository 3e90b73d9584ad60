//! Scheduler output.

use serde::{Deserialize, Serialize};

use super::config::GRID_SIZE;
use crate::bot::BotError;

/// One image produced for a prompt.
///
/// `image_index` numbering per prompt: 0..=3 for the base grid (or base
/// upscales), then `4 + i*4 + j` for upscale `j` of the variation of quadrant
/// `i`. A preview emission at index `k` covers `k..k+4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub url: String,
    pub prompt: String,
    /// Whole grid rather than a single upscaled image.
    pub preview: bool,
    pub prompt_index: usize,
    pub image_index: usize,
    /// Terminal emission of this prompt's generation tree.
    pub is_last: bool,
}

impl GeneratedImage {
    /// Number of image slots this emission fills.
    pub fn slots(&self) -> usize {
        if self.preview {
            GRID_SIZE
        } else {
            1
        }
    }
}

/// Item of the scheduler's merged output stream.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Image(GeneratedImage),
    /// A fatal error stopped every lane.
    Aborted(BotError),
}

/// Image slots a run of `prompt_count` prompts fills when everything succeeds.
pub fn total_images(prompt_count: usize, variation: bool) -> usize {
    let base = prompt_count * GRID_SIZE;
    if variation {
        base * (1 + GRID_SIZE)
    } else {
        base
    }
}
