use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::metadata::ImageMetadata;
use crate::provider::Usage;
use crate::template::TemplateSource;

/// Every option that affects one conversion.
///
/// `model`, `prompt`, `note` and the template name are part of the cache
/// key together with the provider name.
#[derive(Debug, Clone, Default)]
pub struct ProcessOptions {
    /// Model id. `None` (or empty) uses the provider default.
    pub model: Option<String>,
    /// Replaces the default user instructions.
    pub prompt: Option<String>,
    /// Focus note appended to the prompt and exposed as `{{note}}`.
    pub note: Option<String>,
    /// Template used to render the markdown.
    pub template: TemplateSource,
    /// Neither read nor write the cache.
    pub no_cache: bool,
    /// Where batch runs write `<basename>.md`. `None` writes next to the
    /// source file (URLs: the current directory).
    pub output_dir: Option<PathBuf>,
}

impl ProcessOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_template(mut self, template: TemplateSource) -> Self {
        self.template = template;
        self
    }

    pub fn no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// The model to request, with empty strings treated as unset.
    pub fn requested_model(&self) -> Option<&str> {
        self.model.as_deref().filter(|m| !m.is_empty())
    }
}

/// Result of converting one image.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub markdown: String,
    pub metadata: ImageMetadata,
    /// Served from the cache without calling the provider.
    pub cached: bool,
    pub model: String,
    pub provider: String,
    pub usage: Option<Usage>,
    /// Advisory validation messages. Always empty for cache hits.
    pub warnings: Vec<String>,
}

/// Where a work item comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemSource {
    File(PathBuf),
    Url(String),
}

impl std::fmt::Display for ItemSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemSource::File(path) => write!(f, "{}", path.display()),
            ItemSource::Url(url) => f.write_str(url),
        }
    }
}

/// One unit of batch work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub source: ItemSource,
    /// Too large for the primary provider; send to the fallback.
    pub via_fallback: bool,
}

impl WorkItem {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            source: ItemSource::File(path.into()),
            via_fallback: false,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            source: ItemSource::Url(url.into()),
            via_fallback: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Completed,
    Failed,
}

/// Outcome of one batch item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemOutcome {
    pub source: ItemSource,
    pub status: ItemStatus,
    /// Markdown file written for a completed item.
    pub output: Option<PathBuf>,
    pub error: Option<String>,
    /// The provider declined to describe the image.
    pub refused: bool,
    pub cached: bool,
    pub via_fallback: bool,
    pub provider: Option<String>,
    pub warnings: Vec<String>,
    pub duration_ms: u64,
}

/// A file excluded before processing because no provider can take it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedItem {
    pub path: PathBuf,
    pub bytes: u64,
    pub reason: String,
}

/// Summary of a batch run, outcomes in discovery order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cached: usize,
    pub via_fallback: usize,
    pub total_duration_ms: u64,
    pub outcomes: Vec<ItemOutcome>,
    pub skipped_items: Vec<SkippedItem>,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: Vec<ItemOutcome>, skipped_items: Vec<SkippedItem>) -> Self {
        let succeeded = outcomes
            .iter()
            .filter(|o| o.status == ItemStatus::Completed)
            .count();
        let failed = outcomes
            .iter()
            .filter(|o| o.status == ItemStatus::Failed)
            .count();

        Self {
            total: outcomes.len() + skipped_items.len(),
            succeeded,
            failed,
            skipped: skipped_items.len(),
            cached: outcomes.iter().filter(|o| o.cached).count(),
            via_fallback: outcomes.iter().filter(|o| o.via_fallback).count(),
            total_duration_ms: outcomes.iter().map(|o| o.duration_ms).sum(),
            outcomes,
            skipped_items,
        }
    }

    /// The whole-run failure signal. Skipped files do not count.
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}
