//! # Vision Markdown
//!
//! Turn images into structured, template-rendered markdown using hosted or
//! local vision models.
//!
//! Each image is hashed, looked up in a content-addressable cache and, on a
//! miss, sent to a [`Provider`]. The model's free-text answer is parsed into
//! named fields, checked against a [`Taxonomy`], rendered through a small
//! template language and stored for next time.
//!
//! ## Features
//!
//! - **Content-addressable cache**: same image and options, no second call
//! - **Rich and legacy answers**: labelled sections or free text
//! - **Taxonomy validation**: strict types and categories, open styles
//! - **Templates**: `{{var}}` and `{{#if var}}...{{/if}}`, four built-ins
//! - **Batch runs**: bounded concurrency with size-based provider fallback
//! - **Providers**: Anthropic, OpenAI-compatible and Ollama
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use vision_markdown::{provider_from_name, Cache, Pipeline, ProcessOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = provider_from_name("anthropic", reqwest::Client::new())?;
//!     let pipeline = Pipeline::new(provider).with_cache(Cache::open_default());
//!
//!     let outcome = pipeline
//!         .process_file(Path::new("photo.png"), &ProcessOptions::new())
//!         .await?;
//!
//!     println!("{}", outcome.markdown);
//!     Ok(())
//! }
//! ```

pub mod anthropic;
pub mod batch;
pub mod cache;
pub mod config;
pub mod error;
pub mod metadata;
pub mod ollama;
pub mod openai;
pub mod parser;
pub mod pipeline;
pub mod prompt;
pub mod provider;
pub mod taxonomy;
pub mod template;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use batch::{assign_outputs, discover, plan_routes, BatchPlan, BatchRunner};
pub use cache::{build_key, Cache, CacheEntry, CacheKey, CacheMiss, CacheStats, KeyOptions};
pub use config::{Config, ConfigSlot};
pub use error::{Error, Result};
pub use metadata::ImageMetadata;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use parser::{parse_response, Field, ModelAnswer, ParsedResponse, ResponseFormat};
pub use pipeline::{is_refusal, Pipeline};
pub use provider::{
    provider_from_name, AnalyzeOptions, ImageInput, Provider, ProviderError, ProviderResponse,
    Usage,
};
pub use taxonomy::{validate, Taxonomy, TaxonomyOverrides, Validation};
pub use template::{render, TemplateContext, TemplateSource};
pub use types::{
    BatchSummary, ItemOutcome, ItemSource, ItemStatus, ProcessOptions, ProcessOutcome,
    SkippedItem, WorkItem,
};
