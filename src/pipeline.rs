//! Single-image conversion.
//!
//! format check → read + metadata → cache lookup → prompts → provider →
//! refusal check → parse → validate → render → cache store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use regex::RegexSet;
use tracing::{debug, info, warn};

use crate::cache::{build_key, Cache, CacheEntry, CacheKey, CacheMiss, KeyOptions};
use crate::error::{Error, Result};
use crate::metadata::{ensure_supported, read_image, ImageMetadata};
use crate::parser::{is_rich, parse_response, ParsedResponse};
use crate::prompt;
use crate::provider::{AnalyzeOptions, ImageInput, Provider, ProviderResponse};
use crate::taxonomy::{validate, Taxonomy};
use crate::template::{render, TemplateContext};
use crate::types::{ProcessOptions, ProcessOutcome};

/// Answers longer than this are never treated as refusals.
pub const REFUSAL_MAX_CHARS: usize = 400;

/// Apology/decline phrasings. Tunable; a heuristic, not a contract.
pub const REFUSAL_PATTERNS: &[&str] = &[
    r"(?i)^\s*(i'm|i am|i’m) sorry",
    r"(?i)^\s*sorry,?\s+(but\s+)?i\b",
    r"(?i)^\s*i apologi[sz]e",
    r"(?i)\bi\s+(can't|cannot|can’t|am unable to|'m unable to|’m unable to|am not able to|won't|will not)\s+(help|assist|describe|analy[sz]e|process|identify|provide|comply)",
    r"(?i)\bunable to (view|see|process|analy[sz]e|access) (the|this|that) image",
];

fn refusal_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| RegexSet::new(REFUSAL_PATTERNS).expect("valid refusal patterns"))
}

/// Short text that reads like a decline to answer. Structured answers are
/// never refusals.
pub fn is_refusal(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > REFUSAL_MAX_CHARS || is_rich(text) {
        return false;
    }
    refusal_patterns().is_match(text)
}

/// Converts images to markdown with one provider.
#[derive(Clone)]
pub struct Pipeline {
    provider: Arc<dyn Provider>,
    cache: Option<Cache>,
    taxonomy: Taxonomy,
    system_prompt: String,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("provider", &self.provider.name())
            .field("cache", &self.cache.as_ref().map(Cache::location))
            .field("types", &self.taxonomy.types.len())
            .finish()
    }
}

impl Pipeline {
    /// Pipeline without a cache and with the default taxonomy.
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        let taxonomy = Taxonomy::default();
        Self {
            provider,
            cache: None,
            system_prompt: prompt::system_prompt(&taxonomy),
            taxonomy,
        }
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.system_prompt = prompt::system_prompt(&taxonomy);
        self.taxonomy = taxonomy;
        self
    }

    /// Same cache and taxonomy, different provider.
    pub fn with_provider(&self, provider: Arc<dyn Provider>) -> Self {
        Self {
            provider,
            ..self.clone()
        }
    }

    pub fn provider(&self) -> &dyn Provider {
        self.provider.as_ref()
    }

    pub fn cache(&self) -> Option<&Cache> {
        self.cache.as_ref()
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    /// Convert an image file.
    pub async fn process_file(&self, path: &Path, options: &ProcessOptions) -> Result<ProcessOutcome> {
        ensure_supported(path)?;
        let (bytes, metadata) = read_image(path).await?;
        self.process_loaded(bytes, metadata, options).await
    }

    /// Convert an image already in memory. `filename` supplies the
    /// extension checked against the allow-list.
    pub async fn process_bytes(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        options: &ProcessOptions,
    ) -> Result<ProcessOutcome> {
        ensure_supported(Path::new(filename))?;
        let metadata = ImageMetadata::from_bytes(&bytes, filename);
        self.process_loaded(bytes, metadata, options).await
    }

    /// Cache key for `metadata` under `options` with this provider.
    pub fn cache_key(&self, metadata: &ImageMetadata, options: &ProcessOptions) -> CacheKey {
        build_key(
            &metadata.hash,
            &KeyOptions {
                model: options.model.as_deref(),
                prompt: options.prompt.as_deref(),
                template: Some(&options.template.name),
                note: options.note.as_deref(),
                provider: Some(self.provider.name()),
            },
        )
    }

    async fn process_loaded(
        &self,
        bytes: Vec<u8>,
        metadata: ImageMetadata,
        options: &ProcessOptions,
    ) -> Result<ProcessOutcome> {
        let key = self.cache_key(&metadata, options);
        let cache = self.cache.as_ref().filter(|_| !options.no_cache);

        if let Some(cache) = cache {
            match cache.get(&key).await {
                Ok(entry) => {
                    debug!("Cache hit for {} ({})", metadata.filename, key);
                    return Ok(self.outcome_from_cache(entry, metadata));
                }
                Err(CacheMiss::Missing) => debug!("Cache miss for {}", metadata.filename),
                Err(CacheMiss::Corrupt(reason)) => {
                    debug!("Discarding corrupt cache record for {}: {}", metadata.filename, reason)
                }
            }
        }

        info!(
            "Analyzing {} ({}, {}) with {}",
            metadata.filename,
            metadata.format,
            metadata.size,
            self.provider.name()
        );

        let request = AnalyzeOptions {
            model: options.requested_model().map(str::to_string),
            system_prompt: self.system_prompt.clone(),
            user_prompt: prompt::user_prompt(options.prompt.as_deref(), options.note.as_deref()),
        };
        let image = ImageInput::new(bytes, metadata.mime_type.clone(), metadata.filename.clone());
        let response = self.provider.analyze(&image, &request).await?;

        if is_refusal(&response.text) {
            return Err(Error::Refusal {
                filename: metadata.filename.clone(),
                message: response.text,
            });
        }

        let mut parsed = parse_response(&response.text);
        let validation = validate(&parsed, &self.taxonomy);
        parsed.apply(&validation.corrections);
        for warning in &validation.warnings {
            warn!("{}: {}", metadata.filename, warning);
        }

        let model = response
            .model
            .clone()
            .or_else(|| options.requested_model().map(str::to_string))
            .unwrap_or_else(|| self.provider.default_model().to_string());
        let now = Utc::now();

        let context = template_context(
            &metadata,
            &parsed,
            &model,
            self.provider.name(),
            options.note.as_deref(),
            now,
        );
        let markdown = render(&options.template.source, &context);

        if let Some(cache) = cache {
            let entry = CacheEntry {
                hash: metadata.hash.clone(),
                kind: parsed.kind,
                category: parsed.category,
                style: parsed.style,
                mood: parsed.mood,
                medium: parsed.medium,
                composition: parsed.composition,
                palette: parsed.palette,
                subject: parsed.subject,
                markdown: markdown.clone(),
                description: parsed.description,
                extracted_text: parsed.extracted_text,
                colors: parsed.colors,
                tags: parsed.tags,
                model: model.clone(),
                provider: self.provider.name().to_string(),
                created_at: now.to_rfc3339(),
            };
            cache.set(&key, &entry).await?;
        }

        Ok(ProcessOutcome {
            markdown,
            metadata,
            cached: false,
            model,
            provider: self.provider.name().to_string(),
            usage: response.usage,
            warnings: validation.warnings,
        })
    }

    fn outcome_from_cache(&self, entry: CacheEntry, metadata: ImageMetadata) -> ProcessOutcome {
        let provider = if entry.provider.is_empty() {
            self.provider.name().to_string()
        } else {
            entry.provider
        };
        ProcessOutcome {
            markdown: entry.markdown,
            metadata,
            cached: true,
            model: entry.model,
            provider,
            usage: None,
            warnings: Vec::new(),
        }
    }

    /// Send several images in one request and return the model's answer.
    /// Comparisons are neither parsed nor cached.
    pub async fn compare(&self, paths: &[PathBuf], options: &ProcessOptions) -> Result<ProviderResponse> {
        if paths.len() < 2 {
            return Err(Error::Config(
                "comparison needs at least two images".to_string(),
            ));
        }

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            ensure_supported(path)?;
            let (bytes, metadata) = read_image(path).await?;
            images.push(ImageInput::new(bytes, metadata.mime_type, metadata.filename));
        }

        let filenames: Vec<String> = images.iter().map(|i| i.filename.clone()).collect();
        let request = AnalyzeOptions {
            model: options.requested_model().map(str::to_string),
            system_prompt: String::new(),
            user_prompt: match options.prompt.as_deref() {
                Some(custom) if !custom.trim().is_empty() => {
                    prompt::user_prompt(Some(custom), options.note.as_deref())
                }
                _ => prompt::compare_prompt(&filenames, options.note.as_deref()),
            },
        };

        info!("Comparing {} images with {}", images.len(), self.provider.name());
        let response = self.provider.compare(&images, &request).await?;
        if is_refusal(&response.text) {
            return Err(Error::Refusal {
                filename: filenames.join(", "),
                message: response.text,
            });
        }
        Ok(response)
    }
}

/// Every variable a template can reference.
pub fn template_context(
    metadata: &ImageMetadata,
    parsed: &ParsedResponse,
    model: &str,
    provider: &str,
    note: Option<&str>,
    now: DateTime<Utc>,
) -> TemplateContext {
    let title = if parsed.subject.is_empty() {
        metadata.basename.clone()
    } else {
        parsed.subject.clone()
    };
    let hashtags = parsed
        .tags
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| format!("#{}", t))
        .collect::<Vec<_>>()
        .join(" ");
    let dimension = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();

    TemplateContext::new()
        .insert("filename", metadata.filename.as_str())
        .insert("basename", metadata.basename.as_str())
        .insert("extension", metadata.extension.as_str())
        .insert("format", metadata.format.as_str())
        .insert("width", dimension(metadata.width))
        .insert("height", dimension(metadata.height))
        .insert("dimensions", metadata.dimensions())
        .insert("size", metadata.size.as_str())
        .insert("bytes", metadata.bytes.to_string())
        .insert("hash", metadata.hash.as_str())
        .insert("shortHash", metadata.hash.chars().take(8).collect::<String>())
        .insert("title", title)
        .insert("type", parsed.kind.as_str())
        .insert("subject", parsed.subject.as_str())
        .insert("category", parsed.category.as_str())
        .insert("style", parsed.style.as_str())
        .insert("mood", parsed.mood.as_str())
        .insert("medium", parsed.medium.as_str())
        .insert("composition", parsed.composition.as_str())
        .insert("palette", parsed.palette.as_str())
        .insert("colors", parsed.colors.as_str())
        .insert("tags", parsed.tags.as_str())
        .insert("hashtags", hashtags)
        .insert("description", parsed.description.as_str())
        .insert("extractedText", parsed.extracted_text.as_str())
        .insert("model", model)
        .insert("provider", provider)
        .insert("note", note.unwrap_or("").trim())
        .insert("date", now.format("%Y-%m-%d").to_string())
        .insert("datetime", now.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_apologies_are_refusals() {
        assert!(is_refusal("I'm sorry, but I can't help with identifying people in images."));
        assert!(is_refusal("I cannot describe this image."));
        assert!(is_refusal("I apologize, but I am unable to process that request."));
        assert!(is_refusal("Sorry, I can't assist with that."));
    }

    #[test]
    fn ordinary_descriptions_are_not_refusals() {
        assert!(!is_refusal("A red bicycle leaning against a brick wall."));
        assert!(!is_refusal(""));
        assert!(!is_refusal("A sign that reads \"Sorry, we're closed\"."));
    }

    #[test]
    fn long_or_structured_answers_are_not_refusals() {
        let long = format!("I'm sorry for the wait. {}", "Detail. ".repeat(80));
        assert!(!is_refusal(&long));
        assert!(!is_refusal("TYPE: photo\nSUBJECT: I'm sorry sign\nDESCRIPTION: I cannot describe more."));
    }

    #[test]
    fn context_exposes_metadata_and_fields() {
        let metadata = ImageMetadata::from_bytes(b"bytes", "holiday.png");
        let parsed = ParsedResponse {
            kind: "photo".into(),
            tags: "beach, sunset".into(),
            ..Default::default()
        };
        let now = DateTime::parse_from_rfc3339("2024-05-06T07:08:09Z")
            .unwrap()
            .with_timezone(&Utc);
        let ctx = template_context(&metadata, &parsed, "m1", "p1", Some(" sky "), now);

        assert_eq!(ctx.get("title"), Some("holiday"));
        assert_eq!(ctx.get("type"), Some("photo"));
        assert_eq!(ctx.get("hashtags"), Some("#beach #sunset"));
        assert_eq!(ctx.get("note"), Some("sky"));
        assert_eq!(ctx.get("date"), Some("2024-05-06"));
        assert_eq!(ctx.get("width"), Some(""));
        assert_eq!(ctx.get("shortHash").map(str::len), Some(8));
    }
}
