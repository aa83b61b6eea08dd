//! Batch conversion with a bounded worker pool.
//!
//! Inputs are expanded into [`WorkItem`]s, routed by file size (primary
//! provider, size fallback, or skipped), then drained from one shared queue
//! by at most `concurrency` tokio tasks. A failed (or panicking) item never
//! stops the run; outcomes come back in discovery order.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use futures::FutureExt;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::metadata::{format_size, is_supported};
use crate::pipeline::Pipeline;
use crate::provider::provider_from_name;
use crate::types::{
    BatchSummary, ItemOutcome, ItemSource, ItemStatus, ProcessOptions, ProcessOutcome,
    SkippedItem, WorkItem,
};

fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Expand inputs into work items.
///
/// Directories contribute their supported image files (one level, or the
/// whole tree when `recursive`). Named files are kept as given so the
/// pipeline can report unsupported or missing ones. Files are sorted and
/// deduplicated; URLs follow in input order.
pub fn discover(inputs: &[String], recursive: bool) -> Vec<WorkItem> {
    let mut files: Vec<PathBuf> = Vec::new();
    let mut urls: Vec<String> = Vec::new();

    for input in inputs {
        if is_url(input) {
            if !urls.contains(input) {
                urls.push(input.clone());
            }
            continue;
        }

        let path = Path::new(input);
        if path.is_dir() {
            let walker = WalkDir::new(path)
                .min_depth(1)
                .max_depth(if recursive { usize::MAX } else { 1 });
            for entry in walker.into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() && is_supported(entry.path()) {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    files.dedup();
    debug!("Discovered {} files and {} URLs", files.len(), urls.len());

    files
        .into_iter()
        .map(WorkItem::file)
        .chain(urls.into_iter().map(WorkItem::url))
        .collect()
}

/// Items to run and items excluded up front.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub items: Vec<WorkItem>,
    pub skipped: Vec<SkippedItem>,
}

/// Route local files by size. Each file is stat'd once. Files over the
/// primary limit go to the fallback when they fit its limit and are skipped
/// otherwise. URLs and files that cannot be stat'd stay on the primary.
pub fn plan_routes(items: Vec<WorkItem>, primary_limit: u64, fallback_limit: Option<u64>) -> BatchPlan {
    let mut plan = BatchPlan::default();

    for mut item in items {
        let path = match &item.source {
            ItemSource::File(path) if !item.via_fallback => path.clone(),
            _ => {
                plan.items.push(item);
                continue;
            }
        };

        let size = match std::fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(_) => {
                plan.items.push(item);
                continue;
            }
        };

        if size <= primary_limit {
            plan.items.push(item);
            continue;
        }

        match fallback_limit {
            Some(limit) if size <= limit => {
                info!(
                    "{} ({}) exceeds the primary limit, routing to fallback",
                    path.display(),
                    format_size(size)
                );
                item.via_fallback = true;
                plan.items.push(item);
            }
            _ => {
                let reason = match fallback_limit {
                    Some(limit) => format!(
                        "{} exceeds the primary limit of {} and the fallback limit of {}",
                        format_size(size),
                        format_size(primary_limit),
                        format_size(limit)
                    ),
                    None => format!(
                        "{} exceeds the provider limit of {}",
                        format_size(size),
                        format_size(primary_limit)
                    ),
                };
                warn!("Skipping {}: {}", path.display(), reason);
                plan.skipped.push(SkippedItem {
                    path,
                    bytes: size,
                    reason,
                });
            }
        }
    }

    plan
}

/// Output file for every item, fixed in discovery order before any work
/// starts. Names keep the source extension (`cat.png.md`, `cat.jpg.md`);
/// a name already taken in the same directory gets `-2`, `-3`, ...
pub fn assign_outputs(items: &[WorkItem], output_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut taken: HashSet<PathBuf> = HashSet::new();

    items
        .iter()
        .map(|item| {
            let (dir, name) = match &item.source {
                ItemSource::File(path) => (
                    path.parent()
                        .filter(|p| !p.as_os_str().is_empty())
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| PathBuf::from(".")),
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "image".to_string()),
                ),
                ItemSource::Url(url) => (PathBuf::from("."), url_filename(url, &[])),
            };
            let dir = output_dir.map(Path::to_path_buf).unwrap_or(dir);

            let mut candidate = dir.join(format!("{}.md", name));
            let mut n = 2;
            while taken.contains(&candidate) {
                candidate = dir.join(format!("{}-{}.md", name, n));
                n += 1;
            }
            taken.insert(candidate.clone());
            candidate
        })
        .collect()
}

/// Runs many conversions concurrently.
#[derive(Clone)]
pub struct BatchRunner {
    primary: Arc<Pipeline>,
    fallback: Option<Arc<Pipeline>>,
    concurrency: usize,
    client: Client,
}

impl BatchRunner {
    pub fn new(primary: Pipeline) -> Self {
        Self {
            primary: Arc::new(primary),
            fallback: None,
            concurrency: 3,
            client: Client::new(),
        }
    }

    /// Pipeline for files too large for the primary provider.
    pub fn with_fallback(mut self, fallback: Pipeline) -> Self {
        self.fallback = Some(Arc::new(fallback));
        self
    }

    /// Maximum simultaneous items, at least 1.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// HTTP client used for URL downloads.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Build the primary pipeline, and the fallback if one is configured
    /// and usable, from a loaded config.
    pub fn from_config(config: &Config, client: Client) -> Result<Self> {
        let provider = provider_from_name(&config.provider, client.clone())?;
        let mut pipeline = Pipeline::new(provider).with_taxonomy(config.taxonomy());
        if !config.no_cache {
            pipeline = pipeline.with_cache(config.cache());
        }

        let fallback = config
            .fallback_provider
            .as_deref()
            .and_then(|name| match provider_from_name(name, client.clone()) {
                Ok(provider) => Some(pipeline.with_provider(provider)),
                Err(e) => {
                    warn!("Fallback provider unavailable: {}", e);
                    None
                }
            });

        let mut runner = Self::new(pipeline)
            .concurrency(config.concurrency)
            .with_client(client);
        if let Some(fallback) = fallback {
            runner = runner.with_fallback(fallback);
        }
        Ok(runner)
    }

    pub fn primary(&self) -> &Pipeline {
        &self.primary
    }

    pub fn fallback(&self) -> Option<&Pipeline> {
        self.fallback.as_deref()
    }

    /// Route `items` by size without running them.
    pub fn plan(&self, items: Vec<WorkItem>) -> BatchPlan {
        plan_routes(
            items,
            self.primary.provider().max_image_bytes(),
            self.fallback.as_ref().map(|f| f.provider().max_image_bytes()),
        )
    }

    /// Discover, plan and run in one call.
    pub async fn run_inputs(
        &self,
        inputs: &[String],
        recursive: bool,
        options: &ProcessOptions,
    ) -> Result<BatchSummary> {
        self.run(discover(inputs, recursive), options).await
    }

    /// Run every item and summarise. Item failures, panics included, are
    /// reported in the summary.
    pub async fn run(&self, items: Vec<WorkItem>, options: &ProcessOptions) -> Result<BatchSummary> {
        let plan = self.plan(items);
        let total = plan.items.len();
        let workers = self.concurrency.min(total);

        info!(
            "Processing {} items with {} workers ({} skipped)",
            total,
            workers,
            plan.skipped.len()
        );

        let outputs = assign_outputs(&plan.items, options.output_dir.as_deref());
        let queue: Arc<Mutex<VecDeque<(usize, WorkItem, PathBuf)>>> = Arc::new(Mutex::new(
            plan.items
                .into_iter()
                .zip(outputs)
                .enumerate()
                .map(|(index, (item, output))| (index, item, output))
                .collect(),
        ));
        let completed = Arc::new(AtomicUsize::new(0));

        let handles = (0..workers).map(|worker| {
            let runner = self.clone();
            let queue = Arc::clone(&queue);
            let completed = Arc::clone(&completed);
            let options = options.clone();

            tokio::spawn(async move {
                let mut results = Vec::new();
                loop {
                    let next = queue.lock().await.pop_front();
                    let Some((index, item, output)) = next else {
                        break;
                    };
                    debug!("Worker {} picked {}", worker, item.source);

                    let source = item.source.clone();
                    let via_fallback = item.via_fallback;
                    let outcome = match AssertUnwindSafe(runner.process_item(item, output, &options))
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(payload) => panicked_outcome(source, via_fallback, payload),
                    };
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(
                        "[{}/{}] {} {}",
                        done,
                        total,
                        match outcome.status {
                            ItemStatus::Completed => "done",
                            ItemStatus::Failed => "failed",
                        },
                        outcome.source
                    );
                    results.push((index, outcome));
                }
                results
            })
        });

        let mut indexed = Vec::with_capacity(total);
        for joined in join_all(handles).await {
            indexed.extend(joined.map_err(|e| Error::Join(e.to_string()))?);
        }
        indexed.sort_by_key(|(index, _)| *index);

        let outcomes = indexed.into_iter().map(|(_, outcome)| outcome).collect();
        let summary = BatchSummary::from_outcomes(outcomes, plan.skipped);
        info!(
            "Batch finished: {} succeeded, {} failed, {} skipped, {} cached",
            summary.succeeded, summary.failed, summary.skipped, summary.cached
        );
        Ok(summary)
    }

    async fn process_item(&self, item: WorkItem, output: PathBuf, options: &ProcessOptions) -> ItemOutcome {
        let started = Instant::now();
        let (pipeline, options) = match (&self.fallback, item.via_fallback) {
            (Some(fallback), true) => {
                let mut options = options.clone();
                options.model = Some(fallback.provider().default_model().to_string());
                (fallback.as_ref(), options)
            }
            _ => (self.primary.as_ref(), options.clone()),
        };

        let result = self.convert(pipeline, &item.source, &output, &options).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((outcome, path)) => ItemOutcome {
                source: item.source,
                status: ItemStatus::Completed,
                output: Some(path),
                error: None,
                refused: false,
                cached: outcome.cached,
                via_fallback: item.via_fallback,
                provider: Some(outcome.provider),
                warnings: outcome.warnings,
                duration_ms,
            },
            Err(e) => {
                warn!("{} failed: {}", item.source, e);
                ItemOutcome {
                    source: item.source,
                    status: ItemStatus::Failed,
                    output: None,
                    refused: e.is_refusal(),
                    error: Some(e.to_string()),
                    cached: false,
                    via_fallback: item.via_fallback,
                    provider: Some(pipeline.provider().name().to_string()),
                    warnings: Vec::new(),
                    duration_ms,
                }
            }
        }
    }

    async fn convert(
        &self,
        pipeline: &Pipeline,
        source: &ItemSource,
        output: &Path,
        options: &ProcessOptions,
    ) -> Result<(ProcessOutcome, PathBuf)> {
        let outcome = match source {
            ItemSource::File(path) => pipeline.process_file(path, options).await?,
            ItemSource::Url(url) => {
                let (bytes, filename) = self.download(url).await?;
                pipeline.process_bytes(bytes, &filename, options).await?
            }
        };

        write_output(output, &outcome.markdown).await?;
        Ok((outcome, output.to_path_buf()))
    }

    /// Fetch a remote image. The filename comes from the last URL segment;
    /// when it lacks a supported extension one is derived from the bytes.
    async fn download(&self, url: &str) -> Result<(Vec<u8>, String)> {
        let download_err = |message: String| Error::Download {
            url: url.to_string(),
            message,
        };

        debug!("Downloading {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| download_err(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(download_err(format!("HTTP {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_err(e.to_string()))?
            .to_vec();

        let filename = url_filename(url, &bytes);
        Ok((bytes, filename))
    }
}

fn panicked_outcome(
    source: ItemSource,
    via_fallback: bool,
    payload: Box<dyn Any + Send>,
) -> ItemOutcome {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    warn!("{} panicked: {}", source, message);

    ItemOutcome {
        source,
        status: ItemStatus::Failed,
        output: None,
        error: Some(format!("panicked: {}", message)),
        refused: false,
        cached: false,
        via_fallback,
        provider: None,
        warnings: Vec::new(),
        duration_ms: 0,
    }
}

fn url_filename(url: &str, bytes: &[u8]) -> String {
    let name = reqwest::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last().map(str::to_string))
        })
        .unwrap_or_else(|| "image".to_string());

    if is_supported(Path::new(&name)) {
        return name;
    }
    match image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
    {
        Some(ext) => format!("{}.{}", name, ext),
        None => name,
    }
}

async fn write_output(path: &Path, markdown: &str) -> Result<()> {
    let io_err = |source: std::io::Error| Error::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await.map_err(io_err)?;
    }
    tokio::fs::write(path, markdown).await.map_err(io_err)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, len: usize) {
        std::fs::write(path, vec![0u8; len]).unwrap();
    }

    fn names(items: &[WorkItem]) -> Vec<String> {
        items
            .iter()
            .map(|i| match &i.source {
                ItemSource::File(p) => p.file_name().unwrap().to_string_lossy().into_owned(),
                ItemSource::Url(u) => u.clone(),
            })
            .collect()
    }

    #[test]
    fn discovery_sorts_filters_and_dedups() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("b.png"), 1);
        touch(&dir.path().join("a.jpg"), 1);
        touch(&dir.path().join("notes.txt"), 1);
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested").join("c.gif"), 1);

        let root = dir.path().to_string_lossy().into_owned();
        let explicit = dir.path().join("b.png").to_string_lossy().into_owned();
        let items = discover(
            &[
                "https://example.com/z.png".to_string(),
                root.clone(),
                explicit,
            ],
            false,
        );
        assert_eq!(names(&items), vec!["a.jpg", "b.png", "https://example.com/z.png"]);

        let recursive = discover(&[root], true);
        assert_eq!(names(&recursive), vec!["a.jpg", "b.png", "c.gif"]);
    }

    #[test]
    fn named_files_are_kept_even_when_unsupported() {
        let items = discover(&["missing.bmp".to_string()], false);
        assert_eq!(items, vec![WorkItem::file("missing.bmp")]);
    }

    #[test]
    fn oversized_files_route_to_fallback_or_skip() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.png");
        let medium = dir.path().join("medium.png");
        let large = dir.path().join("large.png");
        touch(&small, 10);
        touch(&medium, 50);
        touch(&large, 500);

        let items = vec![
            WorkItem::file(&small),
            WorkItem::file(&medium),
            WorkItem::file(&large),
            WorkItem::file(dir.path().join("gone.png")),
            WorkItem::url("https://example.com/x.png"),
        ];

        let plan = plan_routes(items.clone(), 20, Some(100));
        assert_eq!(plan.items.len(), 4);
        assert!(!plan.items[0].via_fallback);
        assert!(plan.items[1].via_fallback);
        assert!(!plan.items[2].via_fallback);
        assert!(!plan.items[3].via_fallback);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].path, large);
        assert_eq!(plan.skipped[0].bytes, 500);

        let without_fallback = plan_routes(items, 20, None);
        assert_eq!(without_fallback.items.len(), 3);
        assert_eq!(without_fallback.skipped.len(), 2);
    }

    #[test]
    fn output_goes_next_to_source_or_into_output_dir() {
        let items = vec![
            WorkItem::file("shots/cat.png"),
            WorkItem::file("cat.png"),
            WorkItem::url("https://example.com/dog.jpg"),
        ];
        assert_eq!(
            assign_outputs(&items, None),
            vec![
                PathBuf::from("shots/cat.png.md"),
                PathBuf::from("./cat.png.md"),
                PathBuf::from("./dog.jpg.md"),
            ]
        );
        assert_eq!(
            assign_outputs(&items[..1], Some(Path::new("out"))),
            vec![PathBuf::from("out/cat.png.md")]
        );
    }

    #[test]
    fn same_stem_different_extension_gets_distinct_outputs() {
        let items = vec![WorkItem::file("shots/cat.jpg"), WorkItem::file("shots/cat.png")];
        let outputs = assign_outputs(&items, None);
        assert_eq!(outputs[0], PathBuf::from("shots/cat.jpg.md"));
        assert_eq!(outputs[1], PathBuf::from("shots/cat.png.md"));
    }

    #[test]
    fn colliding_names_in_one_output_dir_are_suffixed_in_order() {
        let items = vec![
            WorkItem::file("a/cat.png"),
            WorkItem::file("b/cat.png"),
            WorkItem::file("c/cat.png"),
        ];
        assert_eq!(
            assign_outputs(&items, Some(Path::new("out"))),
            vec![
                PathBuf::from("out/cat.png.md"),
                PathBuf::from("out/cat.png-2.md"),
                PathBuf::from("out/cat.png-3.md"),
            ]
        );
        // without an output dir the parents already keep them apart
        assert_eq!(assign_outputs(&items, None)[1], PathBuf::from("b/cat.png.md"));
    }

    #[test]
    fn panic_payloads_become_failed_outcomes() {
        let outcome = panicked_outcome(
            ItemSource::File(PathBuf::from("b.png")),
            true,
            Box::new("provider bug"),
        );
        assert_eq!(outcome.status, ItemStatus::Failed);
        assert!(outcome.via_fallback);
        assert_eq!(outcome.error.as_deref(), Some("panicked: provider bug"));
    }

    #[test]
    fn url_filenames() {
        assert_eq!(url_filename("https://x.io/a/cat.png?size=2", b""), "cat.png");
        assert_eq!(url_filename("https://x.io/", b""), "image");

        let mut png = Vec::new();
        image::RgbImage::new(1, 1)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        assert_eq!(url_filename("https://x.io/render", &png), "render.png");
    }
}
