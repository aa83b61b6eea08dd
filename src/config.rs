use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::taxonomy::{Taxonomy, TaxonomyOverrides};
use crate::template::TemplateSource;
use crate::types::ProcessOptions;

/// Settings read once at startup, usually from a TOML file.
///
/// ```toml
/// provider = "anthropic"
/// fallback_provider = "openai"
/// template = "detailed"
/// concurrency = 4
///
/// [taxonomy]
/// types = ["blueprint"]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: String,
    /// Used for files over the primary provider's size limit.
    pub fallback_provider: Option<String>,
    pub model: Option<String>,
    /// Built-in template name or template file path.
    pub template: String,
    pub prompt: Option<String>,
    pub note: Option<String>,
    /// Batch worker count, at least 1.
    pub concurrency: usize,
    pub no_cache: bool,
    /// Overrides the default cache location.
    pub cache_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub taxonomy: TaxonomyOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            fallback_provider: None,
            model: None,
            template: "default".to_string(),
            prompt: None,
            note: None,
            concurrency: 3,
            no_cache: false,
            cache_dir: None,
            output_dir: None,
            taxonomy: TaxonomyOverrides::default(),
        }
    }
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.provider.trim().is_empty() {
            return Err(Error::Config("provider must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn taxonomy(&self) -> Taxonomy {
        Taxonomy::default().with_overrides(&self.taxonomy)
    }

    pub fn cache(&self) -> Cache {
        match &self.cache_dir {
            Some(dir) => Cache::at(dir),
            None => Cache::open_default(),
        }
    }

    /// Options for each conversion, with the template resolved.
    pub fn process_options(&self) -> Result<ProcessOptions> {
        Ok(ProcessOptions {
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            note: self.note.clone(),
            template: TemplateSource::resolve(&self.template)?,
            no_cache: self.no_cache,
            output_dir: self.output_dir.clone(),
        })
    }
}

/// Explicit load state, owned by the entry point and passed by reference.
#[derive(Debug, Clone, Default)]
pub enum ConfigSlot {
    #[default]
    Unloaded,
    Loaded(Config),
}

impl ConfigSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path`, or use defaults when `path` is `None`. Loading an
    /// already loaded slot keeps the first config.
    pub fn load(&mut self, path: Option<&Path>) -> Result<&Config> {
        if !self.is_loaded() {
            let config = match path {
                Some(path) => Config::load(path)?,
                None => Config::default(),
            };
            *self = ConfigSlot::Loaded(config);
        }
        self.get()
    }

    pub fn get(&self) -> Result<&Config> {
        match self {
            ConfigSlot::Loaded(config) => Ok(config),
            ConfigSlot::Unloaded => Err(Error::Config("configuration not loaded".to_string())),
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ConfigSlot::Loaded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.concurrency, 3);
    }

    #[test]
    fn parses_overrides() {
        let config = Config::from_toml_str(
            r#"
provider = "ollama"
fallback_provider = "openai"
template = "minimal"
concurrency = 8
note = "focus on text"

[taxonomy]
types = ["blueprint"]
"#,
        )
        .unwrap();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.fallback_provider.as_deref(), Some("openai"));
        assert_eq!(config.concurrency, 8);
        assert!(config.taxonomy().is_known_type("blueprint"));

        let options = config.process_options().unwrap();
        assert_eq!(options.template.name, "minimal");
        assert_eq!(options.note.as_deref(), Some("focus on text"));
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = Config::from_toml_str("concurrency = 0").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            Config::from_toml_str("concurrency = \"many\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn unknown_template_fails_option_building() {
        let config = Config {
            template: "nope-not-here".into(),
            ..Default::default()
        };
        assert!(matches!(config.process_options(), Err(Error::Template(_))));
    }

    #[test]
    fn slot_lifecycle() {
        let mut slot = ConfigSlot::new();
        assert!(!slot.is_loaded());
        assert!(slot.get().is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "concurrency = 5").unwrap();

        assert_eq!(slot.load(Some(&path)).unwrap().concurrency, 5);
        assert!(slot.is_loaded());

        std::fs::write(&path, "concurrency = 9").unwrap();
        assert_eq!(slot.load(Some(&path)).unwrap().concurrency, 5);
    }

    #[test]
    fn slot_defaults_without_a_file() {
        let mut slot = ConfigSlot::new();
        assert_eq!(slot.load(None).unwrap(), &Config::default());
    }

    #[test]
    fn missing_file_is_io_error() {
        let mut slot = ConfigSlot::new();
        let err = slot.load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!slot.is_loaded());
    }
}
