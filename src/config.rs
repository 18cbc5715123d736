use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::merge::MergePolicy;
use crate::parser::extract::FieldSelectors;
use crate::record::{EquipmentType, PowerSource};

pub const DEFAULT_CONFIG_PATH: &str = "config/sources.yaml";
pub const ENV_PREFIX: &str = "EQUIP";

const DEFAULT_KEYWORDS: &[&str] = &[
    "carbon",
    "hydrogen",
    "battery",
    "hybrid",
    "electric",
    "zero emission",
    "mining",
    "construction",
    "low-emission",
    "zero-emission",
];

/// Top-level layout of `sources.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourcesFile {
    #[serde(default)]
    pub seeds: Vec<SourceDescriptor>,
    #[serde(default)]
    pub settings: Settings,
}

/// One OEM / model family and where to find its specs.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceDescriptor {
    pub oem: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub type_hint: Option<String>,
    #[serde(default)]
    pub start_urls: Vec<String>,
    #[serde(default)]
    pub selectors: FieldSelectors,
    /// Declared power class, used when the page does not reveal one.
    #[serde(default)]
    pub power: Option<String>,
    #[serde(default)]
    pub development_status: Option<String>,
    #[serde(default)]
    pub year_of_release: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
}

impl SourceDescriptor {
    pub fn urls(&self) -> impl Iterator<Item = &str> {
        self.start_urls
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
    }

    pub fn type_hint(&self) -> Option<EquipmentType> {
        self.type_hint
            .as_deref()
            .filter(|h| !h.trim().is_empty())
            .and_then(EquipmentType::from_label)
    }

    pub fn declared_power(&self) -> Option<PowerSource> {
        self.power.as_deref().and_then(PowerSource::from_label)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub timeout_secs: u64,
    /// Pause between two fetches against the same host.
    pub delay_ms: u64,
    pub max_links: usize,
    /// Hosts crawled at the same time.
    pub concurrency: usize,
    pub max_retries: u32,
    pub deadline_secs: Option<u64>,
    pub merge_policy: MergePolicy,
    pub relevance_keywords: Vec<String>,
    pub user_agent: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            timeout_secs: 20,
            delay_ms: 200,
            max_links: 30,
            concurrency: 4,
            max_retries: 1,
            deadline_secs: None,
            merge_policy: MergePolicy::default(),
            relevance_keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            user_agent: format!("equip_scraper/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Load `path` (YAML) layered with `EQUIP_*` environment overrides, e.g.
/// `EQUIP_SETTINGS__DELAY_MS=500`. Descriptors without URLs are dropped.
pub fn load(path: &Path) -> Result<SourcesFile, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::Missing {
            path: path.to_path_buf(),
        });
    }

    let parse_err = |source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let mut file: SourcesFile = Config::builder()
        .add_source(File::from(path).format(FileFormat::Yaml))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(parse_err)?
        .try_deserialize()
        .map_err(parse_err)?;

    file.seeds.retain(|seed| {
        if seed.urls().next().is_none() {
            warn!(oem = %seed.oem, "Source has no start_urls, skipping");
            return false;
        }
        if let Some(hint) = seed.type_hint.as_deref() {
            if !hint.trim().is_empty() && seed.type_hint().is_none() {
                warn!(oem = %seed.oem, hint, "Unknown type_hint, ignoring");
            }
        }
        true
    });

    info!(
        "Loaded {} sources from {}",
        file.seeds.len(),
        path.display()
    );
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &tempfile::TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("sources.yaml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_seeds_and_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            &dir,
            r#"
seeds:
  - oem: Volvo CE
    country: Sweden
    type_hint: Wheel loader
    start_urls:
      - https://www.volvoce.example/l25-electric
    development_status: Production
    selectors:
      engine_power_kw: ".spec-power"
  - oem: Nobody
    country: Nowhere
    start_urls: []
settings:
  delay_ms: 50
  merge_policy: keep-existing
"#,
        );

        let file = load(&path).unwrap();
        assert_eq!(file.seeds.len(), 1);
        let seed = &file.seeds[0];
        assert_eq!(seed.oem, "Volvo CE");
        assert_eq!(seed.type_hint(), Some(EquipmentType::WheelLoader));
        assert_eq!(seed.selectors.engine_power_kw.as_deref(), Some(".spec-power"));
        assert_eq!(file.settings.delay_ms, 50);
        assert_eq!(file.settings.merge_policy, MergePolicy::KeepExisting);
        assert_eq!(file.settings.max_links, 30);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = load(Path::new("does/not/exist.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing { .. }));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(&dir, "seeds: [ {oem: \"x\", start_urls: ");
        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
