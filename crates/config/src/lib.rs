//! Layered configuration.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults,
//! 2. `config.toml` and `config.yaml` in the platform configuration directory,
//! 3. an explicitly given file (TOML, YAML or JSON by extension),
//! 4. `SIPKIT_*` environment variables, with `__` separating nested keys
//!    (`SIPKIT_LEVELS__FILE=item`).

pub mod error;

use crate::error::{ErrorKind, Result};
use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use sipkit_export::ExportFormat;
use sipkit_metadata::MemoryCatalog;
use sipkit_metadata::catalog::{AGGREGATION_LEVEL_KEY, FILE_LEVEL_KEY, LANGUAGE_KEY, PATTERN_KEY_PREFIX};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

const ENV_PREFIX: &str = "SIPKIT_";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    /// Directory of user templates, `<type>.xml` with an optional `<type>.xsd`.
    pub directory: Option<PathBuf>,
    /// Filename glob per template type, used to find metadata next to content.
    pub patterns: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    /// Description level of classification nodes.
    pub aggregation: String,
    /// Description level of SIPs.
    pub file: String,
}
impl Default for LevelConfig {
    fn default() -> Self {
        Self { aggregation: "series".to_string(), file: "file".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// `bagit` or `eark`.
    pub format: String,
    pub output: Option<PathBuf>,
}
impl Default for ExportConfig {
    fn default() -> Self {
        Self { format: ExportFormat::default().to_string(), output: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub templates: TemplateConfig,
    pub levels: LevelConfig,
    /// Display name written by the `language` field generator.
    pub language: String,
    pub export: ExportConfig,
}
impl Default for Config {
    fn default() -> Self {
        Self {
            templates: TemplateConfig::default(),
            levels: LevelConfig::default(),
            language: "English".to_string(),
            export: ExportConfig::default(),
        }
    }
}
impl Config {
    /// Loads the configuration from every source.
    #[instrument]
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let directory = ProjectDirs::from("", "", "sipkit").map(|dirs| dirs.config_dir().to_path_buf());
        let figment = Self::figment(directory.as_deref(), explicit)?.merge(Env::prefixed(ENV_PREFIX).split("__"));
        let config: Self = figment.extract().or_raise(|| ErrorKind::Invalid)?;
        debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Defaults, then the configuration directory, then `explicit`.
    fn figment(directory: Option<&Path>, explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(directory) = directory {
            figment = figment.merge(Toml::file(directory.join("config.toml")));
            figment = figment.merge(Yaml::file(directory.join("config.yaml")));
        }
        if let Some(path) = explicit {
            if !path.is_file() {
                exn::bail!(ErrorKind::NotFound(path.to_path_buf()));
            }
            figment = match path.extension().and_then(|e| e.to_str()) {
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => figment.merge(Toml::file(path)),
            };
        }
        Ok(figment)
    }

    pub fn export_format(&self) -> Result<ExportFormat> {
        self.export.format.parse::<ExportFormat>().or_raise(|| ErrorKind::InvalidValue("export.format".to_string()))
    }

    /// A catalog serving templates from the template directory, falling back
    /// to the built-in templates, and answering configuration lookups from
    /// this configuration.
    pub fn catalog(&self) -> Result<MemoryCatalog> {
        let mut catalog = MemoryCatalog::new()
            .with_config(AGGREGATION_LEVEL_KEY, &self.levels.aggregation)
            .with_config(FILE_LEVEL_KEY, &self.levels.file)
            .with_config(LANGUAGE_KEY, &self.language);
        for (template_type, pattern) in &self.templates.patterns {
            catalog = catalog.with_config(format!("{PATTERN_KEY_PREFIX}{template_type}"), pattern);
        }
        let Some(directory) = &self.templates.directory else {
            return Ok(catalog);
        };
        let entries = fs::read_dir(directory).or_raise(|| ErrorKind::Templates(directory.clone()))?;
        for entry in entries {
            let path = entry.or_raise(|| ErrorKind::Templates(directory.clone()))?.path();
            let (Some(stem), Some(extension)) = (path.file_stem(), path.extension()) else { continue };
            let template_type = stem.to_string_lossy().to_lowercase();
            match extension.to_string_lossy().to_lowercase().as_str() {
                "xml" => {
                    let content = fs::read_to_string(&path).or_raise(|| ErrorKind::Templates(path.clone()))?;
                    debug!(template_type, path = %path.display(), "loaded user template");
                    catalog = catalog.with_template(template_type, content);
                },
                "xsd" => {
                    let schema = fs::read(&path).or_raise(|| ErrorKind::Templates(path.clone()))?;
                    catalog = catalog.with_schema(template_type, schema);
                },
                _ => {},
            }
        }
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sipkit_metadata::Catalog;

    fn extract(directory: Option<&Path>, explicit: Option<&Path>) -> Config {
        Config::figment(directory, explicit).unwrap().extract().unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = extract(None, None);
        assert_eq!(config, Config::default());
        assert_eq!(config.export_format().unwrap(), ExportFormat::BagIt);
        assert_eq!(config.levels.aggregation, "series");
    }

    #[rstest]
    #[case("custom.toml", "language = \"Deutsch\"\n[levels]\nfile = \"item\"\n")]
    #[case("custom.yaml", "language: Deutsch\nlevels:\n  file: item\n")]
    #[case("custom.json", r#"{"language": "Deutsch", "levels": {"file": "item"}}"#)]
    fn test_explicit_file(#[case] name: &str, #[case] contents: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        let config = extract(None, Some(&path));
        assert_eq!(config.language, "Deutsch");
        assert_eq!(config.levels.file, "item");
        assert_eq!(config.levels.aggregation, "series");
    }

    #[test]
    fn test_explicit_file_wins_over_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.toml"), "[export]\nformat = \"eark\"\noutput = \"/out\"\n").unwrap();
        let explicit = dir.path().join("override.toml");
        fs::write(&explicit, "[export]\nformat = \"bagit\"\n").unwrap();
        let config = extract(Some(dir.path()), Some(&explicit));
        assert_eq!(config.export.format, "bagit");
        assert_eq!(config.export.output.as_deref(), Some(Path::new("/out")));
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = Config::figment(None, Some(Path::new("/does/not/exist.toml"))).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_invalid_format() {
        let config = Config { export: ExportConfig { format: "tar".into(), output: None }, ..Config::default() };
        assert!(matches!(&*config.export_format().unwrap_err(), ErrorKind::InvalidValue(_)));
    }

    #[test]
    fn test_catalog_layers_user_templates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Letter.xml"), r#"{# field name="title" #}<letter>{{ title }}</letter>"#).unwrap();
        fs::write(dir.path().join("letter.xsd"), "<xs:schema/>").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();
        let mut config = Config::default();
        config.templates.directory = Some(dir.path().to_path_buf());
        config.templates.patterns.insert("letter".into(), "letter-*.xml".into());
        config.levels.file = "item".into();

        let catalog = config.catalog().unwrap();
        assert!(catalog.template("letter").unwrap().contains("<letter>"));
        assert!(catalog.schema("letter").is_some());
        assert!(catalog.template("dc").is_some());
        assert_eq!(catalog.filename_pattern("letter"), "letter-*.xml");
        assert_eq!(catalog.config(FILE_LEVEL_KEY).as_deref(), Some("item"));
        assert_eq!(catalog.config(LANGUAGE_KEY).as_deref(), Some("English"));
        assert!(catalog.template_types().contains(&"letter".to_string()));
    }
}
