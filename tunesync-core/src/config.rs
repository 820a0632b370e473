use crate::error::{CoreError, Result};
use crate::source::MusicSource;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunesyncConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Which source to poll
    #[serde(default = "default_source")]
    pub source: MusicSource,
}

const fn default_source() -> MusicSource {
    MusicSource::Spotify
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write logs to `<config dir>/tunesync.log`
    #[serde(default)]
    pub file_enabled: bool,
}

/// Provider sections, kept as raw TOML so each provider crate owns its schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProvidersConfig(toml::Table);

impl ProvidersConfig {
    /// Deserialize the `[providers.<name>]` section.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigInvalid`] if the section exists but does not
    /// match `T`.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let Some(value) = self.0.get(name) else {
            return Ok(None);
        };

        value
            .clone()
            .try_into()
            .map(Some)
            .map_err(|e: toml::de::Error| CoreError::ConfigInvalid {
                message: format!("providers.{name}: {e}"),
            })
    }
}

impl TunesyncConfig {
    /// Get the config file path (~/.config/tunesync/config.toml)
    #[must_use]
    pub fn config_path() -> PathBuf {
        crate::paths::config_path()
    }

    /// Load config from the default path, creating a template on first run.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigNotFound`] after writing the template, or an
    /// error if the file cannot be read or parsed.
    pub fn load_or_create(provider_templates: Option<&[&str]>) -> Result<Self> {
        Self::load_or_create_at(&Self::config_path(), provider_templates)
    }

    /// Same as [`Self::load_or_create`] with an explicit path.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigNotFound`] after writing the template, or an
    /// error if the file cannot be read or parsed.
    pub fn load_or_create_at(path: &Path, provider_templates: Option<&[&str]>) -> Result<Self> {
        if !path.exists() {
            // Create config directory if it doesn't exist
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(path, build_config_template(provider_templates))?;

            return Err(CoreError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid TOML for this schema.
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Build the first-run config file from the base template and provider sections.
#[must_use]
pub fn build_config_template(provider_templates: Option<&[&str]>) -> String {
    let mut template = String::from(BASE_CONFIG_TEMPLATE);
    for section in provider_templates.unwrap_or_default() {
        template.push_str(section);
    }
    template
}

const BASE_CONFIG_TEMPLATE: &str = r#"# Tunesync Configuration
# ~/.config/tunesync/config.toml

[general]
# Which source to poll: "spotify"
source = "spotify"

[logging]
# Also write logs to ~/.config/tunesync/tunesync.log
file_enabled = false

"#;
