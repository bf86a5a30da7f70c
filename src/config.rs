use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::data::model::ColumnRoles;
use crate::data::sampling::DisplaySampling;

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV: &str = "FEATURE_EXPLORER_CONFIG";

/// Deployment settings, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExplorerConfig {
    /// Whether plain filesystem paths may be opened as sources.
    pub allow_local_paths: bool,
    /// URL prefixes the user's token may be sent to.
    pub token_domains: Vec<String>,
    /// Defaults for new scatter views.
    pub sampling: DisplaySampling,
    pub columns: ColumnRoles,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            allow_local_paths: true,
            token_domains: Vec::new(),
            sampling: DisplaySampling::default(),
            columns: ColumnRoles::default(),
        }
    }
}

impl ExplorerConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: ExplorerConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        for domain in &mut config.token_domains {
            let trimmed = domain.trim_end_matches('/').len();
            domain.truncate(trimmed);
        }
        Ok(config)
    }

    /// Read the file named by [`CONFIG_ENV`], falling back to defaults when
    /// the variable is unset or points nowhere.
    pub fn load_from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV).map(PathBuf::from) {
            Some(path) if path.exists() => {
                let config = Self::from_path(&path)?;
                log::info!("Configuration read from {}", path.display());
                Ok(config)
            }
            Some(path) => {
                log::warn!(
                    "{CONFIG_ENV} points to {} which does not exist; using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                log::info!("{CONFIG_ENV} not set; using default configuration");
                Ok(Self::default())
            }
        }
    }

    /// Whether `url` belongs to one of the token domains: the domain itself
    /// or anything below it, never a longer host name.
    pub fn is_trusted_url(&self, url: &str) -> bool {
        self.token_domains.iter().any(|domain| {
            let domain = domain.trim_end_matches('/');
            !domain.is_empty()
                && url
                    .strip_prefix(domain)
                    .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn with_domain(domain: &str) -> ExplorerConfig {
        ExplorerConfig {
            token_domains: vec![domain.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn trusted_urls_match_whole_domains() {
        let config = with_domain("https://example.org");
        assert!(config.is_trusted_url("https://example.org"));
        assert!(config.is_trusted_url("https://example.org/plate.zarr"));
        assert!(!config.is_trusted_url("https://example.org.bad_domain.org"));
        assert!(!config.is_trusted_url("https://example.orgx/plate.zarr"));
        assert!(!config.is_trusted_url("http://example.org/plate.zarr"));
        assert!(!ExplorerConfig::default().is_trusted_url("https://example.org"));

        let slashed = with_domain("https://example.org/data/");
        assert!(slashed.is_trusted_url("https://example.org/data/plate.zarr"));
        assert!(!slashed.is_trusted_url("https://example.org/database"));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"allow_local_paths": false, "token_domains": ["https://data.example.org/"],
               "sampling": {{"max_points": 1000}}}}"#
        )
        .unwrap();

        let config = ExplorerConfig::from_path(file.path()).unwrap();
        assert!(!config.allow_local_paths);
        assert_eq!(config.token_domains, vec!["https://data.example.org"]);
        assert_eq!(config.sampling.max_points, 1000);
        assert!(config.sampling.enabled);
        assert_eq!(config.columns, ColumnRoles::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"alow_local_paths": true}}"#).unwrap();
        assert!(ExplorerConfig::from_path(file.path()).is_err());
    }
}
