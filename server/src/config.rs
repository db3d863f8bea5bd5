//! Optional `.mache.toml` configuration: projection inputs and source
//! directories. CLI flags override file values.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProjectionConfig {
    /// SQLite database holding the records table.
    pub database: Option<PathBuf>,
    /// Topology JSON document.
    pub topology: Option<PathBuf>,
    /// Sidecar database for the cross-reference index.
    pub refs_db: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SourcesConfig {
    /// Directories ingested as source trees.
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub projection: ProjectionConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
        toml::from_str(&text).map_err(|e| format!("invalid config {}: {e}", path.display()))
    }

    /// Load `.mache.toml` from the current directory if present.
    pub fn load_default() -> Self {
        let path = Path::new(".mache.toml");
        if path.exists() {
            Config::load(path).unwrap_or_else(|e| {
                eprintln!("warning: {e}");
                Config::default()
            })
        } else {
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let cfg: Config = toml::from_str(
            r#"
            [projection]
            database = "results.db"
            topology = "topology.json"
            refs_db = "refs.db"

            [sources]
            dirs = ["src", "lib"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.projection.database.unwrap(), PathBuf::from("results.db"));
        assert_eq!(cfg.sources.dirs.len(), 2);
    }

    #[test]
    fn test_empty_config_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert!(cfg.projection.database.is_none());
        assert!(cfg.sources.dirs.is_empty());
    }
}
