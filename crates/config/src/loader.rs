use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    Error, Result,
    env_subst::substitute_env,
    schema::WarrenConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["warren.toml", "warren.yaml", "warren.yml", "warren.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<WarrenConfig> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::read(path, e))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config.
///
/// Search order:
/// 1. `./warren.{toml,yaml,yml,json}` (project-local)
/// 2. `<config_dir>/warren.{toml,yaml,yml,json}`
///
/// A missing or unreadable file yields `WarrenConfig::default()`.
pub fn discover_and_load(config_dir_override: Option<&Path>) -> (WarrenConfig, Option<PathBuf>) {
    let Some(path) = find_config_file(config_dir_override) else {
        debug!("no config file found, using defaults");
        return (WarrenConfig::default(), None);
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => (cfg, Some(path)),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            (WarrenConfig::default(), Some(path))
        },
    }
}

/// Find the first config file in standard locations.
pub fn find_config_file(config_dir_override: Option<&Path>) -> Option<PathBuf> {
    let local = CONFIG_FILENAMES.iter().map(PathBuf::from);
    let global = config_dir_override
        .map(Path::to_path_buf)
        .or_else(config_dir)
        .into_iter()
        .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name)));

    local.chain(global).find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/warren/` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "warren").map(|d| d.config_dir().to_path_buf())
}

/// Returns the data directory, honouring an explicit override.
pub fn data_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    directories::ProjectDirs::from("", "", "warren")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".warren"))
}

/// Returns the path of an existing config file, or the default TOML path.
pub fn find_or_default_config_path(config_dir_override: Option<&Path>) -> PathBuf {
    if let Some(path) = find_config_file(config_dir_override) {
        return path;
    }
    config_dir_override
        .map(Path::to_path_buf)
        .or_else(config_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warren.toml")
}

/// Serialize `config` to TOML and write it to `path`.
///
/// Creates parent directories if needed.
pub fn save_config(config: &WarrenConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(config)?;
    std::fs::write(path, toml_str)?;
    debug!(path = %path.display(), "saved config");
    Ok(())
}

pub(crate) fn parse_config(raw: &str, path: &Path) -> Result<WarrenConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_each_format() {
        let tmp = tempfile::tempdir().unwrap();

        let toml_path = tmp.path().join("warren.toml");
        std::fs::write(&toml_path, "[server]\nport = 9001\n").unwrap();
        assert_eq!(load_config(&toml_path).unwrap().server.port, 9001);

        let yaml_path = tmp.path().join("warren.yaml");
        std::fs::write(&yaml_path, "server:\n  port: 9002\n").unwrap();
        assert_eq!(load_config(&yaml_path).unwrap().server.port, 9002);

        let json_path = tmp.path().join("warren.json");
        std::fs::write(&json_path, r#"{"server":{"port":9003}}"#).unwrap();
        assert_eq!(load_config(&json_path).unwrap().server.port, 9003);
    }

    #[test]
    fn unsupported_extension_rejected() {
        let err = parse_config("", Path::new("warren.ini")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("warren.toml"), "server = [[[").unwrap();
        let (cfg, path) = discover_and_load(Some(tmp.path()));
        assert_eq!(cfg.server.port, 18800);
        assert!(path.is_some());
    }

    #[test]
    fn save_then_load_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/warren.toml");
        let mut cfg = WarrenConfig::default();
        cfg.tools.deny.push("shell".into());
        save_config(&cfg, &path).unwrap();
        let back = load_config(&path).unwrap();
        assert_eq!(back.tools.deny, vec!["shell".to_string()]);
    }

    #[test]
    fn default_path_uses_override_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let path = find_or_default_config_path(Some(tmp.path()));
        // A project-local file would win, but the test cwd has none.
        if !PathBuf::from("warren.toml").exists() {
            assert_eq!(path, tmp.path().join("warren.toml"));
        }
    }
}
