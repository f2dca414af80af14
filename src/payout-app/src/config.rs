// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Failed to parse config file {0}: {1}")]
    ParseError(PathBuf, String),
}

/// A configuration struct stored as one `[section]` of an application's
/// TOML file.
pub trait ConfigFile: Sized + Default + DeserializeOwned {
    /// Application directory and file stem, e.g. `payoutd` for
    /// `payoutd.toml` and `/etc/payoutd/`.
    const APP: &'static str;

    /// Section key inside the file.
    const SECTION: &'static str;

    /// Candidate files in lookup order: working directory, XDG config
    /// directory, `/etc`.
    fn search_paths() -> Vec<PathBuf> {
        let file = format!("{}.toml", Self::APP);
        let mut paths = vec![PathBuf::from(&file)];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join(Self::APP).join(&file));
        }
        paths.push(Path::new("/etc").join(Self::APP).join(&file));
        paths
    }

    /// Load the section from an explicit file; a missing section is an
    /// error here.
    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        read_section::<Self>(path, Self::SECTION)?.ok_or_else(|| {
            ConfigError::ParseError(
                path.to_path_buf(),
                format!("missing [{}] section", Self::SECTION),
            )
        })
    }

    /// First file on the search path that has the section, or defaults
    /// with no path when none does.
    fn load_from_default_paths() -> Result<(Self, Option<PathBuf>), ConfigError> {
        for path in Self::search_paths() {
            if !path.exists() {
                continue;
            }
            if let Some(cfg) = read_section::<Self>(&path, Self::SECTION)? {
                return Ok((cfg, Some(path)));
            }
        }
        Ok((Self::default(), None))
    }
}

fn read_section<T: DeserializeOwned>(path: &Path, key: &str) -> Result<Option<T>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(path.to_path_buf(), e.to_string()))?;
    parse_section(&content, key).map_err(|e| ConfigError::ParseError(path.to_path_buf(), e))
}

fn parse_section<T: DeserializeOwned>(content: &str, key: &str) -> Result<Option<T>, String> {
    let mut table: toml::Table = toml::from_str(content).map_err(|e| e.to_string())?;
    let Some(section) = table.remove(key) else {
        return Ok(None);
    };
    section.try_into::<T>().map(Some).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct Sample {
        port: u16,
        name: String,
    }

    impl ConfigFile for Sample {
        const APP: &'static str = "payoutd-test";
        const SECTION: &'static str = "sample";
    }

    #[test]
    fn test_section_defaults_apply() {
        let parsed: Option<Sample> =
            parse_section("[sample]\nport = 6380\n", "sample").expect("valid toml");
        assert_eq!(
            parsed,
            Some(Sample {
                port: 6380,
                name: String::new()
            })
        );
    }

    #[test]
    fn test_missing_section() {
        let parsed: Option<Sample> =
            parse_section("[other]\nport = 1\n", "sample").expect("valid toml");
        assert_eq!(parsed, None);
        assert!(parse_section::<Sample>("[sample\n", "sample").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("payout-app-{}.toml", std::process::id()));
        std::fs::write(&path, "[sample]\nname = \"till\"\n").expect("write temp config");
        let loaded = Sample::load_from_file(&path).expect("load");
        assert_eq!(loaded.name, "till");

        std::fs::write(&path, "[elsewhere]\n").expect("write temp config");
        let err = Sample::load_from_file(&path).expect_err("no section");
        assert!(err.to_string().contains("missing [sample] section"));
        let _ = std::fs::remove_file(&path);

        assert!(matches!(
            Sample::load_from_file(&path),
            Err(ConfigError::ReadError(..))
        ));
    }

    #[test]
    fn test_search_paths() {
        let paths = Sample::search_paths();
        assert_eq!(paths[0], PathBuf::from("payoutd-test.toml"));
        assert_eq!(
            paths.last(),
            Some(&PathBuf::from("/etc/payoutd-test/payoutd-test.toml"))
        );
    }
}
