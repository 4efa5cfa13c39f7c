use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::model::mapping::BoardMapping;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    pub board: Option<BoardConfig>,
    pub jira: Option<JiraConfig>,
    pub github: Option<GitHubConfig>,
    pub log_level: Option<String>,
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub mappings: Vec<BoardMapping>,
}

#[derive(Debug, Deserialize)]
pub struct BoardConfig {
    pub url: String,
    pub token: String,
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

#[derive(Debug, Deserialize)]
pub struct JiraConfig {
    pub domain: String,
    pub email: String,
    pub api_token: String,
}

#[derive(Debug, Deserialize)]
pub struct GitHubConfig {
    pub token: String,
    pub api_url: Option<String>,
}

pub fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lanesync")
}

pub fn default_config_path() -> PathBuf {
    default_dir().join("config.toml")
}

impl AppConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_dir)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn validate(&self) -> Result<()> {
        for (idx, mapping) in self.mappings.iter().enumerate() {
            let which = format!("mappings[{idx}]");
            if mapping.board_id.trim().is_empty() {
                bail!("{which}: board_id is required");
            }
            if mapping.project.trim().is_empty() {
                bail!("{which}: project is required");
            }
            if mapping.target_system.trim().is_empty() {
                bail!("{which}: target_system is required");
            }
            if !mapping.lanes.iter().any(|l| !l.chains().is_empty()) {
                bail!("{which}: at least one lane with states is required");
            }
            let mut seen = HashSet::new();
            for lane in &mapping.lanes {
                if !seen.insert(lane.lane_id.as_str()) {
                    bail!("{which}: lane {} is listed more than once", lane.lane_id);
                }
            }
            check_unique_keys(&which, "priority_map", mapping.priority_map.keys())?;
            check_unique_keys(&which, "type_map", mapping.type_map.keys())?;
        }
        Ok(())
    }
}

/// Table keys are matched case-insensitively, so keys differing only by
/// case would be ambiguous.
fn check_unique_keys<'a>(which: &str, table: &str, keys: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut seen = HashSet::new();
    for key in keys {
        if !seen.insert(key.trim().to_lowercase()) {
            bail!("{which}: {table} has more than one entry for '{}'", key.trim());
        }
    }
    Ok(())
}

pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).context("Failed to parse config.toml")?;
    config.validate()?;
    Ok(config)
}

/// Load configuration from `path`, or the default location.
///
/// A missing default file yields an empty configuration; a missing explicit
/// path is an error.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => (default_config_path(), false),
    };
    if !path.exists() {
        if explicit {
            bail!("Config file {} does not exist", path.display());
        }
        return Ok(AppConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    parse_config(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::card::CardPriority;

    const SAMPLE: &str = r#"
log_level = "debug"

[board]
url = "https://kanban.example.com/api"
token = "secret"

[jira]
domain = "acme"
email = "bot@acme.io"
api_token = "t0k"

[[mappings]]
board_id = "101"
target_system = "jira"
project = "ENG"
polling_frequency_secs = 30
tag_cards_with_target_system_name = true
default_card_type = "Task"

[mappings.type_map]
Story = "Feature"

[mappings.priority_map]
Blocker = "Critical"

[[mappings.lanes]]
lane_id = "201"
states = ["Open", "Reopened"]

[[mappings.lanes]]
lane_id = "203"
states = ["In Progress>Resolved>Closed"]
"#;

    #[test]
    fn parses_full_config() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.log_level(), "debug");
        assert_eq!(config.board.as_ref().unwrap().date_format, "%Y-%m-%d");
        assert_eq!(config.mappings.len(), 1);

        let m = &config.mappings[0];
        assert!(m.update_cards);
        assert!(m.update_card_lanes);
        assert!(m.tag_cards_with_target_system_name);
        assert!(!m.create_remote_items);
        assert_eq!(m.type_map.get("Story").map(String::as_str), Some("Feature"));
        assert_eq!(m.priority_map.get("Blocker"), Some(&CardPriority::Critical));
        assert_eq!(m.lanes[0].lane_id, "201");
        assert_eq!(m.chains_for_lane("203")[0].len(), 3);
    }

    #[test]
    fn mapping_without_states_is_rejected() {
        let toml = r#"
[[mappings]]
board_id = "1"
target_system = "github"
project = "acme/app"
"#;
        let err = parse_config(toml).unwrap_err();
        assert!(err.to_string().contains("at least one lane"));
    }

    #[test]
    fn duplicate_lanes_are_rejected() {
        let toml = r#"
[[mappings]]
board_id = "1"
target_system = "github"
project = "acme/app"

[[mappings.lanes]]
lane_id = "5"
states = ["open"]

[[mappings.lanes]]
lane_id = "5"
states = ["closed"]
"#;
        let err = parse_config(toml).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn table_keys_differing_only_by_case_are_rejected() {
        let toml = r#"
[[mappings]]
board_id = "1"
target_system = "jira"
project = "ENG"

[mappings.type_map]
Bug = "Defect"
bug = "Task"

[[mappings.lanes]]
lane_id = "5"
states = ["Open"]
"#;
        let err = parse_config(toml).unwrap_err();
        assert!(err.to_string().contains("type_map has more than one entry"));
    }

    #[test]
    fn load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.jira.as_ref().unwrap().domain, "acme");
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("nope.toml")));
        assert!(result.is_err());
    }

    #[test]
    fn empty_config_has_defaults() {
        let config = parse_config("").unwrap();
        assert!(config.mappings.is_empty());
        assert_eq!(config.log_level(), "info");
    }
}
