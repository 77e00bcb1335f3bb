use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Service configuration, loaded from a TOML file. The driver receives this
/// explicitly; there is no module-level state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub gmail: GmailConfig,

    #[serde(default)]
    pub elastic: ElasticConfig,

    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    /// Path to the Google OAuth client-secret JSON file
    pub credentials_path: PathBuf,

    /// Path where the OAuth token cache is persisted between runs
    #[serde(default = "default_token_cache")]
    pub token_cache_path: PathBuf,

    /// Gmail search query that finds the export messages
    #[serde(default = "default_query")]
    pub query: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticConfig {
    /// Base URL of the Elasticsearch node
    #[serde(default = "default_elastic_url")]
    pub url: String,

    /// Basic-auth username; empty means no authentication
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Index the workout sets are written to
    #[serde(default = "default_index")]
    pub index_name: String,

    #[serde(default = "default_doc_type")]
    pub doc_type: String,

    /// Directory attachments are downloaded into; fully consumed and deleted
    /// within one run
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// Day window: only sets newer than this many days are indexed.
    /// 0 means the full history. The `--days` flag overrides this.
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_token_cache() -> PathBuf {
    PathBuf::from("token_cache.json")
}

fn default_query() -> String {
    "fitbod".to_string()
}

fn default_elastic_url() -> String {
    "http://127.0.0.1:9201".to_string()
}

fn default_timeout() -> f64 {
    30.0
}

fn default_index() -> String {
    "fitbod-2".to_string()
}

fn default_doc_type() -> String {
    "workout_sets".to_string()
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("/tmp/fitbod2elastic")
}

fn default_days() -> u32 {
    7
}

impl Default for ElasticConfig {
    fn default() -> Self {
        ElasticConfig {
            url: default_elastic_url(),
            username: String::new(),
            password: String::new(),
            timeout_seconds: default_timeout(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            index_name: default_index(),
            doc_type: default_doc_type(),
            temp_dir: default_temp_dir(),
            days: default_days(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn example() -> Self {
        Config {
            gmail: GmailConfig {
                credentials_path: PathBuf::from("credentials.json"),
                token_cache_path: default_token_cache(),
                query: default_query(),
            },
            elastic: ElasticConfig::default(),
            ingest: IngestConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [gmail]
            credentials_path = "credentials.json"
            "#,
        )
        .expect("parse minimal config");

        assert_eq!(config.gmail.query, "fitbod");
        assert_eq!(config.elastic.url, "http://127.0.0.1:9201");
        assert!(config.elastic.username.is_empty());
        assert_eq!(config.ingest.index_name, "fitbod-2");
        assert_eq!(config.ingest.doc_type, "workout_sets");
        assert_eq!(config.ingest.temp_dir, PathBuf::from("/tmp/fitbod2elastic"));
        assert_eq!(config.ingest.days, 7);
    }

    #[test]
    fn example_config_round_trips_through_toml() {
        let example = Config::example();
        let serialized = toml::to_string_pretty(&example).expect("serialize");
        let parsed: Config = toml::from_str(&serialized).expect("reparse");
        assert_eq!(parsed.ingest.index_name, example.ingest.index_name);
        assert_eq!(parsed.gmail.query, example.gmail.query);
    }

    #[test]
    fn explicit_values_win_over_defaults() {
        let config: Config = toml::from_str(
            r#"
            [gmail]
            credentials_path = "secrets/google.json"
            query = "from:fitbod subject:export"

            [ingest]
            days = 0
            index_name = "fitbod-test"
            "#,
        )
        .expect("parse");

        assert_eq!(config.gmail.query, "from:fitbod subject:export");
        assert_eq!(config.ingest.days, 0);
        assert_eq!(config.ingest.index_name, "fitbod-test");
    }
}
