//! Per-instance server configuration.
//!
//! A flat string-to-string map persisted as `server_config.json` inside the
//! instance working directory. Unknown keys are carried along untouched;
//! missing keys are backfilled from defaults on load.

use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 인식되는 설정 키와 기본값.
///
/// `memory`/`core`/`jvm_args`/`server_args`는 기동 커맨드에,
/// 나머지는 server.properties 생성에 사용됩니다.
pub const DEFAULT_CONFIG: &[(&str, &str)] = &[
    ("memory", "2G"),
    ("core", "server.jar"),
    ("motd", "A Minecraft Server"),
    ("port", "25565"),
    ("max_players", "20"),
    ("view_distance", "10"),
    ("online_mode", "true"),
    ("jvm_args", "-XX:+UseG1GC -XX:+UnlockExperimentalVMOptions"),
    ("server_args", "nogui"),
    ("level_seed", ""),
    ("difficulty", "easy"),
    ("gamemode", "survival"),
    ("pvp", "true"),
    ("spawn_protection", "16"),
];

fn default_value(key: &str) -> Option<&'static str> {
    DEFAULT_CONFIG.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    file_path: PathBuf,
    values: BTreeMap<String, String>,
}

impl ServerConfig {
    /// 기본값만 채운 설정 맵
    pub fn defaults() -> BTreeMap<String, String> {
        DEFAULT_CONFIG
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Load the config file at `file_path`, creating it with defaults when absent.
    ///
    /// A file that exists but fails to parse is treated as absent (and logged),
    /// matching the defaults-on-corruption behavior of the stores elsewhere.
    pub fn open(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let mut values = Self::defaults();

        if file_path.exists() {
            match fs::read_to_string(&file_path) {
                Ok(content) => match serde_json::from_str::<BTreeMap<String, String>>(&content) {
                    Ok(loaded) => {
                        // 저장된 값으로 덮어쓰되, 빠진 키는 기본값 유지 (backfill)
                        for (k, v) in loaded {
                            values.insert(k, v);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse {}: {}, using defaults", file_path.display(), e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read {}: {}, using defaults", file_path.display(), e);
                }
            }
        }

        Self { file_path, values }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.values)?;
        fs::write(&self.file_path, content)?;
        Ok(())
    }

    /// Get a config value, falling back to the default for recognized keys
    /// and to the empty string otherwise.
    pub fn get(&self, key: &str) -> &str {
        self.values
            .get(key)
            .map(String::as_str)
            .or_else(|| default_value(key))
            .unwrap_or("")
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// 여러 키를 한 번에 덮어쓰기
    pub fn merge(&mut self, overrides: &BTreeMap<String, String>) {
        for (k, v) in overrides {
            self.values.insert(k.clone(), v.clone());
        }
    }

    pub fn values(&self) -> &BTreeMap<String, String> {
        &self.values
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}
