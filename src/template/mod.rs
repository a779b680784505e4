//! 서버 템플릿 - 재사용 가능한 설정 프리셋 관리
//!
//! server_templates.json에 저장되며, 비어 있으면 기본 템플릿 4종을 시드합니다.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTemplate {
    pub name: String,
    pub description: String,
    pub config: BTreeMap<String, String>,
}

impl ServerTemplate {
    pub fn new(name: &str, description: &str, config: BTreeMap<String, String>) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            config,
        }
    }
}

fn template_config(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

/// 기본 제공 템플릿
fn default_templates() -> Vec<ServerTemplate> {
    vec![
        ServerTemplate::new(
            "Vanilla Survival",
            "Standard vanilla survival server",
            template_config(&[
                ("memory", "4G"),
                ("core", "server.jar"),
                ("motd", "Vanilla Survival - welcome!"),
                ("port", "25565"),
                ("max_players", "20"),
                ("view_distance", "10"),
                ("online_mode", "true"),
                ("difficulty", "normal"),
                ("gamemode", "survival"),
                ("pvp", "true"),
                ("spawn_protection", "16"),
                ("jvm_args", "-XX:+UseG1GC -XX:+UnlockExperimentalVMOptions"),
                ("server_args", "nogui"),
                ("level_seed", ""),
            ]),
        ),
        ServerTemplate::new(
            "Creative",
            "Creative mode server for building",
            template_config(&[
                ("memory", "2G"),
                ("core", "server.jar"),
                ("motd", "Creative - build freely!"),
                ("port", "25566"),
                ("max_players", "10"),
                ("view_distance", "12"),
                ("online_mode", "true"),
                ("difficulty", "peaceful"),
                ("gamemode", "creative"),
                ("pvp", "false"),
                ("spawn_protection", "0"),
                ("jvm_args", "-XX:+UseG1GC -XX:+UnlockExperimentalVMOptions"),
                ("server_args", "nogui"),
                ("level_seed", ""),
            ]),
        ),
        ServerTemplate::new(
            "Modded",
            "High-memory configuration for modded servers",
            template_config(&[
                ("memory", "8G"),
                ("core", "forge-server.jar"),
                ("motd", "Modded server - more to explore!"),
                ("port", "25567"),
                ("max_players", "15"),
                ("view_distance", "8"),
                ("online_mode", "true"),
                ("difficulty", "normal"),
                ("gamemode", "survival"),
                ("pvp", "true"),
                ("spawn_protection", "16"),
                ("jvm_args", "-XX:+UseG1GC -XX:+UnlockExperimentalVMOptions -XX:G1HeapRegionSize=32m"),
                ("server_args", "nogui"),
                ("level_seed", ""),
            ]),
        ),
        ServerTemplate::new(
            "Small Private",
            "Lightweight server for a few friends",
            template_config(&[
                ("memory", "1G"),
                ("core", "server.jar"),
                ("motd", "Private server - friends only"),
                ("port", "25568"),
                ("max_players", "5"),
                ("view_distance", "6"),
                ("online_mode", "false"),
                ("difficulty", "easy"),
                ("gamemode", "survival"),
                ("pvp", "false"),
                ("spawn_protection", "10"),
                ("jvm_args", "-XX:+UseG1GC"),
                ("server_args", "nogui"),
                ("level_seed", ""),
            ]),
        ),
    ]
}

/// 템플릿 저장소 - server_templates.json 관리
pub struct TemplateStore {
    file_path: PathBuf,
    templates: Vec<ServerTemplate>,
}

impl TemplateStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            templates: Vec::new(),
        }
    }

    /// 로드 후 비어 있으면 기본 템플릿 시드
    pub fn load(&mut self) -> Result<()> {
        if self.file_path.exists() {
            match fs::read_to_string(&self.file_path)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
            {
                Ok(templates) => self.templates = templates,
                Err(e) => {
                    tracing::warn!("Failed to load templates: {}, starting empty", e);
                    self.templates = Vec::new();
                }
            }
        }

        if self.templates.is_empty() {
            self.templates = default_templates();
            self.save()?;
            tracing::info!("Seeded {} default templates", self.templates.len());
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.templates)?;
        fs::write(&self.file_path, content)?;
        Ok(())
    }

    pub fn list(&self) -> &[ServerTemplate] {
        &self.templates
    }

    pub fn get(&self, name: &str) -> Option<&ServerTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.templates.iter().map(|t| t.name.clone()).collect()
    }

    /// 추가 — 동일 이름이 있으면 교체
    pub fn add(&mut self, template: ServerTemplate) -> Result<()> {
        self.templates.retain(|t| t.name != template.name);
        self.templates.push(template);
        self.save()
    }

    pub fn remove(&mut self, name: &str) -> Result<bool> {
        let before = self.templates.len();
        self.templates.retain(|t| t.name != name);
        let removed = self.templates.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }
}
