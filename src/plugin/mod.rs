//! 플러그인 관리 - plugins/ 디렉토리의 jar 스캔, 카탈로그, 다운로드 설치
//!
//! 설치된 플러그인 메타데이터는 jar 내부의 plugin.yml에서 읽습니다.
//! 사용 가능한 플러그인 카탈로그는 plugin_cache.json에 캐시됩니다.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub download_url: String,
    #[serde(default)]
    pub installed: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

/// 기본 제공 카탈로그 — 널리 쓰이는 Bukkit/Spigot 플러그인
fn default_catalog() -> Vec<PluginInfo> {
    let entry = |name: &str, version: &str, description: &str, author: &str, file_name: &str, url: &str, deps: &[&str]| PluginInfo {
        name: name.to_string(),
        version: version.to_string(),
        description: description.to_string(),
        author: author.to_string(),
        file_name: file_name.to_string(),
        file_size: 0,
        download_url: url.to_string(),
        installed: false,
        enabled: true,
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    };

    vec![
        entry(
            "EssentialsX",
            "2.20.1",
            "Core server utilities: homes, warps, economy",
            "EssentialsX Team",
            "EssentialsX-2.20.1.jar",
            "https://github.com/EssentialsX/Essentials/releases/download/2.20.1/EssentialsX-2.20.1.jar",
            &[],
        ),
        entry(
            "WorldEdit",
            "7.2.15",
            "In-game world editing tools",
            "sk89q",
            "worldedit-bukkit-7.2.15.jar",
            "https://dev.bukkit.org/projects/worldedit/files/latest",
            &[],
        ),
        entry(
            "WorldGuard",
            "7.0.9",
            "Region protection",
            "sk89q",
            "worldguard-bukkit-7.0.9.jar",
            "https://dev.bukkit.org/projects/worldguard/files/latest",
            &["WorldEdit"],
        ),
        entry(
            "LuckPerms",
            "5.4.102",
            "Permissions management",
            "Luck",
            "LuckPerms-Bukkit-5.4.102.jar",
            "https://download.luckperms.net/1515/bukkit/loader/LuckPerms-Bukkit-5.4.102.jar",
            &[],
        ),
        entry(
            "Vault",
            "1.7.3",
            "Economy/permissions API",
            "MilkBowl",
            "Vault.jar",
            "https://dev.bukkit.org/projects/vault/files/latest",
            &[],
        ),
    ]
}

/// 서버 디렉토리 하나의 플러그인 관리자
pub struct PluginManager {
    plugins_directory: PathBuf,
    cache_file: PathBuf,
    installed: Vec<PluginInfo>,
    available: Vec<PluginInfo>,
}

impl PluginManager {
    pub fn new(server_directory: &Path) -> Result<Self> {
        let plugins_directory = server_directory.join("plugins");
        fs::create_dir_all(&plugins_directory)?;

        let mut manager = Self {
            cache_file: server_directory.join("plugin_cache.json"),
            plugins_directory,
            installed: Vec::new(),
            available: Vec::new(),
        };
        manager.scan_installed()?;
        manager.load_catalog()?;
        Ok(manager)
    }

    /// plugins/*.jar 스캔하여 설치 목록 재구축
    pub fn scan_installed(&mut self) -> Result<()> {
        self.installed.clear();

        let pattern = format!("{}/*.jar", self.plugins_directory.display());
        for path in glob::glob(&pattern)?.filter_map(|p| p.ok()) {
            if let Some(mut info) = plugin_info_from_jar(&path) {
                info.installed = true;
                self.installed.push(info);
            }
        }

        // 비활성화된 jar (.jar.disabled)도 목록에 포함
        let disabled_pattern = format!("{}/*.jar.disabled", self.plugins_directory.display());
        for path in glob::glob(&disabled_pattern)?.filter_map(|p| p.ok()) {
            if let Some(mut info) = plugin_info_from_jar(&path) {
                info.installed = true;
                info.enabled = false;
                info.file_name = info.file_name.trim_end_matches(".disabled").to_string();
                self.installed.push(info);
            }
        }

        tracing::debug!("Found {} installed plugins", self.installed.len());
        Ok(())
    }

    /// 카탈로그 로드 — 캐시가 있으면 캐시, 없으면 기본 목록 생성
    fn load_catalog(&mut self) -> Result<()> {
        if self.cache_file.exists() {
            match fs::read_to_string(&self.cache_file)
                .map_err(anyhow::Error::from)
                .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
            {
                Ok(catalog) => {
                    self.available = catalog;
                    return Ok(());
                }
                Err(e) => tracing::warn!("Failed to load plugin cache: {}", e),
            }
        }

        self.available = default_catalog();
        self.save_catalog()?;
        Ok(())
    }

    fn save_catalog(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.available)?;
        fs::write(&self.cache_file, content)?;
        Ok(())
    }

    pub fn installed(&self) -> &[PluginInfo] {
        &self.installed
    }

    pub fn available(&self) -> &[PluginInfo] {
        &self.available
    }

    pub fn is_installed(&self, plugin_name: &str) -> bool {
        self.installed.iter().any(|p| p.name == plugin_name)
    }

    /// Install a plugin from the catalog: dependency check, HTTP download to a
    /// temp file, then persist into plugins/.
    pub async fn install(&mut self, plugin_name: &str) -> Result<PluginInfo> {
        if self.is_installed(plugin_name) {
            return Err(anyhow::anyhow!("Plugin '{}' is already installed", plugin_name));
        }

        let plugin = self
            .available
            .iter()
            .find(|p| p.name == plugin_name)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Plugin '{}' not in catalog", plugin_name))?;

        for dep in &plugin.dependencies {
            if !self.is_installed(dep) {
                return Err(anyhow::anyhow!(
                    "Missing dependency '{}' for plugin '{}'",
                    dep,
                    plugin.name
                ));
            }
        }

        if plugin.download_url.is_empty() {
            return Err(anyhow::anyhow!("Plugin '{}' has no download URL", plugin.name));
        }

        let target = self.plugins_directory.join(&plugin.file_name);
        download_file(&plugin.download_url, &target).await?;

        let mut installed = plugin.clone();
        installed.installed = true;
        installed.file_size = fs::metadata(&target).map(|m| m.len()).unwrap_or(0);
        self.installed.push(installed.clone());

        tracing::info!("Installed plugin '{}' v{}", installed.name, installed.version);
        Ok(installed)
    }

    /// 플러그인 제거 (jar 삭제)
    pub fn uninstall(&mut self, plugin_name: &str) -> Result<bool> {
        let Some(plugin) = self.installed.iter().find(|p| p.name == plugin_name).cloned() else {
            return Ok(false);
        };

        let jar = self.plugins_directory.join(&plugin.file_name);
        if jar.exists() {
            fs::remove_file(&jar)?;
        }
        let disabled = self.plugins_directory.join(format!("{}.disabled", plugin.file_name));
        if disabled.exists() {
            fs::remove_file(&disabled)?;
        }

        self.installed.retain(|p| p.name != plugin_name);
        tracing::info!("Uninstalled plugin '{}'", plugin_name);
        Ok(true)
    }

    /// jar → jar.disabled 리네임으로 비활성화
    pub fn disable(&mut self, plugin_name: &str) -> Result<bool> {
        let Some(plugin) = self.installed.iter_mut().find(|p| p.name == plugin_name) else {
            return Ok(false);
        };

        let jar = self.plugins_directory.join(&plugin.file_name);
        if jar.exists() {
            fs::rename(&jar, self.plugins_directory.join(format!("{}.disabled", plugin.file_name)))?;
        }
        plugin.enabled = false;
        Ok(true)
    }

    /// jar.disabled → jar 리네임으로 재활성화
    pub fn enable(&mut self, plugin_name: &str) -> Result<bool> {
        let Some(plugin) = self.installed.iter_mut().find(|p| p.name == plugin_name) else {
            return Ok(false);
        };

        let disabled = self.plugins_directory.join(format!("{}.disabled", plugin.file_name));
        if disabled.exists() {
            fs::rename(&disabled, self.plugins_directory.join(&plugin.file_name))?;
        }
        plugin.enabled = true;
        Ok(true)
    }

    /// 이름/설명/제작자에 대한 키워드 검색 (카탈로그 대상)
    pub fn search(&self, keyword: &str) -> Vec<PluginInfo> {
        let keyword = keyword.to_lowercase();
        self.available
            .iter()
            .filter(|p| {
                p.name.to_lowercase().contains(&keyword)
                    || p.description.to_lowercase().contains(&keyword)
                    || p.author.to_lowercase().contains(&keyword)
            })
            .cloned()
            .collect()
    }

    /// 플러그인 통계
    pub fn statistics(&self) -> serde_json::Value {
        let enabled = self.installed.iter().filter(|p| p.enabled).count();
        let total_size: u64 = self.installed.iter().map(|p| p.file_size).sum();

        serde_json::json!({
            "total_installed": self.installed.len(),
            "enabled_count": enabled,
            "disabled_count": self.installed.len() - enabled,
            "total_size": total_size,
            "total_size_human": crate::utils::format_size(total_size),
        })
    }
}

/// jar 파일에서 플러그인 메타데이터 추출.
///
/// plugin.yml의 평탄한 최상위 키(name/version/description/author/depend)만
/// 읽습니다 — 전체 YAML 파서는 필요하지 않음. plugin.yml이 없으면 파일명에서
/// 이름을 유도합니다.
fn plugin_info_from_jar(jar_path: &Path) -> Option<PluginInfo> {
    let file_name = jar_path.file_name()?.to_str()?.to_string();
    let stem = file_name.trim_end_matches(".disabled").trim_end_matches(".jar");

    let mut info = PluginInfo {
        name: stem.to_string(),
        version: "unknown".to_string(),
        description: String::new(),
        author: String::new(),
        file_name: file_name.clone(),
        file_size: fs::metadata(jar_path).map(|m| m.len()).unwrap_or(0),
        download_url: String::new(),
        installed: false,
        enabled: true,
        dependencies: Vec::new(),
    };

    if let Ok(file) = File::open(jar_path) {
        if let Ok(mut archive) = zip::ZipArchive::new(file) {
            if let Ok(mut entry) = archive.by_name("plugin.yml") {
                let mut content = String::new();
                if entry.read_to_string(&mut content).is_ok() {
                    apply_plugin_yml(&mut info, &content);
                }
            }
        }
    }

    Some(info)
}

fn apply_plugin_yml(info: &mut PluginInfo, content: &str) {
    for line in content.lines() {
        // 들여쓰기된 라인은 중첩 구조 — 최상위 키만 취급
        if line.starts_with(' ') || line.starts_with('\t') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else { continue };
        let value = value.trim().trim_matches('"').trim_matches('\'');
        match key.trim() {
            "name" if !value.is_empty() => info.name = value.to_string(),
            "version" if !value.is_empty() => info.version = value.to_string(),
            "description" => info.description = value.to_string(),
            "author" => info.author = value.to_string(),
            "depend" => info.dependencies = parse_yaml_list(value),
            _ => {}
        }
    }
}

/// `[A, B]` 형태의 인라인 리스트 파싱
fn parse_yaml_list(value: &str) -> Vec<String> {
    value
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// URL에서 파일 다운로드 — 임시 파일에 받은 뒤 제자리로 이동.
/// 실패 시 부분 파일이 남지 않는다.
async fn download_file(url: &str, target: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("Failed to download {}", url))?
        .error_for_status()
        .with_context(|| format!("Download rejected for {}", url))?;

    let bytes = response.bytes().await?;

    let dir = target
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Invalid target path: {}", target.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(&bytes)?;
    tmp.persist(target)
        .map_err(|e| anyhow::anyhow!("Failed to persist download: {}", e))?;

    Ok(())
}
