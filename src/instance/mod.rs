use crate::config::ServerConfig;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// 서버 인스턴스 - 사용자가 등록한 관리 대상 서버
///
/// 설정 자체는 인스턴스 작업 디렉토리의 `server_config.json`에 저장되고,
/// 레지스트리(servers.json)에는 식별 정보만 둡니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInstance {
    pub id: String,
    /// 사용자 지정 표시 이름 (예: "메인 생존 서버")
    pub name: String,
    /// 작업 디렉토리 — core jar, server.properties, eula.txt가 위치
    pub working_dir: PathBuf,
    #[serde(default)]
    pub created_at: u64,
}

impl ServerInstance {
    pub fn new(name: &str, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            working_dir: working_dir.into(),
            created_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.working_dir.join("server_config.json")
    }

    /// 인스턴스의 서버 설정 로드 (없으면 기본값으로 생성)
    pub fn config(&self) -> ServerConfig {
        ServerConfig::open(self.config_path())
    }
}

/// 인스턴스 저장소 - servers.json 관리
pub struct InstanceStore {
    file_path: PathBuf,
    instances: Vec<ServerInstance>,
}

impl InstanceStore {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            instances: Vec::new(),
        }
    }

    /// 파일에서 인스턴스 로드
    pub fn load(&mut self) -> Result<()> {
        if !self.file_path.exists() {
            tracing::info!("Instance registry does not exist yet, starting empty");
            self.instances = Vec::new();
            return Ok(());
        }

        let content = fs::read_to_string(&self.file_path)?;
        self.instances = serde_json::from_str(&content)?;
        tracing::info!("Loaded {} instances", self.instances.len());
        Ok(())
    }

    /// 파일에 인스턴스 저장
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.instances)?;
        fs::write(&self.file_path, content)?;
        tracing::info!("Saved {} instances", self.instances.len());
        Ok(())
    }

    /// Create a new instance: make its working directory, write the initial
    /// config (defaults overlaid with `initial_config`), register and persist.
    pub fn create(
        &mut self,
        name: &str,
        working_dir: Option<PathBuf>,
        initial_config: &BTreeMap<String, String>,
    ) -> Result<ServerInstance> {
        let mut instance = ServerInstance::new(name, PathBuf::new());
        let dir = working_dir
            .unwrap_or_else(|| crate::config::data_dir().join("servers").join(&instance.id));
        instance.working_dir = dir;

        fs::create_dir_all(&instance.working_dir)?;

        let mut config = instance.config();
        config.merge(initial_config);
        config.save()?;

        self.instances.push(instance.clone());
        self.save()?;
        Ok(instance)
    }

    /// 인스턴스 추가 (이미 구성된 인스턴스 등록)
    pub fn add(&mut self, instance: ServerInstance) -> Result<()> {
        self.instances.push(instance);
        self.save()?;
        Ok(())
    }

    /// 인스턴스 제거
    pub fn remove(&mut self, id: &str) -> Result<()> {
        self.instances.retain(|i| i.id != id);
        self.save()?;
        Ok(())
    }

    /// 인스턴스 조회
    pub fn get(&self, id: &str) -> Option<&ServerInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// 이름으로 조회
    pub fn get_by_name(&self, name: &str) -> Option<&ServerInstance> {
        self.instances.iter().find(|i| i.name == name)
    }

    /// 모든 인스턴스 조회
    pub fn list(&self) -> &[ServerInstance] {
        &self.instances
    }

    /// 인스턴스 업데이트
    pub fn update(&mut self, id: &str, instance: ServerInstance) -> Result<()> {
        if let Some(pos) = self.instances.iter().position(|i| i.id == id) {
            self.instances[pos] = instance;
            self.save()?;
            Ok(())
        } else {
            Err(anyhow::anyhow!("Instance not found: {}", id))
        }
    }
}

/// 작업 디렉토리 존재 여부 검사 — start 전 전제 조건
pub fn working_dir_exists(instance: &ServerInstance) -> bool {
    Path::new(&instance.working_dir).is_dir()
}
