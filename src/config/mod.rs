pub mod server;

pub use server::ServerConfig;

use serde::Deserialize;
use std::path::PathBuf;

/// 데몬 전역 설정 — config/global.toml
///
/// 파일이 없거나 파싱에 실패하면 기본값으로 동작합니다.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    /// IPC HTTP 서버 바인드 주소
    pub listen_addr: String,
    /// 프로세스 상태 폴링 주기 (초)
    pub poll_interval_secs: u64,
    /// graceful stop 대기 시간 (초) — 초과 시 강제 종료로 전환
    pub stop_grace_secs: u64,
    /// 콘솔 링 버퍼 최대 라인 수
    pub log_buffer_size: usize,
    pub backup: BackupSettings,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackupSettings {
    /// 백업 저장 디렉토리
    pub dir: String,
    /// 서버당 보관할 최대 백업 개수
    pub max_per_server: usize,
    /// 자동 백업 활성화 여부
    pub auto_enabled: bool,
    /// 자동 백업 주기 (초)
    pub auto_interval_secs: u64,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:57575".to_string(),
            poll_interval_secs: 1,
            stop_grace_secs: 30,
            log_buffer_size: 10_000,
            backup: BackupSettings::default(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            dir: "backups".to_string(),
            max_per_server: 10,
            auto_enabled: false,
            auto_interval_secs: 3600,
        }
    }
}

impl GlobalConfig {
    pub fn load() -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(data_dir().join("config/global.toml")).unwrap_or_default();
        let cfg: Self = toml::from_str(&s).unwrap_or_default();
        Ok(cfg)
    }
}

/// 데몬 데이터 디렉토리 (servers.json, 템플릿, 백업 등의 기준 경로).
///
/// `CRAFT_DATA_DIR` 환경 변수가 설정되면 해당 경로를 우선 사용합니다 (테스트/개발용).
/// 기본값은 현재 작업 디렉토리입니다.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CRAFT_DATA_DIR") {
        let p = PathBuf::from(&dir);
        if !p.exists() {
            let _ = std::fs::create_dir_all(&p);
        }
        return p;
    }
    PathBuf::from(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = GlobalConfig::default();
        assert_eq!(cfg.poll_interval_secs, 1);
        assert_eq!(cfg.stop_grace_secs, 30);
        assert_eq!(cfg.backup.max_per_server, 10);
    }

    #[test]
    fn test_parse_partial_toml() {
        // 일부 키만 지정해도 나머지는 기본값으로 채워져야 함
        let cfg: GlobalConfig = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:6000"
            [backup]
            max_per_server = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:6000");
        assert_eq!(cfg.poll_interval_secs, 1);
        assert_eq!(cfg.backup.max_per_server, 3);
        assert!(!cfg.backup.auto_enabled);
    }

    #[test]
    fn test_garbage_toml_falls_back_to_defaults() {
        let s = "this is { not toml";
        let cfg: GlobalConfig = toml::from_str(s).unwrap_or_default();
        assert_eq!(cfg.listen_addr, "127.0.0.1:57575");
    }
}
