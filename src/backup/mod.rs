//! 인스턴스 백업 - 작업 디렉토리를 zip으로 스냅샷
//!
//! 백업 원장은 backups.json에 저장됩니다. 로그/캐시 파일은 아카이브에서
//! 제외하며, 서버당 보관 개수를 초과하는 오래된 백업은 정리합니다.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::{DirEntry, WalkDir};
use zip::{write::FileOptions, CompressionMethod, ZipArchive, ZipWriter};

/// 아카이브에서 제외하는 디렉토리
const SKIP_DIRS: &[&str] = &["logs", "cache", ".git"];
/// 아카이브에서 제외하는 파일 확장 패턴
const SKIP_SUFFIXES: &[&str] = &[".log", ".log.gz", ".tmp"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupInfo {
    pub backup_id: String,
    pub server_id: String,
    pub server_name: String,
    /// Unix timestamp (seconds)
    pub backup_time: u64,
    pub backup_size: u64,
    pub backup_path: PathBuf,
    /// "manual" 또는 "auto"
    pub backup_type: String,
    #[serde(default)]
    pub description: String,
}

/// 백업 저장소 - backups.json 원장 + zip 파일 관리
pub struct BackupStore {
    backup_dir: PathBuf,
    backups: Vec<BackupInfo>,
    max_per_server: usize,
}

impl BackupStore {
    pub fn new(backup_dir: impl Into<PathBuf>, max_per_server: usize) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            backups: Vec::new(),
            max_per_server,
        }
    }

    fn ledger_path(&self) -> PathBuf {
        self.backup_dir.join("backups.json")
    }

    pub fn load(&mut self) -> Result<()> {
        fs::create_dir_all(&self.backup_dir)?;
        let path = self.ledger_path();
        if !path.exists() {
            self.backups = Vec::new();
            return Ok(());
        }
        match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|s| serde_json::from_str(&s).map_err(anyhow::Error::from))
        {
            Ok(backups) => self.backups = backups,
            Err(e) => {
                tracing::warn!("Failed to load backup ledger: {}, starting empty", e);
                self.backups = Vec::new();
            }
        }
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.backup_dir)?;
        let content = serde_json::to_string_pretty(&self.backups)?;
        fs::write(self.ledger_path(), content)?;
        Ok(())
    }

    /// Create a zip snapshot of `server_dir` and record it in the ledger.
    ///
    /// 호출자는 인스턴스가 Stopped 상태인지 먼저 확인해야 한다 — 실행 중인
    /// 월드 디렉토리를 압축하면 일관성이 깨진다.
    pub fn create_backup(
        &mut self,
        server_id: &str,
        server_name: &str,
        server_dir: &Path,
        backup_type: &str,
        description: &str,
    ) -> Result<BackupInfo> {
        let timestamp = current_timestamp();
        let backup_id = format!("{}_{}", server_id, timestamp);
        let backup_path = self.backup_dir.join(format!("{}.zip", backup_id));

        fs::create_dir_all(&self.backup_dir)?;
        archive_dir(server_dir, &backup_path)
            .with_context(|| format!("Failed to archive {}", server_dir.display()))?;

        let backup_size = fs::metadata(&backup_path)?.len();

        let info = BackupInfo {
            backup_id,
            server_id: server_id.to_string(),
            server_name: server_name.to_string(),
            backup_time: timestamp,
            backup_size,
            backup_path,
            backup_type: backup_type.to_string(),
            description: description.to_string(),
        };

        tracing::info!(
            "Created {} backup '{}' ({})",
            backup_type,
            info.backup_id,
            crate::utils::format_size(backup_size)
        );

        self.backups.push(info.clone());
        self.save()?;
        self.cleanup_old(server_id)?;

        Ok(info)
    }

    /// Restore a backup into `target_dir`, replacing its current contents.
    pub fn restore_backup(&self, backup_id: &str, target_dir: &Path) -> Result<()> {
        let info = self
            .get(backup_id)
            .ok_or_else(|| anyhow::anyhow!("Backup not found: {}", backup_id))?;
        if !info.backup_path.exists() {
            return Err(anyhow::anyhow!(
                "Backup archive missing: {}",
                info.backup_path.display()
            ));
        }

        // 대상 디렉토리를 비우고 풀어놓는다
        if target_dir.exists() {
            fs::remove_dir_all(target_dir)?;
        }
        fs::create_dir_all(target_dir)?;

        extract_zip(File::open(&info.backup_path)?, target_dir)?;
        tracing::info!("Restored backup '{}' into {}", backup_id, target_dir.display());
        Ok(())
    }

    /// 백업 삭제 (아카이브 + 원장 엔트리)
    pub fn delete_backup(&mut self, backup_id: &str) -> Result<bool> {
        let Some(info) = self.get(backup_id).cloned() else {
            return Ok(false);
        };

        if info.backup_path.exists() {
            fs::remove_file(&info.backup_path)?;
        }
        self.backups.retain(|b| b.backup_id != backup_id);
        self.save()?;
        Ok(true)
    }

    pub fn get(&self, backup_id: &str) -> Option<&BackupInfo> {
        self.backups.iter().find(|b| b.backup_id == backup_id)
    }

    /// 모든 백업, 최신순
    pub fn list(&self) -> Vec<BackupInfo> {
        let mut all = self.backups.clone();
        all.sort_by(|a, b| b.backup_time.cmp(&a.backup_time));
        all
    }

    /// 특정 서버의 백업, 최신순
    pub fn list_for_server(&self, server_id: &str) -> Vec<BackupInfo> {
        self.list()
            .into_iter()
            .filter(|b| b.server_id == server_id)
            .collect()
    }

    /// 보관 개수를 초과한 오래된 백업 정리
    fn cleanup_old(&mut self, server_id: &str) -> Result<()> {
        let server_backups = self.list_for_server(server_id);
        if server_backups.len() > self.max_per_server {
            for old in &server_backups[self.max_per_server..] {
                tracing::info!("Pruning old backup '{}'", old.backup_id);
                self.delete_backup(&old.backup_id)?;
            }
        }
        Ok(())
    }

    /// 백업 통계
    pub fn statistics(&self) -> serde_json::Value {
        let total_size: u64 = self.backups.iter().map(|b| b.backup_size).sum();
        let mut per_server = serde_json::Map::new();
        for backup in &self.backups {
            let entry = per_server
                .entry(backup.server_id.clone())
                .or_insert_with(|| serde_json::json!({ "count": 0, "size": 0, "latest": 0 }));
            entry["count"] = (entry["count"].as_u64().unwrap_or(0) + 1).into();
            entry["size"] = (entry["size"].as_u64().unwrap_or(0) + backup.backup_size).into();
            if backup.backup_time > entry["latest"].as_u64().unwrap_or(0) {
                entry["latest"] = backup.backup_time.into();
            }
        }

        serde_json::json!({
            "total_backups": self.backups.len(),
            "total_size": total_size,
            "total_size_human": crate::utils::format_size(total_size),
            "server_stats": per_server,
        })
    }
}

/// 디렉토리를 zip으로 아카이브 (로그/캐시 제외)
fn archive_dir(src_dir: &Path, zip_path: &Path) -> Result<()> {
    let file = File::create(zip_path)?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let walker = WalkDir::new(src_dir)
        .into_iter()
        .filter_entry(|e| !is_skipped_dir(e));

    let mut buffer = Vec::new();
    for entry in walker.filter_map(|e| e.ok()) {
        let path = entry.path();
        let name = path.strip_prefix(src_dir)?;
        let name_str = name.to_string_lossy().replace('\\', "/");

        if path.is_file() {
            if SKIP_SUFFIXES.iter().any(|suffix| name_str.ends_with(suffix)) {
                continue;
            }
            zip.start_file(name_str, options)?;
            let mut f = File::open(path)?;
            f.read_to_end(&mut buffer)?;
            zip.write_all(&buffer)?;
            buffer.clear();
        } else if !name.as_os_str().is_empty() {
            zip.add_directory(name_str, options)?;
        }
    }

    zip.finish()?;
    Ok(())
}

/// zip 아카이브를 디렉토리로 추출
fn extract_zip(zip_file: File, out_dir: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(zip_file)?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let outpath = match file.enclosed_name() {
            Some(path) => out_dir.join(path),
            None => continue,
        };

        if file.name().ends_with('/') {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(p) = outpath.parent() {
                if !p.exists() {
                    fs::create_dir_all(p)?;
                }
            }
            let mut outfile = File::create(&outpath)?;
            std::io::copy(&mut file, &mut outfile)?;
        }
    }

    Ok(())
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .map(|name| SKIP_DIRS.contains(&name))
            .unwrap_or(false)
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_server_dir(root: &Path) -> PathBuf {
        let dir = root.join("server");
        fs::create_dir_all(dir.join("world")).unwrap();
        fs::create_dir_all(dir.join("logs")).unwrap();
        fs::write(dir.join("server.properties"), "motd=test\n").unwrap();
        fs::write(dir.join("world/level.dat"), b"data").unwrap();
        fs::write(dir.join("logs/latest.log"), "noise").unwrap();
        fs::write(dir.join("debug.tmp"), "scratch").unwrap();
        dir
    }

    #[test]
    fn test_create_backup_filters_and_ledger() {
        let root = tempdir().unwrap();
        let server_dir = make_server_dir(root.path());

        let mut store = BackupStore::new(root.path().join("backups"), 10);
        store.load().unwrap();

        let info = store
            .create_backup("srv-1", "main", &server_dir, "manual", "before update")
            .unwrap();
        assert!(info.backup_path.exists());
        assert!(info.backup_size > 0);

        // 아카이브 내용 확인: logs/와 *.tmp는 없어야 함
        let mut archive = ZipArchive::new(File::open(&info.backup_path).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.iter().any(|n| n == "server.properties"));
        assert!(names.iter().any(|n| n == "world/level.dat"));
        assert!(!names.iter().any(|n| n.starts_with("logs")));
        assert!(!names.iter().any(|n| n.ends_with(".tmp")));

        assert_eq!(store.list_for_server("srv-1").len(), 1);
    }

    #[test]
    fn test_restore_round_trip() {
        let root = tempdir().unwrap();
        let server_dir = make_server_dir(root.path());

        let mut store = BackupStore::new(root.path().join("backups"), 10);
        store.load().unwrap();
        let info = store
            .create_backup("srv-1", "main", &server_dir, "manual", "")
            .unwrap();

        let target = root.path().join("restored");
        store.restore_backup(&info.backup_id, &target).unwrap();

        assert_eq!(fs::read_to_string(target.join("server.properties")).unwrap(), "motd=test\n");
        assert_eq!(fs::read(target.join("world/level.dat")).unwrap(), b"data");
        assert!(!target.join("logs").exists());
    }

    #[test]
    fn test_delete_backup() {
        let root = tempdir().unwrap();
        let server_dir = make_server_dir(root.path());

        let mut store = BackupStore::new(root.path().join("backups"), 10);
        store.load().unwrap();
        let info = store
            .create_backup("srv-1", "main", &server_dir, "manual", "")
            .unwrap();

        assert!(store.delete_backup(&info.backup_id).unwrap());
        assert!(!info.backup_path.exists());
        assert!(!store.delete_backup(&info.backup_id).unwrap());
    }

    #[test]
    fn test_retention_cap() {
        let root = tempdir().unwrap();
        let server_dir = make_server_dir(root.path());

        let mut store = BackupStore::new(root.path().join("backups"), 2);
        store.load().unwrap();

        // backup_id는 초 단위 타임스탬프 기반이라 루프에서 겹치지 않게 직접 밀어넣음
        for i in 0..4u64 {
            let backup_path = store.backup_dir.join(format!("srv-1_{}.zip", i));
            archive_dir(&server_dir, &backup_path).unwrap();
            store.backups.push(BackupInfo {
                backup_id: format!("srv-1_{}", i),
                server_id: "srv-1".to_string(),
                server_name: "main".to_string(),
                backup_time: 1000 + i,
                backup_size: 1,
                backup_path,
                backup_type: "auto".to_string(),
                description: String::new(),
            });
        }
        store.cleanup_old("srv-1").unwrap();

        let remaining = store.list_for_server("srv-1");
        assert_eq!(remaining.len(), 2);
        // 최신 2개만 남아야 함
        assert_eq!(remaining[0].backup_time, 1003);
        assert_eq!(remaining[1].backup_time, 1002);
    }

    #[test]
    fn test_statistics() {
        let root = tempdir().unwrap();
        let server_dir = make_server_dir(root.path());

        let mut store = BackupStore::new(root.path().join("backups"), 10);
        store.load().unwrap();
        store
            .create_backup("srv-1", "main", &server_dir, "manual", "")
            .unwrap();

        let stats = store.statistics();
        assert_eq!(stats["total_backups"], 1);
        assert!(stats["total_size"].as_u64().unwrap() > 0);
        assert!(stats["server_stats"]["srv-1"]["count"].as_u64().unwrap() == 1);
    }

    #[test]
    fn test_restore_unknown_backup_errors() {
        let root = tempdir().unwrap();
        let mut store = BackupStore::new(root.path().join("backups"), 10);
        store.load().unwrap();
        assert!(store.restore_backup("ghost", &root.path().join("x")).is_err());
    }
}
