//! 플레이어 관리 - 서버 디렉토리의 Mojang 리스트 파일과 로컬 데이터 병합
//!
//! whitelist.json / banned-players.json / ops.json은 서버가 소유하는 파일이라
//! 읽기만 하고, 우리가 기록하는 상태는 player_data.json에 둡니다. 실제 제재는
//! 콘솔 명령(kick/ban/op/...)으로 수행되고 supervisor의 stdin 채널을 탑니다.

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub username: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub display_name: String,
    /// Unix timestamp (seconds), 0 = unknown
    #[serde(default)]
    pub first_join: u64,
    #[serde(default)]
    pub last_seen: u64,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub is_op: bool,
    #[serde(default)]
    pub is_banned: bool,
    #[serde(default)]
    pub is_whitelisted: bool,
    #[serde(default)]
    pub ban_reason: String,
    /// banned-players.json의 expires 값 그대로, 또는 tempban 시 만료 시각(초)
    #[serde(default)]
    pub ban_expires: String,
}

impl PlayerInfo {
    fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            uuid: String::new(),
            display_name: username.to_string(),
            first_join: current_timestamp(),
            last_seen: 0,
            is_online: false,
            is_op: false,
            is_banned: false,
            is_whitelisted: false,
            ban_reason: String::new(),
            ban_expires: String::new(),
        }
    }
}

/// 서버 디렉토리 하나의 플레이어 명부
pub struct PlayerRoster {
    server_directory: PathBuf,
    players: BTreeMap<String, PlayerInfo>,
}

impl PlayerRoster {
    pub fn new(server_directory: &Path) -> Self {
        let mut roster = Self {
            server_directory: server_directory.to_path_buf(),
            players: BTreeMap::new(),
        };
        roster.load();
        roster
    }

    fn data_path(&self) -> PathBuf {
        self.server_directory.join("player_data.json")
    }

    /// 로컬 데이터 로드 후 서버 파일(whitelist/banned/ops) 병합
    pub fn load(&mut self) {
        self.players.clear();

        if let Ok(content) = fs::read_to_string(self.data_path()) {
            match serde_json::from_str::<BTreeMap<String, PlayerInfo>>(&content) {
                Ok(players) => self.players = players,
                Err(e) => tracing::warn!("Failed to parse player_data.json: {}", e),
            }
        }

        self.merge_name_list("whitelist.json", |p| p.is_whitelisted = true);
        self.merge_name_list("ops.json", |p| p.is_op = true);
        self.merge_banned();
    }

    pub fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.players)?;
        fs::write(self.data_path(), content)?;
        Ok(())
    }

    /// `[{"name": ..., "uuid": ...}]` 형태의 서버 리스트 파일 병합
    fn merge_name_list<F: Fn(&mut PlayerInfo)>(&mut self, file_name: &str, mark: F) {
        let path = self.server_directory.join(file_name);
        let Ok(content) = fs::read_to_string(&path) else { return };
        let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(&content) else {
            tracing::warn!("Failed to parse {}", file_name);
            return;
        };

        for entry in entries {
            let Some(name) = entry.get("name").and_then(|n| n.as_str()) else { continue };
            if name.is_empty() {
                continue;
            }
            let player = self.ensure_player(name);
            if let Some(uuid) = entry.get("uuid").and_then(|u| u.as_str()) {
                player.uuid = uuid.to_string();
            }
            mark(player);
        }
    }

    fn merge_banned(&mut self) {
        let path = self.server_directory.join("banned-players.json");
        let Ok(content) = fs::read_to_string(&path) else { return };
        let Ok(entries) = serde_json::from_str::<Vec<serde_json::Value>>(&content) else {
            tracing::warn!("Failed to parse banned-players.json");
            return;
        };

        for entry in entries {
            let Some(name) = entry.get("name").and_then(|n| n.as_str()) else { continue };
            if name.is_empty() {
                continue;
            }
            let player = self.ensure_player(name);
            player.is_banned = true;
            if let Some(uuid) = entry.get("uuid").and_then(|u| u.as_str()) {
                player.uuid = uuid.to_string();
            }
            if let Some(reason) = entry.get("reason").and_then(|r| r.as_str()) {
                player.ban_reason = reason.to_string();
            }
            if let Some(expires) = entry.get("expires").and_then(|e| e.as_str()) {
                player.ban_expires = expires.to_string();
            }
        }
    }

    /// 플레이어 엔트리 확보 (없으면 생성)
    pub fn ensure_player(&mut self, username: &str) -> &mut PlayerInfo {
        self.players
            .entry(username.to_string())
            .or_insert_with(|| PlayerInfo::new(username))
    }

    pub fn get(&self, username: &str) -> Option<&PlayerInfo> {
        self.players.get(username)
    }

    pub fn list(&self) -> Vec<&PlayerInfo> {
        self.players.values().collect()
    }

    pub fn search(&self, keyword: &str) -> Vec<&PlayerInfo> {
        let keyword = keyword.to_lowercase();
        self.players
            .values()
            .filter(|p| {
                p.username.to_lowercase().contains(&keyword)
                    || p.display_name.to_lowercase().contains(&keyword)
            })
            .collect()
    }

    // ── 제재 결과 기록 (명령 전송이 성공한 뒤 호출) ──────────

    pub fn record_ban(&mut self, username: &str, reason: &str, expires: Option<u64>) -> Result<()> {
        let player = self.ensure_player(username);
        player.is_banned = true;
        player.ban_reason = reason.to_string();
        player.ban_expires = expires.map(|e| e.to_string()).unwrap_or_default();
        self.save()
    }

    pub fn record_pardon(&mut self, username: &str) -> Result<()> {
        if let Some(player) = self.players.get_mut(username) {
            player.is_banned = false;
            player.ban_reason = String::new();
            player.ban_expires = String::new();
        }
        self.save()
    }

    pub fn record_op(&mut self, username: &str, is_op: bool) -> Result<()> {
        let player = self.ensure_player(username);
        player.is_op = is_op;
        self.save()
    }

    pub fn record_whitelist(&mut self, username: &str, whitelisted: bool) -> Result<()> {
        let player = self.ensure_player(username);
        player.is_whitelisted = whitelisted;
        self.save()
    }

    /// 플레이어 통계
    pub fn statistics(&self) -> serde_json::Value {
        let banned = self.players.values().filter(|p| p.is_banned).count();
        let ops = self.players.values().filter(|p| p.is_op).count();
        let whitelisted = self.players.values().filter(|p| p.is_whitelisted).count();

        serde_json::json!({
            "total_players": self.players.len(),
            "banned_players": banned,
            "op_players": ops,
            "whitelisted_players": whitelisted,
        })
    }
}

// ── 콘솔 명령 빌더 ───────────────────────────────────────────
// 명령 문자열은 그대로 stdin으로 전달된다 — 서버가 해석한다.

pub fn kick_command(username: &str, reason: &str) -> String {
    format!("kick {} {}", username, reason)
}

pub fn ban_command(username: &str, reason: &str, duration: Option<&str>) -> String {
    match duration {
        Some(d) => format!("tempban {} {} {}", username, d, reason),
        None => format!("ban {} {}", username, reason),
    }
}

pub fn pardon_command(username: &str) -> String {
    format!("pardon {}", username)
}

pub fn op_command(username: &str) -> String {
    format!("op {}", username)
}

pub fn deop_command(username: &str) -> String {
    format!("deop {}", username)
}

pub fn whitelist_command(username: &str, add: bool) -> String {
    format!("whitelist {} {}", if add { "add" } else { "remove" }, username)
}

pub fn tell_command(username: &str, message: &str) -> String {
    format!("tell {} {}", username, message)
}

pub fn say_command(message: &str) -> String {
    format!("say {}", message)
}

/// `1d` / `2h` / `30m` 형식의 제재 기간을 만료 시각(Unix 초)으로 변환.
/// 형식이 맞지 않으면 None (영구 제재로 취급).
pub fn ban_expiry_from_duration(duration: &str) -> Option<u64> {
    let re = Regex::new(r"^(\d+)([dhm])$").ok()?;
    let lowercase = duration.to_lowercase();
    let caps = re.captures(&lowercase)?;
    let amount: u64 = caps.get(1)?.as_str().parse().ok()?;
    let seconds = match caps.get(2)?.as_str() {
        "d" => amount * 86_400,
        "h" => amount * 3_600,
        "m" => amount * 60,
        _ => return None,
    };
    Some(current_timestamp() + seconds)
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

    #[test]
    fn test_merge_server_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("whitelist.json"),
            r#"[{"uuid": "u-1", "name": "alice"}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("ops.json"),
            r#"[{"uuid": "u-2", "name": "bob", "level": 4}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("banned-players.json"),
            r#"[{"uuid": "u-3", "name": "mallory", "reason": "griefing", "expires": "forever"}]"#,
        )
        .unwrap();

        let roster = PlayerRoster::new(dir.path());
        assert!(roster.get("alice").unwrap().is_whitelisted);
        assert_eq!(roster.get("alice").unwrap().uuid, "u-1");
        assert!(roster.get("bob").unwrap().is_op);
        let mallory = roster.get("mallory").unwrap();
        assert!(mallory.is_banned);
        assert_eq!(mallory.ban_reason, "griefing");
        assert_eq!(mallory.ban_expires, "forever");
    }

    #[test]
    fn test_local_data_round_trip() {
        let dir = tempdir().unwrap();
        let mut roster = PlayerRoster::new(dir.path());
        roster.record_ban("eve", "x-ray", None).unwrap();
        roster.record_op("alice", true).unwrap();

        let reloaded = PlayerRoster::new(dir.path());
        assert!(reloaded.get("eve").unwrap().is_banned);
        assert!(reloaded.get("alice").unwrap().is_op);
    }

    #[test]
    fn test_record_pardon_clears_ban() {
        let dir = tempdir().unwrap();
        let mut roster = PlayerRoster::new(dir.path());
        roster.record_ban("eve", "x-ray", Some(12345)).unwrap();
        assert_eq!(roster.get("eve").unwrap().ban_expires, "12345");

        roster.record_pardon("eve").unwrap();
        let eve = roster.get("eve").unwrap();
        assert!(!eve.is_banned);
        assert!(eve.ban_reason.is_empty());
    }

    #[test]
    fn test_command_builders() {
        assert_eq!(kick_command("alice", "afk"), "kick alice afk");
        assert_eq!(ban_command("eve", "x-ray", None), "ban eve x-ray");
        assert_eq!(ban_command("eve", "x-ray", Some("1d")), "tempban eve 1d x-ray");
        assert_eq!(pardon_command("eve"), "pardon eve");
        assert_eq!(whitelist_command("alice", true), "whitelist add alice");
        assert_eq!(whitelist_command("alice", false), "whitelist remove alice");
        assert_eq!(say_command("server restarting"), "say server restarting");
    }

    #[test]
    fn test_ban_expiry_parsing() {
        let now = current_timestamp();
        let d = ban_expiry_from_duration("1d").unwrap();
        assert!(d >= now + 86_399 && d <= now + 86_401);
        let h = ban_expiry_from_duration("2h").unwrap();
        assert!(h >= now + 7_199 && h <= now + 7_201);
        assert!(ban_expiry_from_duration("forever").is_none());
        assert!(ban_expiry_from_duration("10x").is_none());
        assert!(ban_expiry_from_duration("").is_none());
    }

    #[test]
    fn test_search_and_statistics() {
        let dir = tempdir().unwrap();
        let mut roster = PlayerRoster::new(dir.path());
        roster.record_op("alice", true).unwrap();
        roster.record_ban("mallory", "griefing", None).unwrap();
        roster.record_whitelist("bob", true).unwrap();

        assert_eq!(roster.search("al").len(), 2); // alice, mallory
        let stats = roster.statistics();
        assert_eq!(stats["total_players"], 3);
        assert_eq!(stats["op_players"], 1);
        assert_eq!(stats["banned_players"], 1);
        assert_eq!(stats["whitelisted_players"], 1);
    }
}
