use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use anyhow::Result;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("no tracked process for instance '{instance}'")]
    NotFound { instance: String },
    #[error("failed to terminate process: {reason}")]
    TerminationFailed { reason: String },
    #[error("lock poisoned")]
    LockPoisoned,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessInfo {
    pub pid: u32,
    pub start_time: u64,
}

/// 인스턴스 ID → PID/기동 시각 원장.
///
/// 실제 프로세스 핸들은 `ManagedProcess`가 소유하고, 이 트래커는
/// uptime 계산과 강제 종료 시그널 전송에 쓰이는 PID만 기록합니다.
pub struct ProcessTracker {
    processes: Mutex<HashMap<String, ProcessInfo>>,
}

impl Default for ProcessTracker {
    fn default() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
        }
    }
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutex 락 획득 헬퍼 — 보일러플레이트 제거
    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ProcessInfo>>, ProcessError> {
        self.processes.lock().map_err(|e| {
            tracing::error!("ProcessTracker lock poisoned: {}", e);
            ProcessError::LockPoisoned
        })
    }

    /// Track a server process by instance id
    pub fn track(&self, instance_id: &str, pid: u32) -> Result<()> {
        let info = ProcessInfo {
            pid,
            start_time: current_timestamp(),
        };
        let mut processes = self.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        processes.insert(instance_id.to_string(), info);
        tracing::info!("Now tracking instance '{}' with pid: {}", instance_id, pid);
        Ok(())
    }

    /// Get PID by instance id
    pub fn get_pid(&self, instance_id: &str) -> Result<u32, ProcessError> {
        let processes = self.lock()?;
        processes
            .get(instance_id)
            .map(|p| p.pid)
            .ok_or_else(|| ProcessError::NotFound {
                instance: instance_id.to_string(),
            })
    }

    /// Get start_time by instance id
    pub fn get_start_time(&self, instance_id: &str) -> Result<u64, ProcessError> {
        let processes = self.lock()?;
        processes
            .get(instance_id)
            .map(|p| p.start_time)
            .ok_or_else(|| ProcessError::NotFound {
                instance: instance_id.to_string(),
            })
    }

    /// Send a single OS termination signal to the tracked process.
    ///
    /// 에스컬레이션 없음 — TERM 한 번으로 끝. 종료 확인은 호출자의
    /// 폴링/wait 경로가 담당합니다.
    pub fn terminate(&self, instance_id: &str) -> Result<(), ProcessError> {
        let pid = self.get_pid(instance_id)?;
        tracing::info!("Sending terminate signal to instance '{}' (pid: {})", instance_id, pid);
        terminate_pid(pid)
    }

    /// Stop tracking an instance
    pub fn untrack(&self, instance_id: &str) -> Result<(), ProcessError> {
        let mut processes = self.lock()?;
        processes
            .remove(instance_id)
            .ok_or_else(|| ProcessError::NotFound {
                instance: instance_id.to_string(),
            })?;
        tracing::info!("Stopped tracking instance '{}'", instance_id);
        Ok(())
    }

    /// 추적 중인 모든 인스턴스 ID
    pub fn tracked_ids(&self) -> Vec<String> {
        self.lock()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// 크로스 플랫폼 프로세스 종료 (단일 시그널)
fn terminate_pid(pid: u32) -> Result<(), ProcessError> {
    #[cfg(target_os = "windows")]
    {
        use winapi::um::handleapi::CloseHandle;
        use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
        use winapi::um::winnt::PROCESS_TERMINATE;

        unsafe {
            let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
            if handle.is_null() {
                return Err(ProcessError::TerminationFailed {
                    reason: format!("Failed to open process {}", pid),
                });
            }

            let result = TerminateProcess(handle, 1);
            CloseHandle(handle);

            if result == 0 {
                return Err(ProcessError::TerminationFailed {
                    reason: "TerminateProcess failed".to_string(),
                });
            }
        }
        Ok(())
    }

    #[cfg(not(target_os = "windows"))]
    {
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).map_err(|e| {
            ProcessError::TerminationFailed {
                reason: format!("Failed to send signal: {}", e),
            }
        })
    }
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

    #[test]
    fn test_track_and_get_pid() {
        let tracker = ProcessTracker::new();
        tracker.track("inst-a", 1234).unwrap();
        assert_eq!(tracker.get_pid("inst-a").unwrap(), 1234);
    }

    #[test]
    fn test_start_time_is_nonzero() {
        let tracker = ProcessTracker::new();
        tracker.track("inst-a", 1234).unwrap();
        let start_time = tracker.get_start_time("inst-a").unwrap();
        assert!(start_time > 0, "Start time should be a valid Unix timestamp, got: {}", start_time);
    }

    #[test]
    fn test_not_found() {
        let tracker = ProcessTracker::new();
        assert!(tracker.get_pid("nonexistent").is_err());
        assert!(tracker.get_start_time("nonexistent").is_err());
    }

    #[test]
    fn test_untrack() {
        let tracker = ProcessTracker::new();
        tracker.track("inst-a", 1234).unwrap();
        tracker.untrack("inst-a").unwrap();
        assert!(tracker.get_pid("inst-a").is_err());
    }

    #[test]
    fn test_untrack_nonexistent_returns_error() {
        let tracker = ProcessTracker::new();
        assert!(tracker.untrack("never-existed").is_err());
    }

    #[test]
    fn test_track_overwrites_existing() {
        let tracker = ProcessTracker::new();
        tracker.track("inst-a", 1000).unwrap();
        // 같은 인스턴스 재시작 → 새 PID로 업데이트
        tracker.track("inst-a", 2000).unwrap();
        assert_eq!(tracker.get_pid("inst-a").unwrap(), 2000);
    }

    #[test]
    fn test_multiple_instances_independent() {
        let tracker = ProcessTracker::new();
        tracker.track("main", 100).unwrap();
        tracker.track("creative", 200).unwrap();

        assert_eq!(tracker.get_pid("main").unwrap(), 100);
        assert_eq!(tracker.get_pid("creative").unwrap(), 200);

        tracker.untrack("main").unwrap();
        assert!(tracker.get_pid("main").is_err());
        assert_eq!(tracker.get_pid("creative").unwrap(), 200);
    }

    #[test]
    fn test_tracked_ids() {
        let tracker = ProcessTracker::new();
        tracker.track("a", 1).unwrap();
        tracker.track("b", 2).unwrap();
        let mut ids = tracker.tracked_ids();
        ids.sort();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
    }
}
