//! Managed Process - Direct process spawning with stdio capture
//!
//! The daemon owns each server process directly:
//! - Real-time stdout/stderr capture into a shared line buffer
//! - stdin command injection (raw pass-through, newline-terminated)
//! - Exit notification via a watch channel flipped by a waiter task
//! - Cooperative cancellation of the reader tasks on daemon shutdown

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command as TokioCommand;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Default maximum number of log lines to keep in the ring buffer.
/// Can be overridden via `log_buffer_size` in config/global.toml.
pub const DEFAULT_LOG_BUFFER: usize = 10_000;

/// Minecraft 서버 로그 라인에서 레벨을 추출하는 패턴.
/// 예: `[12:00:00] [Server thread/INFO]: Done (5.123s)!`
const MC_LOG_PATTERN: &str = r"/(?P<level>INFO|WARN|ERROR|DEBUG|FATAL)\]";

// ─── Log Types ───────────────────────────────────────────────

/// A single line of console output from the managed process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    /// Sequential ID for polling (`GET /console?since=<id>`)
    pub id: u64,
    /// Unix timestamp (seconds)
    pub timestamp: u64,
    /// Where the line came from
    pub source: LogSource,
    /// Raw text content
    pub content: String,
    /// Parsed severity level
    pub level: LogLevel,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
    /// System messages from craft-core itself
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
}

// ─── Log Buffer ──────────────────────────────────────────────

/// Ring buffer that stores recent log lines with sequential IDs.
struct LogBuffer {
    lines: VecDeque<LogLine>,
    next_id: u64,
    max_size: usize,
}

impl LogBuffer {
    fn with_capacity(max_size: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(max_size),
            next_id: 0,
            max_size,
        }
    }

    /// Push a new log line and return the created `LogLine`.
    fn push(&mut self, source: LogSource, content: String, level: LogLevel) -> LogLine {
        let line = LogLine {
            id: self.next_id,
            timestamp: current_timestamp(),
            source,
            content,
            level,
        };
        self.next_id += 1;

        if self.lines.len() >= self.max_size {
            self.lines.pop_front();
        }
        self.lines.push_back(line.clone());
        line
    }

    /// Get all lines with id > `since_id` (for polling).
    fn get_since(&self, since_id: u64) -> Vec<LogLine> {
        self.lines.iter().filter(|l| l.id > since_id).cloned().collect()
    }

    /// Get the most recent `count` lines.
    fn get_recent(&self, count: usize) -> Vec<LogLine> {
        self.lines.iter().rev().take(count).rev().cloned().collect()
    }
}

// ─── Managed Process ─────────────────────────────────────────

/// A server process managed directly by the daemon.
///
/// Provides:
/// - Async stdin command injection via `send_command()`
/// - Buffered console output via `get_console_since()` / `get_recent_console()`
/// - Real-time log broadcast via `subscribe()`
/// - Non-blocking liveness via `is_running()`, exit wait via `wait_for_exit()`
pub struct ManagedProcess {
    /// Channel to send commands to stdin
    stdin_tx: mpsc::Sender<String>,
    /// Log buffer for recent console output
    log_buffer: Arc<Mutex<LogBuffer>>,
    /// Broadcast channel for real-time log events
    log_broadcast: broadcast::Sender<LogLine>,
    /// Process PID
    pub pid: u32,
    /// Watch channel for running state (flipped false by the waiter task)
    running_rx: watch::Receiver<bool>,
    /// Cancels the reader tasks; EOF가 오지 않는 비정상 종료 경로 대비
    cancel: CancellationToken,
}

impl ManagedProcess {
    /// Spawn a new managed process.
    ///
    /// # Arguments
    /// * `program` - Executable to run (e.g., `"java"`)
    /// * `args` - Command-line arguments
    /// * `working_dir` - Working directory of the child
    /// * `log_buffer_size` - Ring buffer capacity for console lines
    pub async fn spawn(
        program: &str,
        args: &[String],
        working_dir: &Path,
        log_buffer_size: usize,
    ) -> Result<Self> {
        let mut cmd = TokioCommand::new(program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);

        // Windows: hide console window
        crate::utils::apply_creation_flags(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn process '{}': {}", program, e))?;

        let pid = child
            .id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get PID of spawned process"))?;

        // Channels
        let (stdin_tx, stdin_rx) = mpsc::channel::<String>(256);
        let (log_tx, _) = broadcast::channel::<LogLine>(2048);
        let (running_tx, running_rx) = watch::channel(true);

        let log_buffer = Arc::new(Mutex::new(LogBuffer::with_capacity(log_buffer_size)));
        let cancel = CancellationToken::new();

        let log_regex = Regex::new(MC_LOG_PATTERN).ok().map(Arc::new);

        // Take ownership of stdio handles
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdin = child.stdin.take();

        // ── stdout reader ────────────────────────────────────
        if let Some(stdout) = stdout {
            let buf = log_buffer.clone();
            let bc = log_tx.clone();
            let re = log_regex.clone();
            let token = cancel.clone();
            tokio::spawn(async move {
                let reader = BufReader::new(stdout);
                let mut lines = reader.lines();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                let level = parse_log_level(&line, re.as_deref());
                                let log_line = buf.lock().await.push(LogSource::Stdout, line, level);
                                let _ = bc.send(log_line);
                            }
                            // EOF 또는 읽기 오류 → 파이프가 닫혔으므로 종료
                            _ => break,
                        },
                    }
                }
            });
        }

        // ── stderr reader ────────────────────────────────────
        if let Some(stderr) = stderr {
            let buf = log_buffer.clone();
            let bc = log_tx.clone();
            let re = log_regex.clone();
            let token = cancel.clone();
            tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        line = lines.next_line() => match line {
                            Ok(Some(line)) => {
                                let level = parse_log_level(&line, re.as_deref());
                                // stderr lines default to at least Warn
                                let effective = if level == LogLevel::Info { LogLevel::Warn } else { level };
                                let log_line = buf.lock().await.push(LogSource::Stderr, line, effective);
                                let _ = bc.send(log_line);
                            }
                            _ => break,
                        },
                    }
                }
            });
        }

        // ── stdin writer ─────────────────────────────────────
        if let Some(mut stdin_handle) = stdin {
            let mut rx = stdin_rx;
            tokio::spawn(async move {
                while let Some(cmd) = rx.recv().await {
                    let data = if cmd.ends_with('\n') { cmd } else { format!("{}\n", cmd) };
                    if stdin_handle.write_all(data.as_bytes()).await.is_err() {
                        break;
                    }
                    if stdin_handle.flush().await.is_err() {
                        break;
                    }
                }
            });
        }

        // ── process waiter ───────────────────────────────────
        {
            let buf = log_buffer.clone();
            let bc = log_tx.clone();
            tokio::spawn(async move {
                let exit_msg = match child.wait().await {
                    Ok(status) => format!("Process exited with {}", status),
                    Err(e) => format!("Failed to wait for process: {}", e),
                };
                tracing::info!("{}", exit_msg);
                let log_line = buf.lock().await.push(LogSource::System, exit_msg, LogLevel::Info);
                let _ = bc.send(log_line);
                let _ = running_tx.send(false);
            });
        }

        // System log entry
        {
            let msg = format!("Process started with PID {}", pid);
            let log_line = log_buffer.lock().await.push(LogSource::System, msg, LogLevel::Info);
            let _ = log_tx.send(log_line);
        }

        Ok(Self {
            stdin_tx,
            log_buffer,
            log_broadcast: log_tx,
            pid,
            running_rx,
            cancel,
        })
    }

    /// Send a command string to the process's stdin.
    ///
    /// 전달 내용은 그대로 통과시킵니다 — 이스케이프/검증 없음. 개행이 포함된
    /// 입력으로 여러 명령을 주입하지 않을 책임은 호출자에게 있습니다.
    pub async fn send_command(&self, command: &str) -> Result<()> {
        self.stdin_tx
            .send(command.to_string())
            .await
            .map_err(|e| anyhow::anyhow!("stdin channel closed: {}", e))
    }

    /// Get all log lines with `id > since_id`.
    pub async fn get_console_since(&self, since_id: u64) -> Vec<LogLine> {
        self.log_buffer.lock().await.get_since(since_id)
    }

    /// Get the most recent `count` log lines.
    pub async fn get_recent_console(&self, count: usize) -> Vec<LogLine> {
        self.log_buffer.lock().await.get_recent(count)
    }

    /// Subscribe to real-time log events.
    pub fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.log_broadcast.subscribe()
    }

    /// Whether the process is still running. Never blocks.
    pub fn is_running(&self) -> bool {
        *self.running_rx.borrow()
    }

    /// Wait until the process exits.
    pub async fn wait_for_exit(&self) {
        let mut rx = self.running_rx.clone();
        while *rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Cancel the reader tasks (daemon shutdown path).
    pub fn cancel_readers(&self) {
        self.cancel.cancel();
    }
}

// ─── Managed Process Store ───────────────────────────────────

/// Central store for all managed processes. Thread-safe.
///
/// 인스턴스당 프로세스는 최대 하나 — insert가 이전 핸들을 대체하므로
/// 호출자(Supervisor)가 start 전에 Running 여부를 검사합니다.
pub struct ManagedProcessStore {
    processes: Mutex<HashMap<String, Arc<ManagedProcess>>>,
}

impl ManagedProcessStore {
    pub fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Register a managed process under an instance ID.
    pub async fn insert(&self, instance_id: &str, process: ManagedProcess) {
        let mut map = self.processes.lock().await;
        map.insert(instance_id.to_string(), Arc::new(process));
    }

    /// Get a managed process by instance ID.
    pub async fn get(&self, instance_id: &str) -> Option<Arc<ManagedProcess>> {
        let map = self.processes.lock().await;
        map.get(instance_id).cloned()
    }

    /// Remove a managed process (e.g., after it exits).
    pub async fn remove(&self, instance_id: &str) -> Option<Arc<ManagedProcess>> {
        let mut map = self.processes.lock().await;
        map.remove(instance_id)
    }

    /// 현재 실행 중인 인스턴스 ID 목록 반환
    pub async fn running_instance_ids(&self) -> Vec<String> {
        let map = self.processes.lock().await;
        map.iter()
            .filter(|(_, proc)| proc.is_running())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Clean up processes that are no longer running.
    pub async fn cleanup_dead(&self) -> Vec<String> {
        let mut map = self.processes.lock().await;
        let mut removed = Vec::new();
        map.retain(|id, proc| {
            if !proc.is_running() {
                tracing::info!("Cleaning up dead managed process for instance '{}'", id);
                removed.push(id.clone());
                false
            } else {
                true
            }
        });
        removed
    }
}

impl Default for ManagedProcessStore {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Helpers ─────────────────────────────────────────────────

/// Parse the log level from a server log line.
///
/// The pattern has a named capture group `level` matching level keywords
/// (INFO, WARN, ERROR, DEBUG, FATAL). Lines that don't match default to Info.
fn parse_log_level(line: &str, pattern: Option<&Regex>) -> LogLevel {
    if let Some(re) = pattern {
        if let Some(caps) = re.captures(line) {
            if let Some(level_match) = caps.name("level") {
                return match level_match.as_str().to_uppercase().as_str() {
                    "ERROR" | "FATAL" => LogLevel::Error,
                    "WARN" | "WARNING" => LogLevel::Warn,
                    "DEBUG" | "TRACE" => LogLevel::Debug,
                    _ => LogLevel::Info,
                };
            }
        }
    }
    LogLevel::Info
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

// ─── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_push_and_query() {
        let mut buffer = LogBuffer::with_capacity(DEFAULT_LOG_BUFFER);
        buffer.push(LogSource::Stdout, "line 0".into(), LogLevel::Info);
        buffer.push(LogSource::Stdout, "line 1".into(), LogLevel::Info);
        buffer.push(LogSource::Stderr, "err 0".into(), LogLevel::Error);

        assert_eq!(buffer.lines.len(), 3);
        // since_id = 0 → return lines with id > 0
        assert_eq!(buffer.get_since(0).len(), 2);
        assert_eq!(buffer.get_recent(2).len(), 2);
        assert_eq!(buffer.get_recent(100).len(), 3);
    }

    #[test]
    fn test_log_buffer_ring_eviction() {
        let mut buffer = LogBuffer::with_capacity(50);
        for i in 0..80 {
            buffer.push(LogSource::Stdout, format!("line {}", i), LogLevel::Info);
        }
        assert_eq!(buffer.lines.len(), 50);
        // 앞쪽 라인이 밀려나고 ID는 계속 증가
        assert_eq!(buffer.lines.front().unwrap().id, 30);
        assert_eq!(buffer.lines.back().unwrap().id, 79);
    }

    #[test]
    fn test_parse_log_level_minecraft_pattern() {
        let re = Regex::new(MC_LOG_PATTERN).unwrap();

        assert_eq!(
            parse_log_level("[12:00:00] [Server thread/INFO]: Done (5.123s)!", Some(&re)),
            LogLevel::Info
        );
        assert_eq!(
            parse_log_level("[12:00:00] [Server thread/WARN]: Can't keep up!", Some(&re)),
            LogLevel::Warn
        );
        assert_eq!(
            parse_log_level(
                "[12:00:00] [Server thread/ERROR]: Encountered an unexpected exception",
                Some(&re)
            ),
            LogLevel::Error
        );
        // No match → default Info
        assert_eq!(parse_log_level("Some random output", Some(&re)), LogLevel::Info);
    }

    #[test]
    fn test_parse_log_level_without_pattern() {
        assert_eq!(parse_log_level("[Server thread/ERROR]: err", None), LogLevel::Info);
    }

    #[tokio::test]
    async fn test_managed_process_store_empty() {
        let store = ManagedProcessStore::new();
        assert!(store.get("test").await.is_none());
        assert!(store.running_instance_ids().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_echo_and_capture() {
        let dir = tempfile::tempdir().unwrap();
        let proc = ManagedProcess::spawn(
            "sh",
            &["-c".to_string(), "echo hello from child".to_string()],
            dir.path(),
            64,
        )
        .await
        .unwrap();

        proc.wait_for_exit().await;
        assert!(!proc.is_running());

        let lines = proc.get_recent_console(10).await;
        assert!(lines
            .iter()
            .any(|l| l.source == LogSource::Stdout && l.content == "hello from child"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdin_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        // 자식이 stdin 한 줄을 읽어 그대로 출력하고 종료
        let proc = ManagedProcess::spawn(
            "sh",
            &["-c".to_string(), "read line; echo \"got: $line\"".to_string()],
            dir.path(),
            64,
        )
        .await
        .unwrap();

        proc.send_command("list").await.unwrap();
        proc.wait_for_exit().await;

        let lines = proc.get_recent_console(10).await;
        assert!(lines.iter().any(|l| l.content == "got: list"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_missing_binary_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            ManagedProcess::spawn("definitely-not-a-real-binary-xyz", &[], dir.path(), 64).await;
        assert!(result.is_err());
    }
}
