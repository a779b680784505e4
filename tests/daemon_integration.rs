//! 수명주기 통합 테스트
//!
//! 실제 자식 프로세스가 필요한 시나리오는 java 대신 짧은 셸 스크립트를
//! `java_bin`으로 지정해 돌립니다 (unix 전용).

use craft_core::config::GlobalConfig;
use craft_core::instance::InstanceStore;
use craft_core::supervisor::error::SupervisorError;
use craft_core::supervisor::state_machine::State;
use craft_core::supervisor::Supervisor;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

/// 격리된 레지스트리를 쓰는 supervisor 생성
fn make_supervisor(root: &Path, stop_grace_secs: u64) -> Supervisor {
    let settings = GlobalConfig {
        stop_grace_secs,
        ..GlobalConfig::default()
    };
    let mut supervisor = Supervisor::new(settings);
    supervisor.instance_store = InstanceStore::new(root.join("servers.json"));
    supervisor
}

/// 가짜 core jar와 함께 인스턴스 생성
fn make_instance(supervisor: &mut Supervisor, root: &Path, name: &str) -> String {
    let working_dir = root.join(name);
    let config = BTreeMap::new();
    let instance = supervisor
        .instance_store
        .create(name, Some(working_dir.clone()), &config)
        .expect("create instance");
    std::fs::write(working_dir.join("server.jar"), b"not a real jar").unwrap();
    instance.id
}

#[cfg(unix)]
fn install_fake_java(dir: &Path, script_body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-java.sh");
    let script = format!("#!/bin/sh\n{}\n", script_body);
    std::fs::write(&path, script).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.to_string_lossy().to_string()
}

/// stdin에서 "stop"을 받으면 스스로 종료하는 협조적 서버
#[cfg(unix)]
const COOPERATIVE_SERVER: &str = r#"echo "[Server thread/INFO]: Done (1.0s)!"
while read line; do
  echo "[Server thread/INFO]: got $line"
  [ "$line" = "stop" ] && exit 0
done"#;

/// stdin을 무시하고 계속 도는 비협조적 서버 (TERM으로만 죽음)
#[cfg(unix)]
const STUBBORN_SERVER: &str = r#"while true; do sleep 1; done"#;

#[cfg(unix)]
async fn start_with_script(
    supervisor: &Supervisor,
    root: &Path,
    instance_id: &str,
    script_body: &str,
) {
    let java_bin = install_fake_java(root, script_body);
    let mut overrides = BTreeMap::new();
    overrides.insert("java_bin".to_string(), java_bin);
    supervisor.update_config(instance_id, &overrides).await.unwrap();
    supervisor.accept_eula(instance_id).await.unwrap();
    let result = supervisor.start_server(instance_id).await;
    assert!(result.is_ok(), "start failed: {:?}", result.err());
}

#[tokio::test]
async fn test_missing_core_file() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "no-core");

    // core jar 제거 후 시작 시도
    std::fs::remove_file(root.path().join("no-core/server.jar")).unwrap();
    craft_core::supervisor::launch::accept_eula(&root.path().join("no-core")).unwrap();

    let result = supervisor.start_server(&id).await;
    assert!(matches!(result, Err(SupervisorError::MissingCoreFile(_))));
    // 상태는 Stopped 유지
    assert_eq!(supervisor.state_of(&id).await, State::Stopped);
    assert!(!supervisor.is_running(&id).await);
}

#[tokio::test]
async fn test_eula_gate_blocks_start() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "no-eula");

    let result = supervisor.start_server(&id).await;
    assert!(matches!(result, Err(SupervisorError::EulaNotAccepted(_))));
    assert!(!supervisor.is_running(&id).await);
}

#[tokio::test]
async fn test_stop_on_stopped_fails() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "idle");

    let result = supervisor.stop_server(&id, false).await;
    assert!(matches!(result, Err(SupervisorError::NotRunning(_))));
}

#[tokio::test]
async fn test_send_command_on_stopped_fails() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "idle");

    let result = supervisor.send_command(&id, "list").await;
    assert!(matches!(result, Err(SupervisorError::NotRunning(_))));
}

#[cfg(unix)]
#[tokio::test]
async fn test_start_is_running_and_double_start() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "main");

    start_with_script(&supervisor, root.path(), &id, COOPERATIVE_SERVER).await;

    // 출력 읽기 전에 이미 running이어야 함
    assert!(supervisor.is_running(&id).await);
    assert_eq!(supervisor.state_of(&id).await, State::Running);

    // 이중 시작은 실패하고 두 번째 프로세스를 띄우지 않음
    let second = supervisor.start_server(&id).await;
    assert!(matches!(second, Err(SupervisorError::AlreadyRunning(_))));

    let status = supervisor.server_status(&id).await.unwrap();
    assert_eq!(status["status"], "running");
    assert!(status["pid"].as_u64().is_some());

    let result = supervisor.stop_server(&id, false).await.unwrap();
    assert_eq!(result["method"], "graceful");
    assert!(!supervisor.is_running(&id).await);
    assert_eq!(supervisor.state_of(&id).await, State::Stopped);
}

#[cfg(unix)]
#[tokio::test]
async fn test_graceful_stop_within_grace_window() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "polite");

    start_with_script(&supervisor, root.path(), &id, COOPERATIVE_SERVER).await;

    // "stop" 전송 → 자체 종료 → 강제 종료 없이 Stopped
    let result = supervisor.stop_server(&id, false).await.unwrap();
    assert_eq!(result["method"], "graceful");
    assert!(!supervisor.is_running(&id).await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_grace_timeout_falls_back_to_forced() {
    let root = TempDir::new().unwrap();
    // grace 1초 — 비협조 서버는 제한 내에 내려가지 않는다
    let mut supervisor = make_supervisor(root.path(), 1);
    let id = make_instance(&mut supervisor, root.path(), "stubborn");

    start_with_script(&supervisor, root.path(), &id, STUBBORN_SERVER).await;
    assert!(supervisor.is_running(&id).await);

    let result = supervisor.stop_server(&id, false).await.unwrap();
    assert_eq!(result["method"], "forced");
    assert!(!supervisor.is_running(&id).await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_force_stop() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "forced");

    start_with_script(&supervisor, root.path(), &id, STUBBORN_SERVER).await;
    assert!(supervisor.is_running(&id).await);

    let result = supervisor.stop_server(&id, true).await.unwrap();
    assert_eq!(result["method"], "forced");
    // 폴링 주기 내에 false가 되어야 함 — finish_stop 이후는 즉시
    assert!(!supervisor.is_running(&id).await);
}

#[cfg(unix)]
#[tokio::test]
async fn test_console_capture_and_command() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "chatty");

    start_with_script(&supervisor, root.path(), &id, COOPERATIVE_SERVER).await;

    supervisor.send_command(&id, "list").await.unwrap();

    // 리더 태스크가 라인을 버퍼에 넣을 때까지 잠깐 대기
    let line_format = regex_lite::Regex::new(r"^\[Server thread/INFO\]: got list$").unwrap();
    let mut echoed = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let console = supervisor.get_console(&id, Some(0), None).await.unwrap();
        let lines = console["lines"].as_array().unwrap();
        if lines
            .iter()
            .any(|l| line_format.is_match(l["content"].as_str().unwrap_or_default()))
        {
            echoed = true;
            break;
        }
    }
    assert!(echoed, "command echo should appear in console output");

    supervisor.stop_server(&id, false).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_log_broadcast_subscription() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "streamer");

    start_with_script(&supervisor, root.path(), &id, COOPERATIVE_SERVER).await;

    // 구독 후에 발생한 라인은 브로드캐스트로도 도착해야 함
    let proc = supervisor.processes.get(&id).await.unwrap();
    let mut rx = proc.subscribe();

    supervisor.send_command(&id, "ping").await.unwrap();

    let mut received = false;
    for _ in 0..50 {
        match tokio::time::timeout(std::time::Duration::from_millis(100), rx.recv()).await {
            Ok(Ok(line)) if line.content.contains("got ping") => {
                received = true;
                break;
            }
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break,
            Err(_) => continue,
        }
    }
    assert!(received, "subscribed observer should see new console lines");

    supervisor.stop_server(&id, false).await.unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_self_exit_reconciled_by_monitor() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "short-lived");

    // 즉시 종료하는 서버 — 크래시/자체 종료 시나리오
    start_with_script(&supervisor, root.path(), &id, "exit 0").await;

    // watch 채널이 종료를 관측할 때까지 대기
    let mut exited = false;
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if !supervisor.is_running(&id).await {
            exited = true;
            break;
        }
    }
    assert!(exited, "process should be observed as exited");

    // 모니터 사이클이 상태 머신을 Stopped로 되돌린다
    supervisor.monitor_processes().await.unwrap();
    assert_eq!(supervisor.state_of(&id).await, State::Stopped);

    // 이후 재시작 가능 (이 서버도 즉시 자체 종료한다)
    let restart = supervisor.start_server(&id).await;
    assert!(restart.is_ok(), "restart after self-exit: {:?}", restart.err());
}

#[tokio::test]
async fn test_console_of_unknown_instance_is_error() {
    let root = TempDir::new().unwrap();
    let supervisor = make_supervisor(root.path(), 30);
    let result = supervisor.get_console("ghost", None, None).await;
    assert!(matches!(result, Err(SupervisorError::InstanceNotFound(_))));
}

#[tokio::test]
async fn test_console_of_stopped_instance_is_empty() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "quiet");

    let console = supervisor.get_console(&id, None, None).await.unwrap();
    assert_eq!(console["running"], false);
    assert_eq!(console["lines"].as_array().unwrap().len(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_properties_written_on_start() {
    let root = TempDir::new().unwrap();
    let mut supervisor = make_supervisor(root.path(), 30);
    let id = make_instance(&mut supervisor, root.path(), "props");

    let mut overrides = BTreeMap::new();
    overrides.insert("motd".to_string(), "integration test".to_string());
    overrides.insert("port".to_string(), "25599".to_string());
    supervisor.update_config(&id, &overrides).await.unwrap();

    start_with_script(&supervisor, root.path(), &id, COOPERATIVE_SERVER).await;

    let props = supervisor.read_properties(&id).await.unwrap();
    assert_eq!(props["properties"]["motd"], "integration test");
    assert_eq!(props["properties"]["server-port"], "25599");

    supervisor.stop_server(&id, false).await.unwrap();
}
