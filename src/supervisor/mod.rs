pub mod error;
pub mod launch;
pub mod managed_process;
pub mod process;
pub mod state_machine;

use crate::config::GlobalConfig;
use crate::instance::{working_dir_exists, InstanceStore};
use error::SupervisorError;
use managed_process::{ManagedProcess, ManagedProcessStore};
use process::ProcessTracker;
use serde_json::{json, Value};
use state_machine::{State, StateMachine};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// 서버 프로세스 수명주기 관리자.
///
/// 인스턴스별로 Stopped/Running 상태 머신, PID 원장, 관리 프로세스 핸들을
/// 소유합니다. start/stop/sendCommand/status는 즉시 반환하고 (stop만 grace
/// 윈도우만큼 대기), 블로킹 I/O는 ManagedProcess의 리더 태스크가 전담합니다.
pub struct Supervisor {
    pub instance_store: InstanceStore,
    pub tracker: ProcessTracker,
    pub processes: ManagedProcessStore,
    states: Mutex<HashMap<String, StateMachine>>,
    pub settings: GlobalConfig,
}

impl Supervisor {
    pub fn new(settings: GlobalConfig) -> Self {
        let registry_path = crate::config::data_dir().join("servers.json");
        Self {
            instance_store: InstanceStore::new(registry_path),
            tracker: ProcessTracker::new(),
            processes: ManagedProcessStore::new(),
            states: Mutex::new(HashMap::new()),
            settings,
        }
    }

    pub async fn initialize(&mut self) -> Result<(), SupervisorError> {
        self.instance_store.load().map_err(SupervisorError::Internal)?;
        tracing::info!("Loaded {} server instances", self.instance_store.list().len());
        Ok(())
    }

    /// 인스턴스의 현재 상태 (상태 머신 기준)
    pub async fn state_of(&self, instance_id: &str) -> State {
        let states = self.states.lock().await;
        states.get(instance_id).map(|sm| sm.state).unwrap_or(State::Stopped)
    }

    /// Non-blocking liveness check: true iff a managed process exists and the
    /// waiter task has not yet observed its exit.
    pub async fn is_running(&self, instance_id: &str) -> bool {
        match self.processes.get(instance_id).await {
            Some(proc) => proc.is_running(),
            None => false,
        }
    }

    async fn set_state(&self, instance_id: &str, to: State) {
        let mut states = self.states.lock().await;
        let sm = states.entry(instance_id.to_string()).or_default();
        if sm.state != to {
            if let Err(e) = sm.transition(to) {
                tracing::warn!("Instance '{}': {}", instance_id, e);
            }
        }
    }

    /// Running으로 기록되어 있으나 실제 프로세스가 죽어 있으면 정리
    async fn reconcile_if_dead(&self, instance_id: &str) {
        if self.state_of(instance_id).await == State::Running && !self.is_running(instance_id).await {
            tracing::warn!(
                "Instance '{}' exited on its own, reconciling state",
                instance_id
            );
            self.finish_stop(instance_id).await;
        }
    }

    /// 종료 공통 후처리: 상태 전이, PID 원장/핸들 제거
    async fn finish_stop(&self, instance_id: &str) {
        self.set_state(instance_id, State::Stopped).await;
        if let Err(e) = self.tracker.untrack(instance_id) {
            tracing::debug!("untrack '{}': {}", instance_id, e);
        }
        if let Some(proc) = self.processes.remove(instance_id).await {
            // 리더 태스크 정리 — 정상 경로에서는 파이프 EOF로도 끝나지만,
            // 여기서 취소 토큰을 당겨 대기 중인 read를 즉시 깨운다
            proc.cancel_readers();
        }
    }

    /// Start a server instance.
    ///
    /// Called by IPC API: POST /api/instance/:id/start
    pub async fn start_server(&self, instance_id: &str) -> Result<Value, SupervisorError> {
        let instance = self
            .instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?
            .clone();

        tracing::info!("Starting server '{}' ({})", instance.name, instance.id);

        // 이중 기동 방지 — 살아있는 프로세스가 있으면 두 번째 spawn은 없다
        if self.is_running(instance_id).await {
            return Err(SupervisorError::AlreadyRunning(instance.name));
        }
        self.reconcile_if_dead(instance_id).await;

        if !working_dir_exists(&instance) {
            return Err(SupervisorError::InvalidConfig(format!(
                "working directory '{}' does not exist",
                instance.working_dir.display()
            )));
        }

        let config = instance.config();

        // core jar 존재 검사
        let core = config.get("core").to_string();
        let core_path = instance.working_dir.join(&core);
        if !core_path.exists() {
            return Err(SupervisorError::MissingCoreFile(core));
        }

        // EULA 게이트 — 명시적 동의 없이는 기동하지 않음
        if !launch::eula_accepted(&instance.working_dir) {
            return Err(SupervisorError::EulaNotAccepted(instance.name));
        }

        // 기동 직전에 server.properties 갱신
        launch::write_properties(&instance.working_dir, &config)
            .map_err(SupervisorError::Internal)?;

        let cmd = launch::build_command_line(&config);
        let (program, args) = cmd
            .split_first()
            .ok_or_else(|| SupervisorError::InvalidConfig("empty command line".to_string()))?;

        let process = ManagedProcess::spawn(
            program,
            args,
            &instance.working_dir,
            self.settings.log_buffer_size,
        )
        .await
        .map_err(|e| SupervisorError::SpawnFailed(e.to_string()))?;

        let pid = process.pid;
        self.tracker.track(instance_id, pid).map_err(SupervisorError::Internal)?;
        self.processes.insert(instance_id, process).await;
        self.set_state(instance_id, State::Running).await;

        tracing::info!("Server '{}' started with PID {}", instance.name, pid);
        Ok(json!({
            "success": true,
            "id": instance.id,
            "name": instance.name,
            "pid": pid,
        }))
    }

    /// Stop a server instance.
    ///
    /// Graceful path writes the in-band `stop` command and waits up to the
    /// configured grace window; on timeout (or with `force`) a single OS
    /// terminate signal is sent. Called by IPC API: POST /api/instance/:id/stop
    pub async fn stop_server(&self, instance_id: &str, force: bool) -> Result<Value, SupervisorError> {
        let instance = self
            .instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?
            .clone();

        tracing::info!("Stopping server '{}' (force: {})", instance.name, force);

        let proc = match self.processes.get(instance_id).await {
            Some(p) if p.is_running() => p,
            _ => {
                self.reconcile_if_dead(instance_id).await;
                return Err(SupervisorError::NotRunning(instance.name));
            }
        };

        let mut method = "graceful";

        if force {
            self.terminate(instance_id);
            method = "forced";
        } else {
            match proc.send_command(launch::GRACEFUL_STOP_COMMAND).await {
                Ok(()) => {
                    let grace = Duration::from_secs(self.settings.stop_grace_secs);
                    if tokio::time::timeout(grace, proc.wait_for_exit()).await.is_err() {
                        tracing::warn!(
                            "Server '{}' did not exit within {}s, forcing termination",
                            instance.name,
                            self.settings.stop_grace_secs
                        );
                        self.terminate(instance_id);
                        method = "forced";
                    }
                }
                Err(e) => {
                    // stdin이 이미 닫혔으면 프로세스는 사실상 내려가는 중 —
                    // 강제 종료 경로로 수렴시킨다
                    tracing::warn!("Server '{}' stdin write failed ({}), forcing", instance.name, e);
                    self.terminate(instance_id);
                    method = "forced";
                }
            }
        }

        self.finish_stop(instance_id).await;
        tracing::info!("Server '{}' stopped ({})", instance.name, method);
        Ok(json!({
            "success": true,
            "id": instance.id,
            "name": instance.name,
            "method": method,
        }))
    }

    /// 단일 종료 시그널 전송. 전송 실패(이미 죽은 프로세스 등)는 경고만 남긴다 —
    /// supervisor 관점의 상태는 호출자(finish_stop)가 무조건 Stopped로 전이.
    fn terminate(&self, instance_id: &str) {
        if let Err(e) = self.tracker.terminate(instance_id) {
            tracing::warn!("Terminate '{}': {}", instance_id, e);
        }
    }

    /// Forward a raw command line to the server console.
    ///
    /// Called by IPC API: POST /api/instance/:id/command
    pub async fn send_command(&self, instance_id: &str, command: &str) -> Result<Value, SupervisorError> {
        let instance = self
            .instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        let proc = match self.processes.get(instance_id).await {
            Some(p) if p.is_running() => p,
            _ => return Err(SupervisorError::NotRunning(instance.name.clone())),
        };

        proc.send_command(command)
            .await
            .map_err(|e| SupervisorError::BrokenPipe(e.to_string()))?;

        Ok(json!({ "success": true }))
    }

    /// Read buffered console output.
    ///
    /// `since`가 주어지면 해당 ID 이후의 라인, 아니면 최근 `count`개.
    /// 프로세스가 없으면 빈 목록 — 에러가 아님.
    pub async fn get_console(
        &self,
        instance_id: &str,
        since: Option<u64>,
        count: Option<usize>,
    ) -> Result<Value, SupervisorError> {
        self.instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        match self.processes.get(instance_id).await {
            Some(proc) => {
                let lines = match since {
                    Some(id) => proc.get_console_since(id).await,
                    None => proc.get_recent_console(count.unwrap_or(100)).await,
                };
                Ok(json!({ "running": proc.is_running(), "lines": lines }))
            }
            None => Ok(json!({ "running": false, "lines": [] })),
        }
    }

    /// Get server status (non-blocking).
    ///
    /// Called by IPC API: GET /api/instance/:id/status
    pub async fn server_status(&self, instance_id: &str) -> Result<Value, SupervisorError> {
        let instance = self
            .instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        let running = self.is_running(instance_id).await;
        let pid = self.tracker.get_pid(instance_id).ok();
        let uptime = if running {
            self.tracker.get_start_time(instance_id).ok().map(|start| {
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs()
                    .saturating_sub(start)
            })
        } else {
            None
        };

        Ok(json!({
            "id": instance.id,
            "name": instance.name,
            "status": if running { "running" } else { "stopped" },
            "pid": if running { pid } else { None },
            "uptime_seconds": uptime,
        }))
    }

    /// 주기 폴링으로 상태를 실제 프로세스와 일치시킨다.
    ///
    /// 자체 종료(크래시, 외부 kill, stop 명령 자체 처리)는 waiter 태스크의
    /// watch 채널로도 감지되지만, 사용자에게 보이는 상태는 이 폴링 주기
    /// (기본 1초)만큼 지연될 수 있다. sysinfo PID 검사를 보조 신호로 사용.
    pub async fn monitor_processes(&self) -> Result<(), SupervisorError> {
        let instances = self.instance_store.list().to_vec();

        for instance in instances {
            if self.state_of(&instance.id).await != State::Running {
                continue;
            }

            let mut alive = self.is_running(&instance.id).await;
            if alive {
                if let Ok(pid) = self.tracker.get_pid(&instance.id) {
                    alive = crate::process_monitor::is_running_async(pid).await;
                }
            }

            if !alive {
                tracing::warn!(
                    "Process for instance '{}' is no longer running, updating state",
                    instance.name
                );
                self.finish_stop(&instance.id).await;
            }
        }

        // 레지스트리에서 빠진 인스턴스의 죽은 핸들 정리
        for id in self.processes.cleanup_dead().await {
            let _ = self.tracker.untrack(&id);
        }

        Ok(())
    }

    /// Accept the Minecraft EULA for an instance (explicit user consent).
    ///
    /// Called by IPC API: POST /api/instance/:id/accept-eula
    pub async fn accept_eula(&self, instance_id: &str) -> Result<Value, SupervisorError> {
        let instance = self
            .instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        launch::accept_eula(&instance.working_dir).map_err(SupervisorError::Internal)?;
        tracing::info!("EULA accepted for instance '{}'", instance.name);
        Ok(json!({ "success": true, "eula": true }))
    }

    /// Read the instance's server.properties as a key/value map.
    pub async fn read_properties(&self, instance_id: &str) -> Result<Value, SupervisorError> {
        let instance = self
            .instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        let properties = launch::read_properties(&instance.working_dir);
        Ok(json!({ "properties": properties }))
    }

    /// 인스턴스 설정 조회
    pub async fn get_config(&self, instance_id: &str) -> Result<Value, SupervisorError> {
        let instance = self
            .instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        Ok(json!({ "config": instance.config().values() }))
    }

    /// Update the instance's server config (merge + persist).
    ///
    /// 다음 기동 시 server.properties에 반영된다.
    pub async fn update_config(
        &self,
        instance_id: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<Value, SupervisorError> {
        let instance = self
            .instance_store
            .get(instance_id)
            .ok_or_else(|| SupervisorError::InstanceNotFound(instance_id.to_string()))?;

        let mut config = instance.config();
        config.merge(overrides);
        config.save().map_err(SupervisorError::Internal)?;

        Ok(json!({ "success": true, "config": config.values() }))
    }

    /// 데몬 종료 시 실행 중인 모든 서버를 내린다.
    pub async fn stop_all(&self) {
        let running = self.processes.running_instance_ids().await;
        for id in running {
            if let Err(e) = self.stop_server(&id, false).await {
                tracing::error!("Failed to stop instance '{}' on shutdown: {}", id, e);
            }
        }
    }
}
