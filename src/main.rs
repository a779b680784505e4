use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use craft_core::backup::BackupStore;
use craft_core::config::{self, GlobalConfig};
use craft_core::ipc::IPCServer;
use craft_core::supervisor::Supervisor;
use craft_core::template::TemplateStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("craft-core daemon starting");

    let cfg = GlobalConfig::load().unwrap_or_default();

    // Supervisor 초기화 (인스턴스 레지스트리 로드)
    let supervisor = Arc::new(RwLock::new(Supervisor::new(cfg.clone())));
    {
        let mut sup = supervisor.write().await;
        if let Err(e) = sup.initialize().await {
            tracing::warn!("Failed to initialize supervisor: {}", e);
        }
    }

    // 템플릿/백업 저장소
    let mut template_store = TemplateStore::new(config::data_dir().join("server_templates.json"));
    if let Err(e) = template_store.load() {
        tracing::warn!("Failed to load templates: {}", e);
    }
    let templates = Arc::new(Mutex::new(template_store));

    let mut backup_store = BackupStore::new(
        config::data_dir().join(&cfg.backup.dir),
        cfg.backup.max_per_server,
    );
    if let Err(e) = backup_store.load() {
        tracing::warn!("Failed to load backup ledger: {}", e);
    }
    let backups = Arc::new(Mutex::new(backup_store));

    let listen_addr = std::env::var("CRAFT_LISTEN_ADDR").unwrap_or_else(|_| cfg.listen_addr.clone());
    let ipc_server = IPCServer::new(supervisor.clone(), templates.clone(), backups.clone(), &listen_addr);

    // 백그라운드 상태 폴링 태스크 — 자체 종료한 서버를 이 주기로 발견
    let supervisor_monitor = supervisor.clone();
    let poll_interval = cfg.poll_interval_secs.max(1);
    tokio::spawn(async move {
        let mut error_count = 0;
        let max_consecutive_errors = 10;

        loop {
            tokio::time::sleep(tokio::time::Duration::from_secs(poll_interval)).await;

            let sup = supervisor_monitor.read().await;
            match sup.monitor_processes().await {
                Ok(_) => {
                    if error_count > 0 {
                        tracing::info!("Monitor recovered after {} errors", error_count);
                    }
                    error_count = 0;
                }
                Err(e) => {
                    error_count += 1;
                    if error_count <= 3 || error_count % 10 == 0 {
                        // 처음 3번과 이후 10번마다 로깅하여 반복 로그 방지
                        tracing::error!("Monitor error (count: {}): {}", error_count, e);
                    }

                    if error_count >= max_consecutive_errors {
                        tracing::error!(
                            "Monitor has failed {} consecutive times, resetting counter",
                            error_count
                        );
                        error_count = 0;
                    }
                }
            }
        }
    });

    // 자동 백업 태스크 — 중지된 인스턴스만 스냅샷
    if cfg.backup.auto_enabled {
        let supervisor_backup = supervisor.clone();
        let backups_auto = backups.clone();
        let interval = cfg.backup.auto_interval_secs.max(60);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;

                let sup = supervisor_backup.read().await;
                let instances = sup.instance_store.list().to_vec();
                for instance in instances {
                    if sup.is_running(&instance.id).await {
                        continue;
                    }
                    let mut store = backups_auto.lock().await;
                    if let Err(e) = store.create_backup(
                        &instance.id,
                        &instance.name,
                        &instance.working_dir,
                        "auto",
                        "scheduled backup",
                    ) {
                        tracing::error!("Auto backup failed for '{}': {}", instance.name, e);
                    }
                }
            }
        });
    }

    // Graceful shutdown: Ctrl+C 시 실행 중인 서버를 모두 내리고 종료
    let supervisor_shutdown = supervisor.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received, stopping all servers...");

        let sup = supervisor_shutdown.read().await;
        sup.stop_all().await;

        tracing::info!("Cleanup complete, exiting");
        std::process::exit(0);
    });

    if let Err(e) = ipc_server.start().await {
        tracing::error!("IPC server error: {}", e);
    }

    tracing::info!("craft-core daemon shutting down");
    Ok(())
}
