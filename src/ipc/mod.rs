//! IPC HTTP API — 데몬을 조작하는 로컬 REST 표면.
//!
//! 원래 GUI가 하던 호출자 역할을 이 레이어가 맡습니다. 모든 응답은 JSON이고,
//! SupervisorError는 IntoResponse를 통해 상태 코드/에러 코드로 매핑됩니다.

pub mod handlers;

use crate::backup::BackupStore;
use crate::supervisor::Supervisor;
use crate::template::TemplateStore;
use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::trace::TraceLayer;

/// IPC Server State
#[derive(Clone)]
pub struct IPCServer {
    pub supervisor: Arc<RwLock<Supervisor>>,
    pub templates: Arc<Mutex<TemplateStore>>,
    pub backups: Arc<Mutex<BackupStore>>,
    pub listen_addr: String,
}

impl IPCServer {
    pub fn new(
        supervisor: Arc<RwLock<Supervisor>>,
        templates: Arc<Mutex<TemplateStore>>,
        backups: Arc<Mutex<BackupStore>>,
        listen_addr: &str,
    ) -> Self {
        Self {
            supervisor,
            templates,
            backups,
            listen_addr: listen_addr.to_string(),
        }
    }

    /// Router 생성 — 테스트에서 서버 기동 없이 oneshot으로 호출할 수 있게 분리
    pub fn router(&self) -> Router {
        Router::new()
            // 인스턴스 레지스트리
            .route(
                "/api/instances",
                get(handlers::instance::list_instances).post(handlers::instance::create_instance),
            )
            .route(
                "/api/instance/:id",
                get(handlers::instance::get_instance).delete(handlers::instance::delete_instance),
            )
            .route(
                "/api/instance/:id/config",
                get(handlers::instance::get_config).patch(handlers::instance::update_config),
            )
            .route("/api/instance/:id/clone", post(handlers::instance::clone_instance))
            // 수명주기
            .route("/api/instance/:id/start", post(handlers::server::start_server))
            .route("/api/instance/:id/stop", post(handlers::server::stop_server))
            .route("/api/instance/:id/command", post(handlers::server::send_command))
            .route("/api/instance/:id/console", get(handlers::server::get_console))
            .route("/api/instance/:id/status", get(handlers::server::get_status))
            .route("/api/instance/:id/properties", get(handlers::server::read_properties))
            .route("/api/instance/:id/accept-eula", post(handlers::server::accept_eula))
            // 템플릿
            .route(
                "/api/templates",
                get(handlers::template::list_templates).post(handlers::template::add_template),
            )
            .route(
                "/api/template/:name",
                get(handlers::template::get_template).delete(handlers::template::remove_template),
            )
            .route(
                "/api/instance/:id/export-template",
                post(handlers::template::export_template),
            )
            // 백업
            .route("/api/backups", get(handlers::backup::list_backups))
            .route("/api/backups/statistics", get(handlers::backup::backup_statistics))
            .route(
                "/api/instance/:id/backups",
                get(handlers::backup::list_instance_backups).post(handlers::backup::create_backup),
            )
            .route("/api/backup/:id/restore", post(handlers::backup::restore_backup))
            .route("/api/backup/:id", axum::routing::delete(handlers::backup::delete_backup))
            // 플러그인
            .route("/api/instance/:id/plugins", get(handlers::plugin::list_plugins))
            .route("/api/instance/:id/plugins/search", get(handlers::plugin::search_plugins))
            .route("/api/instance/:id/plugin/install", post(handlers::plugin::install_plugin))
            .route(
                "/api/instance/:id/plugin/:name",
                axum::routing::delete(handlers::plugin::uninstall_plugin),
            )
            .route(
                "/api/instance/:id/plugin/:name/enable",
                post(handlers::plugin::enable_plugin),
            )
            .route(
                "/api/instance/:id/plugin/:name/disable",
                post(handlers::plugin::disable_plugin),
            )
            // 플레이어
            .route("/api/instance/:id/players", get(handlers::player::list_players))
            .route(
                "/api/instance/:id/player/:name/kick",
                post(handlers::player::kick_player),
            )
            .route("/api/instance/:id/player/:name/ban", post(handlers::player::ban_player))
            .route(
                "/api/instance/:id/player/:name/pardon",
                post(handlers::player::pardon_player),
            )
            .route("/api/instance/:id/player/:name/op", post(handlers::player::op_player))
            .route("/api/instance/:id/player/:name/deop", post(handlers::player::deop_player))
            .route(
                "/api/instance/:id/player/:name/whitelist",
                post(handlers::player::whitelist_player),
            )
            .route("/api/instance/:id/say", post(handlers::player::broadcast))
            .layer(TraceLayer::new_for_http())
            .with_state(self.clone())
    }

    pub async fn start(self) -> Result<()> {
        tracing::info!("IPC HTTP server starting on {}", self.listen_addr);

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("IPC listening on http://{}", self.listen_addr);

        axum::serve(listener, router).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn test_server() -> IPCServer {
        let supervisor = Arc::new(RwLock::new(Supervisor::new(GlobalConfig::default())));
        let templates = Arc::new(Mutex::new(TemplateStore::new("./server_templates.json")));
        let backups = Arc::new(Mutex::new(BackupStore::new("./backups", 10)));
        IPCServer::new(supervisor, templates, backups, "127.0.0.1:0")
    }

    #[tokio::test]
    async fn test_list_instances_empty() {
        let server = test_server();
        let response = server
            .router()
            .oneshot(Request::builder().uri("/api/instances").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_instance_returns_404() {
        let server = test_server();
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/instance/no-such-id/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let server = test_server();
        let response = server
            .router()
            .oneshot(Request::builder().uri("/api/nothing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
