use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::supervisor::error::SupervisorError;
use crate::template::ServerTemplate;

use super::super::IPCServer;

/// GET /api/templates - 모든 템플릿 목록
pub async fn list_templates(State(state): State<IPCServer>) -> impl IntoResponse {
    let templates = state.templates.lock().await;
    Json(json!({ "templates": templates.list() }))
}

/// GET /api/template/:name - 템플릿 조회
pub async fn get_template(
    Path(name): Path<String>,
    State(state): State<IPCServer>,
) -> impl IntoResponse {
    let templates = state.templates.lock().await;
    match templates.get(&name) {
        Some(template) => (StatusCode::OK, Json(json!({ "template": template }))).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("Template '{}' not found", name) })),
        )
            .into_response(),
    }
}

/// POST /api/templates - 템플릿 추가 (동일 이름 교체)
pub async fn add_template(
    State(state): State<IPCServer>,
    Json(template): Json<ServerTemplate>,
) -> Result<impl IntoResponse, SupervisorError> {
    let mut templates = state.templates.lock().await;
    let name = template.name.clone();
    templates.add(template).map_err(SupervisorError::Internal)?;
    tracing::info!("Saved template '{}'", name);
    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}

/// DELETE /api/template/:name - 템플릿 삭제
pub async fn remove_template(
    Path(name): Path<String>,
    State(state): State<IPCServer>,
) -> Result<impl IntoResponse, SupervisorError> {
    let mut templates = state.templates.lock().await;
    let removed = templates.remove(&name).map_err(SupervisorError::Internal)?;
    if removed {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(SupervisorError::InvalidConfig(format!("Template '{}' not found", name)))
    }
}

#[derive(Debug, Deserialize)]
pub struct ExportTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// POST /api/instance/:id/export-template - 인스턴스 설정을 템플릿으로 내보내기
pub async fn export_template(
    Path(id): Path<String>,
    State(state): State<IPCServer>,
    Json(payload): Json<ExportTemplateRequest>,
) -> Result<impl IntoResponse, SupervisorError> {
    let (instance_name, config) = {
        let supervisor = state.supervisor.read().await;
        let instance = supervisor
            .instance_store
            .get(&id)
            .ok_or(SupervisorError::InstanceNotFound(id))?;
        (instance.name.clone(), instance.config().values().clone())
    };

    let template = ServerTemplate::new(&payload.name, &payload.description, config);

    let mut templates = state.templates.lock().await;
    templates.add(template).map_err(SupervisorError::Internal)?;

    tracing::info!("Exported instance '{}' as template '{}'", instance_name, payload.name);
    Ok((StatusCode::CREATED, Json(json!({ "success": true }))))
}
