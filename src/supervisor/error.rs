//! Supervisor 전용 에러 타입 — 에러 종류를 구분하여 IPC 핸들러에서
//! 적절한 HTTP 상태 코드를 반환할 수 있게 합니다.

use axum::http::StatusCode;

/// Supervisor 작업 중 발생할 수 있는 에러 유형
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    #[error("Instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("Server '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Server '{0}' is not running")]
    NotRunning(String),

    #[error("Core file '{0}' does not exist")]
    MissingCoreFile(String),

    #[error("Failed to spawn server process: {0}")]
    SpawnFailed(String),

    #[error("Server stdin is closed: {0}")]
    BrokenPipe(String),

    #[error("EULA has not been accepted for instance '{0}'")]
    EulaNotAccepted(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl SupervisorError {
    /// HTTP 상태 코드 매핑
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InstanceNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyRunning(_) | Self::NotRunning(_) | Self::BrokenPipe(_) => {
                StatusCode::CONFLICT
            }
            Self::MissingCoreFile(_) | Self::EulaNotAccepted(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            Self::SpawnFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// JSON 에러 응답 생성
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "error_code": self.error_code(),
        })
    }

    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::AlreadyRunning(_) => "ALREADY_RUNNING",
            Self::NotRunning(_) => "NOT_RUNNING",
            Self::MissingCoreFile(_) => "MISSING_CORE_FILE",
            Self::SpawnFailed(_) => "SPAWN_FAILED",
            Self::BrokenPipe(_) => "BROKEN_PIPE",
            Self::EulaNotAccepted(_) => "EULA_NOT_ACCEPTED",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// axum 핸들러에서 SupervisorError를 직접 반환할 수 있도록 IntoResponse 구현
impl axum::response::IntoResponse for SupervisorError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = axum::Json(self.to_json());
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            SupervisorError::InstanceNotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            SupervisorError::AlreadyRunning("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            SupervisorError::MissingCoreFile("server.jar".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            SupervisorError::SpawnFailed("no java".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_json_shape() {
        let err = SupervisorError::NotRunning("main".into());
        let json = err.to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "NOT_RUNNING");
        assert!(json["error"].as_str().unwrap().contains("main"));
    }
}
