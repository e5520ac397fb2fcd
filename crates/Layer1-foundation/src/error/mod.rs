//! Error types for crew
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// crew 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // Provider 관련
    // ========================================================================
    #[error("Provider error: {0}")]
    Provider(String),

    #[error("API error: {provider} - {message}")]
    Api { provider: String, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // ========================================================================
    // Tool 관련
    // ========================================================================
    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool} - {message}")]
    ToolExecution { tool: String, message: String },

    // ========================================================================
    // Sandbox 관련
    // ========================================================================
    #[error("Container error: {0}")]
    Container(String),

    /// Operation attempted against a workspace/sprint/task in a blocking state
    #[error("{0}")]
    StateConflict(String),

    // ========================================================================
    // Planning 관련
    // ========================================================================
    /// Model output did not contain the expected JSON shape
    #[error("Failed to parse {what} from model response. Raw response:\n{raw}")]
    ParseFailure { what: String, raw: String },

    #[error("Operation already in progress: {0}")]
    DuplicateOperation(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Timeout: {0}")]
    Timeout(String),

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_) | Error::RateLimited(_) | Error::Http(_)
        )
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::StateConflict(_)
                | Error::ParseFailure { .. }
                | Error::DuplicateOperation(_)
                | Error::InvalidInput(_)
                | Error::Validation(_)
        )
    }

    /// NotFound 생성 헬퍼 ("Workspace ws-1 not found")
    pub fn not_found(kind: &str, id: impl AsRef<str>) -> Self {
        Error::NotFound(format!("{} {} not found", kind, id.as_ref()))
    }

    /// StateConflict 생성 헬퍼
    pub fn state_conflict(message: impl Into<String>) -> Self {
        Error::StateConflict(message.into())
    }

    /// ParseFailure 생성 헬퍼
    pub fn parse_failure(what: impl Into<String>, raw: impl Into<String>) -> Self {
        Error::ParseFailure {
            what: what.into(),
            raw: raw.into(),
        }
    }

    /// API 에러 생성 헬퍼
    pub fn api(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Tool 실행 에러 생성 헬퍼
    pub fn tool_execution(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ToolExecution {
            tool: tool.into(),
            message: message.into(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = Error::not_found("Workspace", "ws-abc");
        assert_eq!(err.to_string(), "Not found: Workspace ws-abc not found");
        assert!(err.is_user_facing());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_parse_failure_keeps_raw() {
        let err = Error::parse_failure("team", "I think you need a designer");
        let msg = err.to_string();
        assert!(msg.contains("team"));
        assert!(msg.contains("I think you need a designer"));
    }
}
