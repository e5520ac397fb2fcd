//! # crew-foundation
//!
//! Foundation layer for crew:
//! - Error: 중앙 에러 타입 (NotFound, StateConflict, ParseFailure ...)
//! - Config: 통합 설정 (CrewConfig, SandboxLimits)
//! - Storage: JsonStore (원자적 JSON 저장)
//! - Id: prefix 기반 id 생성

pub mod config;
pub mod error;
pub mod id;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config (설정)
// ============================================================================
pub use config::{
    AgentSettings, ContainerRuntime, CrewConfig, ProviderSettings, SandboxLimits,
    CREW_CONFIG_FILE, DEFAULT_BASE_URL, DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL, LIMITS_FILE,
};

// ============================================================================
// Storage (저장소)
// ============================================================================
pub use storage::{JsonCollection, JsonStore};

// ============================================================================
// Id
// ============================================================================
pub use id::prefixed_id;
