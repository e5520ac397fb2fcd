//! Config - 통합 설정 관리
//!
//! - `limits.rs` - 샌드박스 자원/용량 제한
//! - `crew.rs` - CrewConfig 통합 설정 (provider, agent, data dir)

mod crew;
mod limits;

pub use crew::{
    AgentSettings, CrewConfig, ProviderSettings, CREW_CONFIG_FILE, DEFAULT_BASE_URL,
    DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL,
};
pub use limits::{ContainerRuntime, SandboxLimits, LIMITS_FILE};
