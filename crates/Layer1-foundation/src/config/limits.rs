//! Sandbox Limits - 컨테이너 자원 및 용량 제한 설정
//!
//! 컨테이너별 메모리/CPU, 실행/빌드 타임아웃, 출력 버퍼 상한,
//! 동시 실행/전체 워크스페이스 수, 유휴 만료 시간을 설정합니다.

use crate::storage::JsonStore;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 제한 설정 파일명
pub const LIMITS_FILE: &str = "limits.json";

/// Container runtime type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerRuntime {
    #[default]
    Docker,
    Podman,
}

impl ContainerRuntime {
    /// Get the CLI command for this runtime
    pub fn command(&self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::Podman => "podman",
        }
    }
}

/// 샌드박스 제한
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SandboxLimits {
    /// 컨테이너 메모리 제한 (docker `--memory` 형식)
    pub memory: String,
    /// 컨테이너 CPU 제한
    pub cpus: f32,
    /// 명령 실행 타임아웃 (초)
    pub exec_timeout_secs: u64,
    /// 이미지 빌드 타임아웃 (초)
    pub build_timeout_secs: u64,
    /// stdout/stderr 각각의 최대 바이트
    pub max_output_bytes: usize,
    /// 동시에 running 상태일 수 있는 워크스페이스 수
    pub max_running: usize,
    /// destroyed 가 아닌 워크스페이스 최대 수
    pub max_total: usize,
    /// 유휴 워크스페이스 정지까지의 시간 (초)
    pub idle_ttl_secs: u64,
    /// 컨테이너 런타임
    pub runtime: ContainerRuntime,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            memory: "512m".to_string(),
            cpus: 1.0,
            exec_timeout_secs: 60,
            build_timeout_secs: 300,
            max_output_bytes: 10 * 1024 * 1024, // 10MB
            max_running: 5,
            max_total: 20,
            idle_ttl_secs: 2 * 60 * 60, // 2h
            runtime: ContainerRuntime::Docker,
        }
    }
}

impl SandboxLimits {
    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn idle_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.idle_ttl_secs as i64)
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 병합 로드
    ///
    /// 나중에 로드된 파일이 이긴다. 파일에 없는 필드는 serde 기본값.
    pub fn load() -> Result<Self> {
        let mut limits = Self::default();

        if let Ok(global) = JsonStore::global() {
            if let Some(global_limits) = global.load_optional::<SandboxLimits>(LIMITS_FILE)? {
                limits = global_limits;
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_limits) = project.load_optional::<SandboxLimits>(LIMITS_FILE)? {
                limits = project_limits;
            }
        }

        Ok(limits)
    }

    /// 특정 저장소에서 로드 (없으면 기본값)
    pub fn load_from(store: &JsonStore) -> Result<Self> {
        Ok(store
            .load_optional::<SandboxLimits>(LIMITS_FILE)?
            .unwrap_or_default())
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        JsonStore::global()?.save(LIMITS_FILE, self)
    }
}
