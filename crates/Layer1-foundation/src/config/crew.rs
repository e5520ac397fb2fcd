//! Crew Config - 통합 설정
//!
//! 모델 프로바이더, 에이전트, 데이터 디렉토리 설정

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

/// 설정 파일명
pub const CREW_CONFIG_FILE: &str = "config.json";

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

// ============================================================================
// Crew Config (통합)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrewConfig {
    /// 모델 프로바이더
    #[serde(default)]
    pub provider: ProviderSettings,

    /// 에이전트 루프
    #[serde(default)]
    pub agent: AgentSettings,

    /// 상태 파일 디렉토리 (workspaces.json, projects.json ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl CrewConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// 글로벌 + 프로젝트 + 환경변수 병합 로드
    pub fn load() -> Result<Self> {
        let mut config = Self::new();

        // 1. 글로벌 설정
        if let Ok(global) = JsonStore::global() {
            if let Some(global_config) = global.load_optional::<CrewConfig>(CREW_CONFIG_FILE)? {
                debug!(dir = %global.base_dir().display(), "Loaded global config");
                config.merge(global_config);
            }
        }

        // 2. 프로젝트 설정
        if let Ok(project) = JsonStore::current_project() {
            if let Some(project_config) = project.load_optional::<CrewConfig>(CREW_CONFIG_FILE)? {
                debug!(dir = %project.base_dir().display(), "Loaded project config");
                config.merge(project_config);
            }
        }

        // 3. 환경변수 오버라이드
        config.apply_env_overrides();

        Ok(config)
    }

    /// 글로벌 설정 저장
    pub fn save_global(&self) -> Result<()> {
        JsonStore::global()?.save(CREW_CONFIG_FILE, self)
    }

    /// 다른 설정 병합 (other 의 값이 우선)
    pub fn merge(&mut self, other: CrewConfig) {
        self.provider.merge(other.provider);
        self.agent.merge(other.agent);
        if other.data_dir.is_some() {
            self.data_dir = other.data_dir;
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            if !api_key.is_empty() {
                self.provider.api_key = Some(api_key);
            }
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            if !base_url.is_empty() {
                self.provider.base_url = Some(base_url);
            }
        }
        if let Ok(model) = std::env::var("CREW_MODEL") {
            if !model.is_empty() {
                self.provider.model = Some(model);
            }
        }
        if let Ok(dir) = std::env::var("CREW_DATA_DIR") {
            if !dir.is_empty() {
                self.data_dir = Some(PathBuf::from(dir));
            }
        }
    }

    /// 상태 저장 디렉토리
    pub fn data_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        dirs::data_dir()
            .map(|d| d.join("crew"))
            .ok_or_else(|| Error::Config("Cannot find data directory".to_string()))
    }

    /// 상태 저장소
    pub fn data_store(&self) -> Result<JsonStore> {
        Ok(JsonStore::new(self.data_dir()?))
    }
}

// ============================================================================
// Provider
// ============================================================================

/// OpenAI 호환 chat completions 엔드포인트 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ProviderSettings {
    pub fn effective_base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn effective_model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn effective_max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
    }

    pub fn effective_timeout(&self) -> u64 {
        self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    fn merge(&mut self, other: ProviderSettings) {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.max_tokens.is_some() {
            self.max_tokens = other.max_tokens;
        }
        if other.timeout_secs.is_some() {
            self.timeout_secs = other.timeout_secs;
        }
    }
}

// ============================================================================
// Agent
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettings {
    /// Task 실행 시 tool-calling 라운드 상한
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,

    /// 팀 분석 / 스프린트 계획에 쓸 모델 (없으면 provider.model)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planner_model: Option<String>,
}

impl AgentSettings {
    pub fn effective_max_iterations(&self) -> usize {
        self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    fn merge(&mut self, other: AgentSettings) {
        if other.max_iterations.is_some() {
            self.max_iterations = other.max_iterations;
        }
        if other.planner_model.is_some() {
            self.planner_model = other.planner_model;
        }
    }
}
