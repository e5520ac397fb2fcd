//! # crew-sandbox
//!
//! Disposable container sandboxes for crew agents:
//! - Driver: docker/podman CLI 위의 상태 없는 컨테이너 연산
//! - Registry: 워크스페이스 생명주기 + 용량 제한 (running / total / idle TTL)
//! - Catalog: 템플릿(빌드 레시피)과 커스텀 도구(스크립트)

pub mod catalog;
pub mod driver;
pub mod registry;
pub mod workspace;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use catalog::{
    CustomTool, Template, TemplateCatalog, TemplatePatch, ToolCatalog, ToolPatch, ToolRuntime,
};
pub use driver::{BuildOutput, ContainerDriver, ContainerSpec, DockerCli, ExecOutput, WORKDIR};
pub use registry::WorkspaceRegistry;
pub use workspace::{resolve_path, RebuildResult, VerifyResult, Workspace, WorkspaceStatus};

#[cfg(any(test, feature = "test-util"))]
pub use fake::FakeDriver;

/// Default recipe for new project workspaces
pub const DEFAULT_DOCKERFILE: &str = r#"FROM python:3.11-slim

RUN apt-get update && apt-get install -y --no-install-recommends \
    curl \
    git \
    && rm -rf /var/lib/apt/lists/*

RUN pip install --no-cache-dir pytest

WORKDIR /workspace
"#;
