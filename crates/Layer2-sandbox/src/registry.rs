//! Workspace Registry
//!
//! Owns every workspace's lifecycle: build, create, start/stop, rebuild,
//! destroy, and capacity enforcement. The map itself is a persisted
//! [`JsonCollection`]; two async locks add the ordering guarantees:
//!
//! - `capacity` is held from eviction through the create/start it guards, so
//!   concurrent requests can never push past the running or total cap.
//! - a per-workspace lock serializes rebuild, exec, file IO and destroy on one
//!   workspace.
//!
//! Lock order is workspace lock, then capacity. Eviction runs under
//! `capacity` alone and never takes a workspace lock.

use crate::catalog::TemplateCatalog;
use crate::driver::{BuildOutput, ContainerDriver, ContainerSpec, ExecOutput};
use crate::workspace::{
    resolve_path, RebuildResult, VerifyResult, Workspace, WorkspaceStatus,
};
use chrono::Utc;
use crew_foundation::{prefixed_id, Error, JsonCollection, JsonStore, Result, SandboxLimits};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

pub const WORKSPACES_FILE: &str = "workspaces.json";

/// What capacity is being made for
#[derive(Debug, Clone, Copy)]
enum Admission<'a> {
    /// A brand new workspace (counts toward both caps)
    Create,
    /// Starting an existing workspace (running cap only)
    Start(&'a str),
}

impl Admission<'_> {
    fn excludes(&self, id: &str) -> bool {
        matches!(self, Admission::Start(own) if *own == id)
    }
}

pub struct WorkspaceRegistry {
    driver: Arc<dyn ContainerDriver>,
    limits: SandboxLimits,
    templates: Arc<TemplateCatalog>,
    workspaces: JsonCollection<Workspace>,
    capacity: AsyncMutex<()>,
    locks: parking_lot::Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WorkspaceRegistry {
    /// Load persisted workspaces
    ///
    /// A workspace still marked `building` was interrupted mid-build and is
    /// marked `failed`.
    pub fn open(
        store: JsonStore,
        driver: Arc<dyn ContainerDriver>,
        limits: SandboxLimits,
        templates: Arc<TemplateCatalog>,
    ) -> Result<Self> {
        let workspaces: JsonCollection<Workspace> =
            JsonCollection::open(store, WORKSPACES_FILE, "Workspace")?;

        for ws in workspaces.values() {
            if ws.status == WorkspaceStatus::Building {
                warn!(id = %ws.id, "Workspace build was interrupted");
                workspaces.update(&ws.id, |w| {
                    w.status = WorkspaceStatus::Failed;
                    w.build_log.push_str("\nBuild interrupted");
                    Ok(())
                })?;
            }
        }

        Ok(Self {
            driver,
            limits,
            templates,
            workspaces,
            capacity: AsyncMutex::new(()),
            locks: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    pub fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    pub fn templates(&self) -> &Arc<TemplateCatalog> {
        &self.templates
    }

    // ========================================================================
    // Create
    // ========================================================================

    /// Build a new workspace from `dockerfile`
    ///
    /// A failed build is not an error: the workspace comes back `failed` with
    /// its build log, and no container exists.
    pub async fn create_from_dockerfile(
        &self,
        name: &str,
        dockerfile: &str,
        network_enabled: bool,
    ) -> Result<Workspace> {
        self.create(name, dockerfile, None, network_enabled).await
    }

    pub async fn create_from_template(
        &self,
        name: &str,
        template_id: &str,
        network_enabled: bool,
    ) -> Result<Workspace> {
        let template = self.templates.require(template_id)?;
        self.create(
            name,
            &template.dockerfile,
            Some(template.id),
            network_enabled,
        )
        .await
    }

    async fn create(
        &self,
        name: &str,
        dockerfile: &str,
        template_id: Option<String>,
        network_enabled: bool,
    ) -> Result<Workspace> {
        let _capacity = self.capacity.lock().await;
        self.enforce_capacity(Admission::Create).await?;

        let ws = Workspace::new(
            prefixed_id("ws"),
            name,
            dockerfile,
            template_id,
            network_enabled,
        );
        self.workspaces.insert(&ws.id, ws.clone())?;
        info!(id = %ws.id, name, network = network_enabled, "Creating workspace");

        if let Err(e) = self.driver.create_volume(&ws.volume_name).await {
            warn!(id = %ws.id, error = %e, "Volume creation failed");
            return self.modify(&ws.id, |w| {
                w.status = WorkspaceStatus::Failed;
                w.build_log = e.to_string();
            });
        }

        let build = self
            .driver
            .build_image(&ws.dockerfile, &ws.image_tag, None)
            .await;
        self.finish_build(&ws, build).await.map(|(ws, _)| ws)
    }

    /// Record a build result and, on success, launch the container
    ///
    /// On success the caller must hold `capacity`.
    async fn finish_build(&self, ws: &Workspace, build: BuildOutput) -> Result<(Workspace, String)> {
        if !build.success {
            warn!(id = %ws.id, "Image build failed");
            let log = build.log.clone();
            let ws = self.modify(&ws.id, |w| {
                w.status = WorkspaceStatus::Failed;
                w.image_id = None;
                w.container_id = None;
                w.build_log = build.log;
            })?;
            return Ok((ws, log));
        }

        let image_id = build.image_id.unwrap_or_else(|| ws.image_tag.clone());
        let mut log = build.log;
        let launched = self.launch(ws).await;

        let ws = self.modify(&ws.id, |w| {
            w.image_id = Some(image_id);
            match &launched {
                Ok(container_id) => {
                    w.container_id = Some(container_id.clone());
                    w.status = WorkspaceStatus::Running;
                }
                Err(e) => {
                    log.push_str(&format!("\n{}", e));
                    w.container_id = None;
                    w.status = WorkspaceStatus::Failed;
                }
            }
            w.build_log = log.clone();
            w.touch();
        })?;

        match &launched {
            Ok(_) => info!(id = %ws.id, container = %ws.container_name, "Workspace running"),
            Err(e) => warn!(id = %ws.id, error = %e, "Container launch failed"),
        }
        Ok((ws, log))
    }

    /// Create and start the workspace's container on its volume
    async fn launch(&self, ws: &Workspace) -> Result<String> {
        if self.driver.container_exists(&ws.container_name).await {
            self.driver.remove_container(&ws.container_name).await;
        }
        let spec = ContainerSpec::new(
            &ws.container_name,
            &ws.image_tag,
            &ws.volume_name,
            &self.limits,
            ws.network_enabled,
        );
        let container_id = self.driver.create_container(&spec).await?;
        self.driver.start_container(&ws.container_name).await?;
        Ok(container_id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Fetch a workspace, touching `lastAccessedAt` unless destroyed
    pub fn get(&self, id: &str) -> Result<Option<Workspace>> {
        match self.workspaces.get(id) {
            None => Ok(None),
            Some(ws) if ws.status.is_terminal() => Ok(Some(ws)),
            Some(_) => self
                .workspaces
                .update(id, |w| {
                    w.touch();
                    Ok(w.clone())
                })
                .map(Some),
        }
    }

    /// Like `get`, but NotFound for unknown ids
    pub fn require(&self, id: &str) -> Result<Workspace> {
        self.get(id)?
            .ok_or_else(|| Error::not_found(self.workspaces.kind(), id))
    }

    /// Every workspace that is not destroyed, oldest first
    pub fn list(&self) -> Vec<Workspace> {
        let mut live: Vec<Workspace> = self
            .workspaces
            .values()
            .into_iter()
            .filter(|w| w.status.is_live())
            .collect();
        live.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        live
    }

    /// Every workspace ever created, destroyed included
    pub fn list_all(&self) -> Vec<Workspace> {
        let mut all = self.workspaces.values();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Replace the stored recipe; takes effect on the next rebuild
    pub fn update_dockerfile(&self, id: &str, dockerfile: &str) -> Result<Workspace> {
        self.workspaces.update(id, |w| {
            w.ensure_not_destroyed()?;
            w.dockerfile = dockerfile.to_string();
            w.touch();
            Ok(w.clone())
        })
    }

    /// Tear down container and image, rebuild from the current recipe with
    /// the volume as build context, and launch a fresh container on the same
    /// volume.
    pub async fn rebuild(&self, id: &str) -> Result<RebuildResult> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let ws = self.workspaces.require(id)?;
        ws.ensure_not_destroyed()?;
        info!(id, "Rebuilding workspace");

        self.driver.stop_container(&ws.container_name).await;
        self.driver.remove_container(&ws.container_name).await;
        self.driver.remove_image(&ws.image_tag).await;

        let ws = self.modify(id, |w| {
            w.status = WorkspaceStatus::Building;
            w.container_id = None;
            w.image_id = None;
        })?;

        let build = self
            .driver
            .build_image(&ws.dockerfile, &ws.image_tag, Some(&ws.volume_name))
            .await;

        let success = build.success;
        let (ws, log) = if success {
            let _capacity = self.capacity.lock().await;
            if let Err(e) = self.enforce_capacity(Admission::Start(id)).await {
                self.modify(id, |w| w.status = WorkspaceStatus::Stopped)?;
                return Err(e);
            }
            self.finish_build(&ws, build).await?
        } else {
            self.finish_build(&ws, build).await?
        };

        Ok(RebuildResult {
            success: success && ws.is_running(),
            log,
            workspace: ws,
        })
    }

    /// Make sure the workspace's container is up, starting it if needed
    pub async fn ensure_running(&self, id: &str) -> Result<Workspace> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;
        self.ensure_running_locked(id).await
    }

    /// Alias of [`ensure_running`](Self::ensure_running)
    pub async fn start(&self, id: &str) -> Result<Workspace> {
        self.ensure_running(id).await
    }

    /// Caller holds the workspace lock
    async fn ensure_running_locked(&self, id: &str) -> Result<Workspace> {
        let ws = self.require(id)?;
        if let Some(blocker) = ws.start_blocker() {
            return Err(Error::state_conflict(blocker));
        }
        if ws.is_running() && self.driver.is_running(&ws.container_name).await {
            return Ok(ws);
        }

        let _capacity = self.capacity.lock().await;
        let ws = self.require(id)?;
        if let Some(blocker) = ws.start_blocker() {
            return Err(Error::state_conflict(blocker));
        }
        self.enforce_capacity(Admission::Start(id)).await?;

        info!(id, "Starting workspace");
        let container_id = if self.driver.container_exists(&ws.container_name).await {
            self.driver.start_container(&ws.container_name).await?;
            ws.container_id.clone()
        } else {
            Some(self.launch(&ws).await?)
        };

        self.modify(id, |w| {
            w.container_id = container_id;
            w.status = WorkspaceStatus::Running;
            w.touch();
        })
    }

    /// Stop a running workspace; anything else is left as is
    pub async fn stop(&self, id: &str) -> Result<Workspace> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let ws = self.workspaces.require(id)?;
        if !ws.is_running() {
            return Ok(ws);
        }
        info!(id, "Stopping workspace");
        self.driver.stop_container(&ws.container_name).await;
        self.modify(id, |w| w.status = WorkspaceStatus::Stopped)
    }

    /// Tear everything down and mark the workspace destroyed for good
    pub async fn destroy(&self, id: &str, keep_volume: bool) -> Result<Workspace> {
        let lock = self.lock_for(id);
        let destroyed = {
            let _guard = lock.lock().await;
            let ws = self.workspaces.require(id)?;
            if ws.status.is_terminal() {
                return Ok(ws);
            }
            info!(id, keep_volume, "Destroying workspace");
            self.teardown(&ws, keep_volume).await?
        };
        self.locks.lock().remove(id);
        Ok(destroyed)
    }

    async fn teardown(&self, ws: &Workspace, keep_volume: bool) -> Result<Workspace> {
        self.driver.stop_container(&ws.container_name).await;
        self.driver.remove_container(&ws.container_name).await;
        self.driver.remove_image(&ws.image_tag).await;
        if !keep_volume {
            self.driver.remove_volume(&ws.volume_name).await;
        }
        self.modify(&ws.id, |w| {
            w.status = WorkspaceStatus::Destroyed;
            w.container_id = None;
            w.image_id = None;
        })
    }

    // ========================================================================
    // Exec / Files
    // ========================================================================

    /// Run `command` in the workspace (starting it if needed)
    ///
    /// Non-zero exits and timeouts are in the returned output, not errors.
    pub async fn exec(&self, id: &str, command: &str) -> Result<ExecOutput> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let ws = self.ensure_running_locked(id).await?;
        let output = self
            .driver
            .exec(&ws.container_name, command, self.limits.exec_timeout())
            .await;
        self.touch(id)?;
        Ok(output)
    }

    /// Write `content` to `path` (relative to /workspace); returns the
    /// resolved absolute path
    pub async fn write_file(&self, id: &str, path: &str, content: &str) -> Result<String> {
        let resolved = resolve_path(path)?;
        self.put_file(id, &resolved, content.as_bytes()).await?;
        Ok(resolved)
    }

    pub async fn read_file(&self, id: &str, path: &str) -> Result<String> {
        let resolved = resolve_path(path)?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let ws = self.ensure_running_locked(id).await?;
        let bytes = self.driver.copy_from(&ws.container_name, &resolved).await?;
        self.touch(id)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Copy bytes to an absolute in-container path, unchecked
    pub(crate) async fn put_file(&self, id: &str, dest: &str, content: &[u8]) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let ws = self.ensure_running_locked(id).await?;
        self.driver.copy_to(&ws.container_name, dest, content).await?;
        self.touch(id)
    }

    /// Rebuild, then run `test_command` against the fresh container
    pub async fn verify(&self, id: &str, test_command: &str) -> Result<VerifyResult> {
        let rebuilt = self.rebuild(id).await?;
        let build = BuildOutput {
            success: rebuilt.success,
            image_id: rebuilt.workspace.image_id.clone(),
            log: rebuilt.log,
        };
        if !build.success {
            return Ok(VerifyResult { build, test: None });
        }

        let test = self.exec(id, test_command).await?;
        info!(id, passed = test.success(), "Workspace verified");
        Ok(VerifyResult {
            build,
            test: Some(test),
        })
    }

    // ========================================================================
    // Capacity
    // ========================================================================

    /// Evict until the admission fits. Caller holds `capacity`.
    ///
    /// 1. stop running workspaces idle past the TTL
    /// 2. stop the least recently accessed running workspace while at the running cap
    /// 3. (create only) destroy the least recently accessed live workspace while at the total cap
    ///
    /// A victim's workspace lock is taken with `try_lock`, never awaited (the
    /// lock order is workspace then capacity). A workspace whose lock is held
    /// is in use and is never evicted.
    async fn enforce_capacity(&self, admission: Admission<'_>) -> Result<()> {
        let now = Utc::now();
        let ttl = self.limits.idle_ttl();

        let stale: Vec<Workspace> = self
            .workspaces
            .values()
            .into_iter()
            .filter(|w| w.is_running() && !admission.excludes(&w.id))
            .filter(|w| now - w.last_accessed_at > ttl)
            .collect();
        for ws in stale {
            if let Some((ws, _guard)) = self.claim_victim(vec![ws], Workspace::is_running) {
                info!(id = %ws.id, "Evicting idle workspace");
                self.evict_stop(&ws).await?;
            }
        }

        loop {
            let running: Vec<Workspace> = self
                .workspaces
                .values()
                .into_iter()
                .filter(|w| w.is_running() && !admission.excludes(&w.id))
                .collect();
            if running.len() < self.limits.max_running {
                break;
            }
            let Some((oldest, _guard)) = self.claim_victim(running, Workspace::is_running) else {
                return Err(Error::state_conflict(format!(
                    "Running workspace limit ({}) reached and every running workspace is busy",
                    self.limits.max_running
                )));
            };
            info!(id = %oldest.id, "Running cap reached, stopping least recently used workspace");
            self.evict_stop(&oldest).await?;
        }

        if let Admission::Create = admission {
            loop {
                let live: Vec<Workspace> = self
                    .workspaces
                    .values()
                    .into_iter()
                    .filter(|w| w.status.is_live())
                    .collect();
                if live.len() < self.limits.max_total {
                    break;
                }
                let candidates = live
                    .into_iter()
                    .filter(|w| w.status != WorkspaceStatus::Building)
                    .collect();
                let evictable =
                    |w: &Workspace| w.status.is_live() && w.status != WorkspaceStatus::Building;
                let Some((oldest, guard)) = self.claim_victim(candidates, evictable) else {
                    return Err(Error::state_conflict(format!(
                        "Workspace limit ({}) reached and every workspace is busy",
                        self.limits.max_total
                    )));
                };
                info!(id = %oldest.id, "Total cap reached, destroying least recently used workspace");
                self.teardown(&oldest, false).await?;
                drop(guard);
                self.locks.lock().remove(&oldest.id);
            }
        }

        Ok(())
    }

    /// Least recently accessed candidate that nobody is using, with its
    /// workspace lock held
    ///
    /// The stored record is re-read under the lock and must still satisfy
    /// `eligible`.
    fn claim_victim(
        &self,
        mut candidates: Vec<Workspace>,
        eligible: impl Fn(&Workspace) -> bool,
    ) -> Option<(Workspace, OwnedMutexGuard<()>)> {
        candidates.sort_by_key(|w| w.last_accessed_at);
        candidates.into_iter().find_map(|candidate| {
            let Ok(guard) = self.lock_for(&candidate.id).try_lock_owned() else {
                debug!(id = %candidate.id, "Workspace busy, not evicting");
                return None;
            };
            let current = self.workspaces.get(&candidate.id)?;
            eligible(&current).then_some((current, guard))
        })
    }

    async fn evict_stop(&self, ws: &Workspace) -> Result<()> {
        self.driver.stop_container(&ws.container_name).await;
        self.modify(&ws.id, |w| {
            if w.status == WorkspaceStatus::Running {
                w.status = WorkspaceStatus::Stopped;
            }
        })?;
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn lock_for(&self, id: &str) -> Arc<AsyncMutex<()>> {
        self.locks.lock().entry(id.to_string()).or_default().clone()
    }

    /// Apply `f` to the stored workspace; a destroyed workspace is never changed
    fn modify(&self, id: &str, f: impl FnOnce(&mut Workspace)) -> Result<Workspace> {
        self.workspaces.update(id, |w| {
            if !w.status.is_terminal() {
                f(w);
            }
            Ok(w.clone())
        })
    }

    fn touch(&self, id: &str) -> Result<()> {
        self.modify(id, Workspace::touch).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeDriver;
    use std::time::Duration;

    const RECIPE: &str = "FROM alpine:3.19\nWORKDIR /workspace";

    struct Fixture {
        _dir: tempfile::TempDir,
        driver: Arc<FakeDriver>,
        registry: Arc<WorkspaceRegistry>,
    }

    fn fixture(limits: SandboxLimits) -> Fixture {
        fixture_with(FakeDriver::new(), limits)
    }

    fn fixture_with(driver: FakeDriver, limits: SandboxLimits) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let driver = Arc::new(driver);
        let templates = Arc::new(TemplateCatalog::open(store.clone()).unwrap());
        let registry = WorkspaceRegistry::open(store, driver.clone(), limits, templates).unwrap();
        Fixture {
            _dir: dir,
            driver,
            registry: Arc::new(registry),
        }
    }

    #[tokio::test]
    async fn test_create_and_exec_echo() {
        let f = fixture(SandboxLimits::default());
        let ws = f
            .registry
            .create_from_dockerfile("demo", RECIPE, false)
            .await
            .unwrap();

        assert_eq!(ws.status, WorkspaceStatus::Running);
        assert!(ws.image_id.is_some());
        assert!(f.driver.running(&ws.container_name));

        let spec = &f.driver.specs()[0];
        assert!(!spec.network_enabled);
        assert_eq!(spec.memory, "512m");
        assert_eq!(spec.volume, ws.volume_name);

        let out = f.registry.exec(&ws.id, "echo hi").await.unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn test_build_failure_is_data() {
        let f = fixture(SandboxLimits::default());
        let ws = f
            .registry
            .create_from_dockerfile("broken", "RUN nothing", false)
            .await
            .unwrap();

        assert_eq!(ws.status, WorkspaceStatus::Failed);
        assert!(ws.build_log.contains("parse error"));
        assert!(!f.driver.has_container(&ws.container_name));
    }

    #[tokio::test]
    async fn test_create_from_unknown_template() {
        let f = fixture(SandboxLimits::default());
        let err = f
            .registry
            .create_from_template("x", "tpl-missing", false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_from_template() {
        let f = fixture(SandboxLimits::default());
        let tpl = f
            .registry
            .templates()
            .create("alpine", "", RECIPE, None)
            .unwrap();
        let ws = f
            .registry
            .create_from_template("t", &tpl.id, true)
            .await
            .unwrap();
        assert_eq!(ws.template_id.as_deref(), Some(tpl.id.as_str()));
        assert_eq!(ws.dockerfile, RECIPE);
        assert!(f.driver.specs()[0].network_enabled);
    }

    #[tokio::test]
    async fn test_invalid_rebuild_fails_and_blocks_exec() {
        let f = fixture(SandboxLimits::default());
        let ws = f
            .registry
            .create_from_dockerfile("demo", RECIPE, false)
            .await
            .unwrap();

        f.registry
            .update_dockerfile(&ws.id, "FROM alpine\nINVALID instruction")
            .unwrap();
        let result = f.registry.rebuild(&ws.id).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.workspace.status, WorkspaceStatus::Failed);
        assert!(result.workspace.image_id.is_none());

        let err = f.registry.exec(&ws.id, "echo hi").await.unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));
        assert!(err.to_string().contains("failed to build"));
    }

    #[tokio::test]
    async fn test_rebuild_preserves_volume_and_name() {
        let f = fixture(SandboxLimits::default());
        let ws = f
            .registry
            .create_from_dockerfile("demo", RECIPE, false)
            .await
            .unwrap();
        f.registry
            .write_file(&ws.id, "notes.txt", "keep me")
            .await
            .unwrap();

        let result = f.registry.rebuild(&ws.id).await.unwrap();
        assert!(result.success);
        let after = result.workspace;
        assert_eq!(after.volume_name, ws.volume_name);
        assert_eq!(after.container_name, ws.container_name);
        assert_ne!(after.image_id, ws.image_id);
        assert!(f
            .driver
            .calls()
            .contains(&format!("build {} seed={}", ws.image_tag, ws.volume_name)));

        let content = f.registry.read_file(&ws.id, "notes.txt").await.unwrap();
        assert_eq!(content, "keep me");
    }

    #[tokio::test]
    async fn test_destroy_is_terminal() {
        let f = fixture(SandboxLimits::default());
        let ws = f
            .registry
            .create_from_dockerfile("demo", RECIPE, false)
            .await
            .unwrap();

        let destroyed = f.registry.destroy(&ws.id, false).await.unwrap();
        assert_eq!(destroyed.status, WorkspaceStatus::Destroyed);
        assert!(!f.driver.has_volume(&ws.volume_name));
        assert!(!f.driver.has_image(&ws.image_tag));

        assert!(f.registry.rebuild(&ws.id).await.is_err());
        assert!(f.registry.ensure_running(&ws.id).await.is_err());
        assert!(f.registry.update_dockerfile(&ws.id, RECIPE).is_err());
        f.registry.stop(&ws.id).await.unwrap();
        f.registry.destroy(&ws.id, true).await.unwrap();

        let after = f.registry.get(&ws.id).unwrap().unwrap();
        assert_eq!(after.status, WorkspaceStatus::Destroyed);
        assert!(f.registry.list().is_empty());
        assert_eq!(f.registry.list_all().len(), 1);
    }

    #[tokio::test]
    async fn test_destroy_keep_volume() {
        let f = fixture(SandboxLimits::default());
        let ws = f
            .registry
            .create_from_dockerfile("demo", RECIPE, false)
            .await
            .unwrap();
        f.registry.destroy(&ws.id, true).await.unwrap();
        assert!(f.driver.has_volume(&ws.volume_name));
        assert!(!f.driver.has_container(&ws.container_name));
    }

    #[tokio::test]
    async fn test_stop_then_exec_restarts() {
        let f = fixture(SandboxLimits::default());
        let ws = f
            .registry
            .create_from_dockerfile("demo", RECIPE, false)
            .await
            .unwrap();

        let stopped = f.registry.stop(&ws.id).await.unwrap();
        assert_eq!(stopped.status, WorkspaceStatus::Stopped);
        assert!(!f.driver.running(&ws.container_name));

        let out = f.registry.exec(&ws.id, "echo back").await.unwrap();
        assert_eq!(out.stdout, "back\n");
        assert!(f.driver.running(&ws.container_name));
    }

    #[tokio::test]
    async fn test_dead_container_is_restarted() {
        let f = fixture(SandboxLimits::default());
        let ws = f
            .registry
            .create_from_dockerfile("demo", RECIPE, false)
            .await
            .unwrap();
        f.driver.kill(&ws.container_name);

        let ws = f.registry.ensure_running(&ws.id).await.unwrap();
        assert!(f.driver.running(&ws.container_name));
    }

    #[tokio::test]
    async fn test_running_cap_stops_least_recently_used() {
        let f = fixture(SandboxLimits {
            max_running: 2,
            ..Default::default()
        });
        let a = f.registry.create_from_dockerfile("a", RECIPE, false).await.unwrap();
        let b = f.registry.create_from_dockerfile("b", RECIPE, false).await.unwrap();
        // a becomes most recently used
        f.registry.exec(&a.id, "echo a").await.unwrap();

        let c = f.registry.create_from_dockerfile("c", RECIPE, false).await.unwrap();
        assert_eq!(c.status, WorkspaceStatus::Running);
        assert_eq!(f.registry.require(&b.id).unwrap().status, WorkspaceStatus::Stopped);
        assert_eq!(f.registry.require(&a.id).unwrap().status, WorkspaceStatus::Running);
        assert_eq!(f.driver.running_count(), 2);

        // restarting b must stop someone else
        f.registry.ensure_running(&b.id).await.unwrap();
        assert_eq!(f.driver.running_count(), 2);
    }

    #[tokio::test]
    async fn test_total_cap_destroys_least_recently_used() {
        let f = fixture(SandboxLimits {
            max_total: 2,
            ..Default::default()
        });
        let a = f.registry.create_from_dockerfile("a", RECIPE, false).await.unwrap();
        let b = f.registry.create_from_dockerfile("b", RECIPE, false).await.unwrap();
        f.registry.exec(&a.id, "echo a").await.unwrap();

        f.registry.create_from_dockerfile("c", RECIPE, false).await.unwrap();
        let b = f.registry.require(&b.id).unwrap();
        assert_eq!(b.status, WorkspaceStatus::Destroyed);
        assert!(!f.driver.has_volume(&b.volume_name));
        assert_eq!(f.registry.list().len(), 2);
    }

    #[tokio::test]
    async fn test_workspace_in_use_is_not_destroyed_for_capacity() {
        let f = fixture_with(
            FakeDriver::new().with_exec_delay(Duration::from_millis(300)),
            SandboxLimits {
                max_total: 1,
                ..Default::default()
            },
        );
        let a = f.registry.create_from_dockerfile("a", RECIPE, false).await.unwrap();

        let registry = f.registry.clone();
        let id = a.id.clone();
        let exec = tokio::spawn(async move { registry.exec(&id, "echo hi").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = f
            .registry
            .create_from_dockerfile("b", RECIPE, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateConflict(_)));

        let out = exec.await.unwrap().unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(f.registry.require(&a.id).unwrap().status, WorkspaceStatus::Running);
    }

    #[tokio::test]
    async fn test_busy_workspace_counts_as_recently_used() {
        let f = fixture_with(
            FakeDriver::new().with_exec_delay(Duration::from_millis(300)),
            SandboxLimits {
                max_running: 2,
                ..Default::default()
            },
        );
        // a is the least recently used, but busy
        let a = f.registry.create_from_dockerfile("a", RECIPE, false).await.unwrap();
        let b = f.registry.create_from_dockerfile("b", RECIPE, false).await.unwrap();

        let registry = f.registry.clone();
        let id = a.id.clone();
        let exec = tokio::spawn(async move { registry.exec(&id, "echo busy").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let c = f.registry.create_from_dockerfile("c", RECIPE, false).await.unwrap();
        assert_eq!(c.status, WorkspaceStatus::Running);
        assert_eq!(f.registry.require(&b.id).unwrap().status, WorkspaceStatus::Stopped);

        let out = exec.await.unwrap().unwrap();
        assert_eq!(out.stdout, "busy\n");
        assert_eq!(f.registry.require(&a.id).unwrap().status, WorkspaceStatus::Running);
    }

    #[tokio::test]
    async fn test_idle_workspaces_are_stopped() {
        let f = fixture(SandboxLimits {
            idle_ttl_secs: 0,
            ..Default::default()
        });
        let a = f.registry.create_from_dockerfile("a", RECIPE, false).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        f.registry.create_from_dockerfile("b", RECIPE, false).await.unwrap();
        assert_eq!(f.registry.require(&a.id).unwrap().status, WorkspaceStatus::Stopped);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_respect_caps() {
        let f = fixture(SandboxLimits {
            max_running: 2,
            max_total: 3,
            ..Default::default()
        });

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = f.registry.clone();
                tokio::spawn(async move {
                    registry
                        .create_from_dockerfile(&format!("ws{}", i), RECIPE, false)
                        .await
                })
            })
            .collect();
        for handle in futures::future::join_all(handles).await {
            handle.unwrap().unwrap();
        }

        let all = f.registry.list_all();
        let running = all.iter().filter(|w| w.is_running()).count();
        let live = all.iter().filter(|w| w.status.is_live()).count();
        assert!(running <= 2, "running = {}", running);
        assert!(live <= 3, "live = {}", live);
        assert!(f.driver.running_count() <= 2);
    }

    #[tokio::test]
    async fn test_paths_outside_workspace_rejected() {
        let f = fixture(SandboxLimits::default());
        let ws = f.registry.create_from_dockerfile("a", RECIPE, false).await.unwrap();
        let err = f
            .registry
            .write_file(&ws.id, "../etc/passwd", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_verify_runs_test_command() {
        let f = fixture(SandboxLimits::default());
        let ws = f.registry.create_from_dockerfile("a", RECIPE, false).await.unwrap();
        let result = f.registry.verify(&ws.id, "echo ok").await.unwrap();
        assert!(result.passed());
        assert_eq!(result.test.unwrap().stdout, "ok\n");
    }

    #[tokio::test]
    async fn test_reload_marks_interrupted_builds_failed() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path());
        let ws = Workspace::new("ws-stuck", "stuck", RECIPE, None, false);
        let mut map = std::collections::BTreeMap::new();
        map.insert(ws.id.clone(), ws);
        store.save(WORKSPACES_FILE, &map).unwrap();

        let templates = Arc::new(TemplateCatalog::open(store.clone()).unwrap());
        let registry = WorkspaceRegistry::open(
            store,
            Arc::new(FakeDriver::new()),
            SandboxLimits::default(),
            templates,
        )
        .unwrap();
        assert_eq!(
            registry.require("ws-stuck").unwrap().status,
            WorkspaceStatus::Failed
        );
    }
}
