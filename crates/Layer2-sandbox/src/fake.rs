//! In-memory container driver for tests
//!
//! Behaves enough like docker for the registry and agents to be exercised
//! without a daemon: volumes hold files, containers run or don't, images
//! exist once built.

use crate::driver::{BuildOutput, ContainerDriver, ContainerSpec, ExecOutput, WORKDIR};
use async_trait::async_trait;
use crew_foundation::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct FakeContainer {
    image: String,
    volume: String,
    running: bool,
}

#[derive(Default)]
struct FakeState {
    volumes: HashSet<String>,
    images: HashMap<String, String>,
    containers: HashMap<String, FakeContainer>,
    /// (scope, absolute path) -> content; scope is the volume for /workspace paths
    files: BTreeMap<(String, String), Vec<u8>>,
    calls: Vec<String>,
    specs: Vec<ContainerSpec>,
    responses: Vec<(String, ExecOutput)>,
    next_id: usize,
}

#[derive(Default)]
pub struct FakeDriver {
    state: Mutex<FakeState>,
    exec_delay: Option<Duration>,
    active_execs: AtomicUsize,
    max_active_execs: AtomicUsize,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every exec sleeps this long (to observe concurrency)
    pub fn with_exec_delay(mut self, delay: Duration) -> Self {
        self.exec_delay = Some(delay);
        self
    }

    /// Commands starting with `prefix` return `output`
    pub fn respond(&self, prefix: impl Into<String>, output: ExecOutput) {
        self.state.lock().responses.push((prefix.into(), output));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().specs.clone()
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.state.lock().volumes.contains(name)
    }

    pub fn has_image(&self, tag: &str) -> bool {
        self.state.lock().images.contains_key(tag)
    }

    pub fn has_container(&self, name: &str) -> bool {
        self.state.lock().containers.contains_key(name)
    }

    pub fn running(&self, name: &str) -> bool {
        self.state
            .lock()
            .containers
            .get(name)
            .map(|c| c.running)
            .unwrap_or(false)
    }

    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .containers
            .values()
            .filter(|c| c.running)
            .count()
    }

    /// Read a file straight out of a volume
    pub fn volume_file(&self, volume: &str, path: &str) -> Option<String> {
        self.state
            .lock()
            .files
            .get(&(volume.to_string(), path.to_string()))
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    /// Stop a container behind the registry's back
    pub fn kill(&self, name: &str) {
        if let Some(c) = self.state.lock().containers.get_mut(name) {
            c.running = false;
        }
    }

    /// Highest number of execs observed in flight at once
    pub fn max_concurrent_execs(&self) -> usize {
        self.max_active_execs.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn scope(state: &FakeState, container: &str, path: &str) -> Result<(String, String)> {
        let c = state
            .containers
            .get(container)
            .ok_or_else(|| Error::Container(format!("No such container: {}", container)))?;
        if path == WORKDIR || path.starts_with(&format!("{}/", WORKDIR)) {
            Ok((c.volume.clone(), path.to_string()))
        } else {
            Ok((format!("container:{}", container), path.to_string()))
        }
    }

    fn run_command(&self, name: &str, command: &str) -> ExecOutput {
        let state = self.state.lock();

        match state.containers.get(name) {
            Some(c) if c.running => {}
            Some(_) => {
                return ExecOutput::failed_to_run(format!("container {} is not running", name))
            }
            None => return ExecOutput::failed_to_run(format!("No such container: {}", name)),
        }

        if let Some((_, out)) = state
            .responses
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
        {
            return out.clone();
        }

        let command = command.trim();
        if let Some(rest) = command.strip_prefix("echo ") {
            return ExecOutput {
                stdout: format!("{}\n", rest.trim_matches(|c| c == '\'' || c == '"')),
                ..Default::default()
            };
        }
        if let Some(code) = command.strip_prefix("exit ") {
            return ExecOutput {
                exit_code: code.trim().parse().unwrap_or(1),
                ..Default::default()
            };
        }
        if let Some(path) = command.strip_prefix("cat ") {
            let path = path.trim_matches(|c| c == '\'' || c == '"');
            let path = if path.starts_with('/') {
                path.to_string()
            } else {
                format!("{}/{}", WORKDIR, path)
            };
            return match Self::scope(&state, name, &path)
                .ok()
                .and_then(|key| state.files.get(&key))
            {
                Some(content) => ExecOutput {
                    stdout: String::from_utf8_lossy(content).to_string(),
                    ..Default::default()
                },
                None => ExecOutput {
                    stderr: format!("cat: {}: No such file or directory", path),
                    exit_code: 1,
                    ..Default::default()
                },
            };
        }

        ExecOutput::default()
    }
}

#[async_trait]
impl ContainerDriver for FakeDriver {
    async fn create_volume(&self, name: &str) -> Result<()> {
        self.record(format!("volume create {}", name));
        self.state.lock().volumes.insert(name.to_string());
        Ok(())
    }

    async fn remove_volume(&self, name: &str) {
        self.record(format!("volume rm {}", name));
        let mut state = self.state.lock();
        state.volumes.remove(name);
        state.files.retain(|(scope, _), _| scope != name);
    }

    async fn build_image(
        &self,
        recipe: &str,
        tag: &str,
        seed_volume: Option<&str>,
    ) -> BuildOutput {
        self.record(match seed_volume {
            Some(volume) => format!("build {} seed={}", tag, volume),
            None => format!("build {}", tag),
        });

        let has_from = recipe
            .lines()
            .any(|l| l.trim_start().to_uppercase().starts_with("FROM "));
        if !has_from || recipe.contains("INVALID") {
            return BuildOutput {
                success: false,
                image_id: None,
                log: "failed to solve: dockerfile parse error".to_string(),
            };
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = format!("sha256:{:012x}", state.next_id);
        state.images.insert(tag.to_string(), id.clone());
        BuildOutput {
            success: true,
            image_id: Some(id),
            log: format!("Successfully tagged {}", tag),
        }
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(format!("create {}", spec.name));
        let mut state = self.state.lock();
        state.specs.push(spec.clone());

        if !state.images.contains_key(&spec.image) {
            return Err(Error::Container(format!("No such image: {}", spec.image)));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(Error::Container(format!(
                "Conflict. The container name {} is already in use",
                spec.name
            )));
        }

        state.volumes.insert(spec.volume.clone());
        state.next_id += 1;
        let id = format!("{:016x}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                image: spec.image.clone(),
                volume: spec.volume.clone(),
                running: false,
            },
        );
        Ok(id)
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.record(format!("start {}", name));
        let mut state = self.state.lock();
        let images = state.images.clone();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::Container(format!("No such container: {}", name)))?;
        if !images.contains_key(&container.image) {
            return Err(Error::Container(format!("No such image: {}", container.image)));
        }
        container.running = true;
        Ok(())
    }

    async fn stop_container(&self, name: &str) {
        self.record(format!("stop {}", name));
        self.kill(name);
    }

    async fn remove_container(&self, name: &str) {
        self.record(format!("rm {}", name));
        let mut state = self.state.lock();
        state.containers.remove(name);
        let scope = format!("container:{}", name);
        state.files.retain(|(s, _), _| *s != scope);
    }

    async fn remove_image(&self, tag: &str) {
        self.record(format!("rmi {}", tag));
        self.state.lock().images.remove(tag);
    }

    async fn exec(&self, name: &str, command: &str, _timeout: Duration) -> ExecOutput {
        self.record(format!("exec {} {}", name, command));

        let active = self.active_execs.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_execs.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.exec_delay {
            tokio::time::sleep(delay).await;
        }
        let output = self.run_command(name, command);
        self.active_execs.fetch_sub(1, Ordering::SeqCst);
        output
    }

    async fn copy_to(&self, name: &str, dest: &str, content: &[u8]) -> Result<()> {
        self.record(format!("cp -> {}:{}", name, dest));
        let mut state = self.state.lock();
        let key = Self::scope(&state, name, dest)?;
        state.files.insert(key, content.to_vec());
        Ok(())
    }

    async fn copy_from(&self, name: &str, src: &str) -> Result<Vec<u8>> {
        self.record(format!("cp <- {}:{}", name, src));
        let state = self.state.lock();
        let key = Self::scope(&state, name, src)?;
        state.files.get(&key).cloned().ok_or_else(|| {
            Error::Container(format!(
                "Could not find the file {} in container {}",
                src, name
            ))
        })
    }

    async fn is_running(&self, name: &str) -> bool {
        self.running(name)
    }

    async fn container_exists(&self, name: &str) -> bool {
        self.has_container(name)
    }
}
