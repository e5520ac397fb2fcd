//! Container Operations Driver
//!
//! Thin, stateless wrapper over the docker/podman CLI. Owns no state; the
//! registry decides what to create, start and tear down.
//!
//! Exec results are data: non-zero exits, timeouts and oversized output all
//! come back as an [`ExecOutput`], never as an error.

use async_trait::async_trait;
use crew_foundation::{ContainerRuntime, Error, Result, SandboxLimits};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Working directory inside every sandbox; the volume is mounted here
pub const WORKDIR: &str = "/workspace";

/// Image used for the throwaway container that copies a volume into a build context
const SEED_IMAGE: &str = "alpine:latest";

/// Exit code reported for commands that hit the exec timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

// ============================================================================
// Results
// ============================================================================

/// Result of a command run inside a container
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// The command was abandoned after the exec timeout
    pub timed_out: bool,
    /// stdout or stderr exceeded the output cap and was cut
    pub truncated: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// A result for a command that never ran
    pub fn failed_to_run(reason: impl Into<String>) -> Self {
        Self {
            stderr: reason.into(),
            exit_code: -1,
            ..Default::default()
        }
    }
}

/// Result of an image build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub success: bool,
    pub image_id: Option<String>,
    pub log: String,
}

impl BuildOutput {
    fn failed(log: impl Into<String>) -> Self {
        Self {
            success: false,
            image_id: None,
            log: log.into(),
        }
    }
}

// ============================================================================
// Container spec
// ============================================================================

/// Everything needed to create a sandbox container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub volume: String,
    pub memory: String,
    pub cpus: f32,
    pub network_enabled: bool,
}

impl ContainerSpec {
    pub fn new(
        name: impl Into<String>,
        image: impl Into<String>,
        volume: impl Into<String>,
        limits: &SandboxLimits,
        network_enabled: bool,
    ) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            volume: volume.into(),
            memory: limits.memory.clone(),
            cpus: limits.cpus,
            network_enabled,
        }
    }

    /// Build `create` arguments
    ///
    /// The container idles on `sleep infinity`; all work happens through exec.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "--name".to_string(),
            self.name.clone(),
            "--memory".to_string(),
            self.memory.clone(),
            "--cpus".to_string(),
            self.cpus.to_string(),
        ];

        if !self.network_enabled {
            args.push("--network".to_string());
            args.push("none".to_string());
        }

        args.push("--workdir".to_string());
        args.push(WORKDIR.to_string());
        args.push("--mount".to_string());
        args.push(format!("source={},target={}", self.volume, WORKDIR));

        args.push(self.image.clone());
        args.push("sleep".to_string());
        args.push("infinity".to_string());

        args
    }
}

// ============================================================================
// Driver trait
// ============================================================================

/// Stateless container engine operations
///
/// Teardown operations (`stop`, `remove_*`) ignore failures: the resource may
/// already be gone, and the caller is moving on regardless.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn create_volume(&self, name: &str) -> Result<()>;

    async fn remove_volume(&self, name: &str);

    /// Build `recipe` as `tag`. With `seed_volume`, the volume's current
    /// contents become the build context.
    async fn build_image(&self, recipe: &str, tag: &str, seed_volume: Option<&str>)
        -> BuildOutput;

    /// Create (but do not start) a container; returns the container id
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str);

    async fn remove_container(&self, name: &str);

    async fn remove_image(&self, tag: &str);

    /// Run `sh -c command` inside a running container
    async fn exec(&self, name: &str, command: &str, timeout: Duration) -> ExecOutput;

    /// Write `content` to the absolute path `dest` inside the container
    async fn copy_to(&self, name: &str, dest: &str, content: &[u8]) -> Result<()>;

    /// Read the absolute path `src` from the container
    async fn copy_from(&self, name: &str, src: &str) -> Result<Vec<u8>>;

    async fn is_running(&self, name: &str) -> bool;

    async fn container_exists(&self, name: &str) -> bool;
}

// ============================================================================
// CLI driver
// ============================================================================

/// Docker/Podman CLI driver
pub struct DockerCli {
    runtime: ContainerRuntime,
    build_timeout: Duration,
    command_timeout: Duration,
    max_output_bytes: usize,
}

impl DockerCli {
    pub fn new(limits: &SandboxLimits) -> Self {
        Self {
            runtime: limits.runtime,
            build_timeout: limits.build_timeout(),
            command_timeout: limits.exec_timeout(),
            max_output_bytes: limits.max_output_bytes,
        }
    }

    pub fn runtime(&self) -> ContainerRuntime {
        self.runtime
    }

    /// Check if the runtime CLI is installed and answering
    pub async fn is_available(&self) -> bool {
        Command::new(self.runtime.command())
            .arg("--version")
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    async fn run(&self, args: &[&str], timeout: Duration) -> std::io::Result<ExecOutput> {
        let mut cmd = Command::new(self.runtime.command());
        cmd.args(args);
        run_bounded(cmd, timeout, self.max_output_bytes).await
    }

    /// Run a management command; non-zero exit becomes `Error::Container`
    async fn run_checked(&self, args: &[&str], what: &str) -> Result<String> {
        let output = self
            .run(args, self.command_timeout)
            .await
            .map_err(|e| Error::Container(format!("{} failed to start: {}", what, e)))?;

        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(Error::Container(format!(
                "{} failed (exit {}): {}",
                what,
                output.exit_code,
                output.stderr.trim()
            )))
        }
    }

    /// Teardown command; failures are logged and swallowed
    async fn run_ignored(&self, args: &[&str]) {
        match self.run(args, self.command_timeout).await {
            Ok(output) if !output.success() => {
                debug!(args = ?args, stderr = %output.stderr.trim(), "ignored failure")
            }
            Err(e) => debug!(args = ?args, error = %e, "ignored failure"),
            Ok(_) => {}
        }
    }

    /// Copy the volume's contents into `dir` via a throwaway container
    async fn seed_context(&self, volume: &str, dir: &Path) -> Result<()> {
        let helper = format!("crew-seed-{}", Uuid::new_v4().simple());
        let mount = format!("{}:/source", volume);

        self.run_checked(
            &["create", "--name", &helper, "-v", &mount, SEED_IMAGE],
            "seed container create",
        )
        .await?;

        let source = format!("{}:/source/.", helper);
        let target = dir.to_string_lossy().to_string();
        let copied = self
            .run_checked(&["cp", &source, &target], "seed copy")
            .await;

        self.run_ignored(&["rm", "-f", &helper]).await;
        copied.map(|_| ())
    }

    async fn build_in(
        &self,
        dir: &Path,
        recipe: &str,
        tag: &str,
        seed_volume: Option<&str>,
    ) -> BuildOutput {
        let mut log = String::new();

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            return BuildOutput::failed(format!("Failed to create build context: {}", e));
        }

        if let Some(volume) = seed_volume {
            if let Err(e) = self.seed_context(volume, dir).await {
                warn!(volume, error = %e, "Build context not seeded from volume");
                log.push_str(&format!("[seed] {}\n", e));
            }
        }

        if let Err(e) = tokio::fs::write(dir.join("Dockerfile"), recipe).await {
            return BuildOutput::failed(format!("Failed to write Dockerfile: {}", e));
        }

        let context = dir.to_string_lossy().to_string();
        let output = match self
            .run(&["build", "-t", tag, &context], self.build_timeout)
            .await
        {
            Ok(output) => output,
            Err(e) => return BuildOutput::failed(format!("Failed to run build: {}", e)),
        };

        log.push_str(&output.stdout);
        log.push_str(&output.stderr);

        if !output.success() {
            if output.timed_out {
                log.push_str(&format!(
                    "\nBuild timed out after {}s",
                    self.build_timeout.as_secs()
                ));
            }
            return BuildOutput::failed(log);
        }

        let image_id = self
            .run_checked(&["images", "-q", tag], "image lookup")
            .await
            .ok()
            .filter(|id| !id.is_empty());

        BuildOutput {
            success: true,
            image_id,
            log,
        }
    }
}

#[async_trait]
impl ContainerDriver for DockerCli {
    async fn create_volume(&self, name: &str) -> Result<()> {
        info!("Creating volume: {}", name);
        self.run_checked(&["volume", "create", name], "volume create")
            .await
            .map(|_| ())
    }

    async fn remove_volume(&self, name: &str) {
        info!("Removing volume: {}", name);
        self.run_ignored(&["volume", "rm", name]).await;
    }

    async fn build_image(
        &self,
        recipe: &str,
        tag: &str,
        seed_volume: Option<&str>,
    ) -> BuildOutput {
        info!(tag, seeded = seed_volume.is_some(), "Building image");
        let dir = std::env::temp_dir().join(format!("crew-build-{}", Uuid::new_v4().simple()));

        let output = self.build_in(&dir, recipe, tag, seed_volume).await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            debug!(dir = %dir.display(), error = %e, "build context cleanup failed");
        }
        output
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        info!(
            name = %spec.name,
            image = %spec.image,
            network = spec.network_enabled,
            "Creating container"
        );
        let mut args = vec!["create".to_string()];
        args.extend(spec.build_args());
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_checked(&args, "container create").await
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        info!("Starting container: {}", name);
        self.run_checked(&["start", name], "container start")
            .await
            .map(|_| ())
    }

    async fn stop_container(&self, name: &str) {
        info!("Stopping container: {}", name);
        self.run_ignored(&["stop", "-t", "5", name]).await;
    }

    async fn remove_container(&self, name: &str) {
        info!("Removing container: {}", name);
        self.run_ignored(&["rm", "-f", name]).await;
    }

    async fn remove_image(&self, tag: &str) {
        info!("Removing image: {}", tag);
        self.run_ignored(&["rmi", "-f", tag]).await;
    }

    async fn exec(&self, name: &str, command: &str, timeout: Duration) -> ExecOutput {
        debug!(container = name, command, "exec");
        match self.run(&["exec", name, "sh", "-c", command], timeout).await {
            Ok(output) => output,
            Err(e) => ExecOutput::failed_to_run(format!("Failed to run exec: {}", e)),
        }
    }

    async fn copy_to(&self, name: &str, dest: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(dest).parent() {
            let parent = parent.to_string_lossy();
            let quoted = shlex::try_quote(&parent)
                .map_err(|e| Error::InvalidInput(format!("Invalid path {}: {}", dest, e)))?;
            let mkdir = self
                .exec(name, &format!("mkdir -p {}", quoted), self.command_timeout)
                .await;
            if !mkdir.success() {
                return Err(Error::Container(format!(
                    "mkdir {} failed: {}",
                    parent,
                    mkdir.stderr.trim()
                )));
            }
        }

        let tmp = temp_file_path("crew-upload");
        tokio::fs::write(&tmp, content).await?;

        let source = tmp.to_string_lossy().to_string();
        let target = format!("{}:{}", name, dest);
        let result = self.run_checked(&["cp", &source, &target], "copy to container").await;

        discard_temp(&tmp).await;
        result.map(|_| ())
    }

    async fn copy_from(&self, name: &str, src: &str) -> Result<Vec<u8>> {
        let tmp = temp_file_path("crew-download");
        let source = format!("{}:{}", name, src);
        let target = tmp.to_string_lossy().to_string();

        let copied = self
            .run_checked(&["cp", &source, &target], "copy from container")
            .await;
        let content = match copied {
            Ok(_) => tokio::fs::read(&tmp).await.map_err(Error::from),
            Err(e) => Err(e),
        };

        discard_temp(&tmp).await;
        content
    }

    async fn is_running(&self, name: &str) -> bool {
        self.run_checked(&["inspect", "-f", "{{.State.Running}}", name], "inspect")
            .await
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    async fn container_exists(&self, name: &str) -> bool {
        self.run_checked(&["inspect", name], "inspect").await.is_ok()
    }
}

fn temp_file_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", prefix, Uuid::new_v4().simple()))
}

/// Remove a staging file, logging any failure
async fn discard_temp(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %e, "temp file not removed");
    }
}

// ============================================================================
// Bounded process execution
// ============================================================================

/// Run a command with a wall-clock timeout and a per-stream output cap.
///
/// Output beyond the cap is drained and discarded so the child never blocks
/// on a full pipe. On timeout the child is killed and exit code 124 reported.
pub(crate) async fn run_bounded(
    mut cmd: Command,
    timeout: Duration,
    max_output: usize,
) -> std::io::Result<ExecOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let collect = async {
        let (out, err) = tokio::join!(
            read_capped(stdout, max_output),
            read_capped(stderr, max_output)
        );
        let status = child.wait().await;
        (out, err, status)
    };

    let result = tokio::time::timeout(timeout, collect).await;
    match result {
        Ok(((stdout, out_cut), (stderr, err_cut), status)) => {
            let status = status?;
            let mut stderr = String::from_utf8_lossy(&stderr).to_string();
            let truncated = out_cut || err_cut;
            if truncated {
                stderr.push_str(&format!(
                    "\n[output truncated: exceeded {} bytes]",
                    max_output
                ));
            }
            Ok(ExecOutput {
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr,
                exit_code: status.code().unwrap_or(-1),
                timed_out: false,
                truncated,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            Ok(ExecOutput {
                stdout: String::new(),
                stderr: format!("Command timed out after {}s", timeout.as_secs()),
                exit_code: TIMEOUT_EXIT_CODE,
                timed_out: true,
                truncated: false,
            })
        }
    }
}

async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, cap: usize) -> (Vec<u8>, bool) {
    let Some(mut reader) = reader else {
        return (Vec::new(), false);
    };

    let mut buf = Vec::new();
    if (&mut reader).take(cap as u64).read_to_end(&mut buf).await.is_err() {
        return (buf, false);
    }

    let overflow = tokio::io::copy(&mut reader, &mut tokio::io::sink())
        .await
        .map(|n| n > 0)
        .unwrap_or(false);
    (buf, overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(network_enabled: bool) -> ContainerSpec {
        ContainerSpec::new(
            "crew-ws-1",
            "crew-img-ws-1",
            "crew-vol-ws-1",
            &SandboxLimits::default(),
            network_enabled,
        )
    }

    #[test]
    fn test_build_args_isolated() {
        let args = spec(false).build_args();

        assert_eq!(&args[..2], &["--name".to_string(), "crew-ws-1".to_string()]);
        assert!(args.contains(&"512m".to_string()));
        assert!(args.contains(&"1".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--network" && w[1] == "none"));
        assert!(args.contains(&"source=crew-vol-ws-1,target=/workspace".to_string()));
        assert_eq!(
            &args[args.len() - 3..],
            &[
                "crew-img-ws-1".to_string(),
                "sleep".to_string(),
                "infinity".to_string()
            ]
        );
    }

    #[test]
    fn test_build_args_network_enabled() {
        let args = spec(true).build_args();
        assert!(!args.contains(&"--network".to_string()));
    }

    #[test]
    fn test_exec_output_success() {
        let ok = ExecOutput::default();
        assert!(ok.success());
        let timed_out = ExecOutput {
            timed_out: true,
            exit_code: TIMEOUT_EXIT_CODE,
            ..Default::default()
        };
        assert!(!timed_out.success());
        assert_eq!(ExecOutput::failed_to_run("no docker").exit_code, -1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_bounded_captures_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hi; echo oops >&2; exit 3"]);
        let out = run_bounded(cmd, Duration::from_secs(5), 1024).await.unwrap();
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.exit_code, 3);
        assert!(!out.timed_out);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_bounded_timeout() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let out = run_bounded(cmd, Duration::from_millis(100), 1024).await.unwrap();
        assert!(out.timed_out);
        assert_eq!(out.exit_code, TIMEOUT_EXIT_CODE);
        assert!(out.stderr.contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_bounded_truncates() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "head -c 5000 /dev/zero"]);
        let out = run_bounded(cmd, Duration::from_secs(5), 100).await.unwrap();
        assert_eq!(out.stdout.len(), 100);
        assert!(out.truncated);
        assert!(out.stderr.contains("output truncated"));
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn test_discard_temp_removes_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crew-upload-x");
        std::fs::write(&path, b"payload").unwrap();

        discard_temp(&path).await;
        assert!(!path.exists());

        // already gone: logged, not raised
        discard_temp(&path).await;
    }
}
