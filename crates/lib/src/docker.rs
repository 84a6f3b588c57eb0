//! Container lifecycle execution.
//!
//! [`DockerExecutor`] drives exactly one container per invocation through
//! create, start, wait, log streaming, and removal. Removal runs on every
//! exit path: infra failures, non-zero exits, and caller cancellation
//! mid-wait all still release the container. A non-zero exit code is a
//! normal result, not an error; only engine-level failures abort.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
  Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
  WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, warn};

/// Infrastructure failures while driving a container. All of these abort
/// the invocation; the toolchain's own failures surface as a non-zero
/// [`ExecutionResult`] instead.
#[derive(Debug, Error)]
pub enum ExecutorError {
  #[error("container runtime unavailable: {0}")]
  RuntimeUnavailable(#[source] DockerError),

  #[error("failed to create container from {image}: {source}")]
  CreateFailed {
    image: String,
    #[source]
    source: DockerError,
  },

  #[error("failed to start container {id}: {source}")]
  StartFailed {
    id: String,
    #[source]
    source: DockerError,
  },

  #[error("failed waiting for container {id}: {source}")]
  WaitFailed {
    id: String,
    #[source]
    source: DockerError,
  },

  #[error("failed to stream logs from container {id}: {source}")]
  LogStreamFailed {
    id: String,
    #[source]
    source: DockerError,
  },

  #[error("failed to write container output: {0}")]
  Sink(#[from] std::io::Error),
}

/// Outcome of one pipeline run: the exit code of the underlying tool and,
/// when the pipeline produced one, the artifact path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
  pub exit_code: i64,
  pub artifact: Option<PathBuf>,
}

impl ExecutionResult {
  pub fn ok() -> Self {
    ExecutionResult {
      exit_code: 0,
      artifact: None,
    }
  }

  pub fn success(&self) -> bool {
    self.exit_code == 0
  }
}

/// A read-write or read-only bind of a host path into the container.
#[derive(Debug, Clone)]
pub struct BindMount {
  pub host: PathBuf,
  pub container: PathBuf,
  pub read_only: bool,
}

/// Everything needed to run one container to completion.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
  pub image: String,
  pub cmd: Vec<String>,
  pub working_dir: PathBuf,
  pub mounts: Vec<BindMount>,
  pub name: String,
}

impl ContainerSpec {
  /// Spec running `cmd` with `dir` as the working directory, bind-mounted
  /// read-write at the identical path so relative paths keep resolving.
  pub fn workspace(image: &str, cmd: Vec<String>, dir: &Path) -> Self {
    ContainerSpec {
      image: image.to_string(),
      cmd,
      working_dir: dir.to_path_buf(),
      mounts: vec![BindMount {
        host: dir.to_path_buf(),
        container: dir.to_path_buf(),
        read_only: false,
      }],
      name: unique_name(image),
    }
  }
}

/// Container name derived from the image base name plus a nanosecond stamp.
fn unique_name(image: &str) -> String {
  let base = image
    .rsplit('/')
    .next()
    .unwrap_or(image)
    .split(':')
    .next()
    .unwrap_or(image);
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_nanos())
    .unwrap_or_default();
  format!("{base}-{nanos}")
}

/// Runs one container to completion, streaming its combined output.
#[async_trait]
pub trait ContainerExecutor: Send + Sync {
  async fn run(
    &self,
    spec: &ContainerSpec,
    sink: &mut (dyn Write + Send),
  ) -> Result<ExecutionResult, ExecutorError>;
}

/// The slice of the engine API the executor drives. Abstracted so lifecycle
/// ordering (cleanup on every exit path in particular) is testable without
/// a running daemon.
#[async_trait]
pub trait ContainerApi: Send + Sync {
  async fn create(&self, spec: &ContainerSpec) -> Result<String, DockerError>;

  async fn start(&self, id: &str) -> Result<(), DockerError>;

  /// Block until the container leaves the running state. Returns the exit
  /// code; engine-level failures come back as `Err`.
  async fn wait(&self, id: &str) -> Result<i64, DockerError>;

  /// Copy combined stdout/stderr verbatim, in order, into `sink`.
  async fn copy_logs(
    &self,
    id: &str,
    sink: &mut (dyn Write + Send),
  ) -> Result<(), ExecutorError>;

  async fn remove(&self, id: &str) -> Result<(), DockerError>;
}

/// [`ContainerExecutor`] backed by the local container engine.
pub struct DockerExecutor {
  api: Arc<dyn ContainerApi>,
}

impl DockerExecutor {
  /// Connect to the local engine and negotiate the API version. Happens
  /// once per executor instance, before any other call.
  pub async fn connect() -> Result<Self, ExecutorError> {
    let docker =
      Docker::connect_with_local_defaults().map_err(ExecutorError::RuntimeUnavailable)?;
    let docker = docker
      .negotiate_version()
      .await
      .map_err(ExecutorError::RuntimeUnavailable)?;
    Ok(DockerExecutor {
      api: Arc::new(BollardApi { docker }),
    })
  }

  #[cfg(test)]
  fn with_api(api: Arc<dyn ContainerApi>) -> Self {
    DockerExecutor { api }
  }
}

#[async_trait]
impl ContainerExecutor for DockerExecutor {
  async fn run(
    &self,
    spec: &ContainerSpec,
    sink: &mut (dyn Write + Send),
  ) -> Result<ExecutionResult, ExecutorError> {
    let id = self
      .api
      .create(spec)
      .await
      .map_err(|source| ExecutorError::CreateFailed {
        image: spec.image.clone(),
        source,
      })?;
    debug!(id = %id, image = %spec.image, name = %spec.name, "container created");

    // From here the container exists and must reach removal on every exit
    // path. The guard covers cancellation; the explicit call below covers
    // ordinary success and failure.
    let guard = RemoveGuard::new(self.api.clone(), id.clone());
    let outcome = drive(self.api.as_ref(), &id, sink).await;
    guard.disarm();
    remove_logged(self.api.as_ref(), &id).await;
    outcome
  }
}

/// Start, wait, and stream logs. Removal is the caller's responsibility.
async fn drive(
  api: &dyn ContainerApi,
  id: &str,
  sink: &mut (dyn Write + Send),
) -> Result<ExecutionResult, ExecutorError> {
  api
    .start(id)
    .await
    .map_err(|source| ExecutorError::StartFailed {
      id: id.to_string(),
      source,
    })?;

  let exit_code = api
    .wait(id)
    .await
    .map_err(|source| ExecutorError::WaitFailed {
      id: id.to_string(),
      source,
    })?;
  debug!(id = %id, exit_code, "container exited");

  api.copy_logs(id, sink).await?;

  Ok(ExecutionResult {
    exit_code,
    artifact: None,
  })
}

/// Remove the container; a removal failure is logged and never replaces
/// the outcome that got us here.
async fn remove_logged(api: &dyn ContainerApi, id: &str) {
  if let Err(error) = api.remove(id).await {
    warn!(id = %id, %error, "failed to remove container");
  }
}

/// Spawns the removal if the owning future is dropped before cleanup ran,
/// e.g. a caller timeout or interrupt mid-wait.
struct RemoveGuard {
  api: Arc<dyn ContainerApi>,
  id: String,
  armed: bool,
}

impl RemoveGuard {
  fn new(api: Arc<dyn ContainerApi>, id: String) -> Self {
    RemoveGuard {
      api,
      id,
      armed: true,
    }
  }

  fn disarm(mut self) {
    self.armed = false;
  }
}

impl Drop for RemoveGuard {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    let api = self.api.clone();
    let id = std::mem::take(&mut self.id);
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
      handle.spawn(async move {
        remove_logged(api.as_ref(), &id).await;
      });
    } else {
      warn!(id = %id, "no runtime available to remove container");
    }
  }
}

struct BollardApi {
  docker: Docker,
}

#[async_trait]
impl ContainerApi for BollardApi {
  async fn create(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
    let mounts = spec
      .mounts
      .iter()
      .map(|mount| Mount {
        source: Some(mount.host.display().to_string()),
        target: Some(mount.container.display().to_string()),
        typ: Some(MountTypeEnum::BIND),
        read_only: Some(mount.read_only),
        ..Default::default()
      })
      .collect();

    let config = Config::<String> {
      image: Some(spec.image.clone()),
      cmd: Some(spec.cmd.clone()),
      working_dir: Some(spec.working_dir.display().to_string()),
      attach_stdin: Some(true),
      attach_stdout: Some(true),
      attach_stderr: Some(true),
      tty: Some(true),
      host_config: Some(HostConfig {
        mounts: Some(mounts),
        ..Default::default()
      }),
      ..Default::default()
    };

    let created = self
      .docker
      .create_container(
        Some(CreateContainerOptions {
          name: spec.name.clone(),
          platform: None,
        }),
        config,
      )
      .await?;
    Ok(created.id)
  }

  async fn start(&self, id: &str) -> Result<(), DockerError> {
    self
      .docker
      .start_container(id, None::<StartContainerOptions<String>>)
      .await
  }

  async fn wait(&self, id: &str) -> Result<i64, DockerError> {
    let mut wait = self.docker.wait_container(
      id,
      Some(WaitContainerOptions {
        condition: "not-running",
      }),
    );
    match wait.next().await {
      Some(Ok(status)) => Ok(status.status_code),
      // The engine reports a non-zero exit through the wait error channel;
      // that is the tool failing, not the engine.
      Some(Err(DockerError::DockerContainerWaitError { code, .. })) => Ok(code),
      Some(Err(error)) => Err(error),
      None => Ok(0),
    }
  }

  async fn copy_logs(
    &self,
    id: &str,
    sink: &mut (dyn Write + Send),
  ) -> Result<(), ExecutorError> {
    let mut logs = self.docker.logs(
      id,
      Some(LogsOptions::<String> {
        stdout: true,
        stderr: true,
        ..Default::default()
      }),
    );
    while let Some(chunk) = logs.next().await {
      let output = chunk.map_err(|source| ExecutorError::LogStreamFailed {
        id: id.to_string(),
        source,
      })?;
      sink.write_all(&output.into_bytes())?;
    }
    Ok(())
  }

  async fn remove(&self, id: &str) -> Result<(), DockerError> {
    self
      .docker
      .remove_container(
        id,
        Some(RemoveContainerOptions {
          force: true,
          ..Default::default()
        }),
      )
      .await
  }
}
