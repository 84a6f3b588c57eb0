//! Plan execution: `make` inside the toolchain container, or directly on
//! the host against a locally installed toolchain.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::docker::{ContainerExecutor, ContainerSpec, ExecutionResult, ExecutorError};

/// Errors from driving the materialized plan.
#[derive(Debug, Error)]
pub enum RunnerError {
  #[error(transparent)]
  Executor(#[from] ExecutorError),

  #[error("docker execution requested but no container executor was configured")]
  NoExecutor,

  #[error("failed to launch make: {0}")]
  Spawn(#[source] std::io::Error),
}

/// Configuration the runner needs beyond the plan file itself.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
  pub image: String,
  pub cache_dir: PathBuf,
  /// SDK source root. Empty when linking against the precompiled SDK.
  pub sdk_root: String,
  pub output: Option<PathBuf>,
  /// Extra make-level flags, already whitespace-tokenized.
  pub make_flags: Vec<String>,
  pub docker_enabled: bool,
  pub use_precompiled_sdk: bool,
}

/// Executes a materialized plan file.
#[async_trait]
pub trait Runner: Send + Sync {
  async fn make(
    &self,
    plan_file: &Path,
    sink: &mut (dyn Write + Send),
  ) -> Result<ExecutionResult, RunnerError>;
}

/// [`Runner`] invoking `make -f <plan>` in the package root, either inside
/// the toolchain container or as a host process.
pub struct MakeRunner {
  root: PathBuf,
  options: RunnerOptions,
  executor: Option<Arc<dyn ContainerExecutor>>,
}

impl MakeRunner {
  pub fn new(root: PathBuf, options: RunnerOptions) -> Self {
    MakeRunner {
      root,
      options,
      executor: None,
    }
  }

  pub fn with_executor(mut self, executor: Arc<dyn ContainerExecutor>) -> Self {
    self.executor = Some(executor);
    self
  }

  fn make_command(&self, plan_file: &Path) -> Vec<String> {
    let mut cmd = vec![
      "make".to_string(),
      "-f".to_string(),
      plan_file.display().to_string(),
    ];
    cmd.push(format!("CACHE_DIR={}", self.options.cache_dir.display()));
    if !self.options.sdk_root.is_empty() {
      cmd.push(format!("SDK_ROOT={}", self.options.sdk_root));
    }
    if let Some(output) = &self.options.output {
      cmd.push(format!("OUTPUT={}", output.display()));
    }
    if self.options.use_precompiled_sdk {
      cmd.push("PRECOMPILED_SDK=1".to_string());
    }
    cmd.extend(self.options.make_flags.iter().cloned());
    cmd
  }
}

#[async_trait]
impl Runner for MakeRunner {
  async fn make(
    &self,
    plan_file: &Path,
    sink: &mut (dyn Write + Send),
  ) -> Result<ExecutionResult, RunnerError> {
    let cmd = self.make_command(plan_file);

    if self.options.docker_enabled {
      let executor = self.executor.as_ref().ok_or(RunnerError::NoExecutor)?;
      let spec = ContainerSpec::workspace(&self.options.image, cmd, &self.root);
      info!(image = %self.options.image, "running make in container");
      return Ok(executor.run(&spec, sink).await?);
    }

    debug!(cmd = ?cmd, "running make on host");
    let output = tokio::process::Command::new(&cmd[0])
      .args(&cmd[1..])
      .current_dir(&self.root)
      .stdin(Stdio::null())
      .output()
      .await
      .map_err(RunnerError::Spawn)?;

    sink.write_all(&output.stdout).map_err(ExecutorError::Sink)?;
    sink.write_all(&output.stderr).map_err(ExecutorError::Sink)?;

    Ok(ExecutionResult {
      exit_code: i64::from(output.status.code().unwrap_or(1)),
      artifact: None,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn options() -> RunnerOptions {
    RunnerOptions {
      image: "xchain/emcc:latest".to_string(),
      cache_dir: PathBuf::from("/home/dev/.wasmdev-cache"),
      sdk_root: String::new(),
      output: Some(PathBuf::from("/work/contract/contract.wasm")),
      make_flags: vec![],
      docker_enabled: true,
      use_precompiled_sdk: true,
    }
  }

  #[test]
  fn command_carries_cache_output_and_sdk_toggle() {
    let runner = MakeRunner::new(PathBuf::from("/work/contract"), options());
    let cmd = runner.make_command(Path::new("/work/contract/.wasmdev-make1"));

    assert_eq!(cmd[0], "make");
    assert_eq!(cmd[1], "-f");
    assert!(cmd.contains(&"CACHE_DIR=/home/dev/.wasmdev-cache".to_string()));
    assert!(cmd.contains(&"OUTPUT=/work/contract/contract.wasm".to_string()));
    assert!(cmd.contains(&"PRECOMPILED_SDK=1".to_string()));
    assert!(!cmd.iter().any(|arg| arg.starts_with("SDK_ROOT=")));
  }

  #[test]
  fn source_sdk_propagates_root_and_drops_the_toggle() {
    let mut opts = options();
    opts.use_precompiled_sdk = false;
    opts.sdk_root = "/home/dev/sdk".to_string();
    opts.make_flags = vec!["-j4".to_string(), "V=1".to_string()];
    let runner = MakeRunner::new(PathBuf::from("/work/contract"), opts);
    let cmd = runner.make_command(Path::new("/tmp/plan"));

    assert!(cmd.contains(&"SDK_ROOT=/home/dev/sdk".to_string()));
    assert!(!cmd.contains(&"PRECOMPILED_SDK=1".to_string()));
    // Extra make flags come last, in order.
    assert_eq!(&cmd[cmd.len() - 2..], ["-j4", "V=1"]);
  }

  #[tokio::test]
  async fn docker_mode_without_executor_is_an_error() {
    let runner = MakeRunner::new(PathBuf::from("/work"), options());
    let mut sink = Vec::new();
    let err = runner.make(Path::new("/tmp/plan"), &mut sink).await.unwrap_err();
    assert!(matches!(err, RunnerError::NoExecutor));
  }
}
