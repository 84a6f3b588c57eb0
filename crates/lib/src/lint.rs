//! Ad-hoc static analysis of individual source files.
//!
//! Spins up one disposable linter container running clang-tidy with the
//! contract check set, the caller's directory bind-mounted read-write at
//! the identical path, and streams the analyzer output. Container removal
//! is guaranteed by the executor.

use std::io::Write;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::consts::LINTER_IMAGE;
use crate::docker::{ContainerExecutor, ContainerSpec, ExecutionResult, ExecutorError};

/// The clang-tidy check set: everything off except the contract rules.
pub const LINT_CHECKS: &str = "-checks=-*,misc-smart-contract-*";

/// Errors from the lint pipeline.
#[derive(Debug, Error)]
pub enum LintError {
  #[error("no files to lint")]
  NoFiles,

  #[error(transparent)]
  Executor(#[from] ExecutorError),
}

/// One lint invocation. The full file list is kept even though only the
/// first file is analyzed today, so multi-file analysis stays a
/// non-breaking extension.
#[derive(Debug, Clone)]
pub struct LintRequest {
  pub files: Vec<String>,
}

impl LintRequest {
  pub fn new(files: Vec<String>) -> Self {
    LintRequest { files }
  }
}

/// Lint the first requested file inside the linter container, with
/// `working_dir` mounted so relative file paths resolve unchanged.
pub async fn lint(
  request: &LintRequest,
  working_dir: &Path,
  executor: &dyn ContainerExecutor,
  sink: &mut (dyn Write + Send),
) -> Result<ExecutionResult, LintError> {
  let first = request.files.first().ok_or(LintError::NoFiles)?;

  // TODO(multi-file): clang-tidy accepts several inputs; pass the rest of
  // request.files once the check set is validated against whole-project runs.
  let cmd = vec![
    "clang-tidy".to_string(),
    LINT_CHECKS.to_string(),
    first.clone(),
  ];
  let spec = ContainerSpec::workspace(LINTER_IMAGE, cmd, working_dir);

  info!(file = %first, image = LINTER_IMAGE, "linting");
  Ok(executor.run(&spec, sink).await?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use std::path::PathBuf;
  use std::sync::Mutex;

  /// Executor double recording every spec it ran.
  #[derive(Default)]
  struct RecordingExecutor {
    specs: Mutex<Vec<ContainerSpec>>,
  }

  #[async_trait]
  impl ContainerExecutor for RecordingExecutor {
    async fn run(
      &self,
      spec: &ContainerSpec,
      sink: &mut (dyn Write + Send),
    ) -> Result<ExecutionResult, ExecutorError> {
      self.specs.lock().unwrap().push(spec.clone());
      sink.write_all(b"1 warning generated\n")?;
      Ok(ExecutionResult::ok())
    }
  }

  #[tokio::test]
  async fn only_the_first_file_reaches_the_analyzer() {
    let executor = RecordingExecutor::default();
    let request = LintRequest::new(vec!["a.cpp".to_string(), "b.cpp".to_string()]);

    let mut sink = Vec::new();
    let result = lint(&request, Path::new("/work"), &executor, &mut sink)
      .await
      .unwrap();
    assert!(result.success());

    let specs = executor.specs.lock().unwrap();
    assert_eq!(specs.len(), 1, "exactly one container per invocation");
    let cmd = &specs[0].cmd;
    assert!(cmd.iter().any(|arg| arg == "a.cpp"));
    assert!(!cmd.iter().any(|arg| arg == "b.cpp"));
  }

  #[tokio::test]
  async fn linter_container_mounts_the_working_dir_read_write() {
    let executor = RecordingExecutor::default();
    let request = LintRequest::new(vec!["main.cc".to_string()]);

    let mut sink = Vec::new();
    lint(&request, Path::new("/src/contract"), &executor, &mut sink)
      .await
      .unwrap();

    let specs = executor.specs.lock().unwrap();
    assert_eq!(specs[0].image, LINTER_IMAGE);
    assert_eq!(specs[0].working_dir, PathBuf::from("/src/contract"));
    assert_eq!(specs[0].mounts[0].host, specs[0].mounts[0].container);
    assert!(!specs[0].mounts[0].read_only);
    assert_eq!(String::from_utf8(sink).unwrap(), "1 warning generated\n");
  }

  #[tokio::test]
  async fn empty_file_list_is_rejected_before_any_container_runs() {
    let executor = RecordingExecutor::default();
    let request = LintRequest::new(vec![]);

    let mut sink = Vec::new();
    let err = lint(&request, Path::new("/work"), &executor, &mut sink)
      .await
      .unwrap_err();
    assert!(matches!(err, LintError::NoFiles));
    assert!(executor.specs.lock().unwrap().is_empty());
  }
}
