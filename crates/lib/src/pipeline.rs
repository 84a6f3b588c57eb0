//! The package build pipeline.
//!
//! Sequences one build from descriptor to artifact: resolve the root,
//! prepare the cache directory, load the package with its dependency
//! descriptors, materialize the plan, and hand it to the runner. Steps are
//! strictly sequential and fail fast; no step is retried. The process
//! working directory is never touched; the root path is threaded through
//! every subordinate call instead, so builds can run concurrently in one
//! process.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::config::{BuildConfig, ExecutionMode};
use crate::consts::{CACHE_DIR_NAME, COMPILE_DB_FILE, PLAN_FILE_PREFIX};
use crate::docker::{ContainerExecutor, ExecutionResult};
use crate::package::{
  DependencyDesc, DirLoader, LoaderError, PackageLoader, PackageRef, sdk_module,
};
use crate::plan::{BuildPlanner, MakefilePlanner, PlanError};
use crate::runner::{MakeRunner, Runner, RunnerError, RunnerOptions};

/// Errors from the build pipeline. Collaborator failures are surfaced
/// unchanged.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Loader(#[from] LoaderError),

  #[error(transparent)]
  Plan(#[from] PlanError),

  #[error(transparent)]
  Runner(#[from] RunnerError),

  #[error("invalid package root {}: {source}", .path.display())]
  BadRoot {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("cannot determine a home directory for the build cache")]
  NoHomeDir,

  #[error("failed to create cache directory {}: {source}", .path.display())]
  CacheDir {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to materialize build plan: {0}")]
  PlanFile(#[source] std::io::Error),

  #[error("failed to write {COMPILE_DB_FILE}: {0}")]
  CompileDbFile(#[source] std::io::Error),
}

/// Per-invocation options beyond the resolved [`BuildConfig`].
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Artifact name. Defaults to `<root-dir-name>.wasm` for the main package.
  pub output: Option<String>,
  /// Submodules the caller declared explicitly; they become one extra
  /// `"self"` dependency descriptor.
  pub submodules: Vec<String>,
  /// Extra make-level flags as one string, whitespace-tokenized later.
  pub make_flags: String,
  /// Emit the plan to the sink and stop. A terminal success, not a failure.
  pub plan_only: bool,
  /// Also emit a compile database next to the package.
  pub compile_db: bool,
  /// Cache directory override, snapshotted from the environment once.
  pub cache_override: Option<String>,
}

/// Sequences one package build. Collaborators are injectable; defaults are
/// the filesystem loader and the make runner.
pub struct BuildPipeline {
  config: BuildConfig,
  options: BuildOptions,
  loader: Box<dyn PackageLoader>,
  executor: Option<Arc<dyn ContainerExecutor>>,
  runner_override: Option<Box<dyn Runner>>,
}

impl BuildPipeline {
  pub fn new(config: BuildConfig, options: BuildOptions) -> Self {
    BuildPipeline {
      config,
      options,
      loader: Box::new(DirLoader::new()),
      executor: None,
      runner_override: None,
    }
  }

  pub fn with_loader(mut self, loader: Box<dyn PackageLoader>) -> Self {
    self.loader = loader;
    self
  }

  pub fn with_executor(mut self, executor: Arc<dyn ContainerExecutor>) -> Self {
    self.executor = Some(executor);
    self
  }

  pub fn with_runner(mut self, runner: Box<dyn Runner>) -> Self {
    self.runner_override = Some(runner);
    self
  }

  /// Build the package rooted at `root`, writing plan output and build logs
  /// to `sink`.
  pub async fn build(
    &self,
    root: &Path,
    sink: &mut (dyn Write + Send),
  ) -> Result<ExecutionResult, BuildError> {
    let root = dunce::canonicalize(root).map_err(|source| BuildError::BadRoot {
      path: root.to_path_buf(),
      source,
    })?;

    let cache_dir = self.cache_dir()?;
    debug!(root = %root.display(), cache = %cache_dir.display(), "starting build");

    let addons = self.dependency_descriptors(&root)?;
    let pkg = self.loader.load(&root, &addons)?;

    let output = self.resolve_output(&root, pkg.as_ref());
    if let Some(output) = &output {
      debug!(output = %output.display(), "resolved artifact path");
    }

    let planner = MakefilePlanner::new()
      .with_cxx_flags(&self.config.cxx_flags)
      .with_ld_flags(&self.config.ld_flags)
      .with_cache_dir(&cache_dir)
      .with_output(output.clone());
    let plan = planner.parse(pkg.as_ref())?;

    if self.options.plan_only {
      plan.emit_plan(sink)?;
      return Ok(ExecutionResult::ok());
    }

    if self.options.compile_db {
      let db_path = root.join(COMPILE_DB_FILE);
      let mut db_file = File::create(&db_path).map_err(BuildError::CompileDbFile)?;
      plan.emit_compile_db(&mut db_file)?;
      info!(path = %db_path.display(), "wrote compile database");
    }

    // The transient plan file is removed when this handle drops, on every
    // exit path below.
    let plan_file = tempfile::Builder::new()
      .prefix(PLAN_FILE_PREFIX)
      .tempfile_in(&root)
      .map_err(BuildError::PlanFile)?;
    plan.emit_plan(&mut plan_file.as_file())?;
    plan_file.as_file().sync_all().map_err(BuildError::PlanFile)?;

    let mut result = match &self.runner_override {
      Some(runner) => runner.make(plan_file.path(), sink).await?,
      None => {
        let mut runner = MakeRunner::new(root.clone(), self.runner_options(cache_dir, &output));
        if let Some(executor) = &self.executor {
          runner = runner.with_executor(executor.clone());
        }
        runner.make(plan_file.path(), sink).await?
      }
    };

    if result.success() {
      result.artifact = output;
    }
    Ok(result)
  }

  fn runner_options(&self, cache_dir: PathBuf, output: &Option<PathBuf>) -> RunnerOptions {
    RunnerOptions {
      image: self.config.toolchain_image().to_string(),
      cache_dir,
      sdk_root: self.config.sdk_root.clone(),
      output: output.clone(),
      make_flags: self
        .options
        .make_flags
        .split_whitespace()
        .map(|f| f.to_string())
        .collect(),
      docker_enabled: self.config.execution_mode == ExecutionMode::Docker,
      use_precompiled_sdk: self.config.use_precompiled_sdk,
    }
  }

  /// The build cache directory: the environment override when present,
  /// otherwise a fixed directory under home. Creation is idempotent.
  fn cache_dir(&self) -> Result<PathBuf, BuildError> {
    let dir = match self.options.cache_override.as_deref().filter(|d| !d.is_empty()) {
      Some(dir) => PathBuf::from(dir),
      None => dirs::home_dir()
        .ok_or(BuildError::NoHomeDir)?
        .join(CACHE_DIR_NAME),
    };
    std::fs::create_dir_all(&dir).map_err(|source| BuildError::CacheDir {
      path: dir.clone(),
      source,
    })?;
    Ok(dunce::canonicalize(&dir).unwrap_or(dir))
  }

  /// Descriptors handed to the loader on top of the package's own: the SDK
  /// module for a main package building the SDK from source, and one
  /// `"self"` descriptor whenever submodules were declared.
  fn dependency_descriptors(&self, root: &Path) -> Result<Vec<DependencyDesc>, LoaderError> {
    let desc = self.loader.describe(root)?;
    let mut addons = Vec::new();

    if desc.package.name == crate::consts::MAIN_PACKAGE && !self.config.use_precompiled_sdk {
      addons.push(sdk_module(&self.config.sdk_root));
    }

    if !self.options.submodules.is_empty() {
      addons.push(DependencyDesc {
        name: "self".to_string(),
        modules: self.options.submodules.clone(),
      });
    }
    Ok(addons)
  }

  /// Default the artifact to `<dir-base>.wasm` for the main package, then
  /// absolutize relative names against the package root.
  fn resolve_output(&self, root: &Path, pkg: &dyn PackageRef) -> Option<PathBuf> {
    let name = match &self.options.output {
      Some(name) => name.clone(),
      None if pkg.is_main() => {
        let base = root
          .file_name()
          .map(|n| n.to_string_lossy().into_owned())
          .unwrap_or_else(|| "contract".to_string());
        format!("{base}.wasm")
      }
      None => return None,
    };

    let path = PathBuf::from(name);
    Some(if path.is_absolute() { path } else { root.join(path) })
  }
}
