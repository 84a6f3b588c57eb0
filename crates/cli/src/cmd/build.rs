//! Implementation of the `wasmdev build` command.
//!
//! With no file arguments this builds the whole package found by walking up
//! from the working directory to its descriptor. With file arguments it
//! runs the containerized linter over them instead (only the first file is
//! analyzed today).

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use wasmdev_lib::config::{
  BuildConfig, BuildMode, ConfigInputs, ExecutionMode, resolve,
};
use wasmdev_lib::consts::{ENV_CACHE, ENV_CC_IMAGE, ENV_ROOT};
use wasmdev_lib::docker::{DockerExecutor, ExecutionResult};
use wasmdev_lib::lint::{LintRequest, lint};
use wasmdev_lib::package::find_package_root;
use wasmdev_lib::pipeline::{BuildOptions, BuildPipeline};

use crate::output;

#[derive(Args)]
pub struct BuildArgs {
  /// Source files to lint instead of building the package
  files: Vec<String>,

  /// Generate the build plan on stdout and exit
  #[arg(short = 'm', long = "makefile")]
  plan_only: bool,

  /// Generate compile_commands.json for IDE integration
  #[arg(short = 'p', long = "compile-commands")]
  compile_db: bool,

  /// Output file name
  #[arg(short, long)]
  output: Option<String>,

  /// Compiler environment, docker or host
  #[arg(long, default_value = "docker")]
  compiler: String,

  /// Extra flags passed to the make command
  #[arg(long, default_value = "")]
  mkflags: String,

  /// Build the named submodules as well
  #[arg(short, long = "submodule")]
  submodules: Vec<String>,

  /// Link against the precompiled SDK
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
  using_precompiled_sdk: bool,

  /// Do not emit a default entry point
  #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
  no_entry: bool,

  /// Build mode, debug or release
  #[arg(long, default_value = "release")]
  build_mode: String,
}

/// Environment values, read exactly once before resolution. The resolver
/// and pipelines only ever see these snapshotted strings.
struct EnvOverrides {
  sdk_root: Option<String>,
  cc_image: Option<String>,
  cache: Option<String>,
}

impl EnvOverrides {
  fn capture() -> Self {
    let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
    EnvOverrides {
      sdk_root: non_empty(ENV_ROOT),
      cc_image: non_empty(ENV_CC_IMAGE),
      cache: non_empty(ENV_CACHE),
    }
  }
}

pub fn cmd_build(args: BuildArgs) -> Result<()> {
  let env = EnvOverrides::capture();

  let build_mode: BuildMode = args.build_mode.parse()?;
  let execution_mode: ExecutionMode = args.compiler.parse()?;

  let config = resolve(&ConfigInputs {
    use_precompiled_sdk: args.using_precompiled_sdk,
    suppress_entry_point: args.no_entry,
    build_mode: Some(build_mode),
    execution_mode: Some(execution_mode),
    sdk_root_override: env.sdk_root,
    cc_image_override: env.cc_image,
  });

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = if args.files.is_empty() {
    rt.block_on(run_build(&args, config, env.cache))?
  } else {
    rt.block_on(run_lint(&args.files))?
  };

  if !result.success() {
    output::error(&format!("exited with code {}", result.exit_code));
    std::process::exit(result.exit_code as i32);
  }

  if let Some(artifact) = &result.artifact {
    output::success(&format!("built {}", artifact.display()));
  }
  Ok(())
}

async fn run_build(
  args: &BuildArgs,
  config: BuildConfig,
  cache_override: Option<String>,
) -> Result<ExecutionResult> {
  let cwd = std::env::current_dir().context("Failed to read working directory")?;
  let root = find_package_root(&cwd)?;

  let options = BuildOptions {
    output: args.output.clone(),
    submodules: args.submodules.clone(),
    make_flags: args.mkflags.clone(),
    plan_only: args.plan_only,
    compile_db: args.compile_db,
    cache_override,
  };

  let needs_docker = config.execution_mode == ExecutionMode::Docker && !args.plan_only;
  let mut pipeline = BuildPipeline::new(config, options);
  if needs_docker {
    let executor = DockerExecutor::connect()
      .await
      .context("Failed to reach the container runtime")?;
    pipeline = pipeline.with_executor(Arc::new(executor));
  }

  let mut stdout = std::io::stdout();
  Ok(pipeline.build(&root, &mut stdout).await?)
}

async fn run_lint(files: &[String]) -> Result<ExecutionResult> {
  let cwd = std::env::current_dir().context("Failed to read working directory")?;
  let executor = DockerExecutor::connect()
    .await
    .context("Failed to reach the container runtime")?;

  let request = LintRequest::new(files.to_vec());
  let mut stdout = std::io::stdout();
  Ok(lint(&request, &cwd, &executor, &mut stdout).await?)
}
