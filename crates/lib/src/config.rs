//! Build configuration resolution.
//!
//! Turns the raw inputs of one invocation (build mode, SDK mode, environment
//! overrides snapshotted by the caller) into an immutable [`BuildConfig`].
//! Resolution is pure: the resolver never reads the environment itself, and
//! two calls with identical inputs yield identical, order-identical flag
//! lists. The build plan's cache key depends on that.

use thiserror::Error;

use crate::consts::{
  CC_IMAGE_DEBUG, CC_IMAGE_RELEASE, DEBUG_CXX_FLAGS, DEBUG_LD_FLAGS, DEFAULT_CXX_FLAGS,
  DEFAULT_LD_FLAGS, DEFAULT_SDK_ROOT, NO_ENTRY_FLAG, RELEASE_CXX_FLAGS, RELEASE_LD_FLAGS, SDK_LIBS,
};

/// Errors from configuration resolution.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("unknown build mode: {0} (expected debug or release)")]
  UnknownBuildMode(String),

  #[error("unknown compiler environment: {0} (expected docker or host)")]
  UnknownExecutionMode(String),
}

/// Optimization profile of a build. Debug and release flag sets are
/// mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
  Debug,
  Release,
}

impl std::str::FromStr for BuildMode {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "debug" => Ok(BuildMode::Debug),
      "release" => Ok(BuildMode::Release),
      other => Err(ConfigError::UnknownBuildMode(other.to_string())),
    }
  }
}

/// Where the build plan is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
  /// Run make inside the toolchain container.
  Docker,
  /// Run make directly on the host, against a locally installed toolchain.
  Host,
}

impl std::str::FromStr for ExecutionMode {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "docker" => Ok(ExecutionMode::Docker),
      "host" => Ok(ExecutionMode::Host),
      other => Err(ConfigError::UnknownExecutionMode(other.to_string())),
    }
  }
}

/// Where a toolchain image candidate came from. Later layers shadow
/// earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
  /// The release image every build starts from.
  Default,
  /// Debug builds switch to the debug image.
  BuildMode,
  /// An environment override supplied by the caller. Always wins.
  Environment,
}

/// The toolchain image precedence chain, kept as data so the resolution
/// order stays auditable after the fact.
#[derive(Debug, Clone, Default)]
pub struct ImageSelection {
  layers: Vec<(ImageSource, String)>,
}

impl ImageSelection {
  fn push(&mut self, source: ImageSource, image: impl Into<String>) {
    self.layers.push((source, image.into()));
  }

  /// The winning image: the last layer pushed.
  pub fn selected(&self) -> &str {
    self
      .layers
      .last()
      .map(|(_, image)| image.as_str())
      .unwrap_or(CC_IMAGE_RELEASE)
  }

  /// All candidates in precedence order, lowest first.
  pub fn layers(&self) -> &[(ImageSource, String)] {
    &self.layers
  }
}

/// Raw inputs to resolution. Environment values are snapshotted by the
/// caller before resolution and never re-read mid-pipeline.
#[derive(Debug, Clone, Default)]
pub struct ConfigInputs {
  pub use_precompiled_sdk: bool,
  pub suppress_entry_point: bool,
  pub build_mode: Option<BuildMode>,
  pub execution_mode: Option<ExecutionMode>,
  /// Value of the SDK root override, if set and non-empty.
  pub sdk_root_override: Option<String>,
  /// Value of the toolchain image override, if set and non-empty.
  pub cc_image_override: Option<String>,
}

/// Fully resolved configuration for one invocation. Flag lists are
/// append-only during resolution and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct BuildConfig {
  pub cxx_flags: Vec<String>,
  pub ld_flags: Vec<String>,
  pub image: ImageSelection,
  /// SDK source root. Empty when building against the precompiled SDK.
  pub sdk_root: String,
  pub use_precompiled_sdk: bool,
  pub suppress_entry_point: bool,
  pub build_mode: BuildMode,
  pub execution_mode: ExecutionMode,
}

impl BuildConfig {
  pub fn toolchain_image(&self) -> &str {
    self.image.selected()
  }
}

/// Resolve a [`BuildConfig`] from raw inputs.
///
/// Flag append order: defaults, SDK-mode flags, the no-entry flag, then
/// mode-specific flags. `build_mode` and `execution_mode` default to
/// release and docker when unset.
pub fn resolve(inputs: &ConfigInputs) -> BuildConfig {
  let build_mode = inputs.build_mode.unwrap_or(BuildMode::Release);
  let execution_mode = inputs.execution_mode.unwrap_or(ExecutionMode::Docker);

  let mut cxx_flags: Vec<String> = DEFAULT_CXX_FLAGS.iter().map(|f| f.to_string()).collect();
  let mut ld_flags: Vec<String> = DEFAULT_LD_FLAGS.iter().map(|f| f.to_string()).collect();

  let mut sdk_root = String::new();
  if inputs.use_precompiled_sdk {
    ld_flags.push(format!("-L{}/lib", DEFAULT_SDK_ROOT));
    ld_flags.extend(SDK_LIBS.iter().map(|l| l.to_string()));
    ld_flags.push(format!(
      "--js-library {}/src/xchain/exports.js",
      DEFAULT_SDK_ROOT
    ));
    cxx_flags.push(format!("-I{}/src", DEFAULT_SDK_ROOT));
  } else {
    sdk_root = inputs.sdk_root_override.clone().unwrap_or_default();
    ld_flags.push(format!("--js-library {}/src/xchain/exports.js", sdk_root));
  }

  if inputs.suppress_entry_point {
    ld_flags.push(NO_ENTRY_FLAG.to_string());
  }

  let mut image = ImageSelection::default();
  image.push(ImageSource::Default, CC_IMAGE_RELEASE);
  if build_mode == BuildMode::Debug {
    image.push(ImageSource::BuildMode, CC_IMAGE_DEBUG);
  }
  if let Some(override_image) = inputs.cc_image_override.as_deref().filter(|i| !i.is_empty()) {
    image.push(ImageSource::Environment, override_image);
  }

  match build_mode {
    BuildMode::Debug => {
      cxx_flags.extend(DEBUG_CXX_FLAGS.iter().map(|f| f.to_string()));
      ld_flags.extend(DEBUG_LD_FLAGS.iter().map(|f| f.to_string()));
    }
    BuildMode::Release => {
      cxx_flags.extend(RELEASE_CXX_FLAGS.iter().map(|f| f.to_string()));
      ld_flags.extend(RELEASE_LD_FLAGS.iter().map(|f| f.to_string()));
    }
  }

  BuildConfig {
    cxx_flags,
    ld_flags,
    image,
    sdk_root,
    use_precompiled_sdk: inputs.use_precompiled_sdk,
    suppress_entry_point: inputs.suppress_entry_point,
    build_mode,
    execution_mode,
  }
}
