//! Toolchain constants shared by the resolver and the pipelines.

/// Package descriptor file name, looked up from the working directory upward.
pub const DESCRIPTOR_FILE: &str = "wasmdev.toml";

/// Name designating the entry package of a build. Any other name is a
/// library package and produces no standalone artifact.
pub const MAIN_PACKAGE: &str = "main";

/// Install root of the precompiled contract SDK inside the toolchain image.
pub const DEFAULT_SDK_ROOT: &str = "/opt/xchain";

/// Toolchain image used for release builds unless overridden.
pub const CC_IMAGE_RELEASE: &str = "xchain/emcc:latest";

/// Toolchain image used when building in debug mode.
pub const CC_IMAGE_DEBUG: &str = "xchain/emcc-debug:latest";

/// Image carrying clang-tidy with the contract check set.
pub const LINTER_IMAGE: &str = "xchain/xlinter-cpp:latest";

/// Build cache directory under the user's home, unless overridden.
pub const CACHE_DIR_NAME: &str = ".wasmdev-cache";

/// File name of the emitted compile database.
pub const COMPILE_DB_FILE: &str = "compile_commands.json";

/// Prefix of the transient plan file materialized next to the package.
pub const PLAN_FILE_PREFIX: &str = ".wasmdev-make";

/// Environment variable overriding the SDK source root.
pub const ENV_ROOT: &str = "WASMDEV_ROOT";

/// Environment variable overriding the toolchain image.
pub const ENV_CC_IMAGE: &str = "WASMDEV_CC_IMAGE";

/// Environment variable overriding the build cache directory.
pub const ENV_CACHE: &str = "WASMDEV_CACHE";

/// Compiler flags every build starts from.
pub const DEFAULT_CXX_FLAGS: &[&str] = &["-std=c++11", "-fno-rtti", "-fno-exceptions"];

/// Linker flags every build starts from. Ordering matters: library flags
/// appended later must follow these.
pub const DEFAULT_LD_FLAGS: &[&str] = &["--no-export-dynamic"];

/// Libraries linked in when building against the precompiled SDK.
pub const SDK_LIBS: &[&str] = &["-lxchain", "-lprotobuf-lite"];

/// Extra compiler flags for debug builds.
pub const DEBUG_CXX_FLAGS: &[&str] = &["-g", "-O0"];

/// Extra linker flags for debug builds.
pub const DEBUG_LD_FLAGS: &[&str] = &["-g", "-gsource-map"];

/// Extra compiler flags for release builds.
pub const RELEASE_CXX_FLAGS: &[&str] = &["-Oz"];

/// Extra linker flags for release builds.
pub const RELEASE_LD_FLAGS: &[&str] = &["-Oz", "--strip-debug"];

/// Linker flag suppressing the default entry point.
pub const NO_ENTRY_FLAG: &str = "--no-entry";
