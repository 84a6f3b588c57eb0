//! Package descriptor parsing and the loader seam.
//!
//! The build pipeline never depends on loader internals: it hands a root
//! path and a list of dependency descriptors to a [`PackageLoader`] and gets
//! back an opaque [`PackageRef`] it forwards to the planner and runner.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::consts::{DESCRIPTOR_FILE, MAIN_PACKAGE};

/// Errors from package description and loading.
#[derive(Debug, Error)]
pub enum LoaderError {
  #[error("no {DESCRIPTOR_FILE} found under {}", .0.display())]
  DescriptorNotFound(PathBuf),

  #[error("invalid package descriptor {}: {message}", .path.display())]
  InvalidDescriptor { path: PathBuf, message: String },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// One named group of build inputs: an SDK module, or submodules the user
/// declared explicitly. Descriptor order affects dependency precedence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyDesc {
  pub name: String,
  pub modules: Vec<String>,
}

/// The SDK module descriptor used when building the SDK from source.
pub fn sdk_module(sdk_root: &str) -> DependencyDesc {
  DependencyDesc {
    name: "xchain".to_string(),
    modules: vec![format!("{sdk_root}/src/xchain")],
  }
}

/// Contents of a `wasmdev.toml` descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageDesc {
  pub package: PackageSection,
  /// Dependencies the package declares itself.
  #[serde(default)]
  pub addons: Vec<AddonDecl>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PackageSection {
  pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddonDecl {
  pub name: String,
  #[serde(default)]
  pub modules: Vec<String>,
}

impl From<AddonDecl> for DependencyDesc {
  fn from(decl: AddonDecl) -> Self {
    DependencyDesc {
      name: decl.name,
      modules: decl.modules,
    }
  }
}

/// Parse the descriptor at `root`.
pub fn parse_package_desc(root: &Path) -> Result<PackageDesc, LoaderError> {
  let path = root.join(DESCRIPTOR_FILE);
  if !path.is_file() {
    return Err(LoaderError::DescriptorNotFound(root.to_path_buf()));
  }
  let text = std::fs::read_to_string(&path)?;
  toml::from_str(&text).map_err(|e| LoaderError::InvalidDescriptor {
    path,
    message: e.to_string(),
  })
}

/// Walk upward from `start` to the nearest directory holding a descriptor.
pub fn find_package_root(start: &Path) -> Result<PathBuf, LoaderError> {
  let mut dir = start;
  loop {
    if dir.join(DESCRIPTOR_FILE).is_file() {
      return Ok(dir.to_path_buf());
    }
    match dir.parent() {
      Some(parent) => dir = parent,
      None => return Err(LoaderError::DescriptorNotFound(start.to_path_buf())),
    }
  }
}

/// A loaded package. Deliberately narrow: the pipeline only needs the name,
/// the root, the source list, and the resolved dependency descriptors.
pub trait PackageRef: Send + Sync {
  fn name(&self) -> &str;

  fn is_main(&self) -> bool {
    self.name() == MAIN_PACKAGE
  }

  fn root(&self) -> &Path;

  /// Source files in deterministic order.
  fn sources(&self) -> &[PathBuf];

  fn dependencies(&self) -> &[DependencyDesc];
}

/// Produces a [`PackageRef`] from a root directory plus extra dependency
/// descriptors computed by the caller.
pub trait PackageLoader: Send + Sync {
  fn describe(&self, root: &Path) -> Result<PackageDesc, LoaderError>;

  fn load(&self, root: &Path, addons: &[DependencyDesc])
  -> Result<Box<dyn PackageRef>, LoaderError>;
}

/// Filesystem-backed loader: reads the descriptor and collects C++ sources
/// under the package root.
#[derive(Debug, Default)]
pub struct DirLoader;

impl DirLoader {
  pub fn new() -> Self {
    DirLoader
  }
}

const SOURCE_EXTENSIONS: &[&str] = &["c", "cc", "cpp", "cxx"];

impl PackageLoader for DirLoader {
  fn describe(&self, root: &Path) -> Result<PackageDesc, LoaderError> {
    parse_package_desc(root)
  }

  fn load(
    &self,
    root: &Path,
    addons: &[DependencyDesc],
  ) -> Result<Box<dyn PackageRef>, LoaderError> {
    let desc = parse_package_desc(root)?;

    let mut sources: Vec<PathBuf> = WalkDir::new(root)
      .into_iter()
      .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
      .filter_map(|entry| entry.ok())
      .filter(|entry| entry.file_type().is_file())
      .map(|entry| entry.into_path())
      .filter(|path| {
        path
          .extension()
          .and_then(|ext| ext.to_str())
          .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
      })
      .collect();
    sources.sort();

    debug!(package = %desc.package.name, sources = sources.len(), "loaded package");

    let mut dependencies: Vec<DependencyDesc> =
      desc.addons.iter().cloned().map(Into::into).collect();
    dependencies.extend(addons.iter().cloned());

    Ok(Box::new(LoadedPackage {
      name: desc.package.name,
      root: root.to_path_buf(),
      sources,
      dependencies,
    }))
  }
}

struct LoadedPackage {
  name: String,
  root: PathBuf,
  sources: Vec<PathBuf>,
  dependencies: Vec<DependencyDesc>,
}

impl PackageRef for LoadedPackage {
  fn name(&self) -> &str {
    &self.name
  }

  fn root(&self) -> &Path {
    &self.root
  }

  fn sources(&self) -> &[PathBuf] {
    &self.sources
  }

  fn dependencies(&self) -> &[DependencyDesc] {
    &self.dependencies
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn write_descriptor(dir: &Path, name: &str) {
    fs::write(
      dir.join(DESCRIPTOR_FILE),
      format!("[package]\nname = \"{name}\"\n"),
    )
    .unwrap();
  }

  #[test]
  fn find_package_root_walks_upward() {
    let temp = TempDir::new().unwrap();
    write_descriptor(temp.path(), "main");
    let nested = temp.path().join("src").join("deep");
    fs::create_dir_all(&nested).unwrap();

    let root = find_package_root(&nested).unwrap();
    assert_eq!(root, temp.path());
  }

  #[test]
  fn missing_descriptor_is_an_error() {
    let temp = TempDir::new().unwrap();
    let err = parse_package_desc(temp.path()).unwrap_err();
    assert!(matches!(err, LoaderError::DescriptorNotFound(_)));
  }

  #[test]
  fn malformed_descriptor_is_rejected() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(DESCRIPTOR_FILE), "package = \"oops\"").unwrap();
    let err = parse_package_desc(temp.path()).unwrap_err();
    assert!(matches!(err, LoaderError::InvalidDescriptor { .. }));
  }

  #[test]
  fn loader_collects_sources_in_sorted_order() {
    let temp = TempDir::new().unwrap();
    write_descriptor(temp.path(), "main");
    fs::write(temp.path().join("b.cc"), "").unwrap();
    fs::write(temp.path().join("a.cc"), "").unwrap();
    fs::write(temp.path().join("notes.md"), "").unwrap();
    fs::create_dir(temp.path().join(".cache")).unwrap();
    fs::write(temp.path().join(".cache").join("hidden.cc"), "").unwrap();

    let pkg = DirLoader::new().load(temp.path(), &[]).unwrap();
    let names: Vec<_> = pkg
      .sources()
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, vec!["a.cc", "b.cc"]);
    assert!(pkg.is_main());
  }

  #[test]
  fn declared_addons_precede_caller_descriptors() {
    let temp = TempDir::new().unwrap();
    fs::write(
      temp.path().join(DESCRIPTOR_FILE),
      "[package]\nname = \"util\"\n\n[[addons]]\nname = \"codec\"\nmodules = [\"deps/codec\"]\n",
    )
    .unwrap();

    let extra = sdk_module("/sdk");
    let pkg = DirLoader::new().load(temp.path(), &[extra.clone()]).unwrap();
    assert_eq!(pkg.dependencies().len(), 2);
    assert_eq!(pkg.dependencies()[0].name, "codec");
    assert_eq!(pkg.dependencies()[1], extra);
    assert!(!pkg.is_main());
  }
}
