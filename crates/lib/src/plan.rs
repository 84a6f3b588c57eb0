//! Build plan materialization: the planner seam and a Makefile-style
//! implementation.
//!
//! The pipeline binds resolved flags, cache directory, and output path into
//! a [`BuildPlan`] it can emit either as the transient plan file handed to
//! make or as a compile database for IDE integration.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crate::package::PackageRef;

/// Errors from build-plan construction and emission.
#[derive(Debug, Error)]
pub enum PlanError {
  #[error("package {name} has no sources under {}", .root.display())]
  NoSources { name: String, root: PathBuf },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to serialize compile database: {0}")]
  CompileDb(#[from] serde_json::Error),
}

/// A materialized, ordered set of compile and link actions.
pub trait BuildPlan: Send + Sync {
  /// Write the plan in the format the runner's make invocation consumes.
  fn emit_plan(&self, out: &mut dyn Write) -> Result<(), PlanError>;

  /// Write a clang-style compile database covering every source.
  fn emit_compile_db(&self, out: &mut dyn Write) -> Result<(), PlanError>;
}

/// Turns a loaded package into a [`BuildPlan`].
pub trait BuildPlanner: Send + Sync {
  fn parse(&self, pkg: &dyn PackageRef) -> Result<Box<dyn BuildPlan>, PlanError>;
}

/// Planner emitting a Makefile bound to the resolved flags.
#[derive(Debug, Default)]
pub struct MakefilePlanner {
  cxx_flags: Vec<String>,
  ld_flags: Vec<String>,
  cache_dir: PathBuf,
  output: Option<PathBuf>,
}

impl MakefilePlanner {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_cxx_flags(mut self, flags: &[String]) -> Self {
    self.cxx_flags = flags.to_vec();
    self
  }

  pub fn with_ld_flags(mut self, flags: &[String]) -> Self {
    self.ld_flags = flags.to_vec();
    self
  }

  pub fn with_cache_dir(mut self, dir: &Path) -> Self {
    self.cache_dir = dir.to_path_buf();
    self
  }

  pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
    self.output = output;
    self
  }
}

impl BuildPlanner for MakefilePlanner {
  fn parse(&self, pkg: &dyn PackageRef) -> Result<Box<dyn BuildPlan>, PlanError> {
    if pkg.sources().is_empty() {
      return Err(PlanError::NoSources {
        name: pkg.name().to_string(),
        root: pkg.root().to_path_buf(),
      });
    }

    let objects = pkg
      .sources()
      .iter()
      .enumerate()
      .map(|(index, source)| {
        let stem = source
          .file_stem()
          .map(|s| s.to_string_lossy().into_owned())
          .unwrap_or_else(|| "source".to_string());
        let object = self.cache_dir.join(format!("{stem}-{index}.o"));
        (source.clone(), object)
      })
      .collect();

    Ok(Box::new(MakefilePlan {
      cxx_flags: self.cxx_flags.clone(),
      ld_flags: self.ld_flags.clone(),
      root: pkg.root().to_path_buf(),
      output: self.output.clone(),
      objects,
    }))
  }
}

struct MakefilePlan {
  cxx_flags: Vec<String>,
  ld_flags: Vec<String>,
  root: PathBuf,
  output: Option<PathBuf>,
  objects: Vec<(PathBuf, PathBuf)>,
}

#[derive(Serialize)]
struct CompileCommand {
  directory: String,
  file: String,
  command: String,
}

impl BuildPlan for MakefilePlan {
  fn emit_plan(&self, out: &mut dyn Write) -> Result<(), PlanError> {
    writeln!(out, "# generated by wasmdev, do not edit")?;
    writeln!(out, "CXX := em++")?;
    writeln!(out, "CXXFLAGS := {}", self.cxx_flags.join(" "))?;
    writeln!(out, "LDFLAGS := {}", self.ld_flags.join(" "))?;
    let objects: Vec<String> = self
      .objects
      .iter()
      .map(|(_, object)| object.display().to_string())
      .collect();
    writeln!(out, "OBJS := {}", objects.join(" "))?;
    writeln!(out)?;

    match &self.output {
      Some(output) => {
        writeln!(out, "OUTPUT := {}", output.display())?;
        writeln!(out, "all: $(OUTPUT)")?;
        writeln!(out)?;
        writeln!(out, "$(OUTPUT): $(OBJS)")?;
        // Link order: object flags first, library flags after.
        writeln!(out, "\t$(CXX) -o $@ $(OBJS) $(LDFLAGS)")?;
      }
      None => {
        writeln!(out, "all: $(OBJS)")?;
      }
    }
    writeln!(out)?;

    for (source, object) in &self.objects {
      writeln!(out, "{}: {}", object.display(), source.display())?;
      writeln!(out, "\t$(CXX) $(CXXFLAGS) -c -o $@ $<")?;
      writeln!(out)?;
    }
    Ok(())
  }

  fn emit_compile_db(&self, out: &mut dyn Write) -> Result<(), PlanError> {
    let entries: Vec<CompileCommand> = self
      .objects
      .iter()
      .map(|(source, object)| CompileCommand {
        directory: self.root.display().to_string(),
        file: source.display().to_string(),
        command: format!(
          "em++ {} -c -o {} {}",
          self.cxx_flags.join(" "),
          object.display(),
          source.display()
        ),
      })
      .collect();
    serde_json::to_writer_pretty(&mut *out, &entries)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::package::DependencyDesc;

  struct FakePackage {
    name: String,
    root: PathBuf,
    sources: Vec<PathBuf>,
  }

  impl PackageRef for FakePackage {
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
      &[]
    }
  }

  fn package(sources: &[&str]) -> FakePackage {
    FakePackage {
      name: "main".to_string(),
      root: PathBuf::from("/work/contract"),
      sources: sources.iter().map(PathBuf::from).collect(),
    }
  }

  fn planner() -> MakefilePlanner {
    MakefilePlanner::new()
      .with_cxx_flags(&["-std=c++11".to_string()])
      .with_ld_flags(&["-Oz".to_string()])
      .with_cache_dir(Path::new("/cache"))
      .with_output(Some(PathBuf::from("/work/contract/contract.wasm")))
  }

  #[test]
  fn plan_binds_flags_and_output() {
    let plan = planner().parse(&package(&["/work/contract/main.cc"])).unwrap();
    let mut buf = Vec::new();
    plan.emit_plan(&mut buf).unwrap();
    let text = String::from_utf8(buf).unwrap();

    assert!(text.contains("CXXFLAGS := -std=c++11"));
    assert!(text.contains("LDFLAGS := -Oz"));
    assert!(text.contains("OUTPUT := /work/contract/contract.wasm"));
    assert!(text.contains("/work/contract/main.cc"));
  }

  #[test]
  fn plan_emission_is_deterministic() {
    let plan = planner()
      .parse(&package(&["/work/contract/a.cc", "/work/contract/b.cc"]))
      .unwrap();
    let mut first = Vec::new();
    let mut second = Vec::new();
    plan.emit_plan(&mut first).unwrap();
    plan.emit_plan(&mut second).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn empty_package_is_rejected() {
    let err = planner().parse(&package(&[])).err().unwrap();
    assert!(matches!(err, PlanError::NoSources { .. }));
  }

  #[test]
  fn compile_db_lists_every_source() {
    let plan = planner()
      .parse(&package(&["/work/contract/a.cc", "/work/contract/b.cc"]))
      .unwrap();
    let mut buf = Vec::new();
    plan.emit_compile_db(&mut buf).unwrap();
    let entries: serde_json::Value = serde_json::from_slice(&buf).unwrap();

    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["directory"], "/work/contract");
    assert!(
      entries[1]["command"]
        .as_str()
        .unwrap()
        .contains("/work/contract/b.cc")
    );
  }
}
