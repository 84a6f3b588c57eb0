//! wasmdev-lib: build orchestration for containerized smart-contract builds
//!
//! The crate wires a package descriptor through a containerized toolchain
//! into a WebAssembly artifact:
//! - `config`: resolves compiler/linker flags and the toolchain image
//! - `package`: descriptor parsing and the loader seam
//! - `plan`: build-plan materialization (Makefile and compile database)
//! - `docker`: one-container lifecycle with guaranteed cleanup
//! - `runner`: make execution in the container or on the host
//! - `pipeline`: the whole-package build flow
//! - `lint`: ad-hoc clang-tidy runs over individual files

pub mod config;
pub mod consts;
pub mod docker;
pub mod lint;
pub mod package;
pub mod pipeline;
pub mod plan;
pub mod runner;
