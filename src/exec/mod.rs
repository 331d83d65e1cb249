// src/exec/mod.rs

//! Process execution layer.
//!
//! Build and deploy backends never spawn processes directly; they go through
//! [`ProcessRunner`] so tests can record invocations instead of running tools.

pub mod process;

pub use process::{BoxFuture, Invocation, ProcessOutput, ProcessRunner, RealProcessRunner, run_checked};
