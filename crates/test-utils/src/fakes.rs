#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rollout::build::{ArtifactBuilder, ArtifactDescriptor, BuildOutput, PlatformMatcher};
use rollout::errors::{Result, RolloutError};
use rollout::exec::{BoxFuture, Invocation, ProcessOutput, ProcessRunner};
use rollout::types::Stage;
use tokio_util::sync::CancellationToken;

/// A fake process runner that:
/// - records every invocation it is handed
/// - answers with a scripted output per program (exit 0, empty output otherwise)
#[derive(Debug, Clone, Default)]
pub struct FakeProcessRunner {
    invocations: Arc<Mutex<Vec<Invocation>>>,
    scripted: Arc<Mutex<BTreeMap<String, ProcessOutput>>>,
}

impl FakeProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every run of `program` with `output`.
    pub fn script(&self, program: &str, output: ProcessOutput) {
        self.scripted
            .lock()
            .unwrap()
            .insert(program.to_string(), output);
    }

    /// Make `program` exit with `code` and `stderr`.
    pub fn fail(&self, program: &str, code: i32, stderr: &str) {
        self.script(
            program,
            ProcessOutput {
                code: Some(code),
                stdout: Vec::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// Invocations rendered as `program arg ...`.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations().iter().map(|i| i.to_string()).collect()
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn run<'a>(
        &'a self,
        invocation: Invocation,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<ProcessOutput>> {
        Box::pin(async move {
            if cancel.is_cancelled() {
                return Err(RolloutError::Cancelled);
            }
            let output = self
                .scripted
                .lock()
                .unwrap()
                .get(&invocation.program)
                .cloned()
                .unwrap_or(ProcessOutput {
                    code: Some(0),
                    stdout: Vec::new(),
                    stderr: String::new(),
                });
            self.invocations.lock().unwrap().push(invocation);
            Ok(output)
        })
    }
}

/// A fake artifact builder that:
/// - records start/finish order
/// - sleeps for a configurable time per build (honouring cancellation)
/// - fails the artifacts it is told to fail
/// - tracks the highest number of builds running at once
#[derive(Debug, Clone, Default)]
pub struct FakeBuilder {
    delay: Duration,
    delays: Arc<HashMap<String, Duration>>,
    failing: Arc<HashSet<String>>,
    started: Arc<Mutex<Vec<String>>>,
    finished: Arc<Mutex<Vec<String>>>,
    cancelled: Arc<Mutex<Vec<String>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Per-image delay, overriding [`FakeBuilder::with_delay`].
    pub fn with_delay_for(mut self, image: &str, delay: Duration) -> Self {
        Arc::make_mut(&mut self.delays).insert(image.to_string(), delay);
        self
    }

    pub fn failing(mut self, images: &[&str]) -> Self {
        self.failing = Arc::new(images.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl ArtifactBuilder for FakeBuilder {
    fn build<'a>(
        &'a self,
        artifact: &'a ArtifactDescriptor,
        tag: &'a str,
        _platforms: &'a PlatformMatcher,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<BuildOutput>> {
        Box::pin(async move {
            let name = artifact.image_name.clone();
            self.started.lock().unwrap().push(name.clone());
            let delay = self.delays.get(&name).copied().unwrap_or(self.delay);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    self.cancelled.lock().unwrap().push(name.clone());
                    Err(RolloutError::Cancelled)
                }
                _ = tokio::time::sleep(delay) => {
                    if self.failing.contains(&name) {
                        Err(RolloutError::backend("docker", Stage::Build, format!("{name} failed")))
                    } else {
                        Ok(BuildOutput::LocalImage(tag.to_string()))
                    }
                }
            };

            self.running.fetch_sub(1, Ordering::SeqCst);
            if result.is_ok() {
                self.finished.lock().unwrap().push(name);
            }
            result
        })
    }
}

/// `Write` sink whose clones share one buffer.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
