// src/manifest/debug.rs

//! Debug instrumentation of pod specs.
//!
//! For every container running a built artifact whose language runtime is
//! known, the container is rewritten to start under a debugger or with a
//! debug agent enabled. Runtimes that need helper binaries get an init
//! container copying them from `<helpers registry>/<runtime>` into a shared
//! `emptyDir` volume mounted at `/dbg`. The applied settings are recorded as
//! JSON in the pod annotation [`DEBUG_CONFIG_ANNOTATION`]; pods that already
//! carry it are skipped.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::build::artifact::{BuiltArtifact, RuntimeHint};
use crate::errors::{Result, RolloutError};
use crate::manifest::document::{ManifestDocument, ManifestList};
use crate::manifest::group_kind::GroupKind;
use crate::manifest::image::ImageReference;
use crate::manifest::path::{child_mapping, descend_mut, mapping_child, mapping_seq};

pub const DEBUG_CONFIG_ANNOTATION: &str = "debug.cloud.google.com/config";
pub const SUPPORT_VOLUME: &str = "debugging-support-files";
pub const SUPPORT_MOUNT_PATH: &str = "/dbg";

fn stage_error(message: impl Into<String>) -> RolloutError {
    RolloutError::Transform {
        stage: "debug",
        message: message.into(),
    }
}

/// Registries consulted by the debug stage.
///
/// Computed once per invocation and shared read-only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registries {
    pub debug_helpers_registry: String,
    pub insecure_registries: BTreeSet<String>,
}

impl Registries {
    /// Helper image for a runtime, e.g. `gcr.io/.../skaffold-debug-support/go`.
    ///
    /// A plain-http registry must be listed as insecure.
    pub fn helper_image(&self, runtime: RuntimeHint) -> Result<String> {
        let registry = self.debug_helpers_registry.trim().trim_end_matches('/');
        if registry.is_empty() {
            return Err(stage_error("debug helpers registry is empty"));
        }

        let host = if let Some(host) = registry.strip_prefix("http://") {
            let hostname = host.split('/').next().unwrap_or(host);
            if !self.insecure_registries.contains(hostname) && !self.insecure_registries.contains(host) {
                return Err(stage_error(format!(
                    "debug helpers registry {registry} uses http but {hostname} is not an insecure registry"
                )));
            }
            host
        } else {
            registry.strip_prefix("https://").unwrap_or(registry)
        };

        Ok(format!("{host}/{runtime}"))
    }
}

/// What got configured for one container; serialized into the annotation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDebugConfig {
    pub runtime: RuntimeHint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    pub ports: BTreeMap<String, u16>,
}

/// Debug protocols per runtime, default first, with the port each listens on.
fn runtime_protocols(runtime: RuntimeHint) -> &'static [(&'static str, Option<u16>)] {
    match runtime {
        RuntimeHint::Jvm => &[("jdwp", Some(5005))],
        RuntimeHint::Nodejs => &[("devtools", Some(9229))],
        RuntimeHint::Python => &[("dap", Some(5678)), ("pydevd", Some(5678))],
        RuntimeHint::Go => &[("dlv", Some(56268))],
        RuntimeHint::Netcore => &[("vsdbg", None)],
    }
}

fn needs_support_files(runtime: RuntimeHint) -> bool {
    match runtime {
        RuntimeHint::Python | RuntimeHint::Go | RuntimeHint::Netcore => true,
        RuntimeHint::Jvm | RuntimeHint::Nodejs => false,
    }
}

/// Pick a protocol honouring the caller's priority list, if any.
fn choose_protocol(runtime: RuntimeHint, priority: &[String]) -> Option<(&'static str, Option<u16>)> {
    let supported = runtime_protocols(runtime);
    if priority.is_empty() {
        return supported.first().copied();
    }
    priority
        .iter()
        .find_map(|wanted| supported.iter().find(|(p, _)| p == wanted).copied())
}

/// Apply debug transforms to every pod-bearing document.
pub fn apply_debug_transforms(
    list: &mut ManifestList,
    builds: &[BuiltArtifact],
    registries: &Registries,
    protocols: &[String],
) -> Result<()> {
    for doc in list.iter_mut() {
        if debug_document(doc, builds, registries, protocols)? {
            doc.mark_modified();
        }
    }
    Ok(())
}

/// Path from the document root to the object holding the pod's `metadata` and `spec`.
fn pod_template_path(gk: &GroupKind) -> Option<&'static [&'static str]> {
    match (gk.group.as_str(), gk.kind.as_str()) {
        ("", "Pod") => Some(&[]),
        ("apps", "Deployment" | "ReplicaSet" | "StatefulSet" | "DaemonSet") | ("batch", "Job") => {
            Some(&["spec", "template"])
        }
        ("batch", "CronJob") => Some(&["spec", "jobTemplate", "spec", "template"]),
        _ => None,
    }
}

fn debug_document(
    doc: &mut ManifestDocument,
    builds: &[BuiltArtifact],
    registries: &Registries,
    protocols: &[String],
) -> Result<bool> {
    let Some(gk) = doc.group_kind() else {
        return Ok(false);
    };
    let Some(path) = pod_template_path(&gk) else {
        return Ok(false);
    };
    let resource = doc.name().unwrap_or_default().to_string();
    let Some(template) = descend_mut(doc.value_mut(), path) else {
        return Ok(false);
    };

    let already = template
        .get("metadata")
        .and_then(|m| m.get("annotations"))
        .and_then(|a| a.get(DEBUG_CONFIG_ANNOTATION))
        .is_some();
    if already {
        debug!(kind = %gk, resource = %resource, "already configured for debugging");
        return Ok(false);
    }

    let Some(Value::Mapping(spec)) = template.get_mut("spec") else {
        return Ok(false);
    };

    let mut configs: BTreeMap<String, ContainerDebugConfig> = BTreeMap::new();
    let mut support: BTreeSet<RuntimeHint> = BTreeSet::new();

    if let Some(containers) = spec.get_mut("containers").and_then(Value::as_sequence_mut) {
        for container in containers.iter_mut() {
            let Value::Mapping(container) = container else {
                continue;
            };
            let Some((name, config)) = configure_container(container, builds, protocols) else {
                continue;
            };
            if needs_support_files(config.runtime) {
                support.insert(config.runtime);
                add_support_mount(container);
            }
            debug!(kind = %gk, resource = %resource, container = %name, runtime = %config.runtime, "configured container for debugging");
            configs.insert(name, config);
        }
    }

    if configs.is_empty() {
        return Ok(false);
    }

    for runtime in &support {
        let image = registries.helper_image(*runtime)?;
        add_support_init_container(spec, *runtime, &image);
    }
    if !support.is_empty() {
        add_support_volume(spec);
    }

    let annotation = serde_json::to_string(&configs)
        .map_err(|e| stage_error(format!("encoding debug annotation: {e}")))?;
    let annotations = child_mapping(template, "metadata")
        .and_then(|metadata| mapping_child(metadata, "annotations"))
        .ok_or_else(|| stage_error(format!("{gk} {resource}: metadata is not a mapping")))?;
    annotations.insert(
        Value::String(DEBUG_CONFIG_ANNOTATION.to_string()),
        Value::String(annotation),
    );

    Ok(true)
}

/// Rewrite one container if it runs a built artifact with a known runtime.
fn configure_container(
    container: &mut Mapping,
    builds: &[BuiltArtifact],
    protocols: &[String],
) -> Option<(String, ContainerDebugConfig)> {
    let image = container.get("image")?.as_str()?;
    let base = ImageReference::parse(image).base_name;
    let build = builds
        .iter()
        .find(|b| b.tag == image || b.image_name == base)?;

    let name = container
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let runtime = build.runtime.or_else(|| detect_runtime(container))?;
    let Some((protocol, port)) = choose_protocol(runtime, protocols) else {
        debug!(container = %name, runtime = %runtime, "no requested protocol supported");
        return None;
    };

    let configured = match runtime {
        RuntimeHint::Jvm => append_env(
            container,
            "JAVA_TOOL_OPTIONS",
            "-agentlib:jdwp=transport=dt_socket,server=y,suspend=n,address=5005",
        ),
        RuntimeHint::Nodejs => append_env(container, "NODE_OPTIONS", "--inspect=0.0.0.0:9229"),
        RuntimeHint::Python => {
            let mode = if protocol == "pydevd" { "pydevd" } else { "debugpy" };
            wrap_command(
                container,
                &["/dbg/python/launcher", "--mode", mode, "--port", "5678", "--"],
                false,
            )
        }
        RuntimeHint::Go => wrap_command(
            container,
            &[
                "/dbg/go/bin/dlv",
                "exec",
                "--headless",
                "--continue",
                "--accept-multiclient",
                "--listen=:56268",
                "--api-version=2",
            ],
            true,
        ),
        RuntimeHint::Netcore => true,
    };
    if !configured {
        debug!(container = %name, runtime = %runtime, "container has no command to wrap");
        return None;
    }

    let mut ports = BTreeMap::new();
    if let Some(port) = port {
        add_port(container, protocol, port);
        ports.insert(protocol.to_string(), port);
    }

    let working_dir = container
        .get("workingDir")
        .and_then(Value::as_str)
        .map(str::to_string);

    Some((
        name,
        ContainerDebugConfig {
            runtime,
            working_dir,
            ports,
        },
    ))
}

/// Guess the runtime from environment variables and the entrypoint.
fn detect_runtime(container: &Mapping) -> Option<RuntimeHint> {
    let env_names: Vec<&str> = container
        .get("env")
        .and_then(Value::as_sequence)
        .map(|env| {
            env.iter()
                .filter_map(|e| e.get("name").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    let has_env = |names: &[&str]| env_names.iter().any(|n| names.contains(n));

    if has_env(&["JAVA_TOOL_OPTIONS", "JAVA_VERSION"]) {
        return Some(RuntimeHint::Jvm);
    }
    if has_env(&["NODE_VERSION", "NODE_ENV", "NODE_OPTIONS"]) {
        return Some(RuntimeHint::Nodejs);
    }
    if has_env(&["PYTHON_VERSION"]) {
        return Some(RuntimeHint::Python);
    }
    if has_env(&["GOMAXPROCS", "GOGC", "GODEBUG", "GOTRACEBACK"]) {
        return Some(RuntimeHint::Go);
    }
    if has_env(&["ASPNETCORE_URLS", "DOTNET_RUNNING_IN_CONTAINER"]) {
        return Some(RuntimeHint::Netcore);
    }

    let entry = command_line(container).into_iter().next()?;
    let program = entry.rsplit('/').next().unwrap_or(&entry).to_string();
    match program.as_str() {
        "java" => Some(RuntimeHint::Jvm),
        "node" | "nodemon" | "npm" => Some(RuntimeHint::Nodejs),
        "dotnet" => Some(RuntimeHint::Netcore),
        p if p.starts_with("python") => Some(RuntimeHint::Python),
        _ => None,
    }
}

fn string_list(container: &Mapping, key: &str) -> Vec<String> {
    container
        .get(key)
        .and_then(Value::as_sequence)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// `command` followed by `args`.
fn command_line(container: &Mapping) -> Vec<String> {
    let mut line = string_list(container, "command");
    line.extend(string_list(container, "args"));
    line
}

/// Replace the entrypoint with `launcher` running the original command line.
///
/// With `separate_args`, the program is followed by `--` before its own
/// arguments (the debugger's calling convention). `false` if there is no
/// command line to wrap.
fn wrap_command(container: &mut Mapping, launcher: &[&str], separate_args: bool) -> bool {
    let original = command_line(container);
    let Some((program, args)) = original.split_first() else {
        return false;
    };

    let mut command: Vec<Value> = launcher.iter().map(|s| Value::String(s.to_string())).collect();
    command.push(Value::String(program.clone()));
    if separate_args && !args.is_empty() {
        command.push(Value::String("--".to_string()));
    }
    command.extend(args.iter().cloned().map(Value::String));

    container.insert(Value::String("command".to_string()), Value::Sequence(command));
    container.shift_remove("args");
    true
}

/// Append `addition` to env var `name`, creating it if needed.
fn append_env(container: &mut Mapping, name: &str, addition: &str) -> bool {
    let Some(env) = mapping_seq(container, "env") else {
        return false;
    };
    for entry in env.iter_mut() {
        if entry.get("name").and_then(Value::as_str) != Some(name) {
            continue;
        }
        let current = entry.get("value").and_then(Value::as_str).unwrap_or_default();
        if current.contains(addition) {
            return true;
        }
        let updated = if current.is_empty() {
            addition.to_string()
        } else {
            format!("{current} {addition}")
        };
        if let Value::Mapping(entry) = entry {
            entry.insert(Value::String("value".to_string()), Value::String(updated));
        }
        return true;
    }
    env.push(named(name, [("value", Value::String(addition.to_string()))]));
    true
}

fn add_port(container: &mut Mapping, protocol: &str, port: u16) {
    let Some(ports) = mapping_seq(container, "ports") else {
        return;
    };
    let exists = ports
        .iter()
        .any(|p| p.get("containerPort").and_then(Value::as_u64) == Some(u64::from(port)));
    if !exists {
        ports.push(named(protocol, [("containerPort", Value::Number(port.into()))]));
    }
}

fn support_mount() -> Value {
    named(
        SUPPORT_VOLUME,
        [("mountPath", Value::String(SUPPORT_MOUNT_PATH.to_string()))],
    )
}

fn add_support_mount(container: &mut Mapping) {
    if let Some(mounts) = mapping_seq(container, "volumeMounts") {
        push_unique_by_name(mounts, SUPPORT_VOLUME, support_mount());
    }
}

fn add_support_volume(spec: &mut Mapping) {
    if let Some(volumes) = mapping_seq(spec, "volumes") {
        push_unique_by_name(
            volumes,
            SUPPORT_VOLUME,
            named(SUPPORT_VOLUME, [("emptyDir", Value::Mapping(Mapping::new()))]),
        );
    }
}

fn add_support_init_container(spec: &mut Mapping, runtime: RuntimeHint, image: &str) {
    let name = format!("install-{runtime}-debug-support");
    if let Some(init) = mapping_seq(spec, "initContainers") {
        let container = named(
            &name,
            [
                ("image", Value::String(image.to_string())),
                ("volumeMounts", Value::Sequence(vec![support_mount()])),
            ],
        );
        push_unique_by_name(init, &name, container);
    }
}

fn push_unique_by_name(items: &mut Vec<Value>, name: &str, item: Value) {
    let present = items
        .iter()
        .any(|i| i.get("name").and_then(Value::as_str) == Some(name));
    if !present {
        items.push(item);
    }
}

/// `{name: <name>, ...fields}`
fn named<const N: usize>(name: &str, fields: [(&str, Value); N]) -> Value {
    let mut map = Mapping::new();
    map.insert(Value::String("name".to_string()), Value::String(name.to_string()));
    for (k, v) in fields {
        map.insert(Value::String(k.to_string()), v);
    }
    Value::Mapping(map)
}
