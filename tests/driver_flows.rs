use std::error::Error;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rollout::config::{ConfigFile, GlobalConfig, KubectlDeploy};
use rollout::engine::{Driver, FilterOptions, Flow, Phase, RunContext, RunOptions};
use rollout::errors::RolloutError;
use rollout::exec::ProcessOutput;
use rollout::fs::RealFileSystem;
use rollout::types::TagPolicy;
use rollout_test_utils::builders::{ConfigFileBuilder, docker_artifact, unit};
use rollout_test_utils::{FakeBuilder, FakeProcessRunner, SharedBuffer, init_tracing};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

const DEPLOYMENT: &str = "\
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  replicas: 1 # from-param: ${replicas}
  template:
    spec:
      containers:
      - name: web
        image: web
";

struct Project {
    dir: TempDir,
    runner: FakeProcessRunner,
    builder: FakeBuilder,
}

impl Project {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("k8s")).unwrap();
        fs::write(dir.path().join("k8s/web.yaml"), DEPLOYMENT).unwrap();
        Self {
            dir,
            runner: FakeProcessRunner::new(),
            builder: FakeBuilder::new(),
        }
    }

    fn path(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }

    fn web_config(&self) -> ConfigFile {
        ConfigFileBuilder::new("web")
            .with_artifact(docker_artifact("web", &[]))
            .with_tag_policy(TagPolicy::Latest)
            .with_manifests("k8s/*.yaml")
            .with_setter("replicas", "2")
            .with_kubectl(KubectlDeploy::default())
            .build_at(self.path("Rollout.toml"))
    }

    fn infra_config(&self) -> ConfigFile {
        ConfigFileBuilder::new("infra")
            .with_terraform_units(vec![unit("db", &["network"]), unit("network", &[])])
            .build_at(self.path("infra.toml"))
    }

    fn api_config(&self) -> ConfigFile {
        ConfigFileBuilder::new("api")
            .with_artifact(docker_artifact("api", &[]))
            .with_tag_policy(TagPolicy::Latest)
            .build_at(self.path("api.toml"))
    }

    fn context(&self, configs: Vec<ConfigFile>, options: RunOptions) -> RunContext {
        RunContext::new(
            configs,
            &GlobalConfig::default(),
            options,
            Arc::new(RealFileSystem),
            Arc::new(self.runner.clone()),
        )
        .unwrap()
        .with_builder(Arc::new(self.builder.clone()))
    }
}

#[tokio::test]
async fn deploy_applies_transformed_manifests() -> TestResult {
    init_tracing();
    let project = Project::new();
    let options = RunOptions {
        setters: [("replicas".to_string(), "3".to_string())].into(),
        ..Default::default()
    };
    let ctx = project.context(vec![project.web_config()], options);

    let mut driver = Driver::new(&ctx, Flow::Deploy, CancellationToken::new());
    driver.run().await?;

    assert_eq!(driver.phase(), Phase::Done);
    assert_eq!(project.builder.finished(), vec!["web".to_string()]);

    let invocations = project.runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].to_string(), "kubectl apply -f -");
    let applied = String::from_utf8(invocations[0].stdin.clone().unwrap())?;
    assert!(applied.contains("image: web:latest"), "{applied}");
    assert!(applied.contains("replicas: 3"), "{applied}");
    assert!(applied.contains("app.kubernetes.io/managed-by: rollout"), "{applied}");
    Ok(())
}

#[tokio::test]
async fn build_failure_never_reaches_deploy() {
    init_tracing();
    let mut project = Project::new();
    project.builder = FakeBuilder::new().failing(&["web"]);
    let ctx = project.context(vec![project.web_config()], RunOptions::default());

    let mut driver = Driver::new(&ctx, Flow::Deploy, CancellationToken::new());
    let err = driver.run().await.unwrap_err();

    assert!(matches!(err, RolloutError::BackendExecution { .. }), "{err:?}");
    assert_eq!(driver.phase(), Phase::Failed);
    assert!(driver.manifests().is_empty());
    assert!(project.runner.invocations().is_empty());
}

#[tokio::test]
async fn builds_from_separate_configs_overlap() -> TestResult {
    init_tracing();
    let mut project = Project::new();
    project.builder = FakeBuilder::new().with_delay(Duration::from_millis(100));
    let ctx = project.context(
        vec![project.web_config(), project.api_config()],
        RunOptions {
            build_concurrency: Some(2),
            ..Default::default()
        },
    );

    let mut driver = Driver::new(&ctx, Flow::Build { file_output: None }, CancellationToken::new());
    driver.run().await?;

    assert_eq!(project.builder.peak_concurrency(), 2);
    let built: Vec<&str> = driver.builds().iter().map(|b| b.image_name.as_str()).collect();
    assert_eq!(built, vec!["web", "api"]);
    Ok(())
}

#[tokio::test]
async fn delete_dry_run_prints_plan_only() -> TestResult {
    init_tracing();
    let project = Project::new();
    let ctx = project.context(
        vec![project.web_config(), project.infra_config()],
        RunOptions::default(),
    );
    let out = SharedBuffer::new();

    let mut driver = Driver::new(&ctx, Flow::Delete { dry_run: true }, CancellationToken::new())
        .with_output(Box::new(out.clone()));
    driver.run().await?;

    assert!(project.builder.started().is_empty(), "delete must not build");
    assert!(project.runner.invocations().is_empty());

    let infra = project.path("infra");
    let expected = format!(
        "would delete Deployment.apps web\n\
         would run 'terraform destroy' for unit network in {}\n\
         would run 'terraform destroy' for unit db in {}\n",
        infra.join("network").display(),
        infra.join("db").display(),
    );
    assert_eq!(out.contents(), expected);
    Ok(())
}

#[tokio::test]
async fn delete_runs_kubectl_delete_with_rendered_stream() -> TestResult {
    let project = Project::new();
    let ctx = project.context(vec![project.web_config()], RunOptions::default());

    let mut driver = Driver::new(&ctx, Flow::Delete { dry_run: false }, CancellationToken::new())
        .with_output(Box::new(SharedBuffer::new()));
    driver.run().await?;

    let lines = project.runner.command_lines();
    assert_eq!(lines, vec!["kubectl delete --ignore-not-found=true -f -"]);
    Ok(())
}

#[tokio::test]
async fn render_writes_output_file() -> TestResult {
    let project = Project::new();
    let ctx = project.context(vec![project.web_config()], RunOptions::default());
    let target = project.path("out/rendered.yaml");

    let flow = Flow::Render {
        output: Some(target.clone()),
    };
    Driver::new(&ctx, flow, CancellationToken::new()).run().await?;

    let rendered = fs::read_to_string(&target)?;
    assert!(rendered.contains("image: web:latest"), "{rendered}");
    assert!(rendered.contains("replicas: 2"), "{rendered}");
    assert!(project.builder.started().is_empty());
    Ok(())
}

#[tokio::test]
async fn filter_pipes_input_through_post_renderer() -> TestResult {
    init_tracing();
    let project = Project::new();
    project.runner.script(
        "post-render",
        ProcessOutput {
            code: Some(0),
            stdout: DEPLOYMENT.as_bytes().to_vec(),
            stderr: String::new(),
        },
    );
    let results = project.path("builds.json");
    fs::write(&results, r#"{"builds":[{"imageName":"web","tag":"registry.local/web:abc"}]}"#)?;

    let ctx = project.context(vec![project.web_config()], RunOptions::default());
    let out = SharedBuffer::new();
    let flow = Flow::Filter(FilterOptions {
        post_renderer: Some("post-render".into()),
        build_artifacts: Some(results),
        ..Default::default()
    });

    let mut driver = Driver::new(&ctx, flow, CancellationToken::new())
        .with_input(Box::new(Cursor::new(b"kind: List\n".to_vec())))
        .with_output(Box::new(out.clone()));
    driver.run().await?;

    let invocations = project.runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].stdin.as_deref(), Some(&b"kind: List\n"[..]));

    let text = out.contents();
    assert!(text.contains("image: registry.local/web:abc"), "{text}");
    // Config setters do not apply to filtered streams.
    assert!(text.contains("replicas: 1"), "{text}");
    assert!(project.builder.started().is_empty());
    Ok(())
}

#[tokio::test]
async fn build_results_file_round_trips_into_filter() -> TestResult {
    let project = Project::new();
    let ctx = project.context(vec![project.web_config()], RunOptions::default());
    let results = project.path("out/builds.json");

    Driver::new(
        &ctx,
        Flow::Build {
            file_output: Some(results.clone()),
        },
        CancellationToken::new(),
    )
    .run()
    .await?;
    assert!(Path::new(&results).is_file());

    let out = SharedBuffer::new();
    let flow = Flow::Filter(FilterOptions {
        build_artifacts: Some(results),
        ..Default::default()
    });
    Driver::new(&ctx, flow, CancellationToken::new())
        .with_input(Box::new(Cursor::new(DEPLOYMENT.as_bytes().to_vec())))
        .with_output(Box::new(out.clone()))
        .run()
        .await?;

    assert!(out.contents().contains("image: web:latest"), "{}", out.contents());
    Ok(())
}
