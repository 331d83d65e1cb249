use std::collections::BTreeMap;
use std::sync::Arc;

use rollout::build::BuiltArtifact;
use rollout::config::{KubectlDeploy, TerraformDeploy};
use rollout::deploy::{DeployStatus, Deployer, DeployerMux, KubectlDeployer, TerraformDeployer};
use rollout::errors::RolloutError;
use rollout::manifest::{ManifestList, ManifestListByConfig};
use rollout::types::Stage;
use rollout_test_utils::builders::unit;
use rollout_test_utils::{FakeProcessRunner, init_tracing};
use tokio_util::sync::CancellationToken;

fn terraform(runner: &FakeProcessRunner) -> TerraformDeployer {
    let mut network = unit("network", &[]);
    network.auto_approve = true;
    let mut db = unit("db", &["network"]);
    db.vars = BTreeMap::from([("size".to_string(), "small".to_string())]);
    db.workspace = Some("staging".to_string());
    let app = unit("app", &["db", "network"]);

    TerraformDeployer::new(
        "infra",
        "/repo",
        TerraformDeploy {
            units: vec![app, db, network],
        },
        Arc::new(runner.clone()),
    )
}

#[tokio::test]
async fn terraform_dry_run_prints_plan_and_runs_nothing() {
    init_tracing();
    let runner = FakeProcessRunner::new();
    let deployer = terraform(&runner);
    let mut out = Vec::new();

    deployer
        .cleanup(true, &ManifestListByConfig::new(), &CancellationToken::new(), &mut out)
        .await
        .unwrap();

    assert!(runner.invocations().is_empty());
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "would run 'terraform destroy' for unit network in /repo/infra/network\n\
         would run 'terraform destroy' for unit db in /repo/infra/db\n\
         would run 'terraform destroy' for unit app in /repo/infra/app\n"
    );
}

#[tokio::test]
async fn terraform_deploy_runs_units_in_dependency_order() {
    init_tracing();
    let runner = FakeProcessRunner::new();
    let deployer = terraform(&runner);

    deployer
        .deploy(&[], &ManifestListByConfig::new(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        runner.command_lines(),
        vec![
            "terraform init",
            "terraform apply -auto-approve",
            "terraform init",
            "terraform workspace select -or-create staging",
            "terraform apply -var size=small",
            "terraform init",
            "terraform apply",
        ]
    );
    let dirs: Vec<_> = runner
        .invocations()
        .iter()
        .map(|i| i.dir.clone().unwrap())
        .collect();
    assert_eq!(dirs[0], std::path::PathBuf::from("/repo/infra/network"));
    assert_eq!(dirs[6], std::path::PathBuf::from("/repo/infra/app"));
}

#[tokio::test]
async fn terraform_failure_names_backend_stage_and_unit() {
    init_tracing();
    let runner = FakeProcessRunner::new();
    runner.fail("terraform", 1, "Error: backend unreachable");
    let deployer = terraform(&runner);

    let err = deployer
        .deploy(&[], &ManifestListByConfig::new(), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        RolloutError::BackendExecution {
            backend,
            stage,
            message,
        } => {
            assert_eq!(backend, "terraform");
            assert_eq!(stage, Stage::Init);
            assert!(message.starts_with("unit 'network': "), "{message}");
            assert!(message.contains("backend unreachable"), "{message}");
        }
        other => panic!("expected a backend failure, got {other:?}"),
    }
    // Nothing after the failing init.
    assert_eq!(runner.invocations().len(), 1);
}

#[tokio::test]
async fn terraform_cleanup_destroys_every_unit() {
    let runner = FakeProcessRunner::new();
    let deployer = terraform(&runner);
    let mut out = Vec::new();

    deployer
        .cleanup(false, &ManifestListByConfig::new(), &CancellationToken::new(), &mut out)
        .await
        .unwrap();

    assert!(out.is_empty());
    assert_eq!(
        runner.command_lines(),
        vec![
            "terraform destroy -auto-approve",
            "terraform destroy -var size=small -auto-approve",
            "terraform destroy -auto-approve",
        ]
    );
}

const STREAM: &str = "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n";

fn manifests(config: &str) -> ManifestListByConfig {
    let mut by_config = ManifestListByConfig::new();
    by_config.add(config, ManifestList::parse(STREAM).unwrap());
    by_config
}

#[tokio::test]
async fn kubectl_pipes_its_own_manifests() {
    init_tracing();
    let runner = FakeProcessRunner::new();
    let deployer = KubectlDeployer::new("web", KubectlDeploy::default(), vec![], Arc::new(runner.clone()));
    let builds = vec![BuiltArtifact {
        image_name: "web".to_string(),
        tag: "web:1".to_string(),
        runtime: None,
    }];

    deployer
        .deploy(&builds, &manifests("web"), &CancellationToken::new())
        .await
        .unwrap();
    // Another config's manifests are not this deployer's business.
    deployer
        .deploy(&builds, &manifests("other"), &CancellationToken::new())
        .await
        .unwrap();

    let invocations = runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(invocations[0].to_string(), "kubectl apply -f -");
    assert_eq!(invocations[0].stdin.as_deref(), Some(STREAM.as_bytes()));
    assert_eq!(deployer.status_monitor().check(), DeployStatus::Succeeded);
}

fn built(name: &str, tag: &str) -> BuiltArtifact {
    BuiltArtifact {
        image_name: name.to_string(),
        tag: tag.to_string(),
        runtime: None,
    }
}

#[tokio::test]
async fn kubectl_tracks_only_images_its_manifests_use() {
    let runner = FakeProcessRunner::new();
    let deployer = KubectlDeployer::new("web", KubectlDeploy::default(), vec![], Arc::new(runner.clone()));
    let pod = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: web\nspec:\n  containers:\n  - name: web\n    image: web:1\n";
    let mut by_config = ManifestListByConfig::new();
    by_config.add("web", ManifestList::parse(pod).unwrap());
    let builds = vec![built("web", "web:1"), built("api", "api:2")];

    deployer
        .deploy(&builds, &by_config, &CancellationToken::new())
        .await
        .unwrap();

    let tracked = deployer.tracked();
    assert_eq!(tracked.builds, builds);
    assert_eq!(tracked.deployed, vec![built("web", "web:1")]);
}

#[tokio::test]
async fn kubectl_failure_is_reported_by_status_monitor() {
    let runner = FakeProcessRunner::new();
    runner.fail("kubectl", 1, "connection refused");
    let deployer = KubectlDeployer::new("web", KubectlDeploy::default(), vec![], Arc::new(runner.clone()));

    let err = deployer
        .deploy(&[], &manifests("web"), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), deployer_status_message(&deployer));
}

fn deployer_status_message(deployer: &KubectlDeployer) -> String {
    match deployer.status_monitor().check() {
        DeployStatus::Failed(message) => message,
        other => panic!("expected failed status, got {other:?}"),
    }
}

#[tokio::test]
async fn mux_runs_deployers_in_configuration_order() {
    init_tracing();
    let runner = FakeProcessRunner::new();
    let kubectl: Arc<dyn Deployer> = Arc::new(KubectlDeployer::new(
        "web",
        KubectlDeploy::default(),
        vec!["k8s/web.yaml".into()],
        Arc::new(runner.clone()),
    ));
    let infra: Arc<dyn Deployer> = Arc::new(terraform(&runner));
    let mux = DeployerMux::new(vec![kubectl, infra]).unwrap();

    mux.deploy(&[], &manifests("web"), &CancellationToken::new())
        .await
        .unwrap();

    let lines = runner.command_lines();
    assert_eq!(lines[0], "kubectl apply -f -");
    assert_eq!(lines[1], "terraform init");
    assert_eq!(mux.dependencies().unwrap(), vec![std::path::PathBuf::from("k8s/web.yaml")]);
}

#[test]
fn mux_rejects_duplicate_config_names() {
    let runner = FakeProcessRunner::new();
    let a: Arc<dyn Deployer> = Arc::new(KubectlDeployer::new("web", KubectlDeploy::default(), vec![], Arc::new(runner.clone())));
    let b: Arc<dyn Deployer> = Arc::new(KubectlDeployer::new("web", KubectlDeploy::default(), vec![], Arc::new(runner)));
    let err = DeployerMux::new(vec![a, b]).unwrap_err();
    assert!(matches!(err, RolloutError::ConfigError(_)), "{err:?}");
}

#[tokio::test]
async fn mux_stops_when_cancelled() {
    let runner = FakeProcessRunner::new();
    let infra: Arc<dyn Deployer> = Arc::new(terraform(&runner));
    let mux = DeployerMux::new(vec![infra]).unwrap();
    let token = CancellationToken::new();
    token.cancel();

    let err = mux
        .deploy(&[], &ManifestListByConfig::new(), &token)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert!(runner.invocations().is_empty());
}
