//! Multi-service orchestration: pre-flight checks, fan-out, labels, teardown.

mod common;

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::{labels_of, runner, runner_with_timeout, write_project, FakeRuntime};
use reactor::error::Error;
use reactor::naming::workspace_name_prefix;
use reactor::orchestrator::{Orchestrator, WorkspaceUpOptions};
use reactor::types::{ContainerState, LABEL_SERVICE, LABEL_WORKSPACE};
use reactor::Workspace;

fn write_workspace(root: &Path, services: &str) -> PathBuf {
    let file = root.join("reactor-workspace.json");
    std::fs::write(
        &file,
        format!(r#"{{"version": "1", "services": {{{}}}}}"#, services),
    )
    .unwrap();
    file
}

struct Fixture {
    _tmp: tempfile::TempDir,
    fake: std::sync::Arc<FakeRuntime>,
    orchestrator: Orchestrator,
    workspace: Workspace,
}

fn fixture(api_ports: &str, web_ports: &str) -> Fixture {
    let tmp = tempfile::tempdir().unwrap();
    write_project(
        tmp.path(),
        "api",
        &format!(r#"{{"image": "python:3.12", "forwardPorts": [{}]}}"#, api_ports),
    );
    write_project(
        tmp.path(),
        "web",
        &format!(r#"{{"image": "node:20", "forwardPorts": [{}]}}"#, web_ports),
    );
    let file = write_workspace(
        tmp.path(),
        r#""api": {"path": "api", "account": "work"}, "web": {"path": "./web"}"#,
    );
    let fake = FakeRuntime::new();
    let orchestrator = Orchestrator::new(runner(&fake, &tmp.path().join("cfg")));
    let workspace = Workspace::load(&file).unwrap();
    Fixture {
        _tmp: tmp,
        fake,
        orchestrator,
        workspace,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_services_start_and_tear_down() {
    let fx = fixture("8000", "3000");
    let options = WorkspaceUpOptions::default();

    let report = fx.orchestrator.up(&fx.workspace, &[], &options).await.unwrap();

    assert!(!report.has_failures(), "{}", report);
    assert_eq!(report.services.len(), 2);
    let id = fx.workspace.instance_id();
    assert_eq!(report.workspace_id, id);

    let containers = fx.fake.containers();
    assert_eq!(containers.len(), 2);
    for c in &containers {
        assert_eq!(labels_of(c)[LABEL_WORKSPACE], id);
        assert!(c.running);
    }
    let api_up = report.get("api").unwrap().result.as_ref().unwrap();
    let api = fx.fake.container(&api_up.container_name).unwrap();
    assert_eq!(labels_of(&api)[LABEL_SERVICE], "api");
    assert_eq!(labels_of(&api)["reactor.account"], "work");
    assert!(api.name.starts_with(&format!("t-{}", workspace_name_prefix("api"))));
    let web = fx
        .fake
        .containers()
        .into_iter()
        .find(|c| labels_of(c)[LABEL_SERVICE] == "web")
        .unwrap();
    assert_eq!(labels_of(&web)["reactor.account"], "default");

    let listed = fx.orchestrator.list(&fx.workspace).await.unwrap();
    assert_eq!(
        listed.iter().map(|s| s.service.as_str()).collect::<Vec<_>>(),
        vec!["api", "web"]
    );
    assert!(listed.iter().all(|s| s.state == ContainerState::Running));

    let down = fx.orchestrator.down(&fx.workspace, &[]).await.unwrap();
    assert!(!down.has_failures());
    assert_eq!(down.containers.len(), 2);
    assert!(fx.orchestrator.list(&fx.workspace).await.unwrap().is_empty());
    assert!(fx.fake.containers().is_empty());
}

#[tokio::test]
async fn second_up_reuses_running_services() {
    let fx = fixture("8000", "3000");
    let options = WorkspaceUpOptions::default();
    let first = fx.orchestrator.up(&fx.workspace, &[], &options).await.unwrap();
    let second = fx.orchestrator.up(&fx.workspace, &[], &options).await.unwrap();

    for (a, b) in first.services.iter().zip(&second.services) {
        let (a, b) = (a.result.as_ref().unwrap(), b.result.as_ref().unwrap());
        assert_eq!(a.container_id, b.container_id);
        assert_eq!(b.action.to_string(), "reused");
    }
    assert_eq!(fx.fake.count("create"), 2);
}

#[tokio::test]
async fn port_conflict_aborts_before_any_daemon_call() {
    let fx = fixture("3000, 8000", "\"3000:80\"");

    let err = fx
        .orchestrator
        .up(&fx.workspace, &[], &WorkspaceUpOptions::default())
        .await
        .unwrap_err();

    match err {
        Error::CrossServicePortConflicts(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[&3000], vec!["api", "web"]);
        }
        other => panic!("expected conflict, got {:?}", other),
    }
    assert!(fx.fake.calls().is_empty());
}

#[tokio::test]
async fn selecting_one_service_skips_conflicting_sibling() {
    let fx = fixture("3000", "3000");

    let report = fx
        .orchestrator
        .up(&fx.workspace, &["web".to_string()], &WorkspaceUpOptions::default())
        .await
        .unwrap();

    assert_eq!(report.services.len(), 1);
    assert_eq!(report.services[0].service, "web");
    assert_eq!(fx.fake.containers().len(), 1);
}

#[tokio::test]
async fn one_failing_service_does_not_affect_siblings() {
    let fx = fixture("8000", "3000");
    let api_resolved = fx
        .orchestrator
        .runner()
        .resolve(&reactor::ServiceUpRequest::new(fx.workspace.service_dir("api").unwrap()))
        .unwrap();
    let api_name = format!("t-{}{}", workspace_name_prefix("api"), api_resolved.project_hash);
    fx.fake.fail_create(&api_name);

    let report = fx
        .orchestrator
        .up(&fx.workspace, &[], &WorkspaceUpOptions::default())
        .await
        .unwrap();

    assert!(report.has_failures());
    let api = report.get("api").unwrap();
    let err = api.result.as_ref().unwrap_err();
    assert!(err.to_string().contains("service 'api'"), "{}", err);
    assert!(report.get("web").unwrap().result.is_ok());
    assert!(report.to_string().contains("failed"));
    assert_eq!(fx.fake.containers().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hung_service_times_out_without_blocking_siblings() {
    let tmp = tempfile::tempdir().unwrap();
    write_project(tmp.path(), "api", r#"{"image": "python:3.12"}"#);
    write_project(tmp.path(), "web", r#"{"image": "node:20"}"#);
    let file = write_workspace(tmp.path(), r#""api": {"path": "api"}, "web": {"path": "web"}"#);
    let fake = FakeRuntime::new();
    let runner = runner_with_timeout(&fake, &tmp.path().join("cfg"), Duration::from_millis(200));
    let orchestrator = Orchestrator::new(runner);
    let workspace = Workspace::load(&file).unwrap();

    let api_dir = workspace.service_dir("api").unwrap();
    let api_hash = orchestrator
        .runner()
        .resolve(&reactor::ServiceUpRequest::new(api_dir))
        .unwrap()
        .project_hash;
    let api_name = format!("t-{}{}", workspace_name_prefix("api"), api_hash);
    fake.hang_on_target("create", &api_name);

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.up(&workspace, &[], &WorkspaceUpOptions::default()),
    )
    .await
    .expect("workspace up must not hang")
    .unwrap();

    match report.get("api").unwrap().result.as_ref().unwrap_err() {
        Error::Service { service, source } => {
            assert_eq!(service, "api");
            assert!(
                matches!(**source, Error::DaemonTimeout { operation: "create", .. }),
                "{:?}",
                source
            );
        }
        other => panic!("expected service error, got {:?}", other),
    }
    let web = report.get("web").unwrap().result.as_ref().unwrap();
    assert!(fake.container(&web.container_name).unwrap().running);
    assert!(fake.container(&api_name).is_none());
}

#[tokio::test]
async fn path_traversal_is_rejected_up_front() {
    let tmp = tempfile::tempdir().unwrap();
    let ws_dir = tmp.path().join("ws");
    write_project(&ws_dir, "ok", r#"{"image": "x"}"#);
    write_project(tmp.path(), "outside", r#"{"image": "x"}"#);
    let file = write_workspace(
        &ws_dir,
        r#""ok": {"path": "ok"}, "sneaky": {"path": "../outside"}"#,
    );
    let fake = FakeRuntime::new();
    let orchestrator = Orchestrator::new(runner(&fake, tmp.path()));
    let workspace = Workspace::load(&file).unwrap();

    let err = orchestrator
        .up(&workspace, &[], &WorkspaceUpOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::PathTraversal { ref service, .. } if service == "sneaky"));
    assert!(err.is_configuration());
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn down_twice_is_not_an_error() {
    let fx = fixture("8000", "3000");
    fx.orchestrator
        .up(&fx.workspace, &[], &WorkspaceUpOptions::default())
        .await
        .unwrap();

    let first = fx.orchestrator.down(&fx.workspace, &[]).await.unwrap();
    let second = fx.orchestrator.down(&fx.workspace, &[]).await.unwrap();

    assert_eq!(first.containers.len(), 2);
    assert!(second.containers.is_empty());
    assert!(!second.has_failures());
}

#[tokio::test]
async fn down_selected_service_only() {
    let fx = fixture("8000", "3000");
    fx.orchestrator
        .up(&fx.workspace, &[], &WorkspaceUpOptions::default())
        .await
        .unwrap();

    let report = fx
        .orchestrator
        .down(&fx.workspace, &["api".to_string()])
        .await
        .unwrap();

    assert_eq!(report.containers.len(), 1);
    assert_eq!(report.containers[0].service, "api");
    let remaining = fx.fake.containers();
    assert_eq!(remaining.len(), 1);
    assert_eq!(labels_of(&remaining[0])[LABEL_SERVICE], "web");
}

#[tokio::test]
async fn exec_targets_the_running_service_container() {
    let fx = fixture("8000", "3000");
    let cmd = vec!["echo".to_string(), "hi".to_string()];

    let err = fx
        .orchestrator
        .exec(&fx.workspace, "web", &cmd)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ServiceNotRunning(ref s) if s == "web"));

    fx.orchestrator
        .up(&fx.workspace, &[], &WorkspaceUpOptions::default())
        .await
        .unwrap();
    let out = fx.orchestrator.exec(&fx.workspace, "web", &cmd).await.unwrap();
    assert!(out.success());
    assert_eq!(out.output, "echo hi\n");

    let unknown = fx.orchestrator.exec(&fx.workspace, "db", &cmd).await.unwrap_err();
    assert!(matches!(unknown, Error::UnknownService(_)));
}

#[tokio::test]
async fn labels_not_names_define_membership() {
    let fx = fixture("8000", "3000");
    let id = fx.workspace.instance_id();
    fx.fake.seed(
        "renamed-by-hand",
        true,
        &[(LABEL_WORKSPACE, id.as_str()), (LABEL_SERVICE, "web")],
    );
    fx.fake.seed("reactor-ws-web-unrelated", true, &[]);

    let listed = fx.orchestrator.list(&fx.workspace).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].container_name, "renamed-by-hand");

    let report = fx.orchestrator.down(&fx.workspace, &[]).await.unwrap();
    assert_eq!(report.containers.len(), 1);
    assert!(fx.fake.container("reactor-ws-web-unrelated").is_some());
}

#[tokio::test]
async fn extra_labels_cannot_override_membership() {
    let fx = fixture("8000", "3000");
    let mut options = WorkspaceUpOptions::default();
    options.labels.insert("team".into(), "core".into());
    options.labels.insert(LABEL_SERVICE.into(), "spoofed".into());

    fx.orchestrator.up(&fx.workspace, &[], &options).await.unwrap();

    for c in fx.fake.containers() {
        assert_eq!(labels_of(&c)["team"], "core");
        assert_ne!(labels_of(&c)[LABEL_SERVICE], "spoofed");
    }
}
