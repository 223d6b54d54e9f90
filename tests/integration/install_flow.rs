//! Install stages end to end against a scripted host.

use plexlaunch::assets::AssetChoice;
use plexlaunch::client::BuildOutcome;
use plexlaunch::orchestrator::failure_lines;
use plexlaunch::prompt::{Answer, DefaultsPrompter, ScriptedPrompter};
use plexlaunch::sandbox::interpreter_path;
use plexlaunch::{InstallMode, InstallOptions, SetupError};

use crate::helpers::{FakeHost, Harness, pip_installs, test_config};

fn deferred(mode: InstallMode) -> InstallOptions {
    InstallOptions {
        mode,
        assets: Some(AssetChoice::Defer),
    }
}

#[test]
fn missing_runtime_stops_before_any_change() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost {
        runtime_version: None,
        ..FakeHost::default()
    };
    let harness = Harness::new(host, dir.path());
    let prompter = ScriptedPrompter::new([]);
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &prompter);

    let err = orchestrator
        .install(&deferred(InstallMode::Repair))
        .unwrap_err();

    assert!(matches!(err, SetupError::RuntimeNotFound { .. }));
    assert!(err.is_terminal());
    let lines = failure_lines(&err);
    assert!(lines.iter().any(|l| l.contains("https://www.python.org/downloads/")));
    assert!(!dir.path().join("install").join("venv").exists());
    assert!(prompter.asked().is_empty());
}

#[test]
fn old_runtime_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost {
        runtime_version: Some("3.9.7"),
        ..FakeHost::default()
    };
    let harness = Harness::new(host, dir.path());
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &DefaultsPrompter);

    let err = orchestrator
        .install(&deferred(InstallMode::Repair))
        .unwrap_err();

    match err {
        SetupError::UnsupportedRuntime { found, minimum, .. } => {
            assert_eq!(found, "3.9.7");
            assert_eq!(minimum, "3.10");
        }
        other => panic!("expected UnsupportedRuntime, got {other:?}"),
    }
    assert!(pip_installs(&harness.runner).is_empty());
}

#[test]
fn declining_without_gpu_installs_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost {
        gpu: false,
        ..FakeHost::default()
    };
    let harness = Harness::new(host, dir.path());
    let prompter = ScriptedPrompter::new([Answer::Confirm(false)]);
    let install_dir = dir.path().join("install");
    let orchestrator = harness.orchestrator(test_config(dir.path()), &install_dir, &prompter);

    let err = orchestrator
        .install(&deferred(InstallMode::Repair))
        .unwrap_err();

    assert!(matches!(err, SetupError::Declined { .. }));
    assert!(prompter.asked()[0].contains("No NVIDIA GPU detected"));
    assert!(pip_installs(&harness.runner).is_empty());
    assert!(!install_dir.join("venv").exists());
}

#[test]
fn failed_client_build_degrades_and_install_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost {
        client_build_ok: false,
        ..FakeHost::default()
    };
    let harness = Harness::new(host, dir.path());
    let install_dir = dir.path().join("install");
    std::fs::create_dir_all(install_dir.join("client")).unwrap();
    std::fs::write(install_dir.join("client").join("package.json"), "{}").unwrap();
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &install_dir, &DefaultsPrompter);

    let summary = orchestrator
        .install(&deferred(InstallMode::Repair))
        .unwrap();

    match summary.build {
        Some(BuildOutcome::FailedDegraded { cause, remediation }) => {
            assert!(cause.contains("npm run build"));
            assert!(remediation.contains("npm run build"));
        }
        other => panic!("expected a degraded build, got {other:?}"),
    }
    let sandbox = summary.sandbox.unwrap();
    assert!(sandbox.exists);
    assert_eq!(sandbox.interpreter_path, interpreter_path(&install_dir.join("venv")));
    assert!(summary.dependencies.iter().all(|d| d.succeeded));
    assert!(summary.credentials.token.is_some());
    assert_eq!(
        summary.assets,
        Some(plexlaunch::assets::ProvisionReport::Deferred)
    );
}

#[test]
fn repair_reuses_sandbox_and_skips_satisfied_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let install_dir = dir.path().join("install");
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &install_dir, &DefaultsPrompter);

    orchestrator
        .install(&deferred(InstallMode::Repair))
        .unwrap();
    let first_run = pip_installs(&harness.runner).len();
    assert!(first_run > 0);

    let summary = orchestrator
        .install(&deferred(InstallMode::Repair))
        .unwrap();

    assert!(summary.sandbox.unwrap().reused);
    assert!(summary.dependencies.iter().all(|d| d.already_satisfied()));
    assert_eq!(pip_installs(&harness.runner).len(), first_run);
}

#[test]
fn fresh_install_recreates_the_sandbox() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let install_dir = dir.path().join("install");
    let marker = install_dir.join("venv").join("stale-marker");
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &install_dir, &DefaultsPrompter);

    orchestrator
        .install(&deferred(InstallMode::Repair))
        .unwrap();
    std::fs::write(&marker, "old").unwrap();

    let summary = orchestrator
        .install(&deferred(InstallMode::Fresh))
        .unwrap();

    assert!(!summary.sandbox.unwrap().reused);
    assert!(!marker.exists());
}

#[test]
fn exhausted_torch_chain_names_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost {
        torch_broken: true,
        ..FakeHost::default()
    };
    let harness = Harness::new(host, dir.path());
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &DefaultsPrompter);

    let err = orchestrator
        .install(&deferred(InstallMode::Repair))
        .unwrap_err();

    match &err {
        SetupError::DependencyInstallExhausted {
            dependency,
            attempts,
            ..
        } => {
            assert_eq!(dependency, "torch");
            assert!(attempts.len() >= 2);
            assert_eq!(attempts.last().map(String::as_str), Some("generic CPU build"));
        }
        other => panic!("expected DependencyInstallExhausted, got {other:?}"),
    }
    let lines = failure_lines(&err);
    assert!(lines.iter().any(|l| l.starts_with("Tried: ")));
    assert!(
        !pip_installs(&harness.runner)
            .iter()
            .any(|l| l.contains("accelerate")),
        "later dependencies must not run after a required one fails"
    );
}

#[test]
fn models_only_skips_environment_stages() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &DefaultsPrompter);

    let summary = orchestrator
        .install(&deferred(InstallMode::ModelsOnly))
        .unwrap();

    assert!(summary.report.is_none());
    assert!(summary.sandbox.is_none());
    assert!(harness.runner.calls().is_empty());
}
