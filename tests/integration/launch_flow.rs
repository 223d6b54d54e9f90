//! Launch: pre-flight, command assembly, supervision and cleanup.

use std::path::Path;

use plexlaunch::assets::AssetChoice;
use plexlaunch::launch::{Exposure, LaunchMode, LaunchSelection, STATIC_NONE};
use plexlaunch::prompt::{Answer, DefaultsPrompter, ScriptedPrompter};
use plexlaunch::sandbox::interpreter_path;
use plexlaunch::supervisor::{ExitCategory, SIGNAL_EXIT_CODE, remediation_lines};
use plexlaunch::{InstallMode, InstallOptions, SetupError};

use crate::helpers::{
    FakeHost, Harness, is_empty_dir, server_call, test_config, write_interpreter,
};

const LOCAL: LaunchSelection = LaunchSelection::new(LaunchMode::Normal, Exposure::Local);

fn with_sandbox(install_dir: &Path) {
    write_interpreter(&interpreter_path(&install_dir.join("venv")));
}

#[test]
fn degraded_client_build_launches_with_status_page() {
    let dir = tempfile::tempdir().unwrap();
    let ssl_root = dir.path().join("ssl");
    let host = FakeHost {
        client_build_ok: false,
        ..FakeHost::default()
    };
    let harness = Harness::new(host, dir.path());
    let install_dir = dir.path().join("install");
    std::fs::create_dir_all(install_dir.join("client")).unwrap();
    std::fs::write(install_dir.join("client").join("package.json"), "{}").unwrap();
    let orchestrator = harness.orchestrator(test_config(&ssl_root), &install_dir, &DefaultsPrompter);

    let summary = orchestrator
        .install(&InstallOptions {
            mode: InstallMode::Repair,
            assets: Some(AssetChoice::Defer),
        })
        .unwrap();
    assert!(summary.build.unwrap().is_degraded());

    let classification = orchestrator.launch(Some(LOCAL)).unwrap();

    assert!(classification.is_clean());
    let call = server_call(&harness.runner).expect("server started");
    assert_eq!(call.arg_after("--static"), Some(STATIC_NONE));
    assert_eq!(call.arg_after("--port"), Some("8998"));
    assert!(!call.has_arg("--cpu-offload"));
    assert!(is_empty_dir(&ssl_root));
}

#[test]
fn built_client_is_served() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let install_dir = dir.path().join("install");
    with_sandbox(&install_dir);
    let dist = install_dir.join("client").join("dist");
    std::fs::create_dir_all(&dist).unwrap();
    std::fs::write(dist.join("index.html"), "<html></html>").unwrap();
    let orchestrator =
        harness.orchestrator(test_config(&dir.path().join("ssl")), &install_dir, &DefaultsPrompter);

    orchestrator.launch(Some(LOCAL)).unwrap();

    let call = server_call(&harness.runner).unwrap();
    assert_eq!(call.arg_after("--static"), Some(dist.display().to_string().as_str()));
}

#[test]
fn nonzero_exit_is_unknown_with_every_remediation() {
    let dir = tempfile::tempdir().unwrap();
    let ssl_root = dir.path().join("ssl");
    let host = FakeHost {
        server_exit: Some(1),
        ..FakeHost::default()
    };
    let harness = Harness::new(host, dir.path());
    let install_dir = dir.path().join("install");
    with_sandbox(&install_dir);
    let orchestrator = harness.orchestrator(test_config(&ssl_root), &install_dir, &DefaultsPrompter);

    let classification = orchestrator.launch(Some(LOCAL)).unwrap();

    assert_eq!(classification.code, 1);
    assert_eq!(classification.category, ExitCategory::Unknown);
    assert_eq!(remediation_lines(classification, LOCAL, 8998).len(), 5);
    assert!(is_empty_dir(&ssl_root));
}

#[test]
fn signal_exit_uses_sentinel_code() {
    let dir = tempfile::tempdir().unwrap();
    let host = FakeHost {
        server_exit: None,
        ..FakeHost::default()
    };
    let harness = Harness::new(host, dir.path());
    let install_dir = dir.path().join("install");
    with_sandbox(&install_dir);
    let orchestrator =
        harness.orchestrator(test_config(&dir.path().join("ssl")), &install_dir, &DefaultsPrompter);

    let classification = orchestrator.launch(Some(LOCAL)).unwrap();

    assert_eq!(classification.code, SIGNAL_EXIT_CODE);
    assert!(!classification.is_clean());
}

#[test]
fn missing_sandbox_fails_preflight_without_starting_server() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let orchestrator = harness.orchestrator(
        test_config(&dir.path().join("ssl")),
        &dir.path().join("install"),
        &DefaultsPrompter,
    );

    let err = orchestrator.launch(Some(LOCAL)).unwrap_err();

    match &err {
        SetupError::LaunchFailed { next_action, .. } => {
            assert!(next_action.contains("plexlaunch install"));
        }
        other => panic!("expected LaunchFailed, got {other:?}"),
    }
    assert!(server_call(&harness.runner).is_none());
}

#[test]
fn offload_and_tunnel_flags_reach_the_server() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let install_dir = dir.path().join("install");
    with_sandbox(&install_dir);
    let orchestrator =
        harness.orchestrator(test_config(&dir.path().join("ssl")), &install_dir, &DefaultsPrompter);

    orchestrator
        .launch(Some(LaunchSelection::new(
            LaunchMode::CpuOffload,
            Exposure::PublicTunnel,
        )))
        .unwrap();

    let call = server_call(&harness.runner).unwrap();
    assert!(call.has_arg("--cpu-offload"));
    assert!(call.has_arg("--gradio-tunnel"));
    assert_eq!(call.env_value("HF_TOKEN"), Some("hf_integration"));
    assert_eq!(
        call.env_value("PYTORCH_CUDA_ALLOC_CONF"),
        Some("expandable_segments:True")
    );
    assert!(!format!("{call:?}").contains("hf_integration"));
}

#[test]
fn interactive_choice_picks_from_all_four_modes() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let install_dir = dir.path().join("install");
    with_sandbox(&install_dir);
    let prompter = ScriptedPrompter::new([Answer::Select(1)]);
    let orchestrator =
        harness.orchestrator(test_config(&dir.path().join("ssl")), &install_dir, &prompter);

    orchestrator.launch(None).unwrap();

    assert_eq!(prompter.asked(), vec!["Launch mode"]);
    let call = server_call(&harness.runner).unwrap();
    assert!(call.has_arg("--cpu-offload"));
    assert!(!call.has_arg("--gradio-tunnel"));
}

#[test]
fn local_models_and_voices_are_passed_explicitly() {
    let dir = tempfile::tempdir().unwrap();
    let cache = dir.path().join("cache");
    std::fs::create_dir_all(&cache).unwrap();
    let models = dir.path().join("models");
    let harness = Harness::new(FakeHost::default(), &cache);
    let install_dir = dir.path().join("install");
    with_sandbox(&install_dir);
    let orchestrator =
        harness.orchestrator(test_config(&dir.path().join("ssl")), &install_dir, &DefaultsPrompter);

    orchestrator.provision_assets(Some(AssetChoice::DownloadNow)).unwrap();
    orchestrator
        .provision_assets(Some(AssetChoice::UseLocalPath(models.clone())))
        .unwrap();
    orchestrator.launch(Some(LOCAL)).unwrap();

    let call = server_call(&harness.runner).unwrap();
    assert_eq!(
        call.arg_after("--moshi-weight"),
        Some(models.join("model.safetensors").display().to_string().as_str())
    );
    assert_eq!(
        call.arg_after("--tokenizer"),
        Some(models.join("tokenizer_spm_32k_3.model").display().to_string().as_str())
    );
    assert_eq!(
        call.arg_after("--voice-prompt-dir"),
        Some(cache.join("voices").display().to_string().as_str())
    );
}
