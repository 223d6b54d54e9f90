//! Model artifact provisioning and verification through the orchestrator.

use plexlaunch::assets::{AssetChoice, AssetError, ProvisionReport, VoiceOutcome};
use plexlaunch::config::ModelPathConfig;
use plexlaunch::prompt::DefaultsPrompter;
use plexlaunch::SetupError;

use crate::helpers::{DirSource, FakeHost, Harness, test_config};

#[test]
fn voices_are_extracted_once() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &DefaultsPrompter);

    let first = orchestrator
        .provision_assets(Some(AssetChoice::DownloadNow))
        .unwrap();
    let second = orchestrator
        .provision_assets(Some(AssetChoice::DownloadNow))
        .unwrap();

    let voices_dir = dir.path().join("voices");
    match (first, second) {
        (
            ProvisionReport::Downloaded {
                files,
                voices: Some(VoiceOutcome::Extracted(a)),
            },
            ProvisionReport::Downloaded {
                voices: Some(VoiceOutcome::AlreadyPresent(b)),
                ..
            },
        ) => {
            assert_eq!(files.len(), 3);
            assert_eq!(a, voices_dir);
            assert_eq!(b, voices_dir);
        }
        other => panic!("unexpected reports: {other:?}"),
    }
    assert!(voices_dir.join("NATF0.pt").is_file());
}

#[test]
fn local_path_is_recorded_and_verified_there() {
    let dir = tempfile::tempdir().unwrap();
    let install_dir = dir.path().join("install");
    let models = dir.path().join("models");
    std::fs::create_dir_all(&models).unwrap();
    std::fs::write(models.join("tokenizer_spm_32k_3.model"), vec![0_u8; 600_000]).unwrap();
    let harness = Harness::new(FakeHost::default(), &dir.path().join("cache"));
    let orchestrator = harness.orchestrator(test_config(dir.path()), &install_dir, &DefaultsPrompter);

    let report = orchestrator
        .provision_assets(Some(AssetChoice::UseLocalPath(models.clone())))
        .unwrap();

    assert_eq!(report, ProvisionReport::LocalPathRecorded(models.clone()));
    assert_eq!(
        ModelPathConfig::load(&install_dir).unwrap().custom_model_path,
        Some(models)
    );
    assert!(harness.source.fetched.borrow().is_empty());

    let verify = orchestrator.verify().unwrap();
    assert!(!verify.all_required_ok());
    let lines = verify.lines();
    assert!(lines.iter().any(|l| l.starts_with("[OK]") && l.contains("tokenizer_spm_32k_3.model")));
    assert!(lines.iter().any(|l| l.starts_with("[MISSING]") && l.contains("model.safetensors")));
}

#[test]
fn defer_fetches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(FakeHost::default(), dir.path());
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &DefaultsPrompter);

    let report = orchestrator
        .provision_assets(Some(AssetChoice::Defer))
        .unwrap();

    assert_eq!(report, ProvisionReport::Deferred);
    assert!(harness.source.fetched.borrow().is_empty());
}

#[test]
fn rate_limit_is_retried_then_reported() {
    let dir = tempfile::tempdir().unwrap();
    let source = DirSource::failing(dir.path(), |file| {
        Some(AssetError::RateLimited {
            file: file.to_owned(),
            attempts: 1,
        })
    });
    let harness = Harness::with_source(FakeHost::default(), source);
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &DefaultsPrompter);

    let err = orchestrator
        .provision_assets(Some(AssetChoice::DownloadNow))
        .unwrap_err();

    match &err {
        SetupError::AssetProvisionFailed(AssetError::RateLimited { file, attempts }) => {
            assert_eq!(file, "model.safetensors");
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected a rate-limit failure, got {other:?}"),
    }
    assert_eq!(harness.source.fetch_count("model.safetensors"), 3);
}

#[test]
fn license_refusal_points_at_the_license_page() {
    let dir = tempfile::tempdir().unwrap();
    let source = DirSource::failing(dir.path(), |file| {
        Some(AssetError::LicenseNotAccepted {
            file: file.to_owned(),
            license_url: "https://huggingface.co/nvidia/personaplex-7b-v1".to_owned(),
        })
    });
    let harness = Harness::with_source(FakeHost::default(), source);
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &DefaultsPrompter);

    let err = orchestrator
        .provision_assets(Some(AssetChoice::DownloadNow))
        .unwrap_err();

    assert!(matches!(
        err,
        SetupError::AssetProvisionFailed(AssetError::LicenseNotAccepted { .. })
    ));
    let next = err.next_action().unwrap();
    assert!(next.contains("https://huggingface.co/nvidia/personaplex-7b-v1"));
    assert_eq!(harness.source.fetch_count("model.safetensors"), 1);
}

#[test]
fn install_continues_past_asset_failure() {
    let dir = tempfile::tempdir().unwrap();
    let source = DirSource::failing(dir.path(), |file| {
        Some(AssetError::NotFound {
            repo: "nvidia/personaplex-7b-v1".to_owned(),
            file: file.to_owned(),
        })
    });
    let harness = Harness::with_source(FakeHost::default(), source);
    let orchestrator =
        harness.orchestrator(test_config(dir.path()), &dir.path().join("install"), &DefaultsPrompter);

    let summary = orchestrator
        .install(&plexlaunch::InstallOptions {
            mode: plexlaunch::InstallMode::ModelsOnly,
            assets: Some(AssetChoice::DownloadNow),
        })
        .unwrap();

    assert!(summary.assets.is_none());
    assert!(summary.credentials.token.is_some());
}
