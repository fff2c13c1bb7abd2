//! Lifecycle driver integration tests
//!
//! Runs the driver against a recording command runner that fakes git

use std::path::Path;

use pims_plugins::{Error, Phase, PhaseOutcome, PluginManifest};

mod common;
use common::{RecordingRunner, driver, fake_checkout, manifest, settings, targets};

const TWO_PLUGINS: &str = "enabled,name,git_url,git_branch\n\
    true,alpha,https://example.org/alpha.git,main\n\
    true,beta,https://example.org/beta.git,\n";

#[tokio::test]
async fn phases_run_in_fixed_order() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path(), RecordingRunner::new());

    let report = driver.run_all(&manifest(TWO_PLUGINS)).await;
    assert!(report.is_success(), "{:?}", report.entries);

    for plugin in ["alpha", "beta"] {
        assert_eq!(report.phases_for(plugin), Phase::ALL.to_vec());
    }

    // Phase-major: every plugin finishes a phase before the next starts
    let hooks = driver.runner().hook_calls().await;
    let order: Vec<(&str, &str)> = hooks.iter().map(|(p, h)| (p.as_str(), h.as_str())).collect();
    assert_eq!(
        order,
        vec![
            ("alpha", "dependencies_before_vips"),
            ("beta", "dependencies_before_vips"),
            ("alpha", "dependencies_before_python"),
            ("beta", "dependencies_before_python"),
            ("alpha", "install"),
            ("beta", "install"),
        ]
    );

    assert_eq!(
        driver.runner().clones().await,
        vec![
            "https://example.org/alpha.git",
            "https://example.org/beta.git"
        ]
    );
    assert!(dir.path().join("alpha").join(".git").is_dir());
}

#[tokio::test]
async fn disabled_rows_are_never_touched() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path(), RecordingRunner::new());
    let manifest = manifest(
        "true,alpha,https://example.org/alpha.git\n\
         false,beta,https://example.org/beta.git\n",
    );

    let report = driver.run_all(&manifest).await;
    assert!(report.is_success());
    assert_eq!(report.disabled, 1);
    assert!(report.phases_for("beta").is_empty());

    let calls = driver.runner().calls().await;
    assert!(!calls.is_empty());
    assert!(calls.iter().all(|spec| !targets(spec, dir.path(), "beta")));
    assert!(!dir.path().join("beta").exists());
}

#[tokio::test]
async fn zero_enabled_rows_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path(), RecordingRunner::new());

    for csv in ["enabled,name,git_url,git_branch\n", "false,alpha,https://a\n"] {
        let report = driver.run_all(&manifest(csv)).await;
        assert!(report.is_success());
        assert!(report.entries.is_empty());
    }
    assert!(driver.runner().calls().await.is_empty());
}

#[tokio::test]
async fn failed_phase_stops_later_phases() {
    let dir = tempfile::tempdir().unwrap();
    let runner = RecordingRunner::new().failing(|spec| {
        common::env_value(spec, "PIMS_PLUGIN_NAME").as_deref() == Some("alpha")
            && common::env_value(spec, "PIMS_PLUGIN_PHASE").as_deref()
                == Some("dependencies_before_vips")
    });
    let driver = driver(dir.path(), runner);

    let report = driver.run_all(&manifest(TWO_PLUGINS)).await;
    assert!(!report.is_success());
    assert!(report.aborted);
    assert_eq!(
        report.phases_for("alpha"),
        vec![Phase::Download, Phase::DependenciesBeforeVips]
    );
    // Fail-fast: beta never reaches the failing phase
    assert_eq!(report.phases_for("beta"), vec![Phase::Download]);

    let failure = report.failures().next().unwrap();
    assert_eq!(failure.plugin, "alpha");
    assert!(matches!(&failure.outcome, PhaseOutcome::Failed { error } if error.contains("simulated failure")));

    let hooks = driver.runner().hook_calls().await;
    assert_eq!(hooks.len(), 1);
}

#[tokio::test]
async fn keep_going_finishes_current_phase_only() {
    let dir = tempfile::tempdir().unwrap();
    let runner = RecordingRunner::new().failing(|spec| {
        common::env_value(spec, "PIMS_PLUGIN_NAME").as_deref() == Some("alpha")
            && common::env_value(spec, "PIMS_PLUGIN_PHASE").as_deref()
                == Some("dependencies_before_vips")
    });
    let mut settings = settings(dir.path());
    settings.keep_going = true;
    let driver = pims_plugins::LifecycleDriver::new(settings, runner);

    let report = driver.run_all(&manifest(TWO_PLUGINS)).await;
    assert!(!report.is_success());
    assert_eq!(
        report.phases_for("beta"),
        vec![Phase::Download, Phase::DependenciesBeforeVips]
    );
    assert_eq!(
        report.phases_for("alpha"),
        vec![Phase::Download, Phase::DependenciesBeforeVips]
    );

    let hooks = driver.runner().hook_calls().await;
    assert!(hooks.iter().all(|(_, phase)| phase == "dependencies_before_vips"));
}

#[tokio::test]
async fn missing_git_url_fails_download() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path(), RecordingRunner::new());

    let report = driver
        .run_phase(&manifest("true,orphan,,\n"), Phase::Download)
        .await;

    assert!(!report.is_success());
    let failure = report.failures().next().unwrap();
    assert!(
        matches!(&failure.outcome, PhaseOutcome::Failed { error } if error.contains("no git_url")),
        "{:?}",
        failure.outcome
    );
    assert!(driver.runner().calls().await.is_empty());
}

#[tokio::test]
async fn redownload_leaves_checkout_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path(), RecordingRunner::new());
    let manifest = manifest(TWO_PLUGINS);

    let first = driver.run_phase(&manifest, Phase::Download).await;
    assert!(first.is_success());

    let marker = dir.path().join("alpha").join("local-change.txt");
    std::fs::write(&marker, "keep me").unwrap();

    let second = driver.run_phase(&manifest, Phase::Download).await;
    assert!(second.is_success());
    assert!(second
        .entries
        .iter()
        .all(|e| matches!(e.outcome, PhaseOutcome::Skipped { .. })));

    assert_eq!(std::fs::read_to_string(&marker).unwrap(), "keep me");
    // Only the two initial clones
    assert_eq!(driver.runner().clones().await.len(), 2);
}

#[tokio::test]
async fn update_existing_fast_forwards() {
    let dir = tempfile::tempdir().unwrap();
    fake_checkout(&dir.path().join("alpha"), "https://example.org/alpha.git", false);

    let mut settings = settings(dir.path());
    settings.git.update_existing = true;
    let driver = pims_plugins::LifecycleDriver::new(settings, RecordingRunner::new());

    let report = driver
        .run_phase(
            &manifest("true,alpha,https://example.org/alpha.git,dev\n"),
            Phase::Download,
        )
        .await;
    assert!(report.is_success());

    let commands: Vec<Vec<String>> = driver
        .runner()
        .calls()
        .await
        .into_iter()
        .map(|spec| spec.args)
        .collect();
    assert_eq!(
        commands,
        vec![
            vec!["remote", "get-url", "origin"],
            vec!["fetch", "origin", "dev"],
            vec!["merge", "--ff-only", "FETCH_HEAD"],
        ]
    );
}

#[tokio::test]
async fn foreign_target_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("alpha");
    std::fs::create_dir(&target).unwrap();
    std::fs::write(target.join("README"), "copied sources").unwrap();

    let driver = driver(dir.path(), RecordingRunner::new());
    let report = driver
        .run_phase(&manifest(TWO_PLUGINS), Phase::Download)
        .await;

    assert!(!report.is_success());
    assert_eq!(report.failures().next().unwrap().plugin, "alpha");
    assert_eq!(
        std::fs::read_to_string(target.join("README")).unwrap(),
        "copied sources"
    );
}

#[tokio::test]
async fn other_remote_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fake_checkout(&dir.path().join("alpha"), "https://example.org/fork.git", false);

    let driver = driver(dir.path(), RecordingRunner::new());
    let err = driver
        .apply(
            manifest(TWO_PLUGINS).get("alpha").unwrap(),
            Phase::Download,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Download { .. }));
    assert!(err.to_string().contains("fork.git"));
}

#[tokio::test]
async fn failed_clone_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let runner = RecordingRunner::new()
        .failing(|spec| spec.args.first().map(String::as_str) == Some("clone"));
    let driver = driver(dir.path(), runner);

    let report = driver
        .run_phase(&manifest(TWO_PLUGINS), Phase::Download)
        .await;
    assert!(!report.is_success());

    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().flatten().collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[tokio::test]
async fn later_phase_requires_download() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path(), RecordingRunner::new());

    let err = driver
        .apply(
            manifest(TWO_PLUGINS).get("beta").unwrap(),
            Phase::DependenciesBeforePython,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotDownloaded(name) if name == "beta"));
}

#[tokio::test]
async fn missing_dependency_hooks_are_skipped_and_install_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path(), RecordingRunner::new().without_hooks());
    let manifest = manifest("true,alpha,https://example.org/alpha.git\n");

    let report = driver.run_all(&manifest).await;
    assert!(report.is_success(), "{:?}", report.entries);

    let outcomes: Vec<&PhaseOutcome> = report.entries.iter().map(|e| &e.outcome).collect();
    assert!(matches!(outcomes[1], PhaseOutcome::Skipped { reason } if reason == "no hook"));
    assert!(matches!(outcomes[2], PhaseOutcome::Skipped { .. }));
    assert!(matches!(outcomes[3], PhaseOutcome::Completed { .. }));

    let install = driver.runner().calls().await.pop().unwrap();
    assert_eq!(install.program, "python3");
    assert_eq!(install.args[..4], ["-m", "pip", "install", "--no-cache-dir"]);
    assert!(Path::new(install.args.last().unwrap()).ends_with("alpha"));
    assert!(install.clear_env);
}

#[tokio::test]
async fn unmet_requirement_fails_before_running_hooks() {
    let dir = tempfile::tempdir().unwrap();
    let plugin = dir.path().join("alpha");
    fake_checkout(&plugin, "https://example.org/alpha.git", true);
    std::fs::write(
        plugin.join(pims_plugins::plugins::DESCRIPTOR_FILE),
        "[requires]\nbins = [\"definitely-not-a-real-binary-4821\"]\n",
    )
    .unwrap();

    let driver = driver(dir.path(), RecordingRunner::new());
    let err = driver
        .apply(
            manifest(TWO_PLUGINS).get("alpha").unwrap(),
            Phase::DependenciesBeforeVips,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Requirement { .. }), "{err}");
    assert!(driver.runner().calls().await.is_empty());
}

#[tokio::test]
async fn status_reflects_downloads() {
    let dir = tempfile::tempdir().unwrap();
    let driver = driver(dir.path(), RecordingRunner::new());
    let manifest: PluginManifest = manifest(TWO_PLUGINS);

    let before = driver.status(&manifest);
    assert!(before
        .iter()
        .all(|s| s.state == pims_plugins::plugins::CheckoutState::Missing));

    let report = driver.run_phase(&manifest, Phase::Download).await;
    assert!(report.is_success());

    let after = driver.status(&manifest);
    assert!(after
        .iter()
        .all(|s| s.state == pims_plugins::plugins::CheckoutState::Checkout));
}
