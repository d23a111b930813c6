mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::Harness;
use hangar_plugin::{
    InstallationSource, ListFilter, ModuleContext, PluginError, PluginKind, PluginModule, PluginState,
    UpdateOutcome,
};
use hangar_test_utils::{assert_err, assert_ok, PluginFixture};

#[tokio::test]
async fn test_install_records_installed_state() {
    let mut h = Harness::new();
    let report = h.install_fixture(&PluginFixture::new("notes").version("1.2.0")).await;

    assert_eq!(report.entry.state, PluginState::Installed);
    assert_eq!(report.entry.version, "1.2.0");
    assert!(!report.replaced);
    assert!(h.layout().plugin_dir("notes").join("plugin.yaml").is_file());
    assert!(h.layout().plugin_data_dir("notes").is_dir());
    assert_eq!(h.state_of("notes"), Some(PluginState::Installed));

    let err = assert_err!(
        h.manager
            .install("notes", Some(InstallationSource::ExplicitPath(h.sources.join("notes"))), false)
            .await
    );
    assert!(matches!(err, PluginError::AlreadyInstalled(ref n) if n == "notes"));
}

#[tokio::test]
async fn test_install_uninstall_round_trip() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("scratch")).await;

    let report = assert_ok!(h.manager.uninstall("scratch", true).await);
    assert!(report.removed_data);
    assert!(!report.was_enabled);
    assert!(!h.layout().plugin_dir("scratch").exists());
    assert!(!h.layout().plugin_data_dir("scratch").exists());
    assert_eq!(h.state_of("scratch"), None);

    let verify = assert_ok!(h.manager.verify());
    assert!(verify.is_clean(), "{}", verify);
}

#[tokio::test]
async fn test_install_uninstall_round_trip_keeping_data() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("scratch")).await;
    assert!(h.layout().plugin_data_dir("scratch").is_dir());

    let report = assert_ok!(h.manager.uninstall("scratch", false).await);
    assert!(!report.removed_data);
    assert!(!h.layout().plugin_dir("scratch").exists());
    // Nothing was stored, so nothing is left behind.
    assert!(!h.layout().plugin_data_dir("scratch").exists());
    assert_eq!(h.state_of("scratch"), None);
}

#[tokio::test]
async fn test_uninstall_keeps_data_by_default() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("keeper")).await;
    std::fs::write(h.layout().plugin_data_dir("keeper").join("state.db"), "x").unwrap();

    let report = assert_ok!(h.manager.uninstall("keeper", false).await);
    assert!(!report.removed_data);
    assert!(h.layout().plugin_data_dir("keeper").join("state.db").is_file());
}

#[tokio::test]
async fn test_enable_requires_system_dependencies() {
    let mut h = Harness::new();
    let git = h.provide_binary("git");
    h.install_fixture(&PluginFixture::new("git-helper").system_deps(&["git"])).await;

    std::fs::remove_file(git).unwrap();
    let err = assert_err!(h.manager.enable("git-helper").await);
    match err {
        PluginError::SystemDependencyMissing(missing) => assert_eq!(missing, vec!["git".to_string()]),
        other => panic!("expected SystemDependencyMissing, got {other:?}"),
    }
    assert_eq!(h.state_of("git-helper"), Some(PluginState::Installed));

    h.provide_binary("git");
    let change = assert_ok!(h.manager.enable("git-helper").await);
    assert_eq!(change.from, PluginState::Installed);
    assert_eq!(change.to, PluginState::Enabled);
}

#[tokio::test]
async fn test_install_rejects_missing_system_dependency() {
    let mut h = Harness::new();
    let dir = h.source(&PluginFixture::new("docker-tools").system_deps(&["docker"]));

    let err = assert_err!(
        h.manager
            .install("docker-tools", Some(InstallationSource::ExplicitPath(dir)), false)
            .await
    );
    assert!(matches!(err, PluginError::SystemDependencyMissing(_)));
    assert_eq!(h.state_of("docker-tools"), None);
    assert!(!h.layout().plugin_dir("docker-tools").exists());
}

#[tokio::test]
async fn test_enable_disable_transitions() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("toggle")).await;

    let err = assert_err!(h.manager.disable("toggle").await);
    assert!(matches!(err, PluginError::InvalidTransition { .. }));

    assert_ok!(h.manager.enable("toggle").await);
    assert!(h.manager.is_loaded("toggle"));
    let again = assert_ok!(h.manager.enable("toggle").await);
    assert!(!again.changed());

    let change = assert_ok!(h.manager.disable("toggle").await);
    assert_eq!(change.to, PluginState::Disabled);
    assert!(!h.manager.is_loaded("toggle"));
    assert_eq!(h.state_of("toggle"), Some(PluginState::Disabled));

    assert_ok!(h.manager.enable("toggle").await);
    assert_eq!(h.state_of("toggle"), Some(PluginState::Enabled));

    let err = assert_err!(h.manager.enable("ghost").await);
    assert!(matches!(err, PluginError::NotInstalled(_)));
}

#[tokio::test]
async fn test_uninstall_cleans_up_enabled_plugin() {
    let mut h = Harness::new();
    let fixture = PluginFixture::new("tidy")
        .entrypoint("cleanup", "cleanup.sh", "#!/bin/sh\ntouch \"$HANGAR_PLUGIN_DATA_DIR/../tidy-cleaned\"\n");
    h.install_fixture(&fixture).await;
    assert_ok!(h.manager.enable("tidy").await);

    let report = assert_ok!(h.manager.uninstall("tidy", true).await);
    assert!(report.was_enabled);
    assert_eq!(h.state_of("tidy"), None);
    assert!(!h.manager.is_loaded("tidy"));
    assert!(h.layout().data_dir.join("tidy-cleaned").is_file());
}

#[tokio::test]
async fn test_init_failure_marks_error() {
    let mut h = Harness::new();
    let fixture = PluginFixture::new("flaky")
        .command("flaky", "bin/flaky")
        .entrypoint("init", "init.sh", "#!/bin/sh\necho 'no config' >&2\nexit 4\n");
    h.install_fixture(&fixture).await;

    let err = assert_err!(h.manager.enable("flaky").await);
    assert!(matches!(err, PluginError::EntrypointFailed { .. }), "{err:?}");
    assert_eq!(h.state_of("flaky"), Some(PluginState::Error));
    assert!(h.manager.commands().lookup("flaky").is_none());

    // Error allows disabling, which clears the failed state.
    let change = assert_ok!(h.manager.disable("flaky").await);
    assert_eq!(change.from, PluginState::Error);
    assert_eq!(h.state_of("flaky"), Some(PluginState::Disabled));
}

#[tokio::test]
async fn test_pre_install_hook_failure_aborts() {
    let mut h = Harness::new();
    let fixture = PluginFixture::new("guarded").hook("pre-install", "#!/bin/sh\necho denied >&2\nexit 3\n");
    let dir = h.source(&fixture);

    let err = assert_err!(
        h.manager
            .install("guarded", Some(InstallationSource::ExplicitPath(dir)), false)
            .await
    );
    match err {
        PluginError::HookFailed { phase, reason } => {
            assert_eq!(phase, "pre-install");
            assert!(reason.contains("denied"), "{reason}");
        }
        other => panic!("expected HookFailed, got {other:?}"),
    }
    assert_eq!(h.state_of("guarded"), None);
    assert!(!h.layout().plugin_dir("guarded").exists());
    assert!(!h.layout().plugin_data_dir("guarded").exists());
}

#[tokio::test]
async fn test_post_install_hook_failure_only_warns() {
    let mut h = Harness::new();
    let fixture = PluginFixture::new("chatty").hook("post-install", "#!/bin/sh\nexit 1\n");
    let report = h.install_fixture(&fixture).await;

    assert_eq!(h.state_of("chatty"), Some(PluginState::Installed));
    assert!(report.warnings.iter().any(|w| w.contains("post-install")));
}

#[tokio::test]
async fn test_pre_uninstall_hook_failure_keeps_plugin() {
    let mut h = Harness::new();
    let fixture = PluginFixture::new("sticky").hook("pre-uninstall", "#!/bin/sh\nexit 2\n");
    h.install_fixture(&fixture).await;

    let err = assert_err!(h.manager.uninstall("sticky", true).await);
    assert!(matches!(err, PluginError::HookFailed { .. }));
    assert_eq!(h.state_of("sticky"), Some(PluginState::Installed));
    assert!(h.layout().plugin_dir("sticky").is_dir());
}

#[tokio::test]
async fn test_pre_uninstall_hook_failure_keeps_plugin_enabled() {
    let mut h = Harness::new();
    let fixture = PluginFixture::new("sticky")
        .command("sticky", "bin/sticky")
        .hook("pre-uninstall", "#!/bin/sh\nexit 2\n");
    h.install_fixture(&fixture).await;
    assert_ok!(h.manager.enable("sticky").await);

    let err = assert_err!(h.manager.uninstall("sticky", false).await);
    assert!(matches!(err, PluginError::HookFailed { .. }));
    assert_eq!(h.state_of("sticky"), Some(PluginState::Enabled));
    assert!(h.manager.is_loaded("sticky"));
    assert!(h.manager.commands().lookup("sticky").is_some());
}

#[tokio::test]
async fn test_failed_registry_commit_restores_plugin() {
    let mut h = Harness::new();
    let registry = h.layout().registry_file.clone();
    let parked = registry.with_extension("parked");
    // Swap the registry for a directory right before the removal commit.
    let hook = format!(
        "#!/bin/sh\nmv '{}' '{}' && mkdir '{}'\n",
        registry.display(),
        parked.display(),
        registry.display()
    );
    h.install_fixture(&PluginFixture::new("fragile").hook("pre-uninstall", &hook)).await;
    std::fs::write(h.layout().plugin_data_dir("fragile").join("state.db"), "x").unwrap();

    assert_err!(h.manager.uninstall("fragile", true).await);
    assert!(h.layout().plugin_dir("fragile").join("plugin.yaml").is_file());
    assert!(h.layout().plugin_data_dir("fragile").join("state.db").is_file());

    std::fs::remove_dir(&registry).unwrap();
    std::fs::rename(&parked, &registry).unwrap();
    assert_eq!(h.state_of("fragile"), Some(PluginState::Installed));
    let verify = assert_ok!(h.manager.verify());
    assert!(verify.is_clean(), "{}", verify);
}

#[tokio::test]
async fn test_force_reinstall_resets_state() {
    let mut h = Harness::new();
    let fixture = PluginFixture::new("redo").version("1.0.0");
    h.install_fixture(&fixture).await;
    assert_ok!(h.manager.enable("redo").await);

    let dir = fixture.clone().version("1.1.0").write_under(&h.sources);
    let report = assert_ok!(
        h.manager
            .install("redo", Some(InstallationSource::ExplicitPath(dir)), true)
            .await
    );
    assert!(report.replaced);
    assert_eq!(report.entry.version, "1.1.0");
    assert_eq!(h.state_of("redo"), Some(PluginState::Installed));
    assert!(!h.manager.is_loaded("redo"));
}

#[tokio::test]
async fn test_update_from_recorded_source() {
    let mut h = Harness::new();
    let fixture = PluginFixture::new("fresh").version("1.0.0").command("fresh", "bin/fresh");
    h.install_fixture(&fixture).await;
    assert_ok!(h.manager.enable("fresh").await);

    let report = assert_ok!(h.manager.update("fresh").await);
    assert!(matches!(report.outcome("fresh"), Some(UpdateOutcome::UpToDate { .. })));

    fixture.clone().version("1.4.0").write_under(&h.sources);
    let report = assert_ok!(h.manager.update("fresh").await);
    match report.outcome("fresh") {
        Some(UpdateOutcome::Updated { from, to }) => {
            assert_eq!(from, "1.0.0");
            assert_eq!(to, "1.4.0");
        }
        other => panic!("expected Updated, got {other:?}"),
    }

    let entry = h.manager.registry().require("fresh").unwrap();
    assert_eq!(entry.version, "1.4.0");
    assert_eq!(entry.state, PluginState::Enabled);
    assert!(entry.updated_at.is_some());
    assert!(h.manager.commands().lookup("fresh").is_some());
}

#[tokio::test]
async fn test_update_all_isolates_failures() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("alpha")).await;
    h.install_fixture(&PluginFixture::new("beta")).await;
    std::fs::remove_dir_all(h.sources.join("beta")).unwrap();

    let report = assert_ok!(h.manager.update("all").await);
    assert!(matches!(report.outcome("alpha"), Some(UpdateOutcome::UpToDate { .. })));
    assert!(matches!(report.outcome("beta"), Some(UpdateOutcome::Failed(_))));
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_commands_dispatch_and_conflict() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("greeter").command("greet", "bin/greet")).await;
    h.install_fixture(&PluginFixture::new("impostor").command("greet", "bin/greet")).await;

    assert_ok!(h.manager.enable("greeter").await);
    let status = assert_ok!(h.manager.run_command("greet", &["world".to_string()]).await);
    assert_eq!(status, 0);

    let err = assert_err!(h.manager.enable("impostor").await);
    match err {
        PluginError::CommandConflict { command, owner } => {
            assert_eq!(command, "greet");
            assert_eq!(owner, "greeter");
        }
        other => panic!("expected CommandConflict, got {other:?}"),
    }

    assert_ok!(h.manager.disable("greeter").await);
    let err = assert_err!(h.manager.run_command("greet", &[]).await);
    assert!(matches!(err, PluginError::UnknownCommand(_)));
}

struct CountingModule {
    inits: Arc<AtomicUsize>,
    cleanups: Arc<AtomicUsize>,
}

#[async_trait]
impl PluginModule for CountingModule {
    async fn init(&mut self, ctx: &ModuleContext<'_>) -> hangar_plugin::Result<()> {
        assert!(ctx.data_dir.is_dir());
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cleanup(&mut self, _ctx: &ModuleContext<'_>) -> hangar_plugin::Result<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, _ctx: &ModuleContext<'_>, _entrypoint: &str, args: &[String]) -> hangar_plugin::Result<i32> {
        Ok(args.len() as i32)
    }
}

#[tokio::test]
async fn test_native_module_lifecycle() {
    let mut h = Harness::new();
    let inits = Arc::new(AtomicUsize::new(0));
    let cleanups = Arc::new(AtomicUsize::new(0));
    let (i, c) = (Arc::clone(&inits), Arc::clone(&cleanups));
    h.manager.register_module("native", move || {
        Box::new(CountingModule {
            inits: Arc::clone(&i),
            cleanups: Arc::clone(&c),
        })
    });

    h.install_fixture(&PluginFixture::new("native").command("native", "bin/native")).await;
    assert_ok!(h.manager.enable("native").await);
    assert_eq!(inits.load(Ordering::SeqCst), 1);

    let status = assert_ok!(
        h.manager
            .run_command("native", &["a".to_string(), "b".to_string()])
            .await
    );
    assert_eq!(status, 2);

    assert_ok!(h.manager.disable("native").await);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_list_filters_by_state() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("one")).await;
    h.install_fixture(&PluginFixture::new("two")).await;
    assert_ok!(h.manager.enable("two").await);

    let all = assert_ok!(h.manager.list(ListFilter::Installed));
    assert_eq!(all.names(), vec!["one", "two"]);
    let enabled = assert_ok!(h.manager.list(ListFilter::Enabled));
    assert_eq!(enabled.names(), vec!["two"]);
    assert!(assert_ok!(h.manager.list(ListFilter::Disabled)).items.is_empty());
}

#[tokio::test]
async fn test_load_enabled_in_fresh_process() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("base").command("base", "bin/base")).await;
    h.install_fixture(&PluginFixture::new("top").plugin_deps(&["base"])).await;
    let report = assert_ok!(h.manager.enable_all().await);
    assert_eq!(report.loaded, vec!["base".to_string(), "top".to_string()]);

    let layout = h.layout().clone();
    let config = h.manager.config().clone();
    let mut reopened = hangar_plugin::PluginManager::new(config, layout).unwrap();
    assert!(reopened.commands().is_empty());

    let report = assert_ok!(reopened.load_enabled().await);
    assert_eq!(report.loaded, vec!["base".to_string(), "top".to_string()]);
    assert!(report.failed.is_empty());
    assert!(reopened.commands().lookup("base").is_some());
}

#[tokio::test]
async fn test_verify_and_clean_orphans() {
    let mut h = Harness::new();
    h.install_fixture(&PluginFixture::new("kept")).await;
    h.install_fixture(&PluginFixture::new("vanished")).await;
    std::fs::remove_dir_all(h.layout().plugin_dir("vanished")).unwrap();
    let orphan = PluginFixture::new("stray").write_under(&h.layout().plugins_dir);

    let report = assert_ok!(h.manager.verify());
    assert_eq!(report.checked, 2);
    assert_eq!(report.missing, vec!["vanished".to_string()]);
    assert_eq!(report.orphans, vec![orphan.clone()]);
    assert!(!report.is_clean());
    assert_eq!(h.state_of("vanished"), Some(PluginState::Error));

    let cleaned = assert_ok!(h.manager.clean_orphans());
    assert_eq!(cleaned.removed, vec![orphan.clone()]);
    assert!(!orphan.exists());
    assert!(h.layout().plugin_dir("kept").is_dir());
}

#[tokio::test]
async fn test_template_installs_from_catalog() {
    let mut h = Harness::new();
    let report = assert_ok!(h.manager.create_template("my-tool", PluginKind::Utility));
    assert_eq!(report.path, h.layout().catalog_dir.join("my-tool"));

    let err = assert_err!(h.manager.create_template("my-tool", PluginKind::Utility));
    assert!(matches!(err, PluginError::Template(_)));

    let installed = assert_ok!(
        h.manager
            .install("my-tool", Some(InstallationSource::LocalCatalog), false)
            .await
    );
    assert_eq!(installed.descriptor.kind, PluginKind::Utility);
    assert_ok!(h.manager.enable("my-tool").await);
    assert_eq!(assert_ok!(h.manager.run_command("my-tool", &[]).await), 0);
}

#[tokio::test]
async fn test_install_rejects_foreign_platform() {
    let mut h = Harness::new();
    let other = if cfg!(target_os = "linux") { "windows" } else { "linux" };
    let dir = h.source(&PluginFixture::new("elsewhere").platforms(&[other]));

    let err = assert_err!(
        h.manager
            .install("elsewhere", Some(InstallationSource::ExplicitPath(dir)), false)
            .await
    );
    assert!(matches!(err, PluginError::MetadataInvalid { ref field, .. } if field == "platforms"));
    assert_eq!(h.state_of("elsewhere"), None);
}

#[tokio::test]
async fn test_open_from_config_loader() {
    let home = tempfile::tempdir().unwrap();
    std::fs::write(
        home.path().join("config.yaml"),
        "repositories: []\nhooks:\n  timeout_secs: 20\n",
    )
    .unwrap();

    let loader = hangar_common_config::ConfigLoader::new(home.path());
    let manager = assert_ok!(hangar_plugin::PluginManager::open(&loader));
    assert_eq!(manager.config().hooks.timeout_secs, 20);
    assert_eq!(manager.layout().home, home.path());
    assert!(assert_ok!(manager.list_repositories()).is_empty());
}
