use super::*;
use std::sync::atomic::{AtomicU64, Ordering};

use greatpush_core::{
    GreatPushConfig, InstallMode, LedgerRecord, PackageMetadata, PendingUpdate, UpdateDescriptor,
    UpdateError, UpdateState, CLIENT_UNIQUE_ID_KEY, FAILED_UPDATES_KEY, PENDING_UPDATE_KEY,
};
use std::collections::BTreeMap;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

static TEST_ROOT_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let mut path = std::env::temp_dir();
    path.push(format!(
        "greatpush-installer-tests-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_ROOT_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    path
}

fn test_layout() -> UpdateLayout {
    UpdateLayout::new(test_root().join("GreatPush"))
}

fn cleanup(layout: &UpdateLayout) {
    if let Some(parent) = layout.root().parent() {
        let _ = fs::remove_dir_all(parent);
    }
}

/// Archive stand-in: a zip header followed by a JSON map of path to contents.
fn archive_payload(files: &[(&str, &str)]) -> Vec<u8> {
    let map = files
        .iter()
        .map(|(path, contents)| (path.to_string(), contents.to_string()))
        .collect::<BTreeMap<_, _>>();
    let mut payload = b"PK\x03\x04".to_vec();
    payload.extend(serde_json::to_vec(&map).expect("must serialize archive"));
    payload
}

struct FakeExtractor;

impl ArchiveExtractor for FakeExtractor {
    fn extract(&self, archive: &Path, dst: &Path) -> anyhow::Result<()> {
        let raw = fs::read(archive)?;
        let files: BTreeMap<String, String> = serde_json::from_slice(&raw[4..])?;
        for (rel, contents) in files {
            let path = dst.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct TestHost {
    build: Arc<Mutex<BinaryBuild>>,
}

impl HostEnvironment for TestHost {
    fn binary_build(&self) -> anyhow::Result<BinaryBuild> {
        Ok(self.build.lock().expect("host lock").clone())
    }

    fn binary_contents_hash(&self) -> Option<String> {
        Some("binary-hash".to_string())
    }
}

#[derive(Clone, Default)]
struct RecordingReloader {
    reloads: Arc<Mutex<Vec<PathBuf>>>,
}

impl BundleReloader for RecordingReloader {
    fn reload(&self, bundle_path: &Path) -> anyhow::Result<()> {
        self.reloads
            .lock()
            .expect("reloader lock")
            .push(bundle_path.to_path_buf());
        Ok(())
    }
}

struct Harness {
    layout: UpdateLayout,
    payload_dir: PathBuf,
    settings: Arc<MemoryStore>,
    host: TestHost,
    reloader: RecordingReloader,
}

impl Harness {
    fn new() -> Self {
        let layout = test_layout();
        let payload_dir = layout
            .root()
            .parent()
            .expect("layout has a parent")
            .join("payloads");
        fs::create_dir_all(&payload_dir).expect("must create payload dir");
        let binary_bundle = payload_dir.join("binary-index.bundle");
        fs::write(&binary_bundle, "binary bundle").expect("must write binary bundle");
        Self {
            layout,
            payload_dir,
            settings: Arc::new(MemoryStore::new()),
            host: TestHost {
                build: Arc::new(Mutex::new(BinaryBuild {
                    app_version: "1.0.0".to_string(),
                    modified_time: 1_700_000_000_000,
                    bundle_path: binary_bundle,
                    bundle_file_name: "index.bundle".to_string(),
                })),
            },
            reloader: RecordingReloader::default(),
        }
    }

    /// A fresh context over the same storage, as in a new process.
    fn start(&self, debug_mode: bool) -> UpdateContext {
        self.open(debug_mode, true)
    }

    /// A context over the same storage that only inspects it.
    fn inspect(&self) -> UpdateContext {
        self.open(false, false)
    }

    fn open(&self, debug_mode: bool, restart_check: bool) -> UpdateContext {
        let mut config = GreatPushConfig::new("dk-test", "1.0.0");
        config.debug_mode = debug_mode;
        UpdateContext::builder(self.layout.clone(), config)
            .settings(self.settings.clone())
            .host(self.host.clone())
            .reloader(self.reloader.clone())
            .extractor(FakeExtractor)
            .run_restart_check(restart_check)
            .build()
            .expect("must build context")
    }

    fn write_payload(&self, name: &str, contents: &[u8]) -> String {
        let path = self.payload_dir.join(name);
        fs::write(&path, contents).expect("must write payload");
        format!("file://{}", path.display())
    }

    fn descriptor(&self, hash: &str, payload: &[u8]) -> UpdateDescriptor {
        UpdateDescriptor {
            package_hash: hash.to_string(),
            download_url: self.write_payload(hash, payload),
            app_version: Some("1.0.0".to_string()),
            label: Some(format!("label-{hash}")),
            ..UpdateDescriptor::default()
        }
    }

    fn set_app_version(&self, version: &str) {
        self.host.build.lock().expect("host lock").app_version = version.to_string();
    }

    fn reloads(&self) -> Vec<PathBuf> {
        self.reloader.reloads.lock().expect("reloader lock").clone()
    }

    fn binary_bundle(&self) -> PathBuf {
        self.host.build.lock().expect("host lock").bundle_path.clone()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        cleanup(&self.layout);
    }
}

fn download(context: &mut UpdateContext, descriptor: &UpdateDescriptor) -> PackageMetadata {
    context
        .download_update(descriptor, false, &mut |_| {})
        .expect("must download update")
}

fn download_and_install(
    context: &mut UpdateContext,
    descriptor: &UpdateDescriptor,
    mode: InstallMode,
) -> PackageMetadata {
    let metadata = download(context, descriptor);
    context
        .install_update(descriptor, mode, Duration::ZERO)
        .expect("must install update");
    metadata
}

fn full_payload(marker: &str) -> Vec<u8> {
    archive_payload(&[
        ("index.bundle", marker),
        ("assets/logo.png", "logo"),
    ])
}

fn seed_package(store: &PackageStore, hash: &str) {
    store
        .write_package(&PackageMetadata {
            package_hash: hash.to_string(),
            app_version: Some("1.0.0".to_string()),
            ..PackageMetadata::default()
        })
        .expect("must seed package");
}

#[test]
fn ledger_install_keeps_confirmed_current_as_previous() {
    let layout = test_layout();
    let ledger = StatusLedger::new(PackageStore::new(layout.clone()));
    seed_package(ledger.store(), "aaaa1111");
    seed_package(ledger.store(), "bbbb2222");

    ledger.install("aaaa1111", false).expect("must install first");
    ledger.install("bbbb2222", false).expect("must install second");
    assert_eq!(
        ledger.read().expect("must read"),
        LedgerRecord {
            current_package: Some("bbbb2222".to_string()),
            previous_package: Some("aaaa1111".to_string()),
        }
    );

    ledger.rollback().expect("must roll back");
    assert_eq!(
        ledger.current_hash().expect("must read").as_deref(),
        Some("aaaa1111")
    );
    assert!(ledger.previous_hash().expect("must read").is_none());
    assert!(!layout.root().join("bbbb2222").exists());

    cleanup(&layout);
}

#[test]
fn ledger_install_over_pending_current_discards_it() {
    let layout = test_layout();
    let ledger = StatusLedger::new(PackageStore::new(layout.clone()));
    for hash in ["aaaa1111", "bbbb2222", "cccc3333"] {
        seed_package(ledger.store(), hash);
    }

    ledger.install("aaaa1111", false).expect("must install");
    ledger.install("bbbb2222", false).expect("must install");
    ledger.install("cccc3333", true).expect("must install");

    let record = ledger.read().expect("must read");
    assert_eq!(record.current_package.as_deref(), Some("cccc3333"));
    assert_eq!(record.previous_package.as_deref(), Some("aaaa1111"));
    assert!(!layout.root().join("bbbb2222").exists());

    cleanup(&layout);
}

#[test]
fn ledger_install_drops_current_whose_folder_is_gone() {
    let layout = test_layout();
    let ledger = StatusLedger::new(PackageStore::new(layout.clone()));
    seed_package(ledger.store(), "aaaa1111");
    seed_package(ledger.store(), "bbbb2222");
    ledger.install("aaaa1111", false).expect("must install first");

    ledger.store().delete("aaaa1111").expect("must delete folder");
    ledger.install("bbbb2222", false).expect("must install second");

    assert_eq!(
        ledger.read().expect("must read"),
        LedgerRecord {
            current_package: Some("bbbb2222".to_string()),
            previous_package: None,
        }
    );
    assert!(ledger.previous_package().expect("must read").is_none());

    cleanup(&layout);
}

#[test]
fn ledger_install_of_current_is_a_no_op() {
    let layout = test_layout();
    let ledger = StatusLedger::new(PackageStore::new(layout.clone()));
    seed_package(ledger.store(), "aaaa1111");
    seed_package(ledger.store(), "bbbb2222");
    ledger.install("aaaa1111", false).expect("must install");
    ledger.install("bbbb2222", false).expect("must install");

    ledger.install("bbbb2222", false).expect("must accept reinstall");
    let record = ledger.read().expect("must read");
    assert_eq!(record.current_package.as_deref(), Some("bbbb2222"));
    assert_eq!(record.previous_package.as_deref(), Some("aaaa1111"));

    cleanup(&layout);
}

#[test]
fn ledger_install_requires_downloaded_package() {
    let layout = test_layout();
    let ledger = StatusLedger::new(PackageStore::new(layout.clone()));

    let err = ledger
        .install("ffff0000", false)
        .expect_err("must reject missing package");
    assert!(err.to_string().contains("has not been downloaded"));
    assert!(ledger.read().expect("must read").is_empty());

    cleanup(&layout);
}

#[test]
fn ledger_rollback_ignores_missing_previous_folder() {
    let layout = test_layout();
    let ledger = StatusLedger::new(PackageStore::new(layout.clone()));
    seed_package(ledger.store(), "aaaa1111");
    ledger
        .write(&LedgerRecord {
            current_package: Some("aaaa1111".to_string()),
            previous_package: Some("gone0000".to_string()),
        })
        .expect("must write");

    ledger.rollback().expect("must roll back");
    assert!(ledger.read().expect("must read").is_empty());

    cleanup(&layout);
}

#[test]
fn ledger_recovers_from_corrupt_status_file() {
    let layout = test_layout();
    layout.ensure_root().expect("must create root");
    fs::write(layout.status_file_path(), "{\"currentPackage\": tru").expect("must write");
    let ledger = StatusLedger::new(PackageStore::new(layout.clone()));

    assert!(ledger.read().expect("must heal").is_empty());
    let raw = fs::read_to_string(layout.status_file_path()).expect("must read");
    let healed: LedgerRecord = serde_json::from_str(&raw).expect("healed file must parse");
    assert!(healed.is_empty());

    cleanup(&layout);
}

#[test]
fn ledger_creates_missing_status_file_on_read() {
    let layout = test_layout();
    let ledger = StatusLedger::new(PackageStore::new(layout.clone()));

    assert!(ledger.read().expect("must read").is_empty());
    assert!(layout.status_file_path().is_file());

    cleanup(&layout);
}

#[test]
fn store_lookup_rejects_foreign_package_under_same_prefix() {
    let layout = test_layout();
    let store = PackageStore::new(layout.clone());
    seed_package(&store, "abcdefgh1111");

    assert!(store.package("abcdefgh1111").is_some());
    assert!(store.package("abcdefgh2222").is_none());
    assert_eq!(
        store.folder("abcdefgh2222", false).expect("must look up"),
        Some(layout.root().join("abcdefgh"))
    );

    cleanup(&layout);
}

#[test]
fn claim_folder_guards_protected_packages() {
    let layout = test_layout();
    let store = PackageStore::new(layout.clone());
    seed_package(&store, "abcdefgh1111");

    let err = store
        .claim_folder("abcdefgh2222", &["abcdefgh1111"])
        .expect_err("must refuse to clobber protected package");
    assert!(matches!(
        UpdateError::from_anyhow(&err),
        Some(UpdateError::HashCollision { .. })
    ));
    assert!(store.package("abcdefgh1111").is_some());

    let dir = store
        .claim_folder("abcdefgh2222", &[])
        .expect("must reclaim unprotected folder");
    assert!(dir.is_dir());
    assert_eq!(fs::read_dir(&dir).expect("must list").count(), 0);

    cleanup(&layout);
}

#[test]
fn store_rejects_path_like_hashes() {
    let layout = test_layout();
    let store = PackageStore::new(layout.clone());

    assert!(store.folder("../escape", true).is_err());
    assert!(store.claim_folder("a/b", &[]).is_err());
    assert!(!layout.root().exists());
}

#[test]
fn find_bundle_prefers_shallowest_match_then_path_order() {
    let root = test_root();
    for rel in ["b/index.bundle", "a/index.bundle", "a/deeper/x/index.bundle"] {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("must create dirs");
        fs::write(&path, "bundle").expect("must write");
    }

    assert_eq!(
        find_bundle(&root, "index.bundle").expect("must search").as_deref(),
        Some("a/index.bundle")
    );

    fs::write(root.join("index.bundle"), "top").expect("must write");
    assert_eq!(
        find_bundle(&root, "index.bundle").expect("must search").as_deref(),
        Some("index.bundle")
    );
    assert!(find_bundle(&root, "main.jsbundle")
        .expect("must search")
        .is_none());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn diff_merge_applies_deletions_over_current_package() {
    let layout = test_layout();
    let current = layout.root().join("aaaa1111");
    fs::create_dir_all(current.join("assets")).expect("must create current");
    fs::write(current.join("index.bundle"), "old bundle").expect("must write");
    fs::write(current.join("assets/keep.png"), "keep").expect("must write");
    fs::write(current.join("assets/old.png"), "old").expect("must write");
    fs::write(current.join("app.json"), "{\"packageHash\":\"aaaa1111\"}").expect("must write");

    let staging = layout.download_file_path();
    fs::write(
        &staging,
        archive_payload(&[
            ("index.bundle", "new bundle"),
            ("hotgreatpush.json", r#"{"deletedFiles":["assets/old.png"]}"#),
        ]),
    )
    .expect("must write staging");
    let new_dir = layout.root().join("bbbb2222");
    fs::create_dir_all(&new_dir).expect("must create new dir");

    let merged = DiffMerger::new(&layout, &FakeExtractor)
        .merge("bbbb2222", &staging, &new_dir, Some(&current), "index.bundle")
        .expect("must merge diff");

    assert_eq!(merged.kind, UpdateKind::Diff);
    assert_eq!(merged.relative_bundle_path, "index.bundle");
    assert_eq!(
        fs::read_to_string(new_dir.join("index.bundle")).expect("must read"),
        "new bundle"
    );
    assert!(new_dir.join("assets/keep.png").is_file());
    assert!(!new_dir.join("assets/old.png").exists());
    assert!(!new_dir.join("app.json").exists());
    assert!(!new_dir.join("hotgreatpush.json").exists());
    assert!(!staging.exists());
    assert!(!layout.unzipped_dir().exists());

    cleanup(&layout);
}

#[test]
fn diff_merge_without_current_package_is_invalid() {
    let layout = test_layout();
    layout.ensure_root().expect("must create root");
    let staging = layout.download_file_path();
    fs::write(
        &staging,
        archive_payload(&[("hotgreatpush.json", r#"{"deletedFiles":[]}"#)]),
    )
    .expect("must write staging");
    let new_dir = layout.root().join("bbbb2222");
    fs::create_dir_all(&new_dir).expect("must create new dir");

    let err = DiffMerger::new(&layout, &FakeExtractor)
        .merge("bbbb2222", &staging, &new_dir, None, "index.bundle")
        .expect_err("diff without base must fail");
    assert_eq!(
        UpdateError::from_anyhow(&err),
        Some(&UpdateError::DiffWithoutBase {
            hash: "bbbb2222".to_string()
        })
    );
    assert!(!layout.unzipped_dir().exists());

    cleanup(&layout);
}

#[test]
fn diff_merge_rejects_malformed_manifest() {
    let layout = test_layout();
    let current = layout.root().join("aaaa1111");
    fs::create_dir_all(&current).expect("must create current");
    let staging = layout.download_file_path();
    fs::write(
        &staging,
        archive_payload(&[("index.bundle", "b"), ("hotgreatpush.json", "{\"deletedFiles\":")]),
    )
    .expect("must write staging");
    let new_dir = layout.root().join("bbbb2222");
    fs::create_dir_all(&new_dir).expect("must create new dir");

    let err = DiffMerger::new(&layout, &FakeExtractor)
        .merge("bbbb2222", &staging, &new_dir, Some(&current), "index.bundle")
        .expect_err("malformed manifest must fail");
    assert!(matches!(
        UpdateError::from_anyhow(&err),
        Some(UpdateError::InvalidDiffManifest { .. })
    ));

    cleanup(&layout);
}

#[test]
fn raw_bundle_payload_becomes_the_bundle_file() {
    let layout = test_layout();
    layout.ensure_root().expect("must create root");
    let staging = layout.download_file_path();
    fs::write(&staging, "console.log('hi');").expect("must write staging");
    let new_dir = layout.root().join("cccc3333");
    fs::create_dir_all(&new_dir).expect("must create new dir");

    let merged = DiffMerger::new(&layout, &FakeExtractor)
        .merge("cccc3333", &staging, &new_dir, None, "main.jsbundle")
        .expect("must accept raw bundle");
    assert_eq!(merged.kind, UpdateKind::RawBundle);
    assert_eq!(merged.relative_bundle_path, "main.jsbundle");
    assert_eq!(
        fs::read_to_string(new_dir.join("main.jsbundle")).expect("must read"),
        "console.log('hi');"
    );
    assert!(!staging.exists());

    cleanup(&layout);
}

#[test]
fn archive_without_bundle_is_rejected() {
    let layout = test_layout();
    layout.ensure_root().expect("must create root");
    let staging = layout.download_file_path();
    fs::write(&staging, archive_payload(&[("assets/a.png", "a")])).expect("must write");
    let new_dir = layout.root().join("dddd4444");
    fs::create_dir_all(&new_dir).expect("must create new dir");

    let err = DiffMerger::new(&layout, &FakeExtractor)
        .merge("dddd4444", &staging, &new_dir, None, "index.bundle")
        .expect_err("must require a bundle");
    assert!(matches!(
        UpdateError::from_anyhow(&err),
        Some(UpdateError::MissingBundle { .. })
    ));

    cleanup(&layout);
}

#[test]
fn empty_payload_is_unrecognized() {
    let layout = test_layout();
    layout.ensure_root().expect("must create root");
    let staging = layout.download_file_path();
    fs::write(&staging, "").expect("must write");
    let new_dir = layout.root().join("eeee5555");

    let err = DiffMerger::new(&layout, &FakeExtractor)
        .merge("eeee5555", &staging, &new_dir, None, "index.bundle")
        .expect_err("must reject empty payload");
    assert!(matches!(
        UpdateError::from_anyhow(&err),
        Some(UpdateError::UnrecognizedPayload { .. })
    ));

    cleanup(&layout);
}

#[test]
fn pending_tracker_reports_only_unattempted_updates() {
    let tracker = PendingUpdateTracker::new(Arc::new(MemoryStore::new()));
    assert!(!tracker.is_pending(None).expect("must query"));

    tracker.save("aaaa1111", false).expect("must save");
    assert!(tracker.is_pending(None).expect("must query"));
    assert!(tracker.is_pending(Some("aaaa1111")).expect("must query"));
    assert!(!tracker.is_pending(Some("bbbb2222")).expect("must query"));

    tracker.save("aaaa1111", true).expect("must save");
    assert!(!tracker.is_pending(None).expect("must query"));
    assert!(tracker.get().expect("must read").is_some());

    tracker.clear().expect("must clear");
    assert!(tracker.get().expect("must read").is_none());
}

#[test]
fn pending_tracker_treats_corrupt_record_as_absent() {
    let settings = Arc::new(MemoryStore::new());
    settings
        .set(PENDING_UPDATE_KEY, "{\"hash\":")
        .expect("must seed");
    let tracker = PendingUpdateTracker::new(settings);

    assert!(tracker.get().expect("must read").is_none());
    assert!(!tracker.is_pending(None).expect("must query"));
}

#[test]
fn failed_ledger_appends_and_resets_corrupt_list() {
    let settings = Arc::new(MemoryStore::new());
    let failed = FailedUpdateLedger::new(settings.clone());
    for hash in ["aaaa1111", "bbbb2222"] {
        failed
            .record(&PackageMetadata {
                package_hash: hash.to_string(),
                ..PackageMetadata::default()
            })
            .expect("must record");
    }
    assert!(failed.contains("aaaa1111").expect("must query"));
    assert_eq!(
        failed.last().expect("must read").map(|entry| entry.package_hash),
        Some("bbbb2222".to_string())
    );

    settings
        .set(FAILED_UPDATES_KEY, "not json")
        .expect("must corrupt");
    assert!(failed.list().expect("must heal").is_empty());
    assert_eq!(
        settings.get(FAILED_UPDATES_KEY).expect("must read").as_deref(),
        Some("[]")
    );
}

#[test]
fn json_file_store_persists_and_tolerates_corruption() {
    let root = test_root();
    let store = JsonFileStore::new(root.join("settings.json"));
    assert!(store.get("missing").expect("must read").is_none());

    store.set("alpha", "1").expect("must set");
    store.set("beta", "2").expect("must set");
    store.remove("alpha").expect("must remove");
    let reopened = JsonFileStore::new(root.join("settings.json"));
    assert!(reopened.get("alpha").expect("must read").is_none());
    assert_eq!(reopened.get("beta").expect("must read").as_deref(), Some("2"));

    fs::write(store.path(), "{oops").expect("must corrupt");
    assert!(store.get("beta").expect("must read").is_none());
    store.set("gamma", "3").expect("must overwrite corrupt file");
    assert_eq!(store.get("gamma").expect("must read").as_deref(), Some("3"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn stored_device_identity_is_stable() {
    let settings: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    let identity = StoredDeviceIdentity::new(settings.clone());

    let first = identity.device_id().expect("must generate id");
    let second = StoredDeviceIdentity::new(settings.clone())
        .device_id()
        .expect("must read id");
    assert_eq!(first, second);
    assert_eq!(
        settings.get(CLIENT_UNIQUE_ID_KEY).expect("must read"),
        Some(first)
    );
}

#[test]
fn copy_with_progress_reports_and_checks_length() {
    let root = test_root();
    let destination = root.join("download.zip");
    let mut events = Vec::new();

    let copied = copy_with_progress(Cursor::new(vec![7_u8; 1024]), &destination, 1024, &mut |p| {
        events.push(p)
    })
    .expect("must copy");
    assert_eq!(copied, 1024);
    assert!(events.last().expect("must report progress").is_completed());
    assert_eq!(fs::read(&destination).expect("must read").len(), 1024);

    let err = copy_with_progress(Cursor::new(vec![7_u8; 10]), &destination, 20, &mut |_| {})
        .expect_err("short payload must fail");
    assert!(err.to_string().contains("expected 20"));

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn resume_listener_waits_for_minimum_background_duration() {
    let start = Instant::now();
    let mut listener = ResumeListener::new(InstallMode::OnNextResume, Duration::from_secs(10));

    assert!(!listener.on_resume(start), "resume without pause must not fire");

    listener.on_pause(start, true);
    assert!(!listener.on_resume(start + Duration::from_secs(3)));

    listener.on_pause(start + Duration::from_secs(5), true);
    assert!(listener.on_resume(start + Duration::from_secs(15)));
}

#[test]
fn resume_listener_immediate_mode_fires_on_any_resume() {
    let start = Instant::now();
    let mut listener = ResumeListener::new(InstallMode::Immediate, Duration::from_secs(600));
    listener.on_pause(start, true);
    assert!(listener.on_resume(start + Duration::from_millis(1)));
}

#[test]
fn resume_listener_suspend_deadline_fires_while_backgrounded() {
    let start = Instant::now();
    let mut listener = ResumeListener::new(InstallMode::OnNextSuspend, Duration::from_secs(30));

    listener.on_pause(start, true);
    assert!(!listener.poll(start + Duration::from_secs(10)));
    listener.set_minimum_background_duration(Duration::from_secs(5));
    assert!(listener.poll(start + Duration::from_secs(10)));
    assert!(!listener.poll(start + Duration::from_secs(11)), "fires once");

    listener.on_pause(start + Duration::from_secs(20), false);
    assert!(!listener.poll(start + Duration::from_secs(60)));
}

#[test]
fn context_download_stores_metadata_with_bundle_path() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor(
        "aaaa1111ffff",
        &archive_payload(&[("build/index.bundle", "v1"), ("build/assets/a.png", "a")]),
    );
    let mut progress = Vec::new();

    let metadata = context
        .download_update(&descriptor, true, &mut |p| progress.push(p))
        .expect("must download");
    assert_eq!(metadata.package_hash, "aaaa1111ffff");
    assert_eq!(metadata.relative_bundle_path.as_deref(), Some("build/index.bundle"));
    assert_eq!(metadata.binary_modified_time, Some(1_700_000_000_000));
    assert_eq!(metadata.label.as_deref(), Some("label-aaaa1111ffff"));
    assert!(!progress.is_empty());
    assert!(harness.layout.root().join("aaaa1111/app.json").is_file());
    assert!(!harness.layout.download_file_path().exists());
    assert!(!harness.layout.unzipped_dir().exists());
}

#[test]
fn context_download_without_progress_notification_stays_silent() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    let mut calls = 0;

    context
        .download_update(&descriptor, false, &mut |_| calls += 1)
        .expect("must download");
    assert_eq!(calls, 0);
}

#[test]
fn context_rejects_missing_hash() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = UpdateDescriptor {
        download_url: harness.write_payload("nohash", &full_payload("v1")),
        ..UpdateDescriptor::default()
    };

    let err = context
        .download_update(&descriptor, false, &mut |_| {})
        .expect_err("must reject missing hash");
    assert_eq!(
        UpdateError::from_anyhow(&err),
        Some(&UpdateError::MissingPackageHash)
    );
    assert!(context
        .install_update(&descriptor, InstallMode::OnNextRestart, Duration::ZERO)
        .is_err());
}

#[test]
fn diff_download_without_base_leaves_nothing_behind() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor(
        "bbbb2222",
        &archive_payload(&[
            ("index.bundle", "v2"),
            ("hotgreatpush.json", r#"{"deletedFiles":[]}"#),
        ]),
    );

    let err = context
        .download_update(&descriptor, false, &mut |_| {})
        .expect_err("diff without base must fail");
    assert!(matches!(
        UpdateError::from_anyhow(&err),
        Some(UpdateError::DiffWithoutBase { .. })
    ));
    assert!(!harness.layout.root().join("bbbb2222").exists());
    assert!(!harness.layout.download_file_path().exists());
    assert!(!harness.layout.unzipped_dir().exists());
    assert!(context.is_failed_update("bbbb2222").expect("must query"));
}

#[test]
fn transport_failure_is_not_recorded_as_failed_update() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = UpdateDescriptor {
        package_hash: "cccc3333".to_string(),
        download_url: "file:///definitely/not/here.zip".to_string(),
        ..UpdateDescriptor::default()
    };

    assert!(context
        .download_update(&descriptor, false, &mut |_| {})
        .is_err());
    assert!(!context.is_failed_update("cccc3333").expect("must query"));
    assert!(!harness.layout.root().join("cccc3333").exists());
}

#[test]
fn diff_download_applies_on_top_of_current_package() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let first = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &first, InstallMode::OnNextRestart);

    let diff = harness.descriptor(
        "bbbb2222",
        &archive_payload(&[
            ("index.bundle", "v2"),
            ("hotgreatpush.json", r#"{"deletedFiles":["assets/logo.png"]}"#),
        ]),
    );
    let metadata = download(&mut context, &diff);
    let dir = harness.layout.root().join("bbbb2222");
    assert_eq!(metadata.relative_bundle_path.as_deref(), Some("index.bundle"));
    assert_eq!(
        fs::read_to_string(dir.join("index.bundle")).expect("must read"),
        "v2"
    );
    assert!(!dir.join("assets/logo.png").exists());
    assert_eq!(
        context
            .store()
            .package("bbbb2222")
            .expect("must be stored")
            .package_hash,
        "bbbb2222"
    );
}

#[test]
fn notify_ready_is_idempotent() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    assert!(context.restart_app(false).expect("must restart"));

    context.notify_application_ready().expect("must confirm");
    let record = context.ledger().read().expect("must read");
    context.notify_application_ready().expect("must confirm again");

    assert!(context.pending().get().expect("must read").is_none());
    assert_eq!(context.ledger().read().expect("must read"), record);
    assert!(context.failed().list().expect("must read").is_empty());
}

#[test]
fn restart_boots_installed_package_and_marks_first_run() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    assert!(context.resume_listener().is_none());

    assert!(context.restart_app(false).expect("must restart"));
    assert_eq!(
        harness.reloads(),
        vec![harness.layout.root().join("aaaa1111/index.bundle")]
    );
    assert!(context.did_update());
    assert!(!context.is_running_binary_version());
    assert!(context.is_first_run("aaaa1111").expect("must query"));
    assert!(!context.is_first_run("bbbb2222").expect("must query"));
    assert!(!context.is_first_run("").expect("must query"));

    let pending = context.pending().get().expect("must read").expect("pending");
    assert!(pending.is_loading);
}

#[test]
fn restart_only_if_pending_skips_without_update() {
    let harness = Harness::new();
    let mut context = harness.start(false);

    assert!(!context.restart_app(true).expect("must query"));
    assert!(harness.reloads().is_empty());

    assert!(context.restart_app(false).expect("must restart"));
    assert_eq!(harness.reloads(), vec![harness.binary_bundle()]);
    assert!(context.is_running_binary_version());
}

#[test]
fn crash_before_ready_rolls_back_on_next_start() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let first = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &first, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart");
    context.notify_application_ready().expect("must confirm");

    let second = harness.descriptor("bbbb2222", &full_payload("v2"));
    download_and_install(&mut context, &second, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart into second");
    drop(context);

    // The app died before confirming the second update.
    let mut context = harness.start(false);
    assert!(!context.did_update());
    assert!(context.need_to_report_rollback());
    assert_eq!(
        context.ledger().current_hash().expect("must read").as_deref(),
        Some("aaaa1111")
    );
    assert!(context.pending().get().expect("must read").is_none());
    assert!(context.is_failed_update("bbbb2222").expect("must query"));
    assert!(!harness.layout.root().join("bbbb2222").exists());

    let reported = context.take_rollback_report().expect("must report");
    assert_eq!(reported.map(|p| p.package_hash), Some("bbbb2222".to_string()));
    assert!(context.take_rollback_report().expect("must report").is_none());
}

#[test]
fn contexts_without_restart_check_leave_pending_update_alone() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart");
    drop(context);

    for _ in 0..2 {
        let context = harness.inspect();
        assert!(!context.did_update());
        assert!(!context.need_to_report_rollback());
    }

    let context = harness.inspect();
    assert_eq!(
        context.pending().get().expect("must read"),
        Some(PendingUpdate {
            hash: "aaaa1111".to_string(),
            is_loading: true,
        })
    );
    assert_eq!(
        context.ledger().current_hash().expect("must read").as_deref(),
        Some("aaaa1111")
    );
    assert!(!context.is_failed_update("aaaa1111").expect("must query"));
    drop(context);

    let context = harness.start(false);
    assert!(context.need_to_report_rollback());
    assert!(context.is_failed_update("aaaa1111").expect("must query"));
}

#[test]
fn crash_on_first_update_falls_back_to_binary() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart");
    drop(context);

    let mut context = harness.start(false);
    assert!(context.ledger().current_hash().expect("must read").is_none());
    let resolution = context.resolve_bundle().expect("must resolve");
    assert!(resolution.is_running_binary_version);
    assert_eq!(resolution.bundle_path, harness.binary_bundle());
}

#[test]
fn rollback_after_confirmed_update_restores_previous() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    for hash in ["aaaa1111", "bbbb2222"] {
        let descriptor = harness.descriptor(hash, &full_payload(hash));
        download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
        context.restart_app(false).expect("must restart");
        context.notify_application_ready().expect("must confirm");
    }

    context.rollback().expect("must roll back");
    assert_eq!(
        context.ledger().current_hash().expect("must read").as_deref(),
        Some("aaaa1111")
    );
    assert!(context.is_failed_update("bbbb2222").expect("must query"));
    let resolution = context.resolve_bundle().expect("must resolve");
    assert_eq!(
        resolution.bundle_path,
        harness.layout.root().join("aaaa1111/index.bundle")
    );
}

#[test]
fn unconfirmed_update_is_never_kept_as_previous() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let first = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &first, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart");
    context.notify_application_ready().expect("must confirm");

    let second = harness.descriptor("bbbb2222", &full_payload("v2"));
    download_and_install(&mut context, &second, InstallMode::OnNextRestart);
    let third = harness.descriptor("cccc3333", &full_payload("v3"));
    download_and_install(&mut context, &third, InstallMode::OnNextRestart);

    let record = context.ledger().read().expect("must read");
    assert_eq!(record.current_package.as_deref(), Some("cccc3333"));
    assert_eq!(record.previous_package.as_deref(), Some("aaaa1111"));
    assert!(!harness.layout.root().join("bbbb2222").exists());
}

#[test]
fn update_metadata_follows_pending_state() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    for state in [UpdateState::Running, UpdateState::Pending, UpdateState::Latest] {
        assert!(context.get_update_metadata(state).expect("must query").is_none());
    }

    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);

    let pending = context
        .get_update_metadata(UpdateState::Pending)
        .expect("must query")
        .expect("pending update");
    assert_eq!(pending.package_hash, "aaaa1111");
    assert!(pending.is_pending);
    assert!(context
        .get_update_metadata(UpdateState::Running)
        .expect("must query")
        .is_none());
    assert!(context
        .get_update_metadata(UpdateState::Latest)
        .expect("must query")
        .expect("latest")
        .is_pending);

    context.restart_app(false).expect("must restart");
    assert!(context
        .get_update_metadata(UpdateState::Pending)
        .expect("must query")
        .is_none());
    let running = context
        .get_update_metadata(UpdateState::Running)
        .expect("must query")
        .expect("running update");
    assert_eq!(running.package_hash, "aaaa1111");
    assert!(!running.is_pending);
    assert!(!running.is_debug_only);
}

#[test]
fn binary_update_purges_stored_updates() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart");
    context.notify_application_ready().expect("must confirm");
    context
        .failed()
        .record(&PackageMetadata {
            package_hash: "old00000".to_string(),
            ..PackageMetadata::default()
        })
        .expect("must record");

    harness.set_app_version("2.0.0");
    let resolution = context.resolve_bundle().expect("must resolve");

    assert!(resolution.is_running_binary_version);
    assert!(resolution.purged);
    assert_eq!(resolution.bundle_path, harness.binary_bundle());
    assert!(!harness.layout.root().exists());
    assert!(context.failed().list().expect("must read").is_empty());
    assert!(context.ledger().current_hash().expect("must read").is_none());
}

#[test]
fn rebuilt_binary_purges_stored_updates_outside_debug_mode() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart");
    context.notify_application_ready().expect("must confirm");

    // Same app version, new bundle timestamp.
    harness.host.build.lock().expect("host lock").modified_time += 1;
    let resolution = context.resolve_bundle().expect("must resolve");

    assert!(resolution.is_running_binary_version);
    assert!(resolution.purged);
    assert!(resolution.package.is_none());
    assert_eq!(resolution.bundle_path, harness.binary_bundle());
    assert!(!harness.layout.root().exists());
    assert!(context.ledger().current_hash().expect("must read").is_none());
}

#[test]
fn debug_mode_keeps_updates_for_same_app_version() {
    let harness = Harness::new();
    let mut context = harness.start(true);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart");
    context.notify_application_ready().expect("must confirm");

    // A local rebuild changes the bundle timestamp but not the version.
    harness.host.build.lock().expect("host lock").modified_time += 1;
    let resolution = context.resolve_bundle().expect("must resolve");
    assert!(resolution.is_running_binary_version);
    assert!(!resolution.purged);
    assert!(context.store().package("aaaa1111").is_some());
    assert!(context
        .get_update_metadata(UpdateState::Running)
        .expect("must query")
        .expect("still installed")
        .is_debug_only);

    harness.set_app_version("1.1.0");
    assert!(context.resolve_bundle().expect("must resolve").purged);
    assert!(context.store().package("aaaa1111").is_none());
}

#[test]
fn start_skips_crash_check_after_binary_upgrade() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    context.restart_app(false).expect("must restart");
    drop(context);

    harness.set_app_version("2.0.0");
    let context = harness.start(false);
    assert!(!context.need_to_report_rollback());
    assert!(!context.is_failed_update("aaaa1111").expect("must query"));
}

#[test]
fn clear_updates_removes_everything() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download_and_install(&mut context, &descriptor, InstallMode::OnNextRestart);
    context
        .failed()
        .record(&PackageMetadata::default())
        .expect("must record");

    context.clear_updates().expect("must clear");
    assert!(!harness.layout.root().exists());
    assert!(context.pending().get().expect("must read").is_none());
    assert!(context.failed().list().expect("must read").is_empty());
}

#[test]
fn resume_install_reloads_after_background_duration() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let descriptor = harness.descriptor("aaaa1111", &full_payload("v1"));
    download(&mut context, &descriptor);
    context
        .install_update(&descriptor, InstallMode::OnNextResume, Duration::from_secs(60))
        .expect("must install");
    assert_eq!(
        context.resume_listener().map(ResumeListener::mode),
        Some(InstallMode::OnNextResume)
    );

    let start = Instant::now();
    context.on_host_pause(start).expect("must pause");
    assert!(!context
        .on_host_resume(start + Duration::from_secs(5))
        .expect("must resume"));
    assert!(harness.reloads().is_empty());

    context.on_host_pause(start + Duration::from_secs(10)).expect("must pause");
    assert!(context
        .on_host_resume(start + Duration::from_secs(80))
        .expect("must resume"));
    assert_eq!(
        harness.reloads(),
        vec![harness.layout.root().join("aaaa1111/index.bundle")]
    );
    assert!(context.resume_listener().is_none());
    assert!(context.did_update());
}

#[test]
fn later_install_only_updates_listener_duration() {
    let harness = Harness::new();
    let mut context = harness.start(false);
    let first = harness.descriptor("aaaa1111", &full_payload("v1"));
    download(&mut context, &first);
    context
        .install_update(&first, InstallMode::OnNextSuspend, Duration::from_secs(60))
        .expect("must install");

    let second = harness.descriptor("bbbb2222", &full_payload("v2"));
    download(&mut context, &second);
    context
        .install_update(&second, InstallMode::OnNextResume, Duration::from_secs(5))
        .expect("must install");

    let listener = context.resume_listener().expect("listener armed");
    assert_eq!(listener.mode(), InstallMode::OnNextSuspend);
    assert_eq!(listener.minimum_background_duration(), Duration::from_secs(5));

    let start = Instant::now();
    context.on_host_pause(start).expect("must pause");
    assert!(!context.on_host_tick(start + Duration::from_secs(1)).expect("must tick"));
    assert!(context.on_host_tick(start + Duration::from_secs(6)).expect("must tick"));
    assert_eq!(
        harness.reloads(),
        vec![harness.layout.root().join("bbbb2222/index.bundle")]
    );
}

#[test]
fn configuration_reports_stable_client_id() {
    let harness = Harness::new();
    let context = harness.start(false);

    let first = context.configuration().expect("must describe");
    assert_eq!(first.app_version, "1.0.0");
    assert_eq!(first.deployment_key, "dk-test");
    assert_eq!(first.server_url, greatpush_core::DEFAULT_SERVER_URL);
    assert_eq!(first.package_hash.as_deref(), Some("binary-hash"));
    drop(context);

    let second = harness.start(false).configuration().expect("must describe");
    assert_eq!(first.client_unique_id, second.client_unique_id);

    let value = serde_json::to_value(&second).expect("must serialize");
    assert_eq!(value["clientUniqueId"], second.client_unique_id.as_str());
}

#[test]
fn builder_requires_host_capabilities() {
    let layout = test_layout();
    let result = UpdateContext::builder(layout.clone(), GreatPushConfig::new("dk", "1.0.0"))
        .settings(Arc::new(MemoryStore::new()))
        .build();
    let err = result.err().expect("must require a host");
    assert!(err.to_string().contains("host environment"));
    cleanup(&layout);
}
