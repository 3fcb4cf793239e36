//! End-to-end container lifecycle tests.
//!
//! These need root, overlayfs, and cgroups, so they are ignored by default.
//! Point `POCKER_TEST_STORE` at a store root whose `images/` directory holds
//! an extracted image (`POCKER_TEST_IMAGE`, default `ubuntu`) and run:
//!
//! ```text
//! sudo -E cargo test -p pocker-runtime --test lifecycle_test -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use pocker_common::config::PockerConfig;
use pocker_common::error::PockerError;
use pocker_common::types::{ContainerId, ResourceLimits, SetupStep};
use pocker_core::host::mountinfo;
use pocker_runtime::Engine;

/// Runs share one store, and residue checks look at all of it.
static STORE: Mutex<()> = Mutex::new(());

fn engine() -> Option<(MutexGuard<'static, ()>, Engine)> {
    let store_root = std::env::var_os("POCKER_TEST_STORE").map(PathBuf::from)?;
    let guard = STORE.lock().unwrap_or_else(PoisonError::into_inner);
    let config = PockerConfig {
        store_root,
        ..PockerConfig::default()
    };
    Some((guard, Engine::new(config).expect("engine")))
}

fn image() -> String {
    std::env::var("POCKER_TEST_IMAGE").unwrap_or_else(|_| "ubuntu".into())
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}

fn assert_no_residue(engine: &Engine, id: &ContainerId) {
    assert_nothing_left(engine);
    assert!(!engine.has_cgroups(id), "cgroups of {id} left behind");
}

/// For failed runs, whose id is not returned: nothing for a sweep to find.
fn assert_nothing_left(engine: &Engine) {
    let containers = engine.containers_dir();
    let leftovers = std::fs::read_dir(&containers).map_or(0, Iterator::count);
    assert_eq!(leftovers, 0, "container directories left behind");

    let table = std::fs::read_to_string(mountinfo::SELF_MOUNTINFO).expect("mountinfo");
    assert!(
        mountinfo::parse_mount_points(&table)
            .iter()
            .all(|p| !p.starts_with(&containers)),
        "mounts left behind"
    );

    let report = engine.sweep().expect("sweep");
    assert!(report.is_empty(), "{report:?}");
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn true_exits_zero_without_residue() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let outcome = engine
        .run(&image(), &["true".into()], &ResourceLimits::default())
        .expect("run");

    assert_eq!(outcome.exit_code, 0);
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_no_residue(&engine, &outcome.container_id);
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn echo_hello_exits_zero() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let outcome = engine
        .run(
            &image(),
            &["echo".into(), "hello".into()],
            &ResourceLimits::default(),
        )
        .expect("run");

    assert_eq!(outcome.exit_code, 0);
    assert!(
        !engine
            .containers_dir()
            .join(outcome.container_id.as_str())
            .exists()
    );
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn exit_code_is_propagated() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let outcome = engine
        .run(&image(), &sh("exit 7"), &ResourceLimits::default())
        .expect("run");
    assert_eq!(outcome.exit_code, 7);
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn writes_do_not_reach_the_image() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let image_tree = engine.images().resolve(&image()).expect("image").path;
    let probe = "pocker-cow-probe";

    let outcome = engine
        .run(
            &image(),
            &sh(&format!("echo written > /{probe} && rm -f /bin/true")),
            &ResourceLimits::default(),
        )
        .expect("run");

    assert_eq!(outcome.exit_code, 0);
    assert!(!image_tree.join(probe).exists());
    assert!(image_tree.join("bin/true").exists() || image_tree.join("usr/bin/true").exists());
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn hostname_and_pids_are_isolated() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let host = nix::unistd::gethostname()
        .expect("hostname")
        .to_string_lossy()
        .into_owned();

    let outcome = engine
        .run(
            &image(),
            &sh(&format!(
                "test \"$(cat /proc/sys/kernel/hostname)\" != \"{host}\" && test $$ -eq 1"
            )),
            &ResourceLimits::default(),
        )
        .expect("run");
    assert_eq!(outcome.exit_code, 0);
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn memory_limit_is_enforced() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let limits = ResourceLimits {
        memory_bytes: Some(8 << 20),
        ..ResourceLimits::default()
    };

    let outcome = engine
        .run(&image(), &sh("x=a; while true; do x=$x$x; done"), &limits)
        .expect("run");

    assert_ne!(outcome.exit_code, 0);
    assert_no_residue(&engine, &outcome.container_id);
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn missing_image_has_no_side_effects() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let err = engine
        .run(
            "nonexistent-image",
            &["true".into()],
            &ResourceLimits::default(),
        )
        .expect_err("missing image");

    assert!(matches!(err, PockerError::ImageNotFound { .. }));
    assert_nothing_left(&engine);
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn sweep_after_clean_runs_finds_nothing() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let _ = engine
        .run(&image(), &["true".into()], &ResourceLimits::default())
        .expect("run");

    let report = engine.sweep().expect("sweep");
    assert!(report.cleaned.is_empty());
    assert!(report.warnings.is_empty());
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn missing_program_fails_at_exec_and_cleans_up() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let err = engine
        .run(
            &image(),
            &["no-such-binary".into()],
            &ResourceLimits::default(),
        )
        .expect_err("exec fails");

    assert!(
        matches!(
            err,
            PockerError::SetupFailed {
                step: SetupStep::Exec,
                ..
            }
        ),
        "{err}"
    );
    assert_nothing_left(&engine);
}

#[test]
#[ignore = "requires root and POCKER_TEST_STORE"]
fn cancelled_run_is_killed_and_cleaned_up() {
    let Some((_store, engine)) = engine() else {
        return;
    };
    let handle = engine.cancel_handle();
    // The first signal is SIGTERM, which the namespace init ignores.
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_secs(1));
        while !handle.cancel() {
            thread::sleep(Duration::from_millis(20));
        }
        thread::sleep(Duration::from_millis(200));
        handle.cancel()
    });

    let outcome = engine
        .run(&image(), &["sleep".into(), "30".into()], &ResourceLimits::default())
        .expect("run");

    assert!(canceller.join().expect("canceller"));
    assert_eq!(outcome.exit_code, 137);
    assert_no_residue(&engine, &outcome.container_id);
}
