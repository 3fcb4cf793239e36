//! Recovery of artifacts left by runs that never cleaned up.
//!
//! The directory convention is the source of truth: any id with a
//! container directory or a cgroup is a candidate. Ids whose cgroup still
//! holds processes belong to a live run and are left alone.

use std::collections::BTreeSet;

use pocker_common::error::{Result, TeardownWarning};
use pocker_common::types::ContainerId;
use pocker_core::cgroup::CgroupController;
use pocker_core::filesystem::RootfsBuilder;

/// What a sweep did.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Ids whose artifacts were removed. Problems are in `warnings`.
    pub cleaned: Vec<ContainerId>,
    /// Ids left alone because their cgroup still has processes.
    pub skipped: Vec<ContainerId>,
    /// Problems met while removing artifacts.
    pub warnings: Vec<TeardownWarning>,
}

impl SweepReport {
    /// Returns `true` if nothing was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cleaned.is_empty() && self.skipped.is_empty() && self.warnings.is_empty()
    }
}

/// Unmounts, destroys, and removes everything of every dead container.
///
/// Run it only while no `pocker run` is starting. Between `prepare` and
/// `attach` a starting container has a root and an empty cgroup, which is
/// exactly what a crashed run leaves, so it would be torn down.
///
/// # Errors
///
/// Returns `Io` if the containers directory or the cgroup tree cannot be
/// listed. Per-container problems are reported as warnings.
pub fn sweep(rootfs: &RootfsBuilder, cgroups: &CgroupController) -> Result<SweepReport> {
    let mut ids: BTreeSet<ContainerId> = rootfs.container_ids()?.into_iter().collect();
    ids.extend(cgroups.group_ids()?);

    let (skipped, dead): (Vec<_>, Vec<_>) =
        ids.into_iter().partition(|id| cgroups.has_live_processes(id));
    for id in &skipped {
        tracing::info!(id = %id, "container still has processes, skipping");
    }

    let mut report = SweepReport {
        warnings: rootfs.sweep_mounts(&skipped),
        skipped,
        cleaned: Vec::new(),
    };
    for id in dead {
        if let Err(e) = cgroups.destroy(&id) {
            let warning = TeardownWarning::new(rootfs.layout(&id).root, e);
            tracing::warn!(id = %id, %warning, "cgroup not removed");
            report.warnings.push(warning);
        }
        report.warnings.extend(rootfs.teardown(&id));
        tracing::info!(id = %id, "leftover container removed");
        report.cleaned.push(id);
    }

    tracing::info!(
        cleaned = report.cleaned.len(),
        skipped = report.skipped.len(),
        warnings = report.warnings.len(),
        "sweep finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use nix::unistd::Pid;
    use pocker_common::types::{Image, ResourceLimits};
    use pocker_core::cgroup::CgroupVersion;
    use pocker_core::host::MountTable;
    use pocker_core::host::fake::{FakeCgroupFs, FakeMountTable};

    struct Fixture {
        _dir: tempfile::TempDir,
        image: Image,
        mounts: Arc<FakeMountTable>,
        rootfs: RootfsBuilder,
        cgroups: CgroupController,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let image_path = dir.path().join("images/ubuntu");
        std::fs::create_dir_all(&image_path).expect("image");
        let mounts = Arc::new(FakeMountTable::new());
        let rootfs = RootfsBuilder::new(dir.path().join("containers"), mounts.clone())
            .with_retry_policy(1, Duration::from_millis(1));
        let cgroups = CgroupController::new(
            dir.path().join("cgroup"),
            CgroupVersion::V1,
            Arc::new(FakeCgroupFs::new()),
        );
        Fixture {
            image: Image {
                name: "ubuntu".into(),
                path: image_path,
            },
            _dir: dir,
            mounts,
            rootfs,
            cgroups,
        }
    }

    /// Leaves behind what a crashed run leaves: a mounted root and cgroups.
    fn crashed_run(f: &Fixture) -> ContainerId {
        let id = ContainerId::generate();
        let _layout = f.rootfs.prepare(&f.image, &id).expect("prepare");
        f.cgroups
            .create(&id, &ResourceLimits::default())
            .expect("cgroups");
        id
    }

    #[test]
    fn cleans_dead_and_skips_live() {
        let f = fixture();
        let dead = crashed_run(&f);
        let live = crashed_run(&f);
        f.cgroups.attach(&live, Pid::from_raw(999)).expect("attach");

        let report = sweep(&f.rootfs, &f.cgroups).expect("sweep");

        assert_eq!(report.cleaned, vec![dead.clone()]);
        assert_eq!(report.skipped, vec![live.clone()]);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
        assert!(!f.rootfs.layout(&dead).root.exists());
        assert!(!f.cgroups.exists(&dead));
        assert!(!f.mounts.is_mounted(&f.rootfs.layout(&dead).merged));
        assert!(f.rootfs.layout(&live).root.exists());
        assert!(f.mounts.is_mounted(&f.rootfs.layout(&live).merged));
    }

    #[test]
    fn finds_ids_known_only_to_cgroups() {
        let f = fixture();
        let id = ContainerId::generate();
        f.cgroups
            .create(&id, &ResourceLimits::default())
            .expect("cgroups");

        let report = sweep(&f.rootfs, &f.cgroups).expect("sweep");
        assert_eq!(report.cleaned, vec![id.clone()]);
        assert!(!f.cgroups.exists(&id));
    }

    #[test]
    fn unattached_container_counts_as_dead() {
        let f = fixture();
        let starting = crashed_run(&f);

        let report = sweep(&f.rootfs, &f.cgroups).expect("sweep");
        assert_eq!(report.cleaned, vec![starting.clone()]);
        assert!(report.skipped.is_empty());
        assert!(!f.rootfs.layout(&starting).root.exists());
    }

    #[test]
    fn second_sweep_finds_nothing() {
        let f = fixture();
        let _ = crashed_run(&f);
        let _ = crashed_run(&f);

        let first = sweep(&f.rootfs, &f.cgroups).expect("first");
        assert_eq!(first.cleaned.len(), 2);

        let second = sweep(&f.rootfs, &f.cgroups).expect("second");
        assert!(second.is_empty());
        assert!(f.mounts.mount_points().expect("points").is_empty());
    }

    #[test]
    fn unmounts_nested_leftovers() {
        let f = fixture();
        let id = crashed_run(&f);
        let merged = f.rootfs.layout(&id).merged;
        f.mounts.insert(merged.join("proc"));

        let report = sweep(&f.rootfs, &f.cgroups).expect("sweep");
        assert!(report.warnings.is_empty());
        assert!(!f.mounts.is_mounted(&merged.join("proc")));
        assert!(!merged.exists());
    }
}
