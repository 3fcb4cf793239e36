//! System-wide constants and default paths.

/// Default store root holding `images/` and `containers/`.
pub const DEFAULT_STORE_ROOT: &str = "/var/lib/pocker";

/// Directory under the store root holding extracted image trees.
pub const IMAGES_DIR: &str = "images";

/// Directory under the store root holding per-container layers.
pub const CONTAINERS_DIR: &str = "containers";

/// Image subdirectory used by trees extracted with a `rootfs/` wrapper.
pub const IMAGE_ROOTFS_SUBDIR: &str = "rootfs";

/// Archive extension for images that are not yet extracted.
pub const IMAGE_ARCHIVE_EXTENSION: &str = "tar";

/// Writable overlay layer directory name.
pub const UPPER_DIR: &str = "upper";

/// Overlay scratch directory name.
pub const WORK_DIR: &str = "work";

/// Merged overlay mount point directory name.
pub const MERGED_DIR: &str = "merged";

/// Control group filesystem mount point.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";

/// Parent group under which every container's cgroup is created.
pub const CGROUP_PARENT: &str = "pocker";

/// Process membership file written on attach.
pub const CGROUP_PROCS_FILE: &str = "cgroup.procs";

/// CFS period used together with a CPU quota, in microseconds.
pub const CPU_PERIOD_US: u64 = 100_000;

/// Exit code reported when the runtime fails before the command runs.
pub const SETUP_FAILURE_EXIT_CODE: i32 = 125;

/// Default number of unmount attempts against `EBUSY`.
pub const DEFAULT_UNMOUNT_RETRIES: u32 = 5;

/// Initial delay between unmount attempts, doubled on each retry.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 50;

/// Application name used in CLI output.
pub const APP_NAME: &str = "pocker";
