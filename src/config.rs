use std::{
    fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use tracing::info;

use crate::error::{EfResult, Error};

/// Default slurp threshold, in bytes. On-disk files smaller than this may be
/// loaded whole into memory by `slurped`.
pub const SZ_LIMIT: u64 = 64 * 1024 * 1024;

/// Process-wide workspace shared by all externalized file operations.
///
/// The workspace owns the per-process temporary root, laid out as:
///
/// ```text
/// <OS tmp>/synchrony-<random>/
///   tmp/    # spill files from sort/serialize operations
///   ans/    # files saved without an explicit folder
/// ```
///
/// It is initialized at most once, either explicitly through [`init`] or
/// implicitly with defaults on first use. Name uniqueness inside `tmp/` is
/// delegated to the OS temp-file facility.
pub struct Workspace {
    tmp_dir: PathBuf,
    ans_dir: PathBuf,
    sz_limit: u64,
    auto_slurp: bool,
    debug: bool,
}

/// Workspace tuning options. All fields are read-mostly process-wide
/// configuration; they cannot be changed once the workspace exists.
pub struct WorkspaceOpts {
    /// Slurp threshold in bytes.
    pub sz_limit: u64,
    /// Slurp on-disk files regardless of their size.
    pub auto_slurp: bool,
    /// Enables verbose state-transition logging.
    pub debug: bool,
}

impl Default for WorkspaceOpts {
    fn default() -> Self {
        WorkspaceOpts {
            sz_limit: SZ_LIMIT,
            auto_slurp: false,
            debug: false,
        }
    }
}

static WORKSPACE: OnceLock<Workspace> = OnceLock::new();

/// Initializes the process-wide workspace with the given options.
///
/// Fails with [`Error::Config`] if the workspace was already initialized,
/// either by a previous call or implicitly by an externalized file
/// operation.
pub fn init(opts: WorkspaceOpts) -> EfResult<()> {
    let ws = Workspace::create(opts)?;
    WORKSPACE
        .set(ws)
        .map_err(|_| Error::Config("workspace already initialized".into()))
}

/// Returns the process-wide workspace, installing the default configuration
/// on first access.
pub fn workspace() -> &'static Workspace {
    WORKSPACE.get_or_init(|| {
        Workspace::create(WorkspaceOpts::default()).expect("workspace temp root must be creatable")
    })
}

impl Workspace {
    fn create(opts: WorkspaceOpts) -> EfResult<Workspace> {
        let root = tempfile::Builder::new()
            .prefix("synchrony-")
            .tempdir()?
            .keep();

        let tmp_dir = root.join("tmp");
        let ans_dir = root.join("ans");
        fs::create_dir_all(&tmp_dir)?;
        fs::create_dir_all(&ans_dir)?;

        info!(root = %root.display(), "created workspace temp root");

        Ok(Workspace {
            tmp_dir,
            ans_dir,
            sz_limit: opts.sz_limit,
            auto_slurp: opts.auto_slurp,
            debug: opts.debug,
        })
    }

    /// Directory holding spill files.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Directory holding files saved without an explicit folder.
    pub fn ans_dir(&self) -> &Path {
        &self.ans_dir
    }

    pub fn sz_limit(&self) -> u64 {
        self.sz_limit
    }

    pub fn auto_slurp(&self) -> bool {
        self.auto_slurp
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Allocates a fresh uniquely-named file under `tmp/` and returns its
    /// path. The file persists until destructed by its owner.
    pub fn tmp_file(&self, prefix: &str, suffix: &str) -> EfResult<PathBuf> {
        self.tmp_file_in(&self.tmp_dir, prefix, suffix)
    }

    /// Allocates a fresh uniquely-named file in an arbitrary directory.
    /// Name uniqueness is the OS temp-file facility's.
    pub fn tmp_file_in(&self, dir: &Path, prefix: &str, suffix: &str) -> EfResult<PathBuf> {
        let (_, path) = tempfile::Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)?
            .keep()
            .map_err(|error| Error::Io(std::sync::Arc::new(error.error)))?;
        Ok(path)
    }
}
