use crate::io::buffer_pool::BufferPool;
use crate::io::device::FileDevice;
use crate::io::FileWiper;
use crate::patterns::build_plan;
use crate::patterns::random::{create_random_source, RandomSource, SeedMethod};
use crate::security::{erase_size, Filesystem, FilenameEraser};
use crate::storage::detector::resolve_target;
use crate::storage::{ExtentRequest, TargetKind};
use crate::{CancelReason, CancelToken, ExitStatus, WipeConfig, WipeError};
use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, Permissions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

/// Counters reported in the final summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub files: u64,
    pub dirs: u64,
    pub specials: u64,
    pub symlinks: u64,
    pub errors: u64,
}

impl SessionStats {
    pub fn summary(&self, dereference_symlinks: bool) -> String {
        format!(
            "{} file{} wiped and {} special file{} ignored in {} director{}, \
             {} symlink{} {}, {} error{} occurred.",
            self.files,
            plural(self.files, "", "s"),
            self.specials,
            plural(self.specials, "", "s"),
            self.dirs,
            plural(self.dirs, "y", "ies"),
            self.symlinks,
            plural(self.symlinks, "", "s"),
            if dereference_symlinks {
                "followed"
            } else {
                "removed but not followed"
            },
            self.errors,
            plural(self.errors, "", "s"),
        )
    }
}

fn plural(count: u64, one: &'static str, many: &'static str) -> &'static str {
    if count == 1 {
        one
    } else {
        many
    }
}

/// What happened to a single command-line target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetStats {
    pub kind: TargetKind,
    pub passes: usize,
    pub bytes_written: u64,
    pub renames: usize,
    /// Directories passed without recursion are left alone.
    pub skipped: bool,
}

impl TargetStats {
    fn new(kind: TargetKind) -> Self {
        Self {
            kind,
            passes: 0,
            bytes_written: 0,
            renames: 0,
            skipped: false,
        }
    }
}

/// Owns the random source and buffer pool for a run and wipes targets one
/// after another.
pub struct WipeSession {
    config: WipeConfig,
    rng: Box<dyn RandomSource>,
    pool: BufferPool,
    stats: SessionStats,
    cancel: CancelToken,
}

impl WipeSession {
    /// Validates the configuration and seeds the generator.
    pub fn open(config: WipeConfig, cancel: CancelToken) -> anyhow::Result<Self> {
        config.validate()?;
        let method = config
            .seed_method
            .clone()
            .unwrap_or_else(|| SeedMethod::detect(&config.random_device));
        let seed = method.gather().context("could not seed the random generator")?;
        let rng = create_random_source(config.random_algorithm, seed);
        log::info!("random source {} seeded via {:?}", rng.name(), method);
        Self::with_random_source(config, rng, cancel)
    }

    /// Like `open` with a caller-provided generator.
    pub fn with_random_source(
        config: WipeConfig,
        rng: Box<dyn RandomSource>,
        cancel: CancelToken,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let pool = BufferPool::new(config.buffer_size(), config.random_buffers);
        log::debug!(
            "buffer pool: {} random slots of {} bytes",
            pool.capacity(),
            pool.buffer_size()
        );
        Ok(Self {
            config,
            rng,
            pool,
            stats: SessionStats::default(),
            cancel,
        })
    }

    pub fn config(&self) -> &WipeConfig {
        &self.config
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Wipes one target. Per-file failures are counted and reported here;
    /// the caller decides whether to go on.
    pub fn wipe_target(&mut self, path: &Path) -> Result<TargetStats, WipeError> {
        self.wipe_entry(path, false)
    }

    /// `nested` is set for entries found while recursing; device nodes
    /// there are unlinked, never overwritten.
    fn wipe_entry(&mut self, path: &Path, nested: bool) -> Result<TargetStats, WipeError> {
        let result = self.wipe_path(path, nested);
        if let Err(ref e) = result {
            match e {
                WipeError::Aborted => {}
                e if e.is_aggregate() => {}
                e => {
                    self.stats.errors += 1;
                    eprintln!("{}", e);
                }
            }
        }
        result
    }

    /// Wipes every path in order and maps the outcome to an exit status.
    pub fn wipe_all(&mut self, paths: &[PathBuf]) -> ExitStatus {
        for path in paths {
            match self.wipe_target(path) {
                Ok(_) => {}
                Err(WipeError::Aborted) => {
                    return match self.cancel.reason() {
                        Some(CancelReason::Terminate) => ExitStatus::Failure,
                        _ => ExitStatus::UserAbort,
                    }
                }
                Err(e) if e.is_fatal() => return ExitStatus::Failure,
                Err(_) if self.config.abort_on_error => {
                    log::info!("stopping after first error");
                    return ExitStatus::Failure;
                }
                Err(_) => {}
            }
        }

        if self.stats.errors > 0 {
            ExitStatus::MinorError
        } else {
            ExitStatus::Success
        }
    }

    pub fn close(self) -> SessionStats {
        log::debug!("session closed: {:?}", self.stats);
        self.stats
    }

    fn wipe_path(&mut self, path: &Path, nested: bool) -> Result<TargetStats, WipeError> {
        self.cancel.check()?;
        let metadata = fs::symlink_metadata(path).map_err(|e| WipeError::io(path, "lstat", e))?;
        let kind = TargetKind::from_file_type(metadata.file_type());

        match kind {
            TargetKind::Directory if self.config.recurse => self.wipe_directory(path, &metadata),
            TargetKind::Directory => {
                if !self.config.silent {
                    eprintln!("{}: skipping directory, recursion not enabled", path.display());
                }
                let mut stats = TargetStats::new(kind);
                stats.skipped = true;
                Ok(stats)
            }
            TargetKind::Symlink if self.config.dereference_symlinks => {
                self.wipe_symlink_target(path)
            }
            TargetKind::Symlink => {
                let mut stats = TargetStats::new(kind);
                stats.renames = self.remove_entry(path)?;
                self.stats.symlinks += 1;
                Ok(stats)
            }
            TargetKind::Regular => {
                let mut stats = self.overwrite(path, kind)?;
                stats.renames = self.remove_entry(path)?;
                self.stats.files += 1;
                Ok(stats)
            }
            TargetKind::BlockDevice | TargetKind::CharDevice if !nested => {
                let stats = self.overwrite(path, kind)?;
                self.stats.files += 1;
                Ok(stats)
            }
            TargetKind::BlockDevice | TargetKind::CharDevice | TargetKind::Other => {
                if self.config.verbose && !self.config.silent {
                    println!("Not wiping special file {}", path.display());
                }
                let stats = TargetStats::new(kind);
                if !self.config.no_remove {
                    fs::remove_file(path).map_err(|e| WipeError::io(path, "unlink", e))?;
                }
                self.stats.specials += 1;
                Ok(stats)
            }
        }
    }

    /// Wipes what a symlink points to, then removes the target and the link.
    fn wipe_symlink_target(&mut self, link: &Path) -> Result<TargetStats, WipeError> {
        let target = fs::canonicalize(link).map_err(|e| WipeError::io(link, "readlink", e))?;
        let metadata = fs::metadata(&target).map_err(|e| WipeError::io(&target, "stat", e))?;
        let kind = TargetKind::from_file_type(metadata.file_type());
        if !kind.is_wipeable() {
            return Err(WipeError::Refused {
                path: link.to_path_buf(),
                reason: "symlink does not point to a file or device",
            });
        }

        log::info!("{} -> {}", link.display(), target.display());
        let mut stats = self.overwrite(&target, kind)?;
        if kind == TargetKind::Regular {
            stats.renames = self.remove_entry(&target)?;
        }
        self.stats.files += 1;
        stats.renames += self.remove_entry(link)?;
        self.stats.symlinks += 1;
        Ok(stats)
    }

    fn overwrite(&mut self, path: &Path, kind: TargetKind) -> Result<TargetStats, WipeError> {
        let mut device = self.open_device(path, kind)?;
        let metadata = device
            .file()
            .metadata()
            .map_err(|e| WipeError::io(path, "fstat", e))?;
        let request = ExtentRequest {
            offset: self.config.wipe_offset,
            length: self.config.wipe_length,
            exact_size: self.config.exact_size,
        };
        let target = resolve_target(
            device.file_mut(),
            &metadata,
            kind,
            &request,
            self.pool.buffer_size(),
        )
        .map_err(|e| WipeError::io(path, "size", e))?;

        let plan = build_plan(
            self.config.quick,
            self.config.quick_passes,
            self.config.unbiased_shuffle,
            &mut *self.rng,
        );
        if self.config.verbose && !self.config.silent {
            println!(
                "Wiping {}, {} bytes, {} passes",
                path.display(),
                target.length,
                plan.len()
            );
            if self.config.skip_passes > 0 {
                println!(
                    "{}: skipping the first {} passes",
                    path.display(),
                    self.config.skip_passes
                );
            }
        }

        let bar = self.progress_bar();
        let pass_stats = FileWiper::new(path, &mut self.pool, &mut *self.rng, &self.cancel)
            .skip_passes(self.config.skip_passes)
            .progress(bar)
            .wipe(&mut device, &target, &plan)?;

        // Halving starts from the size before the wipe, not the rounded
        // extent the passes may have extended the file to.
        if kind == TargetKind::Regular && !self.config.skip_filesize_wipe {
            erase_size(&mut device, metadata.len(), &mut *self.rng)
                .map_err(|e| WipeError::io(path, "truncate", e))?;
        }

        Ok(TargetStats {
            kind,
            passes: pass_stats.passes,
            bytes_written: pass_stats.bytes_written,
            renames: 0,
            skipped: false,
        })
    }

    /// Opens for synchronous writes. On a permission error, and when
    /// allowed, the file is made `0700` and opened again without `O_SYNC`.
    fn open_device(&self, path: &Path, kind: TargetKind) -> Result<FileDevice, WipeError> {
        match FileDevice::open(path) {
            Ok(device) => Ok(device),
            Err(e)
                if e.kind() == io::ErrorKind::PermissionDenied
                    && kind == TargetKind::Regular
                    && (self.config.force || self.config.allow_chmod) =>
            {
                log::info!("{}: changing mode to 0700 to open it", path.display());
                fs::set_permissions(path, Permissions::from_mode(0o700))
                    .map_err(|e| WipeError::io(path, "chmod", e))?;
                FileDevice::open_plain(path).map_err(|e| WipeError::io(path, "open", e))
            }
            Err(e) => Err(WipeError::io(path, "open", e)),
        }
    }

    /// Removes a non-directory entry, erasing its name first unless told
    /// not to. Returns the number of renames performed.
    fn remove_entry(&mut self, path: &Path) -> Result<usize, WipeError> {
        if self.config.no_remove {
            return Ok(0);
        }
        if self.config.skip_filename_wipe {
            fs::remove_file(path).map_err(|e| WipeError::io(path, "unlink", e))?;
            return Ok(0);
        }

        let eraser = FilenameEraser::new(self.config.rename_tries, self.config.rename_passes);
        let outcome = eraser.erase(path, &mut *self.rng, &mut Filesystem, &self.cancel)?;
        if self.config.verbose && !self.config.silent {
            println!(
                "{}: removed as {}",
                path.display(),
                outcome.final_path.display()
            );
        }
        Ok(outcome.renames)
    }

    fn wipe_directory(
        &mut self,
        path: &Path,
        metadata: &fs::Metadata,
    ) -> Result<TargetStats, WipeError> {
        if is_dot_entry(path) {
            return Err(WipeError::Refused {
                path: path.to_path_buf(),
                reason: "refusing to wipe . or ..",
            });
        }

        if metadata.mode() & 0o700 != 0o700 {
            if !self.config.allow_chmod {
                return Err(WipeError::Refused {
                    path: path.to_path_buf(),
                    reason: "directory mode is not u+rwx; use -c option",
                });
            }
            fs::set_permissions(path, Permissions::from_mode(0o700))
                .map_err(|e| WipeError::io(path, "chmod", e))?;
        }

        let mut entries = fs::read_dir(path)
            .map_err(|e| WipeError::io(path, "opendir", e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| WipeError::io(path, "readdir", e))?;
        entries.sort();

        let mut failures = 0;
        for entry in &entries {
            match self.wipe_entry(entry, true) {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(_) => {
                    failures += 1;
                    if self.config.abort_on_error {
                        break;
                    }
                }
            }
        }
        if failures > 0 {
            return Err(WipeError::Incomplete {
                path: path.to_path_buf(),
                failures,
            });
        }

        if !self.config.no_remove {
            fs::remove_dir(path).map_err(|e| WipeError::io(path, "rmdir", e))?;
        }
        self.stats.dirs += 1;
        Ok(TargetStats::new(TargetKind::Directory))
    }

    fn progress_bar(&self) -> Option<ProgressBar> {
        if !self.config.verbose || self.config.silent {
            return None;
        }
        let pb = ProgressBar::new(0);
        match ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes:>9}/{total_bytes:9} {msg}")
        {
            Ok(style) => pb.set_style(style.progress_chars("##-")),
            Err(e) => log::debug!("progress template rejected: {}", e),
        }
        Some(pb)
    }
}

/// True for `.`, `..` and paths ending in either.
fn is_dot_entry(path: &Path) -> bool {
    let mut bytes = path.as_os_str().as_bytes();
    while bytes.len() > 1 && bytes.ends_with(b"/") {
        bytes = &bytes[..bytes.len() - 1];
    }
    let last = bytes.rsplit(|&b| b == b'/').next().unwrap_or(bytes);
    last == b"." || last == b".."
}
