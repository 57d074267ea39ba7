use crate::patterns::random::RandomSource;
use crate::{CancelToken, WipeError};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

/// Characters used for replacement names. Exactly 64 of them, so a 6-bit
/// mask maps every random byte to one character with no bias.
pub const NAME_ALPHABET: &[u8; 64] =
    b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-.";

const NAME_MASK: u8 = 0x3f;

/// Longest name component most filesystems accept.
pub const NAME_MAX: usize = 255;

/// Directory operations the eraser needs; swapped out in tests.
pub trait Namespace {
    fn exists(&self, path: &Path) -> bool;
    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()>;
    /// Commits directory entry changes to stable storage.
    fn sync_dir(&mut self, dir: &Path) -> io::Result<()>;
    fn remove(&mut self, path: &Path) -> io::Result<()>;
}

/// The real filesystem.
pub struct Filesystem;

impl Namespace for Filesystem {
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn rename(&mut self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn sync_dir(&mut self, dir: &Path) -> io::Result<()> {
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        File::open(dir)?.sync_all()
    }

    fn remove(&mut self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseState {
    Initial,
    Renaming { pass: usize },
    Removing,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EraseOutcome {
    pub final_path: PathBuf,
    pub renames: usize,
    pub name_len: usize,
}

struct EraseRun {
    state: EraseState,
    current: PathBuf,
    name_len: usize,
    renames: usize,
}

/// Renames a file to random names in its own directory a number of times,
/// then removes it.
pub struct FilenameEraser {
    pub max_tries: usize,
    pub max_passes: usize,
}

impl Default for FilenameEraser {
    fn default() -> Self {
        Self {
            max_tries: crate::DEFAULT_RENAME_TRIES,
            max_passes: crate::DEFAULT_RENAME_PASSES,
        }
    }
}

impl FilenameEraser {
    pub fn new(max_tries: usize, max_passes: usize) -> Self {
        Self {
            max_tries: max_tries.max(1),
            max_passes,
        }
    }

    pub fn erase(
        &self,
        path: &Path,
        rng: &mut dyn RandomSource,
        namespace: &mut dyn Namespace,
        cancel: &CancelToken,
    ) -> Result<EraseOutcome, WipeError> {
        let mut run = EraseRun {
            state: EraseState::Initial,
            current: path.to_path_buf(),
            name_len: path.file_name().map(|n| n.len()).unwrap_or(0).max(1),
            renames: 0,
        };

        loop {
            match run.state {
                EraseState::Done => {
                    return Ok(EraseOutcome {
                        final_path: run.current,
                        renames: run.renames,
                        name_len: run.name_len,
                    })
                }
                _ => match self.step(&mut run, rng, namespace, cancel) {
                    Ok(next) => run.state = next,
                    Err(e) => {
                        run.state = EraseState::Failed;
                        log::debug!("filename erasure for {} failed: {}", path.display(), e);
                        return Err(e);
                    }
                },
            }
        }
    }

    fn step(
        &self,
        run: &mut EraseRun,
        rng: &mut dyn RandomSource,
        namespace: &mut dyn Namespace,
        cancel: &CancelToken,
    ) -> Result<EraseState, WipeError> {
        match run.state {
            EraseState::Initial if self.max_passes == 0 => Ok(EraseState::Removing),
            EraseState::Initial => Ok(EraseState::Renaming { pass: 0 }),
            EraseState::Renaming { pass } => {
                cancel.check()?;
                let Some(candidate) = self.find_free_name(run, rng, namespace) else {
                    if run.name_len >= NAME_MAX {
                        log::warn!(
                            "{}: no free name up to {} characters, removing as is",
                            run.current.display(),
                            NAME_MAX
                        );
                        return Ok(EraseState::Removing);
                    }
                    run.name_len += 1;
                    return Ok(EraseState::Renaming { pass });
                };

                namespace
                    .rename(&run.current, &candidate)
                    .map_err(|source| WipeError::Rename {
                        from: run.current.clone(),
                        to: candidate.clone(),
                        source,
                    })?;
                if let Err(e) = namespace.sync_dir(parent_of(&candidate)) {
                    log::warn!("{}: directory sync failed: {}", candidate.display(), e);
                }
                run.current = candidate;
                run.renames += 1;

                if pass + 1 < self.max_passes {
                    Ok(EraseState::Renaming { pass: pass + 1 })
                } else {
                    Ok(EraseState::Removing)
                }
            }
            EraseState::Removing => {
                namespace
                    .remove(&run.current)
                    .map_err(|e| WipeError::io(&run.current, "remove", e))?;
                Ok(EraseState::Done)
            }
            state => Ok(state),
        }
    }

    /// Up to `max_tries` candidates of the current length; the first one
    /// that does not exist wins.
    fn find_free_name(
        &self,
        run: &EraseRun,
        rng: &mut dyn RandomSource,
        namespace: &dyn Namespace,
    ) -> Option<PathBuf> {
        let parent = parent_of(&run.current);
        (0..self.max_tries)
            .map(|_| parent.join(random_name(run.name_len, rng)))
            .find(|candidate| !namespace.exists(candidate))
    }
}

fn parent_of(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new(""))
}

/// A `len`-character name drawn from `NAME_ALPHABET`.
pub fn random_name(len: usize, rng: &mut dyn RandomSource) -> OsString {
    let mut bytes = vec![0u8; len];
    rng.fill_bytes(&mut bytes);
    for byte in bytes.iter_mut() {
        *byte = NAME_ALPHABET[(*byte & NAME_MASK) as usize];
    }
    OsString::from_vec(bytes)
}
