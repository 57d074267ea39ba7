pub mod config;
pub mod error;
pub mod io;
pub mod logging;
pub mod patterns;
pub mod security;
pub mod session;
pub mod storage;

pub use anyhow::{Error, Result};
pub use error::WipeError;
pub use session::{SessionStats, TargetStats, WipeSession};
pub use std::path::{Path, PathBuf};

use patterns::random::{RandomAlgorithm, SeedMethod};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub const DEFAULT_BUFFER_LOG2: u32 = 14;
pub const DEFAULT_QUICK_PASSES: usize = 4;
pub const DEFAULT_RENAME_TRIES: usize = 10;
pub const DEFAULT_RENAME_PASSES: usize = 1;
pub const DEFAULT_RANDOM_DEVICE: &str = "/dev/urandom";

#[derive(Debug, Clone)]
pub struct WipeConfig {
    pub force: bool,
    pub allow_chmod: bool,
    pub abort_on_error: bool,
    pub recurse: bool,
    pub dereference_symlinks: bool,
    pub quick: bool,
    pub quick_passes: usize,
    /// Set when the quick pass count was given explicitly.
    pub quick_passes_set: bool,
    pub verbose: bool,
    pub silent: bool,
    pub random_algorithm: RandomAlgorithm,
    /// `None` picks the device, a seed command or process state
    /// depending on what is available.
    pub seed_method: Option<SeedMethod>,
    pub random_device: PathBuf,
    pub no_remove: bool,
    pub skip_filename_wipe: bool,
    pub rename_tries: usize,
    pub rename_passes: usize,
    pub skip_filesize_wipe: bool,
    pub wipe_offset: u64,
    /// `Some` overrides the probed length of every target.
    pub wipe_length: Option<u64>,
    pub exact_size: bool,
    pub buffer_size_log2: u32,
    pub skip_passes: usize,
    pub random_buffers: usize,
    pub unbiased_shuffle: bool,
}

impl Default for WipeConfig {
    fn default() -> Self {
        Self {
            force: false,
            allow_chmod: false,
            abort_on_error: false,
            recurse: false,
            dereference_symlinks: false,
            quick: false,
            quick_passes: DEFAULT_QUICK_PASSES,
            quick_passes_set: false,
            verbose: false,
            silent: false,
            random_algorithm: RandomAlgorithm::ChaCha20,
            seed_method: None,
            random_device: PathBuf::from(DEFAULT_RANDOM_DEVICE),
            no_remove: false,
            skip_filename_wipe: false,
            rename_tries: DEFAULT_RENAME_TRIES,
            rename_passes: DEFAULT_RENAME_PASSES,
            skip_filesize_wipe: false,
            wipe_offset: 0,
            wipe_length: None,
            exact_size: false,
            buffer_size_log2: DEFAULT_BUFFER_LOG2,
            skip_passes: 0,
            random_buffers: io::buffer_pool::RANDOM_BUFFERS,
            unbiased_shuffle: false,
        }
    }
}

impl WipeConfig {
    pub fn buffer_size(&self) -> usize {
        1usize << self.buffer_size_log2
    }

    pub fn pass_count(&self) -> usize {
        if self.quick {
            self.quick_passes
        } else {
            patterns::SECURE_PASSES
        }
    }

    /// Rejects option combinations that make no sense before any file is
    /// touched.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size_log2 < 9 {
            anyhow::bail!(
                "the power of 2 specified must be greater than 8 \
                 to ensure a buffer size of at least 512 bytes"
            );
        }
        if self.buffer_size_log2 > 30 {
            anyhow::bail!(
                "a power of two over 30 is probably useless \
                 since it means a buffer over one gigabyte"
            );
        }
        if self.quick_passes_set && !self.quick {
            anyhow::bail!("the quick pass count is useless without quick mode");
        }
        if self.quick && self.quick_passes < 1 {
            anyhow::bail!("number of quick passes must be at least 1");
        }
        if self.skip_passes >= self.pass_count() {
            anyhow::bail!(
                "cannot skip {} of {} passes",
                self.skip_passes,
                self.pass_count()
            );
        }
        if self.rename_tries < 1 {
            anyhow::bail!("number of filename tries must be at least 1");
        }
        if self.random_buffers < 1 {
            anyhow::bail!("at least one random buffer is required");
        }
        if self.recurse && self.dereference_symlinks {
            anyhow::bail!("recursion and symlink dereferencing are mutually exclusive");
        }
        Ok(())
    }
}

/// Process exit statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    /// The run completed but some files could not be wiped.
    MinorError,
    UserAbort,
    InvocationError,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::MinorError => 2,
            ExitStatus::UserAbort => 3,
            ExitStatus::InvocationError => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Interrupt,
    Terminate,
}

/// Shared flag polled before every chunk write and every rename.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<AtomicU8>,
}

impl CancelToken {
    const RUNNING: u8 = 0;
    const INTERRUPT: u8 = 1;
    const TERMINATE: u8 = 2;

    pub fn new() -> Self {
        Self::default()
    }

    /// The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        let value = match reason {
            CancelReason::Interrupt => Self::INTERRUPT,
            CancelReason::Terminate => Self::TERMINATE,
        };
        let _ = self.state.compare_exchange(
            Self::RUNNING,
            value,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::SeqCst) != Self::RUNNING
    }

    pub fn reason(&self) -> Option<CancelReason> {
        match self.state.load(Ordering::SeqCst) {
            Self::INTERRUPT => Some(CancelReason::Interrupt),
            Self::TERMINATE => Some(CancelReason::Terminate),
            _ => None,
        }
    }

    pub(crate) fn check(&self) -> std::result::Result<(), WipeError> {
        if self.is_cancelled() {
            Err(WipeError::Aborted)
        } else {
            Ok(())
        }
    }
}
