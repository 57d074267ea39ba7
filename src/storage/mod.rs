pub mod detector;

use std::fs::FileType;
use std::os::unix::fs::FileTypeExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Regular,
    BlockDevice,
    CharDevice,
    Directory,
    Symlink,
    Other,
}

impl TargetKind {
    pub fn from_file_type(file_type: FileType) -> Self {
        if file_type.is_file() {
            TargetKind::Regular
        } else if file_type.is_dir() {
            TargetKind::Directory
        } else if file_type.is_symlink() {
            TargetKind::Symlink
        } else if file_type.is_block_device() {
            TargetKind::BlockDevice
        } else if file_type.is_char_device() {
            TargetKind::CharDevice
        } else {
            TargetKind::Other
        }
    }

    /// Kinds whose contents get overwritten.
    pub fn is_wipeable(&self) -> bool {
        matches!(
            self,
            TargetKind::Regular | TargetKind::BlockDevice | TargetKind::CharDevice
        )
    }
}

/// The byte range of one target that the passes cover.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WipeTarget {
    pub offset: u64,
    pub length: u64,
    pub io_buffer_size: usize,
}

/// Caller overrides applied when deriving a `WipeTarget`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtentRequest {
    pub offset: u64,
    pub length: Option<u64>,
    pub exact_size: bool,
}
