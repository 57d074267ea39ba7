//! Post-overwrite erasure of what the inode and directory entry still
//! reveal: the file length and the file name.

pub mod metadata;
pub mod size;

pub use metadata::{EraseOutcome, EraseState, Filesystem, FilenameEraser, Namespace};
pub use size::erase_size;
