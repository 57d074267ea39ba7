//! Wipe error taxonomy.

use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum WipeError {
    /// A per-file operation failed: stat, open, chmod, fsync, truncate,
    /// remove and similar.
    Io {
        path: PathBuf,
        op: &'static str,
        source: io::Error,
    },
    /// A write failed for a reason other than EAGAIN. The target is left
    /// with an unknown mix of old and new data.
    Write { path: PathBuf, source: io::Error },
    /// The device accepted fewer bytes than requested.
    ShortWrite {
        path: PathBuf,
        expected: usize,
        written: usize,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
    /// A directory could not be removed because some of its entries failed.
    /// Those failures have already been reported individually.
    Incomplete { path: PathBuf, failures: usize },
    /// Refused before any work was done (".", "..", unsupported input).
    Refused { path: PathBuf, reason: &'static str },
    /// The cancellation token was tripped.
    Aborted,
}

impl WipeError {
    pub fn io(path: impl Into<PathBuf>, op: &'static str, source: io::Error) -> Self {
        WipeError::Io {
            path: path.into(),
            op,
            source,
        }
    }

    /// Fatal errors stop the whole run rather than just the current file.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WipeError::Write { .. } | WipeError::Aborted)
    }

    /// Whether the error was already counted when it happened.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, WipeError::Incomplete { .. })
    }
}

impl fmt::Display for WipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, op, source } => {
                write!(f, "{}: {}: {}", path.display(), op, source)
            }
            Self::Write { path, source } => {
                write!(f, "{}: write error: {}", path.display(), source)
            }
            Self::ShortWrite {
                path,
                expected,
                written,
            } => write!(
                f,
                "{}: short write, expected {} bytes got {}",
                path.display(),
                expected,
                written
            ),
            Self::Rename { from, to, source } => write!(
                f,
                "{}: could not rename to '{}': {}",
                from.display(),
                to.display(),
                source
            ),
            Self::Incomplete { path, failures } => write!(
                f,
                "{}: {} entr{} could not be wiped",
                path.display(),
                failures,
                if *failures == 1 { "y" } else { "ies" }
            ),
            Self::Refused { path, reason } => write!(f, "{}: {}", path.display(), reason),
            Self::Aborted => write!(f, "interrupted"),
        }
    }
}

impl std::error::Error for WipeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } | Self::Write { source, .. } | Self::Rename { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let write = WipeError::Write {
            path: "a".into(),
            source: io::Error::from_raw_os_error(5),
        };
        assert!(write.is_fatal());
        assert!(WipeError::Aborted.is_fatal());
        assert!(!WipeError::io("a", "fsync", io::Error::from_raw_os_error(5)).is_fatal());
        assert!(!WipeError::ShortWrite {
            path: "a".into(),
            expected: 10,
            written: 3
        }
        .is_fatal());
    }

    #[test]
    fn test_message_names_file_and_operation() {
        let err = WipeError::io(
            "/tmp/secret",
            "open error",
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        let text = err.to_string();
        assert!(text.starts_with("/tmp/secret: open error: "));
    }
}
