use nix::fcntl::OFlag;
use nix::poll::{poll, PollFd, PollFlags};
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Write side of a wipe target.
///
/// `write` issues exactly one write call; short writes and `WouldBlock`
/// are reported to the caller untouched.
pub trait WipeDevice {
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
    fn write(&mut self, buffer: &[u8]) -> io::Result<usize>;
    fn sync(&mut self) -> io::Result<()>;
    /// Blocks until the device accepts writes again. No timeout.
    fn wait_writable(&mut self) -> io::Result<()>;
    fn truncate(&mut self, length: u64) -> io::Result<()>;
    /// True when every write is committed before it returns (`O_SYNC`).
    fn is_synchronous(&self) -> bool;
}

pub struct FileDevice {
    file: File,
    synchronous: bool,
}

impl FileDevice {
    /// Opens for synchronous, non-blocking writes.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .custom_flags((OFlag::O_SYNC | OFlag::O_NONBLOCK).bits())
            .open(path)?;
        Ok(Self {
            file,
            synchronous: true,
        })
    }

    /// Plain write-only open, used after a permission fix. Each chunk is
    /// followed by an explicit fsync.
    pub fn open_plain(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().write(true).open(path)?;
        Ok(Self {
            file,
            synchronous: false,
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl WipeDevice for FileDevice {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(offset)).map(|_| ())
    }

    fn write(&mut self, buffer: &[u8]) -> io::Result<usize> {
        self.file.write(buffer)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn wait_writable(&mut self) -> io::Result<()> {
        loop {
            let mut fds = [PollFd::new(&self.file, PollFlags::POLLOUT)];
            match poll(&mut fds, -1) {
                Ok(_) => return Ok(()),
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn truncate(&mut self, length: u64) -> io::Result<()> {
        self.file.set_len(length)
    }

    fn is_synchronous(&self) -> bool {
        self.synchronous
    }
}
