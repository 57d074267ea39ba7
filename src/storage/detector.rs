use super::{ExtentRequest, TargetKind, WipeTarget};
use std::fs::{File, Metadata};
use std::io::{self, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;

// BLKGETSIZE64 = _IOR(0x12, 114, size_t); reports the device size in bytes.
nix::ioctl_read!(blkgetsize64, 0x12, 114, u64);

/// Derives the extent to overwrite for an opened target.
///
/// An explicit length wins. Block devices are sized by ioctl, falling back
/// to seeking to the end. Regular files use their size, rounded up to the
/// allocation block unless `exact_size` is set. The offset is subtracted in
/// both probed cases.
pub fn resolve_target(
    file: &mut File,
    metadata: &Metadata,
    kind: TargetKind,
    request: &ExtentRequest,
    io_buffer_size: usize,
) -> io::Result<WipeTarget> {
    let length = match request.length {
        Some(length) => length,
        None => {
            let size = if kind == TargetKind::BlockDevice {
                block_device_size(file)?
            } else {
                file_size(metadata, request.exact_size)
            };
            size.saturating_sub(request.offset)
        }
    };

    Ok(WipeTarget {
        offset: request.offset,
        length,
        io_buffer_size,
    })
}

pub fn file_size(metadata: &Metadata, exact_size: bool) -> u64 {
    let size = metadata.len();
    if exact_size {
        size
    } else {
        round_up_to_block(size, metadata.blksize())
    }
}

/// Rounds `size` up to a multiple of `block`, so junk in the tail of the
/// last allocation block is covered too.
pub fn round_up_to_block(size: u64, block: u64) -> u64 {
    if block == 0 {
        return size;
    }
    size.div_ceil(block) * block
}

fn block_device_size(file: &mut File) -> io::Result<u64> {
    let mut size: u64 = 0;
    // SAFETY: the descriptor is open for the duration of the call and
    // `size` is a valid u64 the kernel writes into.
    match unsafe { blkgetsize64(file.as_raw_fd(), &mut size) } {
        Ok(_) => {
            log::debug!("BLKGETSIZE64 -> {} bytes", size);
            Ok(size)
        }
        Err(errno) => {
            log::debug!("BLKGETSIZE64 failed ({}), seeking to end", errno);
            let end = file.seek(SeekFrom::End(0))?;
            if end == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "could not determine device size; set the wipe length explicitly",
                ));
            }
            file.seek(SeekFrom::Start(0))?;
            Ok(end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up_to_block(0, 4096), 0);
        assert_eq!(round_up_to_block(1, 4096), 4096);
        assert_eq!(round_up_to_block(4096, 4096), 4096);
        assert_eq!(round_up_to_block(10_000, 4096), 12_288);
        assert_eq!(round_up_to_block(7, 0), 7);
    }

    #[test]
    fn test_regular_file_extent() -> io::Result<()> {
        let mut temp = tempfile::NamedTempFile::new()?;
        temp.write_all(&[1u8; 10_000])?;
        let metadata = temp.as_file().metadata()?;
        let mut file = temp.reopen()?;

        let exact = ExtentRequest {
            exact_size: true,
            ..Default::default()
        };
        let target = resolve_target(&mut file, &metadata, TargetKind::Regular, &exact, 4096)?;
        assert_eq!(target.length, 10_000);

        let rounded = resolve_target(
            &mut file,
            &metadata,
            TargetKind::Regular,
            &ExtentRequest::default(),
            4096,
        )?;
        assert_eq!(rounded.length, round_up_to_block(10_000, metadata.blksize()));

        let offset = ExtentRequest {
            offset: 1000,
            exact_size: true,
            ..Default::default()
        };
        let target = resolve_target(&mut file, &metadata, TargetKind::Regular, &offset, 4096)?;
        assert_eq!((target.offset, target.length), (1000, 9000));

        let explicit = ExtentRequest {
            length: Some(42),
            ..Default::default()
        };
        let target = resolve_target(&mut file, &metadata, TargetKind::Regular, &explicit, 4096)?;
        assert_eq!(target.length, 42);
        Ok(())
    }
}
