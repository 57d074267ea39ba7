use crate::io::device::WipeDevice;
use crate::patterns::random::RandomSource;
use std::io;

/// Truncates a regular file through a random sequence of strictly
/// decreasing lengths, so the length left in the inode does not
/// reveal the original size.
///
/// Each halving step consumes one bit of a single 32-bit draw; a set bit
/// means that length is committed with a truncate. Returns the lengths
/// actually committed, in order.
pub fn erase_size(
    device: &mut dyn WipeDevice,
    size: u64,
    rng: &mut dyn RandomSource,
) -> io::Result<Vec<u64>> {
    let mut bits = rng.next_u32();
    let mut length = size;
    let mut committed = Vec::new();

    while length != 0 {
        length >>= 1;
        bits >>= 1;
        if bits & 1 == 1 {
            device.truncate(length)?;
            committed.push(length);
        }
    }
    log::trace!("size erased through {:?}", committed);
    Ok(committed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::device::tests::MemoryDevice;
    use crate::patterns::random::tests::ConstantSource;

    #[test]
    fn test_all_bits_set_visits_every_halving() -> io::Result<()> {
        let mut device = MemoryDevice::new(1000);
        let mut rng = ConstantSource(0xFF);
        let lengths = erase_size(&mut device, 1000, &mut rng)?;
        assert_eq!(lengths, vec![500, 250, 125, 62, 31, 15, 7, 3, 1, 0]);
        assert_eq!(device.truncations, lengths);
        assert!(device.data.is_empty());
        Ok(())
    }

    #[test]
    fn test_clear_bits_skip_truncation() -> io::Result<()> {
        let mut device = MemoryDevice::new(4096);
        let mut rng = ConstantSource(0);
        assert!(erase_size(&mut device, 4096, &mut rng)?.is_empty());
        assert_eq!(device.data.len(), 4096);
        Ok(())
    }

    #[test]
    fn test_lengths_strictly_decrease() -> io::Result<()> {
        let mut device = MemoryDevice::new(0);
        let mut rng = ConstantSource(0b1010_0110);
        let lengths = erase_size(&mut device, 1 << 20, &mut rng)?;
        assert!(!lengths.is_empty());
        assert!(lengths.windows(2).all(|w| w[0] > w[1]));
        assert!(lengths.iter().all(|&l| l < 1 << 20));
        Ok(())
    }

    #[test]
    fn test_empty_file_is_untouched() -> io::Result<()> {
        let mut device = MemoryDevice::new(0);
        let mut rng = ConstantSource(0xFF);
        assert!(erase_size(&mut device, 0, &mut rng)?.is_empty());
        assert!(device.truncations.is_empty());
        Ok(())
    }
}
