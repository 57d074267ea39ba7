pub mod buffer_pool;
pub mod device;

use crate::patterns::{random::RandomSource, PassKind, PassPlan};
use crate::storage::WipeTarget;
use crate::{CancelToken, WipeError};
use buffer_pool::{BufferPool, BufferSlot};
use device::WipeDevice;
use indicatif::ProgressBar;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// How an extent splits into buffer-sized writes.
///
/// Chunks are aligned to multiples of the buffer size, so only the first
/// and the last write of a pass may be partial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkGeometry {
    pub chunk_size: usize,
    pub buffers_to_wipe: u64,
    pub first_size: usize,
    pub last_size: usize,
}

impl ChunkGeometry {
    /// `chunk_size` must be a power of two.
    pub fn new(offset: u64, length: u64, chunk_size: usize) -> Self {
        let chunk = chunk_size as u64;
        let first_block = offset / chunk;
        let last_block = (offset + length).div_ceil(chunk);
        let buffers_to_wipe = last_block - first_block;

        let (first_size, last_size) = if buffers_to_wipe <= 1 {
            (length as usize, length as usize)
        } else {
            let first = chunk - (offset & (chunk - 1));
            let last = match (offset + length) & (chunk - 1) {
                0 => chunk,
                rest => rest,
            };
            (first as usize, last as usize)
        };

        Self {
            chunk_size,
            buffers_to_wipe,
            first_size,
            last_size,
        }
    }

    pub fn chunk_len(&self, index: u64) -> usize {
        if index == 0 {
            self.first_size
        } else if index + 1 == self.buffers_to_wipe {
            self.last_size
        } else {
            self.chunk_size
        }
    }

    /// Largest write this geometry issues; random slots must hold this many
    /// fresh bytes.
    pub fn random_length(&self) -> usize {
        if self.buffers_to_wipe <= 2 {
            self.first_size.max(self.last_size)
        } else {
            self.chunk_size
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub passes: usize,
    pub chunks_per_pass: u64,
    pub bytes_written: u64,
    pub revitalizations: u64,
    pub readiness_waits: u64,
}

/// What the writer did while the device was not accepting data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdleStep {
    Revitalized,
    Waited,
}

/// Drives the pass loop over one target extent.
pub struct FileWiper<'a> {
    path: PathBuf,
    pool: &'a mut BufferPool,
    rng: &'a mut dyn RandomSource,
    cancel: &'a CancelToken,
    skip_passes: usize,
    progress: Option<ProgressBar>,
}

impl<'a> FileWiper<'a> {
    pub fn new(
        path: &Path,
        pool: &'a mut BufferPool,
        rng: &'a mut dyn RandomSource,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            path: path.to_path_buf(),
            pool,
            rng,
            cancel,
            skip_passes: 0,
            progress: None,
        }
    }

    pub fn skip_passes(mut self, count: usize) -> Self {
        self.skip_passes = count;
        self
    }

    pub fn progress(mut self, bar: Option<ProgressBar>) -> Self {
        self.progress = bar;
        self
    }

    pub fn wipe(
        &mut self,
        device: &mut dyn WipeDevice,
        target: &WipeTarget,
        plan: &PassPlan,
    ) -> Result<PassStats, WipeError> {
        let mut stats = PassStats::default();
        if target.length == 0 {
            log::debug!("{}: zero-length extent, nothing to overwrite", self.path.display());
            return Ok(stats);
        }

        let geometry = ChunkGeometry::new(target.offset, target.length, self.pool.buffer_size());
        log::debug!(
            "{}: {} buffers, first {} last {} bytes",
            self.path.display(),
            geometry.buffers_to_wipe,
            geometry.first_size,
            geometry.last_size
        );
        self.pool.prepare(geometry.random_length());
        stats.chunks_per_pass = geometry.buffers_to_wipe;

        if let Some(ref pb) = self.progress {
            let remaining = plan.len().saturating_sub(self.skip_passes) as u64;
            pb.set_length(target.length * remaining);
        }

        for step in self.skip_passes.min(plan.len())..plan.len() {
            if let Some(ref pb) = self.progress {
                pb.set_message(format!(
                    "Pass {}/{} ({})",
                    step + 1,
                    plan.len(),
                    plan.spec(step).name()
                ));
            }
            self.wipe_pass(device, target, plan, step, &geometry, &mut stats)?;
            stats.passes += 1;
        }

        if let Some(ref pb) = self.progress {
            pb.finish_and_clear();
        }
        Ok(stats)
    }

    fn wipe_pass(
        &mut self,
        device: &mut dyn WipeDevice,
        target: &WipeTarget,
        plan: &PassPlan,
        step: usize,
        geometry: &ChunkGeometry,
        stats: &mut PassStats,
    ) -> Result<(), WipeError> {
        let spec = plan.spec(step);
        let periodic = match spec.kind {
            PassKind::Periodic if !plan.is_quick() => Some(self.pool.periodic(&spec)),
            _ => None,
        };

        device
            .seek_to(target.offset)
            .map_err(|e| WipeError::io(&self.path, "seek error", e))?;

        for index in 0..geometry.buffers_to_wipe {
            self.cancel.check()?;
            let len = geometry.chunk_len(index);
            let slot = match periodic {
                Some(slot) => slot,
                None => self.pool.lease_random(&mut *self.rng),
            };

            self.write_chunk(device, slot, len, stats)?;
            stats.bytes_written += len as u64;

            if !device.is_synchronous() {
                device
                    .sync()
                    .map_err(|e| WipeError::io(&self.path, "fsync error", e))?;
            }
            if let Some(ref pb) = self.progress {
                pb.inc(len as u64);
            }
        }

        device
            .sync()
            .map_err(|e| WipeError::io(&self.path, "fsync error", e))
    }

    /// Writes one chunk, retrying for as long as the device reports
    /// `WouldBlock`.
    fn write_chunk(
        &mut self,
        device: &mut dyn WipeDevice,
        slot: BufferSlot,
        len: usize,
        stats: &mut PassStats,
    ) -> Result<(), WipeError> {
        loop {
            let result = device.write(self.pool.bytes(slot, len));
            match result {
                Ok(written) if written == len => return Ok(()),
                Ok(written) => {
                    return Err(WipeError::ShortWrite {
                        path: self.path.clone(),
                        expected: len,
                        written,
                    })
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    match self.idle_step(device)? {
                        IdleStep::Revitalized => stats.revitalizations += 1,
                        IdleStep::Waited => stats.readiness_waits += 1,
                    }
                }
                Err(e) => {
                    return Err(WipeError::Write {
                        path: self.path.clone(),
                        source: e,
                    })
                }
            }
        }
    }

    /// Refills a used random slot if there is one, otherwise blocks until
    /// the device is writable.
    fn idle_step(&mut self, device: &mut dyn WipeDevice) -> Result<IdleStep, WipeError> {
        if self.pool.revitalize(&mut *self.rng) {
            return Ok(IdleStep::Revitalized);
        }
        device
            .wait_writable()
            .map_err(|e| WipeError::io(&self.path, "poll", e))?;
        Ok(IdleStep::Waited)
    }
}

#[cfg(test)]
mod tests {
    use super::device::tests::MemoryDevice;
    use super::*;
    use crate::patterns::random::tests::{ConstantSource, CountingSource};
    use crate::patterns::{PassPlan, PASS_TABLE};
    use crate::CancelReason;

    fn target(offset: u64, length: u64, buffer: usize) -> WipeTarget {
        WipeTarget {
            offset,
            length,
            io_buffer_size: buffer,
        }
    }

    #[test]
    fn test_geometry_chunk_count_matches_formula() {
        let chunk = 512usize;
        for offset in [0u64, 1, 100, 511, 512, 1000] {
            for length in [1u64, 5, 511, 512, 513, 1024, 1500, 4097] {
                let g = ChunkGeometry::new(offset, length, chunk);
                let expected = (offset + length).div_ceil(512) - offset / 512;
                assert_eq!(g.buffers_to_wipe, expected, "offset {} length {}", offset, length);

                let total: u64 = (0..g.buffers_to_wipe).map(|i| g.chunk_len(i) as u64).sum();
                assert_eq!(total, length, "offset {} length {}", offset, length);
            }
        }
    }

    #[test]
    fn test_geometry_random_length() {
        assert_eq!(ChunkGeometry::new(0, 100, 4096).random_length(), 100);
        assert_eq!(ChunkGeometry::new(4000, 200, 4096).random_length(), 104);
        assert_eq!(ChunkGeometry::new(0, 10_000, 4096).random_length(), 4096);
    }

    #[test]
    fn test_quick_wipe_chunk_sizes() -> Result<(), WipeError> {
        let mut pool = BufferPool::new(4096, 16);
        let mut rng = CountingSource::new(1);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice::new(10_000);

        let plan = PassPlan::quick(4);
        let stats = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 10_000, 4096), &plan)?;

        assert_eq!(stats.passes, 4);
        assert_eq!(stats.chunks_per_pass, 3);
        assert_eq!(stats.bytes_written, 40_000);
        assert_eq!(device.writes, [4096, 4096, 1808].repeat(4));
        // Not synchronous: one fsync per chunk plus one per pass.
        assert_eq!(device.syncs, 4 * 4);
        assert_eq!(pool.periodic_count(), 0);
        Ok(())
    }

    #[test]
    fn test_synchronous_device_syncs_once_per_pass() -> Result<(), WipeError> {
        let mut pool = BufferPool::new(512, 4);
        let mut rng = CountingSource::new(0);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice {
            synchronous: true,
            ..MemoryDevice::new(2048)
        };

        let plan = PassPlan::quick(2);
        FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 2048, 512), &plan)?;
        assert_eq!(device.syncs, 2);
        Ok(())
    }

    #[test]
    fn test_secure_plan_writes_periodic_patterns() -> Result<(), WipeError> {
        let mut pool = BufferPool::new(512, 4);
        let mut rng = CountingSource::new(0);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice::new(1000);

        let plan = PassPlan::secure(&mut rng);
        let last = plan.order()[plan.len() - 1];
        let stats = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 1000, 512), &plan)?;

        assert_eq!(stats.passes, 35);
        assert_eq!(pool.periodic_count(), 22);
        let spec = PASS_TABLE[last];
        if spec.kind == PassKind::Periodic {
            let mut expected = vec![0u8; 1000];
            crate::patterns::fill_pattern(&mut expected[..512], spec.pattern);
            crate::patterns::fill_pattern(&mut expected[512..], spec.pattern);
            assert_eq!(device.data, expected);
        }
        Ok(())
    }

    #[test]
    fn test_offset_extent_is_written_in_place() -> Result<(), WipeError> {
        let mut pool = BufferPool::new(512, 2);
        let mut rng = ConstantSource(0xEE);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice::new(2000);

        let stats = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(700, 600, 512), &PassPlan::quick(1))?;

        assert_eq!(device.writes, vec![324, 276]);
        assert_eq!(stats.bytes_written, 600);
        assert!(device.data[..700].iter().all(|&b| b == 0));
        assert!(device.data[700..1300].iter().all(|&b| b == 0xEE));
        assert!(device.data[1300..].iter().all(|&b| b == 0));
        Ok(())
    }

    #[test]
    fn test_zero_length_skips_loop() -> Result<(), WipeError> {
        let mut pool = BufferPool::new(512, 2);
        let mut rng = ConstantSource(1);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice::new(0);

        let plan = PassPlan::secure(&mut rng);
        let stats = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 0, 512), &plan)?;
        assert_eq!(stats, PassStats::default());
        assert!(device.writes.is_empty());
        assert_eq!(device.syncs, 0);
        Ok(())
    }

    #[test]
    fn test_eagain_once_revitalizes_then_succeeds() -> Result<(), WipeError> {
        let mut pool = BufferPool::new(512, 4);
        let mut rng = CountingSource::new(0);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice::new(512);
        device.script.push_back(Some(ErrorKind::WouldBlock));

        let stats = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 512, 512), &PassPlan::quick(1))?;

        assert_eq!(stats.revitalizations + stats.readiness_waits, 1);
        assert_eq!(stats.revitalizations, 1);
        assert_eq!(device.writes, vec![512]);
        assert_eq!(stats.bytes_written, 512);
        Ok(())
    }

    #[test]
    fn test_eagain_waits_when_nothing_to_refill() -> Result<(), WipeError> {
        let mut pool = BufferPool::new(512, 1);
        let mut rng = CountingSource::new(0);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice::new(512);
        device.script.push_back(Some(ErrorKind::WouldBlock));
        device.script.push_back(Some(ErrorKind::WouldBlock));

        let stats = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 512, 512), &PassPlan::quick(1))?;

        assert_eq!(stats.revitalizations, 1);
        assert_eq!(stats.readiness_waits, 1);
        assert_eq!(device.waits, 1);
        assert_eq!(device.writes, vec![512]);
        Ok(())
    }

    #[test]
    fn test_write_error_is_fatal() {
        let mut pool = BufferPool::new(512, 1);
        let mut rng = CountingSource::new(0);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice::new(512);
        device.script.push_back(Some(ErrorKind::Other));

        let err = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 512, 512), &PassPlan::quick(1))
            .unwrap_err();
        assert!(matches!(err, WipeError::Write { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_short_write_fails_the_file() {
        let mut pool = BufferPool::new(512, 1);
        let mut rng = CountingSource::new(0);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice {
            short_by: Some(12),
            ..MemoryDevice::new(512)
        };

        let err = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 512, 512), &PassPlan::quick(1))
            .unwrap_err();
        assert!(matches!(
            err,
            WipeError::ShortWrite {
                expected: 512,
                written: 500,
                ..
            }
        ));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_skip_passes_resumes_later() -> Result<(), WipeError> {
        let mut pool = BufferPool::new(512, 2);
        let mut rng = CountingSource::new(0);
        let cancel = CancelToken::new();
        let mut device = MemoryDevice::new(512);

        let stats = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .skip_passes(3)
            .wipe(&mut device, &target(0, 512, 512), &PassPlan::quick(4))?;
        assert_eq!(stats.passes, 1);
        assert_eq!(device.writes.len(), 1);
        Ok(())
    }

    #[test]
    fn test_cancellation_stops_before_next_chunk() {
        let mut pool = BufferPool::new(512, 2);
        let mut rng = CountingSource::new(0);
        let cancel = CancelToken::new();
        cancel.cancel(CancelReason::Interrupt);
        let mut device = MemoryDevice::new(1024);

        let err = FileWiper::new(Path::new("t"), &mut pool, &mut rng, &cancel)
            .wipe(&mut device, &target(0, 1024, 512), &PassPlan::quick(1))
            .unwrap_err();
        assert!(matches!(err, WipeError::Aborted));
        assert!(device.writes.is_empty());
    }
}
