//! Preallocated random and periodic write buffers.
//!
//! Random slots cycle between `Idle` (fresh data, ready to lease) and
//! `Used` (already written out, must be refilled before reuse). Periodic
//! buffers are filled once per distinct pattern and never change.

use crate::patterns::{fill_pattern, random::RandomSource, PassSpec};

/// Number of random slots kept by default.
pub const RANDOM_BUFFERS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Used,
}

struct RandomSlot {
    data: Vec<u8>,
    state: SlotState,
}

struct PeriodicBuffer {
    pattern: &'static [u8],
    data: Vec<u8>,
}

/// Handle to a buffer owned by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferSlot {
    Random(usize),
    Periodic(usize),
}

pub struct BufferPool {
    buffer_size: usize,
    random_length: usize,
    random: Vec<RandomSlot>,
    periodic: Vec<PeriodicBuffer>,
}

impl BufferPool {
    /// Allocates `capacity` random slots of `buffer_size` bytes. Slots start
    /// out `Used` so nothing is written before it has been filled.
    pub fn new(buffer_size: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let random = (0..capacity)
            .map(|_| RandomSlot {
                data: vec![0u8; buffer_size],
                state: SlotState::Used,
            })
            .collect();

        Self {
            buffer_size,
            random_length: 0,
            random,
            periodic: Vec::new(),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn random_length(&self) -> usize {
        self.random_length
    }

    pub fn capacity(&self) -> usize {
        self.random.len()
    }

    pub fn slot_state(&self, index: usize) -> SlotState {
        self.random[index].state
    }

    /// Sets the number of random bytes each slot must hold for the next
    /// target. Growing invalidates every slot; shrinking keeps them, since
    /// a prefix of fresh data is still fresh.
    pub fn prepare(&mut self, random_length: usize) {
        let random_length = random_length.min(self.buffer_size);
        if random_length > self.random_length {
            log::debug!(
                "random length grows {} -> {}, refilling all slots",
                self.random_length,
                random_length
            );
            self.mark_all_random_used();
        }
        self.random_length = random_length;
    }

    pub fn mark_all_random_used(&mut self) {
        for slot in &mut self.random {
            slot.state = SlotState::Used;
        }
    }

    /// Refills the first used slot. Returns false when every slot already
    /// holds fresh data.
    pub fn revitalize(&mut self, rng: &mut dyn RandomSource) -> bool {
        let length = self.random_length;
        match self.random.iter_mut().find(|s| s.state == SlotState::Used) {
            Some(slot) => {
                rng.fill_bytes(&mut slot.data[..length]);
                slot.state = SlotState::Idle;
                true
            }
            None => false,
        }
    }

    /// Leases the first idle slot and marks it used. When every slot is
    /// used, slot 0 is refilled in place and handed out without being
    /// marked; exhaustion costs fresh random data, never correctness.
    pub fn lease_random(&mut self, rng: &mut dyn RandomSource) -> BufferSlot {
        if let Some(index) = self.random.iter().position(|s| s.state == SlotState::Idle) {
            self.random[index].state = SlotState::Used;
            return BufferSlot::Random(index);
        }

        let length = self.random_length;
        rng.fill_bytes(&mut self.random[0].data[..length]);
        BufferSlot::Random(0)
    }

    /// Returns the buffer tiled with `spec.pattern`, building it on first use.
    pub fn periodic(&mut self, spec: &PassSpec) -> BufferSlot {
        if let Some(index) = self
            .periodic
            .iter()
            .position(|b| b.pattern == spec.pattern)
        {
            return BufferSlot::Periodic(index);
        }

        let mut data = vec![0u8; self.buffer_size];
        fill_pattern(&mut data, spec.pattern);
        self.periodic.push(PeriodicBuffer {
            pattern: spec.pattern,
            data,
        });
        BufferSlot::Periodic(self.periodic.len() - 1)
    }

    pub fn periodic_count(&self) -> usize {
        self.periodic.len()
    }

    /// First `len` bytes of the buffer behind `slot`.
    pub fn bytes(&self, slot: BufferSlot, len: usize) -> &[u8] {
        match slot {
            BufferSlot::Random(i) => &self.random[i].data[..len],
            BufferSlot::Periodic(i) => &self.periodic[i].data[..len],
        }
    }
}
