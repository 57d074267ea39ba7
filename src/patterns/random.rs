use anyhow::{bail, Context, Result};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bytes of key material fed to the generators.
pub const SEED_LEN: usize = 32;

/// Keystream bytes dropped after ARCFOUR key setup.
const ARCFOUR_DISCARD: usize = 8192;

/// A seed command must print at least this much before it is trusted.
const MIN_COMMAND_BYTES: usize = 128;

pub const SEED_PIPE_ENV: &str = "WIPE_SEEDPIPE";

/// Source of pseudorandom bytes used for random passes, pass ordering
/// and filename generation.
///
/// Implementations keep internal state that every draw mutates, so a
/// source must not be shared between threads without synchronization.
pub trait RandomSource: Send {
    fn fill_bytes(&mut self, buffer: &mut [u8]);

    fn next_u32(&mut self) -> u32 {
        let mut word = [0u8; 4];
        self.fill_bytes(&mut word);
        u32::from_be_bytes(word)
    }

    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RandomAlgorithm {
    ChaCha20,
    Arcfour,
}

impl RandomAlgorithm {
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "chacha20" | "c" => Ok(RandomAlgorithm::ChaCha20),
            "arcfour" | "a" => Ok(RandomAlgorithm::Arcfour),
            other => bail!("unknown random algorithm '{}', expected chacha20 or arcfour", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedMethod {
    /// Read key material from a random device.
    Device(PathBuf),
    /// Hash the output of a shell command.
    Command(String),
    /// Hash the environment, pid and clock. Weakest option.
    Process,
}

impl SeedMethod {
    /// Picks the device when it is readable, otherwise the command named by
    /// `WIPE_SEEDPIPE`, otherwise process state.
    pub fn detect(device: &Path) -> Self {
        if File::open(device).is_ok() {
            return SeedMethod::Device(device.to_path_buf());
        }
        match std::env::var(SEED_PIPE_ENV) {
            Ok(cmd) if !cmd.trim().is_empty() => SeedMethod::Command(cmd),
            _ => SeedMethod::Process,
        }
    }

    pub fn gather(&self) -> Result<[u8; SEED_LEN]> {
        match self {
            SeedMethod::Device(path) => seed_from_device(path),
            SeedMethod::Command(cmd) => seed_from_command(cmd),
            SeedMethod::Process => Ok(seed_from_process()),
        }
    }
}

fn seed_from_device(path: &Path) -> Result<[u8; SEED_LEN]> {
    log::debug!("seeding from random device {}", path.display());
    let mut file = File::open(path)
        .with_context(|| format!("could not open \"{}\" for random seeding", path.display()))?;
    let mut seed = [0u8; SEED_LEN];
    file.read_exact(&mut seed)
        .with_context(|| format!("short read or read error from \"{}\"", path.display()))?;
    Ok(seed)
}

fn seed_from_command(cmd: &str) -> Result<[u8; SEED_LEN]> {
    log::debug!("seeding from output of `{}`", cmd);
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stderr(Stdio::inherit())
        .output()
        .with_context(|| format!("could not run seed command \"{}\"", cmd))?;

    if !output.status.success() {
        bail!("seed command \"{}\" exited with {}", cmd, output.status);
    }
    if output.stdout.len() < MIN_COMMAND_BYTES {
        bail!(
            "seed command \"{}\" must output at least {} bytes (got {})",
            cmd,
            MIN_COMMAND_BYTES,
            output.stdout.len()
        );
    }
    Ok(*blake3::hash(&output.stdout).as_bytes())
}

fn seed_from_process() -> [u8; SEED_LEN] {
    log::warn!("seeding from process state; output is predictable");
    let mut hasher = blake3::Hasher::new();
    for (key, value) in std::env::vars_os() {
        hasher.update(key.as_bytes());
        hasher.update(value.as_bytes());
    }
    hasher.update(&std::process::id().to_le_bytes());
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    hasher.update(&now.to_le_bytes());
    *hasher.finalize().as_bytes()
}

pub fn create_random_source(
    algorithm: RandomAlgorithm,
    seed: [u8; SEED_LEN],
) -> Box<dyn RandomSource> {
    match algorithm {
        RandomAlgorithm::ChaCha20 => Box::new(ChaCha20Source::from_seed(seed)),
        RandomAlgorithm::Arcfour => Box::new(ArcfourSource::new(&seed)),
    }
}

pub struct ChaCha20Source {
    rng: ChaCha20Rng,
}

impl ChaCha20Source {
    pub fn from_seed(seed: [u8; SEED_LEN]) -> Self {
        Self {
            rng: ChaCha20Rng::from_seed(seed),
        }
    }
}

impl RandomSource for ChaCha20Source {
    fn fill_bytes(&mut self, buffer: &mut [u8]) {
        self.rng.fill_bytes(buffer);
    }

    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }

    fn name(&self) -> &str {
        "chacha20"
    }
}

/// RC4 keystream generator.
pub struct ArcfourSource {
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl ArcfourSource {
    pub fn new(key: &[u8]) -> Self {
        let mut s = [0u8; 256];
        for (slot, value) in s.iter_mut().zip(0u8..=255) {
            *slot = value;
        }

        let mut j = 0u8;
        if !key.is_empty() {
            for i in 0..256 {
                j = j.wrapping_add(s[i]).wrapping_add(key[i % key.len()]);
                s.swap(i, j as usize);
            }
        }

        let mut source = Self { s, i: 0, j: 0 };
        for _ in 0..ARCFOUR_DISCARD {
            source.next_byte();
        }
        source
    }

    fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);
        self.s.swap(self.i as usize, self.j as usize);
        let k = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[k as usize]
    }
}

impl RandomSource for ArcfourSource {
    fn fill_bytes(&mut self, buffer: &mut [u8]) {
        for byte in buffer.iter_mut() {
            *byte = self.next_byte();
        }
    }

    fn name(&self) -> &str {
        "arcfour"
    }
}
