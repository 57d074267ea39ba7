use crate::patterns::random::{RandomAlgorithm, SeedMethod};
use crate::WipeConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: DefaultConfig,
    #[serde(default)]
    pub seeding: SeedConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultConfig {
    #[serde(default = "default_quick_passes")]
    pub quick_passes: usize,
    #[serde(default = "default_buffer_size_log2")]
    pub buffer_size_log2: u32,
    #[serde(default = "default_rename_tries")]
    pub rename_tries: usize,
    #[serde(default = "default_rename_passes")]
    pub rename_passes: usize,
    #[serde(default = "default_random_buffers")]
    pub random_buffers: usize,
    #[serde(default)]
    pub exact_size: bool,
    #[serde(default)]
    pub unbiased_shuffle: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedConfig {
    #[serde(default = "default_algorithm")]
    pub algorithm: RandomAlgorithm,
    /// `auto`, `device`, `command` or `process`.
    #[serde(default = "default_seed_method")]
    pub method: String,
    #[serde(default = "default_random_device")]
    pub device: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl Default for DefaultConfig {
    fn default() -> Self {
        Self {
            quick_passes: default_quick_passes(),
            buffer_size_log2: default_buffer_size_log2(),
            rename_tries: default_rename_tries(),
            rename_passes: default_rename_passes(),
            random_buffers: default_random_buffers(),
            exact_size: false,
            unbiased_shuffle: false,
        }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            method: default_seed_method(),
            device: default_random_device(),
            command: None,
        }
    }
}

fn default_quick_passes() -> usize {
    crate::DEFAULT_QUICK_PASSES
}

fn default_buffer_size_log2() -> u32 {
    crate::DEFAULT_BUFFER_LOG2
}

fn default_rename_tries() -> usize {
    crate::DEFAULT_RENAME_TRIES
}

fn default_rename_passes() -> usize {
    crate::DEFAULT_RENAME_PASSES
}

fn default_random_buffers() -> usize {
    crate::io::buffer_pool::RANDOM_BUFFERS
}

fn default_algorithm() -> RandomAlgorithm {
    RandomAlgorithm::ChaCha20
}

fn default_seed_method() -> String {
    "auto".to_string()
}

fn default_random_device() -> PathBuf {
    PathBuf::from(crate::DEFAULT_RANDOM_DEVICE)
}

impl SeedConfig {
    /// `None` leaves the choice to runtime detection.
    pub fn seed_method(&self) -> Result<Option<SeedMethod>> {
        match self.method.to_lowercase().as_str() {
            "auto" => Ok(None),
            "device" => Ok(Some(SeedMethod::Device(self.device.clone()))),
            "process" => Ok(Some(SeedMethod::Process)),
            "command" => match &self.command {
                Some(cmd) if !cmd.trim().is_empty() => Ok(Some(SeedMethod::Command(cmd.clone()))),
                _ => bail!("seed method \"command\" needs a command"),
            },
            other => bail!("unknown seed method \"{}\"", other),
        }
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        Ok(PathBuf::from(xdg_config_home)
            .join("gutwipe")
            .join("config.toml"))
    } else if let Ok(home) = std::env::var("HOME") {
        Ok(PathBuf::from(home)
            .join(".config")
            .join("gutwipe")
            .join("config.toml"))
    } else {
        Err(anyhow::anyhow!("Could not determine config directory"))
    }
}

/// Reads the config file if there is one. A missing file means defaults.
pub fn load_config() -> Result<ConfigFile> {
    let config_path = get_config_path()?;
    if config_path.exists() {
        load_config_from_path(&config_path)
    } else {
        Ok(ConfigFile::default())
    }
}

pub fn load_config_from_path(path: &Path) -> Result<ConfigFile> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

pub fn create_default_config(path: &Path) -> Result<()> {
    let default_config = ConfigFile::default();
    let config_str =
        toml::to_string_pretty(&default_config).context("Failed to serialize default config")?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
    }

    fs::write(path, config_str)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    Ok(())
}

/// Starting point for a run: built-in defaults overlaid with the file.
/// Command-line flags are applied on top by the caller.
pub fn base_wipe_config(file: &ConfigFile) -> Result<WipeConfig> {
    Ok(WipeConfig {
        quick_passes: file.defaults.quick_passes,
        buffer_size_log2: file.defaults.buffer_size_log2,
        rename_tries: file.defaults.rename_tries,
        rename_passes: file.defaults.rename_passes,
        random_buffers: file.defaults.random_buffers,
        exact_size: file.defaults.exact_size,
        unbiased_shuffle: file.defaults.unbiased_shuffle,
        random_algorithm: file.seeding.algorithm,
        random_device: file.seeding.device.clone(),
        seed_method: file.seeding.seed_method()?,
        ..WipeConfig::default()
    })
}

/// Parses a byte count such as `4096`, `10M` or `2G3M17b`.
///
/// Each term is a number with an optional suffix: `K`, `M` and `G` are
/// powers of 1024, `b` is a 512-byte block. Terms are summed.
pub fn parse_size(text: &str) -> Result<u64> {
    let text = text.trim();
    if text.is_empty() {
        bail!("empty size");
    }

    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            if chars.peek().is_some() {
                continue;
            }
        }

        if digits.is_empty() {
            bail!("invalid size \"{}\": expected a number before '{}'", text, c);
        }
        let value: u64 = digits
            .parse()
            .with_context(|| format!("invalid size \"{}\"", text))?;
        digits.clear();

        let multiplier: u64 = if c.is_ascii_digit() {
            1
        } else {
            match c {
                'K' | 'k' => 1 << 10,
                'M' | 'm' => 1 << 20,
                'G' | 'g' => 1 << 30,
                'b' => 512,
                other => bail!("invalid size \"{}\": unknown suffix '{}'", text, other),
            }
        };
        let term = value
            .checked_mul(multiplier)
            .with_context(|| format!("size \"{}\" overflows", text))?;
        total = total
            .checked_add(term)
            .with_context(|| format!("size \"{}\" overflows", text))?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_creation() -> Result<()> {
        let temp_dir = tempdir()?;
        let config_path = temp_dir.path().join("gutwipe").join("config.toml");

        create_default_config(&config_path)?;
        assert!(config_path.exists());

        let config = load_config_from_path(&config_path)?;
        assert_eq!(config.defaults.quick_passes, 4);
        assert_eq!(config.defaults.buffer_size_log2, 14);
        assert_eq!(config.seeding.algorithm, RandomAlgorithm::ChaCha20);
        assert_eq!(config.seeding.method, "auto");
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> Result<()> {
        let config: ConfigFile = toml::from_str(
            "[defaults]\nrename_passes = 3\n\n[seeding]\nalgorithm = \"arcfour\"\n",
        )?;
        assert_eq!(config.defaults.rename_passes, 3);
        assert_eq!(config.defaults.rename_tries, 10);

        let wipe = base_wipe_config(&config)?;
        assert_eq!(wipe.rename_passes, 3);
        assert_eq!(wipe.random_algorithm, RandomAlgorithm::Arcfour);
        assert!(wipe.seed_method.is_none());
        assert!(wipe.validate().is_ok());
        Ok(())
    }

    #[test]
    fn test_seed_method_selection() -> Result<()> {
        let mut seeding = SeedConfig {
            method: "command".into(),
            ..Default::default()
        };
        assert!(seeding.seed_method().is_err());

        seeding.command = Some("head -c 256 /dev/urandom".into());
        assert!(matches!(seeding.seed_method()?, Some(SeedMethod::Command(_))));

        seeding.method = "Process".into();
        assert_eq!(seeding.seed_method()?, Some(SeedMethod::Process));

        seeding.method = "carrier-pigeon".into();
        assert!(seeding.seed_method().is_err());
        Ok(())
    }

    #[test]
    fn test_size_parsing() -> Result<()> {
        assert_eq!(parse_size("4096")?, 4096);
        assert_eq!(parse_size("1K")?, 1024);
        assert_eq!(parse_size("10M")?, 10 << 20);
        assert_eq!(parse_size("2G3M17b")?, (2 << 30) + (3 << 20) + 17 * 512);
        assert_eq!(parse_size("1b1")?, 513);
        assert!(parse_size("").is_err());
        assert!(parse_size("K").is_err());
        assert!(parse_size("12X").is_err());
        assert!(parse_size("99999999999G").is_err());
        Ok(())
    }
}
