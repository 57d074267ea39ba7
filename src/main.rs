use anyhow::{bail, Context};
use clap::{Arg, ArgAction, ArgMatches, Command};
use gutwipe::config::{self, ConfigFile};
use gutwipe::patterns::random::{RandomAlgorithm, SeedMethod, SEED_PIPE_ENV};
use gutwipe::storage::TargetKind;
use gutwipe::{logging, CancelReason, CancelToken, ExitStatus, WipeConfig, WipeSession};
use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};

const CONFIRMATION_ATTEMPTS: usize = 5;

#[tokio::main]
async fn main() {
    let status = run().await;
    std::process::exit(status.code());
}

fn build_cli() -> Command {
    Command::new("gutwipe")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Securely erase files and block devices with Gutmann overwrite passes")
        .arg(
            Arg::new("files")
                .help("Files, devices or directories to wipe")
                .num_args(1..)
                .required_unless_present("config")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(flag("force", 'f', "Don't ask for confirmation"))
        .arg(flag("chmod", 'c', "Change permissions of files and directories that block wiping"))
        .arg(flag("recurse", 'r', "Recurse into directories"))
        .arg(flag("dereference", 'D', "Follow symlinks and wipe their targets"))
        .arg(flag("quick", 'q', "Quick mode: a few random passes instead of 35"))
        .arg(
            Arg::new("quick-passes")
                .short('Q')
                .long("quick-passes")
                .value_name("N")
                .help("Number of passes in quick mode")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(flag("verbose", 'i', "Informational (verbose) mode"))
        .arg(flag("silent", 's', "Silent mode, only errors are reported"))
        .arg(flag("keep", 'k', "Keep files: overwrite but do not remove"))
        .arg(flag("no-filename-wipe", 'F', "Do not rename files before removing them"))
        .arg(flag("no-filesize-wipe", 'Z', "Do not obscure the file size by truncation"))
        .arg(flag("exact", 'e', "Wipe the exact file size, not rounded up to the block size"))
        .arg(
            Arg::new("rename-tries")
                .short('T')
                .long("rename-tries")
                .value_name("N")
                .help("Maximum tries to find a free random filename")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("rename-passes")
                .short('P')
                .long("rename-passes")
                .value_name("N")
                .help("Number of rename passes before removal")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("buffer-log2")
                .short('b')
                .long("buffer-log2")
                .value_name("N")
                .help("Use a buffer of 2^N bytes")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_name("SIZE")
                .help("Start wiping at this offset (K, M, G and b suffixes)"),
        )
        .arg(
            Arg::new("length")
                .short('l')
                .long("length")
                .value_name("SIZE")
                .help("Wipe this many bytes instead of the probed size"),
        )
        .arg(
            Arg::new("skip-passes")
                .short('X')
                .long("skip-passes")
                .value_name("N")
                .help("Skip the first N passes, to resume an interrupted wipe")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("seed-method")
                .short('S')
                .long("seed-method")
                .value_name("METHOD")
                .help("Seed from a random device (r), a command (c) or the process state (p)")
                .value_parser(["r", "c", "p"]),
        )
        .arg(
            Arg::new("seed-source")
                .short('R')
                .long("seed-source")
                .value_name("PATH|CMD")
                .help("Random device, or the seed command with -S c"),
        )
        .arg(
            Arg::new("algorithm")
                .short('M')
                .long("algorithm")
                .value_name("ALGO")
                .help("Generator: chacha20 (c) or arcfour (a)"),
        )
        .arg(
            Arg::new("random-buffers")
                .long("random-buffers")
                .value_name("N")
                .help("Number of pre-filled random buffers")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("unbiased-shuffle")
                .long("unbiased-shuffle")
                .help("Draw the pass order without modulo bias")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("abort-on-error")
                .long("abort-on-error")
                .help("Stop at the first file that cannot be wiped")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .help("Create default config file and exit")
                .action(ArgAction::SetTrue),
        )
}

fn flag(name: &'static str, short: char, help: &'static str) -> Arg {
    Arg::new(name)
        .short(short)
        .long(name)
        .help(help)
        .action(ArgAction::SetTrue)
}

/// Layers command-line flags over the config file.
fn wipe_config_from(matches: &ArgMatches, file: &ConfigFile) -> anyhow::Result<WipeConfig> {
    let mut config = config::base_wipe_config(file)?;

    config.force = matches.get_flag("force");
    config.allow_chmod = matches.get_flag("chmod");
    config.recurse = matches.get_flag("recurse");
    config.dereference_symlinks = matches.get_flag("dereference");
    config.quick = matches.get_flag("quick");
    config.verbose = matches.get_flag("verbose");
    config.silent = matches.get_flag("silent");
    config.no_remove = matches.get_flag("keep");
    config.skip_filename_wipe = matches.get_flag("no-filename-wipe");
    config.skip_filesize_wipe = matches.get_flag("no-filesize-wipe");
    config.abort_on_error = matches.get_flag("abort-on-error");
    config.exact_size |= matches.get_flag("exact");
    config.unbiased_shuffle |= matches.get_flag("unbiased-shuffle");

    if let Some(&n) = matches.get_one::<usize>("quick-passes") {
        config.quick_passes = n;
        config.quick_passes_set = true;
    }
    if let Some(&n) = matches.get_one::<usize>("rename-tries") {
        config.rename_tries = n;
    }
    if let Some(&n) = matches.get_one::<usize>("rename-passes") {
        config.rename_passes = n;
    }
    if let Some(&n) = matches.get_one::<u32>("buffer-log2") {
        config.buffer_size_log2 = n;
    }
    if let Some(&n) = matches.get_one::<usize>("skip-passes") {
        config.skip_passes = n;
    }
    if let Some(&n) = matches.get_one::<usize>("random-buffers") {
        config.random_buffers = n;
    }
    if let Some(text) = matches.get_one::<String>("offset") {
        config.wipe_offset = config::parse_size(text).context("bad offset")?;
    }
    if let Some(text) = matches.get_one::<String>("length") {
        config.wipe_length = Some(config::parse_size(text).context("bad length")?);
    }
    if let Some(name) = matches.get_one::<String>("algorithm") {
        config.random_algorithm = RandomAlgorithm::parse(name)?;
    }

    let source = matches.get_one::<String>("seed-source");
    match matches.get_one::<String>("seed-method").map(String::as_str) {
        Some("p") => config.seed_method = Some(SeedMethod::Process),
        Some("c") => {
            let command = match source {
                Some(cmd) => cmd.clone(),
                None => std::env::var(SEED_PIPE_ENV)
                    .ok()
                    .filter(|cmd| !cmd.trim().is_empty())
                    .or_else(|| file.seeding.command.clone())
                    .context("seed method c needs a command (-R or WIPE_SEEDPIPE)")?,
            };
            config.seed_method = Some(SeedMethod::Command(command));
        }
        Some("r") => {
            let device = source
                .map(PathBuf::from)
                .unwrap_or_else(|| config.random_device.clone());
            config.seed_method = Some(SeedMethod::Device(device));
        }
        Some(other) => bail!("unknown seed method '{}'", other),
        None => {
            if let Some(device) = source {
                config.random_device = PathBuf::from(device);
                config.seed_method = Some(SeedMethod::Device(config.random_device.clone()));
            }
        }
    }

    Ok(config)
}

/// What the command line names, by kind, for the confirmation prompt.
#[derive(Debug, Default, PartialEq, Eq)]
struct Census {
    regular: usize,
    dirs: usize,
    symlinks: usize,
    specials: usize,
}

impl Census {
    fn take(paths: &[PathBuf]) -> Result<Self, String> {
        let mut census = Census::default();
        for path in paths {
            let metadata = std::fs::symlink_metadata(path)
                .map_err(|e| format!("{}: fatal: could not lstat: {}", path.display(), e))?;
            match TargetKind::from_file_type(metadata.file_type()) {
                TargetKind::Regular => census.regular += 1,
                TargetKind::Directory => census.dirs += 1,
                TargetKind::Symlink => census.symlinks += 1,
                _ => census.specials += 1,
            }
        }
        Ok(census)
    }

    fn total(&self) -> usize {
        self.regular + self.dirs + self.symlinks + self.specials
    }

    fn describe(&self, recurse: bool, dereference: bool) -> String {
        let mut parts = Vec::new();
        if self.regular > 0 {
            parts.push(format!(
                "{} regular file{}",
                self.regular,
                if self.regular == 1 { "" } else { "s" }
            ));
        }
        if self.dirs > 0 && recurse {
            parts.push(format!(
                "{} director{}",
                self.dirs,
                if self.dirs == 1 { "y" } else { "ies" }
            ));
        }
        if self.symlinks > 0 {
            let one = self.symlinks == 1;
            let how = match (dereference, one) {
                (true, true) => " and its target",
                (true, false) => " and their targets",
                (false, true) => " (without following the link)",
                (false, false) => " (without following the links)",
            };
            parts.push(format!(
                "{} symlink{}{}",
                self.symlinks,
                if one { "" } else { "s" },
                how
            ));
        }
        if self.specials > 0 {
            parts.push(format!(
                "{} special file{}",
                self.specials,
                if self.specials == 1 { "" } else { "s" }
            ));
        }

        match parts.split_last() {
            None => String::new(),
            Some((last, [])) => last.clone(),
            Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
        }
    }
}

fn confirm(census: &Census, config: &WipeConfig) -> Result<(), ExitStatus> {
    if !std::io::stderr().is_terminal() {
        if !config.silent {
            eprintln!("Please use -f option in non-interactive mode.");
        }
        return Err(ExitStatus::InvocationError);
    }

    let description = census.describe(config.recurse, config.dereference_symlinks);
    let stdin = std::io::stdin();
    for _ in 0..CONFIRMATION_ATTEMPTS {
        eprint!("Okay to WIPE {} ? (Yes/No) ", description);
        let _ = std::io::stderr().flush();

        let mut answer = String::new();
        let read = stdin.lock().read_line(&mut answer);
        let answer = answer.trim();
        if matches!(read, Ok(0) | Err(_)) || answer.eq_ignore_ascii_case("no") {
            if !config.silent {
                eprintln!("Aborted.");
            }
            return Err(ExitStatus::UserAbort);
        }
        if answer.eq_ignore_ascii_case("yes") {
            return Ok(());
        }
        eprintln!("Please answer \"Yes\" or \"No\".");
    }

    eprintln!(
        "User refused to answer correctly for {} queries, aborting.",
        CONFIRMATION_ATTEMPTS
    );
    Err(ExitStatus::InvocationError)
}

/// First SIGINT/SIGTERM trips the token; a second one exits on the spot.
fn watch_signals(cancel: CancelToken) {
    tokio::spawn(async move {
        let (mut interrupt, mut terminate) =
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(i), Ok(t)) => (i, t),
                (Err(e), _) | (_, Err(e)) => {
                    log::warn!("could not install signal handlers: {}", e);
                    return;
                }
            };

        loop {
            let reason = tokio::select! {
                _ = interrupt.recv() => CancelReason::Interrupt,
                _ = terminate.recv() => CancelReason::Terminate,
            };
            if cancel.is_cancelled() {
                eprintln!("\n*** Second signal, exiting immediately");
                let status = match reason {
                    CancelReason::Interrupt => ExitStatus::UserAbort,
                    CancelReason::Terminate => ExitStatus::Failure,
                };
                std::process::exit(status.code());
            }
            log::info!("{:?} received, stopping after the current write", reason);
            cancel.cancel(reason);
        }
    });
}

async fn run() -> ExitStatus {
    let matches = match build_cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                    ExitStatus::Success
                }
                _ => ExitStatus::InvocationError,
            };
        }
    };

    if matches.get_flag("config") {
        let created = config::get_config_path()
            .and_then(|path| config::create_default_config(&path).map(|_| path));
        return match created {
            Ok(path) => {
                println!("Default configuration created at: {}", path.display());
                ExitStatus::Success
            }
            Err(e) => {
                eprintln!("gutwipe: {:#}", e);
                ExitStatus::Failure
            }
        };
    }

    let config_file = config::load_config().unwrap_or_else(|e| {
        eprintln!("Warning: Could not load config file: {:#}", e);
        eprintln!("Using default configuration");
        ConfigFile::default()
    });

    let config = match wipe_config_from(&matches, &config_file).and_then(|c| {
        c.validate()?;
        Ok(c)
    }) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("gutwipe: {:#}", e);
            return ExitStatus::InvocationError;
        }
    };
    logging::init(config.verbose, config.silent);

    let files: Vec<PathBuf> = matches
        .get_many::<PathBuf>("files")
        .unwrap_or_default()
        .cloned()
        .collect();

    let census = match Census::take(&files) {
        Ok(census) => census,
        Err(message) => {
            eprintln!("{}", message);
            return ExitStatus::Failure;
        }
    };
    if !config.recurse && census.dirs > 0 {
        if census.total() == census.dirs {
            eprintln!("Use -r option to wipe directories");
            return ExitStatus::Failure;
        }
        if !config.silent {
            eprintln!(
                "Warning - will skip {} director{}",
                census.dirs,
                if census.dirs > 1 { "ies" } else { "y" }
            );
        }
    }

    if !config.force {
        if let Err(status) = confirm(&census, &config) {
            return status;
        }
    }

    let cancel = CancelToken::new();
    watch_signals(cancel.clone());

    let silent = config.silent;
    let dereference = config.dereference_symlinks;
    let worker_cancel = cancel.clone();
    let outcome = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let mut session = WipeSession::open(config, worker_cancel)?;
        let status = session.wipe_all(&files);
        Ok((status, session.close()))
    })
    .await;

    let (status, stats) = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            eprintln!("gutwipe: {:#}", e);
            return ExitStatus::Failure;
        }
        Err(e) => {
            eprintln!("gutwipe: wipe task failed: {}", e);
            return ExitStatus::Failure;
        }
    };

    if cancel.is_cancelled() && !silent {
        eprintln!("*** Interrupted by signal");
    }
    if !silent {
        eprint!("Syncing...");
        let _ = std::io::stderr().flush();
    }
    nix::unistd::sync();
    if !silent {
        eprintln!(" done.");
        println!("{}", stats.summary(dereference));
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<WipeConfig> {
        let matches = build_cli().try_get_matches_from(args)?;
        wipe_config_from(&matches, &ConfigFile::default())
    }

    #[test]
    fn test_cli_flags_map_to_config() -> anyhow::Result<()> {
        let config = parse(&[
            "gutwipe", "-q", "-Q", "2", "-l", "1K", "-o", "1b", "-kF", "-T", "3", "-P", "2", "f",
        ])?;
        assert!(config.quick && config.quick_passes_set);
        assert_eq!(config.quick_passes, 2);
        assert_eq!(config.wipe_length, Some(1024));
        assert_eq!(config.wipe_offset, 512);
        assert!(config.no_remove && config.skip_filename_wipe);
        assert_eq!((config.rename_tries, config.rename_passes), (3, 2));
        assert!(config.validate().is_ok());
        Ok(())
    }

    #[test]
    fn test_seed_options() -> anyhow::Result<()> {
        assert_eq!(parse(&["gutwipe", "-S", "p", "f"])?.seed_method, Some(SeedMethod::Process));
        assert_eq!(
            parse(&["gutwipe", "-R", "/dev/random", "f"])?.seed_method,
            Some(SeedMethod::Device(PathBuf::from("/dev/random")))
        );
        assert_eq!(
            parse(&["gutwipe", "-S", "c", "-R", "cat /proc/interrupts", "f"])?.seed_method,
            Some(SeedMethod::Command("cat /proc/interrupts".into()))
        );
        assert_eq!(
            parse(&["gutwipe", "-M", "a", "f"])?.random_algorithm,
            RandomAlgorithm::Arcfour
        );
        assert!(parse(&["gutwipe", "-M", "x", "f"]).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_invocations_fail_validation() -> anyhow::Result<()> {
        assert!(parse(&["gutwipe", "-Q", "2", "f"])?.validate().is_err());
        assert!(parse(&["gutwipe", "-r", "-D", "f"])?.validate().is_err());
        assert!(parse(&["gutwipe", "-b", "8", "f"])?.validate().is_err());
        assert!(parse(&["gutwipe", "-l", "12X", "f"]).is_err());
        assert!(build_cli().try_get_matches_from(["gutwipe"]).is_err());
        Ok(())
    }

    #[test]
    fn test_census_description() {
        let census = Census {
            regular: 2,
            dirs: 1,
            symlinks: 1,
            specials: 0,
        };
        assert_eq!(
            census.describe(true, false),
            "2 regular files, 1 directory and 1 symlink (without following the link)"
        );
        assert_eq!(
            census.describe(false, true),
            "2 regular files and 1 symlink and its target"
        );
    }
}
