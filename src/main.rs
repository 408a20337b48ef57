//! cryptmirror - Transparent encrypting passthrough filesystem
//!
//! Usage:
//!   cryptmirror <passphrase> <mirror_directory> <mount_point>
//!
//! Pass `-` as the passphrase to be prompted for it instead.

use anyhow::Context;
use clap::Parser;
use cryptmirror::{
    config::Config,
    fs::{mount_options, CryptMirror, CryptMirrorFs},
    Error, MountContext,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "cryptmirror")]
#[command(author = "cryptmirror Contributors")]
#[command(version)]
#[command(about = "Mount a directory through a transparent encryption layer")]
struct Cli {
    /// Passphrase used to derive the file key ("-" to prompt)
    passphrase: String,

    /// Directory holding the encrypted files
    mirror_directory: PathBuf,

    /// Where to mount the plaintext view
    mount_point: PathBuf,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Truncate the passphrase to this many bytes
    #[arg(long, conflicts_with = "no_passphrase_limit")]
    max_passphrase_len: Option<usize>,

    /// Use the whole passphrase regardless of length
    #[arg(long)]
    no_passphrase_limit: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli) {
        error!("Error: {:#}", e);
        if let Some(Error::Argument(msg)) = e.downcast_ref::<Error>() {
            eprintln!("cryptmirror: {}", msg);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {:?}", config_path))?;

    if cli.allow_other {
        config.mount.allow_other = true;
    }
    if cli.no_passphrase_limit {
        config.encryption.max_passphrase_len = None;
    } else if let Some(len) = cli.max_passphrase_len {
        config.encryption.max_passphrase_len = Some(len);
    }
    config.validate()?;

    let passphrase = if cli.passphrase == "-" {
        Zeroizing::new(
            rpassword::prompt_password("Enter passphrase: ")
                .map_err(|e| Error::Argument(format!("cannot read passphrase: {}", e)))?,
        )
    } else {
        Zeroizing::new(cli.passphrase)
    };
    if passphrase.is_empty() {
        return Err(Error::Argument("passphrase must not be empty".to_string()).into());
    }

    let ctx = MountContext::new(passphrase.as_bytes(), &cli.mirror_directory, &config)?;
    drop(passphrase);
    info!("Mirror directory: {:?}", ctx.mirror_root());

    if !cli.mount_point.is_dir() {
        return Err(Error::Argument(format!(
            "mount point {:?} is not a directory",
            cli.mount_point
        ))
        .into());
    }
    info!("Mount point: {:?}", cli.mount_point);

    // Host files get exactly the modes callers ask for.
    nix::sys::stat::umask(nix::sys::stat::Mode::empty());

    let fs = CryptMirrorFs::new(CryptMirror::new(Arc::new(ctx)));
    let options = mount_options(&config.mount);
    fuser::mount2(fs, &cli.mount_point, &options)
        .with_context(|| format!("mounting at {:?}", cli.mount_point))?;

    info!("Unmounted {:?}", cli.mount_point);
    Ok(())
}
