// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    crate::key::{self, SecretKey},
    boot_core::rsa::PubKey,
    clap::Parser,
    std::path::{Path, PathBuf},
};

mod cli;
mod config;

pub use config::Error as ConfigError;

/// Program arguments loaded from the CLI and config file, with key files
/// already read and checked.
#[derive(Debug, Clone)]
pub enum Args {
    /// Dump the update header to stdout.
    Dump {
        input: PathBuf,
        known_keys: Vec<PubKey>,
    },
    /// Prepend an unsigned header.
    Pack { input: PathBuf, output: PathBuf },
    /// Build a signed image.
    Sign {
        secret: SecretKey,
        input: PathBuf,
        output: Output,
        known_keys: Vec<PubKey>,
    },
    /// Extract the public key.
    Pubkey { secret: SecretKey, output: PathBuf },
}

#[derive(Debug, Clone)]
pub enum Output {
    InPlace,
    File(PathBuf),
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    match cli.command {
        cli::Command::Dump {
            input,
            config,
            known_key,
        } => {
            let config = load_config(config)?;
            let known_keys =
                config::reconcile(known_key, config.known_keys, Error::KnownKeysInConfigAndCli)?;
            Ok(Args::Dump {
                input,
                known_keys: read_pubkeys(known_keys.unwrap_or_default())?,
            })
        }
        cli::Command::Pack { input, output } => Ok(Args::Pack { input, output }),
        cli::Command::Sign {
            secret,
            config,
            input,
            in_place,
            output,
            known_key,
        } => {
            let config = load_config(config)?;

            // Reconcile the CLI and config arguments. Error if anything is specified both
            // on the CLI and in the config file.
            let secret = config::reconcile(secret, config.secret, Error::SecretInConfigAndCli)?
                .ok_or(Error::SecretMissing)?;
            let known_keys =
                config::reconcile(known_key, config.known_keys, Error::KnownKeysInConfigAndCli)?;

            let output = match (in_place, output) {
                (true, Some(_)) => return Err(Error::InPlaceAndOutputSpecified),
                (true, None) => Output::InPlace,
                (false, Some(path)) => Output::File(path),
                (false, None) => return Err(Error::OutputMissing),
            };
            Ok(Args::Sign {
                secret: read_secret(&secret)?,
                input,
                output,
                known_keys: read_pubkeys(known_keys.unwrap_or_default())?,
            })
        }
        cli::Command::Pubkey { secret, output } => Ok(Args::Pubkey {
            secret: read_secret(&secret)?,
            output,
        }),
    }
}

fn load_config(path: Option<PathBuf>) -> Result<config::Config, Error> {
    Ok(path
        .map(|c| config::Config::load(&c))
        .transpose()?
        .unwrap_or_default())
}

fn read_secret(path: &Path) -> Result<SecretKey, Error> {
    let bytes = std::fs::read(path).map_err(Error::ReadSecretFile)?;
    SecretKey::from_pem(&bytes).map_err(Error::InvalidSecretKey)
}

fn read_pubkeys(paths: Vec<PathBuf>) -> Result<Vec<PubKey>, Error> {
    paths
        .into_iter()
        .map(|path| {
            let bytes = std::fs::read(&path).map_err(|e| Error::ReadKnownKeyFile(path.clone(), e))?;
            key::parse_pubkey(&bytes).map_err(|e| Error::InvalidKnownKey(path, e))
        })
        .collect()
}

#[derive(Debug)]
pub enum Error {
    Cli(clap::Error),
    Config(ConfigError),
    InPlaceAndOutputSpecified,
    InvalidKnownKey(PathBuf, key::Error),
    InvalidSecretKey(key::Error),
    KnownKeysInConfigAndCli,
    OutputMissing,
    ReadKnownKeyFile(PathBuf, std::io::Error),
    ReadSecretFile(std::io::Error),
    SecretInConfigAndCli,
    SecretMissing,
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Cli(e) => write!(f, "{}", e.render().ansi()),
            Error::Config(e) => write!(f, "config error: {e}"),
            Error::InPlaceAndOutputSpecified => {
                write!(f, "cannot specify both --in-place and --output (-o)")
            }
            Error::InvalidKnownKey(path, e) => {
                write!(f, r#"invalid known key "{}": {e}"#, path.display())
            }
            Error::InvalidSecretKey(e) => write!(f, "invalid secret key: {e}"),
            Error::KnownKeysInConfigAndCli => {
                write!(f, "known keys specified in both config and cli")
            }
            Error::OutputMissing => write!(f, "either --in-place or --output (-o) is required"),
            Error::ReadKnownKeyFile(path, e) => {
                write!(f, r#"failed to read known key "{}": {e}"#, path.display())
            }
            Error::ReadSecretFile(e) => write!(f, "failed to read secret key file: {e}"),
            Error::SecretInConfigAndCli => write!(f, "secret specified in both config and cli"),
            Error::SecretMissing => write!(f, "user did not specify a secret key"),
        }
    }
}

impl std::error::Error for Error {}
