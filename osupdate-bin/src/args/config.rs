// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Optional TOML config holding key locations, so they do not have to be
//! repeated on every invocation:
//!
//! ```toml
//! secret = "/secure/osupdate.key"
//! known_keys = ["release.pub", "dev.pub"]
//! ```
//!
//! Relative paths are taken relative to the directory of the config file.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub secret: Option<PathBuf>,
    pub known_keys: Option<Vec<PathBuf>>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path).map_err(Error::Read)?;
        let mut config: Config = toml::from_str(&text).map_err(Error::Toml)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        config.secret = config.secret.map(|p| dir.join(p));
        config.known_keys = config
            .known_keys
            .map(|keys| keys.into_iter().map(|p| dir.join(p)).collect());
        Ok(config)
    }
}

/// Takes a setting from whichever of the command line and the config file
/// has it. Having it in both is the `conflict` error.
pub fn reconcile<T, E>(cli: Option<T>, config: Option<T>, conflict: E) -> Result<Option<T>, E> {
    match (cli, config) {
        (Some(_), Some(_)) => Err(conflict),
        (cli, config) => Ok(cli.or(config)),
    }
}

#[derive(Debug)]
pub enum Error {
    Read(std::io::Error),
    Toml(toml::de::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Read(e) => write!(f, "failed to read config file: {e}"),
            Error::Toml(e) => write!(f, "config file format error in TOML: {e}"),
        }
    }
}

impl std::error::Error for Error {}
