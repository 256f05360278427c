// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Dump the update header to stdout and check the signature.
    Dump {
        /// The update image.
        #[clap(short, long)]
        input: PathBuf,
        /// Path to config file.
        #[clap(long, short)]
        config: Option<PathBuf>,
        /// Public key files to check the signature against, separated by
        /// commas.
        #[clap(long, value_delimiter = ',')]
        known_key: Option<Vec<PathBuf>>,
    },
    /// Prepend an unsigned update header to a payload.
    Pack {
        /// The payload.
        #[clap(short, long)]
        input: PathBuf,
        /// Path to write the packed image.
        #[clap(short, long)]
        output: PathBuf,
    },
    /// Build a signed update image from a payload.
    Sign {
        /// Path to the PEM secret key (PKCS#8 or PKCS#1).
        #[clap(long)]
        secret: Option<PathBuf>,
        /// Path to config file.
        #[clap(long, short)]
        config: Option<PathBuf>,
        /// The payload.
        #[clap(short, long)]
        input: PathBuf,
        /// Replace the payload file with the signed image.
        #[clap(long)]
        in_place: bool,
        /// Path to write the signed image.
        #[clap(short, long)]
        output: Option<PathBuf>,
        /// Public key files the signing key must be one of, separated by
        /// commas.
        #[clap(long, value_delimiter = ',')]
        known_key: Option<Vec<PathBuf>>,
    },
    /// Write the public key of a secret key file.
    Pubkey {
        /// Path to the PEM secret key (PKCS#8 or PKCS#1).
        #[clap(long)]
        secret: PathBuf,
        /// Path to write the modulus, 256 bytes little-endian.
        #[clap(short, long)]
        output: PathBuf,
    },
}
