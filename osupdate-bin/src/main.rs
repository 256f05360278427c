// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    boot_core::{
        hash::sha256,
        header::{Marker, HEADER_SIZE},
        image::{self, ImageError, RsaSign},
        update::UpdateError,
    },
    colored::Colorize,
    rand::Rng,
    std::{
        ffi::OsString,
        io::{Read, Seek, Write},
        path::{Path, PathBuf},
    },
};

mod args;
mod key;

#[cfg(test)]
mod tests;

fn main() -> std::process::ExitCode {
    pretty_env_logger::init();
    main_args(
        std::env::args_os(),
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(1)
        }
    }
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match args::args(args)? {
        args::Args::Dump { input, known_keys } => {
            let input_buf = read_input(&input)?;
            let view = match image::parse_unverified(&input_buf) {
                Ok(view) => view,
                Err(ImageError::BadMagic) => {
                    writeln!(&mut stdout, "{}", "no header found".bold()).map_err(Error::Stdout)?;
                    return Ok(());
                }
                Err(e) => return Err(Error::Image(e)),
            };

            writeln!(
                &mut stdout,
                "{:10} {}",
                "magic".bold(),
                String::from_utf8_lossy(&view.header.magic),
            )
            .map_err(Error::Stdout)?;
            let size = view.header.size;
            let human_size = humansize::format_size(size, humansize::BINARY);
            writeln!(&mut stdout, "{:10} {human_size} ({size})", "size".bold())
                .map_err(Error::Stdout)?;
            writeln!(
                &mut stdout,
                "{:10} {} ({:#04x})",
                "marker".bold(),
                marker_name(view.header.marker()),
                view.header.marker,
            )
            .map_err(Error::Stdout)?;
            writeln!(
                &mut stdout,
                "{:10} {}",
                "key".bold(),
                hex::encode(sha256(view.key)),
            )
            .map_err(Error::Stdout)?;
            for (i, line) in view.signature.chunks(32).enumerate() {
                let label = if i == 0 { "signature" } else { "" };
                writeln!(&mut stdout, "{:10} {}", label.bold(), hex::encode(line))
                    .map_err(Error::Stdout)?;
            }
            if input_buf.len() > image::image_len(view.payload.len()) {
                log::warn!(
                    "{} trailing bytes after the image",
                    input_buf.len() - image::image_len(view.payload.len())
                );
            }

            // Without known keys, the image can only be checked against its own key block.
            let (pub_keys, checked) = if known_keys.is_empty() {
                (vec![*view.key], "embedded key only")
            } else {
                (known_keys, "known keys")
            };
            image::check_signature(&input_buf, &pub_keys).map_err(Error::Signature)?;
            writeln!(&mut stdout, "{:10} valid ({checked})", "check".bold())
                .map_err(Error::Stdout)?;
        }
        args::Args::Pack { input, output } => {
            let payload = read_input(&input)?;
            let mut out = vec![0u8; HEADER_SIZE + payload.len()];
            image::pack(&payload, &mut out).map_err(Error::Image)?;
            std::fs::write(&output, &out).map_err(Error::WriteOutputFile)?;
        }
        args::Args::Sign {
            secret,
            input: input_path,
            output,
            known_keys,
        } => {
            // Check that user is not accidentally signing with the wrong key.
            let modulus = secret.modulus();
            if !known_keys.is_empty() && !known_keys.contains(&modulus) {
                return Err(Error::UnknownSigner);
            }

            let mut input_options = std::fs::OpenOptions::new();
            input_options.read(true);
            if let args::Output::InPlace = output {
                // When working in-place, the input file will be written to.
                input_options.write(true);
            }
            let mut input = input_options
                .open(&input_path)
                .map_err(Error::OpenInputFile)?;
            let output = match output {
                args::Output::InPlace => OutputFile::InPlace(
                    // The temporary file replaces the input once it is complete.
                    tempfile::NamedTempFile::new().map_err(Error::CreateTempFile)?,
                ),
                args::Output::File(path) => {
                    let file = std::fs::OpenOptions::new()
                        // Read back after writing for the sanity check.
                        .read(true)
                        .write(true)
                        .create(true)
                        .truncate(true)
                        .open(&path)
                        .map_err(Error::OpenOutputFile)?;
                    OutputFile::File(file, path)
                }
            };

            let mut payload = Vec::new();
            input
                .read_to_end(&mut payload)
                .map_err(Error::ReadInputFile)?;
            if image::parse_unverified(&payload).is_ok() {
                return Err(Error::AlreadySealed);
            }

            let mut rng = rand::thread_rng();
            let mut sealed = vec![0u8; image::image_len(payload.len())];
            image::seal(&payload, &mut sealed, &secret, || rng.gen())
                .map_err(Error::Image)?;
            log::debug!(
                "sealed {} byte payload with key {}",
                payload.len(),
                hex::encode(&sha256(&modulus)[..8]),
            );
            output
                .file()
                .write_all(&sealed)
                .map_err(Error::WriteOutputFile)?;

            if output.is_in_place() {
                move_file(output.file(), output.path(), &input, &input_path)
                    .map_err(Error::MoveTempFile)?;
            }

            // Sanity check that the output verifies. If not, it's possible the output
            // file was being used by another process.
            output
                .file()
                .seek(std::io::SeekFrom::Start(0))
                .map_err(Error::SeekOutputFile)?;
            let mut output_buf = Vec::new();
            output
                .file()
                .read_to_end(&mut output_buf)
                .map_err(Error::ReadOutputFile)?;
            image::check_signature(&output_buf, &[modulus]).map_err(Error::CheckOutputFile)?;
        }
        args::Args::Pubkey { secret, output } => {
            std::fs::write(&output, secret.modulus()).map_err(Error::WriteOutputFile)?;
        }
    }
    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    std::fs::File::open(path)
        .map_err(Error::OpenInputFile)?
        .read_to_end(&mut buf)
        .map_err(Error::ReadInputFile)?;
    Ok(buf)
}

fn marker_name(marker: Option<Marker>) -> &'static str {
    match marker {
        Some(Marker::InProgress) => "in-progress",
        Some(Marker::Downloaded) => "downloaded",
        Some(Marker::Verified) => "verified",
        Some(Marker::Invalid) => "invalid",
        None => "unknown",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum OutputFile {
    InPlace(tempfile::NamedTempFile),
    File(std::fs::File, PathBuf),
}

impl OutputFile {
    fn file(&self) -> &std::fs::File {
        match self {
            OutputFile::InPlace(file) => file.as_file(),
            OutputFile::File(file, _) => file,
        }
    }

    fn path(&self) -> &Path {
        match self {
            OutputFile::InPlace(file) => file.path(),
            OutputFile::File(_, path) => path,
        }
    }

    fn is_in_place(&self) -> bool {
        matches!(self, OutputFile::InPlace(_))
    }
}

fn move_file(
    mut from_file: &std::fs::File,
    from_path: &Path,
    mut to_file: &std::fs::File,
    to_path: &Path,
) -> std::io::Result<()> {
    if std::fs::rename(from_path, to_path).is_err() {
        // Possibly different filesystems, copy instead.
        from_file.seek(std::io::SeekFrom::Start(0))?;
        to_file.seek(std::io::SeekFrom::Start(0))?;
        to_file.set_len(0)?;
        std::io::copy(&mut from_file, &mut to_file)?;
        std::fs::remove_file(from_path)?;
    }
    Ok(())
}

#[derive(Debug)]
enum Error {
    AlreadySealed,
    Args(args::Error),
    CheckOutputFile(UpdateError),
    CreateTempFile(std::io::Error),
    Image(ImageError),
    MoveTempFile(std::io::Error),
    OpenInputFile(std::io::Error),
    OpenOutputFile(std::io::Error),
    ReadInputFile(std::io::Error),
    ReadOutputFile(std::io::Error),
    SeekOutputFile(std::io::Error),
    Signature(UpdateError),
    Stdout(std::io::Error),
    UnknownSigner,
    WriteOutputFile(std::io::Error),
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::AlreadySealed => write!(f, "input is already an update image"),
            Error::Args(e) => write!(f, "{e}"),
            Error::CheckOutputFile(e) => write!(
                f,
                "output file does not verify after writing: {e}; is another process using it?"
            ),
            Error::CreateTempFile(e) => write!(f, "failed to create temporary file: {e}"),
            Error::Image(e) => write!(f, "{e}"),
            Error::MoveTempFile(e) => write!(f, "failed to move temporary file to output: {e}"),
            Error::OpenInputFile(e) => write!(f, "failed to open input file: {e}"),
            Error::OpenOutputFile(e) => write!(f, "failed to open output file: {e}"),
            Error::ReadInputFile(e) => write!(f, "failed to read input file: {e}"),
            Error::ReadOutputFile(e) => write!(f, "failed to read output file: {e}"),
            Error::SeekOutputFile(e) => write!(f, "failed to seek output file: {e}"),
            Error::Signature(e) => write!(f, "{e} (code {})", e.code()),
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
            Error::UnknownSigner => write!(f, "signing key is not in known keys list"),
            Error::WriteOutputFile(e) => write!(f, "failed to write to output file: {e}"),
        }
    }
}

impl std::error::Error for Error {}
