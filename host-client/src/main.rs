// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use clap::{Parser, Subcommand};
use host_client::Client;
use host_protocol::MAX_TRANSFER;
use std::error::Error;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
struct Args {
    #[arg(short, long, default_value_t = String::from("/dev/ttyUSB0"))]
    port: String,
    #[arg(short, long, default_value_t = consts::UART_BAUDRATE)]
    baudrate: u32,
    /// Serial read timeout in milliseconds. Erasing the staging area and
    /// verifying an update both happen before the device replies.
    #[arg(short, long, default_value_t = 10_000)]
    timeout: u64,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List available serial ports
    ListPorts,
    /// Print the protocol version, supported commands and region sizes
    Info,
    /// Upload a signed update image and have the bootloader verify it
    Upload {
        image: PathBuf,
        /// Read every chunk back before finishing the update
        #[arg(long)]
        readback: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    pretty_env_logger::init();

    let args = Args::parse();

    if let Command::ListPorts = args.cmd {
        let ports = serialport::available_ports()?;
        println!("List of available serial ports:");
        for port in ports {
            println!("- {}", port.port_name);
        }
        return Ok(());
    }

    let port = serialport::new(&args.port, args.baudrate)
        .timeout(Duration::from_millis(args.timeout))
        .open()?;
    let mut client = Client::new(port);

    match args.cmd {
        Command::ListPorts => {}
        Command::Info => {
            let info = client.get()?;
            println!("Protocol version: {:#04x}", info.version);
            println!("Commands: {:02x?}", info.commands);
            let sizes = client.get_sizes()?;
            println!("Kernel:     {:#x}", sizes.kernel);
            println!("Shared:     {:#x}", sizes.shared);
            println!("Data store: {:#x}", sizes.data_store);
        }
        Command::Upload { image, readback } => {
            let image = std::fs::read(image)?;
            let sizes = client.get_sizes()?;
            if image.len() > sizes.shared as usize {
                return Err(format!(
                    "image of {} bytes does not fit the {} byte staging area",
                    image.len(),
                    sizes.shared
                )
                .into());
            }
            let total = image.len();
            let progress = |done: usize| {
                print!("\rWritten {done}/{total} bytes");
                let _ = std::io::stdout().flush();
            };
            if readback {
                upload_with_readback(&mut client, &image, progress)?;
            } else {
                client.upload(&image, progress)?;
            }
            println!("\nUpdate verified, the bootloader will apply it");
        }
    }
    Ok(())
}

fn upload_with_readback<P: Read + Write>(
    client: &mut Client<P>,
    image: &[u8],
    mut progress: impl FnMut(usize),
) -> Result<(), Box<dyn Error>> {
    client.erase()?;
    let mut buf = [0u8; MAX_TRANSFER];
    for (i, chunk) in image.chunks(MAX_TRANSFER).enumerate() {
        let offset = (i * MAX_TRANSFER) as u32;
        client.write(offset, chunk)?;
        let back = &mut buf[..chunk.len()];
        client.read(offset, back)?;
        if back != chunk {
            return Err(format!("readback mismatch at offset {offset:#x}").into());
        }
        progress(offset as usize + chunk.len());
    }
    client.update_finished()?;
    Ok(())
}
