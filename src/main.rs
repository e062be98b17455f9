use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use structopt::StructOpt;

use emi26::{usb, FirmwareImageSet, ImageRole, UsbDevice, Uploader};

mod cli;

/// Loads and validates the firmware images in `dir`
fn load_images(dir: &Path) -> Result<FirmwareImageSet, anyhow::Error> {
    FirmwareImageSet::load_from_dir(dir).with_context(|| {
        format!(
            "Failed to load firmware files from directory '{}'",
            dir.display()
        )
    })
}

fn upload(dir: &Path, timeout: Duration) -> Result<(), anyhow::Error> {
    let images = load_images(dir)?;

    let context = rusb::Context::new().with_context(|| "Could not initialize libusb")?;
    let mut device = UsbDevice::open_first(&context).with_context(|| "Could not open device")?;
    device.set_timeout(timeout);

    let session = Uploader::new(&mut device, &images)
        .upload()
        .with_context(|| "Failed to upload firmware")?;

    println!(
        "Uploaded {} bytes in {} phases",
        session.bytes_transferred(),
        session.visited().len()
    );

    Ok(())
}

fn verify(dir: &Path) -> Result<(), anyhow::Error> {
    let images = load_images(dir)?;

    for role in &[ImageRole::Loader, ImageRole::Bitstream, ImageRole::Firmware] {
        let image = images.get(*role);
        let records = image.records();

        println!(
            "{:<13} {:>8} bytes, {:>5} records, {:>8} bytes of data",
            role.file_name(),
            image.raw().len(),
            records.len(),
            records.payload_len()
        );
    }

    let (internal, external) = images
        .split_firmware(emi26::MAX_INTERNAL_ADDRESS)
        .with_context(|| format!("{} cannot be uploaded", ImageRole::Firmware))?;

    println!(
        "{} has {} internal and {} external records",
        ImageRole::Firmware,
        internal.len(),
        external.len()
    );

    Ok(())
}

fn list() -> Result<(), anyhow::Error> {
    let context = rusb::Context::new().with_context(|| "Could not initialize libusb")?;
    let devices = usb::list_devices(&context)?;

    if devices.is_empty() {
        println!("No devices found");
    }

    for device in devices {
        println!(
            "Bus {:03} Device {:03}: ID {:04x}:{:04x}",
            device.bus_number(),
            device.address(),
            usb::EMAGIC_VID,
            device.product_id()
        );
    }

    Ok(())
}

fn main() -> Result<(), anyhow::Error> {
    use cli::Command;

    // Create a logger with a timestamp that logs everything at Info level or above, unless
    // RUST_LOG says otherwise
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned()))
        .init();

    // Parse the command-line arguments
    let opts = cli::Opts::from_args();

    match opts.command {
        Command::Upload => upload(&opts.firmware_dir, Duration::from_millis(opts.timeout))?,
        Command::Verify => verify(&opts.firmware_dir)?,
        Command::List => list()?,
    }

    Ok(())
}
