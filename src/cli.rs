use std::path::PathBuf;

use structopt::StructOpt;

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Upload the loader, bitstream and firmware to an attached device
    Upload,
    /// Validate the firmware images without touching a device
    Verify,
    /// List attached devices
    List,
}

#[derive(StructOpt, Debug)]
#[structopt(about = "Firmware loader for the Emagic emi 2|6")]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,

    /// The directory containing loader.fw, bitstream.fw and firmware.fw
    #[structopt(
        env = "EMI26_FIRMWARE_DIR",
        short = "d",
        long = "firmware-dir",
        default_value = ".",
        parse(from_os_str)
    )]
    pub firmware_dir: PathBuf,
    /// The timeout for each control transfer, in milliseconds
    #[structopt(
        env = "EMI26_TIMEOUT_MS",
        short = "t",
        long = "timeout",
        default_value = "1000"
    )]
    pub timeout: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_parse_upload_options() {
        let opts = Opts::from_iter_safe(&["emi26-cli", "-d", "/lib/firmware/emi26", "upload"])
            .unwrap();

        assert!(matches!(opts.command, Command::Upload));
        assert_eq!(opts.firmware_dir, PathBuf::from("/lib/firmware/emi26"));
    }

    #[test]
    fn it_should_parse_the_timeout() {
        let opts = Opts::from_iter_safe(&["emi26-cli", "--timeout", "250", "verify"]).unwrap();

        assert!(matches!(opts.command, Command::Verify));
        assert_eq!(opts.timeout, 250);
    }

    #[test]
    fn it_should_require_a_command() {
        assert!(Opts::from_iter_safe(&["emi26-cli"]).is_err());
    }
}
