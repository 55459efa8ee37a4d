use std::fs::File;
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use cart64_core::{
    Bank, Cic, DeviceSession, FtdiTransport, SessionConfig, SessionEvent, SessionObserver,
    TransferDirection, list_ftdi_devices,
};
use clap::{CommandFactory, Parser};
use tracing::error;

const BANKS: &[(&str, Bank)] = &[
    ("rom", Bank::CartRom),
    ("sram256", Bank::Sram256),
    ("sram768", Bank::Sram768),
    ("flash", Bank::FlashRam1M),
    ("pokemon", Bank::FlashPkm1M),
    ("eeprom", Bank::Eeprom16),
];

const CIC_DESCRIPTIONS: &[(Cic, &str)] = &[
    (Cic::Cic6101, "Star Fox"),
    (Cic::Cic6102, "most NTSC games"),
    (Cic::Cic7101, "most PAL games"),
    (Cic::Cic7102, "Lylat Wars"),
    (Cic::CicX103, "covers 6103 and 7103"),
    (Cic::CicX105, "covers 6105 and 7105"),
    (Cic::CicX106, "covers 6106 and 7106"),
    (Cic::Cic5101, "Aleck64"),
];

const AFTER_HELP: &str = "\
CIC is one of:
  6101 (Star Fox)
  6102 (most NTSC games)
  7101 (most PAL games)
  7102 (Lylat Wars)
   103 (covers 6103 and 7103)
   105 (covers 6105 and 7105)
   106 (covers 6106 and 7106)
  5101 (Aleck64)
CIC must be set correctly for the game to work.

BANK is one of: rom, sram256, sram768, flash, pokemon, eeprom
 - \"pokemon\" is special-case flash for Pokemon Stadium 2
 - \"sram768\" is only used by Dezaemon 3D

FILE is a file path, or \"-\" for stdin (load) / stdout (dump).";

#[derive(Parser, Debug)]
#[command(author, version, about = "64drive USB tool (Pure Rust)", after_help = AFTER_HELP)]
struct Args {
    /// Memory bank for up/downloads (name or numeric id)
    #[arg(short, long, default_value = "rom")]
    bank: String,

    /// Set CIC type (HW2 RevB only)
    #[arg(short, long, value_name = "CIC")]
    cic: Option<u32>,

    /// Download (dump) from cartridge into FILE
    #[arg(short, long, value_name = "FILE")]
    dump: Option<String>,

    /// Show device info (version)
    #[arg(short, long)]
    info: bool,

    /// Upload (load) FILE to cartridge
    #[arg(short, long, value_name = "FILE")]
    load: Option<String>,

    /// List FTDI devices
    #[arg(short = 'L', long)]
    list_devices: bool,

    /// Upload to / download from the given bank offset
    #[arg(short, long, default_value = "0", value_parser = parse_offset)]
    offset: u32,

    /// Be quiet (no progress indicators)
    #[arg(short, long)]
    quiet: bool,

    /// Up/download the given size (default: entire file, must be a multiple of 512)
    #[arg(short = 'z', long, value_parser = parse_size)]
    size: Option<u64>,

    /// Enable verbose logging (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Load session configuration from a TOML file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Accept decimal or 0x-prefixed hex, the way the original tool did.
fn parse_number(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).map_err(|e| e.to_string())
    } else {
        s.parse().map_err(|e: std::num::ParseIntError| e.to_string())
    }
}

fn parse_offset(s: &str) -> Result<u32, String> {
    parse_number(s).and_then(|v| u32::try_from(v).map_err(|_| "offset too large".to_string()))
}

fn parse_size(s: &str) -> Result<u64, String> {
    parse_number(s)
}

fn parse_bank(name: &str) -> Result<Bank> {
    if let Some(&(_, bank)) = BANKS.iter().find(|(n, _)| *n == name) {
        return Ok(bank);
    }
    // Numeric ids are accepted for compatibility with the Windows tool.
    name.parse::<u8>()
        .ok()
        .and_then(Bank::from_id)
        .ok_or_else(|| anyhow!("Invalid bank \"{name}\""))
}

/// Renders progress the way the original tool did, on stderr so a dump to
/// stdout stays clean.
struct ConsoleObserver {
    quiet: bool,
}

impl SessionObserver for ConsoleObserver {
    fn on_event(&self, event: &SessionEvent) {
        if self.quiet {
            return;
        }
        match event {
            SessionEvent::TransferProgress {
                direction,
                transferred,
                total,
            } => {
                let pct = if *total > 0 {
                    (*transferred * 100) / *total
                } else {
                    100
                };
                eprint!("\r * {}... {:3}%", verb(*direction), pct);
                let _ = io::stderr().flush();
            }
            SessionEvent::TransferComplete { direction, .. } => {
                eprintln!("\r * {}... Done.", verb(*direction));
            }
            _ => {}
        }
    }
}

fn verb(direction: TransferDirection) -> &'static str {
    match direction {
        TransferDirection::Upload => "Uploading",
        TransferDirection::Download => "Downloading",
    }
}

trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

fn open_source(path: &str) -> Result<Box<dyn ReadSeek>> {
    if path == "-" {
        // stdin is not seekable; buffer it so size derivation works.
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
        Ok(Box::new(Cursor::new(data)))
    } else {
        let file = File::open(path).with_context(|| format!("Failed opening \"{path}\""))?;
        Ok(Box::new(file))
    }
}

fn open_sink(path: &str) -> Result<Box<dyn Write>> {
    if path == "-" {
        Ok(Box::new(io::stdout()))
    } else {
        let file = File::create(path).with_context(|| format!("Failed opening \"{path}\""))?;
        Ok(Box::new(file))
    }
}

struct App {
    config: SessionConfig,
    observer: Arc<ConsoleObserver>,
    session: Option<DeviceSession<FtdiTransport, ConsoleObserver>>,
}

impl App {
    /// Open the device on first use; later operations reuse the session.
    fn session(&mut self) -> Result<&mut DeviceSession<FtdiTransport, ConsoleObserver>> {
        if self.session.is_none() {
            let session = DeviceSession::open_with_observer(&self.config, self.observer.clone())
                .context("64drive device not found or not responding")?;
            self.session = Some(session);
        }
        self.session.as_mut().context("session not open")
    }
}

fn list_devices() -> Result<()> {
    let devices = list_ftdi_devices()?;
    println!(" * Found {} devices", devices.len());
    for (i, dev) in devices.iter().enumerate() {
        println!(
            " * Device {}: \"{}\", manuf \"{}\", serial \"{}\"{}",
            i,
            dev.product.as_deref().unwrap_or("?"),
            dev.manufacturer.as_deref().unwrap_or("?"),
            dev.serial.as_deref().unwrap_or("?"),
            match dev.hw_version {
                Some(hw) => format!(" [64drive HW{hw}]"),
                None => String::new(),
            }
        );
    }
    Ok(())
}

fn run(args: Args) -> Result<()> {
    if !(args.info || args.list_devices || args.cic.is_some() || args.load.is_some() || args.dump.is_some()) {
        Args::command().print_help()?;
        return Ok(());
    }

    if args.list_devices {
        list_devices()?;
    }

    let mut config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)?,
        None => SessionConfig::default(),
    };
    // "-" as a dump target would interleave progress with payload on the
    // same terminal, so it implies quiet, as does -q.
    config.quiet |= args.quiet || args.dump.as_deref() == Some("-");

    let mut app = App {
        observer: Arc::new(ConsoleObserver {
            quiet: config.quiet,
        }),
        config,
        session: None,
    };

    if args.info {
        let session = app.session()?;
        let version = session.version_info().context("handshake did not run")?;
        println!("Device version: {version}");
    }

    if let Some(number) = args.cic {
        let cic = Cic::from_number(number).ok_or_else(|| anyhow!("Invalid CIC {number}"))?;
        let description = CIC_DESCRIPTIONS
            .iter()
            .find(|(c, _)| *c == cic)
            .map(|(_, d)| *d)
            .unwrap_or("");
        app.session()?.set_cic(cic)?;
        println!(" * Selected CIC {cic} ({description})");
    }

    let bank = parse_bank(&args.bank)?;

    if let Some(path) = &args.load {
        let mut source = open_source(path)?;
        app.session()?
            .upload(&mut source, args.size, args.offset, bank)?;
    }

    if let Some(path) = &args.dump {
        let mut sink = open_sink(path)?;
        app.session()?
            .download(&mut sink, args.size, args.offset, bank)?;
    }

    Ok(())
}

fn main() {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}
