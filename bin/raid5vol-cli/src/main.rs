//! raid5vol CLI - Admin Command Line Interface
//!
//! This binary operates a single-parity volume whose devices are regular
//! files or block devices. Every command that touches volume data starts the
//! volume, runs, and stops it again, so each invocation is one mount cycle.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use raid5vol_common::{Config, VolumeStatus};
use raid5vol_storage::{FileDeviceSet, RaidVolume};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "raid5vol-cli")]
#[command(about = "raid5vol single-parity volume admin CLI")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "raid5vol.toml", env = "RAID5VOL_CONFIG")]
    config: PathBuf,

    /// Backing device paths, in device order (overrides the config file)
    #[arg(short, long = "device")]
    devices: Vec<PathBuf>,

    /// Sectors per device, footer included
    #[arg(long)]
    sectors: Option<u64>,

    /// Sector size in bytes
    #[arg(long)]
    sector_size: Option<usize>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Allocate zeroed backing files and save the configuration
    Init,
    /// Write initial metadata to every device
    Create,
    /// Start the volume and show its status
    Status,
    /// Read logical sectors
    Read {
        /// First logical sector
        #[arg(short, long, default_value_t = 0)]
        sector: u64,
        /// Number of sectors
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,
        /// Write raw bytes to this file instead of a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write logical sectors
    Write {
        /// First logical sector
        #[arg(short, long, default_value_t = 0)]
        sector: u64,
        /// Fill byte (hex), used when no input file is given
        #[arg(short, long, default_value = "00")]
        pattern: String,
        /// Number of sectors to fill with the pattern
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u64,
        /// Take the data from a file, zero-padded to whole sectors
        #[arg(short, long)]
        input: Option<PathBuf>,
    },
    /// Rebuild the failed device of a degraded volume
    Resync {
        /// Recreate missing backing files as blank devices first
        #[arg(long)]
        replace_missing: bool,
    },
    /// Check that every row's parity matches its data
    Scrub {
        /// Rewrite parity of mismatched rows
        #[arg(long)]
        repair: bool,
    },
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load config file if it exists, command line flags win
    let mut config = Config::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&mut config, &args);

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.volume.validate()?;

    match args.command {
        Commands::Init => init(&config, &args.config),
        Commands::Create => create(&config),
        Commands::Status => status(&config),
        Commands::Read {
            sector,
            count,
            output,
        } => read(&config, sector, count, output),
        Commands::Write {
            sector,
            pattern,
            count,
            input,
        } => write(&config, sector, &pattern, count, input),
        Commands::Resync { replace_missing } => resync(&config, replace_missing),
        Commands::Scrub { repair } => scrub(&config, repair),
    }
}

fn apply_overrides(config: &mut Config, args: &Args) {
    if !args.devices.is_empty() {
        config.volume.devices.clone_from(&args.devices);
    }
    if let Some(sectors) = args.sectors {
        config.volume.sectors_per_device = sectors;
    }
    if let Some(sector_size) = args.sector_size {
        config.volume.sector_size = sector_size;
    }
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
}

fn open_devices(config: &Config) -> FileDeviceSet {
    FileDeviceSet::open(
        &config.volume.devices,
        config.volume.sectors_per_device,
        config.volume.sector_size,
    )
}

/// A started volume and the device set it runs on
struct Mounted {
    volume: RaidVolume,
    devices: Arc<FileDeviceSet>,
}

impl Mounted {
    fn start(devices: FileDeviceSet) -> Self {
        let devices = Arc::new(devices);
        let mut volume = RaidVolume::new();
        volume.start(devices.clone());
        Self { volume, devices }
    }

    /// Start, or stop again and fail if the volume cannot serve I/O
    fn start_operational(devices: FileDeviceSet) -> Result<Self> {
        let mounted = Self::start(devices);
        let status = mounted.volume.status();
        if !status.is_operational() {
            mounted.stop()?;
            bail!("volume is {status}");
        }
        Ok(mounted)
    }

    fn stop(mut self) -> Result<VolumeStatus> {
        let before = self.volume.status();
        self.volume.stop();
        self.devices.sync()?;
        Ok(before)
    }
}

fn init(config: &Config, config_path: &Path) -> Result<()> {
    let volume = &config.volume;
    FileDeviceSet::create(&volume.devices, volume.sectors_per_device, volume.sector_size)?;
    info!(
        "allocated {} devices of {} bytes",
        volume.devices.len(),
        volume.device_bytes()
    );

    std::fs::write(config_path, config.to_toml()?)
        .with_context(|| format!("writing {}", config_path.display()))?;
    println!("Initialized {} devices", volume.devices.len());
    println!("Configuration saved to {}", config_path.display());
    Ok(())
}

fn create(config: &Config) -> Result<()> {
    let devices = open_devices(config);
    RaidVolume::create(&devices)?;
    devices.sync()?;

    let data_devices = config.volume.devices.len() as u64 - 1;
    println!(
        "Created volume: {} devices, {} logical sectors",
        config.volume.devices.len(),
        (config.volume.sectors_per_device - 1) * data_devices
    );
    Ok(())
}

fn status(config: &Config) -> Result<()> {
    let mounted = Mounted::start(open_devices(config));
    let volume = &mounted.volume;

    println!("Volume Status");
    println!("=============");
    println!("Status:   {}", volume.status());
    println!("Size:     {} sectors", volume.size());
    println!("Version:  {}", volume.version());
    println!("Devices:  [{}]", volume.live_devices());
    for (index, path) in config.volume.devices.iter().enumerate() {
        let state = if volume.live_devices().is_live(index) {
            "live"
        } else {
            "FAILED"
        };
        println!("  {index:>2}  {state:<6}  {}", path.display());
    }

    mounted.stop()?;
    Ok(())
}

fn read(config: &Config, sector: u64, count: u64, output: Option<PathBuf>) -> Result<()> {
    let sector_size = config.volume.sector_size;
    let len = usize::try_from(count)? * sector_size;
    let mut buf = vec![0u8; len];

    let mut mounted = Mounted::start_operational(open_devices(config))?;
    let result = mounted.volume.read(sector, &mut buf);
    let status = mounted.stop()?;
    check_io(result, status)
        .with_context(|| format!("reading {count} sectors at {sector} ({status})"))?;

    match output {
        Some(path) => {
            std::fs::write(&path, &buf)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Read {count} sectors into {}", path.display());
        }
        None => print!("{}", hex_dump(&buf, sector * sector_size as u64)),
    }
    Ok(())
}

fn write(
    config: &Config,
    sector: u64,
    pattern: &str,
    count: u64,
    input: Option<PathBuf>,
) -> Result<()> {
    let sector_size = config.volume.sector_size;
    let data = match input {
        Some(path) => {
            let mut data =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            data.resize(data.len().next_multiple_of(sector_size), 0);
            data
        }
        None => {
            let byte = parse_pattern(pattern)?;
            vec![byte; usize::try_from(count)? * sector_size]
        }
    };

    let mut mounted = Mounted::start_operational(open_devices(config))?;
    let result = mounted.volume.write(sector, &data);
    let status = mounted.stop()?;
    check_io(result, status).with_context(|| format!("writing at sector {sector} ({status})"))?;

    println!("Wrote {} sectors at {sector}", data.len() / sector_size);
    Ok(())
}

fn resync(config: &Config, replace_missing: bool) -> Result<()> {
    let mut devices = open_devices(config);
    if replace_missing {
        for (index, path) in config.volume.devices.iter().enumerate() {
            if !devices.is_present(index) {
                warn!("replacing missing device {} with {}", index, path.display());
                devices.replace(index, path)?;
            }
        }
    }

    let mut mounted = Mounted::start(devices);
    let before = mounted.volume.status();
    let after = mounted.volume.resync();
    let rows = mounted.volume.stats().rows_rebuilt;
    mounted.stop()?;

    match (before, after) {
        (VolumeStatus::Degraded, VolumeStatus::Ok) => {
            println!("Rebuilt {rows} rows, volume is {after}");
            Ok(())
        }
        (VolumeStatus::Ok, _) => {
            println!("Volume is OK, nothing to rebuild");
            Ok(())
        }
        _ => bail!("resync left volume {after} (was {before})"),
    }
}

fn scrub(config: &Config, repair: bool) -> Result<()> {
    let mut mounted = Mounted::start(open_devices(config));
    let result = mounted.volume.scrub(repair);
    mounted.stop()?;
    let report = result?;

    println!("Scrub Report");
    println!("============");
    println!("Rows checked:    {}", report.rows_checked);
    println!("Mismatched rows: {}", report.mismatched_rows);
    println!("Repaired rows:   {}", report.repaired_rows);
    if report.interrupted {
        bail!("scrub interrupted by a device fault");
    }
    Ok(())
}

/// Point at the rebuild path when an I/O call lost a device
fn check_io(result: raid5vol_common::Result<()>, status: VolumeStatus) -> Result<()> {
    if let Err(e) = &result
        && e.is_device_fault()
    {
        warn!(
            "device fault left the volume {}; replace the device and run resync",
            status
        );
    }
    Ok(result?)
}

fn parse_pattern(pattern: &str) -> Result<u8> {
    let digits = pattern.trim_start_matches("0x");
    let padded = if digits.len() == 1 {
        format!("0{digits}")
    } else {
        digits.to_string()
    };
    let bytes = hex::decode(&padded).with_context(|| format!("invalid pattern {pattern}"))?;
    match bytes.as_slice() {
        [byte] => Ok(*byte),
        _ => bail!("pattern {pattern} is not a single byte"),
    }
}

fn hex_dump(data: &[u8], base: u64) -> String {
    data.chunks(32)
        .zip((base..).step_by(32))
        .map(|(line, offset)| format!("{offset:010x}  {}\n", hex::encode(line)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use raid5vol_common::Error;
    use raid5vol_storage::Footer;

    #[test]
    fn test_parse_pattern() {
        assert_eq!(parse_pattern("aa").unwrap(), 0xAA);
        assert_eq!(parse_pattern("0x5c").unwrap(), 0x5C);
        assert_eq!(parse_pattern("7").unwrap(), 0x07);
        assert!(parse_pattern("zz").is_err());
        assert!(parse_pattern("abcd").is_err());
    }

    #[test]
    fn test_hex_dump() {
        let dump = hex_dump(&[0xAB; 40], 512);
        let lines: Vec<_> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("0000000200  abab"));
        assert!(lines[1].starts_with("0000000220  "));
        assert_eq!(lines[1].len(), 12 + 16);
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "raid5vol-cli",
            "-d",
            "a.img",
            "-d",
            "b.img",
            "-d",
            "c.img",
            "--sectors",
            "64",
            "status",
        ]);
        let mut config = Config::default();
        config.volume.sector_size = 4096;
        apply_overrides(&mut config, &args);

        assert_eq!(config.volume.devices.len(), 3);
        assert_eq!(config.volume.sectors_per_device, 64);
        assert_eq!(config.volume.sector_size, 4096);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_failed_volume_is_stopped_before_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.volume.devices = (0..3).map(|i| dir.path().join(format!("d{i}"))).collect();
        config.volume.sectors_per_device = 16;

        init(&config, &dir.path().join("raid5vol.toml")).unwrap();
        create(&config).unwrap();
        std::fs::remove_file(&config.volume.devices[0]).unwrap();
        std::fs::remove_file(&config.volume.devices[1]).unwrap();

        let err = read(&config, 0, 1, None).unwrap_err();
        assert!(err.to_string().contains("FAILED"));
        assert!(write(&config, 0, "ff", 1, None).is_err());

        // Each refused command still ran a full start/stop cycle:
        // create wrote 1, then +2 per mount
        let image = std::fs::read(&config.volume.devices[2]).unwrap();
        let footer = Footer::from_bytes(&image[15 * 512..]).unwrap();
        assert_eq!(footer.version, 5);
        assert_eq!(footer.liveness.live_count(), 1);
    }

    #[test]
    fn test_check_io() {
        assert!(check_io(Ok(()), VolumeStatus::Ok).is_ok());
        let fault = Error::DeviceFault {
            device: 1,
            sector: 0,
        };
        assert!(check_io(Err(fault), VolumeStatus::Degraded).is_err());
    }

    #[test]
    fn test_mount_cycle_over_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.volume.devices = (0..3).map(|i| dir.path().join(format!("d{i}"))).collect();
        config.volume.sectors_per_device = 16;

        init(&config, &dir.path().join("raid5vol.toml")).unwrap();
        create(&config).unwrap();
        write(&config, 3, "c3", 2, None).unwrap();

        std::fs::remove_file(&config.volume.devices[1]).unwrap();
        let mut mounted = Mounted::start(open_devices(&config));
        assert_eq!(mounted.volume.status(), VolumeStatus::Degraded);
        let mut buf = vec![0u8; 1024];
        mounted.volume.read(3, &mut buf).unwrap();
        assert_eq!(buf, vec![0xC3; 1024]);
        mounted.stop().unwrap();

        resync(&config, true).unwrap();
        let mounted = Mounted::start(open_devices(&config));
        assert_eq!(mounted.volume.status(), VolumeStatus::Ok);
        mounted.stop().unwrap();
        scrub(&config, false).unwrap();
    }
}
