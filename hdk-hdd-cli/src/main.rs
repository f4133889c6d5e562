use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::DateTime;
use clap::{Parser, Subcommand};
use hdk_hdd::{
    Entry, EntryKind, ExtractOptions, ExtractOptionsBuilder, Hdd, HddKeys, SectorBase, Volume, hexdump,
};
use tracing_subscriber::EnvFilter;

/// Sectors moved per request by `read-block` and `write-block`.
const CHUNK_SECTORS: u64 = 128;
const SECTOR_SIZE: u64 = 512;

#[derive(Parser, Debug)]
#[command(author, version, about = "Read and modify encrypted PS3 hard drives offline")]
struct Cli {
    /// Raw drive or image file
    #[arg(short, long, env = "PS3HDD_IMAGE")]
    image: PathBuf,

    /// Key file: 128-byte blob or JSON with hex fields
    #[arg(short, long, env = "PS3HDD_KEYS")]
    keys: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the volumes on the drive
    Volumes,

    /// List a directory
    Ls {
        volume: Volume,
        #[arg(default_value = "/")]
        path: String,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy a file or directory tree to the host
    Cp {
        volume: Volume,
        path: String,
        dest: PathBuf,
        /// Keep names exactly as stored on the volume
        #[arg(long)]
        raw_names: bool,
        /// Do not restore access and modification times
        #[arg(long)]
        no_times: bool,
    },

    /// Overwrite a file with a host file of the same size
    Replace {
        volume: Volume,
        path: String,
        /// Defaults to the target's name in the current directory
        host_file: Option<PathBuf>,
    },

    /// Hex dump one decrypted sector
    Print {
        #[arg(value_parser = parse_base)]
        base: SectorBase,
        #[arg(value_parser = parse_number)]
        sector: u64,
    },

    /// Dump decrypted sectors to a host file
    ReadBlock {
        #[arg(value_parser = parse_base)]
        base: SectorBase,
        #[arg(value_parser = parse_number)]
        start: u64,
        #[arg(value_parser = parse_number)]
        count: u64,
        out: PathBuf,
    },

    /// Encrypt a host file back onto the drive
    WriteBlock {
        #[arg(value_parser = parse_base)]
        base: SectorBase,
        #[arg(value_parser = parse_number)]
        start: u64,
        #[arg(value_parser = parse_number)]
        count: u64,
        input: PathBuf,
    },
}

/// `abs` for absolute sectors, otherwise a volume name.
fn parse_base(s: &str) -> Result<SectorBase, String> {
    if s.eq_ignore_ascii_case("abs") {
        return Ok(SectorBase::Absolute);
    }
    s.parse::<Volume>()
        .map(SectorBase::Volume)
        .map_err(|e| e.to_string())
}

/// Decimal or `0x`-prefixed hex.
fn parse_number(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid sector number '{s}': {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let key_data = fs::read(&cli.keys)
        .with_context(|| format!("failed to read key file {}", cli.keys.display()))?;
    let keys = HddKeys::parse(&key_data)?;

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&cli.image)
        .with_context(|| format!("failed to open {}", cli.image.display()))?;
    let mut hdd = Hdd::open(file, &keys)
        .with_context(|| format!("failed to open drive {}", cli.image.display()))?;
    tracing::debug!(device_type = %hdd.device_type(), "drive opened");

    match cli.command {
        Commands::Volumes => volumes(&mut hdd),
        Commands::Ls { volume, path, json } => list(&mut hdd, volume, &path, json),
        Commands::Cp {
            volume,
            path,
            dest,
            raw_names,
            no_times,
        } => {
            let options = extract_options(no_times, raw_names)?;
            copy(&mut hdd, volume, &path, &dest, &options)
        }
        Commands::Replace {
            volume,
            path,
            host_file,
        } => replace(&mut hdd, volume, &path, host_file),
        Commands::Print { base, sector } => print_sector(&mut hdd, base, sector),
        Commands::ReadBlock {
            base,
            start,
            count,
            out,
        } => read_block(&mut hdd, base, start, count, &out),
        Commands::WriteBlock {
            base,
            start,
            count,
            input,
        } => write_block(&mut hdd, base, start, count, &input),
    }
}

fn volumes(hdd: &mut Hdd<File>) -> Result<()> {
    println!("Device type: {}", hdd.device_type());
    println!(
        "{:<12} {:<6} {:>12} {:>12} {:>16}",
        "VOLUME", "FS", "START", "SECTORS", "FREE"
    );
    for info in hdd.volumes() {
        let kind = info.kind.map_or("?", |k| k.name());
        let free = info
            .free_bytes
            .map_or_else(|| "-".to_string(), |b| b.to_string());
        println!(
            "{:<12} {:<6} {:>#12X} {:>#12X} {:>16}",
            info.volume.name(),
            kind,
            info.region.start,
            info.region.size,
            free
        );
    }
    Ok(())
}

fn format_time(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

fn type_marker(entry: &Entry) -> char {
    match entry.kind {
        EntryKind::Directory => 'd',
        EntryKind::Symlink => 'l',
        EntryKind::File => '-',
        EntryKind::Other => '?',
    }
}

fn list(hdd: &mut Hdd<File>, volume: Volume, path: &str, json: bool) -> Result<()> {
    let entries = hdd.list_dir(volume, path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let mut line = format!(
            "{} {:>12} {} {}",
            type_marker(entry),
            entry.size,
            format_time(entry.mtime),
            entry.name
        );
        if let Some(target) = &entry.link_target {
            line.push_str(" -> ");
            line.push_str(target);
        }
        println!("{line}");
    }
    Ok(())
}

fn extract_options(no_times: bool, raw_names: bool) -> Result<ExtractOptions> {
    Ok(ExtractOptionsBuilder::default()
        .restore_timestamps(!no_times)
        .sanitize_names(!raw_names)
        .build()?)
}

fn copy(
    hdd: &mut Hdd<File>,
    volume: Volume,
    path: &str,
    dest: &Path,
    options: &ExtractOptions,
) -> Result<()> {
    let report = hdd.copy(volume, path, dest, options)?;
    for failure in &report.failures {
        eprintln!("failed: {}: {}", failure.path, failure.error);
    }
    println!(
        "Copied {} files and {} directories ({} bytes), {} failed",
        report.files,
        report.dirs,
        report.bytes,
        report.failures.len()
    );

    if !report.failures.is_empty() {
        bail!("{} entries could not be copied", report.failures.len());
    }
    Ok(())
}

fn replace(
    hdd: &mut Hdd<File>,
    volume: Volume,
    path: &str,
    host_file: Option<PathBuf>,
) -> Result<()> {
    let host_path = match host_file {
        Some(p) => p,
        None => {
            let name = path.trim_end_matches('/').rsplit('/').next().unwrap_or(path);
            if name.is_empty() {
                bail!("cannot derive a host file name from '{path}'");
            }
            PathBuf::from(name)
        }
    };

    let file = File::open(&host_path)
        .with_context(|| format!("failed to open {}", host_path.display()))?;
    let len = file.metadata()?.len();
    let written = hdd.replace(volume, path, &mut BufReader::new(file), len)?;
    println!("Replaced {volume}{path} with {} ({written} bytes)", host_path.display());
    Ok(())
}

fn absolute_start(hdd: &Hdd<File>, base: SectorBase, sector: u64) -> u64 {
    match base {
        SectorBase::Absolute => sector,
        SectorBase::Volume(volume) => volume.region(hdd.regions()).start + sector,
    }
}

fn print_sector(hdd: &mut Hdd<File>, base: SectorBase, sector: u64) -> Result<()> {
    let data = hdd.read_sectors(base, sector, 1)?;
    let offset = absolute_start(hdd, base, sector) * SECTOR_SIZE;
    print!("{}", hexdump(&data, offset));
    Ok(())
}

fn read_block(hdd: &mut Hdd<File>, base: SectorBase, start: u64, count: u64, out: &Path) -> Result<()> {
    let file = File::create(out).with_context(|| format!("failed to create {}", out.display()))?;
    let mut writer = BufWriter::new(file);

    let mut done = 0;
    while done < count {
        let n = CHUNK_SECTORS.min(count - done);
        let data = hdd.read_sectors(base, start + done, n)?;
        writer.write_all(&data)?;
        done += n;
    }
    writer.flush()?;

    println!("Read {count} sectors to {}", out.display());
    Ok(())
}

fn write_block(hdd: &mut Hdd<File>, base: SectorBase, start: u64, count: u64, input: &Path) -> Result<()> {
    let file = File::open(input).with_context(|| format!("failed to open {}", input.display()))?;
    let expected = count * SECTOR_SIZE;
    let actual = file.metadata()?.len();
    if actual != expected {
        bail!(
            "{} is {actual} bytes, {count} sectors need exactly {expected}",
            input.display()
        );
    }

    let mut reader = BufReader::new(file);
    let mut buf = vec![0u8; (CHUNK_SECTORS * SECTOR_SIZE) as usize];
    let mut done = 0;
    while done < count {
        let n = CHUNK_SECTORS.min(count - done);
        let chunk = &mut buf[..(n * SECTOR_SIZE) as usize];
        reader.read_exact(chunk)?;
        hdd.write_sectors(base, start + done, chunk)?;
        done += n;
    }

    println!("Wrote {count} sectors from {}", input.display());
    Ok(())
}
