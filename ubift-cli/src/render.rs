//! Table, CSV and JSON renderers over core data.

use std::io::Write;

use anyhow::Result;
use serde::Serialize;

/// Output format for listing commands.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table.
    #[default]
    Table,
    /// Comma-separated values with a header row.
    Csv,
    /// Machine-readable JSON.
    Json,
}

/// One row of `fls` output.
#[derive(Debug, Serialize)]
pub struct FlsRow {
    /// Entry kind (reg, dir, lnk, ...).
    pub entry_type: String,
    /// Target inode number.
    pub inode: u64,
    /// Whether this entry is a deletion marker.
    pub deleted: bool,
    /// Name or unrolled path.
    pub name: String,
}

/// One row of `ils` output.
#[derive(Debug, Serialize)]
pub struct IlsRow {
    /// Inode number.
    pub inode: u64,
    /// POSIX mode, octal.
    pub mode: String,
    /// Owner uid.
    pub uid: u32,
    /// Owner gid.
    pub gid: u32,
    /// Size in bytes.
    pub size: u64,
    /// Link count.
    pub nlink: u32,
    /// Modification time, seconds since the epoch.
    pub mtime_sec: u64,
    /// Whether the link count dropped to zero.
    pub deleted: bool,
}

/// Prints `fls` rows in the selected format.
pub fn print_fls(format: OutputFormat, rows: &[FlsRow]) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Csv => {
            println!("type,inode,deleted,name");
            for row in rows {
                println!(
                    "{},{},{},{}",
                    row.entry_type,
                    row.inode,
                    row.deleted,
                    csv_field(&row.name)
                );
            }
        }
        OutputFormat::Table => {
            println!("{:<6} {:>10} {:<8} NAME", "TYPE", "INODE", "DELETED");
            for row in rows {
                println!(
                    "{:<6} {:>10} {:<8} {}",
                    row.entry_type,
                    row.inode,
                    if row.deleted { "yes" } else { "-" },
                    row.name
                );
            }
        }
    }
    Ok(())
}

/// Prints `ils` rows in the selected format.
pub fn print_ils(format: OutputFormat, rows: &[IlsRow]) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rows)?),
        OutputFormat::Csv => {
            println!("inode,mode,uid,gid,size,nlink,mtime_sec,deleted");
            for row in rows {
                println!(
                    "{},{},{},{},{},{},{},{}",
                    row.inode, row.mode, row.uid, row.gid, row.size, row.nlink, row.mtime_sec,
                    row.deleted
                );
            }
        }
        OutputFormat::Table => {
            println!(
                "{:>10} {:<8} {:>6} {:>6} {:>12} {:>5} {:>12} DELETED",
                "INODE", "MODE", "UID", "GID", "SIZE", "NLINK", "MTIME"
            );
            for row in rows {
                println!(
                    "{:>10} {:<8} {:>6} {:>6} {:>12} {:>5} {:>12} {}",
                    row.inode,
                    row.mode,
                    row.uid,
                    row.gid,
                    row.size,
                    row.nlink,
                    row.mtime_sec,
                    if row.deleted { "yes" } else { "-" }
                );
            }
        }
    }
    Ok(())
}

/// Quotes a CSV field when it needs quoting.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_owned()
    }
}

/// Writes raw bytes to stdout, treating a closed pipe as success.
pub fn dump_bytes(bytes: &[u8]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match stdout.write_all(bytes).and_then(|()| stdout.flush()) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}
