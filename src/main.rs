//! Graphite dry-run harness.
//!
//! Stages a loader script and its blob files in an in-memory transport,
//! runs the two-pass interpreter against a mmap-backed machine memory
//! window, and reports every table the script produced. Useful for
//! inspecting what a hypervisor-generated script would do to the firmware
//! without booting one.

use clap::Parser;
use graphite::acpi::{TableKey, TableRegistry};
use graphite::alloc::RangeAllocator;
use graphite::measure::{MeasureKind, MeasurementSink};
use graphite::script::SCRIPT_ITEM;
use graphite::transport::MemTransport;
use graphite::{install_tables, LoaderError, MachineMemory, Platform};
use std::process::ExitCode;

/// Machine address of the memory window blobs are placed in.
const WINDOW_BASE: u64 = 0x10_0000;

#[derive(Parser, Debug)]
#[command(name = "graphite")]
#[command(about = "Dry-run a firmware table-loader script")]
struct Args {
    /// Path to the loader script
    #[arg(short, long)]
    script: String,

    /// Blob item backed by a file, as NAME=PATH (repeatable)
    #[arg(short, long = "blob", value_name = "NAME=PATH")]
    blobs: Vec<String>,

    /// Writable zero-filled host item, as NAME=SIZE (repeatable)
    #[arg(short, long = "anchor", value_name = "NAME=SIZE")]
    anchors: Vec<String>,

    /// Memory window size in megabytes
    #[arg(short, long, default_value = "64")]
    memory: u64,
}

/// Table registry that reports installs instead of wiring up a platform.
#[derive(Default)]
struct ReportingTables {
    next_key: u64,
}

impl TableRegistry for ReportingTables {
    fn install(&mut self, table: &[u8]) -> Result<TableKey, LoaderError> {
        let signature: String = table.iter().take(4).map(|&b| char::from(b)).collect();
        let key = TableKey(self.next_key);
        self.next_key += 1;
        eprintln!(
            "[acpi] install \"{}\" length {:#x} (key {})",
            signature.escape_default(),
            table.len(),
            key.0
        );
        Ok(key)
    }

    fn uninstall(&mut self, key: TableKey) -> Result<(), LoaderError> {
        eprintln!("[acpi] uninstall key {}", key.0);
        Ok(())
    }
}

/// Measurement sink that just narrates what would be attested.
struct ReportingSink;

impl MeasurementSink for ReportingSink {
    fn measure(&mut self, kind: MeasureKind, data: &[u8]) {
        eprintln!("[measure] {:?}: {} bytes", kind, data.len());
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = run(args) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let _logger = flexi_logger::Logger::try_with_env_or_str("info")?.start()?;

    let script = std::fs::read(&args.script)?;
    eprintln!("[run] script \"{}\": {} bytes", args.script, script.len());

    let mut transport = MemTransport::new();
    transport.add(SCRIPT_ITEM, script);

    for spec in &args.blobs {
        let (name, path) = spec
            .split_once('=')
            .ok_or("blob must be given as NAME=PATH")?;
        let data = std::fs::read(path)?;
        eprintln!("[run] blob \"{}\": {} bytes from {}", name, data.len(), path);
        transport.add(name, data);
    }

    for spec in &args.anchors {
        let (name, size) = spec
            .split_once('=')
            .ok_or("anchor must be given as NAME=SIZE")?;
        let size: usize = size.parse()?;
        eprintln!("[run] anchor \"{name}\": {size} writable bytes");
        transport.add(name, vec![0u8; size]);
    }

    let window = args.memory * 1024 * 1024;
    let mem = MachineMemory::with_regions(&[(WINDOW_BASE, window)])?;
    let mut allocator = RangeAllocator::new(&[(WINDOW_BASE, window)]);
    let mut tables = ReportingTables::default();
    let mut measure = ReportingSink;

    let mut platform = Platform {
        mem: &mem,
        transport: &mut transport,
        allocator: &mut allocator,
        tables: &mut tables,
        measure: &mut measure,
    };

    let report = install_tables(&mut platform, None)?;
    eprintln!(
        "[run] done: {} tables installed, {} blobs retained, {} freed",
        report.installed, report.retained_blobs, report.freed_blobs
    );

    for spec in &args.anchors {
        if let Some((name, _)) = spec.split_once('=') {
            if let Some(data) = transport.data(name) {
                eprintln!("[run] anchor \"{name}\" now holds {data:02x?}");
            }
        }
    }

    Ok(())
}
