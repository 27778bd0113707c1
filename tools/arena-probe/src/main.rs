//! Builds a row-isolated arena on this machine, reserves all of it and maps
//! the data pages into one aligned range.
//!
//! ```text
//! arena-probe [size_mib=16] [align_kib=2048] [max_rows_per_block=0]
//! ```
//!
//! Set `ROWGUARD_LOG` to `debug` or `trace` for per-attempt details. Needs
//! `CAP_SYS_ADMIN` for physical frame numbers and enough `RLIMIT_MEMLOCK`.

mod logger;

use crate::logger::StderrLogger;
use log::LevelFilter;
use rowguard_addresses::BackingOffset;
use rowguard_arena::{ArenaBuilder, MemfdSource, mapper};
use rowguard_geometry::{DramGeometry, LinearResolver, PagemapTranslator};
use std::env;
use std::error::Error;
use std::process::ExitCode;
use std::time::Instant;

/// 1024 columns of 8 bytes: 8 KiB rows.
const GEOMETRY: DramGeometry = DramGeometry::new(1024, 8);

fn arg(
    args: &mut impl Iterator<Item = String>,
    name: &str,
    default: usize,
) -> Result<usize, Box<dyn Error>> {
    args.next()
        .map_or(Ok(default), |s| s.parse())
        .map_err(|e| format!("invalid {name}: {e}").into())
}

fn main() -> ExitCode {
    let level = env::var("ROWGUARD_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LevelFilter::Info);
    if StderrLogger::new(level).init().is_err() {
        eprintln!("logger already installed");
    }

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("arena-probe: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut args = env::args().skip(1);
    let size = arg(&mut args, "size_mib", 16)?
        .checked_mul(1 << 20)
        .ok_or("size_mib too large")?;
    let align = arg(&mut args, "align_kib", 2048)?
        .checked_mul(1 << 10)
        .ok_or("align_kib too large")?;
    let max_rows = arg(&mut args, "max_rows_per_block", 0)?;

    let resolver = LinearResolver::new(PagemapTranslator::open()?, GEOMETRY);
    let mut builder =
        ArenaBuilder::new(resolver, MemfdSource::new()).with_max_rows_per_block(max_rows);

    let start = Instant::now();
    let (mut arena, stats) = builder.build(size)?;
    let ticket = arena.reserve(0).ok_or("reservation denied")?;
    let mut offsets = vec![BackingOffset::default(); arena.total_pages()];
    let count = arena.data_offsets(ticket, &mut offsets).min(offsets.len());
    let region = mapper::map_offsets(
        None,
        align,
        arena.backing(),
        &offsets[..count],
        arena.page_size(),
    )?;
    let elapsed = start.elapsed();

    println!("{:#x}", region.base().as_u64());
    println!("{stats} in {} row blocks", arena.row_blocks().len());
    println!("ticket {ticket}: {count} data pages mapped, {:#x} bytes", region.len());

    region.unmap()?;
    arena.release(ticket);
    arena.destroy()?;
    println!("allocation wall time: {:.3} s", elapsed.as_secs_f64());
    Ok(())
}
