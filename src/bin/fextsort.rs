use std::path::PathBuf;
use std::process;

use clap::Parser;

use extsort_rs::common::io::input_dir_bytes;
use extsort_rs::sort::{SortConfig, SortEngine, parse_buffer_size};

#[derive(Parser)]
#[command(
    name = "fextsort",
    about = "Sort directories of raw 64-bit integers that do not fit in memory"
)]
struct Cli {
    /// Directory of input files (raw native-endian 64-bit integers, no header)
    input_dir: PathBuf,

    /// Write the sorted result to FILE
    #[arg(
        short = 'o',
        long = "output",
        value_name = "FILE",
        default_value = "sorted.bin"
    )]
    output: PathBuf,

    /// Use DIR for intermediate run files (cleared on startup)
    #[arg(
        short = 'T',
        long = "work-dir",
        value_name = "DIR",
        default_value = "intermediate"
    )]
    work_dir: PathBuf,

    /// Number of sort workers (defaults to the available parallelism)
    #[arg(long = "threads", value_name = "N")]
    threads: Option<usize>,

    /// Use SIZE for the shared memory buffer (e.g. 512K, 64M, 1G)
    #[arg(
        short = 'S',
        long = "buffer-size",
        value_name = "SIZE",
        default_value = "64M"
    )]
    buffer_size: String,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let threads = cli
        .threads
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
        .max(1);

    let requested = match parse_buffer_size(&cli.buffer_size) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("fextsort: invalid buffer size: {}", e);
            process::exit(2);
        }
    };
    // Round down to a clean partition: whole values, equal per-worker blocks.
    let granule = threads * 8;
    let buffer_size = (requested / granule).max(1) * granule;

    let total_bytes = match input_dir_bytes(&cli.input_dir) {
        Ok(n) => n,
        Err(e) => {
            eprintln!("fextsort: {}: {}", cli.input_dir.display(), e);
            process::exit(2);
        }
    };

    let config = SortConfig {
        input_dir: cli.input_dir,
        work_dir: cli.work_dir,
        output_path: cli.output,
        num_workers: threads,
        buffer_size,
        total_bytes,
    };

    match SortEngine::new(config).and_then(|engine| engine.run()) {
        Ok(stats) => {
            log::debug!("done: {} values, {} cycles", stats.values, stats.cycles);
        }
        Err(e) => {
            eprintln!("fextsort: {}", e);
            process::exit(2);
        }
    }
}
