use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use extsort_rs::sort::parse_buffer_size;

#[derive(Parser)]
#[command(
    name = "fgendata",
    about = "Generate directories of random raw 64-bit integers for fextsort"
)]
struct Cli {
    /// Directory to fill with generated files
    dir: PathBuf,

    /// Total size of generated data (e.g. 512K, 10M, 1G)
    #[arg(
        short = 's',
        long = "total-size",
        value_name = "SIZE",
        default_value = "10M"
    )]
    total_size: String,

    /// Number of files to spread the data across
    #[arg(short = 'n', long = "files", value_name = "N", default_value_t = 4)]
    files: usize,

    /// Seed for reproducible output
    #[arg(long = "seed", value_name = "SEED")]
    seed: Option<u64>,
}

/// Uneven multiple-of-8 file sizes summing to `total` (rounded down to whole
/// values): every file starts from the same base, the remainder is dealt out
/// in random 8-byte-aligned lots, and the result is shuffled.
fn file_sizes(rng: &mut StdRng, total: usize, files: usize) -> Vec<usize> {
    let total = total - total % 8;
    let base = (total / files) / 8 * 8;
    let mut sizes = vec![base; files];
    let mut remaining = total - base * files;

    const MAX_LOT: usize = 32 * 1024 * 1024;
    while remaining > 0 {
        for size in sizes.iter_mut() {
            if remaining == 0 {
                break;
            }
            let lot = rng.gen_range(1..=remaining.min(MAX_LOT) / 8) * 8;
            *size += lot;
            remaining -= lot;
        }
    }

    sizes.shuffle(rng);
    sizes
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    anyhow::ensure!(cli.files > 0, "need at least one file");

    let total = parse_buffer_size(&cli.total_size)
        .map_err(anyhow::Error::msg)
        .context("invalid --total-size")?;

    fs::create_dir_all(&cli.dir)
        .with_context(|| format!("creating {}", cli.dir.display()))?;

    let mut rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let sizes = file_sizes(&mut rng, total, cli.files);
    let mut written = 0usize;
    for (i, &size) in sizes.iter().enumerate() {
        let path = cli.dir.join(format!("file{i}.bin"));
        let file =
            File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        let mut out = BufWriter::with_capacity(256 * 1024, file);
        for _ in 0..size / 8 {
            out.write_all(&rng.r#gen::<i64>().to_ne_bytes())?;
        }
        out.flush()?;
        written += size;
        log::debug!("{}: {} bytes", path.display(), size);
    }

    println!(
        "wrote {} files ({} bytes) to {}",
        sizes.len(),
        written,
        cli.dir.display()
    );
    Ok(())
}
