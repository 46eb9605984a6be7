//! GALE: Genome ALignment Engine
//!
//! Usage: gale [OPTIONS] -f <FREQ> <SOURCE1> <SOURCE2>

use clap::Parser;
use std::path::PathBuf;
use std::process;

use gale_genomics::config::AlignConfig;
use gale_genomics::pipeline;

#[derive(Parser)]
#[command(name = "gale")]
#[command(version)]
#[command(
    about = "GALE: Genome ALignment Engine - whole-genome adaptive-seed pairwise alignment",
    long_about = None
)]
struct Cli {
    /// First genome index root (the A genome)
    source1: String,

    /// Second genome index root (the B genome)
    source2: String,

    /// Adaptive seed count cutoff
    #[arg(short = 'f', long = "frequency")]
    frequency: usize,

    /// Minimum seed chain coverage in both genomes
    #[arg(short = 'c', long = "chain-min", default_value_t = 100)]
    chain_min: i64,

    /// A-axis gap threshold for starting a new seed chain
    #[arg(short = 's', long = "chain-break", default_value_t = 500)]
    chain_break: i64,

    /// Minimum alignment length
    #[arg(short = 'a', long = "align-min", default_value_t = 100)]
    align_min: i32,

    /// Minimum alignment similarity, in [0.6,1.0)
    #[arg(short = 'e', long = "identity", default_value_t = 0.7)]
    identity: f64,

    /// Directory to use for temporary files
    #[arg(short = 'P', long = "temp-dir", default_value = "/tmp")]
    temp_dir: PathBuf,

    /// Root name for the output .las file (default: <root1>.<root2>)
    #[arg(short = 'o', long = "output")]
    output: Option<String>,

    /// Verbose mode: report progress and statistics on stderr
    #[arg(short = 'v', long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let mut cfg = AlignConfig::new(cli.frequency);
    cfg.chain_min = cli.chain_min;
    cfg.chain_break = cli.chain_break;
    cfg.align_min = cli.align_min;
    cfg.align_rate = cli.identity;
    cfg.sort_path = cli.temp_dir;
    cfg.out_name = cli.output;
    cfg.verbose = cli.verbose;

    if let Err(e) = pipeline::run(&cfg, &cli.source1, &cli.source2) {
        eprintln!("gale: {}", e);
        process::exit(1);
    }
}
