//! Shared fixtures for the integration suites: deterministic random
//! genomes, index construction, and a pipeline harness that runs a full
//! alignment inside a temp directory.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use gale_genomics::config::AlignConfig;
use gale_genomics::indexer::{GenomeIndex, IndexParams};
use gale_genomics::overlap::{LasReader, Overlap};
use gale_genomics::pipeline;

/// A random 2-bit genome, reproducible by seed.
pub fn rand_genome(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(0..4u8)).collect()
}

/// Default parameters the scenarios share: K=14, two lanes, cap 100.
pub fn default_params() -> IndexParams {
    IndexParams { kmer: 14, nthreads: 2, freq: 100, pfx_bytes: 1 }
}

/// Build both genome indexes under `dir`, returning the roots.
pub fn build_pair(
    dir: &Path,
    g1: &[Vec<u8>],
    g2: &[Vec<u8>],
    params: &IndexParams,
) -> (PathBuf, PathBuf) {
    let root1 = dir.join("g1");
    let root2 = dir.join("g2");
    GenomeIndex::build(g1, params).write(&root1).unwrap();
    GenomeIndex::build(g2, params).write(&root2).unwrap();
    (root1, root2)
}

/// Run a full alignment with temps and output confined to `dir`, then
/// read back every record of the final `.las`.
pub fn run_align(dir: &Path, root1: &Path, root2: &Path, freq: usize) -> Vec<Overlap> {
    let mut cfg = AlignConfig::new(freq);
    cfg.sort_path = dir.to_path_buf();
    cfg.out_name = Some(dir.join("out").to_string_lossy().into_owned());
    let nlive = pipeline::run(
        &cfg,
        root1.to_str().unwrap(),
        root2.to_str().unwrap(),
    )
    .unwrap();

    let mut r = LasReader::open(&dir.join("out.las")).unwrap();
    assert_eq!(r.nlive(), nlive);
    let mut out = Vec::new();
    while let Some(o) = r.next_overlap().unwrap() {
        out.push(o);
    }
    assert_eq!(out.len() as i64, nlive);
    out
}
