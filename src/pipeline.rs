//! Whole-run orchestration: open and validate the two indexes, run the
//! merge, reimport/sort/search each panel, then fold the per-worker
//! outputs into the final `.las`.
//!
//! Phase structure and the contig panel split mirror the seed pipeline:
//! merge lanes spool seed pairs by (A-panel, sign); per panel the
//! shards are scattered into the shared sort array, radix sorted, and
//! searched; survivors stream to per-worker files that a final
//! in-process merge folds together.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use crate::config::{AlignConfig, TSPACE};
use crate::error::{GaleError, Result};
use crate::ktab::KmerStream;
use crate::layout::Geometry;
use crate::merge::{adaptamer_merge, MergeContext};
use crate::overlap::{LasReader, LasWriter, Overlap, COMP_FLAG};
use crate::posts::PostList;
use crate::radix::{radix_sort, SortArray};
use crate::reimport::{build_panel, prefix_sum_buckets, reimport_panel, SeedProjector};
use crate::chain::{SearchStats, SearchWorker};
use crate::seqdb::SeqDb;

/// Strip a recognized index extension from a source argument.
pub fn index_root(source: &str) -> PathBuf {
    let p = Path::new(source);
    match p.extension().and_then(|e| e.to_str()) {
        Some("dam") | Some("ktab") | Some("post") | Some("bps") => p.with_extension(""),
        _ => p.to_path_buf(),
    }
}

fn root_stem(root: &Path) -> String {
    root.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Run a whole alignment job. Returns the number of live alignments in
/// the final output.
pub fn run(cfg: &AlignConfig, source1: &str, source2: &str) -> Result<i64> {
    cfg.validate()?;
    let root1 = index_root(source1);
    let root2 = index_root(source2);

    let t1 = KmerStream::open(&root1)?;
    let t2 = KmerStream::open(&root2)?;
    let p1 = PostList::open(&root1)?;
    let p2 = PostList::open(&root2)?;
    let db1 = SeqDb::open(&root1)?;
    let db2 = SeqDb::open(&root2)?;

    if t1.kmer() != t2.kmer() {
        return Err(GaleError::Mismatch(format!(
            "indexes not built with the same k-mer size ({} vs {})",
            t1.kmer(),
            t2.kmer()
        )));
    }
    if t1.ibyte() != t2.ibyte() {
        return Err(GaleError::Mismatch(
            "indexes not built with the same prefix width".into(),
        ));
    }
    if p1.nsqrt() != p2.nsqrt() || t1.nsqrt() != p1.nsqrt() {
        return Err(GaleError::Mismatch(
            "indexes built with different thread counts".into(),
        ));
    }
    if p1.freq() < cfg.freq || p2.freq() < cfg.freq {
        return Err(GaleError::Mismatch(format!(
            "index frequency cutoff ({}, {}) below requested {}",
            p1.freq(),
            p2.freq(),
            cfg.freq
        )));
    }
    if p1.nctg() != db1.nctg() || p2.nctg() != db2.nctg() {
        return Err(GaleError::Mismatch(
            "position list and sequence database disagree on contig count".into(),
        ));
    }

    let nthreads = p1.nsqrt();
    let geo = Geometry::new(
        t1.kmer(),
        nthreads,
        p1.pbyte(),
        p1.cbyte(),
        p2.pbyte(),
        p2.cbyte(),
        t2.krec(),
        t2.ibyte(),
    );
    let maxp = p2.maxp().max(t2.max_panel());

    if cfg.verbose {
        eprintln!("gale: using {} threads", nthreads);
    }

    // Contig panel split of genome 1, balanced by total bases.
    let perm1: Vec<u32> = p1.perm().to_vec();
    let perm2: Vec<u32> = p2.perm().to_vec();
    let nconts = p1.nctg();
    let (select, idbsplit, nparts) = split_contigs(&db1, &perm1, nthreads);

    let pid = std::process::id();
    let pair_name = format!("_pair.{}", pid);
    let uniq_name = format!("_uniq.{}", pid);
    let algn_name = cfg.out_name.clone().unwrap_or_else(|| {
        format!("{}.{}", root_stem(&root1), root_stem(&root2))
    });

    // Phase 1: adaptive-seed merge.
    if cfg.verbose {
        eprintln!("gale: starting adaptive seed merge");
    }
    let ctx = MergeContext {
        root1: &root1,
        root2: &root2,
        geo: &geo,
        select: &select,
        nparts,
        nconts,
        freq: cfg.freq,
        maxp,
        sort_path: &cfg.sort_path,
        pair_name: &pair_name,
    };
    let (mut shards, mstats) = adaptamer_merge(&ctx)?;
    if cfg.verbose {
        eprintln!("gale: {}", mstats);
    }

    // Phase 2: per-panel reimport, sort, and search.
    if cfg.verbose {
        eprintln!(
            "gale: starting seed sort and alignment search, {} parts",
            2 * nparts
        );
    }
    let mut nelmax = 0u64;
    for u in 0..2 {
        nelmax = nelmax.max(prefix_sum_buckets(&mut shards.bucks[u], &select));
    }

    let mut sarr = SortArray::new(nelmax as usize, geo.swide);
    let mut panel = vec![0u64; nconts];
    let blen: Vec<i64> = (0..p2.nctg()).map(|j| db2.rlen(perm2[j] as usize)).collect();

    let mut workers = Vec::with_capacity(nthreads);
    let mut uniq_paths = Vec::with_capacity(nthreads);
    for p in 0..nthreads {
        let path = cfg.sort_path.join(format!("{}.{}.las", uniq_name, p));
        let out = LasWriter::create(&path, TSPACE)?;
        workers.push(SearchWorker::new(db1.reopen()?, db2.reopen()?, cfg.align_rate, out));
        uniq_paths.push(path);
    }

    for i in 0..nparts {
        for u in 0..2 {
            let comp = u == 1;
            if cfg.verbose {
                eprintln!(
                    "gale: loading and sorting seeds for part {}{}",
                    i + 1,
                    if comp { "C" } else { "N" }
                );
            }
            let proj = SeedProjector { geo: &geo, blen: &blen, comp };
            reimport_panel(&shards.paths[u][i], &mut shards.bucks[u], &sarr, &proj)?;

            let last = &shards.bucks[u][nthreads - 1];
            let nels = build_panel(last, idbsplit[i], idbsplit[i + 1], geo.swide, &mut panel);

            let sorted = &mut sarr.as_mut_slice()[..nels as usize * geo.swide];
            let ranges = radix_sort(sorted, geo.swide, geo.swide - 2, &panel, nthreads);

            let sorted: &[u8] = sorted;
            let mut results = Vec::with_capacity(ranges.len());
            thread::scope(|s| {
                let mut handles = Vec::with_capacity(ranges.len());
                for (w, range) in workers.iter_mut().zip(ranges.iter().copied()) {
                    let panel = &panel;
                    let geo = &geo;
                    let perm1 = &perm1;
                    let perm2 = &perm2;
                    handles.push(s.spawn(move || {
                        w.search_range(sorted, panel, range, comp, geo, cfg, perm1, perm2)
                    }));
                }
                for h in handles {
                    results.push(h.join().expect("search worker panicked"));
                }
            });
            for r in results {
                r?;
            }
        }
    }

    let mut sstats = SearchStats::default();
    for w in workers.drain(..) {
        sstats.absorb(&w.stats);
        w.into_output().finish()?;
    }
    if cfg.verbose {
        eprintln!("gale: {} (chain coverage {})", sstats, cfg.chain_min);
    }

    // Phase 3: fold the per-worker outputs into the final file.
    if cfg.verbose {
        eprintln!("gale: sorting and merging local alignments");
    }
    let out_path = PathBuf::from(format!("{}.las", algn_name));
    let merged = merge_outputs(&uniq_paths, &out_path);
    for p in &uniq_paths {
        let _ = fs::remove_file(p);
    }
    let nlive = merged?;

    if cfg.verbose {
        eprintln!("gale: {} alignments in {}", nlive, out_path.display());
    }
    Ok(nlive)
}

/// Split genome 1's sorted contigs into at most `nthreads` panels of
/// roughly equal total length. Returns the contig→panel map, the panel
/// boundaries, and the panel count.
fn split_contigs(db1: &SeqDb, perm1: &[u32], nthreads: usize) -> (Vec<u32>, Vec<usize>, usize) {
    let nconts = perm1.len();
    if nconts == 0 {
        return (Vec::new(), vec![0, 0], 1);
    }
    let mut idbsplit = vec![0usize; nthreads + 1];
    let mut select = vec![0u32; nconts];

    let npost = db1.totlen();
    let mut p = 0usize;
    let mut r = nthreads;
    let mut t = npost / nthreads as i64;
    let mut cum = db1.rlen(perm1[0] as usize);
    for x in 1..nconts {
        if cum >= t && x >= r {
            p += 1;
            idbsplit[p] = x;
            t = (npost * (p as i64 + 1)) / nthreads as i64;
            r += nthreads;
        }
        select[x] = p as u32;
        cum += db1.rlen(perm1[x] as usize);
    }
    let nparts = p + 1;
    idbsplit[nparts] = nconts;
    idbsplit.truncate(nparts + 1);
    (select, idbsplit, nparts)
}

/// Read every per-worker `.las`, sort globally, write the final file.
fn merge_outputs(paths: &[PathBuf], out_path: &Path) -> Result<i64> {
    let mut all: Vec<Overlap> = Vec::new();
    for p in paths {
        let mut r = LasReader::open(p)?;
        while let Some(o) = r.next_overlap()? {
            all.push(o);
        }
    }
    all.sort_by_key(|o| (o.aread, o.bread, o.flags & COMP_FLAG, o.path.abpos, o.path.bbpos));
    let mut w = LasWriter::create(out_path, TSPACE)?;
    for o in &all {
        w.append(o)?;
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_root_strips_known_extensions() {
        assert_eq!(index_root("g1.dam"), PathBuf::from("g1"));
        assert_eq!(index_root("dir/g1.ktab"), PathBuf::from("dir/g1"));
        assert_eq!(index_root("g1"), PathBuf::from("g1"));
        assert_eq!(index_root("g1.v2"), PathBuf::from("g1.v2"));
    }
}
