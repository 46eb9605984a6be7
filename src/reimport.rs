//! Seed reimport: spool shards back in, projected into sort records.
//!
//! For one (A-panel, sign class) the lanes' shard files are re-read in
//! parallel. Each raw pair is decoded, its anti-diagonal computed, and
//! the sort record scattered straight into its final slot of the shared
//! sort array; the slots come from exclusive prefix sums over the
//! per-lane bucket arrays, so no two workers ever collide. Shards are
//! deleted as soon as their decode completes.

use std::fs;
use std::path::PathBuf;
use std::thread;

use memmap2::Mmap;

use crate::config::BUCK_SHIFT;
use crate::error::{GaleError, Result};
use crate::layout::{read_field, write_field, Geometry};
use crate::radix::SortArray;

/// Turn per-lane record counts into exclusive per-(lane, contig) slot
/// offsets, restarting at every panel boundary so each panel fills its
/// sort array from slot 0. Returns the largest panel's record count,
/// which sizes the array.
pub fn prefix_sum_buckets(bucks: &mut [Vec<u64>], select: &[u32]) -> u64 {
    let nthreads = bucks.len();
    let nconts = select.len();

    let mut nelmax = 0u64;
    let mut cum = 0u64;
    for j in 0..nconts {
        for i in 0..nthreads {
            cum += bucks[i][j];
            bucks[i][j] = cum;
        }
        if j + 1 == nconts || select[j] != select[j + 1] {
            if cum > nelmax {
                nelmax = cum;
            }
            cum = 0;
        }
    }

    // Shift inclusive sums down one lane to make them exclusive starts.
    for j in (0..nconts).rev() {
        for i in (1..nthreads).rev() {
            bucks[i][j] = bucks[i - 1][j];
        }
        if j == 0 || select[j] != select[j - 1] {
            bucks[0][j] = 0;
        } else {
            bucks[0][j] = bucks[nthreads - 1][j - 1];
        }
    }

    nelmax
}

/// Geometry plus the per-run constants the record projection needs.
pub struct SeedProjector<'a> {
    pub geo: &'a Geometry,
    /// Length of B contig `j` (sorted index) via the sort permutation.
    pub blen: &'a [i64],
    /// Reverse-orientation sign class.
    pub comp: bool,
}

impl SeedProjector<'_> {
    /// Decode one spool record and write its sort record into `out`.
    #[inline]
    fn project(&self, rec: &[u8], out: &mut [u8]) {
        let geo = self.geo;
        let lcp = rec[0];
        let mut ipost = read_field(&rec[1..], geo.ipost) as i64;
        let jpost = read_field(&rec[1 + geo.ibyte..], geo.jpost) as i64;
        let mut jcont = read_field(&rec[1 + geo.ibyte + geo.jpost..], geo.jcont) as u64;
        let flag = 1u64 << (8 * geo.jcont - 1);
        let flip = jcont & flag != 0;
        jcont &= flag - 1;

        let diag = if self.comp {
            ipost + jpost
        } else {
            let d = (ipost - jpost) + self.blen[jcont as usize];
            if flip {
                // canonical match was on the reverse strand: normalize
                // the A coordinate to the forward-frame seed start
                ipost += (geo.kmer as i64) - lcp as i64;
            }
            d
        };
        let dbuck = diag >> BUCK_SHIFT;
        let drem = (diag - (dbuck << BUCK_SHIFT)) as u8;

        out[0] = lcp;
        out[1] = drem;
        write_field(&mut out[2..], geo.ipost, ipost as u64);
        write_field(&mut out[2 + geo.ipost..], geo.dbyte, dbuck as u64);
        write_field(&mut out[2 + geo.ipost + geo.dbyte..], geo.jcont, jcont);
    }

    /// Contig field of a raw spool record.
    #[inline]
    fn contig_of(&self, rec: &[u8]) -> usize {
        read_field(&rec[1 + self.geo.ipost..], self.geo.icont) as usize
    }
}

/// Re-read one panel's shards across all lanes, scattering sort records
/// into `sarr`. `bucks[lane][contig]` must hold the exclusive slot
/// offsets; fingers advance in place. Shard files are removed.
pub fn reimport_panel(
    paths: &[PathBuf],
    bucks: &mut [Vec<u64>],
    sarr: &SortArray,
    proj: &SeedProjector,
) -> Result<()> {
    let mut results = Vec::with_capacity(paths.len());
    thread::scope(|s| {
        let mut handles = Vec::with_capacity(paths.len());
        for (path, buck) in paths.iter().zip(bucks.iter_mut()) {
            handles.push(s.spawn(move || reimport_shard(path, buck, sarr, proj)));
        }
        for h in handles {
            results.push(h.join().expect("reimport worker panicked"));
        }
    });
    for r in results {
        r?;
    }
    Ok(())
}

fn reimport_shard(
    path: &PathBuf,
    buck: &mut [u64],
    sarr: &SortArray,
    proj: &SeedProjector,
) -> Result<()> {
    let geo = proj.geo;
    let prec = geo.prec;
    let file = fs::File::open(path).map_err(|e| GaleError::opening(path, e))?;
    let len = file.metadata()?.len() as usize;
    if len % prec != 0 {
        return Err(GaleError::Malformed {
            path: path.clone(),
            message: "shard is not a whole number of records".into(),
        });
    }
    if len > 0 {
        let map = unsafe { Mmap::map(&file)? };
        let mut out = vec![0u8; geo.swide];
        for rec in map.chunks_exact(prec) {
            let icont = proj.contig_of(rec);
            let slot = buck[icont];
            buck[icont] += 1;
            proj.project(rec, &mut out);
            // Sound: prefix sums give every worker disjoint slots.
            unsafe { sarr.write_slot(slot, &out) };
        }
    }
    drop(file);
    fs::remove_file(path)?;
    Ok(())
}

/// Per-contig byte extents of one panel after reimport: fingers of the
/// last lane now sit at each contig's end slot. Returns the panel's
/// record count.
pub fn build_panel(
    last_buck: &[u64],
    lo: usize,
    hi: usize,
    swide: usize,
    panel: &mut [u64],
) -> u64 {
    for p in panel.iter_mut() {
        *p = 0;
    }
    let mut prev = 0u64;
    for j in lo..hi {
        let next = last_buck[j];
        panel[j] = (next - prev) * swide as u64;
        prev = next;
    }
    prev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_sum_restarts_per_panel() {
        // 2 lanes, 3 contigs, panels {0,1} and {2}
        let select = vec![0u32, 0, 1];
        let mut bucks = vec![vec![2u64, 1, 4], vec![3, 0, 5]];
        let nelmax = prefix_sum_buckets(&mut bucks, &select);
        assert_eq!(nelmax, 9);
        // panel 0 slots: lane0/c0 [0,2) lane1/c0 [2,5) lane0/c1 [5,6) lane1/c1 [6,6)
        assert_eq!(bucks[0][0], 0);
        assert_eq!(bucks[1][0], 2);
        assert_eq!(bucks[0][1], 5);
        assert_eq!(bucks[1][1], 6);
        // panel 1 restarts at zero
        assert_eq!(bucks[0][2], 0);
        assert_eq!(bucks[1][2], 4);
    }

    #[test]
    fn test_build_panel() {
        let last = vec![3u64, 3, 7, 0];
        let mut panel = vec![9u64; 4];
        let nels = build_panel(&last, 0, 3, 5, &mut panel);
        assert_eq!(nels, 7);
        assert_eq!(panel, vec![15, 0, 20, 0]);
    }

    #[test]
    fn test_project_forward_and_reverse() {
        let geo = Geometry::new(14, 2, 3, 1, 3, 1, 5, 1);
        let blen = vec![5000i64, 3000];
        // spool record: lcp=14, a_post=100 (contig 0), b_post=40 contig 1, no flip
        let mut rec = vec![0u8; geo.prec];
        rec[0] = 14;
        write_field(&mut rec[1..], geo.ipost, 100);
        write_field(&mut rec[1 + geo.ipost..], geo.icont, 0);
        write_field(&mut rec[1 + geo.ibyte..], geo.jpost, 40);
        write_field(&mut rec[1 + geo.ibyte + geo.jpost..], geo.jcont, 1);

        let fwd = SeedProjector { geo: &geo, blen: &blen, comp: false };
        let mut out = vec![0u8; geo.swide];
        fwd.project(&rec, &mut out);
        let diag = (100 - 40) + 3000;
        assert_eq!(out[0], 14);
        assert_eq!(out[1], (diag & 63) as u8);
        assert_eq!(read_field(&out[2..], geo.ipost) as i64, 100);
        assert_eq!(read_field(&out[2 + geo.ipost..], geo.dbyte) as i64, diag >> 6);
        assert_eq!(read_field(&out[2 + geo.ipost + geo.dbyte..], geo.jcont), 1);

        let rev = SeedProjector { geo: &geo, blen: &blen, comp: true };
        rev.project(&rec, &mut out);
        let diag = 100 + 40;
        assert_eq!(read_field(&out[2 + geo.ipost..], geo.dbyte) as i64, diag >> 6);
        assert_eq!(out[1], (diag & 63) as u8);

        // flip bit normalizes the A post in forward mode
        rec[0] = 10;
        let flag = 1u64 << (8 * geo.jcont - 1);
        write_field(&mut rec[1 + geo.ibyte + geo.jpost..], geo.jcont, 1 | flag);
        fwd.project(&rec, &mut out);
        assert_eq!(read_field(&out[2..], geo.ipost) as i64, 104);
        let diag = (100 - 40) + 3000; // diagonal uses the raw post
        assert_eq!(read_field(&out[2 + geo.ipost..], geo.dbyte) as i64, diag >> 6);
    }
}
