//! Adaptive-seed merge of two genome indexes.
//!
//! For every k-mer of genome 1 the merge finds the longest prefix
//! `p in [K0, K]` whose matching group in genome 2 holds fewer than
//! `FREQ` posts, and emits the cross product of the two post sets as
//! seed pairs. The scan is panel-at-a-time: the genome-2 entries of the
//! current prefix panel are cached in memory, sliding windows
//! `[vlcp[p], rend)` track the entries sharing a `p`-base prefix with
//! the current genome-1 k-mer, and a rolling buffer carries the
//! genome-2 posts of the window so no post is fetched twice.
//!
//! `T` lanes run the scan concurrently; lane `tid` owns table parts
//! `[tid*T, (tid+1)*T)` of both indexes and its own spool shards, so
//! lanes share nothing mutable.

use std::fmt;
use std::path::Path;
use std::thread;

use crate::error::{GaleError, Result};
use crate::ktab::KmerStream;
use crate::layout::{base_mask, write_field, Geometry};
use crate::posts::PostList;
use crate::spool::{ShardMatrix, SpoolLane};

/// Slots in the rolling genome-2 post buffer (power of two).
pub const POST_BUF_LEN: usize = 0x1000;
const POST_BUF_MASK: usize = POST_BUF_LEN - 1;

/// Seed statistics accumulated per lane and summed at join.
#[derive(Debug, Default, Clone, Copy)]
pub struct MergeStats {
    /// Seed pairs emitted.
    pub nhits: u64,
    /// Genome-1 posts visited.
    pub g1len: u64,
    /// Sum of seed lengths, for the average.
    pub tseed: u64,
}

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nhits == 0 {
            return write!(f, "Total seeds = 0");
        }
        write!(
            f,
            "Total seeds = {}, ave. len = {:.1}, seeds per G1 position = {:.1}",
            self.nhits,
            self.tseed as f64 / self.nhits as f64,
            self.nhits as f64 / self.g1len as f64
        )
    }
}

/// Everything a merge lane needs that is shared and immutable.
pub struct MergeContext<'a> {
    pub root1: &'a Path,
    pub root2: &'a Path,
    pub geo: &'a Geometry,
    /// A-contig (sorted index) to A-panel.
    pub select: &'a [u32],
    pub nparts: usize,
    pub nconts: usize,
    /// Adaptive-seed frequency cutoff.
    pub freq: usize,
    /// Largest prefix-panel entry count of the genome-2 table.
    pub maxp: u64,
    pub sort_path: &'a Path,
    pub pair_name: &'a str,
}

/// Run the merge phase: `T` lanes, joined, shards transposed.
pub fn adaptamer_merge(ctx: &MergeContext) -> Result<(ShardMatrix, MergeStats)> {
    let nthreads = ctx.geo.nthreads;
    let mut results = Vec::with_capacity(nthreads);
    thread::scope(|s| {
        let mut handles = Vec::with_capacity(nthreads);
        for tid in 0..nthreads {
            handles.push(s.spawn(move || merge_lane(ctx, tid)));
        }
        for h in handles {
            results.push(h.join().expect("merge lane panicked"));
        }
    });

    let mut lanes = Vec::with_capacity(nthreads);
    let mut stats = MergeStats::default();
    for r in results {
        let (lane, st) = r?;
        stats.nhits += st.nhits;
        stats.g1len += st.g1len;
        stats.tseed += st.tseed;
        lanes.push(lane);
    }
    Ok((ShardMatrix::from_lanes(lanes, ctx.nparts), stats))
}

/// Fetch any not-yet-seen posts of entry `*l`, account its count into
/// the consumed-window cursor, and step `*l` one entry.
#[allow(clippy::too_many_arguments)]
#[inline]
fn advance(
    l: &mut usize,
    cache: &[u8],
    krec: usize,
    cbyte: usize,
    post: &mut [u64],
    pdx: &mut usize,
    cdx: &mut usize,
    vhgh: &mut usize,
    p2: &mut PostList,
) -> Result<()> {
    let cnt = cache[*l * krec + cbyte] as usize;
    if *l >= *vhgh {
        for _ in 0..cnt {
            *pdx = (*pdx + 1) & POST_BUF_MASK;
            post[*pdx] = p2.current_value();
            p2.next()?;
        }
        *vhgh = *l + 1;
    }
    *cdx = (*cdx + cnt) & POST_BUF_MASK;
    *l += 1;
    Ok(())
}

fn merge_lane(ctx: &MergeContext, tid: usize) -> Result<(crate::spool::FinishedLane, MergeStats)> {
    let geo = ctx.geo;
    let freq = ctx.freq;
    let krec = geo.kbyte;
    let cbyte = geo.cbyte;
    let lbyte = geo.lbyte;
    let kmer = geo.kmer;

    let mut t1 = KmerStream::open(ctx.root1)?;
    let mut t2 = KmerStream::open(ctx.root2)?;
    let mut p1 = PostList::open(ctx.root1)?;
    let mut p2 = PostList::open(ctx.root2)?;
    let mut lane = SpoolLane::create(
        ctx.sort_path,
        ctx.pair_name,
        tid,
        ctx.nparts,
        ctx.nconts,
        geo.prec,
    )?;

    // Lane tid covers table parts [tid*T, (tid+1)*T) of both indexes;
    // the fixed prefix split keeps all four streams panel-aligned.
    let tt = geo.nthreads;
    if tid > 0 {
        let b = tt * tid - 1;
        let s1 = t1.neps()[b];
        let s2 = t2.neps()[b];
        let q1 = p1.neps()[b];
        let q2 = p2.neps()[b];
        t1.goto(s1)?;
        t2.goto(s2)?;
        p1.goto(q1)?;
        p2.goto(q2)?;
    }
    let tend = t1.neps()[tt * (tid + 1) - 1];

    let mut cache = vec![0u8; (ctx.maxp as usize + 1) * krec];
    let mut post = vec![0u64; POST_BUF_LEN + freq];
    let mut vlcp = vec![0usize; kmer + 1];

    let mut ctop = 0usize;
    let mut rend = 0usize;
    let mut vhgh = 0usize;
    let mut vlow: isize = -1;
    let mut pdx = POST_BUF_MASK;
    let mut cdx = 0usize;
    let mut plen = 0usize;
    let mut eorun = false;
    let mut cpre = usize::MAX;
    let sentinel = geo.lcp_sentinel();

    let asign_shift = (8 * geo.ibyte - 1) as u32;
    let jsign_shift = (8 * geo.jbyte - 1) as u32;
    let amask = !(1u64 << asign_shift);

    let mut stats = MergeStats::default();
    let mut suf1 = [0u8; 16];
    let mut abuf = [0u8; 8];
    let mut jbuf = [0u8; 8];

    while t1.cidx() < tend {
        suf1[..krec].copy_from_slice(t1.csuf());
        let acnt = suf1[cbyte] as usize;
        let mut to_pairs = false;

        if t1.cpre() != cpre {
            // New prefix panel: drain the counts of any unconsumed cache
            // tail and of the skipped T2 panels, then jump P2 past them.
            let mut bidx = 0u64;
            for e in vhgh..ctop {
                bidx += cache[e * krec + cbyte] as u64;
            }
            cpre = t1.cpre();
            while t2.cpre() < cpre {
                bidx += t2.cnt() as u64;
                t2.next()?;
            }
            p2.jump(bidx)?;

            // Cache the T2 entries of this panel, sentinel on top.
            ctop = 0;
            while t2.cpre() == cpre {
                cache[ctop * krec..(ctop + 1) * krec].copy_from_slice(t2.csuf());
                ctop += 1;
                t2.next()?;
            }
            cache[ctop * krec + lbyte] = sentinel;

            // Nothing to match: skip every T1 entry of this panel.
            if ctop == 0 {
                let mut skip = 0u64;
                while t1.cidx() < t1.nels() && t1.cpre() == cpre {
                    skip += t1.cnt() as u64;
                    t1.next()?;
                }
                p1.jump(skip)?;
                continue;
            }

            plen = geo.pfx_bases;
            vlcp[plen] = 0;
            rend = 0;
            vlow = -1;
            vhgh = 0;
            pdx = POST_BUF_MASK;
            cdx = 0;
            eorun = false;
        } else {
            // eorun = 0: [vlcp[plen], rend] all match plen bases of the
            //            current k-mer, rend included.
            // eorun = 1: [vlcp[plen], rend) match, lcp(rend) < plen.
            let nlcp = suf1[lbyte] as usize;
            if nlcp > plen {
                to_pairs = true;
            } else if nlcp == plen {
                if eorun {
                    to_pairs = true;
                }
            } else {
                if !eorun {
                    advance(&mut rend, &cache, krec, cbyte, &mut post, &mut pdx, &mut cdx, &mut vhgh, &mut p2)?;
                }
                while cache[rend * krec + lbyte] as usize > nlcp {
                    advance(&mut rend, &cache, krec, cbyte, &mut post, &mut pdx, &mut cdx, &mut vhgh, &mut p2)?;
                }
                plen = cache[rend * krec + lbyte] as usize;
                if plen < nlcp {
                    eorun = true;
                    plen = nlcp;
                    to_pairs = true;
                } else {
                    // vlcp[plen] still marks this window's start
                    eorun = false;
                }
            }
        }

        if !to_pairs {
            // Extend the shared prefix one base at a time, sliding the
            // window over T2 entries that keep up.
            loop {
                if plen >= kmer {
                    advance(&mut rend, &cache, krec, cbyte, &mut post, &mut pdx, &mut cdx, &mut vhgh, &mut p2)?;
                    eorun = true;
                    break;
                }
                let h = geo.suf_byte(plen);
                let msk = base_mask(plen);
                let c = suf1[h] & msk;
                let mut stop = false;
                loop {
                    let d = cache[rend * krec + h] & msk;
                    if d < c {
                        advance(&mut rend, &cache, krec, cbyte, &mut post, &mut pdx, &mut cdx, &mut vhgh, &mut p2)?;
                        if (cache[rend * krec + lbyte] as usize) < plen {
                            eorun = true;
                            stop = true;
                            break;
                        }
                    } else {
                        if d > c {
                            stop = true;
                        }
                        break;
                    }
                }
                if stop {
                    break;
                }
                plen += 1;
                vlcp[plen] = rend;
            }
        }

        // Count the inclusive prefix group; below FREQ emits pairs,
        // at or above records the suppression frontier.
        let mut over = false;
        let vcp = vlcp[plen];
        let mut fsum = 0usize;
        if (vcp as isize) <= vlow {
            over = true;
        } else {
            let mut l = rend as isize - 1;
            while l >= vcp as isize {
                fsum += cache[l as usize * krec + cbyte] as usize;
                if fsum >= freq {
                    vlow = l;
                    over = true;
                    break;
                }
                l -= 1;
            }
        }
        let lcs = fsum;
        if !over && !eorun {
            let udx = cdx;
            fsum += cache[rend * krec + cbyte] as usize;
            if fsum >= freq {
                over = true;
            } else {
                let mut l = rend;
                advance(&mut l, &cache, krec, cbyte, &mut post, &mut pdx, &mut cdx, &mut vhgh, &mut p2)?;
                while cache[l * krec + lbyte] as usize >= plen {
                    fsum += cache[l * krec + cbyte] as usize;
                    if fsum >= freq {
                        over = true;
                        break;
                    }
                    advance(&mut l, &cache, krec, cbyte, &mut post, &mut pdx, &mut cdx, &mut vhgh, &mut p2)?;
                }
            }
            cdx = udx;
        }

        if over {
            p1.jump(acnt as u64)?;
            t1.next()?;
            continue;
        }

        // Unwrap the window if it straddles the rolling-buffer end; the
        // FREQ overflow slots make the copy safe.
        let b = if cdx >= lcs { cdx - lcs } else { cdx + POST_BUF_LEN - lcs };
        if b + fsum > POST_BUF_LEN {
            let m = (b + fsum) & POST_BUF_MASK;
            for i in 0..m {
                post[POST_BUF_LEN + i] = post[i];
            }
        }

        stats.nhits += (acnt * fsum) as u64;
        stats.g1len += acnt as u64;
        stats.tseed += (acnt * fsum * plen) as u64;

        for _ in 0..acnt {
            let araw = p1.current_value();
            let asign = (araw >> asign_shift) & 1;
            let aval = araw & amask;
            let acont = (aval >> geo.eshift) as usize;
            if acont >= ctx.select.len() {
                return Err(GaleError::Mismatch(format!(
                    "post names contig {} beyond genome-1 contig count",
                    acont
                )));
            }
            let adest = ctx.select[acont] as usize;
            write_field(&mut abuf, geo.ibyte, aval);
            for k in 0..fsum {
                let jraw = post[b + k];
                write_field(&mut jbuf, geo.jbyte, jraw);
                if asign == (jraw >> jsign_shift) & 1 {
                    lane.nunits[adest].push(plen as u8, &abuf[..geo.ibyte], &jbuf[..geo.jbyte])?;
                    lane.nbuck[acont] += 1;
                } else {
                    lane.cunits[adest].push(plen as u8, &abuf[..geo.ibyte], &jbuf[..geo.jbyte])?;
                    lane.cbuck[acont] += 1;
                }
            }
            p1.next()?;
        }
        t1.next()?;
    }

    let fin = lane.finish()?;
    Ok((fin, stats))
}
