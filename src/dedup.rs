//! Redundancy elimination over one contig pair's alignments.
//!
//! Two passes over the alignments sorted by A-start. Pass 1 removes
//! exact-boundary duplicates (same starts and/or same ends). Pass 2
//! compares alignments that overlap in both axes by `entwine`-ing their
//! traces: if the traces touch they are fusion candidates and both are
//! kept; otherwise strict containment on the B-axis eliminates the
//! contained one. The legacy A-containment heuristics compile only
//! under the `strict-contain` feature.

use crate::overlap::{AlnPath, Overlap, ELIM_FLAG};

/// Signed B-offset summary of two traces along a shared A-grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entwine {
    /// Offset nearest zero seen along the grid (sticky at zero).
    pub min: i32,
    /// Average offset.
    pub avg: i32,
    /// A-coordinate where the traces touched, or -1.
    pub at: i32,
}

/// Walk the A-grid of `tspace` samples shared by `jpath` (the earlier
/// alignment) and `kpath`, measuring the signed B-offset of `kpath`
/// above `jpath` at each sample. Requires `jpath.abpos <= kpath.abpos`
/// and overlap in A.
pub fn entwine(jpath: &AlnPath, kpath: &AlnPath, tspace: i32) -> Entwine {
    let jtrace = &jpath.trace;
    let ktrace = &kpath.trace;
    let mut at = -1i32;

    let mut y2 = jpath.bbpos;
    let mut b2 = kpath.bbpos;
    let jp = jpath.abpos / tspace;
    let kp = kpath.abpos / tspace;

    let mut ac = kp * tspace;
    let mut j = (1 + 2 * (kp - jp)) as usize;
    let mut k = 1usize;
    for i in (1..j).step_by(2) {
        y2 += jtrace[i] as i32;
    }

    let yp = if j == 1 {
        y2 + (jtrace[j] as i32 * (kpath.abpos - jpath.abpos)) / (ac + tspace - jpath.abpos)
    } else {
        y2 + (jtrace[j] as i32 * (kpath.abpos - ac)) / tspace
    };

    let mut num = b2 - yp;
    let mut den = 1i32;
    let mut min = num;

    let ae = jpath.aepos.min(kpath.aepos);

    ac += tspace;
    while ac < ae {
        y2 += jtrace[j] as i32;
        b2 += ktrace[k] as i32;
        j += 2;
        k += 2;

        let i = b2 - y2;
        num += i;
        den += 1;
        if min < 0 && min < i {
            min = if i >= 0 { 0 } else { i };
        } else if min > 0 && min > i {
            min = if i <= 0 { 0 } else { i };
        }
        if i == 0 {
            at = ac;
        }
        ac += tspace;
    }
    ac -= tspace;

    if ae == jpath.aepos {
        y2 = jpath.bepos;
        if kpath.aepos >= ac {
            b2 += (ktrace[k] as i32 * (ae - ac)) / tspace;
        } else {
            b2 += (ktrace[k] as i32 * (ae - ac)) / (kpath.aepos - ac);
        }
    } else {
        b2 = kpath.bepos;
        if jpath.aepos >= ac {
            y2 += (jtrace[j] as i32 * (ae - ac)) / tspace;
        } else {
            y2 += (jtrace[j] as i32 * (ae - ac)) / (jpath.aepos - ac);
        }
    }

    let i = b2 - y2;
    num += i;
    den += 1;
    if min < 0 && min < i {
        min = if i >= 0 { 0 } else { i };
    } else if min > 0 && min > i {
        min = if i <= 0 { 0 } else { i };
    }

    Entwine { min, avg: num / den, at }
}

#[inline]
fn elim(o: &Overlap) -> bool {
    o.flags & ELIM_FLAG != 0
}

/// Run both elimination passes. Returns the indices of the survivors
/// in ascending A-start order.
pub fn eliminate(ovls: &mut [Overlap], tspace: i32) -> Vec<usize> {
    let n = ovls.len();
    let mut perm: Vec<usize> = (0..n).collect();
    perm.sort_by_key(|&i| ovls[i].path.abpos);

    // Pass 1: exact-boundary duplicates.
    for j in (0..n).rev() {
        let o = perm[j];
        for kx in j + 1..n {
            let w = perm[kx];
            if ovls[o].path.aepos <= ovls[w].path.abpos {
                break;
            }
            if elim(&ovls[w]) {
                continue;
            }
            let (op, wp) = (&ovls[o].path, &ovls[w].path);
            if op.abpos == wp.abpos && op.bbpos == wp.bbpos {
                if op.aepos == wp.aepos && op.bepos == wp.bepos {
                    if op.diffs <= wp.diffs {
                        ovls[w].flags |= ELIM_FLAG;
                        continue;
                    } else {
                        ovls[o].flags |= ELIM_FLAG;
                        break;
                    }
                } else if op.aepos > wp.aepos {
                    ovls[w].flags |= ELIM_FLAG;
                    continue;
                } else {
                    ovls[o].flags |= ELIM_FLAG;
                    break;
                }
            } else if op.aepos == wp.aepos && op.bepos == wp.bepos {
                if op.abpos < wp.abpos {
                    ovls[w].flags |= ELIM_FLAG;
                    continue;
                } else {
                    ovls[o].flags |= ELIM_FLAG;
                    break;
                }
            }
        }
    }

    // Pass 2: entwined and contained alignments.
    for j in (0..n).rev() {
        let o = perm[j];
        if elim(&ovls[o]) {
            continue;
        }
        for kx in j + 1..n {
            let w = perm[kx];
            if ovls[o].path.aepos <= ovls[w].path.abpos {
                break;
            }
            if elim(&ovls[w]) {
                continue;
            }
            if ovls[o].path.bepos <= ovls[w].path.bbpos
                || ovls[o].path.bbpos >= ovls[w].path.bepos
            {
                continue;
            }

            let e = entwine(&ovls[o].path, &ovls[w].path, tspace);
            if e.at >= 0 {
                // traces touch: fusion candidate, keep both
                continue;
            }
            if e.min < 0 && ovls[w].path.bepos <= ovls[o].path.bepos + 10 {
                ovls[w].flags |= ELIM_FLAG;
                continue;
            }
            if e.min > 0
                && ovls[w].path.abpos <= ovls[o].path.abpos + 10
                && ovls[w].path.bepos + 10 >= ovls[o].path.bepos
            {
                ovls[o].flags |= ELIM_FLAG;
                break;
            }

            #[cfg(feature = "strict-contain")]
            {
                if ovls[o].path.abpos <= ovls[w].path.abpos
                    && ovls[o].path.aepos >= ovls[w].path.aepos
                {
                    ovls[w].flags |= ELIM_FLAG;
                }
                if ovls[w].path.abpos <= ovls[o].path.abpos
                    && ovls[w].path.aepos >= ovls[o].path.aepos
                {
                    ovls[o].flags |= ELIM_FLAG;
                }
            }
        }
    }

    perm.into_iter().filter(|&i| !elim(&ovls[i])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An ungapped alignment at B-offset `boff` over `[abpos, aepos)`.
    fn diagonal_aln(abpos: i32, aepos: i32, boff: i32, diffs: i32, tspace: i32) -> Overlap {
        let mut trace = Vec::new();
        let panels = (aepos - 1) / tspace - abpos / tspace + 1;
        let mut a = abpos;
        for p in 0..panels {
            let stop = ((abpos / tspace + p + 1) * tspace).min(aepos);
            trace.push(if p == 0 { diffs as u16 } else { 0 });
            trace.push((stop - a) as u16);
            a = stop;
        }
        Overlap {
            flags: 0,
            aread: 0,
            bread: 0,
            path: AlnPath {
                abpos,
                aepos,
                bbpos: abpos + boff,
                bepos: aepos + boff,
                diffs,
                trace,
            },
        }
    }

    #[test]
    fn test_entwine_offset_sign() {
        let a = diagonal_aln(0, 1000, 0, 0, 100);
        let b = diagonal_aln(100, 900, 50, 0, 100);
        let e = entwine(&a.path, &b.path, 100);
        assert!(e.min > 0);
        assert_eq!(e.at, -1);
        let c = diagonal_aln(100, 900, -50, 0, 100);
        let e = entwine(&a.path, &c.path, 100);
        assert!(e.min < 0);
    }

    #[test]
    fn test_entwine_antisymmetry() {
        let a = diagonal_aln(0, 1000, 30, 0, 100);
        let b = diagonal_aln(0, 800, -20, 0, 100);
        let e1 = entwine(&a.path, &b.path, 100);
        let e2 = entwine(&b.path, &a.path, 100);
        assert_eq!(e1.min, -e2.min);
    }

    #[test]
    fn test_entwine_antisymmetry_randomized() {
        let mut s = 12345u64;
        let mut next = |m: i32| -> i32 {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((s >> 33) as i32).rem_euclid(m)
        };
        for _ in 0..50 {
            let alen1 = 300 + next(2000);
            let alen2 = 300 + next(2000);
            let b1 = next(300);
            let b2 = next(300);
            let a = diagonal_aln(0, alen1, b1, 0, 100);
            let b = diagonal_aln(0, alen2, b2, 0, 100);
            let e1 = entwine(&a.path, &b.path, 100);
            let e2 = entwine(&b.path, &a.path, 100);
            assert_eq!(e1.min, -e2.min, "boff {} vs {}", b1, b2);
            assert_eq!(e1.at, e2.at);
        }
    }

    #[test]
    fn test_entwine_crossing_detected() {
        let a = diagonal_aln(0, 1000, 0, 0, 100);
        let b = diagonal_aln(200, 1000, 0, 0, 100);
        let e = entwine(&a.path, &b.path, 100);
        assert!(e.at >= 0);
    }

    #[test]
    fn test_pass1_exact_duplicate_keeps_fewer_diffs() {
        let mut ovls = vec![
            diagonal_aln(0, 500, 0, 7, 100),
            diagonal_aln(0, 500, 0, 3, 100),
        ];
        let keep = eliminate(&mut ovls, 100);
        assert_eq!(keep.len(), 1);
        assert_eq!(ovls[keep[0]].path.diffs, 3);
    }

    #[test]
    fn test_pass1_same_start_keeps_longer() {
        let mut ovls = vec![
            diagonal_aln(0, 300, 0, 0, 100),
            diagonal_aln(0, 500, 0, 0, 100),
        ];
        let keep = eliminate(&mut ovls, 100);
        assert_eq!(keep.len(), 1);
        assert_eq!(ovls[keep[0]].path.aepos, 500);
    }

    #[test]
    fn test_pass2_contained_eliminated() {
        // w sits strictly inside o on a slightly lower B diagonal, so
        // entwine reports min < 0 and containment removes it
        let mut ovls = vec![
            diagonal_aln(0, 1000, 0, 0, 100),
            diagonal_aln(150, 650, -10, 0, 100),
        ];
        let keep = eliminate(&mut ovls, 100);
        assert_eq!(keep.len(), 1);
        assert_eq!(ovls[keep[0]].path.aepos, 1000);
    }

    #[test]
    fn test_pass2_parallel_kept() {
        // far-apart diagonals that overlap in A but not B: untouched
        let mut ovls = vec![
            diagonal_aln(0, 1000, 0, 0, 100),
            diagonal_aln(0, 1000, 2000, 0, 100),
        ];
        let keep = eliminate(&mut ovls, 100);
        assert_eq!(keep.len(), 2);
    }

    #[test]
    fn test_idempotent() {
        let mut ovls = vec![
            diagonal_aln(0, 1000, 0, 0, 100),
            diagonal_aln(150, 650, -10, 0, 100),
            diagonal_aln(300, 1400, 700, 2, 100),
            diagonal_aln(300, 1400, 700, 5, 100),
        ];
        let keep = eliminate(&mut ovls, 100);
        let mut survivors: Vec<Overlap> = keep.iter().map(|&i| ovls[i].clone()).collect();
        let again = eliminate(&mut survivors, 100);
        assert_eq!(again.len(), survivors.len());
        assert_eq!(again, (0..survivors.len()).collect::<Vec<_>>());
    }
}
