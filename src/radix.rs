//! In-place MSD radix sort over fixed-width byte records.
//!
//! Seed records are sorted by their trailing `ksize` bytes with the
//! *last* byte most significant, matching the little-endian field
//! layout: within an A-contig span the resulting order is
//! (b_contig, diag_bucket, a_post). The caller supplies the per-contig
//! `panel` partition (records are already grouped by A-contig via the
//! scatter writes), so the sort only has to handle each span, and spans
//! sort in parallel.
//!
//! The same module owns [`SortArray`], the one shared mutable buffer of
//! the pipeline: reimport workers scatter records into disjoint slots
//! computed from bucket prefix sums.

use std::cell::UnsafeCell;

use rayon::prelude::*;

/// Below this many records a span uses insertion sort.
const INSERTION_CUTOFF: usize = 24;

/// A search worker's share of the sorted array: a half-open A-contig
/// range and the byte offset it starts at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub beg: usize,
    pub end: usize,
    pub off: u64,
}

/// Compare the trailing `ksize` bytes of two records, last byte most
/// significant.
#[inline]
fn key_less(a: &[u8], b: &[u8], swide: usize, ksize: usize) -> bool {
    for i in ((swide - ksize)..swide).rev() {
        if a[i] != b[i] {
            return a[i] < b[i];
        }
    }
    false
}

/// Insertion sort for small spans.
fn insertion_sort(data: &mut [u8], swide: usize, ksize: usize) {
    let n = data.len() / swide;
    let mut tmp = vec![0u8; swide];
    for i in 1..n {
        let mut j = i;
        tmp.copy_from_slice(&data[i * swide..(i + 1) * swide]);
        while j > 0 && key_less(&tmp, &data[(j - 1) * swide..j * swide], swide, ksize) {
            data.copy_within((j - 1) * swide..j * swide, j * swide);
            j -= 1;
        }
        data[j * swide..(j + 1) * swide].copy_from_slice(&tmp);
    }
}

/// American-flag pass on byte `key`, then recurse toward the least
/// significant key byte.
fn sort_span(data: &mut [u8], swide: usize, ksize: usize, key: usize) {
    let n = data.len() / swide;
    if n < 2 {
        return;
    }
    if n <= INSERTION_CUTOFF {
        insertion_sort(data, swide, ksize);
        return;
    }

    let mut count = [0usize; 256];
    for r in 0..n {
        count[data[r * swide + key] as usize] += 1;
    }
    let mut start = [0usize; 256];
    let mut stop = [0usize; 256];
    let mut cum = 0usize;
    for b in 0..256 {
        start[b] = cum;
        cum += count[b];
        stop[b] = cum;
    }

    let mut next = start;
    let mut tmp = vec![0u8; swide];
    for b in 0..256 {
        while next[b] < stop[b] {
            let c = data[next[b] * swide + key] as usize;
            if c == b {
                next[b] += 1;
            } else {
                let (i, j) = (next[b] * swide, next[c] * swide);
                tmp.copy_from_slice(&data[i..i + swide]);
                data.copy_within(j..j + swide, i);
                data[j..j + swide].copy_from_slice(&tmp);
                next[c] += 1;
            }
        }
    }

    if key > swide - ksize {
        for b in 0..256 {
            if count[b] > 1 {
                sort_span(&mut data[start[b] * swide..stop[b] * swide], swide, ksize, key - 1);
            }
        }
    }
}

/// Sort `sarray` (exactly `sum(panel)` bytes of `swide`-wide records,
/// grouped by A-contig per `panel`) on the trailing `ksize` key bytes,
/// and carve balanced per-worker contig ranges. Returns the ranges
/// actually populated (at most `nthreads`).
pub fn radix_sort(
    sarray: &mut [u8],
    swide: usize,
    ksize: usize,
    panel: &[u64],
    nthreads: usize,
) -> Vec<Range> {
    debug_assert_eq!(sarray.len() as u64, panel.iter().sum::<u64>());

    let mut spans: Vec<&mut [u8]> = Vec::with_capacity(panel.len());
    let mut rest = sarray;
    for &bytes in panel {
        let (span, tail) = rest.split_at_mut(bytes as usize);
        spans.push(span);
        rest = tail;
    }
    spans
        .into_par_iter()
        .for_each(|span| sort_span(span, swide, ksize, swide - 1));

    worker_ranges(panel, nthreads)
}

/// Assign whole contigs to workers so byte loads stay balanced.
fn worker_ranges(panel: &[u64], nthreads: usize) -> Vec<Range> {
    let total: u64 = panel.iter().sum();
    let mut ranges: Vec<Range> = Vec::with_capacity(nthreads);
    if total == 0 {
        return ranges;
    }
    let mut beg = 0usize;
    let mut cum = 0u64;
    for w in 0..nthreads {
        if beg >= panel.len() {
            break;
        }
        let target = (total * (w as u64 + 1)) / nthreads as u64;
        let off = cum;
        let mut end = beg;
        while end < panel.len() && cum < target {
            cum += panel[end];
            end += 1;
        }
        if end > beg {
            ranges.push(Range { beg, end, off });
            beg = end;
        }
    }
    // Trailing record-free contigs fold into the last range.
    if let Some(last) = ranges.last_mut() {
        last.end = panel.len();
    }
    ranges
}

/// The shared seed sort buffer. Reimport workers scatter records into
/// slots assigned by bucket prefix sums; slot ranges of different
/// workers never overlap, which is what makes the raw writes sound.
/// The bytes live in `UnsafeCell`s so the shared-reference writes stay
/// within the aliasing rules.
pub struct SortArray {
    data: Vec<UnsafeCell<u8>>,
    swide: usize,
}

// Soundness: concurrent access is only through `write_slot` on disjoint
// slots (enforced by the exclusive prefix-sum offsets).
unsafe impl Sync for SortArray {}

impl SortArray {
    /// Allocate room for `nslots` records plus the one-slot overrun pad
    /// the bucket walk reads.
    pub fn new(nslots: usize, swide: usize) -> SortArray {
        let mut data = Vec::new();
        data.resize_with((nslots + 1) * swide, || UnsafeCell::new(0));
        SortArray { data, swide }
    }

    /// Write one record into `slot`.
    ///
    /// # Safety
    /// No two concurrent callers may pass the same slot, and `bytes`
    /// must be exactly one record wide.
    #[inline]
    pub unsafe fn write_slot(&self, slot: u64, bytes: &[u8]) {
        debug_assert_eq!(bytes.len(), self.swide);
        let off = slot as usize * self.swide;
        let dst = self.data[off].get();
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, self.swide);
    }

    /// Exclusive view once the scatter is complete.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        // UnsafeCell<u8> is repr(transparent) over u8
        let len = self.data.len();
        let ptr = self.data.as_mut_ptr() as *mut u8;
        unsafe { std::slice::from_raw_parts_mut(ptr, len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn oracle_sort(records: &mut Vec<Vec<u8>>, swide: usize, ksize: usize) {
        records.sort_by(|a, b| {
            for i in ((swide - ksize)..swide).rev() {
                match a[i].cmp(&b[i]) {
                    std::cmp::Ordering::Equal => continue,
                    o => return o,
                }
            }
            std::cmp::Ordering::Equal
        });
    }

    #[test]
    fn test_sort_matches_oracle() {
        let mut rng = SmallRng::seed_from_u64(42);
        let swide = 7;
        let ksize = 5;
        for n in [0usize, 1, 2, 20, 300, 5000] {
            let mut records: Vec<Vec<u8>> =
                (0..n).map(|_| (0..swide).map(|_| rng.gen()).collect()).collect();
            let mut flat: Vec<u8> = records.iter().flatten().copied().collect();
            let ranges = radix_sort(&mut flat, swide, ksize, &[(n * swide) as u64], 4);
            oracle_sort(&mut records, swide, ksize);
            let want: Vec<u8> = records.iter().flatten().copied().collect();
            // first two bytes are payload, compare keys only
            for r in 0..n {
                assert_eq!(
                    &flat[r * swide + 2..(r + 1) * swide],
                    &want[r * swide + 2..(r + 1) * swide],
                    "record {} of {}",
                    r,
                    n
                );
            }
            if n > 0 {
                assert_eq!(ranges.len(), 1);
                assert_eq!(ranges[0], Range { beg: 0, end: 1, off: 0 });
            }
        }
    }

    #[test]
    fn test_panels_sorted_independently() {
        let mut rng = SmallRng::seed_from_u64(7);
        let swide = 6;
        let ksize = 4;
        let counts = [13usize, 0, 257, 40];
        let panel: Vec<u64> = counts.iter().map(|&c| (c * swide) as u64).collect();
        let mut flat: Vec<u8> = Vec::new();
        for &c in &counts {
            for _ in 0..c * swide {
                flat.push(rng.gen());
            }
        }
        radix_sort(&mut flat, swide, ksize, &panel, 2);
        let mut off = 0usize;
        for &c in &counts {
            for r in 1..c {
                let a = &flat[off + (r - 1) * swide..off + r * swide];
                let b = &flat[off + r * swide..off + (r + 1) * swide];
                assert!(!key_less(b, a, swide, ksize));
            }
            off += c * swide;
        }
    }

    #[test]
    fn test_worker_ranges_tile() {
        let panel = vec![10u64, 0, 30, 5, 5, 100, 1];
        let ranges = worker_ranges(&panel, 3);
        assert!(!ranges.is_empty());
        assert_eq!(ranges[0].beg, 0);
        assert_eq!(ranges.last().unwrap().end, panel.len());
        let mut off = 0u64;
        for w in 0..ranges.len() {
            assert_eq!(ranges[w].off, off);
            if w > 0 {
                assert_eq!(ranges[w].beg, ranges[w - 1].end);
            }
            off += panel[ranges[w].beg..ranges[w].end].iter().sum::<u64>();
        }
    }

    #[test]
    fn test_scatter_array() {
        let arr = SortArray::new(4, 3);
        std::thread::scope(|s| {
            let a = &arr;
            s.spawn(move || unsafe {
                a.write_slot(0, &[1, 2, 3]);
                a.write_slot(2, &[7, 8, 9]);
            });
            s.spawn(move || unsafe {
                a.write_slot(1, &[4, 5, 6]);
                a.write_slot(3, &[10, 11, 12]);
            });
        });
        let mut arr = arr;
        assert_eq!(&arr.as_mut_slice()[..12], &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
    }
}
