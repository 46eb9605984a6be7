//! Reference genome indexer.
//!
//! Builds the three index artifacts the aligner consumes (k-mer table,
//! position list, sequence database) from in-memory contigs. The
//! production indexer is a separate tool; this module exists so the
//! integration tests can assemble complete inputs, and it pins the file
//! formats the streams read.
//!
//! K-mers are indexed canonically: each position contributes the
//! lexicographically smaller of the forward k-mer and its reverse
//! complement, with the post's sign bit recording which one won. Parts
//! split the prefix space at fixed boundaries so the part files of any
//! two genomes align on panel boundaries.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::layout::{base_code, comp_code, pack_codes, write_field};

/// Parameters for building an index.
#[derive(Debug, Clone, Copy)]
pub struct IndexParams {
    /// K-mer length in bases (at most 40).
    pub kmer: usize,
    /// Worker lanes; the index is sharded into `nthreads^2` parts.
    pub nthreads: usize,
    /// Frequency cap: k-mers occurring more often are dropped (max 255).
    pub freq: usize,
    /// Prefix bytes of the table's panel index.
    pub pfx_bytes: usize,
}

/// One table entry plus its posts, in canonical sort order.
struct Entry {
    /// Packed canonical k-mer.
    packed: Vec<u8>,
    /// Bases shared with the previous entry.
    lcp: u8,
    /// Post values (offset | contig | sign), already sorted.
    posts: Vec<u64>,
}

/// A fully built index, ready to be written.
pub struct GenomeIndex {
    params: IndexParams,
    /// `perm[sorted] = physical`, descending length.
    perm: Vec<u32>,
    /// Physical contig lengths.
    rlens: Vec<i64>,
    /// Contigs as 2-bit codes, physical order.
    contigs: Vec<Vec<u8>>,
    /// Table entries in canonical order.
    entries: Vec<Entry>,
    /// Cumulative entries per prefix value.
    pfx: Vec<u64>,
    /// Full post width and its contig+sign part.
    pbyte: usize,
    cbyte: usize,
    /// Largest entry count of any single prefix.
    maxp: u64,
}

/// Convert an ASCII sequence to 2-bit codes (test convenience).
pub fn seq_codes(s: &str) -> Vec<u8> {
    s.bytes().map(base_code).collect()
}

/// Reverse complement of a code sequence.
pub fn revcomp(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&c| comp_code(c)).collect()
}

impl GenomeIndex {
    /// Build an index over `contigs` (2-bit codes, physical order).
    pub fn build(contigs: &[Vec<u8>], params: &IndexParams) -> GenomeIndex {
        assert!(params.kmer >= 4 * params.pfx_bytes + 1, "k too small for prefix");
        assert!(params.kmer <= 40, "k too large");
        assert!(params.freq >= 1 && params.freq <= 255, "freq cap must be 1..=255");

        let k = params.kmer;
        let nctg = contigs.len();
        let rlens: Vec<i64> = contigs.iter().map(|c| c.len() as i64).collect();

        // Sort permutation: descending length, stable on physical id.
        let mut perm: Vec<u32> = (0..nctg as u32).collect();
        perm.sort_by_key(|&c| (-rlens[c as usize], c));
        let mut inv = vec![0u32; nctg];
        for (s, &c) in perm.iter().enumerate() {
            inv[c as usize] = s as u32;
        }

        // Field widths: contig+sign bytes, then offset bytes.
        let mut cbyte = 1;
        while nctg as u64 >= 1u64 << (8 * cbyte - 1) {
            cbyte += 1;
        }
        let maxlen = rlens.iter().copied().max().unwrap_or(0) as u64;
        let mut obyte = 1;
        while maxlen >= 1u64 << (8 * obyte) {
            obyte += 1;
        }
        let pbyte = obyte + cbyte;

        // Accumulate canonical k-mers and their posts.
        let mut map: FxHashMap<Vec<u8>, Vec<u64>> = FxHashMap::default();
        for (c, seq) in contigs.iter().enumerate() {
            if seq.len() < k {
                continue;
            }
            let sctg = inv[c] as u64;
            for i in 0..=seq.len() - k {
                let fw = pack_codes(&seq[i..i + k]);
                let rc = pack_codes(&revcomp(&seq[i..i + k]));
                let (canon, sign) = if rc < fw { (rc, true) } else { (fw, false) };
                let mut post = i as u64 | (sctg << (8 * obyte));
                if sign {
                    post |= 1u64 << (8 * pbyte - 1);
                }
                map.entry(canon).or_default().push(post);
            }
        }

        let sign_mask = !(1u64 << (8 * pbyte - 1));
        let mut keys: Vec<Vec<u8>> = map
            .iter()
            .filter(|(_, v)| v.len() <= params.freq)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();

        let mut entries = Vec::with_capacity(keys.len());
        let mut prev: Option<Vec<u8>> = None;
        for key in keys {
            let mut posts = map.remove(&key).unwrap();
            posts.sort_by_key(|&p| (p & sign_mask, p));
            let lcp = match &prev {
                None => 0,
                Some(p) => lcp_bases(p, &key, k),
            };
            prev = Some(key.clone());
            entries.push(Entry { packed: key, lcp, posts });
        }

        // Cumulative prefix index over the whole table.
        let ixlen = 1usize << (8 * params.pfx_bytes);
        let mut pfx = vec![0u64; ixlen];
        for e in &entries {
            pfx[prefix_value(&e.packed, params.pfx_bytes)] += 1;
        }
        let mut maxp = 0u64;
        let mut cum = 0u64;
        for c in pfx.iter_mut() {
            if *c > maxp {
                maxp = *c;
            }
            cum += *c;
            *c = cum;
        }

        GenomeIndex {
            params: *params,
            perm,
            rlens,
            contigs: contigs.to_vec(),
            entries,
            pfx,
            pbyte,
            cbyte,
            maxp,
        }
    }

    /// Entry index ranges of the `nthreads^2` fixed prefix parts.
    fn part_bounds(&self) -> Vec<(usize, usize)> {
        let nparts = self.params.nthreads * self.params.nthreads;
        let ixlen = self.pfx.len();
        let mut bounds = Vec::with_capacity(nparts);
        for p in 0..nparts {
            let lo_pfx = p * ixlen / nparts;
            let hi_pfx = (p + 1) * ixlen / nparts;
            let lo = if lo_pfx == 0 { 0 } else { self.pfx[lo_pfx - 1] as usize };
            let hi = if hi_pfx == 0 { 0 } else { self.pfx[hi_pfx - 1] as usize };
            bounds.push((lo, hi));
        }
        bounds
    }

    /// Write `<root>.ktab`, `<root>.post`, `<root>.dam` and their parts.
    pub fn write(&self, root: &Path) -> Result<()> {
        self.write_ktab(root)?;
        self.write_post(root)?;
        self.write_seqdb(root)?;
        Ok(())
    }

    fn write_ktab(&self, root: &Path) -> Result<()> {
        let k = self.params.kmer;
        let ibyte = self.params.pfx_bytes;
        let mut stub = BufWriter::new(File::create(root.with_extension("ktab"))?);
        stub.write_all(&(k as i32).to_le_bytes())?;
        stub.write_all(&(ibyte as i32).to_le_bytes())?;
        stub.write_all(&(self.params.nthreads as i32).to_le_bytes())?;
        for &c in &self.pfx {
            stub.write_all(&(c as i64).to_le_bytes())?;
        }
        stub.flush()?;

        let dir = root.parent().unwrap_or_else(|| Path::new("."));
        let stem = root
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        for (p, (lo, hi)) in self.part_bounds().into_iter().enumerate() {
            let path = dir.join(format!(".{}.ktab.{}", stem, p + 1));
            let mut f = BufWriter::new(File::create(path)?);
            f.write_all(&(k as i32).to_le_bytes())?;
            f.write_all(&((hi - lo) as i64).to_le_bytes())?;
            for e in &self.entries[lo..hi] {
                f.write_all(&e.packed[ibyte..])?;
                f.write_all(&[e.posts.len() as u8, e.lcp])?;
            }
            f.flush()?;
        }
        Ok(())
    }

    fn write_post(&self, root: &Path) -> Result<()> {
        let mut stub = BufWriter::new(File::create(root.with_extension("post"))?);
        stub.write_all(&((self.pbyte - self.cbyte) as i32).to_le_bytes())?;
        stub.write_all(&(self.cbyte as i32).to_le_bytes())?;
        stub.write_all(&(self.params.nthreads as i32).to_le_bytes())?;
        stub.write_all(&(self.maxp as i64).to_le_bytes())?;
        stub.write_all(&(self.params.freq as i32).to_le_bytes())?;
        stub.write_all(&(self.perm.len() as i32).to_le_bytes())?;
        for &c in &self.perm {
            stub.write_all(&(c as i32).to_le_bytes())?;
        }
        stub.flush()?;

        let dir = root.parent().unwrap_or_else(|| Path::new("."));
        let stem = root
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut buf = vec![0u8; self.pbyte];
        for (p, (lo, hi)) in self.part_bounds().into_iter().enumerate() {
            let path = dir.join(format!(".{}.post.{}", stem, p + 1));
            let mut f = BufWriter::new(File::create(path)?);
            let nels: usize = self.entries[lo..hi].iter().map(|e| e.posts.len()).sum();
            f.write_all(&((self.pbyte - self.cbyte) as i32).to_le_bytes())?;
            f.write_all(&(self.cbyte as i32).to_le_bytes())?;
            f.write_all(&(nels as i64).to_le_bytes())?;
            for e in &self.entries[lo..hi] {
                for &post in &e.posts {
                    write_field(&mut buf, self.pbyte, post);
                    f.write_all(&buf)?;
                }
            }
            f.flush()?;
        }
        Ok(())
    }

    fn write_seqdb(&self, root: &Path) -> Result<()> {
        let mut stub = BufWriter::new(File::create(root.with_extension("dam"))?);
        let mut bps = BufWriter::new(File::create(root.with_extension("bps"))?);
        let totlen: i64 = self.rlens.iter().sum();
        stub.write_all(&(self.rlens.len() as i32).to_le_bytes())?;
        stub.write_all(&totlen.to_le_bytes())?;
        let mut boff = 0u64;
        for (c, seq) in self.contigs.iter().enumerate() {
            stub.write_all(&self.rlens[c].to_le_bytes())?;
            stub.write_all(&(boff as i64).to_le_bytes())?;
            let packed = pack_codes(seq);
            bps.write_all(&packed)?;
            boff += packed.len() as u64;
        }
        stub.flush()?;
        bps.flush()?;
        Ok(())
    }

    /// Number of table entries (for tests).
    pub fn nels(&self) -> usize {
        self.entries.len()
    }
}

/// Big-endian value of the first `ibyte` packed bytes.
fn prefix_value(packed: &[u8], ibyte: usize) -> usize {
    let mut v = 0usize;
    for &b in &packed[..ibyte] {
        v = (v << 8) | b as usize;
    }
    v
}

/// Bases shared by two packed k-mers, capped at `k - 1`.
fn lcp_bases(a: &[u8], b: &[u8], k: usize) -> u8 {
    let mut bases = 0usize;
    for (x, y) in a.iter().zip(b.iter()) {
        if x == y {
            bases += 4;
            continue;
        }
        let diff = x ^ y;
        bases += (diff.leading_zeros() / 2) as usize;
        break;
    }
    bases.min(k - 1) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lcp_bases() {
        let a = pack_codes(&seq_codes("acgtacgt"));
        let b = pack_codes(&seq_codes("acgtaggt"));
        assert_eq!(lcp_bases(&a, &b, 8), 5);
        let c = pack_codes(&seq_codes("ccgtacgt"));
        assert_eq!(lcp_bases(&a, &c, 8), 0);
        assert_eq!(lcp_bases(&a, &a, 8), 7); // capped below k
    }

    #[test]
    fn test_canonical_counts() {
        // One contig and its reverse complement index to identical tables.
        let g = seq_codes("acgtacggttacgatcgatcagcttagcgat");
        let r = revcomp(&g);
        let params = IndexParams { kmer: 6, nthreads: 1, freq: 20, pfx_bytes: 1 };
        let ix1 = GenomeIndex::build(&[g], &params);
        let ix2 = GenomeIndex::build(&[r], &params);
        assert_eq!(ix1.nels(), ix2.nels());
        for (a, b) in ix1.entries.iter().zip(ix2.entries.iter()) {
            assert_eq!(a.packed, b.packed);
            assert_eq!(a.posts.len(), b.posts.len());
        }
    }

    #[test]
    fn test_freq_cap_drops_repeats() {
        // 'aaaaaa...' collapses to one k-mer with many posts
        let g = vec![0u8; 64];
        let params = IndexParams { kmer: 8, nthreads: 1, freq: 10, pfx_bytes: 1 };
        let ix = GenomeIndex::build(&[g], &params);
        assert_eq!(ix.nels(), 0);
    }

    #[test]
    fn test_perm_descending_length() {
        let a = vec![0u8; 30];
        let b = vec![1u8; 50];
        let c = vec![2u8; 40];
        let params = IndexParams { kmer: 8, nthreads: 1, freq: 30, pfx_bytes: 1 };
        let ix = GenomeIndex::build(&[a, b, c], &params);
        assert_eq!(ix.perm, vec![1, 2, 0]);
    }
}
