//! Paged reader over a prefix-indexed sorted k-mer table.
//!
//! Table entries drop their first `ibyte` bytes; the stub carries a
//! cumulative prefix index that recovers the panel (`cpre`) of every
//! entry. Each entry is `hbyte` suffix bytes, a 1-byte post count and a
//! 1-byte lcp against the previous entry in global sort order.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{GaleError, Result};

/// Table entries held resident per page.
pub const KMER_BLOCK: usize = 1024;

/// Bytes of a part-file header: `{i32 kmer, i64 nels}`.
const PART_HEADER: u64 = 12;

/// One genome's k-mer table.
pub struct KmerStream {
    /// K-mer length in bases.
    kmer: usize,
    /// Prefix bytes dropped from each entry.
    ibyte: usize,
    /// Suffix bytes kept per entry.
    hbyte: usize,
    /// Stored entry width: suffix + count + lcp.
    krec: usize,
    /// Total entries.
    nels: u64,
    /// Cumulative entries per prefix value.
    pfx: Vec<u64>,

    stem: PathBuf,
    /// Number of part files.
    nthr: usize,
    /// Worker lanes the index was built for.
    nsqrt: usize,
    /// Cumulative entries per part.
    neps: Vec<u64>,

    cache: Vec<u8>,
    cptr: usize,
    ctop: usize,
    /// Global index of the current entry.
    cidx: u64,
    /// Prefix value of the current entry; `pfx.len()` once exhausted.
    cpre: usize,
    part: usize,
    file: Option<File>,
}

fn read_i32(f: &mut File, path: &Path) -> Result<i32> {
    let mut b = [0u8; 4];
    f.read_exact(&mut b)
        .map_err(|_| GaleError::Malformed { path: path.into(), message: "short read".into() })?;
    Ok(i32::from_le_bytes(b))
}

fn read_i64(f: &mut File, path: &Path) -> Result<i64> {
    let mut b = [0u8; 8];
    f.read_exact(&mut b)
        .map_err(|_| GaleError::Malformed { path: path.into(), message: "short read".into() })?;
    Ok(i64::from_le_bytes(b))
}

/// Path of a numbered part: `dir/.<stem>.ktab.<p>`.
fn part_path(root: &Path, p: usize) -> PathBuf {
    let dir = root.parent().unwrap_or_else(|| Path::new("."));
    let stem = root
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!(".{}.ktab.{}", stem, p))
}

impl KmerStream {
    /// Open a k-mer table from its stub `<root>.ktab`.
    pub fn open(root: &Path) -> Result<KmerStream> {
        let stub_path = root.with_extension("ktab");
        let mut stub =
            File::open(&stub_path).map_err(|e| GaleError::opening(&stub_path, e))?;

        let kmer = read_i32(&mut stub, &stub_path)? as usize;
        let ibyte = read_i32(&mut stub, &stub_path)? as usize;
        let nsqrt = read_i32(&mut stub, &stub_path)? as usize;
        let ixlen = 1usize << (8 * ibyte);
        let mut pfx = Vec::with_capacity(ixlen);
        for _ in 0..ixlen {
            pfx.push(read_i64(&mut stub, &stub_path)? as u64);
        }

        let kbyte = (kmer + 3) / 4;
        if ibyte >= kbyte {
            return Err(GaleError::Malformed {
                path: stub_path,
                message: format!("prefix bytes {} too large for k={}", ibyte, kmer),
            });
        }
        let hbyte = kbyte - ibyte;
        let krec = hbyte + 2;

        let nthr = nsqrt * nsqrt;
        let mut neps = Vec::with_capacity(nthr);
        let mut nels = 0u64;
        for p in 1..=nthr {
            let path = part_path(root, p);
            let mut f = File::open(&path).map_err(|e| GaleError::opening(&path, e))?;
            let k = read_i32(&mut f, &path)? as usize;
            let n = read_i64(&mut f, &path)? as u64;
            if k != kmer {
                return Err(GaleError::Malformed {
                    path,
                    message: "k-mer size does not match stub".into(),
                });
            }
            nels += n;
            neps.push(nels);
        }
        if nels != *pfx.last().unwrap_or(&0) {
            return Err(GaleError::Malformed {
                path: stub_path,
                message: "prefix index does not cover all entries".into(),
            });
        }

        let mut tab = KmerStream {
            kmer,
            ibyte,
            hbyte,
            krec,
            nels,
            pfx,
            stem: root.to_path_buf(),
            nthr,
            nsqrt,
            neps,
            cache: vec![0u8; KMER_BLOCK * krec],
            cptr: 0,
            ctop: 0,
            cidx: 0,
            cpre: 0,
            part: 1,
            file: None,
        };
        tab.open_part(1, 0)?;
        tab.refill()?;
        tab.cpre = tab.prefix_of(0);
        Ok(tab)
    }

    fn open_part(&mut self, p: usize, elem: u64) -> Result<()> {
        let path = part_path(&self.stem, p);
        let mut f = File::open(&path).map_err(|e| GaleError::opening(&path, e))?;
        f.seek(SeekFrom::Start(PART_HEADER + elem * self.krec as u64))?;
        self.file = Some(f);
        self.part = p;
        Ok(())
    }

    fn refill(&mut self) -> Result<()> {
        loop {
            let mut filled = 0;
            if let Some(f) = &mut self.file {
                while filled < self.cache.len() {
                    let n = f.read(&mut self.cache[filled..])?;
                    if n == 0 {
                        break;
                    }
                    filled += n;
                }
            }
            if filled > 0 {
                self.cptr = 0;
                self.ctop = filled;
                return Ok(());
            }
            if self.part >= self.nthr {
                self.file = None;
                self.ctop = 0;
                self.cptr = 0;
                return Ok(());
            }
            let next = self.part + 1;
            self.open_part(next, 0)?;
        }
    }

    /// Prefix value owning entry `i` (first prefix whose cumulative
    /// count exceeds `i`).
    fn prefix_of(&self, i: u64) -> usize {
        if i >= self.nels {
            return self.pfx.len();
        }
        self.pfx.partition_point(|&c| c <= i)
    }

    /// Reset to the first entry.
    pub fn first(&mut self) -> Result<()> {
        if self.cidx != 0 {
            self.open_part(1, 0)?;
            self.refill()?;
            self.cidx = 0;
            self.cpre = self.prefix_of(0);
        }
        Ok(())
    }

    /// Advance one entry, tracking the panel prefix.
    pub fn next(&mut self) -> Result<()> {
        self.cptr += self.krec;
        self.cidx += 1;
        if self.cidx >= self.nels {
            self.cpre = self.pfx.len();
            self.ctop = 0;
            self.cptr = 0;
            return Ok(());
        }
        while self.cidx >= self.pfx[self.cpre] {
            self.cpre += 1;
        }
        if self.cptr >= self.ctop {
            self.refill()?;
        }
        Ok(())
    }

    /// Random seek to entry `i`.
    pub fn goto(&mut self, i: u64) -> Result<()> {
        if self.cidx == i {
            return Ok(());
        }
        self.cidx = i;
        self.cpre = self.prefix_of(i);
        if i >= self.nels {
            self.ctop = 0;
            self.cptr = 0;
            return Ok(());
        }
        let mut p = 0;
        while i >= self.neps[p] {
            p += 1;
        }
        let local = if p > 0 { i - self.neps[p - 1] } else { i };
        self.open_part(p + 1, local)?;
        self.refill()
    }

    /// Raw bytes of the current entry (suffix, count, lcp). Only valid
    /// while `cidx < nels`.
    #[inline]
    pub fn csuf(&self) -> &[u8] {
        &self.cache[self.cptr..self.cptr + self.krec]
    }

    /// Post count of the current entry.
    #[inline]
    pub fn cnt(&self) -> usize {
        self.cache[self.cptr + self.hbyte] as usize
    }

    /// Prefix value of the current entry's panel.
    #[inline]
    pub fn cpre(&self) -> usize {
        self.cpre
    }

    /// Global index of the current entry.
    #[inline]
    pub fn cidx(&self) -> u64 {
        self.cidx
    }

    /// Total entries.
    #[inline]
    pub fn nels(&self) -> u64 {
        self.nels
    }

    /// K-mer length in bases.
    #[inline]
    pub fn kmer(&self) -> usize {
        self.kmer
    }

    /// Prefix bytes dropped from each entry.
    #[inline]
    pub fn ibyte(&self) -> usize {
        self.ibyte
    }

    /// Stored entry width (suffix + count + lcp).
    #[inline]
    pub fn krec(&self) -> usize {
        self.krec
    }

    /// Worker lanes the index was built for.
    #[inline]
    pub fn nsqrt(&self) -> usize {
        self.nsqrt
    }

    /// Cumulative entries per part.
    #[inline]
    pub fn neps(&self) -> &[u64] {
        &self.neps
    }

    /// Largest entry count of any prefix panel.
    pub fn max_panel(&self) -> u64 {
        let mut best = 0;
        let mut prev = 0;
        for &c in &self.pfx {
            if c - prev > best {
                best = c - prev;
            }
            prev = c;
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{GenomeIndex, IndexParams};

    fn toy_contig(len: usize, seed: u64) -> Vec<u8> {
        // simple LCG so fixtures are deterministic without rand
        let mut s = seed;
        (0..len)
            .map(|_| {
                s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((s >> 33) & 3) as u8
            })
            .collect()
    }

    #[test]
    fn test_scan_matches_prefix_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("g");
        let params = IndexParams { kmer: 8, nthreads: 2, freq: 30, pfx_bytes: 1 };
        GenomeIndex::build(&[toy_contig(600, 7)], &params).write(&root).unwrap();

        let mut t = KmerStream::open(&root).unwrap();
        assert_eq!(t.kmer(), 8);
        let mut seen = 0u64;
        let mut last_pre = 0usize;
        while t.cidx() < t.nels() {
            assert!(t.cpre() >= last_pre);
            assert!(t.cnt() > 0);
            last_pre = t.cpre();
            seen += 1;
            t.next().unwrap();
        }
        assert_eq!(seen, t.nels());
    }

    #[test]
    fn test_goto_equals_scan() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("g");
        let params = IndexParams { kmer: 8, nthreads: 2, freq: 30, pfx_bytes: 1 };
        GenomeIndex::build(&[toy_contig(400, 11)], &params).write(&root).unwrap();

        let mut a = KmerStream::open(&root).unwrap();
        let mut b = KmerStream::open(&root).unwrap();
        let n = a.nels();
        for i in [0u64, 1, n / 3, n / 2, n - 1] {
            a.first().unwrap();
            for _ in 0..i {
                a.next().unwrap();
            }
            b.goto(i).unwrap();
            assert_eq!(a.csuf(), b.csuf(), "entry {}", i);
            assert_eq!(a.cpre(), b.cpre(), "entry {}", i);
        }
    }
}
