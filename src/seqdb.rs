//! Random-access contig store.
//!
//! The database is a tiny stub `<root>.dam` (contig count, total length,
//! per-contig length and byte offset) over a 2-bit packed `<root>.bps`.
//! Each search worker opens its own handle so base fetches never share a
//! file position.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{GaleError, Result};
use crate::layout::comp_code;

/// Length and packed-byte offset of one physical contig.
#[derive(Debug, Clone, Copy)]
pub struct ContigRec {
    pub rlen: i64,
    pub boff: u64,
}

/// One genome's sequence database.
pub struct SeqDb {
    root: PathBuf,
    reads: Vec<ContigRec>,
    totlen: i64,
    bps: File,
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

impl SeqDb {
    /// Open a database from its stub `<root>.dam`.
    pub fn open(root: &Path) -> Result<SeqDb> {
        let stub_path = root.with_extension("dam");
        let mut stub =
            File::open(&stub_path).map_err(|e| GaleError::opening(&stub_path, e))?;
        let nctg = read_i32(&mut stub, &stub_path)? as usize;
        let totlen = read_i64(&mut stub, &stub_path)?;
        let mut reads = Vec::with_capacity(nctg);
        for _ in 0..nctg {
            let rlen = read_i64(&mut stub, &stub_path)?;
            let boff = read_i64(&mut stub, &stub_path)? as u64;
            reads.push(ContigRec { rlen, boff });
        }
        let bps_path = root.with_extension("bps");
        let bps = File::open(&bps_path).map_err(|e| GaleError::opening(&bps_path, e))?;
        Ok(SeqDb { root: root.to_path_buf(), reads, totlen, bps })
    }

    /// A fresh handle on the same database for another worker.
    pub fn reopen(&self) -> Result<SeqDb> {
        SeqDb::open(&self.root)
    }

    /// Number of contigs.
    #[inline]
    pub fn nctg(&self) -> usize {
        self.reads.len()
    }

    /// Total bases over all contigs.
    #[inline]
    pub fn totlen(&self) -> i64 {
        self.totlen
    }

    /// Length of a physical contig.
    #[inline]
    pub fn rlen(&self, ctg: usize) -> i64 {
        self.reads[ctg].rlen
    }

    /// Longest contig, for sizing per-worker sequence buffers.
    pub fn maxlen(&self) -> i64 {
        self.reads.iter().map(|r| r.rlen).max().unwrap_or(0)
    }

    /// Fetch a contig's bases as 2-bit codes into `out`.
    pub fn load(&mut self, ctg: usize, out: &mut Vec<u8>) -> Result<()> {
        let rec = self.reads[ctg];
        let nbytes = (rec.rlen as usize + 3) / 4;
        let mut packed = vec![0u8; nbytes];
        self.bps.seek(SeekFrom::Start(rec.boff))?;
        self.bps.read_exact(&mut packed)?;
        out.clear();
        out.reserve(rec.rlen as usize);
        for i in 0..rec.rlen as usize {
            out.push((packed[i >> 2] >> (6 - 2 * (i & 3))) & 3);
        }
        Ok(())
    }
}

/// Reverse-complement a code sequence in place.
pub fn complement_seq(seq: &mut [u8]) {
    seq.reverse();
    for b in seq.iter_mut() {
        *b = comp_code(*b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::{GenomeIndex, IndexParams};

    #[test]
    fn test_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("g");
        let c0: Vec<u8> = (0..97).map(|i| ((i * 7 + 3) % 4) as u8).collect();
        let c1: Vec<u8> = (0..41).map(|i| ((i * 5 + 1) % 4) as u8).collect();
        let params = IndexParams { kmer: 8, nthreads: 1, freq: 50, pfx_bytes: 1 };
        GenomeIndex::build(&[c0.clone(), c1.clone()], &params).write(&root).unwrap();

        let mut db = SeqDb::open(&root).unwrap();
        assert_eq!(db.nctg(), 2);
        assert_eq!(db.rlen(0), 97);
        assert_eq!(db.rlen(1), 41);
        assert_eq!(db.totlen(), 138);

        let mut buf = Vec::new();
        db.load(0, &mut buf).unwrap();
        assert_eq!(buf, c0);
        db.load(1, &mut buf).unwrap();
        assert_eq!(buf, c1);
    }

    #[test]
    fn test_complement_seq() {
        let mut s = vec![0, 1, 2, 3, 0]; // acgta
        complement_seq(&mut s);
        assert_eq!(s, vec![3, 0, 1, 2, 3]); // tacgt
        complement_seq(&mut s);
        assert_eq!(s, vec![0, 1, 2, 3, 0]);
    }
}
