//! Paged reader over a genome's position list.
//!
//! A position list is sharded across `T*T` part files produced by the
//! indexer, each with a small stub header. The stream keeps one page of
//! posts resident and one file descriptor open, and supports sequential
//! scan, bulk jumps and random seeks with cumulative part bookkeeping.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{GaleError, Result};
use crate::layout::read_field;

/// Posts held resident per page.
pub const POST_BLOCK: usize = 1024;

/// Bytes of a part-file header: `{i32 pbyte, i32 cbyte, i64 nels}`.
const PART_HEADER: u64 = 16;

/// One genome's position list.
pub struct PostList {
    /// Full post width in bytes (offset + contig + sign).
    pbyte: usize,
    /// Bytes of the contig + sign field.
    cbyte: usize,
    /// Total posts in the list.
    nels: u64,
    /// Maximum table entries in any prefix panel (sizes the merge cache).
    maxp: u64,
    /// Frequency cap the index was built with.
    freq: usize,
    /// Sorted-contig permutation: `perm[sorted] = physical`.
    perm: Vec<u32>,

    /// Part path with a trailing `.` where the part number goes.
    stem: PathBuf,
    /// Number of part files (`nsqrt` squared).
    nthr: usize,
    /// Worker lanes the index was built for.
    nsqrt: usize,
    /// Cumulative posts per part.
    neps: Vec<u64>,

    cache: Vec<u8>,
    /// Byte offset of the current post within the page.
    cptr: usize,
    /// Valid bytes in the page.
    ctop: usize,
    /// Global index of the current post.
    cidx: u64,
    /// 1-based part currently open.
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

/// Path of a numbered part: `dir/.<stem>.post.<p>`.
fn part_path(root: &Path, p: usize) -> PathBuf {
    let dir = root.parent().unwrap_or_else(|| Path::new("."));
    let stem = root
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.join(format!(".{}.post.{}", stem, p))
}

impl PostList {
    /// Open a position list from its stub `<root>.post`.
    pub fn open(root: &Path) -> Result<PostList> {
        let stub_path = root.with_extension("post");
        let mut stub =
            File::open(&stub_path).map_err(|e| GaleError::opening(&stub_path, e))?;

        let pbyte_off = read_i32(&mut stub, &stub_path)? as usize;
        let cbyte = read_i32(&mut stub, &stub_path)? as usize;
        let pbyte = pbyte_off + cbyte;
        let nsqrt = read_i32(&mut stub, &stub_path)? as usize;
        let maxp = read_i64(&mut stub, &stub_path)? as u64;
        let freq = read_i32(&mut stub, &stub_path)? as usize;
        let nctg = read_i32(&mut stub, &stub_path)? as usize;
        let mut perm = Vec::with_capacity(nctg);
        for _ in 0..nctg {
            perm.push(read_i32(&mut stub, &stub_path)? as u32);
        }

        let nthr = nsqrt * nsqrt;
        let mut neps = Vec::with_capacity(nthr);
        let mut nels = 0u64;
        for p in 1..=nthr {
            let path = part_path(root, p);
            let mut f = File::open(&path).map_err(|e| GaleError::opening(&path, e))?;
            let pb = read_i32(&mut f, &path)? as usize;
            let cb = read_i32(&mut f, &path)? as usize;
            let n = read_i64(&mut f, &path)? as u64;
            if pb + cb != pbyte {
                return Err(GaleError::Malformed {
                    path,
                    message: "post size does not match stub".into(),
                });
            }
            nels += n;
            neps.push(nels);
        }

        let mut list = PostList {
            pbyte,
            cbyte,
            nels,
            maxp,
            freq,
            perm,
            stem: root.to_path_buf(),
            nthr,
            nsqrt,
            neps,
            cache: vec![0u8; POST_BLOCK * pbyte],
            cptr: 0,
            ctop: 0,
            cidx: 0,
            part: 1,
            file: None,
        };
        list.open_part(1, 0)?;
        list.refill()?;
        Ok(list)
    }

    /// Open part `p` positioned at its `elem`-th post.
    fn open_part(&mut self, p: usize, elem: u64) -> Result<()> {
        let path = part_path(&self.stem, p);
        let mut f = File::open(&path).map_err(|e| GaleError::opening(&path, e))?;
        f.seek(SeekFrom::Start(PART_HEADER + elem * self.pbyte as u64))?;
        self.file = Some(f);
        self.part = p;
        Ok(())
    }

    /// Refill the page, rolling into the next part when the current one
    /// is exhausted.
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

    /// Reset to the first post.
    pub fn first(&mut self) -> Result<()> {
        if self.cidx != 0 {
            self.open_part(1, 0)?;
            self.refill()?;
            self.cidx = 0;
        }
        Ok(())
    }

    /// Advance one post.
    pub fn next(&mut self) -> Result<()> {
        self.cptr += self.pbyte;
        self.cidx += 1;
        if self.cptr >= self.ctop {
            if self.cidx >= self.nels {
                self.ctop = 0;
                self.cptr = 0;
                return Ok(());
            }
            self.refill()?;
        }
        Ok(())
    }

    /// Raw bytes of the current post. Only valid while `cidx < nels`.
    #[inline]
    pub fn current(&self) -> &[u8] {
        &self.cache[self.cptr..self.cptr + self.pbyte]
    }

    /// Current post as an integer (sign bit included).
    #[inline]
    pub fn current_value(&self) -> u64 {
        read_field(self.current(), self.pbyte)
    }

    /// Advance `delta` posts, possibly across part boundaries.
    pub fn jump(&mut self, delta: u64) -> Result<()> {
        let bytes = delta as usize * self.pbyte;
        self.cidx += delta;
        if self.cptr + bytes < self.ctop {
            self.cptr += bytes;
            return Ok(());
        }
        if self.cidx >= self.nels {
            self.ctop = 0;
            self.cptr = 0;
            return Ok(());
        }
        self.reposition()
    }

    /// Random seek to post `i`.
    pub fn goto(&mut self, i: u64) -> Result<()> {
        if self.cidx == i {
            return Ok(());
        }
        self.cidx = i;
        if i >= self.nels {
            self.ctop = 0;
            self.cptr = 0;
            return Ok(());
        }
        self.reposition()
    }

    /// Re-open at the part containing `cidx` and refill.
    fn reposition(&mut self) -> Result<()> {
        let i = self.cidx;
        let mut p = 0;
        while i >= self.neps[p] {
            p += 1;
        }
        let local = if p > 0 { i - self.neps[p - 1] } else { i };
        self.open_part(p + 1, local)?;
        self.refill()
    }

    /// Global index of the current post.
    #[inline]
    pub fn cidx(&self) -> u64 {
        self.cidx
    }

    /// Total number of posts.
    #[inline]
    pub fn nels(&self) -> u64 {
        self.nels
    }

    /// Full post width in bytes.
    #[inline]
    pub fn pbyte(&self) -> usize {
        self.pbyte
    }

    /// Bytes of the contig + sign field.
    #[inline]
    pub fn cbyte(&self) -> usize {
        self.cbyte
    }

    /// Largest prefix-panel entry count of the paired k-mer table.
    #[inline]
    pub fn maxp(&self) -> u64 {
        self.maxp
    }

    /// Frequency cap the index was built with.
    #[inline]
    pub fn freq(&self) -> usize {
        self.freq
    }

    /// Worker lanes the index was built for.
    #[inline]
    pub fn nsqrt(&self) -> usize {
        self.nsqrt
    }

    /// Cumulative posts per part.
    #[inline]
    pub fn neps(&self) -> &[u64] {
        &self.neps
    }

    /// Sorted-contig permutation.
    #[inline]
    pub fn perm(&self) -> &[u32] {
        &self.perm
    }

    /// Number of contigs.
    #[inline]
    pub fn nctg(&self) -> usize {
        self.perm.len()
    }
}
