//! Alignment records and `.las` file I/O.
//!
//! A `.las` file is a `{i64 nlive, i32 tspace}` header followed by
//! overlap records: a fixed header and a variable tracepoint trace at
//! `tspace` A-axis spacing, stored 1 byte per step when `tspace` is
//! below the crossover and 2 bytes otherwise. The live count is
//! patched in place when a writer closes.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path as FsPath, PathBuf};

use crate::config::TRACE_XOVR;
use crate::error::{GaleError, Result};

/// B is reverse-complemented relative to A.
pub const COMP_FLAG: u32 = 0x1;

/// Internal mark used by redundancy elimination; never written out.
pub const ELIM_FLAG: u32 = 0x4;

/// Bytes of an overlap header on disk.
pub const OVL_BYTES: usize = 36;

/// Trace element width for a given spacing.
#[inline]
pub fn tbytes(tspace: i32) -> usize {
    if tspace < TRACE_XOVR {
        1
    } else {
        2
    }
}

/// The coordinates and trace of one local alignment.
#[derive(Debug, Clone, Default)]
pub struct AlnPath {
    pub abpos: i32,
    pub aepos: i32,
    pub bbpos: i32,
    pub bepos: i32,
    pub diffs: i32,
    /// Alternating (diffs, b_advance) per tracepoint panel.
    pub trace: Vec<u16>,
}

impl AlnPath {
    /// A-axis span.
    #[inline]
    pub fn alen(&self) -> i32 {
        self.aepos - self.abpos
    }
}

/// One alignment between a contig pair.
#[derive(Debug, Clone, Default)]
pub struct Overlap {
    pub flags: u32,
    pub aread: i32,
    pub bread: i32,
    pub path: AlnPath,
}

/// True when every trace step fits in one byte.
pub fn trace_fits_8(trace: &[u16]) -> bool {
    trace.iter().all(|&t| t < 256)
}

/// Compress a trace to 1 byte per step. Values above 255 truncate, as
/// the caller is expected to have picked a 2-byte spacing for those.
pub fn compress_to_8(trace: &[u16]) -> Vec<u8> {
    trace.iter().map(|&t| t as u8).collect()
}

/// Expand an 8-bit trace back to 16-bit steps.
pub fn expand_from_8(trace: &[u8]) -> Vec<u16> {
    trace.iter().map(|&t| t as u16).collect()
}

/// Streaming `.las` writer with a patchable live count.
pub struct LasWriter {
    file: BufWriter<File>,
    path: PathBuf,
    tspace: i32,
    tbytes: usize,
    nlive: i64,
}

impl LasWriter {
    /// Create the file and write a zeroed header.
    pub fn create(path: &FsPath, tspace: i32) -> Result<LasWriter> {
        let mut file = BufWriter::new(File::create(path).map_err(|e| GaleError::Output {
            path: path.into(),
            message: e.to_string(),
        })?);
        file.write_all(&0i64.to_le_bytes())?;
        file.write_all(&tspace.to_le_bytes())?;
        Ok(LasWriter {
            file,
            path: path.to_path_buf(),
            tspace,
            tbytes: tbytes(tspace),
            nlive: 0,
        })
    }

    /// Append one overlap record.
    pub fn append(&mut self, ovl: &Overlap) -> Result<()> {
        let p = &ovl.path;
        self.file.write_all(&(p.trace.len() as i32).to_le_bytes())?;
        self.file.write_all(&p.diffs.to_le_bytes())?;
        self.file.write_all(&p.abpos.to_le_bytes())?;
        self.file.write_all(&p.bbpos.to_le_bytes())?;
        self.file.write_all(&p.aepos.to_le_bytes())?;
        self.file.write_all(&p.bepos.to_le_bytes())?;
        self.file.write_all(&(ovl.flags & !ELIM_FLAG).to_le_bytes())?;
        self.file.write_all(&ovl.aread.to_le_bytes())?;
        self.file.write_all(&ovl.bread.to_le_bytes())?;
        if self.tbytes == 1 {
            self.file.write_all(&compress_to_8(&p.trace))?;
        } else {
            for &t in &p.trace {
                self.file.write_all(&t.to_le_bytes())?;
            }
        }
        self.nlive += 1;
        Ok(())
    }

    /// Flush, patch the live count, close. Returns the final count.
    pub fn finish(mut self) -> Result<i64> {
        self.file.flush()?;
        let mut inner = self.file.into_inner().map_err(|e| GaleError::Output {
            path: self.path.clone(),
            message: e.to_string(),
        })?;
        inner.seek(SeekFrom::Start(0))?;
        inner.write_all(&self.nlive.to_le_bytes())?;
        inner.flush()?;
        Ok(self.nlive)
    }

    /// Spacing this writer was created with.
    #[inline]
    pub fn tspace(&self) -> i32 {
        self.tspace
    }
}

/// Streaming `.las` reader.
pub struct LasReader {
    file: BufReader<File>,
    nlive: i64,
    tspace: i32,
    tbytes: usize,
    seen: i64,
}

impl LasReader {
    pub fn open(path: &FsPath) -> Result<LasReader> {
        let mut file =
            BufReader::new(File::open(path).map_err(|e| GaleError::opening(path, e))?);
        let mut b8 = [0u8; 8];
        let mut b4 = [0u8; 4];
        file.read_exact(&mut b8)?;
        let nlive = i64::from_le_bytes(b8);
        file.read_exact(&mut b4)?;
        let tspace = i32::from_le_bytes(b4);
        Ok(LasReader { file, nlive, tspace, tbytes: tbytes(tspace), seen: 0 })
    }

    /// Live-record count from the header.
    #[inline]
    pub fn nlive(&self) -> i64 {
        self.nlive
    }

    /// Tracepoint spacing from the header.
    #[inline]
    pub fn tspace(&self) -> i32 {
        self.tspace
    }

    /// Read the next record; `None` once the live count is exhausted.
    pub fn next_overlap(&mut self) -> Result<Option<Overlap>> {
        if self.seen >= self.nlive {
            return Ok(None);
        }
        self.seen += 1;
        let mut b4 = [0u8; 4];
        let mut rd = |f: &mut BufReader<File>| -> Result<i32> {
            f.read_exact(&mut b4)?;
            Ok(i32::from_le_bytes(b4))
        };
        let tlen = rd(&mut self.file)? as usize;
        let diffs = rd(&mut self.file)?;
        let abpos = rd(&mut self.file)?;
        let bbpos = rd(&mut self.file)?;
        let aepos = rd(&mut self.file)?;
        let bepos = rd(&mut self.file)?;
        let flags = rd(&mut self.file)? as u32;
        let aread = rd(&mut self.file)?;
        let bread = rd(&mut self.file)?;
        let mut trace = Vec::with_capacity(tlen);
        if self.tbytes == 1 {
            let mut raw = vec![0u8; tlen];
            self.file.read_exact(&mut raw)?;
            trace = expand_from_8(&raw);
        } else {
            let mut b2 = [0u8; 2];
            for _ in 0..tlen {
                self.file.read_exact(&mut b2)?;
                trace.push(u16::from_le_bytes(b2));
            }
        }
        Ok(Some(Overlap {
            flags,
            aread,
            bread,
            path: AlnPath { abpos, aepos, bbpos, bepos, diffs, trace },
        }))
    }
}
