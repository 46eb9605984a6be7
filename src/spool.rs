//! Sharded spool for seed pairs.
//!
//! During the merge each lane bins its seed pairs by (A-contig panel,
//! sign class) into one write-behind buffer per shard file. A per-lane
//! bucket array counts records per A-contig; those counts later seed the
//! prefix sums that slot the reimport phase's scatter writes.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Spool buffer capacity, one write per overflow.
pub const SPOOL_CAP: usize = 1_000_000;

/// One shard file with its write-behind buffer.
pub struct SpoolUnit {
    path: PathBuf,
    file: File,
    buf: Vec<u8>,
    /// High-water mark: flush once the buffer reaches this fill.
    bend: usize,
}

impl SpoolUnit {
    fn create(path: PathBuf, rec_width: usize) -> Result<SpoolUnit> {
        let file = File::create(&path)?;
        Ok(SpoolUnit {
            path,
            file,
            buf: Vec::with_capacity(SPOOL_CAP),
            bend: SPOOL_CAP - rec_width,
        })
    }

    /// Append one seed-pair record `{lcp, a_post, b_post}`.
    #[inline]
    pub fn push(&mut self, lcp: u8, a_post: &[u8], b_post: &[u8]) -> Result<()> {
        self.buf.push(lcp);
        self.buf.extend_from_slice(a_post);
        self.buf.extend_from_slice(b_post);
        if self.buf.len() >= self.bend {
            self.file.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }

    /// Flush the tail and close the shard.
    pub fn finish(mut self) -> Result<PathBuf> {
        if !self.buf.is_empty() {
            self.file.write_all(&self.buf)?;
        }
        self.file.flush()?;
        Ok(self.path)
    }
}

/// All spool state owned by one merge lane: a unit per A-panel for each
/// sign class, and one bucket array per sign class.
pub struct SpoolLane {
    pub nunits: Vec<SpoolUnit>,
    pub cunits: Vec<SpoolUnit>,
    /// Records per A-contig, same-sign class.
    pub nbuck: Vec<u64>,
    /// Records per A-contig, opposite-sign class.
    pub cbuck: Vec<u64>,
}

impl SpoolLane {
    /// Create the shard files of lane `tid`. Shard `k = tid*nparts + j`
    /// is named `<dir>/<pair_name>.<k>.N` / `.C`.
    pub fn create(
        dir: &Path,
        pair_name: &str,
        tid: usize,
        nparts: usize,
        nconts: usize,
        rec_width: usize,
    ) -> Result<SpoolLane> {
        let mut nunits = Vec::with_capacity(nparts);
        let mut cunits = Vec::with_capacity(nparts);
        for j in 0..nparts {
            let k = tid * nparts + j;
            nunits.push(SpoolUnit::create(
                dir.join(format!("{}.{}.N", pair_name, k)),
                rec_width,
            )?);
            cunits.push(SpoolUnit::create(
                dir.join(format!("{}.{}.C", pair_name, k)),
                rec_width,
            )?);
        }
        Ok(SpoolLane {
            nunits,
            cunits,
            nbuck: vec![0u64; nconts],
            cbuck: vec![0u64; nconts],
        })
    }

    /// Flush and close every shard, keeping the bucket arrays.
    pub fn finish(self) -> Result<FinishedLane> {
        let mut npaths = Vec::with_capacity(self.nunits.len());
        for u in self.nunits {
            npaths.push(u.finish()?);
        }
        let mut cpaths = Vec::with_capacity(self.cunits.len());
        for u in self.cunits {
            cpaths.push(u.finish()?);
        }
        Ok(FinishedLane {
            npaths,
            cpaths,
            nbuck: self.nbuck,
            cbuck: self.cbuck,
        })
    }
}

/// A lane's shards after the merge: paths indexed by panel, plus the
/// per-sign bucket arrays.
pub struct FinishedLane {
    pub npaths: Vec<PathBuf>,
    pub cpaths: Vec<PathBuf>,
    pub nbuck: Vec<u64>,
    pub cbuck: Vec<u64>,
}

/// The transposed view the sort phase consumes: for a sign class and
/// panel, the shard path of every lane, and per-lane bucket arrays.
pub struct ShardMatrix {
    /// `paths[sign][panel][lane]`.
    pub paths: [Vec<Vec<PathBuf>>; 2],
    /// `bucks[sign][lane][contig]`.
    pub bucks: [Vec<Vec<u64>>; 2],
}

impl ShardMatrix {
    /// Transpose the per-lane spools into panel-major order.
    pub fn from_lanes(lanes: Vec<FinishedLane>, nparts: usize) -> ShardMatrix {
        let nthreads = lanes.len();
        let mut paths = [vec![Vec::new(); nparts], vec![Vec::new(); nparts]];
        let mut bucks = [Vec::with_capacity(nthreads), Vec::with_capacity(nthreads)];
        for lane in lanes {
            for (j, p) in lane.npaths.into_iter().enumerate() {
                paths[0][j].push(p);
            }
            for (j, p) in lane.cpaths.into_iter().enumerate() {
                paths[1][j].push(p);
            }
            bucks[0].push(lane.nbuck);
            bucks[1].push(lane.cbuck);
        }
        ShardMatrix { paths, bucks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let mut lane = SpoolLane::create(dir.path(), "_pair.1", 0, 2, 4, 7).unwrap();
        lane.nunits[1].push(9, &[1, 2, 3], &[4, 5, 6]).unwrap();
        lane.nunits[1].push(8, &[7, 8, 9], &[10, 11, 12]).unwrap();
        lane.nbuck[2] += 2;
        let fin = lane.finish().unwrap();

        let data = std::fs::read(&fin.npaths[1]).unwrap();
        assert_eq!(data, vec![9, 1, 2, 3, 4, 5, 6, 8, 7, 8, 9, 10, 11, 12]);
        assert_eq!(std::fs::read(&fin.npaths[0]).unwrap().len(), 0);
        assert_eq!(fin.nbuck, vec![0, 0, 2, 0]);
    }

    #[test]
    fn test_overflow_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let mut unit = SpoolUnit::create(dir.path().join("s"), 7).unwrap();
        let n = (SPOOL_CAP / 7) + 10;
        for _ in 0..n {
            unit.push(1, &[2, 3, 4], &[5, 6, 7]).unwrap();
        }
        let path = unit.finish().unwrap();
        assert_eq!(std::fs::read(path).unwrap().len(), n * 7);
    }

    #[test]
    fn test_transpose() {
        let dir = tempfile::tempdir().unwrap();
        let l0 = SpoolLane::create(dir.path(), "_pair.7", 0, 3, 2, 7)
            .unwrap()
            .finish()
            .unwrap();
        let l1 = SpoolLane::create(dir.path(), "_pair.7", 1, 3, 2, 7)
            .unwrap()
            .finish()
            .unwrap();
        let m = ShardMatrix::from_lanes(vec![l0, l1], 3);
        assert_eq!(m.paths[0][2][1], dir.path().join("_pair.7.5.N"));
        assert_eq!(m.paths[1][0][0], dir.path().join("_pair.7.0.C"));
        assert_eq!(m.bucks[0].len(), 2);
    }
}
