use crate::err::ScanError;
use crate::info;
use crate::model::{Block, BLOCK_FRAME_SIZE, UNKNOWN_HEIGHT};
use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Cooperative cancellation for the tailing poll. Cloneable; trigger it from
/// any thread to unblock a reader suspended between polls.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The ordered set of blk*.dat files under a node's blocks directory.
/// Re-scans only surface files newer than the last one served, so a tailing
/// reader picks up freshly created files without revisiting old ones.
pub struct RawDataFiles {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    last_served: Option<PathBuf>,
    scanned: bool,
}

impl RawDataFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        RawDataFiles { dir: dir.into(), files: Vec::new(), next: 0, last_served: None, scanned: false }
    }

    /// `blkNNNNN.dat` -> NNNNN, anything else is not a raw file.
    fn file_number(path: &Path) -> Option<u64> {
        let name = path.file_name()?.to_str()?;
        let digits = name.strip_prefix("blk")?.strip_suffix(".dat")?;
        if digits.is_empty() {
            return None;
        }
        digits.parse().ok()
    }

    fn scan(&mut self) -> Result<(), ScanError> {
        let mut found = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(number) = Self::file_number(&path) {
                found.push((number, path));
            }
        }
        found.sort();
        self.files = found
            .into_iter()
            .map(|(_, path)| path)
            .filter(|path| self.last_served.as_ref().map_or(true, |last| path > last))
            .collect();
        self.next = 0;
        self.scanned = true;
        Ok(())
    }

    pub fn next_file(&mut self) -> Result<Option<PathBuf>, ScanError> {
        if !self.scanned {
            self.scan()?;
        }
        match self.files.get(self.next) {
            Some(path) => {
                let path = path.clone();
                self.next += 1;
                self.last_served = Some(path.clone());
                Ok(Some(path))
            }
            None => Ok(None),
        }
    }

    /// Re-list the directory; true when new files appeared.
    pub fn refresh(&mut self) -> Result<bool, ScanError> {
        self.scan()?;
        if !self.files.is_empty() {
            info!("found {} new raw file(s)", self.files.len());
        }
        Ok(!self.files.is_empty())
    }
}

/// Walks the raw files in order and yields every stored block in storage
/// order, heights unassigned. One file blob is held at a time; blocks are
/// zero-copy slices of it, so a retained block keeps its file blob alive.
///
/// In tailing mode the iterator never ends on its own: past the last written
/// block it polls for growth of the newest file or for new files, until the
/// shutdown flag is triggered (surfaced once as `Cancelled`).
pub struct RawBlockIterator {
    files: RawDataFiles,
    blob: Bytes,
    offset: usize,
    cur_path: Option<PathBuf>,
    at_end_of_data: bool,
    tail: bool,
    poll_interval: Duration,
    shutdown: ShutdownFlag,
    done: bool,
}

impl RawBlockIterator {
    pub fn new(dir: impl Into<PathBuf>, tail: bool, poll_interval: Duration, shutdown: ShutdownFlag) -> Self {
        RawBlockIterator {
            files: RawDataFiles::new(dir),
            blob: Bytes::new(),
            offset: 0,
            cur_path: None,
            at_end_of_data: false,
            tail,
            poll_interval,
            shutdown,
            done: false,
        }
    }

    fn load_next_file(&mut self) -> Result<bool, ScanError> {
        match self.files.next_file()? {
            Some(path) => {
                self.blob = Bytes::from(fs::read(&path)?);
                self.offset = 0;
                self.cur_path = Some(path);
                self.at_end_of_data = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Re-read the current file; true when anything past our offset changed.
    /// A plain length check is not enough: the node preallocates these files
    /// and writes new blocks into the zeroed space without growing them.
    fn reread_current(&mut self) -> Result<bool, ScanError> {
        if let Some(path) = &self.cur_path {
            let data = fs::read(path)?;
            if data.len() != self.blob.len() || data[self.offset..] != self.blob[self.offset..] {
                self.blob = Bytes::from(data);
                self.at_end_of_data = false;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn advance(&mut self) -> Option<Result<Block, ScanError>> {
        loop {
            if !self.at_end_of_data && self.offset < self.blob.len() {
                match Block::from_framed(&self.blob.slice(self.offset..), UNKNOWN_HEIGHT) {
                    Ok(Some(block)) => {
                        self.offset += BLOCK_FRAME_SIZE + block.rawsize();
                        return Some(Ok(block));
                    }
                    // Past the last block written to this file so far.
                    Ok(None) => self.at_end_of_data = true,
                    Err(e) => {
                        // Skip ahead to the next file boundary so iteration
                        // can resume after the corrupt region.
                        self.offset = self.blob.len();
                        return Some(Err(e));
                    }
                }
            }

            match self.load_next_file() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => return Some(Err(e)),
            }

            if !self.tail {
                self.done = true;
                return None;
            }

            // Poll round: the newest file may have grown past our offset, or
            // a new file may have appeared. An empty result is not an error.
            if self.shutdown.is_triggered() {
                self.done = true;
                return Some(Err(ScanError::Cancelled));
            }
            match self.reread_current() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => return Some(Err(e)),
            }
            match self.files.refresh() {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => return Some(Err(e)),
            }
            thread::sleep(self.poll_interval);
        }
    }
}

impl Iterator for RawBlockIterator {
    type Item = Result<Block, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        self.advance()
    }
}
