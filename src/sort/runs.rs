/// Run storage: the catalogue of intermediate sorted run files and the
/// pairwise streaming merge that reduces them.
///
/// A run is a raw sequence of sorted native-endian `i64`s in a file named
/// `Inter<id>.bin` under the work directory. The catalogue tracks pending run
/// ids in a FIFO queue behind its own lock, decoupled from filesystem content;
/// an atomic counter tracks merges that have claimed runs but not yet
/// re-enqueued their result, so termination detection cannot race with a merge
/// about to publish a new entry.
use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicUsize;

use parking_lot::Mutex;

use crate::common::io::{open_noatime, read_full};

/// Width of one stored value.
pub const VALUE_BYTES: usize = 8;

/// Chunk size per merge input; refilled on exhaustion.
const MERGE_CHUNK: usize = 256 * 1024;

pub struct RunCatalogue {
    dir: PathBuf,
    pub(crate) queue: Mutex<VecDeque<u32>>,
    pub(crate) in_flight: AtomicUsize,
}

impl RunCatalogue {
    pub fn new(dir: PathBuf) -> RunCatalogue {
        RunCatalogue {
            dir,
            queue: Mutex::new(VecDeque::new()),
            in_flight: AtomicUsize::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserve the id for the next produced run: the queue length at dispatch
    /// time, serialized under the catalogue lock. Ids are only ever assigned
    /// during the production phase, when the queue grows monotonically, so the
    /// scheme cannot collide; reduction reuses the lower consumed id.
    pub fn assign_id(&self) -> u32 {
        self.queue.lock().len() as u32
    }

    pub fn push(&self, id: u32) {
        self.queue.lock().push_back(id);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// `Inter<id>.bin` — a completed run.
    pub fn path_for(&self, id: u32) -> PathBuf {
        run_path(&self.dir, id)
    }
}

pub fn run_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("Inter{id}.bin"))
}

/// Transient merge output; renamed over `Inter<id>.bin` on completion.
pub fn scratch_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("inter{id}.bin"))
}

/// Write a sorted block of values as a run file in one shot.
pub fn write_run(path: &Path, values: &[i64]) -> io::Result<()> {
    // SAFETY: i64 has no padding or invalid bit patterns; reinterpreting the
    // value slice as bytes is a plain native-endian dump of its memory.
    let bytes = unsafe {
        std::slice::from_raw_parts(values.as_ptr() as *const u8, values.len() * VALUE_BYTES)
    };
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    Ok(())
}

/// Read a whole run back into memory. Used by tests and the benchmark; the
/// pipeline itself only streams runs.
pub fn read_run(path: &Path) -> io::Result<Vec<i64>> {
    let bytes = fs::read(path)?;
    if bytes.len() % VALUE_BYTES != 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{}: truncated value at end of run", path.display()),
        ));
    }
    Ok(bytes
        .chunks_exact(VALUE_BYTES)
        .map(|raw| {
            let mut buf = [0u8; VALUE_BYTES];
            buf.copy_from_slice(raw);
            i64::from_ne_bytes(buf)
        })
        .collect())
}

/// Streaming reader over one run file: a fixed-size chunk buffer plus a
/// one-value lookahead head.
struct RunReader {
    file: File,
    chunk: Vec<u8>,
    pos: usize,
    len: usize,
    head: Option<i64>,
}

impl RunReader {
    fn open(path: &Path) -> io::Result<RunReader> {
        let file = open_noatime(path)?;
        let mut reader = RunReader {
            file,
            chunk: vec![0u8; MERGE_CHUNK],
            pos: 0,
            len: 0,
            head: None,
        };
        reader.advance()?;
        Ok(reader)
    }

    #[inline]
    fn peek(&self) -> Option<i64> {
        self.head
    }

    /// Load the next value into the head, refilling the chunk when drained.
    fn advance(&mut self) -> io::Result<()> {
        if self.pos == self.len {
            self.len = read_full(&mut self.file, &mut self.chunk)?;
            self.pos = 0;
            if self.len == 0 {
                self.head = None;
                return Ok(());
            }
            if self.len % VALUE_BYTES != 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "run file ends mid-value",
                ));
            }
        }
        let mut raw = [0u8; VALUE_BYTES];
        raw.copy_from_slice(&self.chunk[self.pos..self.pos + VALUE_BYTES]);
        self.head = Some(i64::from_ne_bytes(raw));
        self.pos += VALUE_BYTES;
        Ok(())
    }
}

/// Classic two-way streaming merge of runs `a` and `b`.
///
/// The merged content is written to a transient `inter<id>.bin`, both inputs
/// are deleted, and the output is renamed to the lower of the two consumed
/// ids, which is returned. Ties between equal values take the first input;
/// the choice is implementation-defined, not a stability guarantee.
pub fn merge_two_intermediate(dir: &Path, a: u32, b: u32) -> io::Result<u32> {
    let survivor = a.min(b);
    let path_a = run_path(dir, a);
    let path_b = run_path(dir, b);
    let scratch = scratch_path(dir, survivor);

    let mut left = RunReader::open(&path_a)?;
    let mut right = RunReader::open(&path_b)?;
    let mut out = BufWriter::with_capacity(MERGE_CHUNK, File::create(&scratch)?);

    loop {
        match (left.peek(), right.peek()) {
            (Some(x), Some(y)) => {
                if x <= y {
                    out.write_all(&x.to_ne_bytes())?;
                    left.advance()?;
                } else {
                    out.write_all(&y.to_ne_bytes())?;
                    right.advance()?;
                }
            }
            (Some(x), None) => {
                out.write_all(&x.to_ne_bytes())?;
                left.advance()?;
            }
            (None, Some(y)) => {
                out.write_all(&y.to_ne_bytes())?;
                right.advance()?;
            }
            (None, None) => break,
        }
    }

    out.flush()?;
    drop(out);

    fs::remove_file(&path_a)?;
    fs::remove_file(&path_b)?;
    fs::rename(&scratch, run_path(dir, survivor))?;
    Ok(survivor)
}
