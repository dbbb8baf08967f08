/// Core pipeline for fextsort: an out-of-core concurrent merge sort over
/// directories of raw 64-bit integers.
///
/// One shared buffer is cycled through an explicit state machine:
/// cache fill (exclusive write) → heap load (shared read, one block per
/// worker) → heap merge (drain all heaps into one sorted run file), repeated
/// until the input set is consumed, then a reduction phase merges runs
/// pairwise until a single file remains and is published as the output.
///
/// The control loop owns the state variable; workers flip it on phase
/// completion and wake the loop, which submits the next phase's tasks to the
/// pool and goes back to waiting.
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};

use crate::common::io::{list_input_files, open_noatime, read_full};
use crate::heap::Heap;
use crate::pool::WorkerPool;

use super::error::SortError;
use super::runs::{self, RunCatalogue, VALUE_BYTES};

/// Configuration for one sort run. Plain data, no CLI coupling.
#[derive(Debug, Clone)]
pub struct SortConfig {
    /// Directory of input files: raw native-endian `i64`s, no header,
    /// concatenated logically in directory iteration order.
    pub input_dir: PathBuf,
    /// Intermediate run directory. Created fresh; pre-existing content is
    /// cleared on startup and the directory is removed on success.
    pub work_dir: PathBuf,
    /// Final output file: the full ascending multiset of the input.
    pub output_path: PathBuf,
    /// Fixed worker pool size.
    pub num_workers: usize,
    /// Shared buffer size in bytes; must divide evenly into
    /// `num_workers` blocks of whole values.
    pub buffer_size: usize,
    /// Total input size in bytes; drives the "more input remains" decision.
    pub total_bytes: u64,
}

impl SortConfig {
    fn validate(&self) -> Result<(), SortError> {
        if self.num_workers == 0 {
            return Err(SortError::Config("worker count must be at least 1".into()));
        }
        if self.buffer_size == 0 {
            return Err(SortError::Config("buffer size must be non-zero".into()));
        }
        if self.buffer_size % (self.num_workers * VALUE_BYTES) != 0 {
            return Err(SortError::Config(format!(
                "buffer size {} is not divisible into {} blocks of whole {}-byte values",
                self.buffer_size, self.num_workers, VALUE_BYTES
            )));
        }
        Ok(())
    }
}

/// Totals reported by a completed sort.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortStats {
    /// Values written to the output file.
    pub values: u64,
    /// Cache-fill cycles executed (== sorted runs produced).
    pub cycles: u64,
}

/// The single mutable state variable of the pipeline.
///
/// `Running` is transient: a phase's tasks are in flight and the control loop
/// blocks until a worker flips the state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    ReadyToCache,
    ReadyToLoadHeaps,
    ReadyToMergeHeaps,
    ReadyToReduceRuns,
    Running,
    Stopped,
}

/// The shared buffer: allocated once, refilled in place every cache-fill
/// phase, read concurrently by all workers during heap load. The two modes
/// never overlap — the surrounding `RwLock` is held in writer mode for fill
/// and reader mode for load.
struct CacheBuffer {
    values: Box<[i64]>,
    /// Values the current cycle holds; the final cycle may come up short.
    filled: usize,
    /// Static partition width: capacity / worker count.
    block: usize,
}

impl CacheBuffer {
    fn new(capacity: usize, workers: usize) -> CacheBuffer {
        CacheBuffer {
            values: vec![0i64; capacity].into_boxed_slice(),
            filled: 0,
            block: capacity / workers,
        }
    }

    /// The whole buffer as a writable byte region for the fill phase.
    fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: i64 has no padding or invalid bit patterns, so any byte
        // content read into this region is a valid value; alignment of the
        // i64 allocation satisfies u8.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.values.as_mut_ptr() as *mut u8,
                self.values.len() * VALUE_BYTES,
            )
        }
    }

    /// Worker `index`'s block, clamped to the filled prefix.
    fn block_bounds(&self, index: usize) -> (usize, usize) {
        let start = (index * self.block).min(self.filled);
        let end = ((index + 1) * self.block).min(self.filled);
        (start, end)
    }
}

/// The input file set viewed as one logical byte stream.
struct InputSource {
    files: Vec<PathBuf>,
    next: usize,
    current: Option<File>,
}

impl InputSource {
    fn new(files: Vec<PathBuf>) -> InputSource {
        InputSource {
            files,
            next: 0,
            current: None,
        }
    }

    /// Fill `dst` from the file sequence, advancing to the next file on
    /// exhaustion. Returns the bytes read, short only when the whole input
    /// set is drained.
    fn read_into(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            let file = match self.current.as_mut() {
                Some(file) => file,
                None => match self.files.get(self.next) {
                    Some(path) => {
                        let file = open_noatime(path)?;
                        self.next += 1;
                        self.current.insert(file)
                    }
                    None => break, // input set exhausted
                },
            };
            let want = dst.len() - filled;
            let n = read_full(file, &mut dst[filled..])?;
            filled += n;
            if n < want {
                // read_full comes up short only at EOF
                self.current = None;
            }
        }
        Ok(filled)
    }
}

/// State shared between the control loop and all phase tasks.
struct Shared {
    config: SortConfig,
    state: Mutex<PipelineState>,
    state_cv: Condvar,
    buffer: RwLock<CacheBuffer>,
    input: Mutex<InputSource>,
    heaps: Arc<Vec<Mutex<Heap>>>,
    /// Barrier counter for the heap-load phase; reset at dispatch.
    heaps_ready: AtomicUsize,
    /// Cumulative bytes consumed across all input files.
    bytes_read: AtomicU64,
    /// Set when a fill comes up short, so an overstated `total_bytes`
    /// cannot spin the production loop forever.
    input_exhausted: AtomicBool,
    cycles: AtomicU64,
    catalogue: RunCatalogue,
    /// Reduction shutdown request, inspected cooperatively by reduce tasks.
    terminate: AtomicBool,
    drain: Mutex<()>,
    drain_cv: Condvar,
    failure: Mutex<Option<SortError>>,
}

impl Shared {
    /// Flip the pipeline state and wake the control loop (or any barrier
    /// waiter). Idempotent for `Stopped`.
    fn transition(&self, next: PipelineState) {
        let mut state = self.state.lock();
        if *state != PipelineState::Stopped {
            *state = next;
        }
        self.state_cv.notify_all();
    }

    /// Record the first failure, request termination everywhere, and stop
    /// the pipeline. Later failures are logged and dropped.
    fn fail(&self, error: SortError) {
        log::error!("pipeline failure: {error}");
        {
            let mut slot = self.failure.lock();
            if slot.is_none() {
                *slot = Some(error);
            }
        }
        self.terminate.store(true, Ordering::Release);
        self.transition(PipelineState::Stopped);
    }

    fn failed(&self) -> bool {
        self.failure.lock().is_some()
    }

    fn more_input(&self) -> bool {
        self.bytes_read.load(Ordering::Acquire) < self.config.total_bytes
            && !self.input_exhausted.load(Ordering::Acquire)
    }

    /// Phase body: stream input bytes into the shared buffer under the
    /// writer lock until the buffer is full or the input set runs dry.
    fn fill_cache(&self) -> Result<(), SortError> {
        let mut input = self.input.lock();
        let mut buffer = self.buffer.write();
        let capacity = buffer.values.len() * VALUE_BYTES;

        let n = input
            .read_into(buffer.as_bytes_mut())
            .map_err(|e| SortError::io(&self.config.input_dir, e))?;
        if n % VALUE_BYTES != 0 {
            return Err(SortError::TruncatedInput {
                values: (self.bytes_read.load(Ordering::Acquire) + n as u64) / VALUE_BYTES as u64,
                trailing: n % VALUE_BYTES,
            });
        }

        buffer.filled = n / VALUE_BYTES;
        if n < capacity {
            self.input_exhausted.store(true, Ordering::Release);
        }
        self.bytes_read.fetch_add(n as u64, Ordering::AcqRel);
        let cycle = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        log::debug!("cycle {cycle}: cached {} values", buffer.filled);

        self.transition(PipelineState::ReadyToLoadHeaps);
        Ok(())
    }

    /// Phase body: push block `index` of the buffer into heap `index` under
    /// the reader lock. The worker that completes the barrier performs the
    /// phase transition exactly once.
    fn load_heap(&self, index: usize) {
        {
            let buffer = self.buffer.read();
            let (start, end) = buffer.block_bounds(index);
            let mut heap = self.heaps[index].lock();
            for &value in &buffer.values[start..end] {
                heap.push(value);
            }
            log::trace!("heap {index}: loaded {} values", end - start);
        }
        let done = self.heaps_ready.fetch_add(1, Ordering::AcqRel) + 1;
        if done == self.config.num_workers {
            self.transition(PipelineState::ReadyToMergeHeaps);
        }
    }

    /// Phase body: drain all worker heaps, smallest current minimum first,
    /// into a new sorted run file, then decide whether another cache cycle
    /// is needed or reduction can begin.
    ///
    /// The linear scan keeps the first-seen minimum on ties; the order among
    /// equal values is implementation-defined.
    fn merge_heaps_to_run(&self) -> Result<(), SortError> {
        let mut guards: Vec<_> = self.heaps.iter().map(|heap| heap.lock()).collect();
        let total: usize = guards.iter().map(|heap| heap.len()).sum();

        let mut block: Vec<i64> = Vec::with_capacity(total);
        while block.len() < total {
            let mut best: Option<(usize, i64)> = None;
            for (i, heap) in guards.iter().enumerate() {
                if let Some(value) = heap.peek_min() {
                    if best.is_none_or(|(_, smallest)| value < smallest) {
                        best = Some((i, value));
                    }
                }
            }
            let (i, value) = best.ok_or(SortError::Invariant(
                "every heap empty before the expected value count drained",
            ))?;
            guards[i].pop();
            block.push(value);
        }
        drop(guards);

        let id = self.catalogue.assign_id();
        let path = self.catalogue.path_for(id);
        runs::write_run(&path, &block).map_err(|e| SortError::io(&path, e))?;
        self.catalogue.push(id);
        log::debug!("run {id}: {} values", block.len());

        let next = if self.more_input() {
            PipelineState::ReadyToCache
        } else {
            PipelineState::ReadyToReduceRuns
        };
        self.transition(next);
        Ok(())
    }

    /// Phase body: loop claiming pairs of runs off the catalogue and merging
    /// them, until this task either initiates shutdown (≤1 run outstanding),
    /// observes a termination request, or finds too little queued work.
    fn reduce_runs(&self, worker: usize) {
        loop {
            let (a, b) = {
                let mut queue = self.catalogue.queue.lock();
                if self.terminate.load(Ordering::Acquire) {
                    return;
                }
                let pending = queue.len() + self.catalogue.in_flight.load(Ordering::Acquire);
                if pending <= 1 {
                    // Last worker standing: request shutdown, wait for
                    // in-flight merges to drain, publish the survivor.
                    self.terminate.store(true, Ordering::Release);
                    drop(queue);
                    self.wait_for_drain();
                    if let Err(e) = self.finalize() {
                        self.fail(e);
                    }
                    return;
                }
                match (queue.pop_front(), queue.pop_front()) {
                    (Some(a), Some(b)) => {
                        self.catalogue.in_flight.fetch_add(1, Ordering::AcqRel);
                        (a, b)
                    }
                    // Fewer than two queued: merges in flight will re-enqueue
                    // and their tasks keep looping, so this one can bow out.
                    _ => return,
                }
            };

            log::trace!("worker {worker}: merging runs {a} and {b}");
            let merged = runs::merge_two_intermediate(self.catalogue.dir(), a, b);

            // Record failure before the in-flight decrement so a woken
            // shutdown waiter never publishes a bad result.
            if let Err(e) = &merged {
                self.fail(SortError::io(
                    self.catalogue.dir(),
                    io::Error::new(e.kind(), e.to_string()),
                ));
            } else if let Ok(id) = &merged {
                // Re-enqueue before decrementing: a run counts as in flight
                // until its result is visible in the queue.
                self.catalogue.push(*id);
            }

            let remaining = self.catalogue.in_flight.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining == 0 && self.terminate.load(Ordering::Acquire) {
                let _guard = self.drain.lock();
                self.drain_cv.notify_all();
            }

            if merged.is_err() {
                return;
            }
        }
    }

    /// Block until no reduction merge holds claimed-but-unpublished runs.
    fn wait_for_drain(&self) {
        let mut guard = self.drain.lock();
        while self.catalogue.in_flight.load(Ordering::Acquire) > 0 {
            self.drain_cv.wait(&mut guard);
        }
    }

    /// Publish the single surviving run as the output file, release the
    /// intermediate storage, and stop the pipeline.
    fn finalize(&self) -> Result<(), SortError> {
        if self.failed() {
            self.transition(PipelineState::Stopped);
            return Ok(());
        }

        let survivor = {
            let mut queue = self.catalogue.queue.lock();
            let id = queue.pop_front().ok_or(SortError::Invariant(
                "reduction finished with no surviving run",
            ))?;
            if !queue.is_empty() {
                return Err(SortError::Invariant(
                    "reduction finished with more than one surviving run",
                ));
            }
            id
        };

        let src = self.catalogue.path_for(survivor);
        publish(&src, &self.config.output_path)
            .map_err(|e| SortError::io(&self.config.output_path, e))?;

        if let Err(e) = fs::remove_dir_all(self.catalogue.dir()) {
            log::warn!(
                "could not remove work dir {}: {e}",
                self.catalogue.dir().display()
            );
        }

        log::info!(
            "sorted {} values in {} cycles -> {}",
            self.bytes_read.load(Ordering::Acquire) / VALUE_BYTES as u64,
            self.cycles.load(Ordering::Acquire),
            self.config.output_path.display()
        );
        self.transition(PipelineState::Stopped);
        Ok(())
    }
}

/// Move the surviving run to the output location. Falls back to copy+unlink
/// when the work directory sits on a different filesystem.
fn publish(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EXDEV) => {
            fs::copy(src, dst)?;
            fs::remove_file(src)
        }
        Err(e) => Err(e),
    }
}

/// The orchestrator: owns the worker pool and drives the state machine.
pub struct SortEngine {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

impl SortEngine {
    /// Validate the configuration, bootstrap the directories (any failure
    /// here is fatal), snapshot the input file set, and spawn the pool.
    pub fn new(config: SortConfig) -> Result<SortEngine, SortError> {
        config.validate()?;

        match fs::remove_dir_all(&config.work_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SortError::io(&config.work_dir, e)),
        }
        fs::create_dir_all(&config.work_dir).map_err(|e| SortError::io(&config.work_dir, e))?;
        if let Some(parent) = config.output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| SortError::io(parent, e))?;
            }
        }

        let files =
            list_input_files(&config.input_dir).map_err(|e| SortError::io(&config.input_dir, e))?;
        log::debug!(
            "{} input files, {} workers, {} byte buffer",
            files.len(),
            config.num_workers,
            config.buffer_size
        );

        let pool = WorkerPool::new(config.num_workers)
            .map_err(|e| SortError::io(&config.input_dir, e))?;

        let shared = Arc::new(Shared {
            buffer: RwLock::new(CacheBuffer::new(
                config.buffer_size / VALUE_BYTES,
                config.num_workers,
            )),
            input: Mutex::new(InputSource::new(files)),
            heaps: pool.heaps(),
            heaps_ready: AtomicUsize::new(0),
            bytes_read: AtomicU64::new(0),
            input_exhausted: AtomicBool::new(false),
            cycles: AtomicU64::new(0),
            catalogue: RunCatalogue::new(config.work_dir.clone()),
            terminate: AtomicBool::new(false),
            drain: Mutex::new(()),
            drain_cv: Condvar::new(),
            failure: Mutex::new(None),
            state: Mutex::new(PipelineState::ReadyToCache),
            state_cv: Condvar::new(),
            config,
        });

        Ok(SortEngine { shared, pool })
    }

    /// Drive the state machine to `Stopped`. Each iteration waits for a
    /// non-transient state, marks the pipeline `Running`, and submits the
    /// next phase's tasks; workers flip the state back when the phase's
    /// barrier completes.
    pub fn run(self) -> Result<SortStats, SortError> {
        let shared = &self.shared;
        loop {
            let phase = {
                let mut state = shared.state.lock();
                while *state == PipelineState::Running {
                    shared.state_cv.wait(&mut state);
                }
                let phase = *state;
                if phase != PipelineState::Stopped {
                    *state = PipelineState::Running;
                }
                phase
            };

            match phase {
                PipelineState::ReadyToCache => {
                    let shared = Arc::clone(&self.shared);
                    self.pool.submit(move |_| {
                        if let Err(e) = shared.fill_cache() {
                            shared.fail(e);
                        }
                    });
                }
                PipelineState::ReadyToLoadHeaps => {
                    shared.heaps_ready.store(0, Ordering::Release);
                    for index in 0..shared.config.num_workers {
                        let shared = Arc::clone(&self.shared);
                        self.pool.submit(move |_| shared.load_heap(index));
                    }
                }
                PipelineState::ReadyToMergeHeaps => {
                    let shared = Arc::clone(&self.shared);
                    self.pool.submit(move |_| {
                        if let Err(e) = shared.merge_heaps_to_run() {
                            shared.fail(e);
                        }
                    });
                }
                PipelineState::ReadyToReduceRuns => {
                    let tasks = shared.catalogue.len().min(shared.config.num_workers).max(1);
                    log::debug!(
                        "reducing {} runs with {tasks} tasks",
                        shared.catalogue.len()
                    );
                    for _ in 0..tasks {
                        let shared = Arc::clone(&self.shared);
                        self.pool.submit(move |worker| shared.reduce_runs(worker));
                    }
                }
                PipelineState::Stopped => break,
                PipelineState::Running => unreachable!("control loop woke in Running"),
            }
        }

        // Joins the workers; any straggling reduce task finishes first.
        drop(self.pool);

        if let Some(error) = self.shared.failure.lock().take() {
            return Err(error);
        }
        Ok(SortStats {
            values: self.shared.bytes_read.load(Ordering::Acquire) / VALUE_BYTES as u64,
            cycles: self.shared.cycles.load(Ordering::Acquire),
        })
    }
}

/// Parse a buffer size string like "10K", "1M", "1G".
pub fn parse_buffer_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty buffer size".to_string());
    }

    let (num_part, suffix) = if s.ends_with(|c: char| c.is_ascii_alphabetic()) {
        let (n, s) = s.split_at(s.len() - 1);
        (n, s.chars().next())
    } else {
        (s, None)
    };

    let base: usize = num_part
        .parse()
        .map_err(|_| format!("invalid buffer size: {}", s))?;

    let multiplier = match suffix {
        Some('K') | Some('k') => 1024,
        Some('M') | Some('m') => 1024 * 1024,
        Some('G') | Some('g') => 1024 * 1024 * 1024,
        Some('T') | Some('t') => 1024usize.pow(4),
        Some('b') => 512,
        Some(c) => return Err(format!("invalid suffix '{}' in buffer size", c)),
        None => 1,
    };

    Ok(base * multiplier)
}
