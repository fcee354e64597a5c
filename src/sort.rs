//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;

use crate::chunk::{InputChunks, RecordWriter, SpillFile};
use crate::merger::{self, MergePlan};
use crate::spill::SpillDir;
use crate::{RecordBlock, RecordCodec, SortStrategy, StrategyKind};

/// Default memory budget (64 MiB).
pub const DEFAULT_MEMORY_BUDGET: usize = 64 * 1024 * 1024;

/// Default spill file read/write buffer size (64 KiB).
pub const DEFAULT_RW_BUF_SIZE: usize = 64 * 1024;

/// Staging file name prefix.
const STAGING_PREFIX: &str = ".record-sort-";

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Record width is zero.
    ZeroWidth,
    /// Memory budget can't hold a single record.
    BudgetTooSmall { budget: usize, width: usize },
    /// Input length is not a multiple of the record width.
    MisalignedInput { len: u64, width: usize },
    /// Key range doesn't fit in the record.
    InvalidKey { offset: usize, len: usize, width: usize },
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Common I/O error.
    IO(io::Error),
    /// Sorting canceled through the cancel flag.
    Canceled,
    /// Temporary files cleanup failed after another error.
    Cleanup { cause: Box<SortError>, cleanup: io::Error },
}

impl SortError {
    /// Checks if the error was caused by invalid arguments, detected before any file was touched.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            SortError::ZeroWidth
                | SortError::BudgetTooSmall { .. }
                | SortError::MisalignedInput { .. }
                | SortError::InvalidKey { .. }
        )
    }

    fn with_cleanup(self, cleanup: io::Result<()>) -> SortError {
        match cleanup {
            Ok(()) => self,
            Err(cleanup) => SortError::Cleanup {
                cause: Box::new(self),
                cleanup,
            },
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::IO(err) => Some(err),
            SortError::Cleanup { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::ZeroWidth => write!(f, "record width must be positive"),
            SortError::BudgetTooSmall { budget, width } => write!(
                f,
                "memory budget of {} bytes can't hold a {} byte record",
                budget, width
            ),
            SortError::MisalignedInput { len, width } => write!(
                f,
                "input length {} is not a multiple of record width {}",
                len, width
            ),
            SortError::InvalidKey { offset, len, width } => write!(
                f,
                "key range {}..{} doesn't fit in a {} byte record",
                offset,
                offset.saturating_add(*len),
                width
            ),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::IO(err) => write!(f, "I/O operation failed: {}", err),
            SortError::Canceled => write!(f, "sorting canceled"),
            SortError::Cleanup { cause, cleanup } => {
                write!(f, "{} (temporary files cleanup failed as well: {})", cause, cleanup)
            }
        }
    }
}

/// Sorted file description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOutput {
    path: PathBuf,
    records: u64,
    spill_files: usize,
    merge_rounds: usize,
}

impl SortOutput {
    /// Path of the sorted file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_path(self) -> PathBuf {
        self.path
    }

    /// Number of sorted records.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Number of spill files created by the run, merge outputs included.
    /// Zero when the input was sorted in memory.
    pub fn spill_files(&self) -> usize {
        self.spill_files
    }

    /// Number of merge rounds.
    pub fn merge_rounds(&self) -> usize {
        self.merge_rounds
    }
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<C, S = StrategyKind>
where
    C: RecordCodec,
    S: SortStrategy,
{
    /// Record codec.
    codec: C,
    /// In-memory sort strategy.
    strategy: S,
    /// Memory budget in bytes.
    memory_budget: usize,
    /// Sorted data destination. Input is sorted in place if not set.
    output: Option<Box<Path>>,
    /// Number of threads to be used to sort data in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Spill file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Cancellation flag.
    cancel_flag: Option<Arc<AtomicBool>>,
}

impl<C: RecordCodec> ExternalSorterBuilder<C> {
    /// Creates an instance of a builder with default parameters.
    pub fn new(codec: C) -> Self {
        ExternalSorterBuilder {
            codec,
            strategy: StrategyKind::default(),
            memory_budget: DEFAULT_MEMORY_BUDGET,
            output: None,
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            cancel_flag: None,
        }
    }
}

impl<C, S> ExternalSorterBuilder<C, S>
where
    C: RecordCodec,
    S: SortStrategy,
{
    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<C, S>, SortError> {
        ExternalSorter::new(
            self.codec,
            self.strategy,
            self.memory_budget,
            self.output.as_deref(),
            self.threads_number,
            self.tmp_dir.as_deref(),
            self.rw_buf_size,
            self.cancel_flag,
        )
    }

    /// Sets in-memory sort strategy.
    pub fn with_strategy<T: SortStrategy>(self, strategy: T) -> ExternalSorterBuilder<C, T> {
        ExternalSorterBuilder {
            codec: self.codec,
            strategy,
            memory_budget: self.memory_budget,
            output: self.output,
            threads_number: self.threads_number,
            tmp_dir: self.tmp_dir,
            rw_buf_size: self.rw_buf_size,
            cancel_flag: self.cancel_flag,
        }
    }

    /// Sets memory budget in bytes.
    pub fn with_memory_budget(mut self, memory_budget: usize) -> ExternalSorterBuilder<C, S> {
        self.memory_budget = memory_budget;
        return self;
    }

    /// Sets sorted data destination.
    pub fn with_output(mut self, path: &Path) -> ExternalSorterBuilder<C, S> {
        self.output = Some(path.into());
        return self;
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<C, S> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<C, S> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets spill file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<C, S> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets a cancellation flag shared with the caller.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> ExternalSorterBuilder<C, S> {
        self.cancel_flag = Some(flag);
        return self;
    }
}

/// External sorter.
pub struct ExternalSorter<C, S = StrategyKind>
where
    C: RecordCodec,
    S: SortStrategy,
{
    /// Record codec.
    codec: C,
    /// In-memory sort strategy.
    strategy: S,
    /// Memory budget in bytes.
    memory_budget: usize,
    /// Sorted data destination.
    output: Option<Box<Path>>,
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Spill file read/write buffer size.
    rw_buf_size: usize,
    /// Cancellation flag.
    canceled: Arc<AtomicBool>,
}

impl<C, S> ExternalSorter<C, S>
where
    C: RecordCodec,
    S: SortStrategy,
{
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `codec` - Record codec defining record width and order.
    /// * `strategy` - In-memory sort strategy used for every chunk.
    /// * `memory_budget` - Bytes of record data held in memory at once. Must fit at least one record.
    /// * `output` - Sorted data destination. If the parameter is [`None`] input is sorted in place.
    /// * `threads_number` - Number of threads to be used to sort data in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If paramater is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Spill files read/write buffer size.
    /// * `cancel_flag` - Flag checked between chunks and merge groups.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        codec: C,
        strategy: S,
        memory_budget: usize,
        output: Option<&Path>,
        threads_number: Option<usize>,
        tmp_path: Option<&Path>,
        rw_buf_size: Option<usize>,
        cancel_flag: Option<Arc<AtomicBool>>,
    ) -> Result<Self, SortError> {
        validate_budget(codec.width(), memory_budget)?;

        return Ok(ExternalSorter {
            codec,
            strategy,
            memory_budget,
            output: output.map(Into::into),
            thread_pool: Self::init_thread_pool(threads_number)?,
            tmp_dir: tmp_path.map(Into::into),
            rw_buf_size: rw_buf_size.unwrap_or(DEFAULT_RW_BUF_SIZE).max(1),
            canceled: cancel_flag.unwrap_or_default(),
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Returns the cancellation flag. Setting it aborts a running sort at the next chunk or
    /// merge group boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.canceled.clone()
    }

    /// Sorts the records of the input file.
    ///
    /// Sorted data is written to the configured output, or replaces the input if no output is set.
    /// The destination is only replaced once the sort has fully succeeded and every temporary file
    /// is gone; on failure the input and the destination are left untouched.
    ///
    /// # Arguments
    /// * `input` - File to be sorted. Its length must be a multiple of the record width.
    pub fn sort_file(&self, input: &Path) -> Result<SortOutput, SortError> {
        let width = self.codec.width();
        validate_budget(width, self.memory_budget)?;

        let metadata = fs::metadata(input).map_err(SortError::IO)?;
        if metadata.len() % width as u64 != 0 {
            return Err(SortError::MisalignedInput {
                len: metadata.len(),
                width,
            });
        }

        let output = self.output.as_deref().unwrap_or(input);
        log::info!(
            "sorting {} ({} records of {} bytes, budget {} bytes, strategy {}) into {}",
            input.display(),
            metadata.len() / width as u64,
            width,
            self.memory_budget,
            self.strategy.name(),
            output.display(),
        );

        let staging = create_staging(output)?;
        let mut spill_dir = None;

        let result = self.execute(input, metadata.len(), staging.as_file(), &mut spill_dir);
        let spill_cleanup = spill_dir.map_or(Ok(()), SpillDir::close);

        let mut summary = match (result, spill_cleanup) {
            (Ok(summary), Ok(())) => summary,
            (Ok(_), Err(err)) => return Err(SortError::IO(err).with_cleanup(staging.close())),
            (Err(err), spill_cleanup) => {
                log::error!("sorting {} failed: {}", input.display(), err);
                return Err(err.with_cleanup(spill_cleanup).with_cleanup(staging.close()));
            }
        };

        if let Err(err) = fs::set_permissions(staging.path(), metadata.permissions()) {
            log::warn!("input permissions not copied to the output: {}", err);
        }
        staging
            .persist(output)
            .map_err(|err| SortError::IO(err.error))?;

        summary.path = output.to_owned();
        log::info!(
            "sorted {} records into {} ({} spill files, {} merge rounds)",
            summary.records,
            output.display(),
            summary.spill_files,
            summary.merge_rounds
        );

        return Ok(summary);
    }

    fn execute(
        &self,
        input: &Path,
        input_len: u64,
        staging: &fs::File,
        spill_dir: &mut Option<SpillDir>,
    ) -> Result<SortOutput, SortError> {
        let width = self.codec.width();
        let records = input_len / width as u64;
        let reader = fs::File::open(input).map_err(SortError::IO)?;
        let staging = staging.try_clone().map_err(SortError::IO)?;

        if input_len <= self.memory_budget as u64 {
            log::info!("input fits in the memory budget, sorting in memory");
            let mut chunks = InputChunks::new(reader, width, records.max(1) as usize, records);
            let mut block = match chunks.next() {
                Some(block) => block.map_err(SortError::IO)?,
                None => RecordBlock::new(width),
            };
            self.sort_block(&mut block);

            let mut writer = RecordWriter::new(staging, width, self.rw_buf_size);
            writer.write_block(&block).map_err(SortError::IO)?;
            writer.finish().map_err(SortError::IO)?;

            return Ok(SortOutput {
                path: PathBuf::new(),
                records,
                spill_files: 0,
                merge_rounds: 0,
            });
        }

        let spill_dir = spill_dir.insert(SpillDir::new(self.tmp_dir.as_deref()).map_err(SortError::TempDir)?);
        log::debug!("sort run id {}", spill_dir.run_id());

        let chunk_records = self.memory_budget / width;
        let mut files = Vec::new();
        for block in InputChunks::new(reader, width, chunk_records, records) {
            self.check_canceled()?;
            let mut block = block.map_err(SortError::IO)?;
            files.push(self.create_chunk(&mut block, spill_dir)?);
        }
        log::info!("input split into {} sorted chunks", files.len());

        let plan = MergePlan::new(self.memory_budget, width, self.rw_buf_size);
        log::debug!(
            "merge plan: fan-in {}, stream buffer {} bytes",
            plan.fan_in,
            plan.stream_buf_size
        );
        let merge_rounds = merger::merge_all(files, &plan, &self.codec, spill_dir, staging, &self.canceled)?;

        return Ok(SortOutput {
            path: PathBuf::new(),
            records,
            spill_files: spill_dir.created(),
            merge_rounds,
        });
    }

    fn create_chunk(&self, block: &mut RecordBlock, spill_dir: &mut SpillDir) -> Result<SpillFile, SortError> {
        log::debug!("sorting chunk data ({} records) ...", block.len());
        self.sort_block(block);

        log::debug!("saving chunk data");
        let spill_file = SpillFile::build(spill_dir, block, self.rw_buf_size).map_err(SortError::IO)?;

        return Ok(spill_file);
    }

    fn sort_block(&self, block: &mut RecordBlock) {
        self.thread_pool.install(|| {
            self.strategy.sort(block, &self.codec);
        });
    }

    fn check_canceled(&self) -> Result<(), SortError> {
        if self.canceled.load(atomic::Ordering::Relaxed) {
            return Err(SortError::Canceled);
        }
        return Ok(());
    }
}

/// Sorts a file of fixed-width records in place.
///
/// # Arguments
/// * `input` - File to be sorted
/// * `memory_budget` - Bytes of record data held in memory at once
/// * `codec` - Record codec
/// * `strategy` - In-memory sort strategy
pub fn sort_file<C, S>(input: &Path, memory_budget: usize, codec: C, strategy: S) -> Result<SortOutput, SortError>
where
    C: RecordCodec,
    S: SortStrategy,
{
    ExternalSorterBuilder::new(codec)
        .with_memory_budget(memory_budget)
        .with_strategy(strategy)
        .build()?
        .sort_file(input)
}

fn validate_budget(width: usize, memory_budget: usize) -> Result<(), SortError> {
    if width == 0 {
        return Err(SortError::ZeroWidth);
    }
    if memory_budget < width {
        return Err(SortError::BudgetTooSmall {
            budget: memory_budget,
            width,
        });
    }
    return Ok(());
}

/// Creates the file receiving sorted data next to the destination, so it can be renamed over it.
fn create_staging(output: &Path) -> Result<tempfile::NamedTempFile, SortError> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(SortError::TempDir)
}
