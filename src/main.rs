use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use record_sort::{
    ExternalSorterBuilder, KeyedCodec, RawCodec, RecordCodec, Reversed, SortError, SortOutput, StrategyKind,
};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let order: Order = arg_parser.value_of_t_or_exit("sort");
    let algorithm: Algorithm = arg_parser.value_of_t_or_exit("algorithm");
    let width: usize = arg_parser.value_of_t_or_exit("width");
    let memory = arg_parser.value_of("memory").expect("value is required");
    let memory = memory.parse::<ByteSize>().expect("value is pre-validated").as_u64();
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let output: Option<&str> = arg_parser.value_of("output");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let key: Option<(usize, usize)> = arg_parser.is_present("key_offset").then(|| {
        (
            arg_parser.value_of_t_or_exit("key_offset"),
            arg_parser.value_of_t_or_exit("key_len"),
        )
    });

    let input = arg_parser.value_of("input").expect("value is required");

    let config = Config {
        input: path::Path::new(input),
        output: output.map(path::Path::new),
        tmp_dir: tmp_dir.map(path::Path::new),
        memory_budget: usize::try_from(memory).unwrap_or(usize::MAX),
        threads,
        strategy: algorithm.into(),
    };

    let result = match (key, order) {
        (None, Order::Asc) => RawCodec::new(width).and_then(|codec| run(codec, &config)),
        (None, Order::Desc) => RawCodec::new(width).and_then(|codec| run(Reversed(codec), &config)),
        (Some((offset, len)), Order::Asc) => KeyedCodec::new(width, offset, len).and_then(|codec| run(codec, &config)),
        (Some((offset, len)), Order::Desc) => {
            KeyedCodec::new(width, offset, len).and_then(|codec| run(Reversed(codec), &config))
        }
    };

    match result {
        Ok(output) => log::info!("{} records sorted into {}", output.records(), output.path().display()),
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    }
}

struct Config<'a> {
    input: &'a path::Path,
    output: Option<&'a path::Path>,
    tmp_dir: Option<&'a path::Path>,
    memory_budget: usize,
    threads: Option<usize>,
    strategy: StrategyKind,
}

fn run<C: RecordCodec>(codec: C, config: &Config) -> Result<SortOutput, SortError> {
    let mut sorter_builder = ExternalSorterBuilder::new(codec)
        .with_memory_budget(config.memory_budget)
        .with_strategy(config.strategy);

    if let Some(threads) = config.threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = config.tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
    }

    if let Some(output) = config.output {
        sorter_builder = sorter_builder.with_output(output);
    }

    let sorter = sorter_builder.build()?;

    // stop at the next chunk or merge group boundary, temporary files are removed on the way out
    let canceled = sorter.cancel_flag();
    if let Err(err) = ctrlc::set_handler(move || {
        canceled.store(true, std::sync::atomic::Ordering::Relaxed);
    }) {
        log::warn!("interrupt handler not installed: {}", err);
    }

    sorter.sort_file(config.input)
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Order::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Order {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Order as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Algorithm {
    Quick,
    IterativeQuick,
    Merge,
    Counting,
    Parallel,
}

impl Algorithm {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Algorithm::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Algorithm as clap::ArgEnum>::from_str(s, false)
    }
}

impl From<Algorithm> for StrategyKind {
    fn from(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Quick => StrategyKind::Quick,
            Algorithm::IterativeQuick => StrategyKind::IterativeQuick,
            Algorithm::Merge => StrategyKind::Merge,
            Algorithm::Counting => StrategyKind::Counting,
            Algorithm::Parallel => StrategyKind::Parallel,
        }
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("record-sort")
        .about("external sorter for fixed-width records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file, the input is sorted in place if omitted")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("width")
                .short('w')
                .long("width")
                .help("record width in bytes")
                .required(true)
                .takes_value(true)
                .validator(|v| match v.parse::<usize>() {
                    Ok(0) => Err("Record width must be positive".to_string()),
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Record width format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("memory budget for record data")
                .required(true)
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory budget format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("algorithm")
                .short('a')
                .long("algorithm")
                .help("in-memory sorting algorithm")
                .takes_value(true)
                .default_value("merge")
                .possible_values(Algorithm::possible_values()),
        )
        .arg(
            clap::Arg::new("sort")
                .short('s')
                .long("sort")
                .help("sorting order")
                .takes_value(true)
                .default_value("asc")
                .possible_values(Order::possible_values()),
        )
        .arg(
            clap::Arg::new("key_offset")
                .long("key-offset")
                .help("offset of the sort key inside a record")
                .takes_value(true)
                .requires("key_len"),
        )
        .arg(
            clap::Arg::new("key_len")
                .long("key-len")
                .help("sort key length, records with equal keys are ordered by their whole content")
                .takes_value(true)
                .requires("key_offset"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
