use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_run_sort::{
    ExecutionPolicy, ExternalRun, ExternalSorterBuilder, MergeStrategy, RmpRun, SortError, SortSummary, TextRun,
};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let order: Order = arg_parser.value_of_t_or_exit("sort");
    let policy: Policy = arg_parser.value_of_t_or_exit("policy");
    let merge: Merge = arg_parser.value_of_t_or_exit("merge");
    let format: Format = arg_parser.value_of_t_or_exit("format");
    let tmp_dir: Option<&str> = arg_parser.value_of("tmp_dir");
    let memory = arg_parser.value_of("memory").expect("value is required");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let input = path::Path::new(arg_parser.value_of("input").expect("value is required"));
    let output = path::Path::new(arg_parser.value_of("output").expect("value is required"));

    let options = SortOptions {
        memory: memory.parse::<ByteSize>().expect("value is pre-validated").as_u64(),
        threads,
        tmp_dir: tmp_dir.map(path::Path::new),
        policy: match policy {
            Policy::Parallel => ExecutionPolicy::Parallel,
            Policy::Synchronous => ExecutionPolicy::Synchronous,
        },
        merge: match merge {
            Merge::Heap => MergeStrategy::BinaryHeap,
            Merge::Linear => MergeStrategy::LinearScan,
        },
        order: match order {
            Order::Asc => ext_run_sort::Order::Asc,
            Order::Desc => ext_run_sort::Order::Desc,
        },
    };

    let result = match format {
        Format::Text => run_sort::<TextRun<i64>>(&options, input, output),
        Format::Rmp => run_sort::<RmpRun<i64>>(&options, input, output),
    };

    match result {
        Ok(summary) => log::info!(
            "sorted {} records ({} runs of up to {} records)",
            summary.written,
            summary.runs,
            summary.records_per_run
        ),
        Err(err) => {
            log::error!("data sorting error: {}", err);
            process::exit(1);
        }
    }
}

struct SortOptions<'a> {
    memory: u64,
    threads: Option<usize>,
    tmp_dir: Option<&'a path::Path>,
    policy: ExecutionPolicy,
    merge: MergeStrategy,
    order: ext_run_sort::Order,
}

fn run_sort<C: ExternalRun<i64>>(
    options: &SortOptions,
    input: &path::Path,
    output: &path::Path,
) -> Result<SortSummary, SortError> {
    let mut sorter_builder = ExternalSorterBuilder::<i64, C>::new()
        .with_memory_budget(options.memory)
        .with_execution_policy(options.policy)
        .with_merge_strategy(options.merge);

    if let Some(threads) = options.threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = options.tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
    }

    let sorter = sorter_builder.build()?;

    return sorter.sort_by(input, output, options.order.comparator());
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
enum Policy {
    Parallel,
    Synchronous,
}

impl Policy {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Policy::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Policy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Policy as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Merge {
    Heap,
    Linear,
}

impl Merge {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Merge::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Merge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Merge as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Format {
    Text,
    Rmp,
}

impl Format {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Format::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Format as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-run-sort")
        .about("bounded-memory external sorter of integer records")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file of whitespace delimited integers to be sorted")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file, one integer per line")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("memory budget of a single run")
                .required(true)
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Memory budget format incorrect: {}", err)),
                }),
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
            clap::Arg::new("policy")
                .short('p')
                .long("policy")
                .help("run sorting policy")
                .takes_value(true)
                .default_value("parallel")
                .possible_values(Policy::possible_values()),
        )
        .arg(
            clap::Arg::new("merge")
                .long("merge")
                .help("run merging strategy")
                .takes_value(true)
                .default_value("heap")
                .possible_values(Merge::possible_values()),
        )
        .arg(
            clap::Arg::new("format")
                .short('f')
                .long("format")
                .help("temporary run format")
                .takes_value(true)
                .default_value("text")
                .possible_values(Format::possible_values()),
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
                .help("number of threads to use for parallel run sorting")
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
