//! taskpipe CLI entry point - runs demo pipelines on the worker pool

use anyhow::Result;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use taskpipe::{App, Args, Config, Value};

#[derive(Debug, Parser)]
#[command(name = "taskpipe", version, about = "Run task pipelines on a bounded worker pool")]
struct Cli {
    /// Config file (defaults to ~/.taskpipe.yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Queue capacity before producers block
    #[arg(long, global = true)]
    queue_capacity: Option<usize>,

    /// Log task activity (repeat for debug output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Double each value on the pool and print the results
    Double {
        /// Values to double
        #[arg(default_values_t = vec![1, 2, 3, 4, 5])]
        values: Vec<i64>,
    },
    /// Stream 0..count, add an offset to each item, collect the results
    Pipeline {
        #[arg(long, default_value_t = 10)]
        count: i64,
        #[arg(long, default_value_t = 0.1)]
        offset: f64,
    },
    /// Queue a task several times, failing on one invocation
    Flaky {
        #[arg(long, default_value_t = 5)]
        runs: usize,
        /// Invocation number (1-based) that fails
        #[arg(long, default_value_t = 3)]
        fail_on: usize,
    },
    /// Print the effective configuration
    ShowConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    taskpipe::logging::init_logger(filter);

    let config = load_config(&cli)?;
    log::info!("taskpipe v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Double { values } => run_double(config, values),
        Command::Pipeline { count, offset } => run_pipeline(config, count, offset),
        Command::Flaky { runs, fail_on } => run_flaky(config, runs, fail_on),
        Command::ShowConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::merge_from("taskpipe", &path, |key| std::env::var(key).ok())?;

    if let Some(threads) = cli.threads {
        config.threads = threads;
    }
    if let Some(capacity) = cli.queue_capacity {
        config.queue_capacity = Some(capacity);
    }
    config.validate()?;
    Ok(config)
}

fn run_double(config: Config, values: Vec<i64>) -> Result<()> {
    let app = App::configured("double", config)?;
    let results = Arc::new(Mutex::new(Vec::new()));

    let sink = results.clone();
    let double = app.task("double", move |_, args| {
        let doubled = args.require(0)?.try_i64()? * 2;
        sink.lock().push(doubled);
        Ok(Value::from(doubled))
    });

    for value in values {
        double.queue(Args::one(value))?;
    }
    double.wait();

    let mut results = results.lock().clone();
    results.sort_unstable();
    println!("{}", join(&results));
    Ok(())
}

fn run_pipeline(config: Config, count: i64, offset: f64) -> Result<()> {
    let app = App::configured("pipeline", config)?;
    let collected = Arc::new(Mutex::new(Vec::new()));

    let source = app.task("source", move |_, _| Ok(Value::stream(0..count)));
    let modifier = app.task("modifier", move |_, args| {
        Ok(Value::from(args.require(0)?.try_f64()? + offset))
    });
    let sink = collected.clone();
    let collector = app.task("collector", move |ctx, args| {
        let value = args.require(0)?.try_f64()?;
        ctx.debug(&format!("collected {}", value));
        sink.lock().push(value);
        Ok(Value::unit())
    });

    source.pipe(&modifier).chain(&collector).run(())?;

    let mut collected = collected.lock().clone();
    collected.sort_by(f64::total_cmp);
    println!("{}", join(&collected));
    Ok(())
}

fn run_flaky(config: Config, runs: usize, fail_on: usize) -> Result<()> {
    let app = App::configured("flaky", config)?;
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    let flaky = app.task("flaky", move |_, _| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n == fail_on {
            anyhow::bail!("invocation {} failed on purpose", n);
        }
        Ok(Value::from(n as u64))
    });

    for _ in 0..runs {
        flaky.queue(())?;
    }
    flaky.wait();

    let stats = app.manager().stats();
    println!("succeeded={} failed={}", stats.succeeded, stats.failed);
    Ok(())
}

fn join<T: std::fmt::Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}
