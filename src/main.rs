use anyhow::{Context, Result};
use clap::Parser;
use perfscope::cli::{Cli, OutputFormat};
use perfscope::{SharedTracer, Trace, TraceMirror, TraceQuery, TraceWatcher, Tracer, TracerConfig};
use std::thread;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(args: &Cli) -> Result<TracerConfig> {
    let mut config = match &args.config {
        Some(path) => TracerConfig::from_toml(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => TracerConfig::default(),
    };
    if let Some(interval) = args.fork_interval {
        config.fork_interval = interval;
    }
    Ok(config)
}

/// Synthetic frame loop: input, update (physics + entity count), render/present.
///
/// A closing fork after the loop delivers the final iteration to the watcher.
fn run_workload(tracer: &Tracer, iterations: usize, work: Duration) -> perfscope::Result<()> {
    let interval = tracer.config().fork_interval;
    let slice = work / 4;

    for i in 0..iterations {
        let root = tracer.fork("frame", interval)?;
        if !root.is_valid() {
            thread::sleep(work);
            continue;
        }

        {
            let mut input = tracer.timer("input")?;
            input.set_fmt(format_args!("frame {i}"));
            thread::sleep(slice);
        }
        {
            let _update = tracer.timer("update")?;
            {
                let _physics = tracer.timer("physics")?;
                thread::sleep(slice);
            }
            tracer.branch_with("entities", (i * 7) % 23)?;
        }
        {
            let mut render = tracer.timer("render")?;
            let mut mode = render.branch("mode")?;
            mode.set_str(if i % 2 == 0 { "full" } else { "partial" });
            mode.finish();
            thread::sleep(slice);

            render.switch_to_timer("present")?;
            thread::sleep(slice);
        }
    }

    tracer.request_fetch_data();
    drop(tracer.fork("frame", interval)?);
    Ok(())
}

fn print_traces(args: &Cli, traces: &[Trace]) -> Result<()> {
    let query = match &args.pattern {
        Some(pattern) => TraceQuery::new(pattern)?,
        None => TraceQuery::all(),
    }
    .with_subscribe(args.subscribe);

    match args.format {
        OutputFormat::Text => print!("{}", query.render(traces)),
        OutputFormat::Json => {
            let selected: Vec<&Trace> = traces.iter().filter(|t| query.matches(t)).collect();
            if let Some(enabled) = args.subscribe {
                for trace in &selected {
                    trace.subscribe(enabled);
                }
            }
            println!("{}", serde_json::to_string_pretty(&selected)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = load_config(&args)?;
    // fail on a bad pattern before running anything
    if let Some(pattern) = &args.pattern {
        TraceQuery::new(pattern)?;
    }

    let tracer: SharedTracer = Tracer::create_with_config(0, "perfscope-demo", config)?;
    let watcher = TraceWatcher::attach(&tracer);

    let producer = {
        let tracer = tracer.clone();
        let iterations = args.iterations;
        let work = Duration::from_millis(args.interval_ms);
        thread::spawn(move || run_workload(&tracer, iterations, work))
    };
    producer
        .join()
        .map_err(|_| anyhow::anyhow!("producer thread panicked"))??;

    let mut mirror = TraceMirror::new();
    while let Some(batch) = watcher.try_recv() {
        mirror.apply(batch.traces, batch.fence);
    }
    if mirror.is_empty() {
        anyhow::bail!(
            "no iteration was traced ({} iterations, fork interval {})",
            args.iterations,
            tracer.config().fork_interval
        );
    }

    print_traces(&args, &mirror.sorted())
}
