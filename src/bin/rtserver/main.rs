//! rtserver CLI - load a model, shoot a grid of rays through it and print a
//! hit-count map.

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{anyhow, bail, Context, Result};
use rtserver::prelude::*;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

const DEFAULT_GRID: usize = 64;

struct Options {
    config: ServerConfig,
    config_path: Option<PathBuf>,
    grid_size: usize,
    objects: Vec<String>,
    articulated: bool,
    model: Option<PathBuf>,
    level: &'static str,
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let prog = args.first().map(String::as_str).unwrap_or("rtserver-cli");
    if args.len() < 2 {
        print_usage(prog);
        return;
    }

    let opts = match parse_args(&args[1..]) {
        Ok(Some(opts)) => opts,
        Ok(None) => {
            print_usage(prog);
            return;
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            print_usage(prog);
            process::exit(1);
        }
    };

    init_tracing(opts.level);

    if let Err(e) = run(opts) {
        eprintln!("Error: {e:#}");
        process::exit(2);
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}

fn next_value<'a>(flag: &str, it: &mut impl Iterator<Item = &'a String>) -> Result<&'a str> {
    it.next()
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{flag} needs a value"))
}

fn next_count<'a>(flag: &str, it: &mut impl Iterator<Item = &'a String>) -> Result<usize> {
    let v = next_value(flag, it)?;
    v.parse().with_context(|| format!("{flag} {v:?} is not a count"))
}

fn parse_args(args: &[String]) -> Result<Option<Options>> {
    let mut opts = Options {
        config: ServerConfig::default(),
        config_path: None,
        grid_size: DEFAULT_GRID,
        objects: Vec::new(),
        articulated: false,
        model: None,
        level: "info",
    };
    // Explicit flags win over the config file and the environment
    let mut threads = None;
    let mut queues = None;
    let mut prep = None;
    let mut use_air = false;

    let mut it = args.iter();
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "-v" | "--verbose" => opts.level = "debug",
            "-vv" | "--trace" => opts.level = "trace",
            "--quiet" => opts.level = "warn",
            "-n" => prep = Some(next_count("-n", &mut it)?),
            "-t" => threads = Some(next_count("-t", &mut it)?),
            "-q" => queues = Some(next_count("-q", &mut it)?),
            "-s" => opts.grid_size = next_count("-s", &mut it)?,
            "-a" => use_air = true,
            "-A" => opts.articulated = true,
            "-o" => opts.objects.push(next_value("-o", &mut it)?.to_string()),
            "-c" => opts.config_path = Some(PathBuf::from(next_value("-c", &mut it)?)),
            s if s.starts_with('-') => bail!("unknown option {s}"),
            s => {
                if opts.model.is_some() {
                    bail!("more than one model given");
                }
                opts.model = Some(PathBuf::from(s));
            }
        }
    }

    if let Some(path) = &opts.config_path {
        opts.config = ServerConfig::load(path).with_context(|| format!("reading {}", path.display()))?;
    }
    opts.config = opts.config.apply_env()?;
    if let Some(n) = threads {
        opts.config.num_threads = n;
    }
    if let Some(n) = queues {
        opts.config.num_queues = n;
    }
    if let Some(n) = prep {
        opts.config.prep_threads = n;
    }
    opts.config.use_air |= use_air;
    opts.config.validate()?;

    if opts.grid_size == 0 || opts.grid_size > 1000 {
        bail!("grid size must be between 1 and 1000");
    }
    if opts.model.is_none() {
        bail!("no model specified");
    }
    Ok(Some(opts))
}

fn print_usage(prog: &str) {
    println!("rtserver {} ({} {})", env!("CARGO_PKG_VERSION"), env!("RTSERVER_BUILD_DATE"), env!("RTSERVER_BUILD_TIME"));
    println!();
    println!("Usage: {prog} [options] <model.json>");
    println!();
    println!("Options:");
    println!("  -t <n>         Worker threads");
    println!("  -q <n>         Priority bands");
    println!("  -n <n>         Threads used to prepare geometry");
    println!("  -s <n>         Grid size (default {DEFAULT_GRID})");
    println!("  -a             Include air regions");
    println!("  -A             Load one instance per assembly");
    println!("  -o <object>    Object to load (repeatable)");
    println!("  -c <file>      JSON config file");
    println!("  -v, --verbose  Debug output");
    println!("  -vv, --trace   Trace output");
    println!("  --quiet        Warnings and errors only");
    println!();
    println!("RUST_LOG overrides the log level; RTSERVER_THREADS and RTSERVER_QUEUES");
    println!("override the config file.");
}

fn run(opts: Options) -> Result<()> {
    let model = opts.model.context("no model specified")?;
    let server = RtServer::new(opts.config.clone())?;

    let load_options = LoadOptions {
        objects: opts.objects,
        use_articulation: opts.articulated,
        ..opts.config.load_options()
    };
    server
        .load_with(&model, &load_options)
        .with_context(|| format!("failed to load geometry from {}", model.display()))?;
    eprintln!("Loaded \"{}\"", server.title());

    // Exercise the session table: 0, then a copy, close it, reopen
    server.open_session()?;
    let session = server.open_session()?;
    server.close_session(session);
    let session = server.open_session()?;
    eprintln!("Using session id {session}");

    let tree = server.item_tree(session)?;
    tracing::debug!(
        tops = tree.members.len(),
        regions = tree.regions().len(),
        "item tree"
    );

    let names = server.component_names();
    tracing::debug!(count = names.len() - 1, "components");
    for (i, name) in names.iter().enumerate() {
        tracing::debug!("\t{i} - {name}");
    }

    let bounds = server
        .session_bounds(session)
        .ok_or_else(|| anyhow!("session {session} vanished"))?;

    // Single blocking shot through the middle of the model
    let center = bounds.center();
    let origin = DVec3::new(center.x, bounds.min.y - 1.0, center.z);
    let result = server.shoot_ray(origin, DVec3::Y, session)?;
    eprintln!("shot from {origin} in direction {}:", DVec3::Y);
    match result.ray_results().next() {
        Some(ray) if !ray.is_miss() => {
            for hit in ray.hits() {
                eprintln!("\thit on comp {} at dist = {} los = {}", hit.comp_id, hit.hit_dist, hit.los);
            }
        }
        _ => eprintln!("\tMissed"),
    }
    server.release(result);
    eprintln!("{}", server.pool_stats());

    let map = shoot_grid(&server, session, bounds, opts.grid_size)?;
    for row in map {
        eprintln!("{row}");
    }
    eprintln!("{}", server.pool_stats());

    let stats = server.stats();
    tracing::info!(
        jobs = stats.jobs_completed,
        failed = stats.jobs_failed,
        rays = stats.rays_shot,
        "done"
    );
    server.shutdown();
    Ok(())
}

/// One single-ray job per grid cell on the model's -Y face, spread over the
/// bands round-robin, collected by polling.
fn shoot_grid(server: &RtServer, session: SessionId, bounds: BBox3d, grid: usize) -> Result<Vec<String>> {
    let cell = bounds.size().x / grid as f64;
    let queues = server.num_queues();

    let mut pending = 0usize;
    for i in 0..grid {
        for j in 0..grid {
            let id = ((grid - i - 1) * 1000 + j) as i64;
            let origin = bounds.min + DVec3::new(j as f64 * cell, 0.0, i as f64 * cell);
            let mut job = server.new_job(session, id);
            job.push_ray(server.new_ray(origin, DVec3::Y, id));
            server.submit(job, j % queues)?;
            pending += 1;
        }
    }

    let mut map = vec![vec![b' '; grid]; grid];
    while pending > 0 {
        let Some(result) = server.poll_any(session) else {
            std::thread::yield_now();
            continue;
        };
        let id = result.job_id() as usize;
        let (row, col) = (id / 1000, id % 1000);
        if result.got_some_hits {
            let hits = result.ray_results().next().map_or(0, |r| r.num_hits());
            map[row][col] = if hits <= 9 { b'0' + hits as u8 } else { b'*' };
        }
        server.release(result);
        pending -= 1;
    }

    Ok(map
        .into_iter()
        .map(|row| String::from_utf8_lossy(&row).into_owned())
        .collect())
}
