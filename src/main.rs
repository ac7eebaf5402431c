// src/main.rs
use std::env;
use std::path::PathBuf;
use std::thread;
use anyhow::{anyhow, bail, Context, Result};
use gfet_sweep::drivers::SampleSource;
use gfet_sweep::simulation::SimulatedDevice;
use gfet_sweep::types::EngineMessage;
use gfet_sweep::{JsonRecordStore, SweepConfig, SweepController, SweepEngine};
use log::{debug, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!(
        r#"gfet-sweep {VERSION}: bias sweep against a simulated GFET array

USAGE:
    gfet-sweep [CONFIG] [OPTIONS]

ARGS:
    <CONFIG>              Sweep configuration (JSON); built-in demo when omitted

OPTIONS:
    -h, --help            Print help information
    -o, --out <DIR>       Override the output folder
    --block <ROWS>        Samples per simulated block (default: 100)
    --max-blocks <N>      Give up after N blocks (default: 200000)
    --seed <N>            Noise seed (default: 1)"#
    );
}

struct Args {
    config: Option<PathBuf>,
    out: Option<PathBuf>,
    block_rows: usize,
    max_blocks: usize,
    seed: u64,
}

fn parse_args() -> Result<Option<Args>> {
    let mut args = env::args().skip(1);
    let mut parsed = Args {
        config: None,
        out: None,
        block_rows: 100,
        max_blocks: 200_000,
        seed: 1,
    };
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(None);
            }
            "--out" | "-o" => {
                let value = args.next().context("missing value for --out")?;
                parsed.out = Some(PathBuf::from(value));
            }
            "--block" => {
                let value = args.next().context("missing value for --block")?;
                parsed.block_rows = value.parse().with_context(|| format!("bad --block {value}"))?;
            }
            "--max-blocks" => {
                let value = args.next().context("missing value for --max-blocks")?;
                parsed.max_blocks =
                    value.parse().with_context(|| format!("bad --max-blocks {value}"))?;
            }
            "--seed" => {
                let value = args.next().context("missing value for --seed")?;
                parsed.seed = value.parse().with_context(|| format!("bad --seed {value}"))?;
            }
            other if other.starts_with('-') => bail!("unknown option {other}"),
            other => {
                if parsed.config.is_some() {
                    bail!("only one configuration file may be given");
                }
                parsed.config = Some(PathBuf::from(other));
            }
        }
    }
    if parsed.block_rows == 0 {
        bail!("--block must be at least 1");
    }
    Ok(Some(parsed))
}

fn main() -> Result<()> {
    env_logger::init();
    let Some(args) = parse_args()? else {
        return Ok(());
    };
    let mut config = match &args.config {
        Some(path) => SweepConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => SweepConfig::demo(),
    };
    if let Some(out) = args.out {
        config.save.folder = out;
    }
    let controller = SweepController::new(&config).context("invalid sweep configuration")?;
    let mut device = SimulatedDevice::new(
        config.dc_sample_rate_hz,
        args.block_rows,
        config.n_columns,
        args.seed,
    )
    .with_block_limit(args.max_blocks);
    if let Some(gate) = &config.gate {
        device = device.with_gate(gate.column);
    }
    let mut source = device.clone();
    let poll_interval = config.engine.poll_interval();
    let handle = SweepEngine::spawn(
        controller,
        device,
        JsonRecordStore::new(config.save.clone()),
        poll_interval,
    );
    let mut paths = Vec::new();
    let mut exhausted = false;
    'run: loop {
        while let Ok(msg) = handle.events().try_recv() {
            match msg {
                EngineMessage::Saved { path, .. } => paths.push(path),
                EngineMessage::Error(e) => warn!("{e}"),
                EngineMessage::Log(line) => info!("{line}"),
                EngineMessage::Event(event) => debug!("{event:?}"),
                EngineMessage::Finished => break 'run,
            }
        }
        if exhausted {
            thread::sleep(poll_interval);
            continue;
        }
        match source.next_block().context("simulated acquisition failed")? {
            Some(block) => {
                if handle.add_data(block).is_err() {
                    break;
                }
                // one block per poll interval
                thread::sleep(poll_interval);
            }
            None => {
                info!("simulated device ran out of blocks");
                handle.stop();
                exhausted = true;
            }
        }
    }
    for msg in handle.events().try_iter() {
        if let EngineMessage::Saved { path, .. } = msg {
            paths.push(path);
        }
    }
    handle.join().map_err(|_| anyhow!("sweep thread panicked"))?;
    if paths.is_empty() {
        bail!("sweep stopped before completing");
    }
    for path in &paths {
        info!("wrote {}", path.display());
        println!("{}", path.display());
    }
    Ok(())
}
