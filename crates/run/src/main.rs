//! Evolimo CLI
//!
//! `compile` flattens every built-in definition into `_gen/<name>/` JSON;
//! `run` compiles one definition in-memory, steps it, and records frames to
//! a `.evo` replay file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use evolimo_runtime::{select_device, EvoConfig, EvoHeader, EvoRecorder, Simulation};

mod definitions;

/// Simulation timestep recorded in replay metadata.
const DT: f32 = 0.1;
/// How often to flush the replay file during an open-ended run.
const FLUSH_INTERVAL_FRAMES: u64 = 60;
/// How often to report progress.
const REPORT_INTERVAL_FRAMES: u64 = 20;

#[derive(Debug, Parser)]
#[command(name = "evolimo-run", about = "Compile and run Evolimo definitions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Compile every built-in definition into `<out-dir>/<name>/`.
    Compile {
        /// Output directory for the generated IR and visual mapping JSON.
        #[arg(long, default_value = "_gen")]
        out_dir: PathBuf,
    },
    /// Run one definition and record a replay.
    Run {
        /// Definition name (see `compile` output for the list).
        definition: String,

        /// Stop after this many frames. If omitted, runs until Ctrl+C.
        #[arg(long)]
        max_frames: Option<u64>,

        /// Override the definition's agent count.
        #[arg(long)]
        n_agents: Option<usize>,

        /// Seed for genes, state, and phenotype weights.
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Replay output path.
        #[arg(long, default_value = "sim_output.evo")]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "evolimo_run=info,evolimo_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Cli::parse().command {
        Command::Compile { out_dir } => {
            let defs = definitions::all();
            let written = evolimo_compiler::compile_to_dir(&defs, &out_dir)
                .context("compilation failed")?;
            for path in written {
                println!("wrote {}", path.display());
            }
            Ok(())
        }
        Command::Run {
            definition,
            max_frames,
            n_agents,
            seed,
            output,
        } => run(definition, max_frames, n_agents, seed, output),
    }
}

fn run(
    definition: String,
    max_frames: Option<u64>,
    n_agents: Option<usize>,
    seed: u64,
    output: PathBuf,
) -> Result<()> {
    let def = definitions::by_name(&definition).ok_or_else(|| {
        let names: Vec<String> = definitions::all().into_iter().map(|d| d.name).collect();
        anyhow!("unknown definition `{definition}` (available: {})", names.join(", "))
    })?;

    let mut ir = evolimo_compiler::compile(&def).context("compilation failed")?;
    if let Some(n) = n_agents {
        ir.constants.n_agents = n;
    }

    let device = select_device();
    info!(?device, definition = %definition, "starting run");

    let mut sim = Simulation::new(ir, &device, seed)?;

    let header = EvoHeader::new(EvoConfig {
        n_agents: sim.ir().constants.n_agents,
        state_dims: sim.ir().state_dims(),
        state_labels: sim.ir().state_vars.clone(),
        dt: DT,
    });
    let mut recorder = EvoRecorder::create(&output, header)?;
    info!(path = %output.display(), "recording frames");

    // The progress metric: total energy when the definition has it, else the
    // first state column.
    let report_var = if sim.ir().state_index("energy").is_some() {
        "energy".to_string()
    } else {
        sim.ir().state_vars[0].clone()
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })?;
    }

    let mut last_report = Instant::now();
    let mut frames_since_report = 0u64;

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        sim.step()?;
        recorder.write_frame(sim.state())?;
        frames_since_report += 1;

        let frame = sim.steps();
        if let Some(max) = max_frames {
            if frame >= max {
                break;
            }
        }
        if frame % FLUSH_INTERVAL_FRAMES == 0 {
            recorder.flush()?;
        }
        if frame % REPORT_INTERVAL_FRAMES == 0 {
            let total = sim.column_sum(&report_var)?;
            let elapsed = last_report.elapsed().as_secs_f64();
            let fps = frames_since_report as f64 / elapsed;
            info!(
                frame,
                metric = %report_var,
                total = format!("{total:.2}"),
                fps = format!("{fps:.1}"),
                dropped = sim.overflow_count(),
                "progress"
            );
            last_report = Instant::now();
            frames_since_report = 0;
        }
    }

    recorder.flush()?;
    println!(
        "recorded {} frames to {}",
        recorder.frames_written(),
        output.display()
    );
    Ok(())
}
