use anyhow::Context;
use clap::Parser;
use rust_multidomain::{
    ast::Instruction,
    bus::MemoryBus,
    config::EngineConfig,
    domains::Interval,
    engine::{Engine, RegisterSnapshot, SolverReport},
    eval::next_ip,
    governor::TriggerState,
    solver::SolverStats,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "multidomain-run",
    about = "Run a JSON instruction program through the multi-domain engine."
)]
struct Args {
    /// Program JSON (reads stdin when omitted or `-`).
    #[arg(value_name = "PATH")]
    input: Option<PathBuf>,

    /// Engine config JSON; flags below override it.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address at which multi-domain analysis starts (overrides the program's).
    #[arg(long, value_name = "ADDR", value_parser = parse_u32)]
    trigger: Option<u32>,

    /// Triggered instructions between solver statistics reports.
    #[arg(long, value_name = "N")]
    report_interval: Option<u64>,

    /// Symbolic node budget before the symbolic domain is disabled.
    #[arg(long, value_name = "N")]
    complexity_limit: Option<usize>,

    /// Do not ask the solver to rule out aliasing on memory reads.
    #[arg(long, default_value_t = false)]
    no_read_pruning: bool,

    /// Stop after this many instructions.
    #[arg(long, default_value_t = 10_000)]
    max_steps: u64,

    /// Decide memory aliasing with Z3 instead of the built-in solver.
    #[cfg(feature = "z3")]
    #[arg(long, default_value_t = false)]
    z3: bool,
}

fn parse_u32(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid address {text:?}: {e}"))
}

#[derive(Deserialize, Default)]
struct RegisterInit {
    concrete: Option<u32>,
    interval: Option<Interval>,
}

#[derive(Deserialize)]
struct Input {
    #[serde(default)]
    registers: BTreeMap<String, RegisterInit>,
    #[serde(default)]
    mem: Vec<(u32, u8)>,
    entry: u32,
    #[serde(default)]
    trigger: Option<u32>,
    program: Vec<Instruction>,
}

#[derive(Serialize)]
struct Output {
    steps: u64,
    stop: String,
    state: TriggerState,
    registers: Vec<RegisterSnapshot>,
    mem: Vec<(u32, u8)>,
    memory_log_cells: usize,
    solver: Option<SolverStats>,
    last_solver_report: Option<SolverReport>,
    last_trap: Option<u8>,
}

fn seed(engine: &mut Engine<MemoryBus>, name: &str, init: &RegisterInit) -> anyhow::Result<()> {
    let policy = engine.policy_mut();
    let mut value = policy.registers().get(name)?.clone();
    if let Some(v) = init.concrete {
        value.set_concrete(Some(v));
    }
    if let Some(i) = init.interval {
        value.set_interval(Some(i));
    }
    policy.seed_register(name, value)?;
    Ok(())
}

#[cfg(feature = "z3")]
fn use_z3(engine: &mut Engine<MemoryBus>, enabled: bool) {
    if !enabled {
        return;
    }
    let solver = rust_multidomain::Z3Solver::new().with_debug(engine.config().solver_debug);
    engine
        .policy_mut()
        .symbolic_mut()
        .set_solver(Some(Box::new(solver)));
}

fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(n) = args.report_interval {
        config.report_interval = n;
    }
    if let Some(n) = args.complexity_limit {
        config.complexity_threshold = n;
    }
    if args.no_read_pruning {
        config.read_pruning = false;
    }

    let buffer = match args.input.as_deref() {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?,
        _ => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let input: Input = serde_json::from_str(&buffer).context("parsing program")?;

    let mut bus = MemoryBus::default();
    bus.preload(input.mem.iter().copied());
    let mut engine = Engine::new(bus, config);
    #[cfg(feature = "z3")]
    use_z3(&mut engine, args.z3);

    for (name, init) in &input.registers {
        seed(&mut engine, name, init)?;
    }
    seed(
        &mut engine,
        "eip",
        &RegisterInit {
            concrete: Some(input.entry),
            ..RegisterInit::default()
        },
    )?;

    let program: HashMap<u32, &Instruction> =
        input.program.iter().map(|insn| (insn.address, insn)).collect();
    let trigger = args.trigger.or(input.trigger);

    let mut steps = 0;
    let stop = loop {
        if steps >= args.max_steps {
            break format!("step limit {} reached", args.max_steps);
        }
        let Some(ip) = next_ip(&engine) else {
            break "eip is not concretely known".to_string();
        };
        if trigger == Some(ip) {
            engine.trigger(ip)?;
        }
        let Some(insn) = program.get(&ip) else {
            break format!("no instruction at 0x{ip:08x}");
        };
        if let Err(err) = engine.execute(insn) {
            warn!("stopping at 0x{ip:08x}: {err}");
            break format!("error at 0x{ip:08x}: {err}");
        }
        steps += 1;
    };
    info!("[{}] {steps} instructions, {stop}", engine.name());

    let snapshot = engine.state_snapshot();
    let output = Output {
        steps,
        stop,
        state: engine.state(),
        registers: snapshot.registers,
        mem: engine.policy().bus().dump(),
        memory_log_cells: engine.memory_log().len(),
        solver: engine.solver_statistics(),
        last_solver_report: engine.last_solver_report().copied(),
        last_trap: engine.last_trap(),
    };
    serde_json::to_writer_pretty(io::stdout(), &output)?;
    println!();
    Ok(())
}
