use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use cb_diagram::{
    BlockKind, Diagram, IntegratorType, LoadReport, NoVariables, SimOptions, VariableResolver,
    Workspace,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

#[derive(Parser)]
#[command(name = "cb")]
#[command(about = "controlblocks CLI - block diagram simulation tool", long_about = None)]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a diagram and report anything that had to be skipped
    Validate {
        /// Path to the diagram TOML file
        diagram_path: PathBuf,
    },
    /// List blocks, ports and wires of a diagram
    Info {
        /// Path to the diagram TOML file
        diagram_path: PathBuf,
    },
    /// Run a simulation and print display values
    Run {
        /// Path to the diagram TOML file
        diagram_path: PathBuf,
        /// TOML file with the matrices referenced by state-space blocks
        #[arg(short, long)]
        workspace: Option<PathBuf>,
        /// Time step in seconds
        #[arg(long, default_value_t = 0.1)]
        dt: f64,
        /// End time in seconds
        #[arg(long, default_value_t = 10.0)]
        t_end: f64,
        /// Integrator for state-space blocks
        #[arg(long, value_enum, default_value_t = IntegratorArg::Rk4)]
        integrator: IntegratorArg,
        /// Print display values every N steps
        #[arg(long, default_value_t = 10)]
        every: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum IntegratorArg {
    Rk4,
    Euler,
}

impl From<IntegratorArg> for IntegratorType {
    fn from(arg: IntegratorArg) -> Self {
        match arg {
            IntegratorArg::Rk4 => IntegratorType::RK4,
            IntegratorArg::Euler => IntegratorType::ForwardEuler,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Validate { diagram_path } => cmd_validate(&diagram_path),
        Commands::Info { diagram_path } => cmd_info(&diagram_path),
        Commands::Run {
            diagram_path,
            workspace,
            dt,
            t_end,
            integrator,
            every,
        } => {
            let options = SimOptions {
                dt,
                t_end,
                integrator: integrator.into(),
            };
            cmd_run(&diagram_path, workspace.as_deref(), options, every)
        }
    }
}

fn load_diagram(path: &Path) -> anyhow::Result<(Diagram, LoadReport)> {
    let mut diagram = Diagram::new();
    let report = diagram
        .load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    Ok((diagram, report))
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    println!("Validating diagram: {}", path.display());
    let (_, report) = load_diagram(path)?;
    println!(
        "  {} blocks loaded, {} wires created",
        report.blocks_loaded, report.wires_created
    );
    if report.blocks_skipped > 0 || report.wires_refused > 0 {
        bail!(
            "{} blocks skipped, {} connections refused",
            report.blocks_skipped,
            report.wires_refused
        );
    }
    println!("✓ Diagram is valid");
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let (diagram, _) = load_diagram(path)?;

    if diagram.blocks().is_empty() {
        println!("No blocks in diagram");
        return Ok(());
    }
    println!("Blocks:");
    for block in diagram.blocks() {
        println!("  [{}] {} ({})", block.id(), block.name(), block.kind().tag());
        for &id in block.inputs().iter().chain(block.outputs()) {
            if let Some(port) = diagram.port(id) {
                println!(
                    "      {:?} {} [{}]{}",
                    port.direction(),
                    port.name(),
                    id,
                    if port.is_optional() { " optional" } else { "" }
                );
            }
        }
    }
    println!("Wires: {}", diagram.wires().len());
    for wire in diagram.wires() {
        println!("  {} -> {}", wire.from, wire.to);
    }
    Ok(())
}

fn cmd_run(
    path: &Path,
    workspace: Option<&Path>,
    options: SimOptions,
    every: u64,
) -> anyhow::Result<()> {
    let (mut diagram, report) = load_diagram(path)?;
    if report.blocks_skipped > 0 {
        println!("warning: {} blocks skipped while loading", report.blocks_skipped);
    }
    diagram.set_options(options)?;

    let vars = match workspace {
        Some(ws_path) => Some(
            Workspace::load(ws_path)
                .with_context(|| format!("failed to read workspace {}", ws_path.display()))?,
        ),
        None => None,
    };
    let resolver: &dyn VariableResolver = match &vars {
        Some(ws) => ws,
        None => &NoVariables,
    };

    println!(
        "Running {} blocks: dt = {:.3} s, t_end = {:.3} s",
        diagram.blocks().len(),
        diagram.options().dt,
        diagram.options().t_end
    );
    diagram.start(resolver)?;

    let every = every.max(1);
    let mut ticks = 0u64;
    while diagram.step()?.is_some() {
        ticks += 1;
        if ticks % every == 0 || !diagram.is_running() {
            print_displays(&diagram);
        }
    }

    println!("✓ Simulation completed: {} steps, t = {:.3} s", ticks, diagram.time());
    let state = diagram.state_vector();
    if !state.is_empty() {
        let values: Vec<String> = state.iter().map(|v| format!("{v:.6}")).collect();
        println!("  Final state: [{}]", values.join(", "));
    }
    Ok(())
}

fn print_displays(diagram: &Diagram) {
    for block in diagram.blocks() {
        if let BlockKind::Display { value } = block.kind() {
            let values: Vec<String> = value.iter().map(|v| format!("{v:.6}")).collect();
            println!(
                "  t = {:>8.3}  {}: [{}]",
                diagram.time(),
                block.name(),
                values.join(", ")
            );
        }
    }
}
