use std::fs::{self, File};
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Builder;
use log::LevelFilter;

use retro_resourcer::config::SessionConfig;
use retro_resourcer::decoder::W65816Decoder;
use retro_resourcer::format::OutputFormat;
use retro_resourcer::mapping::{LoRomTranslator, MappingMode};
use retro_resourcer::strategy::trace::TraceDiscovery;
use retro_resourcer::strategy::Strategy;
use retro_resourcer::{Address, AddressSpace, CpuState, Session, SymbolTable, W65816State};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Classify a 65816 ROM image into code and data")]
struct Args {
    /// Path to the ROM image
    rom: PathBuf,
    /// JSON session config
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// Project file; loaded when it exists and saved after the run
    #[clap(short, long)]
    project: Option<PathBuf>,
    /// Execution trace to learn from
    #[clap(short, long)]
    trace: Option<PathBuf>,
    /// Flood-fill seed as a hex CPU address (repeatable; default: reset vector)
    #[clap(short, long, value_parser = parse_hex)]
    seed: Vec<Address>,
    /// Skip static discovery
    #[clap(long)]
    no_discover: bool,
    /// Memory mapping (overrides the config)
    #[clap(long, value_enum)]
    mapping: Option<MappingMode>,
    /// Start seeds in native mode
    #[clap(long)]
    native: bool,
    /// Start seeds with a 16-bit accumulator (implies --native)
    #[clap(long)]
    m16: bool,
    /// Start seeds with 16-bit index registers (implies --native)
    #[clap(long)]
    x16: bool,
    /// Static discovery strategy
    #[clap(long, value_enum, default_value_t = Strategy::Recursive)]
    strategy: Strategy,
    /// Name hardware registers in operands
    #[clap(long)]
    hardware_symbols: bool,
    /// Listing format
    #[clap(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    /// Address space to list
    #[clap(long, value_enum, default_value_t = AddressSpace::Rom)]
    space: AddressSpace,
    /// Write the listing here instead of stdout
    #[clap(short, long)]
    output: Option<PathBuf>,
    /// Enable verbose logging (use multiple times for more verbosity)
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_hex(s: &str) -> Result<Address, String> {
    let digits = s
        .trim_start_matches('$')
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    Address::from_str_radix(digits, 16).map_err(|e| format!("invalid hex address '{}': {}", s, e))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let mut config = match &args.config {
        Some(path) => SessionConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(mapping) = args.mapping {
        config.mapping = mapping;
    }
    if args.native || args.m16 || args.x16 {
        config.initial_state = W65816State::native(!args.m16, !args.x16);
    }

    let rom = fs::read(&args.rom)
        .with_context(|| format!("Failed to read ROM {}", args.rom.display()))?;
    let mapping = config.mapping;
    let initial_state = config.initial_state;
    let mut session = Session::new(rom, config).context("Failed to start session")?;

    if args.hardware_symbols {
        session.symbols_mut().extend(SymbolTable::snes_registers());
    }
    if let Some(path) = args.project.as_ref().filter(|p| p.exists()) {
        session
            .load_project(path)
            .with_context(|| format!("Failed to load project {}", path.display()))?;
    }

    let mut decoder = W65816Decoder::with_state(initial_state);

    if let Some(path) = &args.trace {
        let file = File::open(path)
            .with_context(|| format!("Failed to open trace {}", path.display()))?;
        let mut trace = TraceDiscovery::new()?;
        let stats = trace
            .run(&mut session, &mut decoder, BufReader::new(file))
            .with_context(|| format!("Failed to read trace {}", path.display()))?;
        eprintln!("Trace: {}", stats);
    }

    if !args.no_discover {
        let seeds = if args.seed.is_empty() {
            if mapping != MappingMode::LoRom {
                bail!("No seed given and {} mapping has no reset vector", mapping);
            }
            let reset = LoRomTranslator::reset_vector(session.rom())
                .context("ROM is too small to hold a reset vector")?;
            vec![reset]
        } else {
            args.seed.clone()
        };
        let stats = args.strategy.run(
            &mut session,
            &mut decoder,
            &seeds,
            CpuState::W65816(initial_state),
        );
        eprintln!("{}: {}", args.strategy, stats);
    }

    let conflicts = session.conflicts();
    if conflicts.total() > 0 {
        eprintln!("{} classification conflicts", conflicts.total());
        for conflict in conflicts.recorded().iter().take(10) {
            eprintln!("  {}", conflict);
        }
    }

    if let Some(path) = &args.project {
        session
            .save_project(path)
            .with_context(|| format!("Failed to save project {}", path.display()))?;
    }

    let listing = args.format.get_formatter().format(&session, args.space)?;
    match &args.output {
        Some(path) => fs::write(path, listing)
            .with_context(|| format!("Failed to write listing {}", path.display()))?,
        None => print!("{}", listing),
    }
    Ok(())
}
