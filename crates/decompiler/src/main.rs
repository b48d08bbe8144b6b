//! FLW0 Decompiler CLI
//!
//! Decompiles an Etrian Odyssey AI file (.bf, or anything carrying the
//! FLW0 tag) into pseudocode, or disassembles it with `--disassemble`.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser as ClapParser;
use tracing_subscriber::EnvFilter;

use flw_core::{Alerts, FlowFile};
use flwdec::{DecompileOptions, Game, OptimizeOptions, decompile};

#[derive(ClapParser)]
#[command(name = "flwdec")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Decompile FLW0 battle-AI scripts into readable pseudocode", long_about = None)]
struct Cli {
    /// Which game the data is from (EO3 or EOU)
    game: String,

    /// File containing the raw flw0 data
    input_file: PathBuf,

    /// File in which to place the output
    output_file: PathBuf,

    /// Print the output to the console in addition to saving it
    #[arg(long = "show_output")]
    show_output: bool,

    /// Do not print warnings when unexpected values are encountered
    #[arg(long = "hide_alerts")]
    hide_alerts: bool,

    /// Run all optimization passes; the individual flags are ignored
    #[arg(long = "fully_optimize")]
    fully_optimize: bool,

    /// Convert (if t1 else (if t2 else f)) to if/elif/else chains
    #[arg(long = "flatten_conditionals")]
    flatten_conditionals: bool,

    /// Hoist else blocks out of conditionals whose branches all return
    #[arg(long = "flatten_elses")]
    flatten_elses: bool,

    /// Replace constant arithmetic with its value
    #[arg(long = "constant_folding")]
    constant_folding: bool,

    /// Simplify boolean conditions where it is safe
    #[arg(long = "simplify_conditions")]
    simplify_conditions: bool,

    /// For handwritten scripts that do not decompile well otherwise;
    /// disables the join-merge structuring pass
    #[arg(long)]
    handwritten: bool,

    /// Emit a disassembly listing instead of decompiling
    #[arg(long)]
    disassemble: bool,

    /// Keep dead instructions and unreachable blocks (disassembly only)
    #[arg(long = "no_dce")]
    no_dce: bool,
}

fn main() {
    // Alerts are replayed by hand below; the subscriber only surfaces
    // errors unless RUST_LOG asks for more.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("error")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(message) = run(&cli) {
        eprintln!("error: {}", message);
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let game: Game = cli.game.parse()?;
    let data = fs::read(&cli.input_file)
        .map_err(|e| format!("could not read {}: {}", cli.input_file.display(), e))?;

    let mut alerts = Alerts::new();
    let output = if cli.disassemble {
        let flow = FlowFile::parse(&data, !cli.no_dce, &mut alerts)
            .map_err(|e| e.to_string())?;
        flow.display_disassembly()
    } else {
        let optimize = if cli.fully_optimize {
            OptimizeOptions::all()
        } else {
            OptimizeOptions {
                flatten_conditionals: cli.flatten_conditionals,
                flatten_elses: cli.flatten_elses,
                constant_folding: cli.constant_folding,
                simplify_conditions: cli.simplify_conditions,
            }
        };
        let options =
            DecompileOptions { game, handwritten: cli.handwritten, optimize };
        let mut pseudocode = decompile(&data, &options, &mut alerts)?;
        pseudocode.push_str("\n\n");
        pseudocode
    };

    if !cli.hide_alerts {
        for message in alerts.messages() {
            eprintln!("{}", message);
        }
    }

    if cli.show_output {
        println!("{}", output);
    }
    fs::write(&cli.output_file, &output)
        .map_err(|e| format!("could not write {}: {}", cli.output_file.display(), e))?;
    Ok(())
}
