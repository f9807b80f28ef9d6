//! cpq CLI - Command-line interface
//!
//! Commands:
//!   validate    - Validate a selection set against a model
//!   price       - Price a selection set
//!   options     - List options and their availability
//!   conflicts   - Detect rule conflicts in a model
//!   priorities  - Assign and report rule priorities
//!   impact      - Evaluate a proposed rule change
//!   schema      - Print JSON schemas

mod cli;

use cpq_engine::{Result, VERSION};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        print_usage();
        return ExitCode::from(1);
    }

    let result: Result<()> = match args[1].as_str() {
        "validate" => cli::cmd_validate(&args[2..]),
        "price" => cli::cmd_price(&args[2..]),
        "options" => cli::cmd_options(&args[2..]),
        "conflicts" => cli::cmd_conflicts(&args[2..]),
        "priorities" => cli::cmd_priorities(&args[2..]),
        "impact" => cli::cmd_impact(&args[2..]),
        "schema" => cli::cmd_schema(&args[2..]),
        "version" | "--version" | "-v" => {
            println!("cpq {}", VERSION);
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        cmd => {
            eprintln!("Unknown command: {}", cmd);
            print_usage();
            Err("Unknown command".into())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(1)
        }
    }
}

/// Logs go to stderr so `--json` output stays machine-readable.
///
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=cpq_engine=trace` - Trace the engine only
/// - Default: INFO level
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,cpq_engine=info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_usage() {
    println!(
        r#"
cpq - Configure-Price-Quote constraint and pricing engine

USAGE:
    cpq <COMMAND> [OPTIONS]

COMMANDS:
    validate <model.yaml> [opt[:qty]...]    Validate selections against the model
    price <model.yaml> [opt[:qty]...]       Price selections
    options <model.yaml> [opt[:qty]...]     List options and whether they can be added
    conflicts <model.yaml>                  Detect rule conflicts
    priorities <model.yaml> [--apply]       Assign rule priorities (--apply prints the new model)
    impact <model.yaml> <change.yaml>       Evaluate a proposed rule change
    schema [name]                           Print JSON schema for an input or output type
    version                                 Print version

OPTIONS:
    --config <engine.yaml>    Engine configuration (default: built-in defaults)
    --customer <file.yaml>    Customer context for pricing and customer.* identifiers
    --output <file>           Output file (default: stdout)
    --json                    JSON output format

EXAMPLES:
    cpq validate laptop.yaml i9 ram16:2
    cpq price laptop.yaml i9 ram16:2 --customer acme.yaml --json
    cpq conflicts laptop.yaml
    cpq impact laptop.yaml add_rule.yaml
"#
    );
}
