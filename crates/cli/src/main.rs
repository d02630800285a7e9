//! Out-of-order core simulator CLI.
//!
//! Parses a flat machine-code image from a hex string or file, selects a
//! frontend, runs the simulation to completion, and prints the architectural
//! summary. Exit code 0 covers normal completion including a trapped core
//! exception; option and input errors exit nonzero.

use std::fs;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use log::LevelFilter;

use o3sim_core::sim::FrontendSelect;
use o3sim_core::{Config, Simulator};

const BANNER: &str = r"//        ________
//  ________|__  /
//  _  __ \__/_ <
//  / /_/ /___/ /
//  \____//____/
//";

#[derive(Parser, Debug)]
#[command(
    name = "o3sim",
    version,
    about = "out-of-order core simulator",
    before_help = BANNER,
    after_help = "example:  o3sim -v -f x64 -m '48c7c005000000 4883c003 f4'"
)]
struct Cli {
    /// Log level from 0 (silent) to 7 (verbose).
    #[arg(short = 'l', long = "loglv", default_value_t = 0)]
    loglv: u8,

    /// Shorthand for -l 7.
    #[arg(short, long)]
    verbose: bool,

    /// Machine code as a hex string; # comments and whitespace are stripped.
    #[arg(short, long)]
    mcode: Option<String>,

    /// Path to a file holding the machine code hex.
    #[arg(short, long)]
    infile: Option<String>,

    /// Frontend to run the code through.
    #[arg(short, long, default_value = "risc")]
    frontend: String,

    /// Measure simulation wall time.
    #[arg(short, long)]
    time: bool,

    /// Optional JSON configuration file.
    #[arg(short, long)]
    config: Option<String>,
}

/// Turns a hex string into bytes. `#` comments run to end of line; whitespace
/// is ignored. An odd digit count or a non-hex character is an input error.
fn parse_hex(input: &str) -> Result<Vec<u8>, String> {
    let mut cleaned = String::with_capacity(input.len());
    let mut in_comment = false;
    for ch in input.chars() {
        match ch {
            '#' => in_comment = true,
            '\n' => in_comment = false,
            c if in_comment || c.is_whitespace() => {}
            c => cleaned.push(c),
        }
    }

    if cleaned.len() % 2 != 0 {
        return Err("machine code has an odd number of hex digits".into());
    }
    if !cleaned.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err("machine code contains non-hex characters".into());
    }

    Ok(cleaned
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).unwrap();
            u8::from_str_radix(s, 16).unwrap()
        })
        .collect())
}

/// Maps the 0–7 log scale onto the facade's level filter.
fn level_filter(loglv: u8) -> LevelFilter {
    match loglv {
        0 => LevelFilter::Off,
        1 | 2 => LevelFilter::Info,
        3 | 4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loglv = if cli.verbose || cli.loglv > 7 { 7 } else { cli.loglv };
    env_logger::Builder::new()
        .filter_level(level_filter(loglv))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let hex = match (&cli.mcode, &cli.infile) {
        (Some(m), _) => m.clone(),
        (None, Some(path)) => match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("file could not be opened: {e}");
                return ExitCode::FAILURE;
            }
        },
        (None, None) => {
            eprintln!("mcode or infile is required to run; use -h for help");
            return ExitCode::FAILURE;
        }
    };

    let code = match parse_hex(&hex) {
        Ok(c) if !c.is_empty() => c,
        Ok(_) => {
            eprintln!("machine code is not valid");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let frontend = match cli.frontend.as_str() {
        "x64" => FrontendSelect::X64,
        _ => FrontendSelect::Risc,
    };

    let config = match &cli.config {
        Some(path) => {
            let text = match fs::read_to_string(path) {
                Ok(t) => t,
                Err(e) => {
                    eprintln!("config could not be opened: {e}");
                    return ExitCode::FAILURE;
                }
            };
            match serde_json::from_str::<Config>(&text) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("config is not valid: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
        None => Config::default(),
    };

    log::info!("simulator started with:");
    log::info!("        loglevel: {loglv}");
    log::info!(
        "        frontend: {}",
        if frontend == FrontendSelect::X64 { "x64" } else { "RISC" }
    );

    let mut sim = match Simulator::new(&code, frontend, &config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    let cycles = sim.run();
    let elapsed = start.elapsed();

    println!(
        "Simulator exited after {} cycles with rip {:#018x}.",
        cycles,
        sim.state.arf.ip.read_u64()
    );
    println!("{}", sim.summary());

    if cli.time {
        println!("time {}.{:06}s", elapsed.as_secs(), elapsed.subsec_micros());
    }

    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_strips_comments_and_whitespace() {
        let code = parse_hex("48 c7 # mov\nc0 05\n00 00 00 00").unwrap();
        assert_eq!(code, vec![0x48, 0xc7, 0xc0, 0x05, 0, 0, 0, 0]);
    }

    #[test]
    fn test_parse_hex_rejects_bad_input() {
        assert!(parse_hex("abc").is_err()); // odd length
        assert!(parse_hex("zz").is_err()); // not hex
        assert!(parse_hex("").unwrap().is_empty());
    }

    #[test]
    fn test_level_mapping() {
        assert_eq!(level_filter(0), LevelFilter::Off);
        assert_eq!(level_filter(2), LevelFilter::Info);
        assert_eq!(level_filter(4), LevelFilter::Debug);
        assert_eq!(level_filter(7), LevelFilter::Trace);
    }
}
