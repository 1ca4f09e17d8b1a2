//! `k2c` — convert a Keras model export into C code.
//!
//! Usage:
//!   k2c convert model.json my_net [--tests 10] [-o <dir>]

use std::path::PathBuf;
use std::process;

use k2c_compiler::model::load::load_model;

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(|s| s.as_str()) {
        Some("convert") => cmd_convert(&args[1..]),
        Some("--help") | Some("-h") | None => print_usage(),
        Some(other) => {
            eprintln!("error: unknown subcommand '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("k2c — Keras-to-C model compiler");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  k2c convert <model.json> <function_name> [--tests <N>] [-o <dir>]");
    eprintln!();
    eprintln!("Subcommands:");
    eprintln!("  convert   Compile a model export into a C module and its test suite");
}

fn cmd_convert(args: &[String]) {
    let mut model_path: Option<String> = None;
    let mut function_name: Option<String> = None;
    let mut out_dir: Option<PathBuf> = None;
    let mut num_tests: usize = 10;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--out" | "-o" => {
                i += 1;
                out_dir = Some(PathBuf::from(args.get(i).unwrap_or_else(|| {
                    eprintln!("-o requires a directory path");
                    process::exit(1);
                })));
            }
            "--tests" | "-t" => {
                i += 1;
                num_tests = args
                    .get(i)
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_else(|| {
                        eprintln!("--tests requires a number");
                        process::exit(1);
                    });
            }
            "--help" | "-h" => {
                eprintln!("Usage: k2c convert <model.json> <function_name> [--tests <N>] [-o <dir>]");
                eprintln!();
                eprintln!("Compile a Keras model export into C code targeting the k2c runtime.");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  -t, --tests <N>  Number of test cases to generate (default: 10)");
                eprintln!("  -o, --out <DIR>  Output directory (default: current directory)");
                process::exit(0);
            }
            other => {
                if model_path.is_none() {
                    model_path = Some(other.to_string());
                } else if function_name.is_none() {
                    function_name = Some(other.to_string());
                } else {
                    eprintln!("Unexpected argument: {other}");
                    eprintln!("Usage: k2c convert <model.json> <function_name> [--tests <N>] [-o <dir>]");
                    process::exit(1);
                }
            }
        }
        i += 1;
    }

    let (model_path, function_name) = match (model_path, function_name) {
        (Some(m), Some(f)) => (m, f),
        _ => {
            eprintln!("Usage: k2c convert <model.json> <function_name> [--tests <N>] [-o <dir>]");
            process::exit(1);
        }
    };
    let out_dir = out_dir.unwrap_or_else(|| PathBuf::from("."));

    let model = load_model(&model_path).unwrap_or_else(|err| {
        eprintln!("error reading {model_path}: {err}");
        process::exit(1);
    });

    let artifacts = k2c_compiler::convert(&model, &function_name, num_tests, &out_dir)
        .unwrap_or_else(|err| {
            eprintln!("error: {err}");
            process::exit(1);
        });

    eprintln!(
        "Generated {} and {}",
        artifacts.module_path.display(),
        artifacts.harness_path.display()
    );
}
