//! `cex` — command-line entry point. All command logic lives in
//! `cex::cli`; this file only wires up logging and hands off.

use std::process::ExitCode;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    cex::cli::run()
}
