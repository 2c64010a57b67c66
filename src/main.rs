//! Entry point for the `dishlab` command-line client.

use clap::Parser;
use dishlab::cli::{self, Cli};
use dishlab::logging::{self, LogSession, Verbosity};

fn main() {
    let args = Cli::parse();
    let session = LogSession {
        command: args.command.name(),
        verbosity: Verbosity::from_flags(args.verbose, args.quiet),
    };

    if let Err(err) = logging::init(&session) {
        eprintln!("File logging disabled: {err}");
        if let Err(err) = logging::init_console(session.verbosity) {
            eprintln!("Logging disabled: {err}");
        }
    }

    if let Err(err) = cli::run(args) {
        tracing::error!("{err}");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
