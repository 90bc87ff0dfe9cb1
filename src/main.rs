mod cli;

use clap::Parser;

fn main() -> std::process::ExitCode {
    let args = cli::CliArgs::parse();
    // Session log (overwrites the previous session's log)
    paintcore::logger::init(args.verbose);
    cli::run(args)
}
