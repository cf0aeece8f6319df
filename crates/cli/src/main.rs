use std::process::ExitCode;

fn main() -> ExitCode {
    ledgerlens_cli::run()
}
