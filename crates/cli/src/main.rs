use std::process::ExitCode;

fn main() -> ExitCode {
    buybuddy_cli::run()
}
