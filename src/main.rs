use std::process::ExitCode;

fn main() -> ExitCode {
    codecontext::app::run()
}
