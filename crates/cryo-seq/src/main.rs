mod infra;
mod oneshot;
mod runtime;

use std::process::ExitCode;

fn main() -> ExitCode {
    match runtime::run_from_args() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("cryo-seq: {err}");
            ExitCode::FAILURE
        }
    }
}
