use std::process::ExitCode;

pub mod cli;
pub mod config;
pub mod reboot;
pub mod system;
pub mod update;

#[cfg(test)]
mod testing;

pub fn main() -> ExitCode {
    match cli::main() {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{error:?}");
            ExitCode::FAILURE
        }
    }
}
