use anyhow::Context;
use std::process::ExitCode;

fn main() -> ExitCode {
    match maia::run().context("maia failed") {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            eprintln!("{:#}", e);
            ExitCode::from(2)
        }
    }
}
