mod cli;
mod logging;
mod render;

use hitl_core::core::interrupt;

fn main() {
    if let Err(e) = cli::run() {
        if e.downcast_ref::<interrupt::InterruptedError>().is_some() {
            eprintln!("Interrupted");
            std::process::exit(interrupt::EXIT_INTERRUPTED);
        }
        eprintln!("{e:#}"); // pretty anyhow chain
        std::process::exit(1);
    }
}
