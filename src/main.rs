use clap::Parser;
use std::panic::{self, PanicHookInfo};
use switchbot_listener::app::{Options, RealScanner, run_with_io};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd, cron wrappers) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    env_logger::init();

    let options = Options::parse();

    let mut stdout = std::io::stdout();
    let mut stderr = std::io::stderr();

    match run_with_io(options, &RealScanner, &mut stdout, &mut stderr).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
