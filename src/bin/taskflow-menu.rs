use std::io;

use taskflow::error::Result;
use taskflow::menu::{InMemoryStorage, Menu};

fn main() -> Result<()> {
    // Logs go to stderr so they never interleave with the menu.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut menu = Menu::new(InMemoryStorage::new(), stdin.lock(), stdout.lock());
    menu.run()?;
    Ok(())
}
