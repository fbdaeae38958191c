//! Print a signed bearer token for a subject, using the server's config.
//!
//! Usage: `taskflow-token <user-id>`

use taskflow::auth::IdentityResolver;
use taskflow::config::AppConfig;
use taskflow::error::Result;

fn main() -> Result<()> {
    let Some(subject) = std::env::args().nth(1).filter(|s| !s.trim().is_empty()) else {
        eprintln!("Usage: taskflow-token <user-id>");
        std::process::exit(2);
    };

    let config = AppConfig::from_env()?;
    config.validate()?;

    let resolver = IdentityResolver::new(&config.auth);
    let token = resolver.issue_token(subject.trim())?;
    println!("{token}");
    Ok(())
}
