use crate::collectors::registry::{RegistryError, ScraperRegistry};
use clap::Command;

/// Bind `--collect.<name>`, `--no-collect.<name>` and every scraper argument
/// flag. The registry waits in `FlagsPending` until the matches are handed
/// back through `ScraperRegistry::on_parsed`.
///
/// # Errors
///
/// Fails if the registry already bound its flags.
pub fn add_scraper_args(cmd: Command, registry: &ScraperRegistry) -> Result<Command, RegistryError> {
    registry.init(cmd)
}
