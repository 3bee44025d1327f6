use crate::cli::actions::Action;
use crate::exporter::new;
use anyhow::Result;

/// Handle the run action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run {
            config,
            dsn,
            web_config,
            registry,
        } => {
            new(config, dsn, web_config, registry).await?;
        }
    }

    Ok(())
}
