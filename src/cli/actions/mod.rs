pub mod run;

use crate::collectors::config::CollectorConfig;
use crate::collectors::registry::ScraperRegistry;
use crate::exporter::web_config::WebConfig;
use secrecy::SecretString;
use std::sync::Arc;

#[derive(Debug)]
pub enum Action {
    Run {
        config: CollectorConfig,
        dsn: Option<SecretString>,
        web_config: Option<WebConfig>,
        registry: Arc<ScraperRegistry>,
    },
}
