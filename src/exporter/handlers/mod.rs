mod health;
mod landing;
mod metrics;

pub use self::health::health;
pub use self::landing::landing;
pub use self::metrics::{ScrapeParams, metrics};
