macro_rules! register_scrapers {
    (
        $(
            $scraper_type:path => $enabled:expr
        ),* $(,)?
    ) => {
        /// Every built-in scraper paired with its enabled-by-default flag.
        pub fn builtin_scrapers() -> Vec<(std::sync::Arc<dyn Scraper>, bool)> {
            vec![
                $(
                    (
                        std::sync::Arc::new(<$scraper_type>::new()) as std::sync::Arc<dyn Scraper>,
                        $enabled,
                    ),
                )*
            ]
        }

        /// Registry holding every built-in scraper, ready for `init`.
        #[must_use]
        pub fn default_registry() -> ScraperRegistry {
            let registry = ScraperRegistry::new();
            for (scraper, enabled) in builtin_scrapers() {
                registry.must_register_with_defaults(scraper, enabled);
            }
            registry
        }
    };
}
