//! Lifecycle-controlled scraper registry.
//!
//! Scrapers are registered while the registry is `Uninitialized`. `init`
//! binds their command line flags and moves to `FlagsPending`; once clap has
//! parsed the command line, `on_parsed` applies the flags and moves to
//! `Ready`, waking every reader blocked in `all_scrapers`/`enabled_scrapers`.

use crate::collectors::Scraper;
use crate::collectors::args::{Arg, ArgError, ArgKind, ArgValue, validate_definitions};
use crate::collectors::config::CollectorConfig;
use clap::{ArgAction, ArgMatches, Command};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    FlagsPending,
    Ready,
    TornDown,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("scraper {0} is already registered")]
    Duplicate(String),

    #[error("invalid scraper name {0:?}: only ASCII letters, digits, '.' and '_' are allowed")]
    InvalidName(String),

    #[error("registry is already initialized")]
    AlreadyInitialized,

    #[error("registry flags have not been bound, call init first")]
    NotInitialized,

    #[error("registry has been torn down")]
    TornDown,

    #[error("unknown scraper: {0}")]
    UnknownScraper(String),

    #[error(transparent)]
    Arg(#[from] ArgError),
}

/// Command line flag ids bound for one scraper.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScraperFlags {
    pub enable: &'static str,
    pub disable: &'static str,
    /// `(arg name, flag id, kind)`
    pub args: Vec<(&'static str, &'static str, ArgKind)>,
}

pub struct RegistryEntry {
    scraper: Arc<dyn Scraper>,
    enabled_default: bool,
    enabled: bool,
    flags: ScraperFlags,
}

impl RegistryEntry {
    #[must_use]
    pub fn scraper(&self) -> &Arc<dyn Scraper> {
        &self.scraper
    }

    #[must_use]
    pub const fn enabled_default(&self) -> bool {
        self.enabled_default
    }

    #[must_use]
    pub const fn flags(&self) -> &ScraperFlags {
        &self.flags
    }
}

struct Inner {
    state: Lifecycle,
    entries: BTreeMap<&'static str, RegistryEntry>,
}

pub struct ScraperRegistry {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl Default for ScraperRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScraperRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("ScraperRegistry")
            .field("state", &inner.state)
            .field("scrapers", &inner.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

fn leak(s: String) -> &'static str {
    Box::leak(s.into_boxed_str())
}

impl ScraperRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: Lifecycle::Uninitialized,
                entries: BTreeMap::new(),
            }),
            ready: Condvar::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> Lifecycle {
        self.inner.lock().state
    }

    /// Add a scraper. Only allowed before `init`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyInitialized`] after `init`,
    /// [`RegistryError::InvalidName`], [`RegistryError::Duplicate`], or an
    /// [`ArgError`] when the scraper declares the same argument twice.
    pub fn register(
        &self,
        scraper: Arc<dyn Scraper>,
        enabled_default: bool,
    ) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();

        if inner.state != Lifecycle::Uninitialized {
            return Err(RegistryError::AlreadyInitialized);
        }

        let name = scraper.name();
        if !valid_name(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if inner.entries.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        if let Some(configurable) = scraper.as_configurable() {
            validate_definitions(name, configurable.arg_definitions())?;
        }

        inner.entries.insert(
            name,
            RegistryEntry {
                scraper,
                enabled_default,
                enabled: enabled_default,
                flags: ScraperFlags::default(),
            },
        );

        Ok(())
    }

    /// Like [`ScraperRegistry::register`], for built-in scrapers whose names
    /// are known to be unique.
    ///
    /// # Panics
    ///
    /// Panics on any registration error; this is a programming error.
    #[allow(clippy::panic)]
    pub fn must_register_with_defaults(&self, scraper: Arc<dyn Scraper>, enabled_default: bool) {
        let name = scraper.name();
        if let Err(err) = self.register(scraper, enabled_default) {
            panic!("failed to register scraper {name}: {err}");
        }
    }

    /// Bind `--collect.<name>`, `--no-collect.<name>` and
    /// `--collect.<name>.<arg>` for every registered scraper.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyInitialized`] when called twice.
    pub fn init(&self, mut cmd: Command) -> Result<Command, RegistryError> {
        let mut inner = self.inner.lock();

        if inner.state != Lifecycle::Uninitialized {
            return Err(RegistryError::AlreadyInitialized);
        }

        for (name, entry) in &mut inner.entries {
            let enable = leak(format!("collect.{name}"));
            let disable = leak(format!("no-collect.{name}"));

            let default_indicator = if entry.enabled_default {
                "[default: enabled]"
            } else {
                "[default: disabled]"
            };
            let enable_help = leak(format!(
                "Enable {name}: {} {default_indicator}",
                entry.scraper.help()
            ));
            let disable_help = leak(format!("Disable the {name} scraper"));

            cmd = cmd
                .arg(
                    clap::Arg::new(enable)
                        .long(enable)
                        .help(enable_help)
                        .action(ArgAction::SetTrue)
                        .overrides_with(disable),
                )
                .arg(
                    clap::Arg::new(disable)
                        .long(disable)
                        .help(disable_help)
                        .action(ArgAction::SetTrue)
                        .overrides_with(enable),
                );

            let mut arg_flags = Vec::new();

            if let Some(configurable) = entry.scraper.as_configurable() {
                for def in configurable.arg_definitions() {
                    let id = leak(format!("collect.{name}.{}", def.name()));
                    let help = leak(format!(
                        "{} [default: {}]",
                        def.help(),
                        def.default_value()
                    ));

                    let flag = clap::Arg::new(id).long(id).help(help);
                    let flag = match def.kind() {
                        ArgKind::Bool => flag
                            .num_args(0..=1)
                            .default_missing_value("true")
                            .value_parser(clap::value_parser!(bool)),
                        ArgKind::Int => flag
                            .value_name("INT")
                            .value_parser(clap::value_parser!(i64)),
                        ArgKind::String => flag.value_name("STRING"),
                    };

                    cmd = cmd.arg(flag);
                    arg_flags.push((def.name(), id, def.kind()));
                }
            }

            entry.flags = ScraperFlags {
                enable,
                disable,
                args: arg_flags,
            };
        }

        inner.state = Lifecycle::FlagsPending;

        Ok(cmd)
    }

    /// Post-parse hook: apply enable switches and argument flags, then
    /// transition to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotInitialized`] unless `init` ran first, or
    /// an [`ArgError`] if a scraper rejects its arguments. The registry stays
    /// in `FlagsPending` on error.
    pub fn on_parsed(&self, matches: &ArgMatches) -> Result<CollectorConfig, RegistryError> {
        let mut inner = self.inner.lock();

        match inner.state {
            Lifecycle::FlagsPending => {}
            Lifecycle::Uninitialized => return Err(RegistryError::NotInitialized),
            Lifecycle::Ready => return Err(RegistryError::AlreadyInitialized),
            Lifecycle::TornDown => return Err(RegistryError::TornDown),
        }

        let mut overrides: BTreeMap<String, Vec<Arg>> = BTreeMap::new();

        // validate every scraper's args before touching anything
        for (name, entry) in &inner.entries {
            let args = args_from_matches(matches, &entry.flags);
            if args.is_empty() {
                continue;
            }
            let configurable = entry.scraper.as_configurable().ok_or_else(|| {
                ArgError::NoArgsAllowed {
                    scraper: (*name).to_string(),
                    name: args.first().map(|a| a.name.clone()).unwrap_or_default(),
                }
            })?;
            configurable.configure(&args)?;
            overrides.insert((*name).to_string(), args);
        }

        let mut enabled = BTreeSet::new();
        for (name, entry) in &mut inner.entries {
            entry.enabled = if flag_set(matches, entry.flags.disable) {
                false
            } else if flag_set(matches, entry.flags.enable) {
                true
            } else {
                entry.enabled_default
            };

            if entry.enabled {
                enabled.insert((*name).to_string());
            }
        }

        inner.state = Lifecycle::Ready;
        self.ready.notify_all();

        debug!(enabled = ?enabled, "scraper registry ready");

        Ok(CollectorConfig::new()
            .with_enabled(enabled)
            .with_arg_overrides(overrides))
    }

    /// Apply arguments to one configurable scraper.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownScraper`], [`ArgError::NoArgsAllowed`]
    /// for scrapers without arguments, or the scraper's own [`ArgError`].
    pub fn configure(&self, name: &str, args: &[Arg]) -> Result<(), RegistryError> {
        let scraper = self
            .lookup(name)
            .ok_or_else(|| RegistryError::UnknownScraper(name.to_string()))?;

        match scraper.as_configurable() {
            Some(configurable) => Ok(configurable.configure(args)?),
            None if args.is_empty() => Ok(()),
            None => Err(ArgError::NoArgsAllowed {
                scraper: name.to_string(),
                name: args.first().map(|a| a.name.clone()).unwrap_or_default(),
            }
            .into()),
        }
    }

    /// Registered scraper with this exact name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Scraper>> {
        self.inner
            .lock()
            .entries
            .get(name)
            .map(|e| Arc::clone(&e.scraper))
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.inner
            .lock()
            .entries
            .get(name)
            .is_some_and(|e| e.enabled)
    }

    /// Every scraper, sorted by name. Blocks until the registry is `Ready`.
    #[must_use]
    pub fn all_scrapers(&self) -> Vec<Arc<dyn Scraper>> {
        self.snapshot(|_| true)
    }

    /// Enabled scrapers, sorted by name. Blocks until the registry is `Ready`.
    #[must_use]
    pub fn enabled_scrapers(&self) -> Vec<Arc<dyn Scraper>> {
        self.snapshot(|e| e.enabled)
    }

    fn snapshot(&self, filter: impl Fn(&RegistryEntry) -> bool) -> Vec<Arc<dyn Scraper>> {
        let mut inner = self.inner.lock();
        while matches!(
            inner.state,
            Lifecycle::Uninitialized | Lifecycle::FlagsPending
        ) {
            self.ready.wait(&mut inner);
        }

        inner
            .entries
            .values()
            .filter(|e| filter(e))
            .map(|e| Arc::clone(&e.scraper))
            .collect()
    }

    /// Wait up to `timeout` for the registry to leave the pending states.
    /// Returns `true` once it is `Ready` or `TornDown`.
    #[must_use]
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if matches!(
            inner.state,
            Lifecycle::Uninitialized | Lifecycle::FlagsPending
        ) {
            let _ = self.ready.wait_for(&mut inner, timeout);
        }
        matches!(inner.state, Lifecycle::Ready | Lifecycle::TornDown)
    }

    /// Enable or disable a scraper; takes effect on the next scrape.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnknownScraper`] or [`RegistryError::TornDown`].
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock();
        if inner.state == Lifecycle::TornDown {
            return Err(RegistryError::TornDown);
        }
        let entry = inner
            .entries
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownScraper(name.to_string()))?;
        entry.enabled = enabled;
        Ok(())
    }

    /// Drop every entry and release blocked readers.
    pub fn teardown(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.state = Lifecycle::TornDown;
        self.ready.notify_all();
    }

    /// Names with their default and current enabled state.
    #[must_use]
    pub fn describe(&self) -> Vec<(&'static str, bool, bool)> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(name, e)| (*name, e.enabled_default, e.enabled))
            .collect()
    }
}

fn flag_set(matches: &ArgMatches, id: &str) -> bool {
    !id.is_empty()
        && matches
            .try_get_one::<bool>(id)
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false)
}

fn args_from_matches(matches: &ArgMatches, flags: &ScraperFlags) -> Vec<Arg> {
    flags
        .args
        .iter()
        .filter_map(|(name, id, kind)| {
            let value = match kind {
                ArgKind::Bool => matches
                    .try_get_one::<bool>(id)
                    .ok()
                    .flatten()
                    .map(|v| ArgValue::Bool(*v)),
                ArgKind::Int => matches
                    .try_get_one::<i64>(id)
                    .ok()
                    .flatten()
                    .map(|v| ArgValue::Int(*v)),
                ArgKind::String => matches
                    .try_get_one::<String>(id)
                    .ok()
                    .flatten()
                    .map(|v| ArgValue::String(v.clone())),
            }?;
            Some(Arg::new(*name, value))
        })
        .collect()
}
