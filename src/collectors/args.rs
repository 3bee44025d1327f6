//! Typed per-scraper arguments.
//!
//! A configurable scraper declares a fixed list of [`ArgDefinition`]s and keeps
//! its current values in an [`ArgSet`]. Values arrive from the command line as
//! strings, are parsed into an [`ArgValue`] that carries its own type tag, and
//! are checked against the definition before they replace anything.

use parking_lot::RwLock;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Bool,
    Int,
    String,
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::String => f.write_str("string"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl ArgValue {
    #[must_use]
    pub const fn kind(&self) -> ArgKind {
        match self {
            Self::Bool(_) => ArgKind::Bool,
            Self::Int(_) => ArgKind::Int,
            Self::String(_) => ArgKind::String,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArgError {
    #[error("scraper {scraper} does not accept arguments (got {name})")]
    NoArgsAllowed { scraper: String, name: String },

    #[error("scraper {scraper} has no argument named {name}")]
    UnknownArg { scraper: String, name: String },

    #[error("argument {name} of scraper {scraper} expects a {expected}, got {value}")]
    WrongArgType {
        scraper: String,
        name: String,
        expected: ArgKind,
        value: String,
    },

    #[error("argument {name} declared as {kind} but its default {default} is a {actual}")]
    DefaultKindMismatch {
        name: String,
        kind: ArgKind,
        actual: ArgKind,
        default: String,
    },

    #[error("scraper {scraper} declares argument {name} more than once")]
    DuplicateDefinition { scraper: String, name: String },
}

/// Declaration of one argument: name, help text and a typed default.
///
/// The kind is always the kind of the default value, so a definition can not
/// claim one type and carry another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgDefinition {
    name: &'static str,
    help: &'static str,
    default: ArgValue,
}

impl ArgDefinition {
    /// Checked constructor for definitions whose kind is given separately.
    ///
    /// # Errors
    ///
    /// Returns [`ArgError::DefaultKindMismatch`] when `default` is not a `kind`.
    pub fn new(
        name: &'static str,
        help: &'static str,
        kind: ArgKind,
        default: ArgValue,
    ) -> Result<Self, ArgError> {
        if default.kind() != kind {
            return Err(ArgError::DefaultKindMismatch {
                name: name.to_string(),
                kind,
                actual: default.kind(),
                default: default.to_string(),
            });
        }
        Ok(Self {
            name,
            help,
            default,
        })
    }

    #[must_use]
    pub const fn bool(name: &'static str, help: &'static str, default: bool) -> Self {
        Self {
            name,
            help,
            default: ArgValue::Bool(default),
        }
    }

    #[must_use]
    pub const fn int(name: &'static str, help: &'static str, default: i64) -> Self {
        Self {
            name,
            help,
            default: ArgValue::Int(default),
        }
    }

    #[must_use]
    pub fn string(name: &'static str, help: &'static str, default: &str) -> Self {
        Self {
            name,
            help,
            default: ArgValue::String(default.to_string()),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn help(&self) -> &'static str {
        self.help
    }

    #[must_use]
    pub const fn kind(&self) -> ArgKind {
        self.default.kind()
    }

    #[must_use]
    pub const fn default_value(&self) -> &ArgValue {
        &self.default
    }
}

/// A runtime `{ name, value }` pair handed to [`Configurable::configure`].
///
/// [`Configurable::configure`]: crate::collectors::Configurable::configure
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arg {
    pub name: String,
    pub value: ArgValue,
}

impl Arg {
    #[must_use]
    pub fn new(name: impl Into<String>, value: ArgValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Fresh argument list carrying each definition's default.
#[must_use]
pub fn default_args(defs: &[ArgDefinition]) -> Vec<Arg> {
    defs.iter()
        .map(|def| Arg::new(def.name, def.default.clone()))
        .collect()
}

/// Check that argument names are unique within one scraper.
///
/// # Errors
///
/// Returns [`ArgError::DuplicateDefinition`] for the first repeated name.
pub fn validate_definitions(scraper: &str, defs: &[ArgDefinition]) -> Result<(), ArgError> {
    for (i, def) in defs.iter().enumerate() {
        if defs.iter().skip(i + 1).any(|other| other.name == def.name) {
            return Err(ArgError::DuplicateDefinition {
                scraper: scraper.to_string(),
                name: def.name.to_string(),
            });
        }
    }
    Ok(())
}

/// Optional capability of scrapers that take arguments.
pub trait Configurable: Send + Sync {
    fn arg_definitions(&self) -> &[ArgDefinition];

    /// Current values, one per definition.
    fn args(&self) -> Vec<Arg>;

    /// Apply any subset of the declared arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ArgError::UnknownArg`] or [`ArgError::WrongArgType`]; nothing
    /// is applied in that case.
    fn configure(&self, args: &[Arg]) -> Result<(), ArgError>;
}

/// Current argument values of one configurable scraper.
///
/// Scrapers are shared between concurrent scrapes, so values live behind a
/// lock; scrapers read them once at the start of `scrape`.
#[derive(Debug)]
pub struct ArgSet {
    scraper: &'static str,
    defs: Vec<ArgDefinition>,
    values: RwLock<Vec<Arg>>,
}

impl ArgSet {
    /// Values start at each definition's default.
    #[must_use]
    pub fn new(scraper: &'static str, defs: Vec<ArgDefinition>) -> Self {
        let values = RwLock::new(default_args(&defs));
        Self {
            scraper,
            defs,
            values,
        }
    }

    #[must_use]
    pub fn definitions(&self) -> &[ArgDefinition] {
        &self.defs
    }

    #[must_use]
    pub fn current(&self) -> Vec<Arg> {
        self.values.read().clone()
    }

    /// Validate every arg first, then apply them in order. A failing arg
    /// leaves the current values untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ArgError::UnknownArg`] or [`ArgError::WrongArgType`].
    pub fn configure(&self, args: &[Arg]) -> Result<(), ArgError> {
        for arg in args {
            let def = self
                .defs
                .iter()
                .find(|d| d.name == arg.name)
                .ok_or_else(|| ArgError::UnknownArg {
                    scraper: self.scraper.to_string(),
                    name: arg.name.clone(),
                })?;

            if def.kind() != arg.value.kind() {
                return Err(ArgError::WrongArgType {
                    scraper: self.scraper.to_string(),
                    name: arg.name.clone(),
                    expected: def.kind(),
                    value: arg.value.to_string(),
                });
            }
        }

        let mut values = self.values.write();
        for arg in args {
            if let Some(slot) = values.iter_mut().find(|v| v.name == arg.name) {
                slot.value = arg.value.clone();
            }
        }

        Ok(())
    }

    fn value(&self, name: &str) -> Option<ArgValue> {
        self.values
            .read()
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.clone())
    }

    /// Current bool value, falling back to `false` for names that are not bools.
    #[must_use]
    pub fn bool(&self, name: &str) -> bool {
        self.value(name)
            .and_then(|v| v.as_bool())
            .unwrap_or_default()
    }

    /// Current int value, falling back to `0` for names that are not ints.
    #[must_use]
    pub fn int(&self, name: &str) -> i64 {
        self.value(name).and_then(|v| v.as_int()).unwrap_or_default()
    }

    /// Current string value, falling back to `""` for names that are not strings.
    #[must_use]
    pub fn string(&self, name: &str) -> String {
        match self.value(name) {
            Some(ArgValue::String(s)) => s,
            _ => String::new(),
        }
    }
}

impl Configurable for ArgSet {
    fn arg_definitions(&self) -> &[ArgDefinition] {
        self.definitions()
    }

    fn args(&self) -> Vec<Arg> {
        self.current()
    }

    fn configure(&self, args: &[Arg]) -> Result<(), ArgError> {
        Self::configure(self, args)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn defs() -> Vec<ArgDefinition> {
        vec![
            ArgDefinition::int("limit", "Limit the number of rows", 250),
            ArgDefinition::bool("utc", "Use UTC", false),
            ArgDefinition::string("database", "Database name", "heartbeat"),
        ]
    }

    #[test]
    fn test_default_args() {
        let args = default_args(&defs());
        assert_eq!(
            args,
            vec![
                Arg::new("limit", ArgValue::Int(250)),
                Arg::new("utc", ArgValue::Bool(false)),
                Arg::new("database", ArgValue::String("heartbeat".to_string())),
            ]
        );
    }

    #[test]
    fn test_definition_kind_follows_default() {
        let def = ArgDefinition::string("databases", "help", "*");
        assert_eq!(def.kind(), ArgKind::String);
        assert_eq!(def.default_value(), &ArgValue::String("*".to_string()));
    }

    #[test]
    fn test_checked_definition_rejects_mismatch() {
        let err = ArgDefinition::new("x", "help", ArgKind::Bool, ArgValue::String("y".into()))
            .unwrap_err();
        assert!(matches!(err, ArgError::DefaultKindMismatch { .. }));

        let ok = ArgDefinition::new("x", "help", ArgKind::Int, ArgValue::Int(1));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_definitions() {
        let defs = vec![
            ArgDefinition::int("limit", "a", 1),
            ArgDefinition::int("limit", "b", 2),
        ];
        let err = validate_definitions("test", &defs).unwrap_err();
        assert!(matches!(err, ArgError::DuplicateDefinition { .. }));
        assert!(validate_definitions("test", &self::defs()).is_ok());
    }

    #[test]
    fn test_configurable_through_trait_object() {
        let set = ArgSet::new("test", defs());
        let configurable: &dyn Configurable = &set;
        assert_eq!(configurable.arg_definitions().len(), 3);

        configurable
            .configure(&[Arg::new("database", ArgValue::String("hb".into()))])
            .unwrap();
        let args = configurable.args();
        assert!(args.contains(&Arg::new("database", ArgValue::String("hb".into()))));
    }

    #[test]
    fn test_configure_replaces_values() {
        let set = ArgSet::new("test", defs());
        set.configure(&[Arg::new("limit", ArgValue::Int(500))])
            .unwrap();
        assert_eq!(set.int("limit"), 500);
        assert!(!set.bool("utc"));
        assert_eq!(set.string("database"), "heartbeat");
    }

    #[test]
    fn test_configure_later_value_wins() {
        let set = ArgSet::new("test", defs());
        set.configure(&[
            Arg::new("limit", ArgValue::Int(1)),
            Arg::new("limit", ArgValue::Int(2)),
        ])
        .unwrap();
        assert_eq!(set.int("limit"), 2);
    }

    #[test]
    fn test_configure_unknown_arg() {
        let set = ArgSet::new("test", defs());
        let err = set
            .configure(&[Arg::new("nope", ArgValue::Int(1))])
            .unwrap_err();
        assert_eq!(
            err,
            ArgError::UnknownArg {
                scraper: "test".to_string(),
                name: "nope".to_string()
            }
        );
    }

    #[test]
    fn test_configure_wrong_type_is_atomic() {
        let set = ArgSet::new("test", defs());
        let err = set
            .configure(&[
                Arg::new("limit", ArgValue::Int(10)),
                Arg::new("utc", ArgValue::String("true".into())),
            ])
            .unwrap_err();
        assert!(matches!(err, ArgError::WrongArgType { .. }));
        // nothing applied
        assert_eq!(set.int("limit"), 250);
    }

    #[test]
    fn test_configure_is_idempotent() {
        let args = [
            Arg::new("limit", ArgValue::Int(42)),
            Arg::new("utc", ArgValue::Bool(true)),
        ];

        let once = ArgSet::new("test", defs());
        once.configure(&args).unwrap();

        let twice = ArgSet::new("test", defs());
        twice.configure(&args).unwrap();
        twice.configure(&args).unwrap();

        assert_eq!(once.current(), twice.current());
    }
}
