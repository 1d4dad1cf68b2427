//! The options registry.
//!
//! Every option has a fixed [`OptionDef`]: a type, an optional default and a
//! required flag. Values are validated when set. Defaults are rendered on
//! read until [`Options::init`] stores them.

mod config;
mod defs;
mod kind;
pub mod template;

pub use kind::{Constraint, Kind, Range, StrKind};

use crate::error::{Error, OptionError, Result};
use template::{Scope, ServerVar, Template};

use std::{
    any::Any,
    borrow::Cow,
    collections::HashMap,
    fmt::{self, Debug, Display, Formatter},
    path::{Path, PathBuf},
    sync::Arc,
};

/// An option value.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Number(i64),
    Str(String),
    /// An opaque object or handle supplied by the caller.
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Self::Object(Arc::new(value))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Object(_) => f.write_str("Object(..)"),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Object(_) => f.write_str("<object>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Number(value.into())
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Number(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Str(value.into())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&Path> for Value {
    fn from(value: &Path) -> Self {
        Self::Str(value.to_string_lossy().into_owned())
    }
}

/// The definition of a single option.
#[derive(Clone, Debug)]
pub struct OptionDef {
    pub name: String,
    pub kind: Kind,
    pub default: Option<Value>,
    pub required: bool,
}

impl OptionDef {
    /// Creates a definition, parsing the type string.
    pub fn new(
        name: &str,
        kind: &str,
        default: Option<Value>,
        required: bool,
    ) -> Result<Self> {
        Ok(Self {
            name: name.to_owned(),
            kind: kind.parse()?,
            default,
            required,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Origin {
    Explicit,
    Default,
}

/// Option definitions together with their current values.
#[derive(Clone, Debug)]
pub struct Options {
    defs: Vec<OptionDef>,
    index: HashMap<String, usize>,
    values: HashMap<String, (Value, Origin)>,
    errors: Vec<OptionError>,
    script: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    /// Creates a registry holding the built-in daemon options.
    pub fn new() -> Self {
        Self::with_definitions(defs::builtin())
    }

    /// Creates a registry holding only the given definitions.
    ///
    /// Defaults are resolved in definition order, so an option referenced
    /// by another option's default should be defined first.
    pub fn with_definitions(defs: Vec<OptionDef>) -> Self {
        let index = defs
            .iter()
            .enumerate()
            .map(|(i, def)| (def.name.clone(), i))
            .collect();

        Self {
            defs,
            index,
            values: HashMap::new(),
            errors: Vec::new(),
            script: None,
        }
    }

    /// Overrides the executable path reported by `{SERVER.SCRIPT_NAME}`.
    pub fn script_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.script = Some(path.into());
        self
    }

    /// Adds or replaces a definition.
    pub fn define(&mut self, def: OptionDef) {
        match self.index.get(&def.name) {
            Some(&i) => self.defs[i] = def,
            None => {
                self.index.insert(def.name.clone(), self.defs.len());
                self.defs.push(def);
            }
        }
    }

    pub fn definition(&self, name: &str) -> Option<&OptionDef> {
        self.index.get(name).map(|&i| &self.defs[i])
    }

    pub fn definitions(&self) -> impl Iterator<Item = &OptionDef> {
        self.defs.iter()
    }

    /// Validation problems that still apply.
    ///
    /// Setting an option again replaces its earlier problem, and each
    /// [`Self::init`] replaces the problems reported by the previous one.
    pub fn errors(&self) -> &[OptionError] {
        &self.errors
    }

    /// Sets an option.
    ///
    /// A value of a known option is stored even when it fails validation;
    /// the failure is recorded and returned so the caller can react.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::Options;
    ///
    /// let mut options = Options::new();
    ///
    /// assert!(options.set("appName", "logparser").is_ok());
    /// assert!(options.set("appRunAsUID", 70000).is_err());
    /// assert!(options.get("appRunAsUID").is_some());
    /// ```
    pub fn set<V: Into<Value>>(
        &mut self,
        name: &str,
        value: V,
    ) -> std::result::Result<(), OptionError> {
        let value = value.into();

        let Some(def) = self.definition(name) else {
            let err = OptionError::Unknown(name.to_owned());
            self.errors.push(err.clone());
            return Err(err);
        };

        let result = if def.kind.accepts(&value) {
            Ok(())
        } else {
            Err(invalid(def, &value))
        };

        self.errors.retain(|err| err.name() != name);
        if let Err(err) = &result {
            self.errors.push(err.clone());
        }

        self.values.insert(name.to_owned(), (value, Origin::Explicit));

        result
    }

    /// Sets every entry, reporting all failures at once.
    ///
    /// Entries are applied independently; a failing entry does not undo the
    /// others.
    pub fn set_all<I, K, V>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let errors: Vec<_> = values
            .into_iter()
            .filter_map(|(name, value)| self.set(name.as_ref(), value).err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Options(errors))
        }
    }

    /// Returns the stored value, or else the option's default if it
    /// resolves to a valid value.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::Options;
    ///
    /// let options = Options::new();
    /// assert_eq!(options.get_number("logVerbosity"), Some(6));
    /// assert!(options.get("appName").is_none());
    /// ```
    pub fn get(&self, name: &str) -> Option<Cow<'_, Value>> {
        if let Some((value, _)) = self.values.get(name) {
            return Some(Cow::Borrowed(value));
        }

        let def = self.definition(name)?;
        self.resolve_default(def)
            .filter(|value| def.kind.accepts(value))
    }

    pub fn get_str(&self, name: &str) -> Option<Cow<'_, str>> {
        match self.get(name)? {
            Cow::Borrowed(value) => value.as_str().map(Cow::Borrowed),
            Cow::Owned(Value::Str(s)) => Some(Cow::Owned(s)),
            Cow::Owned(_) => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(|value| value.as_bool())
    }

    pub fn get_number(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(|value| value.as_number())
    }

    pub fn get_path(&self, name: &str) -> Option<Cow<'_, Path>> {
        self.get_str(name).map(|s| match s {
            Cow::Borrowed(s) => Cow::Borrowed(Path::new(s)),
            Cow::Owned(s) => Cow::Owned(PathBuf::from(s)),
        })
    }

    /// Resolves defaults for every option without an explicit value.
    ///
    /// When `premature` is true, missing or invalid required options are
    /// tolerated so that logging can be configured before the caller has
    /// supplied everything. Otherwise every required option must end up
    /// with a valid value. Returns the number of defaults applied.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::Options;
    ///
    /// let mut options = Options::new();
    /// assert!(options.init(true).is_ok());
    /// assert!(options.init(false).is_err());
    /// ```
    pub fn init(&mut self, premature: bool) -> Result<usize> {
        let mut applied = 0;
        let mut errors = Vec::new();

        // Keep only problems with values the caller set.
        let values = &self.values;
        self.errors.retain(|err| match err {
            OptionError::Unknown(_) => true,
            OptionError::Missing(_) => false,
            OptionError::Invalid { name, .. } => {
                matches!(values.get(name), Some((_, Origin::Explicit)))
            }
        });

        for i in 0..self.defs.len() {
            let name = self.defs[i].name.clone();

            if matches!(self.values.get(&name), Some((_, Origin::Explicit))) {
                continue;
            }
            self.values.remove(&name);

            let def = &self.defs[i];
            // An invalid default is worse than none.
            let Some(value) = self
                .resolve_default(def)
                .filter(|value| def.kind.accepts(value))
                .map(Cow::into_owned)
            else {
                continue;
            };

            self.values.insert(name, (value, Origin::Default));
            applied += 1;
        }

        if !premature {
            for def in self.defs.iter().filter(|def| def.required) {
                match self.values.get(&def.name) {
                    None => errors.push(OptionError::Missing(def.name.clone())),
                    Some((value, _)) if !def.kind.accepts(value) => {
                        errors.push(invalid(def, value));
                    }
                    Some(_) => (),
                }
            }
        }

        if errors.is_empty() {
            Ok(applied)
        } else {
            for err in &errors {
                if !self.errors.contains(err) {
                    self.errors.push(err.clone());
                }
            }
            Err(Error::Options(errors))
        }
    }

    /// Renders an option's default without storing it.
    pub fn default_of(&self, name: &str) -> Option<Value> {
        self.definition(name)
            .and_then(|def| self.resolve_default(def))
            .map(Cow::into_owned)
    }

    fn resolve_default<'a>(&self, def: &'a OptionDef) -> Option<Cow<'a, Value>> {
        let default = def.default.as_ref()?;

        match default {
            Value::Str(s) => {
                let template = Template::parse(s);
                if template.is_literal() {
                    return Some(Cow::Borrowed(default));
                }

                let rendered = template.render(self);
                for problem in &rendered.problems {
                    tracing::debug!(
                        option = %def.name,
                        "default not fully resolved: {problem}"
                    );
                }

                Some(Cow::Owned(Value::Str(rendered.text)))
            }
            _ => Some(Cow::Borrowed(default)),
        }
    }
}

impl Scope for Options {
    /// Only stored values take part, so defaults never render each other
    /// outside of [`Options::init`].
    fn option(&self, name: &str) -> Option<String> {
        match &self.values.get(name)?.0 {
            Value::Str(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Object(_) => None,
        }
    }

    fn server(&self, var: ServerVar) -> Option<String> {
        match var {
            ServerVar::ScriptName => {
                let path = match &self.script {
                    Some(path) => path.clone(),
                    None => std::env::current_exe().ok()?,
                };
                Some(path.to_string_lossy().into_owned())
            }
        }
    }
}

fn invalid(def: &OptionDef, value: &Value) -> OptionError {
    OptionError::Invalid {
        name: def.name.clone(),
        kind: def.kind.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(dir: &Path) -> Options {
        let mut options = Options::new().script_path(dir.join("logparser"));

        options
            .set_all([
                ("appName", Value::from("logparser")),
                ("appDescription", "Parses logs".into()),
                ("authorName", "Kevin".into()),
                ("authorEmail", "kevin@example.com".into()),
                ("logLocation", dir.join("logparser.log").as_path().into()),
            ])
            .unwrap();

        options
    }

    #[test]
    fn required_without_default_is_listed() {
        let mut options = Options::new();

        let Err(Error::Options(errors)) = options.init(false) else {
            panic!("init should fail");
        };

        for name in ["appName", "authorName", "authorEmail", "appDescription"] {
            assert!(
                errors.contains(&OptionError::Missing(name.into())),
                "{name} not listed in {errors:?}"
            );
        }
    }

    #[test]
    fn defaults_are_readable_before_init() {
        let mut options = Options::new();

        assert_eq!(options.get_number("logVerbosity"), Some(6));
        assert_eq!(options.get_str("appChkConfig").as_deref(), Some("- 99 0"));
        assert!(options.get("appPidLocation").is_none());

        options.set("appName", "svc").unwrap();

        assert_eq!(
            options.get_str("appPidLocation").as_deref(),
            Some("/var/run/svc/svc.pid")
        );
    }

    #[test]
    fn errors_describe_current_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::new().script_path(dir.path().join("logparser"));

        options.init(true).unwrap();
        assert!(options.init(false).is_err());
        assert!(!options.errors().is_empty());

        let _ = options.set("logVerbosity", 9);
        options
            .set_all([
                ("appName", Value::from("logparser")),
                ("appDescription", "Parses logs".into()),
                ("authorName", "Kevin".into()),
                ("authorEmail", "kevin@example.com".into()),
                ("logLocation", dir.path().join("logparser.log").as_path().into()),
                ("logVerbosity", 7.into()),
            ])
            .unwrap();
        options.init(false).unwrap();

        assert!(options.errors().is_empty(), "{:?}", options.errors());
    }

    #[test]
    fn premature_init_tolerates_missing() {
        let mut options = Options::new();

        assert!(options.init(true).unwrap() > 0);
        assert_eq!(options.get_number("logVerbosity"), Some(6));
        assert!(options.get("appName").is_none());
    }

    #[test]
    fn invalid_value_is_stored_and_reported() {
        let mut options = Options::new();

        let err = options.set("appRunAsUID", 70000).unwrap_err();

        assert_eq!(
            err,
            OptionError::Invalid {
                name: "appRunAsUID".into(),
                kind: "number/0-65000|string/unix".into(),
                value: "70000".into(),
            }
        );
        assert_eq!(options.get_number("appRunAsUID"), Some(70000));
        assert_eq!(options.errors(), [err]);
    }

    #[test]
    fn unknown_option_is_not_stored() {
        let mut options = Options::new();

        assert_eq!(
            options.set("colour", "blue"),
            Err(OptionError::Unknown("colour".into()))
        );
        assert!(options.get("colour").is_none());
    }

    #[test]
    fn set_all_applies_every_entry() {
        let mut options = Options::new();

        let result = options.set_all([
            ("appName", Value::from("Bad Name")),
            ("appDescription", "fine".into()),
        ]);

        assert!(matches!(result, Err(Error::Options(ref e)) if e.len() == 1));
        assert_eq!(options.get_str("appName").as_deref(), Some("Bad Name"));
        assert_eq!(options.get_str("appDescription").as_deref(), Some("fine"));
    }

    #[test]
    fn default_templates_use_options() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = configured(dir.path());

        options.init(false).unwrap();

        assert_eq!(
            options.get_str("appPidLocation").as_deref(),
            Some("/var/run/logparser/logparser.pid")
        );
        assert!(options.get_str("appPidLocation").unwrap().contains("logparser"));
        assert_eq!(options.get_str("appExecutable").as_deref(), Some("logparser"));
        assert_eq!(options.get_path("appDir").as_deref(), Some(dir.path()));
    }

    #[test]
    fn premature_defaults_are_resolved_again() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = Options::new().script_path(dir.path().join("x"));

        options.init(true).unwrap();
        assert!(options.get("appPidLocation").is_none());

        options.set("appName", "svc").unwrap();
        options.init(true).unwrap();

        assert_eq!(
            options.get_str("appPidLocation").as_deref(),
            Some("/var/run/svc/svc.pid")
        );
    }

    #[test]
    fn explicit_values_win_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = configured(dir.path());

        options.set("logVerbosity", 7).unwrap();
        options.init(false).unwrap();

        assert_eq!(options.get_number("logVerbosity"), Some(7));
    }

    #[test]
    fn invalid_required_value_fails_init() {
        let dir = tempfile::tempdir().unwrap();
        let mut options = configured(dir.path());

        let _ = options.set("logVerbosity", 9);
        let Err(Error::Options(errors)) = options.init(false) else {
            panic!("init should fail");
        };

        assert!(matches!(
            &errors[..],
            [OptionError::Invalid { name, .. }] if name == "logVerbosity"
        ));
    }

    #[test]
    fn custom_definitions() {
        let mut options = Options::with_definitions(vec![
            OptionDef::new("name", "string/unix", None, true).unwrap(),
            OptionDef::new(
                "home",
                "string",
                Some("/srv/{OPTIONS.name}".into()),
                true,
            )
            .unwrap(),
        ]);

        options.set("name", "svc").unwrap();
        assert_eq!(options.init(false).unwrap(), 1);
        assert_eq!(options.get_str("home").as_deref(), Some("/srv/svc"));
    }
}
