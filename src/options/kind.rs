//! The option type grammar.
//!
//! A type is written as `|`-separated alternatives, each either `maintype`
//! or `maintype/subtype`, for example `number/0-65000` or
//! `number/0-65000|string/unix`. The string form is parsed once into a
//! [`Kind`] and values are checked by matching on its constraints.

use super::Value;
use crate::error::{Error, Result};

use nix::unistd::{AccessFlags, access};
use regex::Regex;
use std::{
    fmt::{self, Display, Formatter},
    path::Path,
    str::FromStr,
    sync::LazyLock,
};

static EMAIL: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").ok()
});

/// An inclusive range; applies to string length or numeric value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    pub min: i64,
    pub max: i64,
}

impl Range {
    pub fn contains(&self, n: i64) -> bool {
        self.min <= n && n <= self.max
    }
}

impl FromStr for Range {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (min, max) = s
            .split_once('-')
            .ok_or_else(|| format!("range '{s}' should look like 'min-max'"))?;

        let bound = |b: &str| {
            b.trim()
                .parse::<i64>()
                .map_err(|err| format!("bad range bound '{b}': {err}"))
        };

        let range = Self {
            min: bound(min)?,
            max: bound(max)?,
        };

        if range.min > range.max {
            return Err(format!("range '{s}' is empty"));
        }

        Ok(range)
    }
}

/// String flavours.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StrKind {
    Normal,
    Email,
    /// Lowercase letters, digits and underscores.
    Unix,
    /// Like `Unix`, plus dots, slashes and dashes.
    UnixFilepath,
    ExistingDirpath,
    ExistingFilepath,
    /// The parent directory exists and is writable.
    CreatableFilepath,
}

impl StrKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Email => "email",
            Self::Unix => "unix",
            Self::UnixFilepath => "unix_filepath",
            Self::ExistingDirpath => "existing_dirpath",
            Self::ExistingFilepath => "existing_filepath",
            Self::CreatableFilepath => "creatable_filepath",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "normal" => Self::Normal,
            "email" => Self::Email,
            "unix" => Self::Unix,
            "unix_filepath" => Self::UnixFilepath,
            "existing_dirpath" => Self::ExistingDirpath,
            "existing_filepath" => Self::ExistingFilepath,
            "creatable_filepath" => Self::CreatableFilepath,
            _ => return None,
        })
    }

    fn accepts(&self, s: &str) -> bool {
        match self {
            Self::Normal => true,
            Self::Email => EMAIL.as_ref().is_some_and(|re| re.is_match(s)),
            Self::Unix => {
                !s.is_empty()
                    && s.chars().all(|c| {
                        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'
                    })
            }
            Self::UnixFilepath => {
                !s.is_empty()
                    && s.chars().all(|c| {
                        c.is_ascii_lowercase()
                            || c.is_ascii_digit()
                            || matches!(c, '_' | '.' | '/' | '-')
                    })
            }
            Self::ExistingDirpath => Path::new(s).is_dir(),
            Self::ExistingFilepath => Path::new(s).is_file(),
            Self::CreatableFilepath => {
                let path = Path::new(s);
                if path.is_dir() {
                    return false;
                }

                match path.parent() {
                    Some(parent) if parent.as_os_str().is_empty() => {
                        access(".", AccessFlags::W_OK).is_ok()
                    }
                    Some(parent) => {
                        parent.is_dir()
                            && access(parent, AccessFlags::W_OK).is_ok()
                    }
                    None => false,
                }
            }
        }
    }
}

/// One alternative of a type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Constraint {
    Bool,
    /// An opaque object or handle.
    Object,
    Number { range: Option<Range> },
    Str { kind: StrKind, range: Option<Range> },
}

impl Constraint {
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Object, Value::Object(_)) => true,
            (Self::Number { range }, Value::Number(n)) => {
                range.is_none_or(|range| range.contains(*n))
            }
            (Self::Str { kind, range }, Value::Str(s)) => {
                let length = s.chars().count() as i64;
                range.is_none_or(|range| range.contains(length))
                    && kind.accepts(s)
            }
            _ => false,
        }
    }
}

impl Display for Constraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => f.write_str("boolean"),
            Self::Object => f.write_str("object"),
            Self::Number { range: None } => f.write_str("number"),
            Self::Number { range: Some(r) } => {
                write!(f, "number/{}-{}", r.min, r.max)
            }
            Self::Str {
                kind: StrKind::Normal,
                range: None,
            } => f.write_str("string"),
            Self::Str {
                kind: StrKind::Normal,
                range: Some(r),
            } => write!(f, "string/{}-{}", r.min, r.max),
            Self::Str { kind, .. } => write!(f, "string/{}", kind.name()),
        }
    }
}

impl FromStr for Constraint {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (main, sub) = match s.split_once('/') {
            Some((main, sub)) => (main.trim(), Some(sub.trim())),
            None => (s.trim(), None),
        };

        let ranged = |sub: &str| -> std::result::Result<Option<Range>, String> {
            if sub == "normal" {
                Ok(None)
            } else {
                sub.parse().map(Some)
            }
        };

        match (main, sub) {
            ("boolean", None) => Ok(Self::Bool),
            ("object", None) => Ok(Self::Object),
            ("number", None) => Ok(Self::Number { range: None }),
            ("number", Some(sub)) => Ok(Self::Number {
                range: ranged(sub)?,
            }),
            ("string", None) => Ok(Self::Str {
                kind: StrKind::Normal,
                range: None,
            }),
            ("string", Some(sub)) => match StrKind::from_name(sub) {
                Some(kind) => Ok(Self::Str { kind, range: None }),
                None => Ok(Self::Str {
                    kind: StrKind::Normal,
                    range: Some(sub.parse()?),
                }),
            },
            ("boolean" | "object", Some(sub)) => {
                Err(format!("'{main}' takes no subtype, got '{sub}'"))
            }
            _ => Err(format!("unknown main type '{main}'")),
        }
    }
}

/// A parsed option type: a value is valid if any alternative accepts it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kind(Vec<Constraint>);

impl Kind {
    pub fn alternatives(&self) -> &[Constraint] {
        &self.0
    }

    pub fn accepts(&self, value: &Value) -> bool {
        self.0.iter().any(|constraint| constraint.accepts(value))
    }
}

impl Display for Kind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, constraint) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            write!(f, "{constraint}")?;
        }
        Ok(())
    }
}

impl FromStr for Kind {
    type Err = Error;

    /// Parses a type string.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::options::{Kind, Value};
    ///
    /// let kind: Kind = "number/0-65000|string/unix".parse().unwrap();
    /// assert!(kind.accepts(&Value::from(1000)));
    /// assert!(kind.accepts(&Value::from("www_data")));
    /// assert!(!kind.accepts(&Value::from(70000)));
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        let alternatives = s
            .split('|')
            .map(|alt| alt.parse::<Constraint>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|reason| Error::Type {
                kind: s.to_owned(),
                reason,
            })?;

        Ok(Self(alternatives))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(s: &str) -> Kind {
        s.parse().unwrap()
    }

    #[test]
    fn parses_alternatives() {
        let kind = kind("number/0-65000|string/unix");

        assert_eq!(
            kind.alternatives(),
            &[
                Constraint::Number {
                    range: Some(Range { min: 0, max: 65000 })
                },
                Constraint::Str {
                    kind: StrKind::Unix,
                    range: None
                },
            ]
        );
        assert_eq!(kind.to_string(), "number/0-65000|string/unix");
    }

    #[test]
    fn rejects_unknown_types() {
        assert!("float".parse::<Kind>().is_err());
        assert!("string/shouty".parse::<Kind>().is_err());
        assert!("boolean/yes".parse::<Kind>().is_err());
        assert!("number/9-1".parse::<Kind>().is_err());
    }

    #[test]
    fn number_range() {
        let kind = kind("number/0-7");

        assert!(kind.accepts(&0.into()));
        assert!(kind.accepts(&7.into()));
        assert!(!kind.accepts(&8.into()));
        assert!(!kind.accepts(&(-1).into()));
        assert!(!kind.accepts(&"3".into()));
    }

    #[test]
    fn string_length_range() {
        let kind = kind("string/1-5");

        assert!(kind.accepts(&"abc".into()));
        assert!(!kind.accepts(&"".into()));
        assert!(!kind.accepts(&"abcdef".into()));
    }

    #[test]
    fn email() {
        let kind = kind("string/email");

        assert!(kind.accepts(&"kevin@example.com".into()));
        assert!(!kind.accepts(&"kevin@localhost".into()));
        assert!(!kind.accepts(&"not an email".into()));
    }

    #[test]
    fn unix_names_and_paths() {
        let name = kind("string/unix");
        assert!(name.accepts(&"log_parser2".into()));
        assert!(!name.accepts(&"LogParser".into()));
        assert!(!name.accepts(&"log-parser".into()));

        let path = kind("string/unix_filepath");
        assert!(path.accepts(&"/var/run/log_parser/log-parser.pid".into()));
        assert!(!path.accepts(&"/var/run/ERRORKIND_X/x.pid".into()));
    }

    #[test]
    fn filesystem_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("present");
        std::fs::write(&file, "").unwrap();
        let dir_str = dir.path().to_str().unwrap();
        let file_str = file.to_str().unwrap();

        assert!(kind("string/existing_dirpath").accepts(&dir_str.into()));
        assert!(!kind("string/existing_dirpath").accepts(&file_str.into()));
        assert!(kind("string/existing_filepath").accepts(&file_str.into()));

        let creatable = kind("string/creatable_filepath");
        let new_file = dir.path().join("new.log");
        assert!(creatable.accepts(&new_file.to_str().unwrap().into()));
        assert!(!creatable.accepts(&"/nonexistent/dir/new.log".into()));
    }

    #[test]
    fn boolean_and_object() {
        assert!(kind("boolean").accepts(&true.into()));
        assert!(!kind("boolean").accepts(&1.into()));
        assert!(kind("object").accepts(&Value::object(42_u8)));
        assert!(!kind("object").accepts(&"handle".into()));
    }
}
