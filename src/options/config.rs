//! Loading option values from TOML.

use super::{Options, Value};
use crate::error::{Error, OptionError, Result};

use std::{fs, path::Path};
use toml::Table;

impl Options {
    /// Sets options from a TOML document whose top-level keys are option
    /// names.
    ///
    /// Booleans, integers and strings are accepted. Every key is applied
    /// even if another one fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::Options;
    ///
    /// let mut options = Options::new();
    /// options
    ///     .load_toml(r#"
    ///         appName = "logparser"
    ///         logVerbosity = 7
    ///         appDieOnIdentityCrisis = false
    ///     "#)
    ///     .unwrap();
    ///
    /// assert_eq!(options.get_str("appName").as_deref(), Some("logparser"));
    /// assert_eq!(options.get_number("logVerbosity"), Some(7));
    /// ```
    pub fn load_toml(&mut self, document: &str) -> Result<()> {
        let table: Table = document.parse()?;
        let mut errors = Vec::new();

        for (name, value) in table {
            let value = match value {
                toml::Value::Boolean(b) => Value::Bool(b),
                toml::Value::Integer(n) => Value::Number(n),
                toml::Value::String(s) => Value::Str(s),
                other => {
                    errors.push(OptionError::Invalid {
                        kind: self
                            .definition(&name)
                            .map(|def| def.kind.to_string())
                            .unwrap_or_default(),
                        name,
                        value: format!("{} {other}", other.type_str()),
                    });
                    continue;
                }
            };

            if let Err(err) = self.set(&name, value) {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Options(errors))
        }
    }

    /// Reads a TOML file and applies it with [`Options::load_toml`].
    pub fn load_file<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let document =
            fs::read_to_string(path).map_err(|err| Error::io(path, err))?;

        self.load_toml(&document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_kinds_are_reported() {
        let mut options = Options::new();

        let err = options
            .load_toml("appName = \"svc\"\nlogVerbosity = 1.5\n")
            .unwrap_err();

        let Error::Options(errors) = err else {
            panic!("unexpected error: {err}");
        };
        assert!(matches!(
            &errors[..],
            [OptionError::Invalid { name, .. }] if name == "logVerbosity"
        ));
        assert_eq!(options.get_str("appName").as_deref(), Some("svc"));
    }

    #[test]
    fn syntax_errors() {
        let mut options = Options::new();

        assert!(matches!(
            options.load_toml("appName = "),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.toml");
        std::fs::write(&path, "authorName = \"Kevin\"\n").unwrap();

        let mut options = Options::new();
        options.load_file(&path).unwrap();

        assert_eq!(options.get_str("authorName").as_deref(), Some("Kevin"));
        assert!(matches!(
            options.load_file(dir.path().join("missing.toml")),
            Err(Error::Io { .. })
        ));
    }
}
