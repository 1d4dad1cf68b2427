use super::{Kind, OptionDef, Value};

struct Builtin {
    name: &'static str,
    kind: &'static str,
    default: Option<Literal>,
    required: bool,
}

enum Literal {
    Bool(bool),
    Number(i64),
    Str(&'static str),
}

const BUILTIN: &[Builtin] = &[
    Builtin {
        name: "authorName",
        kind: "string/1-50",
        default: None,
        required: true,
    },
    Builtin {
        name: "authorEmail",
        kind: "string/email",
        default: None,
        required: true,
    },
    Builtin {
        name: "appName",
        kind: "string/unix",
        default: None,
        required: true,
    },
    Builtin {
        name: "appDescription",
        kind: "string",
        default: None,
        required: true,
    },
    Builtin {
        name: "appDir",
        kind: "string/existing_dirpath",
        default: Some(Literal::Str("@dirname({SERVER.SCRIPT_NAME})")),
        required: true,
    },
    Builtin {
        name: "appExecutable",
        kind: "string",
        default: Some(Literal::Str("@basename({SERVER.SCRIPT_NAME})")),
        required: true,
    },
    Builtin {
        name: "appWorkDir",
        kind: "string/existing_dirpath",
        default: Some(Literal::Str("/")),
        required: true,
    },
    Builtin {
        name: "appUmask",
        kind: "number/0-511",
        default: Some(Literal::Number(0o027)),
        required: true,
    },
    Builtin {
        name: "logVerbosity",
        kind: "number/0-7",
        default: Some(Literal::Number(6)),
        required: true,
    },
    Builtin {
        name: "logLocation",
        kind: "string/creatable_filepath",
        default: Some(Literal::Str("/var/log/{OPTIONS.appName}.log")),
        required: true,
    },
    Builtin {
        name: "logPanics",
        kind: "boolean",
        default: Some(Literal::Bool(true)),
        required: true,
    },
    Builtin {
        name: "logFilePosition",
        kind: "boolean",
        default: Some(Literal::Bool(false)),
        required: true,
    },
    Builtin {
        name: "logLinePosition",
        kind: "boolean",
        default: Some(Literal::Bool(true)),
        required: true,
    },
    Builtin {
        name: "appRunAsUID",
        kind: "number/0-65000|string/unix",
        default: Some(Literal::Number(0)),
        required: true,
    },
    Builtin {
        name: "appRunAsGID",
        kind: "number/0-65000|string/unix",
        default: Some(Literal::Number(0)),
        required: true,
    },
    Builtin {
        name: "appPidLocation",
        kind: "string/unix_filepath",
        default: Some(Literal::Str(
            "/var/run/{OPTIONS.appName}/{OPTIONS.appName}.pid",
        )),
        required: true,
    },
    Builtin {
        name: "appDieOnIdentityCrisis",
        kind: "boolean",
        default: Some(Literal::Bool(true)),
        required: true,
    },
    Builtin {
        name: "appChkConfig",
        kind: "string",
        default: Some(Literal::Str("- 99 0")),
        required: false,
    },
    Builtin {
        name: "runTemplateLocation",
        kind: "string/existing_filepath",
        default: None,
        required: false,
    },
];

/// The options every daemon understands.
pub fn builtin() -> Vec<OptionDef> {
    BUILTIN
        .iter()
        .filter_map(|b| {
            // The table above is fixed; a type that fails to parse is a
            // programming error caught by the tests below.
            let kind: Kind = b.kind.parse().ok()?;

            Some(OptionDef {
                name: b.name.to_owned(),
                kind,
                default: b.default.as_ref().map(|d| match d {
                    Literal::Bool(v) => Value::Bool(*v),
                    Literal::Number(v) => Value::Number(*v),
                    Literal::Str(v) => Value::Str((*v).to_owned()),
                }),
                required: b.required,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_type_parses() {
        for b in BUILTIN {
            assert!(b.kind.parse::<Kind>().is_ok(), "{}: {}", b.name, b.kind);
        }
        assert_eq!(builtin().len(), BUILTIN.len());
    }

    #[test]
    fn literal_defaults_validate() {
        for def in builtin() {
            if let Some(Value::Number(_) | Value::Bool(_)) = &def.default {
                let default = def.default.as_ref().unwrap();
                assert!(def.kind.accepts(default), "{}", def.name);
            }
        }
    }
}
