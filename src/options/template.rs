//! Default value templates.
//!
//! A default may embed `{SOURCE.NAME}` lookups and `@function(argument)`
//! calls. Lookups are limited to the `OPTIONS` and `SERVER` sources, calls
//! to `basename` and `dirname`. Anything outside those sets, or anything
//! that cannot be resolved, renders as an `ERRORKIND_*` marker inside the
//! output so the mistake stays visible in generated paths.

use std::{
    fmt::{self, Display, Formatter},
    path::Path,
};

/// Facts a template may read from the process environment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerVar {
    /// Path of the running executable.
    ScriptName,
}

impl ServerVar {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "SCRIPT_NAME" => Some(Self::ScriptName),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Func {
    Basename,
    Dirname,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "basename" => Some(Self::Basename),
            "dirname" => Some(Self::Dirname),
            _ => None,
        }
    }

    fn apply(&self, arg: &str) -> String {
        let path = Path::new(arg);

        match self {
            Self::Basename => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Self::Dirname => match path.parent() {
                Some(parent) if parent.as_os_str().is_empty() => ".".into(),
                Some(parent) => parent.to_string_lossy().into_owned(),
                None => arg.to_owned(),
            },
        }
    }
}

/// Why part of a template could not be rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Problem {
    ForbiddenSource(String),
    ForbiddenVariable(String),
    ForbiddenFunction(String),
    Unresolved(String),
    Malformed(String),
}

impl Problem {
    /// The marker substituted into the rendered text.
    pub fn marker(&self) -> &'static str {
        match self {
            Self::ForbiddenSource(_) => "ERRORKIND_FORBIDDEN_SOURCE",
            Self::ForbiddenVariable(_) => "ERRORKIND_FORBIDDEN_VARIABLE",
            Self::ForbiddenFunction(_) => "ERRORKIND_FORBIDDEN_FUNCTION",
            Self::Unresolved(_) => "ERRORKIND_UNRESOLVED",
            Self::Malformed(_) => "ERRORKIND_MALFORMED",
        }
    }
}

impl Display for Problem {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForbiddenSource(s) => write!(f, "source '{s}' is not allowed"),
            Self::ForbiddenVariable(s) => {
                write!(f, "variable '{s}' is not allowed")
            }
            Self::ForbiddenFunction(s) => {
                write!(f, "function '{s}' is not allowed")
            }
            Self::Unresolved(s) => write!(f, "'{s}' has no value"),
            Self::Malformed(s) => write!(f, "malformed placeholder '{s}'"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Node {
    Text(String),
    Option(String),
    Server(ServerVar),
    Call(Func, Vec<Node>),
    Invalid(Problem),
}

/// Where lookups are answered from.
pub trait Scope {
    fn option(&self, name: &str) -> Option<String>;

    fn server(&self, var: ServerVar) -> Option<String>;
}

/// The result of rendering a template.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Rendered {
    pub text: String,
    pub problems: Vec<Problem>,
}

impl Rendered {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}

/// A parsed template.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template(Vec<Node>);

impl Template {
    pub fn parse(s: &str) -> Self {
        let chars: Vec<char> = s.chars().collect();
        Self(parse_nodes(&chars))
    }

    /// Returns true if the template contains no placeholders.
    pub fn is_literal(&self) -> bool {
        self.0.iter().all(|node| matches!(node, Node::Text(_)))
    }

    /// Renders the template.
    ///
    /// # Examples
    ///
    /// ```
    /// use sysdaemon::options::template::{Scope, ServerVar, Template};
    ///
    /// struct Fixed;
    ///
    /// impl Scope for Fixed {
    ///     fn option(&self, name: &str) -> Option<String> {
    ///         (name == "appName").then(|| "logparser".into())
    ///     }
    ///
    ///     fn server(&self, _: ServerVar) -> Option<String> {
    ///         Some("/usr/local/bin/logparser".into())
    ///     }
    /// }
    ///
    /// let rendered = Template::parse("/var/log/{OPTIONS.appName}.log").render(&Fixed);
    /// assert_eq!(rendered.text, "/var/log/logparser.log");
    ///
    /// let rendered = Template::parse("@dirname({SERVER.SCRIPT_NAME})").render(&Fixed);
    /// assert_eq!(rendered.text, "/usr/local/bin");
    ///
    /// let rendered = Template::parse("@system(ls)").render(&Fixed);
    /// assert_eq!(rendered.text, "ERRORKIND_FORBIDDEN_FUNCTION");
    /// ```
    pub fn render(&self, scope: &dyn Scope) -> Rendered {
        let mut rendered = Rendered::default();
        render_nodes(&self.0, scope, &mut rendered);
        rendered
    }
}

fn render_nodes(nodes: &[Node], scope: &dyn Scope, out: &mut Rendered) {
    for node in nodes {
        match node {
            Node::Text(text) => out.text.push_str(text),
            Node::Option(name) => match scope.option(name) {
                Some(value) => out.text.push_str(&value),
                None => fail(out, Problem::Unresolved(format!("OPTIONS.{name}"))),
            },
            Node::Server(var) => match scope.server(*var) {
                Some(value) => out.text.push_str(&value),
                None => fail(out, Problem::Unresolved(format!("SERVER.{var:?}"))),
            },
            Node::Call(func, args) => {
                let mut arg = Rendered::default();
                render_nodes(args, scope, &mut arg);

                if arg.is_clean() {
                    out.text.push_str(&func.apply(&arg.text));
                } else {
                    // Keep the argument's marker rather than mangling it.
                    out.text.push_str(&arg.text);
                    out.problems.extend(arg.problems);
                }
            }
            Node::Invalid(problem) => fail(out, problem.clone()),
        }
    }
}

fn fail(out: &mut Rendered, problem: Problem) {
    out.text.push_str(problem.marker());
    out.problems.push(problem);
}

fn parse_nodes(chars: &[char]) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut text = String::new();
    let mut i = 0;

    while i < chars.len() {
        let parsed = match chars[i] {
            '{' => parse_lookup(chars, i),
            '@' => parse_call(chars, i),
            _ => None,
        };

        match parsed {
            Some((node, next)) => {
                if !text.is_empty() {
                    nodes.push(Node::Text(std::mem::take(&mut text)));
                }
                nodes.push(node);
                i = next;
            }
            None => {
                text.push(chars[i]);
                i += 1;
            }
        }
    }

    if !text.is_empty() {
        nodes.push(Node::Text(text));
    }

    nodes
}

/// Parses `{SOURCE.NAME}` starting at `start`.
fn parse_lookup(chars: &[char], start: usize) -> Option<(Node, usize)> {
    let close = chars[start..].iter().position(|&c| c == '}')? + start;
    let inner: String = chars[start + 1..close].iter().collect();

    let node = match inner.split_once('.') {
        Some(("OPTIONS", name)) if is_ident(name) => Node::Option(name.into()),
        Some(("SERVER", name)) => match ServerVar::from_name(name) {
            Some(var) => Node::Server(var),
            None => Node::Invalid(Problem::ForbiddenVariable(name.into())),
        },
        Some((source, name)) if is_ident(source) && is_ident(name) => {
            Node::Invalid(Problem::ForbiddenSource(source.into()))
        }
        _ => Node::Invalid(Problem::Malformed(format!("{{{inner}}}"))),
    };

    Some((node, close + 1))
}

/// Parses `@name(argument)` starting at `start`.
fn parse_call(chars: &[char], start: usize) -> Option<(Node, usize)> {
    let name_end = chars[start + 1..]
        .iter()
        .position(|c| !(c.is_ascii_alphanumeric() || *c == '_'))?
        + start
        + 1;

    if name_end == start + 1 || chars.get(name_end) != Some(&'(') {
        return None;
    }

    let mut depth = 0;
    let mut close = None;
    for (i, c) in chars.iter().enumerate().skip(name_end) {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            _ => (),
        }
    }
    let close = close?;

    let name: String = chars[start + 1..name_end].iter().collect();
    let node = match Func::from_name(&name) {
        Some(func) => Node::Call(func, parse_nodes(&chars[name_end + 1..close])),
        None => Node::Invalid(Problem::ForbiddenFunction(name)),
    };

    Some((node, close + 1))
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl Scope for Fixed {
        fn option(&self, name: &str) -> Option<String> {
            match name {
                "appName" => Some("logparser".into()),
                _ => None,
            }
        }

        fn server(&self, var: ServerVar) -> Option<String> {
            match var {
                ServerVar::ScriptName => Some("/opt/logparser/run".into()),
            }
        }
    }

    fn render(s: &str) -> Rendered {
        Template::parse(s).render(&Fixed)
    }

    #[test]
    fn literal_text_passes_through() {
        let template = Template::parse("kevin@example.com");

        assert!(template.is_literal());
        assert_eq!(template.render(&Fixed).text, "kevin@example.com");
    }

    #[test]
    fn option_lookup() {
        let rendered = render("/var/run/{OPTIONS.appName}/{OPTIONS.appName}.pid");

        assert!(rendered.is_clean());
        assert_eq!(rendered.text, "/var/run/logparser/logparser.pid");
    }

    #[test]
    fn functions_of_server_facts() {
        assert_eq!(render("@basename({SERVER.SCRIPT_NAME})").text, "run");
        assert_eq!(render("@dirname({SERVER.SCRIPT_NAME})").text, "/opt/logparser");
        assert_eq!(render("@dirname(run)").text, ".");
    }

    #[test]
    fn forbidden_parts_render_markers() {
        let rendered = render("{ENV.HOME}/x");
        assert_eq!(rendered.text, "ERRORKIND_FORBIDDEN_SOURCE/x");
        assert_eq!(rendered.problems, [Problem::ForbiddenSource("ENV".into())]);

        let rendered = render("{SERVER.DOCUMENT_ROOT}");
        assert_eq!(rendered.text, "ERRORKIND_FORBIDDEN_VARIABLE");

        let rendered = render("@exec(rm)");
        assert_eq!(rendered.text, "ERRORKIND_FORBIDDEN_FUNCTION");
    }

    #[test]
    fn unset_option_renders_marker() {
        let rendered = render("/var/log/{OPTIONS.authorName}.log");

        assert_eq!(rendered.text, "/var/log/ERRORKIND_UNRESOLVED.log");
        assert_eq!(
            rendered.problems,
            [Problem::Unresolved("OPTIONS.authorName".into())]
        );
    }

    #[test]
    fn marker_inside_call_is_kept() {
        let rendered = render("@basename({OPTIONS.missing})");

        assert_eq!(rendered.text, "ERRORKIND_UNRESOLVED");
        assert!(!rendered.is_clean());
    }

    #[test]
    fn malformed_lookup() {
        assert_eq!(render("{nodot}").text, "ERRORKIND_MALFORMED");
    }

    #[test]
    fn unclosed_placeholders_are_text() {
        assert_eq!(render("{OPTIONS.appName").text, "{OPTIONS.appName");
        assert_eq!(render("@basename(x").text, "@basename(x");
    }
}
