//! Initializer scripts.
//!
//! The `init` section of a document is a small statement language evaluated
//! against the document's data namespace. Expressions use template
//! expression syntax and cannot touch the filesystem or process.
//!
//! ```text
//! # one statement per line, `#` starts a comment
//! title = "About " ~ persistent.site_name
//! tags = ["intro", "company"]
//! persistent.pages += this.id
//! long = "a" ~ \
//!        "b"
//!
//! # deferred assignment, evaluated when the hook point fires
//! hook pre_render persistent.page_count = persistent.pages | length
//!
//! # transform applied to this document's rendered output
//! hook post_process {{ output | replace("</body>", footer ~ "</body>") }}
//! ```
//!
//! Statements:
//!
//! - `name = expr`, `name += expr`: set (or append to) a namespace variable
//! - `persistent.key = expr`, `persistent.key += expr`: write persistent data
//! - `hook pre_render <assignment>`, `hook post_render <assignment>`: defer a
//!   persistent assignment to a build-wide hook point
//! - `hook post_process <template>`: register the output transform; the
//!   template sees the namespace plus `output` and `module`
//!
//! `this` and `persistent` are bound by the compiler and cannot be reassigned.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use minijinja::{AutoEscape, Environment, Value};
use regex::Regex;

use crate::context::{Hook, HookName, HookPoint, HookRegistry, PersistentData, append_value};
use crate::engine::{Namespace, namespace_value};

/// Variable bound to the build-wide persistent data.
pub const PERSISTENT: &str = "persistent";
/// Variable bound to the document's own handle.
pub const THIS: &str = "this";
/// Variable bound to the document's converted markdown.
pub const MARKDOWN: &str = "markdown";

/// Names initializer scripts may not assign.
const RESERVED: [&str; 2] = [THIS, PERSISTENT];

/// Per-document output transform.
///
/// Receives the current output and the rendered template's exported
/// variables. Returning `None` keeps the output unchanged.
pub type PostProcess =
    Box<dyn Fn(&str, &Value) -> Result<Option<String>, ScriptError> + Send + Sync>;

/// `target op expr`, where target is `name` or `persistent.key`.
static ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<target>[A-Za-z_]\w*(?:\.[A-Za-z_]\w*)*)\s*(?P<op>\+=|=)\s*(?P<expr>.*)$")
        .unwrap()
});

/// `hook name body`.
static HOOK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^hook\s+(?P<name>[A-Za-z_]\w*)(?:\s+(?P<body>.*))?$").unwrap()
});

/// Error raised while parsing or running an initializer script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// Line is not a recognized statement.
    #[error("line {line}: invalid statement {statement:?}")]
    InvalidStatement {
        /// Line number within the init section.
        line: usize,
        /// Offending statement text.
        statement: String,
    },

    /// Assignment to a compiler-bound name.
    #[error("line {line}: {name:?} is reserved and cannot be assigned")]
    ReservedName {
        /// Line number within the init section.
        line: usize,
        /// Reserved name.
        name: String,
    },

    /// Dotted assignment target other than `persistent.<key>`.
    #[error("line {line}: cannot assign to {target:?}, only names and persistent.<key>")]
    UnsupportedTarget {
        /// Line number within the init section.
        line: usize,
        /// Offending target.
        target: String,
    },

    /// `hook` statement naming an unknown hook.
    #[error("line {line}: unknown hook {name:?}")]
    UnknownHook {
        /// Line number within the init section.
        line: usize,
        /// Unknown hook name.
        name: String,
    },

    /// `hook` statement without a body.
    #[error("line {line}: {hook} hook needs a body")]
    EmptyHook {
        /// Line number within the init section.
        line: usize,
        /// Hook name.
        hook: &'static str,
    },

    /// Deferred assignment to a namespace variable.
    #[error("line {line}: deferred hooks can only assign persistent.<key>")]
    DeferredLocalAssignment {
        /// Line number within the init section.
        line: usize,
    },

    /// Expression or template evaluation failed.
    #[error("line {line}: {source}")]
    Eval {
        /// Line number within the init section.
        line: usize,
        #[source]
        source: minijinja::Error,
    },

    /// Failure reported by a native hook.
    #[error("{0}")]
    Custom(String),
}

/// Assignment operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AssignOp {
    Set,
    Append,
}

/// Assignment target.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Target {
    Local(String),
    Persistent(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Assignment {
    target: Target,
    op: AssignOp,
    expr: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum StatementKind {
    Assign(Assignment),
    Deferred { point: HookPoint, assignment: Assignment },
    PostProcess { template: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Statement {
    line: usize,
    kind: StatementKind,
}

/// Parsed initializer script.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Script {
    statements: Vec<Statement>,
}

impl Script {
    /// Parse an init section.
    pub fn parse(source: &str) -> Result<Self, ScriptError> {
        let statements = logical_lines(source)
            .into_iter()
            .filter(|(_, text)| !text.is_empty() && !text.starts_with('#'))
            .map(|(line, text)| parse_statement(line, &text))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { statements })
    }

    /// Number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether the script has no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl FromStr for Script {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Join `\`-continued lines. Each logical line keeps the number of its first
/// physical line.
fn logical_lines(source: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in source.lines().enumerate() {
        let (start, mut text) = pending.take().unwrap_or((index + 1, String::new()));
        let trimmed = raw.trim();
        if let Some(continued) = trimmed.strip_suffix('\\') {
            text.push_str(continued);
            text.push(' ');
            pending = Some((start, text));
        } else {
            text.push_str(trimmed);
            lines.push((start, text.trim().to_owned()));
        }
    }
    if let Some((start, text)) = pending {
        lines.push((start, text.trim().to_owned()));
    }
    lines
}

fn parse_statement(line: usize, text: &str) -> Result<Statement, ScriptError> {
    let kind = if let Some(caps) = HOOK_RE.captures(text) {
        parse_hook(line, &caps["name"], caps.name("body").map(|m| m.as_str()))?
    } else {
        StatementKind::Assign(parse_assignment(line, text)?)
    };
    Ok(Statement { line, kind })
}

fn parse_hook(line: usize, name: &str, body: Option<&str>) -> Result<StatementKind, ScriptError> {
    let hook = name.parse::<HookName>().map_err(|name| ScriptError::UnknownHook { line, name })?;
    let body = body.map(str::trim).filter(|b| !b.is_empty());

    match hook {
        HookName::PostProcess => {
            let template = body.ok_or(ScriptError::EmptyHook {
                line,
                hook: "post_process",
            })?;
            Ok(StatementKind::PostProcess {
                template: template.to_owned(),
            })
        }
        HookName::Build(point) => {
            let body = body.ok_or(ScriptError::EmptyHook {
                line,
                hook: point.name(),
            })?;
            let assignment = parse_assignment(line, body)?;
            if matches!(assignment.target, Target::Local(_)) {
                return Err(ScriptError::DeferredLocalAssignment { line });
            }
            Ok(StatementKind::Deferred { point, assignment })
        }
    }
}

fn parse_assignment(line: usize, text: &str) -> Result<Assignment, ScriptError> {
    let invalid = || ScriptError::InvalidStatement {
        line,
        statement: text.to_owned(),
    };
    let caps = ASSIGNMENT_RE.captures(text).ok_or_else(invalid)?;
    let expr = caps["expr"].trim();
    // `a == b` is a comparison, not an assignment
    if expr.is_empty() || expr.starts_with('=') {
        return Err(invalid());
    }

    let target_text = &caps["target"];
    let target = match target_text.split_once('.') {
        None if RESERVED.contains(&target_text) => {
            return Err(ScriptError::ReservedName {
                line,
                name: target_text.to_owned(),
            });
        }
        None => Target::Local(target_text.to_owned()),
        Some((PERSISTENT, key)) if !key.contains('.') => Target::Persistent(key.to_owned()),
        Some(_) => {
            return Err(ScriptError::UnsupportedTarget {
                line,
                target: target_text.to_owned(),
            });
        }
    };
    let op = if &caps["op"] == "+=" {
        AssignOp::Append
    } else {
        AssignOp::Set
    };

    Ok(Assignment {
        target,
        op,
        expr: expr.to_owned(),
    })
}

/// Runs initializer scripts.
///
/// Holds its own expression environment, separate from the template engine,
/// so deferred hooks and post-process transforms can own a handle to it.
#[derive(Clone)]
pub struct Initializer {
    env: Arc<Environment<'static>>,
}

impl Initializer {
    /// Create an initializer.
    #[must_use]
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::None);
        Self { env: Arc::new(env) }
    }

    /// Run document `id`'s `script` against `namespace`.
    ///
    /// Immediate assignments mutate `namespace` or `persistent` in order.
    /// Deferred assignments capture a copy of the namespace as it stands when
    /// the `hook` statement runs and are registered on `hooks` under `id`.
    /// Returns the last declared post-process transform.
    pub fn run(
        &self,
        id: &str,
        script: &Script,
        namespace: &mut Namespace,
        persistent: &PersistentData,
        hooks: &mut HookRegistry,
    ) -> Result<Option<PostProcess>, ScriptError> {
        let mut post_process: Option<PostProcess> = None;

        for statement in &script.statements {
            let line = statement.line;
            match &statement.kind {
                StatementKind::Assign(assignment) => {
                    let value = evaluate(&self.env, assignment, line, namespace)?;
                    apply(&assignment.target, assignment.op, value, namespace, persistent);
                }
                StatementKind::Deferred { point, assignment } => {
                    let hook = self.deferred(assignment.clone(), line, namespace, persistent);
                    hooks.attach_for(*point, id, hook);
                }
                StatementKind::PostProcess { template } => {
                    if post_process.is_some() {
                        tracing::warn!(line, "Replacing previously declared post_process hook");
                    }
                    post_process = Some(self.transform(template.clone(), line, namespace));
                }
            }
        }
        Ok(post_process)
    }

    fn deferred(
        &self,
        assignment: Assignment,
        line: usize,
        namespace: &Namespace,
        persistent: &PersistentData,
    ) -> Hook {
        let env = Arc::clone(&self.env);
        let scope = namespace.clone();
        let persistent = persistent.clone();
        Box::new(move || {
            let value = evaluate(&env, &assignment, line, &scope)?;
            if let Target::Persistent(key) = &assignment.target {
                store(&persistent, key, assignment.op, value);
            }
            Ok(())
        })
    }

    fn transform(&self, template: String, line: usize, namespace: &Namespace) -> PostProcess {
        let env = Arc::clone(&self.env);
        let scope = namespace.clone();
        Box::new(move |output: &str, module: &Value| {
            let mut context = scope.clone();
            context.insert("output".to_owned(), Value::from(output));
            context.insert("module".to_owned(), module.clone());
            env.render_str(&template, namespace_value(&context))
                .map(Some)
                .map_err(|source| ScriptError::Eval { line, source })
        })
    }
}

impl Default for Initializer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Initializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Initializer").finish_non_exhaustive()
    }
}

fn evaluate(
    env: &Environment<'static>,
    assignment: &Assignment,
    line: usize,
    namespace: &Namespace,
) -> Result<Value, ScriptError> {
    let eval_error = |source| ScriptError::Eval { line, source };
    let expression = env.compile_expression(&assignment.expr).map_err(eval_error)?;
    expression.eval(namespace_value(namespace)).map_err(eval_error)
}

fn apply(
    target: &Target,
    op: AssignOp,
    value: Value,
    namespace: &mut Namespace,
    persistent: &PersistentData,
) {
    match target {
        Target::Local(name) => {
            let value = match op {
                AssignOp::Set => value,
                AssignOp::Append => {
                    append_value(namespace.get(name).unwrap_or(&Value::UNDEFINED), value)
                }
            };
            namespace.insert(name.clone(), value);
        }
        Target::Persistent(key) => store(persistent, key, op, value),
    }
}

fn store(persistent: &PersistentData, key: &str, op: AssignOp, value: Value) {
    match op {
        AssignOp::Set => persistent.set(key, value),
        AssignOp::Append => persistent.append(key, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct Run {
        namespace: Namespace,
        persistent: PersistentData,
        hooks: HookRegistry,
        post_process: Option<PostProcess>,
    }

    fn run(source: &str) -> Result<Run, ScriptError> {
        let script = Script::parse(source)?;
        let persistent = PersistentData::new();
        let mut namespace = Namespace::new();
        namespace.insert(PERSISTENT.to_owned(), persistent.to_value());
        let mut hooks = HookRegistry::default();
        let post_process =
            Initializer::new().run("doc", &script, &mut namespace, &persistent, &mut hooks)?;
        Ok(Run {
            namespace,
            persistent,
            hooks,
            post_process,
        })
    }

    #[test]
    fn test_parse_skips_blank_lines_and_comments() {
        let script = Script::parse("\n# comment\nx = 1\n\n  # indented comment\ny = 2\n").unwrap();
        assert_eq!(script.len(), 2);
        assert!(Script::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_assignments_update_namespace() {
        let result = run("name = \"World\"\ngreeting = \"Hello \" ~ name").unwrap();
        assert_eq!(
            result.namespace.get("greeting"),
            Some(&Value::from("Hello World"))
        );
    }

    #[test]
    fn test_append_to_local_list() {
        let result = run("tags = [\"a\"]\ntags += \"b\"\nfresh += 1").unwrap();
        assert_eq!(
            result.namespace.get("tags"),
            Some(&Value::from(vec![Value::from("a"), Value::from("b")]))
        );
        assert_eq!(
            result.namespace.get("fresh"),
            Some(&Value::from(vec![Value::from(1)]))
        );
    }

    #[test]
    fn test_persistent_assignment_and_read_back() {
        let result = run("persistent.count = 2\ndouble = persistent.count * 2").unwrap();
        assert_eq!(result.persistent.get("count"), Some(Value::from(2)));
        assert_eq!(result.namespace.get("double"), Some(&Value::from(4)));
    }

    #[test]
    fn test_line_continuation() {
        let result = run("joined = \"a\" ~ \\\n  \"b\"\nafter = 1").unwrap();
        assert_eq!(result.namespace.get("joined"), Some(&Value::from("ab")));
        assert_eq!(result.namespace.get("after"), Some(&Value::from(1)));
    }

    #[test]
    fn test_reserved_names_rejected() {
        let err = run("x = 1\nthis = 2").err().unwrap();
        assert!(matches!(err, ScriptError::ReservedName { line: 2, ref name } if name == "this"));

        let err = run("persistent = {}").err().unwrap();
        assert!(matches!(err, ScriptError::ReservedName { line: 1, .. }));
    }

    #[test]
    fn test_unsupported_targets_rejected() {
        let err = run("page.title = 1").err().unwrap();
        assert!(matches!(err, ScriptError::UnsupportedTarget { line: 1, .. }));

        let err = run("persistent.a.b = 1").err().unwrap();
        assert!(matches!(err, ScriptError::UnsupportedTarget { .. }));
    }

    #[test]
    fn test_invalid_statements_rejected() {
        for source in ["just an expression", "a == b", "x =", "import os"] {
            let err = run(source).err().unwrap();
            assert!(
                matches!(err, ScriptError::InvalidStatement { line: 1, .. }),
                "{source}: {err}"
            );
        }
    }

    #[test]
    fn test_eval_error_reports_line() {
        let err = run("a = 1\nb = (").err().unwrap();
        assert!(matches!(err, ScriptError::Eval { line: 2, .. }));
        assert!(err.to_string().starts_with("line 2:"));
    }

    #[test]
    fn test_deferred_hook_runs_on_trigger() {
        let mut result =
            run("label = \"seen\"\nhook pre_render persistent.status = label").unwrap();
        assert_eq!(result.persistent.get("status"), None);
        assert_eq!(result.hooks.len(HookPoint::PreRender), 1);

        result.hooks.trigger(HookPoint::PreRender).unwrap();

        assert_eq!(result.persistent.get("status"), Some(Value::from("seen")));
    }

    #[test]
    fn test_deferred_hook_sees_live_persistent_data() {
        let mut result = run("hook post_render persistent.total = persistent.pages | length").unwrap();
        result.persistent.append("pages", Value::from("a"));
        result.persistent.append("pages", Value::from("b"));

        result.hooks.trigger(HookPoint::PostRender).unwrap();

        assert_eq!(result.persistent.get("total"), Some(Value::from(2)));
    }

    #[test]
    fn test_failing_deferred_hook_names_its_document() {
        let mut result = run("hook pre_render persistent.x = nope()").unwrap();

        let err = result.hooks.trigger(HookPoint::PreRender).unwrap_err();

        assert_eq!(err.document_id(), Some("doc"));
        assert!(err.to_string().contains("registered by doc"));
    }

    #[test]
    fn test_deferred_local_assignment_rejected() {
        let err = run("hook pre_render title = 1").err().unwrap();
        assert!(matches!(err, ScriptError::DeferredLocalAssignment { line: 1 }));
    }

    #[test]
    fn test_unknown_and_empty_hooks_rejected() {
        let err = run("hook on_save persistent.x = 1").err().unwrap();
        assert!(matches!(err, ScriptError::UnknownHook { ref name, .. } if name == "on_save"));

        let err = run("hook post_process").err().unwrap();
        assert!(matches!(
            err,
            ScriptError::EmptyHook {
                hook: "post_process",
                ..
            }
        ));
    }

    #[test]
    fn test_variable_named_hook_is_an_assignment() {
        let result = run("hook = 1").unwrap();
        assert_eq!(result.namespace.get("hook"), Some(&Value::from(1)));
    }

    #[test]
    fn test_post_process_transform() {
        let result = run("suffix = \"!\"\nhook post_process {{ output | upper }}{{ suffix }}").unwrap();
        let transform = result.post_process.unwrap();

        let output = transform("hi", &Value::from(())).unwrap();

        assert_eq!(output.as_deref(), Some("HI!"));
    }

    #[test]
    fn test_post_process_sees_module() {
        let result = run("hook post_process {{ module.title }}: {{ output }}").unwrap();
        let transform = result.post_process.unwrap();
        let module: Value = [("title", Value::from("Home"))].into_iter().collect();

        let output = transform("body", &module).unwrap();

        assert_eq!(output.as_deref(), Some("Home: body"));
    }

    #[test]
    fn test_last_post_process_wins() {
        let result = run("hook post_process first\nhook post_process second").unwrap();
        let output = result.post_process.unwrap()("x", &Value::from(())).unwrap();
        assert_eq!(output.as_deref(), Some("second"));
    }
}
