//! Per-build shared state.
//!
//! A [`BuildContext`] lives for exactly one build pass. It owns the
//! persistent data every document can read and write, the build-wide hooks,
//! the template engine, and the markdown converter. Starting a new pass means
//! creating a new context, so nothing leaks from one pass into the next.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use minijinja::Value;
use minijinja::value::{Enumerator, Object};

use crate::engine::{Namespace, TemplateEngine};
use crate::error::BuildError;
use crate::markdown::MarkdownConverter;
use crate::paths::SitePaths;
use crate::script::{Initializer, PostProcess, Script, ScriptError};

/// Zero-argument callable registered at a build-wide hook point.
pub type Hook = Box<dyn FnMut() -> Result<(), ScriptError>>;

/// Build-wide hook points.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// After every page compiled, before the first page renders.
    PreRender,
    /// After every page rendered.
    PostRender,
}

impl HookPoint {
    /// Name used in initializer scripts.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::PreRender => "pre_render",
            Self::PostRender => "post_render",
        }
    }
}

impl fmt::Display for HookPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Any hook name accepted by `attach_hook`, including the per-document
/// post-process transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookName {
    /// A build-wide hook point.
    Build(HookPoint),
    /// Per-document output transform.
    PostProcess,
}

impl FromStr for HookName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pre_render" => Ok(Self::Build(HookPoint::PreRender)),
            "post_render" => Ok(Self::Build(HookPoint::PostRender)),
            "post_process" => Ok(Self::PostProcess),
            other => Err(other.to_owned()),
        }
    }
}

/// Build-wide mutable key/value store.
///
/// Cloning yields another handle to the same store. Inside templates and
/// initializer expressions it is exposed as the `persistent` variable and
/// behaves like a live map: values written by one document are visible to
/// every document compiled or rendered afterwards.
#[derive(Clone, Default)]
pub struct PersistentData {
    values: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl PersistentData {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Set `key` to `value`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.lock().insert(key.into(), value);
    }

    /// Append `value` to the list stored under `key`.
    ///
    /// A missing key starts a new list. A non-list value becomes the first
    /// element of the new list.
    pub fn append(&self, key: impl Into<String>, value: Value) {
        let mut values = self.lock();
        let entry = values.entry(key.into()).or_insert(Value::UNDEFINED);
        *entry = append_value(entry, value);
    }

    /// Whether `key` is set.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Copy of every entry.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.lock().clone()
    }

    /// The store as a template value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::from_object(self.clone())
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Value>> {
        self.values.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PersistentData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.lock().iter()).finish()
    }
}

impl Object for PersistentData {
    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        self.get(key.as_str()?)
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.lock().keys().map(|key| Value::from(key.as_str())).collect())
    }
}

/// `existing` with `value` appended, as a new list.
pub(crate) fn append_value(existing: &Value, value: Value) -> Value {
    let mut items: Vec<Value> = match existing.kind() {
        minijinja::value::ValueKind::Undefined | minijinja::value::ValueKind::None => Vec::new(),
        minijinja::value::ValueKind::Seq => existing
            .try_iter()
            .map(Iterator::collect)
            .unwrap_or_default(),
        _ => vec![existing.clone()],
    };
    items.push(value);
    Value::from(items)
}

/// Ordered build-wide hooks.
#[derive(Default)]
pub struct HookRegistry {
    pre_render: Vec<RegisteredHook>,
    post_render: Vec<RegisteredHook>,
}

/// A hook with the document that registered it.
struct RegisteredHook {
    owner: Option<String>,
    hook: Hook,
}

impl HookRegistry {
    /// Register `hook` at `point`. Hooks run in registration order.
    pub fn attach(&mut self, point: HookPoint, hook: Hook) {
        self.hooks_mut(point).push(RegisteredHook { owner: None, hook });
    }

    /// Register `hook` at `point` on behalf of document `id`.
    pub fn attach_for(&mut self, point: HookPoint, id: &str, hook: Hook) {
        self.hooks_mut(point).push(RegisteredHook {
            owner: Some(id.to_owned()),
            hook,
        });
    }

    /// Number of hooks registered at `point`.
    #[must_use]
    pub fn len(&self, point: HookPoint) -> usize {
        match point {
            HookPoint::PreRender => self.pre_render.len(),
            HookPoint::PostRender => self.post_render.len(),
        }
    }

    /// Run every hook at `point`, stopping at the first failure.
    pub fn trigger(&mut self, point: HookPoint) -> Result<(), BuildError> {
        for (index, registered) in self.hooks_mut(point).iter_mut().enumerate() {
            (registered.hook)().map_err(|source| BuildError::Hook {
                point,
                index,
                id: registered.owner.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn hooks_mut(&mut self, point: HookPoint) -> &mut Vec<RegisteredHook> {
        match point {
            HookPoint::PreRender => &mut self.pre_render,
            HookPoint::PostRender => &mut self.post_render,
        }
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistry")
            .field("pre_render", &self.pre_render.len())
            .field("post_render", &self.post_render.len())
            .finish()
    }
}

/// Shared state for one build pass.
pub struct BuildContext {
    paths: SitePaths,
    persistent: PersistentData,
    hooks: HookRegistry,
    engine: TemplateEngine,
    markdown: Box<dyn MarkdownConverter>,
    initializer: Initializer,
}

impl BuildContext {
    /// Create a context with empty persistent data and no hooks.
    #[must_use]
    pub fn new(
        paths: SitePaths,
        engine: TemplateEngine,
        markdown: Box<dyn MarkdownConverter>,
    ) -> Self {
        Self {
            paths,
            persistent: PersistentData::new(),
            hooks: HookRegistry::default(),
            engine,
            markdown,
            initializer: Initializer::new(),
        }
    }

    /// Site roots for this pass.
    #[must_use]
    pub fn paths(&self) -> &SitePaths {
        &self.paths
    }

    /// Persistent data shared by every document in this pass.
    #[must_use]
    pub fn persistent(&self) -> &PersistentData {
        &self.persistent
    }

    /// Register a build-wide hook.
    pub fn attach_hook(&mut self, point: HookPoint, hook: Hook) {
        self.hooks.attach(point, hook);
    }

    /// Registered hooks.
    #[must_use]
    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    /// Run the hooks registered at `point`.
    pub fn trigger(&mut self, point: HookPoint) -> Result<(), BuildError> {
        tracing::debug!(%point, hooks = self.hooks.len(point), "Triggering hooks");
        self.hooks.trigger(point)
    }

    /// Template engine.
    #[must_use]
    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    pub(crate) fn engine_mut(&mut self) -> &mut TemplateEngine {
        &mut self.engine
    }

    /// Reset the converter and convert one markdown section.
    pub(crate) fn convert_markdown(&mut self, markdown: &str) -> String {
        self.markdown.reset();
        self.markdown.convert(markdown)
    }

    /// Run document `id`'s initializer script against `namespace`.
    ///
    /// Deferred hooks are registered on this context under `id`. Returns the
    /// post-process transform the script declared, if any.
    pub(crate) fn run_init(
        &mut self,
        id: &str,
        script: &Script,
        namespace: &mut Namespace,
    ) -> Result<Option<PostProcess>, ScriptError> {
        self.initializer
            .run(id, script, namespace, &self.persistent, &mut self.hooks)
    }
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("paths", &self.paths)
            .field("persistent", &self.persistent)
            .field("hooks", &self.hooks)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::markdown::PulldownConverter;
    use pretty_assertions::assert_eq;

    fn context() -> BuildContext {
        BuildContext::new(
            SitePaths::new("src", "dst", "templates"),
            TemplateEngine::new(),
            Box::new(PulldownConverter::default()),
        )
    }

    #[test]
    fn test_persistent_handles_share_storage() {
        let data = PersistentData::new();
        let other = data.clone();
        other.set("title", Value::from("Site"));
        assert_eq!(data.get("title"), Some(Value::from("Site")));
        assert!(data.contains("title"));
    }

    #[test]
    fn test_persistent_append_builds_list() {
        let data = PersistentData::new();
        data.append("pages", Value::from("a"));
        data.append("pages", Value::from("b"));
        assert_eq!(
            data.get("pages"),
            Some(Value::from(vec![Value::from("a"), Value::from("b")]))
        );
    }

    #[test]
    fn test_append_to_scalar_wraps_it() {
        let appended = append_value(&Value::from(1), Value::from(2));
        assert_eq!(appended, Value::from(vec![Value::from(1), Value::from(2)]));
    }

    #[test]
    fn test_persistent_value_is_live_in_templates() {
        let data = PersistentData::new();
        let value = data.to_value();
        data.set("count", Value::from(3));

        let env = minijinja::Environment::new();
        let output = env
            .render_str("{{ p.count }}", minijinja::context! { p => value })
            .unwrap();
        assert_eq!(output, "3");
    }

    #[test]
    fn test_hook_names_parse() {
        assert_eq!(
            "pre_render".parse::<HookName>(),
            Ok(HookName::Build(HookPoint::PreRender))
        );
        assert_eq!("post_process".parse::<HookName>(), Ok(HookName::PostProcess));
        assert_eq!("on_save".parse::<HookName>(), Err("on_save".to_owned()));
    }

    #[test]
    fn test_hooks_run_in_registration_order() {
        let mut ctx = context();
        let log = Rc::new(RefCell::new(Vec::new()));
        for name in ["first", "second"] {
            let log = Rc::clone(&log);
            ctx.attach_hook(
                HookPoint::PreRender,
                Box::new(move || {
                    log.borrow_mut().push(name);
                    Ok(())
                }),
            );
        }

        ctx.trigger(HookPoint::PreRender).unwrap();
        ctx.trigger(HookPoint::PostRender).unwrap();

        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn test_failing_hook_reports_point_and_index() {
        let mut ctx = context();
        ctx.attach_hook(HookPoint::PostRender, Box::new(|| Ok(())));
        ctx.attach_hook(
            HookPoint::PostRender,
            Box::new(|| Err(ScriptError::Custom("boom".to_owned()))),
        );

        let err = ctx.trigger(HookPoint::PostRender).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Hook {
                point: HookPoint::PostRender,
                index: 1,
                id: None,
                ..
            }
        ));
    }

    #[test]
    fn test_hook_attached_for_document_reports_its_id() {
        let mut hooks = HookRegistry::default();
        hooks.attach_for(
            HookPoint::PreRender,
            "notes/today",
            Box::new(|| Err(ScriptError::Custom("boom".to_owned()))),
        );

        let err = hooks.trigger(HookPoint::PreRender).unwrap_err();
        assert_eq!(err.document_id(), Some("notes/today"));
    }

    #[test]
    fn test_convert_markdown_resets_between_calls() {
        let mut ctx = context();
        ctx.convert_markdown("one");
        assert_eq!(ctx.convert_markdown("two"), "<p>two</p>\n");
    }
}
