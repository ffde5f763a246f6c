//! Command registry, routing, and the resumable parameter loop.
//!
//! ## Core principles
//!
//! 1. **Flat node list**: no command tree; shared literal prefixes are a
//!    naming convention, more specific literal paths are simply tried
//!    first
//! 2. **Candidate isolation**: every parse failure is local to the
//!    candidate node being tried; the next candidate still runs
//! 3. **Three outcomes**: a dispatch ends `Done`, `Failed`, or
//!    `Suspended`; suspension is not an error
//! 4. **No internal waiting**: the dispatcher runs to one of the three
//!    outcomes on the calling thread, holds no clock, keeps no table of
//!    pending suspensions
//!
//! Registration is single-writer-before-many-readers: finish registering
//! nodes and resolvers before dispatching concurrently; after that every
//! call works on `&self` with per-call state only.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::{debug, error, trace};

use crate::error::{ArgError, DispatchError, SpecError};
use crate::node::{render_usage, Action, Exec, Node, Param, Target, TypeSpec};
use crate::resolve::{ResolveContext, Resolution, ResolverRegistry, TypeResolver};
use crate::spec::parse_spec;
use crate::suspend::Suspend;

pub mod context;

pub use context::{ActionContext, Frontend, Sender};

#[cfg(test)]
pub(crate) mod tests;

/// Commands listed per `help` page.
const HELP_PAGE_SIZE: usize = 8;

/* ===================== Outcome ===================== */

/// Outcome of a dispatch or a resume.
#[derive(Debug)]
pub enum Dispatch {
    /// A node matched and its action ran.
    Done,
    /// Every candidate was exhausted; the most specific failure, already
    /// reported through the front-end bridge.
    Failed(DispatchError),
    /// A resolver requested an external confirmation. The caller owns
    /// the suspend until it resumes or abandons it.
    Suspended(Suspend),
}

/// Control flow inside the parameter loop.
enum ParamFlow {
    Arg(ArgError),
    Suspend(Box<Suspend>),
}

/* ===================== Builder ===================== */

/// Start a registration from a specification string.
///
/// ```no_run
/// # use cadence_core::{command, Target};
/// let cmd = command("warp set <name> [force:enum{yes|no}]")
///     .describe("en", "Create or move a warp")
///     .permission("warp.set")
///     .target(Target::Player)
///     .run(|ctx| {
///         let name = ctx.str_var("name").unwrap_or_default();
///         println!("set warp {name}");
///         Ok(())
///     });
/// ```
pub fn command(spec: impl Into<String>) -> CommandBuilder {
    CommandBuilder {
        spec: spec.into(),
        descriptions: HashMap::new(),
        param_labels: HashMap::new(),
        permission: None,
        target: Target::All,
        defaults: Vec::new(),
        types: Vec::new(),
        action: None,
    }
}

/// Everything one registration carries besides the spec string.
pub struct CommandBuilder {
    spec: String,
    descriptions: HashMap<String, String>,
    param_labels: HashMap<String, HashMap<String, String>>,
    permission: Option<String>,
    target: Target,
    defaults: Vec<(String, String)>,
    types: Vec<(String, Vec<TypeSpec>)>,
    action: Option<Arc<Action>>,
}

impl CommandBuilder {
    /// Description text for one locale.
    pub fn describe(mut self, locale: impl Into<String>, text: impl Into<String>) -> Self {
        self.descriptions.insert(locale.into(), text.into());
        self
    }

    /// Display label for an i18n-tagged parameter in one locale.
    pub fn label(
        mut self,
        locale: impl Into<String>,
        param: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.param_labels
            .entry(locale.into())
            .or_default()
            .insert(param.into(), text.into());
        self
    }

    pub fn permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = Some(permission.into());
        self
    }

    pub fn target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    /// Default value (string form) for an optional parameter.
    pub fn default_value(mut self, param: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.push((param.into(), value.into()));
        self
    }

    /// Replace a parameter's type alternatives with an explicit union,
    /// tried in the given order. This is how multi-type parameters are
    /// declared; the spec-string syntax carries a single type.
    pub fn types(mut self, param: impl Into<String>, alternatives: Vec<TypeSpec>) -> Self {
        self.types.push((param.into(), alternatives));
        self
    }

    /// Bind the action callback.
    pub fn run<F>(mut self, action: F) -> Self
    where
        F: Fn(&ActionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.action = Some(Arc::new(action));
        self
    }
}

/* ===================== Registry ===================== */

/// Holds every registered node and resolver, and drives dispatch.
pub struct CommandRegistry {
    nodes: Vec<Arc<Node>>,
    resolvers: ResolverRegistry,
    frontend: Arc<dyn Frontend>,
    host: Arc<dyn Any + Send + Sync>,
}

impl CommandRegistry {
    pub fn new(frontend: Arc<dyn Frontend>) -> Self {
        Self::with_host(frontend, Arc::new(()))
    }

    /// Registry with an opaque host-platform handle, passed through to
    /// resolvers in their [`ResolveContext`].
    pub fn with_host(frontend: Arc<dyn Frontend>, host: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            nodes: Vec::new(),
            resolvers: ResolverRegistry::new(),
            frontend,
            host,
        }
    }

    /// Register an external resolver. Consulted before the built-ins, in
    /// registration order.
    pub fn add_resolver(&mut self, resolver: Arc<dyn TypeResolver>) {
        self.resolvers.register(resolver);
    }

    /// Registered nodes, in registration order.
    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    /// Compile a builder's spec string and add the node. A malformed
    /// spec fails this one registration and leaves the registry
    /// untouched.
    pub fn register(&mut self, builder: CommandBuilder) -> Result<(), SpecError> {
        let CommandBuilder {
            spec,
            descriptions,
            param_labels,
            permission,
            target,
            defaults,
            types,
            action,
        } = builder;

        let parsed = parse_spec(&spec)?;
        let mut params = parsed.params;

        for (name, value) in defaults {
            let param = params
                .iter_mut()
                .find(|p| p.name == name)
                .ok_or_else(|| SpecError::UnknownParam(name.clone()))?;
            param.default = Some(value);
        }
        for (name, alternatives) in types {
            if alternatives.is_empty() {
                return Err(SpecError::Malformed(format!(
                    "empty type union for `{name}`"
                )));
            }
            let param = params
                .iter_mut()
                .find(|p| p.name == name)
                .ok_or_else(|| SpecError::UnknownParam(name.clone()))?;
            param.types = alternatives;
        }

        let action = action.ok_or_else(|| SpecError::NoAction(parsed.literals[0].clone()))?;
        let usage = render_usage(&parsed.literals, &params, |p| p.name.as_str());
        debug!(%usage, "registered command");

        self.nodes.push(Arc::new(Node {
            literals: parsed.literals,
            params,
            exec: Exec {
                action,
                permission,
                target,
            },
            usage,
            descriptions,
            param_labels,
        }));
        Ok(())
    }

    /* ===================== Dispatch ===================== */

    /// Route one invocation to the best-matching node and run it.
    pub fn dispatch(&self, sender: &dyn Sender, label: &str, tokens: &[String]) -> Dispatch {
        trace!(label, ?tokens, "dispatch");

        // Reserved literals bypass node matching entirely.
        if let Some(first) = tokens.first() {
            if first.eq_ignore_ascii_case("help") {
                return self.builtin_help(sender, label, tokens.get(1).map(String::as_str));
            }
            if first.eq_ignore_ascii_case("info") {
                return self.builtin_info(sender, label);
            }
        }

        let mut denied_perm: Option<String> = None;
        let mut denied_target: Option<Target> = None;
        let mut bad_arg: Option<(String, ArgError)> = None;
        let mut matched_any = false;

        for node in self.candidates(label, tokens) {
            let Some(rest) = match_literals(node, tokens) else {
                continue;
            };
            matched_any = true;

            // Target and permission rejections are recorded, not final:
            // a differently-scoped overload may still succeed.
            if !self.frontend.check_target(sender, node.exec.target) {
                denied_target.get_or_insert(node.exec.target);
                continue;
            }
            if let Some(permission) = &node.exec.permission {
                if !self.frontend.has_permission(sender, permission) {
                    denied_perm.get_or_insert_with(|| permission.clone());
                    continue;
                }
            }

            match self.consume_params(node, sender, HashMap::new(), 0, rest) {
                Ok(vars) => return self.execute(node, sender, &vars),
                // A confirmation request aborts the whole dispatch, not
                // just this candidate.
                Err(ParamFlow::Suspend(suspend)) => return Dispatch::Suspended(*suspend),
                Err(ParamFlow::Arg(err)) => {
                    // Candidates run most-specific-first, so the first
                    // recorded failure is the best-attempted node's.
                    if bad_arg.is_none() {
                        bad_arg = Some((node.usage_for(sender.locale()), err));
                    }
                }
            }
        }

        // Most specific outcome wins:
        // unknown > permission > target > bad-argument.
        let err = if !matched_any {
            DispatchError::UnknownCommand(label.to_string())
        } else if let Some(permission) = denied_perm {
            DispatchError::PermissionDenied(permission)
        } else if let Some(target) = denied_target {
            DispatchError::TargetDenied(target)
        } else if let Some((usage, source)) = bad_arg {
            DispatchError::BadArgument { usage, source }
        } else {
            DispatchError::UnknownCommand(label.to_string())
        };
        self.report(sender, &err);
        Dispatch::Failed(err)
    }

    /// Re-enter the parameter loop of a suspended dispatch.
    ///
    /// `value` is the externally confirmed value for the parameter that
    /// triggered the suspension. The caller must have enforced the ttl
    /// itself; an expired suspend must be failed, never resumed.
    pub fn resume(&self, sender: &dyn Sender, suspend: Suspend, value: JsonValue) -> Dispatch {
        let Suspend {
            node,
            next_index,
            mut vars,
            remaining,
            ..
        } = suspend;

        if next_index == 0 || next_index > node.params.len() {
            let err = DispatchError::Internal("suspend index out of range".to_string());
            self.report(sender, &err);
            return Dispatch::Failed(err);
        }
        let triggering = &node.params[next_index - 1];
        vars.insert(triggering.name.clone(), value);

        match self.consume_params(&node, sender, vars, next_index, &remaining) {
            Ok(vars) => self.execute(&node, sender, &vars),
            Err(ParamFlow::Suspend(suspend)) => Dispatch::Suspended(*suspend),
            Err(ParamFlow::Arg(source)) => {
                let err = DispatchError::BadArgument {
                    usage: node.usage_for(sender.locale()),
                    source,
                };
                self.report(sender, &err);
                Dispatch::Failed(err)
            }
        }
    }

    /* ===================== Candidate selection ===================== */

    /// Nodes rooted at `label`, narrowed by the second-literal shortcut,
    /// most specific literal path first. The sort is stable, so equal
    /// literal lengths keep registration order.
    fn candidates(&self, label: &str, tokens: &[String]) -> Vec<&Arc<Node>> {
        let mut list: Vec<&Arc<Node>> = self
            .nodes
            .iter()
            .filter(|n| n.root().eq_ignore_ascii_case(label))
            .collect();

        if let Some(first) = tokens.first() {
            let narrowed: Vec<&Arc<Node>> = list
                .iter()
                .copied()
                .filter(|n| n.literals.get(1) == Some(first))
                .collect();
            if !narrowed.is_empty() {
                list = narrowed;
            }
        }

        list.sort_by(|a, b| b.literals.len().cmp(&a.literals.len()));
        list
    }

    /* ===================== Parameter loop ===================== */

    /// Bind parameters `start..` from `rest`, in declared order.
    ///
    /// `vars` is this call's own map; per-dispatch state is never
    /// shared. On a confirmation request the returned [`Suspend`] takes
    /// a copy of the bindings, never an alias.
    fn consume_params(
        &self,
        node: &Arc<Node>,
        sender: &dyn Sender,
        mut vars: HashMap<String, JsonValue>,
        start: usize,
        rest: &[String],
    ) -> Result<HashMap<String, JsonValue>, ParamFlow> {
        let total = node.params.len();
        let mut pos = 0usize;

        for (idx, param) in node.params.iter().enumerate().skip(start) {
            let remaining = &rest[pos..];

            if remaining.is_empty() {
                if param.optional {
                    if let Some(default) = &param.default {
                        let value = self.coerce_default(param, sender, &vars, default);
                        vars.insert(param.name.clone(), value);
                    }
                    continue;
                }
                return Err(ParamFlow::Arg(ArgError::MissingRequired(param.name.clone())));
            }

            let last = idx + 1 == total;
            let token = if last && param.is_string_like() {
                // Trailing free text: join everything that's left.
                let joined = remaining.join(" ");
                pos = rest.len();
                joined
            } else if last && remaining.len() > 1 {
                // Never silently discard trailing garbage.
                return Err(ParamFlow::Arg(ArgError::TooManyArguments));
            } else {
                pos += 1;
                remaining[0].clone()
            };

            match self.resolve_param(param, sender, &vars, &token) {
                Resolution::Value(value) => {
                    vars.insert(param.name.clone(), value);
                }
                Resolution::Fail(err) => return Err(ParamFlow::Arg(err)),
                Resolution::NeedConfirmation(confirmation) => {
                    return Err(ParamFlow::Suspend(Box::new(Suspend {
                        kind: confirmation.kind,
                        prompt_key: confirmation.prompt_key,
                        ttl: confirmation.ttl,
                        node: Arc::clone(node),
                        next_index: idx + 1,
                        vars: vars.clone(),
                        remaining: rest[pos..].to_vec(),
                    })));
                }
            }
        }

        if pos < rest.len() {
            return Err(ParamFlow::Arg(ArgError::TooManyArguments));
        }
        Ok(vars)
    }

    /// Try each type alternative in declared order; the first success
    /// wins, only the last failure is kept for diagnostics. A
    /// confirmation request propagates immediately.
    fn resolve_param(
        &self,
        param: &Param,
        sender: &dyn Sender,
        vars: &HashMap<String, JsonValue>,
        token: &str,
    ) -> Resolution {
        let mut last_fail = None;
        for spec in &param.types {
            let ctx = ResolveContext {
                vars,
                meta: &spec.meta,
                host: self.host.as_ref(),
                sender,
            };
            match self.resolvers.parse_one(&ctx, spec, token) {
                Resolution::Fail(err) => last_fail = Some(err),
                done => return done,
            }
        }
        Resolution::Fail(last_fail.expect("param has at least one type alternative"))
    }

    /// Coerce a registered default through the parameter's own
    /// alternatives, falling back to the raw string form.
    fn coerce_default(
        &self,
        param: &Param,
        sender: &dyn Sender,
        vars: &HashMap<String, JsonValue>,
        default: &str,
    ) -> JsonValue {
        match self.resolve_param(param, sender, vars, default) {
            Resolution::Value(value) => value,
            _ => json!(default),
        }
    }

    /* ===================== Execution ===================== */

    /// Run the bound action exactly once. An error escaping the callback
    /// is caught here and reported as an opaque internal error; it never
    /// reaches other dispatches.
    fn execute(
        &self,
        node: &Arc<Node>,
        sender: &dyn Sender,
        vars: &HashMap<String, JsonValue>,
    ) -> Dispatch {
        let ctx = ActionContext { sender, node, vars };
        match (node.exec.action)(&ctx) {
            Ok(()) => Dispatch::Done,
            Err(err) => {
                error!(command = %node.usage, %err, "action callback failed");
                let err = DispatchError::Internal(err.to_string());
                self.report(sender, &err);
                Dispatch::Failed(err)
            }
        }
    }

    /// Emit the symbolic message key for a failure.
    fn report(&self, sender: &dyn Sender, err: &DispatchError) {
        let key = err.message_key();
        match err {
            DispatchError::UnknownCommand(label) => {
                self.frontend.message(sender, key, &[label.as_str()]);
            }
            DispatchError::PermissionDenied(permission) => {
                self.frontend.message(sender, key, &[permission.as_str()]);
            }
            DispatchError::TargetDenied(target) => {
                self.frontend.message(sender, key, &[target.as_str()]);
            }
            DispatchError::BadArgument { usage, source } => {
                self.frontend
                    .message(sender, key, &[usage.as_str(), source.message_key()]);
            }
            DispatchError::Internal(_) => {
                self.frontend.message(sender, key, &[]);
            }
        }
    }

    /* ===================== Built-ins ===================== */

    fn builtin_help(&self, sender: &dyn Sender, label: &str, page: Option<&str>) -> Dispatch {
        let locale = sender.locale();
        let nodes: Vec<&Arc<Node>> = self
            .nodes
            .iter()
            .filter(|n| n.root().eq_ignore_ascii_case(label))
            .collect();

        let pages = nodes.len().div_ceil(HELP_PAGE_SIZE).max(1);
        let page = page
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(1)
            .clamp(1, pages);

        let page_str = page.to_string();
        let pages_str = pages.to_string();
        self.frontend
            .message(sender, "help.header", &[label, &page_str, &pages_str]);

        for node in nodes
            .iter()
            .skip((page - 1) * HELP_PAGE_SIZE)
            .take(HELP_PAGE_SIZE)
        {
            let usage = node.usage_for(locale);
            let description = node.description_for(locale).unwrap_or("");
            self.frontend
                .message(sender, "help.line", &[&usage, description]);
        }
        Dispatch::Done
    }

    fn builtin_info(&self, sender: &dyn Sender, label: &str) -> Dispatch {
        let count = self
            .nodes
            .iter()
            .filter(|n| n.root().eq_ignore_ascii_case(label))
            .count()
            .to_string();
        self.frontend.message(sender, "info.header", &[label, &count]);
        Dispatch::Done
    }

    /* ===================== Completion ===================== */

    /// Completion candidates for the token currently being typed (the
    /// last one). Mirrors routing and the parameter loop, but never
    /// executes an action and never suspends.
    ///
    /// Preference order: second-literal completions, then in-progress
    /// parameter completions, then root-literal completions.
    pub fn complete(&self, sender: &dyn Sender, label: &str, tokens: &[String]) -> Vec<String> {
        let empty: &[String] = &[];
        let (prefix, prior) = match tokens.split_last() {
            Some((last, prior)) => (last.as_str(), prior),
            None => ("", empty),
        };

        let mut out: Vec<String> = Vec::new();

        if prior.is_empty() {
            for node in self.roots(label) {
                if let Some(second) = node.literals.get(1) {
                    if starts_with_ci(second, prefix) {
                        out.push(second.clone());
                    }
                }
            }
        }

        for node in self.roots(label) {
            self.complete_node(node, sender, prior, prefix, &mut out);
        }

        for node in &self.nodes {
            if starts_with_ci(node.root(), prefix) {
                out.push(node.root().to_string());
            }
        }

        dedup_preserving(out)
    }

    fn roots<'a>(&'a self, label: &'a str) -> impl Iterator<Item = &'a Arc<Node>> + 'a {
        self.nodes
            .iter()
            .filter(move |n| n.root().eq_ignore_ascii_case(label))
    }

    /// Completions one node offers for the current token: the next
    /// literal word if the path is still being typed, otherwise the
    /// in-progress parameter's candidates with prior tokens bound
    /// best-effort.
    fn complete_node(
        &self,
        node: &Arc<Node>,
        sender: &dyn Sender,
        prior: &[String],
        prefix: &str,
        out: &mut Vec<String>,
    ) {
        let subs = &node.literals[1..];

        if prior.len() < subs.len() {
            if !subs.iter().zip(prior).all(|(l, t)| l.eq_ignore_ascii_case(t)) {
                return;
            }
            let next = &subs[prior.len()];
            if starts_with_ci(next, prefix) {
                out.push(next.clone());
            }
            return;
        }

        if !subs.iter().zip(prior).all(|(l, t)| l.eq_ignore_ascii_case(t)) {
            return;
        }
        let rest = &prior[subs.len()..];

        let mut vars: HashMap<String, JsonValue> = HashMap::new();
        for (i, token) in rest.iter().enumerate() {
            if let Some(param) = node.params.get(i) {
                if let Resolution::Value(value) = self.resolve_param(param, sender, &vars, token) {
                    vars.insert(param.name.clone(), value);
                }
            }
        }

        let param = match node.params.get(rest.len()) {
            Some(param) => param,
            // A trailing string-like param keeps completing across its
            // joined words.
            None => match node.params.last() {
                Some(param) if param.is_string_like() => param,
                _ => return,
            },
        };

        for spec in &param.types {
            let ctx = ResolveContext {
                vars: &vars,
                meta: &spec.meta,
                host: self.host.as_ref(),
                sender,
            };
            out.extend(self.resolvers.complete_one(&ctx, spec, prefix));
        }
    }
}

/* ===================== Helpers ===================== */

/// Match a node's sub-command literals (everything after the root, which
/// the label already matched) against the head of the token list.
/// Returns the tokens left for the parameter loop.
fn match_literals<'t>(node: &Node, tokens: &'t [String]) -> Option<&'t [String]> {
    let subs = &node.literals[1..];
    if tokens.len() < subs.len() {
        return None;
    }
    for (literal, token) in subs.iter().zip(tokens) {
        if !literal.eq_ignore_ascii_case(token) {
            return None;
        }
    }
    Some(&tokens[subs.len()..])
}

fn starts_with_ci(text: &str, prefix: &str) -> bool {
    text.to_lowercase().starts_with(&prefix.to_lowercase())
}

fn dedup_preserving(mut list: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    list.retain(|s| seen.insert(s.clone()));
    list
}
