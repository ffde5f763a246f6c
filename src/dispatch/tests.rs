//! Dispatcher tests - routing, the parameter loop, failure priority, and
//! the suspend/resume protocol.

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value as JsonValue};

use crate::dispatch::{command, CommandRegistry, Dispatch, Frontend, Sender};
use crate::error::{ArgError, DispatchError};
use crate::node::{Target, TypeSpec};
use crate::resolve::{Confirmation, ResolveContext, Resolution, TypeResolver};

/* ===================== Fixtures ===================== */

pub(crate) struct TestSender {
    name: String,
    player: bool,
}

impl TestSender {
    pub(crate) fn player(name: &str) -> Self {
        Self {
            name: name.to_string(),
            player: true,
        }
    }

    pub(crate) fn console() -> Self {
        Self {
            name: "console".to_string(),
            player: false,
        }
    }
}

impl Sender for TestSender {
    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Default)]
pub(crate) struct TestFrontend {
    pub messages: Mutex<Vec<(String, Vec<String>)>>,
    /// Granted permissions as `sender:permission` pairs.
    pub permissions: Mutex<HashSet<String>>,
}

impl TestFrontend {
    fn grant(&self, sender: &str, permission: &str) {
        self.permissions
            .lock()
            .unwrap()
            .insert(format!("{sender}:{permission}"));
    }

    fn keys(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl Frontend for TestFrontend {
    fn message(&self, _sender: &dyn Sender, key: &str, args: &[&str]) {
        self.messages.lock().unwrap().push((
            key.to_string(),
            args.iter().map(|a| a.to_string()).collect(),
        ));
    }

    fn has_permission(&self, sender: &dyn Sender, permission: &str) -> bool {
        self.permissions
            .lock()
            .unwrap()
            .contains(&format!("{}:{}", sender.name(), permission))
    }

    fn check_target(&self, sender: &dyn Sender, target: Target) -> bool {
        let player = sender
            .as_any()
            .downcast_ref::<TestSender>()
            .map(|s| s.player)
            .unwrap_or(false);
        match target {
            Target::All => true,
            Target::Player => player,
            Target::Console => !player,
        }
    }
}

/// Resolver for the `confirm` type: always requests an external
/// confirmation instead of producing a value.
struct ConfirmResolver;

impl TypeResolver for ConfirmResolver {
    fn supports(&self, type_id: &str) -> bool {
        type_id == "confirm"
    }

    fn parse(&self, _ctx: &ResolveContext<'_>, _token: &str) -> Resolution {
        Resolution::NeedConfirmation(Confirmation {
            kind: "chat".to_string(),
            prompt_key: "confirm.prompt".to_string(),
            ttl: Duration::from_secs(30),
        })
    }
}

fn registry() -> (CommandRegistry, Arc<TestFrontend>) {
    let frontend = Arc::new(TestFrontend::default());
    (CommandRegistry::new(frontend.clone()), frontend)
}

fn toks(tokens: &[&str]) -> Vec<String> {
    tokens.iter().map(|t| t.to_string()).collect()
}

fn noop() -> impl Fn(&crate::dispatch::ActionContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static
{
    |_ctx| Ok(())
}

/* ===================== Routing ===================== */

#[test]
fn test_second_literal_wins_over_param_overload() {
    let (mut registry, _) = registry();
    let hit = Arc::new(Mutex::new(Vec::<&'static str>::new()));

    let h = hit.clone();
    registry
        .register(command("root sub <a:int>").run(move |ctx| {
            assert_eq!(ctx.int_var("a"), Some(5));
            h.lock().unwrap().push("literal");
            Ok(())
        }))
        .unwrap();
    let h = hit.clone();
    registry
        .register(command("root <b>").run(move |_ctx| {
            h.lock().unwrap().push("param");
            Ok(())
        }))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "root", &toks(&["sub", "5"]));
    assert!(matches!(out, Dispatch::Done));
    assert_eq!(*hit.lock().unwrap(), vec!["literal"]);
}

#[test]
fn test_literal_match_is_case_insensitive() {
    let (mut registry, _) = registry();
    registry
        .register(command("Warp List").run(noop()))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "warp", &toks(&["LIST"]));
    assert!(matches!(out, Dispatch::Done));
}

#[test]
fn test_unknown_command_reported() {
    let (mut registry, frontend) = registry();
    registry.register(command("warp").run(noop())).unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "nope", &toks(&[]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::UnknownCommand(label)) if label == "nope"
    ));
    assert_eq!(frontend.keys(), vec!["error.unknown-command"]);
}

#[test]
fn test_help_intercepted_before_matching() {
    let (mut registry, frontend) = registry();
    registry
        .register(command("warp list").describe("en", "List warps").run(noop()))
        .unwrap();
    // A node that would also match `help` must not shadow the built-in.
    registry.register(command("warp <x>").run(noop())).unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "warp", &toks(&["help"]));
    assert!(matches!(out, Dispatch::Done));

    let keys = frontend.keys();
    assert_eq!(keys[0], "help.header");
    assert!(keys[1..].iter().all(|k| k == "help.line"));
}

#[test]
fn test_info_intercepted() {
    let (mut registry, frontend) = registry();
    registry.register(command("warp list").run(noop())).unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "warp", &toks(&["info"]));
    assert!(matches!(out, Dispatch::Done));
    assert_eq!(frontend.keys(), vec!["info.header"]);
}

/* ===================== Parameter loop ===================== */

#[test]
fn test_union_tries_alternatives_in_order() {
    let (mut registry, _) = registry();
    let seen = Arc::new(Mutex::new(Vec::<JsonValue>::new()));

    let s = seen.clone();
    registry
        .register(
            command("take <slot>")
                .types("slot", vec![TypeSpec::options("A|B"), TypeSpec::int()])
                .run(move |ctx| {
                    s.lock().unwrap().push(ctx.var("slot").unwrap().clone());
                    Ok(())
                }),
        )
        .unwrap();

    let sender = TestSender::player("steve");
    assert!(matches!(
        registry.dispatch(&sender, "take", &toks(&["A"])),
        Dispatch::Done
    ));
    assert!(matches!(
        registry.dispatch(&sender, "take", &toks(&["7"])),
        Dispatch::Done
    ));
    assert_eq!(*seen.lock().unwrap(), vec![json!("A"), json!(7)]);

    // No alternative accepts "Z"; the last failure is reported.
    let out = registry.dispatch(&sender, "take", &toks(&["Z"]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::BadArgument {
            source: ArgError::Range { .. },
            ..
        })
    ));
}

#[test]
fn test_trailing_string_joins_remaining_tokens() {
    let (mut registry, _) = registry();
    let seen = Arc::new(Mutex::new(None::<String>));

    let s = seen.clone();
    registry
        .register(command("rename <name>").run(move |ctx| {
            *s.lock().unwrap() = ctx.str_var("name").map(str::to_string);
            Ok(())
        }))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "rename", &toks(&["New", "Label"]));
    assert!(matches!(out, Dispatch::Done));
    assert_eq!(seen.lock().unwrap().as_deref(), Some("New Label"));
}

#[test]
fn test_trailing_non_string_rejects_extra_tokens() {
    let (mut registry, _) = registry();
    registry
        .register(command("vol <v:int>").run(noop()))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "vol", &toks(&["5", "6"]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::BadArgument {
            source: ArgError::TooManyArguments,
            ..
        })
    ));
}

#[test]
fn test_literal_only_node_rejects_trailing_garbage() {
    let (mut registry, _) = registry();
    registry.register(command("warp list").run(noop())).unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "warp", &toks(&["list", "extra"]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::BadArgument {
            source: ArgError::TooManyArguments,
            ..
        })
    ));
}

#[test]
fn test_missing_required_param() {
    let (mut registry, _) = registry();
    registry
        .register(command("vol <v:int>").run(noop()))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "vol", &toks(&[]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::BadArgument {
            source: ArgError::MissingRequired(name),
            ..
        }) if name == "v"
    ));
}

#[test]
fn test_optional_default_is_coerced() {
    let (mut registry, _) = registry();
    let seen = Arc::new(Mutex::new(None::<JsonValue>));

    let s = seen.clone();
    registry
        .register(
            command("page [n:int]")
                .default_value("n", "1")
                .run(move |ctx| {
                    *s.lock().unwrap() = ctx.var("n").cloned();
                    Ok(())
                }),
        )
        .unwrap();

    let sender = TestSender::player("steve");
    assert!(matches!(
        registry.dispatch(&sender, "page", &toks(&[])),
        Dispatch::Done
    ));
    // Coerced through the int resolver, not left as a string.
    assert_eq!(*seen.lock().unwrap(), Some(json!(1)));
}

#[test]
fn test_optional_without_default_binds_nothing() {
    let (mut registry, _) = registry();
    let seen = Arc::new(Mutex::new(None::<JsonValue>));

    let s = seen.clone();
    registry
        .register(command("page [n:int]").run(move |ctx| {
            *s.lock().unwrap() = ctx.var("n").cloned();
            Ok(())
        }))
        .unwrap();

    let sender = TestSender::player("steve");
    assert!(matches!(
        registry.dispatch(&sender, "page", &toks(&[])),
        Dispatch::Done
    ));
    assert_eq!(*seen.lock().unwrap(), None);
}

#[test]
fn test_bad_arg_reports_best_attempted_usage() {
    let (mut registry, frontend) = registry();
    registry
        .register(command("root sub <a:int>").run(noop()))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "root", &toks(&["sub", "x"]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::BadArgument { usage, .. }) if usage == "root sub <a>"
    ));

    let messages = frontend.messages.lock().unwrap();
    assert_eq!(messages[0].0, "error.bad-arg");
    assert_eq!(messages[0].1[0], "root sub <a>");
}

/* ===================== Permissions and targets ===================== */

#[test]
fn test_permission_denied_falls_through_to_next_candidate() {
    let (mut registry, frontend) = registry();
    let hit = Arc::new(AtomicUsize::new(0));

    let h = hit.clone();
    registry
        .register(
            command("admin do <x:int>")
                .permission("admin.first")
                .run(move |_| {
                    h.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
        )
        .unwrap();
    let h = hit.clone();
    registry
        .register(
            command("admin do <x:int>")
                .permission("admin.second")
                .run(move |_| {
                    h.fetch_add(10, Ordering::SeqCst);
                    Ok(())
                }),
        )
        .unwrap();

    frontend.grant("steve", "admin.second");

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "admin", &toks(&["do", "1"]));
    assert!(matches!(out, Dispatch::Done));
    assert_eq!(hit.load(Ordering::SeqCst), 10);
}

#[test]
fn test_permission_denied_reported_when_no_candidate_left() {
    let (mut registry, frontend) = registry();
    registry
        .register(command("admin").permission("admin.use").run(noop()))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "admin", &toks(&[]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::PermissionDenied(p)) if p == "admin.use"
    ));
    assert_eq!(frontend.keys(), vec!["error.no-perm"]);
}

#[test]
fn test_target_denied_falls_through_then_reports() {
    let (mut registry, _) = registry();
    let hit = Arc::new(AtomicUsize::new(0));

    registry
        .register(command("home").target(Target::Player).run(noop()))
        .unwrap();
    let h = hit.clone();
    registry
        .register(command("home").target(Target::All).run(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

    // Console fails the Player overload but reaches the All overload.
    let console = TestSender::console();
    assert!(matches!(
        registry.dispatch(&console, "home", &toks(&[])),
        Dispatch::Done
    ));
    assert_eq!(hit.load(Ordering::SeqCst), 1);

    // With only the Player overload the denial is final.
    let (mut registry, _) = self::registry();
    registry
        .register(command("home").target(Target::Player).run(noop()))
        .unwrap();
    let out = registry.dispatch(&console, "home", &toks(&[]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::TargetDenied(Target::Player))
    ));
}

#[test]
fn test_action_error_becomes_internal_and_stops_there() {
    let (mut registry, frontend) = registry();
    registry
        .register(command("boom").run(|_| anyhow::bail!("exploded")))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "boom", &toks(&[]));
    assert!(matches!(
        out,
        Dispatch::Failed(DispatchError::Internal(msg)) if msg.contains("exploded")
    ));
    assert_eq!(frontend.keys(), vec!["error.internal"]);

    // The registry stays usable after a failing action.
    assert!(matches!(
        registry.dispatch(&sender, "boom", &toks(&[])),
        Dispatch::Failed(DispatchError::Internal(_))
    ));
}

/* ===================== Suspend / resume ===================== */

fn suspending_registry() -> (CommandRegistry, Arc<TestFrontend>, Arc<AtomicUsize>) {
    let (mut registry, frontend) = registry();
    registry.add_resolver(Arc::new(ConfirmResolver));
    let runs = Arc::new(AtomicUsize::new(0));

    let r = runs.clone();
    registry
        .register(
            command("order <qty:int> <tag:string{[a-z]+}> <approval:confirm> <slot:int>").run(
                move |ctx| {
                    assert_eq!(ctx.int_var("qty"), Some(2));
                    assert_eq!(ctx.str_var("tag"), Some("ore"));
                    assert_eq!(ctx.str_var("approval"), Some("yes"));
                    assert_eq!(ctx.int_var("slot"), Some(4));
                    r.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
            ),
        )
        .unwrap();
    (registry, frontend, runs)
}

#[test]
fn test_suspend_captures_state_at_signal_point() {
    let (registry, _, runs) = suspending_registry();
    let sender = TestSender::player("steve");

    let out = registry.dispatch(&sender, "order", &toks(&["2", "ore", "now", "4"]));
    let Dispatch::Suspended(suspend) = out else {
        panic!("Expected suspension, got {:?}", out);
    };

    assert_eq!(suspend.kind, "chat");
    assert_eq!(suspend.prompt_key, "confirm.prompt");
    assert_eq!(suspend.ttl, Duration::from_secs(30));
    // Signal hit parameter index 2, so the next unparsed index is 3 and
    // the snapshot holds exactly parameters 0 and 1.
    assert_eq!(suspend.next_index, 3);
    assert_eq!(suspend.vars.len(), 2);
    assert_eq!(suspend.vars.get("qty"), Some(&json!(2)));
    assert_eq!(suspend.vars.get("tag"), Some(&json!("ore")));
    // The triggering token is discarded; only what follows remains.
    assert_eq!(suspend.remaining, toks(&["4"]));
    // Never a partial execution.
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn test_resume_completes_and_runs_action_exactly_once() {
    let (registry, _, runs) = suspending_registry();
    let sender = TestSender::player("steve");

    let out = registry.dispatch(&sender, "order", &toks(&["2", "ore", "now", "4"]));
    let Dispatch::Suspended(suspend) = out else {
        panic!("Expected suspension");
    };

    let out = registry.resume(&sender, suspend, json!("yes"));
    assert!(matches!(out, Dispatch::Done));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_resume_can_suspend_again() {
    let (mut registry, _) = registry();
    registry.add_resolver(Arc::new(ConfirmResolver));
    let runs = Arc::new(AtomicUsize::new(0));

    let r = runs.clone();
    registry
        .register(command("pact <first:confirm> <second:confirm>").run(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }))
        .unwrap();

    let sender = TestSender::player("steve");
    let out = registry.dispatch(&sender, "pact", &toks(&["a", "b"]));
    let Dispatch::Suspended(first) = out else {
        panic!("Expected first suspension");
    };
    assert_eq!(first.next_index, 1);

    // Chained confirmation: resuming hits the second confirm parameter.
    let out = registry.resume(&sender, first, json!("ok"));
    let Dispatch::Suspended(second) = out else {
        panic!("Expected second suspension");
    };
    assert_eq!(second.next_index, 2);
    assert_eq!(second.vars.get("first"), Some(&json!("ok")));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    let out = registry.resume(&sender, second, json!("ok"));
    assert!(matches!(out, Dispatch::Done));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_suspends_are_independent_snapshots() {
    let (registry, _, _) = suspending_registry();
    let registry = Arc::new(registry);

    let (a, b) = std::thread::scope(|scope| {
        let ra = registry.clone();
        let ha = scope.spawn(move || {
            let sender = TestSender::player("alice");
            ra.dispatch(&sender, "order", &toks(&["2", "ore", "now", "4"]))
        });
        let rb = registry.clone();
        let hb = scope.spawn(move || {
            let sender = TestSender::player("bob");
            rb.dispatch(&sender, "order", &toks(&["2", "ore", "now", "4"]))
        });
        (ha.join().unwrap(), hb.join().unwrap())
    });

    let (Dispatch::Suspended(mut a), Dispatch::Suspended(b)) = (a, b) else {
        panic!("Expected both dispatches to suspend");
    };

    // Mutating one snapshot must never show up in the other.
    a.vars.insert("qty".to_string(), json!(999));
    assert_eq!(b.vars.get("qty"), Some(&json!(2)));
}

/* ===================== Registration ===================== */

#[test]
fn test_failed_registration_leaves_registry_intact() {
    let (mut registry, _) = registry();
    registry.register(command("warp list").run(noop())).unwrap();

    assert!(registry.register(command("warp <bad").run(noop())).is_err());
    assert_eq!(registry.nodes().len(), 1);

    let sender = TestSender::player("steve");
    assert!(matches!(
        registry.dispatch(&sender, "warp", &toks(&["list"])),
        Dispatch::Done
    ));
}

#[test]
fn test_registration_without_action_fails() {
    let (mut registry, _) = registry();
    let err = registry.register(command("warp")).unwrap_err();
    assert!(matches!(err, crate::error::SpecError::NoAction(_)));
}

#[test]
fn test_builder_override_of_unknown_param_fails() {
    let (mut registry, _) = registry();
    let err = registry
        .register(command("warp <name>").default_value("nope", "x").run(noop()))
        .unwrap_err();
    assert!(matches!(err, crate::error::SpecError::UnknownParam(p) if p == "nope"));
}

#[test]
fn test_i18n_usage_rendering() {
    let (mut registry, _) = registry();
    registry
        .register(
            command("warp set <name@i18n>")
                .label("de", "name", "Name")
                .label("en", "name", "warp name")
                .run(noop()),
        )
        .unwrap();

    let node = &registry.nodes()[0];
    assert_eq!(node.usage_for("de"), "warp set <Name>");
    assert_eq!(node.usage_for("en"), "warp set <warp name>");
    // Unregistered locale falls back to the parameter name.
    assert_eq!(node.usage_for("fr"), "warp set <name>");
}

/* ===================== Completion ===================== */

#[test]
fn test_completion_prefers_second_literals_then_params_then_roots() {
    let (mut registry, _) = registry();
    registry
        .register(command("region flag <name:enum{pvp|fly}>").run(noop()))
        .unwrap();
    registry.register(command("region list").run(noop())).unwrap();
    registry.register(command("reload").run(noop())).unwrap();

    let sender = TestSender::player("steve");

    // Typing the first argument: second literals first, then root
    // literals that share the prefix.
    let out = registry.complete(&sender, "region", &toks(&["l"]));
    assert_eq!(out, vec!["list".to_string()]);

    // Typing a parameter: resolver completions.
    let out = registry.complete(&sender, "region", &toks(&["flag", "p"]));
    assert_eq!(out, vec!["pvp".to_string()]);

    // Empty prefix lists second literals before root literals.
    let out = registry.complete(&sender, "region", &toks(&[""]));
    assert_eq!(
        out,
        vec!["flag".to_string(), "list".to_string(), "region".to_string(), "reload".to_string()]
    );
}

#[test]
fn test_completion_never_executes_or_suspends() {
    let (registry, _, runs) = suspending_registry();
    let sender = TestSender::player("steve");

    let out = registry.complete(&sender, "order", &toks(&["2", "ore", "n"]));
    // The confirm resolver offers no completions and must not suspend.
    assert!(out.is_empty());
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}
