//! Isolated execution context for composed documents.
//!
//! One context per run generation, owned by a dedicated thread. The
//! capability surface is a strict allow-list: beyond the engine's own
//! builtins, injected script gets exactly the outbound post primitive
//! (`__sandbox_post`), a `window` alias of the global object, and
//! fast-forward timers. No host page, storage, navigation, network, or
//! filesystem access exists in the context at all.
//!
//! Only `<script>` region bodies reach the evaluator; style and body
//! regions are never executed. Failures are contained here: evaluation
//! errors are routed through the document's `window.onerror` handler (or
//! posted directly when none is installed) and nothing propagates to the
//! caller.

use std::cell::RefCell;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU32, Ordering};

use boa_engine::object::ObjectInitializer;
use boa_engine::property::Attribute;
use boa_engine::{Context, JsResult, JsValue, NativeFunction, Source, js_string};
use regex::Regex;
use tracing::debug;

use crate::compose::ComposedDocument;
use crate::message::Mailbox;

// `NativeFunction::from_copy_closure` requires `Copy` closures, which rules
// out capturing the mailbox directly. Script execution is single-threaded
// per context, so a thread-local side channel is sufficient.
thread_local! {
    static OUTBOX: RefCell<Option<Mailbox>> = const { RefCell::new(None) };
    static TIMERS: RefCell<Vec<TimerEntry>> = const { RefCell::new(Vec::new()) };
}

static NEXT_TIMER_ID: AtomicU32 = AtomicU32::new(1);
static NEXT_CALLBACK_ID: AtomicU32 = AtomicU32::new(1);

/// A pending timer created by `setTimeout` or `setInterval`.
#[derive(Debug, Clone)]
struct TimerEntry {
    id: u32,
    callback_source: String,
    delay_ms: u64,
}

/// Passes over newly scheduled timers after the main evaluation, so a
/// callback that schedules another timer still runs, but a self-rescheduling
/// loop cannot wedge the drain.
const MAX_TIMER_PASSES: usize = 8;

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script[^>]*>(.*?)</script>").expect("script region pattern is valid")
});

/// Pull every `<script>` body out of a document, in document order.
///
/// This includes script tags the user embedded in the HTML field: they run
/// in the same context, under the same messaging contract, as the composed
/// regions.
pub fn extract_scripts(document: &str) -> Vec<String> {
    SCRIPT_RE
        .captures_iter(document)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Execute one composed document to completion.
///
/// Evaluates every script region in document order, then fast-forwards
/// deferred timer callbacks in `(delay, id)` order. All output and all
/// failures flow through the mailbox; this function never panics on
/// script-level problems and never returns an error.
pub fn execute(document: &ComposedDocument, mailbox: Mailbox) {
    let generation = mailbox.generation();
    OUTBOX.with(|slot| *slot.borrow_mut() = Some(mailbox));
    TIMERS.with(|timers| timers.borrow_mut().clear());

    let mut context = Context::default();
    match install_globals(&mut context) {
        Ok(()) => {
            debug!(generation, "execution context installed");
            for script in extract_scripts(document.as_str()) {
                if let Err(err) = context.eval(Source::from_bytes(script.as_bytes())) {
                    dispatch_uncaught(&mut context, &format!("{err}"));
                }
                let _ = context.run_jobs();
            }
            run_deferred_timers(&mut context);
            debug!(generation, "execution context drained");
        }
        Err(err) => {
            post_event("error", &format!("sandbox setup failed: {err}"));
        }
    }

    OUTBOX.with(|slot| *slot.borrow_mut() = None);
}

/// Forward one event through the thread's mailbox, if any.
fn post_event(kind: &str, message: &str) {
    OUTBOX.with(|slot| {
        if let Some(mailbox) = slot.borrow().as_ref() {
            mailbox.post_event(kind, message);
        }
    });
}

fn install_globals(context: &mut Context) -> JsResult<()> {
    register_post(context)?;
    register_console(context)?;
    register_window(context)?;
    register_timers(context)?;
    Ok(())
}

/// `__sandbox_post(type, message)`: the single outbound primitive the
/// instrumentation shim posts through.
fn register_post(context: &mut Context) -> JsResult<()> {
    let post_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let kind = args
            .first()
            .map(|v| v.to_string(ctx))
            .transpose()?
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default();
        let message = args
            .get(1)
            .map(|v| v.to_string(ctx))
            .transpose()?
            .map(|s| s.to_std_string_escaped())
            .unwrap_or_default();
        post_event(&kind, &message);
        Ok(JsValue::undefined())
    });

    context.register_global_property(
        js_string!("__sandbox_post"),
        post_fn.to_js_function(context.realm()),
        Attribute::all(),
    )
}

/// Baseline `console` object so the shim's overrides have something to
/// assign onto. The natives already speak the wire contract, so output is
/// identical whether or not a script runs before the shim replaces them.
fn register_console(context: &mut Context) -> JsResult<()> {
    let log_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        post_event("log", &join_args(args, ctx)?);
        Ok(JsValue::undefined())
    });
    let error_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        post_event("error", &join_args(args, ctx)?);
        Ok(JsValue::undefined())
    });
    let warn_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        post_event("log", &join_args(args, ctx)?);
        Ok(JsValue::undefined())
    });

    let console = ObjectInitializer::new(context)
        .function(log_fn, js_string!("log"), 1)
        .function(error_fn, js_string!("error"), 1)
        .function(warn_fn, js_string!("warn"), 1)
        .build();

    context.register_global_property(js_string!("console"), console, Attribute::all())
}

/// `window` aliases the global object, so `window.onerror = f` installs a
/// plain global `onerror` that [`dispatch_uncaught`] can reach. There is no
/// `window.parent`, so the shim's iframe fallback stays dead in-context.
fn register_window(context: &mut Context) -> JsResult<()> {
    let global = context.global_object();
    context.register_global_property(js_string!("window"), global, Attribute::all())
}

/// Route an uncaught evaluation error through the installed global error
/// handler, falling back to a direct error post.
///
/// The message is handed over as a global rather than spliced into the
/// dispatch source, so arbitrary error text cannot break out of it.
fn dispatch_uncaught(context: &mut Context, message: &str) {
    let stored = context.register_global_property(
        js_string!("__sandbox_last_error"),
        boa_engine::JsString::from(message),
        Attribute::all(),
    );
    if stored.is_err() {
        post_event("error", message);
        return;
    }

    const DISPATCH: &str = r#"
        if (typeof onerror === "function") {
            onerror(__sandbox_last_error);
        } else {
            __sandbox_post("error", __sandbox_last_error);
        }
    "#;
    if context
        .eval(Source::from_bytes(DISPATCH.as_bytes()))
        .is_err()
    {
        post_event("error", message);
    }
}

fn join_args(args: &[JsValue], ctx: &mut Context) -> JsResult<String> {
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        parts.push(arg.to_string(ctx)?.to_std_string_escaped());
    }
    Ok(parts.join(" "))
}

/// Store a JS callback by assigning it to a unique global variable.
///
/// Boa cannot round-trip a function through source text, so the callback is
/// parked on a generated global (`__sandbox_cb_N`) and recalled later by
/// evaluating `__sandbox_cb_N()`. A string argument (the legacy
/// `setTimeout("code", ms)` form) is stored as-is.
fn extract_callback_source(arg: &JsValue, context: &mut Context) -> JsResult<String> {
    if arg.is_string() {
        return Ok(arg.to_string(context)?.to_std_string_escaped());
    }
    if arg.is_object() {
        let cb_id = NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed);
        let var_name = format!("__sandbox_cb_{cb_id}");
        context.register_global_property(
            boa_engine::JsString::from(var_name.as_str()),
            arg.clone(),
            Attribute::all(),
        )?;
        return Ok(format!("{var_name}()"));
    }
    Ok(arg.to_string(context)?.to_std_string_escaped())
}

fn register_timers(context: &mut Context) -> JsResult<()> {
    // setTimeout(callback, delay) -> timer_id
    let set_timeout_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let id = schedule_timer(args, ctx)?;
        Ok(JsValue::from(id))
    });

    // setInterval(callback, delay) -> timer_id. The run model has no wall
    // clock after the main pass, so an interval gets exactly one tick.
    let set_interval_fn = NativeFunction::from_copy_closure(|_this, args, ctx| {
        let id = schedule_timer(args, ctx)?;
        Ok(JsValue::from(id))
    });

    fn clear_timer(
        _this: &JsValue,
        args: &[JsValue],
        ctx: &mut Context,
    ) -> JsResult<JsValue> {
        let id = args
            .first()
            .map(|v| v.to_number(ctx))
            .transpose()?
            .map(|n| n as u32)
            .unwrap_or(0);
        TIMERS.with(|timers| timers.borrow_mut().retain(|t| t.id != id));
        Ok(JsValue::undefined())
    }

    context.register_global_property(
        js_string!("setTimeout"),
        set_timeout_fn.to_js_function(context.realm()),
        Attribute::all(),
    )?;
    context.register_global_property(
        js_string!("setInterval"),
        set_interval_fn.to_js_function(context.realm()),
        Attribute::all(),
    )?;
    context.register_global_property(
        js_string!("clearTimeout"),
        NativeFunction::from_fn_ptr(clear_timer).to_js_function(context.realm()),
        Attribute::all(),
    )?;
    context.register_global_property(
        js_string!("clearInterval"),
        NativeFunction::from_fn_ptr(clear_timer).to_js_function(context.realm()),
        Attribute::all(),
    )
}

fn schedule_timer(args: &[JsValue], ctx: &mut Context) -> JsResult<u32> {
    let callback_source = args
        .first()
        .map(|v| extract_callback_source(v, ctx))
        .transpose()?
        .unwrap_or_default();
    let delay_ms = args
        .get(1)
        .map(|v| v.to_number(ctx))
        .transpose()?
        .map(|n| n.max(0.0) as u64)
        .unwrap_or(0);

    let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
    TIMERS.with(|timers| {
        timers.borrow_mut().push(TimerEntry {
            id,
            callback_source,
            delay_ms,
        });
    });
    Ok(id)
}

/// Fast-forward deferred timers: there is no wall clock to wait on, so due
/// callbacks run immediately in `(delay, id)` order. Errors inside a
/// callback take the same uncaught-error path as any other script.
fn run_deferred_timers(context: &mut Context) {
    for _ in 0..MAX_TIMER_PASSES {
        let mut due: Vec<TimerEntry> =
            TIMERS.with(|timers| timers.borrow_mut().drain(..).collect());
        if due.is_empty() {
            break;
        }
        due.sort_by_key(|t| (t.delay_ms, t.id));

        for timer in due {
            if let Err(err) = context.eval(Source::from_bytes(timer.callback_source.as_bytes())) {
                dispatch_uncaught(context, &format!("{err}"));
            }
            let _ = context.run_jobs();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::SourceBundle;
    use crate::compose::compose;
    use crate::console::LogEntry;
    use crate::message::{Mailbox, parse_payload};
    use tokio::sync::mpsc;

    /// Compose and execute a bundle inline, returning the accepted entries.
    fn run_bundle(bundle: &SourceBundle) -> Vec<LogEntry> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        execute(&compose(bundle), Mailbox::new(tx, 1));

        let mut entries = Vec::new();
        while let Ok(envelope) = rx.try_recv() {
            assert_eq!(envelope.generation, 1);
            if let Some(entry) = parse_payload(&envelope.payload) {
                entries.push(entry);
            }
        }
        entries
    }

    fn js_bundle(js: &str) -> SourceBundle {
        SourceBundle {
            js: js.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn extracts_script_bodies_in_document_order() {
        let doc = "<html><script>one</script><p>x</p>\
                   <SCRIPT type=\"text/javascript\">two</SCRIPT></html>";
        assert_eq!(extract_scripts(doc), vec!["one", "two"]);
    }

    #[test]
    fn style_and_body_text_never_reach_the_evaluator() {
        let doc = "<style>p { color: red; }</style><p>console.log('nope')</p>";
        assert!(extract_scripts(doc).is_empty());
    }

    #[test]
    fn log_arguments_join_with_single_space() {
        let entries = run_bundle(&js_bundle(r#"console.log("a", "b");"#));
        assert_eq!(entries, vec![LogEntry::log("a b")]);
    }

    #[test]
    fn thrown_error_becomes_one_error_entry() {
        let entries = run_bundle(&js_bundle(r#"throw new Error("x");"#));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, crate::console::LogKind::Error);
        assert!(entries[0].message.contains("x"));
    }

    #[test]
    fn empty_bundle_produces_no_entries() {
        assert!(run_bundle(&SourceBundle::default()).is_empty());
    }

    #[test]
    fn script_embedded_in_html_field_uses_the_same_channel() {
        let bundle = SourceBundle {
            html: r#"<script>console.log("from html");</script>"#.to_string(),
            ..Default::default()
        };
        let entries = run_bundle(&bundle);
        assert!(entries.contains(&LogEntry::log("from html")));
    }

    #[test]
    fn timer_callback_runs_after_main_pass() {
        let entries = run_bundle(&js_bundle(
            r#"setTimeout(function () { console.log("later"); }, 10);
               console.log("now");"#,
        ));
        assert_eq!(entries, vec![LogEntry::log("now"), LogEntry::log("later")]);
    }

    #[test]
    fn error_in_timer_callback_is_reported_not_lost() {
        let entries = run_bundle(&js_bundle(
            r#"setTimeout(function () { throw new Error("deferred"); }, 0);"#,
        ));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, crate::console::LogKind::Error);
        assert!(entries[0].message.contains("deferred"));
    }

    #[test]
    fn cleared_timer_never_fires() {
        let entries = run_bundle(&js_bundle(
            r#"var id = setTimeout(function () { console.log("never"); }, 5);
               clearTimeout(id);
               console.log("done");"#,
        ));
        assert_eq!(entries, vec![LogEntry::log("done")]);
    }

    #[test]
    fn timers_fire_in_delay_then_id_order() {
        let entries = run_bundle(&js_bundle(
            r#"setTimeout(function () { console.log("slow"); }, 50);
               setTimeout(function () { console.log("fast"); }, 1);"#,
        ));
        assert_eq!(entries, vec![LogEntry::log("fast"), LogEntry::log("slow")]);
    }

    #[test]
    fn syntax_error_in_js_field_is_reported_as_error_entry() {
        // A parse failure makes the whole guarded script fail to compile;
        // the uncaught path still reports it.
        let entries = run_bundle(&js_bundle("this is not javascript ("));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, crate::console::LogKind::Error);
    }

    #[test]
    fn console_error_is_tagged_as_error() {
        let entries = run_bundle(&js_bundle(r#"console.error("bad", "news");"#));
        assert_eq!(entries, vec![LogEntry::error("bad news")]);
    }
}
