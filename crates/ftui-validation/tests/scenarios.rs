//! End-to-end scenarios across helpers, elements, the dispatcher and the
//! tracing output.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use ftui_validation::{
    CollectionConstraint, Constraint, DiagnosticView, Dispatcher, ListConstraint, ListEvent,
    ListValidationHelper, MapConstraint, MapValidationHelper, Observable, ObservableMap,
    ObservableSet, ObservableVec, SetConstraint, SetValidationHelper, ValidationHelper,
    ValidationResult, ValidationState, ValidationTask,
};
use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

// ── List scenario ────────────────────────────────────────────────────

#[test]
fn list_with_empty_string_commits_only_after_removal() {
    let short: ListConstraint<String, String> =
        CollectionConstraint::Collection(Constraint::immediate(|v: &Vec<String>| {
            ValidationResult::check(v.len() < 10)
        }));
    let non_empty: ListConstraint<String, String> =
        CollectionConstraint::Element(Constraint::immediate(|s: &String| {
            if s.is_empty() {
                ValidationResult::invalid_with("must not be empty".to_string())
            } else {
                ValidationResult::valid()
            }
        }));

    let source = ObservableVec::new(strings(&["ab", ""]));
    let helper = ListValidationHelper::new(&source, vec![short, non_empty]);
    assert_eq!(helper.state(), ValidationState::Invalid);
    assert!(helper.diagnostics().is_empty(DiagnosticView::All));

    let failing = helper.element(1).expect("element 1");
    assert!(failing.is_invalid());
    assert_eq!(
        failing.diagnostics().values(DiagnosticView::Invalid),
        vec!["must not be empty".to_string()]
    );
    assert!(helper.element(0).is_some_and(|e| e.is_valid()));

    let constrained = helper.constrained_value();
    assert!(constrained.is_empty());
    let snapshots: Rc<RefCell<Vec<Vec<String>>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&snapshots);
    let c = constrained.clone();
    let _sub = constrained.subscribe(move |_: &ListEvent<String>| s.borrow_mut().push(c.to_vec()));

    source.remove(1);
    assert_eq!(helper.state(), ValidationState::Valid);
    assert!(failing.is_disposed());
    assert_eq!(*snapshots.borrow(), vec![strings(&["ab"])]);
    assert_eq!(constrained.to_vec(), strings(&["ab"]));
}

// ── Set and map scenarios ────────────────────────────────────────────

#[test]
fn set_commits_once_the_invalid_member_leaves() {
    let short: SetConstraint<String, String> =
        CollectionConstraint::Element(Constraint::immediate(|s: &String| {
            ValidationResult::check(s.len() <= 3)
        }));
    let source = ObservableSet::new(strings(&["ab"]).into_iter().collect());
    let helper = SetValidationHelper::new(&source, vec![short]);
    let constrained = helper.constrained_value();
    assert_eq!(constrained.len(), 1);

    let commits = Rc::new(Cell::new(0));
    let c = Rc::clone(&commits);
    let _sub = constrained.subscribe(move |_| c.set(c.get() + 1));

    source.insert("toolong".to_string());
    source.insert("cd".to_string());
    assert!(helper.is_invalid());
    assert_eq!(commits.get(), 0);
    assert!(!constrained.contains(&"cd".to_string()));

    source.remove(&"toolong".to_string());
    assert!(helper.is_valid());
    assert_eq!(commits.get(), 1);
    let expected: AHashSet<String> = strings(&["ab", "cd"]).into_iter().collect();
    assert_eq!(constrained.snapshot(), expected);
}

#[test]
fn set_member_removed_and_readded_in_one_event_gets_a_new_element() {
    let even: SetConstraint<i32, String> =
        CollectionConstraint::Element(Constraint::immediate(|v: &i32| {
            ValidationResult::check(v % 2 == 0)
        }));
    let source = ObservableSet::new([2, 4].into_iter().collect());
    let helper = SetValidationHelper::new(&source, vec![even]);
    let before = helper.element(&2).expect("element for 2");

    let commits = Rc::new(Cell::new(0));
    let c = Rc::clone(&commits);
    let _sub = helper.constrained_value().subscribe(move |_| c.set(c.get() + 1));

    source.exchange(vec![2], vec![2]);
    let after = helper.element(&2).expect("element for 2");
    assert!(before.is_disposed());
    assert!(!after.ptr_eq(&before));
    assert!(after.is_valid());
    assert_eq!(commits.get(), 0);
}

#[test]
fn map_overwrite_with_invalid_value_holds_previous_commit() {
    let positive: MapConstraint<&'static str, i32, String> =
        CollectionConstraint::Element(Constraint::immediate(|v: &i32| {
            if *v > 0 {
                ValidationResult::valid()
            } else {
                ValidationResult::invalid_with(format!("{v} is not positive"))
            }
        }));
    let source = ObservableMap::new([("a", 1), ("b", 2)].into_iter().collect());
    let helper = MapValidationHelper::new(&source, vec![positive]);
    let constrained = helper.constrained_value();
    let first = helper.element(&"a").expect("element for a");

    source.insert("a", -5);
    assert!(first.is_disposed());
    let replaced = helper.element(&"a").expect("element for a");
    assert!(replaced.is_invalid());
    assert_eq!(
        replaced.diagnostics().values(DiagnosticView::Invalid),
        vec!["-5 is not positive".to_string()]
    );
    assert_eq!(constrained.get(&"a"), Some(1));

    source.insert("c", 3);
    assert_eq!(constrained.get(&"c"), None);

    source.remove(&"a");
    assert!(helper.is_valid());
    let expected: AHashMap<&'static str, i32> = [("b", 2), ("c", 3)].into_iter().collect();
    assert_eq!(constrained.snapshot(), expected);
}

// ── Serialized coalescing ────────────────────────────────────────────

#[test]
fn burst_while_busy_validates_first_and_last_only() {
    let dispatcher = Dispatcher::new();
    let seen: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
    let completers = Rc::new(RefCell::new(Vec::new()));
    let (s, c) = (Rc::clone(&seen), Rc::clone(&completers));
    let slow = Constraint::new(move |v: &i32| {
        s.borrow_mut().push(*v);
        let (task, completer) = ValidationTask::<String>::pending();
        c.borrow_mut().push(completer);
        task
    })
    .complete_on(&dispatcher);

    let source = Observable::new(0);
    let helper = ValidationHelper::with_config(
        &source,
        vec![slow],
        ftui_validation::ValidationConfig::assume_valid(),
    );
    for v in 1..=5 {
        source.set(v);
    }
    assert_eq!(*seen.borrow(), vec![1]);

    loop {
        let next = completers.borrow_mut().pop();
        let Some(completer) = next else { break };
        completer.complete(ValidationResult::valid());
        dispatcher.run_pending();
    }
    assert_eq!(*seen.borrow(), vec![1, 5]);
    assert!(helper.is_valid());
    assert_eq!(helper.constrained_value().get(), 5);
}

// ── Defects ──────────────────────────────────────────────────────────

#[test]
fn failed_async_run_still_folds_sibling_results() {
    let dispatcher = Dispatcher::new();
    let completers = Rc::new(RefCell::new(Vec::new()));
    let c = Rc::clone(&completers);
    let bad = Constraint::immediate(|_: &i32| ValidationResult::invalid_with("bad".to_string()));
    let remote = Constraint::new(move |_: &i32| {
        let (task, completer) = ValidationTask::<String>::pending();
        c.borrow_mut().push(completer);
        task
    })
    .named("remote-lookup")
    .complete_on(&dispatcher);

    let source = Observable::new(0);
    let helper = ValidationHelper::new(&source, vec![bad, remote]);
    assert!(helper.is_validating());

    let next = completers.borrow_mut().pop();
    next.expect("remote run in flight").fail("lookup service unavailable");
    assert_eq!(dispatcher.run_pending(), 1);

    assert!(!helper.is_validating());
    assert_eq!(helper.state(), ValidationState::Invalid);
    assert!(helper.is_invalid());
    assert_eq!(
        helper.diagnostics().values(DiagnosticView::Invalid),
        vec!["bad".to_string()]
    );
}

// ── Worker threads ───────────────────────────────────────────────────

#[test]
fn worker_thread_results_converge_on_latest_value() {
    let dispatcher = Dispatcher::new();
    let released = Arc::new(AtomicBool::new(false));
    let seen: Rc<RefCell<Vec<i32>>> = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    let gate = Arc::clone(&released);
    let remote = Constraint::new(move |v: &i32| {
        s.borrow_mut().push(*v);
        let (task, completer) = ValidationTask::<String>::pending();
        let value = *v;
        let gate = Arc::clone(&gate);
        thread::spawn(move || {
            while !gate.load(Ordering::Acquire) {
                thread::sleep(Duration::from_millis(1));
            }
            if value % 2 == 0 {
                completer.complete(ValidationResult::valid());
            } else {
                completer.complete(ValidationResult::invalid_with(format!("{value} is odd")));
            }
        });
        task
    })
    .named("remote-even")
    .complete_on(&dispatcher);

    let source = Observable::new(0);
    let helper = ValidationHelper::new(&source, vec![remote]);
    assert!(helper.is_validating());
    for v in 1..=6 {
        source.set(v);
    }
    released.store(true, Ordering::Release);

    assert!(dispatcher.run_until_idle(Duration::from_secs(5)));
    assert_eq!(*seen.borrow(), vec![0, 6]);
    assert!(!helper.is_validating());
    assert!(helper.is_valid());
    assert_eq!(helper.constrained_value().get(), 6);
}

// ── Dependencies ─────────────────────────────────────────────────────

#[test]
fn shared_dependency_is_registered_once() {
    let limit = Observable::new(10);
    let (a, b) = (limit.clone(), limit.clone());
    let below = Constraint::immediate(move |v: &i32| ValidationResult::<String>::check(*v < a.get()))
        .depends_on(limit.as_dependency());
    let far_below =
        Constraint::immediate(move |v: &i32| ValidationResult::<String>::check(*v < b.get() - 5))
            .depends_on(limit.as_dependency());

    let source = Observable::new(3);
    let helper = ValidationHelper::new(&source, vec![below, far_below]);
    assert_eq!(limit.subscriber_count(), 1);
    assert!(helper.is_valid());

    limit.set(8);
    assert!(helper.is_invalid());
    drop(helper);
    limit.set(20);
    assert_eq!(limit.subscriber_count(), 0);
}

// ── Misuse ───────────────────────────────────────────────────────────

#[test]
#[should_panic(expected = "reentrantly")]
fn mutating_the_source_from_a_commit_is_fatal() {
    let source = Observable::new(1);
    let helper = ValidationHelper::new(
        &source,
        vec![Constraint::immediate(|v: &i32| ValidationResult::<String>::check(*v > 0))],
    );
    let echo = source.clone();
    let _sub = helper.constrained_value().subscribe(move |v| echo.set(*v + 1));
    source.set(2);
}

// ── Tracing ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Captured {
    messages: Vec<String>,
    constraints: Vec<String>,
}

struct CaptureLayer {
    state: Arc<Mutex<Captured>>,
}

impl<S> Layer<S> for CaptureLayer
where
    S: Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        struct Fields {
            message: Option<String>,
            constraint: Option<String>,
        }
        impl tracing::field::Visit for Fields {
            fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
                match field.name() {
                    "message" => self.message = Some(value.to_string()),
                    "constraint" => self.constraint = Some(value.to_string()),
                    _ => {}
                }
            }

            fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
                let text = format!("{value:?}").trim_matches('"').to_string();
                match field.name() {
                    "message" => self.message = Some(text),
                    "constraint" => self.constraint = Some(text),
                    _ => {}
                }
            }
        }
        let mut fields = Fields {
            message: None,
            constraint: None,
        };
        event.record(&mut fields);
        let mut state = self.state.lock().expect("capture lock");
        if let Some(message) = fields.message {
            state.messages.push(message);
        }
        if let Some(constraint) = fields.constraint {
            state.constraints.push(constraint);
        }
    }
}

#[test]
fn panicking_constraint_is_logged_and_treated_as_no_result() {
    let state = Arc::new(Mutex::new(Captured::default()));
    let subscriber = tracing_subscriber::registry().with(CaptureLayer {
        state: Arc::clone(&state),
    });
    let _guard = tracing::subscriber::set_default(subscriber);

    let source = Observable::new(1);
    let broken = Constraint::immediate(|v: &i32| -> ValidationResult<String> {
        if *v > 1 {
            panic!("lookup table missing");
        }
        ValidationResult::valid()
    })
    .named("broken-lookup");
    let helper = ValidationHelper::new(&source, vec![broken]);
    assert!(helper.is_valid());
    source.set(0);
    assert_eq!(helper.constrained_value().get(), 0);

    source.set(2);
    assert!(!helper.is_validating());
    assert!(!helper.is_invalid());
    assert_eq!(helper.state(), ValidationState::Unknown);
    assert_eq!(helper.constrained_value().get(), 0);

    let captured = state.lock().expect("capture lock");
    assert!(
        captured.messages.iter().any(|m| m == "validation.defect"),
        "expected validation.defect, saw {:?}",
        captured.messages
    );
    assert!(captured.constraints.iter().any(|c| c == "broken-lookup"));
    assert!(captured.messages.iter().any(|m| m == "validation.commit"));
}
