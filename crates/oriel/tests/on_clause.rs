//! Integration suite for the clause-callback bindings, driven end-to-end
//! through the scripted engine double.

use std::sync::{Arc, Mutex};

use oriel::{
    handler_fn, BridgeError, ClauseHandler, ClauseSubscription, OwnedTerm, Session, Term, TermVec,
};
use oriel_testkit::ScriptedEngine;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn wrap(engine: &ScriptedEngine) -> Session {
    // SAFETY: every test keeps the engine alive longer than the wrapper and
    // anything registered through it.
    unsafe { Session::from_raw(ScriptedEngine::api(), engine.session()) }
        .expect("live session must wrap")
}

/// What a handler saw for one event, reduced to owned data.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Observed {
    derivation: Option<usize>,
    deps: Vec<u32>,
    literals: Vec<String>,
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<Observed>>>,
}

impl Recorder {
    fn handler(&self) -> RecordingHandler {
        RecordingHandler {
            events: self.events.clone(),
        }
    }

    fn snapshot(&self) -> Vec<Observed> {
        self.events.lock().unwrap().clone()
    }
}

struct RecordingHandler {
    events: Arc<Mutex<Vec<Observed>>>,
}

impl ClauseHandler for RecordingHandler {
    fn on_clause(&mut self, derivation: Option<Term<'_>>, deps: &[u32], literals: TermVec<'_>) {
        self.events.lock().unwrap().push(Observed {
            derivation: derivation.map(|term| term.raw() as usize),
            deps: deps.to_vec(),
            literals: literals.iter().map(|term| term.text()).collect(),
        });
    }
}

#[test]
fn delivers_every_event_in_order() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(Some("(res p)"), &[0], &["p", "q"]);
    engine.push_inference(None, &[1, 0], &["r"]);
    engine.push_inference(Some("(res q)"), &[], &["p", "q", "r"]);
    let session = wrap(&engine);
    let recorder = Recorder::default();
    let mut subscription =
        ClauseSubscription::new(&session, recorder.handler()).expect("registration");

    engine.solve();

    let observed = recorder.snapshot();
    assert_eq!(observed.len(), 3);
    assert_eq!(
        observed[0].literals,
        vec!["p".to_string(), "q".to_string()]
    );
    assert_eq!(observed[1], Observed {
        derivation: None,
        deps: vec![1, 0],
        literals: vec!["r".to_string()],
    });
    assert_eq!(
        observed[2].literals,
        vec!["p".to_string(), "q".to_string(), "r".to_string()]
    );
    subscription.close();
}

#[test]
fn teardown_is_idempotent() {
    init_logging();
    let engine = ScriptedEngine::new();
    let session = wrap(&engine);
    let mut subscription =
        ClauseSubscription::new(&session, Recorder::default().handler()).expect("registration");
    assert!(subscription.is_active());

    subscription.close();
    subscription.close();
    subscription.close();

    assert!(!subscription.is_active());
    assert_eq!(subscription.registration_id(), 0);
    assert_eq!(engine.live_registrations(), 0);
}

#[test]
fn no_events_after_teardown() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(None, &[], &["p"]);
    let session = wrap(&engine);
    let recorder = Recorder::default();
    let mut subscription =
        ClauseSubscription::new(&session, recorder.handler()).expect("registration");

    engine.solve();
    assert_eq!(recorder.snapshot().len(), 1);

    subscription.close();
    engine.solve();
    engine.solve();
    assert_eq!(recorder.snapshot().len(), 1);
}

#[test]
fn derivation_maps_to_none_or_the_delivered_handle() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(None, &[], &["p"]);
    engine.push_inference(Some("(rup 1 2)"), &[], &["q"]);
    let session = wrap(&engine);
    let recorder = Recorder::default();
    let _subscription =
        ClauseSubscription::new(&session, recorder.handler()).expect("registration");

    engine.solve();

    let observed = recorder.snapshot();
    assert_eq!(observed[0].derivation, None);
    let delivered = engine.derivation_handle(1).expect("second event has a derivation");
    assert_eq!(observed[1].derivation, Some(delivered as usize));
}

#[test]
fn dependency_indices_are_forwarded_verbatim() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(None, &[2, 0, 5], &["p"]);
    let session = wrap(&engine);
    let recorder = Recorder::default();
    let _subscription =
        ClauseSubscription::new(&session, recorder.handler()).expect("registration");

    engine.solve();

    assert_eq!(recorder.snapshot()[0].deps, vec![2, 0, 5]);
}

#[test]
fn empty_dependency_list_arrives_as_an_empty_slice() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(None, &[], &["p", "q"]);
    let session = wrap(&engine);
    let recorder = Recorder::default();
    let _subscription =
        ClauseSubscription::new(&session, recorder.handler()).expect("registration");

    engine.solve();

    assert_eq!(recorder.snapshot()[0].deps, Vec::<u32>::new());
}

#[test]
fn three_inference_solve_end_to_end() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(Some("(res p)"), &[0, 1], &["p", "q"]);
    engine.push_inference(None, &[2], &["r"]);
    engine.push_inference(Some("(rup 3)"), &[], &["p", "r"]);
    let session = wrap(&engine);

    let log: Arc<Mutex<Vec<(bool, usize, usize)>>> = Arc::default();
    let sink = log.clone();
    let mut subscription = ClauseSubscription::new(
        &session,
        handler_fn(
            move |derivation: Option<Term<'_>>, deps: &[u32], literals: TermVec<'_>| {
                sink.lock()
                    .unwrap()
                    .push((derivation.is_some(), deps.len(), literals.len()));
            },
        ),
    )
    .expect("registration");

    engine.solve();
    assert_eq!(
        log.lock().unwrap().clone(),
        vec![(true, 2, 2), (false, 1, 1), (true, 0, 2)]
    );

    subscription.close();
    engine.solve();
    assert_eq!(log.lock().unwrap().len(), 3);
}

#[test]
fn registration_fails_on_a_finalized_session() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.finalize();
    let session = wrap(&engine);

    let err = ClauseSubscription::new(&session, Recorder::default().handler())
        .expect_err("finalized session must refuse registration");

    assert_eq!(err, BridgeError::Registration);
    assert_eq!(engine.live_registrations(), 0);
}

#[test]
fn duplicated_terms_survive_the_callback() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(Some("(res p)"), &[], &["p", "q"]);
    let session = wrap(&engine);

    struct KeepFirstLiteral {
        kept: Arc<Mutex<Vec<OwnedTerm>>>,
    }
    impl ClauseHandler for KeepFirstLiteral {
        fn on_clause(&mut self, _derivation: Option<Term<'_>>, _deps: &[u32], literals: TermVec<'_>) {
            if let Some(first) = literals.get(0) {
                self.kept.lock().unwrap().push(first.duplicate());
            }
        }
    }

    let kept: Arc<Mutex<Vec<OwnedTerm>>> = Arc::default();
    let mut subscription = ClauseSubscription::new(
        &session,
        KeepFirstLiteral { kept: kept.clone() },
    )
    .expect("registration");

    engine.solve();
    subscription.close();

    assert_eq!(engine.live_duplicates(), 1);
    let retained = kept.lock().unwrap().pop().expect("one literal retained");
    assert_eq!(retained.text(), "p");
    drop(retained);
    assert_eq!(engine.live_duplicates(), 0);
}

#[test]
fn panicking_handler_loses_only_its_own_event() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(None, &[], &["p"]);
    engine.push_inference(None, &[], &["q"]);
    let session = wrap(&engine);

    struct PanicsOnFirst {
        seen: usize,
        literals: Arc<Mutex<Vec<String>>>,
    }
    impl ClauseHandler for PanicsOnFirst {
        fn on_clause(&mut self, _derivation: Option<Term<'_>>, _deps: &[u32], literals: TermVec<'_>) {
            self.seen += 1;
            if self.seen == 1 {
                panic!("observer failure injected by test");
            }
            if let Some(first) = literals.get(0) {
                self.literals.lock().unwrap().push(first.text());
            }
        }
    }

    let literals: Arc<Mutex<Vec<String>>> = Arc::default();
    let _subscription = ClauseSubscription::new(
        &session,
        PanicsOnFirst {
            seen: 0,
            literals: literals.clone(),
        },
    )
    .expect("registration");

    engine.solve();

    assert_eq!(literals.lock().unwrap().clone(), vec!["q".to_string()]);
}

#[test]
fn dropping_a_subscription_unregisters_it() {
    init_logging();
    let engine = ScriptedEngine::new();
    let session = wrap(&engine);
    {
        let _subscription = ClauseSubscription::new(&session, Recorder::default().handler())
            .expect("registration");
        assert_eq!(engine.live_registrations(), 1);
    }
    assert_eq!(engine.live_registrations(), 0);
}

#[test]
fn every_live_subscription_observes_each_event() {
    init_logging();
    let engine = ScriptedEngine::new();
    engine.push_inference(None, &[7], &["p"]);
    let session = wrap(&engine);
    let first = Recorder::default();
    let second = Recorder::default();
    let _a = ClauseSubscription::new(&session, first.handler()).expect("registration");
    let _b = ClauseSubscription::new(&session, second.handler()).expect("registration");

    engine.solve();

    assert_eq!(first.snapshot().len(), 1);
    assert_eq!(second.snapshot().len(), 1);
    assert_eq!(first.snapshot()[0].deps, vec![7]);
    assert_eq!(second.snapshot()[0].deps, vec![7]);
}

#[test]
fn teardown_races_with_a_live_solve() {
    init_logging();
    let engine = ScriptedEngine::new();
    for index in 0..100 {
        engine.push_inference(None, &[index], &["p"]);
    }
    let session = wrap(&engine);
    let recorder = Recorder::default();
    let mut subscription =
        ClauseSubscription::new(&session, recorder.handler()).expect("registration");

    std::thread::scope(|scope| {
        let solver = scope.spawn(|| engine.solve());
        std::thread::sleep(std::time::Duration::from_micros(50));
        subscription.close();
        solver.join().expect("solver thread");
    });

    assert_eq!(engine.live_registrations(), 0);
    assert!(recorder.snapshot().len() <= 100);
}
