//! Scheduler behavior against the scripted transport.
//!
//! # Design
//! Every test drives a real `Dispatcher` over `ScriptedTransport`, whose
//! virtual clock makes completion order a pure function of the scripted
//! latencies. Callbacks record what they saw into shared cells; the
//! transport's own log is checked for window and conservation invariants.

use std::cell::RefCell;
use std::rc::Rc;

use rolling_core::mock::{Script, ScriptedTransport};
use rolling_core::{
    CallbackError, DispatchError, Dispatcher, DispatcherConfig, FormBody, OptionKey, OptionValue,
    Phase, RequestDescriptor, Transport, TransportErrorKind, TransportMeta, TransportOptions,
};

type Seen = Rc<RefCell<Vec<String>>>;

fn target(i: usize) -> String {
    format!("http://mock.test/{i}")
}

/// Seven endpoints, completing out of enqueue order under window 3:
/// 2, 3, 4, 5, 7, 6, 1.
fn seven_endpoints() -> ScriptedTransport {
    let latencies = [10, 3, 4, 1, 2, 5, 1];
    latencies
        .iter()
        .enumerate()
        .fold(ScriptedTransport::new(), |transport, (i, ticks)| {
            transport.script(target(i + 1), Script::ok(format!("body {}", i + 1)).after(*ticks))
        })
}

fn dispatcher(transport: ScriptedTransport) -> Dispatcher<ScriptedTransport> {
    Dispatcher::new(transport, DispatcherConfig::default()).unwrap()
}

fn recording_callback(
    seen: &Seen,
) -> impl FnMut(&[u8], &TransportMeta, &RequestDescriptor) -> Result<(), CallbackError> + 'static {
    let seen = seen.clone();
    move |_: &[u8], _: &TransportMeta, request: &RequestDescriptor| {
        seen.borrow_mut().push(request.target().to_string());
        Ok(())
    }
}

fn form(pairs: &[(&str, &str)]) -> FormBody {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

#[test]
fn seven_requests_window_three_follow_scripted_completion_order() {
    let mut d = dispatcher(seven_endpoints());
    let seen: Seen = Rc::default();
    d.set_callback(recording_callback(&seen));
    for i in 1..=7 {
        d.enqueue_get(target(i), None, None).unwrap();
    }

    d.run(Some(3)).unwrap();

    let transport = d.transport();
    assert_eq!(transport.waits()[0].in_flight, 3, "window full at first wait");
    assert_eq!(transport.max_in_flight(), 3);
    let expected: Vec<String> = [2, 3, 4, 5, 7, 6, 1].into_iter().map(target).collect();
    assert_eq!(*seen.borrow(), expected);
    let started: Vec<String> = transport.started().iter().map(|r| r.target.clone()).collect();
    assert_eq!(started, (1..=7).map(target).collect::<Vec<_>>(), "starts drain FIFO");
    assert_eq!(d.phase(), Phase::Done);
    assert_eq!(d.pending(), 0);
}

#[test]
fn every_request_completes_for_every_window() {
    for n in 2..=8 {
        for w in 1..=n {
            let mut d = dispatcher(ScriptedTransport::new());
            let count = Rc::new(RefCell::new(0usize));
            let counter = count.clone();
            d.set_callback(move |_, _, _| {
                *counter.borrow_mut() += 1;
                Ok(())
            });
            for i in 0..n {
                d.enqueue_get(target(i), None, None).unwrap();
            }

            d.run(Some(w)).unwrap();

            assert_eq!(*count.borrow(), n, "n={n} w={w}");
            assert_eq!(d.transport().max_in_flight(), w, "n={n} w={w}");
            assert_eq!(d.transport().started().len(), n);
        }
    }
}

#[test]
fn window_and_conservation_hold_at_every_wait() {
    let n = 7;
    let window = 3;
    let mut d = dispatcher(seven_endpoints());
    for i in 1..=n {
        d.enqueue_get(target(i), None, None).unwrap();
    }

    d.run(Some(window)).unwrap();

    for snapshot in d.transport().waits() {
        assert!(snapshot.in_flight <= window, "{snapshot:?}");
        let pending = n - snapshot.started;
        assert_eq!(snapshot.in_flight + pending + snapshot.completed, n, "{snapshot:?}");
    }
}

#[test]
fn window_larger_than_queue_is_clamped() {
    let mut d = dispatcher(ScriptedTransport::new());
    for i in 0..4 {
        d.enqueue_get(target(i), None, None).unwrap();
    }
    d.run(Some(10)).unwrap();
    assert_eq!(d.transport().waits()[0].in_flight, 4);
}

#[test]
fn zero_window_runs_one_at_a_time() {
    let mut d = dispatcher(ScriptedTransport::new());
    for i in 0..3 {
        d.enqueue_get(target(i), None, None).unwrap();
    }
    d.run(Some(0)).unwrap();
    assert_eq!(d.transport().max_in_flight(), 1);
    assert_eq!(d.transport().started().len(), 3);
}

#[test]
fn configured_window_is_the_default() {
    let config = DispatcherConfig {
        window_size: 2,
        ..DispatcherConfig::default()
    };
    let mut d = Dispatcher::new(ScriptedTransport::new(), config).unwrap();
    for i in 0..6 {
        d.enqueue_get(target(i), None, None).unwrap();
    }
    d.run(None).unwrap();
    assert_eq!(d.transport().max_in_flight(), 2);
}

#[test]
fn empty_queue_is_a_no_op() {
    let mut d = dispatcher(ScriptedTransport::new());
    d.run(None).unwrap();
    assert!(d.transport().waits().is_empty());
    assert!(d.transport().performed().is_empty());
    assert_eq!(d.phase(), Phase::Idle);
}

#[test]
fn single_request_takes_the_synchronous_path() {
    let mut d = dispatcher(ScriptedTransport::new().script(target(1), Script::ok("only")));
    let seen: Seen = Rc::default();
    d.set_callback(recording_callback(&seen));
    d.enqueue_get(target(1), None, None).unwrap();

    d.run(None).unwrap();

    assert_eq!(d.transport().performed().len(), 1);
    assert!(d.transport().started().is_empty());
    assert!(d.transport().waits().is_empty());
    assert_eq!(*seen.borrow(), vec![target(1)]);
    assert_eq!(d.phase(), Phase::Done);
}

#[test]
fn fast_path_and_multiplexed_path_deliver_identical_content() {
    type Captured = Rc<RefCell<Vec<(Vec<u8>, TransportMeta, String)>>>;
    let script = Script::status(201, "created").after(4);

    let capture = |captured: &Captured| {
        let captured = captured.clone();
        move |body: &[u8],
              meta: &TransportMeta,
              request: &RequestDescriptor|
              -> Result<(), CallbackError> {
            captured
                .borrow_mut()
                .push((body.to_vec(), meta.clone(), request.target().to_string()));
            Ok(())
        }
    };

    let single: Captured = Rc::default();
    let mut d = dispatcher(ScriptedTransport::new().script(target(1), script.clone()));
    d.set_callback(capture(&single));
    d.run_single(RequestDescriptor::get(target(1)).unwrap()).unwrap();

    let via_run: Captured = Rc::default();
    let mut d = dispatcher(ScriptedTransport::new().script(target(1), script.clone()));
    d.set_callback(capture(&via_run));
    d.enqueue_get(target(1), None, None).unwrap();
    d.run(None).unwrap();

    let rolled: Captured = Rc::default();
    let mut d = dispatcher(
        ScriptedTransport::new()
            .script(target(1), script)
            .script(target(2), Script::ok("other").after(9)),
    );
    d.set_callback(capture(&rolled));
    d.enqueue_get(target(1), None, None).unwrap();
    d.enqueue_get(target(2), None, None).unwrap();
    d.run(None).unwrap();

    assert_eq!(single.borrow()[0], via_run.borrow()[0]);
    assert_eq!(single.borrow()[0], rolled.borrow()[0]);
    assert_eq!(single.borrow()[0].1.status, 201);
}

#[test]
fn transport_failure_is_delivered_not_raised() {
    let mut d = dispatcher(ScriptedTransport::new().script(
        target(2),
        Script::failure(TransportErrorKind::Connect, "connection refused"),
    ));
    let failures = Rc::new(RefCell::new(Vec::new()));
    let sink = failures.clone();
    d.set_callback(move |body, meta, request| {
        if !meta.is_ok() {
            assert!(body.is_empty());
            sink.borrow_mut()
                .push((request.target().to_string(), meta.error_code, meta.error_message.clone()));
        }
        Ok(())
    });
    for i in 1..=3 {
        d.enqueue_get(target(i), None, None).unwrap();
    }

    d.run(None).unwrap();

    assert_eq!(
        *failures.borrow(),
        vec![(target(2), 7, "connection refused".to_string())]
    );
    assert_eq!(d.transport().started().len(), 3);
}

#[test]
fn fault_drains_in_flight_and_never_starts_pending() {
    let mut d = dispatcher(seven_endpoints());
    let seen: Seen = Rc::default();
    let record = seen.clone();
    d.set_callback(move |_, _, request| {
        record.borrow_mut().push(request.target().to_string());
        if request.target() == target(3) {
            return Err(CallbackError::fatal("cannot store response"));
        }
        Ok(())
    });
    for i in 1..=7 {
        d.enqueue_get(target(i), None, None).unwrap();
    }

    let err = d.run(Some(3)).unwrap_err();

    match err {
        DispatchError::Callback { target: failed, source } => {
            assert_eq!(failed, target(3));
            assert_eq!(source.to_string(), "cannot store response");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    // 2 completes first and is replaced by 4; 3 faults; 4 and 1 still drain.
    let started: Vec<String> = d.transport().started().iter().map(|r| r.target.clone()).collect();
    assert_eq!(started, (1..=4).map(target).collect::<Vec<_>>());
    assert_eq!(*seen.borrow(), vec![target(2), target(3), target(4), target(1)]);
    assert_eq!(d.transport().in_flight(), 0);
    assert_eq!(d.pending(), 0);
    assert_eq!(d.phase(), Phase::Faulted);
}

#[test]
fn first_fault_wins_over_faults_raised_while_draining() {
    let mut d = dispatcher(seven_endpoints());
    d.set_callback(|_, _, request| {
        Err(CallbackError::fatal(format!("failed {}", request.target())))
    });
    for i in 1..=7 {
        d.enqueue_get(target(i), None, None).unwrap();
    }

    let err = d.run(Some(3)).unwrap_err();

    match err {
        DispatchError::Callback { target: failed, .. } => assert_eq!(failed, target(2)),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(d.transport().started().len(), 3);
    assert_eq!(d.transport().completed().len(), 3);
}

#[test]
fn panicking_callback_faults_the_run() {
    let mut d = dispatcher(seven_endpoints());
    d.set_callback(|_, _, request| {
        if request.target() == target(2) {
            panic!("callback bug");
        }
        Ok(())
    });
    for i in 1..=7 {
        d.enqueue_get(target(i), None, None).unwrap();
    }

    let err = d.run(Some(3)).unwrap_err();

    assert!(matches!(
        err,
        DispatchError::CallbackPanicked { ref message, .. } if message == "callback bug"
    ));
    assert_eq!(d.transport().started().len(), 3);
    assert_eq!(d.transport().completed().len(), 3);
}

#[test]
fn recoverable_callback_error_keeps_scheduling() {
    let mut d = dispatcher(seven_endpoints());
    d.set_callback(|_, _, _| Err(CallbackError::recoverable("logged and ignored")));
    for i in 1..=7 {
        d.enqueue_get(target(i), None, None).unwrap();
    }
    d.run(Some(3)).unwrap();
    assert_eq!(d.transport().completed().len(), 7);
}

#[test]
fn fault_in_single_request_is_returned() {
    let mut d = dispatcher(ScriptedTransport::new());
    d.enqueue(
        RequestDescriptor::get(target(1))
            .unwrap()
            .with_callback(|_, _, _| Err(std::io::Error::other("write failed").into())),
    );
    let err = d.run(None).unwrap_err();
    assert!(matches!(err, DispatchError::Callback { .. }));
    assert_eq!(d.phase(), Phase::Faulted);
}

#[test]
fn per_request_callback_runs_before_global() {
    let mut d = dispatcher(ScriptedTransport::new());
    let order: Seen = Rc::default();
    let global = order.clone();
    d.set_callback(move |_, _, request| {
        global.borrow_mut().push(format!("global {}", request.target()));
        Ok(())
    });
    for i in 1..=2 {
        let local = order.clone();
        d.enqueue(RequestDescriptor::get(target(i)).unwrap().with_callback(move |_, _, request| {
            local.borrow_mut().push(format!("request {}", request.target()));
            Ok(())
        }));
    }

    d.run(None).unwrap();

    assert_eq!(
        *order.borrow(),
        vec![
            format!("request {}", target(1)),
            format!("global {}", target(1)),
            format!("request {}", target(2)),
            format!("global {}", target(2)),
        ]
    );
}

#[test]
fn default_headers_are_sent_unless_request_brings_its_own() {
    let config = DispatcherConfig {
        headers: vec!["X-Default: yes".to_string()],
        ..DispatcherConfig::default()
    };
    let mut d = Dispatcher::new(ScriptedTransport::new(), config).unwrap();
    d.enqueue_post(target(1), form(&[("a", "1")]), None, None).unwrap();
    d.enqueue_post(target(2), form(&[("a", "1")]), Some(vec!["X-Own: 1".to_string()]), None)
        .unwrap();

    d.run(None).unwrap();

    let started = d.transport().started();
    assert_eq!(started[0].headers, vec!["X-Default: yes".to_string()]);
    assert_eq!(started[0].body.as_ref().unwrap()["a"], "1");
    assert_eq!(started[1].headers, vec!["X-Own: 1".to_string()]);
}

#[test]
fn per_request_options_beat_dispatcher_options() {
    let config = DispatcherConfig {
        options: TransportOptions::new()
            .with(OptionKey::Timeout, OptionValue::Seconds(10.0))
            .with(OptionKey::VerifyPeer, OptionValue::Flag(true)),
        ..DispatcherConfig::default()
    };
    let mut d = Dispatcher::new(ScriptedTransport::new(), config).unwrap();
    d.enqueue_get(
        target(1),
        None,
        Some(TransportOptions::new().with(OptionKey::Timeout, OptionValue::Seconds(1.0))),
    )
    .unwrap();
    d.enqueue_get(target(2), None, None).unwrap();

    d.run(None).unwrap();

    let started = d.transport().started();
    assert_eq!(started[0].options.get(OptionKey::Timeout), Some(&OptionValue::Seconds(1.0)));
    assert_eq!(started[0].options.flag(OptionKey::VerifyPeer), Some(true));
    assert_eq!(started[1].options.get(OptionKey::Timeout), Some(&OptionValue::Seconds(10.0)));
}

#[test]
fn submitted_follow_ups_run_in_the_same_window() {
    let mut d = dispatcher(ScriptedTransport::new());
    let submitter = d.submitter();
    let seen: Seen = Rc::default();
    let record = seen.clone();
    d.set_callback(move |_, _, request| {
        record.borrow_mut().push(request.target().to_string());
        if !request.target().ends_with("/next") {
            submitter.submit(RequestDescriptor::get(format!("{}/next", request.target()))?);
        }
        Ok(())
    });
    d.enqueue_get(target(1), None, None).unwrap();
    d.enqueue_get(target(2), None, None).unwrap();

    d.run(None).unwrap();

    assert_eq!(seen.borrow().len(), 4);
    assert!(seen.borrow().contains(&format!("{}/next", target(1))));
    assert_eq!(d.transport().max_in_flight(), 2);
    assert_eq!(d.phase(), Phase::Done);
}

#[test]
fn follow_up_from_single_request_is_dispatched() {
    let mut d = dispatcher(ScriptedTransport::new());
    let submitter = d.submitter();
    d.enqueue(RequestDescriptor::get(target(1)).unwrap().with_callback(move |_, _, _| {
        submitter.submit(RequestDescriptor::get(target(2))?);
        Ok(())
    }));

    d.run(None).unwrap();

    let performed: Vec<String> =
        d.transport().performed().iter().map(|r| r.target.clone()).collect();
    assert_eq!(performed, vec![target(1), target(2)]);
}

#[test]
fn submissions_after_a_fault_are_dropped() {
    let mut d = dispatcher(seven_endpoints());
    let submitter = d.submitter();
    d.set_callback(move |_, _, request| {
        submitter.submit(RequestDescriptor::get(format!("{}/retry", request.target()))?);
        if request.target() == target(2) {
            return Err(CallbackError::fatal("stop here"));
        }
        Ok(())
    });
    for i in 1..=3 {
        d.enqueue_get(target(i), None, None).unwrap();
    }

    assert!(d.run(None).is_err());

    assert!(d
        .transport()
        .started()
        .iter()
        .all(|r| !r.target.ends_with("/retry")));
    assert_eq!(d.pending(), 0);
}

#[test]
fn stop_signal_halts_new_starts_and_drains() {
    let mut d = dispatcher(seven_endpoints());
    let stop = d.stop_signal();
    let seen: Seen = Rc::default();
    let record = seen.clone();
    d.set_callback(move |_, _, request| {
        record.borrow_mut().push(request.target().to_string());
        stop.stop();
        Ok(())
    });
    for i in 1..=7 {
        d.enqueue_get(target(i), None, None).unwrap();
    }

    let err = d.run(Some(3)).unwrap_err();

    assert!(matches!(err, DispatchError::Cancelled { dropped: 4 }));
    assert_eq!(*seen.borrow(), vec![target(2), target(3), target(1)]);
    assert_eq!(d.phase(), Phase::Cancelled);

    d.enqueue_get(target(8), None, None).unwrap();
    d.enqueue_get(target(9), None, None).unwrap();
    assert!(d.run(None).is_err(), "callback stops every run it sees");
}

#[test]
fn dispatcher_is_reusable_after_a_fault() {
    let mut d = dispatcher(ScriptedTransport::new());
    let fail = Rc::new(RefCell::new(true));
    let flag = fail.clone();
    d.set_callback(move |_, _, _| {
        if *flag.borrow() {
            return Err(CallbackError::fatal("first run fails"));
        }
        Ok(())
    });
    d.enqueue_get(target(1), None, None).unwrap();
    d.enqueue_get(target(2), None, None).unwrap();
    assert!(d.run(None).is_err());

    *fail.borrow_mut() = false;
    d.enqueue_get(target(3), None, None).unwrap();
    d.enqueue_get(target(4), None, None).unwrap();
    d.run(None).unwrap();
    assert_eq!(d.phase(), Phase::Done);
    assert_eq!(d.transport().started().len(), 4);
}

#[test]
fn dispatcher_refuses_timeout_beyond_duration_range() {
    let config = DispatcherConfig {
        multi_timeout: 1e300,
        ..DispatcherConfig::default()
    };
    let err = Dispatcher::new(ScriptedTransport::new(), config).err().unwrap();
    assert!(matches!(err, DispatchError::InvalidConfig { field: "multi_timeout", .. }));
}
