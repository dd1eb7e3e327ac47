//! Status notification delivery through the process-wide entry point.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use mrc_client::status::is_registered;
use mrc_client::{
    ErrorKind, ScriptRequest, Session, SimulatedServer, StatusKind, StatusMask, Subscriber,
};

fn callback_session(mask: StatusMask) -> (Arc<SimulatedServer>, Session) {
    let server = Arc::new(SimulatedServer::new());
    let session = Session::open(server.clone()).unwrap();
    session.configure("local", "", "localhost").unwrap();
    session.set_callback_mask(mask).unwrap();
    session.register_entry_point(session.raw_handle()).unwrap();
    (server, session)
}

fn counter() -> (Arc<AtomicUsize>, Subscriber) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    (
        count,
        Subscriber::from_fn(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }),
    )
}

#[test]
fn test_script_end_is_delivered() {
    let (_server, session) = callback_session(StatusMask::ALL);
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    session.add_subscriber(
        StatusKind::ScriptEnd,
        Subscriber::from_fn(move |event| {
            let _ = tx.lock().unwrap().send(event.clone());
        }),
    );

    session
        .set_script_source(&ScriptRequest::InlineText("print 1".into()))
        .unwrap();
    session.run(true).unwrap();

    // ScriptEnd may arrive before or after run() returns
    let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(event.kind, StatusKind::ScriptEnd);
    assert_eq!(event.correlation_id, session.raw_handle());
}

#[test]
fn test_script_status_lines_arrive_in_order() {
    let (_server, session) = callback_session(StatusMask::ALL);
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in StatusKind::ALL {
        let seen = seen.clone();
        session.add_subscriber(
            kind,
            Subscriber::from_fn(move |event| seen.lock().unwrap().push(event.kind)),
        );
    }

    session
        .set_script_source(&ScriptRequest::InlineText(
            "status begin_acquire\nstatus end_acquire\nprint 1".into(),
        ))
        .unwrap();
    session.start().unwrap();
    session.wait_idle(Some(Duration::from_secs(5))).unwrap();
    // ScriptEnd is emitted right after the result is published
    std::thread::sleep(Duration::from_millis(50));

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            StatusKind::BeginAcquire,
            StatusKind::EndAcquire,
            StatusKind::ScriptEnd
        ]
    );
}

#[test]
fn test_mask_filters_notifications() {
    let (server, session) = callback_session(StatusMask::from(StatusKind::EndAcquire));
    let (begin, begin_subscriber) = counter();
    let (end, end_subscriber) = counter();
    session.add_subscriber(StatusKind::BeginAcquire, begin_subscriber);
    session.add_subscriber(StatusKind::EndAcquire, end_subscriber);

    assert!(!server.notify(session.raw_handle(), StatusKind::BeginAcquire));
    assert!(server.notify(session.raw_handle(), StatusKind::EndAcquire));

    assert_eq!(begin.load(Ordering::SeqCst), 0);
    assert_eq!(end.load(Ordering::SeqCst), 1);
}

#[test]
fn test_duplicate_subscriber_invoked_once() {
    let (server, session) = callback_session(StatusMask::ALL);
    let (count, subscriber) = counter();

    assert!(session.add_subscriber(StatusKind::ScanOffset, subscriber.clone()));
    assert!(!session.add_subscriber(StatusKind::ScanOffset, subscriber));

    server.notify(session.raw_handle(), StatusKind::ScanOffset);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_failing_subscriber_is_contained() {
    let (server, session) = callback_session(StatusMask::ALL);
    let (count, later) = counter();
    session.add_subscriber(
        StatusKind::BeginFocusDrive,
        Subscriber::from_fn(|_| panic!("focus drive subscriber blew up")),
    );
    session.add_subscriber(StatusKind::BeginFocusDrive, later);

    // The foreign thread survives the panic
    assert!(server.notify(session.raw_handle(), StatusKind::BeginFocusDrive));
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn test_removed_subscriber_is_not_called() {
    let (server, session) = callback_session(StatusMask::ALL);
    let (count, subscriber) = counter();
    session.add_subscriber(StatusKind::EndFocusDrive, subscriber.clone());
    assert!(session.remove_subscriber(StatusKind::EndFocusDrive, &subscriber));

    server.notify(session.raw_handle(), StatusKind::EndFocusDrive);
    assert_eq!(count.load(Ordering::SeqCst), 0);

    session.add_subscriber(StatusKind::EndFocusDrive, subscriber);
    session.clear_subscribers(StatusKind::EndFocusDrive);
    server.notify(session.raw_handle(), StatusKind::EndFocusDrive);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[test]
fn test_sessions_are_routed_by_correlation_id() {
    let (server_a, a) = callback_session(StatusMask::ALL);
    let (_server_b, b) = callback_session(StatusMask::ALL);
    let (count_a, sub_a) = counter();
    let (count_b, sub_b) = counter();
    a.add_subscriber(StatusKind::EndAcquire, sub_a);
    b.add_subscriber(StatusKind::EndAcquire, sub_b);

    server_a.notify(a.raw_handle(), StatusKind::EndAcquire);

    assert_eq!(count_a.load(Ordering::SeqCst), 1);
    assert_eq!(count_b.load(Ordering::SeqCst), 0);
}

#[test]
fn test_correlation_id_is_exclusive() {
    let (_server, a) = callback_session(StatusMask::ALL);
    let other = Session::open(Arc::new(SimulatedServer::new())).unwrap();
    other.configure("local", "", "localhost").unwrap();

    let err = other.register_entry_point(a.raw_handle()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let id = a.raw_handle();
    drop(a);
    assert!(!is_registered(id));
    other.register_entry_point(id).unwrap();
}
