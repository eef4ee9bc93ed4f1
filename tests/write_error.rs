mod common;

use std::cell::RefCell;
use std::os::unix::net::UnixListener;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use rilio::events::SignalKind;
use rilio::request::Request;
use rilio::Channel;

use common::*;

#[test]
fn peer_shutdown_is_reported_as_eof() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "rilio.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _tag = read_subscription_tag(&mut stream);
        send_frame(&mut stream, &connected_frame(1));
        stream.shutdown(std::net::Shutdown::Both).unwrap();
    });

    let channel = Channel::builder().with_subscription(*b"TEST").connect(&path).unwrap();
    assert!(poll_until(&channel, Duration::from_secs(2), || channel.connected()));

    let saw_eof = Rc::new(RefCell::new(false));
    let flag = saw_eof.clone();
    channel.subscribe(SignalKind::Eof, move |_sig| {
        *flag.borrow_mut() = true;
    });

    let ok = poll_until(&channel, Duration::from_secs(2), || *saw_eof.borrow());
    assert!(ok, "peer shutdown never produced an EOF signal");

    drop(channel);
    server.join().unwrap();
}

/// Spec scenario: a request is submitted, then the peer shuts down its
/// socket for both directions before reading or answering it. The
/// channel must notice (whether by read-side EOF or a write failing
/// against the vanished peer), emit a signal, and shut itself down —
/// and the ERROR/EOF handler must be free to call straight back into
/// `cancel_all` from inside itself, the exact idiom the library's own
/// docs recommend pairing with shutdown handling, without panicking on
/// a double borrow.
#[test]
fn request_submitted_before_peer_shutdown_is_cancelled_from_within_handler() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "rilio.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _tag = read_subscription_tag(&mut stream);
        send_frame(&mut stream, &connected_frame(1));
        // Shut down immediately, without reading the request the client
        // is about to send — the client's next write against this
        // vanished peer must fail cleanly rather than hang or panic.
        stream.shutdown(std::net::Shutdown::Both).unwrap();
        drop(stream);
    });

    let channel = Channel::builder().with_subscription(*b"TEST").connect(&path).unwrap();
    assert!(poll_until(&channel, Duration::from_secs(2), || channel.connected()));

    let responded = Rc::new(RefCell::new(None));
    let slot = responded.clone();
    let request = Request::new();
    request.set_response(move |status, _data| *slot.borrow_mut() = Some(status));
    let id = channel.send(request, 7);
    assert_ne!(id, 0);

    let saw_signal = Rc::new(RefCell::new(false));

    let handler_channel = channel.clone();
    let flag = saw_signal.clone();
    channel.subscribe(SignalKind::Error, move |_sig| {
        *flag.borrow_mut() = true;
        handler_channel.cancel_all(true);
    });
    let handler_channel = channel.clone();
    let flag = saw_signal.clone();
    channel.subscribe(SignalKind::Eof, move |_sig| {
        *flag.borrow_mut() = true;
        handler_channel.cancel_all(true);
    });

    let ok = poll_until(&channel, Duration::from_secs(2), || *saw_signal.borrow());
    assert!(ok, "peer shutdown with a request in flight never produced an ERROR or EOF signal");
    assert_eq!(*responded.borrow(), Some(rilio::codec::STATUS_CANCELLED));

    drop(channel);
    server.join().unwrap();
}

#[test]
fn connecting_to_a_directory_path_fails() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let err = Channel::connect(dir.path());
    assert!(err.is_err());
}
