mod common;

use std::cell::RefCell;
use std::io::Read;
use std::os::unix::net::UnixListener;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use rilio::events::SignalKind;
use rilio::request::Request;
use rilio::Channel;

use common::*;

#[test]
fn connected_handshake_sets_version_and_fires_signal() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "rilio.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _tag = read_subscription_tag(&mut stream);
        send_frame(&mut stream, &connected_frame(10));
        // Keep the connection open until the test is done with it.
        let mut buf = [0u8; 1];
        let _ = stream.read(&mut buf);
    });

    let channel = Channel::builder().with_subscription(*b"TEST").connect(&path).unwrap();

    let connected_fired = Rc::new(RefCell::new(false));
    let flag = connected_fired.clone();
    channel.subscribe(SignalKind::Connected, move |_sig| {
        *flag.borrow_mut() = true;
    });

    let ok = poll_until(&channel, Duration::from_secs(2), || channel.connected());
    assert!(ok, "channel never observed the connected event");
    assert_eq!(channel.protocol_version(), 10);
    assert!(*connected_fired.borrow());

    drop(channel);
    server.join().unwrap();
}

#[test]
fn basic_request_response_round_trips_payload() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = socket_path(&dir, "rilio.sock");
    let listener = UnixListener::bind(&path).unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let _tag = read_subscription_tag(&mut stream);
        send_frame(&mut stream, &connected_frame(10));

        let req = read_request(&mut stream);
        assert_eq!(req.code, 51);

        let mut payload = Vec::new();
        rilio::codec::append_utf8_string(&mut payload, Some("UNIT_TEST"));
        send_frame(&mut stream, &response_frame(req.id, 0, &payload));
    });

    let channel = Channel::builder().with_subscription(*b"TEST").connect(&path).unwrap();
    assert!(poll_until(&channel, Duration::from_secs(2), || channel.connected()));

    let result: Rc<RefCell<Option<(i32, String)>>> = Rc::new(RefCell::new(None));
    let slot = result.clone();

    let request = Request::new();
    request.set_response(move |status, data| {
        let mut parser = rilio::parser::Parser::new(data);
        let text = parser.get_utf8().flatten().unwrap_or_default();
        *slot.borrow_mut() = Some((status, text));
    });
    let id = channel.send(request, 51);
    assert_ne!(id, 0);

    let ok = poll_until(&channel, Duration::from_secs(2), || result.borrow().is_some());
    assert!(ok, "response never arrived");
    let (status, text) = result.borrow_mut().take().unwrap();
    assert_eq!(status, 0);
    assert_eq!(text, "UNIT_TEST");

    drop(channel);
    server.join().unwrap();
}
