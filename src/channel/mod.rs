//! The I/O engine: owns the socket, drives the framing state machines in
//! both directions, and correlates inbound packets to pending requests.

mod rx;

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::{self, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use mio::net::UnixStream;
use mio::{Events, Interest, Poll, Token};
use tracing::{debug, error, warn};

use crate::codec::{CONNECTED_EVENT_CODE, HEADER_SIZE, STATUS_CANCELLED, STATUS_TIMEOUT};
use crate::error::{ChannelError, Result};
use crate::events::{EventRegistry, Signal, SignalKind, SubscriptionId};
use crate::parser::Parser;
use crate::request::{DestroyCallback, Request, RequestStatus, ResponseCallback, TIMEOUT_DEFAULT, TIMEOUT_NONE};
use crate::safe_assert;
use crate::timing::{Clock, Timestamp};

use rx::{RxError, RxOutcome, RxState};

const SOCKET_TOKEN: Token = Token(0);

/// What kind of packet a registered logger is being told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogDirection {
    /// An outbound request, just written to the socket.
    Req,
    /// An inbound solicited response.
    Resp,
    /// An inbound unsolicited event.
    Unsol,
}

pub type LoggerCallback = Box<dyn FnMut(LogDirection, u32, &[u8])>;

struct ChannelInner {
    poll: Poll,
    stream: UnixStream,
    closed: bool,

    name: String,
    clock: Clock,

    sub_tag_pending: Option<[u8; 4]>,
    sub_tag_pos: usize,

    fifo: VecDeque<Request>,
    send_req: Option<Request>,
    in_flight: HashMap<u32, Request>,
    last_req_id: u32,

    rx: RxState,

    /// Wrapped in its own `Rc<RefCell<_>>`, independent of `ChannelInner`'s
    /// own borrow, so a logger callback can call back into `Channel`
    /// (including `remove_logger`) without tripping a double-borrow.
    loggers: Rc<RefCell<Vec<(u32, LoggerCallback)>>>,
    last_logger_id: u32,

    /// Same reasoning as `loggers`: kept behind its own `Rc<RefCell<_>>` so
    /// dispatching a signal never holds the outer `ChannelInner` borrow (or
    /// even this registry's own borrow) while a subscriber callback runs.
    events: Rc<RefCell<EventRegistry>>,

    connected: bool,
    protocol_version: u32,
    default_timeout_ms: i32,
    next_deadline: Option<Timestamp>,

    writable_armed: bool,
}

/// A shared handle to a connected channel. Cloning shares the same
/// underlying engine — this is the idiomatic replacement for the
/// reference-counted C object it is modelled on.
#[derive(Clone)]
pub struct Channel(Rc<RefCell<ChannelInner>>);

/// Builder for [`Channel`] construction, mirroring the `with_*` style used
/// elsewhere in this codebase for configuring a connector before use.
#[derive(Default)]
pub struct ChannelBuilder {
    name: Option<String>,
    default_timeout_ms: i32,
    sub_tag: Option<[u8; 4]>,
}

impl ChannelBuilder {
    pub fn new() -> Self {
        ChannelBuilder { name: None, default_timeout_ms: TIMEOUT_NONE, sub_tag: None }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_default_timeout(mut self, ms: i32) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    /// `tag` must be exactly 4 bytes; written once before any request.
    pub fn with_subscription(mut self, tag: [u8; 4]) -> Self {
        self.sub_tag = Some(tag);
        self
    }

    pub fn connect(self, path: impl AsRef<Path>) -> Result<Channel> {
        let stream = UnixStream::connect(path.as_ref())?;
        self.build(stream)
    }

    pub fn from_unix_stream(self, stream: StdUnixStream) -> Result<Channel> {
        stream.set_nonblocking(true)?;
        self.build(UnixStream::from_std(stream))
    }

    fn build(self, stream: UnixStream) -> Result<Channel> {
        Channel::new(stream, self.name, self.default_timeout_ms, self.sub_tag)
    }
}

impl Channel {
    pub fn builder() -> ChannelBuilder {
        ChannelBuilder::new()
    }

    pub fn connect(path: impl AsRef<Path>) -> Result<Channel> {
        ChannelBuilder::new().connect(path)
    }

    pub fn from_unix_stream(stream: StdUnixStream) -> Result<Channel> {
        ChannelBuilder::new().from_unix_stream(stream)
    }

    fn new(
        mut stream: UnixStream,
        name: Option<String>,
        default_timeout_ms: i32,
        sub_tag: Option<[u8; 4]>,
    ) -> Result<Channel> {
        let poll = Poll::new()?;
        poll.registry().register(&mut stream, SOCKET_TOKEN, Interest::READABLE)?;

        let inner = ChannelInner {
            poll,
            stream,
            closed: false,
            name: name.unwrap_or_else(|| "rilio".to_string()),
            clock: Clock::new(),
            sub_tag_pending: sub_tag,
            sub_tag_pos: 0,
            fifo: VecDeque::new(),
            send_req: None,
            in_flight: HashMap::new(),
            last_req_id: 0,
            rx: RxState::new(),
            loggers: Rc::new(RefCell::new(Vec::new())),
            last_logger_id: 0,
            events: Rc::new(RefCell::new(EventRegistry::new())),
            connected: false,
            protocol_version: 0,
            default_timeout_ms,
            next_deadline: None,
            writable_armed: false,
        };
        let channel = Channel(Rc::new(RefCell::new(inner)));
        if sub_tag.is_some() {
            channel.arm_writable()?;
        }
        Ok(channel)
    }

    pub fn connected(&self) -> bool {
        self.0.borrow().connected
    }

    pub fn protocol_version(&self) -> u32 {
        self.0.borrow().protocol_version
    }

    pub fn name(&self) -> String {
        self.0.borrow().name.clone()
    }

    pub fn set_default_timeout(&self, ms: i32) {
        self.0.borrow_mut().default_timeout_ms = ms;
    }

    // ---- logging ----

    pub fn add_logger<F>(&self, logger: F) -> u32
    where
        F: FnMut(LogDirection, u32, &[u8]) + 'static,
    {
        let (id, loggers) = {
            let mut inner = self.0.borrow_mut();
            inner.last_logger_id = inner.last_logger_id.wrapping_add(1);
            if inner.last_logger_id == 0 {
                inner.last_logger_id = 1;
            }
            (inner.last_logger_id, inner.loggers.clone())
        };
        loggers.borrow_mut().push((id, Box::new(logger)));
        id
    }

    pub fn remove_logger(&self, id: u32) {
        let loggers = self.0.borrow().loggers.clone();
        let mut list = loggers.borrow_mut();
        let before = list.len();
        list.retain(|(lid, _)| *lid != id);
        if list.len() == before {
            warn!(id, "remove_logger: unknown logger id");
        }
    }

    // ---- events ----

    pub fn subscribe<F>(&self, kind: SignalKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Signal<'_>) + 'static,
    {
        let events = self.0.borrow().events.clone();
        let mut reg = events.borrow_mut();
        reg.subscribe(kind, handler)
    }

    pub fn unsubscribe(&self, sub: SubscriptionId) {
        let events = self.0.borrow().events.clone();
        events.borrow_mut().unsubscribe(sub);
    }

    fn dispatch(&self, signal: Signal<'_>) {
        // Take a local strong ref so that a handler dropping its own last
        // `Channel` clone doesn't tear down `inner` out from under us.
        let _keep_alive = self.clone();
        let events = self.0.borrow().events.clone();
        // `EventRegistry::dispatch` takes the shared registry itself, not a
        // `ChannelInner` borrow, so a subscriber is free to call back into
        // any other `Channel`/`Queue` method (including `subscribe` or
        // `unsubscribe` on this same registry) without a `BorrowMutError`.
        EventRegistry::dispatch(&events, &signal);
    }

    // ---- submission ----

    pub fn send(&self, request: Request, code: u32) -> u32 {
        self.send_request_full(request, code, None, None)
    }

    pub fn send_request_full(
        &self,
        request: Request,
        code: u32,
        response: Option<ResponseCallback>,
        destroy: Option<DestroyCallback>,
    ) -> u32 {
        if request.status() != RequestStatus::New {
            return 0;
        }
        let id = {
            let mut inner = self.0.borrow_mut();
            inner.last_req_id = inner.last_req_id.wrapping_add(1);
            if inner.last_req_id == 0 {
                inner.last_req_id = 1;
            }
            inner.last_req_id
        };
        {
            let mut req = request.0.borrow_mut();
            req.id = id;
            req.code = code;
            req.status = RequestStatus::Queued;
            if let Some(r) = response {
                req.response = Some(r);
            }
            if let Some(d) = destroy {
                req.destroy = Some(d);
            }
        }
        let has_response = request.0.borrow().response.is_some();
        {
            let mut inner = self.0.borrow_mut();
            if has_response {
                inner.in_flight.insert(id, request.clone());
            }
            inner.fifo.push_back(request);
        }
        if let Err(err) = self.arm_writable() {
            error!(?err, "failed to arm write readiness after send");
        }
        id
    }

    /// Three-tier lookup mirroring the currently-transmitting request, the
    /// in-flight map, and the send FIFO, in that order.
    pub fn get_request(&self, id: u32) -> Option<Request> {
        let inner = self.0.borrow();
        if let Some(req) = &inner.send_req {
            if req.id() == id {
                return Some(req.clone());
            }
        }
        if let Some(req) = inner.in_flight.get(&id) {
            return Some(req.clone());
        }
        inner.fifo.iter().find(|r| r.id() == id).cloned()
    }

    // ---- cancellation ----

    pub fn cancel_request(&self, id: u32, notify: bool) -> bool {
        if id == 0 {
            return false;
        }
        let currently_sending = {
            let inner = self.0.borrow();
            inner.send_req.as_ref().map(|r| r.id()) == Some(id)
        };
        if currently_sending {
            let req = self.0.borrow().send_req.clone().unwrap();
            self.remove_from_in_flight(id);
            self.finish_cancel(&req, notify);
            self.rearm_deadline();
            return true;
        }

        let in_fifo = {
            let mut inner = self.0.borrow_mut();
            let pos = inner.fifo.iter().position(|r| r.id() == id);
            pos.map(|pos| inner.fifo.remove(pos).unwrap())
        };
        if let Some(req) = in_fifo {
            self.remove_from_in_flight(id);
            self.finish_cancel(&req, notify);
            return true;
        }

        let in_flight = self.0.borrow_mut().in_flight.remove(&id);
        if let Some(req) = in_flight {
            self.finish_cancel(&req, notify);
            self.rearm_deadline();
            return true;
        }
        false
    }

    fn remove_from_in_flight(&self, id: u32) {
        self.0.borrow_mut().in_flight.remove(&id);
    }

    fn finish_cancel(&self, req: &Request, notify: bool) {
        req.0.borrow_mut().status = RequestStatus::Cancelled;
        req.detach_from_queue();
        if notify {
            self.notify_response(req, STATUS_CANCELLED, &[]);
        }
    }

    /// Cancel the currently-transmitting request, then drain the FIFO
    /// head-first, then drain the in-flight map (unspecified order).
    pub fn cancel_all(&self, notify: bool) {
        let send_req = self.0.borrow_mut().send_req.take();
        if let Some(req) = send_req {
            self.remove_from_in_flight(req.id());
            self.finish_cancel(&req, notify);
            // A cancelled-while-sending request keeps transmitting so the
            // wire stays framed correctly; put it back so `flush_write`
            // finishes the bytes already promised to the peer.
            self.0.borrow_mut().send_req = Some(req);
        }

        loop {
            let next = self.0.borrow_mut().fifo.pop_front();
            match next {
                Some(req) => {
                    self.remove_from_in_flight(req.id());
                    self.finish_cancel(&req, notify);
                }
                None => break,
            }
        }

        let victims: Vec<Request> = self.0.borrow_mut().in_flight.drain().map(|(_, r)| r).collect();
        for req in victims {
            self.finish_cancel(&req, notify);
        }

        self.0.borrow_mut().next_deadline = None;
    }

    // ---- shutdown ----

    /// Deregister I/O interest and release the socket. Does not cancel
    /// pending requests — pair with [`Channel::cancel_all`] if that's
    /// wanted.
    pub fn shutdown(&self, flush: bool) {
        let mut inner = self.0.borrow_mut();
        if inner.closed {
            return;
        }
        if flush {
            let _ = inner.stream.flush();
        }
        let _ = inner.poll.registry().deregister(&mut inner.stream);
        let _ = inner.stream.shutdown(std::net::Shutdown::Both);
        inner.closed = true;
        inner.connected = false;
        inner.protocol_version = 0;
        debug!(name = %inner.name, "channel shut down");
    }

    // ---- polling ----

    /// Drive one iteration of the engine: wait up to `timeout` (capped by
    /// the next request deadline, whichever is sooner), service whatever
    /// I/O is ready, then fire any deadlines that have passed.
    pub fn poll(&self, timeout: Option<Duration>) -> Result<()> {
        if self.0.borrow().closed {
            return Ok(());
        }
        let wait = self.effective_wait(timeout);
        let mut events = Events::with_capacity(4);
        {
            let mut inner = self.0.borrow_mut();
            match inner.poll.poll(&mut events, wait) {
                Ok(()) => {}
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        for event in events.iter() {
            if event.token() != SOCKET_TOKEN {
                continue;
            }
            if event.is_readable() {
                self.drain_readable();
            }
            if event.is_writable() {
                self.drain_writable();
            }
        }
        self.fire_expired_timeouts();
        Ok(())
    }

    fn effective_wait(&self, timeout: Option<Duration>) -> Option<Duration> {
        let inner = self.0.borrow();
        let deadline_wait = inner.next_deadline.map(|d| d.remaining(inner.clock.now()));
        match (timeout, deadline_wait) {
            (Some(t), Some(d)) => Some(t.min(d)),
            (Some(t), None) => Some(t),
            (None, Some(d)) => Some(d),
            (None, None) => None,
        }
    }

    fn arm_writable(&self) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.closed || inner.writable_armed {
            return Ok(());
        }
        inner
            .poll
            .registry()
            .reregister(&mut inner.stream, SOCKET_TOKEN, Interest::READABLE | Interest::WRITABLE)?;
        inner.writable_armed = true;
        Ok(())
    }

    fn disarm_writable(&self) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.closed || !inner.writable_armed {
            return Ok(());
        }
        inner.poll.registry().reregister(&mut inner.stream, SOCKET_TOKEN, Interest::READABLE)?;
        inner.writable_armed = false;
        Ok(())
    }

    // ---- write path ----

    fn drain_writable(&self) {
        loop {
            match self.write_step() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(ChannelError::Io(ref err)) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    self.emit_error(err);
                    self.shutdown(false);
                    return;
                }
            }
        }
        let idle = {
            let inner = self.0.borrow();
            inner.sub_tag_pending.is_none() && inner.send_req.is_none() && inner.fifo.is_empty()
        };
        if idle {
            if let Err(err) = self.disarm_writable() {
                warn!(?err, "failed to disarm write readiness");
            }
        }
    }

    /// Write as much of the current thing-to-send as the socket will take
    /// in one call. Returns `Ok(true)` if there is more work to attempt
    /// (call again), `Ok(false)` if there's nothing left to send.
    fn write_step(&self) -> Result<bool> {
        if self.write_sub_tag()? {
            return Ok(true);
        }
        if !self.0.borrow().connected {
            return Ok(false);
        }
        self.write_current_request()
    }

    fn write_sub_tag(&self) -> Result<bool> {
        let tag = self.0.borrow().sub_tag_pending;
        let Some(tag) = tag else { return Ok(false) };
        let pos = self.0.borrow().sub_tag_pos;
        let n = {
            let mut inner = self.0.borrow_mut();
            inner.stream.write(&tag[pos..])?
        };
        let mut inner = self.0.borrow_mut();
        inner.sub_tag_pos += n;
        if inner.sub_tag_pos >= tag.len() {
            inner.sub_tag_pending = None;
            debug!(name = %inner.name, "subscription tag sent");
        }
        Ok(true)
    }

    fn write_current_request(&self) -> Result<bool> {
        let req = {
            let mut inner = self.0.borrow_mut();
            if inner.send_req.is_none() {
                inner.send_req = inner.fifo.pop_front();
            }
            inner.send_req.clone()
        };
        let Some(req) = req else { return Ok(false) };

        if req.0.borrow().status == RequestStatus::Queued {
            req.0.borrow_mut().status = RequestStatus::Sending;
            let (id, code) = (req.id(), req.0.borrow().code);
            let total_len = req.0.borrow().buf.len() - HEADER_SIZE;
            let mut inner_buf = req.0.borrow_mut();
            let payload_len = (total_len + 8) as u32;
            inner_buf.buf[0..4].copy_from_slice(&payload_len.to_be_bytes());
            inner_buf.buf[4..8].copy_from_slice(&code.to_ne_bytes());
            inner_buf.buf[8..12].copy_from_slice(&id.to_ne_bytes());
        }

        let n = {
            let pos = req.0.borrow().send_pos;
            let mut inner = self.0.borrow_mut();
            inner.stream.write(&req.0.borrow().buf[pos..])?
        };
        req.0.borrow_mut().send_pos += n;

        let done = req.0.borrow().send_pos >= req.0.borrow().buf.len();
        if done {
            self.finish_send(req);
        }
        Ok(true)
    }

    fn finish_send(&self, req: Request) {
        self.0.borrow_mut().send_req = None;
        let was_cancelled = req.status() == RequestStatus::Cancelled;
        if !was_cancelled {
            req.0.borrow_mut().status = RequestStatus::Sent;
        }
        let (id, code, len) = {
            let inner = req.0.borrow();
            (inner.id, inner.code, inner.buf.len())
        };
        self.log(LogDirection::Req, id, code, &req.0.borrow().buf[HEADER_SIZE..]);
        debug!(name = %self.0.borrow().name, id, code, len, "request sent");

        if was_cancelled {
            return;
        }

        let has_response = req.0.borrow().response.is_some();
        if !has_response {
            req.detach_from_queue();
            self.0.borrow_mut().in_flight.remove(&id);
            return;
        }

        let timeout_ms = req.0.borrow().timeout_ms;
        let effective = match timeout_ms {
            TIMEOUT_DEFAULT => self.0.borrow().default_timeout_ms,
            other => other,
        };
        if effective > 0 {
            let clock = self.0.borrow().clock;
            let deadline = clock.deadline_after_millis(effective as u32);
            req.0.borrow_mut().deadline = Some(deadline);
            self.rearm_deadline();
        }
    }

    // ---- read path ----

    fn drain_readable(&self) {
        loop {
            let outcome = {
                let mut inner = self.0.borrow_mut();
                inner.rx.read_frame(&mut inner.stream)
            };
            match outcome {
                Ok(RxOutcome::Frame(body)) => self.handle_packet(&body),
                Ok(RxOutcome::WouldBlock) => break,
                Err(RxError::Eof) => {
                    self.dispatch(Signal::Eof);
                    self.shutdown(false);
                    return;
                }
                Err(RxError::TooLarge(len)) => {
                    self.emit_error(ChannelError::FrameTooLarge(len));
                    self.shutdown(false);
                    return;
                }
                Err(RxError::Io(err)) => {
                    self.emit_error(ChannelError::Io(err));
                    self.shutdown(false);
                    return;
                }
            }
        }
    }

    fn handle_packet(&self, body: &[u8]) {
        if body.len() < 8 {
            self.emit_error(ChannelError::InvalidData("body shorter than 8 bytes"));
            self.shutdown(false);
            return;
        }
        let mut p = Parser::new(body);
        let kind = p.get_uint32().unwrap();
        if kind == 0 {
            self.handle_response(body);
        } else {
            self.handle_unsol(kind, body);
        }
    }

    fn handle_response(&self, body: &[u8]) {
        if body.len() < HEADER_SIZE {
            self.emit_error(ChannelError::InvalidData("response shorter than 12 bytes"));
            self.shutdown(false);
            return;
        }
        let id = u32::from_ne_bytes(body[4..8].try_into().unwrap());
        let status = u32::from_ne_bytes(body[8..12].try_into().unwrap()) as i32;
        let data = &body[HEADER_SIZE..];
        self.log(LogDirection::Resp, id, status as u32, data);
        debug!(name = %self.0.borrow().name, id, status, "response received");

        let req = self.0.borrow_mut().in_flight.remove(&id);
        let Some(req) = req else {
            warn!(id, "response for unknown (or already-completed) request");
            self.rearm_deadline();
            return;
        };
        req.detach_from_queue();
        req.0.borrow_mut().status = RequestStatus::Done;
        self.rearm_deadline();
        self.notify_response(&req, status, data);
    }

    fn handle_unsol(&self, code: u32, body: &[u8]) {
        let data = &body[8..];
        self.log(LogDirection::Unsol, 0, code, data);
        debug!(name = %self.0.borrow().name, code, "unsolicited event received");

        if code == CONNECTED_EVENT_CODE {
            self.handle_connected(data);
        }
        self.dispatch(Signal::UnsolEvent { code, data });
    }

    fn handle_connected(&self, data: &[u8]) {
        let mut p = Parser::new(data);
        let (count, version) = match (p.get_uint32(), p.get_uint32()) {
            (Some(c), Some(v)) => (c, v),
            _ => {
                warn!("malformed connected event");
                return;
            }
        };
        if count != 1 {
            warn!(count, "unexpected connected-event count");
            return;
        }
        {
            let mut inner = self.0.borrow_mut();
            inner.connected = true;
            inner.protocol_version = version;
        }
        debug!(version, "channel connected");
        if let Err(err) = self.arm_writable() {
            error!(?err, "failed to arm write readiness after connect");
        }
        self.dispatch(Signal::Connected);
    }

    fn notify_response(&self, req: &Request, status: i32, data: &[u8]) {
        // Hold a strong ref across the callback: the callback may drop its
        // own last handle to `req`, or cancel other requests. The response
        // callback is one-shot, so take it out of `RequestInner` (dropping
        // that borrow before invoking it) rather than holding a `borrow_mut`
        // across the call — a callback that reads back its own `req.id()`
        // or `req.status()` would otherwise double-borrow and panic.
        let keep_alive = req.clone();
        let cb = keep_alive.0.borrow_mut().response.take();
        if let Some(mut cb) = cb {
            cb(status, data);
        }
    }

    fn log(&self, dir: LogDirection, id: u32, code: u32, data: &[u8]) {
        let loggers = self.0.borrow().loggers.clone();
        let ids: Vec<u32> = loggers.borrow().iter().map(|(lid, _)| *lid).collect();
        for lid in ids {
            // Same take-before-call, put-back-if-still-absent pattern as
            // `EventRegistry::dispatch_bucket`: a logger may call back into
            // the channel (including `remove_logger` on itself).
            let taken = {
                let mut list = loggers.borrow_mut();
                list.iter().position(|(l, _)| *l == lid).map(|pos| list.remove(pos))
            };
            if let Some((_, mut logger)) = taken {
                logger(dir, id, data);
                let mut list = loggers.borrow_mut();
                if !list.iter().any(|(l, _)| *l == lid) {
                    list.push((lid, logger));
                }
            }
        }
        let _ = code;
    }

    fn emit_error(&self, err: ChannelError) {
        error!(?err, name = %self.0.borrow().name, "channel error");
        self.dispatch(Signal::Error(&err));
    }

    // ---- timeouts ----

    fn rearm_deadline(&self) {
        let min = self.0.borrow().in_flight.values().filter_map(|r| r.0.borrow().deadline).min();
        self.0.borrow_mut().next_deadline = min;
    }

    fn fire_expired_timeouts(&self) {
        let now = self.0.borrow().clock.now();
        let victims: Vec<u32> = self
            .0
            .borrow()
            .in_flight
            .iter()
            .filter(|(_, r)| r.0.borrow().deadline.is_some_and(|d| d.has_passed(now)))
            .map(|(id, _)| *id)
            .collect();

        for id in victims {
            // Re-check presence: an earlier victim's callback in this same
            // pass may have already cancelled a later one.
            let req = self.0.borrow_mut().in_flight.remove(&id);
            if let Some(req) = req {
                req.detach_from_queue();
                req.0.borrow_mut().status = RequestStatus::Done;
                safe_assert!(req.0.borrow().response.is_some());
                self.notify_response(&req, STATUS_TIMEOUT, &[]);
            }
        }
        self.rearm_deadline();
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // Only the last handle tears anything down; every other clone going
        // out of scope is a no-op.
        if Rc::strong_count(&self.0) == 1 {
            self.cancel_all(true);
            self.shutdown(false);
        }
    }
}
