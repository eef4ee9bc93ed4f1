//! The request object: a shared, reference-counted handle to a pending
//! outbound call, its payload buffer, and its completion callbacks.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::codec::{self, HEADER_SIZE};
use crate::queue::QueueInner;
use crate::timing::Timestamp;

/// Sentinel passed to [`Request::set_timeout`] meaning "inherit the
/// channel's default timeout".
pub const TIMEOUT_DEFAULT: i32 = -1;
/// Sentinel meaning "never time out".
pub const TIMEOUT_NONE: i32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    New,
    Queued,
    Sending,
    Sent,
    Cancelled,
    Done,
}

pub type ResponseCallback = Box<dyn FnMut(i32, &[u8])>;
pub type DestroyCallback = Box<dyn FnOnce()>;

pub(crate) struct RequestInner {
    pub id: u32,
    pub code: u32,
    pub status: RequestStatus,
    pub buf: Vec<u8>,
    /// How far into `buf` has already been written to the socket.
    pub send_pos: usize,
    pub timeout_ms: i32,
    pub deadline: Option<Timestamp>,
    pub response: Option<ResponseCallback>,
    pub destroy: Option<DestroyCallback>,
    pub queue: Option<Weak<RefCell<QueueInner>>>,
}

impl fmt::Debug for RequestInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestInner")
            .field("id", &self.id)
            .field("code", &self.code)
            .field("status", &self.status)
            .field("len", &self.buf.len())
            .finish()
    }
}

impl Drop for RequestInner {
    fn drop(&mut self) {
        if let Some(destroy) = self.destroy.take() {
            destroy();
        }
    }
}

/// A handle to a single outbound request and its eventual response.
///
/// Cloning a `Request` shares the same underlying state — callers,
/// [`crate::Channel`], and [`crate::Queue`] all refer to one logical
/// request through (possibly multiple) clones of this handle.
#[derive(Clone)]
pub struct Request(pub(crate) Rc<RefCell<RequestInner>>);

impl Request {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(payload_capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload_capacity);
        buf.resize(HEADER_SIZE, 0);
        Request(Rc::new(RefCell::new(RequestInner {
            id: 0,
            code: 0,
            status: RequestStatus::New,
            buf,
            send_pos: 0,
            timeout_ms: TIMEOUT_DEFAULT,
            deadline: None,
            response: None,
            destroy: None,
            queue: None,
        })))
    }

    pub fn id(&self) -> u32 {
        self.0.borrow().id
    }

    pub fn status(&self) -> RequestStatus {
        self.0.borrow().status
    }

    pub fn set_timeout(&self, ms: i32) {
        if self.0.borrow().status == RequestStatus::New {
            self.0.borrow_mut().timeout_ms = ms;
        }
    }

    /// Payload length, excluding the reserved 12-byte wire header.
    pub fn size(&self) -> usize {
        self.0.borrow().buf.len() - HEADER_SIZE
    }

    pub fn data(&self) -> std::cell::Ref<'_, [u8]> {
        std::cell::Ref::map(self.0.borrow(), |inner| &inner.buf[HEADER_SIZE..])
    }

    pub fn append_byte(&self, b: u8) {
        if self.is_editable() {
            self.0.borrow_mut().buf.push(b);
        }
    }

    pub fn append_bytes(&self, bytes: &[u8]) {
        if self.is_editable() {
            self.0.borrow_mut().buf.extend_from_slice(bytes);
        }
    }

    pub fn append_int32(&self, value: i32) {
        self.append_bytes(&value.to_ne_bytes());
    }

    pub fn append_uint32(&self, value: u32) {
        self.append_bytes(&value.to_ne_bytes());
    }

    /// Append a nullable string as a length-prefixed, NUL-terminated,
    /// 4-byte-aligned UTF-16 string. `None` encodes as a null string.
    pub fn append_utf8(&self, s: Option<&str>) {
        if self.is_editable() {
            let mut inner = self.0.borrow_mut();
            codec::append_utf8_string(&mut inner.buf, s);
        }
    }

    /// Format `args` (as produced by [`std::format_args!`]) and append the
    /// result as a UTF-8 string, e.g. `request.append_fmt(format_args!("{}-{}", a, b))`.
    pub fn append_fmt(&self, args: fmt::Arguments<'_>) {
        let s = fmt::format(args);
        self.append_utf8(Some(&s));
    }

    /// A `write!`-compatible scratch buffer: collects text through
    /// [`std::fmt::Write`] and appends it as a single length-prefixed string
    /// when dropped, e.g. `write!(request.writer(), "{}-{}", a, b)`.
    pub fn writer(&self) -> RequestWriter<'_> {
        RequestWriter { request: self, buf: String::new() }
    }

    pub fn set_response<F>(&self, callback: F)
    where
        F: FnMut(i32, &[u8]) + 'static,
    {
        self.0.borrow_mut().response = Some(Box::new(callback));
    }

    pub fn set_destroy<F>(&self, callback: F)
    where
        F: FnOnce() + 'static,
    {
        self.0.borrow_mut().destroy = Some(Box::new(callback));
    }

    fn is_editable(&self) -> bool {
        self.0.borrow().status == RequestStatus::New
    }

    pub(crate) fn detach_from_queue(&self) {
        let weak = self.0.borrow_mut().queue.take();
        if let Some(weak) = weak {
            if let Some(queue) = weak.upgrade() {
                queue.borrow_mut().members.remove(&self.id());
            }
        }
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0.borrow(), f)
    }
}

/// Returned by [`Request::writer`]; accumulates formatted text and appends
/// it as one string on drop.
pub struct RequestWriter<'a> {
    request: &'a Request,
    buf: String,
}

impl fmt::Write for RequestWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.buf.push_str(s);
        Ok(())
    }
}

impl Drop for RequestWriter<'_> {
    fn drop(&mut self) {
        self.request.append_utf8(Some(&self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Write as _;

    #[test]
    fn new_request_is_editable_and_empty() {
        let req = Request::new();
        assert_eq!(req.status(), RequestStatus::New);
        assert_eq!(req.id(), 0);
        assert_eq!(req.size(), 0);
    }

    #[test]
    fn append_primitives_grow_payload() {
        let req = Request::new();
        req.append_byte(7);
        req.append_int32(-1);
        req.append_uint32(42);
        assert_eq!(req.size(), 1 + 4 + 4);
    }

    #[test]
    fn append_fmt_matches_manual_utf8() {
        let req = Request::new();
        req.append_fmt(format_args!("id={}", 9));
        let direct = Request::new();
        direct.append_utf8(Some("id=9"));
        assert_eq!(&*req.data(), &*direct.data());
    }

    #[test]
    fn writer_flushes_accumulated_text_on_drop() {
        let req = Request::new();
        {
            let mut w = req.writer();
            write!(w, "{}-{}", "a", 2).unwrap();
        }
        let direct = Request::new();
        direct.append_utf8(Some("a-2"));
        assert_eq!(&*req.data(), &*direct.data());
    }

    #[test]
    fn operations_after_submission_are_no_ops() {
        let req = Request::new();
        req.0.borrow_mut().status = RequestStatus::Sent;
        let before = req.size();
        req.append_byte(1);
        req.append_utf8(Some("ignored"));
        assert_eq!(req.size(), before);
    }

    #[test]
    fn set_timeout_only_applies_while_new() {
        let req = Request::new();
        req.set_timeout(500);
        assert_eq!(req.0.borrow().timeout_ms, 500);
        req.0.borrow_mut().status = RequestStatus::Sent;
        req.set_timeout(999);
        assert_eq!(req.0.borrow().timeout_ms, 500);
    }
}
