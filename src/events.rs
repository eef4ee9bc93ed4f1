//! Subscription registry for channel-level signals.
//!
//! A direct `(kind, detail)` -> handler-list table, not a general-purpose
//! signal framework — detail codes are small integers (unsolicited event
//! codes), so a `Vec` bucket per key is enough.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::ChannelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    Connected,
    Eof,
    Error,
    UnsolEvent(u32),
}

pub enum Signal<'a> {
    Connected,
    Eof,
    Error(&'a ChannelError),
    UnsolEvent { code: u32, data: &'a [u8] },
}

impl Signal<'_> {
    fn kind(&self) -> SignalKind {
        match self {
            Signal::Connected => SignalKind::Connected,
            Signal::Eof => SignalKind::Eof,
            Signal::Error(_) => SignalKind::Error,
            Signal::UnsolEvent { code, .. } => SignalKind::UnsolEvent(*code),
        }
    }
}

pub type Handler = Box<dyn FnMut(&Signal<'_>)>;

#[derive(Default)]
struct Bucket {
    next_id: u32,
    handlers: Vec<(u32, Handler)>,
}

/// Registry of signal subscribers, keyed by `(kind, detail)`.
///
/// Subscribing to `UnsolEvent(0)` receives every unsolicited event
/// regardless of code, in addition to whatever subscribers are registered
/// for that specific code.
#[derive(Default)]
pub struct EventRegistry {
    buckets: HashMap<SignalKind, Bucket>,
}

/// A stable handle returned by [`EventRegistry::subscribe`], usable with
/// [`EventRegistry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId {
    kind: SignalKind,
    id: u32,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, kind: SignalKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&Signal<'_>) + 'static,
    {
        let bucket = self.buckets.entry(kind).or_default();
        bucket.next_id += 1;
        let id = bucket.next_id;
        bucket.handlers.push((id, Box::new(handler)));
        SubscriptionId { kind, id }
    }

    pub fn unsubscribe(&mut self, sub: SubscriptionId) {
        if let Some(bucket) = self.buckets.get_mut(&sub.kind) {
            bucket.handlers.retain(|(id, _)| *id != sub.id);
        }
    }

    /// Dispatch `signal` to every matching subscriber of `registry`.
    /// Iterates a snapshot of handler ids taken before invoking any of
    /// them, so a handler that unsubscribes itself or another handler
    /// mid-dispatch is safe; a handler subscribed during this dispatch is
    /// not guaranteed to be observed by it.
    ///
    /// Takes `registry` by `&Rc<RefCell<Self>>` rather than `&mut self` so
    /// that no borrow of the registry is held while a handler runs — a
    /// handler is free to call back in and `subscribe`/`unsubscribe`
    /// through the same `Channel` without tripping a `BorrowMutError`.
    pub fn dispatch(registry: &Rc<RefCell<EventRegistry>>, signal: &Signal<'_>) {
        let kind = signal.kind();
        Self::dispatch_bucket(registry, kind, signal);
        if let SignalKind::UnsolEvent(code) = kind {
            if code != 0 {
                Self::dispatch_bucket(registry, SignalKind::UnsolEvent(0), signal);
            }
        }
    }

    fn dispatch_bucket(registry: &Rc<RefCell<EventRegistry>>, kind: SignalKind, signal: &Signal<'_>) {
        let ids: Vec<u32> = match registry.borrow().buckets.get(&kind) {
            Some(bucket) => bucket.handlers.iter().map(|(id, _)| *id).collect(),
            None => return,
        };
        for id in ids {
            // Temporarily take ownership of the handler out of the bucket,
            // and drop the borrow entirely before calling it — the handler
            // itself may re-enter `subscribe`/`unsubscribe`, or trigger
            // another dispatch, through the same `registry`.
            let taken = {
                let mut reg = registry.borrow_mut();
                reg.buckets.get_mut(&kind).and_then(|bucket| {
                    let pos = bucket.handlers.iter().position(|(hid, _)| *hid == id)?;
                    Some(bucket.handlers.remove(pos))
                })
            };
            if let Some((_, mut handler)) = taken {
                handler(signal);
                // Only put the handler back if it hasn't since been
                // unsubscribed (by itself or another handler called during
                // this dispatch) — otherwise a self-unsubscribing handler
                // would be silently resurrected here.
                let mut reg = registry.borrow_mut();
                if let Some(bucket) = reg.buckets.get_mut(&kind) {
                    if !bucket.handlers.iter().any(|(hid, _)| *hid == id) {
                        bucket.handlers.push((id, handler));
                    }
                }
            }
        }
    }
}
