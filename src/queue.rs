//! A lightweight grouping handle over a [`Channel`], enabling bulk
//! cancellation of a related set of requests without affecting anything
//! else submitted on the same channel.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use crate::channel::Channel;
use crate::request::{DestroyCallback, Request, ResponseCallback};

pub(crate) struct QueueInner {
    pub channel: Channel,
    pub members: HashSet<u32>,
}

/// Groups a related set of requests on a [`Channel`] so they can be
/// cancelled together.
///
/// Dropping the last `Queue` handle does not cancel its members: any
/// request still in flight simply loses its queue back-reference and
/// completes (or times out) normally, exactly as if it had never been
/// submitted through a queue.
#[derive(Clone)]
pub struct Queue(Rc<RefCell<QueueInner>>);

impl Queue {
    pub fn new(channel: &Channel) -> Self {
        Queue(Rc::new(RefCell::new(QueueInner {
            channel: channel.clone(),
            members: HashSet::new(),
        })))
    }

    fn weak(&self) -> Weak<RefCell<QueueInner>> {
        Rc::downgrade(&self.0)
    }

    pub fn send(&self, request: Request, code: u32) -> u32 {
        self.send_full(request, code, None, None)
    }

    pub fn send_full(
        &self,
        request: Request,
        code: u32,
        response: Option<ResponseCallback>,
        destroy: Option<DestroyCallback>,
    ) -> u32 {
        request.0.borrow_mut().queue = Some(self.weak());
        let channel = self.0.borrow().channel.clone();
        let id = channel.send_request_full(request.clone(), code, response, destroy);
        if id == 0 {
            request.detach_from_queue();
        } else {
            self.0.borrow_mut().members.insert(id);
        }
        id
    }

    /// Cancel `id` iff it is currently a member of this queue. Returns
    /// `false` if the id is unknown or belongs to another queue.
    pub fn cancel(&self, id: u32, notify: bool) -> bool {
        if id == 0 || !self.0.borrow().members.contains(&id) {
            return false;
        }
        let channel = self.0.borrow().channel.clone();
        channel.cancel_request(id, notify)
    }

    /// Cancel every request currently in this queue.
    pub fn cancel_all(&self, notify: bool) {
        let ids: Vec<u32> = self.0.borrow_mut().members.drain().collect();
        let channel = self.0.borrow().channel.clone();
        for id in ids {
            channel.cancel_request(id, notify);
        }
    }

    pub fn len(&self) -> usize {
        self.0.borrow().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
