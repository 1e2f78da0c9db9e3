//! Point-to-point record channels between blocks.
//!
//! A link has exactly one producer ([`LinkTx`]) and one or more consumer
//! endpoints ([`LinkRx`]). Every endpoint owns an independent bounded queue,
//! so fan-out consumers each see the full sequence at their own pace.
//!
//! ## Queue policy
//!
//! `send` never blocks. When an endpoint queue is full the oldest unread
//! record of that endpoint is discarded and counted in
//! [`LinkRx::dropped`]. Delivery order per endpoint equals send order;
//! nothing is guaranteed across links.
//!
//! ## Label set
//!
//! The label set of the first record sent fixes the link's schema. A later
//! record with different labels is rejected with [`LinkError::LabelMismatch`].

use crate::cancel::CancelToken;
use parking_lot::{Condvar, Mutex};
use rig_common::consts::CANCEL_POLL_INTERVAL_MS;
use rig_common::record::Record;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised by the producer side of a link.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// A record's labels differ from the first record sent on this link.
    #[error("link '{link}' carries labels {expected:?}, got {got:?}")]
    LabelMismatch {
        /// Link name.
        link: String,
        /// Labels fixed by the first send.
        expected: Vec<String>,
        /// Labels of the rejected record.
        got: Vec<String>,
    },
}

/// Why a blocking receive returned without a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RecvError {
    /// The producer closed the link and the queue is drained.
    #[error("link closed")]
    Closed,
    /// The run was cancelled while waiting.
    #[error("receive cancelled")]
    Cancelled,
}

#[derive(Debug)]
struct EndpointState {
    queue: VecDeque<Record>,
    last: Option<Record>,
    closed: bool,
    dropped: u64,
}

#[derive(Debug)]
struct Endpoint {
    link: Arc<str>,
    capacity: usize,
    state: Mutex<EndpointState>,
    ready: Condvar,
}

impl Endpoint {
    fn push(&self, record: Record) {
        let mut state = self.state.lock();
        if state.queue.len() >= self.capacity {
            state.queue.pop_front();
            state.dropped += 1;
            if state.dropped == 1 || state.dropped % 1000 == 0 {
                debug!(
                    "Link '{}' endpoint full (capacity {}), {} records dropped so far",
                    self.link, self.capacity, state.dropped
                );
            }
        }
        state.queue.push_back(record);
        self.ready.notify_one();
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.ready.notify_all();
    }
}

/// Producer half of a link.
///
/// Dropping the producer closes the link: blocked consumers wake up and
/// receive [`RecvError::Closed`] once their queue is drained.
#[derive(Debug)]
pub struct LinkTx {
    name: Arc<str>,
    capacity: usize,
    endpoints: Vec<Arc<Endpoint>>,
    labels: Option<Vec<String>>,
    sent: u64,
}

/// Create a link with no consumer yet.
///
/// # Panics
/// Panics if `capacity` is zero.
pub fn link(name: impl Into<String>, capacity: usize) -> LinkTx {
    assert!(capacity > 0, "link capacity must be non-zero");
    LinkTx {
        name: Arc::from(name.into()),
        capacity,
        endpoints: Vec::new(),
        labels: None,
        sent: 0,
    }
}

impl LinkTx {
    /// Add a consumer endpoint. Only records sent afterwards reach it.
    pub fn subscribe(&mut self) -> LinkRx {
        let endpoint = Arc::new(Endpoint {
            link: Arc::clone(&self.name),
            capacity: self.capacity,
            state: Mutex::new(EndpointState {
                queue: VecDeque::with_capacity(self.capacity.min(256)),
                last: None,
                closed: false,
                dropped: 0,
            }),
            ready: Condvar::new(),
        });
        self.endpoints.push(Arc::clone(&endpoint));
        LinkRx { endpoint }
    }

    /// Link name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of consumer endpoints.
    pub fn consumer_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Records accepted so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Enqueue `record` on every endpoint. Never blocks.
    ///
    /// # Errors
    /// `LinkError::LabelMismatch` if the label set differs from the first send.
    pub fn send(&mut self, record: Record) -> Result<(), LinkError> {
        match &self.labels {
            Some(expected) => {
                let matches = expected.len() == record.len()
                    && expected.iter().map(String::as_str).eq(record.labels());
                if !matches {
                    return Err(LinkError::LabelMismatch {
                        link: self.name.to_string(),
                        expected: expected.clone(),
                        got: record.labels().map(str::to_string).collect(),
                    });
                }
            }
            None => {
                self.labels = Some(record.labels().map(str::to_string).collect());
            }
        }

        self.sent += 1;
        trace!("Link '{}' send #{}", self.name, self.sent);

        if let Some((last, rest)) = self.endpoints.split_last() {
            for endpoint in rest {
                endpoint.push(record.clone());
            }
            last.push(record);
        }
        Ok(())
    }

    /// Close the link explicitly. Equivalent to dropping the producer.
    pub fn close(self) {}
}

impl Drop for LinkTx {
    fn drop(&mut self) {
        for endpoint in &self.endpoints {
            endpoint.close();
        }
        debug!("Link '{}' closed after {} records", self.name, self.sent);
    }
}

/// Consumer endpoint of a link.
///
/// Exactly one reader owns an endpoint; its read cursor is independent of
/// every other endpoint of the same link.
#[derive(Debug)]
pub struct LinkRx {
    endpoint: Arc<Endpoint>,
}

impl LinkRx {
    /// Name of the link this endpoint belongs to.
    pub fn name(&self) -> &str {
        &self.endpoint.link
    }

    /// Block until the oldest unread record is available.
    ///
    /// Returns `None` once the link is closed and drained.
    pub fn recv(&self) -> Option<Record> {
        let mut state = self.endpoint.state.lock();
        loop {
            if let Some(record) = state.queue.pop_front() {
                state.last = Some(record.clone());
                return Some(record);
            }
            if state.closed {
                return None;
            }
            self.endpoint.ready.wait(&mut state);
        }
    }

    /// [`recv`](Self::recv) that also gives up when `cancel` fires.
    pub fn recv_cancellable(&self, cancel: &CancelToken) -> Result<Record, RecvError> {
        let slice = Duration::from_millis(CANCEL_POLL_INTERVAL_MS);
        let mut state = self.endpoint.state.lock();
        loop {
            if let Some(record) = state.queue.pop_front() {
                state.last = Some(record.clone());
                return Ok(record);
            }
            if state.closed {
                return Err(RecvError::Closed);
            }
            if cancel.is_cancelled() {
                return Err(RecvError::Cancelled);
            }
            self.endpoint.ready.wait_for(&mut state, slice);
        }
    }

    /// Pop the oldest unread record without blocking.
    pub fn try_recv(&self) -> Option<Record> {
        let mut state = self.endpoint.state.lock();
        let record = state.queue.pop_front()?;
        state.last = Some(record.clone());
        Some(record)
    }

    /// Newest record, discarding every older unread one. Never blocks.
    ///
    /// Repeated calls with no intervening send return the same record.
    /// Returns `None` only if this endpoint never received anything.
    pub fn recv_last(&self) -> Option<Record> {
        let mut state = self.endpoint.state.lock();
        if let Some(newest) = state.queue.pop_back() {
            state.queue.clear();
            state.last = Some(newest);
        }
        state.last.clone()
    }

    /// Whether at least one unread record is available.
    pub fn poll(&self) -> bool {
        !self.endpoint.state.lock().queue.is_empty()
    }

    /// Number of unread records.
    pub fn pending(&self) -> usize {
        self.endpoint.state.lock().queue.len()
    }

    /// Discard every unread record.
    pub fn clear(&self) {
        self.endpoint.state.lock().queue.clear();
    }

    /// Whether the producer closed the link.
    pub fn is_closed(&self) -> bool {
        self.endpoint.state.lock().closed
    }

    /// Records discarded on this endpoint because its queue was full.
    pub fn dropped(&self) -> u64 {
        self.endpoint.state.lock().dropped
    }
}
