//! Events and the queue types used to feed them to the engine.

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};

/// *W3C says*:
/// The SCXML Processor must set the event type to: "platform" (for events
/// raised by the platform itself, such as error events), "internal" (for
/// events raised by \<raise\> and \<send\> with target '_internal') or
/// "external" (for all other events).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Platform,
    Internal,
    External,
}

/// An event as processed by the engine.
///
/// Only the fields the selection algorithm needs are modelled here; the
/// host is free to carry richer payloads on its side of the callbacks.
#[derive(Debug, Clone)]
pub struct Event {
    /// The name matched against the 'event' attribute of \<transition\>.
    pub name: String,
    pub etype: EventType,
    /// Payload as delivered by the sending entity.
    pub data: Option<String>,
    /// Set if this event was generated by an invoked child process.
    pub invoke_id: Option<String>,
}

impl Event {
    pub fn new(name: &str, etype: EventType) -> Event {
        Event {
            name: name.to_string(),
            etype,
            data: None,
            invoke_id: None,
        }
    }

    pub fn external(name: &str) -> Event {
        Event::new(name, EventType::External)
    }

    pub fn internal(name: &str) -> Event {
        Event::new(name, EventType::Internal)
    }

    /// A platform error event, e.g. `error("execution")`.
    pub fn error(name: &str) -> Event {
        Event::new(&format!("error.{}", name), EventType::Platform)
    }

    /// The `done.state.<id>` event raised when a compound or parallel state
    /// completes.
    pub fn done_state(state_id: &str, data: Option<String>) -> Event {
        let mut event = Event::new(&format!("done.state.{}", state_id), EventType::Platform);
        event.data = data;
        event
    }

    /// Match this event against a transition's event descriptor.
    /// See [matches_descriptor].
    pub fn matches(&self, descriptor: &str) -> bool {
        matches_descriptor(&self.name, descriptor)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// *W3C says*:
/// An event descriptor matches an event name if its string of tokens is an
/// exact match or a prefix of the set of tokens in the event's name. In all
/// cases, the token matching is case sensitive.\
/// \
/// A transition's 'event' attribute may hold several descriptors separated
/// by spaces; `*` matches any event, and a trailing `.*` or `.` on a
/// descriptor is ignored.
pub fn matches_descriptor(event_name: &str, descriptor: &str) -> bool {
    for token in descriptor.split_ascii_whitespace() {
        if token == "*" {
            return true;
        }
        let token = token.strip_suffix(".*").unwrap_or(token);
        let token = token.strip_suffix('.').unwrap_or(token);
        if token.is_empty() {
            continue;
        }
        if event_name == token {
            return true;
        }
        if event_name.len() > token.len()
            && event_name.starts_with(token)
            && event_name.as_bytes()[token.len()] == b'.'
        {
            return true;
        }
    }
    false
}

/// Simple FIFO used for the internal event queue.
#[derive(Debug)]
pub struct Queue<T> {
    data: VecDeque<T>,
}

impl<T> Queue<T> {
    pub fn new() -> Queue<T> {
        Queue {
            data: VecDeque::new(),
        }
    }

    /// Puts e last in the queue.
    pub fn enqueue(&mut self, e: T) {
        self.data.push_back(e);
    }

    /// Removes and returns the first element in the queue.
    pub fn dequeue(&mut self) -> Option<T> {
        self.data.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}

impl<T> Default for Queue<T> {
    fn default() -> Self {
        Queue::new()
    }
}

/// Thread-safe FIFO used for the external event queue.
///
/// Producers on other threads hold a clone of the [Sender]; the engine side
/// dequeues blocking or non-blocking. An unblock can be forced by sending a
/// sentinel the host maps to "no event".
#[derive(Debug)]
pub struct BlockingQueue<T> {
    sender: Sender<T>,
    receiver: Arc<Mutex<Receiver<T>>>,
}

impl<T> BlockingQueue<T> {
    pub fn new() -> BlockingQueue<T> {
        let (sender, receiver) = channel();
        BlockingQueue {
            receiver: Arc::new(Mutex::new(receiver)),
            sender,
        }
    }

    /// A sender handle for producer threads.
    pub fn sender(&self) -> Sender<T> {
        self.sender.clone()
    }

    /// Puts e last in the queue.
    pub fn enqueue(&mut self, e: T) {
        // Send can only fail when the receiver is dropped, which this
        // struct prevents.
        let _ = self.sender.send(e);
    }

    /// Removes and returns the first element, blocking while the queue is
    /// empty.
    pub fn dequeue_blocking(&mut self) -> Option<T> {
        match self.receiver.lock() {
            Ok(receiver) => receiver.recv().ok(),
            Err(_) => None,
        }
    }

    /// Removes and returns the first element if one is present.
    pub fn try_dequeue(&mut self) -> Option<T> {
        match self.receiver.lock() {
            Ok(receiver) => match receiver.try_recv() {
                Ok(e) => Some(e),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
            },
            Err(_) => None,
        }
    }
}

impl<T> Default for BlockingQueue<T> {
    fn default() -> Self {
        BlockingQueue::new()
    }
}
