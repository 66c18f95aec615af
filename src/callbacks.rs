//! The contract between the engine and its environment.
//!
//! The engine itself neither evaluates expressions nor executes content
//! nor talks to invoked services; everything with host-defined semantics
//! is pulled through this trait. The engine treats callback failures
//! according to the SCXML error policy: executable-content and invocation
//! errors are discarded (the host is expected to raise `error.execution`
//! on the internal queue from inside its implementation), guard errors
//! evaluate to false.

use thiserror::Error;

use crate::document::{ElementId, ScxmlDocument};
use crate::event::Event;
use crate::monitor::InterpreterMonitor;

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("executable content failed: {0}")]
    Execution(String),

    #[error("data initialization failed: {0}")]
    Data(String),

    #[error("invocation failed: {0}")]
    Invoke(String),
}

/// Callbacks consumed by [crate::engine::MicroStepEngine].
///
/// Element handles passed here always refer to the document given along
/// with them: `process` receives `<onentry>`, `<onexit>` or `<transition>`
/// elements whose children are the executable content, `init_data`
/// receives `<data>` elements, `invoke`/`uninvoke` receive `<invoke>`
/// elements and `raise_done_event` the completed state plus its optional
/// `<donedata>`.
pub trait MicroStepCallbacks {
    /// Dequeue the next internal event. Never blocks.
    fn dequeue_internal(&mut self) -> Option<Event>;

    /// Dequeue the next external event.
    ///
    /// Blocks while the queue is empty iff `blocking` is set. A blocked
    /// call may be released by the host with a sentinel, surfacing here as
    /// `None`.
    fn dequeue_external(&mut self, blocking: bool) -> Option<Event>;

    /// Match an event against a transition's event descriptor.
    fn is_matched(&mut self, event: &Event, descriptor: &str) -> bool {
        event.matches(descriptor)
    }

    /// *W3C says*:
    /// If a conditional expression cannot be evaluated as a boolean value
    /// or if its evaluation causes an error, the SCXML Processor must treat
    /// the expression as if it evaluated to 'false' and must place the
    /// error 'error.execution' in the internal event queue.
    fn is_true(&mut self, expression: &str) -> bool;

    /// Execute one block of executable content.
    fn process(&mut self, doc: &ScxmlDocument, block: ElementId) -> Result<(), CallbackError>;

    /// Evaluate one `<data>` initializer.
    fn init_data(&mut self, doc: &ScxmlDocument, data: ElementId) -> Result<(), CallbackError>;

    /// Start the service described by an `<invoke>` element.
    fn invoke(&mut self, doc: &ScxmlDocument, invocation: ElementId) -> Result<(), CallbackError>;

    /// Cancel a running invocation.
    fn uninvoke(&mut self, doc: &ScxmlDocument, invocation: ElementId);

    /// Enqueue `done.state.<id>` on the internal queue for the given state,
    /// evaluating the `<donedata>` template if present.
    fn raise_done_event(
        &mut self,
        doc: &ScxmlDocument,
        state: ElementId,
        done_data: Option<ElementId>,
    );

    /// The observation sink; a missing monitor is not an error.
    fn monitor(&mut self) -> Option<&mut (dyn InterpreterMonitor + '_)> {
        None
    }
}
