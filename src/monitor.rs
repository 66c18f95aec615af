//! Observation hooks fired by the engine at well-defined moments.

use std::collections::HashSet;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::common::info;
use crate::document::{ElementId, ScxmlDocument, ATTR_ID};
use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// The interpreter cannot process the chart further.
    Fatal,
    /// Will not prevent further processing.
    Warning,
    Info,
}

/// A problem the engine noticed while processing, e.g. a malformed chart
/// or a suspected endless loop. Issues never abort a micro-step.
#[derive(Debug, Clone)]
pub struct InterpreterIssue {
    pub severity: IssueSeverity,
    pub message: String,
    pub element: Option<ElementId>,
}

impl InterpreterIssue {
    pub fn warning(message: &str, element: Option<ElementId>) -> InterpreterIssue {
        InterpreterIssue {
            severity: IssueSeverity::Warning,
            message: message.to_string(),
            element,
        }
    }
}

impl Display for InterpreterIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.severity, self.message)
    }
}

/// Monitor interface with an empty default implementation for every hook.
///
/// Within one micro-step the hooks observe the guaranteed ordering: state
/// exits in reverse document order, then transition content, then state
/// entries in document order. `on_stable_configuration` fires exactly once
/// per run of the internal queue going empty.
#[allow(unused_variables)]
pub trait InterpreterMonitor {
    fn before_micro_step(&mut self, doc: &ScxmlDocument) {}
    fn after_micro_step(&mut self, doc: &ScxmlDocument) {}

    fn before_entering_state(&mut self, doc: &ScxmlDocument, state: ElementId) {}
    fn after_entering_state(&mut self, doc: &ScxmlDocument, state: ElementId) {}

    fn before_exiting_state(&mut self, doc: &ScxmlDocument, state: ElementId) {}
    fn after_exiting_state(&mut self, doc: &ScxmlDocument, state: ElementId) {}

    fn before_taking_transition(&mut self, doc: &ScxmlDocument, transition: ElementId) {}
    fn after_taking_transition(&mut self, doc: &ScxmlDocument, transition: ElementId) {}

    fn before_processing_event(&mut self, doc: &ScxmlDocument, event: &Event) {}

    fn on_stable_configuration(&mut self, doc: &ScxmlDocument) {}

    fn before_completion(&mut self, doc: &ScxmlDocument) {}
    fn after_completion(&mut self, doc: &ScxmlDocument) {}

    fn report_issue(&mut self, doc: &ScxmlDocument, issue: &InterpreterIssue) {}
}

/// Trace scopes for [TraceMonitor].
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceMode {
    STATES,
    EVENTS,
    TRANSITIONS,
    MICROSTEPS,
    ISSUES,
    ALL,
}

impl Display for TraceMode {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for TraceMode {
    type Err = ();

    fn from_str(input: &str) -> Result<TraceMode, Self::Err> {
        match input.to_lowercase().as_str() {
            "states" => Ok(TraceMode::STATES),
            "events" => Ok(TraceMode::EVENTS),
            "transitions" => Ok(TraceMode::TRANSITIONS),
            "microsteps" => Ok(TraceMode::MICROSTEPS),
            "issues" => Ok(TraceMode::ISSUES),
            "all" => Ok(TraceMode::ALL),
            _ => Err(()),
        }
    }
}

/// A monitor that writes hook activity to the log, filtered by
/// [TraceMode] flags.
#[derive(Debug)]
pub struct TraceMonitor {
    trace_flags: HashSet<TraceMode>,
}

impl TraceMonitor {
    pub fn new() -> TraceMonitor {
        TraceMonitor {
            trace_flags: HashSet::new(),
        }
    }

    pub fn enable_trace(&mut self, flag: TraceMode) {
        self.trace_flags.insert(flag);
    }

    pub fn disable_trace(&mut self, flag: TraceMode) {
        self.trace_flags.remove(&flag);
    }

    pub fn is_trace(&self, flag: TraceMode) -> bool {
        self.trace_flags.contains(&flag) || self.trace_flags.contains(&TraceMode::ALL)
    }

    /// Displays a state or transition by its id attribute, falling back to
    /// the element handle.
    fn display(doc: &ScxmlDocument, element: ElementId) -> String {
        match doc.attribute(element, ATTR_ID) {
            Some(id) => format!("<{}>", id),
            None => format!("#{}", element),
        }
    }
}

impl Default for TraceMonitor {
    fn default() -> Self {
        TraceMonitor::new()
    }
}

impl InterpreterMonitor for TraceMonitor {
    fn before_micro_step(&mut self, _doc: &ScxmlDocument) {
        if self.is_trace(TraceMode::MICROSTEPS) {
            info!("Microstep >>");
        }
    }

    fn after_micro_step(&mut self, _doc: &ScxmlDocument) {
        if self.is_trace(TraceMode::MICROSTEPS) {
            info!("Microstep <<");
        }
    }

    fn after_entering_state(&mut self, doc: &ScxmlDocument, state: ElementId) {
        if self.is_trace(TraceMode::STATES) {
            info!("Enter {}", TraceMonitor::display(doc, state));
        }
    }

    fn after_exiting_state(&mut self, doc: &ScxmlDocument, state: ElementId) {
        if self.is_trace(TraceMode::STATES) {
            info!("Exit {}", TraceMonitor::display(doc, state));
        }
    }

    fn before_taking_transition(&mut self, doc: &ScxmlDocument, transition: ElementId) {
        if self.is_trace(TraceMode::TRANSITIONS) {
            info!("Transition {}", TraceMonitor::display(doc, transition));
        }
    }

    fn before_processing_event(&mut self, _doc: &ScxmlDocument, event: &Event) {
        if self.is_trace(TraceMode::EVENTS) {
            info!("Event -> {}", event);
        }
    }

    fn on_stable_configuration(&mut self, _doc: &ScxmlDocument) {
        if self.is_trace(TraceMode::MICROSTEPS) {
            info!("Stable configuration");
        }
    }

    fn report_issue(&mut self, _doc: &ScxmlDocument, issue: &InterpreterIssue) {
        if self.is_trace(TraceMode::ISSUES) {
            info!("Issue: {}", issue);
        }
    }
}
