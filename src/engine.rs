//! The micro-step engine.
//!
//! One `step()` call advances the machine by at most one unit of work:
//! build the index, run one micro-step, signal a macro-step boundary, or
//! idle waiting for an external event. The selection algorithm operates
//! purely on the bit-sets precomputed by [crate::document_index]; the
//! semantics follow <https://www.w3.org/TR/scxml/#AlgorithmforSCXMLInterpretation>.
//!
//! The engine is single-threaded; events from other threads must arrive
//! through the host's thread-safe external queue behind
//! [crate::callbacks::MicroStepCallbacks::dequeue_external].

use std::collections::HashSet;

use crate::bitset::BitSet;
use crate::callbacks::MicroStepCallbacks;
use crate::common::{debug, warn};
use crate::document::{ElementId, ScxmlDocument, ATTR_ID, TAG_SCXML};
use crate::document_index::{DocumentIndex, IndexError, StateKind};
use crate::event::Event;
use crate::monitor::InterpreterIssue;

/// Result of one [MicroStepEngine::step] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
    /// The document index was built; no state was entered yet.
    Initialized,
    /// One transition set fired, or the initial configuration was entered.
    Microstepped,
    /// No more spontaneous transitions; the configuration is stable with
    /// respect to internal events.
    Macrostepped,
    /// No event available (only returned for non-blocking dequeues).
    Idle,
    /// Cancellation was observed; the next step unwinds and finishes.
    Cancelled,
    /// A top-level final state was reached or the machine was cancelled;
    /// repeated steps keep returning `Finished`.
    Finished,
}

// Engine flags. `Pristine` is the absence of all others.
const CTX_PRISTINE: u32 = 0x00;
const CTX_SPONTANEOUS: u32 = 0x01;
const CTX_INITIALIZED: u32 = 0x02;
const CTX_TOP_LEVEL_FINAL: u32 = 0x04;
const CTX_TRANSITION_FOUND: u32 = 0x08;
const CTX_FINISHED: u32 = 0x10;
// Only tracked to signal on_stable_configuration once.
const CTX_STABLE: u32 = 0x20;

/// Explicit replacement for the jump targets of the algorithm; the hook
/// ordering across these phases is part of the public monitor contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SelectTransitions,
    RememberHistory,
    EstablishEntrySet,
}

/// The micro-step engine: owns the document, its index and all runtime
/// bit-sets, and drives the host through [MicroStepCallbacks].
pub struct MicroStepEngine {
    doc: ScxmlDocument,
    callbacks: Box<dyn MicroStepCallbacks>,
    index: Option<DocumentIndex>,

    /// Currently active states.
    configuration: BitSet,
    /// States whose invokers are live.
    invocations: BitSet,
    /// Remembered members per history region, masked by the history
    /// state's completion.
    history: BitSet,
    /// States whose `<data>` has been evaluated.
    initialized_data: BitSet,

    flags: u32,
    /// The event being processed; `None` between external-event waits and
    /// while spontaneous transitions run.
    event: Option<Event>,
    /// Configurations seen since the last stable point, to detect cycles.
    microstep_configurations: HashSet<BitSet>,
    cancelled: bool,
}

impl MicroStepEngine {
    /// Create an engine over a parsed document. The document must have an
    /// `<scxml>` root; everything else is checked lazily at `init`.
    pub fn new(
        doc: ScxmlDocument,
        callbacks: Box<dyn MicroStepCallbacks>,
    ) -> Result<MicroStepEngine, IndexError> {
        if doc.is_empty() {
            return Err(IndexError::Empty);
        }
        if doc.tag(doc.root()) != TAG_SCXML {
            return Err(IndexError::NoScxmlRoot(doc.tag(doc.root()).to_string()));
        }
        Ok(MicroStepEngine {
            doc,
            callbacks,
            index: None,
            configuration: BitSet::with_capacity(0),
            invocations: BitSet::with_capacity(0),
            history: BitSet::with_capacity(0),
            initialized_data: BitSet::with_capacity(0),
            flags: CTX_PRISTINE,
            event: None,
            microstep_configurations: HashSet::new(),
            cancelled: false,
        })
    }

    /// Build the document index. One-shot; idempotent after the first
    /// success. Normally called implicitly by the first `step()`.
    pub fn init(&mut self) -> Result<(), IndexError> {
        if self.index.is_some() {
            return Ok(());
        }
        let index = DocumentIndex::build(&mut self.doc)?;
        let state_count = index.state_count();
        self.configuration = BitSet::with_capacity(state_count);
        self.invocations = BitSet::with_capacity(state_count);
        self.history = BitSet::with_capacity(state_count);
        self.initialized_data = BitSet::with_capacity(state_count);
        self.flags = CTX_PRISTINE;
        self.index = Some(index);
        Ok(())
    }

    /// Advance the machine by one unit of work.
    ///
    /// `blocking` controls only the external dequeue: with `blocking` the
    /// engine parks inside the callback until an event (or an unblocking
    /// sentinel) arrives, otherwise an empty external queue yields `Idle`.
    pub fn step(&mut self, blocking: bool) -> StepResult {
        if self.index.is_none() {
            match self.init() {
                Ok(()) => return StepResult::Initialized,
                Err(e) => {
                    // Misuse: the chart cannot be indexed at all.
                    warn!("Cannot initialize: {}", e);
                    self.flags |= CTX_FINISHED;
                    return StepResult::Finished;
                }
            }
        }
        let index = self.index.as_ref().unwrap();
        let state_count = index.state_count();
        let transition_count = index.transition_count();

        if self.flags & CTX_FINISHED != 0 {
            return StepResult::Finished;
        }

        if self.flags & CTX_TOP_LEVEL_FINAL != 0 {
            if let Some(m) = self.callbacks.monitor() {
                m.before_completion(&self.doc);
            }
            // Exit all remaining states, deepest first. The configuration
            // itself is left intact for inspection after Finished.
            for i in (0..state_count).rev() {
                if self.configuration.has(i) {
                    for block in &index.states[i].on_exit {
                        if let Err(e) = self.callbacks.process(&self.doc, *block) {
                            debug!("onexit content failed: {}", e);
                        }
                    }
                }
                if self.invocations.has(i) {
                    for invocation in &index.states[i].invoke {
                        self.callbacks.uninvoke(&self.doc, *invocation);
                    }
                    self.invocations.clear(i);
                }
            }
            self.flags |= CTX_FINISHED;
            if let Some(m) = self.callbacks.monitor() {
                m.after_completion(&self.doc);
            }
            return StepResult::Finished;
        }

        let mut exit_set = BitSet::with_capacity(state_count);
        let mut entry_set = BitSet::with_capacity(state_count);
        let mut target_set = BitSet::with_capacity(state_count);
        let mut tmp_states = BitSet::with_capacity(state_count);

        let mut conflicts = BitSet::with_capacity(transition_count);
        let mut trans_set = BitSet::with_capacity(transition_count);

        let mut phase;

        if self.flags == CTX_PRISTINE {
            // Entry bootstrap: enter the root's completion spontaneously.
            target_set.union(&index.states[0].completion);
            self.flags |= CTX_SPONTANEOUS | CTX_INITIALIZED;
            if let Some(m) = self.callbacks.monitor() {
                m.before_micro_step(&self.doc);
            }
            phase = Phase::EstablishEntrySet;
        } else if self.flags & CTX_SPONTANEOUS != 0 {
            // The next selection runs on the null event.
            self.event = None;
            phase = Phase::SelectTransitions;
        } else if let Some(event) = self.callbacks.dequeue_internal() {
            if let Some(m) = self.callbacks.monitor() {
                m.before_processing_event(&self.doc, &event);
            }
            self.event = Some(event);
            phase = Phase::SelectTransitions;
        } else {
            // Internal queue drained: sync invocations with the
            // configuration. This must not happen mid-macro-step.
            for i in 0..state_count {
                if !self.configuration.has(i) && self.invocations.has(i) {
                    for invocation in &index.states[i].invoke {
                        self.callbacks.uninvoke(&self.doc, *invocation);
                    }
                    self.invocations.clear(i);
                }
                if self.configuration.has(i) && !self.invocations.has(i) {
                    for invocation in &index.states[i].invoke {
                        if let Err(e) = self.callbacks.invoke(&self.doc, *invocation) {
                            debug!("invoke failed: {}", e);
                        }
                    }
                    self.invocations.set(i);
                }
            }

            if self.flags & CTX_STABLE == 0 {
                if let Some(m) = self.callbacks.monitor() {
                    m.on_stable_configuration(&self.doc);
                }
                self.microstep_configurations.clear();
                self.flags |= CTX_STABLE;
            }

            match self.callbacks.dequeue_external(blocking) {
                Some(event) => {
                    if let Some(m) = self.callbacks.monitor() {
                        m.before_processing_event(&self.doc, &event);
                    }
                    self.event = Some(event);
                    phase = Phase::SelectTransitions;
                }
                None => {
                    if self.cancelled {
                        // Finalize via the completion path on the next step.
                        self.flags |= CTX_TOP_LEVEL_FINAL;
                        return StepResult::Cancelled;
                    }
                    return StepResult::Idle;
                }
            }
        }

        loop {
            match phase {
                Phase::SelectTransitions => {
                    // An event is being consumed: signal on_stable again
                    // once this run of micro-steps settles.
                    self.flags &= !CTX_STABLE;

                    for (i, transition) in index.transitions.iter().enumerate() {
                        // Never select history or initial transitions
                        // automatically.
                        if transition.is_pseudo() {
                            continue;
                        }
                        if !self.configuration.has(transition.source) {
                            continue;
                        }
                        if conflicts.has(i) {
                            continue;
                        }
                        // Spontaneous transitions only against the null
                        // event, triggered ones only against a real event.
                        let matched = match (&self.event, &transition.event) {
                            (None, None) => true,
                            (Some(event), Some(descriptor)) => {
                                self.callbacks.is_matched(event, descriptor)
                            }
                            _ => false,
                        };
                        if !matched {
                            continue;
                        }
                        if let Some(cond) = &transition.cond {
                            if !self.callbacks.is_true(cond) {
                                continue;
                            }
                        }

                        self.flags |= CTX_TRANSITION_FOUND;
                        // Pre-empt everything this transition conflicts
                        // with; later (lower-priority) candidates are
                        // skipped above.
                        conflicts.union(&transition.conflicts);
                        target_set.union(&transition.target);
                        exit_set.union(&transition.exit_set);
                        trans_set.set(i);
                    }

                    exit_set.intersect(&self.configuration);

                    if self.flags & CTX_TRANSITION_FOUND != 0 {
                        self.flags |= CTX_SPONTANEOUS;
                        self.flags &= !CTX_TRANSITION_FOUND;
                        if let Some(m) = self.callbacks.monitor() {
                            m.before_micro_step(&self.doc);
                        }
                        phase = Phase::RememberHistory;
                    } else {
                        self.flags &= !CTX_SPONTANEOUS;
                        return StepResult::Macrostepped;
                    }
                }

                Phase::RememberHistory => {
                    for i in 0..state_count {
                        let state = &index.states[i];
                        if state.kind.is_history() && exit_set.has(state.parent) {
                            // The region is about to be left: remember its
                            // active members.
                            tmp_states.clear_all();
                            tmp_states.union(&state.completion);
                            tmp_states.intersect(&self.configuration);
                            self.history.and_not(&state.completion);
                            self.history.union(&tmp_states);
                        }
                    }
                    phase = Phase::EstablishEntrySet;
                }

                Phase::EstablishEntrySet => {
                    entry_set.union(&target_set);

                    // First pass: close over ancestors.
                    let mut cursor = entry_set.first_one();
                    while let Some(i) = cursor {
                        entry_set.union(&index.states[i].ancestors);
                        cursor = entry_set.next_one(i);
                    }

                    // Second pass: descend into defaults. Children carry
                    // higher indices than their parents, so an ascending
                    // cursor visits everything added below.
                    let mut cursor = entry_set.first_one();
                    while let Some(i) = cursor {
                        match index.states[i].kind {
                            StateKind::Atomic | StateKind::Final => {}

                            StateKind::Parallel => {
                                entry_set.union(&index.states[i].completion);
                            }

                            StateKind::HistoryShallow | StateKind::HistoryDeep => {
                                enter_history(
                                    self.callbacks.as_mut(),
                                    &self.doc,
                                    index,
                                    &self.history,
                                    &self.configuration,
                                    i,
                                    &mut entry_set,
                                    &mut trans_set,
                                );
                            }

                            StateKind::Initial => {
                                for (j, transition) in index.transitions.iter().enumerate() {
                                    if transition.source != i {
                                        continue;
                                    }
                                    trans_set.set(j);
                                    // The pseudo-state itself is never
                                    // entered.
                                    entry_set.clear(i);
                                    entry_set.union(&transition.target);
                                    for k in (i + 1)..state_count {
                                        if transition.target.has(k) {
                                            entry_set.union(&index.states[k].ancestors);
                                        }
                                    }
                                }
                            }

                            StateKind::Compound => {
                                // Enter the default completion unless a
                                // child is already scheduled or stays
                                // active.
                                let state = &index.states[i];
                                if !entry_set.intersects(&state.children)
                                    && (!self.configuration.intersects(&state.children)
                                        || exit_set.intersects(&state.children))
                                {
                                    entry_set.union(&state.completion);
                                    // A completion naming a deep descendant
                                    // needs its ancestor chain as well.
                                    let members: Vec<usize> =
                                        state.completion.iter_ones().collect();
                                    for j in members {
                                        if index.states[j].parent != i {
                                            entry_set.union(&index.states[j].ancestors);
                                        }
                                    }
                                }
                            }
                        }
                        cursor = entry_set.next_one(i);
                    }
                    break;
                }
            }
        }

        /* Exit states, deepest first. */
        for i in exit_set.iter_ones_rev() {
            if !self.configuration.has(i) {
                continue;
            }
            if let Some(m) = self.callbacks.monitor() {
                m.before_exiting_state(&self.doc, index.states[i].element);
            }
            for block in &index.states[i].on_exit {
                if let Err(e) = self.callbacks.process(&self.doc, *block) {
                    debug!("onexit content failed: {}", e);
                }
            }
            self.configuration.clear(i);
            if let Some(m) = self.callbacks.monitor() {
                m.after_exiting_state(&self.doc, index.states[i].element);
            }
        }

        /* Take transitions (except history and initial ones). */
        for i in trans_set.iter_ones() {
            let transition = &index.transitions[i];
            if transition.is_pseudo() {
                continue;
            }
            if let Some(m) = self.callbacks.monitor() {
                m.before_taking_transition(&self.doc, transition.element);
            }
            if let Some(content) = transition.content {
                if let Err(e) = self.callbacks.process(&self.doc, content) {
                    debug!("transition content failed: {}", e);
                }
            }
            if let Some(m) = self.callbacks.monitor() {
                m.after_taking_transition(&self.doc, transition.element);
            }
        }

        /* Enter states in document order. */
        for i in entry_set.iter_ones() {
            if self.configuration.has(i) {
                continue;
            }
            let state = &index.states[i];
            if state.kind.is_pseudo() {
                continue;
            }

            if let Some(m) = self.callbacks.monitor() {
                m.before_entering_state(&self.doc, state.element);
            }
            self.configuration.set(i);

            if !self.initialized_data.has(i) {
                for data in &state.data {
                    if let Err(e) = self.callbacks.init_data(&self.doc, *data) {
                        debug!("data initialization failed: {}", e);
                    }
                }
                self.initialized_data.set(i);
            }

            for block in &state.on_entry {
                if let Err(e) = self.callbacks.process(&self.doc, *block) {
                    debug!("onentry content failed: {}", e);
                }
            }

            if let Some(m) = self.callbacks.monitor() {
                m.after_entering_state(&self.doc, state.element);
            }

            // Take the history and initial transitions that led into this
            // state.
            for j in 0..transition_count {
                let transition = &index.transitions[j];
                if trans_set.has(j)
                    && transition.is_pseudo()
                    && index.states[transition.source].parent == i
                {
                    if let Some(m) = self.callbacks.monitor() {
                        m.before_taking_transition(&self.doc, transition.element);
                    }
                    if let Some(content) = transition.content {
                        if let Err(e) = self.callbacks.process(&self.doc, content) {
                            debug!("transition content failed: {}", e);
                        }
                    }
                    if let Some(m) = self.callbacks.monitor() {
                        m.after_taking_transition(&self.doc, transition.element);
                    }
                }
            }

            if state.kind == StateKind::Final {
                if state.ancestors.count_ones() == 1 && state.ancestors.has(0) {
                    // A final child of the root: the machine is done.
                    self.flags |= CTX_TOP_LEVEL_FINAL;
                } else {
                    self.callbacks.raise_done_event(
                        &self.doc,
                        index.states[state.parent].element,
                        state.done_data,
                    );
                }

                // Is this the last final state to complete an ancestor
                // parallel? Gather the active descendants of each such
                // parallel; the ancestor chains of final members cancel
                // pairwise, anything left means an unfinished region.
                for j in 0..state_count {
                    if index.states[j].kind != StateKind::Parallel || !state.ancestors.has(j) {
                        continue;
                    }
                    tmp_states.clear_all();
                    for k in self.configuration.iter_ones() {
                        if index.states[k].ancestors.has(j) {
                            if index.states[k].kind == StateKind::Final {
                                tmp_states.symmetric_difference(&index.states[k].ancestors);
                            } else {
                                tmp_states.set(k);
                            }
                        }
                    }
                    if tmp_states.none() {
                        self.callbacks.raise_done_event(
                            &self.doc,
                            index.states[j].element,
                            index.states[j].done_data,
                        );
                    }
                }
            }
        }

        if let Some(m) = self.callbacks.monitor() {
            m.after_micro_step(&self.doc);
        }

        if self.microstep_configurations.contains(&self.configuration) {
            let issue = InterpreterIssue::warning(
                "Reentering same configuration during microstep - possible endless loop",
                None,
            );
            if let Some(m) = self.callbacks.monitor() {
                m.report_issue(&self.doc, &issue);
            }
        }
        self.microstep_configurations
            .insert(self.configuration.clone());

        StepResult::Microstepped
    }

    /// Mark for graceful shutdown; observed at the external-dequeue point.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    /// Return to pristine: clears configuration, history, initialized data
    /// and invocations. The index is kept.
    pub fn reset(&mut self) {
        self.cancelled = false;
        self.flags = CTX_PRISTINE;
        self.configuration.clear_all();
        self.history.clear_all();
        self.initialized_data.clear_all();
        self.invocations.clear_all();
        self.microstep_configurations.clear();
        self.event = None;
    }

    /// True if the state with the given id attribute is active.
    pub fn is_in_state(&self, state_id: &str) -> bool {
        match &self.index {
            Some(index) => match index.state_by_id(state_id) {
                Some(i) => self.configuration.has(i),
                None => false,
            },
            None => false,
        }
    }

    /// The active state elements, in document order.
    pub fn configuration(&self) -> Vec<ElementId> {
        match &self.index {
            Some(index) => self
                .configuration
                .iter_ones()
                .map(|i| index.states[i].element)
                .collect(),
            None => Vec::new(),
        }
    }

    /// The id attributes of the active states (anonymous states are
    /// skipped), in document order.
    pub fn configuration_ids(&self) -> Vec<String> {
        self.configuration()
            .iter()
            .filter_map(|e| self.doc.attribute(*e, ATTR_ID))
            .map(str::to_string)
            .collect()
    }

    pub fn document(&self) -> &ScxmlDocument {
        &self.doc
    }

    /// The structural index; `None` before `init`.
    pub fn index(&self) -> Option<&DocumentIndex> {
        self.index.as_ref()
    }

    /// Debug invariant checker over the current configuration.
    /// See <https://www.w3.org/TR/scxml/#LegalStateConfigurations>.
    pub fn has_legal_configuration(&self) -> bool {
        let index = match &self.index {
            Some(index) => index,
            None => return true,
        };
        if self.configuration.none() {
            // Pristine; nothing to check.
            return true;
        }

        // The configuration contains no pseudo-states.
        for i in self.configuration.iter_ones() {
            if index.states[i].kind.is_pseudo() {
                warn!("Invalid configuration: pseudo-state #{} is active", i);
                return false;
            }
        }

        // The configuration contains one or more atomic states.
        if !self
            .configuration
            .iter_ones()
            .any(|i| matches!(index.states[i].kind, StateKind::Atomic | StateKind::Final))
        {
            warn!("Invalid configuration: no atomic state is active");
            return false;
        }

        for i in self.configuration.iter_ones() {
            let state = &index.states[i];
            match state.kind {
                // An active atomic state implies all its ancestors.
                StateKind::Atomic | StateKind::Final => {
                    if !state.ancestors.is_subset(&self.configuration) {
                        warn!(
                            "Invalid configuration: atomic state #{} is active, but not all of its ancestors are",
                            i
                        );
                        return false;
                    }
                }
                // An active compound contains exactly one active child.
                StateKind::Compound => {
                    let active_children = state
                        .children
                        .iter_ones()
                        .filter(|c| {
                            index.states[*c].parent == i
                                && !index.states[*c].kind.is_pseudo()
                                && self.configuration.has(*c)
                        })
                        .count();
                    if active_children != 1 {
                        warn!(
                            "Invalid configuration: compound #{} has {} active children",
                            i, active_children
                        );
                        return false;
                    }
                }
                // An active parallel contains all its children.
                StateKind::Parallel => {
                    let missing = state
                        .children
                        .iter_ones()
                        .filter(|c| {
                            index.states[*c].parent == i
                                && !index.states[*c].kind.is_pseudo()
                                && !self.configuration.has(*c)
                        })
                        .count();
                    if missing != 0 {
                        warn!(
                            "Invalid configuration: parallel #{} has {} inactive children",
                            i, missing
                        );
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }
}

/// Entry-set handling for a history pseudo-state: replay the remembered
/// members of its region, or fall back to the history's default
/// transition when nothing is remembered and the parent is inactive.
#[allow(clippy::too_many_arguments)]
fn enter_history(
    callbacks: &mut dyn MicroStepCallbacks,
    doc: &ScxmlDocument,
    index: &DocumentIndex,
    history: &BitSet,
    configuration: &BitSet,
    i: usize,
    entry_set: &mut BitSet,
    trans_set: &mut BitSet,
) {
    let state = &index.states[i];
    let state_count = index.state_count();

    if !state.completion.intersects(history) && !configuration.has(state.parent) {
        // Nothing remembered for this region: the default transition
        // applies. SCXML mandates exactly one.
        let mut default_transition = None;
        for (j, transition) in index.transitions.iter().enumerate() {
            if transition.source != i {
                continue;
            }
            if default_transition.is_none() {
                default_transition = Some(j);
            } else if let Some(m) = callbacks.monitor() {
                m.report_issue(
                    doc,
                    &InterpreterIssue::warning(
                        "History state has more than one default transition",
                        Some(state.element),
                    ),
                );
            }
        }
        match default_transition {
            None => {
                if let Some(m) = callbacks.monitor() {
                    m.report_issue(
                        doc,
                        &InterpreterIssue::warning(
                            "History state has neither stored history nor a default transition",
                            Some(state.element),
                        ),
                    );
                }
            }
            Some(j) => {
                let transition = &index.transitions[j];
                entry_set.union(&transition.target);
                if state.kind == StateKind::HistoryDeep
                    && !transition.target.intersects(&state.children)
                {
                    // Deep defaults may point far down: pull in the
                    // ancestor chain of the target.
                    for k in (i + 1)..state_count {
                        if transition.target.has(k) {
                            entry_set.union(&index.states[k].ancestors);
                            break;
                        }
                    }
                }
                trans_set.set(j);
            }
        }
    } else {
        let mut remembered = state.completion.clone();
        remembered.intersect(history);
        entry_set.union(&remembered);

        if state.kind == StateKind::HistoryDeep {
            // A deep history region may contain nested histories; they
            // must be replayed as well.
            for j in (i + 1)..state_count {
                if state.completion.has(j) && entry_set.has(j) && index.states[j].has_history_child
                {
                    for k in (j + 1)..state_count {
                        if index.states[k].kind.is_history() && index.states[j].children.has(k) {
                            entry_set.set(k);
                        }
                    }
                }
            }
        }
    }
}
