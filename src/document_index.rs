//! The document index: dense state and transition records with all
//! structural relations of the chart precomputed as bit-sets.
//!
//! States are numbered in document order (after the child-resort step),
//! transitions in post-fix order. The post-fix numbering gives transitions
//! of inner states lower indices than those of their enclosing states, so
//! iterating transitions low-to-high during selection yields document-order
//! priority for free.

use std::collections::HashMap;

use thiserror::Error;

use crate::bitset::BitSet;
#[cfg(feature = "Debug_Index")]
use crate::common::debug;
use crate::common::warn;
use crate::document::{
    is_state_tag, ElementId, ScxmlDocument, ATTR_BINDING, ATTR_COND, ATTR_EVENT, ATTR_ID,
    ATTR_INITIAL, ATTR_TARGET, ATTR_TYPE, TAG_DATA, TAG_DATAMODEL, TAG_DONEDATA, TAG_FINAL,
    TAG_HISTORY, TAG_INITIAL, TAG_INVOKE, TAG_ON_ENTRY, TAG_ON_EXIT, TAG_PARALLEL, TAG_SCRIPT,
    TAG_SCXML, TAG_STATE, TAG_TRANSITION,
};

/// Index of a state in [DocumentIndex::states] (= its document order).
pub type StateIndex = usize;
/// Index of a transition in [DocumentIndex::transitions] (post-fix order).
pub type TransitionIndex = usize;

/// *W3C says*:
/// "early" or "late", default is "early". See 5.3.3 Data Binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingType {
    Early,
    Late,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// An `<initial>` pseudo-state.
    Initial,
    Final,
    HistoryShallow,
    HistoryDeep,
    /// A `<state>` without state children.
    Atomic,
    Parallel,
    /// A `<state>` with state children; also used for the `<scxml>` root.
    Compound,
}

impl StateKind {
    pub fn is_history(&self) -> bool {
        matches!(self, StateKind::HistoryShallow | StateKind::HistoryDeep)
    }

    /// Pseudo-states never become part of the configuration.
    pub fn is_pseudo(&self) -> bool {
        matches!(
            self,
            StateKind::Initial | StateKind::HistoryShallow | StateKind::HistoryDeep
        )
    }
}

/// One state record. All bit-sets are over state indices.
#[derive(Debug)]
pub struct State {
    pub element: ElementId,
    pub kind: StateKind,
    /// Set when a direct child is a history pseudo-state.
    pub has_history_child: bool,
    /// Index of the enclosing state; the root is its own parent.
    pub parent: StateIndex,
    /// Strict ancestors, up to and including the root.
    pub ancestors: BitSet,
    /// All strict descendants.
    pub children: BitSet,
    /// The states entered when this state is entered without an explicit
    /// target; for history states the coverage mask of the remembered
    /// region.
    pub completion: BitSet,
    /// `<onentry>` blocks in document order (`<script>` blocks for the root).
    pub on_entry: Vec<ElementId>,
    /// `<onexit>` blocks in document order.
    pub on_exit: Vec<ElementId>,
    pub invoke: Vec<ElementId>,
    /// `<data>` elements owned by this state; under early binding the whole
    /// chart's data hangs off the root.
    pub data: Vec<ElementId>,
    pub done_data: Option<ElementId>,
}

/// One transition record. `target` and `exit_set` are over state indices,
/// `conflicts` over transition indices.
#[derive(Debug)]
pub struct Transition {
    pub element: ElementId,
    pub source: StateIndex,
    pub target: BitSet,
    /// States that could be exited when this transition fires; intersected
    /// with the configuration at runtime.
    pub exit_set: BitSet,
    /// Transitions pre-empted when this transition is selected (including
    /// the transition itself).
    pub conflicts: BitSet,
    pub event: Option<String>,
    pub cond: Option<String>,
    /// The transition had no 'target' attribute at all.
    pub is_targetless: bool,
    pub is_internal: bool,
    /// Default transition of a history state.
    pub from_history: bool,
    /// Transition inside an `<initial>` element.
    pub from_initial: bool,
    /// The transition element itself when it carries executable content.
    pub content: Option<ElementId>,
}

impl Transition {
    /// True for transitions without an 'event' attribute; they are only
    /// selected against the null event.
    pub fn is_spontaneous(&self) -> bool {
        self.event.is_none()
    }

    /// History and initial transitions are never selected automatically.
    pub fn is_pseudo(&self) -> bool {
        self.from_history || self.from_initial
    }
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("document root must be <scxml>, found <{0}>")]
    NoScxmlRoot(String),

    #[error("document contains no elements")]
    Empty,
}

/// The immutable structural index of one chart, built once at `init`.
#[derive(Debug)]
pub struct DocumentIndex {
    pub states: Vec<State>,
    pub transitions: Vec<Transition>,
    pub binding: BindingType,
    state_ids: HashMap<String, StateIndex>,
    element_to_state: HashMap<ElementId, StateIndex>,
}

impl DocumentIndex {
    /// Walk the document once and precompute all relations.
    ///
    /// The only mutation of the document is the child-resort step, which
    /// moves `<initial>` children first, then deep histories, then shallow
    /// histories; the remainder keeps its order. The resorting is purely
    /// structural: it lets the entry-set descent visit structural entry
    /// points before their siblings.
    pub fn build(doc: &mut ScxmlDocument) -> Result<DocumentIndex, IndexError> {
        if doc.is_empty() {
            return Err(IndexError::Empty);
        }
        let root = doc.root();
        if doc.tag(root) != TAG_SCXML {
            return Err(IndexError::NoScxmlRoot(doc.tag(root).to_string()));
        }

        resort_children(doc, root);

        let binding = match doc.attribute(root, ATTR_BINDING) {
            Some(b) if b.eq_ignore_ascii_case("late") => BindingType::Late,
            _ => BindingType::Early,
        };

        /* -- All things states -- */

        let elements = doc.in_document_order(
            &[
                TAG_SCXML,
                TAG_STATE,
                TAG_PARALLEL,
                TAG_INITIAL,
                TAG_FINAL,
                TAG_HISTORY,
            ],
            root,
        );
        let state_count = elements.len();

        let mut index = DocumentIndex {
            states: Vec::with_capacity(state_count),
            transitions: Vec::new(),
            binding,
            state_ids: HashMap::new(),
            element_to_state: HashMap::new(),
        };

        for (i, element) in elements.iter().enumerate() {
            index.element_to_state.insert(*element, i);
            index.states.push(State {
                element: *element,
                kind: StateKind::Atomic,
                has_history_child: false,
                parent: 0,
                ancestors: BitSet::with_capacity(state_count),
                children: BitSet::with_capacity(state_count),
                completion: BitSet::with_capacity(state_count),
                on_entry: Vec::new(),
                on_exit: Vec::new(),
                invoke: Vec::new(),
                data: Vec::new(),
                done_data: None,
            });
        }

        if binding == BindingType::Early && state_count > 0 {
            // All data elements of the chart hang off the root state.
            let mut all_data = Vec::new();
            for dm in doc.in_document_order(&[TAG_DATAMODEL], root) {
                all_data.extend(doc.children_by_tag(dm, TAG_DATA));
            }
            index.states[0].data = all_data;
        }

        for i in 0..state_count {
            let element = index.states[i].element;

            if let Some(id) = doc.attribute(element, ATTR_ID) {
                index.state_ids.insert(id.to_string(), i);
            }

            index.states[i].on_entry = doc.children_by_tag(element, TAG_ON_ENTRY);
            index.states[i].on_exit = doc.children_by_tag(element, TAG_ON_EXIT);
            index.states[i].invoke = doc.children_by_tag(element, TAG_INVOKE);
            if i == 0 {
                // Global scripts run as onentry of <scxml>.
                index.states[i].on_entry = doc.children_by_tag(element, TAG_SCRIPT);
            }

            index.states[i].done_data = doc.first_child_by_tag(element, TAG_DONEDATA);

            if binding == BindingType::Late {
                let mut data = Vec::new();
                for dm in doc.children_by_tag(element, TAG_DATAMODEL) {
                    data.extend(doc.children_by_tag(dm, TAG_DATA));
                }
                index.states[i].data = data;
            }

            index.states[i].kind = state_kind(doc, element);
            index.states[i].has_history_child =
                doc.first_child_by_tag(element, TAG_HISTORY).is_some();

            // Parent and ancestors, walking up to the root.
            let mut up = doc.get(element).parent;
            let mut direct = true;
            while let Some(p) = up {
                if let Some(&pi) = index.element_to_state.get(&p) {
                    if direct {
                        index.states[i].parent = pi;
                        direct = false;
                    }
                    index.states[i].ancestors.set(pi);
                }
                up = doc.get(p).parent;
            }
        }

        // Descendant sets are the transpose of the ancestor sets.
        for i in 0..state_count {
            let ancestors: Vec<StateIndex> = index.states[i].ancestors.iter_ones().collect();
            for a in ancestors {
                index.states[a].children.set(i);
            }
        }

        for i in 0..state_count {
            let completion = index.completion_elements(doc, i);
            for element in completion {
                if let Some(&ci) = index.element_to_state.get(&element) {
                    index.states[i].completion.set(ci);
                }
            }
            #[cfg(feature = "Debug_Index")]
            debug!("state {} completion {:?}", i, index.states[i].completion);
        }

        /* -- All things transitions -- */

        let trans_elements = doc.in_postfix_order(&[TAG_TRANSITION], root);
        let trans_count = trans_elements.len();

        for element in trans_elements {
            let parent = match doc.get(element).parent {
                Some(p) => p,
                None => continue,
            };
            let source = match index.element_to_state.get(&parent) {
                Some(&s) => s,
                None => {
                    warn!("Transition #{} outside of any state is ignored", element);
                    continue;
                }
            };

            let mut target = BitSet::with_capacity(state_count);
            let target_attr = doc.attribute(element, ATTR_TARGET);
            if let Some(targets) = target_attr {
                for name in targets.split_ascii_whitespace() {
                    match index.state_ids.get(name) {
                        Some(&t) => target.set(t),
                        None => warn!("Transition target '{}' does not exist", name),
                    }
                }
            }

            let parent_tag = doc.tag(parent);
            index.transitions.push(Transition {
                element,
                source,
                target,
                exit_set: BitSet::with_capacity(state_count),
                conflicts: BitSet::with_capacity(trans_count),
                event: non_empty_attr(doc, element, ATTR_EVENT),
                cond: non_empty_attr(doc, element, ATTR_COND),
                is_targetless: target_attr.is_none(),
                is_internal: matches!(doc.attribute(element, ATTR_TYPE), Some(t) if t.eq_ignore_ascii_case("internal")),
                from_history: parent_tag == TAG_HISTORY,
                from_initial: parent_tag == TAG_INITIAL,
                content: if doc.get(element).children.is_empty() {
                    None
                } else {
                    Some(element)
                },
            });
        }

        for i in 0..index.transitions.len() {
            let exit_set = index.exit_set_of(i);
            index.transitions[i].exit_set = exit_set;
        }

        // The conflict relation is symmetric and includes the transition
        // itself.
        let mut conflict_sets = Vec::with_capacity(index.transitions.len());
        for i in 0..index.transitions.len() {
            let mut conflicts = BitSet::with_capacity(trans_count);
            for j in 0..index.transitions.len() {
                if index.conflicts(i, j) {
                    conflicts.set(j);
                }
            }
            conflict_sets.push(conflicts);
        }
        for (i, conflicts) in conflict_sets.into_iter().enumerate() {
            index.transitions[i].conflicts = conflicts;
        }

        Ok(index)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn transition_count(&self) -> usize {
        self.transitions.len()
    }

    /// Resolve a state by the value of its 'id' attribute.
    pub fn state_by_id(&self, id: &str) -> Option<StateIndex> {
        self.state_ids.get(id).copied()
    }

    /// Resolve a state by its document element.
    pub fn state_of_element(&self, element: ElementId) -> Option<StateIndex> {
        self.element_to_state.get(&element).copied()
    }

    /// The elements entered when state `i` is entered without an explicit
    /// target (see [State::completion]).
    fn completion_elements(&self, doc: &ScxmlDocument, i: StateIndex) -> Vec<ElementId> {
        let state = &self.states[i];
        let element = state.element;

        match state.kind {
            StateKind::HistoryShallow | StateKind::HistoryDeep => {
                let parent = match doc.get(element).parent {
                    Some(p) => p,
                    None => return Vec::new(),
                };
                if state.kind == StateKind::HistoryDeep {
                    // All state descendants of the parent.
                    doc.in_document_order(&[TAG_STATE, TAG_PARALLEL, TAG_FINAL], parent)
                        .into_iter()
                        .filter(|e| *e != parent)
                        .collect()
                } else {
                    // Direct state siblings of the history.
                    doc.get(parent)
                        .children
                        .iter()
                        .copied()
                        .filter(|c| is_state_tag(doc.tag(*c)))
                        .collect()
                }
            }
            StateKind::Parallel => {
                // All regions; final and pseudo children are no regions.
                doc.get(element)
                    .children
                    .iter()
                    .copied()
                    .filter(|c| {
                        let tag = doc.tag(*c);
                        tag == TAG_STATE || tag == TAG_PARALLEL
                    })
                    .collect()
            }
            StateKind::Compound => {
                if let Some(initial) = doc.attribute(element, ATTR_INITIAL) {
                    let mut completion = Vec::new();
                    for name in initial.split_ascii_whitespace() {
                        match self.state_ids.get(name) {
                            Some(&t) => completion.push(self.states[t].element),
                            None => {
                                warn!("Initial state '{}' does not exist", name)
                            }
                        }
                    }
                    completion
                } else if let Some(initial) = doc.first_child_by_tag(element, TAG_INITIAL) {
                    vec![initial]
                } else {
                    // First child state in document order.
                    match doc
                        .get(element)
                        .children
                        .iter()
                        .copied()
                        .find(|c| is_state_tag(doc.tag(*c)))
                    {
                        Some(first) => vec![first],
                        None => Vec::new(),
                    }
                }
            }
            StateKind::Atomic | StateKind::Final | StateKind::Initial => Vec::new(),
        }
    }

    /// The static exit set: all descendants of the transition's domain.
    /// See <https://www.w3.org/TR/scxml/#SelectingTransitions>.
    fn exit_set_of(&self, t: TransitionIndex) -> BitSet {
        match self.transition_domain(t) {
            Some(domain) => self.states[domain].children.clone(),
            None => BitSet::with_capacity(self.states.len()),
        }
    }

    /// The transition domain: the source itself for an internal transition
    /// whose targets are all proper descendants of the (compound) source,
    /// otherwise the least common compound ancestor of source and targets.
    fn transition_domain(&self, t: TransitionIndex) -> Option<StateIndex> {
        let transition = &self.transitions[t];
        if transition.target.none() {
            return None;
        }
        let source = &self.states[transition.source];
        if transition.is_internal
            && source.kind == StateKind::Compound
            && transition.target.is_subset(&source.children)
        {
            return Some(transition.source);
        }

        let mut common = source.ancestors.clone();
        for k in transition.target.iter_ones() {
            common.intersect(&self.states[k].ancestors);
        }
        // Deepest common compound ancestor; a parallel is never the domain.
        let result = common
            .iter_ones_rev()
            .find(|j| self.states[*j].kind == StateKind::Compound);
        result
    }

    /// Two transitions conflict if their exit sets overlap or one source
    /// is (a descendant of) the other's source.
    fn conflicts(&self, t1: TransitionIndex, t2: TransitionIndex) -> bool {
        let a = &self.transitions[t1];
        let b = &self.transitions[t2];
        a.source == b.source
            || self.states[a.source].children.has(b.source)
            || self.states[b.source].children.has(a.source)
            || a.exit_set.intersects(&b.exit_set)
    }
}

/// Reorder every element's children: `<initial>` first, then deep
/// histories, then shallow histories, then the remainder in original order.
fn resort_children(doc: &mut ScxmlDocument, element: ElementId) {
    let children = doc.get(element).children.clone();
    for child in &children {
        resort_children(doc, *child);
    }

    let mut initials = Vec::new();
    let mut deep = Vec::new();
    let mut shallow = Vec::new();
    let mut remainder = Vec::new();
    for child in children {
        match doc.tag(child) {
            TAG_INITIAL => initials.push(child),
            TAG_HISTORY => {
                if is_deep_history(doc, child) {
                    deep.push(child);
                } else {
                    shallow.push(child);
                }
            }
            _ => remainder.push(child),
        }
    }
    let mut resorted = initials;
    resorted.extend(deep);
    resorted.extend(shallow);
    resorted.extend(remainder);
    doc.get_mut(element).children = resorted;
}

fn is_deep_history(doc: &ScxmlDocument, element: ElementId) -> bool {
    matches!(doc.attribute(element, ATTR_TYPE), Some(t) if t.eq_ignore_ascii_case("deep"))
}

fn state_kind(doc: &ScxmlDocument, element: ElementId) -> StateKind {
    match doc.tag(element) {
        TAG_INITIAL => StateKind::Initial,
        TAG_FINAL => StateKind::Final,
        TAG_HISTORY => {
            if is_deep_history(doc, element) {
                StateKind::HistoryDeep
            } else {
                StateKind::HistoryShallow
            }
        }
        TAG_PARALLEL => StateKind::Parallel,
        TAG_SCXML => StateKind::Compound,
        _ => {
            let atomic = !doc
                .get(element)
                .children
                .iter()
                .any(|c| is_state_tag(doc.tag(*c)));
            if atomic {
                StateKind::Atomic
            } else {
                StateKind::Compound
            }
        }
    }
}

fn non_empty_attr(doc: &ScxmlDocument, element: ElementId, name: &str) -> Option<String> {
    match doc.attribute(element, name) {
        Some(value) if !value.is_empty() => Some(value.to_string()),
        _ => None,
    }
}
