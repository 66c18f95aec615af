//! In-memory representation of a parsed SCXML document.
//!
//! Elements are kept in an arena and addressed by dense [ElementId]s. The
//! engine resolves element handles through this arena instead of attaching
//! private data to DOM nodes; callbacks receive the document plus handles
//! to the subtrees they must interpret (executable content, `<data>`,
//! `<invoke>`, `<donedata>`).

use std::collections::HashMap;

/// *W3C says*:
/// The top-level wrapper element, which carries version information.
/// The actual state machine consists of its children.
pub const TAG_SCXML: &str = "scxml";
pub const TAG_STATE: &str = "state";
pub const TAG_PARALLEL: &str = "parallel";
pub const TAG_FINAL: &str = "final";
/// *W3C says*:
/// In states that have substates, an optional child which identifies the
/// default initial state. Any transition which takes the parent state as
/// its target will result in the state machine also taking the transition
/// contained inside the \<initial\> element.
pub const TAG_INITIAL: &str = "initial";
/// *W3C says*:
/// A child pseudo-state which records the descendant state(s) that the
/// parent state was in the last time the system transitioned from the
/// parent.
pub const TAG_HISTORY: &str = "history";
pub const TAG_TRANSITION: &str = "transition";
pub const TAG_ON_ENTRY: &str = "onentry";
pub const TAG_ON_EXIT: &str = "onexit";
pub const TAG_INVOKE: &str = "invoke";
pub const TAG_DATAMODEL: &str = "datamodel";
pub const TAG_DATA: &str = "data";
pub const TAG_DONEDATA: &str = "donedata";
pub const TAG_SCRIPT: &str = "script";
pub const TAG_CONTENT: &str = "content";

pub const ATTR_ID: &str = "id";
pub const ATTR_INITIAL: &str = "initial";
/// "early" or "late", default is "early". See W3C 5.3.3 Data Binding.
pub const ATTR_BINDING: &str = "binding";
/// "internal"/"external" on transitions, "deep"/"shallow" on history.
pub const ATTR_TYPE: &str = "type";
pub const ATTR_EVENT: &str = "event";
pub const ATTR_COND: &str = "cond";
pub const ATTR_TARGET: &str = "target";

/// Dense handle of an element inside a [ScxmlDocument].
pub type ElementId = usize;

/// One element of the document tree.
#[derive(Debug, Clone)]
pub struct Element {
    /// Local name of the tag, without namespace prefix.
    pub tag: String,
    pub attributes: HashMap<String, String>,
    pub parent: Option<ElementId>,
    pub children: Vec<ElementId>,
    /// Concatenated character content, e.g. of `<script>` or `<content>`.
    pub text: String,
}

/// The parsed SCXML document, owned by the engine after construction.
///
/// The tree is only mutated once, by the child-resort step of the index
/// build; afterwards it is read-only shared state between engine and host.
#[derive(Debug, Clone)]
pub struct ScxmlDocument {
    elements: Vec<Element>,
    root: ElementId,
}

impl ScxmlDocument {
    pub fn new() -> ScxmlDocument {
        ScxmlDocument {
            elements: Vec::new(),
            root: 0,
        }
    }

    /// Append a new element below `parent` (or as root when `parent` is None).
    pub fn add_element(&mut self, tag: &str, parent: Option<ElementId>) -> ElementId {
        let id = self.elements.len();
        self.elements.push(Element {
            tag: tag.to_string(),
            attributes: HashMap::new(),
            parent,
            children: Vec::new(),
            text: String::new(),
        });
        match parent {
            Some(p) => self.elements[p].children.push(id),
            None => self.root = id,
        }
        id
    }

    pub fn root(&self) -> ElementId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Gets an element. The id MUST exist.
    pub fn get(&self, id: ElementId) -> &Element {
        &self.elements[id]
    }

    pub(crate) fn get_mut(&mut self, id: ElementId) -> &mut Element {
        &mut self.elements[id]
    }

    pub fn set_attribute(&mut self, id: ElementId, name: &str, value: &str) {
        self.elements[id]
            .attributes
            .insert(name.to_string(), value.to_string());
    }

    pub fn attribute(&self, id: ElementId, name: &str) -> Option<&str> {
        self.elements[id].attributes.get(name).map(String::as_str)
    }

    pub fn has_attribute(&self, id: ElementId, name: &str) -> bool {
        self.elements[id].attributes.contains_key(name)
    }

    pub fn tag(&self, id: ElementId) -> &str {
        self.elements[id].tag.as_str()
    }

    /// Direct children with the given tag, in document order.
    pub fn children_by_tag(&self, id: ElementId, tag: &str) -> Vec<ElementId> {
        self.elements[id]
            .children
            .iter()
            .copied()
            .filter(|c| self.elements[*c].tag == tag)
            .collect()
    }

    /// First direct child with the given tag.
    pub fn first_child_by_tag(&self, id: ElementId, tag: &str) -> Option<ElementId> {
        self.elements[id]
            .children
            .iter()
            .copied()
            .find(|c| self.elements[*c].tag == tag)
    }

    /// All elements with one of the given tags, in document (pre-)order,
    /// starting at `from`. Subtrees of `<content>` elements are embedded
    /// documents and are not descended into.
    pub fn in_document_order(&self, tags: &[&str], from: ElementId) -> Vec<ElementId> {
        let mut result = Vec::new();
        self.walk_document_order(from, tags, &mut result);
        result
    }

    fn walk_document_order(&self, id: ElementId, tags: &[&str], result: &mut Vec<ElementId>) {
        let element = &self.elements[id];
        if element.tag == TAG_CONTENT {
            return;
        }
        if tags.contains(&element.tag.as_str()) {
            result.push(id);
        }
        for child in &element.children {
            self.walk_document_order(*child, tags, result);
        }
    }

    /// All elements with one of the given tags in post-fix order: children
    /// before their parent, siblings in document order.
    pub fn in_postfix_order(&self, tags: &[&str], from: ElementId) -> Vec<ElementId> {
        let mut result = Vec::new();
        self.walk_postfix_order(from, tags, &mut result);
        result
    }

    fn walk_postfix_order(&self, id: ElementId, tags: &[&str], result: &mut Vec<ElementId>) {
        let element = &self.elements[id];
        if element.tag == TAG_CONTENT {
            return;
        }
        for child in &element.children {
            self.walk_postfix_order(*child, tags, result);
        }
        if tags.contains(&element.tag.as_str()) {
            result.push(id);
        }
    }

    /// True if `id` lies inside a `<content>` subtree (an embedded document).
    pub fn is_in_embedded_document(&self, id: ElementId) -> bool {
        let mut current = self.elements[id].parent;
        while let Some(p) = current {
            if self.elements[p].tag == TAG_CONTENT {
                return true;
            }
            current = self.elements[p].parent;
        }
        false
    }

    /// True if `descendant` is a strict descendant of `ancestor`.
    pub fn is_descendant(&self, descendant: ElementId, ancestor: ElementId) -> bool {
        let mut current = self.elements[descendant].parent;
        while let Some(p) = current {
            if p == ancestor {
                return true;
            }
            current = self.elements[p].parent;
        }
        false
    }
}

impl Default for ScxmlDocument {
    fn default() -> Self {
        ScxmlDocument::new()
    }
}

/// True for tags that represent proper states (entered into the
/// configuration), as opposed to pseudo-states.
pub fn is_state_tag(tag: &str) -> bool {
    tag == TAG_STATE || tag == TAG_PARALLEL || tag == TAG_FINAL
}
