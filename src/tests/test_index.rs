use crate::document_index::{BindingType, DocumentIndex, StateKind};
use crate::scxml_reader::parse_from_xml;

fn build(xml: &str) -> (crate::document::ScxmlDocument, DocumentIndex) {
    let mut doc = parse_from_xml(xml).unwrap();
    let index = DocumentIndex::build(&mut doc).unwrap();
    (doc, index)
}

#[test]
fn document_order_after_resort() {
    // The resort step moves <initial> first, then deep histories, then
    // shallow histories; c1 keeps its place in the remainder.
    let (doc, index) = build(
        "<scxml initial='c'><state id='c'>\
         <state id='c1'/>\
         <history id='hs'/>\
         <history id='hd' type='deep'/>\
         <initial><transition target='c1'/></initial>\
         </state></scxml>",
    );
    assert_eq!(index.state_count(), 6);
    let tags: Vec<&str> = index.states.iter().map(|s| doc.tag(s.element)).collect();
    assert_eq!(
        tags,
        vec!["scxml", "state", "initial", "history", "history", "state"]
    );
    assert_eq!(index.states[3].kind, StateKind::HistoryDeep);
    assert_eq!(index.states[4].kind, StateKind::HistoryShallow);
    assert_eq!(index.state_by_id("c1"), Some(5));
}

#[test]
fn state_kinds() {
    let (_doc, index) = build(
        "<scxml><parallel id='P'><state id='A'><state id='A1'/></state>\
         <state id='B'/></parallel><final id='F'/></scxml>",
    );
    assert_eq!(index.states[0].kind, StateKind::Compound);
    assert_eq!(index.states[index.state_by_id("P").unwrap()].kind, StateKind::Parallel);
    assert_eq!(index.states[index.state_by_id("A").unwrap()].kind, StateKind::Compound);
    assert_eq!(index.states[index.state_by_id("A1").unwrap()].kind, StateKind::Atomic);
    assert_eq!(index.states[index.state_by_id("B").unwrap()].kind, StateKind::Atomic);
    assert_eq!(index.states[index.state_by_id("F").unwrap()].kind, StateKind::Final);
}

#[test]
fn has_history_child_flag() {
    let (_doc, index) = build(
        "<scxml><state id='c'><history id='h'/><state id='c1'/></state></scxml>",
    );
    let c = index.state_by_id("c").unwrap();
    let c1 = index.state_by_id("c1").unwrap();
    assert!(index.states[c].has_history_child);
    assert!(!index.states[c1].has_history_child);
    assert!(!index.states[0].has_history_child);
}

#[test]
fn ancestors_and_descendants() {
    let (_doc, index) = build(
        "<scxml initial='a'><state id='a'><state id='a1'><state id='a2'/></state>\
         </state><state id='b'/></scxml>",
    );
    let a = index.state_by_id("a").unwrap();
    let a1 = index.state_by_id("a1").unwrap();
    let a2 = index.state_by_id("a2").unwrap();
    let b = index.state_by_id("b").unwrap();

    assert_eq!(index.states[a2].ancestors.iter_ones().collect::<Vec<_>>(), vec![0, a, a1]);
    assert_eq!(index.states[a2].parent, a1);
    assert_eq!(index.states[a].parent, 0);
    // The root is its own parent.
    assert_eq!(index.states[0].parent, 0);

    assert_eq!(
        index.states[0].children.iter_ones().collect::<Vec<_>>(),
        vec![a, a1, a2, b]
    );
    assert_eq!(
        index.states[a].children.iter_ones().collect::<Vec<_>>(),
        vec![a1, a2]
    );
    assert!(index.states[b].children.none());
}

#[test]
fn completion_from_initial_attribute() {
    let (_doc, index) = build(
        "<scxml initial='p'><state id='p' initial='p2'>\
         <state id='p1'/><state id='p2'/></state></scxml>",
    );
    let p = index.state_by_id("p").unwrap();
    let p2 = index.state_by_id("p2").unwrap();
    assert_eq!(index.states[0].completion.iter_ones().collect::<Vec<_>>(), vec![p]);
    assert_eq!(index.states[p].completion.iter_ones().collect::<Vec<_>>(), vec![p2]);
}

#[test]
fn completion_from_deep_initial_attribute() {
    let (_doc, index) = build(
        "<scxml initial='p'><state id='p' initial='x2'><state id='q'>\
         <state id='x1'/><state id='x2'/></state></state></scxml>",
    );
    let p = index.state_by_id("p").unwrap();
    let x2 = index.state_by_id("x2").unwrap();
    assert_eq!(index.states[p].completion.iter_ones().collect::<Vec<_>>(), vec![x2]);
}

#[test]
fn completion_from_initial_element() {
    let (doc, index) = build(
        "<scxml><state id='c'><initial><transition target='c2'/></initial>\
         <state id='c1'/><state id='c2'/></state></scxml>",
    );
    let c = index.state_by_id("c").unwrap();
    let completion: Vec<usize> = index.states[c].completion.iter_ones().collect();
    assert_eq!(completion.len(), 1);
    assert_eq!(doc.tag(index.states[completion[0]].element), "initial");
    assert_eq!(index.states[completion[0]].kind, StateKind::Initial);
}

#[test]
fn completion_defaults_to_first_child_state() {
    let (_doc, index) = build(
        "<scxml><state id='c'><onentry/><state id='c1'/><state id='c2'/></state></scxml>",
    );
    let c = index.state_by_id("c").unwrap();
    let c1 = index.state_by_id("c1").unwrap();
    assert_eq!(index.states[0].completion.iter_ones().collect::<Vec<_>>(), vec![c]);
    assert_eq!(index.states[c].completion.iter_ones().collect::<Vec<_>>(), vec![c1]);
}

#[test]
fn parallel_completion_holds_all_regions() {
    let (_doc, index) = build(
        "<scxml><parallel id='P'><history id='H'/><state id='A'/>\
         <state id='B'/><final id='F'/></parallel></scxml>",
    );
    let p = index.state_by_id("P").unwrap();
    let a = index.state_by_id("A").unwrap();
    let b = index.state_by_id("B").unwrap();
    // Histories and final children are no regions.
    assert_eq!(
        index.states[p].completion.iter_ones().collect::<Vec<_>>(),
        vec![a, b]
    );
}

#[test]
fn history_completions() {
    let (_doc, index) = build(
        "<scxml><state id='C'>\
         <history id='hs'/>\
         <history id='hd' type='deep'/>\
         <state id='c1'/>\
         <state id='c2'><state id='x1'/><state id='x2'/></state>\
         </state></scxml>",
    );
    let hs = index.state_by_id("hs").unwrap();
    let hd = index.state_by_id("hd").unwrap();
    let c1 = index.state_by_id("c1").unwrap();
    let c2 = index.state_by_id("c2").unwrap();
    let x1 = index.state_by_id("x1").unwrap();
    let x2 = index.state_by_id("x2").unwrap();

    // Shallow: the direct state siblings.
    assert_eq!(
        index.states[hs].completion.iter_ones().collect::<Vec<_>>(),
        vec![c1, c2]
    );
    // Deep: every state descendant of the parent.
    assert_eq!(
        index.states[hd].completion.iter_ones().collect::<Vec<_>>(),
        vec![c1, c2, x1, x2]
    );
}

#[test]
fn transitions_in_postfix_order() {
    // The inner transition is declared after its sibling state but still
    // gets the lower index: post-fix order visits subtrees first.
    let (_doc, index) = build(
        "<scxml initial='a'><state id='a'>\
         <state id='a1'><transition event='e' target='b'/></state>\
         <transition event='e' target='b'/>\
         </state><state id='b'/></scxml>",
    );
    assert_eq!(index.transition_count(), 2);
    let a = index.state_by_id("a").unwrap();
    let a1 = index.state_by_id("a1").unwrap();
    assert_eq!(index.transitions[0].source, a1);
    assert_eq!(index.transitions[1].source, a);
}

#[test]
fn descendant_sources_conflict() {
    let (_doc, index) = build(
        "<scxml initial='a'><state id='a'>\
         <state id='a1'><transition event='e' target='b'/></state>\
         <transition event='e' target='b'/>\
         </state><state id='b'/></scxml>",
    );
    // Symmetric, and every transition conflicts with itself.
    assert!(index.transitions[0].conflicts.has(0));
    assert!(index.transitions[0].conflicts.has(1));
    assert!(index.transitions[1].conflicts.has(0));
    assert!(index.transitions[1].conflicts.has(1));
}

#[test]
fn independent_regions_do_not_conflict() {
    let (_doc, index) = build(
        "<scxml><parallel id='P'>\
         <state id='A' initial='a1'><state id='a1'>\
         <transition event='e' target='a2'/></state><state id='a2'/></state>\
         <state id='B' initial='b1'><state id='b1'>\
         <transition event='e' target='b2'/></state><state id='b2'/></state>\
         </parallel></scxml>",
    );
    assert_eq!(index.transition_count(), 2);
    assert!(!index.transitions[0].conflicts.has(1));
    assert!(!index.transitions[1].conflicts.has(0));
}

#[test]
fn exit_set_of_external_transition() {
    let (_doc, index) = build(
        "<scxml initial='p'><state id='p' initial='p1'>\
         <transition event='e' target='p1'/>\
         <state id='p1'/><state id='p2'/></state></scxml>",
    );
    let p = index.state_by_id("p").unwrap();
    let p1 = index.state_by_id("p1").unwrap();
    let p2 = index.state_by_id("p2").unwrap();
    // External self-to-descendant exits the source as well: the domain is
    // the least common compound ancestor above it.
    assert_eq!(
        index.transitions[0].exit_set.iter_ones().collect::<Vec<_>>(),
        vec![p, p1, p2]
    );
}

#[test]
fn exit_set_of_internal_transition() {
    let (_doc, index) = build(
        "<scxml initial='p'><state id='p' initial='p1'>\
         <transition type='internal' event='e' target='p1'/>\
         <state id='p1'/><state id='p2'/></state></scxml>",
    );
    let p = index.state_by_id("p").unwrap();
    let p1 = index.state_by_id("p1").unwrap();
    let p2 = index.state_by_id("p2").unwrap();
    // The compound source stays active.
    assert!(index.transitions[0].is_internal);
    assert!(!index.transitions[0].exit_set.has(p));
    assert_eq!(
        index.transitions[0].exit_set.iter_ones().collect::<Vec<_>>(),
        vec![p1, p2]
    );
}

#[test]
fn targetless_transition_exits_nothing() {
    let (_doc, index) = build(
        "<scxml initial='a'><state id='a'><transition event='x'/></state></scxml>",
    );
    assert!(index.transitions[0].is_targetless);
    assert!(index.transitions[0].exit_set.none());
    assert!(!index.transitions[0].is_spontaneous());
}

#[test]
fn spontaneous_transition_has_no_event() {
    let (_doc, index) = build(
        "<scxml initial='a'><state id='a'><transition target='b'/></state>\
         <state id='b'/></scxml>",
    );
    assert!(index.transitions[0].is_spontaneous());
    assert!(!index.transitions[0].is_targetless);
}

#[test]
fn pseudo_transition_flags() {
    let (_doc, index) = build(
        "<scxml><state id='c'>\
         <initial><transition target='c1'/></initial>\
         <history id='h'><transition target='c1'/></history>\
         <state id='c1'/></state></scxml>",
    );
    let from_initial = index.transitions.iter().filter(|t| t.from_initial).count();
    let from_history = index.transitions.iter().filter(|t| t.from_history).count();
    assert_eq!(from_initial, 1);
    assert_eq!(from_history, 1);
}

#[test]
fn early_binding_attaches_all_data_to_the_root() {
    let (doc, index) = build(
        "<scxml><datamodel><data id='g'/></datamodel>\
         <state id='a'><datamodel><data id='da'/></datamodel></state></scxml>",
    );
    assert_eq!(index.binding, BindingType::Early);
    let root_data: Vec<&str> = index.states[0]
        .data
        .iter()
        .filter_map(|d| doc.attribute(*d, "id"))
        .collect();
    assert_eq!(root_data, vec!["g", "da"]);
    let a = index.state_by_id("a").unwrap();
    assert!(index.states[a].data.is_empty());
}

#[test]
fn late_binding_keeps_data_on_owning_states() {
    let (doc, index) = build(
        "<scxml binding='late'><datamodel><data id='g'/></datamodel>\
         <state id='a'><datamodel><data id='da'/></datamodel></state></scxml>",
    );
    assert_eq!(index.binding, BindingType::Late);
    let root_data: Vec<&str> = index.states[0]
        .data
        .iter()
        .filter_map(|d| doc.attribute(*d, "id"))
        .collect();
    assert_eq!(root_data, vec!["g"]);
    let a = index.state_by_id("a").unwrap();
    let a_data: Vec<&str> = index.states[a]
        .data
        .iter()
        .filter_map(|d| doc.attribute(*d, "id"))
        .collect();
    assert_eq!(a_data, vec!["da"]);
}

#[test]
fn global_scripts_become_root_onentry() {
    let (doc, index) = build(
        "<scxml><script>init()</script><state id='a'><onentry/></state></scxml>",
    );
    assert_eq!(index.states[0].on_entry.len(), 1);
    assert_eq!(doc.tag(index.states[0].on_entry[0]), "script");
    let a = index.state_by_id("a").unwrap();
    assert_eq!(index.states[a].on_entry.len(), 1);
    assert_eq!(doc.tag(index.states[a].on_entry[0]), "onentry");
}

#[test]
fn done_data_and_invokes_are_collected() {
    let (_doc, index) = build(
        "<scxml initial='a'><state id='a'><invoke id='i1'/><invoke id='i2'/>\
         <transition event='end' target='f'/></state>\
         <final id='f'><donedata/></final></scxml>",
    );
    let a = index.state_by_id("a").unwrap();
    let f = index.state_by_id("f").unwrap();
    assert_eq!(index.states[a].invoke.len(), 2);
    assert!(index.states[f].done_data.is_some());
    assert!(index.states[a].done_data.is_none());
}

#[test]
fn static_exit_sets_stay_within_the_source_hierarchy() {
    let (_doc, index) = build(
        "<scxml initial='a'><state id='a'><state id='a1'>\
         <transition event='e' target='b'/></state></state>\
         <state id='b'><transition event='f' target='a'/></state></scxml>",
    );
    for t in &index.transitions {
        // The exit set is always the descendant set of some ancestor of
        // the source.
        let mut domains = index.states[t.source].ancestors.clone();
        domains.set(t.source);
        let contained = domains
            .iter_ones()
            .any(|d| t.exit_set.is_subset(&index.states[d].children));
        assert!(contained);
    }
}
