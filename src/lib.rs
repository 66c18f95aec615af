//! An SCXML (State Chart XML) micro-step engine in Rust.\
//! \
//! The interpreter core evolves a hierarchical state machine in response to
//! internal and external events. All structural relations of the chart
//! (ancestors, descendants, completions, exit sets, transition conflicts)
//! are precomputed as bit-sets when the document index is built, reducing
//! each micro-step to a fixed number of bit-set operations.\
//! See <https://www.w3.org/TR/scxml/> for the underlying semantics.

pub mod bitset;
pub mod callbacks;
pub mod common;
pub mod document;
pub mod document_index;
pub mod engine;
pub mod event;
pub mod monitor;

#[cfg(feature = "xml")]
pub mod scxml_reader;
