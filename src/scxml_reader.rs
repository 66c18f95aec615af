//! A SAX reader for SCXML documents according to the W3C recommendation.
//!
//! The reader builds the element arena of [crate::document::ScxmlDocument];
//! it does not interpret anything. Unknown elements (executable content,
//! host extensions) are kept in the tree so that the engine can hand their
//! subtrees to the host unmodified.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::str;

use quick_xml::events::attributes::Attributes;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use thiserror::Error;

use crate::document::{
    ElementId, ScxmlDocument, ATTR_BINDING, ATTR_TYPE, TAG_HISTORY, TAG_SCXML, TAG_TRANSITION,
};

pub type XReader<'a> = Reader<&'a [u8]>;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("error at position {position}: {message}")]
    Xml { position: u64, message: String },

    #[error("illegal end-tag </{found}>, expected </{expected}>")]
    EndTagMismatch { found: String, expected: String },

    #[error("document root must be <scxml>, found <{0}>")]
    NoScxmlRoot(String),

    #[error("<{tag}>: illegal value '{value}' for attribute '{attribute}'")]
    IllegalAttribute {
        tag: String,
        attribute: String,
        value: String,
    },

    #[error("failed to read '{path}': {message}")]
    Io { path: String, message: String },

    #[error("document contains no elements")]
    Empty,
}

struct ReaderState {
    doc: ScxmlDocument,
    stack: Vec<ElementId>,
}

impl ReaderState {
    fn new() -> ReaderState {
        ReaderState {
            doc: ScxmlDocument::new(),
            stack: Vec::new(),
        }
    }

    /// Process all events from the given content.
    fn process(&mut self, content: &str) -> Result<(), ReaderError> {
        let mut reader = Reader::from_str(content);
        reader.config_mut().trim_text(true);

        loop {
            match reader.read_event() {
                Err(e) => {
                    return Err(ReaderError::Xml {
                        position: reader.buffer_position(),
                        message: e.to_string(),
                    });
                }
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    self.start_element(&reader, &e)?;
                }
                Ok(Event::End(e)) => {
                    self.end_element(local_name_of(e.local_name().as_ref()))?;
                }
                Ok(Event::Empty(e)) => {
                    // Element without content.
                    self.start_element(&reader, &e)?;
                    self.end_element(local_name_of(e.local_name().as_ref()))?;
                }
                Ok(Event::Text(e)) => {
                    if let Some(current) = self.stack.last().copied() {
                        let text = e.unescape().unwrap_or_default().into_owned();
                        self.doc.get_mut(current).text.push_str(&text);
                    }
                }
                Ok(Event::CData(e)) => {
                    if let Some(current) = self.stack.last().copied() {
                        let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                        self.doc.get_mut(current).text.push_str(&text);
                    }
                }
                // Ignore comments, declarations and processing instructions.
                Ok(_e) => {}
            }
        }
        if self.doc.is_empty() {
            return Err(ReaderError::Empty);
        }
        Ok(())
    }

    fn start_element(&mut self, reader: &XReader, e: &BytesStart) -> Result<(), ReaderError> {
        let n = e.local_name();
        let name = local_name_of(n.as_ref());

        if self.stack.is_empty() && !self.doc.is_empty() {
            // A second top-level element.
            return Err(ReaderError::NoScxmlRoot(name.to_string()));
        }
        if self.stack.is_empty() && name != TAG_SCXML {
            return Err(ReaderError::NoScxmlRoot(name.to_string()));
        }

        let parent = self.stack.last().copied();
        let id = self.doc.add_element(name, parent);
        for (key, value) in decode_attributes(reader, &mut e.attributes()) {
            self.doc.set_attribute(id, &key, &value);
        }
        self.validate_attributes(id)?;
        self.stack.push(id);
        Ok(())
    }

    /// Called from the SAX handler if some end-tag was read.
    fn end_element(&mut self, name: &str) -> Result<(), ReaderError> {
        match self.stack.pop() {
            Some(current) if self.doc.tag(current) == name => Ok(()),
            Some(current) => Err(ReaderError::EndTagMismatch {
                found: name.to_string(),
                expected: self.doc.tag(current).to_string(),
            }),
            None => Err(ReaderError::EndTagMismatch {
                found: name.to_string(),
                expected: String::new(),
            }),
        }
    }

    /// Check the enumerated attribute values the index relies on.
    fn validate_attributes(&self, id: ElementId) -> Result<(), ReaderError> {
        let check = |attribute: &str, legal: &[&str]| -> Result<(), ReaderError> {
            match self.doc.attribute(id, attribute) {
                Some(value) if !legal.contains(&value.to_lowercase().as_str()) => {
                    Err(ReaderError::IllegalAttribute {
                        tag: self.doc.tag(id).to_string(),
                        attribute: attribute.to_string(),
                        value: value.to_string(),
                    })
                }
                _ => Ok(()),
            }
        };
        match self.doc.tag(id) {
            TAG_SCXML => check(ATTR_BINDING, &["early", "late"]),
            TAG_TRANSITION => check(ATTR_TYPE, &["internal", "external"]),
            TAG_HISTORY => check(ATTR_TYPE, &["deep", "shallow"]),
            _ => Ok(()),
        }
    }
}

fn local_name_of(raw: &[u8]) -> &str {
    str::from_utf8(raw).unwrap_or("")
}

/// Decodes attributes into key/value pairs, stripping namespace prefixes
/// from the keys.
fn decode_attributes(reader: &XReader, attr: &mut Attributes) -> Vec<(String, String)> {
    let mut result = Vec::new();
    for attr_result in attr {
        let a = match attr_result {
            Ok(a) => a,
            Err(_) => continue,
        };
        let key = match reader.decoder().decode(a.key.local_name().as_ref()) {
            Ok(k) => k.to_string(),
            Err(_) => continue,
        };
        let value = match a.decode_and_unescape_value(reader.decoder()) {
            Ok(v) => v.to_string(),
            Err(_) => continue,
        };
        result.push((key, value));
    }
    result
}

/// Read and parse a SCXML document from a string.
pub fn parse_from_xml(xml: &str) -> Result<ScxmlDocument, ReaderError> {
    let mut rs = ReaderState::new();
    rs.process(xml)?;
    Ok(rs.doc)
}

/// Read and parse a SCXML document from an XML file.
pub fn parse_from_xml_file(file: &Path) -> Result<ScxmlDocument, ReaderError> {
    let mut content = String::new();
    match File::open(file) {
        Ok(mut f) => {
            if let Err(e) = f.read_to_string(&mut content) {
                return Err(ReaderError::Io {
                    path: format!("{:?}", file),
                    message: e.to_string(),
                });
            }
        }
        Err(e) => {
            return Err(ReaderError::Io {
                path: format!("{:?}", file),
                message: e.to_string(),
            });
        }
    }
    parse_from_xml(&content)
}
