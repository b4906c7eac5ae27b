//! Minimal selector evaluation over metadata XML.
//!
//! Supports exactly the shape the wallpaper descriptors use:
//! `string(//a/b/c/@attr)`. The leading step is searched among all
//! descendants, later steps among children, and the final step reads an
//! attribute. Steps match qualified names literally; an unprefixed step
//! also matches elements and attributes by local name.

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::error::Result;

pub(crate) struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
}

pub(crate) struct Document {
    roots: Vec<Element>,
}

impl Document {
    pub(crate) fn parse(data: &[u8]) -> Result<Document> {
        let mut xml = Reader::from_reader(data);
        xml.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut roots = Vec::new();
        loop {
            match xml.read_event_into(&mut buf)? {
                Event::Start(ref e) => stack.push(element_from(e)),
                Event::Empty(ref e) => {
                    let element = element_from(e);
                    attach(&mut stack, &mut roots, element);
                }
                Event::End(_) => {
                    if let Some(done) = stack.pop() {
                        attach(&mut stack, &mut roots, done);
                    }
                }
                Event::Eof => break,
                // Text, processing instructions and comments carry nothing
                // the selectors can address.
                _ => {}
            }
            buf.clear();
        }
        Ok(Document { roots })
    }

    /// Evaluates a `string(//…/@attr)` selector.
    ///
    /// Returns `None` when the expression cannot yield a string at all, and
    /// the empty string when it is well formed but matches nothing, the way
    /// a full XPath `string()` call would.
    pub(crate) fn evaluate_string(&self, selector: &str) -> Option<String> {
        let path = selector.strip_prefix("string(")?.strip_suffix(')')?;
        let path = path.strip_prefix("//")?;
        let mut steps: Vec<&str> = path.split('/').collect();
        let attribute = steps.pop()?.strip_prefix('@')?;
        if steps.is_empty() || steps.iter().any(|step| step.is_empty()) {
            return None;
        }

        let mut current: Vec<&Element> = Vec::new();
        for root in &self.roots {
            collect_descendants(root, steps[0], &mut current);
        }
        for step in &steps[1..] {
            let mut next = Vec::new();
            for element in current {
                for child in &element.children {
                    if name_matches(&child.name, step) {
                        next.push(child);
                    }
                }
            }
            current = next;
        }

        for element in current {
            for (key, value) in &element.attributes {
                if name_matches(key, attribute) {
                    return Some(value.clone());
                }
            }
        }
        Some(String::new())
    }
}

fn element_from(e: &BytesStart<'_>) -> Element {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut attributes = Vec::new();
    for attr in e.attributes().flatten() {
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = String::from_utf8_lossy(&attr.value).into_owned();
        attributes.push((key, value));
    }
    Element {
        name,
        attributes,
        children: Vec::new(),
    }
}

fn attach(stack: &mut [Element], roots: &mut Vec<Element>, element: Element) {
    match stack.last_mut() {
        Some(parent) => parent.children.push(element),
        None => roots.push(element),
    }
}

fn collect_descendants<'a>(element: &'a Element, step: &str, out: &mut Vec<&'a Element>) {
    if name_matches(&element.name, step) {
        out.push(element);
    }
    for child in &element.children {
        collect_descendants(child, step, out);
    }
}

fn name_matches(name: &str, step: &str) -> bool {
    if name == step {
        return true;
    }
    if !step.contains(':') {
        if let Some((_, local)) = name.split_once(':') {
            return local == step;
        }
    }
    false
}
