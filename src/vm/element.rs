//! HTML element sink.
//!
//! Attributes are collected on the pending element and written when the
//! element is flushed, so attributes coming from a component invocation
//! (`...attributes`) and from modifiers can still merge into it.

use super::error::{Result, RuntimeError};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq)]
struct Attribute {
    name: String,
    namespace: Option<String>,
    value: String,
}

#[derive(Debug)]
struct PendingElement {
    tag: String,
    attributes: Vec<Attribute>,
}

#[derive(Debug, Default)]
pub struct ElementBuilder {
    output: String,
    pending: Option<PendingElement>,
    open: Vec<String>,
}

impl ElementBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_element(&mut self, tag: &str) {
        self.pending = Some(PendingElement {
            tag: tag.to_string(),
            attributes: Vec::new(),
        });
    }

    fn pending(&mut self, op: &'static str) -> Result<&mut PendingElement> {
        self.pending.as_mut().ok_or(RuntimeError::NoOpenElement(op))
    }

    /// Set (or overwrite) an attribute. `None` removes it.
    pub fn set_attribute(&mut self, name: &str, value: Option<String>, namespace: Option<&str>) -> Result<()> {
        let element = self.pending("set_attribute")?;
        element.attributes.retain(|a| a.name != name);
        if let Some(value) = value {
            element.attributes.push(Attribute {
                name: name.to_string(),
                namespace: namespace.map(str::to_string),
                value,
            });
        }
        Ok(())
    }

    /// Attribute coming from a component's attrs block: `class` merges with
    /// an existing value, everything else overwrites.
    pub fn set_component_attribute(
        &mut self,
        name: &str,
        value: Option<String>,
        namespace: Option<&str>,
    ) -> Result<()> {
        if name == "class" {
            let element = self.pending("set_component_attribute")?;
            if let (Some(existing), Some(value)) = (
                element.attributes.iter_mut().find(|a| a.name == "class"),
                value.as_ref(),
            ) {
                existing.value = format!("{} {}", existing.value, value);
                return Ok(());
            }
        }
        self.set_attribute(name, value, namespace)
    }

    pub fn flush_element(&mut self) -> Result<()> {
        let element = self
            .pending
            .take()
            .ok_or(RuntimeError::NoOpenElement("flush_element"))?;
        self.output.push('<');
        self.output.push_str(&element.tag);
        for attribute in &element.attributes {
            self.output.push(' ');
            if let Some(namespace) = &attribute.namespace {
                if !attribute.name.contains(':') {
                    self.output.push_str(namespace);
                    self.output.push(':');
                }
            }
            self.output.push_str(&attribute.name);
            self.output.push_str("=\"");
            self.output.push_str(&escape_attribute(&attribute.value));
            self.output.push('"');
        }
        self.output.push('>');
        self.open.push(element.tag);
        Ok(())
    }

    pub fn close_element(&mut self) -> Result<()> {
        let tag = self
            .open
            .pop()
            .ok_or(RuntimeError::NoOpenElement("close_element"))?;
        if !VOID_ELEMENTS.contains(&tag.as_str()) {
            self.output.push_str("</");
            self.output.push_str(&tag);
            self.output.push('>');
        }
        Ok(())
    }

    pub fn append_text(&mut self, text: &str) {
        self.output.push_str(&escape_text(text));
    }

    pub fn append_trusted(&mut self, html: &str) {
        self.output.push_str(html);
    }

    pub fn append_comment(&mut self, comment: &str) {
        self.output.push_str("<!--");
        self.output.push_str(comment);
        self.output.push_str("-->");
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn finish(self) -> String {
        self.output
    }
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            c => out.push(c),
        }
    }
    out
}

fn escape_attribute(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}
