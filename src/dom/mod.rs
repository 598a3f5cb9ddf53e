//! Live host document model.
//!
//! The host page owns the document; the exporter only holds [`NodeId`]s into
//! it. A `NodeId` is a lookup key, not a handle: nodes may be detached or have
//! their classes changed at any time, so callers check
//! [`Document::is_connected`] before trusting one.

mod selector;

pub use selector::Selector;

use crate::ExportError;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Document shared between the host page and the exporter.
pub type SharedDocument = Arc<RwLock<Document>>;

pub fn share(document: Document) -> SharedDocument {
    Arc::new(RwLock::new(document))
}

pub fn read(document: &SharedDocument) -> RwLockReadGuard<'_, Document> {
    document.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write(document: &SharedDocument) -> RwLockWriteGuard<'_, Document> {
    document.write().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone)]
pub enum NodeData {
    Document,
    Element(ElementData),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone)]
pub struct ElementData {
    pub name: String,
    pub attrs: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Arena-backed mutable document tree.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Parse an HTML page into a fresh document.
    pub fn parse(html: &str) -> Self {
        let parsed = scraper::Html::parse_document(html);
        let mut document = Self::new();

        let root = parsed.root_element();
        let root_id = document.import_element(root.value());
        document.append_child(NodeId::ROOT, root_id);

        let mut stack: Vec<(scraper::ElementRef<'_>, NodeId)> = vec![(root, root_id)];
        while let Some((element, parent)) = stack.pop() {
            for child in element.children() {
                let id = match child.value() {
                    scraper::Node::Element(data) => document.import_element(data),
                    scraper::Node::Text(text) => {
                        let content: &str = &text.text;
                        document.create_text(content)
                    }
                    scraper::Node::Comment(comment) => {
                        let content: &str = &comment.comment;
                        document.alloc(NodeData::Comment(content.to_string()))
                    }
                    _ => continue,
                };
                document.append_child(parent, id);
                if let Some(child_element) = scraper::ElementRef::wrap(child) {
                    stack.push((child_element, id));
                }
            }
        }

        document
    }

    fn import_element(&mut self, element: &scraper::node::Element) -> NodeId {
        let attrs = element
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        self.create_element(element.name(), attrs)
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    fn element(&self, id: NodeId) -> Option<&ElementData> {
        match self.node(id).map(|n| &n.data) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    fn element_mut(&mut self, id: NodeId) -> Option<&mut ElementData> {
        match self.nodes.get_mut(id.index()).map(|n| &mut n.data) {
            Some(NodeData::Element(element)) => Some(element),
            _ => None,
        }
    }

    pub fn create_element(&mut self, name: &str, attrs: Vec<(String, String)>) -> NodeId {
        self.alloc(NodeData::Element(ElementData {
            name: name.to_ascii_lowercase(),
            attrs,
        }))
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    /// Append `child` as the last child of `parent`, detaching it first.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        if self.node(parent).is_none() || self.node(child).is_none() || parent == child {
            return;
        }
        self.detach(child);
        self.nodes[child.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(child);
    }

    /// Remove a node (and its subtree) from the tree. Its id stays valid as a
    /// key but [`Document::is_connected`] reports false from now on.
    pub fn detach(&mut self, id: NodeId) {
        let Some(parent) = self.node(id).and_then(|n| n.parent) else {
            return;
        };
        self.nodes[parent.index()].children.retain(|c| *c != id);
        self.nodes[id.index()].parent = None;
    }

    /// Whether the node is still reachable from the document root.
    pub fn is_connected(&self, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == NodeId::ROOT {
                return true;
            }
            current = self.node(node).and_then(|n| n.parent);
        }
        false
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        self.element(id).is_some()
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|e| e.name.as_str())
    }

    pub fn data(&self, id: NodeId) -> Option<&NodeData> {
        self.node(id).map(|n| &n.data)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        self.parent(id).filter(|p| self.is_element(*p))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    pub fn element_children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.children(id)
            .iter()
            .copied()
            .filter(move |c| self.is_element(*c))
    }

    fn sibling_element(&self, id: NodeId, forward: bool) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|c| *c == id)?;
        if forward {
            siblings[position + 1..]
                .iter()
                .copied()
                .find(|c| self.is_element(*c))
        } else {
            siblings[..position]
                .iter()
                .rev()
                .copied()
                .find(|c| self.is_element(*c))
        }
    }

    pub fn prev_sibling_element(&self, id: NodeId) -> Option<NodeId> {
        self.sibling_element(id, false)
    }

    pub fn next_sibling_element(&self, id: NodeId) -> Option<NodeId> {
        self.sibling_element(id, true)
    }

    /// Ancestor elements, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent_element(id), move |n| self.parent_element(*n))
    }

    /// Descendants of `root` in document order, `root` excluded.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(root).iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        out
    }

    /// Elements preceding `start` in document order, nearest first.
    ///
    /// Equivalent to repeatedly calling a tree walker's `previousNode`: a
    /// previous sibling is entered at its deepest last descendant, otherwise
    /// the walk moves to the parent. The walk is rooted at `<body>`: the body
    /// itself is the last element yielded. Without a body it ends at the
    /// document root.
    pub fn preceding_elements(&self, start: NodeId) -> PrecedingElements<'_> {
        PrecedingElements {
            document: self,
            current: Some(start),
            boundary: self.body(),
        }
    }

    fn previous_in_order(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        let siblings = self.children(parent);
        let position = siblings.iter().position(|c| *c == id)?;
        if position == 0 {
            return (parent != NodeId::ROOT).then_some(parent);
        }
        let mut node = siblings[position - 1];
        while let Some(last) = self.children(node).last() {
            node = *last;
        }
        Some(node)
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(element) = self.element_mut(id) {
            match element.attrs.iter_mut().find(|(n, _)| n == name) {
                Some(attr) => attr.1 = value.to_string(),
                None => element.attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) {
        if let Some(element) = self.element_mut(id) {
            element.attrs.retain(|(n, _)| n != name);
        }
    }

    pub fn classes(&self, id: NodeId) -> impl Iterator<Item = &str> + '_ {
        self.attr(id, "class").unwrap_or("").split_whitespace()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.classes(id).any(|c| c == class)
    }

    pub fn add_class(&mut self, id: NodeId, class: &str) {
        if self.has_class(id, class) {
            return;
        }
        let mut classes: Vec<String> = self.classes(id).map(str::to_string).collect();
        classes.push(class.to_string());
        self.set_attr(id, "class", &classes.join(" "));
    }

    pub fn remove_class(&mut self, id: NodeId, class: &str) {
        let classes: Vec<String> = self
            .classes(id)
            .filter(|c| *c != class)
            .map(str::to_string)
            .collect();
        self.set_attr(id, "class", &classes.join(" "));
    }

    fn style_declarations(&self, id: NodeId) -> Vec<(String, String)> {
        parse_declarations(self.attr(id, "style").unwrap_or(""))
    }

    /// Value of a property in the element's inline `style` attribute.
    pub fn inline_style(&self, id: NodeId, property: &str) -> Option<String> {
        self.style_declarations(id)
            .into_iter()
            .rev()
            .find(|(name, _)| name.eq_ignore_ascii_case(property))
            .map(|(_, value)| value)
    }

    /// Set (`Some`) or clear (`None`) one inline style property.
    pub fn set_inline_style(&mut self, id: NodeId, property: &str, value: Option<&str>) {
        let mut declarations: Vec<(String, String)> = self
            .style_declarations(id)
            .into_iter()
            .filter(|(name, _)| !name.eq_ignore_ascii_case(property))
            .collect();
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            declarations.push((property.to_string(), value.trim().to_string()));
        }
        let style = declarations
            .iter()
            .map(|(name, value)| format!("{name}: {value};"))
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attr(id, "style", &style);
    }

    /// Resolved `display` of one element (not inherited).
    pub fn display(&self, id: NodeId) -> String {
        if let Some(display) = self.inline_style(id, "display") {
            return display.to_ascii_lowercase();
        }
        if self.attr(id, "hidden").is_some() {
            return "none".to_string();
        }
        "initial".to_string()
    }

    /// Resolved `visibility`, inherited from the nearest ancestor that sets it.
    pub fn visibility(&self, id: NodeId) -> String {
        std::iter::once(id)
            .chain(self.ancestors(id))
            .find_map(|n| self.inline_style(n, "visibility"))
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(|| "visible".to_string())
    }

    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(NodeData::Text(text)) = self.data(id) {
            return text.clone();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|n| match self.data(n) {
                Some(NodeData::Text(text)) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// The `<html>` element, if any.
    pub fn root_element(&self) -> Option<NodeId> {
        self.element_children(NodeId::ROOT).next()
    }

    pub fn body(&self) -> Option<NodeId> {
        self.first_by_tag("body")
    }

    pub fn title(&self) -> Option<String> {
        self.first_by_tag("title")
            .map(|t| self.text_content(t).trim().to_string())
            .filter(|t| !t.is_empty())
    }

    fn first_by_tag(&self, tag: &str) -> Option<NodeId> {
        self.descendants(NodeId::ROOT)
            .into_iter()
            .find(|n| self.tag_name(*n) == Some(tag))
    }

    /// Connected elements matching `selector`, in document order.
    pub fn select(&self, selector: &str) -> Result<Vec<NodeId>, ExportError> {
        self.select_within(NodeId::ROOT, selector)
    }

    /// Elements below `root` matching `selector`, in document order.
    pub fn select_within(&self, root: NodeId, selector: &str) -> Result<Vec<NodeId>, ExportError> {
        let selector = Selector::parse(selector)?;
        Ok(self.select_compiled(root, &selector))
    }

    pub fn select_compiled(&self, root: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(root)
            .into_iter()
            .filter(|n| self.is_element(*n) && selector.matches(self, *n))
            .collect()
    }

    pub fn select_first(&self, root: NodeId, selector: &str) -> Result<Option<NodeId>, ExportError> {
        Ok(self.select_within(root, selector)?.into_iter().next())
    }

    /// Outer HTML of a node.
    pub fn serialize(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    /// The whole document as HTML.
    pub fn to_html(&self) -> String {
        let mut out = String::from("<!DOCTYPE html>");
        for child in self.children(NodeId::ROOT) {
            self.write_html(*child, &mut out);
        }
        out
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        match self.data(id) {
            Some(NodeData::Document) => {
                for child in self.children(id) {
                    self.write_html(*child, out);
                }
            }
            Some(NodeData::Text(text)) => out.push_str(&escape_text(text)),
            Some(NodeData::Comment(comment)) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            Some(NodeData::Element(element)) => {
                out.push('<');
                out.push_str(&element.name);
                for (name, value) in &element.attrs {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(&escape_attr(value));
                    out.push('"');
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&element.name.as_str()) {
                    return;
                }
                for child in self.children(id) {
                    self.write_html(*child, out);
                }
                out.push_str("</");
                out.push_str(&element.name);
                out.push('>');
            }
            None => {}
        }
    }
}

pub struct PrecedingElements<'a> {
    document: &'a Document,
    current: Option<NodeId>,
    boundary: Option<NodeId>,
}

impl Iterator for PrecedingElements<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let current = self.current?;
            if Some(current) == self.boundary {
                return None;
            }
            let previous = self.document.previous_in_order(current);
            self.current = previous;
            let node = previous?;
            if self.document.is_element(node) {
                return Some(node);
            }
        }
    }
}

fn parse_declarations(style: &str) -> Vec<(String, String)> {
    style
        .split(';')
        .filter_map(|declaration| {
            let (name, value) = declaration.split_once(':')?;
            let name = name.trim();
            let value = value.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.to_string()))
        })
        .collect()
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><head><title>Main Event</title></head><body>
        <h2>Playoffs</h2>
        <div id="a" class="one two" style="color: red; background: blue">
            <span>first</span><b>second</b>
        </div>
        <p hidden>gone</p>
    </body></html>"#;

    fn by_id(doc: &Document, id: &str) -> NodeId {
        doc.descendants(NodeId::ROOT)
            .into_iter()
            .find(|n| doc.attr(*n, "id") == Some(id))
            .unwrap()
    }

    #[test]
    fn test_parse_and_query() {
        let doc = Document::parse(PAGE);
        assert_eq!(doc.title().as_deref(), Some("Main Event"));
        assert_eq!(doc.select(".one").unwrap().len(), 1);
        assert_eq!(doc.select("div.two > span").unwrap().len(), 1);
        assert!(doc.select("div:not(.one)").unwrap().is_empty());
        assert!(doc.select("[[").is_err());
    }

    #[test]
    fn test_preceding_elements_walk() {
        let doc = Document::parse(PAGE);
        let b = doc.select("b").unwrap()[0];
        let names: Vec<&str> = doc
            .preceding_elements(b)
            .filter_map(|n| doc.tag_name(n))
            .collect();
        assert_eq!(names, ["span", "div", "h2", "body"]);
    }

    #[test]
    fn test_preceding_elements_stop_at_body() {
        let doc = Document::parse(
            r#"<html><head><title>Head</title><meta charset="utf-8"></head>
            <body><div id="first"></div></body></html>"#,
        );
        let first = by_id(&doc, "first");
        let names: Vec<&str> = doc
            .preceding_elements(first)
            .filter_map(|n| doc.tag_name(n))
            .collect();
        assert_eq!(names, ["body"]);
    }

    #[test]
    fn test_inline_style_roundtrip() {
        let mut doc = Document::parse(PAGE);
        let a = by_id(&doc, "a");
        assert_eq!(doc.inline_style(a, "background").as_deref(), Some("blue"));
        doc.set_inline_style(a, "background", Some("#181818"));
        assert_eq!(doc.inline_style(a, "background").as_deref(), Some("#181818"));
        assert_eq!(doc.inline_style(a, "color").as_deref(), Some("red"));
        doc.set_inline_style(a, "background", None);
        assert!(doc.inline_style(a, "background").is_none());
    }

    #[test]
    fn test_detach_breaks_liveness() {
        let mut doc = Document::parse(PAGE);
        let a = by_id(&doc, "a");
        let span = doc.select("span").unwrap()[0];
        assert!(doc.is_connected(span));
        doc.detach(a);
        assert!(!doc.is_connected(a));
        assert!(!doc.is_connected(span));
        assert!(doc.select("span").unwrap().is_empty());
    }

    #[test]
    fn test_classes_are_live_for_selectors() {
        let mut doc = Document::parse(PAGE);
        let a = by_id(&doc, "a");
        doc.add_class(a, "active");
        assert_eq!(doc.select(".active").unwrap(), vec![a]);
        doc.remove_class(a, "active");
        assert!(doc.select(".active").unwrap().is_empty());
        assert!(doc.has_class(a, "one"));
    }

    #[test]
    fn test_hidden_attribute_and_serialize() {
        let doc = Document::parse(PAGE);
        let p = doc.select("p").unwrap()[0];
        assert_eq!(doc.display(p), "none");
        let a = by_id(&doc, "a");
        let html = doc.serialize(a);
        assert!(html.starts_with("<div id=\"a\""));
        assert!(html.contains("<span>first</span>"));
    }
}
