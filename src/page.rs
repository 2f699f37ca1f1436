use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::events::Rect;

/// Index into a document's element arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// Index into a frame tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameId(pub usize);

const SHADOW_ROOT_TAG: &str = "#shadow-root";

#[derive(Debug, Clone)]
struct Node {
    tag: String,
    dom_id: Option<String>,
    classes: Vec<String>,
    attrs: HashMap<String, String>,
    text: Option<String>,
    rect: Option<Rect>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    // Root node of this element's shadow tree, if one was attached
    shadow_root: Option<NodeId>,
    // Set on shadow-root container nodes only: the hosting element
    shadow_host: Option<NodeId>,
    detached: bool,
}

impl Node {
    fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            dom_id: None,
            classes: Vec::new(),
            attrs: HashMap::new(),
            text: None,
            rect: None,
            parent: None,
            children: Vec::new(),
            shadow_root: None,
            shadow_host: None,
            detached: false,
        }
    }
}

/// The element tree of one frame. Stands in for the DOM the capture
/// agent walks: enough structure for selector derivation, shadow paths,
/// and geometry reads, nothing more.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    pub url: String,
    pub title: String,
}

impl Document {
    pub fn new(url: &str, title: &str) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            url: url.to_string(),
            title: title.to_string(),
        };
        doc.root = doc.alloc(Node::new("html"));
        doc
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The body element, once one has been appended under the root.
    pub fn body(&self) -> Option<NodeId> {
        self.node(self.root)
            .children
            .iter()
            .copied()
            .find(|&c| self.node(c).tag == "body")
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(Node::new(tag))
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.node_mut(child).parent = Some(parent);
        self.node_mut(parent).children.push(child);
    }

    /// Attach a shadow tree to a host element; returns the shadow root,
    /// which children can then be appended under.
    pub fn attach_shadow(&mut self, host: NodeId) -> NodeId {
        if let Some(existing) = self.node(host).shadow_root {
            return existing;
        }
        let root = self.alloc(Node::new(SHADOW_ROOT_TAG));
        self.node_mut(root).shadow_host = Some(host);
        self.node_mut(host).shadow_root = Some(root);
        root
    }

    /// Remove a node from its parent and mark the subtree detached.
    /// Detached nodes keep their attributes but lose layout geometry.
    pub fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.node(node).parent {
            self.node_mut(parent).children.retain(|&c| c != node);
        }
        self.node_mut(node).parent = None;
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            self.node_mut(n).detached = true;
            stack.extend(self.node(n).children.iter().copied());
            if let Some(shadow) = self.node(n).shadow_root {
                stack.push(shadow);
            }
        }
    }

    pub fn set_dom_id(&mut self, node: NodeId, id: &str) {
        self.node_mut(node).dom_id = Some(id.to_string());
    }

    pub fn add_class(&mut self, node: NodeId, class: &str) {
        self.node_mut(node).classes.push(class.to_string());
    }

    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) {
        self.node_mut(node)
            .attrs
            .insert(name.to_string(), value.to_string());
    }

    pub fn set_text(&mut self, node: NodeId, text: &str) {
        self.node_mut(node).text = Some(text.to_string());
    }

    pub fn set_rect(&mut self, node: NodeId, rect: Rect) {
        self.node_mut(node).rect = Some(rect);
    }

    pub fn tag(&self, node: NodeId) -> &str {
        &self.node(node).tag
    }

    pub fn dom_id(&self, node: NodeId) -> Option<&str> {
        self.node(node).dom_id.as_deref()
    }

    pub fn classes(&self, node: NodeId) -> &[String] {
        &self.node(node).classes
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.node(node).attrs.get(name).map(String::as_str)
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.node(node).text.as_deref()
    }

    /// Last-known layout geometry; None for detached or unlaid-out nodes,
    /// mirroring a failing getBoundingClientRect call.
    pub fn rect(&self, node: NodeId) -> Option<Rect> {
        let n = self.node(node);
        if n.detached { None } else { n.rect }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        &self.node(node).children
    }

    pub fn shadow_root(&self, host: NodeId) -> Option<NodeId> {
        self.node(host).shadow_root
    }

    /// For a shadow-root container node, the element hosting it.
    pub fn shadow_host(&self, node: NodeId) -> Option<NodeId> {
        self.node(node).shadow_host
    }

    pub fn is_shadow_root(&self, node: NodeId) -> bool {
        self.node(node).shadow_host.is_some()
    }

    pub fn is_detached(&self, node: NodeId) -> bool {
        self.node(node).detached
    }

    /// First element carrying the given id attribute, in allocation order.
    pub fn find_by_dom_id(&self, dom_id: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.dom_id.as_deref() == Some(dom_id) && !n.detached)
            .map(NodeId)
    }

    /// Build a document from a declarative page spec. The body spec, when
    /// present, becomes the body element under the html root.
    pub fn from_spec(spec: &PageSpec) -> Self {
        let mut doc = Document::new(&spec.url, &spec.title);
        if let Some(body) = &spec.body {
            let node = doc.build_node(body);
            doc.append_child(doc.root, node);
        }
        doc
    }

    /// Materialize a node spec under an existing parent (used by replay
    /// to model DOM mutations).
    pub fn insert_spec(&mut self, parent: NodeId, spec: &NodeSpec) -> NodeId {
        let node = self.build_node(spec);
        self.append_child(parent, node);
        node
    }

    fn build_node(&mut self, spec: &NodeSpec) -> NodeId {
        let node = self.create_element(&spec.tag);
        if let Some(id) = &spec.id {
            self.set_dom_id(node, id);
        }
        for class in &spec.classes {
            self.add_class(node, class);
        }
        for (name, value) in &spec.attrs {
            self.set_attr(node, name, value);
        }
        if let Some(text) = &spec.text {
            self.set_text(node, text);
        }
        if let Some(rect) = spec.rect {
            self.set_rect(node, rect);
        }
        for child_spec in &spec.children {
            let child = self.build_node(child_spec);
            self.append_child(node, child);
        }
        if !spec.shadow.is_empty() {
            let shadow = self.attach_shadow(node);
            for child_spec in &spec.shadow {
                let child = self.build_node(child_spec);
                self.append_child(shadow, child);
            }
        }
        node
    }
}

/// Declarative element for page specs (replay input, tests).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSpec {
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attrs: HashMap<String, String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub children: Vec<NodeSpec>,
    #[serde(default)]
    pub shadow: Vec<NodeSpec>,
}

impl NodeSpec {
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn class(mut self, class: &str) -> Self {
        self.classes.push(class.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn rect(mut self, x: f64, y: f64, w: f64, h: f64) -> Self {
        self.rect = Some(Rect { x, y, w, h });
        self
    }

    pub fn child(mut self, child: NodeSpec) -> Self {
        self.children.push(child);
        self
    }

    pub fn shadow_child(mut self, child: NodeSpec) -> Self {
        self.shadow.push(child);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageSpec {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub body: Option<NodeSpec>,
}

#[derive(Debug, Clone)]
struct FrameNode {
    origin: String,
    document: Document,
    parent: Option<FrameId>,
    children: Vec<FrameId>,
}

/// Frames of one logical page, top document first. Each frame carries an
/// origin string; crossing an origin boundary is what truncates frame
/// chains during capture.
#[derive(Debug, Clone)]
pub struct FrameTree {
    frames: Vec<FrameNode>,
}

impl FrameTree {
    pub fn new(origin: &str, document: Document) -> Self {
        Self {
            frames: vec![FrameNode {
                origin: origin.to_string(),
                document,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    pub fn top(&self) -> FrameId {
        FrameId(0)
    }

    pub fn add_child_frame(&mut self, parent: FrameId, origin: &str, document: Document) -> FrameId {
        let id = FrameId(self.frames.len());
        self.frames.push(FrameNode {
            origin: origin.to_string(),
            document,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.frames[parent.0].children.push(id);
        id
    }

    pub fn origin(&self, frame: FrameId) -> &str {
        &self.frames[frame.0].origin
    }

    pub fn parent(&self, frame: FrameId) -> Option<FrameId> {
        self.frames[frame.0].parent
    }

    pub fn children(&self, frame: FrameId) -> &[FrameId] {
        &self.frames[frame.0].children
    }

    pub fn document(&self, frame: FrameId) -> &Document {
        &self.frames[frame.0].document
    }

    pub fn document_mut(&mut self, frame: FrameId) -> &mut Document {
        &mut self.frames[frame.0].document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_lookup_and_spec_building() {
        let spec = PageSpec {
            url: "https://example.com".to_string(),
            title: "Example".to_string(),
            body: Some(
                NodeSpec::new("body").child(
                    NodeSpec::new("div")
                        .id("main")
                        .class("container")
                        .child(NodeSpec::new("button").text("Go").rect(4.0, 8.0, 80.0, 24.0)),
                ),
            ),
        };
        let doc = Document::from_spec(&spec);

        let body = doc.body().expect("body should exist");
        assert_eq!(doc.tag(body), "body");

        let div = doc.find_by_dom_id("main").expect("div#main");
        assert_eq!(doc.classes(div), &["container".to_string()]);
        let button = doc.children(div)[0];
        assert_eq!(doc.tag(button), "button");
        assert_eq!(doc.text(button), Some("Go"));
        assert!(doc.rect(button).is_some());
    }

    #[test]
    fn empty_document_has_no_body() {
        let doc = Document::new("about:blank", "");
        assert!(doc.body().is_none());
    }

    #[test]
    fn detach_removes_from_parent_and_drops_geometry() {
        let mut doc = Document::new("https://example.com", "");
        let body = doc.create_element("body");
        doc.append_child(doc.root(), body);
        let div = doc.create_element("div");
        doc.set_rect(
            div,
            Rect {
                x: 0.0,
                y: 0.0,
                w: 10.0,
                h: 10.0,
            },
        );
        doc.append_child(body, div);

        assert!(doc.rect(div).is_some());
        doc.detach(div);
        assert!(doc.rect(div).is_none());
        assert!(doc.children(body).is_empty());
        assert!(doc.is_detached(div));
    }

    #[test]
    fn shadow_trees_hang_off_their_host() {
        let mut doc = Document::new("https://example.com", "");
        let body = doc.create_element("body");
        doc.append_child(doc.root(), body);
        let host = doc.create_element("x-widget");
        doc.append_child(body, host);
        let shadow = doc.attach_shadow(host);
        let inner = doc.create_element("span");
        doc.append_child(shadow, inner);

        assert!(doc.is_shadow_root(shadow));
        assert_eq!(doc.shadow_host(shadow), Some(host));
        assert_eq!(doc.parent(inner), Some(shadow));
        // Attaching twice returns the same root.
        assert_eq!(doc.attach_shadow(host), shadow);
    }

    #[test]
    fn frame_tree_tracks_parent_child_indices() {
        let top_doc = Document::new("https://example.com", "top");
        let mut tree = FrameTree::new("https://example.com", top_doc);
        let top = tree.top();

        let a = tree.add_child_frame(top, "https://example.com", Document::new("a", ""));
        let b = tree.add_child_frame(top, "https://ads.example.net", Document::new("b", ""));

        assert_eq!(tree.children(top), &[a, b]);
        assert_eq!(tree.parent(a), Some(top));
        assert_eq!(tree.origin(b), "https://ads.example.net");
    }
}
