use crate::events::ElementDescriptor;
use crate::page::{Document, NodeId};

/// Deterministic CSS-like path for an element within its document (or
/// within its shadow tree): ancestors joined with " > ", same-tag
/// siblings disambiguated by :nth-of-type. Elements with an id resolve
/// to the id shorthand directly.
pub fn selector_for(doc: &Document, node: NodeId) -> String {
    if doc.is_shadow_root(node) {
        return String::new();
    }
    if let Some(id) = doc.dom_id(node) {
        return format!("#{id}");
    }
    if Some(node) == doc.body() {
        return "body".to_string();
    }

    let mut path = Vec::new();
    let mut cur = Some(node);
    while let Some(n) = cur {
        if doc.is_shadow_root(n) {
            // Shadow boundary: paths are relative to the shadow root.
            break;
        }
        let mut segment = doc.tag(n).to_string();
        for class in doc.classes(n) {
            segment.push('.');
            segment.push_str(class);
        }
        segment.push_str(&format!(":nth-of-type({})", nth_of_type(doc, n)));
        path.push(segment);
        cur = doc.parent(n);
    }
    path.reverse();
    path.join(" > ")
}

fn nth_of_type(doc: &Document, node: NodeId) -> usize {
    match doc.parent(node) {
        Some(parent) => {
            doc.children(parent)
                .iter()
                .take_while(|&&c| c != node)
                .filter(|&&c| doc.tag(c) == doc.tag(node))
                .count()
                + 1
        }
        None => 1,
    }
}

/// Host-element tags for an element nested inside shadow trees,
/// outermost host first; empty in the light DOM.
pub fn shadow_path(doc: &Document, node: NodeId) -> Vec<String> {
    let mut segments = Vec::new();
    let mut cur = node;
    loop {
        let root = root_of(doc, cur);
        match doc.shadow_host(root) {
            Some(host) => {
                segments.push(doc.tag(host).to_string());
                cur = host;
            }
            None => break,
        }
    }
    segments.reverse();
    segments
}

fn root_of(doc: &Document, mut node: NodeId) -> NodeId {
    while let Some(parent) = doc.parent(node) {
        node = parent;
    }
    node
}

/// Full attribute-and-geometry snapshot of an element. Geometry reads on
/// detached elements yield None; everything else is best effort.
pub fn element_descriptor(doc: &Document, node: NodeId) -> ElementDescriptor {
    let text = doc
        .text(node)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    ElementDescriptor {
        selector: selector_for(doc, node),
        tag: Some(doc.tag(node).to_string()),
        id: doc.dom_id(node).map(str::to_string),
        name: doc.attr(node, "name").map(str::to_string),
        class_list: doc.classes(node).to_vec(),
        input_type: doc.attr(node, "type").map(str::to_string),
        placeholder: doc.attr(node, "placeholder").map(str::to_string),
        text,
        role: doc.attr(node, "role").map(str::to_string),
        aria_label: doc.attr(node, "aria-label").map(str::to_string),
        bounding_rect: doc.rect(node),
        shadow_path: shadow_path(doc, node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Rect;
    use crate::page::NodeSpec;
    use crate::page::PageSpec;

    fn doc_with_body(body: NodeSpec) -> Document {
        Document::from_spec(&PageSpec {
            url: "https://example.com".to_string(),
            title: String::new(),
            body: Some(body),
        })
    }

    #[test]
    fn id_and_body_shorthands() {
        let doc = doc_with_body(NodeSpec::new("body").child(NodeSpec::new("div").id("main")));
        let body = doc.body().unwrap();
        let div = doc.find_by_dom_id("main").unwrap();

        assert_eq!(selector_for(&doc, body), "body");
        assert_eq!(selector_for(&doc, div), "#main");
    }

    #[test]
    fn sibling_disambiguation_by_position() {
        let doc = doc_with_body(
            NodeSpec::new("body")
                .child(NodeSpec::new("div"))
                .child(NodeSpec::new("span"))
                .child(NodeSpec::new("div").class("hit")),
        );
        let body = doc.body().unwrap();
        let second_div = doc.children(body)[2];

        assert_eq!(
            selector_for(&doc, second_div),
            "html:nth-of-type(1) > body:nth-of-type(1) > div.hit:nth-of-type(2)"
        );
    }

    #[test]
    fn selector_is_deterministic() {
        let doc = doc_with_body(
            NodeSpec::new("body").child(
                NodeSpec::new("ul")
                    .child(NodeSpec::new("li"))
                    .child(NodeSpec::new("li").class("active")),
            ),
        );
        let ul = doc.children(doc.body().unwrap())[0];
        let li = doc.children(ul)[1];

        let first = selector_for(&doc, li);
        let second = selector_for(&doc, li);
        assert_eq!(first, second);
        assert!(first.ends_with("li.active:nth-of-type(2)"));
    }

    #[test]
    fn shadow_path_lists_hosts_outermost_first() {
        let doc = doc_with_body(NodeSpec::new("body").child(
            NodeSpec::new("x-outer").shadow_child(
                NodeSpec::new("x-inner").shadow_child(NodeSpec::new("button").id("deep")),
            ),
        ));
        let deep = doc.find_by_dom_id("deep").unwrap();

        assert_eq!(
            shadow_path(&doc, deep),
            vec!["x-outer".to_string(), "x-inner".to_string()]
        );
        // Selector is relative to the innermost shadow root.
        assert_eq!(selector_for(&doc, deep), "#deep");

        let body = doc.body().unwrap();
        assert!(shadow_path(&doc, body).is_empty());
    }

    #[test]
    fn descriptor_reads_attributes_and_geometry() {
        let doc = doc_with_body(
            NodeSpec::new("body").child(
                NodeSpec::new("input")
                    .id("q")
                    .attr("name", "query")
                    .attr("type", "text")
                    .attr("placeholder", "Search")
                    .attr("role", "searchbox")
                    .attr("aria-label", "Site search")
                    .rect(1.0, 2.0, 200.0, 30.0),
            ),
        );
        let input = doc.find_by_dom_id("q").unwrap();
        let desc = element_descriptor(&doc, input);

        assert_eq!(desc.selector, "#q");
        assert_eq!(desc.tag.as_deref(), Some("input"));
        assert_eq!(desc.name.as_deref(), Some("query"));
        assert_eq!(desc.input_type.as_deref(), Some("text"));
        assert_eq!(desc.placeholder.as_deref(), Some("Search"));
        assert_eq!(desc.role.as_deref(), Some("searchbox"));
        assert_eq!(desc.aria_label.as_deref(), Some("Site search"));
        assert_eq!(
            desc.bounding_rect,
            Some(Rect {
                x: 1.0,
                y: 2.0,
                w: 200.0,
                h: 30.0
            })
        );
    }

    #[test]
    fn detached_elements_lose_geometry_but_keep_attributes() {
        let mut doc = doc_with_body(
            NodeSpec::new("body")
                .child(NodeSpec::new("div").id("gone").rect(0.0, 0.0, 5.0, 5.0)),
        );
        let div = doc.find_by_dom_id("gone").unwrap();
        doc.detach(div);

        let desc = element_descriptor(&doc, div);
        assert!(desc.bounding_rect.is_none());
        assert_eq!(desc.id.as_deref(), Some("gone"));
    }

    #[test]
    fn whitespace_only_text_is_dropped() {
        let doc = doc_with_body(NodeSpec::new("body").child(NodeSpec::new("p").id("p").text("   ")));
        let p = doc.find_by_dom_id("p").unwrap();
        assert!(element_descriptor(&doc, p).text.is_none());
    }
}
