use super::*;

#[test]
fn test_builder_serializes() {
    let element = Element::new("iq")
        .attr("type", "get")
        .attr("id", "7")
        .child(Element::new("ping").attr("xmlns", "urn:xmpp:ping"));

    assert_eq!(
        element.to_string(),
        r#"<iq type="get" id="7"><ping xmlns="urn:xmpp:ping"/></iq>"#
    );
}

#[test]
fn test_escaping() {
    let element = Element::new("v").attr("a", "\"<&>'").text("1 < 2 & 3");
    assert_eq!(
        element.to_string(),
        "<v a=\"&quot;&lt;&amp;&gt;&apos;\">1 &lt; 2 &amp; 3</v>"
    );
}

#[test]
fn test_set_attr_replaces() {
    let mut element = Element::new("x").attr("k", "1");
    element.set_attr("k", "2");
    assert_eq!(element.get_attr("k"), Some("2"));
    assert_eq!(element.to_string(), r#"<x k="2"/>"#);
}

#[test]
fn test_parse_keeps_namespace_changes_only() {
    let input = r#"<message xmlns="jabber:client" type="headline"><event xmlns="http://jabber.org/protocol/pubsub#event"><items><item/></items></event></message>"#;
    let root = Element::parse(input).unwrap();

    assert_eq!(root.name(), "message");
    assert_eq!(root.get_attr("xmlns"), Some("jabber:client"));
    assert_eq!(root.get_attr("type"), Some("headline"));

    let event = root.get_child("event").unwrap();
    assert_eq!(
        event.get_attr("xmlns"),
        Some("http://jabber.org/protocol/pubsub#event")
    );
    // Inherited namespace is not repeated
    let items = event.get_child("items").unwrap();
    assert_eq!(items.get_attr("xmlns"), None);
    assert_eq!(items.children_named("item").count(), 1);
}

#[test]
fn test_parse_round_trip_through_display() {
    let input = r#"<a x="1"><b>text &amp; more</b><c/></a>"#;
    let root = Element::parse(input).unwrap();
    assert_eq!(root.child_text("b").as_deref(), Some("text & more"));
    assert_eq!(root.to_string(), input);
}

#[test]
fn test_find_path() {
    let root = Element::parse("<a><b><c>deep</c></b></a>").unwrap();
    assert_eq!(
        root.find_path(&["b", "c"]).map(Element::text_content),
        Some("deep".to_string())
    );
    assert!(root.find_path(&["b", "x"]).is_none());
}

#[test]
fn test_text_and_element_nodes_counted() {
    let root = Element::parse("<value>1</value>").unwrap();
    assert_eq!(root.nodes().len(), 1);
    assert_eq!(root.nodes()[0], Node::Text("1".to_string()));

    let empty = Element::parse("<value/>").unwrap();
    assert!(empty.nodes().is_empty());

    let mixed = Element::parse("<value>1<b/></value>").unwrap();
    assert_eq!(mixed.nodes().len(), 2);
}

#[test]
fn test_require_helpers() {
    let root = Element::parse(r#"<a k="v"/>"#).unwrap();
    assert_eq!(root.require_attr("k").unwrap(), "v");
    assert_eq!(
        root.require_attr("missing").unwrap_err(),
        XmlError::MissingAttribute {
            element: "a".into(),
            attribute: "missing".into()
        }
    );
    assert_eq!(
        root.require_child("b").unwrap_err(),
        XmlError::MissingElement("b".into())
    );
}

#[test]
fn test_malformed_input() {
    assert!(matches!(Element::parse("<a><b></a>"), Err(XmlError::Parse(_))));
    assert!(Element::parse("").is_err());
}
