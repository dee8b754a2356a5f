//! LLSD XML wire behaviour over generated and hand-picked documents.

use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;
use sim_features::llsd::xml;
use sim_features::{LlsdMap, LlsdValue};

fn arb_scalar() -> impl Strategy<Value = LlsdValue> {
    prop_oneof![
        Just(LlsdValue::Undef),
        any::<bool>().prop_map(LlsdValue::Boolean),
        any::<i32>().prop_map(LlsdValue::Integer),
        any::<f64>()
            .prop_filter("finite reals only", |r| r.is_finite())
            .prop_map(LlsdValue::Real),
        any::<String>().prop_map(LlsdValue::String),
    ]
}

fn arb_value() -> impl Strategy<Value = LlsdValue> {
    arb_scalar().prop_recursive(
        4,  // depth
        64, // max size
        6,  // items per collection
        |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(LlsdValue::Array),
                prop::collection::vec((any::<String>(), inner), 0..6)
                    .prop_map(|entries| LlsdValue::Map(entries.into_iter().collect())),
            ]
        },
    )
}

fn arb_document() -> impl Strategy<Value = LlsdMap> {
    prop::collection::vec((any::<String>(), arb_value()), 0..8)
        .prop_map(|entries| entries.into_iter().collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_value_survives_the_wire(value in arb_value()) {
        let wire = xml::to_string(&value);
        let decoded = xml::from_str(&wire).unwrap();
        prop_assert_eq!(&decoded, &value);
        prop_assert_eq!(xml::to_string(&decoded), wire);
    }

    #[test]
    fn prop_document_survives_the_wire(doc in arb_document()) {
        let wire = xml::map_to_string(&doc);
        let decoded = xml::from_str(&wire).unwrap();
        prop_assert_eq!(xml::to_string(&decoded), wire.clone());
        prop_assert_eq!(decoded, LlsdValue::Map(doc));
    }
}

#[test]
fn test_extreme_reals_are_exact() {
    let reals = [
        1e300,
        -0.0,
        5e-324,
        f64::MAX,
        f64::MIN,
        f64::MIN_POSITIVE,
        0.1,
        1.0 / 3.0,
        -1.23e-15,
    ];
    for real in reals {
        let wire = xml::to_string(&LlsdValue::Real(real));
        let decoded = xml::from_str(&wire).unwrap();
        let back = decoded.as_real().unwrap();
        assert_eq!(back.to_bits(), real.to_bits(), "{} came back as {}", real, back);
        assert_eq!(xml::to_string(&decoded), wire);
    }
}

#[test]
fn test_awkward_text_is_exact() {
    let texts = [
        "  lead",
        "trail  ",
        "\r\n",
        "\u{0}",
        "]]>",
        "&#13;",
        "<![CDATA[x]]>",
        "\u{feff}x",
    ];
    for text in texts {
        let mut doc = LlsdMap::new();
        doc.insert(text.to_string(), LlsdValue::from(text));
        let wire = xml::map_to_string(&doc);
        let decoded = xml::from_str(&wire).unwrap();
        assert_eq!(decoded, LlsdValue::Map(doc), "{:?}", text);
        assert_eq!(xml::to_string(&decoded), wire);
    }
}

#[test]
fn test_map_order_is_preserved_on_the_wire() {
    let mut doc = LlsdMap::new();
    for key in ["zeta", "alpha", "mid", "Beta"] {
        doc.insert(key.into(), true.into());
    }
    let decoded = xml::from_str(&xml::map_to_string(&doc)).unwrap();
    let keys: Vec<&str> = decoded
        .as_map()
        .unwrap()
        .keys()
        .map(String::as_str)
        .collect();
    assert_eq!(keys, vec!["zeta", "alpha", "mid", "Beta"]);
}

#[test]
fn test_viewer_style_document_is_understood() {
    let wire = r#"<?xml version="1.0" ?>
<llsd>
  <map>
    <key>MeshRezEnabled</key><boolean>true</boolean>
    <key>OpenSimExtras</key>
    <map>
      <key>GridName</key><string>OSGrid</string>
      <key>GridURL</key><uri>http://grid.example:8002/</uri>
    </map>
    <key>AgentId</key><uuid>6f9a1c52-3b0e-4d55-9a6b-5a3c7f0d2e11</uuid>
    <key>Limit</key><integer />
  </map>
</llsd>"#;
    let decoded = xml::from_str(wire).unwrap();
    let map = decoded.as_map().unwrap();
    assert_eq!(map["MeshRezEnabled"], LlsdValue::Boolean(true));
    assert_eq!(map["Limit"], LlsdValue::Integer(0));
    assert_eq!(
        map["AgentId"].as_str(),
        Some("6f9a1c52-3b0e-4d55-9a6b-5a3c7f0d2e11")
    );
    let extras = map["OpenSimExtras"].as_map().unwrap();
    assert_eq!(extras["GridURL"].as_str(), Some("http://grid.example:8002/"));
}
