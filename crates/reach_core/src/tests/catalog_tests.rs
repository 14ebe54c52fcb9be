use super::*;

#[test]
fn catalog_ids_are_unique_and_parse_back() {
    let mut seen = std::collections::HashSet::new();
    for status in StatusId::ALL {
        assert!(seen.insert(status.as_str()));
        assert_eq!(StatusId::parse(status.as_str()), Some(status));
    }
    assert_eq!(StatusId::parse("reach_4"), None);
    assert_eq!(StatusId::parse("REACH_2"), None);
}

#[test]
fn no_reach_is_the_only_terminal_status() {
    let terminal: Vec<_> = StatusId::ALL
        .into_iter()
        .filter(|status| status.is_terminal())
        .collect();
    assert_eq!(terminal, vec![StatusId::NoReach]);
    assert_eq!(StatusId::ALL.last(), Some(&StatusId::NoReach));
}

#[test]
fn reach_maps_to_marker() {
    assert_eq!(StatusId::for_reach(0, true), None);
    assert_eq!(StatusId::for_reach(1, false), None);
    assert_eq!(StatusId::for_reach(1, true), Some(StatusId::Reach1));
    assert_eq!(StatusId::for_reach(2, false), Some(StatusId::Reach2));
    assert_eq!(StatusId::for_reach(3, false), Some(StatusId::Reach3));
    assert_eq!(StatusId::for_reach(9, false), Some(StatusId::Reach3));
}

#[test]
fn serializes_as_wire_ids() {
    assert_eq!(
        serde_json::to_value(StatusId::NoReach).expect("json"),
        serde_json::json!("no_reach")
    );
}
