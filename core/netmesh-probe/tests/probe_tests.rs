//! Tests for the JSON probe, the probe directory and the staging base.

mod common;

use common::{node_id, FEED_V1};
use netmesh_probe::{JsonProbe, Probe, ProbeDirectory, ProbeError, StagingMeshBase};
use netmesh_types::{MeshObjectIdentifier, PropertyValue};
use pretty_assertions::assert_eq;
use std::collections::BTreeSet;

fn read_json(body: &str) -> Result<StagingMeshBase, ProbeError> {
    let resource = node_id("https://example.com/feed.json");
    let mut staging = StagingMeshBase::new(resource.clone());
    JsonProbe.read(&resource, None, body.as_bytes(), Some("application/json"), &mut staging)?;
    Ok(staging)
}

#[test]
fn staging_starts_with_the_home_object() {
    let staging = StagingMeshBase::new(node_id("https://example.com/a"));
    assert_eq!(staging.len(), 1);
    assert!(staging.get(&staging.home_object()).is_some());
}

#[test]
fn json_probe_reads_objects_properties_and_neighbors() {
    let staging = read_json(FEED_V1).unwrap();
    assert_eq!(staging.len(), 2);

    let home = staging.home_object();
    let item = MeshObjectIdentifier::parse("https://example.com/feed.json#item-1").unwrap();

    let feed = staging.get(&home).unwrap();
    assert!(feed.types.contains("Feed"));
    assert_eq!(feed.property("title"), Some(&PropertyValue::from("News")));
    assert_eq!(
        feed.roles_with(&item),
        Some(&BTreeSet::from(["contains".to_string()]))
    );

    let item_data = staging.get(&item).unwrap();
    assert_eq!(item_data.property("rank"), Some(&PropertyValue::Integer(1)));
    assert!(item_data.is_related_to(&home));
}

#[test]
fn json_null_sets_a_null_property() {
    let staging = read_json(r#"{ "objects": [ { "id": "", "properties": { "gone": null } } ] }"#).unwrap();
    let home = staging.get(&staging.home_object()).unwrap();
    assert!(home.properties.contains_key("gone"));
    assert_eq!(home.property("gone"), None);
}

#[test]
fn json_probe_rejects_malformed_content() {
    assert!(matches!(read_json("{ not json"), Err(ProbeError::Syntax(_))));
    assert!(matches!(
        read_json(r#"{ "objects": [], "extra": 1 }"#),
        Err(ProbeError::Syntax(_))
    ));
}

#[test]
fn json_probe_rejects_structured_property_values() {
    let result = read_json(r#"{ "objects": [ { "id": "x", "properties": { "list": [1, 2] } } ] }"#);
    assert!(matches!(result, Err(ProbeError::Syntax(_))));
}

#[test]
fn json_probe_rejects_unknown_neighbors() {
    let result = read_json(r#"{ "objects": [ { "id": "", "neighbors": { "missing": [] } } ] }"#);
    assert!(matches!(result, Err(ProbeError::Syntax(_))));
}

#[test]
fn json_probe_rejects_invalid_local_ids() {
    let result = read_json(r#"{ "objects": [ { "id": "has space" } ] }"#);
    assert!(matches!(result, Err(ProbeError::Types(_))));
}

#[test]
fn directory_picks_probe_by_content_type() {
    let directory = ProbeDirectory::new().with("application/json", std::sync::Arc::new(JsonProbe));
    assert!(directory.probe_for(Some("application/json")).is_ok());
    assert!(matches!(
        directory.probe_for(Some("text/html")),
        Err(ProbeError::UnsupportedContentType(ct)) if ct == "text/html"
    ));
    assert!(matches!(
        directory.probe_for(None),
        Err(ProbeError::UnsupportedContentType(_))
    ));
}

#[test]
fn json_directory_falls_back_for_unknown_types() {
    let directory = ProbeDirectory::json();
    assert!(directory.probe_for(Some("text/plain")).is_ok());
    assert!(directory.probe_for(None).is_ok());
}
