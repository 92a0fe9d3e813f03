//! End-to-end design implementation against the in-memory store

use design_builder::{BuildError, Builder, BuilderConfig, Design};
use design_store::{attrs, Query, Store, Value};
use design_test_utils::{builder_with, design, init_tracing, sample_store};
use pretty_assertions::assert_eq;

#[test]
fn creates_records_and_journals_them() {
    init_tracing();
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    builder
        .implement_design(
            &design(
                r#"
regions:
  name: East
sites:
  - name: HQ
    region__name: East
  - name: Branch
    region__name: East
"#,
            ),
            true,
        )
        .unwrap();

    assert_eq!(store.count("Region"), 1);
    assert_eq!(store.count("Site"), 2);

    let journal = builder.journal();
    assert_eq!(journal.len(), 3);
    assert_eq!(journal.created()["Site"].len(), 2);
    assert!(journal.updated().is_empty());

    let created = builder.created_objects().unwrap();
    let names: Vec<_> = created["dcim.site"]
        .iter()
        .map(|site| site.get("name").cloned())
        .collect();
    assert_eq!(names, vec![Some(Value::from("HQ")), Some(Value::from("Branch"))]);

    let region = store
        .lookup(&Query::new("Region", attrs! { "name" => "East" }))
        .unwrap();
    let hq = store
        .lookup(&Query::new("Site", attrs! { "name" => "HQ" }))
        .unwrap();
    assert_eq!(hq.get("region"), region.reference().map(Value::Record).as_ref());
    assert_eq!(hq.get("status"), Some(&Value::from("active")));
}

#[test]
fn get_lookups_are_not_journaled() {
    let store = sample_store();
    store.seed("Region", attrs! { "name" => "East" }).unwrap();
    let mut builder = builder_with(&store, Vec::new());

    builder
        .implement_design(
            &design(
                r#"
sites:
  name: HQ
  region:
    "!get:name": East
"#,
            ),
            true,
        )
        .unwrap();

    assert_eq!(builder.journal().len(), 1);
    assert!(!builder.journal().created().contains_key("Region"));
}

#[test]
fn create_or_update_site_in_existing_region() {
    let store = sample_store();
    let region = store
        .seed("Region", attrs! { "name" => "US East", "slug" => "us-east" })
        .unwrap();
    let mut builder = builder_with(&store, Vec::new());

    builder
        .implement_design(
            &design(
                r#"
sites:
  "!create_or_update:name": HQ
  region:
    "!get:slug": us-east
"#,
            ),
            true,
        )
        .unwrap();

    let sites = store.all("Site");
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].get("name"), Some(&Value::from("HQ")));
    assert_eq!(sites[0].get("region"), Some(&Value::Record(region)));

    let journal = builder.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal.created()["Site"].len(), 1);
    assert!(!journal.created().contains_key("Region"));
    assert!(!journal.updated().contains_key("Region"));
    assert_eq!(store.count("Region"), 1);
}

#[test]
fn create_or_update_creates_then_updates() {
    let store = sample_store();
    let yaml = |asn: i64| {
        format!(
            r#"
sites:
  "!create_or_update:name": HQ
  asn: {asn}
"#
        )
    };

    let mut builder = builder_with(&store, Vec::new());
    builder.implement_design(&design(&yaml(65000)), true).unwrap();
    assert_eq!(builder.journal().created()["Site"].len(), 1);

    builder.implement_design(&design(&yaml(65001)), true).unwrap();
    assert!(builder.journal().created().is_empty());
    assert_eq!(builder.journal().updated()["Site"].len(), 1);

    let sites = store.all("Site");
    assert_eq!(sites.len(), 1);
    assert_eq!(sites[0].get("asn"), Some(&Value::Int(65001)));
    assert_eq!(sites[0].get("name"), Some(&Value::from("HQ")));
}

#[test]
fn record_saved_twice_is_journaled_once_as_created() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    builder
        .implement_design(
            &design(
                r#"
regions:
  - "!create_or_update:name": East
  - "!create_or_update:name": East
    slug: east
"#,
            ),
            true,
        )
        .unwrap();

    let journal = builder.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(journal.created()["Region"].len(), 1);
    assert!(journal.updated().is_empty());
    assert_eq!(store.all("Region")[0].get("slug"), Some(&Value::from("east")));
}

#[test]
fn updates_can_be_left_out_of_the_journal() {
    let store = sample_store();
    store.seed("Site", attrs! { "name" => "HQ" }).unwrap();
    let mut builder = Builder::builder(store.clone())
        .config(BuilderConfig::default().with_journal_updates(false))
        .build()
        .unwrap();

    builder
        .implement_design(
            &design(
                r#"
sites:
  "!update:name": HQ
  asn: 7
"#,
            ),
            true,
        )
        .unwrap();

    assert!(builder.journal().is_empty());
    assert_eq!(store.all("Site")[0].get("asn"), Some(&Value::Int(7)));
}

#[test]
fn update_without_match_fails() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(&design("sites:\n  \"!update:name\": Nowhere\n"), true)
        .unwrap_err();

    assert!(matches!(err, BuildError::NoMatchForUpdate { ref model, .. } if model == "Site"));
    assert_eq!(err.to_string(), r#"No match for Site with name="Nowhere""#);
    assert_eq!(store.count("Site"), 0);
}

#[test]
fn get_with_field_assignments_fails() {
    let store = sample_store();
    store.seed("Site", attrs! { "name" => "HQ" }).unwrap();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(
            &design(
                r#"
sites:
  "!get:name": HQ
  asn: 1
"#,
            ),
            true,
        )
        .unwrap_err();

    assert!(err.is_implementation_error());
    assert!(err
        .to_string()
        .contains("Cannot update fields when using the GET action"));
    assert_eq!(store.all("Site")[0].get("asn"), None);
}

#[test]
fn missing_related_record_names_type_and_criteria() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(
            &design(
                r#"
sites:
  name: HQ
  region__name: Nowhere
"#,
            ),
            true,
        )
        .unwrap_err();

    assert!(err.is_implementation_error());
    assert!(err
        .to_string()
        .contains(r#"Could not find Region: name="Nowhere""#));
    assert_eq!(store.count("Site"), 0);
}

#[test]
fn ambiguous_related_record_fails() {
    let store = sample_store();
    store.seed("Region", attrs! { "name" => "East", "slug" => "e" }).unwrap();
    store.seed("Region", attrs! { "name" => "West", "slug" => "e" }).unwrap();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(&design("sites:\n  name: HQ\n  region__slug: e\n"), true)
        .unwrap_err();

    assert!(err.to_string().contains("but got more than one"));
}

#[test]
fn validation_failure_reports_field_messages() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(&design("sites:\n  asn: 5\n"), true)
        .unwrap_err();

    assert!(err.is_validation_error());
    let message = err.to_string();
    assert!(message.contains("failed validation"));
    assert!(message.contains("**name:** This field cannot be blank."));
}

#[test]
fn unknown_and_excluded_keys_are_rejected() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    for key in ["widgets", "users"] {
        let err = builder
            .implement_design(&Design::new().with(key, attrs! { "name" => "x" }), true)
            .unwrap_err();
        assert_eq!(err.to_string(), format!("Unknown model key {key} in design"));
    }

    let err = builder
        .implement_design(&Design::new().with("regions", attrs! {}), true)
        .unwrap_err();
    assert!(matches!(err, BuildError::UnknownModelKey { .. }));
}

#[test]
fn scalar_entries_are_rejected() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(&design("regions:\n  - East\n"), true)
        .unwrap_err();
    assert!(err.is_implementation_error());
}

#[test]
fn unknown_directive_and_bad_double_underscore() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(&design("sites:\n  \"!delete:name\": HQ\n"), true)
        .unwrap_err();
    assert!(matches!(err, BuildError::UnknownAction { ref tag, .. } if tag == "delete"));

    let err = builder
        .implement_design(&design("sites:\n  name: HQ\n  colour__name: red\n"), true)
        .unwrap_err();
    assert!(matches!(err, BuildError::NotAField { ref field, .. } if field == "colour"));
}

#[test]
fn constructor_arguments_reach_the_store() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    builder
        .implement_design(&design("sites:\n  name: HQ\n  legacy_id: 42\n"), true)
        .unwrap();
    assert_eq!(store.all("Site")[0].get("legacy_id"), Some(&Value::Int(42)));

    let err = builder
        .implement_design(&design("sites:\n  name: Branch\n  colour: red\n"), true)
        .unwrap_err();
    assert!(err.is_implementation_error());
    assert!(err.to_string().contains("unexpected keyword argument 'colour'"));
}

#[test]
fn custom_fields_are_stored_apart_from_fields() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    builder
        .implement_design(
            &design(
                r#"
sites:
  name: HQ
  custom_fields:
    owner: netops
    rack_count: 4
"#,
            ),
            true,
        )
        .unwrap();

    let site = &store.all("Site")[0];
    assert_eq!(site.custom_field("owner"), Some(&Value::from("netops")));
    assert_eq!(site.custom_field("rack_count"), Some(&Value::Int(4)));
    assert_eq!(site.get("owner"), None);
}

#[test]
fn nesting_beyond_the_bound_fails() {
    let store = sample_store();
    let mut builder = Builder::builder(store.clone())
        .config(BuilderConfig::default().with_max_depth(1))
        .build()
        .unwrap();

    let err = builder
        .implement_design(
            &design(
                r#"
regions:
  name: East
  sites:
    - name: HQ
"#,
            ),
            true,
        )
        .unwrap_err();

    assert!(
        matches!(err, BuildError::DepthExceeded { max: 1, ref path } if path == "Region -> Site")
    );
}

#[test]
fn designs_load_from_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("sites.yaml");
    std::fs::write(&path, "regions:\n  name: East\n")?;

    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());
    builder.implement_design(&Design::from_path(&path)?, true)?;
    assert_eq!(store.count("Region"), 1);
    Ok(())
}
