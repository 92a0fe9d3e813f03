//! Extension dispatch, references and commit / roll-back hooks

use design_builder::{
    attribute_fn, value_fn, AttributeOutput, BuildError, Builder, Extension, HookPhase,
    LifecycleEvent,
};
use design_store::{
    attrs, AttributeMap, CustomRelationship, ModelSchema, Query, Record, RecordRef, Store,
    StoreError, Value,
};
use design_test_utils::{
    builder_with, calls, design, sample_catalog, sample_store, CallLog, RecordingExtension,
};
use mockall::mock;
use pretty_assertions::assert_eq;
use std::sync::Arc;

mock! {
    Db {}

    impl Store for Db {
        fn catalog(&self) -> Vec<ModelSchema>;
        fn lookup(&self, query: &Query) -> Result<Record, StoreError>;
        fn construct(&self, model: &str, kwargs: &AttributeMap) -> Result<Record, StoreError>;
        fn validate_and_save(&self, record: &mut Record) -> Result<(), StoreError>;
        fn refresh(&self, record: &mut Record) -> Result<(), StoreError>;
        fn fetch(&self, reference: &RecordRef) -> Result<Record, StoreError>;
        fn add_related(
            &self,
            owner: &RecordRef,
            field: &str,
            item: &RecordRef,
        ) -> Result<(), StoreError>;
        fn relationships(&self, model: &str) -> Vec<CustomRelationship>;
        fn associate(
            &self,
            relationship: &str,
            source: &RecordRef,
            destination: &RecordRef,
        ) -> Result<(), StoreError>;
    }
}

fn audit(log: &CallLog) -> Box<dyn Extension> {
    Box::new(RecordingExtension::new("audit", log.clone()))
}

#[test]
fn conflicting_actions_touch_nothing() {
    let mut db = MockDb::new();
    db.expect_catalog().return_const(sample_catalog());
    db.expect_lookup().never();
    db.expect_construct().never();
    db.expect_validate_and_save().never();
    db.expect_add_related().never();
    db.expect_associate().never();
    db.expect_relationships()
        .return_const(Vec::<CustomRelationship>::new());

    let log = CallLog::default();
    let mut builder = Builder::builder(Arc::new(db))
        .boxed_extension(audit(&log))
        .build()
        .unwrap();

    let err = builder
        .implement_design(
            &design(
                r#"
sites:
  "!get:name": HQ
  "!update:name": HQ
"#,
            ),
            true,
        )
        .unwrap_err();

    assert!(err.to_string().starts_with("Can perform only one action for Site"));
    assert_eq!(calls(&log, "audit", "roll_back"), 1);
    assert_eq!(calls(&log, "audit", "commit"), 0);
}

#[test]
fn commit_runs_hooks_once() {
    let store = sample_store();
    let log = CallLog::default();
    let mut builder = builder_with(&store, vec![audit(&log)]);

    builder
        .implement_design(&design("regions:\n  name: East\n"), true)
        .unwrap();

    assert_eq!(*log.lock(), vec!["audit:commit".to_string()]);
}

#[test]
fn dry_run_rolls_back() {
    let store = sample_store();
    let log = CallLog::default();
    let mut builder = builder_with(&store, vec![audit(&log)]);

    builder
        .implement_design(&design("regions:\n  name: East\n"), false)
        .unwrap();

    assert_eq!(*log.lock(), vec!["audit:roll_back".to_string()]);
    assert_eq!(builder.journal().len(), 1);
}

#[test]
fn failure_mid_traversal_rolls_back_once() {
    let store = sample_store();
    let log = CallLog::default();
    let mut builder = builder_with(&store, vec![audit(&log)]);

    let err = builder
        .implement_design(
            &design(
                r#"
regions:
  name: East
sites:
  name: HQ
  region__name: Nowhere
"#,
            ),
            true,
        )
        .unwrap_err();

    assert!(err.is_implementation_error());
    assert_eq!(calls(&log, "audit", "roll_back"), 1);
    assert_eq!(calls(&log, "audit", "commit"), 0);
    assert_eq!(store.count("Region"), 1);
}

#[test]
fn failing_commit_hook_triggers_roll_back() {
    let store = sample_store();
    let log = CallLog::default();
    let failing = RecordingExtension::new("audit", log.clone()).failing_commit();
    let other = RecordingExtension::new("notify", log.clone());
    let mut builder = Builder::builder(store.clone())
        .extension(failing)
        .extension(other)
        .build()
        .unwrap();

    let err = builder
        .implement_design(&design("regions:\n  name: East\n"), true)
        .unwrap_err();

    let failures = match err {
        BuildError::Hooks(failures) => failures,
        other => panic!("expected hook failures, got {other}"),
    };
    assert_eq!(failures.phase, HookPhase::Commit);
    assert_eq!(failures.tags().collect::<Vec<_>>(), vec!["audit"]);
    assert_eq!(calls(&log, "notify", "commit"), 1);
    assert_eq!(calls(&log, "audit", "roll_back"), 1);
    assert_eq!(calls(&log, "notify", "roll_back"), 1);
}

#[test]
fn failing_roll_back_hook_is_reported_on_dry_run() {
    let store = sample_store();
    let log = CallLog::default();
    let failing = RecordingExtension::new("audit", log.clone()).failing_roll_back();
    let mut builder = builder_with(&store, vec![Box::new(failing)]);

    let err = builder
        .implement_design(&design("regions:\n  name: East\n"), false)
        .unwrap_err();

    assert!(
        matches!(err, BuildError::Hooks(ref failures) if failures.phase == HookPhase::RollBack)
    );
    assert_eq!(calls(&log, "audit", "roll_back"), 1);
}

#[test]
fn references_resolve_to_earlier_records() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    builder
        .implement_design(
            &design(
                r#"
sites:
  name: HQ
  "!ref": hq
devices:
  name: "!ref:hq.name"
  site: "!ref:hq"
"#,
            ),
            true,
        )
        .unwrap();

    let hq = builder.reference("hq").unwrap();
    let device = store.all("Device").remove(0);
    assert_eq!(device.get("site"), hq.reference().map(Value::Record).as_ref());
    assert_eq!(device.get("name"), Some(&Value::from("HQ")));
}

#[test]
fn references_are_dropped_on_roll_back() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    builder
        .implement_design(&design("sites:\n  name: HQ\n  \"!ref\": hq\n"), false)
        .unwrap();

    assert!(builder.reference("hq").is_none());
}

#[test]
fn unknown_reference_is_an_extension_error() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(&design("devices:\n  name: r1\n  site: \"!ref:nope\"\n"), true)
        .unwrap_err();

    assert!(err.is_extension_error());
    assert!(matches!(err, BuildError::UnknownReference(ref name) if name == "nope"));
}

#[test]
fn unknown_value_extension_fails() {
    let store = sample_store();
    let mut builder = builder_with(&store, Vec::new());

    let err = builder
        .implement_design(&design("regions:\n  name: \"!vault:secret\"\n"), true)
        .unwrap_err();

    assert!(matches!(err, BuildError::UnknownValueExtension(ref tag) if tag == "vault"));
}

#[test]
fn value_extensions_rewrite_values() {
    let store = sample_store();
    let upper = value_fn("upper", |arg| Ok(Value::from(arg.to_uppercase())));
    let mut builder = builder_with(&store, vec![Box::new(upper)]);

    builder
        .implement_design(&design("regions:\n  name: \"!upper:east\"\n"), true)
        .unwrap();

    assert_eq!(store.all("Region")[0].get("name"), Some(&Value::from("EAST")));
}

#[test]
fn attribute_extension_output_is_processed_again() {
    let store = sample_store();
    let log = CallLog::default();
    let mut builder = builder_with(&store, vec![audit(&log)]);

    builder
        .implement_design(
            &design(
                r#"
regions:
  name: East
sites:
  "!audit:region__name": East
  name: HQ
"#,
            ),
            true,
        )
        .unwrap();

    let east = store
        .lookup(&Query::new("Region", attrs! { "name" => "East" }))
        .unwrap();
    let site = store.all("Site").remove(0);
    assert_eq!(site.get("region"), east.reference().map(Value::Record).as_ref());
    assert_eq!(calls(&log, "audit", "attribute"), 1);
}

#[test]
fn attribute_extension_can_return_several_fields() {
    let store = sample_store();
    let defaults = attribute_fn("defaults", |_args, value, _node| {
        let slug = value.as_str().unwrap_or_default().to_lowercase();
        Ok(Value::from(attrs! { "name" => value, "slug" => slug }))
    });
    let mut builder = builder_with(&store, vec![Box::new(defaults)]);

    builder
        .implement_design(&design("regions:\n  \"!defaults\": East\n"), true)
        .unwrap();

    let region = store.all("Region").remove(0);
    assert_eq!(region.get("name"), Some(&Value::from("East")));
    assert_eq!(region.get("slug"), Some(&Value::from("east")));
}

#[test]
fn attribute_extension_with_unsupported_return_fails() {
    let store = sample_store();
    let broken = attribute_fn("broken", |_args, _value, _node| Ok(Value::Int(3)));
    let mut builder = builder_with(&store, vec![Box::new(broken)]);

    let err = builder
        .implement_design(&design("regions:\n  name: East\n  \"!broken\": x\n"), true)
        .unwrap_err();

    assert!(
        matches!(err, BuildError::UnsupportedExtensionReturn { ref tag, .. } if tag == "broken")
    );
}

#[test]
fn attribute_output_shapes() {
    let pair = Value::List(vec![Value::from("name"), Value::from("HQ")]);
    assert!(matches!(
        AttributeOutput::try_from(pair),
        Ok(AttributeOutput::Attribute(ref name, _)) if name == "name"
    ));
    assert!(matches!(
        AttributeOutput::try_from(Value::Null),
        Ok(AttributeOutput::Nothing)
    ));
    assert!(AttributeOutput::try_from(Value::Int(1)).is_err());
}

const EVENTS: [LifecycleEvent; 4] = [
    LifecycleEvent::Loaded,
    LifecycleEvent::PreSave,
    LifecycleEvent::PostInstanceSave,
    LifecycleEvent::PostSave,
];

/// `!trace` attaches a handler for every lifecycle event that logs the event,
/// whether the store holds the record and its `asn`
fn tracer(log: &CallLog) -> Box<dyn Extension> {
    let log = log.clone();
    Box::new(attribute_fn("trace", move |_args, _value, node| {
        for event in EVENTS {
            let log = log.clone();
            node.on(event, move |record, store| {
                let stored = record
                    .reference()
                    .is_some_and(|reference| store.fetch(&reference).is_ok());
                let asn = record.get("asn").and_then(Value::as_int);
                log.lock().push(format!("{event:?} stored={stored} asn={asn:?}"));
                Ok(())
            });
        }
        Ok(Value::Null)
    }))
}

#[test]
fn create_fires_every_event_around_the_save() {
    let store = sample_store();
    let log = CallLog::default();
    let mut builder = builder_with(&store, vec![tracer(&log)]);

    builder
        .implement_design(&design("sites:\n  name: HQ\n  asn: 7\n  \"!trace\": x\n"), true)
        .unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "Loaded stored=false asn=None".to_string(),
            "PreSave stored=false asn=Some(7)".to_string(),
            "PostInstanceSave stored=true asn=Some(7)".to_string(),
            "PostSave stored=true asn=Some(7)".to_string(),
        ]
    );
    assert_eq!(builder.journal().created()["Site"].len(), 1);
}

#[test]
fn update_handlers_see_pending_assignments() {
    let store = sample_store();
    store.seed("Site", attrs! { "name" => "HQ", "asn" => 1 }).unwrap();
    let log = CallLog::default();
    let mut builder = builder_with(&store, vec![tracer(&log)]);

    builder
        .implement_design(
            &design(
                r#"
sites:
  "!update:name": HQ
  asn: 7
  "!trace": x
"#,
            ),
            true,
        )
        .unwrap();

    assert_eq!(
        *log.lock(),
        vec![
            "Loaded stored=true asn=Some(1)".to_string(),
            "PreSave stored=true asn=Some(7)".to_string(),
            "PostInstanceSave stored=true asn=Some(7)".to_string(),
            "PostSave stored=true asn=Some(7)".to_string(),
        ]
    );
    assert_eq!(store.all("Site")[0].get("asn"), Some(&Value::Int(7)));
}

#[test]
fn get_fires_only_loaded() {
    let store = sample_store();
    store.seed("Site", attrs! { "name" => "HQ" }).unwrap();
    let log = CallLog::default();
    let mut builder = builder_with(&store, vec![tracer(&log)]);

    builder
        .implement_design(&design("sites:\n  \"!get:name\": HQ\n  \"!trace\": x\n"), true)
        .unwrap();

    assert_eq!(*log.lock(), vec!["Loaded stored=true asn=None".to_string()]);
    assert!(builder.journal().is_empty());
}

#[test]
fn pre_save_changes_are_persisted_with_the_update() {
    let store = sample_store();
    store.seed("Region", attrs! { "name" => "East" }).unwrap();
    let stamp = attribute_fn("stamp", |_args, value, node| {
        node.on(LifecycleEvent::PreSave, move |record, _store| {
            record.set("name", value.clone());
            Ok(())
        });
        Ok(Value::Null)
    });
    let mut builder = builder_with(&store, vec![Box::new(stamp)]);

    builder
        .implement_design(
            &design(
                r#"
regions:
  "!update:name": East
  slug: east
  "!stamp": East Coast
"#,
            ),
            true,
        )
        .unwrap();

    let region = store.all("Region").remove(0);
    assert_eq!(region.get("slug"), Some(&Value::from("east")));
    assert_eq!(region.get("name"), Some(&Value::from("East Coast")));
    assert_eq!(builder.journal().updated()["Region"].len(), 1);
}

#[test]
fn failing_pre_save_handler_stops_the_save() {
    let store = sample_store();
    let veto = attribute_fn("veto", |_args, _value, node| {
        node.on(LifecycleEvent::PreSave, |record, _store| {
            Err(BuildError::implementation(record.model(), "vetoed"))
        });
        Ok(Value::Null)
    });
    let mut builder = builder_with(&store, vec![Box::new(veto)]);

    let err = builder
        .implement_design(&design("regions:\n  name: East\n  \"!veto\": x\n"), true)
        .unwrap_err();

    assert!(err.to_string().contains("vetoed"));
    assert_eq!(store.count("Region"), 0);
    assert!(builder.journal().is_empty());
}
