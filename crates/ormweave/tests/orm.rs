//! End-to-end tests for the `Orm` handle over in-memory datastores.

use std::sync::Arc;

use ormweave::{
    AdapterError, AttributeDef, CallLog, Error, Iteratee, MemoryAdapter, ModelDef, Ontology, Orm,
    OrmConfig, UsageCode,
};
use serde_json::{json, Value};

const JUNCTION: &str = "tag_users__user_tags";

fn ontology(tag_datastore: &str) -> Ontology {
    Ontology::builder()
        .model(
            ModelDef::new("user", "id")
                .with_table("users")
                .with_attribute(AttributeDef::number("id").auto_increment())
                .with_attribute(AttributeDef::string("name").required())
                .with_attribute(AttributeDef::string("email").column("email_address").unique())
                .with_attribute(AttributeDef::number("age"))
                .with_attribute(AttributeDef::collection("pets", "pet").via("owner"))
                .with_attribute(AttributeDef::collection("tags", "tag").via("users")),
        )
        .model(
            ModelDef::new("pet", "id")
                .with_attribute(AttributeDef::number("id").auto_increment())
                .with_attribute(AttributeDef::string("name"))
                .with_attribute(AttributeDef::model("owner", "user").column("owner_id")),
        )
        .model(
            ModelDef::new("tag", "id")
                .with_datastore(tag_datastore)
                .with_attribute(AttributeDef::number("id").auto_increment())
                .with_attribute(AttributeDef::string("label"))
                .with_attribute(AttributeDef::collection("users", "user").via("tags")),
        )
        .build()
        .unwrap()
}

struct Fixture {
    orm: Orm,
    main: Arc<MemoryAdapter>,
    tags: Arc<MemoryAdapter>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn fixture_with(config: OrmConfig, tag_datastore: &str) -> Fixture {
    init_tracing();
    let ontology = ontology(tag_datastore);
    let log = CallLog::new();
    let main = Arc::new(MemoryAdapter::for_datastore(&ontology, "default").with_call_log(log.clone()));
    let tags = if tag_datastore == "default" {
        main.clone()
    } else {
        Arc::new(MemoryAdapter::for_datastore(&ontology, tag_datastore).with_call_log(log))
    };
    let mut builder = Orm::builder(ontology).config(config).datastore("default", main.clone());
    if tag_datastore != "default" {
        builder = builder.datastore(tag_datastore, tags.clone());
    }
    Fixture {
        orm: builder.build().unwrap(),
        main,
        tags,
    }
}

fn fixture() -> Fixture {
    fixture_with(OrmConfig::default(), "default")
}

async fn seed_users(orm: &Orm, n: usize) {
    let users: Vec<Value> = (1..=n)
        .map(|i| json!({ "name": format!("u{i}"), "email": format!("u{i}@x"), "age": i * 10 }))
        .collect();
    orm.create_each("user", Value::Array(users)).await.unwrap();
}

fn names(records: &[ormweave::Record], attr: &str) -> Vec<String> {
    records
        .iter()
        .map(|r| r[attr].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_create_and_find_with_populates() {
    let Fixture { orm, .. } = fixture();

    let alice = orm
        .create("user", json!({ "name": "alice", "email": "a@x" }))
        .await
        .unwrap();
    assert_eq!(alice["id"], json!(1));
    assert_eq!(alice["age"], json!(0));

    orm.create("pet", json!({ "name": "rex", "owner": 1 })).await.unwrap();
    orm.create("pet", json!({ "name": "tom", "owner": 1 })).await.unwrap();

    let users = orm
        .find("user", json!({ "name": "alice" }), json!({ "pets": { "sort": "name DESC" } }))
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["email"], json!("a@x"));
    let pets = users[0]["pets"].as_array().unwrap();
    assert_eq!(pets.iter().map(|p| p["name"].clone()).collect::<Vec<_>>(), vec![json!("tom"), json!("rex")]);

    let pets = orm
        .find("pet", json!({}), json!({ "owner": true }))
        .await
        .unwrap();
    assert_eq!(pets.len(), 2);
    assert_eq!(pets[0]["owner"]["name"], json!("alice"));
}

#[tokio::test]
async fn test_find_one_guard() {
    let Fixture { orm, .. } = fixture();
    seed_users(&orm, 2).await;
    orm.update("user", json!({}), json!({ "age": 30 })).await.unwrap();

    let err = orm.find_one("user", json!({ "age": 30 }), Value::Null).await.unwrap_err();
    assert!(matches!(err, Error::MultipleMatches { count: 2, .. }));

    let one = orm.find_one("user", json!({ "name": "u1" }), Value::Null).await.unwrap();
    assert_eq!(one.unwrap()["email"], json!("u1@x"));
    assert!(orm.find_one("user", json!({ "name": "zed" }), Value::Null).await.unwrap().is_none());

    let Fixture { orm, .. } = fixture_with(OrmConfig::new().with_find_one_guard(false), "default");
    seed_users(&orm, 2).await;
    let first = orm.find_one("user", json!({}), Value::Null).await.unwrap();
    assert_eq!(first.unwrap()["name"], json!("u1"));
}

#[tokio::test]
async fn test_noop_queries_skip_the_backend() {
    let Fixture { orm, main, .. } = fixture();
    seed_users(&orm, 2).await;
    main.call_log().clear();

    let nothing = json!({ "id": { "in": [] } });
    assert!(orm.find("user", nothing.clone(), Value::Null).await.unwrap().is_empty());
    assert!(orm.find_one("user", nothing.clone(), Value::Null).await.unwrap().is_none());
    assert_eq!(orm.count("user", nothing.clone()).await.unwrap(), 0);
    assert_eq!(orm.sum("user", "age", nothing.clone()).await.unwrap(), 0.0);
    assert!(orm.update("user", nothing.clone(), json!({ "age": 1 })).await.unwrap().is_empty());
    assert!(orm.destroy("user", nothing).await.unwrap().is_empty());
    assert!(orm.create_each("user", json!([])).await.unwrap().is_empty());
    orm.add_to_collection("user", json!([]), "tags", json!([1])).await.unwrap();

    assert!(main.call_log().calls().is_empty());
    assert_eq!(main.rows("users").len(), 2);
}

#[tokio::test]
async fn test_stream_delivers_in_batches() {
    let Fixture { orm, .. } =
        fixture_with(OrmConfig::new().with_stream_batch_size(3), "default");
    seed_users(&orm, 7).await;

    let mut sizes = Vec::new();
    let delivered = orm
        .stream(
            "user",
            json!({}),
            Value::Null,
            Iteratee::each_batch(|batch| {
                sizes.push(batch.len());
                Ok(())
            }),
        )
        .await
        .unwrap();
    assert_eq!(delivered, 7);
    assert_eq!(sizes, vec![3, 3, 1]);

    let mut seen = Vec::new();
    let delivered = orm
        .stream(
            "user",
            json!({ "skip": 2, "limit": 4, "sort": "id ASC" }),
            Value::Null,
            Iteratee::each_record(|record| {
                seen.push(record["name"].as_str().unwrap_or_default().to_string());
                Ok(())
            }),
        )
        .await
        .unwrap();
    assert_eq!(delivered, 4);
    assert_eq!(seen, vec!["u3", "u4", "u5", "u6"]);
}

#[tokio::test]
async fn test_stream_stops_on_iteratee_error() {
    let Fixture { orm, .. } =
        fixture_with(OrmConfig::new().with_stream_batch_size(2), "default");
    seed_users(&orm, 5).await;

    let mut calls = 0;
    let err = orm
        .stream(
            "user",
            json!({}),
            Value::Null,
            Iteratee::each_batch(|_| {
                calls += 1;
                Err(Error::InvalidQuery("stop".to_string()))
            }),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidQuery(_)));
    assert_eq!(calls, 1);
}

#[tokio::test]
async fn test_aggregates() {
    let Fixture { orm, .. } = fixture();
    seed_users(&orm, 3).await;

    assert_eq!(orm.count("user", json!({})).await.unwrap(), 3);
    assert_eq!(orm.count("user", json!({ "age": { ">": 15 } })).await.unwrap(), 2);
    assert_eq!(orm.sum("user", "age", json!({})).await.unwrap(), 60.0);
    assert_eq!(orm.avg("user", "age", json!({})).await.unwrap(), 20.0);
    assert_eq!(orm.avg("user", "age", json!({ "age": { ">": 100 } })).await.unwrap(), 0.0);

    let err = orm.sum("user", "name", json!({})).await.unwrap_err();
    assert_eq!(err.usage_code(), Some(UsageCode::InvalidNumericAttrName));
}

#[tokio::test]
async fn test_plural_values_in_writes_update_foreign_keys() {
    let Fixture { orm, main, .. } = fixture();
    orm.create_each("pet", json!([{ "name": "rex" }, { "name": "tom" }]))
        .await
        .unwrap();

    orm.create("user", json!({ "name": "alice", "email": "a@x", "pets": [1, 2] }))
        .await
        .unwrap();
    let owners: Vec<Value> = main.rows("pet").iter().map(|r| r["owner_id"].clone()).collect();
    assert_eq!(owners, vec![json!(1), json!(1)]);

    orm.update("user", json!({ "id": 1 }), json!({ "pets": [2] }))
        .await
        .unwrap();
    let owners: Vec<Value> = main.rows("pet").iter().map(|r| r["owner_id"].clone()).collect();
    assert_eq!(owners, vec![Value::Null, json!(1)]);

    orm.remove_from_collection("user", json!(1), "pets", json!([2]))
        .await
        .unwrap();
    orm.add_to_collection("user", json!(1), "pets", json!([1]))
        .await
        .unwrap();
    let owners: Vec<Value> = main.rows("pet").iter().map(|r| r["owner_id"].clone()).collect();
    assert_eq!(owners, vec![json!(1), Value::Null]);
}

#[tokio::test]
async fn test_one_to_many_rejects_many_parents() {
    let Fixture { orm, .. } = fixture();
    seed_users(&orm, 2).await;
    orm.create("pet", json!({ "name": "rex" })).await.unwrap();

    let err = orm
        .add_to_collection("user", json!([1, 2]), "pets", json!([1]))
        .await
        .unwrap_err();
    assert_eq!(err.usage_code(), Some(UsageCode::InvalidTargetRecordIds));
}

#[tokio::test]
async fn test_many_to_many_membership() {
    let Fixture { orm, main, .. } = fixture();
    orm.create("user", json!({ "name": "alice", "email": "a@x" })).await.unwrap();
    orm.create_each("tag", json!([{ "label": "a" }, { "label": "b" }, { "label": "c" }]))
        .await
        .unwrap();

    orm.add_to_collection("user", json!(1), "tags", json!([1, 2])).await.unwrap();
    orm.add_to_collection("user", json!(1), "tags", json!([2, 3])).await.unwrap();
    assert_eq!(main.rows(JUNCTION).len(), 3);

    let users = orm.find("user", json!({}), json!({ "tags": true })).await.unwrap();
    let labels: Vec<_> = users[0]["tags"].as_array().unwrap().iter().map(|t| t["label"].clone()).collect();
    assert_eq!(labels, vec![json!("a"), json!("b"), json!("c")]);

    orm.remove_from_collection("user", json!(1), "tags", json!([1])).await.unwrap();
    assert_eq!(main.rows(JUNCTION).len(), 2);

    orm.replace_collection("user", json!(1), "tags", json!([3])).await.unwrap();
    let users = orm.find("user", json!({}), json!({ "tags": true })).await.unwrap();
    assert_eq!(users[0]["tags"].as_array().unwrap().len(), 1);
    assert_eq!(users[0]["tags"][0]["label"], json!("c"));

    let tags = orm.find("tag", json!({ "id": 3 }), json!({ "users": true })).await.unwrap();
    assert_eq!(tags[0]["users"][0]["name"], json!("alice"));

    orm.replace_collection("user", json!(1), "tags", json!([])).await.unwrap();
    assert!(main.rows(JUNCTION).is_empty());
}

#[tokio::test]
async fn test_cross_datastore_populate() {
    let Fixture { orm, main, tags } = fixture_with(OrmConfig::default(), "tags_db");
    orm.create("user", json!({ "name": "alice", "email": "a@x", "tags": [] }))
        .await
        .unwrap();
    orm.create_each("tag", json!([{ "label": "a" }, { "label": "b" }]))
        .await
        .unwrap();
    orm.add_to_collection("user", json!(1), "tags", json!([2])).await.unwrap();
    assert_eq!(tags.rows(JUNCTION).len(), 1);
    assert!(main.rows(JUNCTION).is_empty());

    let log = main.call_log();
    log.clear();
    let users = orm.find("user", json!({}), json!({ "tags": true })).await.unwrap();
    assert_eq!(users[0]["tags"][0]["label"], json!("b"));

    let user = log.position("users").unwrap();
    let junction = log.position(JUNCTION).unwrap();
    let tag = log.position("tag").unwrap();
    assert!(user < junction && junction < tag);
}

#[tokio::test]
async fn test_find_or_create() {
    let Fixture { orm, .. } = fixture();

    let (bob, created) = orm
        .find_or_create("user", json!({ "name": "bob" }), json!({ "name": "bob", "email": "b@x" }))
        .await
        .unwrap();
    assert!(created);

    let (again, created) = orm
        .find_or_create("user", json!({ "name": "bob" }), json!({ "name": "bob", "email": "b2@x" }))
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again["id"], bob["id"]);

    let (_, created) = orm
        .find_or_create("user", json!({ "id": [] }), json!({ "name": "carl", "email": "c@x" }))
        .await
        .unwrap();
    assert!(created);
    assert_eq!(orm.count("user", json!({})).await.unwrap(), 2);
}

#[tokio::test]
async fn test_unique_violation_names_attributes() {
    let Fixture { orm, .. } = fixture();
    orm.create("user", json!({ "name": "a", "email": "same@x" })).await.unwrap();

    let err = orm
        .create("user", json!({ "name": "b", "email": "same@x" }))
        .await
        .unwrap_err();
    match err {
        Error::Adapter(AdapterError::Unique { keys, .. }) => assert_eq!(keys, vec!["email"]),
        other => panic!("expected a uniqueness error, got {other:?}"),
    }

    orm.create("user", json!({ "name": "c", "email": "other@x" })).await.unwrap();
    let err = orm
        .update("user", json!({ "name": "c" }), json!({ "email": "same@x" }))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Adapter(AdapterError::Unique { ref keys, .. }) if keys == &["email"]));
}

#[tokio::test]
async fn test_destroy_removes_junction_rows() {
    let Fixture { orm, main, .. } = fixture();
    orm.create("tag", json!({ "label": "a" })).await.unwrap();
    orm.create("user", json!({ "name": "alice", "email": "a@x", "tags": [1] }))
        .await
        .unwrap();
    assert_eq!(main.rows(JUNCTION).len(), 1);

    let destroyed = orm.destroy("user", json!({ "name": "alice" })).await.unwrap();
    assert_eq!(names(&destroyed, "name"), vec!["alice"]);
    assert!(main.rows(JUNCTION).is_empty());
    assert_eq!(main.rows("tag").len(), 1);
}

#[tokio::test]
async fn test_usage_errors_carry_codes() {
    let Fixture { orm, .. } = fixture();

    let err = orm.find("user", json!({ "nope": 1 }), Value::Null).await.unwrap_err();
    assert_eq!(err.usage_code(), Some(UsageCode::InvalidCriteria));

    let err = orm.create("user", json!({ "email": "x@x" })).await.unwrap_err();
    assert_eq!(err.usage_code(), Some(UsageCode::MissingRequired));

    let err = orm
        .add_to_collection("user", json!(1), "name", json!([1]))
        .await
        .unwrap_err();
    assert_eq!(err.usage_code(), Some(UsageCode::InvalidCollectionAttrName));

    let err = orm
        .find("user", json!({}), json!({ "age": true }))
        .await
        .unwrap_err();
    assert_eq!(err.usage_code(), Some(UsageCode::InvalidPopulates));

    let err = orm.find("ghost", json!({}), Value::Null).await.unwrap_err();
    assert!(matches!(err, Error::ModelNotRegistered(_)));
}

#[tokio::test]
async fn test_strict_config_rejects_deprecated_shapes() {
    let Fixture { orm, .. } = fixture_with(OrmConfig::strict(), "default");
    seed_users(&orm, 1).await;

    let err = orm
        .find("user", json!({ "sort": { "name": 1 } }), Value::Null)
        .await
        .unwrap_err();
    assert_eq!(err.usage_code(), Some(UsageCode::InvalidCriteria));

    let tolerant = fixture();
    seed_users(&tolerant.orm, 1).await;
    let found = tolerant
        .orm
        .find("user", json!({ "sort": { "name": 1 } }), Value::Null)
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
}

#[test]
fn test_build_requires_every_datastore() {
    let err = Orm::builder(ontology("tags_db"))
        .datastore("default", Arc::new(MemoryAdapter::new("default")))
        .build()
        .unwrap_err();
    assert!(matches!(err, Error::DatastoreNotRegistered(ref name) if name == "tags_db"));
}

#[tokio::test]
async fn test_pattern_modifiers_match_metacharacters_literally() {
    let Fixture { orm, .. } = fixture();
    for (i, name) in ["C:\\temp", "a_b", "axb", "50% off"].into_iter().enumerate() {
        orm.create("user", json!({ "name": name, "email": format!("{i}@x") }))
            .await
            .unwrap();
    }

    let found = orm
        .find("user", json!({ "name": { "contains": "C:\\t" } }), Value::Null)
        .await
        .unwrap();
    assert_eq!(names(&found, "name"), vec!["C:\\temp"]);

    let found = orm
        .find("user", json!({ "name": { "startsWith": "a_" } }), Value::Null)
        .await
        .unwrap();
    assert_eq!(names(&found, "name"), vec!["a_b"]);

    let found = orm
        .find("user", json!({ "name": { "endsWith": "% off" } }), Value::Null)
        .await
        .unwrap();
    assert_eq!(names(&found, "name"), vec!["50% off"]);
}

#[tokio::test]
async fn test_collection_edits_name_unique_attributes() {
    let ontology = Ontology::builder()
        .model(
            ModelDef::new("user", "id")
                .with_attribute(AttributeDef::number("id").auto_increment())
                .with_attribute(AttributeDef::collection("badges", "badge").via("holder")),
        )
        .model(
            ModelDef::new("badge", "id")
                .with_attribute(AttributeDef::number("id").auto_increment())
                .with_attribute(AttributeDef::model("holder", "user").column("holder_id").unique()),
        )
        .build()
        .unwrap();
    let adapter = Arc::new(MemoryAdapter::for_datastore(&ontology, "default"));
    let orm = Orm::builder(ontology).datastore("default", adapter).build().unwrap();

    orm.create("user", json!({})).await.unwrap();
    orm.create("badge", json!({ "holder": 1 })).await.unwrap();
    orm.create("badge", json!({})).await.unwrap();

    let err = orm
        .add_to_collection("user", json!(1), "badges", json!([2]))
        .await
        .unwrap_err();
    match err {
        Error::Adapter(AdapterError::Unique { keys, .. }) => assert_eq!(keys, vec!["holder"]),
        other => panic!("expected a uniqueness error, got {other:?}"),
    }
}
