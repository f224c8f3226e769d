// Integration tests for the DocLite core engine
use std::sync::{Arc, Mutex, MutexGuard};

use doclite_core::{
    storage, CollectionOptions, DocLiteError, Instance, DOCUMENT_ID_FIELD, UPDATED_AT_FIELD,
};
use serde_json::{json, Value};
use tempfile::TempDir;

// The engine allows one live instance per process, so tests that open one
// serialize on this lock.
static INSTANCE_GUARD: Mutex<()> = Mutex::new(());

fn open_instance() -> (MutexGuard<'static, ()>, TempDir, Instance) {
    let guard = INSTANCE_GUARD
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let temp = TempDir::new().unwrap();
    let instance = Instance::open(temp.path().join("doclite")).unwrap();
    (guard, temp, instance)
}

fn seed_people(collection: &doclite_core::Collection) -> Vec<String> {
    [
        json!({"name": "Alice", "age": 30, "city": "NYC"}),
        json!({"name": "Bob", "age": 25, "city": "LA"}),
        json!({"name": "Carol", "age": 35, "city": "NYC"}),
        json!({"name": "Dave", "age": 21, "city": "SF"}),
    ]
    .iter()
    .map(|doc| collection.insert(doc).unwrap())
    .collect()
}

#[test]
fn test_second_instance_is_conflict() {
    let (_guard, _temp, instance) = open_instance();

    let other = TempDir::new().unwrap();
    assert!(matches!(
        Instance::open(other.path()),
        Err(DocLiteError::InstanceOpen)
    ));

    // Dropping the live instance frees the slot.
    drop(instance);
    let reopened = Instance::open(other.path()).unwrap();
    drop(reopened);
}

#[test]
fn test_database_lifecycle() {
    let (_guard, _temp, instance) = open_instance();

    let db = instance.create_database("app").unwrap();
    assert_eq!(db.name(), "app");
    assert!(instance.database_exists("app"));

    assert!(matches!(
        instance.create_database("app"),
        Err(DocLiteError::DatabaseExists(_))
    ));

    instance.delete_database("app").unwrap();
    assert!(!instance.database_exists("app"));
    assert!(matches!(
        instance.delete_database("app"),
        Err(DocLiteError::DatabaseNotFound(_))
    ));
}

#[test]
fn test_collection_lifecycle() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();

    db.create_collection("users", CollectionOptions::default())
        .unwrap();
    assert!(db.collection_exists("users"));
    assert!(!db.collection_exists("missing"));

    assert!(matches!(
        db.create_collection("users", CollectionOptions::default()),
        Err(DocLiteError::CollectionExists(_))
    ));

    db.delete_collection("users").unwrap();
    assert!(!db.collection_exists("users"));
    assert!(matches!(
        db.collection("users"),
        Err(DocLiteError::CollectionNotFound(_))
    ));
}

#[test]
fn test_insert_and_round_trip_by_document_id() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();

    let id = users.insert(&json!({"name": "Alice", "age": 30})).unwrap();

    let result = users.find(json!({DOCUMENT_ID_FIELD: id.clone()})).exec().unwrap();
    assert_eq!(result.documents.len(), 1);

    let doc = &result.documents[0];
    assert_eq!(doc["name"], "Alice");
    assert_eq!(doc["age"], 30);
    assert_eq!(doc[DOCUMENT_ID_FIELD], json!(id));
    assert!(doc[UPDATED_AT_FIELD].is_i64());
}

#[test]
fn test_insert_rejects_non_object() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();

    assert!(matches!(
        users.insert(&json!([1, 2])),
        Err(DocLiteError::Validation(_))
    ));
}

#[test]
fn test_document_ids_are_unique() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();

    let mut ids: Vec<String> = (0..50)
        .map(|n| users.insert(&json!({"n": n})).unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 50);
}

#[test]
fn test_concurrent_inserts_stay_unique() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();

    let mut handles = Vec::new();
    for t in 0..4 {
        let users = Arc::clone(&users);
        handles.push(std::thread::spawn(move || {
            (0..10)
                .map(|n| users.insert(&json!({"t": t, "n": n})).unwrap())
                .collect::<Vec<String>>()
        }));
    }

    let mut ids: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 40);
    assert_eq!(users.count_documents(json!({})).unwrap(), 40);
}

#[test]
fn test_filter_sort_and_projection() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);

    let result = users
        .find(json!({"age": {"$gte": 25}}))
        .with_sort("age", -1)
        .with_projection(json!({"name": 1}))
        .exec()
        .unwrap();

    let names: Vec<&str> = result
        .documents
        .iter()
        .map(|d| d["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Carol", "Alice", "Bob"]);

    // Projection keeps documentId and drops unlisted fields.
    assert!(result.documents[0].get("age").is_none());
    assert!(result.documents[0].get(DOCUMENT_ID_FIELD).is_some());
}

#[test]
fn test_projection_mixing_is_error() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);

    let result = users
        .find(json!({}))
        .with_projection(json!({"name": 1, "age": 0}))
        .exec();
    assert!(matches!(result, Err(DocLiteError::InvalidProjection(_))));
}

#[test]
fn test_pagination_reconstructs_full_set() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let items = db
        .create_collection("items", CollectionOptions::default())
        .unwrap();

    for n in 0..10 {
        items.insert(&json!({"n": n})).unwrap();
    }

    let mut collected = Vec::new();
    let mut skip = 0;
    loop {
        let page = items
            .find(json!({}))
            .with_sort("n", 1)
            .with_skip(skip)
            .with_limit(3)
            .exec()
            .unwrap();
        if page.documents.is_empty() {
            break;
        }
        collected.extend(page.documents);
        skip += 3;
    }

    let ns: Vec<i64> = collected.iter().map(|d| d["n"].as_i64().unwrap()).collect();
    assert_eq!(ns, (0..10).collect::<Vec<i64>>());
}

#[test]
fn test_count_and_find_one() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);

    assert_eq!(users.count_documents(json!({"city": "NYC"})).unwrap(), 2);

    let result = users
        .find(json!({"city": "NYC"}))
        .with_count(true)
        .with_limit(1)
        .exec()
        .unwrap();
    assert_eq!(result.documents.len(), 1);
    assert_eq!(result.total_documents, Some(2));

    let bob = users.find_one(json!({"name": "Bob"})).unwrap();
    assert_eq!(bob["age"], 25);

    assert!(matches!(
        users.find_one(json!({"name": "Nobody"})),
        Err(DocLiteError::DocumentNotFound(_))
    ));
}

#[test]
fn test_update_one_semantics() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();

    let id = users.insert(&json!({"name": "X", "age": 30})).unwrap();

    let result = users
        .update_one(&json!({"name": "X"}), &json!({"age": 31}), None)
        .unwrap();

    assert_eq!(result.document_id, id);
    assert_eq!(result.new_data["age"], 31);
    assert_eq!(result.new_data["name"], "X");
    assert_eq!(result.previous_data["age"], 30);

    // The file on disk decodes to the new values under the same id.
    let on_disk = users.find_one(json!({DOCUMENT_ID_FIELD: id})).unwrap();
    assert_eq!(on_disk["age"], 31);
    assert_eq!(users.count_documents(json!({})).unwrap(), 1);
}

#[test]
fn test_update_many_and_cache_invalidation() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);

    // Prime the cache with this filter.
    let before = users.find(json!({"city": "NYC"})).exec().unwrap();
    assert_eq!(before.documents.len(), 2);

    let result = users
        .update_many(&json!({"city": "NYC"}), &json!({"city": "Boston"}))
        .unwrap();
    assert_eq!(result.modified_count, 2);
    assert_eq!(result.document_ids.len(), 2);

    // The same filter must reflect the update, not a stale cached set.
    let after = users.find(json!({"city": "NYC"})).exec().unwrap();
    assert!(after.documents.is_empty());
    assert_eq!(users.count_documents(json!({"city": "Boston"})).unwrap(), 2);
}

#[test]
fn test_update_with_no_match_is_not_found() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);

    assert!(matches!(
        users.update_one(&json!({"name": "Nobody"}), &json!({"age": 1}), None),
        Err(DocLiteError::DocumentNotFound(_))
    ));
}

#[test]
fn test_delete_one_with_sort_tiebreak() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);

    // Oldest NYC resident goes first under a descending age sort.
    let deleted = users
        .delete_one(&json!({"city": "NYC"}), Some(("age", -1)))
        .unwrap();
    assert_eq!(deleted["name"], "Carol");
    assert_eq!(users.count_documents(json!({"city": "NYC"})).unwrap(), 1);
}

#[test]
fn test_delete_many_returns_audit_list() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);

    let deleted = users.delete_many(&json!({"age": {"$lt": 30}})).unwrap();
    assert_eq!(deleted.len(), 2);
    assert_eq!(users.count_documents(json!({})).unwrap(), 2);

    assert!(matches!(
        users.delete_many(&json!({"age": {"$lt": 30}})),
        Err(DocLiteError::DocumentNotFound(_))
    ));
}

#[test]
fn test_encryption_transparency() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let secrets = db
        .create_collection(
            "secrets",
            CollectionOptions {
                encrypted: true,
                encryption_key: Some("collection-key".into()),
            },
        )
        .unwrap();

    let id = secrets
        .insert(&json!({"name": "Alice", "ssn": "123-45-6789"}))
        .unwrap();

    // On disk the file body must not parse as the plaintext document.
    let file_path = instance
        .root()
        .join("app")
        .join("secrets")
        .join(format!("{}.json", id));
    let raw = storage::read_file(&file_path).unwrap();
    assert!(!raw.contains("123-45-6789"));
    assert!(serde_json::from_str::<Value>(&raw)
        .map(|v| !v.is_object())
        .unwrap_or(true));

    // Reads decrypt transparently.
    let doc = secrets.find_one(json!({"name": "Alice"})).unwrap();
    assert_eq!(doc["ssn"], "123-45-6789");

    // Updates re-encrypt through the same codec.
    secrets
        .update_one(&json!({"name": "Alice"}), &json!({"ssn": "999-99-9999"}), None)
        .unwrap();
    let doc = secrets.find_one(json!({"name": "Alice"})).unwrap();
    assert_eq!(doc["ssn"], "999-99-9999");
}

#[test]
fn test_aggregation_scenario() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let people = db
        .create_collection("people", CollectionOptions::default())
        .unwrap();

    for age in [21, 30, 31] {
        people.insert(&json!({"age": age})).unwrap();
    }

    let results = people
        .aggregate(&json!([
            {"$match": {"age": {"$gt": 25}}},
            {"$group": {"_id": null, "avg": {"$avg": "$age"}}}
        ]))
        .unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["avg"], 30.5);
}

#[test]
fn test_aggregation_unwind_and_add_fields() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let posts = db
        .create_collection("posts", CollectionOptions::default())
        .unwrap();

    posts
        .insert(&json!({"title": "a", "tags": ["rust", "db"]}))
        .unwrap();
    posts.insert(&json!({"title": "b", "tags": ["rust"]})).unwrap();

    let results = posts
        .aggregate(&json!([
            {"$unwind": "$tags"},
            {"$addFields": {"kind": "post"}},
            {"$group": {"_id": "$tags", "count": {"$sum": 1}}},
            {"$sort": {"count": -1}}
        ]))
        .unwrap();

    assert_eq!(results[0]["_id"], "rust");
    assert_eq!(results[0]["count"], 2);
}

#[test]
fn test_index_fallback_to_full_scan() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);

    // No index exists for "city": the reader must fall back to a full scan
    // without error.
    let result = users.find(json!({"city": "NYC"})).exec().unwrap();
    assert_eq!(result.documents.len(), 2);
}

#[test]
fn test_info_surfaces() {
    let (_guard, _temp, instance) = open_instance();
    let db = instance.create_database("app").unwrap();
    let users = db
        .create_collection("users", CollectionOptions::default())
        .unwrap();
    seed_people(&users);
    users.create_index(&["city"]).unwrap();

    let info = db.collection_info("users").unwrap();
    assert_eq!(info.name, "users");
    assert_eq!(info.document_count, 4);
    assert!(!info.is_encrypted);
    assert!(info.indexes.contains(&DOCUMENT_ID_FIELD.to_string()));
    assert!(info.indexes.contains(&"city".to_string()));

    let instance_info = instance.instance_info().unwrap();
    assert_eq!(instance_info.databases.len(), 1);
    assert_eq!(instance_info.databases[0].name, "app");
    assert_eq!(instance_info.databases[0].collections, vec!["users"]);
}

#[test]
fn test_persistence_across_handles() {
    let guard = INSTANCE_GUARD
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("doclite");

    let id = {
        let instance = Instance::open(&root).unwrap();
        let db = instance.create_database("app").unwrap();
        let users = db
            .create_collection("users", CollectionOptions::default())
            .unwrap();
        users.insert(&json!({"name": "Alice"})).unwrap()
    };

    // A fresh instance over the same root sees the same data.
    let instance = Instance::open(&root).unwrap();
    let users = instance.database("app").unwrap().collection("users").unwrap();
    let doc = users.find_one(json!({DOCUMENT_ID_FIELD: id})).unwrap();
    assert_eq!(doc["name"], "Alice");

    drop(instance);
    drop(guard);
}
