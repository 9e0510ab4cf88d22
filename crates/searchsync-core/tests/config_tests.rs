use serde_json::json;
use tempfile::TempDir;

use searchsync_core::config::{resolve_with_base, Config};
use searchsync_core::extract::{extract, RecordProxy};
use searchsync_core::schema::FieldAction;
use searchsync_core::types::{Record, RecordType, UnresolvedPolicy};

const CATALOG: &str = r#"
[store]
path = "data/records.db"

[sync]
batch_size = 50
unresolved = "surface"

[[indexes]]
name = "catalog"
location = "index/catalog"

[[indexes.fields]]
name = "name"
actions = ["freetext", "spell", "store"]
extract = { book = "title", user = "username" }

[[indexes.fields]]
name = "tags"
actions = ["tag"]
extract_any = "tags"

[[indexes.registrations]]
record_type = "book"

[[indexes.registrations]]
record_type = "user"
filter = { active = true }
"#;

#[test]
fn settings_build_a_working_registry() {
    let tmp = TempDir::new().unwrap();
    let settings = Config::from_toml(CATALOG, tmp.path()).settings().unwrap();
    assert_eq!(settings.sync.batch_size, 50);
    assert_eq!(settings.sync.lease_secs, 600, "unset keys keep defaults");
    assert_eq!(settings.sync.unresolved, UnresolvedPolicy::Surface);
    assert_eq!(settings.store_path(), tmp.path().join("data/records.db"));

    let registry = settings.registry().unwrap();
    let schema = registry.schema("catalog").unwrap();
    assert_eq!(schema.location(), tmp.path().join("index/catalog"));
    assert!(schema.field("name").unwrap().has(FieldAction::Spell));

    let user = RecordType::new("user").unwrap();
    let regs = registry.schemas_for(&user);
    assert_eq!(regs.len(), 1);
    let inactive = Record::new(user.clone(), "1", json!({"username": "ann", "active": false}));
    let active = Record::new(user, "2", json!({"username": "bob", "active": true, "tags": ["Admin", "ops"]}));
    assert!(!regs[0].predicate.matches(&inactive));
    assert!(regs[0].predicate.matches(&active));

    let doc = extract(schema, &RecordProxy::new(&active)).unwrap();
    assert_eq!(doc.values("name").len(), 1);
    assert_eq!(doc.values("tags").len(), 2);
}

#[test]
fn default_consumer_covers_every_index() {
    let tmp = TempDir::new().unwrap();
    let settings = Config::from_toml(CATALOG, tmp.path()).settings().unwrap();
    let groups = settings.consumer_groups().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].name, "default");
    assert_eq!(groups[0].indexes, ["catalog"]);
}

#[test]
fn an_index_owned_by_two_consumers_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let toml = format!(
        "{CATALOG}\n[[consumers]]\nname = \"a\"\nindexes = [\"catalog\"]\n\n[[consumers]]\nname = \"b\"\nindexes = [\"catalog\"]\n"
    );
    let settings = Config::from_toml(&toml, tmp.path()).settings().unwrap();
    assert!(settings.consumer_groups().is_err());
}

#[test]
fn unknown_registration_type_is_a_schema_violation() {
    let tmp = TempDir::new().unwrap();
    let toml = CATALOG.replace("record_type = \"book\"", "record_type = \"poll\"");
    let settings = Config::from_toml(&toml, tmp.path()).settings().unwrap();
    let err = settings.registry().unwrap_err();
    assert!(err.to_string().contains("poll"));
}

#[test]
fn load_from_reads_the_config_directory() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("config.toml"), CATALOG).unwrap();
    let config = Config::load_from(tmp.path()).unwrap();
    let path: String = config.get("store.path").unwrap();
    assert_eq!(path, "data/records.db");
}

#[test]
fn relative_paths_resolve_against_the_base() {
    let base = std::path::Path::new("/srv/app");
    assert_eq!(resolve_with_base(base, "idx"), base.join("idx"));
    assert_eq!(resolve_with_base(base, "/abs/idx"), std::path::PathBuf::from("/abs/idx"));
}
