use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::extract::json_path_extractor;
use crate::predicate::Predicate;
use crate::registry::Registry;
use crate::schema::{FieldAction, FieldSpec, IndexSchema};
use crate::types::{RecordType, UnresolvedPolicy};

pub struct Config {
    figment: Figment,
    base_dir: PathBuf,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("."))
    }

    /// Merge `config.toml`, `config.<env>.toml` and `APP_*` variables found under `dir`.
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file(dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment, base_dir: dir.to_path_buf() };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    pub fn from_toml(toml: &str, base_dir: &Path) -> Self {
        Self { figment: Figment::new().merge(Toml::string(toml)), base_dir: base_dir.to_path_buf() }
    }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings: Settings =
            self.figment.extract().map_err(|e| anyhow::anyhow!("Invalid settings: {}", e))?;
        settings.base_dir = self.base_dir.clone();
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        match env {
            "prod" | "production" => {
                let path: String = self.get("store.path")?;
                if path.contains(":memory:") {
                    anyhow::bail!("production needs a file-backed store, got '{}'", path);
                }
            }
            "dev" | "development" | "test" | "testing" => {}
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub store: StoreSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub consumers: Vec<ConsumerSettings>,
    #[serde(default)]
    pub indexes: Vec<IndexSettings>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// SQLite file, or `:memory:`.
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub batch_size: usize,
    pub lease_secs: u64,
    pub unresolved: UnresolvedPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { batch_size: 1000, lease_secs: 600, unresolved: UnresolvedPolicy::Skip }
    }
}

/// A group of indexes sharing one watermark.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerSettings {
    pub name: String,
    pub indexes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexSettings {
    pub name: String,
    pub location: String,
    pub fields: Vec<FieldSettings>,
    #[serde(default)]
    pub registrations: Vec<RegistrationSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSettings {
    pub name: String,
    pub actions: Vec<FieldAction>,
    /// record type -> dotted JSON path
    #[serde(default)]
    pub extract: BTreeMap<String, String>,
    #[serde(default)]
    pub extract_any: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationSettings {
    pub record_type: String,
    /// path -> value; every pair must match
    #[serde(default)]
    pub filter: BTreeMap<String, serde_json::Value>,
}

impl Settings {
    pub fn store_path(&self) -> PathBuf {
        if self.store.path == ":memory:" {
            return PathBuf::from(":memory:");
        }
        resolve_with_base(&self.base_dir, &self.store.path)
    }

    /// Build every declared schema and registration.
    pub fn registry(&self) -> Result<Registry> {
        let mut registry = Registry::new();
        for index in &self.indexes {
            registry.add_schema(index.build_schema(&self.base_dir)?)?;
        }
        for index in &self.indexes {
            for reg in &index.registrations {
                let predicate = reg.predicate();
                registry.register(RecordType::new(reg.record_type.as_str())?, &index.name, predicate)?;
            }
        }
        Ok(registry)
    }

    /// Declared consumers, or one `default` consumer covering every index.
    pub fn consumer_groups(&self) -> Result<Vec<ConsumerSettings>> {
        if self.consumers.is_empty() {
            return Ok(vec![ConsumerSettings {
                name: "default".to_string(),
                indexes: self.indexes.iter().map(|i| i.name.clone()).collect(),
            }]);
        }
        for index in &self.indexes {
            let owners = self.consumers.iter().filter(|c| c.indexes.contains(&index.name)).count();
            if owners != 1 {
                return Err(Error::InvalidConfig(format!(
                    "index '{}' must belong to exactly one consumer, found {}",
                    index.name, owners
                )));
            }
        }
        Ok(self.consumers.clone())
    }
}

impl IndexSettings {
    pub fn build_schema(&self, base_dir: &Path) -> Result<IndexSchema> {
        let mut builder = IndexSchema::builder(self.name.clone(), resolve_with_base(base_dir, &self.location));
        for field in &self.fields {
            let mut spec = FieldSpec::new(field.name.clone()).actions(field.actions.iter().copied());
            for (record_type, path) in &field.extract {
                spec = spec.with_extractor(Some(RecordType::new(record_type.as_str())?), json_path_extractor(path));
            }
            if let Some(path) = &field.extract_any {
                spec = spec.with_extractor(None, json_path_extractor(path));
            }
            builder = builder.field(spec);
        }
        builder.build()
    }
}

impl RegistrationSettings {
    pub fn predicate(&self) -> Predicate {
        let mut clauses: Vec<Predicate> =
            self.filter.iter().map(|(path, value)| Predicate::equals(path.clone(), value.clone())).collect();
        match clauses.len() {
            0 => Predicate::All,
            1 => clauses.remove(0),
            _ => Predicate::And(clauses),
        }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    // Expand ~ at start
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
