use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use jsonschema::Validator;
use polycrypt_wire::{EventKind, Method};
use serde_json::Value;

use crate::config::SchemaConfig;
use crate::error::{Result, SchemaError};
use crate::validator::validate_value;

const SCHEMA_SUFFIX: &str = ".schema.json";

/// Verb-keyed registry of compiled JSON Schema validators.
pub struct SchemaRegistry {
    validators: HashMap<String, Validator>,
    config: SchemaConfig,
}

impl SchemaRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(SchemaConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: SchemaConfig) -> Self {
        Self {
            validators: HashMap::new(),
            config,
        }
    }

    /// Register a schema for a verb from a JSON string.
    pub fn register(&mut self, verb: &str, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        self.register_value(verb, &schema)
    }

    /// Register a schema for a verb from a JSON value.
    pub fn register_value(&mut self, verb: &str, schema: &Value) -> Result<()> {
        if !is_known_verb(verb) {
            return Err(SchemaError::UnknownVerb(verb.to_string()));
        }

        let mut schema = schema.clone();
        if self.config.strict_mode {
            apply_strict_mode(&mut schema);
        }

        let compiled = jsonschema::validator_for(&schema)
            .map_err(|err| SchemaError::CompileFailed(err.to_string()))?;
        self.validators.insert(verb.to_string(), compiled);
        Ok(())
    }

    /// Load `<verb>.schema.json` files from a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, SchemaConfig::default())
    }

    /// Load schemas from a directory with explicit config.
    ///
    /// Files not ending in `.schema.json` are ignored. Schema files naming an
    /// unknown verb, symlinked schema files, and files over the size limit
    /// are errors.
    pub fn from_directory_with_config(path: &Path, config: SchemaConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);
        let mut loaded = 0usize;

        let entries = std::fs::read_dir(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;

        for entry in entries {
            let entry = entry.map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(verb) = file_name.strip_suffix(SCHEMA_SUFFIX) else {
                continue;
            };

            let entry_path = entry.path();
            let metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            if metadata.file_type().is_symlink() {
                return Err(SchemaError::LoadFailed(format!(
                    "refusing to load schema symlink: {file_name}"
                )));
            }
            if !metadata.is_file() {
                continue;
            }

            loaded = loaded.saturating_add(1);
            if loaded > registry.config.max_schemas_from_directory {
                return Err(SchemaError::LoadFailed(format!(
                    "schema count exceeds configured max ({})",
                    registry.config.max_schemas_from_directory
                )));
            }

            let file = std::fs::File::open(&entry_path).map_err(|err| {
                SchemaError::LoadFailed(format!("failed opening {}: {err}", entry_path.display()))
            })?;
            let opened = file
                .metadata()
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;

            #[cfg(unix)]
            {
                if !same_file_identity(&metadata, &opened) {
                    return Err(SchemaError::LoadFailed(format!(
                        "schema file changed during load: {file_name}"
                    )));
                }
            }

            let max_bytes = registry.config.max_schema_file_size;
            if opened.len() > max_bytes as u64 {
                return Err(SchemaError::LoadFailed(format!(
                    "schema file too large ({} bytes): {file_name}",
                    opened.len()
                )));
            }

            let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
            let mut content = String::new();
            file.take(read_limit)
                .read_to_string(&mut content)
                .map_err(|err| {
                    SchemaError::LoadFailed(format!(
                        "failed reading {}: {err}",
                        entry_path.display()
                    ))
                })?;
            if content.len() > max_bytes {
                return Err(SchemaError::LoadFailed(format!(
                    "schema file too large while reading: {file_name}"
                )));
            }

            registry.register(&verb.to_ascii_lowercase(), &content)?;
            tracing::debug!(verb, "loaded payload schema");
        }

        Ok(registry)
    }

    /// Load from embedded schema strings.
    pub fn from_embedded(schemas: &[(&str, &str)]) -> Result<Self> {
        let mut registry = Self::new();
        for (verb, schema) in schemas {
            registry.register(verb, schema)?;
        }
        Ok(registry)
    }

    /// Validate a payload against the schema registered for `verb`.
    pub fn validate(&self, verb: &str, payload: &Value) -> Result<()> {
        match self.validators.get(verb) {
            Some(validator) => validate_value(verb, payload, validator),
            None if self.config.fail_on_missing_schema => {
                Err(SchemaError::NoSchema(verb.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Check if a verb has a registered schema.
    pub fn has_schema(&self, verb: &str) -> bool {
        self.validators.contains_key(verb)
    }

    /// Verbs that have registered schemas, sorted.
    pub fn verbs(&self) -> Vec<&str> {
        let mut verbs: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        verbs.sort_unstable();
        verbs
    }

    /// Get registry configuration.
    pub fn config(&self) -> &SchemaConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("verbs", &self.verbs())
            .field("config", &self.config)
            .finish()
    }
}

/// Returns true for request names and event kinds of the protocol.
pub fn is_known_verb(verb: &str) -> bool {
    Method::NAMES.contains(&verb) || EventKind::ALL.iter().any(|kind| kind.as_str() == verb)
}

fn apply_strict_mode(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let is_object_schema = map.get("type").and_then(Value::as_str) == Some("object")
                || map.contains_key("properties");
            if is_object_schema && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }

            for key in ["properties", "$defs", "definitions"] {
                if let Some(Value::Object(children)) = map.get_mut(key) {
                    children.values_mut().for_each(apply_strict_mode);
                }
            }
            for key in ["items", "not", "if", "then", "else"] {
                if let Some(child) = map.get_mut(key) {
                    apply_strict_mode(child);
                }
            }
            for key in ["prefixItems", "allOf", "anyOf", "oneOf"] {
                if let Some(Value::Array(children)) = map.get_mut(key) {
                    children.iter_mut().for_each(apply_strict_mode);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(apply_strict_mode),
        _ => {}
    }
}

#[cfg(unix)]
fn same_file_identity(path_metadata: &std::fs::Metadata, opened: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened.dev() && path_metadata.ino() == opened.ino()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    const PROGRESS_SCHEMA: &str = r#"{
        "type": "object",
        "properties": {
            "type": { "const": "progress" },
            "loaded": { "type": "integer", "minimum": 0 }
        },
        "required": ["type", "loaded"]
    }"#;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "polycrypt-schema-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn validates_registered_verb() {
        let registry = SchemaRegistry::from_embedded(&[("progress", PROGRESS_SCHEMA)]).unwrap();

        assert!(registry
            .validate("progress", &json!({"type": "progress", "loaded": 3}))
            .is_ok());
        let err = registry
            .validate("progress", &json!({"type": "progress", "loaded": -1}))
            .unwrap_err();
        assert!(matches!(err, SchemaError::ValidationFailed { ref verb, .. } if verb == "progress"));
    }

    #[test]
    fn missing_schema_passes_unless_configured() {
        let registry = SchemaRegistry::new();
        assert!(registry.validate("complete", &json!({})).is_ok());

        let strict = SchemaRegistry::with_config(SchemaConfig {
            fail_on_missing_schema: true,
            ..SchemaConfig::default()
        });
        assert!(matches!(
            strict.validate("complete", &json!({})),
            Err(SchemaError::NoSchema(_))
        ));
    }

    #[test]
    fn rejects_unknown_verb() {
        let mut registry = SchemaRegistry::new();
        let result = registry.register("explode", "{}");
        assert!(matches!(result, Err(SchemaError::UnknownVerb(_))));
    }

    #[test]
    fn strict_mode_rejects_undeclared_properties() {
        let mut registry = SchemaRegistry::with_config(SchemaConfig {
            strict_mode: true,
            ..SchemaConfig::default()
        });
        registry.register("progress", PROGRESS_SCHEMA).unwrap();

        let result = registry.validate(
            "progress",
            &json!({"type": "progress", "loaded": 1, "extra": true}),
        );
        assert!(result.is_err());
    }

    #[test]
    fn loads_schemas_from_directory() {
        let dir = temp_dir("load");
        std::fs::write(dir.join("progress.schema.json"), PROGRESS_SCHEMA).unwrap();
        std::fs::write(dir.join("README.txt"), "not a schema").unwrap();

        let registry = SchemaRegistry::from_directory(&dir).unwrap();
        assert_eq!(registry.verbs(), vec!["progress"]);
        assert!(registry.has_schema("progress"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_with_unknown_verb_fails() {
        let dir = temp_dir("unknown");
        std::fs::write(dir.join("explode.schema.json"), "{}").unwrap();

        let result = SchemaRegistry::from_directory(&dir);
        assert!(matches!(result, Err(SchemaError::UnknownVerb(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn directory_rejects_oversized_schema() {
        let dir = temp_dir("oversized");
        std::fs::write(dir.join("complete.schema.json"), "x".repeat(64)).unwrap();

        let result = SchemaRegistry::from_directory_with_config(
            &dir,
            SchemaConfig {
                max_schema_file_size: 16,
                ..SchemaConfig::default()
            },
        );
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn directory_rejects_schema_symlink() {
        let dir = temp_dir("symlink");
        let target = dir.join("target.json");
        std::fs::write(&target, PROGRESS_SCHEMA).unwrap();
        std::os::unix::fs::symlink(&target, dir.join("progress.schema.json")).unwrap();

        let result = SchemaRegistry::from_directory(&dir);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn file_identity_tells_replaced_files_apart() {
        let dir = temp_dir("identity");
        let first = dir.join("progress.schema.json");
        let second = dir.join("complete.schema.json");
        std::fs::write(&first, PROGRESS_SCHEMA).unwrap();
        std::fs::write(&second, PROGRESS_SCHEMA).unwrap();

        let listed = std::fs::symlink_metadata(&first).unwrap();
        let opened_first = std::fs::File::open(&first).unwrap().metadata().unwrap();
        let opened_second = std::fs::File::open(&second).unwrap().metadata().unwrap();

        assert!(same_file_identity(&listed, &opened_first));
        assert!(!same_file_identity(&listed, &opened_second));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn known_verbs() {
        assert!(is_known_verb("create"));
        assert!(is_known_verb("complete"));
        assert!(!is_known_verb("ping"));
    }
}
