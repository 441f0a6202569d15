//! Function Registry — durable store of function records and their
//! embedding vectors, with a single-snapshot persistence model.
//!
//! The registry is always-available in-process state; persistence failures
//! abort the in-flight operation and leave memory intact. Records live in
//! `BTreeMap`s so snapshots serialize in id order, which makes an unchanged
//! re-index produce a byte-identical snapshot file.
pub mod models;
pub mod search;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

pub use self::models::{
    FunctionRecord, RegistryStats, ResolvedFunction, Snapshot, VectorRecord, function_id,
};

/// Errors from registry mutation and snapshot persistence.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("function record is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("snapshot io failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub struct Registry {
    functions: BTreeMap<String, FunctionRecord>,
    vectors: BTreeMap<String, Vec<f32>>,
    snapshot_path: Option<PathBuf>,
}

impl Registry {
    /// Open a registry backed by a snapshot file. The snapshot is read
    /// fully into memory if present; otherwise the registry starts empty.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let mut registry = Self {
            functions: BTreeMap::new(),
            vectors: BTreeMap::new(),
            snapshot_path: Some(path.to_path_buf()),
        };

        if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let snapshot: Snapshot = serde_json::from_str(&data)?;
            registry.restore(snapshot);
            info!(
                "Loaded registry snapshot: {} functions, {} vectors",
                registry.functions.len(),
                registry.vectors.len()
            );
        } else {
            info!("No snapshot at {}, starting empty", path.display());
        }

        Ok(registry)
    }

    /// An unpersisted registry (useful for testing). `save` is a no-op.
    pub fn in_memory() -> Self {
        Self {
            functions: BTreeMap::new(),
            vectors: BTreeMap::new(),
            snapshot_path: None,
        }
    }

    /// Insert or overwrite a function record by id.
    ///
    /// Validation covers required fields only; everything else is the
    /// caller's business.
    pub fn upsert_function(&mut self, record: FunctionRecord) -> Result<(), RegistryError> {
        if record.id.is_empty() {
            return Err(RegistryError::MissingField("id"));
        }
        if record.name.is_empty() {
            return Err(RegistryError::MissingField("name"));
        }
        if record.assembly_code.is_empty() {
            return Err(RegistryError::MissingField("assembly_code"));
        }
        if record.assembly_module_path.is_empty() {
            return Err(RegistryError::MissingField("assembly_module_path"));
        }
        self.functions.insert(record.id.clone(), record);
        Ok(())
    }

    pub fn function_by_id(&self, id: &str) -> Option<&FunctionRecord> {
        self.functions.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.contains_key(id)
    }

    /// Look up a record and resolve its `calls_function_ids` into full
    /// records. Unregistered callees are omitted.
    pub fn resolve(&self, id: &str) -> Option<ResolvedFunction> {
        let record = self.functions.get(id)?.clone();
        let callees = record
            .calls_function_ids
            .iter()
            .filter_map(|callee_id| self.functions.get(callee_id).cloned())
            .collect();
        Some(ResolvedFunction { record, callees })
    }

    /// Batched insert/overwrite of embedding vectors. A vector for an
    /// unregistered function id violates the registry invariant and is
    /// dropped with a warning.
    pub fn upsert_vectors(&mut self, records: Vec<VectorRecord>) {
        for record in records {
            if !self.functions.contains_key(&record.id) {
                warn!("Dropping vector for unregistered function {}", record.id);
                continue;
            }
            self.vectors.insert(record.id, record.embedding);
        }
    }

    pub fn vector_of(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(Vec::as_slice)
    }

    /// Set-difference between function ids and vector ids: everything that
    /// still needs an embedding, in id order.
    pub fn unembedded_function_ids(&self) -> Vec<String> {
        self.functions
            .keys()
            .filter(|id| !self.vectors.contains_key(*id))
            .cloned()
            .collect()
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionRecord> {
        self.functions.values()
    }

    /// Reverse call-graph lookup: all registered functions whose call list
    /// names `id`.
    pub fn callers_of(&self, id: &str) -> Vec<&FunctionRecord> {
        self.functions
            .values()
            .filter(|f| f.calls_function_ids.iter().any(|c| c == id))
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let translated = self
            .functions
            .values()
            .filter(|f| f.source_code.is_some())
            .count();
        RegistryStats {
            total_functions: self.functions.len(),
            translated,
            untranslated: self.functions.len() - translated,
            total_vectors: self.vectors.len(),
        }
    }

    /// Serialize the whole registry. Output lists are id-sorted.
    pub fn dump(&self) -> Snapshot {
        Snapshot {
            functions: self.functions.values().cloned().collect(),
            vectors: self
                .vectors
                .iter()
                .map(|(id, embedding)| VectorRecord {
                    id: id.clone(),
                    embedding: embedding.clone(),
                })
                .collect(),
        }
    }

    /// Replace all registry contents with a snapshot's.
    pub fn restore(&mut self, snapshot: Snapshot) {
        self.functions = snapshot
            .functions
            .into_iter()
            .map(|f| (f.id.clone(), f))
            .collect();
        self.vectors = snapshot
            .vectors
            .into_iter()
            .map(|v| (v.id, v.embedding))
            .collect();
    }

    /// Persist the current state to the snapshot file. Written to a
    /// temporary sibling and renamed, so an interrupted write never
    /// truncates the previous snapshot. No-op for in-memory registries.
    pub fn save(&self) -> Result<(), RegistryError> {
        let Some(path) = &self.snapshot_path else {
            debug!("In-memory registry, skipping save");
            return Ok(());
        };
        let data = serde_json::to_string_pretty(&self.dump())?;

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, &data).map_err(|source| RegistryError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Saved registry snapshot to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, source: Option<&str>) -> FunctionRecord {
        FunctionRecord {
            id: function_id(name),
            name: name.to_string(),
            source_code: source.map(str::to_string),
            source_module_path: source.map(|_| format!("src/{name}.c")),
            assembly_module_path: format!("asm/{name}.s"),
            assembly_code: format!("\tbl {name}_helper\n\tbx lr"),
            calls_function_ids: Vec::new(),
        }
    }

    #[test]
    fn test_upsert_overwrites_by_id() {
        let mut registry = Registry::in_memory();
        registry.upsert_function(record("dup", None)).unwrap();
        let mut second = record("dup", Some("int dup(void) {}"));
        second.assembly_code = "\tbx lr".to_string();
        registry.upsert_function(second).unwrap();

        assert_eq!(registry.stats().total_functions, 1);
        let stored = registry.function_by_id("id:dup").unwrap();
        assert_eq!(stored.assembly_code, "\tbx lr");
        assert!(stored.source_code.is_some());
    }

    #[test]
    fn test_upsert_rejects_missing_required_fields() {
        let mut registry = Registry::in_memory();
        let mut bad = record("bad", None);
        bad.assembly_module_path = String::new();
        assert!(matches!(
            registry.upsert_function(bad),
            Err(RegistryError::MissingField("assembly_module_path"))
        ));
    }

    #[test]
    fn test_resolve_omits_missing_callees() {
        let mut registry = Registry::in_memory();
        let mut caller = record("caller", None);
        caller.calls_function_ids = vec![function_id("known"), function_id("unknown")];
        registry.upsert_function(caller).unwrap();
        registry.upsert_function(record("known", Some("void known(void) {}"))).unwrap();

        let resolved = registry.resolve("id:caller").unwrap();
        assert_eq!(resolved.callees.len(), 1);
        assert_eq!(resolved.callees[0].name, "known");
    }

    #[test]
    fn test_unembedded_is_set_difference() {
        let mut registry = Registry::in_memory();
        for i in 0..10 {
            registry.upsert_function(record(&format!("f{i}"), None)).unwrap();
        }
        let embedded: Vec<VectorRecord> = (0..6)
            .map(|i| VectorRecord {
                id: function_id(&format!("f{i}")),
                embedding: vec![0.1, 0.2],
            })
            .collect();
        registry.upsert_vectors(embedded);

        let pending = registry.unembedded_function_ids();
        assert_eq!(pending, vec!["id:f6", "id:f7", "id:f8", "id:f9"]);
    }

    #[test]
    fn test_vectors_for_unregistered_ids_are_dropped() {
        let mut registry = Registry::in_memory();
        registry.upsert_function(record("real", None)).unwrap();
        registry.upsert_vectors(vec![
            VectorRecord {
                id: function_id("real"),
                embedding: vec![1.0],
            },
            VectorRecord {
                id: function_id("phantom"),
                embedding: vec![1.0],
            },
        ]);
        assert_eq!(registry.stats().total_vectors, 1);
        assert!(registry.vector_of("id:phantom").is_none());
    }

    #[test]
    fn test_dump_restore_round_trip() {
        let mut registry = Registry::in_memory();
        let mut caller = record("a", Some("void a(void) { b(); }"));
        caller.calls_function_ids = vec![function_id("b")];
        registry.upsert_function(caller).unwrap();
        registry.upsert_function(record("b", None)).unwrap();
        registry.upsert_vectors(vec![VectorRecord {
            id: function_id("a"),
            embedding: vec![0.5, -0.25, 0.125],
        }]);

        let snapshot = registry.dump();
        let mut restored = Registry::in_memory();
        restored.restore(snapshot.clone());

        assert_eq!(restored.dump(), snapshot);
        assert_eq!(restored.stats(), registry.stats());
        assert_eq!(
            restored.function_by_id("id:a"),
            registry.function_by_id("id:a")
        );
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");

        let mut registry = Registry::open(&path).unwrap();
        registry.upsert_function(record("persisted", None)).unwrap();
        registry.save().unwrap();

        let reopened = Registry::open(&path).unwrap();
        assert_eq!(reopened.stats().total_functions, 1);
        assert_eq!(reopened.dump(), registry.dump());
    }

    #[test]
    fn test_stats_counts_translated_split() {
        let mut registry = Registry::in_memory();
        registry.upsert_function(record("done", Some("void done(void) {}"))).unwrap();
        registry.upsert_function(record("todo", None)).unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_functions, 2);
        assert_eq!(stats.translated, 1);
        assert_eq!(stats.untranslated, 1);
        assert_eq!(stats.total_vectors, 0);
    }
}
