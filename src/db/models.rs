use serde::{Deserialize, Serialize};

/// Derive the registry key for a function name. Deterministic, so
/// re-indexing the same function always lands on the same record.
pub fn function_id(name: &str) -> String {
    format!("id:{name}")
}

/// One decompilable unit: the registry's unit of knowledge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionRecord {
    pub id: String,
    /// Symbol name as it appears in assembly.
    pub name: String,
    /// Recovered high-level source; absent means not yet translated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_module_path: Option<String>,
    pub assembly_module_path: String,
    pub assembly_code: String,
    /// Ids of functions this one calls. Weak references: an entry may name
    /// an id that is not (yet) registered.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub calls_function_ids: Vec<String>,
}

/// Embedding vector for one function, keyed on the same id space as
/// [`FunctionRecord`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
}

/// Whole-registry snapshot: two id-sorted lists in one human-diffable
/// document. This is the crash-recovery boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Snapshot {
    #[serde(default)]
    pub functions: Vec<FunctionRecord>,
    #[serde(default)]
    pub vectors: Vec<VectorRecord>,
}

/// A function record together with its registered callees. Callees whose
/// ids are not registered are omitted, not errors.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFunction {
    pub record: FunctionRecord,
    pub callees: Vec<FunctionRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RegistryStats {
    pub total_functions: usize,
    pub translated: usize,
    pub untranslated: usize,
    pub total_vectors: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_id_is_namespaced() {
        assert_eq!(function_id("main"), "id:main");
        assert_eq!(function_id("sub_8001000"), "id:sub_8001000");
    }

    #[test]
    fn test_record_json_omits_absent_fields() {
        let record = FunctionRecord {
            id: function_id("leaf"),
            name: "leaf".to_string(),
            source_code: None,
            source_module_path: None,
            assembly_module_path: "asm/leaf.s".to_string(),
            assembly_code: "\tbx lr".to_string(),
            calls_function_ids: Vec::new(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("source_code"));
        assert!(!json.contains("calls_function_ids"));

        let parsed: FunctionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }
}
