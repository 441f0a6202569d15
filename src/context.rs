//! Translation-context assembly.
//!
//! For one target assembly function this gathers everything a translation
//! request needs: declarations of the functions it calls, the type
//! definitions those declarations depend on (one transitive level), and
//! example pairs — translated callers of the target, and similar-but-
//! unrelated translated functions found through the similarity engine.
use std::collections::HashSet;

use anyhow::{Context as _, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::Config;
use crate::db::search::SimilarMatch;
use crate::db::{FunctionRecord, Registry, function_id};
use crate::matcher::{Declaration, SourceMatcher, TypeDefinition};

/// Version-history boundary: recover the assembly a function had before
/// it was translated. The host owns version control; this crate only
/// consumes the answer.
pub trait HistoryLookup: Send + Sync {
    fn previous_assembly(&self, name: &str, source_path: &str) -> Result<Option<String>>;
}

/// Default history source: always absent.
pub struct NoHistory;

impl HistoryLookup for NoHistory {
    fn previous_assembly(&self, _name: &str, _source_path: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// A translated caller of the target, optionally paired with the assembly
/// it had before translation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallerExample {
    pub record: FunctionRecord,
    pub previous_assembly: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranslationContext {
    pub target: FunctionRecord,
    pub callee_declarations: Vec<Declaration>,
    pub type_definitions: Vec<TypeDefinition>,
    pub caller_examples: Vec<CallerExample>,
    pub similar_examples: Vec<SimilarMatch>,
}

pub struct ContextBuilder<'a> {
    registry: &'a Registry,
    matcher: &'a dyn SourceMatcher,
    history: &'a dyn HistoryLookup,
    config: &'a Config,
    identifier_pattern: Regex,
}

/// Words that appear in declarations but can never name a required type.
const DECLARATION_NOISE: &[&str] = &[
    "struct", "union", "enum", "typedef", "const", "unsigned", "signed", "static", "volatile",
    "extern", "register", "inline",
];

impl<'a> ContextBuilder<'a> {
    pub fn new(
        registry: &'a Registry,
        matcher: &'a dyn SourceMatcher,
        history: &'a dyn HistoryLookup,
        config: &'a Config,
    ) -> Self {
        Self {
            registry,
            matcher,
            history,
            config,
            identifier_pattern: Regex::new(r"[A-Za-z_]\w*").unwrap(),
        }
    }

    /// Assemble the supporting material for translating the function named
    /// `name`.
    pub fn build_for_name(&self, name: &str) -> Result<TranslationContext> {
        self.build(&function_id(name))
    }

    pub fn build(&self, id: &str) -> Result<TranslationContext> {
        let resolved = self
            .registry
            .resolve(id)
            .with_context(|| format!("function {id} is not registered"))?;

        let (callee_declarations, type_definitions) = self.collect_callee_material(&resolved.callees);
        let caller_examples = self.collect_caller_examples(&resolved.record)?;
        let similar_examples = self.collect_similar_examples(&resolved.record, &caller_examples);

        Ok(TranslationContext {
            target: resolved.record,
            callee_declarations,
            type_definitions,
            caller_examples,
            similar_examples,
        })
    }

    /// Declarations of every callee with a known source module, and the
    /// type definitions those declarations reference. Per-callee failures
    /// are isolated: a missing or unreadable module costs one declaration,
    /// not the whole context.
    fn collect_callee_material(
        &self,
        callees: &[FunctionRecord],
    ) -> (Vec<Declaration>, Vec<TypeDefinition>) {
        let mut declarations = Vec::new();
        let mut type_definitions: Vec<TypeDefinition> = Vec::new();
        let mut seen_types = HashSet::new();

        for callee in callees {
            let Some(source_path) = &callee.source_module_path else {
                continue;
            };
            let source = match std::fs::read_to_string(source_path) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Skipping declarations from {source_path}: {e}");
                    continue;
                }
            };
            let Some(declaration) = self.matcher.declaration_of(&source, &callee.name) else {
                debug!("No declaration for {} in {source_path}", callee.name);
                continue;
            };

            // Types named by the declaration, then types named by those
            // definitions: one transitive level, no further.
            let level_zero = self.required_types(&declaration.text, &callee.name);
            for type_name in level_zero {
                let Some(definition) = self.matcher.type_definition_of(&source, &type_name) else {
                    continue;
                };
                for nested in self.required_types(&definition.text, &type_name) {
                    if seen_types.contains(&nested) {
                        continue;
                    }
                    if let Some(nested_def) = self.matcher.type_definition_of(&source, &nested) {
                        seen_types.insert(nested);
                        type_definitions.push(nested_def);
                    }
                }
                if seen_types.insert(type_name) {
                    type_definitions.push(definition);
                }
            }

            declarations.push(declaration);
        }

        (declarations, type_definitions)
    }

    /// Candidate type names in a piece of declaration/definition text,
    /// filtered against declaration noise and the configured primitive
    /// aliases.
    fn required_types(&self, text: &str, owner: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut seen = HashSet::new();
        for m in self.identifier_pattern.find_iter(text) {
            let ident = m.as_str();
            if ident == owner
                || DECLARATION_NOISE.contains(&ident)
                || self.config.type_ignore.iter().any(|t| t == ident)
            {
                continue;
            }
            if seen.insert(ident.to_string()) {
                names.push(ident.to_string());
            }
        }
        names
    }

    /// Translated callers of the target, enriched with their pre-translation
    /// assembly when version history has it.
    fn collect_caller_examples(&self, target: &FunctionRecord) -> Result<Vec<CallerExample>> {
        let mut examples = Vec::new();
        for caller in self.registry.callers_of(&target.id) {
            if caller.source_code.is_none() {
                continue;
            }
            let source_path = caller.source_module_path.as_deref().unwrap_or_default();
            let previous_assembly = self
                .history
                .previous_assembly(&caller.name, source_path)
                .unwrap_or_else(|e| {
                    warn!("History lookup for {} failed: {e}", caller.name);
                    None
                });
            examples.push(CallerExample {
                record: caller.clone(),
                previous_assembly,
            });
        }
        Ok(examples)
    }

    /// Similar-but-unrelated translated functions, ranked against the
    /// target's own embedding. Functions that already call the target are
    /// excluded — they are callers, not analogues.
    fn collect_similar_examples(
        &self,
        target: &FunctionRecord,
        callers: &[CallerExample],
    ) -> Vec<SimilarMatch> {
        let Some(query) = self.registry.vector_of(&target.id) else {
            debug!("{} has no embedding yet, no similar examples", target.id);
            return Vec::new();
        };
        let caller_ids: HashSet<&str> = callers.iter().map(|c| c.record.id.as_str()).collect();

        let mut matches = self.registry.search_similar(
            query,
            self.config.search.similarity_threshold,
            self.config.search.limit,
        );
        matches.retain(|m| m.record.id != target.id && !caller_ids.contains(m.record.id.as_str()));
        matches.truncate(self.config.search.example_limit);
        matches
    }
}
