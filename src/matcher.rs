//! Structural source-matching boundary.
//!
//! The indexer only needs three questions answered about a high-level
//! source file: which function definitions it contains, what the
//! declaration of a named function looks like, and what a named type's
//! definition looks like. `SourceMatcher` is that seam. The bundled
//! `RegexSourceMatcher` answers them for C-family sources with regex plus
//! brace matching; hosts with a real AST can substitute their own.
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDefinition {
    pub name: String,
    /// Full definition text, signature through closing brace.
    pub text: String,
    pub return_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDefinition {
    pub name: String,
    pub text: String,
}

pub trait SourceMatcher: Send + Sync {
    fn function_definitions(&self, source: &str) -> Vec<FunctionDefinition>;
    fn declaration_of(&self, source: &str, name: &str) -> Option<Declaration>;
    fn type_definition_of(&self, source: &str, name: &str) -> Option<TypeDefinition>;
}

const KEYWORDS: &[&str] = &["if", "else", "for", "while", "switch", "do", "return", "sizeof"];

pub struct RegexSourceMatcher {
    definition_pattern: Regex,
}

impl RegexSourceMatcher {
    pub fn new() -> Self {
        Self {
            // Type tokens (with qualifiers/pointers), then the function
            // name, a parameter list free of braces, and an opening brace.
            definition_pattern: Regex::new(
                r"(?m)^((?:static\s+|const\s+|unsigned\s+|signed\s+|struct\s+|enum\s+)*[A-Za-z_]\w*(?:\s*\*+\s*|\s+))([A-Za-z_]\w*)\s*\(([^;{}]*)\)\s*\{",
            )
            .unwrap(),
        }
    }
}

impl Default for RegexSourceMatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMatcher for RegexSourceMatcher {
    fn function_definitions(&self, source: &str) -> Vec<FunctionDefinition> {
        let mut definitions = Vec::new();
        for caps in self.definition_pattern.captures_iter(source) {
            let name = caps[2].to_string();
            if KEYWORDS.contains(&name.as_str()) {
                continue;
            }
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let open = whole.end() - 1;
            let Some(close) = matching_brace(source, open) else {
                continue;
            };
            definitions.push(FunctionDefinition {
                name,
                text: source[whole.start()..=close].to_string(),
                return_type: caps[1].trim().trim_start_matches("static").trim().to_string(),
            });
        }
        definitions
    }

    fn declaration_of(&self, source: &str, name: &str) -> Option<Declaration> {
        let pattern = Regex::new(&format!(
            r"(?m)^[^\n;{{}}#]*\b{}\s*\([^;{{}}]*\)\s*;",
            regex::escape(name)
        ))
        .ok()?;
        pattern.find(source).map(|m| Declaration {
            name: name.to_string(),
            text: m.as_str().trim().to_string(),
        })
    }

    fn type_definition_of(&self, source: &str, name: &str) -> Option<TypeDefinition> {
        let escaped = regex::escape(name);

        // typedef struct { ... } Name;
        let body_form = Regex::new(r"typedef\s+(?:struct|union|enum)\s*\w*\s*\{").ok()?;
        for m in body_form.find_iter(source) {
            let open = m.end() - 1;
            let Some(close) = matching_brace(source, open) else {
                continue;
            };
            let tail = &source[close + 1..];
            let tail_pattern =
                Regex::new(&format!(r"^\s*{escaped}\s*;")).ok()?;
            if let Some(t) = tail_pattern.find(tail) {
                return Some(TypeDefinition {
                    name: name.to_string(),
                    text: source[m.start()..close + 1 + t.end()].to_string(),
                });
            }
        }

        // struct Name { ... };
        let tagged_form =
            Regex::new(&format!(r"(?:struct|union|enum)\s+{escaped}\s*\{{")).ok()?;
        if let Some(m) = tagged_form.find(source) {
            let open = m.end() - 1;
            if let Some(close) = matching_brace(source, open) {
                let end = source[close..]
                    .find(';')
                    .map(|i| close + i + 1)
                    .unwrap_or(close + 1);
                return Some(TypeDefinition {
                    name: name.to_string(),
                    text: source[m.start()..end].to_string(),
                });
            }
        }

        // typedef <existing> Name;
        let alias_form = Regex::new(&format!(
            r"(?m)^typedef\s+[^;{{}}\n]+\b{escaped}\s*;"
        ))
        .ok()?;
        alias_form.find(source).map(|m| TypeDefinition {
            name: name.to_string(),
            text: m.as_str().trim().to_string(),
        })
    }
}

/// Index of the `}` matching the `{` at `open`, or `None` if unbalanced.
fn matching_brace(source: &str, open: usize) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
