//! Architecture-specific lexical scanners for raw assembly modules.
//!
//! A scanner splits module text into named function bodies and extracts the
//! call targets referenced by a body. Function boundaries come from explicit
//! start/end markers where the assembler emits them; otherwise the end is
//! inferred by a small state machine over line classes (instruction, return
//! sequence, data definition, alignment, label).
pub mod arm;
pub mod mips;

use std::collections::HashSet;
use std::str::FromStr;

use thiserror::Error;

/// Errors that can occur while scanning assembly text.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("unsupported architecture: {0}")]
    UnsupportedArch(String),
}

/// Target instruction-set architecture of an assembly module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// ARM register-transfer style, covers both `thumb` and `arm` sources.
    Arm,
    /// MIPS load/jump style.
    Mips,
}

impl FromStr for Arch {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "arm" | "thumb" => Ok(Arch::Arm),
            "mips" => Ok(Arch::Mips),
            other => Err(ScanError::UnsupportedArch(other.to_string())),
        }
    }
}

/// One function extracted from an assembly module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFunction {
    pub name: String,
    pub body: String,
}

impl Arch {
    /// Split raw module text into `{name, body}` pairs, in file order.
    pub fn split_functions(&self, text: &str) -> Vec<ScannedFunction> {
        match self {
            Arch::Arm => split_with(&arm::ArmGrammar::new(), text),
            Arch::Mips => split_with(&mips::MipsGrammar::new(), text),
        }
    }

    /// Extract the names of functions called (or referenced call-like) by a
    /// function body, deduplicated in first-occurrence order.
    ///
    /// Direct-reference idioms (`ldr rN, =sym`, `la`/`lw` against a symbol)
    /// are deliberately broad: data labels can be captured alongside real
    /// call targets. Retrieval tolerates that over-approximation.
    pub fn extract_calls(&self, body: &str) -> Vec<String> {
        let raw = match self {
            Arch::Arm => arm::ArmGrammar::new().calls(body),
            Arch::Mips => mips::MipsGrammar::new().calls(body),
        };
        let mut seen = HashSet::new();
        raw.into_iter().filter(|name| seen.insert(name.clone())).collect()
    }

    /// Fast single-line probe: if `line` is a function start marker, return
    /// the declared name without parsing the whole module.
    pub fn line_function_name(&self, line: &str) -> Option<String> {
        match self {
            Arch::Arm => arm::ArmGrammar::new().start_name(line.trim()),
            Arch::Mips => mips::MipsGrammar::new().start_name(line.trim()),
        }
    }
}

/// Line-class hooks one architecture grammar provides to the shared
/// splitting logic.
pub(crate) trait Grammar {
    fn start_name(&self, line: &str) -> Option<String>;
    fn end_name(&self, line: &str) -> Option<String>;
    /// Whether the explicit end-marker line is part of the body text.
    fn end_line_included(&self) -> bool;
    fn is_instruction(&self, line: &str) -> bool;
    fn is_return(&self, line: &str) -> bool;
    fn is_data(&self, line: &str) -> bool;
    fn is_align(&self, line: &str) -> bool;
    fn calls(&self, body: &str) -> Vec<String>;
}

/// Boundary-inference states when no explicit end marker exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    /// No instruction line seen yet.
    Searching,
    /// Inside the instruction stream.
    InBody,
    /// A return sequence was seen; constant-pool data may follow.
    TrailingData,
}

pub(crate) fn split_with<G: Grammar>(grammar: &G, text: &str) -> Vec<ScannedFunction> {
    let lines: Vec<&str> = text.lines().collect();
    let mut functions = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        match grammar.start_name(lines[i].trim()) {
            Some(name) => {
                let (body, next) = extract_body(grammar, &lines, i + 1, &name);
                functions.push(ScannedFunction { name, body });
                i = next;
            }
            None => i += 1,
        }
    }
    functions
}

fn extract_body<G: Grammar>(
    grammar: &G,
    lines: &[&str],
    start: usize,
    name: &str,
) -> (String, usize) {
    // The region a function can occupy ends at the next start marker.
    let region_end = (start..lines.len())
        .find(|&j| grammar.start_name(lines[j].trim()).is_some())
        .unwrap_or(lines.len());

    // Explicit end marker naming this function wins outright.
    for j in start..region_end {
        if grammar.end_name(lines[j].trim()).as_deref() == Some(name) {
            let body_end = if grammar.end_line_included() { j + 1 } else { j };
            let body = &lines[start..body_end];
            // Metadata-only functions report an empty body, not a partial one.
            if !body.iter().any(|l| grammar.is_instruction(l.trim())) {
                return (String::new(), j + 1);
            }
            return (body.join("\n"), j + 1);
        }
    }

    let body_len = infer_end(grammar, &lines[start..region_end]);
    (lines[start..start + body_len].join("\n"), region_end)
}

/// Find the exclusive end index of a body with no explicit end marker.
///
/// The body ends at the last return-class instruction, extended over any
/// trailing data-definition lines (constant pools). Alignment-only
/// directives never terminate a body; a bare label after the trailing data
/// belongs to the next symbol. Zero instruction lines means an empty body.
fn infer_end<G: Grammar>(grammar: &G, lines: &[&str]) -> usize {
    let mut state = BodyState::Searching;
    let mut end = 0;
    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() || grammar.is_align(line) {
            continue;
        }
        match state {
            BodyState::Searching => {
                if grammar.is_instruction(line) {
                    end = i + 1;
                    state = if grammar.is_return(line) {
                        BodyState::TrailingData
                    } else {
                        BodyState::InBody
                    };
                }
            }
            BodyState::InBody => {
                if grammar.is_instruction(line) {
                    end = i + 1;
                    if grammar.is_return(line) {
                        state = BodyState::TrailingData;
                    }
                } else if grammar.is_data(line) {
                    end = i + 1;
                }
            }
            BodyState::TrailingData => {
                if is_bare_label(line) {
                    break;
                }
                if grammar.is_data(line) {
                    end = i + 1;
                } else if grammar.is_instruction(line) {
                    end = i + 1;
                    if !grammar.is_return(line) {
                        state = BodyState::InBody;
                    }
                }
            }
        }
    }
    if state == BodyState::Searching { 0 } else { end }
}

/// A label with nothing else on the line, e.g. `sub_80012A4:`.
fn is_bare_label(line: &str) -> bool {
    line.ends_with(':')
        && line.len() > 1
        && line[..line.len() - 1]
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

/// Remove inline comments (`@`, `;`, `//`) and C-style block comments
/// without disturbing instruction columns or blank-line structure.
pub fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_block = false;
    for (idx, line) in text.lines().enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        let mut cleaned = String::new();
        let mut rest = line;
        while !rest.is_empty() {
            if in_block {
                match rest.find("*/") {
                    Some(pos) => {
                        rest = &rest[pos + 2..];
                        in_block = false;
                    }
                    None => rest = "",
                }
            } else {
                match first_comment_marker(rest) {
                    Some((pos, marker)) => {
                        cleaned.push_str(&rest[..pos]);
                        if marker == "/*" {
                            in_block = true;
                            rest = &rest[pos + 2..];
                        } else {
                            rest = "";
                        }
                    }
                    None => {
                        cleaned.push_str(rest);
                        rest = "";
                    }
                }
            }
        }
        out.push_str(cleaned.trim_end());
    }
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

fn first_comment_marker(s: &str) -> Option<(usize, &'static str)> {
    ["/*", "//", "@", ";"]
        .iter()
        .filter_map(|m| s.find(m).map(|pos| (pos, *m)))
        .min_by_key(|(pos, _)| *pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arch_from_str() {
        assert_eq!("arm".parse::<Arch>().unwrap(), Arch::Arm);
        assert_eq!("thumb".parse::<Arch>().unwrap(), Arch::Arm);
        assert_eq!("MIPS".parse::<Arch>().unwrap(), Arch::Mips);
        assert!("ppc".parse::<Arch>().is_err());
    }

    #[test]
    fn test_strip_line_comments() {
        let src = "\tmov r0, r1 @ copy\n\tbx lr ; done\n";
        assert_eq!(strip_comments(src), "\tmov r0, r1\n\tbx lr\n");
    }

    #[test]
    fn test_strip_block_comments_preserves_lines() {
        let src = "\tadd r0, r1 /* start\nstill comment\nend */\n\tbx lr\n";
        let stripped = strip_comments(src);
        assert_eq!(stripped, "\tadd r0, r1\n\n\n\tbx lr\n");
        assert_eq!(stripped.lines().count(), src.lines().count());
    }

    #[test]
    fn test_strip_double_slash() {
        let src = "lw $t0, 0($a0) // load\n";
        assert_eq!(strip_comments(src), "lw $t0, 0($a0)\n");
    }

    #[test]
    fn test_bare_label() {
        assert!(is_bare_label("sub_80012A4:"));
        assert!(is_bare_label("_08003F40:"));
        assert!(!is_bare_label("_08003F40: .4byte foo"));
        assert!(!is_bare_label("mov r0, r1"));
        assert!(!is_bare_label(":"));
    }
}
