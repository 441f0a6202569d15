//! Load/jump style grammar for MIPS assembly.
//!
//! Functions open with a `glabel` declaration. A `.size name, . - name`
//! directive closes the body (that line inclusive); without one, the end is
//! inferred backward from the last `jr $ra`. Calls are `jal` jumps;
//! `la`/`lw` load idioms against a symbol count as direct references.
use regex::Regex;

use super::Grammar;

pub struct MipsGrammar {
    start_pattern: Regex,
    end_pattern: Regex,
    data_pattern: Regex,
    align_pattern: Regex,
    return_pattern: Regex,
    instruction_pattern: Regex,
    call_pattern: Regex,
    ref_pattern: Regex,
}

const REGISTERS: &[&str] = &[
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "t8", "t9", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "k0", "k1", "gp",
    "sp", "fp", "ra",
];

fn is_register(name: &str) -> bool {
    REGISTERS.contains(&name)
}

impl MipsGrammar {
    pub fn new() -> Self {
        Self {
            start_pattern: Regex::new(r"^glabel\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
            end_pattern: Regex::new(r"^\.size\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
            data_pattern: Regex::new(r"^(?:[A-Za-z_.][\w.]*:\s*)?\.(?:word|half|byte|float|double|ascii|asciz)\b")
                .unwrap(),
            align_pattern: Regex::new(r"^\.(?:align|balign)\b").unwrap(),
            return_pattern: Regex::new(r"^jr\s+\$ra\b").unwrap(),
            instruction_pattern: Regex::new(r"(?i)^(?:[A-Za-z_.][\w.]*:\s+)?[a-z][a-z0-9.]*(?:\s|$)")
                .unwrap(),
            call_pattern: Regex::new(r"\bjal\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
            // `%lo(...)`/`%hi(...)` relocation wrappers are accepted
            ref_pattern: Regex::new(r"\b(?:la|lw)\s+\$\w+,\s*(?:%(?:lo|hi)\()?([A-Za-z_][A-Za-z0-9_]*)")
                .unwrap(),
        }
    }
}

impl Default for MipsGrammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar for MipsGrammar {
    fn start_name(&self, line: &str) -> Option<String> {
        self.start_pattern
            .captures(line)
            .map(|caps| caps[1].to_string())
    }

    fn end_name(&self, line: &str) -> Option<String> {
        self.end_pattern
            .captures(line)
            .map(|caps| caps[1].to_string())
    }

    fn end_line_included(&self) -> bool {
        // `.size func, . - func` is conventionally the last line of the body.
        true
    }

    fn is_instruction(&self, line: &str) -> bool {
        !line.starts_with('.')
            && !super::is_bare_label(line)
            && self.start_name(line).is_none()
            && !self.is_data(line)
            && self.instruction_pattern.is_match(line)
    }

    fn is_return(&self, line: &str) -> bool {
        self.return_pattern.is_match(line)
    }

    fn is_data(&self, line: &str) -> bool {
        self.data_pattern.is_match(line)
    }

    fn is_align(&self, line: &str) -> bool {
        self.align_pattern.is_match(line)
    }

    fn calls(&self, body: &str) -> Vec<String> {
        let mut targets = Vec::new();
        for caps in self.call_pattern.captures_iter(body) {
            let name = &caps[1];
            if !is_register(name) {
                targets.push(name.to_string());
            }
        }
        for caps in self.ref_pattern.captures_iter(body) {
            let name = &caps[1];
            if !is_register(name) {
                targets.push(name.to_string());
            }
        }
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::super::Arch;

    #[test]
    fn test_size_directive_closes_body_inclusive() {
        let src = "\
glabel func_80024A10
\taddiu $sp, $sp, -0x18
\tjal func_80024B00
\tnop
\tjr $ra
\tnop
.size func_80024A10, . - func_80024A10
glabel func_80024B00
\tjr $ra
\tnop
";
        let funcs = Arch::Mips.split_functions(src);
        assert_eq!(funcs.len(), 2);
        let first = &funcs[0];
        assert_eq!(first.name, "func_80024A10");
        assert!(
            first.body.trim_end().ends_with(".size func_80024A10, . - func_80024A10"),
            "size directive line is inclusive, got: {}",
            first.body
        );
        assert!(!first.body.contains("glabel"));
    }

    #[test]
    fn test_inferred_end_from_jump_return() {
        let src = "\
glabel walk_scene
\tlui $a0, %hi(gScene)
\tjr $ra
\tnop
\t.align 3
glabel next_func
\tjr $ra
\tnop
";
        let funcs = Arch::Mips.split_functions(src);
        assert_eq!(funcs.len(), 2);
        let walk = &funcs[0];
        // Delay slot after `jr $ra` stays in the body; the alignment tail
        // and the next function do not.
        assert!(walk.body.trim_end().ends_with("nop"));
        assert!(!walk.body.contains(".align"));
        assert!(!walk.body.contains("next_func"));
    }

    #[test]
    fn test_extract_calls_jump_and_link() {
        let body = "\tjal target_func\n\tnop\n\tjalr $t9\n\tjr $ra\n";
        let calls = Arch::Mips.extract_calls(body);
        assert_eq!(calls, vec!["target_func"]);
    }

    #[test]
    fn test_extract_calls_load_idioms() {
        let body = "\
\tla $a0, gMapHeader
\tlw $v0, %lo(update_actor)($at)
\tlw $t0, 0x10($a0)
\tlw $t1, ($sp)
";
        let calls = Arch::Mips.extract_calls(body);
        assert_eq!(calls, vec!["gMapHeader", "update_actor"]);
    }

    #[test]
    fn test_register_and_literal_operands_never_captured() {
        let body = "\tlw $t0, 0x8004($gp)\n\tjal helper\n\tla $a1, sp\n";
        let calls = Arch::Mips.extract_calls(body);
        assert_eq!(calls, vec!["helper"]);
    }

    #[test]
    fn test_empty_function_reports_empty_body() {
        let src = "glabel stub\n.size stub, . - stub\n";
        let funcs = Arch::Mips.split_functions(src);
        assert_eq!(funcs.len(), 1);
        // Metadata only, no instruction lines.
        assert_eq!(funcs[0].body, "");
    }

    #[test]
    fn test_line_function_name() {
        assert_eq!(
            Arch::Mips.line_function_name("glabel func_800F2340"),
            Some("func_800F2340".to_string())
        );
        assert_eq!(Arch::Mips.line_function_name("\tjr $ra"), None);
    }
}
