//! Register-transfer style grammar for ARM (thumb and arm) assembly.
//!
//! Functions are bracketed by `thumb_func_start`/`arm_func_start` markers;
//! the matching `*_func_end` marker is optional and, when present, is not
//! part of the body. Calls are `bl`/`blx` branches; `ldr rN, =sym` and
//! `mov rN, =sym` immediate loads count as call-like direct references.
use regex::Regex;

use super::Grammar;

pub struct ArmGrammar {
    start_pattern: Regex,
    end_pattern: Regex,
    data_pattern: Regex,
    align_pattern: Regex,
    return_pattern: Regex,
    instruction_pattern: Regex,
    call_pattern: Regex,
    ref_pattern: Regex,
}

/// Register operands must never be reported as call targets.
fn is_register(name: &str) -> bool {
    matches!(name, "sp" | "lr" | "pc" | "ip")
        || (name.starts_with('r') && name[1..].chars().all(|c| c.is_ascii_digit()) && name.len() > 1)
}

impl ArmGrammar {
    pub fn new() -> Self {
        Self {
            start_pattern: Regex::new(r"^(?:thumb_func_start|arm_func_start)\s+([A-Za-z_][A-Za-z0-9_]*)")
                .unwrap(),
            end_pattern: Regex::new(r"^(?:thumb_func_end|arm_func_end)\s+([A-Za-z_][A-Za-z0-9_]*)")
                .unwrap(),
            // Optional leading pool label, e.g. `_08003F40: .4byte gTable`
            data_pattern: Regex::new(r"^(?:[A-Za-z_.][\w.]*:\s*)?\.(?:4byte|2byte|byte|word|hword|ascii|asciz)\b")
                .unwrap(),
            align_pattern: Regex::new(r"^\.(?:align|balign)\b").unwrap(),
            return_pattern: Regex::new(r"^(?:pop\s+\{[^}]*\bpc\b[^}]*\}|bx\s+(?:lr|r\d+)\b)")
                .unwrap(),
            instruction_pattern: Regex::new(r"(?i)^(?:[A-Za-z_.][\w.]*:\s+)?[a-z][a-z0-9.]*(?:\s|$)")
                .unwrap(),
            call_pattern: Regex::new(r"\bblx?\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
            ref_pattern: Regex::new(r"\b(?:ldr|mov)\s+\w+,\s*=([A-Za-z_][A-Za-z0-9_]*)").unwrap(),
        }
    }
}

impl Default for ArmGrammar {
    fn default() -> Self {
        Self::new()
    }
}

impl Grammar for ArmGrammar {
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
        false
    }

    fn is_instruction(&self, line: &str) -> bool {
        !line.starts_with('.')
            && !super::is_bare_label(line)
            && self.start_name(line).is_none()
            && self.end_name(line).is_none()
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
    fn test_split_with_end_marker() {
        let src = "\
\tthumb_func_start Foo
Foo:
\tpush {lr}
\tbl Bar
\tpop {pc}
\tthumb_func_end Foo
";
        let funcs = Arch::Arm.split_functions(src);
        assert_eq!(funcs.len(), 1);
        assert_eq!(funcs[0].name, "Foo");
        assert!(funcs[0].body.contains("push {lr}"));
        assert!(
            !funcs[0].body.contains("thumb_func_end"),
            "end marker is not body text"
        );
    }

    #[test]
    fn test_inferred_end_includes_constant_pool() {
        // Pop-and-return followed by two 4-byte pool entries and no end
        // marker: both data lines belong to the body, the next function's
        // start marker does not.
        let src = "\
\tthumb_func_start Walk
Walk:
\tpush {r4, lr}
\tldr r0, =gState
\tpop {r4, pc}
\t.align 2, 0
_08001234: .4byte gState
_08001238: .4byte 0x0000FFFF
\tthumb_func_start Next
Next:
\tbx lr
";
        let funcs = Arch::Arm.split_functions(src);
        assert_eq!(funcs.len(), 2);
        let walk = &funcs[0];
        assert!(walk.body.contains(".4byte gState"));
        assert!(walk.body.contains(".4byte 0x0000FFFF"));
        assert!(!walk.body.contains("thumb_func_start"));
        assert!(!walk.body.contains("Next"));
    }

    #[test]
    fn test_body_never_ends_on_alignment() {
        let src = "\
\tthumb_func_start Pad
Pad:
\tbx lr
\t.align 2, 0
";
        let funcs = Arch::Arm.split_functions(src);
        assert_eq!(funcs.len(), 1);
        assert!(funcs[0].body.trim_end().ends_with("bx lr"));
    }

    #[test]
    fn test_metadata_only_function_has_empty_body() {
        let src = "\
\tthumb_func_start Ghost
\t.align 2, 0
\tthumb_func_start Real
Real:
\tbx lr
";
        let funcs = Arch::Arm.split_functions(src);
        assert_eq!(funcs.len(), 2);
        assert_eq!(funcs[0].name, "Ghost");
        assert_eq!(funcs[0].body, "");
        assert_eq!(funcs[1].name, "Real");
    }

    #[test]
    fn test_extract_calls_branch_with_link() {
        let body = "\tpush {lr}\n\tbl target_func\n\tbl target_func\n\tpop {pc}\n";
        let calls = Arch::Arm.extract_calls(body);
        assert_eq!(calls, vec!["target_func"]);
    }

    #[test]
    fn test_extract_calls_immediate_load_references() {
        let body = "\tldr r0, =HandleInput\n\tldr r1, =0x04000000\n\tmov r2, =gUnknownTable\n";
        let calls = Arch::Arm.extract_calls(body);
        assert_eq!(calls, vec!["HandleInput", "gUnknownTable"]);
    }

    #[test]
    fn test_extract_calls_skips_registers_and_literals() {
        let body = "\tblx r3\n\tbx lr\n\tldr r0, =0xDEADBEEF\n\tbl sub_8001000\n";
        let calls = Arch::Arm.extract_calls(body);
        assert_eq!(calls, vec!["sub_8001000"]);
    }

    #[test]
    fn test_conditional_branches_are_not_calls() {
        let body = "\tbls _08001234\n\tblt _08001238\n\tble _0800123C\n";
        assert!(Arch::Arm.extract_calls(body).is_empty());
    }

    #[test]
    fn test_line_function_name() {
        assert_eq!(
            Arch::Arm.line_function_name("\tthumb_func_start MainLoop"),
            Some("MainLoop".to_string())
        );
        assert_eq!(
            Arch::Arm.line_function_name("\tarm_func_start IntrMain"),
            Some("IntrMain".to_string())
        );
        assert_eq!(Arch::Arm.line_function_name("\tmov r0, r1"), None);
    }
}
