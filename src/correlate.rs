//! Build-output correlation boundary.
//!
//! Phase 1 of indexing needs to answer: "given a function name and the
//! base name of the source module it was defined in, where is its built
//! assembly?" `BuildCorrelator` is that seam; `DirBuildCorrelator`
//! answers it from a build directory of `.s` files laid out to mirror the
//! source tree.
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::scanner::Arch;

/// A located assembly implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsmMatch {
    pub module_path: String,
    pub body: String,
}

pub trait BuildCorrelator: Send + Sync {
    /// Locate the assembly body of `function_name` built from the module
    /// named `module_base` (source file name without extension). Absent
    /// is a normal answer, not an error.
    fn lookup(&self, function_name: &str, module_base: &str) -> Result<Option<AsmMatch>>;
}

pub struct DirBuildCorrelator {
    build_dir: PathBuf,
    arch: Arch,
}

impl DirBuildCorrelator {
    pub fn new<P: Into<PathBuf>>(build_dir: P, arch: Arch) -> Self {
        Self {
            build_dir: build_dir.into(),
            arch,
        }
    }
}

impl BuildCorrelator for DirBuildCorrelator {
    fn lookup(&self, function_name: &str, module_base: &str) -> Result<Option<AsmMatch>> {
        let pattern = format!("{}/**/{}.s", self.build_dir.display(), module_base);
        let candidates = glob::glob(&pattern).context("invalid build glob pattern")?;

        for entry in candidates.flatten() {
            let content = std::fs::read_to_string(&entry)
                .with_context(|| format!("failed to read assembly module {}", entry.display()))?;

            // Cheap single-line probe before committing to a full parse.
            let declares_function = content
                .lines()
                .any(|line| self.arch.line_function_name(line).as_deref() == Some(function_name));
            if !declares_function {
                continue;
            }

            let module_path = entry.to_string_lossy().replace('\\', "/");
            for function in self.arch.split_functions(&content) {
                if function.name == function_name {
                    debug!("Correlated {function_name} to {module_path}");
                    return Ok(Some(AsmMatch {
                        module_path,
                        body: function.body,
                    }));
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_lookup_finds_function_in_matching_module() {
        let dir = tempdir().unwrap();
        let build = dir.path().join("build");
        fs::create_dir_all(build.join("engine")).unwrap();
        fs::write(
            build.join("engine").join("sprite.s"),
            "\tthumb_func_start UpdateSprite\nUpdateSprite:\n\tpush {lr}\n\tbl MoveSprite\n\tpop {pc}\n",
        )
        .unwrap();

        let correlator = DirBuildCorrelator::new(&build, Arch::Arm);
        let found = correlator.lookup("UpdateSprite", "sprite").unwrap().unwrap();
        assert!(found.module_path.ends_with("engine/sprite.s"));
        assert!(found.body.contains("bl MoveSprite"));
    }

    #[test]
    fn test_lookup_absent_is_none_not_error() {
        let dir = tempdir().unwrap();
        let correlator = DirBuildCorrelator::new(dir.path(), Arch::Arm);
        assert!(correlator.lookup("Missing", "nowhere").unwrap().is_none());

        // Module exists but does not define the function.
        fs::write(dir.path().join("other.s"), "\tthumb_func_start Other\n\tbx lr\n").unwrap();
        assert!(correlator.lookup("Missing", "other").unwrap().is_none());
    }
}
