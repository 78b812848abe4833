// SPDX-License-Identifier: MIT OR Apache-2.0
//! Static import scanning for generated Python modules.
//!
//! The scanner walks source lines (tracking triple-quoted strings and
//! comments) and collects every import target with its line number. It runs
//! before any code executes; the runtime hook (see [`crate::hook`]) is the
//! second, fail-closed layer.

use agf_policy::{ExecutionPolicy, is_forbidden_import};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::{ImportViolation, ViolationLayer};

/// A single import statement found in source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportTarget {
    /// Dotted module path as written (`a.b.c`).
    pub module: String,
    /// 1-indexed source line.
    pub line: u32,
}

/// Collect every import target in `source`.
///
/// Handles `import a.b as c, d`, `from a.b import x, y`, comment stripping,
/// and skips content inside triple-quoted strings. Raw `__import__(` usage is
/// reported as a target named `__import__` so policy can reject it.
#[must_use]
pub fn collect_imports(source: &str) -> Vec<ImportTarget> {
    let mut targets = Vec::new();
    let mut in_triple: Option<&str> = None;

    for (idx, raw_line) in source.lines().enumerate() {
        let line_no = (idx + 1) as u32;
        let mut line = raw_line;

        // Triple-quoted string tracking. Good enough for generated code: we
        // only need to know whether the *start* of the line is inside one.
        if let Some(delim) = in_triple {
            match line.find(delim) {
                Some(pos) => {
                    line = &line[pos + 3..];
                    in_triple = None;
                }
                None => continue,
            }
        }
        let (code, opened) = strip_strings_and_comment(line);
        if let Some(delim) = opened {
            in_triple = Some(delim);
        }
        let trimmed = code.trim_start();

        if let Some(rest) = trimmed.strip_prefix("import ") {
            for part in rest.split(',') {
                let module = part.trim().split_whitespace().next().unwrap_or("");
                let module = module.split(" as ").next().unwrap_or(module);
                if !module.is_empty() {
                    targets.push(ImportTarget {
                        module: module.to_string(),
                        line: line_no,
                    });
                }
            }
        } else if let Some(rest) = trimmed.strip_prefix("from ") {
            if let Some(module) = rest.split_whitespace().next()
                && !module.is_empty()
                && !module.starts_with('.')
            {
                targets.push(ImportTarget {
                    module: module.to_string(),
                    line: line_no,
                });
            }
        }

        if code.contains("__import__(") {
            targets.push(ImportTarget {
                module: "__import__".to_string(),
                line: line_no,
            });
        }
    }

    targets
}

/// Remove `#` comments and the interiors of single-line strings; report a
/// triple-quote delimiter if one opens and does not close on this line.
fn strip_strings_and_comment(line: &str) -> (String, Option<&'static str>) {
    let mut out = String::with_capacity(line.len());
    let mut i = 0;
    while i < line.len() {
        let rest = &line[i..];
        if rest.starts_with("\"\"\"") || rest.starts_with("'''") {
            let delim: &'static str = if rest.starts_with("\"\"\"") { "\"\"\"" } else { "'''" };
            match rest[3..].find(delim) {
                Some(end) => {
                    i += 3 + end + 3;
                    continue;
                }
                None => return (out, Some(delim)),
            }
        }
        let Some(c) = rest.chars().next() else { break };
        match c {
            '#' => break,
            '"' | '\'' => {
                // Skip to the closing quote on the same line, honoring
                // backslash escapes. Unterminated strings swallow the rest.
                let mut close = None;
                let mut escaped = false;
                for (j, cj) in rest.char_indices().skip(1) {
                    if escaped {
                        escaped = false;
                        continue;
                    }
                    match cj {
                        '\\' => escaped = true,
                        _ if cj == c => {
                            close = Some(j);
                            break;
                        }
                        _ => {}
                    }
                }
                match close {
                    Some(j) => i += j + 1,
                    None => break,
                }
            }
            _ => {
                out.push(c);
                i += c.len_utf8();
            }
        }
    }
    (out, None)
}

/// Names importable locally from `dir`: stems of top-level `.py` files and
/// package directories (those containing `__init__.py`).
///
/// Imports of the module's own files are never policy violations.
#[must_use]
pub fn local_module_names(dir: &Path) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return names;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("py") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.insert(stem.to_string());
            }
        } else if path.is_dir()
            && path.join("__init__.py").is_file()
            && let Some(name) = path.file_name().and_then(|s| s.to_str())
        {
            names.insert(name.to_string());
        }
    }
    names
}

/// Check `source` against `policy`, returning one violation per disallowed
/// import target (with line numbers). Roots listed in `locals` (the module's
/// own files) are exempt.
#[must_use]
pub fn static_check_with_locals(
    source: &str,
    policy: &ExecutionPolicy,
    locals: &BTreeSet<String>,
) -> Vec<ImportViolation> {
    let mut violations = Vec::new();
    for target in collect_imports(source) {
        let root = target.module.split('.').next().unwrap_or(&target.module);
        if target.module != "__import__" && locals.contains(root) {
            continue;
        }
        if target.module == "__import__" {
            violations.push(ImportViolation {
                module: target.module,
                layer: ViolationLayer::Static,
                line: Some(target.line),
                rule: "raw __import__ indirection is forbidden".to_string(),
            });
            continue;
        }
        let decision = policy.imports.decide(&target.module);
        if !decision.allowed {
            violations.push(ImportViolation {
                module: target.module,
                layer: ViolationLayer::Static,
                line: Some(target.line),
                rule: decision.rule,
            });
        }
    }
    violations
}

/// [`static_check_with_locals`] with no local-module exemptions.
#[must_use]
pub fn static_check(source: &str, policy: &ExecutionPolicy) -> Vec<ImportViolation> {
    static_check_with_locals(source, policy, &BTreeSet::new())
}

/// Returns `true` when any import in `source` is on the forbidden list
/// (as opposed to merely outside the allowed categories).
#[must_use]
pub fn has_forbidden_import(source: &str) -> bool {
    collect_imports(source)
        .iter()
        .any(|t| t.module == "__import__" || is_forbidden_import(&t.module))
}

#[cfg(test)]
mod tests {
    use super::*;
    use agf_policy::ExecutionPolicy;

    #[test]
    fn collects_plain_and_dotted_imports() {
        let src = "import json\nimport os.path as p, sys\n";
        let targets = collect_imports(src);
        let modules: Vec<&str> = targets.iter().map(|t| t.module.as_str()).collect();
        assert_eq!(modules, vec!["json", "os.path", "sys"]);
        assert_eq!(targets[1].line, 2);
    }

    #[test]
    fn collects_from_imports() {
        let src = "from datetime import datetime, timezone\nfrom requests.adapters import HTTPAdapter\n";
        let modules: Vec<String> = collect_imports(src).into_iter().map(|t| t.module).collect();
        assert_eq!(modules, vec!["datetime", "requests.adapters"]);
    }

    #[test]
    fn relative_imports_are_skipped() {
        let src = "from . import helpers\nfrom .utils import x\n";
        assert!(collect_imports(src).is_empty());
    }

    #[test]
    fn comments_and_strings_are_not_imports() {
        let src = "# import subprocess\nx = 'import shutil'\ny = \"from ctypes import *\"\n";
        assert!(collect_imports(src).is_empty());
    }

    #[test]
    fn docstring_content_is_skipped() {
        let src = "\"\"\"module docs\nimport subprocess\nmore docs\n\"\"\"\nimport json\n";
        let modules: Vec<String> = collect_imports(src).into_iter().map(|t| t.module).collect();
        assert_eq!(modules, vec!["json"]);
    }

    #[test]
    fn non_ascii_content_is_handled() {
        let src = "x = 'météo — prévisions'\nimport json  # commentaire français\n";
        let modules: Vec<String> = collect_imports(src).into_iter().map(|t| t.module).collect();
        assert_eq!(modules, vec!["json"]);
    }

    #[test]
    fn dunder_import_is_flagged() {
        let src = "mod = __import__('subprocess')\n";
        let targets = collect_imports(src);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].module, "__import__");
    }

    #[test]
    fn static_check_reports_line_numbers() {
        let src = "import json\nimport subprocess\nfrom shutil import rmtree\n";
        let violations = static_check(src, &ExecutionPolicy::module_validation());
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0].module, "subprocess");
        assert_eq!(violations[0].line, Some(2));
        assert_eq!(violations[1].module, "shutil");
        assert_eq!(violations[1].line, Some(3));
        for v in &violations {
            assert_eq!(v.layer, ViolationLayer::Static);
        }
    }

    #[test]
    fn static_check_rejects_uncategorized_third_party() {
        let src = "import torch\n";
        let violations = static_check(src, &ExecutionPolicy::module_validation());
        assert_eq!(violations.len(), 1);
        assert!(violations[0].rule.contains("not in any allowed category"));
    }

    #[test]
    fn local_modules_are_exempt() {
        let mut locals = BTreeSet::new();
        locals.insert("adapter".to_string());
        let src = "from adapter import run\nimport torch\n";
        let violations =
            static_check_with_locals(src, &ExecutionPolicy::module_validation(), &locals);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].module, "torch");
    }

    #[test]
    fn local_module_names_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("adapter.py"), "x = 1\n").unwrap();
        std::fs::create_dir(dir.path().join("helpers")).unwrap();
        std::fs::write(dir.path().join("helpers/__init__.py"), "").unwrap();
        std::fs::create_dir(dir.path().join("not_a_package")).unwrap();

        let names = local_module_names(dir.path());
        assert!(names.contains("adapter"));
        assert!(names.contains("helpers"));
        assert!(!names.contains("not_a_package"));
    }

    #[test]
    fn has_forbidden_distinguishes_from_merely_disallowed() {
        assert!(has_forbidden_import("import subprocess\n"));
        assert!(has_forbidden_import("x = __import__('os')\n"));
        assert!(!has_forbidden_import("import torch\n"));
        assert!(!has_forbidden_import("import json\n"));
    }
}
