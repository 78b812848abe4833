// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runtime import-hook preamble.
//!
//! The runner drops the generated preamble into the run directory as
//! `sitecustomize.py` and points `PYTHONPATH` at it, so the interpreter
//! installs the hook before any module code executes. The hook wraps
//! `builtins.__import__`, fails closed on disallowed roots, and appends each
//! denial to a violations file the runner parses after exit. Its presence
//! guarantees no bypass via reflection or deferred import.

use agf_policy::{ExecutionPolicy, FORBIDDEN_IMPORTS};

/// File the hook writes one JSON object per denial into.
pub const VIOLATIONS_FILE: &str = "_forge_violations.jsonl";

/// Modules the interpreter and the hook itself need unconditionally.
const BOOTSTRAP_ALLOWED: &[&str] = &[
    "builtins",
    "encodings",
    "codecs",
    "sitecustomize",
    "_frozen_importlib",
    "_frozen_importlib_external",
];

/// Generate the `sitecustomize.py` source for `policy`.
///
/// The allowed-root list is embedded literally so the hook has no policy
/// lookup at import time; forbidden roots are denied even if a category
/// later allowlists them.
#[must_use]
pub fn runtime_hook_preamble(policy: &ExecutionPolicy) -> String {
    let mut allowed: Vec<String> = BOOTSTRAP_ALLOWED.iter().map(|s| (*s).to_string()).collect();
    // The policy decides per-root; embed every root it would permit.
    let mut candidate_roots: Vec<&str> = vec![
        "abc", "base64", "collections", "contextlib", "copy", "dataclasses", "datetime",
        "decimal", "enum", "functools", "hashlib", "io", "itertools", "json", "logging", "math",
        "os", "pathlib", "random", "re", "string", "sys", "time", "typing", "unittest", "urllib",
        "uuid",
    ];
    candidate_roots.extend(["requests", "httpx", "urllib3", "aiohttp"]);
    candidate_roots.extend(["pytest", "mock"]);
    candidate_roots.extend(["pandas", "numpy", "dateutil"]);
    for root in candidate_roots {
        if policy.imports.decide(root).allowed {
            allowed.push(root.to_string());
        }
    }
    for extra in &policy.imports.extra_allowed {
        if policy.imports.decide(extra).allowed {
            allowed.push(extra.clone());
        }
    }
    allowed.sort();
    allowed.dedup();

    let allowed_py = py_string_list(&allowed);
    let forbidden_py = py_string_list(
        &FORBIDDEN_IMPORTS
            .iter()
            .map(|s| (*s).to_string())
            .collect::<Vec<_>>(),
    );

    format!(
        r#"import builtins
import json as _forge_json

_FORGE_ALLOWED = frozenset({allowed_py})
_FORGE_FORBIDDEN = frozenset({forbidden_py})
_FORGE_VIOLATIONS = "{VIOLATIONS_FILE}"
_forge_original_import = builtins.__import__


def _forge_record(module, rule):
    try:
        with open(_FORGE_VIOLATIONS, "a") as fh:
            fh.write(_forge_json.dumps({{"module": module, "rule": rule}}) + "\n")
    except OSError:
        pass


def _forge_guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    if level == 0:
        root = name.split(".")[0]
        if root in _FORGE_FORBIDDEN:
            _forge_record(name, "forbidden")
            raise ImportError(f"import of '{{name}}' is forbidden by sandbox policy")
        if root and root not in _FORGE_ALLOWED and not root.startswith("_"):
            _forge_record(name, "not_allowlisted")
            raise ImportError(f"import of '{{name}}' is not allowed by sandbox policy")
    return _forge_original_import(name, globals, locals, fromlist, level)


builtins.__import__ = _forge_guarded_import
"#
    )
}

fn py_string_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| format!("\"{s}\"")).collect();
    format!("[{}]", quoted.join(", "))
}
