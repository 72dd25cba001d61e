//! Python dependency extraction.
//!
//! Reuses the same embedded interpreter the kernel uses to execute Python
//! cells: dependencies are discovered by calling into the standard library's
//! own `ast` module rather than re-implementing a Python grammar. This keeps
//! the extractor's notion of "valid Python" identical to the executor's.

use pyo3::prelude::*;
use pyo3::sync::GILOnceCell;

use crate::error::{Error, Result};

/// Walks the module body in source order, tracking top-level bindings as it
/// goes: a load of a name not yet bound contributes to `reads`, a top-level
/// store contributes to `writes`. Function/class defs contribute only their
/// own name to `writes` but are still walked for free-variable reads.
/// Comprehension and lambda targets are scoped locally and never escape as
/// either a read or a write.
const EXTRACTOR_SOURCE: &str = r#"
import ast


def _names_in_target(target, out):
    if isinstance(target, ast.Name):
        out.add(target.id)
    elif isinstance(target, (ast.Tuple, ast.List)):
        for elt in target.elts:
            _names_in_target(elt, out)
    elif isinstance(target, ast.Starred):
        _names_in_target(target.value, out)


def _walk_expr(node, bound, local, reads):
    if isinstance(node, ast.Name):
        if isinstance(node.ctx, ast.Load) and node.id not in bound and node.id not in local:
            reads.add(node.id)
        return
    if isinstance(node, ast.Lambda):
        inner = set(local)
        args = node.args
        for a in list(args.posonlyargs) + list(args.args) + list(args.kwonlyargs):
            inner.add(a.arg)
        if args.vararg:
            inner.add(args.vararg.arg)
        if args.kwarg:
            inner.add(args.kwarg.arg)
        _walk_expr(node.body, bound, inner, reads)
        return
    if isinstance(node, (ast.ListComp, ast.SetComp, ast.GeneratorExp, ast.DictComp)):
        inner = set(local)
        for gen in node.generators:
            _walk_expr(gen.iter, bound, local, reads)
            _names_in_target(gen.target, inner)
            for cond in gen.ifs:
                _walk_expr(cond, bound, inner, reads)
        if isinstance(node, ast.DictComp):
            _walk_expr(node.key, bound, inner, reads)
            _walk_expr(node.value, bound, inner, reads)
        else:
            _walk_expr(node.elt, bound, inner, reads)
        return
    for child in ast.iter_child_nodes(node):
        _walk_expr(child, bound, local, reads)


def _collect_target_names(node, out):
    if isinstance(node, (ast.FunctionDef, ast.AsyncFunctionDef, ast.ClassDef)):
        out.add(node.name)
        return
    if isinstance(node, ast.Lambda):
        return
    if isinstance(node, ast.Name) and isinstance(node.ctx, ast.Store):
        out.add(node.id)
        return
    if isinstance(node, (ast.Import, ast.ImportFrom)):
        for alias in node.names:
            out.add(alias.asname or alias.name.split(".")[0])
        return
    for child in ast.iter_child_nodes(node):
        _collect_target_names(child, out)


def _function_locals(fn):
    local = set()
    args = fn.args
    for a in list(args.posonlyargs) + list(args.args) + list(args.kwonlyargs):
        local.add(a.arg)
    if args.vararg:
        local.add(args.vararg.arg)
    if args.kwarg:
        local.add(args.kwarg.arg)
    for stmt in fn.body:
        _collect_target_names(stmt, local)
    return local


def _handle_target(target, bound, writes):
    if isinstance(target, ast.Name):
        bound.add(target.id)
        writes.add(target.id)
    elif isinstance(target, (ast.Tuple, ast.List)):
        for elt in target.elts:
            _handle_target(elt, bound, writes)
    elif isinstance(target, ast.Starred):
        _handle_target(target.value, bound, writes)
    # Attribute/Subscript targets mutate an existing object, not a new name.


def extract(code):
    tree = ast.parse(code)
    bound = set()
    reads = set()
    writes = set()

    for stmt in tree.body:
        if isinstance(stmt, ast.Assign):
            _walk_expr(stmt.value, bound, set(), reads)
            for target in stmt.targets:
                _handle_target(target, bound, writes)
        elif isinstance(stmt, ast.AugAssign):
            if isinstance(stmt.target, ast.Name):
                if stmt.target.id not in bound:
                    reads.add(stmt.target.id)
                _walk_expr(stmt.value, bound, set(), reads)
                bound.add(stmt.target.id)
                writes.add(stmt.target.id)
            else:
                _walk_expr(stmt.target, bound, set(), reads)
                _walk_expr(stmt.value, bound, set(), reads)
        elif isinstance(stmt, ast.AnnAssign):
            if stmt.value is not None:
                _walk_expr(stmt.value, bound, set(), reads)
            _handle_target(stmt.target, bound, writes)
        elif isinstance(stmt, (ast.FunctionDef, ast.AsyncFunctionDef)):
            bound.add(stmt.name)
            writes.add(stmt.name)
            local = _function_locals(stmt)
            for sub in stmt.body:
                _walk_expr(sub, bound, local, reads)
            for default in list(stmt.args.defaults) + [d for d in stmt.args.kw_defaults if d is not None]:
                _walk_expr(default, bound, set(), reads)
        elif isinstance(stmt, ast.ClassDef):
            bound.add(stmt.name)
            writes.add(stmt.name)
            for base in stmt.bases:
                _walk_expr(base, bound, set(), reads)
            local = set()
            for sub in stmt.body:
                _collect_target_names(sub, local)
            for sub in stmt.body:
                _walk_expr(sub, bound, local, reads)
        elif isinstance(stmt, (ast.Import, ast.ImportFrom)):
            for alias in stmt.names:
                name = alias.asname or alias.name.split(".")[0]
                bound.add(name)
                writes.add(name)
        elif isinstance(stmt, ast.Expr):
            _walk_expr(stmt.value, bound, set(), reads)
        else:
            # control flow (if/for/while/with/try/match): no new scope, so
            # names bound anywhere in it (loop/with targets, nested
            # assignments) become top-level writes and must already be in
            # `bound` before the body is walked, or a later use of the same
            # name within the block (e.g. a loop variable in its own body)
            # would be misread as a load of an unbound name.
            local = set()
            _collect_target_names(stmt, local)
            bound |= local
            writes |= local
            _walk_expr(stmt, bound, set(), reads)

    return sorted(reads), sorted(writes)
"#;

static EXTRACTOR_MODULE: GILOnceCell<Py<PyModule>> = GILOnceCell::new();

fn extractor_module(py: Python<'_>) -> PyResult<&Bound<'_, PyModule>> {
    let module = EXTRACTOR_MODULE.get_or_try_init(py, || {
        PyModule::from_code_bound(
            py,
            EXTRACTOR_SOURCE,
            "reactive_extractor.py",
            "reactive_extractor",
        )
        .map(|m| m.unbind())
    })?;
    Ok(module.bind(py))
}

/// Extracts `(reads, writes)` from a Python cell's source.
pub fn extract(code: &str) -> Result<(Vec<String>, Vec<String>)> {
    Python::with_gil(|py| {
        let module = extractor_module(py)
            .map_err(|e| Error::Extraction(format!("failed to load extractor module: {e}")))?;
        let func = module
            .getattr("extract")
            .map_err(|e| Error::Extraction(e.to_string()))?;
        let result = func
            .call1((code,))
            .map_err(|e| Error::Extraction(format!("{e}")))?;
        result
            .extract::<(Vec<String>, Vec<String>)>()
            .map_err(|e| Error::Extraction(format!("unexpected extractor result shape: {e}")))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_assignment_tracks_reads_and_writes() {
        pyo3::prepare_freethreaded_python();
        let (reads, writes) = extract("y = x * 2").unwrap();
        assert_eq!(reads, vec!["x".to_string()]);
        assert_eq!(writes, vec!["y".to_string()]);
    }

    #[test]
    fn self_referential_augmented_assignment_reads_and_writes_same_name() {
        pyo3::prepare_freethreaded_python();
        let (reads, writes) = extract("x = x + 1").unwrap();
        assert_eq!(reads, vec!["x".to_string()]);
        assert_eq!(writes, vec!["x".to_string()]);
    }

    #[test]
    fn comprehension_target_is_not_read_or_written() {
        pyo3::prepare_freethreaded_python();
        let (reads, writes) = extract("result = [i * scale for i in items]").unwrap();
        assert!(reads.contains(&"items".to_string()));
        assert!(reads.contains(&"scale".to_string()));
        assert!(!reads.contains(&"i".to_string()));
        assert!(!writes.contains(&"i".to_string()));
        assert_eq!(writes, vec!["result".to_string()]);
    }

    #[test]
    fn function_def_writes_only_its_own_name() {
        pyo3::prepare_freethreaded_python();
        let (reads, writes) = extract("def f(a):\n    return a + offset\n").unwrap();
        assert_eq!(writes, vec!["f".to_string()]);
        assert_eq!(reads, vec!["offset".to_string()]);
    }

    #[test]
    fn import_binds_top_level_package_name() {
        pyo3::prepare_freethreaded_python();
        let (reads, writes) = extract("import numpy as np").unwrap();
        assert!(reads.is_empty());
        assert_eq!(writes, vec!["np".to_string()]);
    }

    #[test]
    fn invalid_syntax_is_an_extraction_error() {
        pyo3::prepare_freethreaded_python();
        assert!(extract("def (").is_err());
    }
}
