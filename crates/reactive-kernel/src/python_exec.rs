//! Python cell execution against a persistent namespace.
//!
//! Splits the trailing expression, captures stdout, maps the tail value (and
//! anything emitted via the display-override hooks) through the rich-output
//! bundle mapper, and turns any uncaught exception into formatted traceback
//! text. All of this lives in the embedded helper script below rather than
//! in Rust: duck-typing optional plotting libraries reads far more naturally
//! in Python, and it keeps this module a thin, testable shim.

use std::sync::LazyLock;

use pyo3::prelude::*;
use pyo3::types::PyDict;
use regex::Regex;

use reactive_core::{Error, Output, Result};

const HELPER_SOURCE: &str = r#"
import ast
import io
import json
import sys
import traceback

_outputs = []


def _emit(mime_type, data):
    _outputs.append({"mime_type": mime_type, "data": data})


def _install_overrides():
    try:
        import matplotlib
        matplotlib.use("Agg")
        import base64
        import matplotlib.pyplot as plt

        def _show(*args, **kwargs):
            for num in plt.get_fignums():
                fig = plt.figure(num)
                buf = io.BytesIO()
                fig.savefig(buf, format="png")
                _emit("image/png", base64.b64encode(buf.getvalue()).decode("ascii"))
                plt.close(fig)

        plt.show = _show
    except ImportError:
        pass

    try:
        import plotly.io as pio

        def _renderer(fig, *args, **kwargs):
            _emit("application/vnd.plotly.v1+json", json.loads(fig.to_json()))

        pio.show = _renderer
    except ImportError:
        pass

    try:
        import altair as alt

        def _display(self, *args, **kwargs):
            _emit("application/vnd.vegalite.v6+json", self.to_dict())

        alt.Chart.display = _display
    except ImportError:
        pass


_install_overrides()


def _figure_bundle(value):
    try:
        import base64
        import matplotlib.figure

        if isinstance(value, matplotlib.figure.Figure):
            buf = io.BytesIO()
            value.savefig(buf, format="png")
            return {"mime_type": "image/png", "data": base64.b64encode(buf.getvalue()).decode("ascii")}
    except ImportError:
        pass
    return None


def _plotly_bundle(value):
    try:
        import plotly.graph_objs as go

        if isinstance(value, go.Figure):
            return {"mime_type": "application/vnd.plotly.v1+json", "data": json.loads(value.to_json())}
    except ImportError:
        pass
    return None


def _altair_bundle(value):
    try:
        import altair as alt

        if isinstance(value, alt.TopLevelMixin):
            return {"mime_type": "application/vnd.vegalite.v6+json", "data": value.to_dict()}
    except ImportError:
        pass
    return None


def _table_bundle(value):
    try:
        import pandas as pd

        if isinstance(value, pd.DataFrame):
            frame = value.astype(object).where(pd.notnull(value), None)
            return {
                "mime_type": "application/json",
                "data": {
                    "type": "table",
                    "columns": [str(c) for c in value.columns],
                    "rows": frame.values.tolist(),
                },
            }
    except ImportError:
        pass
    return None


def _to_mime_bundle(value):
    for mapper in (_figure_bundle, _plotly_bundle, _altair_bundle, _table_bundle):
        bundle = mapper(value)
        if bundle is not None:
            return bundle
    return {"mime_type": "text/plain", "data": str(value)}


def run_cell(code, globals_dict):
    _outputs.clear()
    tree = ast.parse(code, mode="exec")
    body = tree.body
    tail_expr = None
    if body and isinstance(body[-1], ast.Expr):
        tail_expr = ast.Expression(body[-1].value)
        body = body[:-1]

    exec_module = ast.Module(body=body, type_ignores=[])
    ast.fix_missing_locations(exec_module)
    exec_code = compile(exec_module, "<cell>", "exec")
    eval_code = None
    if tail_expr is not None:
        ast.fix_missing_locations(tail_expr)
        eval_code = compile(tail_expr, "<cell>", "eval")

    buf = io.StringIO()
    old_stdout = sys.stdout
    sys.stdout = buf
    try:
        exec(exec_code, globals_dict)
        if eval_code is not None:
            value = eval(eval_code, globals_dict)
            if value is not None:
                _outputs.append(_to_mime_bundle(value))
        return buf.getvalue(), json.dumps(_outputs), None
    except Exception:
        return buf.getvalue(), json.dumps(_outputs), traceback.format_exc()
    finally:
        sys.stdout = old_stdout
"#;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static placeholder regex is valid")
});

/// The result of running a Python cell, with the user-code error (if any)
/// kept as plain text rather than surfaced as a framework `Error`.
pub struct ExecutionOutcome {
    pub stdout: String,
    pub outputs: Vec<Output>,
    pub error: Option<String>,
}

pub struct PythonExecutor {
    globals: Py<PyDict>,
    helper: Py<PyModule>,
}

impl PythonExecutor {
    pub fn new() -> Result<Self> {
        Python::with_gil(|py| {
            let globals = PyDict::new_bound(py);
            let helper =
                PyModule::from_code_bound(py, HELPER_SOURCE, "reactive_exec.py", "reactive_exec")
                    .map_err(|e| Error::Execution(format!("failed to load executor helper: {e}")))?;
            Ok(Self {
                globals: globals.unbind(),
                helper: helper.unbind(),
            })
        })
    }

    pub fn execute(&self, code: &str) -> ExecutionOutcome {
        Python::with_gil(|py| {
            let globals = self.globals.bind(py);
            let helper = self.helper.bind(py);
            let run = match helper.getattr("run_cell") {
                Ok(f) => f,
                Err(e) => {
                    return ExecutionOutcome {
                        stdout: String::new(),
                        outputs: Vec::new(),
                        error: Some(format!("internal executor error: {e}")),
                    };
                }
            };

            match run.call1((code, globals)) {
                Ok(result) => match result.extract::<(String, String, Option<String>)>() {
                    Ok((stdout, outputs_json, error)) => {
                        let outputs = serde_json::from_str::<Vec<Output>>(&outputs_json)
                            .unwrap_or_default();
                        ExecutionOutcome { stdout, outputs, error }
                    }
                    Err(e) => ExecutionOutcome {
                        stdout: String::new(),
                        outputs: Vec::new(),
                        error: Some(format!("internal executor error: unexpected result shape: {e}")),
                    },
                },
                Err(e) => ExecutionOutcome {
                    stdout: String::new(),
                    outputs: Vec::new(),
                    error: Some(format!("{e}")),
                },
            }
        })
    }

    /// Substitutes `{identifier}` placeholders in a SQL cell's text with the
    /// current namespace's bound values. A placeholder with no binding is an
    /// error, not silently left in place.
    pub fn substitute_sql(&self, template: &str) -> Result<String> {
        Python::with_gil(|py| {
            let globals = self.globals.bind(py);
            let mut failure = None;
            let substituted = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
                let name = &caps[1];
                match globals.get_item(name) {
                    Ok(Some(value)) => match python_value_to_sql_literal(&value) {
                        Ok(literal) => literal,
                        Err(e) => {
                            failure.get_or_insert(e);
                            String::new()
                        }
                    },
                    _ => {
                        failure.get_or_insert(Error::Execution(format!(
                            "undefined identifier in SQL template: {name}"
                        )));
                        String::new()
                    }
                }
            });

            match failure {
                Some(e) => Err(e),
                None => Ok(substituted.into_owned()),
            }
        })
    }
}

fn python_value_to_sql_literal(value: &Bound<'_, PyAny>) -> Result<String> {
    if value.is_none() {
        return Ok("NULL".to_string());
    }
    if let Ok(b) = value.extract::<bool>() {
        return Ok(if b { "TRUE".to_string() } else { "FALSE".to_string() });
    }
    if let Ok(i) = value.extract::<i64>() {
        return Ok(i.to_string());
    }
    if let Ok(f) = value.extract::<f64>() {
        return Ok(f.to_string());
    }
    if let Ok(s) = value.extract::<String>() {
        return Ok(format!("'{}'", s.replace('\'', "''")));
    }
    let rendered: String = value
        .str()
        .map_err(|e| Error::Execution(e.to_string()))?
        .extract()
        .map_err(|e: pyo3::PyErr| Error::Execution(e.to_string()))?;
    Ok(format!("'{}'", rendered.replace('\'', "''")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_expression_becomes_text_output() {
        pyo3::prepare_freethreaded_python();
        let exec = PythonExecutor::new().unwrap();
        let outcome = exec.execute("x = 10\nx * 2");
        assert!(outcome.error.is_none());
        assert_eq!(outcome.outputs.len(), 1);
    }

    #[test]
    fn namespace_persists_across_executions() {
        pyo3::prepare_freethreaded_python();
        let exec = PythonExecutor::new().unwrap();
        exec.execute("x = 10");
        let outcome = exec.execute("x * 2");
        assert!(outcome.error.is_none());
    }

    #[test]
    fn uncaught_exception_is_reported_as_error_text() {
        pyo3::prepare_freethreaded_python();
        let exec = PythonExecutor::new().unwrap();
        let outcome = exec.execute("raise ValueError('boom')");
        assert!(outcome.error.unwrap().contains("ValueError"));
    }

    #[test]
    fn stdout_is_captured_once() {
        pyo3::prepare_freethreaded_python();
        let exec = PythonExecutor::new().unwrap();
        let outcome = exec.execute("print('hello')");
        assert_eq!(outcome.stdout, "hello\n");
    }

    #[test]
    fn sql_substitution_reads_namespace() {
        pyo3::prepare_freethreaded_python();
        let exec = PythonExecutor::new().unwrap();
        exec.execute("user_id = 7");
        let sql = exec.substitute_sql("select * from t where id = {user_id}").unwrap();
        assert_eq!(sql, "select * from t where id = 7");
    }

    #[test]
    fn sql_substitution_rejects_missing_identifier() {
        pyo3::prepare_freethreaded_python();
        let exec = PythonExecutor::new().unwrap();
        assert!(exec.substitute_sql("select {missing}").is_err());
    }
}
