#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
use pyo3::prelude::*;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

mod ast;
mod compiler;
mod error;
mod parser;
mod token;
mod tokenizer;

pub use ast::{ComplexChoice, Conditional, Node, Segment, SimpleChoice};
pub use compiler::{CodeGenerator, CompileOptions};
pub use error::{Diagnostic, Error, Position};
pub use parser::parse;
pub use token::{Keyword, Token, TokenKind};
pub use tokenizer::tokenize;

/// Tokenizes and parses `source`. `name` only appears in diagnostics.
pub fn parse_source(source: &str, name: &str) -> Result<Vec<Segment>, Diagnostic> {
    let tokens = tokenize(source).map_err(|e| Diagnostic::new(name, e))?;
    parse(&tokens).map_err(|e| Diagnostic::new(name, e))
}

pub fn compile(source: &str, name: &str) -> Result<String, Diagnostic> {
    compile_with_options(source, name, CompileOptions::default())
}

pub fn compile_with_options(
    source: &str,
    name: &str,
    options: CompileOptions,
) -> Result<String, Diagnostic> {
    let segments = parse_source(source, name)?;
    CodeGenerator::with_options(options)
        .generate(&segments)
        .map_err(|e| Diagnostic::new(name, e))
}

/// The parsed segments as pretty-printed JSON, for callers that inspect the
/// structure rather than the generated code.
pub fn parse_to_json(source: &str, name: &str) -> Result<String, Diagnostic> {
    let segments = parse_source(source, name)?;
    serde_json::to_string_pretty(&segments)
        .map_err(|e| Diagnostic::new(name, Error::Internal(e.to_string())))
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
fn compile_text(text: String, name: String) -> PyResult<String> {
    compile(&text, &name)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pyfunction]
fn parse_text(text: String, name: String) -> PyResult<String> {
    parse_to_json(&text, &name)
        .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn init_logging() {
    // A second call finds the logger already installed; that is fine.
    let _ = console_log::init_with_level(log::Level::Debug);
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn compile_text_wasm(text: &str, name: &str) -> Result<String, JsValue> {
    compile(text, name).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn compile_text_with_options_wasm(
    text: &str,
    name: &str,
    indent_width: usize,
) -> Result<String, JsValue> {
    compile_with_options(text, name, CompileOptions { indent_width })
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn parse_text_wasm(text: &str, name: &str) -> Result<String, JsValue> {
    parse_to_json(text, name).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[cfg(all(feature = "python", not(target_arch = "wasm32")))]
#[pymodule]
fn yack_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(compile_text, m)?)?;
    m.add_function(wrap_pyfunction!(parse_text, m)?)?;
    Ok(())
}
