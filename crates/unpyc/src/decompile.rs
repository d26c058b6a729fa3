//! Top-level driver: .pyc bytes in, Python source text out.
//!
//! Parse-time errors are fatal and returned to the caller. Simulation
//! errors degrade only the code object they occur in: the driver emits a
//! commented marker in its place and keeps going.

use std::sync::Arc;

use crate::code::CodeObject;
use crate::codegen::generate_module;
use crate::errors::{Diagnostic, LoadResult};
use crate::marshal::parse_pyc;
use crate::recover::recover_module;
use crate::version::Version;

/// The result of decompiling one .pyc buffer.
#[derive(Debug)]
pub struct Decompilation {
    pub version: Version,
    /// Reconstructed source, UTF-8, LF line endings.
    pub source: String,
    /// Best-effort notes accumulated across all code objects.
    pub diagnostics: Vec<Diagnostic>,
}

/// Decompiles a whole .pyc buffer.
pub fn decompile(data: &[u8]) -> LoadResult<Decompilation> {
    let pyc = parse_pyc(data)?;
    Ok(decompile_code(pyc.version, &pyc.code))
}

/// Decompiles an already-parsed module code object.
#[must_use]
pub fn decompile_code(version: Version, code: &CodeObject) -> Decompilation {
    match recover_module(version, code) {
        Ok(recovered) => Decompilation {
            version,
            source: generate_module(&recovered.body),
            diagnostics: recovered.diagnostics,
        },
        Err(error) => {
            log::warn!("decompilation of {} failed: {error}", code.name);
            Decompilation {
                version,
                source: format!("# decompilation failed: {error}\n"),
                diagnostics: vec![Diagnostic::new(error.offset(), error.to_string())],
            }
        }
    }
}

/// Flattens a code-object tree in definition order, outermost first.
#[must_use]
pub fn all_code_objects(root: &Arc<CodeObject>) -> Vec<Arc<CodeObject>> {
    let mut out = Vec::new();
    let mut queue = vec![Arc::clone(root)];
    while let Some(code) = queue.pop() {
        for constant in &code.consts {
            if let Some(nested) = constant.as_code() {
                queue.push(Arc::clone(nested));
            }
        }
        out.push(code);
    }
    out.sort_by_key(|code| code.firstlineno);
    out
}
