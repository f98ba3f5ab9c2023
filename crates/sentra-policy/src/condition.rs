//! Condition compilation and the process-wide expression cache.
//!
//! Conditions are boolean expressions over three variables — `principal`,
//! `resource`, and `context` — each a mapping from string to dynamic value.
//! The engine behind them is a collaborator hidden by [`ConditionCompiler`];
//! the default implementation is a sandboxed Rhai engine created once and
//! reused for every compilation and evaluation.
//!
//! The [`ConditionCache`] memoizes compiled programs by source string: reads
//! take a shared lock, compilation takes the exclusive lock only to insert,
//! and evaluation never mutates the cache.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use rhai::{AST, Dynamic, Engine, Scope};
use sentra_core::validation::{IssueTag, ValidationIssue};
use sentra_core::{SentraError, SentraResult};

// =============================================================================
// Condition input
// =============================================================================

/// Variable bindings for one condition evaluation.
#[derive(Debug, Clone, Default)]
pub struct ConditionInput {
    /// Attributes of the acting principal.
    pub principal: serde_json::Map<String, serde_json::Value>,

    /// Attributes of the resource under authorization.
    pub resource: serde_json::Map<String, serde_json::Value>,

    /// Request-level attributes (time, ip, mfa, ...).
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl ConditionInput {
    /// Empty bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a principal attribute.
    #[must_use]
    pub fn with_principal(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.principal.insert(key.into(), value.into());
        self
    }

    /// Adds a resource attribute.
    #[must_use]
    pub fn with_resource(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.resource.insert(key.into(), value.into());
        self
    }

    /// Adds a context attribute.
    #[must_use]
    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Compiled condition
// =============================================================================

/// An opaque compiled condition program.
///
/// The program payload belongs to the compiler that produced it; callers only
/// carry it between [`ConditionCompiler::compile`] and
/// [`ConditionCompiler::evaluate`].
#[derive(Clone)]
pub struct CompiledCondition {
    source: String,
    program: Arc<dyn Any + Send + Sync>,
}

impl CompiledCondition {
    /// Wraps a compiler-specific program.
    #[must_use]
    pub fn new(source: impl Into<String>, program: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            source: source.into(),
            program,
        }
    }

    /// The expression source this program was compiled from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compiler-specific program payload.
    #[must_use]
    pub fn program(&self) -> &(dyn Any + Send + Sync) {
        self.program.as_ref()
    }
}

impl fmt::Debug for CompiledCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledCondition")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Compiler seam
// =============================================================================

/// Compiles and evaluates boolean condition expressions.
///
/// Implementations must accept a three-variable environment (`principal`,
/// `resource`, `context`), each variable a mapping from string to dynamic
/// value, and must reject programs that do not produce a boolean.
pub trait ConditionCompiler: Send + Sync {
    /// Compiles an expression source into an opaque program.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error tagged `cel` when the source does not
    /// compile.
    fn compile(&self, source: &str) -> SentraResult<CompiledCondition>;

    /// Evaluates a compiled program against the given bindings.
    ///
    /// # Errors
    ///
    /// Returns a `Validation` error tagged `cel` when evaluation fails or the
    /// result is not a boolean.
    fn evaluate(&self, condition: &CompiledCondition, input: &ConditionInput)
    -> SentraResult<bool>;
}

fn cel_issue(message: impl Into<String>) -> SentraError {
    SentraError::validation(vec![ValidationIssue::new(IssueTag::Cel, message)])
}

// =============================================================================
// Rhai compiler
// =============================================================================

/// Sandboxed Rhai implementation of [`ConditionCompiler`].
///
/// The engine is configured once with operation, depth, and size limits, and
/// reused for every compilation. Evaluations run against a fresh scope, so
/// concurrent evaluations never interfere.
pub struct RhaiCompiler {
    engine: Engine,
}

impl RhaiCompiler {
    /// Creates a compiler with the default sandbox limits.
    #[must_use]
    pub fn new() -> Self {
        let mut engine = Engine::new();

        engine.set_max_operations(10_000);
        engine.set_max_call_levels(16);
        engine.set_max_expr_depths(64, 64);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(1_000);
        engine.disable_symbol("eval");

        Self { engine }
    }
}

impl Default for RhaiCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionCompiler for RhaiCompiler {
    fn compile(&self, source: &str) -> SentraResult<CompiledCondition> {
        let ast = self
            .engine
            .compile_expression(source)
            .map_err(|e| cel_issue(format!("condition failed to compile: {e}")))?;
        Ok(CompiledCondition::new(source, Arc::new(ast)))
    }

    fn evaluate(
        &self,
        condition: &CompiledCondition,
        input: &ConditionInput,
    ) -> SentraResult<bool> {
        let ast = condition.program().downcast_ref::<AST>().ok_or_else(|| {
            SentraError::internal("condition program was produced by a different compiler")
        })?;

        let mut scope = Scope::new();
        scope.push_dynamic("principal", to_bindings(&input.principal)?);
        scope.push_dynamic("resource", to_bindings(&input.resource)?);
        scope.push_dynamic("context", to_bindings(&input.context)?);

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
            .map_err(|e| {
                cel_issue(format!(
                    "condition '{}' failed to evaluate: {e}",
                    condition.source()
                ))
            })?;

        result.as_bool().map_err(|actual| {
            cel_issue(format!(
                "condition '{}' evaluated to {actual}, expected bool",
                condition.source()
            ))
        })
    }
}

/// Converts a JSON attribute map into a Rhai map value.
fn to_bindings(map: &serde_json::Map<String, serde_json::Value>) -> SentraResult<Dynamic> {
    rhai::serde::to_dynamic(map)
        .map_err(|e| SentraError::internal(format!("failed to bind condition variables: {e}")))
}

// =============================================================================
// Expression cache
// =============================================================================

/// Process-wide cache of compiled condition programs, keyed by source.
pub struct ConditionCache {
    compiler: Arc<dyn ConditionCompiler>,
    programs: RwLock<HashMap<String, Arc<CompiledCondition>>>,
}

impl ConditionCache {
    /// Creates a cache over the given compiler.
    #[must_use]
    pub fn new(compiler: Arc<dyn ConditionCompiler>) -> Self {
        Self {
            compiler,
            programs: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a cache over the default Rhai compiler.
    #[must_use]
    pub fn rhai() -> Self {
        Self::new(Arc::new(RhaiCompiler::new()))
    }

    /// Returns the cached program for `source`, compiling on first use.
    ///
    /// # Errors
    ///
    /// Returns the compiler's error when the source does not compile; nothing
    /// is cached in that case.
    pub fn get_or_compile(&self, source: &str) -> SentraResult<Arc<CompiledCondition>> {
        {
            let programs = self.programs.read().unwrap();
            if let Some(program) = programs.get(source) {
                return Ok(Arc::clone(program));
            }
        }

        // Compile outside the lock; the exclusive lock is held only to insert.
        let compiled = Arc::new(self.compiler.compile(source)?);

        let mut programs = self.programs.write().unwrap();
        let entry = programs
            .entry(source.to_string())
            .or_insert_with(|| Arc::clone(&compiled));
        Ok(Arc::clone(entry))
    }

    /// Compiles and caches `source`, discarding the program.
    ///
    /// # Errors
    ///
    /// Returns the compiler's error when the source does not compile.
    pub fn prime(&self, source: &str) -> SentraResult<()> {
        self.get_or_compile(source).map(|_| ())
    }

    /// Evaluates `source` against `input`, compiling on first use.
    ///
    /// # Errors
    ///
    /// Returns compilation or evaluation errors from the compiler.
    pub fn evaluate(&self, source: &str, input: &ConditionInput) -> SentraResult<bool> {
        let program = self.get_or_compile(source)?;
        self.compiler.evaluate(&program, input)
    }

    /// Drops every cached program.
    pub fn clear(&self) {
        self.programs.write().unwrap().clear();
    }

    /// Number of cached programs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.programs.read().unwrap().len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.programs.read().unwrap().is_empty()
    }
}

impl fmt::Debug for ConditionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionCache")
            .field("programs", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_core::error::ErrorKind;

    fn cache() -> ConditionCache {
        ConditionCache::rhai()
    }

    #[test]
    fn test_compile_and_evaluate() {
        let cache = cache();
        let input = ConditionInput::new()
            .with_principal("role", "admin")
            .with_context("mfa", true);

        assert!(
            cache
                .evaluate(r#"principal.role == "admin" && context.mfa == true"#, &input)
                .unwrap()
        );
        assert!(
            !cache
                .evaluate(r#"principal.role == "auditor""#, &input)
                .unwrap()
        );
    }

    #[test]
    fn test_cache_memoizes_by_source() {
        let cache = cache();
        let first = cache.get_or_compile("context.ok == true").unwrap();
        let second = cache.get_or_compile("context.ok == true").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        cache.prime("context.ok == false").unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_compile_error_is_cel_tagged_and_not_cached() {
        let cache = cache();
        let err = cache.get_or_compile("1 +").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let issues = err.validation_issues().unwrap();
        assert_eq!(issues[0].tag, IssueTag::Cel);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_non_boolean_result_rejected() {
        let cache = cache();
        let err = cache
            .evaluate("1 + 1", &ConditionInput::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        // The source compiles fine, so the program stays cached.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evaluation_does_not_grow_cache() {
        let cache = cache();
        let input = ConditionInput::new().with_context("n", 1);
        for _ in 0..3 {
            assert!(cache.evaluate("context.n == 1", &input).unwrap());
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_clear() {
        let cache = cache();
        cache.prime("context.ok == true").unwrap();
        assert!(!cache.is_empty());
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_missing_attribute_reads_as_unit() {
        // Reading an absent map property yields (), which compares unequal
        // to every concrete value, so the condition is simply false.
        let cache = cache();
        assert!(
            !cache
                .evaluate("principal.absent == true", &ConditionInput::new())
                .unwrap()
        );
    }
}
