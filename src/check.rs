use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::diagnostic::TypeError;
use crate::environment::{Environment, Type, literal_type};
use crate::heap::{ResolvedSignature, SourceHeap};
use crate::parse::{self, Assign, Define, ParsedSource, Span, Statement, TypeExpr};
use crate::path::{FileHandle, Qualifier};
use crate::scheduler::Scheduler;

/// Modules resolvable without a source file on disk.
const BUILTIN_MODULES: &[&str] = &["typing"];

/// Per-file `# type: ignore` suppressions, rebuilt from parsed sources on
/// every recheck that touches the file.
#[derive(Debug, Default)]
pub struct IgnoreRegistry {
    lines: HashMap<FileHandle, HashSet<usize>>,
}

impl IgnoreRegistry {
    pub fn register(&mut self, heap: &SourceHeap, handles: &[FileHandle]) {
        for handle in handles {
            let Some(source) = heap.get_source(handle) else {
                continue;
            };
            self.lines.insert(handle.clone(), source.ignore_lines.iter().copied().collect());
        }
    }

    pub fn is_ignored(&self, handle: &FileHandle, line: usize) -> bool {
        self.lines.get(handle).is_some_and(|lines| lines.contains(&line))
    }
}

/// Outcome of the parallel parse service.
pub struct ParseOutcome {
    /// Handles of files that parsed successfully, now resident in the heap.
    pub parsed: Vec<FileHandle>,
    /// Syntax diagnostics for files that did not.
    pub errors: Vec<TypeError>,
}

/// Parse a batch of files into the shared heap. Unreadable files parse as
/// empty text; files outside the source root are skipped.
pub fn parse_sources(
    scheduler: &Scheduler,
    heap: &SourceHeap,
    source_root: &Path,
    files: &[PathBuf],
) -> ParseOutcome {
    let handles: Vec<FileHandle> = files
        .iter()
        .filter_map(|file| FileHandle::create(file, source_root))
        .collect();
    let results = scheduler.map(&handles, |handle| {
        let text = std::fs::read_to_string(handle.to_path(source_root)).unwrap_or_default();
        match parse::parse_source(handle.clone(), &text) {
            Ok(source) => {
                heap.store(source);
                Ok(handle.clone())
            }
            Err(errors) => Err(errors
                .into_iter()
                .map(|error| {
                    TypeError::new(
                        handle.as_str(),
                        (error.line, error.column),
                        (error.line, error.column),
                        "parse-syntax",
                        error.message,
                    )
                })
                .collect::<Vec<_>>()),
        }
    });

    let mut outcome = ParseOutcome { parsed: Vec::new(), errors: Vec::new() };
    for result in results {
        match result {
            Ok(handle) => outcome.parsed.push(handle),
            Err(errors) => outcome.errors.extend(errors),
        }
    }
    outcome
}

/// Analyze a handle set against the environment. Workers read the heap and
/// environment and return plain diagnostics; nothing here mutates state.
pub fn analyze(
    scheduler: &Scheduler,
    environment: &Environment,
    heap: &SourceHeap,
    ignores: &IgnoreRegistry,
    handles: &[FileHandle],
) -> Vec<TypeError> {
    let per_file = scheduler.map(handles, |handle| {
        let Some(source) = heap.get_source(handle) else {
            return Vec::new();
        };
        let mut errors = check_source(environment, heap, &source);
        errors.retain(|error| !ignores.is_ignored(handle, error.line));
        errors
    });
    let mut errors: Vec<TypeError> = per_file.into_iter().flatten().collect();
    errors.sort_by(|a, b| {
        (&a.path, a.line, a.column).cmp(&(&b.path, b.line, b.column))
    });
    errors
}

fn check_source(
    environment: &Environment,
    heap: &SourceHeap,
    source: &ParsedSource,
) -> Vec<TypeError> {
    let mut checker = Checker {
        environment,
        heap,
        source,
        path: source.handle.as_str().to_string(),
        errors: Vec::new(),
    };
    checker.check_imports();
    checker.check_statements(&source.statements, None, true);
    checker.errors
}

struct Checker<'a> {
    environment: &'a Environment,
    heap: &'a SourceHeap,
    source: &'a ParsedSource,
    path: String,
    errors: Vec<TypeError>,
}

impl Checker<'_> {
    fn error(&mut self, span: Span, code: &str, message: String) {
        let position = self.source.offset_to_position(span.start);
        let stop = self.source.offset_to_position(span.end);
        self.errors.push(TypeError::new(&self.path, position, stop, code, message));
    }

    fn check_imports(&mut self) {
        for import in self.source.imports() {
            let qualifier = Qualifier::new(import.target.clone());
            if BUILTIN_MODULES.contains(&import.target.as_str()) {
                continue;
            }
            let Some(module) = self.environment.module_definition(&qualifier) else {
                self.error(
                    import.target_span,
                    "unresolved-import",
                    format!("Could not resolve module `{}`.", import.target),
                );
                continue;
            };
            for (name, span) in &import.names {
                if !module.globals.iter().any(|binding| &binding.name == name) {
                    self.error(
                        *span,
                        "unresolved-import",
                        format!("Module `{}` has no member `{name}`.", import.target),
                    );
                }
            }
        }
    }

    fn check_statements(
        &mut self,
        statements: &[Statement],
        return_annotation: Option<&Type>,
        top_level: bool,
    ) {
        for statement in statements {
            match statement {
                Statement::Assign(assign) => self.check_assign(assign),
                Statement::Define(define) => self.check_define(define, top_level),
                Statement::Class(class) => {
                    self.check_statements(&class.body, None, false);
                }
                Statement::Return(ret) => {
                    if let Some(declared) = return_annotation {
                        let value_type = ret
                            .value
                            .as_ref()
                            .map(|value| self.infer_value(&value.kind))
                            .unwrap_or_else(Type::none);
                        if !value_type.is_any()
                            && !self.environment.assignable(&value_type, declared)
                        {
                            self.error(
                                ret.span,
                                "incompatible-return",
                                format!(
                                    "Returned type `{value_type}` is not assignable to declared return type `{declared}`."
                                ),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn check_assign(&mut self, assign: &Assign) {
        let Some(annotation) = &assign.annotation else {
            return;
        };
        let Some(annotated) = self.validate_annotation(annotation) else {
            return;
        };
        if let Some(value) = &assign.value {
            let value_type = self.infer_value(&value.kind);
            if !value_type.is_any() && !self.environment.assignable(&value_type, &annotated) {
                self.error(
                    value.span,
                    "incompatible-assignment",
                    format!("Expression of type `{value_type}` is not assignable to `{annotated}`."),
                );
            }
        }
    }

    fn check_define(&mut self, define: &Define, top_level: bool) {
        let mut parameters = Vec::new();
        for parameter in &define.parameters {
            let resolved = match &parameter.annotation {
                Some(annotation) => self.validate_annotation(annotation).unwrap_or_else(Type::any),
                None => Type::any(),
            };
            parameters.push(resolved);
        }
        let return_type = match &define.return_annotation {
            Some(annotation) => self.validate_annotation(annotation),
            None => None,
        };
        if top_level {
            let key = format!("{}.{}", self.source.qualifier, define.name);
            self.heap.insert_define(
                key,
                ResolvedSignature {
                    parameters,
                    return_type: return_type.clone().unwrap_or_else(Type::none),
                },
            );
        }
        if !define.is_signature_only() {
            self.check_statements(&define.body, return_type.as_ref(), false);
        }
    }

    /// Value inference for the checked subset: literals type themselves, a
    /// constructor call yields an instance, and a call to a define with a
    /// memoized signature yields its return type.
    fn infer_value(&self, kind: &crate::parse::ExprKind) -> Type {
        if let crate::parse::ExprKind::Call { callee } = kind {
            if self.environment.class_definition(callee).is_some() {
                return Type::new(callee.clone());
            }
            let key = if callee.contains('.') {
                callee.clone()
            } else {
                format!("{}.{callee}", self.source.qualifier)
            };
            return self
                .heap
                .resolved_define(&key)
                .map(|signature| signature.return_type)
                .unwrap_or_else(Type::any);
        }
        literal_type(kind)
    }

    /// Resolve an annotation, reporting it when absent from the type order.
    fn validate_annotation(&mut self, annotation: &TypeExpr) -> Option<Type> {
        let resolved = self.environment.resolve_annotation(&annotation.name);
        if !self.environment.order().is_instantiated(&resolved) {
            self.error(
                annotation.span,
                "undefined-type",
                format!("Annotation `{}` is not defined.", annotation.name),
            );
            return None;
        }
        Some(resolved)
    }
}
