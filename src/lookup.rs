use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use crate::environment::{DefinitionSite, Environment, GlobalBinding, Type, literal_type};
use crate::heap::SourceHeap;
use crate::parse::{self, Expr, ExprKind, ParsedSource, Span, Statement};
use crate::path::{FileHandle, Qualifier};

/// Position-indexed answers for one file: "type at location" and
/// "definition at location". Positions are 1-based (line, byte column).
#[derive(Debug)]
pub struct LookupTable {
    annotations: Vec<(Span, Type)>,
    definitions: Vec<(Span, DefinitionSite)>,
    line_starts: Vec<usize>,
}

impl LookupTable {
    /// Build the table for a parsed source against the current environment.
    /// `text` is the file content the positions will be resolved against.
    pub fn create_of_source(
        environment: &Environment,
        source: &ParsedSource,
        text: &str,
    ) -> LookupTable {
        let mut builder = TableBuilder {
            environment,
            source,
            bindings: local_bindings(environment, source),
            annotations: Vec::new(),
            definitions: Vec::new(),
        };
        builder.index_imports();
        builder.index_statements(&source.statements);
        LookupTable {
            annotations: builder.annotations,
            definitions: builder.definitions,
            line_starts: parse::compute_line_starts(text),
        }
    }

    fn offset(&self, line: usize, column: usize) -> Option<usize> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        Some(start + column.saturating_sub(1))
    }

    pub fn get_annotation(&self, line: usize, column: usize) -> Option<Type> {
        let offset = self.offset(line, column)?;
        smallest_covering(&self.annotations, offset).cloned()
    }

    pub fn get_definition(&self, line: usize, column: usize) -> Option<DefinitionSite> {
        let offset = self.offset(line, column)?;
        smallest_covering(&self.definitions, offset).cloned()
    }
}

fn smallest_covering<T>(entries: &[(Span, T)], offset: usize) -> Option<&T> {
    entries
        .iter()
        .filter(|(span, _)| span.contains(offset))
        .min_by_key(|(span, _)| span.len())
        .map(|(_, value)| value)
}

/// Name → (type, definition site) visible at module scope: this module's
/// globals plus anything pulled in by `from` imports.
fn local_bindings(
    environment: &Environment,
    source: &ParsedSource,
) -> HashMap<String, (Type, DefinitionSite)> {
    let mut bindings = HashMap::new();
    let install = |bindings: &mut HashMap<String, (Type, DefinitionSite)>, global: &GlobalBinding| {
        bindings.insert(global.name.clone(), (global.annotation.clone(), global.site.clone()));
    };
    if let Some(module) = environment.module_definition(&source.qualifier) {
        for global in &module.globals {
            install(&mut bindings, global);
        }
    }
    for import in source.imports() {
        let Some(module) = environment.module_definition(&Qualifier::new(import.target.clone()))
        else {
            continue;
        };
        for (name, _) in &import.names {
            if let Some(global) = module.globals.iter().find(|global| &global.name == name) {
                install(&mut bindings, global);
            }
        }
    }
    bindings
}

struct TableBuilder<'a> {
    environment: &'a Environment,
    source: &'a ParsedSource,
    bindings: HashMap<String, (Type, DefinitionSite)>,
    annotations: Vec<(Span, Type)>,
    definitions: Vec<(Span, DefinitionSite)>,
}

impl TableBuilder<'_> {
    fn index_imports(&mut self) {
        for import in self.source.imports() {
            let qualifier = Qualifier::new(import.target.clone());
            let Some(module) = self.environment.module_definition(&qualifier) else {
                continue;
            };
            let module_site = DefinitionSite {
                path: module.handle.as_str().to_string(),
                line: 1,
                column: 1,
                stop_line: 1,
                stop_column: 1,
            };
            self.definitions.push((import.target_span, module_site));
            for (name, span) in &import.names {
                if let Some(global) = module.globals.iter().find(|global| &global.name == name) {
                    self.definitions.push((*span, global.site.clone()));
                    self.annotations.push((*span, global.annotation.clone()));
                }
            }
        }
    }

    fn index_statements(&mut self, statements: &[Statement]) {
        for statement in statements {
            match statement {
                Statement::Assign(assign) => {
                    let annotated = assign
                        .annotation
                        .as_ref()
                        .map(|a| self.environment.resolve_annotation(&a.name));
                    if let Some(annotation) = &assign.annotation {
                        let resolved = self.environment.resolve_annotation(&annotation.name);
                        self.annotations.push((annotation.span, resolved));
                    }
                    let bound = annotated
                        .filter(|ty| self.environment.order().is_instantiated(ty))
                        .or_else(|| {
                            assign.value.as_ref().map(|v| self.environment.infer_constructed(&v.kind))
                        });
                    if let Some(ty) = bound {
                        self.annotations.push((assign.target_span, ty));
                    }
                    if let Some(value) = &assign.value {
                        self.index_expression(value);
                    }
                }
                Statement::Define(define) => {
                    for parameter in &define.parameters {
                        if let Some(annotation) = &parameter.annotation {
                            let resolved = self.environment.resolve_annotation(&annotation.name);
                            self.annotations.push((annotation.span, resolved.clone()));
                            self.annotations.push((parameter.name_span, resolved));
                        }
                    }
                    if let Some(annotation) = &define.return_annotation {
                        let resolved = self.environment.resolve_annotation(&annotation.name);
                        self.annotations.push((annotation.span, resolved));
                    }
                    if let Some((ty, site)) = self.bindings.get(&define.name) {
                        self.annotations.push((define.name_span, ty.clone()));
                        self.definitions.push((define.name_span, site.clone()));
                    }
                    self.index_statements(&define.body);
                }
                Statement::Class(class) => {
                    if let Some((ty, site)) = self.bindings.get(&class.name) {
                        self.annotations.push((class.name_span, ty.clone()));
                        self.definitions.push((class.name_span, site.clone()));
                    }
                    self.index_statements(&class.body);
                }
                Statement::Return(ret) => {
                    if let Some(value) = &ret.value {
                        self.index_expression(value);
                    }
                }
                Statement::Expression(expr) => self.index_expression(expr),
                _ => {}
            }
        }
    }

    fn index_expression(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Name(name) => {
                if let Some((ty, site)) = self.bindings.get(name) {
                    self.annotations.push((expr.span, ty.clone()));
                    self.definitions.push((expr.span, site.clone()));
                }
            }
            ExprKind::Call { callee } => {
                if let Some((ty, site)) = self.bindings.get(callee) {
                    // A constructor call reads as an instance of the class.
                    let annotation = if self.environment.class_definition(callee).is_some() {
                        Type::new(callee.clone())
                    } else {
                        ty.clone()
                    };
                    self.annotations.push((expr.span, annotation));
                    self.definitions.push((expr.span, site.clone()));
                }
            }
            _ => {
                self.annotations.push((expr.span, literal_type(&expr.kind)));
            }
        }
    }
}

/// A cached lookup table with the source text it was built from.
#[derive(Debug, Clone)]
pub struct LookupEntry {
    pub table: Arc<LookupTable>,
    pub source_text: Arc<str>,
}

/// Bounded memo from relative path to lookup entry. Entries are built
/// lazily on first read and evicted by the editing verbs; when full, the
/// oldest insertion goes first.
#[derive(Debug)]
pub struct LookupCache {
    entries: HashMap<String, LookupEntry>,
    insertion_order: VecDeque<String>,
    capacity: usize,
}

impl Default for LookupCache {
    fn default() -> LookupCache {
        LookupCache::new(64)
    }
}

impl LookupCache {
    pub fn new(capacity: usize) -> LookupCache {
        LookupCache {
            entries: HashMap::new(),
            insertion_order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, file: &Path, source_root: &Path) -> bool {
        FileHandle::create(file, source_root)
            .is_some_and(|handle| self.entries.contains_key(handle.as_str()))
    }

    /// Get or build the entry for `file`. Returns `None` when the path is
    /// outside the root or the heap has no parsed source for it (nothing is
    /// cached in that case).
    pub fn get(
        &mut self,
        file: &Path,
        source_root: &Path,
        environment: &Environment,
        heap: &SourceHeap,
    ) -> Option<LookupEntry> {
        let handle = FileHandle::create(file, source_root)?;
        if let Some(entry) = self.entries.get(handle.as_str()) {
            return Some(entry.clone());
        }
        let text = std::fs::read_to_string(handle.to_path(source_root)).unwrap_or_default();
        let source = heap.get_source(&handle)?;
        let table = LookupTable::create_of_source(environment, &source, &text);
        let entry = LookupEntry { table: Arc::new(table), source_text: Arc::from(text) };
        if self.entries.len() >= self.capacity
            && let Some(oldest) = self.insertion_order.pop_front()
        {
            self.entries.remove(&oldest);
        }
        self.insertion_order.push_back(handle.as_str().to_string());
        self.entries.insert(handle.as_str().to_string(), entry.clone());
        Some(entry)
    }

    pub fn evict(&mut self, file: &Path, source_root: &Path) {
        let Some(handle) = FileHandle::create(file, source_root) else {
            return;
        };
        if self.entries.remove(handle.as_str()).is_some() {
            self.insertion_order.retain(|path| path != handle.as_str());
        }
    }

    pub fn find_annotation(
        &mut self,
        file: &Path,
        position: (usize, usize),
        source_root: &Path,
        environment: &Environment,
        heap: &SourceHeap,
    ) -> Option<Type> {
        let entry = self.get(file, source_root, environment, heap)?;
        entry.table.get_annotation(position.0, position.1)
    }

    pub fn find_definition(
        &mut self,
        file: &Path,
        position: (usize, usize),
        source_root: &Path,
        environment: &Environment,
        heap: &SourceHeap,
    ) -> Option<DefinitionSite> {
        let entry = self.get(file, source_root, environment, heap)?;
        entry.table.get_definition(position.0, position.1)
    }
}
