use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use serde::{Deserialize, Serialize};

use crate::parse::{ExprKind, ParsedSource, Statement};
use crate::path::{FileHandle, Qualifier};

/// A named type in the order. `typing.Any` and `$bottom` are distinguished
/// values: `Any` compares both ways (gradual typing), `$bottom` is the
/// result of meeting unrelated types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Type(String);

impl Type {
    pub fn new(name: impl Into<String>) -> Type {
        Type(name.into())
    }

    /// Parse a textual annotation into a type, normalizing `Any` spellings.
    pub fn parse(text: &str) -> Type {
        let text = text.trim();
        match text {
            "Any" | "typing.Any" => Type::any(),
            "NoneType" => Type::none(),
            _ => Type(text.to_string()),
        }
    }

    pub fn any() -> Type {
        Type("typing.Any".to_string())
    }

    pub fn object() -> Type {
        Type("object".to_string())
    }

    pub fn bottom() -> Type {
        Type("$bottom".to_string())
    }

    pub fn none() -> Type {
        Type("None".to_string())
    }

    pub fn is_any(&self) -> bool {
        self.0 == "typing.Any"
    }

    pub fn is_bottom(&self) -> bool {
        self.0 == "$bottom"
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The subtype lattice: builtins plus every declared class.
#[derive(Debug, Default)]
pub struct TypeOrder {
    /// Node → direct supertypes.
    parents: HashMap<String, Vec<String>>,
}

impl TypeOrder {
    fn with_builtins() -> TypeOrder {
        let mut order = TypeOrder::default();
        order.parents.insert("object".into(), vec![]);
        order.parents.insert("float".into(), vec!["object".into()]);
        order.parents.insert("int".into(), vec!["float".into()]);
        order.parents.insert("bool".into(), vec!["int".into()]);
        order.parents.insert("str".into(), vec!["object".into()]);
        order.parents.insert("None".into(), vec!["object".into()]);
        order
    }

    fn insert(&mut self, name: &str, bases: Vec<String>) {
        let bases = if bases.is_empty() { vec!["object".into()] } else { bases };
        self.parents.insert(name.to_string(), bases);
    }

    fn remove(&mut self, name: &str) {
        self.parents.remove(name);
    }

    /// Whether the type participates in the order at all.
    pub fn is_instantiated(&self, ty: &Type) -> bool {
        ty.is_any() || self.parents.contains_key(ty.name())
    }

    pub fn less_or_equal(&self, left: &Type, right: &Type) -> bool {
        if left.is_any() || right.is_any() || left.is_bottom() {
            return true;
        }
        if left == right {
            return true;
        }
        let mut queue = VecDeque::from([left.name()]);
        let mut seen = HashSet::new();
        while let Some(current) = queue.pop_front() {
            if current == right.name() {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(parents) = self.parents.get(current) {
                queue.extend(parents.iter().map(String::as_str));
            }
        }
        false
    }

    pub fn join(&self, left: &Type, right: &Type) -> Type {
        if left.is_any() || right.is_any() {
            return Type::any();
        }
        if self.less_or_equal(left, right) {
            return right.clone();
        }
        if self.less_or_equal(right, left) {
            return left.clone();
        }
        // First ancestor of `left` (in BFS order) that bounds `right`.
        for ancestor in self.ancestors(left.name()) {
            let candidate = Type::new(ancestor);
            if self.less_or_equal(right, &candidate) {
                return candidate;
            }
        }
        Type::object()
    }

    pub fn meet(&self, left: &Type, right: &Type) -> Type {
        if left.is_any() {
            return right.clone();
        }
        if right.is_any() {
            return left.clone();
        }
        if self.less_or_equal(left, right) {
            return left.clone();
        }
        if self.less_or_equal(right, left) {
            return right.clone();
        }
        Type::bottom()
    }

    /// Strict ancestors in breadth-first order, deduplicated.
    pub fn ancestors(&self, name: &str) -> Vec<String> {
        let mut queue: VecDeque<&str> =
            self.parents.get(name).map(|parents| parents.iter().map(String::as_str).collect()).unwrap_or_default();
        let mut seen: Vec<String> = Vec::new();
        while let Some(current) = queue.pop_front() {
            if seen.iter().any(|s| s == current) {
                continue;
            }
            seen.push(current.to_string());
            if let Some(parents) = self.parents.get(current) {
                queue.extend(parents.iter().map(String::as_str));
            }
        }
        seen
    }
}

/// Where a name was declared, for go-to-definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSite {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub stop_line: usize,
    pub stop_column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassAttribute {
    pub name: String,
    pub annotation: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMethod {
    pub name: String,
    /// All parameter types, receiver included.
    pub parameters: Vec<Type>,
    pub return_type: Type,
    pub signature_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDefinition {
    pub name: String,
    pub qualifier: Qualifier,
    pub handle: FileHandle,
    pub bases: Vec<String>,
    pub attributes: Vec<ClassAttribute>,
    pub methods: Vec<ClassMethod>,
    pub site: DefinitionSite,
}

/// A module-level binding: an assign target, define, or class name.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalBinding {
    pub name: String,
    pub annotation: Type,
    pub site: DefinitionSite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDefinition {
    pub qualifier: Qualifier,
    pub handle: FileHandle,
    pub imports: Vec<Qualifier>,
    /// Top-level define names, in declaration order.
    pub defines: Vec<String>,
    /// Class names declared by this module.
    pub classes: Vec<String>,
    pub globals: Vec<GlobalBinding>,
}

static NEXT_ENVIRONMENT_ID: AtomicU64 = AtomicU64::new(0);

/// Mutable index from module qualifier to definitions, dependency edges,
/// and the type order. Only the dispatcher thread mutates it; workers read.
#[derive(Debug)]
pub struct Environment {
    id: u64,
    modules: HashMap<Qualifier, ModuleDefinition>,
    classes: HashMap<String, ClassDefinition>,
    /// Imported qualifier → modules that import it.
    dependents: HashMap<Qualifier, HashSet<Qualifier>>,
    order: TypeOrder,
    protocols: HashSet<String>,
}

impl Default for Environment {
    fn default() -> Environment {
        Environment::new()
    }
}

impl Environment {
    pub fn new() -> Environment {
        Environment {
            id: NEXT_ENVIRONMENT_ID.fetch_add(1, Ordering::Relaxed),
            modules: HashMap::new(),
            classes: HashMap::new(),
            dependents: HashMap::new(),
            order: TypeOrder::with_builtins(),
            protocols: HashSet::new(),
        }
    }

    pub fn order(&self) -> &TypeOrder {
        &self.order
    }

    pub fn class_definition(&self, name: &str) -> Option<&ClassDefinition> {
        self.classes.get(name)
    }

    pub fn module_definition(&self, qualifier: &Qualifier) -> Option<&ModuleDefinition> {
        self.modules.get(qualifier)
    }

    /// The handle currently owning a qualifier, if any.
    pub fn module_owner(&self, qualifier: &Qualifier) -> Option<&FileHandle> {
        self.modules.get(qualifier).map(|module| &module.handle)
    }

    pub fn is_protocol(&self, class_name: &str) -> bool {
        self.protocols.contains(class_name)
    }

    /// Transitive set of modules that import `qualifier`.
    pub fn dependencies(&self, qualifier: &Qualifier) -> BTreeSet<Qualifier> {
        let mut result = BTreeSet::new();
        let mut queue = VecDeque::from([qualifier.clone()]);
        while let Some(current) = queue.pop_front() {
            if let Some(importers) = self.dependents.get(&current) {
                for importer in importers {
                    if result.insert(importer.clone()) {
                        queue.push_back(importer.clone());
                    }
                }
            }
        }
        result
    }

    /// Index a batch of parsed sources. Class nodes are registered before
    /// base edges so intra-batch references resolve.
    pub fn populate(&mut self, sources: &[Arc<ParsedSource>]) {
        for source in sources {
            for class in source.classes() {
                self.order.insert(&class.name, vec![]);
            }
        }
        for source in sources {
            let module = self.index_module(source);
            for import in &module.imports {
                self.dependents
                    .entry(import.clone())
                    .or_default()
                    .insert(module.qualifier.clone());
            }
            self.modules.insert(module.qualifier.clone(), module);
        }
    }

    fn index_module(&mut self, source: &ParsedSource) -> ModuleDefinition {
        let path = source.handle.as_str().to_string();
        let mut module = ModuleDefinition {
            qualifier: source.qualifier.clone(),
            handle: source.handle.clone(),
            imports: source.imports().map(|import| Qualifier::new(import.target.clone())).collect(),
            defines: Vec::new(),
            classes: Vec::new(),
            globals: Vec::new(),
        };
        for statement in &source.statements {
            match statement {
                Statement::Class(class) => {
                    let definition = self.index_class(source, &path, class);
                    let bases: Vec<String> = definition
                        .bases
                        .iter()
                        .filter(|base| self.order.parents.contains_key(*base))
                        .cloned()
                        .collect();
                    self.order.insert(&class.name, bases);
                    module.classes.push(class.name.clone());
                    module.globals.push(GlobalBinding {
                        name: class.name.clone(),
                        annotation: Type::new(format!("type[{}]", class.name)),
                        site: site(source, &path, class.name_span),
                    });
                    self.classes.insert(class.name.clone(), definition);
                }
                Statement::Define(define) => {
                    module.defines.push(define.name.clone());
                    module.globals.push(GlobalBinding {
                        name: define.name.clone(),
                        annotation: Type::new(render_callable(define)),
                        site: site(source, &path, define.name_span),
                    });
                }
                Statement::Assign(assign) => {
                    let annotation = assign
                        .annotation
                        .as_ref()
                        .map(|a| self.resolve_annotation(&a.name))
                        .or_else(|| assign.value.as_ref().map(|v| self.infer_constructed(&v.kind)))
                        .unwrap_or_else(Type::any);
                    module.globals.push(GlobalBinding {
                        name: assign.target.clone(),
                        annotation,
                        site: site(source, &path, assign.target_span),
                    });
                }
                _ => {}
            }
        }
        module
    }

    fn index_class(
        &self,
        source: &ParsedSource,
        path: &str,
        class: &crate::parse::ClassDef,
    ) -> ClassDefinition {
        let mut attributes = Vec::new();
        let mut methods = Vec::new();
        for statement in &class.body {
            match statement {
                Statement::Assign(assign) => {
                    let annotation = assign
                        .annotation
                        .as_ref()
                        .map(|a| self.resolve_annotation(&a.name))
                        .or_else(|| assign.value.as_ref().map(|v| self.infer_constructed(&v.kind)))
                        .unwrap_or_else(Type::any);
                    attributes.push(ClassAttribute { name: assign.target.clone(), annotation });
                }
                Statement::Define(define) => {
                    let parameters = define
                        .parameters
                        .iter()
                        .map(|parameter| {
                            parameter
                                .annotation
                                .as_ref()
                                .map(|a| self.resolve_annotation(&a.name))
                                .unwrap_or_else(Type::any)
                        })
                        .collect();
                    let return_type = define
                        .return_annotation
                        .as_ref()
                        .map(|a| self.resolve_annotation(&a.name))
                        .unwrap_or_else(Type::none);
                    methods.push(ClassMethod {
                        name: define.name.clone(),
                        parameters,
                        return_type,
                        signature_only: define.is_signature_only(),
                    });
                }
                _ => {}
            }
        }
        ClassDefinition {
            name: class.name.clone(),
            qualifier: source.qualifier.clone(),
            handle: source.handle.clone(),
            bases: class.bases.iter().map(|base| base.name.clone()).collect(),
            attributes,
            methods,
            site: site(source, path, class.name_span),
        }
    }

    /// Resolve an annotation name against the current order. Unknown names
    /// come back as-is so the checker can flag them.
    pub fn resolve_annotation(&self, name: &str) -> Type {
        Type::parse(name)
    }

    /// A constructor call produces an instance of the class; everything
    /// else falls back to the literal type.
    pub fn infer_constructed(&self, kind: &ExprKind) -> Type {
        match kind {
            ExprKind::Call { callee } if self.classes.contains_key(callee) => {
                Type::new(callee.clone())
            }
            other => literal_type(other),
        }
    }

    /// Assignability: the subtype order, widened by structural conformance
    /// to protocol classes (every required method name is implemented).
    pub fn assignable(&self, source: &Type, target: &Type) -> bool {
        if self.order.less_or_equal(source, target) {
            return true;
        }
        if !self.protocols.contains(target.name()) {
            return false;
        }
        let Some(protocol) = self.classes.get(target.name()) else {
            return false;
        };
        let Some(class) = self.classes.get(source.name()) else {
            return false;
        };
        protocol.methods.iter().all(|required| {
            class.methods.iter().any(|method| method.name == required.name)
        })
    }

    /// Drop every contribution of the given handles.
    pub fn purge(&mut self, handles: &[FileHandle]) {
        let handles: HashSet<&FileHandle> = handles.iter().collect();
        let qualifiers: Vec<Qualifier> = self
            .modules
            .values()
            .filter(|module| handles.contains(&module.handle))
            .map(|module| module.qualifier.clone())
            .collect();
        for qualifier in qualifiers {
            let Some(module) = self.modules.remove(&qualifier) else {
                continue;
            };
            for class_name in &module.classes {
                self.classes.remove(class_name);
                self.order.remove(class_name);
                self.protocols.remove(class_name);
            }
            for import in &module.imports {
                if let Some(importers) = self.dependents.get_mut(import) {
                    importers.remove(&qualifier);
                }
            }
        }
    }

    /// Recompute the protocol set for the named classes: a protocol is a
    /// class whose methods are all signature-only.
    pub fn infer_protocols(&mut self, class_names: impl IntoIterator<Item = String>) {
        for name in class_names {
            let Some(class) = self.classes.get(&name) else {
                self.protocols.remove(&name);
                continue;
            };
            let is_protocol =
                !class.methods.is_empty() && class.methods.iter().all(|method| method.signature_only);
            if is_protocol {
                self.protocols.insert(name);
            } else {
                self.protocols.remove(&name);
            }
        }
    }
}

fn site(source: &ParsedSource, path: &str, span: crate::parse::Span) -> DefinitionSite {
    let (line, column) = source.offset_to_position(span.start);
    let (stop_line, stop_column) = source.offset_to_position(span.end);
    DefinitionSite { path: path.to_string(), line, column, stop_line, stop_column }
}

/// Static type of a literal expression; `Any` where the subset cannot tell.
pub fn literal_type(kind: &ExprKind) -> Type {
    match kind {
        ExprKind::Integer(_) => Type::new("int"),
        ExprKind::Float(_) => Type::new("float"),
        ExprKind::Str(_) => Type::new("str"),
        ExprKind::Bool(_) => Type::new("bool"),
        ExprKind::None => Type::none(),
        ExprKind::Call { .. } | ExprKind::Name(_) | ExprKind::Opaque => Type::any(),
    }
}

fn render_callable(define: &crate::parse::Define) -> String {
    let parameters: Vec<String> = define
        .parameters
        .iter()
        .map(|parameter| {
            parameter
                .annotation
                .as_ref()
                .map(|a| Type::parse(&a.name).to_string())
                .unwrap_or_else(|| Type::any().to_string())
        })
        .collect();
    let return_type = define
        .return_annotation
        .as_ref()
        .map(|a| Type::parse(&a.name).to_string())
        .unwrap_or_else(|| Type::none().to_string());
    format!("({}) -> {}", parameters.join(", "), return_type)
}

type AttributeCache = Mutex<HashMap<(u64, String), Arc<Vec<String>>>>;

static ATTRIBUTE_CACHE: OnceLock<AttributeCache> = OnceLock::new();

fn attribute_cache() -> &'static AttributeCache {
    ATTRIBUTE_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Clear the process-wide class-attribute memo. Must run before every
/// repopulation.
pub fn clear_attribute_cache() {
    attribute_cache().lock().unwrap_or_else(|e| e.into_inner()).clear();
}

/// Rendered `name: type` attribute lines for a class, memoized process-wide.
pub fn class_attributes(environment: &Environment, class_name: &str) -> Option<Arc<Vec<String>>> {
    let key = (environment.id, class_name.to_string());
    {
        let cache = attribute_cache().lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = cache.get(&key) {
            return Some(Arc::clone(hit));
        }
    }
    let class = environment.class_definition(class_name)?;
    let rendered: Arc<Vec<String>> = Arc::new(
        class
            .attributes
            .iter()
            .map(|attribute| format!("{}: {}", attribute.name, attribute.annotation))
            .collect(),
    );
    attribute_cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .insert(key, Arc::clone(&rendered));
    Some(rendered)
}
