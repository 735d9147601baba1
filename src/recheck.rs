use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::check;
use crate::config::ServerConfig;
use crate::environment;
use crate::metrics;
use crate::parse::ParsedSource;
use crate::path::{FileHandle, Qualifier};
use crate::request::{Request, Response};
use crate::state::ServerState;

/// Reconcile the environment and error table with a set of changed files,
/// then re-analyze the `check` set.
///
/// `update` holds files whose source changed; `check` the files to analyze.
/// Ordering within a recheck is fixed: purge, parse stubs, parse sources,
/// populate, infer protocols, register ignores, clear stale resolution,
/// analyze, commit errors, union handles.
pub fn recheck(
    state: &mut ServerState,
    config: &ServerConfig,
    update: &[PathBuf],
    check: &[PathBuf],
) -> Response {
    let root = &config.source_root;

    let check_handles = resolve_unique(check, config);

    // Queue a recheck of everything that transitively imports an updated
    // module, minus what this request already checks.
    if !update.is_empty() {
        let checked: HashSet<&FileHandle> = check_handles.iter().collect();
        let mut dependents: BTreeSet<FileHandle> = BTreeSet::new();
        for file in update {
            let Some(handle) = FileHandle::create(file, root) else {
                continue;
            };
            for dependent in state.environment.dependencies(&handle.qualifier()) {
                if let Some(owner) = state.environment.module_owner(&dependent) {
                    dependents.insert(owner.clone());
                }
            }
        }
        let remainder: Vec<PathBuf> = dependents
            .iter()
            .filter(|handle| !checked.contains(handle))
            .map(|handle| handle.to_path(root))
            .collect();
        if !remainder.is_empty() {
            state.deferred_requests.push_front(Request::TypeCheck {
                update_environment_with: vec![],
                check: remainder,
            });
        }
    }

    let scheduler = state
        .scheduler
        .with_parallel(check.len() > config.parallel_threshold);
    state.scheduler = scheduler.clone();

    // Purge every trace of the updated files before re-parsing them.
    let update_handles = resolve_unique(update, config);
    state.heap.remove_paths(&update_handles);
    state.environment.purge(&update_handles);
    for file in update {
        state.lookups.evict(file, root);
    }
    environment::clear_attribute_cache();

    // Stubs parse first; a source shadowed by a stub (or by a prior source
    // under another relative root) is dropped.
    let (stub_files, source_files): (Vec<PathBuf>, Vec<PathBuf>) = update
        .iter()
        .cloned()
        .partition(|file| {
            FileHandle::create(file, root).is_some_and(|handle| handle.is_stub())
        });
    let stub_outcome = check::parse_sources(&scheduler, &state.heap, root, &stub_files);
    let stub_qualifiers: HashSet<Qualifier> =
        stub_outcome.parsed.iter().map(FileHandle::qualifier).collect();
    let source_files: Vec<PathBuf> = source_files
        .into_iter()
        .filter(|file| {
            let Some(handle) = FileHandle::create(file, root) else {
                return true;
            };
            let qualifier = handle.qualifier();
            if stub_qualifiers.contains(&qualifier) {
                return false;
            }
            match state.environment.module_owner(&qualifier) {
                Some(owner) => owner == &handle,
                None => true,
            }
        })
        .collect();
    let source_outcome = check::parse_sources(&scheduler, &state.heap, root, &source_files);

    let mut repopulated: Vec<FileHandle> = stub_outcome.parsed;
    repopulated.extend(source_outcome.parsed);
    let sources: Vec<Arc<ParsedSource>> = repopulated
        .iter()
        .filter_map(|handle| state.heap.get_source(handle))
        .collect();
    state.environment.populate(&sources);
    let class_keys: Vec<String> = sources
        .iter()
        .flat_map(|source| source.classes().map(|class| class.name.clone()))
        .collect();
    state.environment.infer_protocols(class_keys);
    metrics::shared_memory_size(state.heap.bytes());

    state.ignores.register(&state.heap, &repopulated);

    // Drop memoized signatures for the defines about to be re-analyzed.
    for handle in &check_handles {
        if let Some(source) = state.heap.get_source(handle) {
            let keys: Vec<String> = source
                .defines()
                .map(|define| format!("{}.{}", source.qualifier, define.name))
                .collect();
            state.heap.remove_defines(&keys);
        }
    }

    let mut new_errors = check::analyze(
        &scheduler,
        &state.environment,
        &state.heap,
        &state.ignores,
        &check_handles,
    );
    let checked: HashSet<&FileHandle> = check_handles.iter().collect();
    for parse_error in stub_outcome.errors.into_iter().chain(source_outcome.errors) {
        if checked.contains(&FileHandle::from_relative(&parse_error.path)) {
            new_errors.push(parse_error);
        }
    }

    // Error replacement is atomic per file: remove, then multi-insert.
    for handle in &check_handles {
        state.errors.insert(handle.clone(), Vec::new());
    }
    for error in new_errors {
        let handle = FileHandle::from_relative(&error.path);
        state.errors.entry(handle).or_default().push(error);
    }

    state.handles.extend(check_handles.iter().cloned());

    // The response key set is exactly the resolvable check set.
    let mut errors = BTreeMap::new();
    for handle in &check_handles {
        errors.insert(
            handle.as_str().to_string(),
            state.errors.get(handle).cloned().unwrap_or_default(),
        );
    }
    Response::TypeCheck { errors }
}

/// Resolve paths under the source root, deduplicating but keeping order.
fn resolve_unique(files: &[PathBuf], config: &ServerConfig) -> Vec<FileHandle> {
    let mut seen = HashSet::new();
    files
        .iter()
        .filter_map(|file| FileHandle::create(file, &config.source_root))
        .filter(|handle| seen.insert(handle.clone()))
        .collect()
}
