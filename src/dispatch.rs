use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::heap::CollectMode;
use crate::lsp;
use crate::metrics;
use crate::path::FileHandle;
use crate::query;
use crate::recheck;
use crate::request::{Request, Response};
use crate::state::ServerState;

/// A request variant arrived at a layer that cannot service it. Fatal to
/// the request; every other fault is recovered in-band.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("request `{0}` cannot be serviced by the dispatcher")]
    InvalidRequest(&'static str),
}

/// Process one request against the server state, emitting zero or one
/// response. Reentrant in exactly one way: flushing deferred work folds
/// `process` over the queue.
pub fn process(
    state: &mut ServerState,
    config: &ServerConfig,
    request: Request,
) -> Result<Option<Response>, ServerError> {
    let kind = request.kind();
    let started = Instant::now();
    let result = dispatch(state, config, request);
    metrics::server_request(kind, started.elapsed());
    result
}

fn dispatch(
    state: &mut ServerState,
    config: &ServerConfig,
    request: Request,
) -> Result<Option<Response>, ServerError> {
    match request {
        Request::TypeCheck { update_environment_with, check } => {
            compact_shared_heap(state);
            Ok(Some(recheck::recheck(state, config, &update_environment_with, &check)))
        }
        Request::TypeQuery { query } => Ok(Some(query::handle_query(state, config, &query))),
        Request::DisplayTypeErrors { files } => {
            Ok(Some(display_cached_type_errors(state, config, &files)))
        }
        Request::FlushTypeErrors => {
            while let Some(deferred) = state.deferred_requests.pop_front() {
                process(state, config, deferred)?;
            }
            Ok(Some(display_cached_type_errors(state, config, &[])))
        }
        Request::Stop => {
            // The server loop writes the response, then tears the listener
            // down under the connections lock.
            state.shutdown_requested = true;
            Ok(Some(Response::Stop))
        }
        Request::LanguageServerProtocol { json } => Ok(lsp::process(state, config, &json)),
        Request::ClientShutdown { id } => Ok(Some(lsp::shutdown_response(&id))),
        Request::ClientExit { client } => {
            info!(%client, "client exited");
            Ok(Some(Response::ClientExit { client }))
        }
        Request::Rage { id } => Ok(Some(lsp::rage_response(state, config, &id))),
        Request::GetDefinition { .. }
        | Request::Hover { .. }
        | Request::OpenDocument { .. }
        | Request::CloseDocument { .. }
        | Request::SaveDocument { .. } => {
            warn!("editor request received outside a language-server envelope; dropping");
            Ok(None)
        }
        Request::ClientConnection => Err(ServerError::InvalidRequest("client_connection")),
    }
}

/// Cached errors for the requested files, or for everything when `files`
/// is empty. Requested-but-clean files appear with an empty list.
pub fn display_cached_type_errors(
    state: &ServerState,
    config: &ServerConfig,
    files: &[PathBuf],
) -> Response {
    let mut errors = BTreeMap::new();
    if files.is_empty() {
        for (handle, file_errors) in &state.errors {
            errors.insert(handle.as_str().to_string(), file_errors.clone());
        }
    } else {
        for file in files {
            let Some(handle) = FileHandle::create(file, &config.source_root) else {
                continue;
            };
            errors.insert(
                handle.as_str().to_string(),
                state.errors.get(&handle).cloned().unwrap_or_default(),
            );
        }
    }
    Response::TypeCheck { errors }
}

/// Aggressively collect the shared heap when more than half the budget is
/// in use. Runs before every top-level type-check request.
fn compact_shared_heap(state: &ServerState) {
    let ratio = state.heap.heap_use_ratio();
    if ratio > 0.5 {
        state.heap.collect(CollectMode::Aggressive);
        info!(
            target: "pyty::server",
            previous_ratio = ratio,
            new_ratio = state.heap.heap_use_ratio(),
            "compacted shared heap"
        );
    }
}
