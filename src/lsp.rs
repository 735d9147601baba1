use std::path::{Path, PathBuf};

use lsp_types::{Hover, HoverContents, Location, MarkedString, Position, Range};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::environment::DefinitionSite;
use crate::rage;
use crate::recheck;
use crate::request::{ClientKind, Request, RequestId, Response, SourcePosition};
use crate::state::ServerState;

/// Handle a raw language-server envelope: parse it, and if it decodes to a
/// recognized inner request, dispatch it. Unrecognized payloads are logged
/// and dropped with no response.
pub fn process(state: &mut ServerState, config: &ServerConfig, json: &str) -> Option<Response> {
    let inner = parse_inner(json)?;
    handle_inner(state, config, inner)
}

/// Decode the inner request carried by a language-server envelope.
pub fn parse_inner(json: &str) -> Option<Request> {
    let message: Value = match serde_json::from_str(json) {
        Ok(message) => message,
        Err(e) => {
            warn!("unparseable language-server payload: {e}");
            return None;
        }
    };
    let method = message.get("method").and_then(Value::as_str)?;
    match method {
        "textDocument/definition" => {
            let (id, file, position) = document_position(&message)?;
            Some(Request::GetDefinition { id, file, position })
        }
        "textDocument/hover" => {
            let (id, file, position) = document_position(&message)?;
            Some(Request::Hover { id, file, position })
        }
        "textDocument/didOpen" => {
            Some(Request::OpenDocument { file: document_uri(&message)? })
        }
        "textDocument/didClose" => {
            Some(Request::CloseDocument { file: document_uri(&message)? })
        }
        "textDocument/didSave" => {
            Some(Request::SaveDocument { file: document_uri(&message)? })
        }
        "shutdown" => Some(Request::ClientShutdown { id: request_id(&message)? }),
        "exit" => Some(Request::ClientExit { client: ClientKind::Persistent }),
        "pyty/rage" => Some(Request::Rage { id: request_id(&message)? }),
        "pyty/typeCheck" => {
            let params = message.get("params");
            let paths = |key: &str| -> Vec<PathBuf> {
                params
                    .and_then(|params| params.get(key))
                    .and_then(Value::as_array)
                    .map(|values| {
                        values
                            .iter()
                            .filter_map(Value::as_str)
                            .map(PathBuf::from)
                            .collect()
                    })
                    .unwrap_or_default()
            };
            Some(Request::TypeCheck {
                update_environment_with: paths("update_environment_with"),
                check: paths("check"),
            })
        }
        other => {
            warn!("unrecognized language-server method `{other}`; dropping");
            None
        }
    }
}

/// Dispatch a request decoded from a language-server envelope.
fn handle_inner(
    state: &mut ServerState,
    config: &ServerConfig,
    request: Request,
) -> Option<Response> {
    match request {
        Request::TypeCheck { update_environment_with, check } => {
            Some(recheck::recheck(state, config, &update_environment_with, &check))
        }
        Request::ClientShutdown { id } => Some(shutdown_response(&id)),
        Request::ClientExit { client } => {
            info!(%client, "client exited");
            Some(Response::ClientExit { client })
        }
        Request::GetDefinition { id, file, position } => {
            let site = state.lookups.find_definition(
                &file,
                (position.line, position.column),
                &config.source_root,
                &state.environment,
                &state.heap,
            );
            Some(definition_response(&id, site.as_ref(), &config.source_root))
        }
        Request::Hover { id, file, position } => {
            let annotation = state.lookups.find_annotation(
                &file,
                (position.line, position.column),
                &config.source_root,
                &state.environment,
                &state.heap,
            );
            Some(hover_response(&id, annotation.map(|ty| ty.to_string())))
        }
        Request::Rage { id } => Some(rage_response(state, config, &id)),
        Request::OpenDocument { file } => {
            state.lookups.evict(&file, &config.source_root);
            state.lookups.get(&file, &config.source_root, &state.environment, &state.heap);
            None
        }
        Request::CloseDocument { file } => {
            state.lookups.evict(&file, &config.source_root);
            None
        }
        Request::SaveDocument { file } => {
            state.lookups.evict(&file, &config.source_root);
            if state.check_on_save() {
                let files = vec![file];
                Some(recheck::recheck(state, config, &files, &files))
            } else {
                None
            }
        }
        other => {
            warn!(kind = other.kind(), "request not valid inside a language-server envelope");
            None
        }
    }
}

pub fn shutdown_response(id: &RequestId) -> Response {
    envelope(id, Value::Null)
}

pub fn rage_response(state: &ServerState, config: &ServerConfig, id: &RequestId) -> Response {
    let report = rage::collect_report(state.started, config.log_file.as_deref());
    envelope(id, Value::String(report))
}

fn hover_response(id: &RequestId, contents: Option<String>) -> Response {
    // Absence is encoded by the envelope: a null result.
    let result = match contents {
        Some(value) => {
            let hover = Hover {
                contents: HoverContents::Scalar(MarkedString::String(value)),
                range: None,
            };
            serde_json::to_value(hover).unwrap_or(Value::Null)
        }
        None => Value::Null,
    };
    envelope(id, result)
}

fn definition_response(
    id: &RequestId,
    site: Option<&DefinitionSite>,
    source_root: &Path,
) -> Response {
    let result = site
        .and_then(|site| {
            let uri = path_to_uri(&source_root.join(&site.path))
                .parse::<lsp_types::Uri>()
                .ok()?;
            let location = Location::new(
                uri,
                Range::new(
                    Position::new(site.line as u32 - 1, site.column as u32 - 1),
                    Position::new(site.stop_line as u32 - 1, site.stop_column as u32 - 1),
                ),
            );
            serde_json::to_value(location).ok()
        })
        .unwrap_or(Value::Null);
    envelope(id, result)
}

fn envelope(id: &RequestId, result: Value) -> Response {
    let json = json!({
        "jsonrpc": "2.0",
        "id": id.to_json(),
        "result": result,
    });
    Response::LanguageServerProtocol { json: json.to_string() }
}

fn request_id(message: &Value) -> Option<RequestId> {
    serde_json::from_value(message.get("id")?.clone()).ok()
}

fn document_uri(message: &Value) -> Option<PathBuf> {
    let uri = message
        .get("params")?
        .get("textDocument")?
        .get("uri")?
        .as_str()?;
    uri_to_path(uri)
}

fn document_position(message: &Value) -> Option<(RequestId, PathBuf, SourcePosition)> {
    let id = request_id(message)?;
    let file = document_uri(message)?;
    let position = message.get("params")?.get("position")?;
    let line = position.get("line")?.as_u64()? as usize;
    let character = position.get("character")?.as_u64()? as usize;
    // LSP positions are 0-based; ours are 1-based.
    Some((id, file, SourcePosition { line: line + 1, column: character + 1 }))
}

fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://")?;
    Some(PathBuf::from(percent_decode(rest)))
}

pub fn path_to_uri(path: &Path) -> String {
    format!("file://{}", path.display().to_string().replace(' ', "%20"))
}

fn percent_decode(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let Ok(byte) = u8::from_str_radix(&text[i + 1..i + 3], 16)
        {
            decoded.push(byte);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hover_request() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 4,
            "method": "textDocument/hover",
            "params": {
                "textDocument": {"uri": "file:///work/a.py"},
                "position": {"line": 0, "character": 3}
            }
        }"#;
        let Some(Request::Hover { id, file, position }) = parse_inner(json) else {
            panic!("expected hover request");
        };
        assert_eq!(id, RequestId::Number(4));
        assert_eq!(file, PathBuf::from("/work/a.py"));
        assert_eq!(position, SourcePosition { line: 1, column: 4 });
    }

    #[test]
    fn parses_did_open() {
        let json = r#"{
            "jsonrpc": "2.0",
            "method": "textDocument/didOpen",
            "params": {"textDocument": {"uri": "file:///work/b%20c.py", "text": ""}}
        }"#;
        assert_eq!(
            parse_inner(json),
            Some(Request::OpenDocument { file: PathBuf::from("/work/b c.py") })
        );
    }

    #[test]
    fn unknown_method_is_dropped() {
        let json = r#"{"jsonrpc": "2.0", "id": 1, "method": "textDocument/rename", "params": {}}"#;
        assert_eq!(parse_inner(json), None);
    }

    #[test]
    fn shutdown_ack_echoes_id() {
        let Response::LanguageServerProtocol { json } =
            shutdown_response(&RequestId::String("s-1".into()))
        else {
            panic!("expected language-server response");
        };
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["id"], "s-1");
        assert_eq!(value["result"], Value::Null);
    }

    #[test]
    fn custom_type_check_carries_paths() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 9,
            "method": "pyty/typeCheck",
            "params": {"update_environment_with": ["a.py"], "check": ["a.py", "b.py"]}
        }"#;
        assert_eq!(
            parse_inner(json),
            Some(Request::TypeCheck {
                update_environment_with: vec![PathBuf::from("a.py")],
                check: vec![PathBuf::from("a.py"), PathBuf::from("b.py")],
            })
        );
    }
}
