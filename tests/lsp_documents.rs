mod common;

use common::{Fixture, file_uri, lsp_body};
use serde_json::json;

fn hover_request(uri: &str, line: u64, character: u64) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": 2,
        "method": "textDocument/hover",
        "params": {
            "textDocument": {"uri": uri},
            "position": {"line": line, "character": character}
        }
    })
}

fn notification(method: &str, uri: &str) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": {"textDocument": {"uri": uri}}
    })
}

/// Opening a document then hovering an identifier bound to `int` answers
/// with `contents = "int"`.
#[test]
fn hover_reports_the_bound_type() {
    let mut fx = Fixture::new();
    let path = fx.write("a.py", "x: int = 1\ny = x\n");
    fx.type_check(&["a.py"], &["a.py"]);
    let uri = file_uri(&path);

    assert_eq!(fx.lsp(notification("textDocument/didOpen", &uri)), None);
    // `x` on line 2 (0-based line 1, character 4).
    let body = lsp_body(fx.lsp(hover_request(&uri, 1, 4)));
    assert_eq!(body["id"], 2);
    assert_eq!(body["result"]["contents"], "int");
}

/// A position over structural text answers null, still LSP-shaped.
#[test]
fn hover_without_result_answers_null() {
    let mut fx = Fixture::new();
    let path = fx.write("a.py", "x: int = 1\n");
    fx.type_check(&["a.py"], &["a.py"]);
    let body = lsp_body(fx.lsp(hover_request(&file_uri(&path), 0, 1)));
    assert_eq!(body["result"], serde_json::Value::Null);
}

/// Go-to-definition on a name use points at its module-level binding.
#[test]
fn definition_points_at_the_binding() {
    let mut fx = Fixture::new();
    let path = fx.write("a.py", "x: int = 1\ny = x\n");
    fx.type_check(&["a.py"], &["a.py"]);

    let body = lsp_body(fx.lsp(json!({
        "jsonrpc": "2.0",
        "id": 3,
        "method": "textDocument/definition",
        "params": {
            "textDocument": {"uri": file_uri(&path)},
            "position": {"line": 1, "character": 4}
        }
    })));
    let result = &body["result"];
    assert!(result["uri"].as_str().unwrap().ends_with("a.py"));
    assert_eq!(result["range"]["start"]["line"], 0);
    assert_eq!(result["range"]["start"]["character"], 0);
}

/// Closing a document evicts its lookup entry.
#[test]
fn close_evicts_the_lookup_entry() {
    let mut fx = Fixture::new();
    let path = fx.write("a.py", "x: int = 1\n");
    fx.type_check(&["a.py"], &["a.py"]);
    let uri = file_uri(&path);

    fx.lsp(notification("textDocument/didOpen", &uri));
    assert!(fx.state.lookups.contains(&path, &fx.config.source_root));
    fx.lsp(notification("textDocument/didClose", &uri));
    assert!(!fx.state.lookups.contains(&path, &fx.config.source_root));
}

/// A recheck that updates a file leaves no stale lookup entry behind;
/// subsequent hovers rebuild against the new source.
#[test]
fn hover_rebuilds_after_recheck() {
    let mut fx = Fixture::new();
    let path = fx.write("a.py", "x: int = 1\ny = x\n");
    fx.type_check(&["a.py"], &["a.py"]);
    let uri = file_uri(&path);

    let body = lsp_body(fx.lsp(hover_request(&uri, 1, 4)));
    assert_eq!(body["result"]["contents"], "int");
    assert!(fx.state.lookups.contains(&path, &fx.config.source_root));

    fx.write("a.py", "x: str = \"s\"\ny = x\n");
    fx.type_check(&["a.py"], &["a.py"]);
    assert!(!fx.state.lookups.contains(&path, &fx.config.source_root));

    let body = lsp_body(fx.lsp(hover_request(&uri, 1, 4)));
    assert_eq!(body["result"]["contents"], "str");
}

/// With no file notifiers registered, a save evicts and rechecks the file,
/// replacing its previous diagnostics.
#[test]
fn save_rechecks_when_unwatched() {
    let mut fx = Fixture::new();
    let path = fx.write("a.py", "x: int = 1\n");
    fx.type_check(&["a.py"], &["a.py"]);
    assert!(fx.state.errors[&pyty::path::FileHandle::from_relative("a.py")].is_empty());

    fx.write("a.py", "x: int = \"broken\"\n");
    let response = fx.lsp(notification("textDocument/didSave", &file_uri(&path)));
    let Some(pyty::request::Response::TypeCheck { errors }) = response else {
        panic!("expected a type-check response, got {response:?}");
    };
    assert_eq!(errors["a.py"].len(), 1);
    assert_eq!(errors["a.py"][0].code, "incompatible-assignment");
    assert_eq!(
        fx.state.errors[&pyty::path::FileHandle::from_relative("a.py")].len(),
        1
    );
}

/// With an external watcher feeding updates, a save only evicts the cache.
#[test]
fn save_only_evicts_when_watched() {
    let mut fx = Fixture::new();
    let path = fx.write("a.py", "x: int = 1\n");
    fx.type_check(&["a.py"], &["a.py"]);
    let uri = file_uri(&path);
    fx.lsp(notification("textDocument/didOpen", &uri));
    assert!(fx.state.lookups.contains(&path, &fx.config.source_root));

    fx.state
        .connections
        .lock()
        .unwrap()
        .file_notifiers
        .push("watchman".to_string());

    fx.write("a.py", "x: int = \"broken\"\n");
    let response = fx.lsp(notification("textDocument/didSave", &uri));
    assert_eq!(response, None);
    assert!(!fx.state.lookups.contains(&path, &fx.config.source_root));
    // No recheck ran, so the old (clean) diagnostics stand.
    assert!(fx.state.errors[&pyty::path::FileHandle::from_relative("a.py")].is_empty());
}

/// Unrecognized inner methods are logged and dropped.
#[test]
fn unknown_inner_method_is_dropped() {
    let mut fx = Fixture::new();
    let response = fx.lsp(json!({
        "jsonrpc": "2.0",
        "id": 5,
        "method": "textDocument/rename",
        "params": {}
    }));
    assert_eq!(response, None);
}

/// A nested type-check envelope drives the recheck engine.
#[test]
fn nested_type_check_envelope_runs_a_recheck() {
    let mut fx = Fixture::new();
    let path = fx.write("a.py", "x: int = \"oops\"\n");
    let response = fx.lsp(json!({
        "jsonrpc": "2.0",
        "id": 6,
        "method": "pyty/typeCheck",
        "params": {
            "update_environment_with": [path.display().to_string()],
            "check": [path.display().to_string()]
        }
    }));
    let Some(pyty::request::Response::TypeCheck { errors }) = response else {
        panic!("expected a type-check response, got {response:?}");
    };
    assert_eq!(errors["a.py"].len(), 1);
}

/// Garbage envelopes are dropped without a response.
#[test]
fn unparseable_envelope_is_dropped() {
    let mut fx = Fixture::new();
    let response = fx.process(pyty::request::Request::LanguageServerProtocol {
        json: "not json at all".to_string(),
    });
    assert_eq!(response, None);
}
