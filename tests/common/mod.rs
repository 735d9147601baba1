#![allow(dead_code)]

pub mod framed_client;

use std::collections::BTreeMap;
use std::path::PathBuf;

use pyty::config::ServerConfig;
use pyty::diagnostic::TypeError;
use pyty::dispatch;
use pyty::request::{Request, Response};
use pyty::state::ServerState;

/// A throwaway source root with a server state rooted at it.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub config: ServerConfig,
    pub state: ServerState,
}

impl Fixture {
    pub fn new() -> Fixture {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = ServerConfig::for_root(dir.path());
        let state = ServerState::new(&config).expect("server state");
        Fixture { dir, config, state }
    }

    /// Absolute path of a file under the source root.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.config.source_root.join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dirs");
        }
        std::fs::write(&path, content).expect("write source");
        path
    }

    pub fn process(&mut self, request: Request) -> Option<Response> {
        dispatch::process(&mut self.state, &self.config, request).expect("dispatch")
    }

    /// Run a type-check request and return its error map.
    pub fn type_check(
        &mut self,
        update: &[&str],
        check: &[&str],
    ) -> BTreeMap<String, Vec<TypeError>> {
        let request = Request::TypeCheck {
            update_environment_with: update.iter().map(|rel| self.path(rel)).collect(),
            check: check.iter().map(|rel| self.path(rel)).collect(),
        };
        match self.process(request) {
            Some(Response::TypeCheck { errors }) => errors,
            other => panic!("expected a type-check response, got {other:?}"),
        }
    }

    /// Parse and populate files without checking them, the way server
    /// startup seeds the environment.
    pub fn populate(&mut self, files: &[&str]) {
        self.type_check(files, &[]);
    }

    /// Send a raw language-server envelope.
    pub fn lsp(&mut self, json: serde_json::Value) -> Option<Response> {
        self.process(Request::LanguageServerProtocol { json: json.to_string() })
    }
}

/// Extract the JSON body of a language-server response.
pub fn lsp_body(response: Option<Response>) -> serde_json::Value {
    match response {
        Some(Response::LanguageServerProtocol { json }) => {
            serde_json::from_str(&json).expect("valid response json")
        }
        other => panic!("expected a language-server response, got {other:?}"),
    }
}

pub fn file_uri(path: &std::path::Path) -> String {
    format!("file://{}", path.display())
}
