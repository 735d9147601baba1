use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::diagnostic::TypeError;

/// A JSON-RPC style request id: number or string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl RequestId {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RequestId::Number(n) => serde_json::Value::from(*n),
            RequestId::String(s) => serde_json::Value::from(s.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Persistent,
    Batch,
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientKind::Persistent => f.write_str("persistent"),
            ClientKind::Batch => f.write_str("batch"),
        }
    }
}

/// A 1-based (line, byte column) source position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

/// Everything a client can ask of the server. Exhaustive at the dispatch
/// boundary; the editor-assist variants are only valid inside a
/// `LanguageServerProtocol` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Request {
    TypeCheck {
        #[serde(default)]
        update_environment_with: Vec<PathBuf>,
        #[serde(default)]
        check: Vec<PathBuf>,
    },
    TypeQuery {
        query: TypeQuery,
    },
    DisplayTypeErrors {
        #[serde(default)]
        files: Vec<PathBuf>,
    },
    FlushTypeErrors,
    Stop,
    LanguageServerProtocol {
        json: String,
    },
    ClientShutdown {
        id: RequestId,
    },
    ClientExit {
        client: ClientKind,
    },
    Rage {
        id: RequestId,
    },
    GetDefinition {
        id: RequestId,
        file: PathBuf,
        position: SourcePosition,
    },
    Hover {
        id: RequestId,
        file: PathBuf,
        position: SourcePosition,
    },
    OpenDocument {
        file: PathBuf,
    },
    CloseDocument {
        file: PathBuf,
    },
    SaveDocument {
        file: PathBuf,
    },
    ClientConnection,
}

impl Request {
    /// The request kind tag, for metrics and logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::TypeCheck { .. } => "type_check",
            Request::TypeQuery { .. } => "type_query",
            Request::DisplayTypeErrors { .. } => "display_type_errors",
            Request::FlushTypeErrors => "flush_type_errors",
            Request::Stop => "stop",
            Request::LanguageServerProtocol { .. } => "language_server_protocol",
            Request::ClientShutdown { .. } => "client_shutdown",
            Request::ClientExit { .. } => "client_exit",
            Request::Rage { .. } => "rage",
            Request::GetDefinition { .. } => "get_definition",
            Request::Hover { .. } => "hover",
            Request::OpenDocument { .. } => "open_document",
            Request::CloseDocument { .. } => "close_document",
            Request::SaveDocument { .. } => "save_document",
            Request::ClientConnection => "client_connection",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "query", rename_all = "snake_case")]
pub enum TypeQuery {
    Attributes { annotation: String },
    Methods { annotation: String },
    Superclasses { annotation: String },
    Join { left: String, right: String },
    Meet { left: String, right: String },
    LessOrEqual { left: String, right: String },
    NormalizeType { annotation: String },
    TypeAtLocation { path: PathBuf, line: usize, column: usize },
}

/// Responses mirror requests where applicable; at most one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    TypeCheck {
        errors: BTreeMap<String, Vec<TypeError>>,
    },
    TypeQuery {
        response: String,
    },
    ClientExit {
        client: ClientKind,
    },
    Stop,
    LanguageServerProtocol {
        json: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_over_the_wire() {
        let request = Request::TypeCheck {
            update_environment_with: vec![PathBuf::from("a.py")],
            check: vec![PathBuf::from("a.py"), PathBuf::from("b.py")],
        };
        let encoded = serde_json::to_string(&request).unwrap();
        assert!(encoded.contains("\"kind\":\"type_check\""));
        let decoded: Request = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn query_round_trips() {
        let request = Request::TypeQuery {
            query: TypeQuery::LessOrEqual { left: "int".into(), right: "object".into() },
        };
        let decoded: Request =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn request_id_accepts_numbers_and_strings() {
        let n: RequestId = serde_json::from_str("7").unwrap();
        assert_eq!(n, RequestId::Number(7));
        let s: RequestId = serde_json::from_str("\"seven\"").unwrap();
        assert_eq!(s, RequestId::String("seven".into()));
    }

    #[test]
    fn missing_file_lists_default_to_empty() {
        let decoded: Request = serde_json::from_str("{\"kind\":\"type_check\"}").unwrap();
        assert_eq!(
            decoded,
            Request::TypeCheck { update_environment_with: vec![], check: vec![] }
        );
    }
}
