use miette::{Diagnostic, SourceSpan};
use thiserror::Error;

/// The severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A type error produced by analysis.
///
/// `path` is project-root-relative; positions are 1-based byte columns.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TypeError {
    pub path: String,
    pub line: usize,
    pub column: usize,
    pub stop_line: usize,
    pub stop_column: usize,
    pub code: String,
    pub message: String,
    pub severity: Severity,
}

impl TypeError {
    pub fn new(
        path: impl Into<String>,
        position: (usize, usize),
        stop: (usize, usize),
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> TypeError {
        TypeError {
            path: path.into(),
            line: position.0,
            column: position.1,
            stop_line: stop.0,
            stop_column: stop.1,
            code: code.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// Miette-compatible wrapper for rendering a [`TypeError`] against its source.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RenderableError {
    pub message: String,
    pub src: miette::NamedSource<String>,
    pub span: SourceSpan,
    pub label: String,
}

impl Diagnostic for RenderableError {
    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&self.src)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = miette::LabeledSpan> + '_>> {
        Some(Box::new(std::iter::once(miette::LabeledSpan::new(
            Some(self.label.clone()),
            self.span.offset(),
            self.span.len(),
        ))))
    }
}

/// A lightweight diagnostic for tool-level errors/warnings without source code.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ToolDiagnostic {
    message: String,
    severity: miette::Severity,
}

impl ToolDiagnostic {
    pub fn error(msg: impl Into<String>) -> Self {
        Self { message: msg.into(), severity: miette::Severity::Error }
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self { message: msg.into(), severity: miette::Severity::Warning }
    }
}

impl Diagnostic for ToolDiagnostic {
    fn severity(&self) -> Option<miette::Severity> {
        Some(self.severity)
    }
}

impl TypeError {
    /// Convert to a miette-renderable diagnostic.
    ///
    /// `source` is the file's current text; the error's line/column pair is
    /// re-anchored into it (a zero-length span at 1:1 when out of range, so
    /// the header still renders).
    pub fn to_renderable(&self, source: &str) -> RenderableError {
        let line_starts = crate::parse::compute_line_starts(source);
        let offset_of = |line: usize, column: usize| {
            line_starts
                .get(line.saturating_sub(1))
                .map(|start| start + column.saturating_sub(1))
                .unwrap_or(0)
                .min(source.len())
        };
        let start = offset_of(self.line, self.column);
        let end = offset_of(self.stop_line, self.stop_column).max(start);
        RenderableError {
            message: format!("{}: {}", self.code, self.message),
            src: miette::NamedSource::new(&self.path, source.to_owned()),
            span: SourceSpan::new(start.into(), end - start),
            label: self.code.clone(),
        }
    }
}
