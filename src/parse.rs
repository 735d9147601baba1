use crate::path::{FileHandle, Qualifier};

/// Byte range of a syntax element in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start && offset < self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Result of parsing one source file. Retains byte-offset spans so lookup
/// tables and diagnostics can be resolved against the original text.
#[derive(Debug)]
pub struct ParsedSource {
    pub handle: FileHandle,
    pub qualifier: Qualifier,
    pub statements: Vec<Statement>,
    /// 1-based lines carrying a `# type: ignore` comment.
    pub ignore_lines: Vec<usize>,
    /// Size of the original text, for heap accounting.
    pub text_bytes: usize,
    line_starts: Vec<usize>,
}

impl ParsedSource {
    /// Convert a byte offset to a 1-based (line, column) pair.
    pub fn offset_to_position(&self, offset: usize) -> (usize, usize) {
        offset_to_line_col(&self.line_starts, offset)
    }

    /// Convert a 1-based (line, column) pair back to a byte offset.
    pub fn position_to_offset(&self, line: usize, column: usize) -> Option<usize> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        Some(start + column.saturating_sub(1))
    }

    pub fn imports(&self) -> impl Iterator<Item = &Import> {
        self.statements.iter().filter_map(|statement| match statement {
            Statement::Import(import) => Some(import),
            _ => None,
        })
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassDef> {
        self.statements.iter().filter_map(|statement| match statement {
            Statement::Class(class) => Some(class),
            _ => None,
        })
    }

    /// Top-level defines only; methods live under their class.
    pub fn defines(&self) -> impl Iterator<Item = &Define> {
        self.statements.iter().filter_map(|statement| match statement {
            Statement::Define(define) => Some(define),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Import(Import),
    Class(ClassDef),
    Define(Define),
    Assign(Assign),
    Return(Return),
    Pass(Span),
    Expression(Expr),
}

/// `import a.b` or `from a.b import x, y`.
#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub target: String,
    pub target_span: Span,
    /// Imported names for the `from` form; empty for a plain `import`.
    pub names: Vec<(String, Span)>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub name_span: Span,
    pub bases: Vec<TypeExpr>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Define {
    pub name: String,
    pub name_span: Span,
    pub parameters: Vec<Parameter>,
    pub return_annotation: Option<TypeExpr>,
    pub body: Vec<Statement>,
    pub span: Span,
}

impl Define {
    /// A body of only `pass`/`...` marks a signature without behavior.
    pub fn is_signature_only(&self) -> bool {
        self.body
            .iter()
            .all(|statement| matches!(statement, Statement::Pass(_)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub name_span: Span,
    pub annotation: Option<TypeExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    pub target: String,
    pub target_span: Span,
    pub annotation: Option<TypeExpr>,
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Return {
    pub value: Option<Expr>,
    pub span: Span,
}

/// A textual type annotation with its source span.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeExpr {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Integer(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    Call { callee: String },
    /// Anything the subset grammar does not model; typed as `Any`.
    Opaque,
}

/// A parse error with a 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

/// Precompute byte offsets where each line starts.
pub fn compute_line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

/// Convert a byte offset to a 1-based (line, column) pair using precomputed line starts.
pub fn offset_to_line_col(line_starts: &[usize], offset: usize) -> (usize, usize) {
    let line = match line_starts.binary_search(&offset) {
        Ok(idx) => idx,
        Err(idx) => idx.saturating_sub(1),
    };
    let col = offset - line_starts[line];
    (line + 1, col + 1)
}

/// One significant source line, comment-stripped, with its indentation.
struct Line<'a> {
    /// 1-based line number.
    number: usize,
    indent: usize,
    /// Offset of the first significant character.
    start: usize,
    /// Comment-stripped, right-trimmed content starting at `start`.
    text: &'a str,
}

/// Parse one source file into a [`ParsedSource`].
///
/// The grammar is deliberately forgiving: statements the subset does not
/// model become opaque expression statements. Only malformed headers and
/// indentation structure are reported as errors, and any error excludes the
/// file from the parsed set.
pub fn parse_source(
    handle: FileHandle,
    source: &str,
) -> Result<ParsedSource, Vec<ParseError>> {
    let line_starts = compute_line_starts(source);
    let mut ignore_lines = Vec::new();
    let mut lines: Vec<Line<'_>> = Vec::new();

    for (idx, raw) in source.split('\n').enumerate() {
        let line_start = line_starts[idx];
        let (content, comment) = split_comment(raw);
        if let Some(comment) = comment
            && comment.contains("type: ignore")
        {
            ignore_lines.push(idx + 1);
        }
        let trimmed_end = content.trim_end();
        let stripped = trimmed_end.trim_start();
        if stripped.is_empty() {
            continue;
        }
        let indent = trimmed_end.len() - stripped.len();
        lines.push(Line {
            number: idx + 1,
            indent,
            start: line_start + indent,
            text: stripped,
        });
    }

    let mut errors = Vec::new();
    let mut cursor = 0;
    let statements = parse_block(&lines, &mut cursor, 0, &mut errors);
    // Anything left over sits at an indentation no block claims.
    if cursor < lines.len() {
        let line = &lines[cursor];
        errors.push(ParseError {
            message: "unexpected indent".to_string(),
            line: line.number,
            column: line.indent + 1,
        });
    }

    if errors.is_empty() {
        let qualifier = handle.qualifier();
        Ok(ParsedSource {
            handle,
            qualifier,
            statements,
            ignore_lines,
            text_bytes: source.len(),
            line_starts,
        })
    } else {
        Err(errors)
    }
}

/// Split a raw line into (content, comment) at the first `#` outside quotes.
fn split_comment(raw: &str) -> (&str, Option<&str>) {
    let mut quote: Option<char> = None;
    for (i, c) in raw.char_indices() {
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '#' => return (&raw[..i], Some(&raw[i..])),
                _ => {}
            },
        }
    }
    (raw, None)
}

fn parse_block(
    lines: &[Line<'_>],
    cursor: &mut usize,
    indent: usize,
    errors: &mut Vec<ParseError>,
) -> Vec<Statement> {
    let mut statements = Vec::new();
    while *cursor < lines.len() {
        let line_indent = lines[*cursor].indent;
        if line_indent < indent {
            break;
        }
        if line_indent > indent {
            // Stray deeper indentation belongs to no statement.
            break;
        }
        if let Some(statement) = parse_statement(lines, cursor, indent, errors) {
            statements.push(statement);
        }
    }
    statements
}

fn parse_statement(
    lines: &[Line<'_>],
    cursor: &mut usize,
    indent: usize,
    errors: &mut Vec<ParseError>,
) -> Option<Statement> {
    let index = *cursor;
    let line = &lines[index];
    *cursor += 1;
    let text = line.text;
    let span = Span::new(line.start, line.start + text.len());

    if text == "pass" || text == "..." {
        return Some(Statement::Pass(span));
    }
    if let Some(rest) = text.strip_prefix("import ") {
        let target = rest.trim();
        let offset = line.start + (text.len() - rest.len()) + leading_ws(rest);
        return Some(Statement::Import(Import {
            target: target.to_string(),
            target_span: Span::new(offset, offset + target.len()),
            names: Vec::new(),
            span,
        }));
    }
    if let Some(rest) = text.strip_prefix("from ") {
        return parse_from_import(line, rest, span, errors);
    }
    if let Some(rest) = text.strip_prefix("class ") {
        return parse_class(lines, cursor, line, rest, indent, errors);
    }
    if let Some(rest) = text.strip_prefix("def ") {
        return parse_define(lines, cursor, line, rest, indent, errors);
    }
    if text == "return" {
        return Some(Statement::Return(Return { value: None, span }));
    }
    if let Some(rest) = text.strip_prefix("return ") {
        let offset = line.start + (text.len() - rest.len()) + leading_ws(rest);
        let value = parse_expression(rest.trim(), offset);
        return Some(Statement::Return(Return { value: Some(value), span }));
    }
    if let Some(assign) = parse_assign(line, text, span) {
        return Some(Statement::Assign(assign));
    }
    Some(Statement::Expression(parse_expression(text, line.start)))
}

fn parse_from_import(
    line: &Line<'_>,
    rest: &str,
    span: Span,
    errors: &mut Vec<ParseError>,
) -> Option<Statement> {
    let Some((module, names)) = rest.split_once(" import ") else {
        errors.push(ParseError {
            message: "expected `import` in `from` statement".to_string(),
            line: line.number,
            column: line.indent + 1,
        });
        return None;
    };
    let target = module.trim();
    let target_offset = line.start + (line.text.len() - rest.len()) + leading_ws(module);
    let names_base = line.start + (line.text.len() - names.len());
    let mut imported = Vec::new();
    let mut offset = 0;
    for piece in names.split(',') {
        let name = piece.trim();
        if !name.is_empty() {
            let start = names_base + offset + leading_ws(piece);
            imported.push((name.to_string(), Span::new(start, start + name.len())));
        }
        offset += piece.len() + 1;
    }
    Some(Statement::Import(Import {
        target: target.to_string(),
        target_span: Span::new(target_offset, target_offset + target.len()),
        names: imported,
        span,
    }))
}

fn parse_class(
    lines: &[Line<'_>],
    cursor: &mut usize,
    line: &Line<'_>,
    rest: &str,
    indent: usize,
    errors: &mut Vec<ParseError>,
) -> Option<Statement> {
    let Some(header) = rest.trim_end().strip_suffix(':') else {
        errors.push(ParseError {
            message: "expected `:` after class header".to_string(),
            line: line.number,
            column: line.indent + line.text.len(),
        });
        return None;
    };
    let rest_offset = line.start + (line.text.len() - rest.len());
    let (name, bases_text, bases_base) = match header.find('(') {
        Some(open) => {
            let inner = &header[open + 1..];
            let Some(close) = inner.rfind(')') else {
                errors.push(ParseError {
                    message: "unclosed base-class list".to_string(),
                    line: line.number,
                    column: line.indent + 1,
                });
                return None;
            };
            (header[..open].trim(), &inner[..close], rest_offset + open + 1)
        }
        None => (header.trim(), "", rest_offset),
    };
    if name.is_empty() || !is_identifier(name) {
        errors.push(ParseError {
            message: "expected class name".to_string(),
            line: line.number,
            column: line.indent + 1,
        });
        return None;
    }
    let name_start = rest_offset + leading_ws(header);
    let mut bases = Vec::new();
    let mut offset = 0;
    for piece in bases_text.split(',') {
        let base = piece.trim();
        if !base.is_empty() {
            let start = bases_base + offset + leading_ws(piece);
            bases.push(TypeExpr {
                name: base.to_string(),
                span: Span::new(start, start + base.len()),
            });
        }
        offset += piece.len() + 1;
    }
    let body = parse_body(lines, cursor, line, indent, errors)?;
    Some(Statement::Class(ClassDef {
        name: name.to_string(),
        name_span: Span::new(name_start, name_start + name.len()),
        bases,
        body,
        span: Span::new(line.start, line.start + line.text.len()),
    }))
}

fn parse_define(
    lines: &[Line<'_>],
    cursor: &mut usize,
    line: &Line<'_>,
    rest: &str,
    indent: usize,
    errors: &mut Vec<ParseError>,
) -> Option<Statement> {
    let Some(header) = rest.trim_end().strip_suffix(':') else {
        errors.push(ParseError {
            message: "expected `:` after def header".to_string(),
            line: line.number,
            column: line.indent + line.text.len(),
        });
        return None;
    };
    let rest_offset = line.start + (line.text.len() - rest.len());
    let Some(open) = header.find('(') else {
        errors.push(ParseError {
            message: "expected parameter list".to_string(),
            line: line.number,
            column: line.indent + 1,
        });
        return None;
    };
    let name = header[..open].trim();
    if name.is_empty() || !is_identifier(name) {
        errors.push(ParseError {
            message: "expected function name".to_string(),
            line: line.number,
            column: line.indent + 1,
        });
        return None;
    }
    let after_open = &header[open + 1..];
    let Some(close) = after_open.find(')') else {
        errors.push(ParseError {
            message: "unclosed parameter list".to_string(),
            line: line.number,
            column: line.indent + 1,
        });
        return None;
    };
    let params_text = &after_open[..close];
    let params_base = rest_offset + open + 1;
    let mut parameters = Vec::new();
    let mut offset = 0;
    for piece in params_text.split(',') {
        let param = piece.trim();
        if !param.is_empty() {
            let start = params_base + offset + leading_ws(piece);
            parameters.push(parse_parameter(param, start));
        }
        offset += piece.len() + 1;
    }
    let tail = after_open[close + 1..].trim();
    let return_annotation = tail.strip_prefix("->").map(|annotation| {
        let text = annotation.trim();
        let start = rest_offset + header.len() - text.len();
        TypeExpr {
            name: text.to_string(),
            span: Span::new(start, start + text.len()),
        }
    });
    let name_start = rest_offset + leading_ws(header);
    let body = parse_body(lines, cursor, line, indent, errors)?;
    Some(Statement::Define(Define {
        name: name.to_string(),
        name_span: Span::new(name_start, name_start + name.len()),
        parameters,
        return_annotation,
        body,
        span: Span::new(line.start, line.start + line.text.len()),
    }))
}

fn parse_parameter(param: &str, start: usize) -> Parameter {
    match param.split_once(':') {
        Some((name, annotation)) => {
            let name = name.trim_end();
            let text = annotation.trim();
            let annotation_start = start + param.len() - annotation.trim_start().len();
            Parameter {
                name: name.to_string(),
                name_span: Span::new(start, start + name.len()),
                annotation: Some(TypeExpr {
                    name: text.to_string(),
                    span: Span::new(annotation_start, annotation_start + text.len()),
                }),
            }
        }
        None => Parameter {
            name: param.to_string(),
            name_span: Span::new(start, start + param.len()),
            annotation: None,
        },
    }
}

/// Parse the indented body following a `class`/`def` header.
fn parse_body(
    lines: &[Line<'_>],
    cursor: &mut usize,
    header: &Line<'_>,
    indent: usize,
    errors: &mut Vec<ParseError>,
) -> Option<Vec<Statement>> {
    let Some(next) = lines.get(*cursor) else {
        errors.push(ParseError {
            message: "expected an indented block".to_string(),
            line: header.number,
            column: header.indent + 1,
        });
        return None;
    };
    if next.indent <= indent {
        errors.push(ParseError {
            message: "expected an indented block".to_string(),
            line: next.number,
            column: next.indent + 1,
        });
        return None;
    }
    Some(parse_block(lines, cursor, next.indent, errors))
}

fn parse_assign(line: &Line<'_>, text: &str, span: Span) -> Option<Assign> {
    // An annotated declaration without a value: `name: Type`.
    let (lhs, value) = match find_assign_eq(text) {
        Some(eq) => (&text[..eq], Some(text[eq + 1..].trim())),
        None => (text, None),
    };
    let (target, annotation) = match lhs.split_once(':') {
        Some((target, annotation)) => (target.trim_end(), Some(annotation.trim())),
        None => (lhs.trim_end(), None),
    };
    if target.is_empty() || !is_target(target) {
        return None;
    }
    if annotation.is_none() && value.is_none() {
        return None;
    }
    let annotation = annotation.filter(|a| !a.is_empty()).map(|a| {
        // Offset of the annotation text: past the target, the colon, and any
        // whitespace that follows it.
        let after_colon = &lhs[lhs.find(':').map(|i| i + 1).unwrap_or(0)..];
        let start = line.start + (lhs.len() - after_colon.len()) + leading_ws(after_colon);
        TypeExpr {
            name: a.to_string(),
            span: Span::new(start, start + a.len()),
        }
    });
    let value = value.filter(|v| !v.is_empty()).map(|v| {
        let start = line.start + text.len() - v.len();
        parse_expression(v, start)
    });
    Some(Assign {
        target: target.to_string(),
        target_span: Span::new(line.start, line.start + target.len()),
        annotation,
        value,
        span,
    })
}

/// Find a bare `=` that is an assignment, not part of `==`, `<=`, etc.
fn find_assign_eq(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    for i in 0..bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'=' => {
                    let prev = if i > 0 { bytes[i - 1] } else { b' ' };
                    let next = bytes.get(i + 1).copied().unwrap_or(b' ');
                    if prev != b'=' && next != b'=' && !matches!(prev, b'<' | b'>' | b'!') {
                        return Some(i);
                    }
                }
                _ => {}
            },
        }
    }
    None
}

fn parse_expression(text: &str, start: usize) -> Expr {
    let text = text.trim();
    let span = Span::new(start, start + text.len());
    let kind = match text {
        "True" => ExprKind::Bool(true),
        "False" => ExprKind::Bool(false),
        "None" => ExprKind::None,
        _ => {
            if let Ok(value) = text.parse::<i64>() {
                ExprKind::Integer(value)
            } else if text.contains('.')
                && let Ok(value) = text.parse::<f64>()
            {
                ExprKind::Float(value)
            } else if is_string_literal(text) {
                ExprKind::Str(text[1..text.len() - 1].to_string())
            } else if let Some(callee) = call_callee(text) {
                ExprKind::Call { callee: callee.to_string() }
            } else if is_dotted_name(text) {
                ExprKind::Name(text.to_string())
            } else {
                ExprKind::Opaque
            }
        }
    };
    Expr { kind, span }
}

fn is_string_literal(text: &str) -> bool {
    text.len() >= 2
        && ((text.starts_with('"') && text.ends_with('"'))
            || (text.starts_with('\'') && text.ends_with('\'')))
}

fn call_callee(text: &str) -> Option<&str> {
    let open = text.find('(')?;
    if !text.ends_with(')') {
        return None;
    }
    let callee = &text[..open];
    is_dotted_name(callee).then_some(callee)
}

fn leading_ws(text: &str) -> usize {
    text.len() - text.trim_start().len()
}

fn is_identifier(text: &str) -> bool {
    !text.is_empty()
        && text
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()))
}

fn is_dotted_name(text: &str) -> bool {
    !text.is_empty() && text.split('.').all(is_identifier)
}

/// An assignment target: an identifier or a dotted attribute path.
fn is_target(text: &str) -> bool {
    is_dotted_name(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> ParsedSource {
        parse_source(FileHandle::from_relative("m.py"), source).unwrap()
    }

    #[test]
    fn parses_imports() {
        let parsed = parse("import a.b\nfrom c import x, y\n");
        let imports: Vec<_> = parsed.imports().collect();
        assert_eq!(imports[0].target, "a.b");
        assert!(imports[0].names.is_empty());
        assert_eq!(imports[1].target, "c");
        assert_eq!(imports[1].names[0].0, "x");
        assert_eq!(imports[1].names[1].0, "y");
    }

    #[test]
    fn parses_class_with_attributes_and_methods() {
        let source = "class Foo(Base):\n    x: int = 1\n    def get(self) -> int:\n        return 1\n";
        let parsed = parse(source);
        let class = parsed.classes().next().unwrap();
        assert_eq!(class.name, "Foo");
        assert_eq!(class.bases[0].name, "Base");
        assert_eq!(class.body.len(), 2);
        let Statement::Define(method) = &class.body[1] else {
            panic!("expected method");
        };
        assert_eq!(method.name, "get");
        assert_eq!(method.parameters[0].name, "self");
        assert_eq!(method.return_annotation.as_ref().unwrap().name, "int");
        assert!(!method.is_signature_only());
    }

    #[test]
    fn signature_only_define() {
        let parsed = parse("def stub(x: int) -> str:\n    ...\n");
        let define = parsed.defines().next().unwrap();
        assert!(define.is_signature_only());
    }

    #[test]
    fn parses_annotated_assignment_spans() {
        let source = "answer: int = 42\n";
        let parsed = parse(source);
        let Statement::Assign(assign) = &parsed.statements[0] else {
            panic!("expected assignment");
        };
        assert_eq!(assign.target, "answer");
        assert_eq!(&source[assign.target_span.start..assign.target_span.end], "answer");
        let annotation = assign.annotation.as_ref().unwrap();
        assert_eq!(&source[annotation.span.start..annotation.span.end], "int");
        assert_eq!(assign.value.as_ref().unwrap().kind, ExprKind::Integer(42));
    }

    #[test]
    fn comparison_is_not_an_assignment() {
        let parsed = parse("x == 1\n");
        assert!(matches!(parsed.statements[0], Statement::Expression(_)));
    }

    #[test]
    fn records_type_ignore_lines() {
        let parsed = parse("x: int = 1\ny: str = 2  # type: ignore\n");
        assert_eq!(parsed.ignore_lines, vec![2]);
    }

    #[test]
    fn missing_body_is_an_error() {
        let errors = parse_source(FileHandle::from_relative("m.py"), "def f():\n").unwrap_err();
        assert!(errors[0].message.contains("indented block"));
    }

    #[test]
    fn missing_colon_is_an_error() {
        let errors =
            parse_source(FileHandle::from_relative("m.py"), "class Foo\n    pass\n").unwrap_err();
        assert!(errors[0].message.contains("class header"));
    }

    #[test]
    fn positions_round_trip() {
        let parsed = parse("x = 1\ny = 2\n");
        let offset = parsed.position_to_offset(2, 1).unwrap();
        assert_eq!(parsed.offset_to_position(offset), (2, 1));
    }

    #[test]
    fn literal_expressions() {
        let parsed = parse("a = 1.5\nb = \"hi\"\nc = None\nd = Foo()\n");
        let kinds: Vec<_> = parsed
            .statements
            .iter()
            .map(|statement| match statement {
                Statement::Assign(assign) => assign.value.as_ref().unwrap().kind.clone(),
                _ => panic!("expected assignment"),
            })
            .collect();
        assert_eq!(kinds[0], ExprKind::Float(1.5));
        assert_eq!(kinds[1], ExprKind::Str("hi".to_string()));
        assert_eq!(kinds[2], ExprKind::None);
        assert_eq!(kinds[3], ExprKind::Call { callee: "Foo".to_string() });
    }
}
