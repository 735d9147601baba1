use std::path::Path;

use crate::config::ServerConfig;
use crate::environment::{self, Environment, Type};
use crate::lookup::LookupTable;
use crate::request::{Response, TypeQuery};
use crate::state::ServerState;

/// Evaluate a type query synchronously. Faults are recovered locally: the
/// response text carries the error.
pub fn handle_query(state: &ServerState, config: &ServerConfig, query: &TypeQuery) -> Response {
    let text = match evaluate(state, config, query) {
        Ok(text) => text,
        Err(QueryError::Untracked(ty)) => {
            format!("Error: Type `{ty}` was not found in the type order.")
        }
    };
    Response::TypeQuery { response: text }
}

enum QueryError {
    Untracked(Type),
}

/// Parse a textual annotation and require it to be instantiated in the
/// type order.
fn parse_and_validate(environment: &Environment, text: &str) -> Result<Type, QueryError> {
    let ty = Type::parse(text);
    if environment.order().is_instantiated(&ty) {
        Ok(ty)
    } else {
        Err(QueryError::Untracked(ty))
    }
}

fn evaluate(
    state: &ServerState,
    config: &ServerConfig,
    query: &TypeQuery,
) -> Result<String, QueryError> {
    let environment = &state.environment;
    match query {
        TypeQuery::Attributes { annotation } => {
            let ty = parse_and_validate(environment, annotation)?;
            match environment::class_attributes(environment, ty.name()) {
                Some(attributes) => Ok(attributes.join("\n")),
                None => Ok(format!("Error: No class definition found for {ty}")),
            }
        }
        TypeQuery::Methods { annotation } => {
            let ty = parse_and_validate(environment, annotation)?;
            match environment.class_definition(ty.name()) {
                Some(class) => Ok(class
                    .methods
                    .iter()
                    .map(|method| {
                        // The receiver renders literally as `self`.
                        let mut parameters = vec!["self".to_string()];
                        parameters.extend(
                            method.parameters.iter().skip(1).map(|ty| ty.to_string()),
                        );
                        format!(
                            "{}: ({}) -> {}",
                            method.name,
                            parameters.join(", "),
                            method.return_type
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n")),
                None => Ok(format!("Error: No class definition found for {ty}")),
            }
        }
        TypeQuery::Superclasses { annotation } => {
            let ty = parse_and_validate(environment, annotation)?;
            match environment.class_definition(ty.name()) {
                Some(class) => Ok(environment.order().ancestors(&class.name).join(", ")),
                None => Ok(format!("No class definition found for {ty}")),
            }
        }
        TypeQuery::Join { left, right } => {
            let left = parse_and_validate(environment, left)?;
            let right = parse_and_validate(environment, right)?;
            Ok(environment.order().join(&left, &right).to_string())
        }
        TypeQuery::Meet { left, right } => {
            let left = parse_and_validate(environment, left)?;
            let right = parse_and_validate(environment, right)?;
            Ok(environment.order().meet(&left, &right).to_string())
        }
        TypeQuery::LessOrEqual { left, right } => {
            let left = parse_and_validate(environment, left)?;
            let right = parse_and_validate(environment, right)?;
            Ok(environment.order().less_or_equal(&left, &right).to_string())
        }
        TypeQuery::NormalizeType { annotation } => {
            let ty = parse_and_validate(environment, annotation)?;
            Ok(ty.to_string())
        }
        TypeQuery::TypeAtLocation { path, line, column } => {
            Ok(type_at_location(state, config, path, *line, *column).unwrap_or_else(|| {
                format!(
                    "Error: Not able to get lookup at {}:{line}:{column}",
                    path.display()
                )
            }))
        }
    }
}

/// Build a lookup table on the fly (bypassing the cache) and read the
/// annotation at the position.
fn type_at_location(
    state: &ServerState,
    config: &ServerConfig,
    path: &Path,
    line: usize,
    column: usize,
) -> Option<String> {
    let handle = crate::path::FileHandle::create(path, &config.source_root)?;
    let text = std::fs::read_to_string(handle.to_path(&config.source_root)).unwrap_or_default();
    let source = state.heap.get_source(&handle)?;
    let table = LookupTable::create_of_source(&state.environment, &source, &text);
    table.get_annotation(line, column).map(|ty| ty.to_string())
}
