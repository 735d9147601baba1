mod common;

use common::Fixture;
use pyty::path::FileHandle;
use pyty::request::Request;

/// A fresh (populated) server checking one erroneous file reports exactly
/// that file's error and records the handle.
#[test]
fn check_reports_errors_for_populated_file() {
    let mut fx = Fixture::new();
    fx.write("a.py", "x: int = \"oops\"\n");
    fx.populate(&["a.py"]);

    let errors = fx.type_check(&[], &["a.py"]);
    assert_eq!(errors.len(), 1);
    let file_errors = &errors["a.py"];
    assert_eq!(file_errors.len(), 1);
    assert_eq!(file_errors[0].code, "incompatible-assignment");
    assert!(fx.state.handles.contains(&FileHandle::from_relative("a.py")));
}

/// Every handle present after a recheck has an errors entry, empty for
/// clean files.
#[test]
fn every_checked_handle_has_an_errors_entry() {
    let mut fx = Fixture::new();
    fx.write("clean.py", "x: int = 1\n");
    fx.write("broken.py", "y: str = 2\n");
    fx.type_check(&["clean.py", "broken.py"], &["clean.py", "broken.py"]);

    for handle in &fx.state.handles {
        assert!(fx.state.errors.contains_key(handle), "missing entry for {handle}");
    }
    assert!(fx.state.errors[&FileHandle::from_relative("clean.py")].is_empty());
    assert_eq!(fx.state.errors[&FileHandle::from_relative("broken.py")].len(), 1);
}

/// The response key set is exactly the resolvable check set; paths outside
/// the root are dropped.
#[test]
fn response_keys_are_the_resolvable_check_set() {
    let mut fx = Fixture::new();
    fx.write("a.py", "x: int = 1\n");
    fx.populate(&["a.py"]);

    let request = Request::TypeCheck {
        update_environment_with: vec![],
        check: vec![fx.path("a.py"), std::path::PathBuf::from("/nowhere/else.py")],
    };
    let Some(pyty::request::Response::TypeCheck { errors }) = fx.process(request) else {
        panic!("expected type-check response");
    };
    let keys: Vec<&str> = errors.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["a.py"]);
    assert!(errors["a.py"].is_empty());
}

/// Updating a module queues a deferred recheck for its transitive
/// importers, and a flush drains it into the union of errors.
#[test]
fn update_defers_dependent_modules() {
    let mut fx = Fixture::new();
    fx.write("b.py", "value: int = 1\n");
    fx.write("c.py", "from b import value\nother: str = value\n");
    fx.populate(&["b.py", "c.py"]);

    // Edit b.py; only b is checked now, so c is deferred.
    fx.write("b.py", "value: str = \"one\"\n");
    fx.type_check(&["b.py"], &["b.py"]);

    assert_eq!(fx.state.deferred_requests.len(), 1);
    let Request::TypeCheck { update_environment_with, check } =
        fx.state.deferred_requests.front().unwrap().clone()
    else {
        panic!("expected a deferred type-check");
    };
    assert!(update_environment_with.is_empty());
    assert_eq!(check, vec![fx.path("c.py")]);

    let flushed = match fx.process(Request::FlushTypeErrors) {
        Some(pyty::request::Response::TypeCheck { errors }) => errors,
        other => panic!("expected type-check response, got {other:?}"),
    };
    assert!(fx.state.deferred_requests.is_empty());
    // The flush response covers all known error keys.
    assert!(flushed.contains_key("b.py"));
    assert!(flushed.contains_key("c.py"));
}

/// Deferred dependents never intersect the explicit check set.
#[test]
fn dependents_already_checked_are_not_deferred() {
    let mut fx = Fixture::new();
    fx.write("b.py", "value: int = 1\n");
    fx.write("c.py", "import b\n");
    fx.populate(&["b.py", "c.py"]);

    fx.type_check(&["b.py"], &["b.py", "c.py"]);
    assert!(fx.state.deferred_requests.is_empty());
}

/// Running the same check twice yields the same errors map.
#[test]
fn recheck_is_idempotent_in_errors() {
    let mut fx = Fixture::new();
    fx.write("a.py", "x: int = \"oops\"\ny: float = 1\n");
    let first = fx.type_check(&["a.py"], &["a.py"]);
    let second = fx.type_check(&["a.py"], &["a.py"]);
    assert_eq!(first, second);
}

/// A stub owns its qualifier: a source update for the same module is
/// dropped while the stub is in place.
#[test]
fn stub_shadows_source_with_same_qualifier() {
    let mut fx = Fixture::new();
    fx.write("a.pyi", "x: int = 1\n");
    fx.write("a.py", "x: str = \"runtime\"\n");
    fx.populate(&["a.pyi"]);

    // a.py alone cannot take over the qualifier.
    fx.type_check(&["a.py"], &["a.py"]);
    assert!(fx.state.heap.get_source(&FileHandle::from_relative("a.py")).is_none());
    assert_eq!(
        fx.state.environment.module_owner(&FileHandle::from_relative("a.pyi").qualifier()),
        Some(&FileHandle::from_relative("a.pyi"))
    );

    // Updating both in one batch parses the stub first and still drops the
    // source.
    fx.type_check(&["a.pyi", "a.py"], &["a.pyi"]);
    assert!(fx.state.heap.get_source(&FileHandle::from_relative("a.py")).is_none());
    assert!(fx.state.heap.get_source(&FileHandle::from_relative("a.pyi")).is_some());
}

/// Files that fail to parse surface syntax diagnostics and stay out of the
/// parsed set.
#[test]
fn syntax_errors_are_reported_for_checked_files() {
    let mut fx = Fixture::new();
    fx.write("bad.py", "def broken(:\n    pass\n");
    let errors = fx.type_check(&["bad.py"], &["bad.py"]);
    assert_eq!(errors["bad.py"].len(), 1);
    assert_eq!(errors["bad.py"][0].code, "parse-syntax");
    assert!(fx.state.heap.get_source(&FileHandle::from_relative("bad.py")).is_none());
}

/// An edit that fixes an error replaces the stale diagnostics atomically.
#[test]
fn errors_are_replaced_per_recheck() {
    let mut fx = Fixture::new();
    fx.write("a.py", "x: int = \"oops\"\n");
    let before = fx.type_check(&["a.py"], &["a.py"]);
    assert_eq!(before["a.py"].len(), 1);

    fx.write("a.py", "x: int = 1\n");
    let after = fx.type_check(&["a.py"], &["a.py"]);
    assert!(after["a.py"].is_empty());
    assert!(fx.state.errors[&FileHandle::from_relative("a.py")].is_empty());
}

/// Protocol conformance is structural: a class implementing every method
/// of a signature-only class is assignable to it.
#[test]
fn protocol_conformance_is_structural() {
    let mut fx = Fixture::new();
    fx.write(
        "io.py",
        "class Readable:\n    def read(self) -> str:\n        ...\nclass File:\n    def read(self) -> str:\n        return \"data\"\nclass Closed:\n    pass\nok: Readable = File()\nbad: Readable = Closed()\n",
    );
    let errors = fx.type_check(&["io.py"], &["io.py"]);
    assert_eq!(errors["io.py"].len(), 1);
    assert_eq!(errors["io.py"][0].line, 10);
    assert_eq!(errors["io.py"][0].code, "incompatible-assignment");
}

/// The parallel gate follows the configured threshold.
#[test]
fn parallel_gate_tracks_batch_size() {
    let mut fx = Fixture::new();
    let mut names = Vec::new();
    for i in 0..7 {
        let name = format!("m{i}.py");
        fx.write(&name, "x: int = 1\n");
        names.push(name);
    }
    let small: Vec<&str> = names.iter().take(2).map(String::as_str).collect();
    fx.type_check(&[], &small);
    assert!(!fx.state.scheduler.is_parallel());

    let all: Vec<&str> = names.iter().map(String::as_str).collect();
    fx.type_check(&all, &all);
    assert!(fx.state.scheduler.is_parallel());
}
