//! Packaged example libraries.
//!
//! Each function is a self-contained wasm text module speaking the `task`
//! host interface (see the farrun crate for the import surface). They are
//! deliberately small: the point is to exercise batch registration and the
//! run-once initializer, not to be a maths package.

use crate::library::LibraryBundle;

/// Integer helpers over decimal-formatted arguments.
pub fn math() -> LibraryBundle {
    LibraryBundle::new("far::math")
        .function("add", ADD)
        .function("double", DOUBLE)
        .function("sum", SUM)
}

/// Named counters over the shared cell context.
///
/// The initializer bumps the `tally.boots` cell, so `boots` reports how
/// many times the namespace was actually initialized — exactly once per
/// executor, however many times the library is loaded.
pub fn tally() -> LibraryBundle {
    LibraryBundle::new("far::tally")
        .with_init(TALLY_INIT)
        .function("bump", BUMP)
        .function("count", COUNT)
        .function("boots", BOOTS)
}

const ADD: &str = r#"
(module
  (import "task" "arg_int" (func $arg_int (param i32) (result i64)))
  (import "task" "emit_int" (func $emit_int (param i64)))
  (func (export "run")
    (call $emit_int
      (i64.add (call $arg_int (i32.const 0)) (call $arg_int (i32.const 1))))))
"#;

const DOUBLE: &str = r#"
(module
  (import "task" "arg_int" (func $arg_int (param i32) (result i64)))
  (import "task" "emit_int" (func $emit_int (param i64)))
  (func (export "run")
    (call $emit_int (i64.mul (call $arg_int (i32.const 0)) (i64.const 2)))))
"#;

const SUM: &str = r#"
(module
  (import "task" "arg_count" (func $arg_count (result i32)))
  (import "task" "arg_int" (func $arg_int (param i32) (result i64)))
  (import "task" "emit_int" (func $emit_int (param i64)))
  (func (export "run")
    (local $i i32)
    (local $acc i64)
    (block $done
      (loop $next
        (br_if $done (i32.ge_s (local.get $i) (call $arg_count)))
        (local.set $acc (i64.add (local.get $acc) (call $arg_int (local.get $i))))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $next)))
    (call $emit_int (local.get $acc))))
"#;

const TALLY_INIT: &str = r#"
(module
  (import "task" "cell_get" (func $cell_get (param i32 i32) (result i64)))
  (import "task" "cell_set" (func $cell_set (param i32 i32 i64)))
  (memory (export "memory") 1)
  (data (i32.const 0) "tally.boots")
  (func (export "run")
    (call $cell_set (i32.const 0) (i32.const 11)
      (i64.add (call $cell_get (i32.const 0) (i32.const 11)) (i64.const 1)))))
"#;

const BUMP: &str = r#"
(module
  (import "task" "arg_len" (func $arg_len (param i32) (result i32)))
  (import "task" "arg_copy" (func $arg_copy (param i32 i32)))
  (import "task" "cell_get" (func $cell_get (param i32 i32) (result i64)))
  (import "task" "cell_set" (func $cell_set (param i32 i32 i64)))
  (memory (export "memory") 1)
  (func (export "run")
    (call $arg_copy (i32.const 0) (i32.const 0))
    (call $cell_set (i32.const 0) (call $arg_len (i32.const 0))
      (i64.add
        (call $cell_get (i32.const 0) (call $arg_len (i32.const 0)))
        (i64.const 1)))))
"#;

const COUNT: &str = r#"
(module
  (import "task" "arg_len" (func $arg_len (param i32) (result i32)))
  (import "task" "arg_copy" (func $arg_copy (param i32 i32)))
  (import "task" "cell_get" (func $cell_get (param i32 i32) (result i64)))
  (import "task" "emit_int" (func $emit_int (param i64)))
  (memory (export "memory") 1)
  (func (export "run")
    (call $arg_copy (i32.const 0) (i32.const 0))
    (call $emit_int (call $cell_get (i32.const 0) (call $arg_len (i32.const 0))))))
"#;

const BOOTS: &str = r#"
(module
  (import "task" "cell_get" (func $cell_get (param i32 i32) (result i64)))
  (import "task" "emit_int" (func $emit_int (param i64)))
  (memory (export "memory") 1)
  (data (i32.const 0) "tally.boots")
  (func (export "run")
    (call $emit_int (call $cell_get (i32.const 0) (i32.const 11)))))
"#;
