//! # Task Engine
//!
//! The embedded wasm engine that turns caller-supplied source into callable
//! procedures. One engine owns one long-lived `Store`; every module ever
//! compiled on a connection is instantiated into it, so stored procedures
//! and EVAL'd code observe the same execution context for the lifetime of
//! the session.
//!
//! ## Host surface
//!
//! Guest modules reach their invocation arguments, emit their results, and
//! share state through imports under the `task` module:
//!
//! - `arg_count() -> i32`
//! - `arg_len(i: i32) -> i32` — byte length of argument `i`
//! - `arg_copy(i: i32, ptr: i32)` — copy argument `i` into guest memory
//! - `arg_int(i: i32) -> i64` — argument `i` parsed as decimal
//! - `emit(ptr: i32, len: i32)` — append a raw byte-string result
//! - `emit_int(v: i64)` — append a decimal-formatted result
//! - `cell_get(kptr: i32, klen: i32) -> i64` — named cell, absent reads 0
//! - `cell_set(kptr: i32, klen: i32, v: i64)`
//!
//! A guest that moves byte strings either way must export its linear
//! `memory`; out-of-range indices and missing memory trap, which surfaces
//! as a run-phase failure.

use std::collections::HashMap;

use anyhow::anyhow;
use wasmtime::Caller;
use wasmtime::Extern;
use wasmtime::Linker;
use wasmtime::Memory;
use wasmtime::Module;
use wasmtime::Store;
use wasmtime::TypedFunc;

/// Exported entry point every procedure module must provide.
pub const ENTRY: &str = "run";

#[derive(Debug)]
pub enum Error {
    /// Source failed to compile, instantiate, or export a usable entry
    /// point.
    Compile(String),
    /// The procedure trapped while running.
    Run(String),
    /// The engine itself could not be constructed.
    Setup(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Compile(msg) => write!(f, "while compiling: {}", msg),
            Self::Run(msg) => write!(f, "while running: {}", msg),
            Self::Setup(msg) => write!(f, "engine setup failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Execution context shared by every procedure on one engine.
#[derive(Default)]
struct TaskCtx {
    /// Arguments of the invocation in flight.
    args: Vec<Vec<u8>>,
    /// Results emitted so far by the invocation in flight.
    out: Vec<Vec<u8>>,
    /// Named integer cells, persistent across invocations. This is the
    /// state namespace initializers and stored procedures share.
    cells: HashMap<Vec<u8>, i64>,
}

/// A compiled procedure, callable any number of times.
///
/// Holds only the typed entry point; the instance behind it lives in the
/// engine's store until the engine is dropped.
pub struct Proc {
    entry: TypedFunc<(), ()>,
}

pub struct TaskEngine {
    store: Store<TaskCtx>,
    linker: Linker<TaskCtx>,
}

impl TaskEngine {
    pub fn new() -> Result<Self> {
        let engine = wasmtime::Engine::default();
        let mut linker = Linker::new(&engine);
        install_task_imports(&mut linker).map_err(|e| Error::Setup(e.to_string()))?;
        let store = Store::new(&engine, TaskCtx::default());
        Ok(Self { store, linker })
    }

    /// Compile phase: module creation (text or binary form), instantiation,
    /// and entry-point lookup. Everything up to the first user-directed
    /// invocation counts as compiling.
    pub fn compile(&mut self, source: &[u8]) -> Result<Proc> {
        let module =
            Module::new(self.store.engine(), source).map_err(|e| Error::Compile(e.to_string()))?;
        let instance = self
            .linker
            .instantiate(&mut self.store, &module)
            .map_err(|e| Error::Compile(e.to_string()))?;
        let entry = instance
            .get_typed_func::<(), ()>(&mut self.store, ENTRY)
            .map_err(|e| Error::Compile(e.to_string()))?;
        Ok(Proc { entry })
    }

    /// Run phase: invoke with the given arguments and collect whatever the
    /// procedure emitted. A trap leaves the engine usable for the next
    /// request.
    pub fn invoke(&mut self, proc: &Proc, args: &[Vec<u8>]) -> Result<Vec<Vec<u8>>> {
        {
            let ctx = self.store.data_mut();
            ctx.args = args.to_vec();
            ctx.out.clear();
        }
        proc.entry
            .call(&mut self.store, ())
            .map_err(|e| Error::Run(e.to_string()))?;
        Ok(std::mem::take(&mut self.store.data_mut().out))
    }
}

fn install_task_imports(linker: &mut Linker<TaskCtx>) -> anyhow::Result<()> {
    linker.func_wrap("task", "arg_count", |caller: Caller<'_, TaskCtx>| -> i32 {
        caller.data().args.len() as i32
    })?;

    linker.func_wrap(
        "task",
        "arg_len",
        |caller: Caller<'_, TaskCtx>, idx: i32| -> anyhow::Result<i32> {
            Ok(lookup_arg(caller.data(), idx)?.len() as i32)
        },
    )?;

    linker.func_wrap(
        "task",
        "arg_copy",
        |mut caller: Caller<'_, TaskCtx>, idx: i32, ptr: i32| -> anyhow::Result<()> {
            let bytes = lookup_arg(caller.data(), idx)?.to_vec();
            let memory = guest_memory(&mut caller)?;
            memory.write(&mut caller, ptr as usize, &bytes)?;
            Ok(())
        },
    )?;

    linker.func_wrap(
        "task",
        "arg_int",
        |caller: Caller<'_, TaskCtx>, idx: i32| -> anyhow::Result<i64> {
            let arg = lookup_arg(caller.data(), idx)?;
            parse_i64(arg).ok_or_else(|| anyhow!("argument {} is not a decimal integer", idx))
        },
    )?;

    linker.func_wrap(
        "task",
        "emit",
        |mut caller: Caller<'_, TaskCtx>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let bytes = read_guest(&mut caller, ptr, len)?;
            caller.data_mut().out.push(bytes);
            Ok(())
        },
    )?;

    linker.func_wrap("task", "emit_int", |mut caller: Caller<'_, TaskCtx>, value: i64| {
        caller.data_mut().out.push(value.to_string().into_bytes());
    })?;

    linker.func_wrap(
        "task",
        "cell_get",
        |mut caller: Caller<'_, TaskCtx>, kptr: i32, klen: i32| -> anyhow::Result<i64> {
            let key = read_guest(&mut caller, kptr, klen)?;
            Ok(caller.data().cells.get(&key).copied().unwrap_or(0))
        },
    )?;

    linker.func_wrap(
        "task",
        "cell_set",
        |mut caller: Caller<'_, TaskCtx>, kptr: i32, klen: i32, value: i64| -> anyhow::Result<()> {
            let key = read_guest(&mut caller, kptr, klen)?;
            caller.data_mut().cells.insert(key, value);
            Ok(())
        },
    )?;

    Ok(())
}

fn lookup_arg(ctx: &TaskCtx, idx: i32) -> anyhow::Result<&[u8]> {
    usize::try_from(idx)
        .ok()
        .and_then(|i| ctx.args.get(i))
        .map(Vec::as_slice)
        .ok_or_else(|| anyhow!("argument index {} out of range", idx))
}

fn guest_memory(caller: &mut Caller<'_, TaskCtx>) -> anyhow::Result<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(anyhow!("guest does not export a linear memory")),
    }
}

fn read_guest(caller: &mut Caller<'_, TaskCtx>, ptr: i32, len: i32) -> anyhow::Result<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let mut bytes = vec![0u8; usize::try_from(len).map_err(|_| anyhow!("negative length"))?];
    memory.read(&mut *caller, ptr as usize, &mut bytes)?;
    Ok(bytes)
}

/// ASCII decimal with optional leading minus; no surrounding junk.
fn parse_i64(bytes: &[u8]) -> Option<i64> {
    std::str::from_utf8(bytes).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADD_ONE_ONE: &str = r#"
        (module
          (import "task" "emit_int" (func $emit_int (param i64)))
          (func (export "run")
            (call $emit_int (i64.add (i64.const 1) (i64.const 1)))))
    "#;

    const ECHO_FIRST: &str = r#"
        (module
          (import "task" "arg_len" (func $arg_len (param i32) (result i32)))
          (import "task" "arg_copy" (func $arg_copy (param i32 i32)))
          (import "task" "emit" (func $emit (param i32 i32)))
          (memory (export "memory") 1)
          (func (export "run")
            (call $arg_copy (i32.const 0) (i32.const 0))
            (call $emit (i32.const 0) (call $arg_len (i32.const 0)))))
    "#;

    #[test]
    fn compile_and_invoke() {
        let mut engine = TaskEngine::new().unwrap();
        let proc = engine.compile(ADD_ONE_ONE.as_bytes()).unwrap();
        assert_eq!(engine.invoke(&proc, &[]).unwrap(), vec![b"2".to_vec()]);
    }

    #[test]
    fn compile_failure_reports_compile_phase() {
        let mut engine = TaskEngine::new().unwrap();
        match engine.compile(b"(module (export") {
            Err(Error::Compile(_)) => {}
            other => panic!("expected compile error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn missing_entry_point_is_a_compile_failure() {
        let mut engine = TaskEngine::new().unwrap();
        match engine.compile(b"(module)") {
            Err(Error::Compile(_)) => {}
            other => panic!("expected compile error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn trap_reports_run_phase_and_engine_survives() {
        let mut engine = TaskEngine::new().unwrap();
        let bad = engine.compile(b"(module (func (export \"run\") unreachable))").unwrap();
        match engine.invoke(&bad, &[]) {
            Err(Error::Run(_)) => {}
            other => panic!("expected run error, got {:?}", other.map(|_| ())),
        }

        let good = engine.compile(ADD_ONE_ONE.as_bytes()).unwrap();
        assert_eq!(engine.invoke(&good, &[]).unwrap(), vec![b"2".to_vec()]);
    }

    #[test]
    fn byte_strings_cross_both_ways() {
        let mut engine = TaskEngine::new().unwrap();
        let echo = engine.compile(ECHO_FIRST.as_bytes()).unwrap();
        let payload = vec![0u8, 10, 255, 10, 0];
        assert_eq!(engine.invoke(&echo, &[payload.clone()]).unwrap(), vec![payload]);
    }

    #[test]
    fn non_decimal_argument_traps_in_arg_int() {
        let mut engine = TaskEngine::new().unwrap();
        let doubler = engine
            .compile(
                br#"
                (module
                  (import "task" "arg_int" (func $arg_int (param i32) (result i64)))
                  (import "task" "emit_int" (func $emit_int (param i64)))
                  (func (export "run")
                    (call $emit_int (i64.mul (call $arg_int (i32.const 0)) (i64.const 2)))))
                "#,
            )
            .unwrap();
        assert_eq!(engine.invoke(&doubler, &[b"21".to_vec()]).unwrap(), vec![b"42".to_vec()]);
        match engine.invoke(&doubler, &[b"nope".to_vec()]) {
            Err(Error::Run(msg)) => assert!(msg.contains("not a decimal")),
            other => panic!("expected run error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn cells_persist_across_procedures() {
        let mut engine = TaskEngine::new().unwrap();
        let bump = engine
            .compile(
                br#"
                (module
                  (import "task" "cell_get" (func $cell_get (param i32 i32) (result i64)))
                  (import "task" "cell_set" (func $cell_set (param i32 i32 i64)))
                  (memory (export "memory") 1)
                  (data (i32.const 0) "n")
                  (func (export "run")
                    (call $cell_set (i32.const 0) (i32.const 1)
                      (i64.add (call $cell_get (i32.const 0) (i32.const 1)) (i64.const 1)))))
                "#,
            )
            .unwrap();
        let read = engine
            .compile(
                br#"
                (module
                  (import "task" "cell_get" (func $cell_get (param i32 i32) (result i64)))
                  (import "task" "emit_int" (func $emit_int (param i64)))
                  (memory (export "memory") 1)
                  (data (i32.const 0) "n")
                  (func (export "run")
                    (call $emit_int (call $cell_get (i32.const 0) (i32.const 1)))))
                "#,
            )
            .unwrap();

        engine.invoke(&bump, &[]).unwrap();
        engine.invoke(&bump, &[]).unwrap();
        assert_eq!(engine.invoke(&read, &[]).unwrap(), vec![b"2".to_vec()]);
    }
}
