// src/sandbox.rs
// Sandboxed execution of user-supplied scripts over a read-only memory API.
//
// Scripts run in a fresh rhai engine on a blocking thread. The engine gets
// exactly one object, `memory`, with `read(path)` and `list(path?)`; no
// filesystem, network, or clock surface is registered. Runtime is bounded
// by an operation cap and a 30-second deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use tokio::runtime::Handle;
use tracing::debug;

use crate::error::{EngramError, Result};
use crate::store::ObjectStore;

/// Wall-clock budget for one script.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Operation cap: backstop against tight loops that never hit a check.
const MAX_OPERATIONS: u64 = 10_000_000;

/// The `memory` object exposed to scripts.
#[derive(Clone)]
struct MemoryApi {
    handle: Handle,
    store: Arc<dyn ObjectStore>,
}

impl MemoryApi {
    /// memory.read(path) -> string | ()
    fn read(&mut self, path: &str) -> std::result::Result<Dynamic, Box<EvalAltResult>> {
        let store = self.store.clone();
        let path = path.to_string();
        let result = self
            .handle
            .block_on(async move { store.read(&path).await })
            .map_err(|e| e.to_string())?;
        Ok(match result {
            Some(obj) => Dynamic::from(obj.content),
            None => Dynamic::UNIT,
        })
    }

    /// memory.list(path?) -> [{path, size, updated_at}] (recursive)
    fn list(&mut self, prefix: &str) -> std::result::Result<rhai::Array, Box<EvalAltResult>> {
        let store = self.store.clone();
        let prefix = prefix.to_string();
        let entries = self
            .handle
            .block_on(async move { store.list(&prefix, true).await })
            .map_err(|e| e.to_string())?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                let mut map = rhai::Map::new();
                map.insert("path".into(), Dynamic::from(entry.path));
                map.insert("size".into(), Dynamic::from(entry.size as i64));
                map.insert("updated_at".into(), Dynamic::from(entry.updated_at));
                Dynamic::from_map(map)
            })
            .collect())
    }

    fn list_all(&mut self) -> std::result::Result<rhai::Array, Box<EvalAltResult>> {
        self.list("")
    }
}

pub struct Sandbox {
    store: Arc<dyn ObjectStore>,
}

impl Sandbox {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Evaluate a script and serialize its result to JSON. Every failure
    /// mode (compile, runtime, timeout) comes back as Err with the message;
    /// nothing here can take the service down.
    pub async fn execute(&self, script: &str) -> Result<serde_json::Value> {
        let api = MemoryApi {
            handle: Handle::current(),
            store: self.store.clone(),
        };
        let script = script.to_string();

        let outcome = tokio::task::spawn_blocking(move || run_script(&script, api)).await?;
        outcome.map_err(EngramError::Sandbox)
    }
}

fn run_script(script: &str, api: MemoryApi) -> std::result::Result<serde_json::Value, String> {
    let mut engine = Engine::new();
    engine.set_max_operations(MAX_OPERATIONS);

    let deadline = Instant::now() + EXECUTION_TIMEOUT;
    engine.on_progress(move |_| {
        if Instant::now() > deadline {
            Some("execution timed out".into())
        } else {
            None
        }
    });

    engine
        .register_type_with_name::<MemoryApi>("Memory")
        .register_fn("read", MemoryApi::read)
        .register_fn("list", MemoryApi::list)
        .register_fn("list", MemoryApi::list_all);

    let mut scope = Scope::new();
    scope.push_constant("memory", api);

    let started = Instant::now();
    let result = engine
        .eval_with_scope::<Dynamic>(&mut scope, script)
        .map_err(|e| e.to_string())?;
    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "script completed");

    serde_json::to_value(&result).map_err(|e| format!("result not serializable: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;

    async fn sandbox_with_files() -> Sandbox {
        let store = Arc::new(MemoryObjectStore::new());
        store.write("memory/a.md", "alpha content").await.unwrap();
        store.write("memory/notes/b.md", "beta content").await.unwrap();
        Sandbox::new(store)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_existing_file() {
        let sandbox = sandbox_with_files().await;
        let value = sandbox.execute(r#"memory.read("memory/a.md")"#).await.unwrap();
        assert_eq!(value, serde_json::json!("alpha content"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_missing_returns_unit() {
        let sandbox = sandbox_with_files().await;
        let value = sandbox.execute(r#"memory.read("memory/nope.md")"#).await.unwrap();
        assert_eq!(value, serde_json::Value::Null);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_and_aggregate() {
        let sandbox = sandbox_with_files().await;
        let value = sandbox
            .execute(r#"memory.list("memory/").len()"#)
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!(2));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_script_logic_over_memory() {
        let sandbox = sandbox_with_files().await;
        let script = r#"
            let files = memory.list("memory/");
            let total = 0;
            for f in files {
                total += f.size;
            }
            total
        "#;
        let value = sandbox.execute(script).await.unwrap();
        assert_eq!(value, serde_json::json!(25)); // 13 + 12 bytes
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_parse_error_is_captured() {
        let sandbox = sandbox_with_files().await;
        let err = sandbox.execute("let x = ;").await.unwrap_err();
        assert!(matches!(err, EngramError::Sandbox(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runtime_error_is_captured() {
        let sandbox = sandbox_with_files().await;
        let err = sandbox.execute("undefined_fn(1, 2)").await.unwrap_err();
        assert!(matches!(err, EngramError::Sandbox(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_operation_cap_stops_runaway_loop() {
        let store = Arc::new(MemoryObjectStore::new());
        let sandbox = Sandbox::new(store);
        let err = sandbox
            .execute("let x = 0; loop { x += 1; }")
            .await
            .unwrap_err();
        assert!(matches!(err, EngramError::Sandbox(_)));
    }
}
