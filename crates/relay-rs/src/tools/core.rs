//! Tool abstraction for text-embedded function calling.
//!
//! The [`Tool`] trait is the capability interface: a static definition
//! (name, description, JSON schema) and an async `execute` over a JSON
//! argument map. [`ManagedTool`] wraps a `Tool` with the runtime state each
//! registered capability owns: a TTL result cache, hit/miss statistics,
//! timestamps, an optional rate limiter, and an execution timeout.
//!
//! [`ManagedTool::run`] never fails. Missing parameters, rate limits,
//! timeouts, errors and even panics inside `execute` all come back as an
//! error [`ToolResult`].

use super::cache::{Clock, DEFAULT_CACHE_TTL, SystemClock, ToolResultCache, cache_key};
use super::rate_limit::{RateLimit, RateLimiter};
use super::result::ToolResult;
use crate::ToolDef;
use crate::error::ToolError;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Argument map passed to [`Tool::execute`].
pub type ToolArgs = Map<String, Value>;

/// Boxed future returned by [`Tool::execute`].
///
/// Type alias to keep trait signatures and implementations readable.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send + 'a>>;

/// Default timeout for a single tool execution.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

// ── Tool trait ─────────────────────────────────────────────────────

/// A capability the model can invoke by name.
///
/// Implementors provide:
/// - A static definition ([`Tool::definition`]) whose `parameters` is a JSON
///   Schema object. Its `required` array drives parameter validation.
/// - An async [`Tool::execute`] that receives the argument map and returns a
///   JSON value, or a [`ToolError`] describing what went wrong.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// impl Tool for Echo {
///     fn definition(&self) -> ToolDef {
///         ToolDef::new("echo", "Echo the text back", json_schema_for::<EchoArgs>())
///     }
///
///     fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
///         Box::pin(async move {
///             let args: EchoArgs = parse_args(arguments)?;
///             Ok(Value::String(args.text))
///         })
///     }
/// }
/// ```
pub trait Tool: Send + Sync {
    /// The tool definition shown to the model.
    fn definition(&self) -> ToolDef;

    /// Execute the tool with the given arguments.
    ///
    /// Uses a boxed future so that the trait is dyn-compatible (object-safe).
    fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a>;

    /// The tool's name, taken from its definition.
    fn name(&self) -> String {
        self.definition().name
    }

    /// Whether successful results may be served from cache.
    fn cache_enabled(&self) -> bool {
        true
    }

    /// How long a cached result stays valid.
    fn cache_ttl(&self) -> Duration {
        DEFAULT_CACHE_TTL
    }

    /// Calls-per-window limit for tools backed by rate-limited services.
    fn rate_limit(&self) -> Option<RateLimit> {
        None
    }

    /// Upper bound on a single `execute` call.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }
}

// ── ManagedTool ────────────────────────────────────────────────────

/// Mutable per-tool state, guarded by the tool's own lock.
#[derive(Debug)]
struct ToolState {
    cache: ToolResultCache,
    last_used_at: Option<DateTime<Utc>>,
}

/// Snapshot of a tool's usage statistics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolStats {
    pub name: String,
    pub cache_enabled: bool,
    pub cache_ttl_seconds: f64,
    pub cache_size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// A registered tool: the capability plus its cache, statistics, and limits.
///
/// Each instance has its own lock, so concurrent runs of unrelated tools
/// never contend. The lock is never held across the `execute` await.
pub struct ManagedTool {
    tool: Arc<dyn Tool>,
    def: ToolDef,
    required: Vec<String>,
    clock: Arc<dyn Clock>,
    created_at: DateTime<Utc>,
    cache_enabled: bool,
    validate_args: bool,
    timeout: Duration,
    state: Mutex<ToolState>,
    limiter: Option<Mutex<RateLimiter>>,
}

impl fmt::Debug for ManagedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedTool")
            .field("name", &self.def.name)
            .field("required", &self.required)
            .field("cache_enabled", &self.cache_enabled)
            .finish()
    }
}

impl ManagedTool {
    pub fn new(tool: impl Tool + 'static) -> Self {
        Self::from_arc(Arc::new(tool))
    }

    pub fn from_arc(tool: Arc<dyn Tool>) -> Self {
        let def = tool.definition();
        let required = def.required_params();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            cache_enabled: tool.cache_enabled(),
            timeout: tool.timeout(),
            state: Mutex::new(ToolState {
                cache: ToolResultCache::new(tool.cache_ttl()),
                last_used_at: None,
            }),
            limiter: tool.rate_limit().map(|l| Mutex::new(RateLimiter::new(l))),
            created_at: clock.now(),
            clock,
            validate_args: false,
            required,
            def,
            tool,
        }
    }

    /// Use a different time source (tests drive expiry with a manual clock).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.created_at = clock.now();
        self.clock = clock;
        self
    }

    /// Enable or disable result caching.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    /// Replace the cache with an empty one using `ttl`.
    pub fn with_cache_ttl(self, ttl: Duration) -> Self {
        self.lock_state().cache = ToolResultCache::new(ttl);
        self
    }

    /// Validate arguments against the full JSON Schema, not just the
    /// `required` list.
    ///
    /// Off by default: function-syntax calls deliver every value as a
    /// string, which a strict `integer` schema would reject.
    pub fn with_arg_validation(mut self, enabled: bool) -> Self {
        self.validate_args = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn definition(&self) -> &ToolDef {
        &self.def
    }

    pub fn required_params(&self) -> &[String] {
        &self.required
    }

    fn lock_state(&self) -> MutexGuard<'_, ToolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run the tool: validate, consult the cache, execute, cache successes.
    pub async fn run(&self, arguments: &ToolArgs) -> ToolResult {
        let name = self.def.name.as_str();
        let now = self.clock.now();
        self.lock_state().last_used_at = Some(now);

        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|p| !arguments.contains_key(p.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            debug!("[tool] {name} rejected: missing {missing:?}");
            return ToolResult::error_result(ToolError::MissingParameters(missing).to_string());
        }

        if self.validate_args
            && let Some(error) = validate_tool_arguments(&self.def, arguments)
        {
            return ToolResult::error_result(error.to_string());
        }

        let key = self.cache_enabled.then(|| cache_key(name, arguments));
        if let Some(ref key) = key {
            let cached = self.lock_state().cache.lookup(key, now);
            if let Some(hit) = cached {
                debug!("[tool] {name} cache hit");
                return hit;
            }
        }

        if let Some(ref limiter) = self.limiter {
            let mut limiter = limiter.lock().unwrap_or_else(|e| e.into_inner());
            if !limiter.try_acquire(now) {
                let limit = limiter.limit();
                warn!("[tool] {name} rate limited");
                return ToolResult::error_result(
                    ToolError::RateLimited {
                        tool: name.to_string(),
                        limit: limit.max_calls,
                        window_secs: limit.window.as_secs(),
                    }
                    .to_string(),
                );
            }
        }

        log_tool_call(name, arguments);
        let start = Instant::now();
        let outcome = self.execute_guarded(arguments).await;
        debug!(
            "Tool {name} completed in {:.0}ms (ok={})",
            start.elapsed().as_secs_f64() * 1000.0,
            outcome.is_ok()
        );

        match outcome {
            Ok(value) => {
                let result = ToolResult::success_result(value);
                if let Some(key) = key {
                    let stored_at = self.clock.now();
                    self.lock_state()
                        .cache
                        .store(key, result.clone(), stored_at);
                }
                result
            }
            Err(e) => {
                info!("[tool] {name} failed: {e}");
                ToolResult::error_result(e.to_string())
            }
        }
    }

    /// `execute` under the timeout, with panics turned into errors.
    async fn execute_guarded(&self, arguments: &ToolArgs) -> Result<Value, ToolError> {
        let fut = AssertUnwindSafe(self.tool.execute(arguments)).catch_unwind();
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                Err(ToolError::Execution(format!("tool panicked: {msg}")))
            }
            Err(_) => Err(ToolError::Timeout(self.timeout)),
        }
    }

    /// Drop cached results and reset hit/miss counters.
    pub fn clear_cache(&self) {
        self.lock_state().cache.clear();
    }

    pub fn stats(&self) -> ToolStats {
        let state = self.lock_state();
        ToolStats {
            name: self.def.name.clone(),
            cache_enabled: self.cache_enabled,
            cache_ttl_seconds: state.cache.ttl().as_secs_f64(),
            cache_size: state.cache.len(),
            cache_hits: state.cache.hits(),
            cache_misses: state.cache.misses(),
            created_at: self.created_at,
            last_used_at: state.last_used_at,
        }
    }
}

// ── FnTool ────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedToolHandler = Box<
    dyn Fn(ToolArgs) -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A closure-based tool that auto-parses arguments and delegates to a handler.
///
/// Handy for one-off tools passed to a single orchestration call.
///
/// ```ignore
/// #[derive(Deserialize, JsonSchema)]
/// struct LookupArgs { id: String }
///
/// let tool = FnTool::new(
///     ToolDef::new("lookup", "Look up an order", json_schema_for::<LookupArgs>()),
///     |args: LookupArgs| async move { Ok(json!({"id": args.id, "status": "shipped"})) },
/// );
/// ```
pub struct FnTool {
    def: ToolDef,
    handler: ErasedToolHandler,
    cache_enabled: bool,
}

impl FnTool {
    pub fn new<A, F, Fut>(def: ToolDef, handler: F) -> Self
    where
        A: serde::de::DeserializeOwned + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased = move |raw: ToolArgs| -> Pin<Box<dyn Future<Output = Result<Value, ToolError>> + Send>> {
            let handler = handler.clone();
            Box::pin(async move {
                let args: A = super::args::parse_args(&raw)?;
                handler(args).await
            })
        };
        Self {
            def,
            handler: Box::new(erased),
            cache_enabled: true,
        }
    }

    /// Disable result caching (builder pattern).
    pub fn uncached(mut self) -> Self {
        self.cache_enabled = false;
        self
    }
}

impl Tool for FnTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
        (self.handler)(arguments.clone())
    }

    fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.def.name)
            .finish()
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Validate arguments against the tool's declared JSON Schema.
///
/// Returns `None` if valid, or the collected violations.
pub fn validate_tool_arguments(def: &ToolDef, arguments: &ToolArgs) -> Option<ToolError> {
    let validator = match jsonschema::validator_for(&def.parameters) {
        Ok(v) => v,
        Err(_) => return None, // If schema itself is invalid, skip validation.
    };

    let instance = Value::Object(arguments.clone());
    let errors: Vec<String> = validator
        .iter_errors(&instance)
        .map(|e| format!("{}: {e}", e.instance_path()))
        .collect();

    if errors.is_empty() {
        None
    } else {
        Some(ToolError::InvalidArguments(errors.join("; ")))
    }
}

/// Log a tool call at INFO level with a truncated preview of arguments.
pub fn log_tool_call(name: &str, arguments: &ToolArgs) {
    let rendered = Value::Object(arguments.clone()).to_string();
    let args_preview: String = rendered.chars().take(120).collect();
    info!(
        "[tool] {}({args_preview}{})",
        name,
        if rendered.chars().count() > 120 {
            "..."
        } else {
            ""
        }
    );
    trace!("[tool] {name} arguments: {rendered}");
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::cache::ManualClock;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTool {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Tool for CountingTool {
        fn definition(&self) -> ToolDef {
            ToolDef::new(
                "counter",
                "Counts invocations",
                json!({
                    "type": "object",
                    "properties": {
                        "a": { "type": "string" },
                        "b": { "type": "string" }
                    },
                    "required": ["a"]
                }),
            )
        }

        fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                if self.fail {
                    return Err(ToolError::execution("boom"));
                }
                Ok(json!({ "call": n, "a": arguments["a"] }))
            })
        }

        fn cache_ttl(&self) -> Duration {
            Duration::from_secs(60)
        }
    }

    fn counting(fail: bool) -> (ManagedTool, Arc<AtomicUsize>, Arc<ManualClock>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(ManualClock::default());
        let tool = ManagedTool::new(CountingTool {
            calls: calls.clone(),
            fail,
        })
        .with_clock(clock.clone());
        (tool, calls, clock)
    }

    fn args(v: Value) -> ToolArgs {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn missing_required_parameter_is_reported() {
        let (tool, calls, _) = counting(false);
        let result = tool.run(&args(json!({"b": "x"}))).await;
        assert!(!result.success());
        assert_eq!(result.error(), Some("Missing required parameters: a"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // No cache interaction on validation failure.
        assert_eq!(tool.stats().cache_misses, 0);
        assert!(tool.stats().last_used_at.is_some());
    }

    #[tokio::test]
    async fn second_call_with_reordered_args_is_cache_hit() {
        let (tool, calls, _) = counting(false);
        let first = tool.run(&args(json!({"a": "1", "b": "2"}))).await;

        let mut reordered = Map::new();
        reordered.insert("b".into(), json!("2"));
        reordered.insert("a".into(), json!("1"));
        let second = tool.run(&reordered).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.content(), second.content());
        let stats = tool.stats();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.cache_misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_reexecutes() {
        let (tool, calls, clock) = counting(false);
        tool.run(&args(json!({"a": "1"}))).await;
        clock.advance(Duration::from_secs(61));
        let again = tool.run(&args(json!({"a": "1"}))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(again.content().unwrap()["call"], 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (tool, calls, _) = counting(true);
        let first = tool.run(&args(json!({"a": "1"}))).await;
        let second = tool.run(&args(json!({"a": "1"}))).await;
        assert_eq!(first.error(), Some("boom"));
        assert!(!second.success());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(tool.stats().cache_size, 0);
    }

    #[tokio::test]
    async fn disabled_cache_always_executes() {
        let (tool, calls, _) = counting(false);
        let tool = tool.with_cache(false);
        tool.run(&args(json!({"a": "1"}))).await;
        tool.run(&args(json!({"a": "1"}))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(tool.stats().cache_misses, 0);
    }

    #[tokio::test]
    async fn clear_cache_resets_stats() {
        let (tool, calls, _) = counting(false);
        tool.run(&args(json!({"a": "1"}))).await;
        tool.run(&args(json!({"a": "1"}))).await;
        tool.clear_cache();
        let stats = tool.stats();
        assert_eq!((stats.cache_hits, stats.cache_misses, stats.cache_size), (0, 0, 0));
        tool.run(&args(json!({"a": "1"}))).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_tool_becomes_error_result() {
        struct Panics;
        impl Tool for Panics {
            fn definition(&self) -> ToolDef {
                ToolDef::new("panics", "Always panics", json!({"type": "object", "properties": {}}))
            }
            fn execute<'a>(&'a self, _arguments: &'a ToolArgs) -> ToolFuture<'a> {
                Box::pin(async {
                    let nothing: Option<Value> = None;
                    Ok(nothing.expect("kaboom"))
                })
            }
        }

        let result = ManagedTool::new(Panics).run(&Map::new()).await;
        assert!(!result.success());
        assert!(result.error().unwrap().contains("kaboom"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_times_out() {
        struct Slow;
        impl Tool for Slow {
            fn definition(&self) -> ToolDef {
                ToolDef::new("slow", "Sleeps", json!({"type": "object", "properties": {}}))
            }
            fn execute<'a>(&'a self, _arguments: &'a ToolArgs) -> ToolFuture<'a> {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                })
            }
        }

        let tool = ManagedTool::new(Slow).with_timeout(Duration::from_secs(2));
        let result = tool.run(&Map::new()).await;
        assert_eq!(
            result.error(),
            Some("Tool execution timed out after 2 seconds")
        );
    }

    #[tokio::test]
    async fn rate_limit_applies_after_cache() {
        struct Limited;
        impl Tool for Limited {
            fn definition(&self) -> ToolDef {
                ToolDef::new("limited", "One call a minute", json!({"type": "object", "properties": {}}))
            }
            fn execute<'a>(&'a self, arguments: &'a ToolArgs) -> ToolFuture<'a> {
                Box::pin(async move { Ok(Value::Object(arguments.clone())) })
            }
            fn rate_limit(&self) -> Option<RateLimit> {
                Some(RateLimit::per_minute(1))
            }
        }

        let tool = ManagedTool::new(Limited);
        assert!(tool.run(&args(json!({"q": "a"}))).await.success());
        // Cached answer does not consume quota.
        assert!(tool.run(&args(json!({"q": "a"}))).await.success());
        let limited = tool.run(&args(json!({"q": "b"}))).await;
        assert!(limited.error().unwrap().starts_with("Rate limit exceeded"));
    }

    #[tokio::test]
    async fn strict_validation_rejects_wrong_types() {
        let (tool, calls, _) = counting(false);
        let tool = tool.with_arg_validation(true);
        let result = tool.run(&args(json!({"a": 5}))).await;
        assert!(result.error().unwrap().starts_with("Invalid arguments"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fn_tool_parses_typed_args() {
        #[derive(serde::Deserialize)]
        struct Args {
            name: String,
        }
        let tool = FnTool::new(
            ToolDef::new("greet", "Greets", json!({"type": "object", "properties": {}})),
            |a: Args| async move { Ok(json!(format!("hello {}", a.name))) },
        );
        let ok = tool.execute(&args(json!({"name": "ada"}))).await.unwrap();
        assert_eq!(ok, json!("hello ada"));
        let err = tool.execute(&Map::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
