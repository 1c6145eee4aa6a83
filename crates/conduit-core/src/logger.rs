//! Structured JSON logger with copy-on-write redaction and control-character
//! sanitization.
//!
//! The logger never mutates caller-supplied context: every enrichment step
//! clones before it writes, so a value passed into [`Logger::log`] is
//! observably identical before and after the call. Output is one JSON
//! object per line, written to a configurable sink that defaults to
//! stderr — never the protocol stream.

use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

/// Log severity levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Verbose diagnostic detail.
    Debug,
    /// Routine operational events.
    Info,
    /// Recoverable anomalies (late completions, AACP side-effect failures).
    Warn,
    /// Failures that affect the caller.
    Error,
}

impl Level {
    fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Default case-insensitive deny-list of context keys whose values are
/// replaced with the sentinel `[REDACTED]`.
pub const DEFAULT_REDACT_KEYS: &[&str] = &[
    "token", "key", "secret", "password", "apikey", "authorization", "bearer", "session", "cookie",
];

const REDACTED_SENTINEL: &str = "[REDACTED]";

/// Logger configuration: the redact key deny-list and the per-line byte
/// budget past which output is truncated.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Lower-cased redact key deny-list.
    pub redact_keys: Vec<String>,
    /// Maximum serialized line length in bytes before truncation.
    pub max_line_bytes: usize,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            redact_keys: DEFAULT_REDACT_KEYS.iter().map(|s| s.to_string()).collect(),
            max_line_bytes: 64 * 1024,
        }
    }
}

struct Inner {
    config: LoggerConfig,
    /// Context inherited from the logger this one was `child`ed from, merged
    /// into every entry this logger emits.
    base_context: Map<String, Value>,
    sink: Mutex<Box<dyn Write + Send>>,
}

/// A structured logger. Cheap to clone (`Arc`-backed); `child()` returns a
/// new logger carrying additional inherited context without touching the
/// parent.
#[derive(Clone)]
pub struct Logger {
    inner: Arc<Inner>,
}

impl Logger {
    /// Create a root logger writing to `sink` with `config`.
    pub fn new(config: LoggerConfig, sink: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                base_context: Map::new(),
                sink: Mutex::new(sink),
            }),
        }
    }

    /// Create a root logger writing to stderr with default configuration.
    #[must_use]
    pub fn stderr() -> Self {
        Self::new(LoggerConfig::default(), Box::new(std::io::stderr()))
    }

    /// Return a child logger that merges `ctx` into every subsequent log
    /// entry, without mutating `self` or the caller's `ctx`.
    #[must_use]
    pub fn child(&self, ctx: Map<String, Value>) -> Self {
        let merged = enrich(&self.inner.base_context, Some(&ctx));
        Self {
            inner: Arc::new(Inner {
                config: self.inner.config.clone(),
                base_context: merged,
                sink: Mutex::new(Box::new(SinkHandle { parent: self.inner.clone() })),
            }),
        }
    }

    /// Emit a log entry at the given level with an optional call-site
    /// context. `ctx` (and this logger's inherited context) are left
    /// untouched — the entry is built entirely from clones.
    pub fn log(&self, level: Level, message: &str, ctx: Option<&Map<String, Value>>) {
        let mut entry = enrich(&self.inner.base_context, ctx);
        entry.insert("timestamp".to_string(), Value::String(chrono::Utc::now().to_rfc3339()));
        entry.insert("level".to_string(), Value::String(level.as_str().to_string()));
        entry.insert("message".to_string(), Value::String(message.to_string()));

        let redacted = redact(&Value::Object(entry), &self.inner.config.redact_keys);
        let sanitized = sanitize(&redacted);

        let mut line = sanitized.to_string();
        let truncated = line.len() > self.inner.config.max_line_bytes;
        if truncated {
            let mut cut = self.inner.config.max_line_bytes.saturating_sub(32).max(0);
            while cut > 0 && !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
            line.push_str("...[TRUNCATED]");
        }

        self.write_line(&line);

        if truncated {
            self.write_line(&format!(
                r#"{{"timestamp":"{}","level":"warn","message":"log line truncated"}}"#,
                chrono::Utc::now().to_rfc3339()
            ));
        }

        tracing::event!(
            tracing::Level::INFO,
            level = level.as_str(),
            message = %message,
            "conduit log entry"
        );
    }

    fn write_line(&self, line: &str) {
        let mut sink = self.inner.sink.lock();
        let _ = writeln!(sink, "{line}");
    }

    /// Convenience wrapper for [`Level::Debug`].
    pub fn debug(&self, message: &str, ctx: Option<&Map<String, Value>>) {
        self.log(Level::Debug, message, ctx);
    }
    /// Convenience wrapper for [`Level::Info`].
    pub fn info(&self, message: &str, ctx: Option<&Map<String, Value>>) {
        self.log(Level::Info, message, ctx);
    }
    /// Convenience wrapper for [`Level::Warn`].
    pub fn warn(&self, message: &str, ctx: Option<&Map<String, Value>>) {
        self.log(Level::Warn, message, ctx);
    }
    /// Convenience wrapper for [`Level::Error`].
    pub fn error(&self, message: &str, ctx: Option<&Map<String, Value>>) {
        self.log(Level::Error, message, ctx);
    }
}

/// A child logger shares its parent's sink by delegating writes through
/// this handle rather than duplicating the underlying `Write` object.
struct SinkHandle {
    parent: Arc<Inner>,
}

impl Write for SinkHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.parent.sink.lock().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.parent.sink.lock().flush()
    }
}

/// Merge `extra` on top of `base`, producing a new map. Neither input is
/// mutated. Top-level keys in `extra` override same-named keys in `base`.
#[must_use]
pub fn enrich(base: &Map<String, Value>, extra: Option<&Map<String, Value>>) -> Map<String, Value> {
    let mut merged = base.clone();
    if let Some(extra) = extra {
        for (k, v) in extra {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

/// Recursively redact any key matching (case-insensitively) an entry in
/// `redact_keys` with the `[REDACTED]` sentinel. Array elements are
/// traversed and their nested objects redacted, but an element itself is
/// never redacted based on its parent array's key — the key name belongs to
/// the parent property, not the elements.
#[must_use]
pub fn redact(value: &Value, redact_keys: &[String]) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                let is_sensitive = redact_keys.iter().any(|rk| rk.eq_ignore_ascii_case(k));
                if is_sensitive {
                    out.insert(k.clone(), Value::String(REDACTED_SENTINEL.to_string()));
                } else {
                    out.insert(k.clone(), redact(v, redact_keys));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| redact(v, redact_keys)).collect()),
        other => other.clone(),
    }
}

/// Recursively escape C0 control characters in every string value. `\n`,
/// `\t`, `\r` become their canonical two-character escapes; other control
/// characters become `\uXXXX`. Non-string values pass through unchanged.
#[must_use]
pub fn sanitize(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_str(s)),
        Value::Object(map) => {
            Value::Object(map.iter().map(|(k, v)| (k.clone(), sanitize(v))).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize).collect()),
        other => other.clone(),
    }
}

fn sanitize_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn redact_is_case_insensitive_and_recursive() {
        let input = serde_json::json!({
            "Token": "abc",
            "nested": { "SECRET": "xyz", "fine": "ok" },
        });
        let redact_keys: Vec<String> = DEFAULT_REDACT_KEYS.iter().map(|s| s.to_string()).collect();
        let out = redact(&input, &redact_keys);
        assert_eq!(out["Token"], "[REDACTED]");
        assert_eq!(out["nested"]["SECRET"], "[REDACTED]");
        assert_eq!(out["nested"]["fine"], "ok");
        // input untouched
        assert_eq!(input["Token"], "abc");
    }

    #[test]
    fn redact_does_not_key_match_array_elements() {
        let input = serde_json::json!({
            "password": ["a", "b"],
        });
        let redact_keys: Vec<String> = DEFAULT_REDACT_KEYS.iter().map(|s| s.to_string()).collect();
        let out = redact(&input, &redact_keys);
        // the *property* "password" is redacted wholesale (its value replaced),
        // not iterated element-by-element looking for a key named "password".
        assert_eq!(out["password"], "[REDACTED]");
    }

    #[test]
    fn sanitize_escapes_control_chars() {
        let input = serde_json::json!({ "message": "line1\nline2\ttabbed\x01bell" });
        let out = sanitize(&input);
        assert_eq!(out["message"], "line1\\nline2\\ttabbed\\u0001bell");
    }

    #[test]
    fn sanitize_passes_non_strings_through() {
        let input = serde_json::json!({ "count": 42, "ok": true, "nil": null });
        let out = sanitize(&input);
        assert_eq!(out, input);
    }

    #[test]
    fn enrich_does_not_mutate_inputs() {
        let base = serde_json::json!({ "a": 1 }).as_object().unwrap().clone();
        let extra = serde_json::json!({ "b": 2 }).as_object().unwrap().clone();
        let merged = enrich(&base, Some(&extra));
        assert_eq!(merged.len(), 2);
        assert_eq!(base.len(), 1);
        assert_eq!(extra.len(), 1);
    }

    #[test]
    fn child_logger_inherits_without_mutating_parent() {
        let parent = Logger::new(LoggerConfig::default(), Box::new(Vec::<u8>::new()));
        let ctx = serde_json::json!({ "agentId": "a1" }).as_object().unwrap().clone();
        let child = parent.child(ctx.clone());
        assert_eq!(child.inner.base_context.get("agentId").unwrap(), "a1");
        assert!(parent.inner.base_context.get("agentId").is_none());
    }

    #[test]
    fn log_emits_one_json_line_with_required_fields() {
        let buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        struct Capture(Arc<Mutex<Vec<u8>>>);
        impl Write for Capture {
            fn write(&mut self, b: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(b);
                Ok(b.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let logger = Logger::new(LoggerConfig::default(), Box::new(Capture(buf.clone())));
        logger.info("hello", None);
        let out = String::from_utf8(buf.lock().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 1);
        let parsed: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed["level"], "info");
        assert_eq!(parsed["message"], "hello");
        assert!(parsed.get("timestamp").is_some());
    }

    #[test]
    fn truncation_appends_marker_and_warns() {
        let buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        struct Capture(Arc<Mutex<Vec<u8>>>);
        impl Write for Capture {
            fn write(&mut self, b: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(b);
                Ok(b.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }
        let mut config = LoggerConfig::default();
        config.max_line_bytes = 64;
        let logger = Logger::new(config, Box::new(Capture(buf.clone())));
        logger.info(&"x".repeat(200), None);
        let out = String::from_utf8(buf.lock().clone()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("...[TRUNCATED]"));
        let warn_entry: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(warn_entry["level"], "warn");
    }
}
