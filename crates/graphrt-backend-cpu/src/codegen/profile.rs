//! Per-node timers compiled into instrumented artifacts.
//!
//! The accessors exported here are the only way timing data leaves the
//! shared object; see `module.rs` for the lookup side.

use super::utils::{escape_c_string, push_block};

pub(crate) const TIMER_COUNT_SYMBOL: &[u8] = b"get_debug_timer_count\0";
pub(crate) const TIMER_NAME_SYMBOL: &[u8] = b"get_debug_timer_name\0";
pub(crate) const TIMER_MICROSECONDS_SYMBOL: &[u8] = b"get_debug_timer_microseconds\0";
pub(crate) const TIMER_CALL_COUNT_SYMBOL: &[u8] = b"get_debug_timer_call_count\0";

#[derive(Debug, Default)]
pub(super) struct TimerTable {
    enabled: bool,
    names: Vec<String>,
}

impl TimerTable {
    pub(super) fn new(enabled: bool) -> Self {
        TimerTable {
            enabled,
            names: Vec::new(),
        }
    }

    pub(super) fn names(&self) -> &[String] {
        &self.names
    }

    /// Registers a timer for `node_name`; `None` when timing is off.
    pub(super) fn register(&mut self, node_name: &str) -> Option<usize> {
        if !self.enabled {
            return None;
        }
        self.names.push(node_name.to_string());
        Some(self.names.len() - 1)
    }

    /// Storage and the four accessor functions. Empty when timing is off.
    pub(super) fn emit_definitions(&self) -> String {
        let mut out = String::new();
        if !self.enabled {
            return out;
        }
        let count = self.names.len();
        let names = if self.names.is_empty() {
            "\"\"".to_string()
        } else {
            self.names
                .iter()
                .map(|name| format!("\"{}\"", escape_c_string(name)))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let block = format!(
            r#"
                #define GRAPHRT_TIMER_COUNT {count}u
                #define GRAPHRT_TIMER_ARRAY_LEN (GRAPHRT_TIMER_COUNT + 1u)
                static uint64_t graphrt_timer_ns[GRAPHRT_TIMER_ARRAY_LEN];
                static uint64_t graphrt_timer_calls[GRAPHRT_TIMER_ARRAY_LEN];
                static const char* graphrt_timer_names[GRAPHRT_TIMER_ARRAY_LEN] = {{{names}}};

                static uint64_t graphrt_now_ns(void) {{
                  struct timespec ts;
                  clock_gettime(CLOCK_MONOTONIC, &ts);
                  return (uint64_t)ts.tv_sec * 1000000000ull + (uint64_t)ts.tv_nsec;
                }}

                size_t get_debug_timer_count(void) {{ return GRAPHRT_TIMER_COUNT; }}
                const char* get_debug_timer_name(size_t idx) {{
                  return idx < GRAPHRT_TIMER_COUNT ? graphrt_timer_names[idx] : 0;
                }}
                uint64_t get_debug_timer_microseconds(size_t idx) {{
                  return idx < GRAPHRT_TIMER_COUNT ? graphrt_timer_ns[idx] / 1000u : 0;
                }}
                uint64_t get_debug_timer_call_count(size_t idx) {{
                  return idx < GRAPHRT_TIMER_COUNT ? graphrt_timer_calls[idx] : 0;
                }}

            "#
        );
        push_block(&mut out, 0, &block);
        out
    }
}

pub(super) fn emit_timer_begin(module: &mut String, timer: Option<usize>) {
    if let Some(id) = timer {
        push_block(module, 1, &format!("uint64_t graphrt_start_{id} = graphrt_now_ns();"));
    }
}

pub(super) fn emit_timer_end(module: &mut String, timer: Option<usize>) {
    if let Some(id) = timer {
        let block = format!(
            r#"
                graphrt_timer_ns[{id}] += graphrt_now_ns() - graphrt_start_{id};
                graphrt_timer_calls[{id}] += 1;
            "#
        );
        push_block(module, 1, &block);
    }
}
