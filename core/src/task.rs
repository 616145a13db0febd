//! Polling of long-running server tasks.
//!
//! Asynchronous operations (guest creation, migration, backups, ...) answer
//! with a task id (`UPID:...`). `wait_for_task` checks
//! `/nodes/{node}/tasks/{upid}/status` once per interval until the task
//! stops running or the time budget is spent. Both outcomes are terminal;
//! there is no retry across calls and no external cancellation.

use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::http::Transport;
use crate::params::Params;
use crate::result::ApiResult;
use crate::session::Session;

const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Interval and time budget for `Session::wait_for_task`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Build from signed milliseconds; negative values count as zero.
    pub fn from_millis(interval_ms: i64, timeout_ms: i64) -> Self {
        let millis = |ms: i64| Duration::from_millis(u64::try_from(ms).unwrap_or(0));
        Self::new(millis(interval_ms), millis(timeout_ms))
    }

    /// A zero interval becomes 500 ms; a timeout shorter than the interval
    /// becomes interval + 5 s.
    pub fn normalized(self) -> Self {
        let interval = if self.interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            self.interval
        };
        let timeout = if self.timeout < interval {
            interval.saturating_add(TIMEOUT_GRACE)
        } else {
            self.timeout
        };
        Self { interval, timeout }
    }
}

/// True when the task status resource reports a running task.
///
/// Accepts both `data: {"status": "running"}` and a bare `data: "running"`.
pub fn reports_running(data: &Value) -> bool {
    match data {
        Value::String(status) => status == "running",
        Value::Object(fields) => fields.get("status").and_then(Value::as_str) == Some("running"),
        _ => false,
    }
}

fn status_path(node: &str, upid: &str) -> String {
    format!("/nodes/{node}/tasks/{upid}/status")
}

impl<T: Transport> Session<T> {
    /// One read of the task status resource.
    pub fn task_status(&mut self, node: &str, upid: &str) -> ApiResult {
        self.get(&status_path(node, upid), &Params::new())
    }

    pub fn is_task_running(&mut self, node: &str, upid: &str) -> bool {
        reports_running(self.task_status(node, upid).data())
    }

    /// `exitstatus` of the task (for example `OK`); `None` while running or
    /// when the server did not report one. Does not poll.
    pub fn task_exit_status(&mut self, node: &str, upid: &str) -> Option<String> {
        self.task_status(node, upid)
            .data()
            .get("exitstatus")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    /// Block until the task stops running (`true`) or the timeout elapses
    /// (`false`). The first check happens one interval after the call.
    pub fn wait_for_task(&mut self, node: &str, upid: &str, options: PollOptions) -> bool {
        let PollOptions { interval, timeout } = options.normalized();
        let started = Instant::now();
        let mut polls = 0u32;

        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                tracing::debug!(node, upid, polls, "task wait timed out");
                return false;
            }
            thread::sleep(interval.min(remaining));

            polls += 1;
            let running = self.is_task_running(node, upid);
            tracing::debug!(node, upid, polls, running, "polled task status");
            if !running {
                return true;
            }
        }
    }

    /// `wait_for_task` with millisecond arguments.
    pub fn wait_for_task_to_finish(
        &mut self,
        node: &str,
        upid: &str,
        interval_ms: i64,
        timeout_ms: i64,
    ) -> bool {
        self.wait_for_task(node, upid, PollOptions::from_millis(interval_ms, timeout_ms))
    }
}
