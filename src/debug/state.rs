use crate::bus::SourceLocation;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::SystemTime;

/// Session lifecycle. `Stopped` and `Error` are terminal: no further
/// operations are accepted and no event may mutate the session again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Starting,
    Running,
    Paused,
    Stopped,
    Error,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Starting => "starting",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
            SessionState::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub id: i32,
    pub file: String,
    pub line: i32,
    pub verified: bool,
}

/// Mutable per-session context: lifecycle state, the breakpoint table, and
/// the current thread/frame cache maintained from `stopped` events.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub state: SessionState,
    pub breakpoints: HashMap<String, Vec<Breakpoint>>,
    pub current_thread_id: Option<i32>,
    pub current_frame_id: Option<i32>,
    pub current_location: Option<SourceLocation>,
    pub last_error: Option<String>,
    pub started_at: SystemTime,
}

impl SessionContext {
    pub fn new() -> Self {
        Self {
            state: SessionState::Starting,
            breakpoints: HashMap::new(),
            current_thread_id: None,
            current_frame_id: None,
            current_location: None,
            last_error: None,
            started_at: SystemTime::now(),
        }
    }

    pub fn set_state(&mut self, state: SessionState) {
        if self.state.is_terminal() {
            return;
        }
        self.state = state;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.state.is_terminal() {
            return;
        }
        self.state = SessionState::Error;
        self.last_error = Some(message.into());
    }

    /// The full ordered line list currently desired for `file`, with
    /// `line` added at the end when not already present. This is what gets
    /// sent to the adapter as an absolute replacement.
    pub fn lines_with(&self, file: &str, line: i32) -> Vec<i32> {
        let mut lines: Vec<i32> = self
            .breakpoints
            .get(file)
            .map(|bps| bps.iter().map(|bp| bp.line).collect())
            .unwrap_or_default();
        if !lines.contains(&line) {
            lines.push(line);
        }
        lines
    }

    /// The desired line list for `file` with `line` removed.
    pub fn lines_without(&self, file: &str, line: i32) -> Vec<i32> {
        self.breakpoints
            .get(file)
            .map(|bps| {
                bps.iter()
                    .map(|bp| bp.line)
                    .filter(|&l| l != line)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the cached table for `file` from the adapter's response.
    /// The response array corresponds positionally to the request lines;
    /// an omitted adapter id falls back to the position index.
    pub fn record_breakpoints(
        &mut self,
        file: &str,
        requested_lines: &[i32],
        verified: &[crate::dap::types::Breakpoint],
    ) {
        let entries: Vec<Breakpoint> = requested_lines
            .iter()
            .enumerate()
            .map(|(idx, &line)| {
                let reply = verified.get(idx);
                Breakpoint {
                    id: reply
                        .and_then(|bp| bp.id)
                        .unwrap_or(idx as i32),
                    file: file.to_string(),
                    line: reply.and_then(|bp| bp.line).unwrap_or(line),
                    verified: reply.map(|bp| bp.verified).unwrap_or(false),
                }
            })
            .collect();

        if entries.is_empty() {
            self.breakpoints.remove(file);
        } else {
            self.breakpoints.insert(file.to_string(), entries);
        }
    }

    pub fn breakpoints_for(&self, file: &str) -> Vec<Breakpoint> {
        self.breakpoints.get(file).cloned().unwrap_or_default()
    }

    pub fn all_breakpoints(&self) -> Vec<Breakpoint> {
        let mut files: Vec<&String> = self.breakpoints.keys().collect();
        files.sort();
        files
            .into_iter()
            .flat_map(|file| self.breakpoints[file].clone())
            .collect()
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter_bp(id: Option<i32>, line: i32, verified: bool) -> crate::dap::types::Breakpoint {
        serde_json::from_value(json!({
            "id": id,
            "verified": verified,
            "line": line,
        }))
        .unwrap()
    }

    #[test]
    fn test_new_context_is_starting() {
        let ctx = SessionContext::new();
        assert_eq!(ctx.state, SessionState::Starting);
        assert!(ctx.breakpoints.is_empty());
        assert!(ctx.current_thread_id.is_none());
        assert!(ctx.current_frame_id.is_none());
    }

    #[test]
    fn test_terminal_states_reject_transitions() {
        let mut ctx = SessionContext::new();
        ctx.set_state(SessionState::Stopped);
        ctx.set_state(SessionState::Running);
        assert_eq!(ctx.state, SessionState::Stopped);

        let mut ctx = SessionContext::new();
        ctx.fail("handshake exploded");
        ctx.set_state(SessionState::Running);
        assert_eq!(ctx.state, SessionState::Error);
        assert_eq!(ctx.last_error.as_deref(), Some("handshake exploded"));
    }

    #[test]
    fn test_lines_with_appends_preserving_order() {
        let mut ctx = SessionContext::new();
        ctx.record_breakpoints("/t/a.py", &[10], &[adapter_bp(Some(1), 10, true)]);

        assert_eq!(ctx.lines_with("/t/a.py", 20), vec![10, 20]);
        // Idempotent: re-adding an existing line does not duplicate it.
        assert_eq!(ctx.lines_with("/t/a.py", 10), vec![10]);
        assert_eq!(ctx.lines_with("/t/other.py", 5), vec![5]);
    }

    #[test]
    fn test_lines_without_removes_target() {
        let mut ctx = SessionContext::new();
        ctx.record_breakpoints(
            "/t/a.py",
            &[10, 20],
            &[adapter_bp(Some(1), 10, true), adapter_bp(Some(2), 20, true)],
        );

        assert_eq!(ctx.lines_without("/t/a.py", 10), vec![20]);
        assert_eq!(ctx.lines_without("/t/a.py", 99), vec![10, 20]);
        assert!(ctx.lines_without("/t/missing.py", 1).is_empty());
    }

    #[test]
    fn test_record_breakpoints_replaces_cache() {
        let mut ctx = SessionContext::new();
        ctx.record_breakpoints("/t/a.py", &[10], &[adapter_bp(Some(1), 10, true)]);
        ctx.record_breakpoints(
            "/t/a.py",
            &[10, 20],
            &[adapter_bp(Some(1), 10, true), adapter_bp(Some(2), 20, false)],
        );

        let bps = ctx.breakpoints_for("/t/a.py");
        assert_eq!(bps.len(), 2);
        assert_eq!(bps[1].id, 2);
        assert!(!bps[1].verified);
    }

    #[test]
    fn test_record_breakpoints_id_fallback_is_positional() {
        let mut ctx = SessionContext::new();
        ctx.record_breakpoints(
            "/t/a.py",
            &[10, 20],
            &[adapter_bp(None, 10, true), adapter_bp(None, 20, true)],
        );

        let bps = ctx.breakpoints_for("/t/a.py");
        assert_eq!(bps[0].id, 0);
        assert_eq!(bps[1].id, 1);
    }

    #[test]
    fn test_record_breakpoints_short_response_keeps_requested_lines() {
        // Unverified entries are retained so later reconciliation can
        // verify them, even if the adapter reply came up short.
        let mut ctx = SessionContext::new();
        ctx.record_breakpoints("/t/a.py", &[10, 20], &[adapter_bp(Some(1), 10, true)]);

        let bps = ctx.breakpoints_for("/t/a.py");
        assert_eq!(bps.len(), 2);
        assert_eq!(bps[1].line, 20);
        assert!(!bps[1].verified);
    }

    #[test]
    fn test_record_empty_clears_file_entry() {
        let mut ctx = SessionContext::new();
        ctx.record_breakpoints("/t/a.py", &[10], &[adapter_bp(Some(1), 10, true)]);
        ctx.record_breakpoints("/t/a.py", &[], &[]);

        assert!(ctx.breakpoints.get("/t/a.py").is_none());
        assert!(ctx.breakpoints_for("/t/a.py").is_empty());
    }

    #[test]
    fn test_all_breakpoints_sorted_by_file() {
        let mut ctx = SessionContext::new();
        ctx.record_breakpoints("/t/b.py", &[5], &[adapter_bp(Some(1), 5, true)]);
        ctx.record_breakpoints("/t/a.py", &[9], &[adapter_bp(Some(2), 9, true)]);

        let all = ctx.all_breakpoints();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].file, "/t/a.py");
        assert_eq!(all[1].file, "/t/b.py");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Paused.to_string(), "paused");
        assert!(SessionState::Stopped.is_terminal());
        assert!(SessionState::Error.is_terminal());
        assert!(!SessionState::Running.is_terminal());
    }
}
