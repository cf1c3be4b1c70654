//! Coordination Bus — file-backed notes, directed messages, and peer status.
//!
//! Three channels live under `<repo>/.claude-swarm/coordination/<run_id>/`:
//!
//! - `notes/<worker_id>.json` — one freeform note per worker, last write wins.
//! - `messages/<recipient>/NNN-from-<sender>.json` — per-recipient inboxes;
//!   the zero-padded sequence number fixes delivery order.
//! - `status/<worker_id>.json` — a worker's self-reported progress.
//!
//! All reads are tolerant of missing or malformed files: a bad file is
//! logged and skipped rather than raised, since coordination data is
//! advisory, not load-bearing for correctness.

use std::fmt::Write as _;
use std::path::PathBuf;

use tracing::warn;

use crate::error::StoreError;
use crate::models::{Message, PeerStatus, SharedNote};

pub struct CoordinationBus {
    base_dir: PathBuf,
}

impl CoordinationBus {
    pub fn new(repo_path: impl AsRef<std::path::Path>, run_id: &str) -> Self {
        Self {
            base_dir: repo_path
                .as_ref()
                .join(".claude-swarm")
                .join("coordination")
                .join(run_id),
        }
    }

    /// Root directory this bus reads and writes under, for callers (e.g. the
    /// Worker Runner) that need to point a worker at the coordination tree
    /// without going through a narrower accessor.
    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    fn notes_dir(&self) -> PathBuf {
        self.base_dir.join("notes")
    }

    fn messages_dir(&self) -> PathBuf {
        self.base_dir.join("messages")
    }

    fn status_dir(&self) -> PathBuf {
        self.base_dir.join("status")
    }

    /// Create the per-run directory tree, plus one inbox per known worker.
    pub fn setup(&self, worker_ids: &[String]) -> Result<(), StoreError> {
        for dir in [self.notes_dir(), self.messages_dir(), self.status_dir()] {
            std::fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
                path: dir.clone(),
                source,
            })?;
        }
        for worker_id in worker_ids {
            let inbox = self.messages_dir().join(worker_id);
            std::fs::create_dir_all(&inbox).map_err(|source| StoreError::Io {
                path: inbox.clone(),
                source,
            })?;
        }
        Ok(())
    }

    fn read_json_lenient<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Option<T> {
        let raw = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "invalid coordination file, skipping");
                None
            }
        }
    }

    fn write_json(path: &std::path::Path, value: &impl serde::Serialize) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let json = serde_json::to_string_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    // ── Notes ──────────────────────────────────────────────────────

    pub fn write_note(&self, note: &SharedNote) -> Result<(), StoreError> {
        let path = self.notes_dir().join(format!("{}.json", note.worker_id));
        Self::write_json(&path, note)
    }

    pub fn read_note(&self, worker_id: &str) -> Option<SharedNote> {
        Self::read_json_lenient(&self.notes_dir().join(format!("{worker_id}.json")))
    }

    pub fn read_all_notes(&self) -> Vec<SharedNote> {
        read_sorted_json(&self.notes_dir())
    }

    pub fn format_notes_summary(&self) -> String {
        let notes = self.read_all_notes();
        if notes.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Worker Notes\n\n");
        for note in notes {
            let tags = if note.tags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", note.tags.join(", "))
            };
            let _ = writeln!(out, "### {}: {}{}\n", note.worker_id, note.topic, tags);
            let _ = writeln!(out, "{}\n", note.content);
        }
        out
    }

    // ── Messages ───────────────────────────────────────────────────

    /// Next zero-padded sequence number for `recipient`'s inbox.
    fn next_sequence(&self, recipient: &str) -> u32 {
        let inbox = self.messages_dir().join(recipient);
        let Ok(entries) = std::fs::read_dir(&inbox) else {
            return 0;
        };
        entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                e.file_name()
                    .to_str()
                    .and_then(|n| n.split('-').next())
                    .and_then(|n| n.parse::<u32>().ok())
            })
            .max()
            .map(|n| n + 1)
            .unwrap_or(0)
    }

    pub fn send_message(&self, message: &Message) -> Result<(), StoreError> {
        let seq = self.next_sequence(&message.to_worker);
        let filename = format!("{:03}-from-{}.json", seq, message.from_worker);
        let path = self.messages_dir().join(&message.to_worker).join(filename);
        Self::write_json(&path, message)
    }

    pub fn read_inbox(&self, worker_id: &str) -> Vec<Message> {
        read_sorted_json(&self.messages_dir().join(worker_id))
    }

    pub fn read_all_messages(&self) -> Vec<Message> {
        let dir = self.messages_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut inboxes: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        inboxes.sort();
        inboxes
            .into_iter()
            .flat_map(|dir| read_sorted_json::<Message>(&dir))
            .collect()
    }

    pub fn format_messages_summary(&self) -> String {
        let messages = self.read_all_messages();
        if messages.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Inter-Worker Messages\n\n");
        for msg in messages {
            let kind = serde_json::to_value(msg.message_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "### {} -> {}: {} [{}]\n",
                msg.from_worker, msg.to_worker, msg.topic, kind
            );
            let _ = writeln!(out, "{}\n", msg.content);
        }
        out
    }

    // ── Status ─────────────────────────────────────────────────────

    pub fn write_status(&self, status: &PeerStatus) -> Result<(), StoreError> {
        let path = self.status_dir().join(format!("{}.json", status.worker_id));
        Self::write_json(&path, status)
    }

    pub fn read_status(&self, worker_id: &str) -> Option<PeerStatus> {
        Self::read_json_lenient(&self.status_dir().join(format!("{worker_id}.json")))
    }

    pub fn read_all_statuses(&self) -> Vec<PeerStatus> {
        read_sorted_json(&self.status_dir())
    }

    pub fn format_status_summary(&self) -> String {
        let statuses = self.read_all_statuses();
        if statuses.is_empty() {
            return String::new();
        }
        let mut out = String::from("## Worker Status\n\n");
        for s in statuses {
            let kind = serde_json::to_value(s.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            let milestone = s
                .milestone
                .as_deref()
                .map(|m| format!(" - {m}"))
                .unwrap_or_default();
            let _ = writeln!(out, "- **{}**: {}{}\n", s.worker_id, kind, milestone);
            if let Some(details) = &s.details {
                let _ = writeln!(out, "  {details}\n");
            }
        }
        out
    }

    // ── Combined ───────────────────────────────────────────────────

    pub fn format_summary(&self) -> String {
        [
            self.format_notes_summary(),
            self.format_messages_summary(),
            self.format_status_summary(),
        ]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
    }

    pub fn cleanup(&self) {
        if self.base_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.base_dir) {
                warn!(path = %self.base_dir.display(), error = %e, "failed to remove coordination directory");
            }
        }
    }
}

fn read_sorted_json<T: serde::de::DeserializeOwned>(dir: &std::path::Path) -> Vec<T> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().map(|ext| ext == "json").unwrap_or(false))
        .collect();
    paths.sort();
    paths
        .into_iter()
        .filter_map(|p| CoordinationBus::read_json_lenient(&p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageType, PeerStatusKind};

    fn note(worker_id: &str, topic: &str) -> SharedNote {
        SharedNote {
            worker_id: worker_id.into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            topic: topic.into(),
            content: "content".into(),
            tags: vec![],
        }
    }

    #[test]
    fn setup_creates_inboxes_for_known_workers() {
        let dir = tempfile::tempdir().unwrap();
        let bus = CoordinationBus::new(dir.path(), "run-1");
        bus.setup(&["worker-1".into(), "worker-2".into()]).unwrap();

        assert!(dir
            .path()
            .join(".claude-swarm/coordination/run-1/messages/worker-1")
            .exists());
    }

    #[test]
    fn write_and_read_note_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let bus = CoordinationBus::new(dir.path(), "run-1");
        bus.setup(&[]).unwrap();
        bus.write_note(&note("worker-1", "progress")).unwrap();

        let read_back = bus.read_note("worker-1").unwrap();
        assert_eq!(read_back.topic, "progress");
        assert!(bus.read_note("worker-missing").is_none());
    }

    #[test]
    fn malformed_note_file_is_skipped_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let bus = CoordinationBus::new(dir.path(), "run-1");
        bus.setup(&[]).unwrap();
        std::fs::create_dir_all(dir.path().join(".claude-swarm/coordination/run-1/notes")).unwrap();
        std::fs::write(
            dir.path()
                .join(".claude-swarm/coordination/run-1/notes/worker-1.json"),
            "{ not json",
        )
        .unwrap();

        assert!(bus.read_note("worker-1").is_none());
        assert!(bus.read_all_notes().is_empty());
    }

    #[test]
    fn messages_deliver_in_sequence_order() {
        let dir = tempfile::tempdir().unwrap();
        let bus = CoordinationBus::new(dir.path(), "run-1");
        bus.setup(&["worker-2".into()]).unwrap();

        for (i, sender) in ["worker-1", "worker-3", "worker-4"].iter().enumerate() {
            bus.send_message(&Message {
                from_worker: sender.to_string(),
                to_worker: "worker-2".into(),
                timestamp: format!("t{i}"),
                topic: "update".into(),
                content: format!("message {i}"),
                message_type: MessageType::Info,
            })
            .unwrap();
        }

        let inbox = bus.read_inbox("worker-2");
        assert_eq!(inbox.len(), 3);
        assert_eq!(inbox[0].from_worker, "worker-1");
        assert_eq!(inbox[1].from_worker, "worker-3");
        assert_eq!(inbox[2].from_worker, "worker-4");
    }

    #[test]
    fn status_summary_includes_milestone() {
        let dir = tempfile::tempdir().unwrap();
        let bus = CoordinationBus::new(dir.path(), "run-1");
        bus.setup(&[]).unwrap();
        bus.write_status(&PeerStatus {
            worker_id: "worker-1".into(),
            timestamp: "t0".into(),
            status: PeerStatusKind::MilestoneReached,
            milestone: Some("tests green".into()),
            details: None,
        })
        .unwrap();

        let summary = bus.format_status_summary();
        assert!(summary.contains("worker-1"));
        assert!(summary.contains("tests green"));
    }

    #[test]
    fn cleanup_removes_coordination_directory() {
        let dir = tempfile::tempdir().unwrap();
        let bus = CoordinationBus::new(dir.path(), "run-1");
        bus.setup(&["worker-1".into()]).unwrap();
        bus.cleanup();

        assert!(!dir.path().join(".claude-swarm/coordination/run-1").exists());
    }
}
