//! Turn log and rolling long-term memory.
//!
//! The turn log is append-only; nothing is ever deleted from it. Instead
//! the compactor folds an old prefix into a running summary and advances
//! a watermark (`compacted_through`). The most recent turns are always
//! left out of compaction because an in-flight or imminent turn may still
//! reference them as live context.

use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Un-compacted turns required before compaction fires.
pub const COMPACT_THRESHOLD: usize = 20;

/// Trailing turns always excluded from compaction.
pub const KEEP_RECENT: usize = 5;

/// Log entries assembled into each turn's conversation context.
pub const RECENT_WINDOW: usize = 30;

/// Who produced a turn log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// The player's own action text.
    Player,
    /// Storyteller narration.
    Narrator,
    /// Out-of-story notices: progress markers, failures, hints.
    System,
}

/// One entry in the append-only turn log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub role: TurnRole,
    pub content: String,
}

impl TurnEntry {
    pub fn player(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Player,
            content: content.into(),
        }
    }

    pub fn narrator(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Narrator,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            content: content.into(),
        }
    }
}

/// Rolling summary of everything folded out of the live context, plus the
/// watermark marking how far into the turn log it reaches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryMemory {
    /// Condensed long-term memory, empty until the first compaction.
    pub summary: String,

    /// Number of leading turn-log entries folded into `summary`.
    /// Invariant: `compacted_through <= turn_log.len()`.
    pub compacted_through: usize,
}

impl StoryMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The log range the next compaction would fold, if any.
    ///
    /// Fires only once at least [`COMPACT_THRESHOLD`] entries sit above
    /// the watermark, and never touches the trailing [`KEEP_RECENT`]
    /// entries. Returns `None` when there is nothing safe to fold.
    pub fn compaction_range(&self, log_len: usize) -> Option<Range<usize>> {
        if log_len.saturating_sub(self.compacted_through) < COMPACT_THRESHOLD {
            return None;
        }
        let end = log_len.saturating_sub(KEEP_RECENT);
        (end > self.compacted_through).then(|| self.compacted_through..end)
    }

    /// Build the summarization instruction for a log segment: the prior
    /// summary plus the segment's player/narrator exchanges. System
    /// notices are bookkeeping, not story, and are excluded.
    pub fn build_compaction_prompt(&self, segment: &[TurnEntry]) -> String {
        let dialogue = segment
            .iter()
            .filter(|entry| entry.role != TurnRole::System)
            .map(|entry| {
                let speaker = match entry.role {
                    TurnRole::Player => "玩家",
                    _ => "天道",
                };
                format!("{speaker}: {}", entry.content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut prompt = String::from(include_str!("prompts/summarizer.txt"));
        prompt.push_str("\n【之前的长期记忆】：\n");
        prompt.push_str(if self.summary.is_empty() {
            "暂无"
        } else {
            &self.summary
        });
        prompt.push_str("\n\n【最近的一段对话】：\n");
        prompt.push_str(&dialogue);
        prompt.push_str("\n\n请输出新的长期记忆摘要：");
        prompt
    }

    /// Record a successful compaction: replace the summary and advance
    /// the watermark to the folded range's end.
    pub fn record_compaction(&mut self, summary: impl Into<String>, folded_through: usize) {
        self.summary = summary.into();
        self.compacted_through = folded_through;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_compaction_below_threshold() {
        let memory = StoryMemory::new();
        for log_len in 0..COMPACT_THRESHOLD {
            assert_eq!(memory.compaction_range(log_len), None);
        }
    }

    #[test]
    fn test_compaction_fires_at_threshold_and_keeps_tail() {
        let memory = StoryMemory::new();
        let range = memory.compaction_range(COMPACT_THRESHOLD).expect("fires");
        assert_eq!(range, 0..COMPACT_THRESHOLD - KEEP_RECENT);
    }

    #[test]
    fn test_compaction_respects_watermark() {
        let memory = StoryMemory {
            summary: "前情。".to_string(),
            compacted_through: 15,
        };
        assert_eq!(memory.compaction_range(34), None);
        let range = memory.compaction_range(35).expect("fires");
        assert_eq!(range, 15..30);
    }

    #[test]
    fn test_watermark_never_exceeds_safe_end() {
        let memory = StoryMemory::new();
        for log_len in COMPACT_THRESHOLD..200 {
            let range = memory.compaction_range(log_len).expect("fires");
            assert!(range.end <= log_len - KEEP_RECENT);
        }
    }

    #[test]
    fn test_record_compaction_advances_watermark() {
        let mut memory = StoryMemory::new();
        memory.record_compaction("玩家入青云宗，习得引气诀。", 15);
        assert_eq!(memory.summary, "玩家入青云宗，习得引气诀。");
        assert_eq!(memory.compacted_through, 15);
    }

    #[test]
    fn test_prompt_excludes_system_entries() {
        let memory = StoryMemory::new();
        let segment = vec![
            TurnEntry::player("闭关修炼"),
            TurnEntry::system("正在窥探天机..."),
            TurnEntry::narrator("春去秋来，山中不知岁月。"),
        ];
        let prompt = memory.build_compaction_prompt(&segment);
        assert!(prompt.contains("玩家: 闭关修炼"));
        assert!(prompt.contains("天道: 春去秋来"));
        assert!(!prompt.contains("窥探天机"));
        assert!(prompt.contains("暂无"));
    }

    #[test]
    fn test_prompt_carries_existing_summary() {
        let memory = StoryMemory {
            summary: "修仙者已筑基。".to_string(),
            compacted_through: 40,
        };
        let prompt = memory.build_compaction_prompt(&[TurnEntry::player("出关")]);
        assert!(prompt.contains("修仙者已筑基。"));
        assert!(!prompt.contains("暂无"));
    }
}
