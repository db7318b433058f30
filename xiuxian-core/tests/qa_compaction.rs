//! QA tests for rolling-memory compaction: trigger gating, watermark
//! advancement, failure tolerance, and summary injection into later
//! turns' context.

use xiuxian_core::testing::TestHarness;
use xiuxian_core::TurnRole;

fn turn(narrative: &str) -> String {
    format!(r#"{{"narrative":"{narrative}","choices":["继续"],"gameOver":false}}"#)
}

/// Run `count` scripted turns; each one appends a player and a narrator
/// entry to the log.
async fn run_turns(harness: &mut TestHarness, count: usize) {
    for i in 0..count {
        harness.session.submit_action(&format!("行动{i}")).await;
    }
}

// =============================================================================
// TEST 1: No compaction below the threshold
// =============================================================================

#[tokio::test]
async fn test_no_compaction_below_threshold() {
    let mut harness = TestHarness::new();
    for i in 0..9 {
        harness.expect_reply(turn(&format!("第{i}回")));
    }

    run_turns(&mut harness, 9).await;

    // 18 log entries: under the 20-entry trigger, so every request was a
    // turn and none was a summarization.
    assert_eq!(harness.session.turn_log().len(), 18);
    assert_eq!(harness.endpoint.request_count(), 9);
    assert!(harness.session.memory().summary.is_empty());
    assert_eq!(harness.session.memory().compacted_through, 0);
}

// =============================================================================
// TEST 2: Compaction fires at the threshold and spares the recent tail
// =============================================================================

#[tokio::test]
async fn test_compaction_advances_watermark() {
    let mut harness = TestHarness::new();
    for i in 0..10 {
        harness.expect_reply(turn(&format!("第{i}回")));
    }
    // Consumed by the summarization request that follows the tenth turn.
    harness.expect_reply("修仙者入青云宗，习得引气诀，结识药师阿芷。");

    run_turns(&mut harness, 10).await;

    assert_eq!(harness.session.turn_log().len(), 20);
    assert_eq!(harness.endpoint.request_count(), 11);

    let memory = harness.session.memory();
    assert_eq!(memory.summary, "修仙者入青云宗，习得引气诀，结识药师阿芷。");
    // 20 entries minus the 5-entry safety tail.
    assert_eq!(memory.compacted_through, 15);

    // The summarization request is a single text-mode user message built
    // from the folded dialogue, not a JSON game turn.
    let request = harness.endpoint.last_request().expect("request captured");
    assert_eq!(request.messages.len(), 1);
    assert!(request.messages[0].content.contains("玩家: 行动0"));
    assert!(request.messages[0].content.contains("天道: 第0回"));
}

// =============================================================================
// TEST 3: A failed compaction changes nothing and retries later
// =============================================================================

#[tokio::test]
async fn test_failed_compaction_is_swallowed() {
    let mut harness = TestHarness::new();
    for i in 0..10 {
        harness.expect_reply(turn(&format!("第{i}回")));
    }
    harness.expect_failure("summarizer unavailable");

    run_turns(&mut harness, 10).await;

    // Watermark and summary untouched, and no notice polluted the log.
    let memory = harness.session.memory();
    assert!(memory.summary.is_empty());
    assert_eq!(memory.compacted_through, 0);
    assert!(harness
        .session
        .turn_log()
        .iter()
        .all(|entry| entry.role != TurnRole::System));

    // The next turn leaves the threshold satisfied, so it retries.
    harness.expect_reply(turn("第十一回"));
    harness.expect_reply("修仙者连历十一劫。");
    run_turns(&mut harness, 1).await;

    let memory = harness.session.memory();
    assert_eq!(memory.summary, "修仙者连历十一劫。");
    assert_eq!(memory.compacted_through, 17);
}

// =============================================================================
// TEST 4: The summary feeds the next turn's system prompt
// =============================================================================

#[tokio::test]
async fn test_summary_injected_into_later_context() {
    let mut harness = TestHarness::new();
    for i in 0..10 {
        harness.expect_reply(turn(&format!("第{i}回")));
    }
    harness.expect_reply("修仙者与剑冢结缘。");

    run_turns(&mut harness, 10).await;

    harness.expect_reply(turn("剑冢旧识来访。"));
    run_turns(&mut harness, 1).await;

    // The follow-up turn's system prompt carries the long-term memory
    // block produced by the compaction.
    let request = harness.endpoint.last_request().expect("request captured");
    let system = &request.messages[0].content;
    assert!(system.contains("【长期记忆/前情提要】"));
    assert!(system.contains("修仙者与剑冢结缘。"));
}
