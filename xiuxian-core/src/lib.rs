//! Cultivation text-adventure engine driven by an LLM storyteller.
//!
//! This crate provides:
//! - A repair-parsing pipeline that turns unreliable model output into a
//!   typed turn result without ever failing
//! - A reconciliation boundary that merges untrusted state deltas into
//!   the canonical character record under whitelists and invariants
//! - Rolling memory compaction that keeps the conversation bounded
//! - A `GameSession` orchestrator tying it all together
//!
//! # Quick Start
//!
//! ```ignore
//! use xiuxian_core::{GameSession, Origin, SessionConfig, TurnOutcome};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::new().with_player_name("云逸");
//!     let mut session = GameSession::from_env(config)?;
//!
//!     session.start(Origin::custom("极北之地，冰龙血脉")).await;
//!     if let TurnOutcome::Completed(turn) = session.submit_action("闭关修炼").await {
//!         println!("{}", turn.narrative);
//!     }
//!
//!     session.save("xiuxian_save.json").await?;
//!     Ok(())
//! }
//! ```

pub mod memory;
pub mod parser;
pub mod persist;
pub mod reconcile;
pub mod session;
pub mod state;
pub mod testing;

// Primary public API
pub use memory::{StoryMemory, TurnEntry, TurnRole};
pub use parser::{parse, TurnResponse};
pub use persist::{PersistError, SaveData};
pub use session::{
    Completer, GameSession, Origin, SessionConfig, SessionError, TurnOutcome, TurnSummary,
};
pub use state::{
    CharacterAttribute, CharacterDelta, CharacterState, Equipment, EquipmentDelta, ItemDetail,
};
pub use testing::{MockCompleter, MockReply, TestHarness};
