//! GameSession - the primary public API for running a game.
//!
//! The session owns the canonical character state and the turn log, and
//! is the only component that mutates them. Each player intent becomes
//! one completion round-trip: assemble context, call the storyteller,
//! repair-parse the reply, reconcile the proposed delta, append the
//! narration. At most one request is in flight at a time; a completion
//! failure becomes a notice in the log, never an exception at the caller.

use crate::memory::{StoryMemory, TurnEntry, TurnRole, RECENT_WINDOW};
use crate::parser::{self, TurnResponse};
use crate::persist::{self, PersistError, SaveData};
use crate::reconcile::reconcile;
use crate::state::{CharacterAttribute, CharacterState};
use async_trait::async_trait;
use openai_chat::{Client, Error as ChatError, Message, Request, Settings};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The completion collaborator seam.
///
/// Implemented by the real chat client and by the scripted mock in
/// `testing`, so the whole turn pipeline runs deterministically in tests.
#[async_trait]
pub trait Completer: Send + Sync {
    /// Send a chat request and return the raw assistant text.
    async fn complete(&self, request: Request) -> Result<String, ChatError>;

    /// Whether the collaborator can currently accept requests.
    fn is_configured(&self) -> bool {
        true
    }
}

#[async_trait]
impl Completer for Client {
    async fn complete(&self, request: Request) -> Result<String, ChatError> {
        Client::complete(self, request)
            .await
            .map(|response| response.content)
    }

    fn is_configured(&self) -> bool {
        Client::is_configured(self)
    }
}

/// Errors from session setup and persistence operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("completion endpoint error: {0}")]
    Chat(#[from] ChatError),

    #[error("persistence error: {0}")]
    Persist(#[from] PersistError),
}

/// Configuration for creating a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Player character name.
    pub player_name: String,

    /// Model override for this session.
    pub model: Option<String>,

    /// Maximum tokens per storyteller reply.
    pub max_tokens: usize,

    /// Temperature for generation.
    pub temperature: Option<f32>,

    /// Extra instructions appended to the system prompt.
    pub custom_system_prompt: Option<String>,

    /// When set, the session snapshots itself here after every turn.
    pub autosave_path: Option<PathBuf>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self {
            player_name: "修仙者".to_string(),
            model: None,
            max_tokens: 4000,
            temperature: Some(0.8),
            custom_system_prompt: None,
            autosave_path: None,
        }
    }

    pub fn with_player_name(mut self, name: impl Into<String>) -> Self {
        self.player_name = name.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_custom_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.custom_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_autosave_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.autosave_path = Some(path.into());
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a new life begins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A known starting location with its written bonus.
    Preset { name: String, bonus: String },
    /// A player-described (or random) origin the storyteller fleshes out.
    Custom { prompt: String },
}

impl Origin {
    pub fn preset(name: impl Into<String>, bonus: impl Into<String>) -> Self {
        Self::Preset {
            name: name.into(),
            bonus: bonus.into(),
        }
    }

    pub fn custom(prompt: impl Into<String>) -> Self {
        Self::Custom {
            prompt: prompt.into(),
        }
    }
}

/// Result of a player-facing operation.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The request was ignored: a turn is already in flight, or the run
    /// has ended and only a new game can follow.
    Rejected,

    /// The turn completed and the state was reconciled.
    Completed(TurnSummary),

    /// The completion endpoint failed; the notice was also appended to
    /// the turn log and nothing else changed.
    Failed { notice: String },
}

/// What the player sees after a completed turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSummary {
    pub narrative: String,
    pub choices: Vec<String>,
    pub game_over: bool,
    pub event_art_keyword: String,
}

/// A running game.
pub struct GameSession {
    completer: Box<dyn Completer>,
    settings: Option<Settings>,
    config: SessionConfig,

    character: CharacterState,
    turn_log: Vec<TurnEntry>,
    memory: StoryMemory,
    choices: Vec<String>,

    busy: bool,
    compacting: bool,
    game_over: bool,
}

impl GameSession {
    /// Create a session over a real chat client.
    pub fn new(client: Client, config: SessionConfig) -> Self {
        let settings = Some(client.settings().clone());
        Self::build(Box::new(client), settings, config)
    }

    /// Create a session from `OPENAI_API_KEY` and friends.
    pub fn from_env(config: SessionConfig) -> Result<Self, SessionError> {
        Ok(Self::new(Client::from_env()?, config))
    }

    /// Create a session over any completion collaborator.
    pub fn with_completer(completer: Box<dyn Completer>, config: SessionConfig) -> Self {
        Self::build(completer, None, config)
    }

    fn build(
        completer: Box<dyn Completer>,
        settings: Option<Settings>,
        config: SessionConfig,
    ) -> Self {
        let character = CharacterState::new(config.player_name.clone());
        Self {
            completer,
            settings,
            config,
            character,
            turn_log: Vec::new(),
            memory: StoryMemory::new(),
            choices: Vec::new(),
            busy: false,
            compacting: false,
            game_over: false,
        }
    }

    /// Resume from a snapshot, over the given collaborator.
    pub fn from_snapshot(
        saved: SaveData,
        completer: Box<dyn Completer>,
        config: SessionConfig,
    ) -> Self {
        let memory = saved.memory();
        Self {
            completer,
            settings: saved.settings,
            config,
            character: saved.character,
            turn_log: saved.turn_log,
            memory,
            choices: Vec::new(),
            busy: false,
            compacting: false,
            game_over: false,
        }
    }

    /// Load a saved game. The endpoint settings that traveled with the
    /// save take precedence over the environment.
    pub async fn load(
        path: impl AsRef<Path>,
        config: SessionConfig,
    ) -> Result<Self, SessionError> {
        let saved = SaveData::load_json(path).await?;
        let client = match &saved.settings {
            Some(settings) => Client::new(settings.clone()),
            None => Client::from_env()?,
        };
        Ok(Self::from_snapshot(saved, Box::new(client), config))
    }

    /// Begin a new life. Resets character, log, memory, and the terminal
    /// flag; this is also the restart path after a game over.
    pub async fn start(&mut self, origin: Origin) -> TurnOutcome {
        if self.busy {
            return TurnOutcome::Rejected;
        }

        self.character = CharacterState::new(self.config.player_name.clone());
        self.turn_log.clear();
        self.memory = StoryMemory::new();
        self.choices.clear();
        self.game_over = false;

        self.turn_log
            .push(TurnEntry::system("正在降临... 开启你的修仙命途..."));

        let opening = match &origin {
            Origin::Preset { name, bonus } => format!(
                "初始化游戏。\n出生地：**{name}**。\n出生地加成：{bonus}。\n\n\
                 请生成一段引人入胜的开局剧情（500字左右），交代身世背景和周围环境危机，\
                 并在最后引出第一个关键决策点。"
            ),
            Origin::Custom { prompt } => format!(
                "初始化游戏。\n玩家选择了一个自定义/随机的出生设定：**{prompt}**。\n\
                 请根据这个设定，自动生成一个合理的修仙界地点名称、环境描述、\
                 以及初始的加成（物品或属性）。\n\
                 请生成一段引人入胜的开局剧情（500字左右），交代身世背景和周围环境危机，\
                 并在最后引出第一个关键决策点。"
            ),
        };

        let messages = vec![Message::system(self.system_prompt()), Message::user(opening)];
        self.dispatch(messages).await
    }

    /// Process a player action. The main gameplay loop entry point.
    pub async fn submit_action(&mut self, action: &str) -> TurnOutcome {
        if self.busy || self.game_over {
            return TurnOutcome::Rejected;
        }
        // Context is assembled before the new entry lands so the action
        // appears exactly once, inside the status block.
        let messages = self.build_turn_messages(action);
        self.turn_log.push(TurnEntry::player(action));
        self.dispatch(messages).await
    }

    /// Ask the storyteller for guidance appropriate to the current realm.
    pub async fn request_hint(&mut self) -> TurnOutcome {
        if self.busy || self.game_over {
            return TurnOutcome::Rejected;
        }
        let instruction = format!(
            "[SYSTEM: 玩家请求提示。请根据当前境界（{}）给予指引。\
             如果是前期，教导基本操作；如果是后期，给出剧情线索。]",
            self.character.realm
        );
        let messages = self.build_turn_messages(&instruction);
        self.turn_log.push(TurnEntry::system("正在窥探天机..."));
        self.dispatch(messages).await
    }

    /// Appraise an item; the reply's `itemKnowledge` carries the result.
    pub async fn identify_item(&mut self, name: &str) -> TurnOutcome {
        if self.busy || self.game_over {
            return TurnOutcome::Rejected;
        }
        let instruction = format!(
            "[SYSTEM: 玩家尝试鉴定物品「{name}」。请描述鉴定过程，\
             给出该物品的品阶、描述、效果与使用条件，\
             并通过 characterUpdate.itemKnowledge 返回鉴定结果。]"
        );
        let messages = self.build_turn_messages(&instruction);
        self.turn_log.push(TurnEntry::system(format!("鉴定物品：{name}")));
        self.dispatch(messages).await
    }

    /// Fold old turns into the running summary when the thresholds allow.
    ///
    /// Runs automatically after every turn; safe to call any time. A
    /// failed compaction changes nothing — it is an optimization, not a
    /// correctness requirement.
    pub async fn maybe_compact(&mut self) {
        if self.compacting || self.busy || self.game_over || !self.completer.is_configured() {
            return;
        }
        let Some(range) = self.memory.compaction_range(self.turn_log.len()) else {
            return;
        };

        self.compacting = true;
        let prompt = self
            .memory
            .build_compaction_prompt(&self.turn_log[range.clone()]);
        let request = self.build_request(vec![Message::user(prompt)]);

        match self.completer.complete(request).await {
            Ok(summary) => {
                tracing::debug!(folded_through = range.end, "memory compacted");
                self.memory
                    .record_compaction(summary.trim().to_string(), range.end);
            }
            Err(err) => {
                tracing::warn!(error = %err, "memory compaction failed");
            }
        }
        self.compacting = false;
    }

    // ========================================================================
    // Turn pipeline
    // ========================================================================

    async fn dispatch(&mut self, messages: Vec<Message>) -> TurnOutcome {
        self.busy = true;
        let request = self.build_request(messages);

        let outcome = match self.completer.complete(request).await {
            Ok(raw) => self.apply_response(parser::parse(&raw)),
            Err(err) => {
                tracing::warn!(error = %err, "completion request failed");
                let notice = format!("天机混乱: {err}。请重试。");
                self.turn_log.push(TurnEntry::system(notice.clone()));
                TurnOutcome::Failed { notice }
            }
        };

        self.busy = false;
        self.autosave().await;
        self.maybe_compact().await;
        outcome
    }

    fn apply_response(&mut self, response: TurnResponse) -> TurnOutcome {
        self.turn_log
            .push(TurnEntry::narrator(response.narrative.clone()));
        self.character = reconcile(&self.character, &response.character_update);
        self.choices = response.choices.clone();
        if response.game_over {
            self.game_over = true;
        }

        TurnOutcome::Completed(TurnSummary {
            narrative: response.narrative,
            choices: response.choices,
            game_over: response.game_over,
            event_art_keyword: response.event_art_keyword,
        })
    }

    fn build_request(&self, messages: Vec<Message>) -> Request {
        let mut request = Request::new(messages).with_max_tokens(self.config.max_tokens);
        if let Some(model) = &self.config.model {
            request = request.with_model(model.clone());
        }
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }

    fn build_turn_messages(&self, action: &str) -> Vec<Message> {
        let mut messages = vec![Message::system(self.system_prompt())];

        let start = self.turn_log.len().saturating_sub(RECENT_WINDOW);
        for entry in &self.turn_log[start..] {
            messages.push(match entry.role {
                TurnRole::Player => Message::user(entry.content.as_str()),
                TurnRole::Narrator => Message::assistant(entry.content.as_str()),
                TurnRole::System => Message::system(entry.content.as_str()),
            });
        }

        messages.push(Message::user(self.status_context(action)));
        messages
    }

    fn system_prompt(&self) -> String {
        let mut prompt = String::from(include_str!("prompts/game_master.txt"));

        if let Some(custom) = &self.config.custom_system_prompt {
            prompt.push_str("\n\n");
            prompt.push_str(custom);
        }

        if !self.memory.summary.is_empty() {
            prompt.push_str("\n【长期记忆/前情提要】\n");
            prompt.push_str(&self.memory.summary);
            prompt.push_str("\n----------------\n");
        }

        prompt
    }

    /// Full state snapshot embedded in every turn so the storyteller
    /// reasons from canonical numbers, not from its own recollection.
    fn status_context(&self, action: &str) -> String {
        let c = &self.character;
        let mut context = String::from("[当前完整状态 (请检查是否有变动)]\n");
        context.push_str(&format!("灵道境界: {}\n", c.realm));
        context.push_str(&format!("肉身境界: {}\n", c.body_realm));
        context.push_str(&format!("气血(Health): {}/{}\n", c.health, c.max_health));
        context.push_str(&format!(
            "灵力(Cultivation): {}/{}\n",
            c.cultivation, c.max_cultivation
        ));
        context.push_str(&format!("神识(Soul): {}/{}\n", c.soul, c.max_soul));
        context.push_str(&format!("灵石: {}\n\n", c.spirit_stones));

        context.push_str("[核心属性]\n");
        for attribute in CharacterAttribute::ALL {
            context.push_str(&format!(
                "{}:{} ",
                attribute.wire_name(),
                c.attribute(attribute)
            ));
        }
        context.push('\n');

        context.push_str(&format!(
            "\n[装备] 武器:{}, 防具:{}, 法宝:{}\n",
            c.equipment.weapon, c.equipment.armor, c.equipment.relic
        ));
        context.push_str(&format!("[背包] {}\n", c.inventory.join(", ")));
        context.push_str(&format!("[功法] {}\n", c.techniques.join(", ")));
        if !c.status_effects.is_empty() {
            context.push_str(&format!("[状态] {}\n", c.status_effects.join(", ")));
        }

        context.push_str(&format!("\n[玩家指令]: \"{action}\"\n"));
        context.push_str("(任务：1. 描述剧情发展(叙事流); 2. 检查上述属性是否因剧情而变化; 3. 生成 JSON)\n");
        context
    }

    async fn autosave(&self) {
        let Some(path) = &self.config.autosave_path else {
            return;
        };
        if self.game_over {
            // A finished life leaves no save behind.
            persist::clear(path).await;
            return;
        }
        if let Err(err) = self.snapshot().save_json(path).await {
            tracing::warn!(error = %err, "autosave failed");
        }
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Capture the session as a snapshot.
    pub fn snapshot(&self) -> SaveData {
        SaveData::new(
            self.character.clone(),
            self.turn_log.clone(),
            &self.memory,
            self.settings.clone(),
        )
    }

    /// Save the current session to a file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        self.snapshot().save_json(path).await?;
        Ok(())
    }

    // ========================================================================
    // State queries
    // ========================================================================

    /// The canonical character record.
    pub fn character(&self) -> &CharacterState {
        &self.character
    }

    /// The full turn log, oldest first.
    pub fn turn_log(&self) -> &[TurnEntry] {
        &self.turn_log
    }

    /// Latest suggested actions.
    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    /// The rolling long-term memory.
    pub fn memory(&self) -> &StoryMemory {
        &self.memory
    }

    /// Whether a completion request is in flight.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Whether this life has ended. Sticky until the next `start`.
    pub fn is_game_over(&self) -> bool {
        self.game_over
    }

    /// Endpoint settings, when the session was built over a real client.
    pub fn settings(&self) -> Option<&Settings> {
        self.settings.as_ref()
    }
}
