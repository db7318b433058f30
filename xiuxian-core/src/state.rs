//! Canonical character state and the partial-update shape the storyteller
//! sends back each turn.
//!
//! The canonical record is owned by the `GameSession`; everything the
//! model proposes arrives as a `CharacterDelta` and goes through
//! `reconcile` before it can touch this state.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Sentinel for an empty equipment slot.
pub const EMPTY_SLOT: &str = "无";

/// The closed set of character attributes.
///
/// These are the only attribute names ever accepted from the storyteller;
/// the wire names are the Chinese labels the prompt uses.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CharacterAttribute {
    /// 根骨 — physique, governs body refinement potential.
    #[serde(rename = "根骨")]
    Constitution,
    /// 悟性 — comprehension, governs how fast techniques are grasped.
    #[serde(rename = "悟性")]
    Wisdom,
    /// 身法 — agility.
    #[serde(rename = "身法")]
    Agility,
    /// 机缘 — fortune, governs encounter and loot quality.
    #[serde(rename = "机缘")]
    Luck,
    /// 魅力 — charisma, governs NPC disposition.
    #[serde(rename = "魅力")]
    Charisma,
    /// 道心 — willpower, checked against inner demons.
    #[serde(rename = "道心")]
    Willpower,
}

impl CharacterAttribute {
    /// All attributes, in display order.
    pub const ALL: [CharacterAttribute; 6] = [
        CharacterAttribute::Constitution,
        CharacterAttribute::Wisdom,
        CharacterAttribute::Agility,
        CharacterAttribute::Luck,
        CharacterAttribute::Charisma,
        CharacterAttribute::Willpower,
    ];

    /// The name this attribute carries on the wire and in prompts.
    pub fn wire_name(self) -> &'static str {
        match self {
            CharacterAttribute::Constitution => "根骨",
            CharacterAttribute::Wisdom => "悟性",
            CharacterAttribute::Agility => "身法",
            CharacterAttribute::Luck => "机缘",
            CharacterAttribute::Charisma => "魅力",
            CharacterAttribute::Willpower => "道心",
        }
    }

    /// Look up an attribute by its wire name. Unknown names get `None`;
    /// this is the whitelist the reconciler applies to incoming deltas.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.wire_name() == name)
    }
}

/// The three equipment slots. Empty slots hold [`EMPTY_SLOT`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Equipment {
    pub weapon: String,
    pub armor: String,
    pub relic: String,
}

impl Default for Equipment {
    fn default() -> Self {
        Self {
            weapon: EMPTY_SLOT.to_string(),
            armor: "布衣".to_string(),
            relic: EMPTY_SLOT.to_string(),
        }
    }
}

/// Per-slot partial update for equipment. A delta naming only one slot
/// leaves the other two untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weapon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub armor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relic: Option<String>,
}

/// Appraisal record for an identified item. An item absent from the
/// knowledge map is simply unidentified.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ItemDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub effects: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<String>,
}

/// The canonical character record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterState {
    pub name: String,

    /// Cultivation tier label (练气、筑基、...).
    pub realm: String,
    /// Body refinement tier label (凡体、铜皮、...).
    pub body_realm: String,

    /// Cultivation progress toward the next realm breakthrough.
    pub cultivation: i64,
    pub max_cultivation: i64,

    /// 气血 — health pool.
    pub health: i64,
    pub max_health: i64,

    /// 神识 — spiritual focus pool, drained by spells and appraisal.
    pub soul: i64,
    pub max_soul: i64,

    /// 灵石 — currency. Never negative.
    pub spirit_stones: i64,

    pub attributes: BTreeMap<CharacterAttribute, i64>,

    /// Acquisition-ordered item names; duplicates allowed.
    pub inventory: Vec<String>,

    /// Appraisal results keyed by item name.
    #[serde(default)]
    pub item_knowledge: BTreeMap<String, ItemDetail>,

    pub equipment: Equipment,

    /// Learned technique names, set-like.
    pub techniques: Vec<String>,

    /// Active conditions; replaced wholesale on update.
    pub status_effects: Vec<String>,
}

impl CharacterState {
    /// Fresh character at the start of a new game.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            realm: "凡人".to_string(),
            body_realm: "凡体".to_string(),
            cultivation: 0,
            max_cultivation: 100,
            health: 100,
            max_health: 100,
            soul: 50,
            max_soul: 50,
            spirit_stones: 0,
            attributes: CharacterAttribute::ALL.into_iter().map(|a| (a, 10)).collect(),
            inventory: Vec::new(),
            item_knowledge: BTreeMap::new(),
            equipment: Equipment::default(),
            techniques: Vec::new(),
            status_effects: Vec::new(),
        }
    }

    /// Attribute value, defaulting to 0 for a never-set attribute.
    pub fn attribute(&self, attribute: CharacterAttribute) -> i64 {
        self.attributes.get(&attribute).copied().unwrap_or(0)
    }
}

impl Default for CharacterState {
    fn default() -> Self {
        Self::new("修仙者")
    }
}

/// Partial state update proposed by the storyteller.
///
/// Every field is optional: absent means "unchanged", not "zero". List
/// fields keep raw JSON values here — the storyteller sometimes emits
/// items as objects instead of plain strings — and are coerced during
/// reconciliation. Attribute keys stay raw strings until whitelisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CharacterDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_realm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cultivation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cultivation: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_health: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub soul: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_soul: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spirit_stones: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inventory: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_knowledge: Option<BTreeMap<String, ItemDetail>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equipment: Option<EquipmentDelta>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub techniques: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_effects: Option<Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_character_defaults() {
        let character = CharacterState::new("云逸");
        assert_eq!(character.name, "云逸");
        assert_eq!(character.realm, "凡人");
        assert_eq!(character.cultivation, 0);
        assert_eq!(character.max_cultivation, 100);
        assert_eq!(character.health, 100);
        assert_eq!(character.attributes.len(), 6);
        assert_eq!(character.attribute(CharacterAttribute::Luck), 10);
        assert_eq!(character.equipment.weapon, EMPTY_SLOT);
        assert!(character.inventory.is_empty());
    }

    #[test]
    fn test_attribute_wire_names_round_trip() {
        for attribute in CharacterAttribute::ALL {
            assert_eq!(
                CharacterAttribute::from_wire(attribute.wire_name()),
                Some(attribute)
            );
        }
        assert_eq!(CharacterAttribute::from_wire("不存在属性"), None);
    }

    #[test]
    fn test_attributes_serialize_as_chinese_keys() {
        let character = CharacterState::default();
        let json = serde_json::to_value(&character).expect("serialize");
        assert_eq!(json["attributes"]["根骨"], 10);
        assert_eq!(json["attributes"]["道心"], 10);
    }

    #[test]
    fn test_delta_decodes_partial_wire_object() {
        let delta: CharacterDelta = serde_json::from_str(
            r#"{"health": 90, "cultivation": 1200, "attributes": {"根骨": 12, "道心": 15}}"#,
        )
        .expect("decode");
        assert_eq!(delta.health, Some(90));
        assert_eq!(delta.cultivation, Some(1200));
        assert_eq!(delta.max_health, None);
        let attrs = delta.attributes.expect("attributes present");
        assert_eq!(attrs.get("根骨"), Some(&12));
    }

    #[test]
    fn test_delta_tolerates_item_objects() {
        let delta: CharacterDelta = serde_json::from_str(
            r#"{"inventory": ["灵谷种子", {"name": "破旧丹炉"}]}"#,
        )
        .expect("decode");
        assert_eq!(delta.inventory.map(|v| v.len()), Some(2));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut character = CharacterState::default();
        character.inventory.push("制式铁剑".to_string());
        character.item_knowledge.insert(
            "制式铁剑".to_string(),
            ItemDetail {
                rank: Some("凡品".to_string()),
                description: Some("宗门发放的配剑。".to_string()),
                effects: vec!["攻击+5".to_string()],
                requirements: Vec::new(),
            },
        );

        let json = serde_json::to_string(&character).expect("serialize");
        let decoded: CharacterState = serde_json::from_str(&json).expect("decode");
        assert_eq!(decoded, character);
    }
}
