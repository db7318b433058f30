//! Merging storyteller deltas into canonical state.
//!
//! The delta is untrusted input: field names, value shapes, and numbers
//! all come from generated text. The merge therefore degrades by
//! omission — unknown attribute names are dropped, unusable list
//! elements are coerced or skipped — and finishes with invariant repair
//! so the canonical record can never show an over-full pool.

use crate::state::{CharacterAttribute, CharacterDelta, CharacterState};
use serde_json::Value;
use std::collections::HashSet;

/// Merge a partial update into the prior state, producing the next
/// canonical state. Pure and total: a malformed delta can lose its own
/// fields but can never corrupt the prior state or fail.
pub fn reconcile(prior: &CharacterState, delta: &CharacterDelta) -> CharacterState {
    let mut next = prior.clone();

    if let Some(name) = &delta.name {
        next.name = name.clone();
    }
    if let Some(realm) = &delta.realm {
        next.realm = realm.clone();
    }
    if let Some(body_realm) = &delta.body_realm {
        next.body_realm = body_realm.clone();
    }

    if let Some(cultivation) = delta.cultivation {
        next.cultivation = cultivation;
    }
    if let Some(max_cultivation) = delta.max_cultivation {
        next.max_cultivation = max_cultivation;
    }
    if let Some(health) = delta.health {
        next.health = health;
    }
    if let Some(max_health) = delta.max_health {
        next.max_health = max_health;
    }
    if let Some(soul) = delta.soul {
        next.soul = soul;
    }
    if let Some(max_soul) = delta.max_soul {
        next.max_soul = max_soul;
    }

    // The counter is documented non-negative; a miscounting storyteller
    // bottoms out at zero instead of driving it below.
    if let Some(spirit_stones) = delta.spirit_stones {
        next.spirit_stones = spirit_stones.max(0);
    }

    // Equipment merges per slot: naming only the weapon must not erase
    // the armor or relic slots.
    if let Some(equipment) = &delta.equipment {
        if let Some(weapon) = &equipment.weapon {
            next.equipment.weapon = weapon.clone();
        }
        if let Some(armor) = &equipment.armor {
            next.equipment.armor = armor.clone();
        }
        if let Some(relic) = &equipment.relic {
            next.equipment.relic = relic.clone();
        }
    }

    // Item knowledge merges per key; an entry present on both sides is
    // replaced wholesale by the delta's record.
    if let Some(knowledge) = &delta.item_knowledge {
        for (item, detail) in knowledge {
            next.item_knowledge.insert(item.clone(), detail.clone());
        }
    }

    // Attributes merge per key through the closed set. Invented stat
    // names are dropped here, silently: routine, not exceptional.
    if let Some(attributes) = &delta.attributes {
        for (key, value) in attributes {
            if let Some(attribute) = CharacterAttribute::from_wire(key) {
                next.attributes.insert(attribute, *value);
            }
        }
    }

    // List fields are full replacements: the storyteller is instructed
    // to emit the complete current list every time it changes.
    if let Some(inventory) = &delta.inventory {
        next.inventory = coerce_names(inventory);
    }
    if let Some(techniques) = &delta.techniques {
        next.techniques = dedupe(coerce_names(techniques));
    }
    if let Some(status_effects) = &delta.status_effects {
        next.status_effects = coerce_names(status_effects);
    }

    repair_bounds(&mut next);
    next
}

/// Coerce raw list elements to item names. Strings pass through; objects
/// collapse to their `name` field when present; anything else becomes its
/// JSON text; nulls are skipped.
fn coerce_names(values: &[Value]) -> Vec<String> {
    values.iter().filter_map(coerce_name).collect()
}

fn coerce_name(value: &Value) -> Option<String> {
    match value {
        Value::String(name) => Some(name.clone()),
        Value::Object(fields) => Some(
            fields
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value.to_string()),
        ),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Drop repeated names, keeping the first occurrence's position.
fn dedupe(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Raise each pool's `max` to its `current` whenever the merge left the
/// pair inverted. Idempotent.
fn repair_bounds(state: &mut CharacterState) {
    if state.cultivation > state.max_cultivation {
        state.max_cultivation = state.cultivation;
    }
    if state.health > state.max_health {
        state.max_health = state.health;
    }
    if state.soul > state.max_soul {
        state.max_soul = state.soul;
    }
}
