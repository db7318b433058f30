//! Turn response parsing and repair.
//!
//! The storyteller is asked for a single JSON document per turn, but what
//! actually comes back drifts: code fences, preamble prose, truncated
//! output, broken quoting. `parse` absorbs all of it — strict decode
//! first, then brace extraction, then per-field regex recovery — so one
//! broken field never costs the player the whole turn. It is total: any
//! input string produces a usable `TurnResponse`.

use crate::state::{CharacterAttribute, CharacterDelta};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Art keyword used when the storyteller does not supply one.
pub const FALLBACK_ART_KEYWORD: &str = "mystery";

/// The single suggested action offered when none could be recovered.
pub const FALLBACK_CHOICE: &str = "继续";

/// Longest narrative kept when falling back to stripped raw text.
const DEGRADED_NARRATIVE_LIMIT: usize = 1000;

/// One turn's worth of storyteller output, decoded from the wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    /// Story text shown to the player. `narrative` is the one field the
    /// strict decode requires; an envelope without it falls through to
    /// field recovery, which always produces something.
    pub narrative: String,

    #[serde(default)]
    pub character_update: CharacterDelta,

    #[serde(default)]
    pub choices: Vec<String>,

    #[serde(default)]
    pub game_over: bool,

    #[serde(default = "default_art_keyword")]
    pub event_art_keyword: String,
}

fn default_art_keyword() -> String {
    FALLBACK_ART_KEYWORD.to_string()
}

static NARRATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)"narrative"\s*:\s*"((?:\\.|[^"\\])*)""#).expect("valid regex")
});
static CHOICES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""choices"\s*:\s*\[([^\]]*)\]"#).expect("valid regex"));
static GAME_OVER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)"gameOver"\s*:\s*true"#).expect("valid regex"));
static KEY_FRAGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""\w+"\s*:"#).expect("valid regex"));

/// Parse raw storyteller output into a `TurnResponse`. Never fails.
pub fn parse(raw: &str) -> TurnResponse {
    let content = strip_fences(raw);

    // Slice to the outermost JSON envelope, dropping any prose the model
    // wrapped around it.
    let (span, envelope_found) = match (content.find('{'), content.rfind('}')) {
        (Some(first), Some(last)) if first < last => (&content[first..=last], true),
        _ => (content, false),
    };

    if envelope_found {
        match serde_json::from_str::<TurnResponse>(span) {
            Ok(response) => return response,
            Err(err) => {
                tracing::warn!(error = %err, "strict decode failed, recovering fields");
            }
        }
    }

    recover_fields(raw, span, envelope_found)
}

/// Remove markdown code fences the model sometimes wraps the payload in.
fn strip_fences(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest.trim_start();
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest.trim_start();
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest.trim_end();
    }
    text
}

/// Field-by-field regex recovery. Each field is recovered independently
/// so one broken field cannot suppress the others.
fn recover_fields(raw: &str, content: &str, envelope_found: bool) -> TurnResponse {
    let narrative = match NARRATIVE_RE.captures(content).and_then(|c| c.get(1)) {
        Some(m) => unescape(m.as_str()),
        None if !envelope_found => {
            // No JSON envelope anywhere: the model answered in plain
            // prose. Pass it through verbatim rather than losing it.
            raw.to_string()
        }
        None => {
            tracing::warn!("narrative field unrecoverable, using stripped raw text");
            degraded_narrative(raw)
        }
    };

    let choices = match CHOICES_RE.captures(content).and_then(|c| c.get(1)) {
        Some(m) => recover_choices(m.as_str()),
        None => vec![FALLBACK_CHOICE.to_string()],
    };

    let mut delta = CharacterDelta {
        health: extract_int(content, "health"),
        max_health: extract_int(content, "maxHealth"),
        soul: extract_int(content, "soul"),
        max_soul: extract_int(content, "maxSoul"),
        cultivation: extract_int(content, "cultivation"),
        max_cultivation: extract_int(content, "maxCultivation"),
        spirit_stones: extract_int(content, "spiritStones"),
        ..CharacterDelta::default()
    };

    let mut attributes = BTreeMap::new();
    for attribute in CharacterAttribute::ALL {
        if let Some(value) = extract_int(content, attribute.wire_name()) {
            attributes.insert(attribute.wire_name().to_string(), value);
        }
    }
    if !attributes.is_empty() {
        delta.attributes = Some(attributes);
    }

    TurnResponse {
        narrative,
        character_update: delta,
        choices,
        game_over: GAME_OVER_RE.is_match(content),
        event_art_keyword: FALLBACK_ART_KEYWORD.to_string(),
    }
}

/// Un-escape the JSON string escapes the narrative regex leaves behind.
fn unescape(text: &str) -> String {
    text.replace("\\n", "\n")
        .replace("\\\"", "\"")
        .replace("\\\\", "\\")
}

/// Last-resort narrative: the raw text with `"key":` fragments stripped,
/// truncated so a giant malformed blob cannot flood the log.
fn degraded_narrative(raw: &str) -> String {
    let stripped = KEY_FRAGMENT_RE.replace_all(raw, "");
    let mut narrative: String = stripped.chars().take(DEGRADED_NARRATIVE_LIMIT).collect();
    narrative.push_str("...");
    narrative
}

/// Recover the choices list from the bracketed span following the key.
/// Tries a real JSON list first, then a comma split with quote stripping.
fn recover_choices(inner: &str) -> Vec<String> {
    if let Ok(list) = serde_json::from_str::<Vec<String>>(&format!("[{inner}]")) {
        return list;
    }
    inner
        .split(',')
        .map(|part| part.replace(['"', '\''], "").trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

/// Match `"<key>": <digits>` and parse the digits. `None` means the field
/// was absent or unparsable — "unchanged", never "zero".
fn extract_int(content: &str, key: &str) -> Option<i64> {
    let pattern = format!(r#""{key}"\s*:\s*(\d+)"#);
    let re = Regex::new(&pattern).ok()?;
    re.captures(content)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ItemDetail;

    #[test]
    fn test_strict_decode_round_trip() {
        let delta = CharacterDelta {
            cultivation: Some(40),
            inventory: Some(vec![serde_json::json!("回气散")]),
            item_knowledge: Some(
                [(
                    "回气散".to_string(),
                    ItemDetail {
                        rank: Some("黄阶下品".to_string()),
                        description: Some("恢复少量灵力。".to_string()),
                        effects: vec!["灵力+30".to_string()],
                        requirements: Vec::new(),
                    },
                )]
                .into_iter()
                .collect(),
            ),
            ..CharacterDelta::default()
        };

        let original = TurnResponse {
            narrative: "你服下丹药，灵力渐复。".to_string(),
            character_update: delta,
            choices: vec!["继续打坐".to_string(), "出关查看".to_string()],
            game_over: false,
            event_art_keyword: "elixir".to_string(),
        };

        let wire = serde_json::to_string(&original).expect("serialize");
        assert_eq!(parse(&wire), original);
    }

    #[test]
    fn test_code_fenced_payload() {
        let raw = "```json\n{\"narrative\":\"你打坐修炼，气息渐涨。\\nmeditation continues\",\"characterUpdate\":{\"cultivation\":40},\"choices\":[\"继续打坐\",\"出关查看\"],\"gameOver\":false}\n```";
        let parsed = parse(raw);
        assert!(parsed.narrative.contains('\n'));
        assert!(parsed.narrative.starts_with("你打坐修炼"));
        assert_eq!(parsed.choices.len(), 2);
        assert!(!parsed.game_over);
        assert_eq!(parsed.character_update.cultivation, Some(40));
        assert_eq!(parsed.event_art_keyword, FALLBACK_ART_KEYWORD);
    }

    #[test]
    fn test_prose_without_envelope_passes_through_verbatim() {
        let raw = "夜色深沉，山门之外传来一声兽吼。你握紧了手中的铁剑。";
        let parsed = parse(raw);
        assert_eq!(parsed.narrative, raw);
        assert_eq!(parsed.choices, vec![FALLBACK_CHOICE.to_string()]);
        assert!(!parsed.game_over);
    }

    #[test]
    fn test_empty_input() {
        let parsed = parse("");
        assert_eq!(parsed.narrative, "");
        assert_eq!(parsed.choices, vec![FALLBACK_CHOICE.to_string()]);
        assert!(!parsed.game_over);
        assert_eq!(parsed.event_art_keyword, FALLBACK_ART_KEYWORD);
    }

    #[test]
    fn test_broken_choices_keep_narrative_intact() {
        // Trailing comma breaks the strict decode but the narrative and
        // the choices elements are still individually recoverable.
        let raw = r#"{"narrative":"洞府之中灵气氤氲。","choices":["探索深处","返回地面",],"gameOver":false}"#;
        let parsed = parse(raw);
        assert_eq!(parsed.narrative, "洞府之中灵气氤氲。");
        assert_eq!(
            parsed.choices,
            vec!["探索深处".to_string(), "返回地面".to_string()]
        );
    }

    #[test]
    fn test_narrative_unescaping_in_recovery() {
        let raw = r#"{"narrative":"第一行\n第二行\"引言\"","choices":["继续",]}"#;
        let parsed = parse(raw);
        assert_eq!(parsed.narrative, "第一行\n第二行\"引言\"");
    }

    #[test]
    fn test_literal_newline_inside_string_value() {
        // A raw newline inside a JSON string is invalid JSON; the
        // recovery regex reads across it.
        let raw = "{\"narrative\":\"第一行\n第二行\",\"choices\":[\"继续\"],\"gameOver\":false}";
        let parsed = parse(raw);
        assert_eq!(parsed.narrative, "第一行\n第二行");
        assert_eq!(parsed.choices, vec!["继续".to_string()]);
    }

    #[test]
    fn test_numeric_recovery_from_truncated_json() {
        // Truncated mid-string: strict decode fails, numerics still land.
        let raw = r#"{"narrative":"激战之后你身受重伤。","characterUpdate":{"health": 12, "soul": 3, "spiritStones": 45, "attributes": {"道心": 11}}, "choices": ["疗伤"#;
        let parsed = parse(raw);
        let delta = &parsed.character_update;
        assert_eq!(delta.health, Some(12));
        assert_eq!(delta.soul, Some(3));
        assert_eq!(delta.spirit_stones, Some(45));
        assert_eq!(delta.max_health, None);
        let attrs = delta.attributes.as_ref().expect("attributes recovered");
        assert_eq!(attrs.get("道心"), Some(&11));
        assert_eq!(attrs.len(), 1);
    }

    #[test]
    fn test_game_over_flag_recovery_tolerates_spacing() {
        let raw = r#"{"narrative":"道消身陨。","gameOver"  :  true, "choices": ["轮回",]}"#;
        assert!(parse(raw).game_over);

        let alive = r#"{"narrative":"你侥幸逃生。","gameOver":false,"choices":["喘息",]}"#;
        assert!(!parse(alive).game_over);
    }

    #[test]
    fn test_trailing_prose_after_envelope() {
        let raw = "好的，这是剧情：{\"narrative\":\"清晨的山雾散去。\",\"choices\":[\"下山\"],\"gameOver\":false}祝游玩愉快！";
        let parsed = parse(raw);
        assert_eq!(parsed.narrative, "清晨的山雾散去。");
        assert_eq!(parsed.choices, vec!["下山".to_string()]);
    }

    #[test]
    fn test_unquoted_choices_fall_back_to_comma_split() {
        let raw = r#"{"narrative":"岔路口。","choices":['左行', 右行, ""], "gameOver": false"#;
        let parsed = parse(raw);
        assert_eq!(parsed.choices, vec!["左行".to_string(), "右行".to_string()]);
    }

    #[test]
    fn test_degraded_narrative_is_bounded() {
        let huge = format!("{{\"broken\": {}}}", "废".repeat(5000));
        let parsed = parse(&huge);
        assert!(parsed.narrative.chars().count() <= DEGRADED_NARRATIVE_LIMIT + 3);
        assert!(parsed.narrative.ends_with("..."));
    }

    #[test]
    fn test_missing_narrative_with_envelope_uses_stripped_raw() {
        let raw = r#"{"choices": ["继续"], "cultivation": 77}"#;
        let parsed = parse(raw);
        // Key fragments are stripped from the degraded fallback.
        assert!(!parsed.narrative.contains("\"choices\""));
        assert!(parsed.narrative.ends_with("..."));
        assert_eq!(parsed.character_update.cultivation, Some(77));
    }
}
