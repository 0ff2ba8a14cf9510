use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upstream event feeds the fetcher can page through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataType {
    DamageDone,
    DamageTaken,
    Healing,
    Casts,
    Deaths,
    Resources,
    Buffs,
    Debuffs,
}

impl DataType {
    /// GraphQL enum name on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            DataType::DamageDone => "DamageDone",
            DataType::DamageTaken => "DamageTaken",
            DataType::Healing => "Healing",
            DataType::Casts => "Casts",
            DataType::Deaths => "Deaths",
            DataType::Resources => "Resources",
            DataType::Buffs => "Buffs",
            DataType::Debuffs => "Debuffs",
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific payload of a combat event. Unknown upstream types keep their
/// raw map so nothing is silently discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventKind {
    Damage {
        amount: f64,
        mitigated: f64,
        overkill: f64,
        hit_type: Option<String>,
    },
    Heal {
        amount: f64,
        overheal: f64,
    },
    Cast,
    ApplyBuff,
    ApplyDebuff {
        stack: bool,
    },
    RefreshDebuff,
    RemoveDebuff,
    Death {
        killing_ability_id: Option<u32>,
    },
    Resource,
    Other {
        event_type: String,
        raw: Map<String, Value>,
    },
}

/// Hit-type values that mean the swing never landed.
const AVOID_HINTS: [&str; 7] = ["miss", "evade", "parry", "dodge", "immune", "resist", "absorb"];

/// A single combat event with its shared header and the fields derived during
/// normalization (`fight_id`, `pull_index`, `phase_id`, `offset_ms`, `seq`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp_ms: i64,
    /// -1 means the environment / no actor.
    pub source_id: i64,
    pub target_id: i64,
    pub ability_id: Option<u32>,
    pub ability_name: Option<String>,
    pub kind: EventKind,
    pub fight_id: u32,
    pub pull_index: u32,
    pub phase_id: u32,
    pub offset_ms: i64,
    /// Insertion order, used as the stable sort tie-break.
    pub seq: u64,
}

impl Event {
    /// Decode one raw upstream event map. Returns `None` when the row has no
    /// usable timestamp.
    pub fn from_raw(raw: &Value) -> Option<Self> {
        let map = raw.as_object()?;
        let timestamp_ms = read_i64(map, "timestamp")?;

        let source_id = map
            .get("sourceID")
            .and_then(Value::as_i64)
            .or_else(|| nested_id(map, "source"))
            .unwrap_or(-1);
        let target_id = map
            .get("targetID")
            .and_then(Value::as_i64)
            .or_else(|| nested_id(map, "target"))
            .unwrap_or(-1);

        let ability_id = map
            .get("abilityGameID")
            .and_then(Value::as_u64)
            .or_else(|| {
                map.get("ability")
                    .and_then(Value::as_object)
                    .and_then(|a| a.get("guid").or_else(|| a.get("id")))
                    .and_then(Value::as_u64)
            })
            .map(|id| id as u32);
        let ability_name = map
            .get("ability")
            .and_then(Value::as_object)
            .and_then(|a| a.get("name"))
            .and_then(Value::as_str)
            .map(str::to_owned);

        let event_type = map
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_ascii_lowercase();

        let kind = match event_type.as_str() {
            "damage" => EventKind::Damage {
                amount: read_f64(map, "amount"),
                mitigated: read_f64(map, "mitigated"),
                overkill: read_f64(map, "overkill"),
                hit_type: map.get("hitType").map(scalar_to_string),
            },
            "heal" => EventKind::Heal {
                amount: read_f64(map, "amount"),
                overheal: read_f64(map, "overheal"),
            },
            "cast" | "begincast" => EventKind::Cast,
            "applybuff" | "applybuffstack" => EventKind::ApplyBuff,
            "applydebuff" => EventKind::ApplyDebuff { stack: false },
            "applydebuffstack" => EventKind::ApplyDebuff { stack: true },
            "refreshdebuff" => EventKind::RefreshDebuff,
            "removedebuff" | "removedebuffstack" => EventKind::RemoveDebuff,
            "death" | "instakill" => EventKind::Death {
                killing_ability_id: map
                    .get("killingAbilityGameID")
                    .and_then(Value::as_u64)
                    .map(|id| id as u32)
                    .or(ability_id),
            },
            "resourcechange" => EventKind::Resource,
            _ => EventKind::Other {
                event_type,
                raw: map.clone(),
            },
        };

        Some(Self {
            timestamp_ms,
            source_id,
            target_id,
            ability_id,
            ability_name,
            kind,
            fight_id: 0,
            pull_index: 0,
            phase_id: 1,
            offset_ms: 0,
            seq: 0,
        })
    }

    pub fn is_damage(&self) -> bool {
        matches!(self.kind, EventKind::Damage { .. })
    }

    pub fn is_death(&self) -> bool {
        matches!(self.kind, EventKind::Death { .. })
    }

    /// True for debuff applications (fresh or stacked).
    pub fn is_debuff_apply(&self) -> bool {
        matches!(self.kind, EventKind::ApplyDebuff { .. })
    }

    pub fn damage_amount(&self) -> f64 {
        match &self.kind {
            EventKind::Damage { amount, .. } => *amount,
            _ => 0.0,
        }
    }

    pub fn heal_amount(&self) -> f64 {
        match &self.kind {
            EventKind::Heal { amount, .. } => *amount,
            _ => 0.0,
        }
    }

    /// A damage event whose hit type says it was fully avoided.
    pub fn is_avoided(&self) -> bool {
        match &self.kind {
            EventKind::Damage {
                hit_type: Some(ht), ..
            } => {
                let lowered = ht.to_ascii_lowercase();
                AVOID_HINTS.iter().any(|hint| lowered == *hint)
            }
            _ => false,
        }
    }
}

fn read_i64(map: &Map<String, Value>, key: &str) -> Option<i64> {
    let value = map.get(key)?;
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn read_f64(map: &Map<String, Value>, key: &str) -> f64 {
    map.get(key)
        .and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
        })
        .unwrap_or(0.0)
}

fn nested_id(map: &Map<String, Value>, key: &str) -> Option<i64> {
    map.get(key)
        .and_then(Value::as_object)
        .and_then(|o| o.get("id").or_else(|| o.get("guid")))
        .and_then(Value::as_i64)
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_damage_event() {
        let raw = json!({
            "timestamp": 112_000,
            "type": "damage",
            "sourceID": 20,
            "targetID": 3,
            "abilityGameID": 1_227_472,
            "amount": 150_000.0,
            "overkill": 0,
            "hitType": 1
        });
        let ev = Event::from_raw(&raw).unwrap();
        assert_eq!(ev.timestamp_ms, 112_000);
        assert_eq!(ev.source_id, 20);
        assert_eq!(ev.target_id, 3);
        assert_eq!(ev.ability_id, Some(1_227_472));
        assert!(ev.is_damage());
        assert!(!ev.is_avoided());
    }

    #[test]
    fn string_hit_type_miss_is_avoided() {
        let raw = json!({
            "timestamp": 5_000,
            "type": "damage",
            "hitType": "Dodge",
            "amount": 0
        });
        let ev = Event::from_raw(&raw).unwrap();
        assert!(ev.is_avoided());
    }

    #[test]
    fn unknown_type_keeps_raw_payload() {
        let raw = json!({
            "timestamp": 1_000,
            "type": "encounterstart",
            "encounterID": 3134
        });
        let ev = Event::from_raw(&raw).unwrap();
        match &ev.kind {
            EventKind::Other { event_type, raw } => {
                assert_eq!(event_type, "encounterstart");
                assert!(raw.contains_key("encounterID"));
            }
            other => panic!("expected Other, got {:?}", other),
        }
    }

    #[test]
    fn missing_timestamp_is_rejected() {
        assert!(Event::from_raw(&json!({"type": "damage"})).is_none());
    }
}
