use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::exception::{EngineError, EngineResult};

pub mod actor;
pub mod event;
pub mod merge;
pub mod normalize;

pub use actor::{role_for, Actor, ActorKind, Role};
pub use event::{DataType, Event, EventKind};

/// One phase boundary inside a fight, in report-relative milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub id: u32,
    pub start_ms: i64,
}

/// One pull of an encounter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fight {
    pub id: u32,
    pub name: String,
    pub boss_id: Option<u32>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub kill: bool,
    /// Strictly increasing by `start_ms`, each within the fight window.
    pub phase_transitions: Vec<PhaseTransition>,
}

impl Fight {
    pub fn duration_ms(&self) -> i64 {
        self.end_ms - self.start_ms
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms <= self.end_ms
    }

    /// Phase active at `timestamp_ms`: the last transition that has started,
    /// defaulting to phase 1 before any transition.
    pub fn phase_at(&self, timestamp_ms: i64) -> u32 {
        self.phase_transitions
            .iter()
            .take_while(|t| t.start_ms <= timestamp_ms)
            .last()
            .map(|t| t.id)
            .unwrap_or(1)
    }

    /// Window `[start, end)` of `phase_id` within this fight, if the phase
    /// occurs here.
    pub fn phase_window(&self, phase_id: u32) -> Option<(i64, i64)> {
        if self.phase_transitions.is_empty() {
            return (phase_id == 1).then_some((self.start_ms, self.end_ms));
        }
        let idx = self
            .phase_transitions
            .iter()
            .position(|t| t.id == phase_id)?;
        let start = self.phase_transitions[idx].start_ms;
        let end = self
            .phase_transitions
            .get(idx + 1)
            .map(|t| t.start_ms)
            .unwrap_or(self.end_ms);
        Some((start, end))
    }
}

/// Fully materialized, immutable view of one (or several merged) reports:
/// retained fights, the actor roster and the normalized event stream sorted by
/// `(timestamp, source, seq)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSnapshot {
    pub source_reports: Vec<String>,
    pub title: String,
    pub fights: Vec<Fight>,
    pub actors: HashMap<i64, Actor>,
    pub events: Vec<Event>,
    /// Master-data ability labels by game id.
    pub ability_names: HashMap<u32, String>,
    /// Events that landed outside every retained fight window.
    pub dropped_events: u64,
}

impl ReportSnapshot {
    /// Number of retained pulls.
    pub fn pull_count(&self) -> u32 {
        self.fights.len() as u32
    }

    pub fn actor(&self, id: i64) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn actor_name(&self, id: i64) -> &str {
        self.actors
            .get(&id)
            .map(|a| a.name.as_str())
            .unwrap_or("Unknown")
    }

    pub fn fight(&self, id: u32) -> Option<&Fight> {
        self.fights.iter().find(|f| f.id == id)
    }

    /// Player actors that appear in at least one normalized event, i.e. the
    /// roster the analyzers report on.
    pub fn participants(&self) -> Vec<&Actor> {
        let mut seen = std::collections::HashSet::new();
        for ev in &self.events {
            seen.insert(ev.source_id);
            seen.insert(ev.target_id);
        }
        let mut players: Vec<&Actor> = seen
            .into_iter()
            .filter_map(|id| self.actors.get(&id))
            .filter(|a| a.is_player())
            .collect();
        players.sort_by(|a, b| a.name.cmp(&b.name));
        players
    }
}

/// Canonicalize user input (bare code or full report URL) into a report code.
pub fn extract_report_code(input: &str) -> EngineResult<String> {
    let text = input.trim();
    if text.is_empty() {
        return Err(EngineError::bad_request("report code cannot be empty"));
    }

    let code = if let Some(pos) = text.to_ascii_lowercase().find("/reports/") {
        let remainder = &text[pos + "/reports/".len()..];
        remainder
            .split(['/', '?', '#'])
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    } else {
        text.to_string()
    };

    if code.is_empty() || !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(EngineError::bad_request(format!(
            "invalid report code '{}'",
            input
        )));
    }
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fight_with_phases() -> Fight {
        Fight {
            id: 1,
            name: "Dimensius".into(),
            boss_id: Some(3135),
            start_ms: 100_000,
            end_ms: 400_000,
            kill: false,
            phase_transitions: vec![
                PhaseTransition {
                    id: 1,
                    start_ms: 100_000,
                },
                PhaseTransition {
                    id: 2,
                    start_ms: 250_000,
                },
            ],
        }
    }

    #[test]
    fn phase_at_picks_last_started_transition() {
        let fight = fight_with_phases();
        assert_eq!(fight.phase_at(100_000), 1);
        assert_eq!(fight.phase_at(249_999), 1);
        assert_eq!(fight.phase_at(250_000), 2);
        assert_eq!(fight.phase_at(399_000), 2);
    }

    #[test]
    fn phase_window_uses_next_transition_or_fight_end() {
        let fight = fight_with_phases();
        assert_eq!(fight.phase_window(1), Some((100_000, 250_000)));
        assert_eq!(fight.phase_window(2), Some((250_000, 400_000)));
        assert_eq!(fight.phase_window(3), None);
    }

    #[test]
    fn extract_code_from_url_and_bare() {
        assert_eq!(
            extract_report_code("https://www.warcraftlogs.com/reports/AbC123xyz?fight=12").unwrap(),
            "AbC123xyz"
        );
        assert_eq!(extract_report_code("  AbC123xyz ").unwrap(), "AbC123xyz");
        assert!(extract_report_code("").is_err());
        assert!(extract_report_code("not a code!").is_err());
    }
}
