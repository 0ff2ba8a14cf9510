use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::exception::{EngineError, EngineResult};
use crate::report::ReportSnapshot;

use super::common::{self, ability_label, death_cutoffs, player_meta, sort_rows};
use super::{AnalyzerResult, EventTrace, GhostConfig, MetricValue};

/// How ghost applications within a pull are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GhostMode {
    All,
    FirstPerPull,
    #[default]
    FirstPerSet,
}

impl GhostMode {
    pub fn as_str(self) -> &'static str {
        match self {
            GhostMode::All => "all",
            GhostMode::FirstPerPull => "first_per_pull",
            GhostMode::FirstPerSet => "first_per_set",
        }
    }

    /// Accept the loose spellings users actually type.
    pub fn parse(value: &str) -> EngineResult<Self> {
        let mut cleaned = value.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        while cleaned.contains("__") {
            cleaned = cleaned.replace("__", "_");
        }
        match cleaned.as_str() {
            "first_per_set" | "firstperset" | "per_set" | "perset" | "set_first" | "setfirst"
            | "first_set" | "firstset" => Ok(Self::FirstPerSet),
            "first_per_pull" | "firstperpull" | "per_pull" | "perpull" | "pull_first"
            | "pullfirst" | "first_pull" | "firstpull" => Ok(Self::FirstPerPull),
            "all" | "all_hits" | "allhits" | "all_misses" | "allmisses" | "every" => Ok(Self::All),
            _ => Err(EngineError::bad_request(format!(
                "invalid ghost miss mode '{}'",
                value
            ))),
        }
    }
}

struct SetState {
    /// Last application timestamp in the current set.
    last_ts: i64,
    counted_this_pull: bool,
}

/// Count missed ghost consumes: applications of the ghost debuff, grouped
/// into sets by `set_window_ms`, counted per the configured mode.
pub fn analyze(snapshot: &ReportSnapshot, cfg: &GhostConfig) -> AnalyzerResult {
    let cutoffs = death_cutoffs(snapshot, cfg.ignore_after_deaths);
    let pull_count = snapshot.pull_count();

    let mut misses: HashMap<i64, u64> = HashMap::new();
    let mut traces: BTreeMap<String, Vec<EventTrace>> = BTreeMap::new();
    let mut states: HashMap<(u32, i64), SetState> = HashMap::new();

    for ev in &snapshot.events {
        if !ev.is_debuff_apply() || ev.ability_id != Some(cfg.ability_id) {
            continue;
        }
        if !snapshot.actor(ev.target_id).is_some_and(|a| a.is_player()) {
            continue;
        }
        if let Some(&cutoff) = cutoffs.get(&ev.fight_id) {
            if ev.timestamp_ms >= cutoff {
                continue;
            }
        }

        let key = (ev.fight_id, ev.target_id);
        let should_count = match states.get_mut(&key) {
            None => {
                states.insert(
                    key,
                    SetState {
                        last_ts: ev.timestamp_ms,
                        counted_this_pull: true,
                    },
                );
                true
            }
            Some(state) => {
                let same_set = ev.timestamp_ms - state.last_ts <= cfg.set_window_ms;
                state.last_ts = ev.timestamp_ms;
                match cfg.mode {
                    GhostMode::All => true,
                    GhostMode::FirstPerPull => !state.counted_this_pull,
                    GhostMode::FirstPerSet => !same_set,
                }
            }
        };
        if !should_count {
            continue;
        }

        *misses.entry(ev.target_id).or_default() += 1;
        let player = snapshot.actor_name(ev.target_id).to_string();
        let label = ev
            .ability_id
            .and_then(|id| ability_label(snapshot, id))
            .or_else(|| ev.ability_name.clone());
        traces
            .entry(player.clone())
            .or_default()
            .push(common::trace_for(&player, ev, label));
    }

    let participants = snapshot.participants();
    let meta = player_meta(&participants);

    let mut entries = Vec::with_capacity(participants.len());
    for actor in &participants {
        let count = misses.get(&actor.id).copied().unwrap_or(0) as f64;
        let mut row = common::roster_row(actor, pull_count);
        row.metrics
            .insert("ghost_misses".into(), MetricValue::new(count, pull_count));
        entries.push(row);
    }
    sort_rows(&mut entries, "ghost_misses");

    let total_ghosts: f64 = misses.values().map(|m| *m as f64).sum();
    let mut totals = BTreeMap::new();
    totals.insert("total_ghosts".into(), total_ghosts);
    totals.insert(
        "average_ghosts_per_pull".into(),
        common::per_pull(total_ghosts, pull_count),
    );

    let mut filters = BTreeMap::new();
    filters.insert("ability_id".into(), cfg.ability_id.to_string());
    filters.insert("mode".into(), cfg.mode.as_str().to_string());
    filters.insert("set_window_ms".into(), cfg.set_window_ms.to_string());
    if let Some(limit) = cfg.ignore_after_deaths {
        filters.insert("ignore_after_deaths".into(), limit.to_string());
    }

    let mut ability_ids = BTreeMap::new();
    ability_ids.insert("ghost".into(), cfg.ability_id);

    AnalyzerResult {
        report: snapshot
            .source_reports
            .first()
            .cloned()
            .unwrap_or_default(),
        source_reports: snapshot.source_reports.clone(),
        analyzer: "ghosts".into(),
        pull_count,
        entries,
        totals,
        filters,
        phases: None,
        phase_labels: None,
        ability_ids: Some(ability_ids),
        fight_totals: None,
        player_classes: meta.classes,
        player_roles: meta.roles,
        player_specs: meta.specs,
        player_events: Some(traces),
    }
}
