use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::report::{Actor, EventKind, ReportSnapshot};

use super::{EventTrace, PlayerRow};

// Encounter ability ids, overridable per request.
pub const BESIEGE_ID: u32 = 1_227_472;
pub const GHOST_DEBUFF_ID: u32 = 1_224_737;
pub const OBLIVION_ID: u32 = 1_249_077;
pub const AIRBORNE_ID: u32 = 1_243_609;
pub const FISTS_OF_VOIDLORD_ID: u32 = 1_227_665;
pub const DEVOUR_ID: u32 = 1_243_373;
pub const REVERSE_GRAVITY_ID: u32 = 1_243_577;
pub const EXCESS_MASS_ID: u32 = 1_228_206;
pub const DARK_ENERGY_ID: u32 = 1_231_002;
pub const SHOOTING_STAR_ID: u32 = 1_246_948;

pub const LIVING_MASS_NAME: &str = "Living Mass";
pub const ARTOSHION_NAME: &str = "Artoshion";
pub const SHOOTING_STAR_NAME: &str = "Shooting Star";
pub const INITIAL_ADD_IGNORE_COUNT: usize = 6;
pub const INITIAL_ADD_SPAWN_WINDOW_MS: i64 = 5_000;

/// Killing abilities that count as bleeding out in stage one.
pub const BLEED_CAUSE_IDS: [u32; 2] = [DEVOUR_ID, DARK_ENERGY_ID];
pub const BLEED_CAUSE_NAMES: [&str; 4] =
    ["devour", "cosmic radiation", "dark energy", "fission"];

/// Consumable heals that disqualify a bleed death when used during the pull.
pub const CONSUMABLE_HEAL_NAMES: [&str; 2] = ["Healthstone", "Invigorating Healing Potion"];

pub const DEFAULT_GHOST_SET_WINDOW_MS: i64 = 3_000;
pub const DEFAULT_RECENT_WINDOW_MS: i64 = 8_000;
pub const DEFAULT_HIT_DEDUPE_MS: i64 = 1_500;

/// Fallback labels for abilities the master data may not list.
pub static ABILITY_LABELS: Lazy<HashMap<u32, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(OBLIVION_ID, "Oblivion");
    m.insert(AIRBORNE_ID, "Airborne");
    m.insert(FISTS_OF_VOIDLORD_ID, "Fists of the Voidlord");
    m.insert(DEVOUR_ID, "Devour");
    m.insert(REVERSE_GRAVITY_ID, "Reverse Gravity");
    m.insert(EXCESS_MASS_ID, "Excess Mass");
    m.insert(DARK_ENERGY_ID, "Dark Energy");
    m.insert(SHOOTING_STAR_ID, "Shooting Star");
    m
});

pub fn ability_label(snapshot: &ReportSnapshot, id: u32) -> Option<String> {
    snapshot
        .ability_names
        .get(&id)
        .cloned()
        .or_else(|| ABILITY_LABELS.get(&id).map(|s| s.to_string()))
}

/// Encounter phase-label presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PhaseProfile {
    #[default]
    Nexus,
    Dimensius,
}

impl PhaseProfile {
    pub fn labels(self) -> &'static [(&'static str, &'static str)] {
        match self {
            PhaseProfile::Nexus => &[
                ("full", "Full Fight"),
                ("1", "Stage One: Oath Breakers"),
                ("2", "Stage Two: Rider's of the Dark"),
                ("3", "Intermission One: Nexus Descent"),
                ("4", "Intermission Two: King's Hunger"),
                ("5", "Stage Three: World in Twilight"),
            ],
            PhaseProfile::Dimensius => &[
                ("full", "Full Fight"),
                ("1", "Stage One: Critical Mass"),
                ("2", "Intermission: Event Horizon"),
                ("3", "Stage Two: The Dark Heart"),
                ("4", "Stage Three: Singularity"),
            ],
        }
    }

    pub fn label_for(self, phase: &str) -> Option<&'static str> {
        self.labels()
            .iter()
            .find(|(id, _)| *id == phase)
            .map(|(_, label)| *label)
    }
}

/// Normalize a requested phase list against a profile: dedupe, keep known
/// phases, fall back to `full` when nothing valid remains.
pub fn normalize_phase_ids(phases: &[String], profile: PhaseProfile) -> Vec<String> {
    let mut normalized = Vec::new();
    for raw in phases {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            continue;
        }
        let key = if lowered == "full" || lowered == "all" {
            "full".to_string()
        } else {
            match lowered.parse::<u32>() {
                Ok(n) => n.to_string(),
                Err(_) => continue,
            }
        };
        if profile.label_for(&key).is_some() && !normalized.contains(&key) {
            normalized.push(key);
        }
    }
    if normalized.is_empty() {
        normalized.push("full".to_string());
    }
    normalized
}

/// Per-fight timestamp of the nth death, used as the ignore-after-deaths
/// cut-off. Counts death events from any actor in timestamp order.
pub fn death_cutoffs(snapshot: &ReportSnapshot, max_deaths: Option<u32>) -> HashMap<u32, i64> {
    let mut cutoffs = HashMap::new();
    let Some(limit) = max_deaths.filter(|n| *n > 0) else {
        return cutoffs;
    };
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for ev in &snapshot.events {
        if !ev.is_death() || cutoffs.contains_key(&ev.fight_id) {
            continue;
        }
        let count = counts.entry(ev.fight_id).or_insert(0);
        *count += 1;
        if *count >= limit {
            cutoffs.insert(ev.fight_id, ev.timestamp_ms);
        }
    }
    cutoffs
}

/// True when the event falls into the trimmed tail of its pull.
pub fn in_final_window(snapshot: &ReportSnapshot, fight_id: u32, offset_ms: i64, final_seconds: Option<f64>) -> bool {
    let Some(secs) = final_seconds.filter(|s| *s > 0.0) else {
        return false;
    };
    let Some(fight) = snapshot.fight(fight_id) else {
        return false;
    };
    offset_ms >= fight.duration_ms() - (secs * 1000.0) as i64
}

/// Per-player metadata maps shared by every analyzer result.
pub struct PlayerMeta {
    pub classes: BTreeMap<String, Option<String>>,
    pub roles: BTreeMap<String, String>,
    pub specs: BTreeMap<String, Option<String>>,
}

pub fn player_meta(participants: &[&Actor]) -> PlayerMeta {
    let mut classes = BTreeMap::new();
    let mut roles = BTreeMap::new();
    let mut specs = BTreeMap::new();
    for actor in participants {
        classes.insert(actor.name.clone(), actor.class_name.clone());
        roles.insert(actor.name.clone(), actor.role.as_str().to_string());
        specs.insert(actor.name.clone(), actor.spec.clone());
    }
    PlayerMeta {
        classes,
        roles,
        specs,
    }
}

/// Default row ordering: role priority, then the named metric descending,
/// then player name.
pub fn sort_rows(rows: &mut [PlayerRow], metric: &str) {
    rows.sort_by(|a, b| {
        let a_metric = a.metrics.get(metric).map(|m| m.total).unwrap_or(0.0);
        let b_metric = b.metrics.get(metric).map(|m| m.total).unwrap_or(0.0);
        a.role
            .priority()
            .cmp(&b.role.priority())
            .then(
                b_metric
                    .partial_cmp(&a_metric)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then_with(|| a.player.to_lowercase().cmp(&b.player.to_lowercase()))
    });
}

pub fn per_pull(total: f64, pull_count: u32) -> f64 {
    if pull_count > 0 {
        total / pull_count as f64
    } else {
        0.0
    }
}

/// Sorted flagged-event timestamps by (fight, player), for recent-window
/// lookups.
pub fn collect_event_times<F>(snapshot: &ReportSnapshot, mut keep: F) -> HashMap<(u32, i64), Vec<i64>>
where
    F: FnMut(&crate::report::Event) -> bool,
{
    let mut times: HashMap<(u32, i64), Vec<i64>> = HashMap::new();
    for ev in &snapshot.events {
        if keep(ev) {
            times
                .entry((ev.fight_id, ev.target_id))
                .or_default()
                .push(ev.timestamp_ms);
        }
    }
    // Snapshot events are already sorted, but keep the guarantee local.
    for list in times.values_mut() {
        list.sort_unstable();
    }
    times
}

/// Any timestamp in `[reference - window, reference]`?
pub fn has_recent_event(
    times: &HashMap<(u32, i64), Vec<i64>>,
    fight_id: u32,
    player_id: i64,
    reference_ms: i64,
    window_ms: i64,
) -> bool {
    let Some(list) = times.get(&(fight_id, player_id)) else {
        return false;
    };
    let cutoff = reference_ms - window_ms;
    let idx = list.partition_point(|&ts| ts < cutoff);
    list.get(idx).is_some_and(|&ts| ts <= reference_ms)
}

/// Diagnostic trace entry recording where an event happened within its pull.
pub fn trace_for(player: &str, ev: &crate::report::Event, label: Option<String>) -> EventTrace {
    let killing_ability = match &ev.kind {
        EventKind::Death { killing_ability_id } => *killing_ability_id,
        _ => None,
    };
    EventTrace {
        player: player.to_string(),
        fight_id: ev.fight_id,
        pull_index: ev.pull_index,
        timestamp_ms: ev.timestamp_ms,
        offset_ms: ev.offset_ms,
        ability_id: killing_ability.or(ev.ability_id),
        ability_label: label,
        label: None,
        description: None,
    }
}

/// Resolve player rows to a full roster: every participant appears, players
/// with no counted events get zero-valued rows.
pub fn roster_row(actor: &Actor, pull_count: u32) -> PlayerRow {
    PlayerRow {
        player: actor.name.clone(),
        role: actor.role,
        class_name: actor.class_name.clone(),
        spec: actor.spec.clone(),
        pulls: pull_count,
        metrics: BTreeMap::new(),
        fuckup_rate: None,
    }
}

