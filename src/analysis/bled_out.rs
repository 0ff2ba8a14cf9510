use std::collections::{BTreeMap, HashMap};

use crate::report::{EventKind, ReportSnapshot};

use super::common::{
    self, ability_label, death_cutoffs, player_meta, sort_rows, BLEED_CAUSE_IDS,
    BLEED_CAUSE_NAMES, CONSUMABLE_HEAL_NAMES, DARK_ENERGY_ID, DEVOUR_ID,
};
use super::{AnalyzerResult, BledOutConfig, BledOutMode, EventTrace, MetricValue};

/// Stage-one deaths to bleed causes (Devour, Cosmic Radiation, Dark Energy,
/// Fission) for players who did not save themselves with consumable heals.
///
/// A bleed death is disqualified when the player used consumables during the
/// pull: under `NoForgiveness` only using both Healthstone and potion
/// disqualifies, under `Lenient` either one does.
pub fn analyze(snapshot: &ReportSnapshot, cfg: &BledOutConfig) -> AnalyzerResult {
    let cutoffs = death_cutoffs(snapshot, cfg.ignore_after_deaths);
    let pull_count = snapshot.pull_count();

    // (fight, player) -> usage timestamps per consumable, in name-table order.
    let mut consumables: HashMap<(u32, i64), [Vec<i64>; 2]> = HashMap::new();
    for ev in &snapshot.events {
        if !matches!(ev.kind, EventKind::Heal { .. }) {
            continue;
        }
        let Some(name) = ev.ability_name.as_deref() else {
            continue;
        };
        let Some(slot) = CONSUMABLE_HEAL_NAMES.iter().position(|n| *n == name) else {
            continue;
        };
        consumables
            .entry((ev.fight_id, ev.target_id))
            .or_default()[slot]
            .push(ev.timestamp_ms);
    }

    let mut counts: HashMap<i64, u64> = HashMap::new();
    let mut traces: BTreeMap<String, Vec<EventTrace>> = BTreeMap::new();

    for ev in &snapshot.events {
        let EventKind::Death { killing_ability_id } = ev.kind else {
            continue;
        };
        if !snapshot.actor(ev.target_id).is_some_and(|a| a.is_player()) {
            continue;
        }
        if let Some(&cutoff) = cutoffs.get(&ev.fight_id) {
            if ev.timestamp_ms > cutoff {
                continue;
            }
        }
        let label = killing_ability_id.and_then(|id| ability_label(snapshot, id));
        if !matches_bleed_cause(killing_ability_id, label.as_deref()) {
            continue;
        }
        let usage = consumables.get(&(ev.fight_id, ev.target_id));
        if should_exclude_for_consumables(usage, cfg.mode) {
            continue;
        }

        *counts.entry(ev.target_id).or_default() += 1;
        let player = snapshot.actor_name(ev.target_id).to_string();
        let entries = traces.entry(player.clone()).or_default();
        let mut death_trace = common::trace_for(&player, ev, label);
        death_trace.label = Some("Death".to_string());
        entries.push(death_trace);
        append_consumable_annotations(entries, &player, ev, usage);
    }

    let participants = snapshot.participants();
    let meta = player_meta(&participants);

    let mut entries = Vec::with_capacity(participants.len());
    for actor in &participants {
        let deaths = counts.get(&actor.id).copied().unwrap_or(0) as f64;
        let mut row = common::roster_row(actor, pull_count);
        row.metrics
            .insert("deaths".into(), MetricValue::new(deaths, pull_count));
        entries.push(row);
    }
    sort_rows(&mut entries, "deaths");

    let total_deaths: f64 = counts.values().map(|c| *c as f64).sum();
    let mut totals = BTreeMap::new();
    totals.insert("total_deaths".into(), total_deaths);
    totals.insert(
        "average_deaths_per_pull".into(),
        common::per_pull(total_deaths, pull_count),
    );

    let mut filters = BTreeMap::new();
    filters.insert(
        "bled_out_filter".into(),
        "no_consumable_heals".to_string(),
    );
    filters.insert(
        "bled_out_mode".into(),
        match cfg.mode {
            BledOutMode::NoForgiveness => "no_forgiveness",
            BledOutMode::Lenient => "lenient",
        }
        .to_string(),
    );
    if let Some(limit) = cfg.ignore_after_deaths {
        filters.insert("ignore_after_deaths".into(), limit.to_string());
    }

    let mut ability_ids = BTreeMap::new();
    ability_ids.insert("devour".into(), DEVOUR_ID);
    ability_ids.insert("dark_energy".into(), DARK_ENERGY_ID);

    AnalyzerResult {
        report: snapshot
            .source_reports
            .first()
            .cloned()
            .unwrap_or_default(),
        source_reports: snapshot.source_reports.clone(),
        analyzer: "bled_out".into(),
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

fn matches_bleed_cause(ability_id: Option<u32>, label: Option<&str>) -> bool {
    if ability_id.is_some_and(|id| BLEED_CAUSE_IDS.contains(&id)) {
        return true;
    }
    label.is_some_and(|label| {
        let lowered = label.to_ascii_lowercase();
        BLEED_CAUSE_NAMES.iter().any(|name| *name == lowered)
    })
}

fn should_exclude_for_consumables(usage: Option<&[Vec<i64>; 2]>, mode: BledOutMode) -> bool {
    let Some(usage) = usage else {
        return false;
    };
    let has_healthstone = !usage[0].is_empty();
    let has_potion = !usage[1].is_empty();
    match mode {
        BledOutMode::Lenient => has_healthstone || has_potion,
        BledOutMode::NoForgiveness => has_healthstone && has_potion,
    }
}

/// One annotation row per consumable after each counted death: every use
/// with its pull offset, or a "not used" marker.
fn append_consumable_annotations(
    entries: &mut Vec<EventTrace>,
    player: &str,
    death: &crate::report::Event,
    usage: Option<&[Vec<i64>; 2]>,
) {
    for (slot, consumable) in CONSUMABLE_HEAL_NAMES.iter().enumerate() {
        let timestamps = usage.map(|u| u[slot].as_slice()).unwrap_or(&[]);
        if timestamps.is_empty() {
            entries.push(EventTrace {
                player: player.to_string(),
                fight_id: death.fight_id,
                pull_index: death.pull_index,
                timestamp_ms: death.timestamp_ms,
                offset_ms: death.offset_ms,
                ability_id: None,
                ability_label: None,
                label: Some((*consumable).to_string()),
                description: Some("Not used during this pull.".to_string()),
            });
            continue;
        }
        for &ts in timestamps {
            let offset_ms = ts - (death.timestamp_ms - death.offset_ms);
            entries.push(EventTrace {
                player: player.to_string(),
                fight_id: death.fight_id,
                pull_index: death.pull_index,
                timestamp_ms: ts,
                offset_ms,
                ability_id: None,
                ability_label: None,
                label: Some((*consumable).to_string()),
                description: Some(format!("Used at {:.2}s", offset_ms as f64 / 1000.0)),
            });
        }
    }
}
