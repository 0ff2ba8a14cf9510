use std::collections::{BTreeMap, HashMap};

use crate::report::{EventKind, ReportSnapshot};

use super::common::{
    self, player_meta, EXCESS_MASS_ID, REVERSE_GRAVITY_ID,
};
use super::{AnalyzerResult, MetricValue, PhaseOneConfig};

/// Stage-one mechanic detections: Reverse Gravity + Excess Mass overlaps,
/// early mass pickups, and hits from a named avoidable ability. Each metric
/// is an independent column; a player can be counted by several metrics for
/// the same moment.
pub fn analyze(snapshot: &ReportSnapshot, cfg: &PhaseOneConfig) -> AnalyzerResult {
    let pull_count = snapshot.pull_count();

    let mut overlap_counts: HashMap<i64, u64> = HashMap::new();
    if cfg.include_overlap {
        let rg = collect_debuff_intervals(snapshot, REVERSE_GRAVITY_ID);
        let em = collect_debuff_intervals(snapshot, EXCESS_MASS_ID);
        let keys: std::collections::HashSet<(u32, i64)> =
            rg.keys().chain(em.keys()).copied().collect();
        for key in keys {
            let overlaps = count_interval_overlaps(
                rg.get(&key).map(Vec::as_slice).unwrap_or(&[]),
                em.get(&key).map(Vec::as_slice).unwrap_or(&[]),
            );
            if overlaps > 0 {
                *overlap_counts.entry(key.1).or_default() += overlaps;
            }
        }
    }

    let mut early_mass_counts: HashMap<i64, u64> = HashMap::new();
    if let Some(window_s) = cfg.early_mass_window_s {
        let window_ms = i64::from(window_s) * 1000;
        let mut em_applies: HashMap<(u32, i64), Vec<i64>> = HashMap::new();
        for ev in &snapshot.events {
            if ev.is_debuff_apply() && ev.ability_id == Some(EXCESS_MASS_ID) {
                em_applies
                    .entry((ev.fight_id, ev.target_id))
                    .or_default()
                    .push(ev.timestamp_ms);
            }
        }
        for ev in &snapshot.events {
            if !ev.is_debuff_apply() || ev.ability_id != Some(REVERSE_GRAVITY_ID) {
                continue;
            }
            let Some(times) = em_applies.get(&(ev.fight_id, ev.target_id)) else {
                continue;
            };
            let early = times
                .iter()
                .any(|&t| t < ev.timestamp_ms && ev.timestamp_ms - t <= window_ms);
            if early {
                *early_mass_counts.entry(ev.target_id).or_default() += 1;
            }
        }
    }

    let mut avoidable_counts: HashMap<i64, u64> = HashMap::new();
    if let Some(ability) = cfg.avoidable_ability_id {
        for ev in &snapshot.events {
            if ev.is_damage()
                && ev.ability_id == Some(ability)
                && !ev.is_avoided()
                && snapshot.actor(ev.target_id).is_some_and(|a| a.is_player())
            {
                *avoidable_counts.entry(ev.target_id).or_default() += 1;
            }
        }
    }

    let mut metric_columns: Vec<(&str, &HashMap<i64, u64>)> = Vec::new();
    if cfg.include_overlap {
        metric_columns.push(("rg_em_overlap", &overlap_counts));
    }
    if cfg.early_mass_window_s.is_some() {
        metric_columns.push(("early_mass", &early_mass_counts));
    }
    if cfg.avoidable_ability_id.is_some() {
        metric_columns.push(("avoidable_hits", &avoidable_counts));
    }

    let participants = snapshot.participants();
    let meta = player_meta(&participants);

    let mut entries = Vec::with_capacity(participants.len());
    for actor in &participants {
        let mut row = common::roster_row(actor, pull_count);
        let mut rate = 0.0;
        for (key, counts) in &metric_columns {
            let total = counts.get(&actor.id).copied().unwrap_or(0) as f64;
            let metric = MetricValue::new(total, pull_count);
            rate += metric.per_pull;
            row.metrics.insert((*key).to_string(), metric);
        }
        row.fuckup_rate = Some(rate);
        entries.push(row);
    }
    entries.sort_by(|a, b| {
        a.role
            .priority()
            .cmp(&b.role.priority())
            .then(
                b.fuckup_rate
                    .unwrap_or(0.0)
                    .partial_cmp(&a.fuckup_rate.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then_with(|| a.player.to_lowercase().cmp(&b.player.to_lowercase()))
    });

    let mut totals = BTreeMap::new();
    let mut combined_per_pull = 0.0;
    for (key, counts) in &metric_columns {
        let total: f64 = counts.values().map(|c| *c as f64).sum();
        let avg = common::per_pull(total, pull_count);
        combined_per_pull += avg;
        totals.insert(format!("total_{}", key), total);
        totals.insert(format!("average_{}_per_pull", key), avg);
    }
    totals.insert("combined_per_pull".into(), combined_per_pull);

    let mut filters = BTreeMap::new();
    filters.insert("include_overlap".into(), cfg.include_overlap.to_string());
    if let Some(window) = cfg.early_mass_window_s {
        filters.insert("early_mass_window_s".into(), window.to_string());
    }

    let mut ability_ids = BTreeMap::new();
    ability_ids.insert("reverse_gravity".into(), REVERSE_GRAVITY_ID);
    ability_ids.insert("excess_mass".into(), EXCESS_MASS_ID);
    if let Some(ability) = cfg.avoidable_ability_id {
        ability_ids.insert("avoidable".into(), ability);
    }

    AnalyzerResult {
        report: snapshot
            .source_reports
            .first()
            .cloned()
            .unwrap_or_default(),
        source_reports: snapshot.source_reports.clone(),
        analyzer: "phase1_mechanics".into(),
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
        player_events: None,
    }
}

/// Active windows of one debuff per (fight, player), closing any interval
/// still open at the fight's end.
fn collect_debuff_intervals(
    snapshot: &ReportSnapshot,
    ability_id: u32,
) -> HashMap<(u32, i64), Vec<(i64, i64)>> {
    let mut intervals: HashMap<(u32, i64), Vec<(i64, i64)>> = HashMap::new();
    let mut active: HashMap<(u32, i64), i64> = HashMap::new();

    for ev in &snapshot.events {
        if ev.ability_id != Some(ability_id) {
            continue;
        }
        let key = (ev.fight_id, ev.target_id);
        match &ev.kind {
            EventKind::ApplyDebuff { .. } | EventKind::RefreshDebuff => {
                active.entry(key).or_insert(ev.timestamp_ms);
            }
            EventKind::RemoveDebuff => {
                if let Some(start) = active.remove(&key) {
                    if ev.timestamp_ms >= start {
                        intervals.entry(key).or_default().push((start, ev.timestamp_ms));
                    }
                }
            }
            _ => {}
        }
    }

    for ((fight_id, target_id), start) in active {
        let end = snapshot
            .fight(fight_id)
            .map(|f| f.end_ms)
            .unwrap_or(start);
        intervals
            .entry((fight_id, target_id))
            .or_default()
            .push((start, end));
    }
    for list in intervals.values_mut() {
        list.sort_unstable();
    }
    intervals
}

/// Count pairs of overlapping windows between two sorted interval lists.
fn count_interval_overlaps(first: &[(i64, i64)], second: &[(i64, i64)]) -> u64 {
    let mut count = 0;
    let (mut i, mut j) = (0, 0);
    while i < first.len() && j < second.len() {
        let start = first[i].0.max(second[j].0);
        let end = first[i].1.min(second[j].1);
        if start < end {
            count += 1;
        }
        if first[i].1 <= second[j].1 {
            i += 1;
        } else {
            j += 1;
        }
    }
    count
}
