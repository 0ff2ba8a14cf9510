use std::collections::{BTreeMap, HashMap, HashSet};

use crate::report::ReportSnapshot;

use super::common::{
    self, death_cutoffs, in_final_window, per_pull, player_meta, sort_rows,
};
use super::{AnalyzerResult, FightTotals, HitConfig, MetricValue};

/// Count hits taken from one ability, per player, under the configured pull
/// filters (death cut-off, end-of-pull trim, first-hit-only, dedupe window).
pub fn analyze(snapshot: &ReportSnapshot, cfg: &HitConfig) -> AnalyzerResult {
    let cutoffs = death_cutoffs(snapshot, cfg.ignore_after_deaths);
    let pull_count = snapshot.pull_count();

    let mut hits: HashMap<i64, u64> = HashMap::new();
    let mut damage: HashMap<i64, f64> = HashMap::new();
    let mut fight_hits: HashMap<u32, u64> = HashMap::new();
    let mut fight_damage: HashMap<u32, f64> = HashMap::new();
    let mut first_seen: HashSet<(u32, i64)> = HashSet::new();
    let mut last_counted: HashMap<(u32, i64), i64> = HashMap::new();

    for ev in &snapshot.events {
        if !ev.is_damage() || ev.ability_id != Some(cfg.ability_id) || ev.is_avoided() {
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
        if in_final_window(snapshot, ev.fight_id, ev.offset_ms, cfg.ignore_final_seconds) {
            continue;
        }

        let key = (ev.fight_id, ev.target_id);
        if cfg.first_hit_only && !first_seen.insert(key) {
            continue;
        }
        if let Some(window) = cfg.dedupe_ms.filter(|w| *w > 0) {
            if let Some(&last) = last_counted.get(&key) {
                if ev.timestamp_ms - last < window {
                    continue;
                }
            }
            last_counted.insert(key, ev.timestamp_ms);
        }

        let amount = ev.damage_amount();
        *hits.entry(ev.target_id).or_default() += 1;
        *damage.entry(ev.target_id).or_default() += amount;
        *fight_hits.entry(ev.fight_id).or_default() += 1;
        *fight_damage.entry(ev.fight_id).or_default() += amount;
    }

    let participants = snapshot.participants();
    let meta = player_meta(&participants);

    let mut entries = Vec::with_capacity(participants.len());
    for actor in &participants {
        let player_hits = hits.get(&actor.id).copied().unwrap_or(0) as f64;
        let player_damage = damage.get(&actor.id).copied().unwrap_or(0.0);
        let mut row = common::roster_row(actor, pull_count);
        row.metrics
            .insert("hits".into(), MetricValue::new(player_hits, pull_count));
        row.metrics
            .insert("damage".into(), MetricValue::new(player_damage, pull_count));
        entries.push(row);
    }
    sort_rows(&mut entries, "hits");

    let indexes = crate::report::normalize::pull_indexes(&snapshot.fights);
    let fight_totals: Vec<FightTotals> = snapshot
        .fights
        .iter()
        .map(|f| FightTotals {
            fight_id: f.id,
            name: f.name.clone(),
            pull_index: indexes.get(&f.id).copied().unwrap_or(0),
            hits: fight_hits.get(&f.id).copied().unwrap_or(0),
            damage: fight_damage.get(&f.id).copied().unwrap_or(0.0),
        })
        .collect();

    let total_hits: f64 = hits.values().map(|h| *h as f64).sum();
    let total_damage: f64 = damage.values().sum();
    let mut totals = BTreeMap::new();
    totals.insert("total_hits".into(), total_hits);
    totals.insert("total_damage".into(), total_damage);
    totals.insert(
        "average_hits_per_pull".into(),
        per_pull(total_hits, pull_count),
    );

    let mut filters = BTreeMap::new();
    filters.insert("ability_id".into(), cfg.ability_id.to_string());
    filters.insert("data_type".into(), cfg.data_type.to_string());
    filters.insert("first_hit_only".into(), cfg.first_hit_only.to_string());
    if let Some(window) = cfg.dedupe_ms {
        filters.insert("dedupe_ms".into(), window.to_string());
    }
    if let Some(limit) = cfg.ignore_after_deaths {
        filters.insert("ignore_after_deaths".into(), limit.to_string());
    }
    if let Some(secs) = cfg.ignore_final_seconds {
        filters.insert("ignore_final_seconds".into(), secs.to_string());
    }

    AnalyzerResult {
        report: snapshot
            .source_reports
            .first()
            .cloned()
            .unwrap_or_default(),
        source_reports: snapshot.source_reports.clone(),
        analyzer: "hits".into(),
        pull_count,
        entries,
        totals,
        filters,
        phases: None,
        phase_labels: None,
        ability_ids: None,
        fight_totals: Some(fight_totals),
        player_classes: meta.classes,
        player_roles: meta.roles,
        player_specs: meta.specs,
        player_events: None,
    }
}
