use std::collections::{BTreeMap, HashMap, HashSet};

use crate::report::ReportSnapshot;

use super::common::{
    self, player_meta, sort_rows, INITIAL_ADD_IGNORE_COUNT, INITIAL_ADD_SPAWN_WINDOW_MS,
};
use super::{AddDamageConfig, AnalyzerResult, MetricValue};

/// Sum damage done by each player to adds matching the configured name.
///
/// With `ignore_first_add_set`, targets belonging to the first spawn cluster
/// (the first six distinct adds appearing within the opening five seconds of
/// a pull) are excluded.
pub fn analyze(snapshot: &ReportSnapshot, cfg: &AddDamageConfig) -> AnalyzerResult {
    let pull_count = snapshot.pull_count();
    let mut damage: HashMap<i64, f64> = HashMap::new();

    // Per fight: adds already seen and the subset that belongs to the first
    // spawn cluster.
    let mut seen_targets: HashMap<u32, HashSet<i64>> = HashMap::new();
    let mut ignored_targets: HashMap<u32, HashSet<i64>> = HashMap::new();

    for ev in &snapshot.events {
        if !ev.is_damage() {
            continue;
        }
        let Some(target) = snapshot.actor(ev.target_id) else {
            continue;
        };
        if target.name != cfg.add_name {
            continue;
        }
        let Some(source) = snapshot.actor(ev.source_id) else {
            continue;
        };
        if !source.is_player() {
            continue;
        }

        if cfg.ignore_first_add_set {
            let seen = seen_targets.entry(ev.fight_id).or_default();
            let ignored = ignored_targets.entry(ev.fight_id).or_default();
            if seen.insert(ev.target_id)
                && ev.offset_ms < INITIAL_ADD_SPAWN_WINDOW_MS
                && ignored.len() < INITIAL_ADD_IGNORE_COUNT
            {
                ignored.insert(ev.target_id);
            }
            if ignored.contains(&ev.target_id) {
                continue;
            }
        }

        *damage.entry(ev.source_id).or_default() += ev.damage_amount();
    }

    let participants = snapshot.participants();
    let meta = player_meta(&participants);

    let mut entries = Vec::with_capacity(participants.len());
    for actor in &participants {
        let total = damage.get(&actor.id).copied().unwrap_or(0.0);
        let mut row = common::roster_row(actor, pull_count);
        row.metrics
            .insert("add_damage".into(), MetricValue::new(total, pull_count));
        entries.push(row);
    }
    sort_rows(&mut entries, "add_damage");

    let total_damage: f64 = damage.values().sum();
    let mut totals = BTreeMap::new();
    totals.insert("total_damage".into(), total_damage);
    totals.insert(
        "average_damage_per_pull".into(),
        common::per_pull(total_damage, pull_count),
    );

    let mut filters = BTreeMap::new();
    filters.insert("add_name".into(), cfg.add_name.clone());
    filters.insert(
        "ignore_first_add_set".into(),
        cfg.ignore_first_add_set.to_string(),
    );

    AnalyzerResult {
        report: snapshot
            .source_reports
            .first()
            .cloned()
            .unwrap_or_default(),
        source_reports: snapshot.source_reports.clone(),
        analyzer: "add_damage".into(),
        pull_count,
        entries,
        totals,
        filters,
        phases: None,
        phase_labels: None,
        ability_ids: None,
        fight_totals: None,
        player_classes: meta.classes,
        player_roles: meta.roles,
        player_specs: meta.specs,
        player_events: None,
    }
}
