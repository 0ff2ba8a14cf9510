use std::collections::BTreeMap;

use crate::report::ReportSnapshot;

use super::common::{self, sort_rows};
use super::{AnalyzerResult, CombinedConfig};

/// Run the hit counter and ghost analyzer under shared filters and merge the
/// per-player rows into one table with a combined fuck-up rate.
pub fn analyze(snapshot: &ReportSnapshot, cfg: &CombinedConfig) -> AnalyzerResult {
    let hit_result = super::hits::analyze(snapshot, &cfg.hits);
    let ghost_result = super::ghosts::analyze(snapshot, &cfg.ghosts);
    let pull_count = snapshot.pull_count();

    let mut entries = hit_result.entries.clone();
    for row in &mut entries {
        let ghosts = ghost_result
            .entry(&row.player)
            .map(|r| r.metric_total("ghost_misses"))
            .unwrap_or(0.0);
        let ghost_metric = super::MetricValue::new(ghosts, pull_count);
        row.metrics.insert("ghost_misses".into(), ghost_metric);
        row.metrics.remove("damage");
        let hits = row.metric_total("hits");
        row.fuckup_rate = Some(common::per_pull(hits + ghosts, pull_count));
    }
    sort_rows(&mut entries, "hits");
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

    let total_hits = hit_result.totals.get("total_hits").copied().unwrap_or(0.0);
    let total_ghosts = ghost_result
        .totals
        .get("total_ghosts")
        .copied()
        .unwrap_or(0.0);
    let mut totals = BTreeMap::new();
    totals.insert("total_hits".into(), total_hits);
    totals.insert("total_ghosts".into(), total_ghosts);
    totals.insert(
        "average_hits_per_pull".into(),
        common::per_pull(total_hits, pull_count),
    );
    totals.insert(
        "average_ghosts_per_pull".into(),
        common::per_pull(total_ghosts, pull_count),
    );
    totals.insert(
        "combined_per_pull".into(),
        common::per_pull(total_hits + total_ghosts, pull_count),
    );

    let mut filters = hit_result.filters.clone();
    for (key, value) in &ghost_result.filters {
        filters.entry(format!("ghost_{}", key)).or_insert_with(|| value.clone());
    }

    let mut ability_ids = BTreeMap::new();
    ability_ids.insert("besiege".into(), cfg.hits.ability_id);
    ability_ids.insert("ghost".into(), cfg.ghosts.ability_id);

    AnalyzerResult {
        report: hit_result.report.clone(),
        source_reports: hit_result.source_reports.clone(),
        analyzer: "combined".into(),
        pull_count,
        entries,
        totals,
        filters,
        phases: None,
        phase_labels: None,
        ability_ids: Some(ability_ids),
        fight_totals: hit_result.fight_totals.clone(),
        player_classes: hit_result.player_classes,
        player_roles: hit_result.player_roles,
        player_specs: hit_result.player_specs,
        player_events: ghost_result.player_events,
    }
}
