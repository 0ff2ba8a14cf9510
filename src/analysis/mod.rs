use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::exception::{EngineError, EngineResult};
use crate::report::{DataType, ReportSnapshot, Role};

pub mod add_damage;
pub mod bled_out;
pub mod combined;
pub mod common;
pub mod deaths;
pub mod ghosts;
pub mod hits;
pub mod phase_damage;
pub mod phase_one;
pub mod priority_damage;

pub use common::PhaseProfile;
pub use ghosts::GhostMode;

/// One event feed the fetcher must page for an analyzer, optionally filtered
/// server-side by ability id.
pub type StreamSpec = (DataType, Option<u32>);

/// Configuration for the hit counter: damage events from one ability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitConfig {
    pub ability_id: u32,
    #[serde(default = "default_hit_data_type")]
    pub data_type: DataType,
    #[serde(default)]
    pub first_hit_only: bool,
    #[serde(default)]
    pub dedupe_ms: Option<i64>,
    #[serde(default)]
    pub ignore_after_deaths: Option<u32>,
    #[serde(default)]
    pub ignore_final_seconds: Option<f64>,
}

fn default_hit_data_type() -> DataType {
    DataType::DamageTaken
}

impl Default for HitConfig {
    fn default() -> Self {
        Self {
            ability_id: common::BESIEGE_ID,
            data_type: default_hit_data_type(),
            first_hit_only: false,
            dedupe_ms: None,
            ignore_after_deaths: None,
            ignore_final_seconds: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GhostConfig {
    #[serde(default = "default_ghost_ability")]
    pub ability_id: u32,
    #[serde(default)]
    pub mode: GhostMode,
    #[serde(default = "default_ghost_set_window")]
    pub set_window_ms: i64,
    #[serde(default)]
    pub ignore_after_deaths: Option<u32>,
}

fn default_ghost_ability() -> u32 {
    common::GHOST_DEBUFF_ID
}

fn default_ghost_set_window() -> i64 {
    common::DEFAULT_GHOST_SET_WINDOW_MS
}

impl Default for GhostConfig {
    fn default() -> Self {
        Self {
            ability_id: default_ghost_ability(),
            mode: GhostMode::default(),
            set_window_ms: default_ghost_set_window(),
            ignore_after_deaths: None,
        }
    }
}

/// Combined hit + ghost analysis with shared pull filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedConfig {
    #[serde(default = "default_combined_hits")]
    pub hits: HitConfig,
    #[serde(default)]
    pub ghosts: GhostConfig,
}

fn default_combined_hits() -> HitConfig {
    HitConfig {
        first_hit_only: true,
        dedupe_ms: Some(common::DEFAULT_HIT_DEDUPE_MS),
        ..HitConfig::default()
    }
}

impl Default for CombinedConfig {
    fn default() -> Self {
        Self {
            hits: default_combined_hits(),
            ghosts: GhostConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseDamageConfig {
    #[serde(default)]
    pub profile: PhaseProfile,
    /// Phase ids to report (`"full"`, `"1"`, ...). Empty means full fight.
    #[serde(default)]
    pub phases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddDamageConfig {
    #[serde(default = "default_add_name")]
    pub add_name: String,
    #[serde(default)]
    pub ignore_first_add_set: bool,
}

fn default_add_name() -> String {
    common::LIVING_MASS_NAME.to_string()
}

impl Default for AddDamageConfig {
    fn default() -> Self {
        Self {
            add_name: default_add_name(),
            ignore_first_add_set: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OblivionFilter {
    #[default]
    IncludeAll,
    ExcludeWithoutRecent,
    ExcludeAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeathConfig {
    #[serde(default)]
    pub oblivion_filter: OblivionFilter,
    #[serde(default = "default_recent_window")]
    pub recent_window_ms: i64,
    #[serde(default)]
    pub ignore_after_deaths: Option<u32>,
}

fn default_recent_window() -> i64 {
    common::DEFAULT_RECENT_WINDOW_MS
}

impl Default for DeathConfig {
    fn default() -> Self {
        Self {
            oblivion_filter: OblivionFilter::default(),
            recent_window_ms: default_recent_window(),
            ignore_after_deaths: None,
        }
    }
}

/// Forgiveness policy for consumable heals in the bled-out report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BledOutMode {
    /// Disqualify a death only when both consumables were used in the pull.
    #[default]
    NoForgiveness,
    /// Disqualify when either consumable was used.
    Lenient,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BledOutConfig {
    #[serde(default)]
    pub mode: BledOutMode,
    #[serde(default)]
    pub ignore_after_deaths: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityDamageConfig {
    #[serde(default = "default_priority_target")]
    pub target_name: String,
    /// Encounter phase the priority window lives in.
    #[serde(default = "default_priority_phase")]
    pub phase_id: u32,
    #[serde(default = "default_ignored_ability")]
    pub ignored_ability_id: u32,
    #[serde(default = "default_ignored_source")]
    pub ignored_source: String,
}

fn default_priority_target() -> String {
    common::ARTOSHION_NAME.to_string()
}

fn default_priority_phase() -> u32 {
    3
}

fn default_ignored_ability() -> u32 {
    common::SHOOTING_STAR_ID
}

fn default_ignored_source() -> String {
    common::SHOOTING_STAR_NAME.to_string()
}

impl Default for PriorityDamageConfig {
    fn default() -> Self {
        Self {
            target_name: default_priority_target(),
            phase_id: default_priority_phase(),
            ignored_ability_id: default_ignored_ability(),
            ignored_source: default_ignored_source(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOneConfig {
    /// Count Reverse Gravity + Excess Mass overlaps.
    #[serde(default = "default_true")]
    pub include_overlap: bool,
    /// Count Excess Mass picked up within this many seconds before a Reverse
    /// Gravity on the same player. Must be within 1..=15 when set.
    #[serde(default)]
    pub early_mass_window_s: Option<u32>,
    /// Count hits taken from this avoidable ability.
    #[serde(default)]
    pub avoidable_ability_id: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for PhaseOneConfig {
    fn default() -> Self {
        Self {
            include_overlap: true,
            early_mass_window_s: None,
            avoidable_ability_id: None,
        }
    }
}

/// The analyzer to run plus its typed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "analyzer", rename_all = "snake_case")]
pub enum AnalyzerSpec {
    Hits(HitConfig),
    Ghosts(GhostConfig),
    Combined(CombinedConfig),
    PhaseDamage(PhaseDamageConfig),
    AddDamage(AddDamageConfig),
    Deaths(DeathConfig),
    BledOut(BledOutConfig),
    PriorityDamage(PriorityDamageConfig),
    Phase1Mechanics(PhaseOneConfig),
}

impl AnalyzerSpec {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hits(_) => "hits",
            Self::Ghosts(_) => "ghosts",
            Self::Combined(_) => "combined",
            Self::PhaseDamage(_) => "phase_damage",
            Self::AddDamage(_) => "add_damage",
            Self::Deaths(_) => "deaths",
            Self::BledOut(_) => "bled_out",
            Self::PriorityDamage(_) => "priority_damage",
            Self::Phase1Mechanics(_) => "phase1_mechanics",
        }
    }

    /// Reject configurations the analyzers would have to guess about.
    pub fn validate(&self) -> EngineResult<()> {
        match self {
            Self::Ghosts(cfg) => {
                if cfg.set_window_ms <= 0 {
                    return Err(EngineError::bad_request("set_window_ms must be positive"));
                }
            }
            Self::Combined(cfg) => {
                if cfg.ghosts.set_window_ms <= 0 {
                    return Err(EngineError::bad_request("set_window_ms must be positive"));
                }
            }
            Self::Deaths(cfg) => {
                if cfg.recent_window_ms <= 0 {
                    return Err(EngineError::bad_request("recent_window_ms must be positive"));
                }
            }
            Self::PriorityDamage(cfg) => {
                if cfg.target_name.trim().is_empty() {
                    return Err(EngineError::bad_request("target_name cannot be empty"));
                }
                if cfg.phase_id == 0 {
                    return Err(EngineError::bad_request("phase_id must be at least 1"));
                }
            }
            Self::Phase1Mechanics(cfg) => {
                if let Some(window) = cfg.early_mass_window_s {
                    if !(1..=15).contains(&window) {
                        return Err(EngineError::bad_request(
                            "early_mass_window_s must be within 1..=15",
                        ));
                    }
                }
                if !cfg.include_overlap
                    && cfg.early_mass_window_s.is_none()
                    && cfg.avoidable_ability_id.is_none()
                {
                    return Err(EngineError::bad_request(
                        "phase1_mechanics requires at least one enabled metric",
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Event feeds the fetcher needs for this analyzer.
    pub fn streams(&self) -> Vec<StreamSpec> {
        let mut streams: BTreeSet<StreamSpec> = BTreeSet::new();
        match self {
            Self::Hits(cfg) => {
                streams.insert((cfg.data_type, Some(cfg.ability_id)));
                streams.insert((DataType::Deaths, None));
            }
            Self::Ghosts(cfg) => {
                streams.insert((DataType::Debuffs, Some(cfg.ability_id)));
                streams.insert((DataType::Deaths, None));
            }
            Self::Combined(cfg) => {
                streams.insert((cfg.hits.data_type, Some(cfg.hits.ability_id)));
                streams.insert((DataType::Debuffs, Some(cfg.ghosts.ability_id)));
                streams.insert((DataType::Deaths, None));
            }
            Self::PhaseDamage(_) => {
                streams.insert((DataType::DamageDone, None));
                streams.insert((DataType::Healing, None));
            }
            Self::AddDamage(_) => {
                streams.insert((DataType::DamageDone, None));
            }
            Self::Deaths(_) => {
                streams.insert((DataType::Deaths, None));
                streams.insert((DataType::Debuffs, Some(common::AIRBORNE_ID)));
                streams.insert((DataType::DamageTaken, Some(common::FISTS_OF_VOIDLORD_ID)));
                streams.insert((DataType::DamageTaken, Some(common::DEVOUR_ID)));
            }
            Self::BledOut(_) => {
                streams.insert((DataType::Deaths, None));
                // Consumable heals are matched client-side by ability name.
                streams.insert((DataType::Healing, None));
            }
            Self::PriorityDamage(_) => {
                streams.insert((DataType::DamageDone, None));
            }
            Self::Phase1Mechanics(cfg) => {
                streams.insert((DataType::Debuffs, Some(common::REVERSE_GRAVITY_ID)));
                streams.insert((DataType::Debuffs, Some(common::EXCESS_MASS_ID)));
                if let Some(ability) = cfg.avoidable_ability_id {
                    streams.insert((DataType::DamageTaken, Some(ability)));
                }
                streams.insert((DataType::Deaths, None));
            }
        }
        streams.into_iter().collect()
    }
}

/// Total plus per-pull average for one metric column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub total: f64,
    pub per_pull: f64,
}

impl MetricValue {
    pub fn new(total: f64, pull_count: u32) -> Self {
        Self {
            total,
            per_pull: common::per_pull(total, pull_count),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerRow {
    pub player: String,
    pub role: Role,
    pub class_name: Option<String>,
    pub spec: Option<String>,
    pub pulls: u32,
    pub metrics: BTreeMap<String, MetricValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fuckup_rate: Option<f64>,
}

impl PlayerRow {
    pub fn metric_total(&self, key: &str) -> f64 {
        self.metrics.get(key).map(|m| m.total).unwrap_or(0.0)
    }
}

/// Diagnostic trace of a counted event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventTrace {
    pub player: String,
    pub fight_id: u32,
    pub pull_index: u32,
    pub timestamp_ms: i64,
    pub offset_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ability_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ability_label: Option<String>,
    /// Row kind when a trace mixes deaths with annotations ("Death",
    /// a consumable name, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Per-fight totals exposed by the hit counter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FightTotals {
    pub fight_id: u32,
    pub name: String,
    pub pull_index: u32,
    pub hits: u64,
    pub damage: f64,
}

/// Uniform analyzer output. Maps are ordered so serialization is
/// byte-identical across runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyzerResult {
    pub report: String,
    pub source_reports: Vec<String>,
    pub analyzer: String,
    pub pull_count: u32,
    pub entries: Vec<PlayerRow>,
    pub totals: BTreeMap<String, f64>,
    pub filters: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase_labels: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ability_ids: Option<BTreeMap<String, u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fight_totals: Option<Vec<FightTotals>>,
    pub player_classes: BTreeMap<String, Option<String>>,
    pub player_roles: BTreeMap<String, String>,
    pub player_specs: BTreeMap<String, Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_events: Option<BTreeMap<String, Vec<EventTrace>>>,
}

impl AnalyzerResult {
    pub fn entry(&self, player: &str) -> Option<&PlayerRow> {
        self.entries.iter().find(|row| row.player == player)
    }
}

/// Run the configured analyzer as a pure fold over the snapshot.
pub fn run_analyzer(
    snapshot: &ReportSnapshot,
    spec: &AnalyzerSpec,
) -> EngineResult<AnalyzerResult> {
    spec.validate()?;
    let result = match spec {
        AnalyzerSpec::Hits(cfg) => hits::analyze(snapshot, cfg),
        AnalyzerSpec::Ghosts(cfg) => ghosts::analyze(snapshot, cfg),
        AnalyzerSpec::Combined(cfg) => combined::analyze(snapshot, cfg),
        AnalyzerSpec::PhaseDamage(cfg) => phase_damage::analyze(snapshot, cfg),
        AnalyzerSpec::AddDamage(cfg) => add_damage::analyze(snapshot, cfg),
        AnalyzerSpec::Deaths(cfg) => deaths::analyze(snapshot, cfg),
        AnalyzerSpec::BledOut(cfg) => bled_out::analyze(snapshot, cfg),
        AnalyzerSpec::PriorityDamage(cfg) => priority_damage::analyze(snapshot, cfg),
        AnalyzerSpec::Phase1Mechanics(cfg) => phase_one::analyze(snapshot, cfg),
    };
    Ok(result)
}
