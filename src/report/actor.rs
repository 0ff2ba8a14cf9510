use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Raid role of a player, used for metric selection and result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Tank,
    Healer,
    Melee,
    Ranged,
    Unknown,
}

impl Role {
    /// Sort key: tanks first, unknowns last.
    pub fn priority(self) -> u8 {
        match self {
            Role::Tank => 0,
            Role::Healer => 1,
            Role::Melee => 2,
            Role::Ranged => 3,
            Role::Unknown => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Tank => "Tank",
            Role::Healer => "Healer",
            Role::Melee => "Melee",
            Role::Ranged => "Ranged",
            Role::Unknown => "Unknown",
        }
    }

    /// Healers are scored on healing, everyone else on damage.
    pub fn uses_healing_metric(self) -> bool {
        matches!(self, Role::Healer)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static SPEC_ROLES: Lazy<HashMap<(&'static str, &'static str), Role>> = Lazy::new(|| {
    use Role::*;
    let mut m = HashMap::new();
    m.insert(("DeathKnight", "Blood"), Tank);
    m.insert(("DeathKnight", "Frost"), Melee);
    m.insert(("DeathKnight", "Unholy"), Melee);
    m.insert(("DemonHunter", "Havoc"), Melee);
    m.insert(("DemonHunter", "Vengeance"), Tank);
    m.insert(("Druid", "Balance"), Ranged);
    m.insert(("Druid", "Feral"), Melee);
    m.insert(("Druid", "Guardian"), Tank);
    m.insert(("Druid", "Restoration"), Healer);
    m.insert(("Evoker", "Devastation"), Ranged);
    m.insert(("Evoker", "Preservation"), Healer);
    m.insert(("Evoker", "Augmentation"), Ranged);
    m.insert(("Hunter", "Beast Mastery"), Ranged);
    m.insert(("Hunter", "Marksmanship"), Ranged);
    m.insert(("Hunter", "Survival"), Melee);
    m.insert(("Mage", "Arcane"), Ranged);
    m.insert(("Mage", "Fire"), Ranged);
    m.insert(("Mage", "Frost"), Ranged);
    m.insert(("Monk", "Brewmaster"), Tank);
    m.insert(("Monk", "Mistweaver"), Healer);
    m.insert(("Monk", "Windwalker"), Melee);
    m.insert(("Paladin", "Holy"), Healer);
    m.insert(("Paladin", "Protection"), Tank);
    m.insert(("Paladin", "Retribution"), Melee);
    m.insert(("Priest", "Discipline"), Healer);
    m.insert(("Priest", "Holy"), Healer);
    m.insert(("Priest", "Shadow"), Ranged);
    m.insert(("Rogue", "Assassination"), Melee);
    m.insert(("Rogue", "Outlaw"), Melee);
    m.insert(("Rogue", "Subtlety"), Melee);
    m.insert(("Shaman", "Elemental"), Ranged);
    m.insert(("Shaman", "Enhancement"), Melee);
    m.insert(("Shaman", "Restoration"), Healer);
    m.insert(("Warlock", "Affliction"), Ranged);
    m.insert(("Warlock", "Demonology"), Ranged);
    m.insert(("Warlock", "Destruction"), Ranged);
    m.insert(("Warrior", "Arms"), Melee);
    m.insert(("Warrior", "Fury"), Melee);
    m.insert(("Warrior", "Protection"), Tank);
    m
});

static CLASS_DEFAULT_ROLES: Lazy<HashMap<&'static str, Role>> = Lazy::new(|| {
    use Role::*;
    let mut m = HashMap::new();
    m.insert("Mage", Ranged);
    m.insert("Warlock", Ranged);
    m.insert("Hunter", Ranged);
    m.insert("Priest", Ranged);
    m.insert("Shaman", Ranged);
    m.insert("Evoker", Ranged);
    m.insert("DemonHunter", Melee);
    m.insert("DeathKnight", Melee);
    m.insert("Druid", Melee);
    m.insert("Monk", Melee);
    m.insert("Paladin", Melee);
    m.insert("Rogue", Melee);
    m.insert("Warrior", Melee);
    m
});

/// Resolve a role from class + spec, falling back to the class default.
pub fn role_for(class_name: Option<&str>, spec: Option<&str>) -> Role {
    if let (Some(class), Some(spec)) = (class_name, spec) {
        if let Some(role) = SPEC_ROLES.get(&(class, spec)) {
            return *role;
        }
    }
    if let Some(class) = class_name {
        if let Some(role) = CLASS_DEFAULT_ROLES.get(class) {
            return *role;
        }
    }
    Role::Unknown
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorKind {
    Player,
    Pet,
    Npc,
}

/// One entry of the report's master-data actor table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: i64,
    pub name: String,
    pub kind: ActorKind,
    /// Class name for players, species for NPCs (`subType` upstream).
    pub class_name: Option<String>,
    pub spec: Option<String>,
    pub role: Role,
    /// Owning actor for pets; resolved transitively during normalization.
    pub owner_id: Option<i64>,
}

impl Actor {
    /// Placeholder for ids the master data does not know about.
    pub fn unknown(id: i64) -> Self {
        Self {
            id,
            name: format!("Unknown-{}", id),
            kind: ActorKind::Npc,
            class_name: None,
            spec: None,
            role: Role::Unknown,
            owner_id: None,
        }
    }

    pub fn is_player(&self) -> bool {
        self.kind == ActorKind::Player
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_table_wins_over_class_default() {
        assert_eq!(role_for(Some("Druid"), Some("Restoration")), Role::Healer);
        assert_eq!(role_for(Some("Druid"), Some("Guardian")), Role::Tank);
        // No spec known: class default applies.
        assert_eq!(role_for(Some("Druid"), None), Role::Melee);
    }

    #[test]
    fn unknown_without_class() {
        assert_eq!(role_for(None, None), Role::Unknown);
        assert_eq!(role_for(Some("Gelatinous Cube"), None), Role::Unknown);
    }
}
