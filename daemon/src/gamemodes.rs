/// Map identifier → gamemode classification.
///
/// Resolution is layered:
///   1. exact lookup in the table of official maps (authoritative, never expires)
///   2. known gamemode substrings anywhere in the id
///   3. a known prefix token before the first `_`
///
/// Anything else is "unknown_map". Network classification of community maps
/// lives in [`crate::custom_maps`] and only runs when these layers give up.
use std::collections::HashMap;

pub const UNKNOWN_GAMEMODE_CODE: &str = "unknown_map";
pub const UNKNOWN_GAMEMODE_DISPLAY: &str = "Unknown gamemode";

/// Every gamemode code the rest of the daemon understands, with its display name.
/// Remote classification results are matched against this list too.
pub const GAMEMODES: &[(&str, &str)] = &[
    ("attack-defend", "Attack/Defend"),
    ("control-point", "Control Point"),
    ("ctf", "Capture the Flag"),
    ("koth", "King of the Hill"),
    ("payload", "Payload"),
    ("payload-race", "Payload Race"),
    ("arena", "Arena"),
    ("mvm", "Mann vs. Machine"),
    ("passtime", "PASS Time"),
    ("player-destruction", "Player Destruction"),
    ("special-delivery", "Special Delivery"),
    ("robot-destruction", "Robot Destruction"),
    ("territorial-control", "Territorial Control"),
    ("mannpower", "Mannpower"),
    ("medieval", "Medieval"),
    ("training", "Training"),
    ("versus-saxton-hale", "Versus Saxton Hale"),
    ("jump", "Jump"),
    ("surfing", "Surfing"),
    ("mge", "MGE"),
    ("trading", "Trading"),
    ("deathrun", "Deathrun"),
    ("jailbreak", "Jailbreak"),
    ("prophunt", "Prop Hunt"),
    ("zombie", "Zombie Survival"),
    ("dodgeball", "Dodgeball"),
];

/// Substrings checked anywhere in a map id, in order.
const GAMEMODE_SUBSTRINGS: &[(&str, &str)] = &[
    ("mvm_", "mvm"),
    ("koth_", "koth"),
    ("ctf_", "ctf"),
    ("plr_", "payload-race"),
    ("vsh_", "versus-saxton-hale"),
    ("ff2_", "versus-saxton-hale"),
    ("saxton", "versus-saxton-hale"),
    ("jump_", "jump"),
    ("rocketjump", "jump"),
    ("surf_", "surfing"),
    ("mge", "mge"),
    ("trade_", "trading"),
    ("deathrun", "deathrun"),
    ("jailbreak", "jailbreak"),
    ("prophunt", "prophunt"),
    ("dodgeball", "dodgeball"),
    ("zombie", "zombie"),
    ("medieval", "medieval"),
];

/// Prefix tokens (text before the first `_`).
///
/// `cp` is intentionally absent: control point maps split into attack/defend,
/// symmetric and domination layouts that only remote classification can tell apart.
const GAMEMODE_PREFIXES: &[(&str, &str)] = &[
    ("pl", "payload"),
    ("plr", "payload-race"),
    ("koth", "koth"),
    ("ctf", "ctf"),
    ("arena", "arena"),
    ("mvm", "mvm"),
    ("pd", "player-destruction"),
    ("sd", "special-delivery"),
    ("rd", "robot-destruction"),
    ("tc", "territorial-control"),
    ("pass", "passtime"),
    ("tr", "training"),
    ("vsh", "versus-saxton-hale"),
    ("ff2", "versus-saxton-hale"),
    ("jump", "jump"),
    ("rj", "jump"),
    ("surf", "surfing"),
    ("mge", "mge"),
    ("trade", "trading"),
    ("dr", "deathrun"),
    ("jb", "jailbreak"),
    ("ba", "jailbreak"),
    ("ph", "prophunt"),
    ("zs", "zombie"),
    ("zf", "zombie"),
    ("tfdb", "dodgeball"),
];

/// (map id, display name, gamemode code, has foreground art)
const OFFICIAL_MAPS: &[(&str, &str, &str, bool)] = &[
    ("pl_badwater", "Badwater Basin", "payload", true),
    ("pl_upward", "Upward", "payload", true),
    ("pl_thundermountain", "Thunder Mountain", "payload", true),
    ("pl_borneo", "Borneo", "payload", true),
    ("pl_goldrush", "Gold Rush", "payload", true),
    ("pl_hoodoo_final", "Hoodoo", "payload", true),
    ("pl_barnblitz", "Barnblitz", "payload", true),
    ("pl_frontier_final", "Frontier", "payload", true),
    ("pl_swiftwater_final1", "Swiftwater", "payload", true),
    ("pl_pier", "Pier", "payload", true),
    ("pl_snowycoast", "Snowycoast", "payload", true),
    ("pl_enclosure_final", "Enclosure", "payload", true),
    ("pl_cactuscanyon", "Cactus Canyon", "payload", true),
    ("pl_millstone_event", "Hellstone", "payload", false),
    ("plr_hightower", "Hightower", "payload-race", true),
    ("plr_pipeline", "Pipeline", "payload-race", true),
    ("plr_nightfall_final", "Nightfall", "payload-race", true),
    ("plr_bananabay", "Banana Bay", "payload-race", true),
    ("cp_dustbowl", "Dustbowl", "attack-defend", true),
    ("cp_gravelpit", "Gravel Pit", "attack-defend", true),
    ("cp_steel", "Steel", "attack-defend", true),
    ("cp_gorge", "Gorge", "attack-defend", true),
    ("cp_mountainlab", "Mountain Lab", "attack-defend", true),
    ("cp_mercenarypark", "Mercenary Park", "attack-defend", true),
    ("cp_manor_event", "Mann Manor", "attack-defend", false),
    ("cp_badlands", "Badlands", "control-point", true),
    ("cp_granary", "Granary", "control-point", true),
    ("cp_well", "Well", "control-point", true),
    ("cp_process_final", "Process", "control-point", true),
    ("cp_gullywash_final1", "Gullywash", "control-point", true),
    ("cp_sunshine", "Sunshine", "control-point", true),
    ("cp_metalworks", "Metalworks", "control-point", true),
    ("cp_snakewater_final1", "Snakewater", "control-point", true),
    ("cp_powerhouse", "Powerhouse", "control-point", true),
    ("cp_foundry", "Foundry", "control-point", true),
    ("cp_degrootkeep", "DeGroot Keep", "medieval", true),
    ("ctf_2fort", "2Fort", "ctf", true),
    ("ctf_turbine", "Turbine", "ctf", true),
    ("ctf_doublecross", "Double Cross", "ctf", true),
    ("ctf_landfall", "Landfall", "ctf", true),
    ("ctf_well", "Well (CTF)", "ctf", true),
    ("ctf_2fort_invasion", "2Fort Invasion", "ctf", false),
    ("ctf_foundry", "Foundry (Mannpower)", "mannpower", true),
    ("ctf_hellfire", "Hellfire", "mannpower", true),
    ("koth_viaduct", "Viaduct", "koth", true),
    ("koth_harvest_final", "Harvest", "koth", true),
    ("koth_lakeside_final", "Lakeside", "koth", true),
    ("koth_nucleus", "Nucleus (KOTH)", "koth", true),
    ("koth_sawmill", "Sawmill (KOTH)", "koth", true),
    ("koth_badlands", "Badlands (KOTH)", "koth", true),
    ("koth_king", "Kong King", "koth", true),
    ("koth_brazil", "Brazil", "koth", true),
    ("koth_product_final", "Product", "koth", true),
    ("koth_viaduct_event", "Eyeaduct", "koth", false),
    ("arena_lumberyard", "Lumberyard", "arena", true),
    ("arena_ravine", "Ravine", "arena", true),
    ("arena_well", "Well (Arena)", "arena", true),
    ("arena_byre", "Byre", "arena", true),
    ("mvm_mannworks", "Mannworks", "mvm", true),
    ("mvm_coaltown", "Coal Town", "mvm", true),
    ("mvm_decoy", "Decoy", "mvm", true),
    ("mvm_rottenburg", "Rottenburg", "mvm", true),
    ("mvm_bigrock", "Big Rock", "mvm", true),
    ("mvm_mannhattan", "Mannhattan", "mvm", true),
    ("pass_brickyard", "Brickyard", "passtime", true),
    ("pass_district", "District", "passtime", true),
    ("pd_watergate", "Watergate", "player-destruction", true),
    ("pd_cursed_cove_event", "Cursed Cove", "player-destruction", false),
    ("sd_doomsday", "Doomsday", "special-delivery", true),
    ("rd_asteroid", "Asteroid", "robot-destruction", true),
    ("tc_hydro", "Hydro", "territorial-control", true),
    ("tr_target", "Target", "training", true),
    ("tr_dustbowl", "Dustbowl (Training)", "training", true),
    ("itemtest", "itemtest", "training", false),
];

/// One official map.
#[derive(Debug, Clone, PartialEq)]
pub struct GamemodeEntry {
    pub official_map_id: String,
    pub display_name: String,
    pub gamemode_code: String,
    pub gamemode_display_name: String,
    /// Whether a dedicated map image exists for this map.
    pub has_art: bool,
}

/// Result of classifying a map id.
#[derive(Debug, Clone, PartialEq)]
pub struct MapClassification {
    pub display_name: String,
    pub gamemode_code: String,
    pub gamemode_display: String,
    /// True for anything absent from the official table.
    pub is_custom: bool,
    pub has_art: bool,
}

impl MapClassification {
    /// The sentinel returned when nothing could classify the map.
    pub fn unknown(map_id: &str) -> Self {
        Self {
            display_name: map_id.to_string(),
            gamemode_code: UNKNOWN_GAMEMODE_CODE.to_string(),
            gamemode_display: UNKNOWN_GAMEMODE_DISPLAY.to_string(),
            is_custom: true,
            has_art: false,
        }
    }

    fn custom(map_id: &str, code: &str) -> Self {
        Self {
            display_name: map_id.to_string(),
            gamemode_code: code.to_string(),
            gamemode_display: gamemode_display(code).to_string(),
            is_custom: true,
            has_art: false,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.gamemode_code == UNKNOWN_GAMEMODE_CODE
    }
}

/// Returns the display name of a gamemode code, or the unknown display name.
pub fn gamemode_display(code: &str) -> &'static str {
    GAMEMODES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, display)| *display)
        .unwrap_or(UNKNOWN_GAMEMODE_DISPLAY)
}

/// Returns true if `code` is part of the gamemode vocabulary.
pub fn is_known_gamemode(code: &str) -> bool {
    GAMEMODES.iter().any(|(c, _)| *c == code)
}

/// Immutable table of official maps. Built once at startup and shared by reference.
pub struct GamemodeTable {
    entries: HashMap<String, GamemodeEntry>,
}

impl GamemodeTable {
    /// The table of official maps shipped with the daemon.
    pub fn builtin() -> Self {
        Self::from_entries(OFFICIAL_MAPS.iter().map(|(id, name, code, has_art)| GamemodeEntry {
            official_map_id: id.to_string(),
            display_name: name.to_string(),
            gamemode_code: code.to_string(),
            gamemode_display_name: gamemode_display(code).to_string(),
            has_art: *has_art,
        }))
    }

    pub fn from_entries(entries: impl IntoIterator<Item = GamemodeEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| (e.official_map_id.clone(), e))
                .collect(),
        }
    }

    pub fn get(&self, map_id: &str) -> Option<&GamemodeEntry> {
        self.entries.get(map_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Classifies `map_id` using the official table, then substring and prefix
    /// heuristics. Never touches the network.
    pub fn resolve(&self, map_id: &str) -> MapClassification {
        if map_id.is_empty() {
            tracing::warn!(target: "gamemodes", "Asked to resolve an empty map id");
            return MapClassification::unknown("");
        }

        if let Some(entry) = self.get(map_id) {
            return MapClassification {
                display_name: entry.display_name.clone(),
                gamemode_code: entry.gamemode_code.clone(),
                gamemode_display: entry.gamemode_display_name.clone(),
                is_custom: false,
                has_art: entry.has_art,
            };
        }

        match heuristic_gamemode(map_id) {
            Some(code) => MapClassification::custom(map_id, code),
            None => {
                tracing::debug!(target: "gamemodes", "Unresolved custom map: {map_id}");
                MapClassification::unknown(map_id)
            }
        }
    }
}

/// Strips the `workshop/` directory and `.ugc<id>` suffix from workshop map ids.
fn base_map_name(map_id: &str) -> &str {
    let name = map_id.rsplit('/').next().unwrap_or(map_id);
    match name.find(".ugc") {
        Some(idx) => &name[..idx],
        None => name,
    }
}

fn heuristic_gamemode(map_id: &str) -> Option<&'static str> {
    let lower = base_map_name(map_id).to_lowercase();

    if let Some((_, code)) = GAMEMODE_SUBSTRINGS.iter().find(|(s, _)| lower.contains(s)) {
        return Some(code);
    }

    let prefix = lower.split('_').next()?;
    if prefix == lower {
        // No delimiter, so there is no prefix token.
        return None;
    }
    GAMEMODE_PREFIXES
        .iter()
        .find(|(p, _)| *p == prefix)
        .map(|(_, code)| *code)
}
