/// Line classification for the game's console log.
///
/// [`RULES`] is evaluated in order against every line and every rule that
/// matches contributes its event, so one line can yield several events. Lines
/// are processed in file order and events are folded into the scan result as
/// they appear; the last matching line therefore wins for any value.

pub const UNSELECTED_CLASS: &str = "unselected";
pub const NOT_QUEUED: &str = "Not queued";
pub const GENERIC_QUEUED: &str = "Queued";
pub const STANDBY_QUEUED: &str = "Queued for a party's match";

pub const CLASSES: &[&str] = &[
    "Scout", "Soldier", "Pyro", "Demoman", "Heavy", "Engineer", "Medic", "Sniper", "Spy",
];

const DISCONNECT_MARKERS: &[&str] = &[
    "Server shutting down",
    "Config directory",
    "Lobby destroyed",
    "Disconnect: ",
    "Missing map ",
];

/// Printed for every player who leaves; it is our own leave when the name is ours.
const USER_LEFT_MARKER: &str = "(Disconnect by user.)";

const QUEUE_ENTERED: &str = "[PartyClient] Entering queue ";
const STANDBY_ENTERED: &str = "[PartyClient] Entering standby queue";
const QUEUE_LEFT: &[&str] = &["[PartyClient] Leaving queue", "[PartyClient] Leaving standby queue"];
const LISTEN_SERVER: &str = "Executing listen server config file";

/// Match group string → short label.
const MATCH_TYPES: &[(&str, &str)] = &[
    ("12v12 Casual Match", "Casual"),
    ("6v6 Ladder Match", "Competitive"),
    ("MvM Practice", "MvM (Boot Camp)"),
    ("MvM MannUp", "MvM (Mann Up)"),
    ("Special Event", "Special Event"),
];

pub const DEVELOPER_NAME: &str = "Kataiser";

/// A state transition recognised in the console log.
#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    MapChanged(String),
    ClassSelected(String),
    Disconnected,
    /// Carries the short match-type label, e.g. "Casual".
    EnteredQueue(String),
    EnteredStandbyQueue,
    LeftQueue,
    OperatorSighted,
    HostingStarted,
    ServerNameReported(String),
    PlayerCountReported(u32, u32),
}

/// What a rule may look at besides the line itself.
pub struct LineContext<'a> {
    pub usernames: &'a [String],
    /// True while the scan currently believes the user is on a map.
    pub on_map: bool,
}

type Rule = fn(&str, &LineContext) -> Option<RawEvent>;

pub const RULES: &[(&str, Rule)] = &[
    ("map", map_changed),
    ("class", class_selected),
    ("disconnect", disconnect_marker),
    ("user_left", user_left),
    ("queue", queue_entered),
    ("standby", standby_entered),
    ("queue_left", queue_left),
    ("listen_server", hosting_started),
    ("hostname", server_name),
    ("players", player_count),
    ("developer", developer_sighted),
];

/// Applies every rule to `line`, in order.
pub fn classify(line: &str, ctx: &LineContext) -> Vec<RawEvent> {
    RULES
        .iter()
        .filter_map(|(name, rule)| {
            let event = rule(line, ctx)?;
            tracing::trace!(target: "log_scanner", rule = *name, "{event:?}");
            Some(event)
        })
        .collect()
}

/// Label shown while queued for `match_type`.
pub fn queued_label(match_type: &str, hide_gamemode: bool) -> String {
    if hide_gamemode {
        GENERIC_QUEUED.to_string()
    } else {
        format!("Queued for {match_type}")
    }
}

fn map_changed(line: &str, _: &LineContext) -> Option<RawEvent> {
    let map = line.strip_prefix("Map: ")?.trim();
    (!map.is_empty()).then(|| RawEvent::MapChanged(map.to_string()))
}

fn class_selected(line: &str, _: &LineContext) -> Option<RawEvent> {
    let class = line.trim().strip_suffix(" selected")?;
    CLASSES
        .iter()
        .find(|c| **c == class)
        .map(|c| RawEvent::ClassSelected(c.to_string()))
}

fn disconnect_marker(line: &str, _: &LineContext) -> Option<RawEvent> {
    DISCONNECT_MARKERS
        .iter()
        .any(|m| line.contains(m))
        .then_some(RawEvent::Disconnected)
}

// Any username substring counts, so a name contained in someone else's name
// also matches that player's leave message.
fn user_left(line: &str, ctx: &LineContext) -> Option<RawEvent> {
    if !line.contains(USER_LEFT_MARKER) {
        return None;
    }
    ctx.usernames
        .iter()
        .any(|u| !u.is_empty() && line.contains(u.as_str()))
        .then_some(RawEvent::Disconnected)
}

fn queue_entered(line: &str, _: &LineContext) -> Option<RawEvent> {
    let rest = &line[line.find(QUEUE_ENTERED)? + QUEUE_ENTERED.len()..];
    let rest = rest.strip_prefix("for ").unwrap_or(rest);
    let match_type = rest.strip_prefix("match group ")?.trim();

    match MATCH_TYPES.iter().find(|(raw, _)| *raw == match_type) {
        Some((_, label)) => Some(RawEvent::EnteredQueue(label.to_string())),
        None => {
            tracing::warn!(target: "log_scanner", "Unknown match type in queue line: {match_type:?}");
            None
        }
    }
}

fn standby_entered(line: &str, _: &LineContext) -> Option<RawEvent> {
    line.contains(STANDBY_ENTERED).then_some(RawEvent::EnteredStandbyQueue)
}

fn queue_left(line: &str, _: &LineContext) -> Option<RawEvent> {
    QUEUE_LEFT
        .iter()
        .any(|m| line.contains(m))
        .then_some(RawEvent::LeftQueue)
}

fn hosting_started(line: &str, _: &LineContext) -> Option<RawEvent> {
    line.contains(LISTEN_SERVER).then_some(RawEvent::HostingStarted)
}

/// `hostname: Valve Matchmaking Server (Virginia srcds1234-iad1 #12)`
fn server_name(line: &str, _: &LineContext) -> Option<RawEvent> {
    let name = line.strip_prefix("hostname: ")?.trim();
    (!name.is_empty()).then(|| RawEvent::ServerNameReported(name.to_string()))
}

/// `players : 21 humans, 2 bots (24 max)`
fn player_count(line: &str, _: &LineContext) -> Option<RawEvent> {
    let rest = line.strip_prefix("players : ")?;
    let (counts, max) = rest.split_once('(')?;
    let max: u32 = max.trim().strip_suffix("max)")?.trim().parse().ok()?;

    // Chat is logged as `name :  text`, so these numbers can be anything.
    let mut current = 0u32;
    for part in counts.split(',') {
        let number = part.split_whitespace().next()?;
        current = current.checked_add(number.parse::<u32>().ok()?)?;
    }
    Some(RawEvent::PlayerCountReported(current, max))
}

fn developer_sighted(line: &str, ctx: &LineContext) -> Option<RawEvent> {
    let is_developer = ctx.usernames.iter().any(|u| u == DEVELOPER_NAME);
    (ctx.on_map && !is_developer && line.contains(DEVELOPER_NAME)).then_some(RawEvent::OperatorSighted)
}
