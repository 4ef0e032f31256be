//! Reads the in-game names of every account that logged into Steam on this machine.
use std::path::Path;

const LOGIN_USERS_FILE: [&str; 2] = ["config", "loginusers.vdf"];

/// Returns every `PersonaName` in `<steam root>/config/loginusers.vdf`.
/// A missing or unreadable file yields no names.
pub fn read_usernames(steam_root: &Path) -> Vec<String> {
    let path = LOGIN_USERS_FILE.iter().fold(steam_root.to_path_buf(), |p, c| p.join(c));
    match std::fs::read_to_string(&path) {
        Ok(content) => parse_persona_names(&content),
        Err(e) => {
            tracing::debug!(target: "tracker", "No Steam login users at {}: {e}", path.display());
            Vec::new()
        }
    }
}

/// Extracts the values of `"PersonaName"` keys from a VDF document.
fn parse_persona_names(vdf: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in vdf.lines() {
        let mut quoted = line.split('"').skip(1).step_by(2);
        let (Some(key), Some(value)) = (quoted.next(), quoted.next()) else {
            continue;
        };
        if key.eq_ignore_ascii_case("PersonaName") && !value.is_empty() && !names.iter().any(|n| n == value) {
            names.push(value.to_string());
        }
    }
    names
}
