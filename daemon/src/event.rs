use crate::config::Config;

pub enum TrackerEvent {
    /// The poll interval elapsed; scan processes and the console log.
    Tick,
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C received; clear the presence and exit.
    Shutdown,
}
