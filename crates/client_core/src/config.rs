use std::{fs, path::Path, path::PathBuf, str::FromStr, time::Duration};

use tracing::warn;

const DEFAULT_TYPING_DEBOUNCE_MS: u64 = 3_000;
const DEFAULT_TYPING_SAFETY_TIMEOUT_MS: u64 = 6_000;
const DEFAULT_RECORDING_MAX_MS: u64 = 10_000;
const DEFAULT_MIN_AUDIO_BYTES: usize = 1_024;
const DEFAULT_RECONNECT_INITIAL_DELAY_MS: u64 = 500;
const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 30_000;

/// How the conversation timeline orders its entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimelineOrdering {
    /// Append order is display order.
    Arrival,
    /// Sorted by timestamp, ties broken by arrival. Local echoes carry the
    /// client clock while inbound messages carry the server's `timeStamp`,
    /// so clock skew can place a reply above the message it answers.
    #[default]
    Timestamp,
}

impl FromStr for TimelineOrdering {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "arrival" => Ok(Self::Arrival),
            "timestamp" => Ok(Self::Timestamp),
            other => Err(format!("unknown timeline ordering `{other}`")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub server_url: String,
    pub identity_path: PathBuf,
    pub typing_debounce: Duration,
    pub typing_safety_timeout: Duration,
    pub recording_max_duration: Duration,
    pub min_audio_bytes: usize,
    pub timeline_ordering: TimelineOrdering,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".into(),
            identity_path: PathBuf::from("./data/user.json"),
            typing_debounce: Duration::from_millis(DEFAULT_TYPING_DEBOUNCE_MS),
            typing_safety_timeout: Duration::from_millis(DEFAULT_TYPING_SAFETY_TIMEOUT_MS),
            recording_max_duration: Duration::from_millis(DEFAULT_RECORDING_MAX_MS),
            min_audio_bytes: DEFAULT_MIN_AUDIO_BYTES,
            timeline_ordering: TimelineOrdering::default(),
            reconnect_initial_delay: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_DELAY_MS),
            reconnect_max_delay: Duration::from_millis(DEFAULT_RECONNECT_MAX_DELAY_MS),
        }
    }
}

/// Defaults, then `client.toml` in the working directory, then the process
/// environment.
pub fn load_settings() -> ClientSettings {
    load_settings_from(Path::new("client.toml"), |key| std::env::var(key).ok())
}

pub fn load_settings_from(
    file: &Path,
    env: impl Fn(&str) -> Option<String>,
) -> ClientSettings {
    let mut settings = ClientSettings::default();

    if let Ok(raw) = fs::read_to_string(file) {
        match raw.parse::<toml::Table>() {
            Ok(table) => {
                for (key, value) in table {
                    let value = match value {
                        toml::Value::String(v) => v,
                        toml::Value::Integer(v) => v.to_string(),
                        other => {
                            warn!(key = %key, "config: ignoring non-scalar value {other}");
                            continue;
                        }
                    };
                    apply(&mut settings, &key, &value);
                }
            }
            Err(err) => warn!(path = %file.display(), "config: unreadable settings file: {err}"),
        }
    }

    if let Some(v) = env("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    for key in [
        "server_url",
        "identity_path",
        "typing_debounce_ms",
        "typing_safety_timeout_ms",
        "recording_max_ms",
        "min_audio_bytes",
        "timeline_ordering",
        "reconnect_initial_delay_ms",
        "reconnect_max_delay_ms",
    ] {
        if let Some(v) = env(&format!("APP__{}", key.to_ascii_uppercase())) {
            apply(&mut settings, key, &v);
        }
    }

    if settings.typing_safety_timeout <= settings.typing_debounce {
        let clamped = settings.typing_debounce + Duration::from_millis(1_000);
        warn!(
            safety_ms = settings.typing_safety_timeout.as_millis() as u64,
            debounce_ms = settings.typing_debounce.as_millis() as u64,
            "config: typing safety timeout must exceed the debounce window; clamping"
        );
        settings.typing_safety_timeout = clamped;
    }
    if settings.reconnect_max_delay < settings.reconnect_initial_delay {
        settings.reconnect_max_delay = settings.reconnect_initial_delay;
    }

    settings
}

fn apply(settings: &mut ClientSettings, key: &str, value: &str) {
    match key {
        "server_url" => settings.server_url = value.trim().to_string(),
        "identity_path" => settings.identity_path = PathBuf::from(value),
        "typing_debounce_ms" => set_millis(&mut settings.typing_debounce, key, value),
        "typing_safety_timeout_ms" => set_millis(&mut settings.typing_safety_timeout, key, value),
        "recording_max_ms" => set_millis(&mut settings.recording_max_duration, key, value),
        "reconnect_initial_delay_ms" => {
            set_millis(&mut settings.reconnect_initial_delay, key, value)
        }
        "reconnect_max_delay_ms" => set_millis(&mut settings.reconnect_max_delay, key, value),
        "min_audio_bytes" => match value.trim().parse::<usize>() {
            Ok(parsed) => settings.min_audio_bytes = parsed,
            Err(_) => warn!(key, value, "config: ignoring invalid byte count"),
        },
        "timeline_ordering" => match value.parse() {
            Ok(parsed) => settings.timeline_ordering = parsed,
            Err(err) => warn!(key, "config: {err}"),
        },
        _ => warn!(key, "config: ignoring unknown setting"),
    }
}

fn set_millis(target: &mut Duration, key: &str, value: &str) {
    match value.trim().parse::<u64>() {
        Ok(ms) if ms > 0 => *target = Duration::from_millis(ms),
        _ => warn!(key, value, "config: ignoring invalid duration"),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn temp_file(contents: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("chat_client_config_{suffix}.toml"));
        fs::write(&path, contents).expect("write settings");
        path
    }

    #[test]
    fn defaults_apply_without_file_or_env() {
        let settings = load_settings_from(Path::new("/nonexistent/client.toml"), |_| None);
        assert_eq!(settings.typing_debounce, Duration::from_millis(3_000));
        assert_eq!(settings.typing_safety_timeout, Duration::from_millis(6_000));
        assert_eq!(settings.recording_max_duration, Duration::from_secs(10));
        assert_eq!(settings.min_audio_bytes, 1_024);
        assert_eq!(settings.timeline_ordering, TimelineOrdering::Timestamp);
    }

    #[test]
    fn environment_overrides_file_values() {
        let path = temp_file(
            "server_url = \"http://file.test\"\ntyping_debounce_ms = 1500\ntimeline_ordering = \"arrival\"\n",
        );
        let env_vars = HashMap::from([
            ("APP__SERVER_URL".to_string(), "https://env.test".to_string()),
            ("APP__MIN_AUDIO_BYTES".to_string(), "2048".to_string()),
        ]);
        let settings = load_settings_from(&path, |key| env_vars.get(key).cloned());
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(settings.server_url, "https://env.test");
        assert_eq!(settings.typing_debounce, Duration::from_millis(1_500));
        assert_eq!(settings.min_audio_bytes, 2_048);
        assert_eq!(settings.timeline_ordering, TimelineOrdering::Arrival);
    }

    #[test]
    fn invalid_numbers_are_ignored() {
        let settings = load_settings_from(Path::new("/nonexistent/client.toml"), |key| {
            (key == "APP__RECORDING_MAX_MS").then(|| "soon".to_string())
        });
        assert_eq!(settings.recording_max_duration, Duration::from_secs(10));
    }

    #[test]
    fn safety_timeout_is_clamped_above_debounce() {
        let settings = load_settings_from(Path::new("/nonexistent/client.toml"), |key| match key {
            "APP__TYPING_DEBOUNCE_MS" => Some("5000".to_string()),
            "APP__TYPING_SAFETY_TIMEOUT_MS" => Some("4000".to_string()),
            _ => None,
        });
        assert!(settings.typing_safety_timeout > settings.typing_debounce);
    }
}
