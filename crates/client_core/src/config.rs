use std::{collections::HashMap, fs, io, path::Path, time::Duration};

use anyhow::Context;

pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(3 * 60);

/// Build flavour baked in at compile time through `APP_BUILD_PROFILE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildProfile {
    Production,
    Development,
}

impl BuildProfile {
    pub fn current() -> Self {
        Self::from_flag(option_env!("APP_BUILD_PROFILE"))
    }

    pub fn from_flag(flag: Option<&str>) -> Self {
        match flag.map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("production") => BuildProfile::Production,
            _ => BuildProfile::Development,
        }
    }

    pub fn api_base_path(self) -> &'static str {
        match self {
            BuildProfile::Production => "/api",
            BuildProfile::Development => "/app",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub origin: String,
    pub profile: BuildProfile,
    pub socket_url: Option<String>,
    pub auth_origin: String,
    pub request_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:8080".into(),
            profile: BuildProfile::current(),
            socket_url: None,
            auth_origin: "hubs".into(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientSettings {
    /// Origin joined with the profile's API prefix, e.g. `https://host/api`.
    pub fn api_base_url(&self) -> String {
        join_url(&self.origin, self.profile.api_base_path())
    }
}

pub fn load_settings() -> anyhow::Result<ClientSettings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

/// Defaults, then the optional settings file, then `APP__*` environment
/// variables. A missing file is not an error; a malformed one is.
pub fn load_settings_from(path: &Path) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file_cfg = toml::from_str::<HashMap<String, String>>(&raw)
                .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
            apply_overrides(&mut settings, |key| file_cfg.get(key).cloned());
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()));
        }
    }

    apply_overrides(&mut settings, |key| {
        std::env::var(format!("APP__{}", key.to_ascii_uppercase())).ok()
    });

    Ok(settings)
}

fn apply_overrides(settings: &mut ClientSettings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("origin").and_then(|v| non_empty(&v)) {
        settings.origin = v;
    }
    if let Some(v) = lookup("socket_url").and_then(|v| non_empty(&v)) {
        settings.socket_url = Some(v);
    }
    if let Some(v) = lookup("auth_origin").and_then(|v| non_empty(&v)) {
        settings.auth_origin = v;
    }
    if let Some(v) = lookup("request_timeout_secs") {
        if let Ok(secs) = v.trim().parse::<u64>() {
            settings.request_timeout = Duration::from_secs(secs);
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    let base = base.trim().trim_end_matches('/');
    let path = path.trim();

    if base.is_empty() {
        path.to_string()
    } else {
        format!("{}/{}", base, path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    #[test]
    fn production_flag_selects_api_prefix() {
        assert_eq!(
            BuildProfile::from_flag(Some("production")).api_base_path(),
            "/api"
        );
        assert_eq!(
            BuildProfile::from_flag(Some(" Production ")),
            BuildProfile::Production
        );
        assert_eq!(BuildProfile::from_flag(Some("test")).api_base_path(), "/app");
        assert_eq!(BuildProfile::from_flag(None).api_base_path(), "/app");
    }

    #[test]
    fn api_base_url_joins_origin_and_prefix() {
        let settings = ClientSettings {
            origin: "https://hubs.example.com/".into(),
            profile: BuildProfile::Production,
            ..ClientSettings::default()
        };
        assert_eq!(settings.api_base_url(), "https://hubs.example.com/api");
    }

    #[test]
    fn overrides_ignore_blank_values_and_bad_numbers() {
        let mut settings = ClientSettings::default();
        let values: HashMap<&str, &str> = [
            ("origin", "   "),
            ("socket_url", "wss://hubs.example.com/socket"),
            ("request_timeout_secs", "soon"),
        ]
        .into_iter()
        .collect();

        apply_overrides(&mut settings, |key| values.get(key).map(|v| v.to_string()));

        assert_eq!(settings.origin, "http://127.0.0.1:8080");
        assert_eq!(
            settings.socket_url.as_deref(),
            Some("wss://hubs.example.com/socket")
        );
        assert_eq!(settings.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }

    #[test]
    fn reads_settings_file() {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("signin_client_settings_{suffix}.toml"));
        fs::write(
            &path,
            "origin = \"https://file.example.com\"\nrequest_timeout_secs = \"5\"\n",
        )
        .expect("write settings");

        let settings = load_settings_from(&path).expect("load settings");
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(settings.request_timeout, Duration::from_secs(5));
        if env::var("APP__ORIGIN").is_err() {
            assert_eq!(settings.origin, "https://file.example.com");
        }
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() {
        let path = env::temp_dir().join("signin_client_settings_absent.toml");
        let settings = load_settings_from(&path).expect("defaults");
        assert!(!settings.auth_origin.is_empty());
    }
}
