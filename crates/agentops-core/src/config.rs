// Observability configuration
//
// Flat dot-delimited settings with environment-variable overrides under the
// OBS_ prefix. Construction never fails: malformed values fall back to the
// documented defaults.

/// Central configuration for the observability subsystem.
///
/// Environment variables:
/// - `OBS_ENABLED`: enable/disable the whole plane (default true)
/// - `OBS_SAMPLING_RATE`: fraction of OK traces sampled (default 0.10)
/// - `OBS_ERROR_SAMPLING_RATE`: fraction of error spans exported (default 1.0)
/// - `OBS_EXPORTERS`: comma-separated list from {console, file, substrate}
/// - `OBS_BATCH_SIZE`: spans per export batch (default 100)
/// - `OBS_BATCH_TIMEOUT_SEC`: flush interval (default 10)
/// - `OBS_FILE_EXPORT_PATH`: JSON-lines output path
/// - `OBS_SUBSTRATE_ENABLED`: export spans into the packet store (default true)
/// - `OBS_CIRCUIT_BREAKER_THRESHOLD`: failures to open a breaker (default 5)
/// - `OBS_CIRCUIT_BREAKER_WINDOW_SEC`: sliding failure window (default 60)
/// - `OBS_CIRCUIT_BREAKER_RESET_TIMEOUT_SEC`: open-state hold (default 30)
/// - `OBS_CONTEXT_MAX_TOKENS`: assembled-context budget (default 8000)
#[derive(Debug, Clone, PartialEq)]
pub struct ObservabilitySettings {
    pub enabled: bool,
    pub sampling_rate: f64,
    pub error_sampling_rate: f64,
    pub exporters: Vec<String>,
    pub batch_size: usize,
    pub batch_timeout_sec: u64,
    pub file_export_path: String,
    pub substrate_enabled: bool,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_window_sec: u64,
    pub circuit_breaker_reset_timeout_sec: u64,
    pub context_max_tokens: u32,
}

impl Default for ObservabilitySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sampling_rate: 0.10,
            error_sampling_rate: 1.0,
            exporters: vec!["console".to_string()],
            batch_size: 100,
            batch_timeout_sec: 10,
            file_export_path: "/tmp/agentops_spans.jsonl".to_string(),
            substrate_enabled: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_window_sec: 60,
            circuit_breaker_reset_timeout_sec: 30,
            context_max_tokens: 8000,
        }
    }
}

impl ObservabilitySettings {
    /// Load settings from the environment, falling back to defaults for
    /// missing or malformed values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut settings = Self {
            enabled: env_bool("OBS_ENABLED", defaults.enabled),
            sampling_rate: env_parse("OBS_SAMPLING_RATE", defaults.sampling_rate),
            error_sampling_rate: env_parse("OBS_ERROR_SAMPLING_RATE", defaults.error_sampling_rate),
            exporters: env_list("OBS_EXPORTERS", defaults.exporters),
            batch_size: env_parse("OBS_BATCH_SIZE", defaults.batch_size),
            batch_timeout_sec: env_parse("OBS_BATCH_TIMEOUT_SEC", defaults.batch_timeout_sec),
            file_export_path: std::env::var("OBS_FILE_EXPORT_PATH")
                .unwrap_or(defaults.file_export_path),
            substrate_enabled: env_bool("OBS_SUBSTRATE_ENABLED", defaults.substrate_enabled),
            circuit_breaker_threshold: env_parse(
                "OBS_CIRCUIT_BREAKER_THRESHOLD",
                defaults.circuit_breaker_threshold,
            ),
            circuit_breaker_window_sec: env_parse(
                "OBS_CIRCUIT_BREAKER_WINDOW_SEC",
                defaults.circuit_breaker_window_sec,
            ),
            circuit_breaker_reset_timeout_sec: env_parse(
                "OBS_CIRCUIT_BREAKER_RESET_TIMEOUT_SEC",
                defaults.circuit_breaker_reset_timeout_sec,
            ),
            context_max_tokens: env_parse("OBS_CONTEXT_MAX_TOKENS", defaults.context_max_tokens),
        };

        settings.sampling_rate = settings.sampling_rate.clamp(0.0, 1.0);
        settings.error_sampling_rate = settings.error_sampling_rate.clamp(0.0, 1.0);

        // Substrate export is driven by its own flag as well as the list.
        if settings.substrate_enabled && !settings.exporters.iter().any(|e| e == "substrate") {
            settings.exporters.push("substrate".to_string());
        }

        settings
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default,
    }
}
