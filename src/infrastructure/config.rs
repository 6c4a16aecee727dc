use crate::infrastructure::process_supervisor::LaunchSpec;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub window: WindowSettings,
    #[serde(default)]
    pub status: StatusSettings,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub server: ServerSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerSettings {
    #[serde(default = "default_candidates")]
    pub candidates: Vec<String>,
    #[serde(default = "default_script")]
    pub script: String,
    pub setpoint: Option<f64>,
    #[serde(default = "default_start_timeout_ms")]
    pub start_timeout_ms: u64,
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
    pub read_idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WindowSettings {
    #[serde(default = "default_window_seconds")]
    pub seconds: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatusSettings {
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionSettings {
    #[serde(default = "default_reset_delay_ms")]
    pub reset_delay_ms: u64,
    #[serde(default)]
    pub autostart: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_candidates() -> Vec<String> {
    vec!["python".to_string(), "python3".to_string()]
}

fn default_script() -> String {
    "simulation_runner.py".to_string()
}

fn default_start_timeout_ms() -> u64 {
    2000
}

fn default_stop_timeout_ms() -> u64 {
    3000
}

fn default_window_seconds() -> f64 {
    15.0
}

fn default_tolerance() -> f64 {
    25.0
}

fn default_reset_delay_ms() -> u64 {
    500
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            candidates: default_candidates(),
            script: default_script(),
            setpoint: None,
            start_timeout_ms: default_start_timeout_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            read_idle_timeout_ms: None,
        }
    }
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            seconds: default_window_seconds(),
        }
    }
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            reset_delay_ms: default_reset_delay_ms(),
            autostart: false,
        }
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl WorkerSettings {
    /// The script path is the single positional argument; a configured
    /// setpoint is forwarded as `--setpoint <value>`.
    pub fn launch_spec(&self) -> LaunchSpec {
        let mut args = vec![self.script.clone()];
        if let Some(setpoint) = self.setpoint {
            args.push("--setpoint".to_string());
            args.push(setpoint.to_string());
        }
        LaunchSpec::new(self.candidates.clone(), args)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn read_idle_timeout(&self) -> Option<Duration> {
        self.read_idle_timeout_ms.map(Duration::from_millis)
    }
}

/// Loads `config/link.*` if present, then `PRESSURE_LINK_<SECTION>__<KEY>`
/// environment overrides (e.g. `PRESSURE_LINK_WORKER__SCRIPT`).
pub fn load_settings() -> anyhow::Result<Settings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/link").required(false))
        .add_source(
            config::Environment::with_prefix("PRESSURE_LINK")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("worker.candidates"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}
