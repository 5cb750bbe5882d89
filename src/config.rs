use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use thiserror::Error;

use crate::llm::generator::DEFAULT_MAX_LENGTH;

pub const DEFAULT_MODEL_NAME: &str = "meta-llama/Llama-2-7b-hf";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} has an invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Cpu,
    Cuda,
}

impl FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" | "gpu" => Ok(DevicePreference::Cuda),
            other => Err(format!("expected auto, cpu or cuda, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub model: ModelSettings,
    pub scheduler: SchedulerSettings,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// Hub repo id or a local checkpoint directory.
    pub name: String,
    pub revision: String,
    pub hf_token: Option<String>,
    pub device: DevicePreference,
    pub max_length: usize,
    pub max_length_limit: usize,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub run_at: NaiveTime,
    pub poll_interval: Duration,
    pub tasks_file: Option<PathBuf>,
}

impl ServerSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Settings {
    /// Reads the process environment, after loading `.env` if one exists.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_length = parse_or(&get, "MAX_LENGTH", DEFAULT_MAX_LENGTH)?;
        let max_length_limit = parse_or(&get, "MAX_LENGTH_LIMIT", 1024usize)?;
        if max_length == 0 {
            return Err(invalid("MAX_LENGTH", "0", "must be at least 1"));
        }

        let poll_secs = parse_or(&get, "SCHEDULER_POLL_SECS", 1u64)?;
        if poll_secs == 0 {
            return Err(invalid("SCHEDULER_POLL_SECS", "0", "must be at least 1"));
        }

        let run_at = match get("RECOMMENDATIONS_AT") {
            Some(raw) => parse_time_of_day(&raw)
                .map_err(|reason| invalid("RECOMMENDATIONS_AT", &raw, &reason))?,
            None => NaiveTime::from_hms_opt(8, 0, 0).unwrap_or_default(),
        };

        Ok(Settings {
            server: ServerSettings {
                host: get("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
                port: parse_or(&get, "PORT", 5000u16)?,
            },
            model: ModelSettings {
                name: get("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
                revision: get("MODEL_REVISION").unwrap_or_else(|| "main".to_string()),
                hf_token: get("HF_TOKEN").or_else(|| get("HUGGING_FACE_HUB_TOKEN")),
                device: parse_or(&get, "DEVICE", DevicePreference::Auto)?,
                max_length,
                max_length_limit: max_length_limit.max(max_length),
            },
            scheduler: SchedulerSettings {
                enabled: parse_bool_or(&get, "SCHEDULER_ENABLED", true)?,
                run_at,
                poll_interval: Duration::from_secs(poll_secs),
                tasks_file: get("TASKS_FILE").map(PathBuf::from),
            },
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, String> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| "expected HH:MM or HH:MM:SS".to_string())
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
        None => Ok(default),
    }
}

fn parse_bool_or<G>(get: &G, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(key, &raw, "expected a boolean")),
        },
        None => Ok(default),
    }
}
