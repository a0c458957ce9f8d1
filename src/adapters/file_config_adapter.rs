//! INI file configuration adapter with environment overrides.
//!
//! A variable named `TRADEWINDOW_<SECTION>_<KEY>` overrides `[section] key`
//! from the file. Section names never contain `_`; keys may.

use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::collections::HashMap;
use std::path::Path;

pub const ENV_PREFIX: &str = "TRADEWINDOW_";

pub struct FileConfigAdapter {
    config: Ini,
    overrides: HashMap<(String, String), String>,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let mut config = Ini::new();
        config.load(path).map_err(std::io::Error::other)?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    pub fn from_string(content: &str) -> Result<Self, String> {
        let mut config = Ini::new();
        config.read(content.to_string())?;
        Ok(Self {
            config,
            overrides: HashMap::new(),
        })
    }

    /// Apply overrides from `(name, value)` pairs, typically `std::env::vars()`.
    /// Names without the prefix are ignored.
    pub fn with_env_overrides<I>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(rest) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let Some((section, key)) = rest.split_once('_') else {
                continue;
            };
            if section.is_empty() || key.is_empty() {
                continue;
            }
            self.overrides
                .insert((section.to_lowercase(), key.to_lowercase()), value);
        }
        self
    }

    fn parse_bool(value: &str) -> Option<bool> {
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        }
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.overrides
            .get(&(section.to_lowercase(), key.to_lowercase()))
            .cloned()
            .or_else(|| self.config.get(section, key))
    }

    fn get_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_string(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.get_string(section, key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get_string(section, key)
            .as_deref()
            .and_then(Self::parse_bool)
            .unwrap_or(default)
    }
}
