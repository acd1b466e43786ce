//! Key/value configuration file, recognising exactly the keys documented
//! in the external-interfaces section: `port`, `root_username`,
//! `root_password`, `data_directory`, `encryption_enabled`,
//! `encryption_key`, `autosave_interval`.
//!
//! A malformed `port`/`autosave_interval` value is ignored rather than
//! failing the whole file — the original tool behaves the same way, and
//! there is no reason a single typo should keep the server from starting
//! with sane defaults for everything else.

use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub root_username: String,
    pub root_password: String,
    pub data_directory: String,
    pub encryption_enabled: bool,
    pub encryption_key: String,
    pub autosave_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 2501,
            root_username: "root".to_string(),
            root_password: String::new(),
            data_directory: "./data".to_string(),
            encryption_enabled: false,
            encryption_key: String::new(),
            autosave_interval: 300,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut cfg = Config::default();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let mut value = value.trim();
            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }
            match key {
                "port" => {
                    if let Ok(p) = value.parse() {
                        cfg.port = p;
                    }
                }
                "root_username" => cfg.root_username = value.to_string(),
                "root_password" => cfg.root_password = value.to_string(),
                "data_directory" => cfg.data_directory = value.to_string(),
                "encryption_enabled" => {
                    cfg.encryption_enabled = matches!(value, "true" | "1" | "yes")
                }
                "encryption_key" => cfg.encryption_key = value.to_string(),
                "autosave_interval" => {
                    if let Ok(v) = value.parse() {
                        cfg.autosave_interval = v;
                    }
                }
                _ => {}
            }
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_recognised_keys() {
        let cfg = Config::parse(
            "# comment\n\
             port = 2600\n\
             root_username = \"admin\"\n\
             encryption_enabled = true\n\
             autosave_interval = 60\n",
        );
        assert_eq!(cfg.port, 2600);
        assert_eq!(cfg.root_username, "admin");
        assert!(cfg.encryption_enabled);
        assert_eq!(cfg.autosave_interval, 60);
    }

    #[test]
    fn bad_port_falls_back_to_default() {
        let cfg = Config::parse("port = not-a-number\n");
        assert_eq!(cfg.port, Config::default().port);
    }
}
