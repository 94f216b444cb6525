//! Bridge configuration: IDE profile, discovery knobs, timeouts.
//!
//! Environment variables win; an optional `<IDEBRIDGE_HOME>/config.toml`
//! fills in anything the environment left unset. Everything is read once at
//! startup.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use env_flags::env_flags;
use serde::Deserialize;

/// Supported IDE profiles, each with its own plugin port window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdeKind {
    Jetbrains,
    Vscode,
}

impl IdeKind {
    /// Parse a profile selector, case-insensitive. Anything unrecognized
    /// (including empty) falls back to JetBrains.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "vscode" => Self::Vscode,
            "jetbrains" => Self::Jetbrains,
            other => {
                if !other.is_empty() {
                    tracing::warn!("invalid IDE type '{other}', defaulting to jetbrains");
                }
                Self::Jetbrains
            }
        }
    }

    /// Port window the IDE plugin binds within.
    pub fn port_range(self) -> PortRange {
        match self {
            Self::Jetbrains => PortRange {
                start: 63342,
                end: 63352,
            },
            Self::Vscode => PortRange {
                start: 9960,
                end: 9990,
            },
        }
    }
}

impl fmt::Display for IdeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Jetbrains => write!(f, "JETBRAINS"),
            Self::Vscode => write!(f, "VSCODE"),
        }
    }
}

/// Contiguous port window scanned during discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

/// Resolved bridge configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub ide: IdeKind,
    pub host: String,
    /// Explicit plugin port; when it responds, the range scan is skipped.
    pub override_port: Option<u16>,
    pub port_range: PortRange,
    pub max_retries: u32,
    pub probe_timeout: Duration,
    pub list_timeout: Duration,
    pub call_timeout: Duration,
    pub poll_connected: Duration,
    pub poll_disconnected: Duration,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserConfig {
    pub logging: Option<LoggingCfg>,
    pub ide: Option<IdeCfg>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingCfg {
    pub to_file: Option<bool>,
    pub dir: Option<String>,
    pub json: Option<bool>,
    pub level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IdeCfg {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_retries: Option<u32>,
    pub poll_connected_secs: Option<u64>,
    pub poll_disconnected_secs: Option<u64>,
}

/// Home directory for user config and logs: `IDEBRIDGE_HOME`, else
/// `$HOME/.idebridge`, else `.idebridge` under the current directory.
pub fn bridge_home() -> PathBuf {
    if let Ok(home) = std::env::var("IDEBRIDGE_HOME")
        && !home.is_empty()
    {
        return PathBuf::from(home);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".idebridge");
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(".idebridge")
}

pub fn load_user_config(home: &Path) -> anyhow::Result<Option<UserConfig>> {
    let path = home.join("config.toml");
    if !path.exists() {
        return Ok(None);
    }
    let s = std::fs::read_to_string(&path)?;
    let cfg: UserConfig = toml::from_str(&s)?;
    Ok(Some(cfg))
}

pub fn expand_home(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/")
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(home).join(stripped);
    }
    PathBuf::from(path)
}

/// Resolve the bridge configuration from the environment, then the user
/// config for anything the environment did not set.
pub fn resolve_bridge_config(user: Option<&UserConfig>) -> BridgeConfig {
    env_flags! {
        /// IDE profile: "jetbrains" (default) or "vscode", case-insensitive.
        IDE_TYPE: &str = "";
        /// Host the IDE plugin listens on.
        IDE_HOST: &str = "";
        /// Explicit IDE plugin port; skips the range scan when it responds.
        IDE_PORT: &str = "";
        /// Discovery attempts before reporting the retry budget as spent.
        MAX_RETRIES: u32 = 30;
        /// Liveness probe timeout in milliseconds.
        PROBE_TIMEOUT_MS: u64 = 3_000;
        /// tools/list forward timeout in milliseconds.
        LIST_TIMEOUT_MS: u64 = 10_000;
        /// tools/call forward timeout in milliseconds.
        CALL_TIMEOUT_MS: u64 = 30_000;
        /// Endpoint refresh interval while connected, in seconds.
        POLL_CONNECTED_SECS: u64 = 30;
        /// Endpoint refresh interval while disconnected, in seconds.
        POLL_DISCONNECTED_SECS: u64 = 5;
    }

    let env_set = |k: &str| std::env::var_os(k).is_some();
    let ide_cfg = user.and_then(|c| c.ide.as_ref());

    let kind_value = if env_set("IDE_TYPE") {
        (*IDE_TYPE).to_string()
    } else {
        ide_cfg.and_then(|c| c.kind.clone()).unwrap_or_default()
    };
    let ide = IdeKind::parse(&kind_value);

    let host = if env_set("IDE_HOST") && !(*IDE_HOST).is_empty() {
        (*IDE_HOST).to_string()
    } else {
        ide_cfg
            .and_then(|c| c.host.clone())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    };

    let override_port = if env_set("IDE_PORT") {
        match (*IDE_PORT).parse::<u16>() {
            Ok(port) => Some(port),
            Err(_) => {
                tracing::warn!("ignoring unparsable IDE_PORT '{}'", *IDE_PORT);
                None
            }
        }
    } else {
        ide_cfg.and_then(|c| c.port)
    };

    let max_retries = if env_set("MAX_RETRIES") {
        *MAX_RETRIES
    } else {
        ide_cfg.and_then(|c| c.max_retries).unwrap_or(*MAX_RETRIES)
    };

    let poll_connected = if env_set("POLL_CONNECTED_SECS") {
        *POLL_CONNECTED_SECS
    } else {
        ide_cfg
            .and_then(|c| c.poll_connected_secs)
            .unwrap_or(*POLL_CONNECTED_SECS)
    };
    let poll_disconnected = if env_set("POLL_DISCONNECTED_SECS") {
        *POLL_DISCONNECTED_SECS
    } else {
        ide_cfg
            .and_then(|c| c.poll_disconnected_secs)
            .unwrap_or(*POLL_DISCONNECTED_SECS)
    };

    BridgeConfig {
        ide,
        host,
        override_port,
        port_range: ide.port_range(),
        max_retries,
        probe_timeout: Duration::from_millis(*PROBE_TIMEOUT_MS),
        list_timeout: Duration::from_millis(*LIST_TIMEOUT_MS),
        call_timeout: Duration::from_millis(*CALL_TIMEOUT_MS),
        poll_connected: Duration::from_secs(poll_connected),
        poll_disconnected: Duration::from_secs(poll_disconnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ide_kind_parses_case_insensitively() {
        assert_eq!(IdeKind::parse("vscode"), IdeKind::Vscode);
        assert_eq!(IdeKind::parse("VSCode"), IdeKind::Vscode);
        assert_eq!(IdeKind::parse("  JETBRAINS "), IdeKind::Jetbrains);
    }

    #[test]
    fn invalid_or_missing_ide_kind_defaults_to_jetbrains() {
        assert_eq!(IdeKind::parse(""), IdeKind::Jetbrains);
        assert_eq!(IdeKind::parse("emacs"), IdeKind::Jetbrains);
    }

    #[test]
    fn profiles_carry_their_port_windows() {
        assert_eq!(
            IdeKind::Jetbrains.port_range(),
            PortRange {
                start: 63342,
                end: 63352
            }
        );
        assert_eq!(
            IdeKind::Vscode.port_range(),
            PortRange {
                start: 9960,
                end: 9990
            }
        );
    }

    #[test]
    fn user_config_parses_ide_section() {
        let cfg: UserConfig = toml::from_str(
            r#"
            [ide]
            type = "vscode"
            host = "127.0.0.1"
            port = 9977
            max_retries = 5

            [logging]
            level = "debug"
            to_file = false
            "#,
        )
        .unwrap();
        let ide = cfg.ide.unwrap();
        assert_eq!(ide.kind.as_deref(), Some("vscode"));
        assert_eq!(ide.port, Some(9977));
        assert_eq!(ide.max_retries, Some(5));
        let logging = cfg.logging.unwrap();
        assert_eq!(logging.level.as_deref(), Some("debug"));
        assert_eq!(logging.to_file, Some(false));
    }

    #[test]
    fn expand_home_rewrites_tilde_paths() {
        if let Ok(home) = std::env::var("HOME") {
            assert_eq!(expand_home("~/logs"), PathBuf::from(home).join("logs"));
        }
        assert_eq!(expand_home("/var/log"), PathBuf::from("/var/log"));
    }
}
