//! INI configuration loading.
//!
//! Parses the `[local_reception]` section and its referenced per-host
//! sections into a [`StationConfig`] the rest of the server consumes. This
//! loader is a thin, separately testable module; none of the core logic
//! knows the configuration file's textual format.

use std::path::PathBuf;

use ini::Ini;
use thiserror::Error;

/// Errors raised while loading or resolving the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or did not parse as INI.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// The INI syntax itself was invalid.
    #[error("invalid INI syntax: {0}")]
    Parse(String),

    /// A required section was absent.
    #[error("missing section [{0}]")]
    MissingSection(String),

    /// A required key was absent from a present section.
    #[error("missing key '{key}' in section [{section}]")]
    MissingKey {
        /// Section the key was expected in.
        section: String,
        /// The missing key.
        key: String,
    },

    /// A `pubport`/`reqport` value did not parse as a `u16`.
    #[error("invalid port value '{0}' in section [{1}]")]
    InvalidPort(String, String),
}

/// `hostname`, `pubport`, `reqport` for one referenced host (this station's
/// own binding addresses, or a mirror peer's).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Hostname or IP the component binds to or connects to.
    pub hostname: String,
    /// Publisher (pub/sub) port.
    pub pubport: u16,
    /// Request/reply port.
    pub reqport: u16,
}

impl HostConfig {
    /// `host:port` for the publisher, used as the Holder's `origin` stamp.
    #[must_use]
    pub fn pub_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.pubport)
    }

    /// `host:port` for the request/reply socket.
    #[must_use]
    pub fn req_addr(&self) -> String {
        format!("{}:{}", self.hostname, self.reqport)
    }
}

/// A fully resolved station configuration: everything the Supervisor needs
/// to wire up the core subsystems, with the optional `mirror` key already
/// resolved to `None` when the station config named no mirror peer, or to
/// a peer's [`HostConfig`] when it did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationConfig {
    /// This station's name, used in the message subject and `pong` replies.
    pub station: String,
    /// This station's own publisher/request-reply binding.
    pub local: HostConfig,
    /// Directory the File Tailer watches.
    pub data_dir: PathBuf,
    /// Glob pattern files must match to be tailed.
    pub file_pattern: String,
    /// Mirror peer, if the `[local_reception]` section named one.
    pub mirror: Option<HostConfig>,
}

impl StationConfig {
    /// Load and resolve `path` into a [`StationConfig`].
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(io) => ConfigError::Io(io),
            ini::Error::Parse(parse) => ConfigError::Parse(parse.to_string()),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigError> {
        const SECTION: &str = "local_reception";
        let local_reception =
            ini.section(Some(SECTION)).ok_or_else(|| ConfigError::MissingSection(SECTION.to_string()))?;

        let get = |key: &str| -> Result<String, ConfigError> {
            local_reception
                .get(key)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingKey { section: SECTION.to_string(), key: key.to_string() })
        };

        let station = get("station")?;
        let localhost_section = get("localhost")?;
        let data_dir = PathBuf::from(get("data_dir")?);
        let file_pattern = get("file_pattern")?;
        let mirror_section = local_reception.get("mirror").map(str::to_string);

        let local = Self::resolve_host(ini, &localhost_section)?;
        let mirror = mirror_section.as_deref().map(|name| Self::resolve_host(ini, name)).transpose()?;

        Ok(Self { station, local, data_dir, file_pattern, mirror })
    }

    fn resolve_host(ini: &Ini, section_name: &str) -> Result<HostConfig, ConfigError> {
        let section =
            ini.section(Some(section_name)).ok_or_else(|| ConfigError::MissingSection(section_name.to_string()))?;

        let get = |key: &str| -> Result<String, ConfigError> {
            section
                .get(key)
                .map(str::to_string)
                .ok_or_else(|| ConfigError::MissingKey { section: section_name.to_string(), key: key.to_string() })
        };

        let hostname = get("hostname")?;
        let pubport_raw = get("pubport")?;
        let reqport_raw = get("reqport")?;

        let pubport = pubport_raw
            .parse()
            .map_err(|_| ConfigError::InvalidPort(pubport_raw, section_name.to_string()))?;
        let reqport = reqport_raw
            .parse()
            .map_err(|_| ConfigError::InvalidPort(reqport_raw, section_name.to_string()))?;

        Ok(HostConfig { hostname, pubport, reqport })
    }
}
