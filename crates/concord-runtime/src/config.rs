//! Node configuration
//!
//! Loaded from a JSON file; every field has a default except `listen`,
//! `neighbors` and, for the Byzantine fault model, `identity_seed`.
//! Durations are humantime strings such as `"30s"` or `"250ms"`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use concord_broadcast::{EchoQuorum, QuorumConfig};
use concord_core::{ConcordError, ConcordResult, PeerId};
use concord_crypto::{Identity, PublicIdentity};

/// Which broadcast variant the node runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultModel {
    #[default]
    Crash,
    Byzantine,
}

impl FromStr for FaultModel {
    type Err = ConcordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crash" => Ok(FaultModel::Crash),
            "byzantine" => Ok(FaultModel::Byzantine),
            other => Err(ConcordError::Config(format!("unknown fault model {:?}", other))),
        }
    }
}

/// Echo quorum rule, as written in the config file
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuorumMode {
    #[default]
    Standard,
    Strict,
}

impl From<QuorumMode> for EchoQuorum {
    fn from(mode: QuorumMode) -> Self {
        match mode {
            QuorumMode::Standard => EchoQuorum::Standard,
            QuorumMode::Strict => EchoQuorum::Strict,
        }
    }
}

/// Settings of the automated driver
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Wait before the first operation
    #[serde(with = "duration")]
    pub prepare_time: Duration,
    #[serde(with = "duration")]
    pub broadcast_interval: Duration,
    /// Adds per round; each round then issues half as many removes
    pub n_adds: usize,
    /// Random letters appended to each generated element
    pub payload_size: usize,
    #[serde(with = "duration")]
    pub run_time: Duration,
    /// Wait between the final read and the summary
    #[serde(with = "duration")]
    pub cooldown_time: Duration,
    pub log_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            prepare_time: Duration::from_secs(5),
            broadcast_interval: Duration::from_secs(1),
            n_adds: 10,
            payload_size: 10,
            run_time: Duration::from_secs(60),
            cooldown_time: Duration::from_secs(10),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// Raw node configuration
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NodeConfig {
    /// `host:port` this node listens on and is known by
    pub listen: Option<String>,
    /// `host:port` of every neighbor
    pub neighbors: Option<Vec<String>>,
    pub fault_model: FaultModel,
    /// Byzantine processes tolerated
    pub f: usize,
    pub echo_quorum: QuorumMode,
    /// Hex Ed25519 seed (32 bytes)
    pub identity_seed: Option<String>,
    /// Peer -> hex public key the handshake must present
    pub trusted_keys: HashMap<String, String>,
    #[serde(with = "duration")]
    pub stall_timeout: Duration,
    pub app: AppConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            listen: None,
            neighbors: None,
            fault_model: FaultModel::Crash,
            f: 1,
            echo_quorum: QuorumMode::Standard,
            identity_seed: None,
            trusted_keys: HashMap::new(),
            stall_timeout: Duration::from_secs(30),
            app: AppConfig::default(),
        }
    }
}

fn config_error(msg: impl Into<String>) -> ConcordError {
    ConcordError::Config(msg.into())
}

fn parse_peer(field: &str, value: &str) -> ConcordResult<PeerId> {
    value
        .parse()
        .map_err(|e| config_error(format!("{}: {}", field, e)))
}

impl NodeConfig {
    pub fn from_json(json: &str) -> ConcordResult<Self> {
        serde_json::from_str(json).map_err(|e| config_error(format!("invalid config: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> ConcordResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| config_error(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json(&json)
    }

    /// Check mandatory parameters and turn strings into typed settings
    pub fn resolve(&self) -> ConcordResult<NodeSettings> {
        let listen = self
            .listen
            .as_deref()
            .ok_or_else(|| config_error("missing mandatory parameter `listen`"))?;
        let local = parse_peer("listen", listen)?;

        let raw_neighbors = self
            .neighbors
            .as_ref()
            .ok_or_else(|| config_error("missing mandatory parameter `neighbors`"))?;
        let mut neighbors = Vec::with_capacity(raw_neighbors.len());
        for raw in raw_neighbors {
            let peer = parse_peer("neighbors", raw)?;
            if peer == local {
                return Err(config_error(format!("{} lists itself as a neighbor", local)));
            }
            if neighbors.contains(&peer) {
                return Err(config_error(format!("neighbor {} listed twice", peer)));
            }
            neighbors.push(peer);
        }

        let identity = match (&self.identity_seed, self.fault_model) {
            (Some(seed), _) => Identity::from_hex(seed)
                .map_err(|e| config_error(format!("identity_seed: {}", e)))?,
            (None, FaultModel::Byzantine) => {
                return Err(config_error(
                    "missing mandatory parameter `identity_seed` for the byzantine fault model",
                ))
            }
            (None, FaultModel::Crash) => Identity::generate(),
        };

        let mut trusted_keys = HashMap::with_capacity(self.trusted_keys.len());
        for (peer, key) in &self.trusted_keys {
            let peer = parse_peer("trusted_keys", peer)?;
            let key = PublicIdentity::from_hex(key)
                .map_err(|e| config_error(format!("trusted key for {}: {}", peer, e)))?;
            trusted_keys.insert(peer, key);
        }

        if self.stall_timeout.is_zero() {
            return Err(config_error("stall_timeout must be positive"));
        }
        if self.app.broadcast_interval.is_zero() {
            return Err(config_error("app.broadcast_interval must be positive"));
        }

        let quorum = QuorumConfig {
            f: self.f,
            echo: self.echo_quorum.into(),
        };

        if self.fault_model == FaultModel::Byzantine && !quorum.tolerates(neighbors.len() + 1) {
            warn!(
                processes = neighbors.len() + 1,
                f = self.f,
                "fewer than 3f+1 processes; Byzantine guarantees do not hold"
            );
        }

        Ok(NodeSettings {
            local,
            neighbors,
            fault_model: self.fault_model,
            quorum,
            identity,
            trusted_keys,
            stall_timeout: self.stall_timeout,
            app: self.app.clone(),
        })
    }
}

/// Validated, typed configuration
#[derive(Clone, Debug)]
pub struct NodeSettings {
    pub local: PeerId,
    pub neighbors: Vec<PeerId>,
    pub fault_model: FaultModel,
    pub quorum: QuorumConfig,
    pub identity: Identity,
    pub trusted_keys: HashMap<PeerId, PublicIdentity>,
    pub stall_timeout: Duration,
    pub app: AppConfig,
}

mod duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "0101010101010101010101010101010101010101010101010101010101010101";

    #[test]
    fn test_minimal_crash_config() {
        let config = NodeConfig::from_json(
            r#"{ "listen": "127.0.0.1:6000", "neighbors": ["127.0.0.1:6001", "127.0.0.1:6002"] }"#,
        )
        .unwrap();
        let settings = config.resolve().unwrap();

        assert_eq!(settings.local, PeerId::localhost(6000));
        assert_eq!(settings.neighbors.len(), 2);
        assert_eq!(settings.fault_model, FaultModel::Crash);
        assert_eq!(settings.stall_timeout, Duration::from_secs(30));
        assert_eq!(settings.app, AppConfig::default());
    }

    #[test]
    fn test_missing_listen_is_fatal() {
        let config = NodeConfig::from_json(r#"{ "neighbors": [] }"#).unwrap();
        let err = config.resolve().unwrap_err();
        assert!(matches!(err, ConcordError::Config(msg) if msg.contains("listen")));
    }

    #[test]
    fn test_missing_neighbors_is_fatal() {
        let config = NodeConfig::from_json(r#"{ "listen": "127.0.0.1:6000" }"#).unwrap();
        assert!(matches!(config.resolve(), Err(ConcordError::Config(_))));
    }

    #[test]
    fn test_byzantine_requires_seed() {
        let json = r#"{
            "listen": "127.0.0.1:6000",
            "neighbors": ["127.0.0.1:6001"],
            "fault_model": "byzantine"
        }"#;
        let config = NodeConfig::from_json(json).unwrap();
        assert!(matches!(config.resolve(), Err(ConcordError::Config(msg)) if msg.contains("identity_seed")));
    }

    #[test]
    fn test_full_byzantine_config() {
        let pinned = Identity::from_seed(&[2u8; 32]).public();
        let json = format!(
            r#"{{
                "listen": "127.0.0.1:6000",
                "neighbors": ["127.0.0.1:6001", "127.0.0.1:6002", "127.0.0.1:6003"],
                "fault_model": "byzantine",
                "f": 1,
                "echo_quorum": "strict",
                "identity_seed": "{}",
                "trusted_keys": {{ "127.0.0.1:6001": "{}" }},
                "stall_timeout": "2s 500ms",
                "app": {{ "n_adds": 4, "broadcast_interval": "200ms", "log_dir": "/tmp/concord" }}
            }}"#,
            SEED,
            pinned.to_hex()
        );
        let settings = NodeConfig::from_json(&json).unwrap().resolve().unwrap();

        assert_eq!(settings.quorum.echo, EchoQuorum::Strict);
        assert_eq!(settings.identity.public(), Identity::from_seed(&[1u8; 32]).public());
        assert_eq!(settings.trusted_keys.get(&PeerId::localhost(6001)), Some(&pinned));
        assert_eq!(settings.stall_timeout, Duration::from_millis(2500));
        assert_eq!(settings.app.n_adds, 4);
        assert_eq!(settings.app.broadcast_interval, Duration::from_millis(200));
        assert_eq!(settings.app.prepare_time, AppConfig::default().prepare_time);
    }

    #[test]
    fn test_self_in_neighbors_rejected() {
        let config = NodeConfig::from_json(
            r#"{ "listen": "127.0.0.1:6000", "neighbors": ["127.0.0.1:6000"] }"#,
        )
        .unwrap();
        assert!(config.resolve().is_err());
    }

    #[test]
    fn test_bad_duration_rejected() {
        let json = r#"{ "listen": "127.0.0.1:6000", "neighbors": [], "stall_timeout": "soon" }"#;
        assert!(NodeConfig::from_json(json).is_err());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let stall = r#"{ "listen": "127.0.0.1:6000", "neighbors": [], "stall_timeout": "0s" }"#;
        let err = NodeConfig::from_json(stall).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConcordError::Config(msg) if msg.contains("stall_timeout")));

        let interval = r#"{
            "listen": "127.0.0.1:6000",
            "neighbors": [],
            "app": { "broadcast_interval": "0s" }
        }"#;
        let err = NodeConfig::from_json(interval).unwrap().resolve().unwrap_err();
        assert!(matches!(err, ConcordError::Config(msg) if msg.contains("broadcast_interval")));
    }

    #[test]
    fn test_fault_model_from_str() {
        assert_eq!("byzantine".parse::<FaultModel>().unwrap(), FaultModel::Byzantine);
        assert!("omission".parse::<FaultModel>().is_err());
    }
}
