use crate::*;
use std::env::var;
use std::str::FromStr;

/// Deepest supported confirmed-vote stream (2^63 leaves).
pub const MAX_STREAM_DEPTH: u8 = 63;

/// Incremental stream settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// A checkpoint is taken every `checkpoint_interval` leaves.
    pub checkpoint_interval: usize,

    /// Number of checkpoints retained; the oldest is evicted first.
    pub checkpoint_history: usize,

    /// The stream refuses appends beyond `2^max_depth` leaves.
    pub max_depth: u8,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            checkpoint_interval: 100,
            checkpoint_history: 32,
            max_depth: 32,
        }
    }
}

impl StreamConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.checkpoint_interval == 0 {
            return Err(Error::Config("checkpoint_interval must be at least 1".into()));
        }
        if self.checkpoint_history == 0 {
            return Err(Error::Config("checkpoint_history must be at least 1".into()));
        }
        if self.max_depth > MAX_STREAM_DEPTH {
            return Err(Error::Config(format!(
                "max_depth must be at most {}",
                MAX_STREAM_DEPTH
            )));
        }
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.max_depth.min(MAX_STREAM_DEPTH)
    }
}

/// Per-election settings.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ElectionConfig {
    /// Minimum number of authorities needed to reconstruct the decryption key.
    pub threshold: u32,

    /// Total number of authorities holding a share.
    pub num_authorities: u32,

    /// Confirmed-vote stream settings.
    pub votes: StreamConfig,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        ElectionConfig {
            threshold: 1,
            num_authorities: 1,
            votes: StreamConfig::default(),
        }
    }
}

impl ElectionConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.threshold == 0 || self.threshold > self.num_authorities {
            return Err(Error::InvalidThreshold {
                threshold: self.threshold,
                total: self.num_authorities,
            });
        }
        self.votes.validate()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub election: ElectionConfig,

    /// Depth of slot-addressed registries.
    pub sparse_depth: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            election: ElectionConfig::default(),
            sparse_depth: 32,
        }
    }
}

impl Config {
    /// Read overrides from `ANONVOTE_*` environment variables; unset variables keep defaults.
    pub fn from_env() -> Result<Self, Error> {
        Config::from_lookup(|key| var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(val) = parse_var(&lookup, "ANONVOTE_THRESHOLD")? {
            config.election.threshold = val;
        }
        if let Some(val) = parse_var(&lookup, "ANONVOTE_AUTHORITIES")? {
            config.election.num_authorities = val;
        }
        if let Some(val) = parse_var(&lookup, "ANONVOTE_CHECKPOINT_INTERVAL")? {
            config.election.votes.checkpoint_interval = val;
        }
        if let Some(val) = parse_var(&lookup, "ANONVOTE_CHECKPOINT_HISTORY")? {
            config.election.votes.checkpoint_history = val;
        }
        if let Some(val) = parse_var(&lookup, "ANONVOTE_STREAM_DEPTH")? {
            config.election.votes.max_depth = val;
        }
        if let Some(val) = parse_var(&lookup, "ANONVOTE_SPARSE_DEPTH")? {
            config.sparse_depth = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Empty slot-addressed registry of the configured depth.
    pub fn sparse_registry(&self) -> Result<SparseMerkleTree, Error> {
        SparseMerkleTree::new(self.sparse_depth)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.sparse_depth == 0 || self.sparse_depth > MAX_TREE_DEPTH {
            return Err(Error::Config(format!(
                "sparse_depth must be between 1 and {}",
                MAX_TREE_DEPTH
            )));
        }
        self.election.validate()
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} is not a valid number: {:?}", key, val))),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.election.votes.checkpoint_interval, 100);
        assert_eq!(config.election.votes.capacity(), 1 << 32);
    }

    #[test]
    fn test_env_overrides() {
        let mut env = HashMap::new();
        env.insert("ANONVOTE_THRESHOLD", "3");
        env.insert("ANONVOTE_AUTHORITIES", "5");
        env.insert("ANONVOTE_CHECKPOINT_INTERVAL", " 50 ");
        env.insert("ANONVOTE_SPARSE_DEPTH", "40");

        let config = Config::from_lookup(|key| env.get(key).map(|v| v.to_string())).unwrap();
        assert_eq!(config.election.threshold, 3);
        assert_eq!(config.election.num_authorities, 5);
        assert_eq!(config.election.votes.checkpoint_interval, 50);
        assert_eq!(config.sparse_depth, 40);
        assert_eq!(config.sparse_registry().unwrap().depth(), 40);
    }

    #[test]
    fn test_invalid_values() {
        let bad_number = Config::from_lookup(|key| match key {
            "ANONVOTE_THRESHOLD" => Some("three".to_string()),
            _ => None,
        });
        assert!(matches!(bad_number, Err(Error::Config(_))));

        let bad_threshold = Config::from_lookup(|key| match key {
            "ANONVOTE_THRESHOLD" => Some("4".to_string()),
            "ANONVOTE_AUTHORITIES" => Some("3".to_string()),
            _ => None,
        });
        assert!(matches!(bad_threshold, Err(Error::InvalidThreshold { .. })));

        let bad_depth = Config::from_lookup(|key| match key {
            "ANONVOTE_STREAM_DEPTH" => Some("64".to_string()),
            _ => None,
        });
        assert!(bad_depth.is_err());
    }

    #[test]
    fn test_from_json() {
        let config = Config::from_json(
            r#"{"election": {"threshold": 2, "num_authorities": 3, "votes": {"checkpoint_interval": 10}}}"#,
        )
        .unwrap();
        assert_eq!(config.election.threshold, 2);
        assert_eq!(config.election.votes.checkpoint_interval, 10);
        // Unspecified fields fall back to defaults
        assert_eq!(config.election.votes.checkpoint_history, 32);
        assert_eq!(config.sparse_depth, 32);

        assert!(Config::from_json(r#"{"election": {"votes": {"checkpoint_interval": 0}}}"#).is_err());
    }
}
