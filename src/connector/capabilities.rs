//! Topology capability matrix.
//!
//! Every operation is classified once by the dispatch layer and checked
//! against the matrix before a connection is leased:
//!
//! | class               | standalone/replicated | sharded         | clustered        |
//! |---------------------|-----------------------|-----------------|------------------|
//! | key listing / scan  | supported             | unsupported     | cluster-wide     |
//! | rename              | supported             | unsupported     | same slot only   |
//! | multi-key atomic    | supported             | same shard only | same slot only   |
//! | scripting           | supported             | unsupported     | supported        |
//! | pipelining          | supported             | supported       | supported        |

use serde::{Deserialize, Serialize};

/// Deployment shape of the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One node.
    #[serde(alias = "single")]
    Standalone,
    /// Primary plus replicas; the primary is found through discovery
    /// endpoints.
    #[serde(alias = "sentinel")]
    Replicated,
    /// Independent nodes; keys are spread client-side.
    Sharded,
    /// Server-side cluster; the store owns slot routing.
    #[serde(alias = "cluster")]
    Clustered,
}

impl std::fmt::Display for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => write!(f, "standalone"),
            Self::Replicated => write!(f, "replicated"),
            Self::Sharded => write!(f, "sharded"),
            Self::Clustered => write!(f, "clustered"),
        }
    }
}

impl std::str::FromStr for Topology {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standalone" | "single" => Ok(Self::Standalone),
            "replicated" | "sentinel" => Ok(Self::Replicated),
            "sharded" => Ok(Self::Sharded),
            "clustered" | "cluster" => Ok(Self::Clustered),
            other => Err(format!("unknown topology '{}'", other)),
        }
    }
}

/// Operation class used by the capability matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandClass {
    /// Touches exactly one key.
    SingleKey,
    /// Touches no key (PING).
    Keyless,
    /// Pattern key listing or iteration (KEYS, SCAN).
    KeyListing,
    /// RENAME / RENAMENX.
    Rename,
    /// One atomic command over several keys (MSET, RPOPLPUSH, BITOP, ...).
    MultiKey,
    /// Server-side script evaluation.
    Scripting,
    /// A batch of commands sent in one round trip.
    Pipeline,
}

impl CommandClass {
    fn describe(&self) -> &'static str {
        match self {
            Self::SingleKey => "single-key operation",
            Self::Keyless => "keyless operation",
            Self::KeyListing => "pattern key listing needs a global keyspace view",
            Self::Rename => "rename may move a key between nodes",
            Self::MultiKey => "multi-key atomic operation",
            Self::Scripting => "server-side scripts may touch keys on any node",
            Self::Pipeline => "pipelining",
        }
    }
}

/// What a topology allows for one operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Supported,
    Unsupported,
    /// Allowed when every key maps to the same shard.
    SameShard,
    /// Allowed when every key hashes to the same cluster slot.
    SameSlot,
    /// Allowed; runs on every node and merges the results.
    ClusterWide,
}

impl Topology {
    /// Look up the capability matrix.
    pub fn capability(&self, class: CommandClass) -> Capability {
        use Capability::*;
        use CommandClass::*;

        match (self, class) {
            (_, SingleKey | Keyless | Pipeline) => Supported,
            (Self::Standalone | Self::Replicated, _) => Supported,
            (Self::Sharded, KeyListing | Rename | Scripting) => Unsupported,
            (Self::Sharded, MultiKey) => SameShard,
            (Self::Clustered, KeyListing) => ClusterWide,
            (Self::Clustered, Rename | MultiKey) => SameSlot,
            (Self::Clustered, Scripting) => Supported,
        }
    }

    /// Check if keys are spread across nodes (multi-key commands may need
    /// to be split).
    pub fn is_partitioned(&self) -> bool {
        matches!(self, Self::Sharded | Self::Clustered)
    }
}

/// An operation as seen by the capability check: its name, class and keys.
#[derive(Debug, Clone)]
pub struct Op<'a> {
    pub name: &'static str,
    pub class: CommandClass,
    pub keys: Vec<&'a str>,
}

impl<'a> Op<'a> {
    pub fn new(name: &'static str, class: CommandClass, keys: Vec<&'a str>) -> Self {
        Self { name, class, keys }
    }

    /// A single-key operation.
    pub fn keyed(name: &'static str, key: &'a str) -> Self {
        Self::new(name, CommandClass::SingleKey, vec![key])
    }

    /// A keyless operation.
    pub fn keyless(name: &'static str) -> Self {
        Self::new(name, CommandClass::Keyless, Vec::new())
    }

    /// The key the operation is routed by.
    pub fn routing_key(&self) -> Option<&'a str> {
        self.keys.first().copied()
    }

    pub(crate) fn reason(&self) -> &'static str {
        self.class.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_rows() {
        for topology in [Topology::Standalone, Topology::Replicated] {
            for class in [
                CommandClass::KeyListing,
                CommandClass::Rename,
                CommandClass::MultiKey,
                CommandClass::Scripting,
                CommandClass::Pipeline,
            ] {
                assert_eq!(topology.capability(class), Capability::Supported);
            }
        }

        let sharded = Topology::Sharded;
        assert_eq!(sharded.capability(CommandClass::KeyListing), Capability::Unsupported);
        assert_eq!(sharded.capability(CommandClass::Rename), Capability::Unsupported);
        assert_eq!(sharded.capability(CommandClass::MultiKey), Capability::SameShard);
        assert_eq!(sharded.capability(CommandClass::Scripting), Capability::Unsupported);
        assert_eq!(sharded.capability(CommandClass::Pipeline), Capability::Supported);

        let clustered = Topology::Clustered;
        assert_eq!(clustered.capability(CommandClass::KeyListing), Capability::ClusterWide);
        assert_eq!(clustered.capability(CommandClass::Rename), Capability::SameSlot);
        assert_eq!(clustered.capability(CommandClass::MultiKey), Capability::SameSlot);
        assert_eq!(clustered.capability(CommandClass::Scripting), Capability::Supported);
        assert_eq!(clustered.capability(CommandClass::Pipeline), Capability::Supported);
    }

    #[test]
    fn test_topology_parse_and_display() {
        assert_eq!("single".parse::<Topology>().unwrap(), Topology::Standalone);
        assert_eq!("Sentinel".parse::<Topology>().unwrap(), Topology::Replicated);
        assert_eq!("cluster".parse::<Topology>().unwrap(), Topology::Clustered);
        assert!("ring".parse::<Topology>().is_err());
        assert_eq!(Topology::Sharded.to_string(), "sharded");
    }
}
