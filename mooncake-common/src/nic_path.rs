//! Canonical `"server@nic"` connection key, used as the endpoint cache key,
//! the shard key and the wire identifier for a remote NIC.

use serde::{Deserialize, Serialize};
use std::fmt;

const NIC_PATH_DELIM: char = '@';

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NicPath(String);

impl NicPath {
    pub fn new(server_name: &str, nic_name: &str) -> Self {
        NicPath(format!("{server_name}{NIC_PATH_DELIM}{nic_name}"))
    }

    /// Parses a `"server@nic"` string. Returns `None` if the delimiter is missing.
    pub fn parse(path: &str) -> Option<Self> {
        path.find(NIC_PATH_DELIM).map(|_| NicPath(path.to_string()))
    }

    pub fn server_name(&self) -> &str {
        self.0.split_once(NIC_PATH_DELIM).map(|(s, _)| s).unwrap_or("")
    }

    pub fn nic_name(&self) -> &str {
        self.0.split_once(NIC_PATH_DELIM).map(|(_, n)| n).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NicPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_server_and_nic() {
        let path = NicPath::new("node-a", "mlx5_0");
        assert_eq!(path.as_str(), "node-a@mlx5_0");
        assert_eq!(path.server_name(), "node-a");
        assert_eq!(path.nic_name(), "mlx5_0");
    }

    #[test]
    fn parse_rejects_missing_delimiter() {
        assert!(NicPath::parse("no-delimiter-here").is_none());
        assert!(NicPath::parse("node-a@mlx5_0").is_some());
    }
}
