use std::fmt;

use serde::{Deserialize, Serialize};

/// Shard identity as the `[shard_id, num_shards]` pair used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "[u32; 2]", try_from = "[u32; 2]")]
pub struct ShardInfo {
    id: u32,
    total: u32,
}

impl ShardInfo {
    /// Returns `None` unless `id < total`.
    #[must_use]
    pub const fn new(id: u32, total: u32) -> Option<Self> {
        if id < total {
            Some(Self { id, total })
        } else {
            None
        }
    }

    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    #[must_use]
    pub const fn total(&self) -> u32 {
        self.total
    }

    /// Shard that receives events for `guild_id`.
    #[must_use]
    pub const fn for_guild(guild_id: u64, total: u32) -> u32 {
        if total == 0 {
            return 0;
        }
        ((guild_id >> 22) % total as u64) as u32
    }
}

impl Default for ShardInfo {
    fn default() -> Self {
        Self { id: 0, total: 1 }
    }
}

impl fmt::Display for ShardInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.id, self.total)
    }
}

impl From<ShardInfo> for [u32; 2] {
    fn from(shard: ShardInfo) -> Self {
        [shard.id, shard.total]
    }
}

impl TryFrom<[u32; 2]> for ShardInfo {
    type Error = String;

    fn try_from([id, total]: [u32; 2]) -> Result<Self, Self::Error> {
        Self::new(id, total).ok_or_else(|| format!("shard {id} out of range for {total} shards"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_bounds() {
        assert!(ShardInfo::new(0, 1).is_some());
        assert!(ShardInfo::new(3, 4).is_some());
        assert!(ShardInfo::new(4, 4).is_none());
        assert!(ShardInfo::new(0, 0).is_none());
    }

    #[test]
    fn test_shard_wire_format() {
        let shard = ShardInfo::new(1, 2).unwrap();
        assert_eq!(serde_json::to_string(&shard).unwrap(), "[1,2]");

        let parsed: ShardInfo = serde_json::from_str("[1,2]").unwrap();
        assert_eq!(parsed, shard);
        assert!(serde_json::from_str::<ShardInfo>("[2,2]").is_err());
    }

    #[test]
    fn test_guild_shard_routing() {
        assert_eq!(ShardInfo::for_guild(41_771_983_423_143_937, 1), 0);
        assert_eq!(ShardInfo::for_guild(197_038_439_483_310_086, 0), 0);
        assert!(ShardInfo::for_guild(197_038_439_483_310_086, 16) < 16);
    }
}
