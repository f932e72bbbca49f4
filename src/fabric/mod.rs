use async_trait::async_trait;

use crate::error::HarnessError;

/// Collective operations carried over the fabric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectiveKind {
    AllReduce,
    Barrier,
}

impl CollectiveKind {
    fn code(self) -> u8 {
        match self {
            CollectiveKind::AllReduce => 1,
            CollectiveKind::Barrier => 2,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(CollectiveKind::AllReduce),
            2 => Some(CollectiveKind::Barrier),
            _ => None,
        }
    }
}

pub const HEADER_LEN: usize = 17;

/// Pre-check header exchanged before every collective payload. The
/// coordinator compares each peer's header against its own, so a rank
/// whose operation stream has diverged (different kind, sequence number,
/// or payload length) is reported instead of deadlocking the group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CollectiveHeader {
    pub kind: CollectiveKind,
    pub seq: u64,
    pub len: u64,
}

impl CollectiveHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut raw = [0u8; HEADER_LEN];
        raw[0] = self.kind.code();
        raw[1..9].copy_from_slice(&self.seq.to_le_bytes());
        raw[9..17].copy_from_slice(&self.len.to_le_bytes());
        raw
    }

    pub fn decode(raw: &[u8; HEADER_LEN]) -> Option<Self> {
        let kind = CollectiveKind::from_code(raw[0])?;
        let seq = u64::from_le_bytes(raw[1..9].try_into().ok()?);
        let len = u64::from_le_bytes(raw[9..17].try_into().ok()?);
        Some(Self { kind, seq, len })
    }

    pub fn describe(&self) -> String {
        format!("{:?} seq {} payload {} bytes", self.kind, self.seq, self.len)
    }
}

/// Core abstraction for network transport.
/// Implementations are TCP (production mesh) or in-process channels
/// (simulation and tests). Collective algorithms live one level up, in
/// [`crate::group::Group`], so the lockstep protocol is written once.
#[async_trait]
pub trait Fabric: Send + Sync {
    /// Send a message to peer (by rank). Blocks until the transport has
    /// accepted the full buffer.
    async fn send(&self, peer: usize, buf: &[u8]) -> Result<(), HarnessError>;

    /// Receive exactly `buf.len()` bytes from peer. Blocks until the
    /// matching send arrives; there is deliberately no timeout here.
    async fn recv(&self, peer: usize, buf: &mut [u8]) -> Result<(), HarnessError>;

    /// This process's rank.
    fn rank(&self) -> usize;

    /// Total number of processes.
    fn world_size(&self) -> usize;

    /// Release transport resources. Idempotent.
    async fn shutdown(&self) -> Result<(), HarnessError>;
}

pub mod local;
pub mod tcp;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header = CollectiveHeader {
            kind: CollectiveKind::AllReduce,
            seq: 42,
            len: 1 << 20,
        };
        let decoded = CollectiveHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn header_rejects_unknown_kind() {
        let mut raw = CollectiveHeader {
            kind: CollectiveKind::Barrier,
            seq: 0,
            len: 0,
        }
        .encode();
        raw[0] = 0xff;
        assert!(CollectiveHeader::decode(&raw).is_none());
    }
}
