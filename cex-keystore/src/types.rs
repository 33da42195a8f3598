//! Core wire types for the key-package container (spec §3/§6.4): the
//! authority header, the subkey policy/state bitfields, and the package's
//! own identifier wrappers.
//!
//! Generalizes `citadel-keystore::types`'s `KeyId`/`KeyState` — one key per
//! on-disk file, a linear lifecycle enum — to a *package* holding `N`
//! independent subkeys, each carrying its own policy and bitfield state.

use std::fmt;

use rand_core::RngCore;

/// 32-byte package identifier (hex-encoded for display, as `citadel-keystore`
/// hex-encodes `KeyId`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PackageId(pub [u8; 32]);

impl PackageId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand_core::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }
}

impl fmt::Debug for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackageId({})", hex::encode(self.0))
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// 128-bit subkey identifier (spec §3 `PackageKey.subkey_ids: [u128; N]`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SubkeyId(pub u128);

impl fmt::Debug for SubkeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubkeyId({:032x})", self.0)
    }
}

impl fmt::Display for SubkeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl SubkeyId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        rand_core::OsRng.fill_bytes(&mut bytes);
        Self(u128::from_le_bytes(bytes))
    }
}

/// `KeyAuthority` (spec §3): who may open this package and what it belongs
/// to. `domain_id`/`package_tag` are presented by the caller on `read` and
/// checked under the package's policy bits (`PackageAuth`/`DomainAuth`,
/// spec §4.8) — a mismatch is `Unauthorized`.
///
/// Wire size per the explicit field list is 144 bytes
/// (32 + 16 + 16 + 32 + 32 + 8 + 8); spec §6.4's file-layout table calls
/// the authority block "136 B", eight bytes short of summing its own §3
/// field list (the same class of self-contradiction `cex-protocol::packet`
/// resolves for its header: a summary-prose byte count vs. an explicit,
/// doubly-corroborated field list). We follow the field list here too.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct KeyAuthority {
    pub domain_id: [u8; 32],
    pub origin_id: [u8; 16],
    pub target_id: [u8; 16],
    pub package_id: [u8; 32],
    pub package_tag: [u8; 32],
    pub policy_flags: u64,
    pub option_flag: i64,
}

pub const AUTHORITY_WIRE_LEN: usize = 32 + 16 + 16 + 32 + 32 + 8 + 8;

impl KeyAuthority {
    pub fn to_bytes(&self) -> [u8; AUTHORITY_WIRE_LEN] {
        let mut out = [0u8; AUTHORITY_WIRE_LEN];
        let mut at = 0;
        out[at..at + 32].copy_from_slice(&self.domain_id);
        at += 32;
        out[at..at + 16].copy_from_slice(&self.origin_id);
        at += 16;
        out[at..at + 16].copy_from_slice(&self.target_id);
        at += 16;
        out[at..at + 32].copy_from_slice(&self.package_id);
        at += 32;
        out[at..at + 32].copy_from_slice(&self.package_tag);
        at += 32;
        out[at..at + 8].copy_from_slice(&self.policy_flags.to_le_bytes());
        at += 8;
        out[at..at + 8].copy_from_slice(&self.option_flag.to_le_bytes());
        out
    }

    pub fn from_bytes(data: &[u8; AUTHORITY_WIRE_LEN]) -> Self {
        let mut at = 0;
        let mut domain_id = [0u8; 32];
        domain_id.copy_from_slice(&data[at..at + 32]);
        at += 32;
        let mut origin_id = [0u8; 16];
        origin_id.copy_from_slice(&data[at..at + 16]);
        at += 16;
        let mut target_id = [0u8; 16];
        target_id.copy_from_slice(&data[at..at + 16]);
        at += 16;
        let mut package_id = [0u8; 32];
        package_id.copy_from_slice(&data[at..at + 32]);
        at += 32;
        let mut package_tag = [0u8; 32];
        package_tag.copy_from_slice(&data[at..at + 32]);
        at += 32;
        let policy_flags = u64::from_le_bytes(data[at..at + 8].try_into().unwrap());
        at += 8;
        let option_flag = i64::from_le_bytes(data[at..at + 8].try_into().unwrap());
        Self {
            domain_id,
            origin_id,
            target_id,
            package_id,
            package_tag,
            policy_flags,
            option_flag,
        }
    }
}

/// Per-subkey policy bitfield (spec §4.8). Hand-rolled over a `u64` rather
/// than pulling in a `bitflags`-style dependency — the teacher's own
/// bitfields (`KeyPolicy`'s `policy_flags`-adjacent fields, `DtmPacket`'s
/// `option_flag`) are plain integers with named `const` masks throughout
/// this codebase.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct SubkeyPolicy(pub u64);

impl SubkeyPolicy {
    /// On a successful read, copy out, zero the blob on disk, then mark
    /// `Used` — the read is destructive and single-shot.
    pub const POST_OVERWRITE: u64 = 1 << 0;
    /// `option_flag` carries an expiry timestamp (ticks); reads past expiry
    /// fail with `SubkeyExpired`.
    pub const VOLATILE: u64 = 1 << 1;
    /// Caller must present the authority's `package_tag` on read.
    pub const PACKAGE_AUTH: u64 = 1 << 2;
    /// Caller must present the authority's `domain_id` on read.
    pub const DOMAIN_AUTH: u64 = 1 << 3;

    pub fn contains(self, flag: u64) -> bool {
        self.0 & flag == flag
    }

    pub fn with(self, flag: u64) -> Self {
        Self(self.0 | flag)
    }
}

/// Per-subkey lifecycle bitfield (spec §3: "`subkey_states[i]` is a bitfield
/// over {Locked, Active, Expired, Used}"). Deliberately a bitfield rather
/// than `citadel-keystore::KeyState`'s linear enum — `Locked` can coexist
/// with any other bit, and a subkey can be simultaneously `Expired` and
/// `Used`. Monotonicity (spec §3: "once Used, they never return to Active")
/// is enforced on the sticky bits only, via `can_transition_to`.
#[derive(Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct SubkeyState(pub u8);

impl SubkeyState {
    pub const LOCKED: u8 = 1 << 0;
    pub const ACTIVE: u8 = 1 << 1;
    pub const EXPIRED: u8 = 1 << 2;
    pub const USED: u8 = 1 << 3;

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit == bit
    }

    pub fn is_active(self) -> bool {
        self.contains(Self::ACTIVE) && !self.contains(Self::USED) && !self.contains(Self::EXPIRED) && !self.contains(Self::LOCKED)
    }

    pub fn is_used(self) -> bool {
        self.contains(Self::USED)
    }

    pub fn is_expired(self) -> bool {
        self.contains(Self::EXPIRED)
    }

    /// `Used` and `Expired` are sticky: once either bit is observed, every
    /// later state must still carry it. `Locked`/`Active` may still be
    /// toggled freely, since they describe transient availability rather
    /// than a one-way lifecycle step.
    pub fn can_transition_to(self, target: Self) -> bool {
        if self.contains(Self::USED) && !target.contains(Self::USED) {
            return false;
        }
        if self.contains(Self::EXPIRED) && !target.contains(Self::EXPIRED) {
            return false;
        }
        true
    }

    pub fn with(self, bit: u8) -> Self {
        Self(self.0 | bit)
    }

    pub fn without(self, bit: u8) -> Self {
        Self(self.0 & !bit)
    }
}

impl fmt::Debug for SubkeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.contains(Self::LOCKED) {
            flags.push("LOCKED");
        }
        if self.contains(Self::ACTIVE) {
            flags.push("ACTIVE");
        }
        if self.contains(Self::EXPIRED) {
            flags.push("EXPIRED");
        }
        if self.contains(Self::USED) {
            flags.push("USED");
        }
        if flags.is_empty() {
            flags.push("NONE");
        }
        write!(f, "SubkeyState({})", flags.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_round_trips() {
        let authority = KeyAuthority {
            domain_id: [1u8; 32],
            origin_id: [2u8; 16],
            target_id: [3u8; 16],
            package_id: [4u8; 32],
            package_tag: [5u8; 32],
            policy_flags: 0xdead_beef,
            option_flag: -42,
        };
        let bytes = authority.to_bytes();
        let decoded = KeyAuthority::from_bytes(&bytes);
        assert!(decoded == authority);
    }

    #[test]
    fn used_is_sticky() {
        let active = SubkeyState::default().with(SubkeyState::ACTIVE);
        let used = active.without(SubkeyState::ACTIVE).with(SubkeyState::USED);
        assert!(active.can_transition_to(used));
        assert!(!used.can_transition_to(active));
    }

    #[test]
    fn locked_does_not_block_reactivation() {
        let locked = SubkeyState::default().with(SubkeyState::LOCKED);
        let active = SubkeyState::default().with(SubkeyState::ACTIVE);
        assert!(locked.can_transition_to(active));
    }
}
