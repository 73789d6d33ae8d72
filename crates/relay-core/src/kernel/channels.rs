// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Channel registry: named, ACL-gated persistent reply destinations.
//!
//! A path that was never registered as a channel is simply not a channel —
//! [`ChannelManager::authorize`] passes it through unchanged, matching the
//! "absent means not a channel" rule the kernel's send pipeline relies on.

use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::RelayError;

struct Channel {
    owner: Uuid,
    participants: HashSet<Uuid>,
}

/// Owner/participant ACL for named channel paths.
pub struct ChannelManager {
    channels: DashMap<String, Channel>,
}

impl ChannelManager {
    /// Builds an empty channel registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Registers `path` as a channel owned by `owner` with the given
    /// initial participants.
    pub fn register(&self, path: impl Into<String>, owner: Uuid, participants: impl IntoIterator<Item = Uuid>) {
        self.channels.insert(
            path.into(),
            Channel {
                owner,
                participants: participants.into_iter().collect(),
            },
        );
    }

    /// Removes a channel registration. A no-op if `path` was never a channel.
    pub fn unregister(&self, path: &str) {
        self.channels.remove(path);
    }

    /// Adds `participant` to an existing channel's participant set.
    ///
    /// Returns `false` if `path` is not a registered channel.
    pub fn add_participant(&self, path: &str, participant: Uuid) -> bool {
        self.channels
            .get_mut(path)
            .map(|mut channel| {
                channel.participants.insert(participant);
            })
            .is_some()
    }

    /// Removes `participant` from a channel's participant set.
    pub fn remove_participant(&self, path: &str, participant: Uuid) -> bool {
        self.channels
            .get_mut(path)
            .map(|mut channel| {
                channel.participants.remove(&participant);
            })
            .is_some()
    }

    /// Returns `true` if `path` names a registered channel.
    #[must_use]
    pub fn is_channel(&self, path: &str) -> bool {
        self.channels.contains_key(path)
    }

    /// Enforces the channel ACL for `caller` against `path`.
    ///
    /// `path` not naming a registered channel passes through. Otherwise
    /// `caller` must be the owner or a participant.
    pub fn authorize(&self, path: &str, caller: Uuid) -> Result<(), RelayError> {
        let Some(channel) = self.channels.get(path) else {
            return Ok(());
        };
        if channel.owner == caller || channel.participants.contains(&caller) {
            Ok(())
        } else {
            Err(RelayError::UnauthorizedChannelUse(path.to_string()))
        }
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}
