//! Short-TTL invite inboxes
//!
//! One slot per callee: storing an invite supersedes the previous one.
//! Expired entries are never returned.

use async_trait::async_trait;
use callmeter_cache::{keys, RedisCache};
use callmeter_core::{
    models::CallInvite,
    traits::{CacheService, InviteStore},
    AppResult,
};
use parking_lot::Mutex;
use redis::Script;
use std::collections::HashMap;
use tracing::debug;

/// Inbox held in process memory
#[derive(Default)]
pub struct MemoryInviteStore {
    slots: Mutex<HashMap<String, (CallInvite, u64)>>,
}

impl MemoryInviteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InviteStore for MemoryInviteStore {
    async fn put(&self, invite: &CallInvite, ttl_secs: u64) -> AppResult<()> {
        let previous = self
            .slots
            .lock()
            .insert(invite.to.clone(), (invite.clone(), ttl_secs));
        if let Some((old, _)) = previous {
            debug!(callee = %invite.to, superseded = %old.id, "Invite superseded");
        }
        Ok(())
    }

    async fn latest(&self, target_id: &str) -> AppResult<Option<CallInvite>> {
        let mut slots = self.slots.lock();
        match slots.get(target_id) {
            Some((invite, ttl)) if invite.is_expired(*ttl) => {
                slots.remove(target_id);
                Ok(None)
            }
            Some((invite, _)) => Ok(Some(invite.clone())),
            None => Ok(None),
        }
    }

    async fn clear(&self, target_id: &str) -> AppResult<bool> {
        Ok(self.slots.lock().remove(target_id).is_some())
    }

    async fn clear_if(&self, target_id: &str, channel_name: &str) -> AppResult<bool> {
        let mut slots = self.slots.lock();
        match slots.get(target_id) {
            Some((invite, ttl))
                if !invite.is_expired(*ttl) && invite.channel_name == channel_name =>
            {
                slots.remove(target_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Delete KEYS[1] only if its invite is for channel ARGV[1]; returns 1 or 0
const CLEAR_IF_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return 0
end
local ok, invite = pcall(cjson.decode, raw)
if ok and invite['channel_name'] == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Inbox stored in Redis with `SET .. EX ttl`
pub struct RedisInviteStore {
    cache: RedisCache,
    clear_if_script: Script,
}

impl RedisInviteStore {
    pub fn new(cache: RedisCache) -> Self {
        Self {
            cache,
            clear_if_script: Script::new(CLEAR_IF_SCRIPT),
        }
    }

    fn key(&self, target_id: &str) -> String {
        keys::invite_key(self.cache.namespace(), target_id)
    }
}

#[async_trait]
impl InviteStore for RedisInviteStore {
    async fn put(&self, invite: &CallInvite, ttl_secs: u64) -> AppResult<()> {
        self.cache.set(&self.key(&invite.to), invite, ttl_secs).await
    }

    async fn latest(&self, target_id: &str) -> AppResult<Option<CallInvite>> {
        self.cache.get::<CallInvite>(&self.key(target_id)).await
    }

    async fn clear(&self, target_id: &str) -> AppResult<bool> {
        self.cache.delete(&self.key(target_id)).await
    }

    async fn clear_if(&self, target_id: &str, channel_name: &str) -> AppResult<bool> {
        let key = self.key(target_id);
        let deleted: i64 = self
            .cache
            .eval_script(&self.clear_if_script, &[&key], &[channel_name])
            .await?;
        if deleted > 0 {
            debug!(callee = %target_id, channel = %channel_name, "Inbox cleared");
        }
        Ok(deleted > 0)
    }
}
