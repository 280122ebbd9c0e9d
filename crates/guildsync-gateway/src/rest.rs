//! REST boundary: mutations the gateway cannot express.
//!
//! Requests are delegated to an external [`RestExecutor`]; the canonical
//! object it returns is applied through the same patch primitive gateway
//! events use, so both update paths converge on identical cache state.
//! Results for guilds that are not cached are returned detached.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use guildsync_core::{ChannelId, GatewayError, GatewayResult, GuildId, RoleId, UserId};
use serde_json::{Map, Value};
use tracing::debug;

use crate::cache::{Channel, EntityCache, Guild, GuildSnapshot, Member, Patch, Role, Store, patch};

/// HTTP method of a REST call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl fmt::Display for RestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

/// Performs REST calls (transport, auth and rate limits live behind it).
#[async_trait]
pub trait RestExecutor: Send + Sync {
    /// Execute `method` on `path` with an optional JSON body.
    async fn execute(&self, method: RestMethod, path: &str, body: Option<Value>) -> GatewayResult<Value>;
}

/// Applies REST results to the entity cache.
pub struct RestSync {
    executor: Arc<dyn RestExecutor>,
    cache: Arc<EntityCache>,
}

impl RestSync {
    /// Wrap an executor around `cache`.
    pub fn new(executor: Arc<dyn RestExecutor>, cache: Arc<EntityCache>) -> Self {
        Self { executor, cache }
    }

    async fn call(&self, method: RestMethod, path: String, body: Option<Value>) -> GatewayResult<Map<String, Value>> {
        debug!(%method, path = %path, "rest call");
        match self.executor.execute(method, &path, body).await? {
            Value::Object(fields) => Ok(fields),
            other => Err(GatewayError::Rest {
                method: method.to_string(),
                path,
                message: format!("expected an object, got {other}"),
            }),
        }
    }

    async fn call_empty(&self, method: RestMethod, path: String) -> GatewayResult<()> {
        debug!(%method, path = %path, "rest call");
        let _ = self.executor.execute(method, &path, None).await?;
        Ok(())
    }

    // ─── Guild ───────────────────────────────────────────────────────────

    /// `PATCH /guilds/{id}`.
    pub async fn edit_guild(&self, guild_id: GuildId, changes: Value) -> GatewayResult<GuildSnapshot> {
        let fields = self.call(RestMethod::Patch, format!("/guilds/{guild_id}"), Some(changes)).await?;
        let snapshot = match self.cache.guild(guild_id) {
            Some(guild) => {
                let mut guild = guild.write();
                let _ = guild.patch(&fields);
                guild.snapshot()
            }
            None => {
                let mut guild = Guild::new(guild_id);
                guild.available = true;
                let _ = guild.patch(&fields);
                guild.snapshot()
            }
        };
        Ok(snapshot)
    }

    // ─── Roles ───────────────────────────────────────────────────────────

    /// `POST /guilds/{guild}/roles`.
    pub async fn create_role(&self, guild_id: GuildId, body: Value) -> GatewayResult<Role> {
        let path = format!("/guilds/{guild_id}/roles");
        let fields = self.call(RestMethod::Post, path.clone(), Some(body)).await?;
        let id: RoleId = required_id(&fields, RestMethod::Post, &path)?;
        Ok(self.apply(guild_id, |g| &g.roles, id, &fields, || Role::new(id)))
    }

    /// `PATCH /guilds/{guild}/roles/{role}`.
    pub async fn edit_role(&self, guild_id: GuildId, role_id: RoleId, changes: Value) -> GatewayResult<Role> {
        let path = format!("/guilds/{guild_id}/roles/{role_id}");
        let fields = self.call(RestMethod::Patch, path, Some(changes)).await?;
        Ok(self.apply(guild_id, |g| &g.roles, role_id, &fields, || Role::new(role_id)))
    }

    /// `DELETE /guilds/{guild}/roles/{role}`.
    pub async fn delete_role(&self, guild_id: GuildId, role_id: RoleId) -> GatewayResult<Option<Role>> {
        self.call_empty(RestMethod::Delete, format!("/guilds/{guild_id}/roles/{role_id}"))
            .await?;
        Ok(self
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.read().roles.delete(&role_id))
            .map(|role| role.read().clone()))
    }

    // ─── Channels ────────────────────────────────────────────────────────

    /// `POST /guilds/{guild}/channels`.
    pub async fn create_channel(&self, guild_id: GuildId, body: Value) -> GatewayResult<Channel> {
        let path = format!("/guilds/{guild_id}/channels");
        let fields = self.call(RestMethod::Post, path.clone(), Some(body)).await?;
        let id: ChannelId = required_id(&fields, RestMethod::Post, &path)?;
        Ok(self.apply(guild_id, |g| &g.channels, id, &fields, || Channel::new(id, guild_id)))
    }

    /// `PATCH /channels/{id}`. The owning guild is read from the result.
    pub async fn edit_channel(&self, channel_id: ChannelId, changes: Value) -> GatewayResult<Channel> {
        let path = format!("/channels/{channel_id}");
        let fields = self.call(RestMethod::Patch, path.clone(), Some(changes)).await?;
        let guild_id: GuildId = patch::id(&fields, "guild_id").ok_or_else(|| GatewayError::Rest {
            method: RestMethod::Patch.to_string(),
            path,
            message: "response has no guild_id".into(),
        })?;
        Ok(self.apply(guild_id, |g| &g.channels, channel_id, &fields, || {
            Channel::new(channel_id, guild_id)
        }))
    }

    /// `DELETE /channels/{id}`.
    pub async fn delete_channel(&self, channel_id: ChannelId) -> GatewayResult<Option<Channel>> {
        let path = format!("/channels/{channel_id}");
        let fields = self.call(RestMethod::Delete, path, None).await?;
        let Some(guild_id) = patch::id::<GuildId>(&fields, "guild_id") else {
            return Ok(None);
        };
        Ok(self
            .cache
            .guild(guild_id)
            .and_then(|guild| guild.read().channels.delete(&channel_id))
            .map(|channel| channel.read().clone()))
    }

    // ─── Members ─────────────────────────────────────────────────────────

    /// `GET /guilds/{guild}/members/{user}`. Stored without moving the
    /// guild's member count.
    pub async fn fetch_member(&self, guild_id: GuildId, user_id: UserId) -> GatewayResult<Member> {
        let path = format!("/guilds/{guild_id}/members/{user_id}");
        let fields = self.call(RestMethod::Get, path.clone(), None).await?;
        let rest_error = |e: guildsync_core::MalformedEnvelope| GatewayError::Rest {
            method: RestMethod::Get.to_string(),
            path: path.clone(),
            message: e.to_string(),
        };

        match self.cache.guild(guild_id) {
            Some(guild) => {
                let result = self
                    .cache
                    .ingest_member(&mut guild.write(), &fields, true, false)
                    .map_err(rest_error)?;
                let member = result.entry.read().clone();
                Ok(member)
            }
            None => {
                let user = fields
                    .get("user")
                    .and_then(Value::as_object)
                    .ok_or_else(|| rest_error(crate::cache::missing("member user", &fields)))?;
                let _ = self.cache.upsert_user(user, false).map_err(rest_error)?;
                let mut member = Member::new(guild_id, user_id);
                let _ = member.patch(&fields);
                Ok(member)
            }
        }
    }

    fn apply<K, V>(
        &self,
        guild_id: GuildId,
        store: impl Fn(&Guild) -> &Store<K, V>,
        id: K,
        fields: &Map<String, Value>,
        init: impl FnOnce() -> V,
    ) -> V
    where
        K: Eq + Hash + Copy,
        V: Patch + Clone,
    {
        match self.cache.guild(guild_id) {
            Some(guild) => {
                let guild = guild.read();
                store(&guild).upsert(id, fields, false, init).entry.read().clone()
            }
            None => {
                let mut value = init();
                let _ = value.patch(fields);
                value
            }
        }
    }
}

fn required_id<T: serde::de::DeserializeOwned>(
    fields: &Map<String, Value>,
    method: RestMethod,
    path: &str,
) -> GatewayResult<T> {
    patch::id(fields, "id").ok_or_else(|| GatewayError::Rest {
        method: method.to_string(),
        path: path.to_owned(),
        message: "response has no id".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use serde_json::json;

    /// Records calls and answers with a canned response.
    struct MockExecutor {
        response: Value,
        calls: Mutex<Vec<(RestMethod, String, Option<Value>)>>,
    }

    impl MockExecutor {
        fn new(response: Value) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn last_call(&self) -> (RestMethod, String, Option<Value>) {
            self.calls.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl RestExecutor for MockExecutor {
        async fn execute(&self, method: RestMethod, path: &str, body: Option<Value>) -> GatewayResult<Value> {
            self.calls.lock().push((method, path.to_owned(), body));
            Ok(self.response.clone())
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl RestExecutor for FailingExecutor {
        async fn execute(&self, method: RestMethod, path: &str, _body: Option<Value>) -> GatewayResult<Value> {
            Err(GatewayError::Rest {
                method: method.to_string(),
                path: path.to_owned(),
                message: "403 Forbidden".into(),
            })
        }
    }

    fn cache_with_guild() -> Arc<EntityCache> {
        let cache = Arc::new(EntityCache::new());
        let snapshot = json!({
            "id": "10",
            "name": "guild",
            "member_count": 1,
            "roles": [{"id": "11", "name": "mods"}],
            "channels": [{"id": "20", "type": 0, "name": "general"}],
            "members": [{"user": {"id": "1", "username": "a"}}]
        });
        let _ = cache.load_guild(snapshot.as_object().unwrap(), false).unwrap();
        cache
    }

    fn sync(response: Value, cache: &Arc<EntityCache>) -> (RestSync, Arc<MockExecutor>) {
        let executor = MockExecutor::new(response);
        (RestSync::new(executor.clone(), Arc::clone(cache)), executor)
    }

    #[test]
    fn method_display() {
        assert_eq!(RestMethod::Patch.to_string(), "PATCH");
        assert_eq!(RestMethod::Delete.to_string(), "DELETE");
    }

    #[tokio::test]
    async fn edit_guild_patches_cached_guild() {
        let cache = cache_with_guild();
        let (rest, executor) = sync(json!({"id": "10", "name": "renamed"}), &cache);
        let snapshot = rest.edit_guild(GuildId::new(10), json!({"name": "renamed"})).await.unwrap();

        assert_eq!(snapshot.info.name, "renamed");
        let (method, path, body) = executor.last_call();
        assert_eq!(method, RestMethod::Patch);
        assert_eq!(path, "/guilds/10");
        assert_eq!(body.unwrap()["name"], "renamed");
        let guild = cache.guild(GuildId::new(10)).unwrap();
        assert_eq!(guild.read().info.name, "renamed");
        // Nested stores are untouched by a partial guild object.
        assert_eq!(guild.read().channels.count(), 1);
    }

    #[tokio::test]
    async fn role_crud_goes_through_cache() {
        let cache = cache_with_guild();
        let guild_id = GuildId::new(10);

        let (rest, _) = sync(json!({"id": "12", "name": "new", "color": 7}), &cache);
        let role = rest.create_role(guild_id, json!({"name": "new"})).await.unwrap();
        assert_eq!(role.color, 7);
        assert!(cache.guild(guild_id).unwrap().read().roles.contains(&RoleId::new(12)));

        let (rest, executor) = sync(json!({"id": "12", "name": "renamed"}), &cache);
        let role = rest.edit_role(guild_id, RoleId::new(12), json!({"name": "renamed"})).await.unwrap();
        assert_eq!(role.name, "renamed");
        assert_eq!(role.color, 7);
        assert_eq!(executor.last_call().1, "/guilds/10/roles/12");

        let (rest, _) = sync(Value::Null, &cache);
        let removed = rest.delete_role(guild_id, RoleId::new(12)).await.unwrap();
        assert_eq!(removed.unwrap().name, "renamed");
        assert!(!cache.guild(guild_id).unwrap().read().roles.contains(&RoleId::new(12)));
    }

    #[tokio::test]
    async fn channel_edit_uses_guild_from_response() {
        let cache = cache_with_guild();
        let (rest, _) = sync(json!({"id": "20", "guild_id": "10", "topic": "news"}), &cache);
        let channel = rest.edit_channel(ChannelId::new(20), json!({"topic": "news"})).await.unwrap();
        assert_eq!(channel.name, "general");
        assert_eq!(channel.topic.as_deref(), Some("news"));
    }

    #[tokio::test]
    async fn channel_create_and_delete() {
        let cache = cache_with_guild();
        let guild_id = GuildId::new(10);
        let (rest, _) = sync(json!({"id": "21", "guild_id": "10", "type": 2, "name": "voice"}), &cache);
        let channel = rest.create_channel(guild_id, json!({"name": "voice"})).await.unwrap();
        assert_eq!(channel.kind, 2);
        assert_eq!(cache.guild(guild_id).unwrap().read().channels.count(), 2);

        let removed = rest.delete_channel(ChannelId::new(21)).await.unwrap();
        assert!(removed.is_some());
        assert_eq!(cache.guild(guild_id).unwrap().read().channels.count(), 1);
    }

    #[tokio::test]
    async fn fetched_member_does_not_move_count() {
        let cache = cache_with_guild();
        let (rest, _) = sync(json!({"user": {"id": "2", "username": "b"}, "nick": "bee"}), &cache);
        let member = rest.fetch_member(GuildId::new(10), UserId::new(2)).await.unwrap();
        assert_eq!(member.nick.as_deref(), Some("bee"));

        let guild = cache.guild(GuildId::new(10)).unwrap();
        assert_eq!(guild.read().members.count(), 2);
        assert_eq!(guild.read().info.member_count, 1);
    }

    #[tokio::test]
    async fn uncached_guild_returns_detached_role() {
        let cache = Arc::new(EntityCache::new());
        let (rest, _) = sync(json!({"id": "12", "name": "solo"}), &cache);
        let role = rest.create_role(GuildId::new(99), json!({})).await.unwrap();
        assert_eq!(role.name, "solo");
        assert!(cache.guild(GuildId::new(99)).is_none());
    }

    #[tokio::test]
    async fn missing_id_is_rest_error() {
        let cache = cache_with_guild();
        let (rest, _) = sync(json!({"name": "no id"}), &cache);
        let err = rest.create_role(GuildId::new(10), json!({})).await.unwrap_err();
        assert_matches!(err, GatewayError::Rest { ref message, .. } if message.contains("no id"));
    }

    #[tokio::test]
    async fn executor_failure_propagates() {
        let cache = cache_with_guild();
        let rest = RestSync::new(Arc::new(FailingExecutor), Arc::clone(&cache));
        let err = rest.edit_guild(GuildId::new(10), json!({})).await.unwrap_err();
        assert_eq!(err.code(), "REST_ERROR");
        assert_eq!(cache.guild(GuildId::new(10)).unwrap().read().info.name, "guild");
    }
}
