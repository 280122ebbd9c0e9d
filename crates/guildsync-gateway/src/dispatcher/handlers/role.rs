use guildsync_core::{GuildId, RoleId};
use serde_json::{Map, Value};

use super::{known_guild, object, required};
use crate::cache::Role;
use crate::dispatcher::{DispatchContext, HandlerResult};
use crate::notify::ClientEvent;

pub(super) fn role_create(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    upsert(data, ctx, false)
}

pub(super) fn role_update(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    upsert(data, ctx, true)
}

fn upsert(data: &Map<String, Value>, ctx: &DispatchContext<'_>, update: bool) -> HandlerResult {
    let guild_id: GuildId = required(data, "guild_id")?;
    let fields = object(data, "role")?;
    let id: RoleId = required(fields, "id")?;
    let Some(guild) = known_guild(ctx, guild_id) else {
        return Ok(());
    };

    let keep_old = update && ctx.keep_old("roleUpdate");
    let result = guild.read().roles.upsert(id, fields, keep_old, || Role::new(id));
    let role = result.entry.read().clone();
    if update && !result.created {
        ctx.emit(ClientEvent::RoleUpdate {
            guild_id,
            role,
            old: result.old,
        });
    } else {
        ctx.emit(ClientEvent::RoleCreate { guild_id, role });
    }
    Ok(())
}

pub(super) fn role_delete(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let guild_id: GuildId = required(data, "guild_id")?;
    let id: RoleId = required(data, "role_id")?;
    let Some(guild) = known_guild(ctx, guild_id) else {
        return Ok(());
    };
    let removed = guild.read().roles.delete(&id);
    if let Some(role) = removed {
        let role = role.read().clone();
        ctx.emit(ClientEvent::RoleDelete { guild_id, role });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::dispatcher::test_support::Harness;
    use crate::notify::ClientEvent;
    use guildsync_core::{GuildId, RoleId};
    use serde_json::json;

    fn seeded(harness: &Harness) {
        let _ = harness.send("GUILD_CREATE", json!({"id": "10", "roles": [{"id": "10", "name": "@everyone"}]}));
    }

    #[test]
    fn create_update_delete() {
        let harness = Harness::new();
        seeded(&harness);

        let _ = harness.send("GUILD_ROLE_CREATE", json!({"guild_id": "10", "role": {"id": "11", "name": "mods", "color": 255}}));
        assert!(matches!(harness.last_event(), ClientEvent::RoleCreate { ref role, .. } if role.color == 255));

        let _ = harness.send("GUILD_ROLE_UPDATE", json!({"guild_id": "10", "role": {"id": "11", "name": "admins"}}));
        match harness.last_event() {
            ClientEvent::RoleUpdate { role, old, .. } => {
                assert_eq!(role.name, "admins");
                assert_eq!(role.color, 255);
                assert_eq!(old.unwrap().name, "mods");
            }
            other => panic!("unexpected {other:?}"),
        }

        let _ = harness.send("GUILD_ROLE_DELETE", json!({"guild_id": "10", "role_id": "11"}));
        assert!(matches!(harness.last_event(), ClientEvent::RoleDelete { .. }));
        let guild = harness.cache.guild(GuildId::new(10)).unwrap();
        assert!(guild.read().roles.get(&RoleId::new(11)).is_none());
    }

    #[test]
    fn missing_role_object_is_rejected() {
        let harness = Harness::new();
        seeded(&harness);
        assert!(matches!(
            harness.send("GUILD_ROLE_CREATE", json!({"guild_id": "10"})),
            crate::dispatcher::DispatchOutcome::Rejected(_)
        ));
    }
}
