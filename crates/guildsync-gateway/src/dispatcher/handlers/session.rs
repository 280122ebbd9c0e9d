use serde_json::{Map, Value};
use tracing::{debug, info};

use super::object;
use crate::cache::objects;
use crate::dispatcher::{DispatchContext, HandlerResult};
use crate::notify::ClientEvent;

/// Session established: record the connected user and stub every guild.
pub(super) fn ready(data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    let user = ctx.cache.upsert_user(object(data, "user")?, false)?;
    let user = user.entry.read().clone();
    ctx.cache.set_current_user(user.id);

    let mut guilds = 0;
    for guild in objects(data, "guilds") {
        match ctx.cache.load_guild(guild, false) {
            Ok(_) => guilds += 1,
            Err(e) => debug!(error = %e, "skipping guild in ready"),
        }
    }

    info!(user_id = %user.id, guilds, "ready");
    ctx.emit(ClientEvent::Ready {
        user: Some(user),
        guilds,
    });
    Ok(())
}

pub(super) fn resumed(_data: &Map<String, Value>, ctx: &DispatchContext<'_>) -> HandlerResult {
    ctx.emit(ClientEvent::Resumed);
    Ok(())
}
