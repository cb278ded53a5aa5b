//! Server-side event handlers attached to every connection.

use crate::metrics;
use beacon_core::{HandlerError, HandlerResult, Hub, Socket};
use beacon_protocol::DISCONNECT_EVENT;
use serde_json::Value;
use tracing::info;

/// Fired by the overlay editor; relayed to every connection, sender included.
pub const TRIGGER_EVENT: &str = "TriggerEvents:ID";
/// Join the room named by the string payload.
pub const ROOM_JOIN_EVENT: &str = "room:join";
/// Leave the room named by the string payload.
pub const ROOM_LEAVE_EVENT: &str = "room:leave";

/// Install the server's connection hook on `hub`.
pub fn install(hub: &Hub) {
    hub.on_connection(|socket| {
        info!(
            connection = %socket.id(),
            remote = ?socket.transport().remote_addr(),
            "Client connected"
        );

        socket.on(DISCONNECT_EVENT, on_disconnect);
        socket.on(TRIGGER_EVENT, on_trigger);
        socket.on(ROOM_JOIN_EVENT, on_room_join);
        socket.on(ROOM_LEAVE_EVENT, on_room_leave);
    });
}

fn on_disconnect(socket: &Socket, data: &Value) -> HandlerResult {
    info!(
        connection = %socket.id(),
        code = %data["code"],
        reason = %data["reason"],
        "Client disconnected"
    );
    Ok(())
}

fn on_trigger(socket: &Socket, data: &Value) -> HandlerResult {
    let hub = socket
        .hub()
        .ok_or_else(|| HandlerError::Other("hub is gone".into()))?;

    info!(connection = %socket.id(), data = %data, "Relaying trigger event");
    let delivered = hub.emit(TRIGGER_EVENT, data);
    metrics::record_broadcast(delivered);
    Ok(())
}

fn on_room_join(socket: &Socket, data: &Value) -> HandlerResult {
    let room = room_name(data)?;
    if socket.join(room)? {
        info!(connection = %socket.id(), room = %room, "Joined room");
    }
    update_room_gauge(socket);
    Ok(())
}

fn on_room_leave(socket: &Socket, data: &Value) -> HandlerResult {
    let room = room_name(data)?;
    if socket.leave(room) {
        info!(connection = %socket.id(), room = %room, "Left room");
    }
    update_room_gauge(socket);
    Ok(())
}

fn room_name(data: &Value) -> Result<&str, HandlerError> {
    data.as_str()
        .ok_or_else(|| HandlerError::InvalidPayload(format!("expected room name, got {data}")))
}

fn update_room_gauge(socket: &Socket) {
    if let Some(hub) = socket.hub() {
        metrics::set_active_rooms(hub.stats().room_count);
    }
}
