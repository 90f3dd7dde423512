//! Message kinds.
//!
//! The transport treats the kind as an opaque routing key, except for the
//! readiness, shutdown and fatal-error signals the session reacts to.
//! Host → renderer kinds sit below 100, renderer → host kinds at 100 and up.

/// Open an offscreen surface. Payload: [`crate::payload::CreateSurface`].
pub const CREATE_BROWSER: u32 = 1;
/// Close the current surface. Empty.
pub const CLOSE_BROWSER: u32 = 2;
/// Ask the renderer to exit. Empty.
pub const SHUTDOWN: u32 = 3;
/// Payload: [`crate::payload::Resize`].
pub const RESIZE: u32 = 4;
/// Payload: URL bytes.
pub const NAVIGATE: u32 = 5;
/// Empty.
pub const RELOAD: u32 = 6;
pub const MOUSE_MOVE: u32 = 10;
pub const MOUSE_CLICK: u32 = 11;
pub const MOUSE_WHEEL: u32 = 12;
pub const KEY_EVENT: u32 = 13;
/// [`crate::ArgCall`] answering an earlier `API_REQUEST`.
pub const API_RESPONSE: u32 = 20;
/// [`crate::ArgCall`] delivering a subscribed event.
pub const EVENT_DISPATCH: u32 = 21;
/// [`crate::ArgCall`] delivering a keybind press/release.
pub const KEYBIND_INVOKE: u32 = 22;

/// A frame was published to shared memory (informational).
pub const FRAME_READY: u32 = 100;
/// [`crate::ArgCall`] asking the host for a named capability.
pub const API_REQUEST: u32 = 101;
/// Renderer finished its own setup. Empty.
pub const HOST_READY: u32 = 102;
/// Surface creation completed. Empty.
pub const BROWSER_CREATED: u32 = 103;
/// Fatal renderer error. Payload: UTF-8 message.
pub const HOST_ERROR: u32 = 104;
/// Renderer acknowledged `SHUTDOWN` and is exiting. Empty.
pub const SHUTDOWN_ACK: u32 = 105;

/// Returns a human-readable name for a message kind.
pub fn kind_name(kind: u32) -> &'static str {
    match kind {
        CREATE_BROWSER => "CREATE_BROWSER",
        CLOSE_BROWSER => "CLOSE_BROWSER",
        SHUTDOWN => "SHUTDOWN",
        RESIZE => "RESIZE",
        NAVIGATE => "NAVIGATE",
        RELOAD => "RELOAD",
        MOUSE_MOVE => "MOUSE_MOVE",
        MOUSE_CLICK => "MOUSE_CLICK",
        MOUSE_WHEEL => "MOUSE_WHEEL",
        KEY_EVENT => "KEY_EVENT",
        API_RESPONSE => "API_RESPONSE",
        EVENT_DISPATCH => "EVENT_DISPATCH",
        KEYBIND_INVOKE => "KEYBIND_INVOKE",
        FRAME_READY => "FRAME_READY",
        API_REQUEST => "API_REQUEST",
        HOST_READY => "HOST_READY",
        BROWSER_CREATED => "BROWSER_CREATED",
        HOST_ERROR => "HOST_ERROR",
        SHUTDOWN_ACK => "SHUTDOWN_ACK",
        _ => "UNKNOWN",
    }
}

/// Returns true for kinds whose payload is an [`crate::ArgCall`].
pub fn carries_arg_call(kind: u32) -> bool {
    matches!(
        kind,
        API_REQUEST | API_RESPONSE | EVENT_DISPATCH | KEYBIND_INVOKE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_cover_reserved_signals() {
        assert_eq!(kind_name(HOST_READY), "HOST_READY");
        assert_eq!(kind_name(SHUTDOWN), "SHUTDOWN");
        assert_eq!(kind_name(HOST_ERROR), "HOST_ERROR");
        assert_eq!(kind_name(9999), "UNKNOWN");
    }

    #[test]
    fn arg_call_families() {
        assert!(carries_arg_call(API_REQUEST));
        assert!(carries_arg_call(EVENT_DISPATCH));
        assert!(!carries_arg_call(NAVIGATE));
    }
}
