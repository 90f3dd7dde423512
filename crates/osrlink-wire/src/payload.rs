//! Fixed-layout control payloads.
//!
//! All records are packed little-endian with no padding. Decoding requires at
//! least the record size; extra bytes are ignored.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::PayloadError;
use crate::kind;

fn require(record: &'static str, payload: &[u8], needed: usize) -> Result<(), PayloadError> {
    if payload.len() < needed {
        return Err(PayloadError::Truncated {
            record,
            len: payload.len(),
            needed,
        });
    }
    Ok(())
}

fn i32_at(payload: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&payload[offset..offset + 4]);
    i32::from_le_bytes(raw)
}

fn u32_at(payload: &[u8], offset: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&payload[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

/// `CREATE_BROWSER`: `[i32 width][i32 height][url bytes to end]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSurface {
    pub width: i32,
    pub height: i32,
    pub url: String,
}

impl CreateSurface {
    pub const MIN_SIZE: usize = 8;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::MIN_SIZE + self.url.len());
        buf.put_i32_le(self.width);
        buf.put_i32_le(self.height);
        buf.put_slice(self.url.as_bytes());
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        require("CREATE_BROWSER", payload, Self::MIN_SIZE)?;
        let url = std::str::from_utf8(&payload[Self::MIN_SIZE..])
            .map_err(|_| PayloadError::InvalidUtf8 {
                record: "CREATE_BROWSER",
            })?
            .to_owned();
        Ok(Self {
            width: i32_at(payload, 0),
            height: i32_at(payload, 4),
            url,
        })
    }
}

/// `RESIZE`: `[i32 width][i32 height]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resize {
    pub width: i32,
    pub height: i32,
}

impl Resize {
    pub const SIZE: usize = 8;

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        buf.put_i32_le(self.width);
        buf.put_i32_le(self.height);
        buf.freeze()
    }

    pub fn decode(payload: &[u8]) -> Result<Self, PayloadError> {
        require("RESIZE", payload, Self::SIZE)?;
        Ok(Self {
            width: i32_at(payload, 0),
            height: i32_at(payload, 4),
        })
    }
}

/// `NAVIGATE`: the URL as raw UTF-8.
pub fn decode_url(payload: &[u8]) -> Result<&str, PayloadError> {
    std::str::from_utf8(payload).map_err(|_| PayloadError::InvalidUtf8 { record: "NAVIGATE" })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseMove {
    pub x: i32,
    pub y: i32,
    pub modifiers: u32,
}

impl MouseMove {
    pub const SIZE: usize = 12;
}

/// Mouse button as carried on the wire (0 left, 1 middle, 2 right).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseClick {
    pub x: i32,
    pub y: i32,
    pub modifiers: u32,
    pub button: u32,
    pub mouse_up: bool,
    pub click_count: i32,
}

impl MouseClick {
    pub const SIZE: usize = 21;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseWheel {
    pub x: i32,
    pub y: i32,
    pub modifiers: u32,
    pub delta_x: i32,
    pub delta_y: i32,
}

impl MouseWheel {
    pub const SIZE: usize = 20;
}

/// Key event. `event_type` is 0 raw key down, 2 key up, 3 char.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub event_type: u32,
    pub modifiers: u32,
    pub windows_key_code: i32,
    pub native_key_code: i32,
    pub is_system_key: bool,
    pub character: u16,
}

impl KeyEvent {
    pub const SIZE: usize = 19;
}

/// One forwarded input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    MouseMove(MouseMove),
    MouseClick(MouseClick),
    MouseWheel(MouseWheel),
    Key(KeyEvent),
}

impl InputEvent {
    /// The envelope kind this event travels under.
    pub fn kind(&self) -> u32 {
        match self {
            InputEvent::MouseMove(_) => kind::MOUSE_MOVE,
            InputEvent::MouseClick(_) => kind::MOUSE_CLICK,
            InputEvent::MouseWheel(_) => kind::MOUSE_WHEEL,
            InputEvent::Key(_) => kind::KEY_EVENT,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(KeyEvent::SIZE.max(MouseClick::SIZE));
        match self {
            InputEvent::MouseMove(m) => {
                buf.put_i32_le(m.x);
                buf.put_i32_le(m.y);
                buf.put_u32_le(m.modifiers);
            }
            InputEvent::MouseClick(c) => {
                buf.put_i32_le(c.x);
                buf.put_i32_le(c.y);
                buf.put_u32_le(c.modifiers);
                buf.put_u32_le(c.button);
                buf.put_u8(u8::from(c.mouse_up));
                buf.put_i32_le(c.click_count);
            }
            InputEvent::MouseWheel(w) => {
                buf.put_i32_le(w.x);
                buf.put_i32_le(w.y);
                buf.put_u32_le(w.modifiers);
                buf.put_i32_le(w.delta_x);
                buf.put_i32_le(w.delta_y);
            }
            InputEvent::Key(k) => {
                buf.put_u32_le(k.event_type);
                buf.put_u32_le(k.modifiers);
                buf.put_i32_le(k.windows_key_code);
                buf.put_i32_le(k.native_key_code);
                buf.put_u8(u8::from(k.is_system_key));
                buf.put_u16_le(k.character);
            }
        }
        buf.freeze()
    }

    /// Decode an input payload. Returns `Ok(None)` when `kind` is not an input kind.
    pub fn decode(kind: u32, payload: &[u8]) -> Result<Option<Self>, PayloadError> {
        let event = match kind {
            kind::MOUSE_MOVE => {
                require("MOUSE_MOVE", payload, MouseMove::SIZE)?;
                InputEvent::MouseMove(MouseMove {
                    x: i32_at(payload, 0),
                    y: i32_at(payload, 4),
                    modifiers: u32_at(payload, 8),
                })
            }
            kind::MOUSE_CLICK => {
                require("MOUSE_CLICK", payload, MouseClick::SIZE)?;
                InputEvent::MouseClick(MouseClick {
                    x: i32_at(payload, 0),
                    y: i32_at(payload, 4),
                    modifiers: u32_at(payload, 8),
                    button: u32_at(payload, 12),
                    mouse_up: payload[16] != 0,
                    click_count: i32_at(payload, 17),
                })
            }
            kind::MOUSE_WHEEL => {
                require("MOUSE_WHEEL", payload, MouseWheel::SIZE)?;
                InputEvent::MouseWheel(MouseWheel {
                    x: i32_at(payload, 0),
                    y: i32_at(payload, 4),
                    modifiers: u32_at(payload, 8),
                    delta_x: i32_at(payload, 12),
                    delta_y: i32_at(payload, 16),
                })
            }
            kind::KEY_EVENT => {
                require("KEY_EVENT", payload, KeyEvent::SIZE)?;
                InputEvent::Key(KeyEvent {
                    event_type: u32_at(payload, 0),
                    modifiers: u32_at(payload, 4),
                    windows_key_code: i32_at(payload, 8),
                    native_key_code: i32_at(payload, 12),
                    is_system_key: payload[16] != 0,
                    character: u16::from_le_bytes([payload[17], payload[18]]),
                })
            }
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_surface_layout() {
        let msg = CreateSurface {
            width: 64,
            height: 32,
            url: "about:blank".into(),
        };
        let bytes = msg.encode();
        assert_eq!(&bytes[..8], &[64, 0, 0, 0, 32, 0, 0, 0]);
        assert_eq!(&bytes[8..], b"about:blank");
        assert_eq!(CreateSurface::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn create_surface_needs_dimensions() {
        assert_eq!(
            CreateSurface::decode(&[1, 0, 0]).unwrap_err(),
            PayloadError::Truncated {
                record: "CREATE_BROWSER",
                len: 3,
                needed: 8
            }
        );
    }

    #[test]
    fn packed_sizes_match_records() {
        let click = InputEvent::MouseClick(MouseClick {
            x: 1,
            y: 2,
            modifiers: 0,
            button: 2,
            mouse_up: true,
            click_count: 2,
        });
        let key = InputEvent::Key(KeyEvent {
            event_type: 3,
            modifiers: 0,
            windows_key_code: 65,
            native_key_code: 30,
            is_system_key: false,
            character: u16::from(b'a'),
        });
        let wheel = InputEvent::MouseWheel(MouseWheel {
            x: 0,
            y: 0,
            modifiers: 0,
            delta_x: 0,
            delta_y: -120,
        });
        let mv = InputEvent::MouseMove(MouseMove {
            x: 5,
            y: 6,
            modifiers: 1,
        });

        assert_eq!(click.encode().len(), MouseClick::SIZE);
        assert_eq!(key.encode().len(), KeyEvent::SIZE);
        assert_eq!(wheel.encode().len(), MouseWheel::SIZE);
        assert_eq!(mv.encode().len(), MouseMove::SIZE);

        for event in [click, key, wheel, mv] {
            let decoded = InputEvent::decode(event.kind(), &event.encode()).unwrap();
            assert_eq!(decoded, Some(event));
        }
    }

    #[test]
    fn click_count_follows_unaligned_flag() {
        let click = InputEvent::MouseClick(MouseClick {
            x: 0,
            y: 0,
            modifiers: 0,
            button: 0,
            mouse_up: false,
            click_count: 3,
        });
        let bytes = click.encode();
        assert_eq!(bytes[16], 0);
        assert_eq!(&bytes[17..21], &[3, 0, 0, 0]);
    }

    #[test]
    fn short_input_is_rejected() {
        let err = InputEvent::decode(kind::KEY_EVENT, &[0; 18]).unwrap_err();
        assert!(matches!(err, PayloadError::Truncated { needed: 19, .. }));
    }

    #[test]
    fn non_input_kind_is_none() {
        assert_eq!(InputEvent::decode(kind::NAVIGATE, b"x").unwrap(), None);
    }

    #[test]
    fn resize_and_url() {
        let r = Resize {
            width: 1280,
            height: 720,
        };
        assert_eq!(Resize::decode(&r.encode()).unwrap(), r);
        assert_eq!(decode_url(b"https://a.test").unwrap(), "https://a.test");
        assert!(decode_url(&[0xC3]).is_err());
    }
}
