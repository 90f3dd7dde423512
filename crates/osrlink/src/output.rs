use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use osrlink_session::SessionEvent;
use osrlink_wire::kind::kind_name;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize, Default)]
struct EventOutput {
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    seq: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    /// First pixel as `b,g,r,a`.
    #[serde(skip_serializing_if = "Option::is_none")]
    first_pixel: Option<[u8; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind_name: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    timestamp: String,
}

impl EventOutput {
    fn from_event(event: &SessionEvent) -> Self {
        let base = EventOutput {
            timestamp: now_unix_seconds(),
            ..EventOutput::default()
        };
        match event {
            SessionEvent::Frame(frame) => EventOutput {
                event: "frame",
                seq: Some(frame.seq),
                width: Some(frame.width),
                height: Some(frame.height),
                first_pixel: frame
                    .pixels
                    .get(..4)
                    .and_then(|px| <[u8; 4]>::try_from(px).ok()),
                ..base
            },
            SessionEvent::SurfaceCreated => EventOutput {
                event: "surface-created",
                ..base
            },
            SessionEvent::ShutdownAck => EventOutput {
                event: "shutdown-ack",
                ..base
            },
            SessionEvent::RemoteError(message) => EventOutput {
                event: "remote-error",
                detail: Some(message.clone()),
                ..base
            },
            SessionEvent::UnhandledRequest(call) => EventOutput {
                event: "unhandled-request",
                detail: Some(format!("{}({} args)", call.name, call.args.len())),
                ..base
            },
            SessionEvent::Message(envelope) => EventOutput {
                event: "message",
                kind: Some(envelope.kind),
                kind_name: Some(kind_name(envelope.kind)),
                detail: Some(payload_preview(envelope.payload.as_ref())),
                ..base
            },
            SessionEvent::Degraded(reason) => EventOutput {
                event: "degraded",
                detail: Some(reason.to_string()),
                ..base
            },
        }
    }

    fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(seq) = self.seq {
            parts.push(format!("seq={seq}"));
        }
        if let (Some(w), Some(h)) = (self.width, self.height) {
            parts.push(format!("size={w}x{h}"));
        }
        if let Some([b, g, r, a]) = self.first_pixel {
            parts.push(format!("rgba=#{r:02x}{g:02x}{b:02x}{a:02x}"));
        }
        if let (Some(kind), Some(name)) = (self.kind, self.kind_name) {
            parts.push(format!("kind={kind} ({name})"));
        }
        if let Some(detail) = &self.detail {
            parts.push(detail.clone());
        }
        parts.join(" ")
    }
}

pub fn print_event(event: &SessionEvent, format: OutputFormat) {
    if let OutputFormat::Raw = format {
        match event {
            SessionEvent::Frame(frame) => print_raw(&frame.pixels),
            SessionEvent::Message(envelope) => print_raw(envelope.payload.as_ref()),
            _ => {}
        }
        return;
    }

    let out = EventOutput::from_event(event);
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "DETAIL"])
                .add_row(vec![out.event.to_string(), out.summary()]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("{} {}", out.event, out.summary());
        }
    }
}

/// End-of-run report for `host`.
#[derive(Serialize, Debug)]
pub struct SessionSummary {
    pub event: &'static str,
    pub pid: Option<u32>,
    pub state: String,
    pub frames: usize,
    pub messages: usize,
    pub exit_code: Option<i32>,
    pub last_error: Option<String>,
}

pub fn print_summary(summary: &SessionSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(summary),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["STATE", "PID", "FRAMES", "MESSAGES", "EXIT", "LAST ERROR"])
                .add_row(vec![
                    summary.state.clone(),
                    display_opt(summary.pid),
                    summary.frames.to_string(),
                    summary.messages.to_string(),
                    display_opt(summary.exit_code),
                    summary.last_error.clone().unwrap_or_else(|| "-".to_string()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "session {} pid={} frames={} messages={} exit={}",
                summary.state,
                display_opt(summary.pid),
                summary.frames,
                summary.messages,
                display_opt(summary.exit_code)
            );
            if let Some(err) = &summary.last_error {
                println!("  last error: {err}");
            }
        }
        OutputFormat::Raw => {}
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn display_opt<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use osrlink_session::DegradeReason;
    use osrlink_shm::Frame;
    use osrlink_wire::Envelope;

    use super::*;

    #[test]
    fn frame_event_reports_first_pixel_as_rgba() {
        let frame = Frame {
            seq: 4,
            width: 2,
            height: 1,
            pixels: vec![0, 0, 255, 255, 0, 0, 255, 255],
        };
        let out = EventOutput::from_event(&SessionEvent::Frame(frame));
        assert_eq!(out.event, "frame");
        assert_eq!(out.summary(), "seq=4 size=2x1 rgba=#ff0000ff");

        let json = serde_json::to_value(&out).expect("serialize");
        assert_eq!(json["first_pixel"], serde_json::json!([0, 0, 255, 255]));
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn message_event_names_its_kind() {
        let env = Envelope::new(osrlink_wire::kind::HOST_READY, "hi".as_bytes().to_vec());
        let out = EventOutput::from_event(&SessionEvent::Message(env));
        assert_eq!(out.summary(), "kind=102 (HOST_READY) hi");
    }

    #[test]
    fn degraded_event_carries_reason() {
        let out = EventOutput::from_event(&SessionEvent::Degraded(
            DegradeReason::OperationTimeout("surface creation"),
        ));
        assert_eq!(out.detail.as_deref(), Some("surface creation timed out"));
    }
}
