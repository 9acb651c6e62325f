use chrono::{Local, TimeZone};
use serde_json::Value;
use terminal_size::{terminal_size, Height, Width};

use crate::events::{EmittedEvent, EventKind};

/// One event as a single line: `HH:MM:SS KIND summary`, elided to `max_width` characters.
pub fn format_event(event: &EmittedEvent, max_width: usize) -> String {
    let when = event
        .timestamp
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Local::now)
        .format("%H:%M:%S");
    let summary = summarize(event);
    let line = if summary.is_empty() {
        format!("{} {}", when, event.kind)
    } else {
        format!("{} {} {}", when, event.kind, summary)
    };
    fit_line_to_width(&line, max_width)
}

fn text(v: &Value, key: &str) -> String {
    match v.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn summarize(event: &EmittedEvent) -> String {
    let data = &event.data;
    match event.event_kind() {
        EventKind::Log => text(data, "log").lines().next().unwrap_or_default().to_string(),
        EventKind::Registered | EventKind::Unregistered | EventKind::ServiceStarting => {
            let id = data.get("id").map(|id| text(id, "combined")).filter(|s| !s.is_empty()).unwrap_or_else(|| text(data, "serviceId"));
            let mut s = id;
            for key in ["instanceId", "url"] {
                let v = text(data, key);
                if !v.is_empty() {
                    s.push(' ');
                    s.push_str(&v);
                }
            }
            s
        }
        EventKind::AddedJar | EventKind::RemovedJar => text(data, "name"),
        EventKind::DataStoreChanged => format!("{}:{}", text(data, "name"), text(data, "path")),
        EventKind::DataStoreProgress => {
            let mut s = format!("{} {}/{}", text(data, "id"), text(data, "countDone"), text(data, "count"));
            let msg = text(data, "error");
            let msg = if msg.is_empty() { text(data, "message") } else { msg };
            if !msg.is_empty() {
                s.push(' ');
                s.push_str(&msg);
            }
            s
        }
        EventKind::ProcessInfos => match data {
            Value::Object(m) => format!("{} processes", m.len()),
            _ => String::new(),
        },
        EventKind::Other(_) if !data.is_null() => data.to_string(),
        _ => String::new(),
    }
}

pub fn get_terminal_width() -> usize {
    match terminal_size() {
        Some((Width(w), Height(_))) if w > 4 => (w - 4) as usize,
        _ => 120,
    }
}

/// Elide the end of an over-long line, counting characters rather than bytes.
pub fn fit_line_to_width(s: &str, maxw: usize) -> String {
    if s.chars().count() <= maxw {
        return s.to_string();
    }
    if maxw == 0 {
        return String::new();
    }
    let mut out: String = s.chars().take(maxw - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ev(kind: &str, data: Value) -> EmittedEvent {
        EmittedEvent { kind: kind.into(), data, timestamp: Some(0) }
    }

    #[test]
    fn summaries_per_kind() {
        let line = format_event(&ev("LOG", json!({"log": "started\nsecond line"})), 200);
        assert!(line.ends_with(" LOG started"), "{}", line);
        let reg = ev("REGISTERED", json!({"serviceId": "core/worker/1.2.0", "instanceId": "i-1"})).normalize();
        assert!(format_event(&reg, 200).ends_with("REGISTERED core/worker/1.2.0 i-1"));
        assert!(format_event(&ev("STARS-CHANGED", Value::Null), 200).ends_with(" STARS-CHANGED"));
        assert!(format_event(&ev("DATA-STORE-PROGRESS", json!({"id": "copy", "countDone": 1, "count": 3})), 200)
            .ends_with("copy 1/3"));
    }

    #[test]
    fn long_lines_are_elided() {
        assert_eq!(fit_line_to_width("abcdef", 4), "abc…");
        assert_eq!(fit_line_to_width("héllo", 5), "héllo");
        assert_eq!(fit_line_to_width("abc", 0), "");
    }
}
