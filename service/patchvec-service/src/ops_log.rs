//! Structured per-operation JSON-Lines sink: disabled, stdout, or a file
//! path, each write one compact JSON object with a millisecond UTC
//! timestamp.

use chrono::Utc;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

enum Sink {
    Disabled,
    Stdout,
    File(Mutex<File>),
}

pub struct OpsLog {
    sink: Sink,
}

#[derive(Default)]
pub struct OpEvent {
    pub op: &'static str,
    pub tenant: Option<String>,
    pub collection: Option<String>,
    pub latency_ms: f64,
    pub status: &'static str,
    pub error_code: Option<String>,
    pub extras: Vec<(&'static str, serde_json::Value)>,
}

impl OpsLog {
    /// `dest`: `None`/`"null"`/empty disables the sink; `"stdout"` writes to
    /// stdout; anything else is treated as an append-mode file path.
    pub fn configure(dest: Option<&str>) -> std::io::Result<OpsLog> {
        let sink = match dest.map(str::trim) {
            None => Sink::Disabled,
            Some("") | Some("null") | Some("none") => Sink::Disabled,
            Some("stdout") => Sink::Stdout,
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Sink::File(Mutex::new(file))
            }
        };
        Ok(OpsLog { sink })
    }

    pub fn disabled() -> OpsLog {
        OpsLog { sink: Sink::Disabled }
    }

    pub fn emit(&self, event: OpEvent) {
        if matches!(self.sink, Sink::Disabled) {
            return;
        }
        let ts = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string();
        let mut map = serde_json::Map::new();
        map.insert("ts".to_string(), serde_json::json!(ts));
        map.insert("op".to_string(), serde_json::json!(event.op));
        if let Some(t) = &event.tenant {
            map.insert("tenant".to_string(), serde_json::json!(t));
        }
        if let Some(c) = &event.collection {
            map.insert("collection".to_string(), serde_json::json!(c));
        }
        map.insert("latency_ms".to_string(), serde_json::json!(event.latency_ms));
        map.insert("status".to_string(), serde_json::json!(event.status));
        if let Some(code) = &event.error_code {
            map.insert("error_code".to_string(), serde_json::json!(code));
        }
        for (k, v) in event.extras {
            if !v.is_null() {
                map.insert(k.to_string(), v);
            }
        }
        let line = serde_json::to_string(&serde_json::Value::Object(map)).unwrap_or_default();

        match &self.sink {
            Sink::Disabled => {}
            Sink::Stdout => println!("{line}"),
            Sink::File(f) => {
                if let Ok(mut file) = f.lock() {
                    let _ = writeln!(file, "{line}");
                }
            }
        }
    }
}
