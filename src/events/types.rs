use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::identity::ServiceIdentity;

/// Event vocabulary as sent on the wire (`"type"` field).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Log,
    Registered,
    Unregistered,
    ServiceStarting,
    FrontendSettingsChanged,
    DispatcherSettingsChanged,
    StarsChanged,
    AddedJar,
    RemovedJar,
    StaticDataChanged,
    DataStoresChanged,
    DataStoreChanged,
    DataStoreProgress,
    ProcessInfos,
    Other(String),
}

impl EventKind {
    /// Every kind in the vocabulary, in wire-table order.
    pub const KNOWN: [EventKind; 14] = [
        EventKind::Log,
        EventKind::Registered,
        EventKind::Unregistered,
        EventKind::ServiceStarting,
        EventKind::FrontendSettingsChanged,
        EventKind::DispatcherSettingsChanged,
        EventKind::StarsChanged,
        EventKind::AddedJar,
        EventKind::RemovedJar,
        EventKind::StaticDataChanged,
        EventKind::DataStoresChanged,
        EventKind::DataStoreChanged,
        EventKind::DataStoreProgress,
        EventKind::ProcessInfos,
    ];

    pub fn parse(s: &str) -> Self {
        match s {
            "LOG" => EventKind::Log,
            "REGISTERED" => EventKind::Registered,
            "UNREGISTERED" => EventKind::Unregistered,
            "SERVICE-STARTING" => EventKind::ServiceStarting,
            "SETTINGS-FRONTEND-CHANGED" => EventKind::FrontendSettingsChanged,
            "SETTINGS-DISPATCHER-CHANGED" => EventKind::DispatcherSettingsChanged,
            "STARS-CHANGED" => EventKind::StarsChanged,
            "ADDED-JAR" => EventKind::AddedJar,
            "REMOVED-JAR" => EventKind::RemovedJar,
            "STATIC-DATA-CHANGED" => EventKind::StaticDataChanged,
            "DATA-STORES-CHANGED" => EventKind::DataStoresChanged,
            "DATA-STORE-CHANGED" => EventKind::DataStoreChanged,
            "DATA-STORE-PROGRESS" => EventKind::DataStoreProgress,
            "PROCESS-INFOS" => EventKind::ProcessInfos,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Log => "LOG",
            EventKind::Registered => "REGISTERED",
            EventKind::Unregistered => "UNREGISTERED",
            EventKind::ServiceStarting => "SERVICE-STARTING",
            EventKind::FrontendSettingsChanged => "SETTINGS-FRONTEND-CHANGED",
            EventKind::DispatcherSettingsChanged => "SETTINGS-DISPATCHER-CHANGED",
            EventKind::StarsChanged => "STARS-CHANGED",
            EventKind::AddedJar => "ADDED-JAR",
            EventKind::RemovedJar => "REMOVED-JAR",
            EventKind::StaticDataChanged => "STATIC-DATA-CHANGED",
            EventKind::DataStoresChanged => "DATA-STORES-CHANGED",
            EventKind::DataStoreChanged => "DATA-STORE-CHANGED",
            EventKind::DataStoreProgress => "DATA-STORE-PROGRESS",
            EventKind::ProcessInfos => "PROCESS-INFOS",
            EventKind::Other(s) => s.as_str(),
        }
    }

    /// Kinds whose payload carries a service identity that needs normalizing.
    pub fn carries_service_id(&self) -> bool {
        matches!(self, EventKind::Registered | EventKind::Unregistered)
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

/// Raw `{type, data}` unit delivered by the channel or the poll endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmittedEvent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: Value,
    /// Server emit time in epoch millis; only the poll endpoint relies on it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl EmittedEvent {
    /// Parse a channel/poll payload. Anything that is not a JSON event (gateway HTML pages,
    /// empty bodies, garbage) becomes the empty event so the receive loops keep running.
    pub fn parse_lenient(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() || trimmed.starts_with('<') {
            return Self::default();
        }
        let Ok(Value::Object(mut map)) = serde_json::from_str::<Value>(trimmed) else {
            return Self::default();
        };
        let kind = match map.remove("type") {
            Some(Value::String(s)) => s,
            _ => String::new(),
        };
        let data = map.remove("data").unwrap_or(Value::Null);
        let timestamp = map.get("timestamp").and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)));
        EmittedEvent { kind, data, timestamp }
    }

    pub fn is_empty(&self) -> bool { self.kind.is_empty() }

    pub fn event_kind(&self) -> EventKind { EventKind::parse(&self.kind) }

    /// Registration events name the service as `id` or `serviceId`, as text or object.
    /// Rewrite it in place to the normalized identity object under `id`.
    pub fn normalize(mut self) -> Self {
        if self.event_kind().carries_service_id() {
            if let Value::Object(map) = &mut self.data {
                let raw = map
                    .get("id")
                    .filter(|v| !v.is_null())
                    .or_else(|| map.get("serviceId"))
                    .cloned()
                    .unwrap_or(Value::Null);
                let id = ServiceIdentity::from_value(&raw);
                if let Ok(v) = serde_json::to_value(&id) {
                    map.insert("id".to_string(), v);
                }
            }
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    #[serde(default)]
    pub log: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterEvent {
    pub id: ServiceIdentity,
    #[serde(default, alias = "serviceInstanceId")]
    pub instance_id: Option<String>,
    #[serde(default, alias = "baseUrl")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JarEvent {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataStoreEvent {
    /// Name of the data store.
    #[serde(default)]
    pub name: String,
    /// Path within the data store that changed.
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressEvent {
    pub id: String,
    pub count_done: u64,
    pub count: u64,
    pub size_done: u64,
    pub size: u64,
    pub message: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessInfo {
    pub pid: Option<i64>,
    pub virtual_memory_size: Option<String>,
    pub resident_memory_size: Option<String>,
    pub meta_space: Option<String>,
    pub heap_size: Option<String>,
    pub heap_used: Option<String>,
    pub heap_used_percent: Option<f64>,
    pub min_heap_used: Option<String>,
    pub uptime: Option<String>,
    pub sys_mem: Option<String>,
    pub sys_mem_available: Option<String>,
    pub sys_mem_available_percent: Option<Value>,
}

/// Decoded event. Handlers registered under a kind receive the matching variant.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Log(LogEvent),
    Registered(RegisterEvent),
    Unregistered(RegisterEvent),
    ServiceStarting(RegisterEvent),
    FrontendSettingsChanged,
    DispatcherSettingsChanged,
    StarsChanged,
    AddedJar(JarEvent),
    RemovedJar(JarEvent),
    StaticDataChanged,
    DataStoresChanged,
    DataStoreChanged(DataStoreEvent),
    DataStoreProgress(ProgressEvent),
    ProcessInfos(BTreeMap<String, ProcessInfo>),
    Other { kind: String, data: Value },
}

impl Event {
    /// Decode an already normalized raw event into its typed form.
    pub fn decode(raw: &EmittedEvent) -> Result<Event, serde_json::Error> {
        fn de<T: serde::de::DeserializeOwned>(v: &Value) -> Result<T, serde_json::Error> {
            // Several payloads arrive as null/absent on the wire; decode those as `{}`.
            match v {
                Value::Null => serde_json::from_value(Value::Object(Map::new())),
                other => T::deserialize(other),
            }
        }
        let data = &raw.data;
        Ok(match raw.event_kind() {
            EventKind::Log => Event::Log(de(data)?),
            EventKind::Registered => Event::Registered(de(data)?),
            EventKind::Unregistered => Event::Unregistered(de(data)?),
            EventKind::ServiceStarting => Event::ServiceStarting(de(data)?),
            EventKind::FrontendSettingsChanged => Event::FrontendSettingsChanged,
            EventKind::DispatcherSettingsChanged => Event::DispatcherSettingsChanged,
            EventKind::StarsChanged => Event::StarsChanged,
            EventKind::AddedJar => Event::AddedJar(de(data)?),
            EventKind::RemovedJar => Event::RemovedJar(de(data)?),
            EventKind::StaticDataChanged => Event::StaticDataChanged,
            EventKind::DataStoresChanged => Event::DataStoresChanged,
            EventKind::DataStoreChanged => Event::DataStoreChanged(de(data)?),
            EventKind::DataStoreProgress => Event::DataStoreProgress(de(data)?),
            EventKind::ProcessInfos => Event::ProcessInfos(de(data)?),
            EventKind::Other(kind) => Event::Other { kind, data: data.clone() },
        })
    }
}
