use std::{collections::BTreeSet, fmt::Write as _, net::IpAddr};

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{EngineError, Result};

/// Well-known event type tags. The set is open: modules may emit any
/// non-empty type string.
pub mod event_type {
    pub const SCAN: &str = "SCAN";
    pub const DNS_NAME: &str = "DNS_NAME";
    pub const IP_ADDRESS: &str = "IP_ADDRESS";
    pub const URL: &str = "URL";
    pub const URL_UNVERIFIED: &str = "URL_UNVERIFIED";
    pub const OPEN_TCP_PORT: &str = "OPEN_TCP_PORT";
    pub const RAW_DNS_RECORD: &str = "RAW_DNS_RECORD";
    pub const FILESYSTEM: &str = "FILESYSTEM";
    pub const RAW_TEXT: &str = "RAW_TEXT";
    pub const FINDING: &str = "FINDING";
    pub const VULNERABILITY: &str = "VULNERABILITY";

    /// Subscribes a module to every event type.
    pub const WILDCARD: &str = "*";
}

pub const DEFAULT_CONTEXT: &str = "{module} discovered {event.type}: {event.data}";

/// What a module hands to `ModuleContext::emit`. Tags and context may be
/// freely shaped here; once the engine turns it into an [`Event`] it is
/// frozen.
#[derive(Debug, Clone)]
pub struct EmitRequest {
    pub event_type: String,
    pub data: Value,
    pub tags: BTreeSet<String>,
    pub context: Option<String>,
    /// Restart the scope distance at 0 regardless of the parent.
    pub reseed: bool,
}

impl EmitRequest {
    pub fn new(event_type: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            tags: BTreeSet::new(),
            context: None,
            reseed: false,
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn context(mut self, template: impl Into<String>) -> Self {
        self.context = Some(template.into());
        self
    }

    pub fn reseed(mut self) -> Self {
        self.reseed = true;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Facets {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub netloc: Option<String>,
}

/// One discovered fact plus its provenance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    id: String,
    uuid: String,
    #[serde(rename = "type")]
    event_type: String,
    data: Value,
    host: Option<String>,
    port: Option<u16>,
    netloc: Option<String>,
    reverse_host: Option<String>,
    scope_distance: u32,
    #[serde(default)]
    reseeded: bool,
    tags: BTreeSet<String>,
    parent: Option<String>,
    parent_chain: Vec<String>,
    discovery_path: Vec<String>,
    module: String,
    module_sequence: u64,
    discovery_context: String,
    scan: String,
    timestamp: NaiveDateTime,
}

impl Event {
    /// Validates and normalises the request, derives facets and provenance.
    /// Scope is left at 0 until the dispatcher evaluates it.
    pub(crate) fn create(
        request: EmitRequest,
        parent: Option<&Event>,
        module: &str,
        module_sequence: u64,
        scan: &str,
    ) -> Result<Self> {
        let EmitRequest {
            event_type,
            data,
            tags,
            context,
            ..
        } = request;

        let data = normalize_payload(&event_type, data)?;
        let id = content_id(&event_type, &data);
        let facets = derive_facets(&event_type, &data);

        let template = context.as_deref().unwrap_or(DEFAULT_CONTEXT);
        let discovery_context =
            render_context(template, module, &event_type, &data, facets.host.as_deref());

        let (parent_id, parent_chain, mut discovery_path) = match parent {
            Some(p) => {
                let mut chain = p.parent_chain.clone();
                chain.push(p.id.clone());
                (Some(p.id.clone()), chain, p.discovery_path.clone())
            }
            None => (None, Vec::new(), Vec::new()),
        };
        discovery_path.push(discovery_context.clone());

        Ok(Self {
            uuid: format!("{}:{}", event_type, uuid::Uuid::new_v4()),
            id,
            reverse_host: facets.host.as_ref().map(|h| h.chars().rev().collect()),
            host: facets.host,
            port: facets.port,
            netloc: facets.netloc,
            event_type,
            data,
            scope_distance: 0,
            reseeded: false,
            tags,
            parent: parent_id,
            parent_chain,
            discovery_path,
            module: module.to_string(),
            module_sequence,
            discovery_context,
            scan: scan.to_string(),
            timestamp: Utc::now().naive_utc(),
        })
    }

    pub(crate) fn set_scope(&mut self, distance: u32, reseeded: bool) {
        self.scope_distance = distance;
        self.reseeded = reseeded;
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn data_str(&self) -> Option<&str> {
        self.data.as_str()
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn netloc(&self) -> Option<&str> {
        self.netloc.as_deref()
    }

    pub fn reverse_host(&self) -> Option<&str> {
        self.reverse_host.as_deref()
    }

    pub fn scope_distance(&self) -> u32 {
        self.scope_distance
    }

    pub fn reseeded(&self) -> bool {
        self.reseeded
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn parent_chain(&self) -> &[String] {
        &self.parent_chain
    }

    pub fn discovery_path(&self) -> &[String] {
        &self.discovery_path
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn module_sequence(&self) -> u64 {
        self.module_sequence
    }

    pub fn discovery_context(&self) -> &str {
        &self.discovery_context
    }

    pub fn scan(&self) -> &str {
        &self.scan
    }

    pub fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    pub fn is_seed(&self) -> bool {
        self.parent.is_none()
    }
}

/// `<TYPE>:<first 40 hex chars of sha256(canonical data)>`.
pub fn content_id(event_type: &str, data: &Value) -> String {
    // serde_json keeps object keys sorted, so this is the canonical form
    let canonical = serde_json::to_string(data).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut id = String::with_capacity(event_type.len() + 41);
    id.push_str(event_type);
    id.push(':');
    for byte in &digest[..20] {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

/// Unwraps `{"<TYPE>": data}`, then validates and canonicalises payloads of
/// the well-known network types.
pub fn normalize_payload(event_type: &str, data: Value) -> Result<Value> {
    if event_type.trim().is_empty() {
        return Err(invalid(event_type, "empty event type"));
    }

    let data = unwrap_type_key(event_type, data);

    match event_type {
        event_type::DNS_NAME => {
            let raw = data
                .as_str()
                .ok_or_else(|| invalid(event_type, "payload must be a string"))?;
            Ok(Value::String(normalize_host(raw).ok_or_else(|| {
                invalid(event_type, format!("{raw:?} is not a host name"))
            })?))
        }
        event_type::IP_ADDRESS => {
            let raw = data
                .as_str()
                .ok_or_else(|| invalid(event_type, "payload must be a string"))?;
            let ip: IpAddr = raw
                .trim()
                .parse()
                .map_err(|_| invalid(event_type, format!("{raw:?} is not an IP address")))?;
            Ok(Value::String(ip.to_string()))
        }
        event_type::URL | event_type::URL_UNVERIFIED => {
            let raw = data
                .as_str()
                .ok_or_else(|| invalid(event_type, "payload must be a string"))?;
            let url = Url::parse(raw.trim())
                .map_err(|e| invalid(event_type, format!("{raw:?}: {e}")))?;
            if url.host_str().is_none() {
                return Err(invalid(event_type, format!("{raw:?} has no host")));
            }
            Ok(Value::String(url.to_string()))
        }
        event_type::OPEN_TCP_PORT => {
            let raw = data
                .as_str()
                .ok_or_else(|| invalid(event_type, "payload must be a string"))?;
            let (host, port) = split_host_port(raw)
                .ok_or_else(|| invalid(event_type, format!("{raw:?} is not host:port")))?;
            Ok(Value::String(join_host_port(&host, port)))
        }
        _ => Ok(data),
    }
}

pub fn derive_facets(event_type: &str, data: &Value) -> Facets {
    match event_type {
        event_type::DNS_NAME | event_type::IP_ADDRESS => Facets {
            host: data.as_str().map(str::to_string),
            port: None,
            netloc: None,
        },
        event_type::URL | event_type::URL_UNVERIFIED => {
            let Some(url) = data.as_str().and_then(|s| Url::parse(s).ok()) else {
                return Facets::default();
            };
            let host = url
                .host_str()
                .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string());
            let port = url.port_or_known_default();
            let netloc = match (&host, port) {
                (Some(h), Some(p)) => Some(join_host_port(h, p)),
                (Some(h), None) => Some(h.clone()),
                _ => None,
            };
            Facets { host, port, netloc }
        }
        event_type::OPEN_TCP_PORT => match data.as_str().and_then(split_host_port) {
            Some((host, port)) => Facets {
                netloc: Some(join_host_port(&host, port)),
                host: Some(host),
                port: Some(port),
            },
            None => Facets::default(),
        },
        _ => {
            let host = data
                .get("host")
                .and_then(Value::as_str)
                .and_then(normalize_host);
            let port = data
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok());
            let netloc = match (&host, port) {
                (Some(h), Some(p)) => Some(join_host_port(h, p)),
                _ => None,
            };
            Facets { host, port, netloc }
        }
    }
}

pub fn render_context(
    template: &str,
    module: &str,
    event_type: &str,
    data: &Value,
    host: Option<&str>,
) -> String {
    let data = match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    template
        .replace("{module}", module)
        .replace("{event.type}", event_type)
        .replace("{event.data}", &data)
        .replace("{event.host}", host.unwrap_or(""))
}

/// Lower-cases and strips a trailing dot. IPs are returned in canonical
/// form. Returns `None` for anything that can't be a host.
pub fn normalize_host(raw: &str) -> Option<String> {
    let host = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Some(ip.to_string());
    }
    let valid = !host.is_empty()
        && host.len() <= 253
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '*')
        });
    valid.then_some(host)
}

pub fn split_host_port(raw: &str) -> Option<(String, u16)> {
    let raw = raw.trim();
    let (host, port) = if let Some(rest) = raw.strip_prefix('[') {
        let (host, port) = rest.split_once("]:")?;
        (host, port)
    } else {
        raw.rsplit_once(':')?
    };
    let port: u16 = port.parse().ok()?;
    Some((normalize_host(host)?, port))
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn unwrap_type_key(event_type: &str, data: Value) -> Value {
    match data {
        Value::Object(mut map) if map.len() == 1 && map.contains_key(event_type) => {
            map.remove(event_type).unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn invalid(event_type: &str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidEvent {
        event_type: event_type.to_string(),
        reason: reason.into(),
    }
}
