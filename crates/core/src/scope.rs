use std::{fmt::Write as _, net::IpAddr};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use url::Url;

use crate::{
    error::{EngineError, Result},
    events::{EmitRequest, Event, event_type, normalize_host, split_host_port},
};

/// Scope definition for one scan. Whitelist defaults to the seeds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Target {
    pub name: String,
    pub strict_scope: bool,
    pub seeds: Vec<String>,
    pub whitelist: Vec<String>,
    pub blacklist: Vec<String>,
    pub hash: String,
    pub scope_hash: String,
    pub seed_hash: String,
    pub whitelist_hash: String,
    pub blacklist_hash: String,
}

impl Target {
    pub fn new<S: Into<String>>(seeds: impl IntoIterator<Item = S>) -> Result<Self> {
        TargetBuilder::new(seeds).build()
    }

    pub fn builder<S: Into<String>>(seeds: impl IntoIterator<Item = S>) -> TargetBuilder {
        TargetBuilder::new(seeds)
    }

    pub fn in_whitelist(&self, host: &str) -> bool {
        self.whitelist
            .iter()
            .any(|entry| host_matches(entry, host, self.strict_scope))
    }

    pub fn in_blacklist(&self, host: &str) -> bool {
        self.blacklist
            .iter()
            .any(|entry| host_matches(entry, host, self.strict_scope))
    }

    /// Seed events for this target, in seed order.
    pub fn seed_requests(&self) -> Result<Vec<EmitRequest>> {
        self.seeds
            .iter()
            .map(|seed| {
                let (event_type, data) = classify_seed(seed)?;
                Ok(EmitRequest::new(event_type, data).tag("seed"))
            })
            .collect()
    }

    pub fn seed_types(&self) -> Result<Vec<&'static str>> {
        let mut types = Vec::new();
        for seed in &self.seeds {
            let (event_type, _) = classify_seed(seed)?;
            if !types.contains(&event_type) {
                types.push(event_type);
            }
        }
        Ok(types)
    }
}

pub struct TargetBuilder {
    name: String,
    strict_scope: bool,
    seeds: Vec<String>,
    whitelist: Option<Vec<String>>,
    blacklist: Vec<String>,
}

impl TargetBuilder {
    pub fn new<S: Into<String>>(seeds: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: "Default Target".to_string(),
            strict_scope: false,
            seeds: seeds.into_iter().map(Into::into).collect(),
            whitelist: None,
            blacklist: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn strict_scope(mut self, strict: bool) -> Self {
        self.strict_scope = strict;
        self
    }

    pub fn whitelist<S: Into<String>>(mut self, entries: impl IntoIterator<Item = S>) -> Self {
        self.whitelist = Some(entries.into_iter().map(Into::into).collect());
        self
    }

    pub fn blacklist<S: Into<String>>(mut self, entries: impl IntoIterator<Item = S>) -> Self {
        self.blacklist = entries.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<Target> {
        let seeds = normalize_entries(self.seeds.iter().map(String::as_str), false)?;
        // seeds keep their original spelling, scope lists are reduced to hosts
        let seed_hosts = normalize_entries(self.seeds.iter().map(String::as_str), true)?;
        let whitelist = match self.whitelist {
            Some(entries) => normalize_entries(entries.iter().map(String::as_str), true)?,
            None => seed_hosts,
        };
        let blacklist = normalize_entries(self.blacklist.iter().map(String::as_str), true)?;

        let seed_hash = hash_entries(&seeds);
        let whitelist_hash = hash_entries(&whitelist);
        let blacklist_hash = hash_entries(&blacklist);
        let scope_hash = hash_entries(&[
            whitelist_hash.clone(),
            blacklist_hash.clone(),
            self.strict_scope.to_string(),
        ]);
        let hash = hash_entries(&[seed_hash.clone(), scope_hash.clone()]);

        Ok(Target {
            name: self.name,
            strict_scope: self.strict_scope,
            seeds,
            whitelist,
            blacklist,
            hash,
            scope_hash,
            seed_hash,
            whitelist_hash,
            blacklist_hash,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeVerdict {
    /// Never routed, never recorded.
    Blacklisted,
    Distance { distance: u32, reseeded: bool },
}

impl ScopeVerdict {
    pub fn distance(&self) -> Option<u32> {
        match self {
            ScopeVerdict::Blacklisted => None,
            ScopeVerdict::Distance { distance, .. } => Some(*distance),
        }
    }
}

/// Pure scope-distance rule, evaluated for every emission.
pub struct ScopeCalculator;

impl ScopeCalculator {
    pub fn compute(
        event: &Event,
        parent: Option<&Event>,
        target: &Target,
        reseed: bool,
    ) -> ScopeVerdict {
        if let Some(host) = event.host() {
            if target.in_blacklist(host) {
                return ScopeVerdict::Blacklisted;
            }
        }

        let parent_distance = parent.map(Event::scope_distance);
        let whitelisted = event.host().is_some_and(|h| target.in_whitelist(h));

        let distance = match parent_distance {
            _ if whitelisted || reseed => 0,
            // every root is the scan's own input, whitelisted or not
            None => 0,
            // same host, or nothing network-shaped, is not a hop
            Some(d) if event.host().is_none() || event.host() == parent.and_then(Event::host) => d,
            Some(d) => d.saturating_add(1),
        };
        let reseeded = distance == 0 && parent_distance.is_some_and(|d| d > 0);

        ScopeVerdict::Distance { distance, reseeded }
    }
}

fn classify_seed(seed: &str) -> Result<(&'static str, Value)> {
    let trimmed = seed.trim();
    let invalid = |reason: &str| EngineError::InvalidSeed {
        seed: seed.to_string(),
        reason: reason.to_string(),
    };

    if trimmed.contains("://") {
        let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
        return Ok((event_type::URL, Value::String(url.to_string())));
    }
    if let Ok(ip) = trimmed.parse::<IpAddr>() {
        return Ok((event_type::IP_ADDRESS, Value::String(ip.to_string())));
    }
    if let Some((host, port)) = split_host_port(trimmed) {
        return Ok((event_type::OPEN_TCP_PORT, Value::String(format!("{host}:{port}"))));
    }
    match normalize_host(trimmed) {
        Some(host) => Ok((event_type::DNS_NAME, Value::String(host))),
        None => Err(invalid("not a URL, IP address, host:port or host name")),
    }
}

/// `reduce_to_host` maps URLs and host:port entries to their host.
fn normalize_entries<'a>(
    entries: impl Iterator<Item = &'a str>,
    reduce_to_host: bool,
) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for entry in entries {
        let (event_type, data) = classify_seed(entry)?;
        let normalized = match (reduce_to_host, event_type) {
            (false, _) => data.as_str().unwrap_or_default().to_string(),
            (true, event_type::URL) => Url::parse(data.as_str().unwrap_or_default())
                .ok()
                .and_then(|u| u.host_str().and_then(normalize_host))
                .ok_or_else(|| EngineError::InvalidSeed {
                    seed: entry.to_string(),
                    reason: "URL has no host".to_string(),
                })?,
            (true, event_type::OPEN_TCP_PORT) => split_host_port(data.as_str().unwrap_or_default())
                .map(|(host, _)| host)
                .unwrap_or_default(),
            (true, _) => data.as_str().unwrap_or_default().to_string(),
        };
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    Ok(out)
}

fn host_matches(entry: &str, host: &str, strict: bool) -> bool {
    if entry == host {
        return true;
    }
    if strict || entry.parse::<IpAddr>().is_ok() {
        return false;
    }
    host.len() > entry.len()
        && host.ends_with(entry)
        && host.as_bytes()[host.len() - entry.len() - 1] == b'.'
}

fn hash_entries(entries: &[String]) -> String {
    let mut sorted: Vec<&str> = entries.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let digest = Sha256::digest(sorted.join("\n").as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}
