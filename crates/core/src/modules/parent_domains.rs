use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;

use crate::{
    events::{EmitRequest, Event, event_type},
    module::{FilterVerdict, Module, ModuleContext},
};

/// `a.b.example.com` -> `b.example.com`. Recursion up the tree stops at
/// the registrable-looking two-label name.
pub struct ParentDomains;

fn parent_domain(host: &str) -> Option<&str> {
    if host.parse::<IpAddr>().is_ok() {
        return None;
    }
    let (_, parent) = host.split_once('.')?;
    parent.contains('.').then_some(parent)
}

#[async_trait]
impl Module for ParentDomains {
    fn name(&self) -> &str {
        "parent_domains"
    }

    fn watched_events(&self) -> &[&'static str] {
        &[event_type::DNS_NAME]
    }

    fn produced_events(&self) -> &[&'static str] {
        &[event_type::DNS_NAME]
    }

    /// Siblings share a parent, so only the first one is worth handling.
    fn incoming_dedup_key(&self, event: &Event) -> Option<String> {
        let host = event.data_str()?;
        Some(parent_domain(host).unwrap_or(host).to_string())
    }

    async fn filter_event(&self, event: &Event, _ctx: &ModuleContext) -> anyhow::Result<FilterVerdict> {
        Ok(match event.data_str().and_then(parent_domain) {
            Some(_) => FilterVerdict::Accept,
            None => FilterVerdict::reject("no parent domain"),
        })
    }

    async fn handle_event(&self, event: Arc<Event>, ctx: &ModuleContext) -> anyhow::Result<()> {
        if let Some(parent) = event.data_str().and_then(parent_domain) {
            ctx.emit(
                &event,
                EmitRequest::new(event_type::DNS_NAME, parent)
                    .tag("parent-domain")
                    .context("{module} found parent domain {event.data}"),
            )?;
        }
        Ok(())
    }
}
