use std::{net::IpAddr, sync::Arc};

use async_trait::async_trait;

use crate::{
    events::{EmitRequest, Event, event_type},
    module::{Module, ModuleContext},
};

/// Emits the host of every URL as a `DNS_NAME` or `IP_ADDRESS`.
pub struct UrlHosts;

#[async_trait]
impl Module for UrlHosts {
    fn name(&self) -> &str {
        "url_hosts"
    }

    fn watched_events(&self) -> &[&'static str] {
        &[event_type::URL, event_type::URL_UNVERIFIED]
    }

    fn produced_events(&self) -> &[&'static str] {
        &[event_type::DNS_NAME, event_type::IP_ADDRESS]
    }

    fn incoming_dedup_key(&self, event: &Event) -> Option<String> {
        event.host().map(str::to_string)
    }

    async fn handle_event(&self, event: Arc<Event>, ctx: &ModuleContext) -> anyhow::Result<()> {
        let Some(host) = event.host() else {
            return Ok(());
        };
        let kind = if host.parse::<IpAddr>().is_ok() {
            event_type::IP_ADDRESS
        } else {
            event_type::DNS_NAME
        };
        ctx.emit(&event, EmitRequest::new(kind, host))?;
        Ok(())
    }
}
