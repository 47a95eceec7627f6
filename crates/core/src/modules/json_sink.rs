use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use async_trait::async_trait;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncWriteExt, BufWriter},
    sync::Mutex,
};
use tracing::{debug, info};

use crate::{
    events::{Event, event_type},
    module::{Module, ModuleContext},
};

/// Appends every event, `SCAN` records included, as one storage-form JSON
/// line. A `path` key in `[modules.json]` overrides the constructor path.
pub struct JsonSink {
    path: PathBuf,
    writer: Mutex<Option<(PathBuf, BufWriter<File>)>>,
}

impl JsonSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(None),
        }
    }

    fn resolve_path(&self, ctx: &ModuleContext) -> PathBuf {
        ctx.module_config()
            .and_then(|opts| opts.get("path"))
            .and_then(toml::Value::as_str)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.path.clone())
    }
}

#[async_trait]
impl Module for JsonSink {
    fn name(&self) -> &str {
        "json"
    }

    fn watched_events(&self) -> &[&'static str] {
        &[event_type::WILDCARD]
    }

    async fn setup(&self, ctx: &ModuleContext) -> anyhow::Result<()> {
        let path = self.resolve_path(ctx);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("failed to open {}", path.display()))?;
        info!(path = %path.display(), "writing events");
        *self.writer.lock().await = Some((path, BufWriter::new(file)));
        Ok(())
    }

    async fn handle_event(&self, event: Arc<Event>, _ctx: &ModuleContext) -> anyhow::Result<()> {
        let mut line = event.to_storage_line()?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let (path, writer) = guard.as_mut().context("json sink is not open")?;
        writer
            .write_all(line.as_bytes())
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(event_id = %event.id(), "written");
        Ok(())
    }

    async fn teardown(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        if let Some((path, mut writer)) = self.writer.lock().await.take() {
            writer
                .flush()
                .await
                .with_context(|| format!("failed to flush {}", path.display()))?;
        }
        Ok(())
    }
}
