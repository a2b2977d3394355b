//! Serving a directory from a [`StaticFilesConfig`] mount.
//!
//! Each mount registers `GET {route_prefix}/{*path}`. Files are streamed in chunks with a
//! `Content-Length`. Paths that climb out of the directory are treated as missing.

use crate::config::StaticFilesConfig;
use crate::dispatcher::App;
use crate::handler::{Handler, HandlerContext};
use crate::problem::Failure;
use crate::response::HandlerReturn;
use crate::router::RouteError;
use crate::streaming::{FileStreamOptions, StreamingResponse};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const INDEX_FILE: &str = "index.html";

#[derive(Debug, Clone)]
pub struct StaticFiles {
    base_dir: PathBuf,
    route_prefix: String,
    index_file: bool,
    cache_control: Option<String>,
}

impl StaticFiles {
    pub fn new<P: Into<PathBuf>>(base: P) -> Self {
        Self {
            base_dir: base.into(),
            route_prefix: String::new(),
            index_file: true,
            cache_control: None,
        }
    }

    #[must_use]
    pub fn from_config(config: &StaticFilesConfig) -> Self {
        Self {
            base_dir: PathBuf::from(&config.directory),
            route_prefix: config.route_prefix.trim_end_matches('/').to_string(),
            index_file: config.index_file,
            cache_control: config.cache_control.clone(),
        }
    }

    /// Route template this mount answers on.
    #[must_use]
    pub fn route_path(&self) -> String {
        format!("{}/{{*path}}", self.route_prefix)
    }

    /// `None` when the URL path escapes the base directory.
    fn map_path(&self, url_path: &str) -> Option<PathBuf> {
        let mut pb = self.base_dir.clone();
        for comp in Path::new(url_path.trim_start_matches('/')).components() {
            match comp {
                Component::Normal(s) => pb.push(s),
                Component::CurDir => {}
                _ => return None,
            }
        }
        Some(pb)
    }

    /// Resolve a URL path to an existing file, falling back to the index file for directories.
    pub fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let path = self.map_path(url_path)?;
        if path.is_file() {
            return Some(path);
        }
        if self.index_file && path.is_dir() {
            let index = path.join(INDEX_FILE);
            if index.is_file() {
                return Some(index);
            }
        }
        None
    }
}

impl Handler for StaticFiles {
    fn call(&self, ctx: HandlerContext) -> anyhow::Result<HandlerReturn> {
        let requested = ctx.request.path_param("path").unwrap_or("");
        let Some(path) = self.resolve(requested) else {
            debug!(
                base_dir = %self.base_dir.display(),
                requested = %requested,
                "Static file not found"
            );
            return Err(Failure::NotFound {
                method: ctx.request.method().to_string(),
                path: ctx.request.path().to_string(),
            }
            .into());
        };
        let mut response = StreamingResponse::file(&path, FileStreamOptions::default())?;
        if let Some(cache_control) = &self.cache_control {
            response = response.with_header("Cache-Control", cache_control.as_str());
        }
        Ok(response.into())
    }

    fn name(&self) -> &str {
        "static_files"
    }
}

/// Register every static mount in the app's config.
pub fn mount_all(app: &App) -> Result<(), RouteError> {
    for config in &app.config().static_files {
        let files = StaticFiles::from_config(config);
        let path = files.route_path();
        app.route("GET", &path, Arc::new(files))?;
    }
    Ok(())
}
