use crate::args::{Args, TransformArg};
use anyhow::{Context, Result};
use futures::future::join_all;
use pictor_bitmap::{register_defaults, Bitmap, BitmapPool, CenterCrop, FitCenter};
use pictor_common::{DataSource, Model, TypeTag, SIZE_ORIGINAL};
use pictor_engine::{Config, LoadRequest, Loader, LoaderBuilder, LoaderHandle};
use pictor_registry::Registry;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

const BITMAP_POOL_SIZE: usize = 32 * 1024 * 1024;

/// Outcome of loading one file in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub pass: u32,
    pub file: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_source: Option<DataSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: f64,
}

impl LoadReport {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn to_line(&self) -> String {
        match (&self.error, self.data_source) {
            (None, Some(source)) => format!(
                "pass {} {}: {}x{} from {source} in {:.1} ms",
                self.pass,
                self.file,
                self.width.unwrap_or_default(),
                self.height.unwrap_or_default(),
                self.elapsed_ms
            ),
            (error, _) => format!(
                "pass {} {}: failed: {}",
                self.pass,
                self.file,
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}

/// Reads the configuration file, if any, and applies command-line overrides.
pub fn build_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = &args.cache_dir {
        config.disk_cache.directory = dir.clone();
    }
    config.validate()?;
    Ok(config)
}

pub fn build_loader(config: Config) -> Result<Loader> {
    let mut registry = Registry::new();
    register_defaults(&mut registry, &BitmapPool::new(BITMAP_POOL_SIZE));
    let loader = LoaderBuilder::new(config).registry(registry).build()?;
    Ok(loader)
}

pub fn request_for(args: &Args, file: &Path) -> LoadRequest {
    let request = LoadRequest::new(Model::File(file.to_path_buf()))
        .size(args.width.unwrap_or(SIZE_ORIGINAL), args.height.unwrap_or(SIZE_ORIGINAL))
        .disk_cache_strategy(args.strategy.into());
    match args.transform {
        Some(TransformArg::Fit) => request.transform(TypeTag::BITMAP, FitCenter),
        Some(TransformArg::Crop) => request.transform(TypeTag::BITMAP, CenterCrop),
        None => request,
    }
}

/// Loads every file once per pass, concurrently within a pass, releasing
/// each resource as soon as it has been measured.
pub async fn run(args: &Args, handle: &LoaderHandle) -> Vec<LoadReport> {
    let mut reports = Vec::with_capacity(args.files.len() * args.repeat as usize);
    for pass in 1..=args.repeat {
        debug!("Starting pass {pass}");
        let loads = args.files.iter().map(|file| {
            let request = request_for(args, file);
            async move {
                let started = Instant::now();
                let result = handle.load_async(request).await;
                (file, result, started.elapsed())
            }
        });
        for (file, result, elapsed) in join_all(loads).await {
            let mut report = LoadReport {
                pass,
                file: file.display().to_string(),
                width: None,
                height: None,
                data_source: None,
                error: None,
                elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            };
            match result {
                Ok(loaded) => {
                    let dimensions = loaded.resource.downcast::<Bitmap>().map(|b| b.dimensions());
                    if let Some((width, height)) = dimensions {
                        report.width = Some(width);
                        report.height = Some(height);
                    }
                    report.data_source = Some(loaded.data_source);
                    handle.release(loaded.resource);
                }
                Err(e) => {
                    e.log_root_causes(&report.file);
                    report.error = Some(e.to_string());
                }
            }
            reports.push(report);
        }
    }
    if let Ok(snapshot) = handle.snapshot_async().await {
        info!(
            "Memory cache holds {} resources ({} hits, {} misses)",
            snapshot.memory.len(),
            snapshot.memory_stats.hit_count,
            snapshot.memory_stats.miss_count
        );
    }
    reports
}
