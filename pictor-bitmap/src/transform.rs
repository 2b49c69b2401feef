//! Resizing transformations.

use crate::Bitmap;
use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use pictor_common::{Resource, SIZE_ORIGINAL};
use pictor_registry::Transformation;
use std::sync::Arc;

fn target_size(bitmap: &Bitmap, width: u32, height: u32) -> (u32, u32) {
    let width = if width == SIZE_ORIGINAL { bitmap.width() } else { width };
    let height = if height == SIZE_ORIGINAL { bitmap.height() } else { height };
    (width.max(1), height.max(1))
}

fn with_bitmap<F>(resource: Arc<Resource>, width: u32, height: u32, f: F) -> Result<Arc<Resource>>
where
    F: FnOnce(&Bitmap, u32, u32) -> Result<Option<Bitmap>>,
{
    let transformed = {
        let bitmap = resource
            .downcast::<Bitmap>()
            .ok_or_else(|| anyhow!("Cannot resize a {} resource", resource.tag()))?;
        let (width, height) = target_size(&bitmap, width, height);
        f(&bitmap, width, height)?
    };
    Ok(match transformed {
        Some(bitmap) => Resource::new(bitmap),
        None => resource,
    })
}

/// Scales the bitmap uniformly so it fits inside the target size.
#[derive(Debug, Default, Clone, Copy)]
pub struct FitCenter;

impl Transformation for FitCenter {
    fn id(&self) -> &str {
        "pictor.FitCenter"
    }

    fn transform(&self, resource: Arc<Resource>, width: u32, height: u32) -> Result<Arc<Resource>> {
        with_bitmap(resource, width, height, |bitmap, width, height| {
            let scale = f64::min(
                f64::from(width) / f64::from(bitmap.width()),
                f64::from(height) / f64::from(bitmap.height()),
            );
            let out_w = ((f64::from(bitmap.width()) * scale).round() as u32).max(1);
            let out_h = ((f64::from(bitmap.height()) * scale).round() as u32).max(1);
            if (out_w, out_h) == bitmap.dimensions() {
                return Ok(None);
            }
            let image = bitmap.to_rgba_image()?;
            Ok(Some(Bitmap::from_rgba(imageops::resize(&image, out_w, out_h, FilterType::Triangle))))
        })
    }
}

/// Scales the bitmap to cover the target size, then crops the center.
#[derive(Debug, Default, Clone, Copy)]
pub struct CenterCrop;

impl Transformation for CenterCrop {
    fn id(&self) -> &str {
        "pictor.CenterCrop"
    }

    fn transform(&self, resource: Arc<Resource>, width: u32, height: u32) -> Result<Arc<Resource>> {
        with_bitmap(resource, width, height, |bitmap, width, height| {
            if (width, height) == bitmap.dimensions() {
                return Ok(None);
            }
            let scale = f64::max(
                f64::from(width) / f64::from(bitmap.width()),
                f64::from(height) / f64::from(bitmap.height()),
            );
            let scaled_w = ((f64::from(bitmap.width()) * scale).ceil() as u32).max(width);
            let scaled_h = ((f64::from(bitmap.height()) * scale).ceil() as u32).max(height);
            let image = bitmap.to_rgba_image()?;
            let scaled = imageops::resize(&image, scaled_w, scaled_h, FilterType::Triangle);
            let x = (scaled_w - width) / 2;
            let y = (scaled_h - height) / 2;
            let cropped = imageops::crop_imm(&scaled, x, y, width, height).to_image();
            Ok(Some(Bitmap::from_rgba(cropped)))
        })
    }
}
