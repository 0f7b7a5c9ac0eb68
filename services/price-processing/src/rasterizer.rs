//! Page rasterization and image tiling.
//!
//! [`PageRasterizer`] turns PDF pages into images. The shipped implementation counts pages with
//! lopdf and renders each one through `pdftoppm`. [`prepare_tiles`] then fits a page or uploaded
//! image into the pixel and byte budget of a vision call, splitting large images into 2 or 4
//! overlapping tiles.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use pricebook_utils::ExtractionConfig;

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    async fn page_count(&self, pdf: &[u8]) -> Result<usize>;

    /// Render zero-based `page` as an encoded image (PNG).
    async fn render_page(&self, pdf: &[u8], page: usize) -> Result<Vec<u8>>;
}

pub struct PdftoppmRasterizer {
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    async fn page_count(&self, pdf: &[u8]) -> Result<usize> {
        let data = pdf.to_vec();
        tokio::task::spawn_blocking(move || {
            let document = lopdf::Document::load_mem(&data).context("Failed to parse PDF")?;
            Ok(document.get_pages().len())
        })
        .await
        .context("PDF page count task failed")?
    }

    async fn render_page(&self, pdf: &[u8], page: usize) -> Result<Vec<u8>> {
        let page_number = (page + 1).to_string();
        let mut child = Command::new("pdftoppm")
            .arg("-png")
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number)
            .arg("-singlefile")
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .context("Failed to start pdftoppm")?;

        let mut stdin = child.stdin.take().context("pdftoppm stdin unavailable")?;
        let data = pdf.to_vec();
        let writer = tokio::spawn(async move {
            stdin.write_all(&data).await?;
            stdin.shutdown().await
        });

        let output = child.wait_with_output().await.context("pdftoppm did not finish")?;
        writer
            .await
            .context("pdftoppm writer task failed")?
            .context("Failed to stream PDF to pdftoppm")?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(anyhow!(
                "pdftoppm failed on page {}: {}",
                page_number,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output.stdout)
    }
}

/// An image ready to send to a vision call.
#[derive(Debug, Clone)]
pub struct ImageTile {
    pub data: Vec<u8>,
    pub mime_type: &'static str,
    pub index: usize,
    pub of: usize,
}

const TILE_OVERLAP: f64 = 0.05;
const JPEG_QUALITY: u8 = 85;

/// Grid for an image of `pixels`: 1 below the threshold, 2 strips up to twice it, else 2×2.
pub fn tile_grid(pixels: u64, bytes: usize, config: &ExtractionConfig) -> (u32, u32) {
    let over_pixels = pixels > config.tile_pixel_threshold;
    let over_bytes = bytes > config.tile_byte_threshold;
    if !over_pixels && !over_bytes {
        (1, 1)
    } else if pixels <= config.tile_pixel_threshold.saturating_mul(2) {
        (1, 2)
    } else {
        (2, 2)
    }
}

/// Fit an encoded image into the vision budget.
pub fn prepare_tiles(data: &[u8], config: &ExtractionConfig) -> Result<Vec<ImageTile>> {
    let format = image::guess_format(data).context("Unrecognized image format")?;
    let image = image::load_from_memory(data).context("Failed to decode image")?;
    let (width, height) = image.dimensions();
    let pixels = width as u64 * height as u64;

    let (columns, rows) = tile_grid(pixels, data.len(), config);
    if (columns, rows) == (1, 1) {
        if let Some(mime_type) = passthrough_mime(format) {
            return Ok(vec![ImageTile {
                data: data.to_vec(),
                mime_type,
                index: 0,
                of: 1,
            }]);
        }
        return Ok(vec![encode_tile(&image, config.max_tile_pixels, 0, 1)?]);
    }

    // split along the longer side when using two strips
    let (columns, rows) = if columns * rows == 2 && width > height { (2, 1) } else { (columns, rows) };
    let count = (columns * rows) as usize;
    let tile_w = width / columns;
    let tile_h = height / rows;
    let pad_w = (tile_w as f64 * TILE_OVERLAP) as u32;
    let pad_h = (tile_h as f64 * TILE_OVERLAP) as u32;

    let mut tiles = Vec::with_capacity(count);
    for row in 0..rows {
        for column in 0..columns {
            let x = (column * tile_w).saturating_sub(pad_w);
            let y = (row * tile_h).saturating_sub(pad_h);
            let w = (tile_w + 2 * pad_w).min(width - x);
            let h = (tile_h + 2 * pad_h).min(height - y);
            let crop = image.crop_imm(x, y, w, h);
            tiles.push(encode_tile(&crop, config.max_tile_pixels, tiles.len(), count)?);
        }
    }

    tracing::debug!(width, height, tiles = count, "Split image into tiles");
    Ok(tiles)
}

fn passthrough_mime(format: ImageFormat) -> Option<&'static str> {
    match format {
        ImageFormat::Png => Some("image/png"),
        ImageFormat::Jpeg => Some("image/jpeg"),
        ImageFormat::WebP => Some("image/webp"),
        _ => None,
    }
}

fn encode_tile(image: &DynamicImage, max_pixels: u64, index: usize, of: usize) -> Result<ImageTile> {
    let (width, height) = image.dimensions();
    let pixels = width as u64 * height as u64;

    let scaled;
    let image = if max_pixels > 0 && pixels > max_pixels {
        let scale = (max_pixels as f64 / pixels as f64).sqrt();
        let w = ((width as f64 * scale).round() as u32).max(1);
        let h = ((height as f64 * scale).round() as u32).max(1);
        scaled = image.resize(w, h, FilterType::CatmullRom);
        &scaled
    } else {
        image
    };

    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, JPEG_QUALITY)
        .encode_image(&image.to_rgb8())
        .context("Failed to encode tile")?;

    Ok(ImageTile {
        data: buffer,
        mime_type: "image/jpeg",
        index,
        of,
    })
}
