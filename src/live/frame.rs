use crate::error::{DashboardError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::colorops;
use image::RgbImage;
use std::ops::RangeInclusive;

pub const JPEG_QUALITY: u8 = 90;

const BRIGHTNESS_RANGE: RangeInclusive<f32> = -100.0..=100.0;
const EXPOSURE_GAIN_RANGE: RangeInclusive<f32> = 0.1..=4.0;

/// 撮影パラメータ（フレーム送信時に補助フィールドとして付与）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureParams {
    brightness: f32,
    exposure_gain: f32,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            brightness: 0.0,
            exposure_gain: 1.0,
        }
    }
}

impl CaptureParams {
    pub fn new(brightness: f32, exposure_gain: f32) -> Result<Self> {
        if !BRIGHTNESS_RANGE.contains(&brightness) {
            return Err(DashboardError::InvalidParams(format!(
                "brightness={} (-100〜100)",
                brightness
            )));
        }
        if !EXPOSURE_GAIN_RANGE.contains(&exposure_gain) {
            return Err(DashboardError::InvalidParams(format!(
                "exposure_gain={} (0.1〜4.0)",
                exposure_gain
            )));
        }
        Ok(Self {
            brightness,
            exposure_gain,
        })
    }

    pub fn brightness(&self) -> f32 {
        self.brightness
    }

    pub fn exposure_gain(&self) -> f32 {
        self.exposure_gain
    }
}

/// フレームを JPEG (品質90) にエンコード
pub fn encode_jpeg(frame: &RgbImage) -> Result<Vec<u8>> {
    if frame.width() == 0 || frame.height() == 0 {
        return Err(DashboardError::Encode("空のフレーム".into()));
    }
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
    encoder
        .encode_image(frame)
        .map_err(|e| DashboardError::Encode(e.to_string()))?;
    Ok(buf)
}

pub fn data_url(jpeg: &[u8]) -> String {
    format!("data:image/jpeg;base64,{}", STANDARD.encode(jpeg))
}

/// 画面表示用のフィルタ。送信するフレームには適用しない
pub fn preview_filter(frame: &RgbImage, params: &CaptureParams) -> RgbImage {
    let mut out = colorops::brighten(frame, params.brightness.round() as i32);
    if (params.exposure_gain - 1.0).abs() > f32::EPSILON {
        for pixel in out.pixels_mut() {
            for channel in pixel.0.iter_mut() {
                *channel = (*channel as f32 * params.exposure_gain).round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}
