use eframe::egui::{Color32, ColorImage};

use crate::windowing::{DisplayBuffer, MAX_INTENSITY};

pub fn render_display_buffer(buffer: &DisplayBuffer, invert: bool) -> ColorImage {
    let pixel_count = buffer.rows.saturating_mul(buffer.columns);
    let mut pixels = Vec::with_capacity(pixel_count);
    for &intensity in buffer.pixels.iter().take(pixel_count) {
        let gray = if invert {
            MAX_INTENSITY - intensity
        } else {
            intensity
        };
        pixels.push(Color32::from_gray(gray));
    }

    if pixels.len() < pixel_count {
        pixels.resize(pixel_count, Color32::BLACK);
    }

    ColorImage {
        size: [buffer.columns, buffer.rows],
        pixels,
    }
}
