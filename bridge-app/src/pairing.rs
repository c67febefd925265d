//! Pairing-code images: SVG for the `/qr` page, block characters for the log.

use anyhow::{Result, anyhow};
use qrcode::QrCode;
use qrcode::render::{svg, unicode};

const SVG_MIN_SIZE: u32 = 256;

fn encode(code: &str) -> Result<QrCode> {
    QrCode::new(code.as_bytes()).map_err(|e| anyhow!("pairing code does not fit a QR symbol: {e}"))
}

pub fn render_svg(code: &str) -> Result<String> {
    Ok(encode(code)?
        .render::<svg::Color>()
        .min_dimensions(SVG_MIN_SIZE, SVG_MIN_SIZE)
        .build())
}

/// Two modules per character cell. Colors are inverted so the symbol scans
/// on dark terminals.
pub fn render_terminal(code: &str) -> Result<String> {
    Ok(encode(code)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}
