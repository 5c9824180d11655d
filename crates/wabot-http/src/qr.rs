//! Pairing token rendering.

use qrcode::render::svg;
use qrcode::types::QrError;
use qrcode::QrCode;

/// Render a pairing token as an inline SVG QR code.
pub fn render_svg(token: &str) -> Result<String, QrError> {
    let code = QrCode::new(token.as_bytes())?;
    Ok(code
        .render::<svg::Color>()
        .min_dimensions(240, 240)
        .build())
}
