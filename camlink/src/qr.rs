//! Terminal QR codes for the pairing URL

use qrcode::render::unicode::Dense1x2;
use qrcode::types::QrError;
use qrcode::QrCode;

/// Render `data` as half-block characters, two modules per text row.
///
/// Colors are inverted for the usual dark terminal background so phone
/// scanners see dark modules on a light field.
pub fn render_qr(data: &str) -> Result<String, QrError> {
    let code = QrCode::new(data.as_bytes())?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
