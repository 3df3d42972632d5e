//! QR payloads for scan-to-login.
//!
//! The QR code encodes a login URL derived from the correlation id. Rendering
//! here is limited to producing bytes for the notification callback and a
//! terminal-friendly string for the demo binary.

use qrcode::render::{svg, unicode};
use qrcode::QrCode;

use crate::error::{ClientError, ClientResult};

/// URL the phone opens after scanning the code for `uuid`.
pub fn login_url(login_host: &str, uuid: &str) -> String {
    format!("{}/l/{}", login_host.trim_end_matches('/'), uuid)
}

fn encode(data: &str) -> ClientResult<QrCode> {
    QrCode::new(data.as_bytes())
        .map_err(|e| ClientError::Login(format!("QR generation failed: {}", e)))
}

/// Render the payload as an SVG document.
pub fn render_qr_svg(data: &str) -> ClientResult<Vec<u8>> {
    let image = encode(data)?
        .render::<svg::Color<'_>>()
        .min_dimensions(200, 200)
        .build();
    Ok(image.into_bytes())
}

/// Render QR code as unicode blocks for terminal display.
pub fn render_qr_ascii(data: &str) -> ClientResult<String> {
    let image = encode(data)?
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build();
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_url() {
        assert_eq!(
            login_url("https://login.weixin.qq.com/", "gZ3tq0=="),
            "https://login.weixin.qq.com/l/gZ3tq0=="
        );
    }

    #[test]
    fn test_qr_svg_render() {
        let image = render_qr_svg("https://login.weixin.qq.com/l/abc").unwrap();
        let text = String::from_utf8(image).unwrap();
        assert!(text.contains("<svg"));
    }

    #[test]
    fn test_qr_ascii_render() {
        let result = render_qr_ascii("test data");
        assert!(result.is_ok());
        assert!(!result.unwrap().is_empty());
    }
}
