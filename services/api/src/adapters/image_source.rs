//! services/api/src/adapters/image_source.rs
//!
//! Resolves a client-supplied `ImageRef` to raw bytes and a MIME type. Clients send
//! homework photos inline as `data:` URIs. Remote `http(s)` references are only fetched
//! when they sit under a trusted base URL (by default this service's own `/media`).
//! Anything else, including `file://`, `blob:` and bare paths, never touches the
//! server's filesystem and is refused.

use amibuddy_core::domain::ImageRef;
use amibuddy_core::ports::{PortError, PortResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{redirect, Url};
use tracing::warn;

pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageData {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// File extension used when the image is written to disk.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

/// Guesses the MIME type from a `data:` header or a file extension anywhere in the URI.
pub fn infer_mime_type(uri: &str) -> String {
    let lower = uri.to_ascii_lowercase();
    if let Some(rest) = lower.strip_prefix("data:") {
        if let Some((mime, _)) = rest.split_once(";base64,") {
            if !mime.is_empty() {
                return mime.to_string();
            }
        }
    }
    let by_extension = [
        (".png", "image/png"),
        (".gif", "image/gif"),
        (".webp", "image/webp"),
        (".jpg", "image/jpeg"),
        (".jpeg", "image/jpeg"),
    ];
    by_extension
        .iter()
        .find(|(ext, _)| lower.contains(ext))
        .map(|(_, mime)| mime.to_string())
        .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string())
}

fn too_large(max_bytes: usize) -> PortError {
    PortError::PermissionDenied(format!("Image is larger than {} bytes", max_bytes))
}

/// Splits a base64 `data:` URI into its MIME type and decoded payload.
pub fn decode_data_uri(uri: &str, max_bytes: usize) -> PortResult<ImageData> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| PortError::Unexpected("Not a data URI".to_string()))?;
    let (mime, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| PortError::Unexpected("Invalid data URI".to_string()))?;
    let payload = payload.trim();
    // Four base64 characters carry three bytes.
    if payload.len() / 4 * 3 > max_bytes {
        return Err(too_large(max_bytes));
    }
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| PortError::Unexpected(format!("Invalid base64 image data: {}", e)))?;
    if bytes.len() > max_bytes {
        return Err(too_large(max_bytes));
    }
    let mime_type = if mime.is_empty() {
        DEFAULT_IMAGE_MIME.to_string()
    } else {
        mime.to_string()
    };
    Ok(ImageData { bytes, mime_type })
}

/// Refuses every reference that is neither inline nor remote.
fn refuse(uri: &str) -> PortError {
    let scheme = uri.split_once(':').map(|(s, _)| s).unwrap_or("path");
    warn!("Refused a '{}' image reference from the client.", scheme);
    PortError::PermissionDenied(
        "Only inline data: images or trusted http(s) URLs are accepted".to_string(),
    )
}

/// Decodes an image that travelled inside the request itself.
pub fn decode_inline(image: &ImageRef, max_bytes: usize) -> PortResult<ImageData> {
    let uri = image.as_str().trim();
    if uri.starts_with("data:") {
        decode_data_uri(uri, max_bytes)
    } else {
        Err(refuse(uri))
    }
}

/// Where client images may come from and how large they may be.
#[derive(Clone)]
pub struct ImageSource {
    http: reqwest::Client,
    trusted_bases: Vec<Url>,
    max_bytes: usize,
}

impl ImageSource {
    /// Base URLs that fail to parse are skipped with a warning.
    pub fn new(trusted_bases: &[String], max_bytes: usize) -> PortResult<Self> {
        // Redirects could lead a trusted URL to an internal address.
        let http = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| PortError::Unexpected(format!("Failed to build image client: {}", e)))?;
        let trusted_bases = trusted_bases
            .iter()
            .filter_map(|base| match Url::parse(base) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!("Ignoring trusted image base '{}': {}", base, e);
                    None
                }
            })
            .collect();
        Ok(Self {
            http,
            trusted_bases,
            max_bytes,
        })
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Same scheme, host and port as a trusted base, with the path under the base's path.
    pub fn is_trusted(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") || !url.username().is_empty() {
            return false;
        }
        self.trusted_bases.iter().any(|base| {
            let base_path = base.path().trim_end_matches('/');
            base.scheme() == url.scheme()
                && base.host_str() == url.host_str()
                && base.port_or_known_default() == url.port_or_known_default()
                && (url.path() == base_path
                    || url.path().starts_with(&format!("{}/", base_path)))
        })
    }

    /// Reads an inline image, or fetches a trusted remote one.
    pub async fn load(&self, image: &ImageRef) -> PortResult<ImageData> {
        let uri = image.as_str().trim();
        if uri.starts_with("data:") {
            return decode_data_uri(uri, self.max_bytes);
        }
        let url = match Url::parse(uri) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            _ => return Err(refuse(uri)),
        };
        if !self.is_trusted(&url) {
            warn!("Refused to fetch an image from untrusted host {:?}", url.host_str());
            return Err(PortError::PermissionDenied(
                "Image URL is not on a trusted host".to_string(),
            ));
        }
        self.fetch(url).await
    }

    async fn fetch(&self, url: Url) -> PortResult<ImageData> {
        let mime_hint = infer_mime_type(url.as_str());
        let mut response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to fetch image: {}", e)))?;
        if !response.status().is_success() {
            return Err(PortError::Unexpected(format!(
                "Image fetch returned HTTP {}",
                response.status()
            )));
        }
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(too_large(self.max_bytes));
        }
        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .unwrap_or(mime_hint);

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to read image body: {}", e)))?
        {
            if bytes.len() + chunk.len() > self.max_bytes {
                return Err(too_large(self.max_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(ImageData { bytes, mime_type })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> ImageSource {
        ImageSource::new(&["https://buddy.test/media".to_string()], 16).unwrap()
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn mime_type_from_extension_or_default() {
        assert_eq!(infer_mime_type("https://x.test/a.PNG"), "image/png");
        assert_eq!(infer_mime_type("https://x.test/b.webp?size=2"), "image/webp");
        assert_eq!(infer_mime_type("https://x.test/c.jpeg"), "image/jpeg");
        assert_eq!(infer_mime_type("https://x.test/scan"), "image/jpeg");
        assert_eq!(infer_mime_type("data:image/gif;base64,R0lG"), "image/gif");
    }

    #[test]
    fn data_uri_is_decoded() {
        let image = decode_data_uri("data:image/png;base64,aGVsbG8=", 16).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.extension(), "png");
        assert_eq!(image.to_base64(), "aGVsbG8=");
    }

    #[test]
    fn malformed_data_uri_is_rejected() {
        assert!(decode_data_uri("data:image/png,plain", 16).is_err());
        assert!(decode_data_uri("data:image/png;base64,@@@", 16).is_err());
    }

    #[test]
    fn oversized_data_uri_is_refused() {
        // 24 bytes of payload against a 16 byte cap.
        let uri = format!("data:image/png;base64,{}", STANDARD.encode([7u8; 24]));
        let err = decode_data_uri(&uri, 16).unwrap_err();
        assert!(matches!(err, PortError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn server_paths_are_never_read() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("server_secret.env");
        std::fs::write(&secret, "DATABASE_URL=postgres://admin:pw@db").unwrap();
        let source = source();

        for reference in [
            "/etc/passwd".to_string(),
            "file:///etc/passwd".to_string(),
            secret.display().to_string(),
            format!("file://{}", secret.display()),
            "blob:https://buddy.test/0b7c".to_string(),
            "content://media/external/images/1".to_string(),
        ] {
            let err = source.load(&ImageRef::new(reference.clone())).await.unwrap_err();
            assert!(
                matches!(err, PortError::PermissionDenied(_)),
                "{} was not refused: {:?}",
                reference,
                err
            );
            assert!(decode_inline(&ImageRef::new(reference), 16).is_err());
        }
    }

    #[tokio::test]
    async fn untrusted_urls_are_not_fetched() {
        let source = source();
        for reference in [
            "http://169.254.169.254/latest/meta-data",
            "https://buddy.test.evil.example/media/a.jpg",
            "https://buddy.test@evil.example/media/a.jpg",
            "https://buddy.test/admin/secret.png",
            "http://buddy.test/media/a.jpg",
            "https://buddy.test:8443/media/a.jpg",
        ] {
            let err = source.load(&ImageRef::new(reference)).await.unwrap_err();
            assert!(
                matches!(err, PortError::PermissionDenied(_)),
                "{} was not refused: {:?}",
                reference,
                err
            );
        }
    }

    #[test]
    fn own_media_urls_are_trusted() {
        let source = source();
        assert!(source.is_trusted(&url("https://buddy.test/media/u1/a.jpg")));
        assert!(source.is_trusted(&url("https://buddy.test:443/media/u1/a.jpg")));
        assert!(!source.is_trusted(&url("https://buddy.test/mediafake/a.jpg")));
        assert!(!source.is_trusted(&url("https://buddy.test/media/../admin")));
    }

    #[test]
    fn invalid_trusted_bases_are_skipped() {
        let source = ImageSource::new(&["not a url".to_string()], 16).unwrap();
        assert!(!source.is_trusted(&url("https://buddy.test/media/a.jpg")));
    }
}
