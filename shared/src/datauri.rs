use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Encode binary content as a self-contained data URI.
pub fn encode(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, STANDARD.encode(bytes))
}

/// Decode a base64 data URI into its media type and raw bytes.
pub fn decode(uri: &str) -> Result<(String, Vec<u8>), String> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| "not a data URI".to_string())?;

    let (media_type, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| "data URI is not base64-encoded".to_string())?;

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| format!("invalid base64 payload: {}", e))?;

    Ok((media_type.to_string(), bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_decode_preserves_bytes() {
        let uri = encode("image/png", b"\x89PNG\r\n");
        let (media_type, bytes) = decode(&uri).unwrap();
        assert_eq!(media_type, "image/png");
        assert_eq!(bytes, b"\x89PNG\r\n");
    }

    #[test]
    fn decode_rejects_plain_urls() {
        assert!(decode("https://example.com/cat.png").is_err());
    }

    #[test]
    fn decode_rejects_non_base64_uris() {
        assert!(decode("data:text/plain,hello").is_err());
        assert!(decode("data:image/png;base64,@@@@").is_err());
    }
}
