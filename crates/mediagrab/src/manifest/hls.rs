//! HLS playlist parsing: a single line-oriented pass over master or media playlists.

use crate::error::ManifestError;

const MARKER: &str = "#EXTM3U";
const STREAM_INF: &str = "#EXT-X-STREAM-INF:";
const SEGMENT_INF: &str = "#EXTINF:";
const KEY: &str = "#EXT-X-KEY:";
const TARGET_DURATION: &str = "#EXT-X-TARGETDURATION:";
const END_LIST: &str = "#EXT-X-ENDLIST";

/// One rendition listed in a master playlist.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Variant {
    pub uri: String,
    pub bandwidth: u64,
    pub resolution: Option<String>,
    pub codecs: Option<String>,
}

/// One chunk listed in a media playlist.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
enum ManifestBody {
    Master(Vec<Variant>),
    Media(Vec<Segment>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Encryption {
    pub method: Option<String>,
    pub uri: Option<String>,
}

/// Parsed playlist. Either variants or segments, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    body: ManifestBody,
    encryption: Option<Encryption>,
    target_duration: Option<u64>,
    end_list: bool,
}

impl Manifest {
    pub fn variants(&self) -> &[Variant] {
        match &self.body {
            ManifestBody::Master(variants) => variants,
            ManifestBody::Media(_) => &[],
        }
    }

    pub fn segments(&self) -> &[Segment] {
        match &self.body {
            ManifestBody::Media(segments) => segments,
            ManifestBody::Master(_) => &[],
        }
    }

    pub fn is_master(&self) -> bool {
        matches!(self.body, ManifestBody::Master(_))
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    pub fn key_method(&self) -> Option<&str> {
        self.encryption.as_ref()?.method.as_deref()
    }

    pub fn key_uri(&self) -> Option<&str> {
        self.encryption.as_ref()?.uri.as_deref()
    }

    pub fn target_duration(&self) -> Option<u64> {
        self.target_duration
    }

    pub fn end_list(&self) -> bool {
        self.end_list
    }

    /// Highest bandwidth wins; the earlier variant wins ties.
    pub fn best_variant(&self) -> Option<&Variant> {
        self.variants()
            .iter()
            .reduce(|best, v| if v.bandwidth > best.bandwidth { v } else { best })
    }
}

/// What the next URI line completes.
enum Pending {
    Idle,
    VariantUri(Variant),
    SegmentUri(f64),
}

pub fn parse_hls_manifest(data: &[u8]) -> Result<Manifest, ManifestError> {
    let text = String::from_utf8_lossy(data);
    if !text.contains(MARKER) {
        return Err(ManifestError::NotHls);
    }

    let mut variants = Vec::new();
    let mut segments = Vec::new();
    let mut encryption = None;
    let mut target_duration = None;
    let mut end_list = false;
    let mut pending = Pending::Idle;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(attrs) = line.strip_prefix(STREAM_INF) {
            let mut variant = Variant::default();
            for (key, value) in parse_attributes(attrs) {
                match key.as_str() {
                    "BANDWIDTH" => variant.bandwidth = value.parse().unwrap_or(0),
                    "RESOLUTION" => variant.resolution = Some(value),
                    "CODECS" => variant.codecs = Some(value),
                    _ => {}
                }
            }
            pending = Pending::VariantUri(variant);
        } else if let Some(rest) = line.strip_prefix(SEGMENT_INF) {
            let duration = rest.split(',').next().unwrap_or("").trim();
            pending = Pending::SegmentUri(duration.parse().unwrap_or(0.0));
        } else if let Some(attrs) = line.strip_prefix(KEY) {
            let attrs = parse_attributes(attrs);
            let method = attribute(&attrs, "METHOD");
            // A key without METHOD still marks the playlist as encrypted.
            if !method.is_some_and(|m| m.eq_ignore_ascii_case("NONE")) {
                encryption = Some(Encryption {
                    method: method.map(str::to_owned),
                    uri: attribute(&attrs, "URI").map(str::to_owned),
                });
            }
        } else if let Some(value) = line.strip_prefix(TARGET_DURATION) {
            target_duration = Some(value.trim().parse().unwrap_or(0));
        } else if line == END_LIST {
            end_list = true;
        } else if line.starts_with('#') {
            // Unrecognized directive.
        } else {
            match std::mem::replace(&mut pending, Pending::Idle) {
                Pending::VariantUri(mut variant) => {
                    variant.uri = line.to_owned();
                    variants.push(variant);
                }
                Pending::SegmentUri(duration) => segments.push(Segment {
                    uri: line.to_owned(),
                    duration,
                }),
                Pending::Idle => {}
            }
        }
    }

    let body = if !variants.is_empty() {
        ManifestBody::Master(variants)
    } else {
        ManifestBody::Media(segments)
    };

    Ok(Manifest {
        body,
        encryption,
        target_duration,
        end_list,
    })
}

/// `(true, method)` for encrypted playlists, `(false, "")` otherwise.
pub fn detect_hls_drm(manifest: &Manifest) -> (bool, String) {
    match &manifest.encryption {
        Some(encryption) => (
            true,
            encryption
                .method
                .clone()
                .unwrap_or_else(|| "encrypted".to_owned()),
        ),
        None => (false, String::new()),
    }
}

fn attribute<'a>(attrs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Split `KEY=value,KEY="quoted, value"` into pairs. Commas inside quotes do
/// not separate attributes; surrounding quotes are stripped from values.
pub fn parse_attributes(input: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                push_attribute(&mut pairs, &input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_attribute(&mut pairs, &input[start..]);
    pairs
}

fn push_attribute(pairs: &mut Vec<(String, String)>, item: &str) {
    let Some((key, value)) = item.split_once('=') else {
        return;
    };
    let key = key.trim();
    if key.is_empty() {
        return;
    }
    let value = value.trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    pairs.push((key.to_owned(), value.to_owned()));
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360,CODECS=\"avc1.4d401e,mp4a.40.2\"
low/index.m3u8

#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720,CODECS=\"avc1.4d401f,mp4a.40.2\"
mid/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=7680000,RESOLUTION=1920x1080
high/index.m3u8
";

    const ENCRYPTED_MEDIA: &str = "#EXTM3U
#EXT-X-TARGETDURATION:10
#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example.com/k?a=1,b=2\",IV=0x1234
#EXTINF:9.009,
seg0.ts
#EXTINF:9.009,
seg1.ts
#EXTINF:3.003,
seg2.ts
#EXT-X-ENDLIST
";

    #[test]
    fn missing_marker_is_rejected() {
        let err = parse_hls_manifest(b"#EXT-X-STREAM-INF:BANDWIDTH=1\nlow.m3u8\n").unwrap_err();
        assert_eq!(err, ManifestError::NotHls);
        assert_eq!(parse_hls_manifest(b"").unwrap_err(), ManifestError::NotHls);
    }

    #[test]
    fn master_playlist_variants_in_order() {
        let manifest = parse_hls_manifest(MASTER.as_bytes()).unwrap();

        assert!(manifest.is_master());
        assert!(manifest.segments().is_empty());
        let variants = manifest.variants();
        assert_eq!(variants.len(), 3);
        assert_eq!(variants[0].uri, "low/index.m3u8");
        assert_eq!(variants[0].bandwidth, 1_280_000);
        assert_eq!(variants[0].resolution.as_deref(), Some("640x360"));
        assert_eq!(variants[0].codecs.as_deref(), Some("avc1.4d401e,mp4a.40.2"));
        assert_eq!(variants[1].uri, "mid/index.m3u8");
        assert_eq!(variants[2].uri, "high/index.m3u8");
        assert_eq!(variants[2].codecs, None);
        assert_eq!(manifest.best_variant().unwrap().uri, "high/index.m3u8");
    }

    #[test]
    fn media_playlist_segments_and_key() {
        let manifest = parse_hls_manifest(ENCRYPTED_MEDIA.as_bytes()).unwrap();

        assert!(!manifest.is_master());
        assert!(manifest.variants().is_empty());
        let segments = manifest.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].uri, "seg0.ts");
        assert!((segments[2].duration - 3.003).abs() < f64::EPSILON);
        assert_eq!(manifest.key_uri(), Some("https://keys.example.com/k?a=1,b=2"));
        assert_eq!(manifest.target_duration(), Some(10));
        assert!(manifest.end_list());

        assert_eq!(detect_hls_drm(&manifest), (true, "AES-128".to_owned()));
    }

    #[test]
    fn method_none_is_not_encrypted() {
        let manifest =
            parse_hls_manifest(b"#EXTM3U\n#EXT-X-KEY:METHOD=NONE\n#EXTINF:4,\na.ts\n").unwrap();
        assert_eq!(detect_hls_drm(&manifest), (false, String::new()));
    }

    #[test]
    fn key_without_method_counts_as_encrypted() {
        let manifest =
            parse_hls_manifest(b"#EXTM3U\n#EXT-X-KEY:URI=\"k\"\n#EXTINF:4,\na.ts\n").unwrap();
        assert!(manifest.is_encrypted());
        assert_eq!(manifest.key_method(), None);
        assert_eq!(manifest.key_uri(), Some("k"));
        assert_eq!(detect_hls_drm(&manifest), (true, "encrypted".to_owned()));
    }

    #[test]
    fn quoted_comma_stays_in_one_attribute() {
        let attrs = parse_attributes("CODECS=\"avc1.64001f,mp4a.40.2\",BANDWIDTH=100");
        assert_eq!(
            attrs,
            vec![
                ("CODECS".to_owned(), "avc1.64001f,mp4a.40.2".to_owned()),
                ("BANDWIDTH".to_owned(), "100".to_owned()),
            ]
        );
    }

    #[test]
    fn bad_numbers_default_to_zero() {
        let manifest = parse_hls_manifest(
            b"#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=lots,RESOLUTION=1x1\nv.m3u8\n",
        )
        .unwrap();
        assert_eq!(manifest.variants()[0].bandwidth, 0);
        assert_eq!(manifest.variants()[0].resolution.as_deref(), Some("1x1"));

        let manifest = parse_hls_manifest(b"#EXTM3U\n#EXTINF:abc,\nseg.ts\n").unwrap();
        assert_eq!(manifest.segments()[0].duration, 0.0);
    }

    #[test]
    fn uri_without_directive_is_ignored() {
        let manifest =
            parse_hls_manifest(b"#EXTM3U\nstray.ts\n#EXT-X-UNKNOWN:1\n#EXTINF:2,\nreal.ts\n")
                .unwrap();
        assert_eq!(manifest.segments().len(), 1);
        assert_eq!(manifest.segments()[0].uri, "real.ts");
    }

    #[test]
    fn crlf_lines() {
        let manifest = parse_hls_manifest(b"#EXTM3U\r\n#EXTINF:2.5,\r\nseg.ts\r\n").unwrap();
        assert_eq!(manifest.segments()[0].uri, "seg.ts");
    }
}
