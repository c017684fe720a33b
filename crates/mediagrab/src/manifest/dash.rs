//! DASH manifest inspection. Deliberately textual: the MPD is not parsed as
//! XML, it is only scanned for protection markers and a `<BaseURL>`.

use std::sync::LazyLock;

use regex::Regex;

/// Markers in priority order, lower-case.
const DRM_MARKERS: &[(&str, &str)] = &[
    ("edef8ba9-79d6-4ace-a3c8-27dcd51d21ed", "Widevine"),
    ("9a04f079-9840-4286-ab92-e65be0885f95", "PlayReady"),
    ("94ce86fb-07ff-4f43-adb8-93d2fa968ca2", "FairPlay"),
    ("e2719d58-a985-b3c9-781a-b030af78d30e", "ClearKey"),
    ("1077efec-c0b2-4d02-ace3-3c1e52e2fb4b", "ClearKey"),
    ("widevine", "Widevine"),
    ("playready", "PlayReady"),
    ("fairplay", "FairPlay"),
    ("clearkey", "ClearKey"),
    ("urn:mpeg:dash:mp4protection:2011", "CENC"),
    ("cenc:default_kid", "CENC"),
    ("value=\"cenc\"", "CENC"),
    ("value=\"cbcs\"", "CBCS"),
];

static BASE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<BaseURL[^>]*>\s*([^<]+?)\s*</BaseURL>").expect("valid BaseURL regex")
});

/// First DRM system mentioned anywhere in the manifest, case-insensitively.
pub fn detect_dash_drm(data: &[u8]) -> (bool, String) {
    let folded = String::from_utf8_lossy(data).to_lowercase();
    DRM_MARKERS
        .iter()
        .find(|(marker, _)| folded.contains(marker))
        .map_or((false, String::new()), |(_, system)| {
            (true, (*system).to_owned())
        })
}

/// Text of the first `<BaseURL>` element, if any.
pub fn dash_base_url(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    BASE_URL
        .captures(&text)
        .map(|caps| caps[1].replace("&amp;", "&"))
}

/// Whether the MPD describes segments through templates or lists.
pub fn is_segmented(data: &[u8]) -> bool {
    let folded = String::from_utf8_lossy(data).to_lowercase();
    folded.contains("<segmenttemplate") || folded.contains("<segmentlist")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROTECTED: &str = r#"<?xml version="1.0"?>
<MPD xmlns="urn:mpeg:dash:schema:mpd:2011">
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc"/>
      <ContentProtection schemeIdUri="urn:uuid:EDEF8BA9-79D6-4ACE-A3C8-27DCD51D21ED"/>
    </AdaptationSet>
  </Period>
</MPD>"#;

    const CLEAR: &str = r#"<MPD>
  <Period>
    <AdaptationSet mimeType="video/mp4">
      <Representation id="1" bandwidth="800000">
        <BaseURL> video_800k.mp4?sig=a&amp;t=1 </BaseURL>
      </Representation>
    </AdaptationSet>
  </Period>
</MPD>"#;

    #[test]
    fn widevine_urn_found_case_insensitively() {
        assert_eq!(detect_dash_drm(PROTECTED.as_bytes()), (true, "Widevine".to_owned()));
    }

    #[test]
    fn bare_cenc_marker() {
        let mpd = r#"<ContentProtection schemeIdUri="urn:mpeg:dash:mp4protection:2011" value="cenc"/>"#;
        assert_eq!(detect_dash_drm(mpd.as_bytes()), (true, "CENC".to_owned()));
    }

    #[test]
    fn clear_manifest() {
        assert_eq!(detect_dash_drm(CLEAR.as_bytes()), (false, String::new()));
        assert!(!is_segmented(CLEAR.as_bytes()));
        assert_eq!(
            dash_base_url(CLEAR.as_bytes()).as_deref(),
            Some("video_800k.mp4?sig=a&t=1")
        );
    }

    #[test]
    fn templated_manifest_is_segmented() {
        let mpd = r#"<MPD><SegmentTemplate media="$Number$.m4s"/></MPD>"#;
        assert!(is_segmented(mpd.as_bytes()));
        assert_eq!(dash_base_url(mpd.as_bytes()), None);
    }
}
