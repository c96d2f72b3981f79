//! Codec negotiation for dynamically discovered source branches.
//!
//! Pure decision logic: given what a new pad advertises, pick the decode
//! chain or reject the branch. Graph mutation happens in the backends.

use std::fmt;

/// Caps advertised by a freshly exposed source pad.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PadCaps {
    /// `media` field, e.g. `video` or `audio`.
    pub media: Option<String>,
    /// `encoding-name` field, e.g. `H264`, `PCMU`.
    pub encoding_name: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    /// Framerate as a numerator/denominator pair.
    pub framerate: Option<(i32, i32)>,
}

impl PadCaps {
    pub fn video(encoding: &str) -> Self {
        Self {
            media: Some("video".to_string()),
            encoding_name: Some(encoding.to_string()),
            ..Self::default()
        }
    }

    pub fn audio(encoding: &str) -> Self {
        Self {
            media: Some("audio".to_string()),
            encoding_name: Some(encoding.to_string()),
            ..Self::default()
        }
    }

    pub fn with_size(mut self, width: i32, height: i32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_framerate(mut self, num: i32, den: i32) -> Self {
        self.framerate = Some((num, den));
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaCodec {
    H264,
    H265,
}

impl MediaCodec {
    pub fn from_encoding_name(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("H264") {
            Some(Self::H264)
        } else if name.eq_ignore_ascii_case("H265") || name.eq_ignore_ascii_case("HEVC") {
            Some(Self::H265)
        } else {
            None
        }
    }

    pub fn decode_chain(self) -> DecodeChain {
        match self {
            Self::H264 => DecodeChain {
                codec: self,
                depayloader: "rtph264depay",
                parser: "h264parse",
                decoder: "avdec_h264",
            },
            Self::H265 => DecodeChain {
                codec: self,
                depayloader: "rtph265depay",
                parser: "h265parse",
                decoder: "avdec_h265",
            },
        }
    }
}

impl fmt::Display for MediaCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::H264 => f.write_str("H264"),
            Self::H265 => f.write_str("H265"),
        }
    }
}

/// Factory names of the depayload → parse → decode triad for one codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeChain {
    pub codec: MediaCodec,
    pub depayloader: &'static str,
    pub parser: &'static str,
    pub decoder: &'static str,
}

impl DecodeChain {
    /// Factory names in link order.
    pub fn factories(&self) -> [&'static str; 3] {
        [self.depayloader, self.parser, self.decoder]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Negotiation {
    Attach(DecodeChain),
    /// Audio branch, dropped silently.
    IgnoreAudio,
    /// Unknown encoding; branch left unlinked.
    Unsupported(String),
}

const AUDIO_ENCODINGS: &[&str] = &["PCMU", "PCMA", "MPEG4-GENERIC", "OPUS", "L16"];

pub fn negotiate(caps: &PadCaps) -> Negotiation {
    let encoding = caps.encoding_name.as_deref().unwrap_or("");
    let is_audio = caps
        .media
        .as_deref()
        .is_some_and(|media| media.eq_ignore_ascii_case("audio"))
        || AUDIO_ENCODINGS
            .iter()
            .any(|audio| encoding.eq_ignore_ascii_case(audio));
    if is_audio {
        return Negotiation::IgnoreAudio;
    }
    match MediaCodec::from_encoding_name(encoding) {
        Some(codec) => Negotiation::Attach(codec.decode_chain()),
        None => Negotiation::Unsupported(encoding.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_codecs_select_their_triad() {
        assert_eq!(
            negotiate(&PadCaps::video("H264")),
            Negotiation::Attach(DecodeChain {
                codec: MediaCodec::H264,
                depayloader: "rtph264depay",
                parser: "h264parse",
                decoder: "avdec_h264",
            })
        );
        match negotiate(&PadCaps::video("h265")) {
            Negotiation::Attach(chain) => {
                assert_eq!(chain.factories(), ["rtph265depay", "h265parse", "avdec_h265"])
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn audio_branches_never_attach() {
        for encoding in ["PCMU", "PCMA", "pcmu"] {
            let caps = PadCaps {
                media: None,
                encoding_name: Some(encoding.to_string()),
                ..PadCaps::default()
            };
            assert_eq!(negotiate(&caps), Negotiation::IgnoreAudio);
        }
        // Even a video codec name on an audio pad is ignored.
        assert_eq!(negotiate(&PadCaps::audio("H264")), Negotiation::IgnoreAudio);
    }

    #[test]
    fn unknown_encoding_is_unsupported() {
        assert_eq!(
            negotiate(&PadCaps::video("VP8")),
            Negotiation::Unsupported("VP8".to_string())
        );
        assert_eq!(
            negotiate(&PadCaps::default()),
            Negotiation::Unsupported(String::new())
        );
    }
}
