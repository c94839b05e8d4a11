//! Hardware decoder selection.
//!
//! Maps a probed source codec to the hardware decoder of the configured
//! backend. Only codecs the backend can decode on the GPU are listed; anything
//! else is rejected before a transcoder is spawned.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::probe::ProbeResult;

/// Hardware acceleration backend used for decode, scale and encode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HwAccel {
    /// NVIDIA NVDEC/NVENC.
    #[default]
    Cuda,
    /// Intel Quick Sync Video.
    Qsv,
}

impl HwAccel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HwAccel::Cuda => "cuda",
            HwAccel::Qsv => "qsv",
        }
    }

    /// H.264 encoder for this backend.
    pub fn encoder(&self) -> &'static str {
        match self {
            HwAccel::Cuda => "h264_nvenc",
            HwAccel::Qsv => "h264_qsv",
        }
    }

    /// Decoder table as `(source codec, hardware decoder)` pairs.
    pub fn decoders(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            HwAccel::Cuda => CUDA_DECODERS,
            HwAccel::Qsv => QSV_DECODERS,
        }
    }
}

impl fmt::Display for HwAccel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HwAccel {
    type Err = mb_core::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cuda" | "nvenc" => Ok(HwAccel::Cuda),
            "qsv" => Ok(HwAccel::Qsv),
            other => Err(mb_core::Error::Validation(format!(
                "unknown hardware backend '{other}' (expected cuda or qsv)"
            ))),
        }
    }
}

const CUDA_DECODERS: &[(&str, &str)] = &[
    ("h264", "h264_cuvid"),
    ("hevc", "hevc_cuvid"),
    ("av1", "av1_cuvid"),
    ("vp8", "vp8_cuvid"),
    ("vp9", "vp9_cuvid"),
    ("mpeg1video", "mpeg1_cuvid"),
    ("mpeg2video", "mpeg2_cuvid"),
    ("mpeg4", "mpeg4_cuvid"),
    ("vc1", "vc1_cuvid"),
    ("mjpeg", "mjpeg_cuvid"),
];

const QSV_DECODERS: &[(&str, &str)] = &[
    ("h264", "h264_qsv"),
    ("hevc", "hevc_qsv"),
    ("av1", "av1_qsv"),
    ("vp8", "vp8_qsv"),
    ("vp9", "vp9_qsv"),
    ("mpeg2video", "mpeg2_qsv"),
    ("vc1", "vc1_qsv"),
    ("mjpeg", "mjpeg_qsv"),
];

/// Look up the hardware decoder for a source codec name.
pub fn decoder_for(hw: HwAccel, codec_name: &str) -> Option<&'static str> {
    hw.decoders()
        .iter()
        .find(|(codec, _)| *codec == codec_name)
        .map(|(_, decoder)| *decoder)
}

/// Resolve the decoder for the first video stream of a probed file.
///
/// # Errors
///
/// [`mb_core::Error::UnsupportedCodec`] when there is no video stream or its
/// codec has no entry for `hw`.
pub fn resolve_decoder(hw: HwAccel, probe: &ProbeResult) -> mb_core::Result<&'static str> {
    let video = probe
        .video_stream()
        .ok_or(mb_core::Error::UnsupportedCodec { codec: None })?;

    let codec = video.codec_name.as_deref().unwrap_or_default();
    decoder_for(hw, codec).ok_or_else(|| mb_core::Error::UnsupportedCodec {
        codec: Some(codec.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeFormat, ProbeStream};

    fn probe_with(streams: Vec<ProbeStream>) -> ProbeResult {
        ProbeResult {
            streams,
            format: ProbeFormat::default(),
        }
    }

    fn video(codec: &str) -> ProbeStream {
        ProbeStream {
            codec_type: Some("video".into()),
            codec_name: Some(codec.into()),
            ..Default::default()
        }
    }

    #[test]
    fn cuda_table_is_exact() {
        let expected = [
            ("h264", "h264_cuvid"),
            ("hevc", "hevc_cuvid"),
            ("av1", "av1_cuvid"),
            ("vp8", "vp8_cuvid"),
            ("vp9", "vp9_cuvid"),
            ("mpeg1video", "mpeg1_cuvid"),
            ("mpeg2video", "mpeg2_cuvid"),
            ("mpeg4", "mpeg4_cuvid"),
            ("vc1", "vc1_cuvid"),
            ("mjpeg", "mjpeg_cuvid"),
        ];
        for (codec, decoder) in expected {
            assert_eq!(decoder_for(HwAccel::Cuda, codec), Some(decoder), "{codec}");
        }
        assert_eq!(HwAccel::Cuda.decoders().len(), expected.len());
    }

    #[test]
    fn qsv_has_no_mpeg4_or_mpeg1() {
        assert_eq!(decoder_for(HwAccel::Qsv, "hevc"), Some("hevc_qsv"));
        assert_eq!(decoder_for(HwAccel::Qsv, "mpeg4"), None);
        assert_eq!(decoder_for(HwAccel::Qsv, "mpeg1video"), None);
    }

    #[test]
    fn resolves_first_video_stream() {
        let audio = ProbeStream {
            codec_type: Some("audio".into()),
            codec_name: Some("aac".into()),
            ..Default::default()
        };
        let probe = probe_with(vec![audio, video("hevc"), video("h264")]);
        assert_eq!(resolve_decoder(HwAccel::Cuda, &probe).unwrap(), "hevc_cuvid");
    }

    #[test]
    fn unknown_codec_is_unsupported() {
        let probe = probe_with(vec![video("prores")]);
        let err = resolve_decoder(HwAccel::Cuda, &probe).unwrap_err();
        assert!(matches!(
            err,
            mb_core::Error::UnsupportedCodec { codec: Some(ref c) } if c == "prores"
        ));
        assert_eq!(err.http_status(), 415);
    }

    #[test]
    fn audio_only_is_unsupported() {
        let probe = probe_with(vec![ProbeStream {
            codec_type: Some("audio".into()),
            codec_name: Some("flac".into()),
            ..Default::default()
        }]);
        assert!(matches!(
            resolve_decoder(HwAccel::Cuda, &probe),
            Err(mb_core::Error::UnsupportedCodec { codec: None })
        ));
    }

    #[test]
    fn parse_backend_names() {
        assert_eq!("cuda".parse::<HwAccel>().unwrap(), HwAccel::Cuda);
        assert_eq!("NVENC".parse::<HwAccel>().unwrap(), HwAccel::Cuda);
        assert_eq!("qsv".parse::<HwAccel>().unwrap(), HwAccel::Qsv);
        assert!("vaapi".parse::<HwAccel>().is_err());
        assert_eq!(HwAccel::Qsv.encoder(), "h264_qsv");
    }
}
