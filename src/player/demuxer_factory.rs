use crate::core::{MediaInfo, MediaSource, PlayerError, Result, StreamProtocol};
use crate::player::decoder::{AudioDecoder, VideoDecoder};
use crate::player::demuxer::Demuxer;
use crate::player::demuxer_source::{AudioCodec, MediaBackend, OpenOptions, OpenedMedia, VideoCodec};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{format, media};
use log::{debug, info, warn};
use std::sync::Once;

static FFMPEG_INIT: Once = Once::new();

/// 基于 FFmpeg 的媒体后端
///
/// 打开容器 → 探测流信息 → 选择最佳音视频流 → 查找并打开解码器。
/// 任一步失败都返回错误，已经打开的资源随局部变量一起释放。
pub struct FfmpegBackend;

impl FfmpegBackend {
    pub fn new() -> Result<Self> {
        let mut result = Ok(());
        FFMPEG_INIT.call_once(|| {
            result = ffmpeg::init();
        });
        result.map_err(|e| PlayerError::OpenError(format!("FFmpeg 初始化失败: {}", e)))?;
        info!("✅ FFmpeg 初始化成功");
        Ok(Self)
    }

    /// 网络流的打开选项
    fn network_options(url: &str, protocol: StreamProtocol, timeout_ms: u64) -> ffmpeg::Dictionary<'static> {
        let timeout_us = (timeout_ms * 1000).to_string();
        let mut options = ffmpeg::Dictionary::new();
        // discardcorrupt: 丢弃损坏的帧；genpts: 生成 PTS
        options.set("fflags", "+discardcorrupt+genpts");
        options.set("timeout", &timeout_us);
        options.set("rw_timeout", &timeout_us);
        match protocol {
            StreamProtocol::RTSP => {
                options.set("rtsp_transport", "tcp");
                options.set("stimeout", &timeout_us);
            }
            StreamProtocol::HLS => {
                options.set("http_persistent", "1");
            }
            StreamProtocol::HTTP | StreamProtocol::RTMP => {}
        }
        if url.starts_with("http") {
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
        }
        options
    }

    fn open_input(source: &MediaSource, options: &OpenOptions) -> Result<format::context::Input> {
        let result = match source {
            MediaSource::LocalFile(path) => {
                info!("📁 打开本地文件: {}", path.display());
                format::input(path)
            }
            MediaSource::NetworkStream { url, protocol } => {
                info!("🌐 打开网络流: {} ({})", url, protocol.as_str());
                let dictionary = Self::network_options(url, *protocol, options.stream_timeout_ms);
                format::input_with_dictionary(url, dictionary)
            }
        };
        result.map_err(|e| match e {
            ffmpeg::Error::InvalidData => PlayerError::UnsupportedContainer(source.location()),
            other => PlayerError::OpenError(format!("{}: {}", source.location(), other)),
        })
    }

    fn open_video(stream: &format::stream::Stream, options: &OpenOptions) -> Result<(Box<dyn VideoCodec>, MediaInfo)> {
        let parameters = stream.parameters();
        let codec_id = parameters.id();
        if ffmpeg::codec::decoder::find(codec_id).is_none() {
            return Err(PlayerError::DecoderNotFound(codec_id.name().to_string()));
        }
        let decoder = VideoDecoder::from_stream(stream, options.pixel_format)?;
        let (width, height) = decoder.dimensions();
        if width == 0 || height == 0 {
            return Err(PlayerError::DegenerateResolution { width, height });
        }
        let fps = decoder.fps();
        debug!("视频解码器: {}", decoder.info());

        let info = MediaInfo {
            width,
            height,
            fps,
            video_codec: codec_id.name().to_string(),
            video_stream_index: Some(stream.index()),
            ..MediaInfo::default()
        };
        Ok((Box::new(decoder), info))
    }

    fn open_audio(stream: &format::stream::Stream, options: &OpenOptions) -> Result<(Box<dyn AudioCodec>, String)> {
        let codec_id = stream.parameters().id();
        if ffmpeg::codec::decoder::find(codec_id).is_none() {
            return Err(PlayerError::DecoderNotFound(codec_id.name().to_string()));
        }
        let decoder = AudioDecoder::from_stream(stream, options.audio)?;
        debug!("音频解码器: {}", decoder.info());
        Ok((Box::new(decoder), codec_id.name().to_string()))
    }
}

impl MediaBackend for FfmpegBackend {
    fn open(&self, source: &MediaSource, options: &OpenOptions) -> Result<OpenedMedia> {
        let input = Self::open_input(source, options)?;

        let video_stream = input.streams().best(media::Type::Video);
        let audio_stream = input.streams().best(media::Type::Audio);
        if video_stream.is_none() && audio_stream.is_none() {
            return Err(PlayerError::NoPlayableStream);
        }

        let (video_decoder, mut media_info) = match video_stream.as_ref() {
            Some(stream) => {
                let (decoder, info) = Self::open_video(stream, options)?;
                (Some(decoder), info)
            }
            None => (None, MediaInfo::default()),
        };

        let audio_decoder = match audio_stream.as_ref() {
            Some(stream) => match Self::open_audio(stream, options) {
                Ok((decoder, codec_name)) => {
                    media_info.audio_codec = codec_name;
                    media_info.sample_rate = options.audio.sample_rate;
                    media_info.channels = options.audio.channels;
                    media_info.audio_stream_index = Some(stream.index());
                    Some(decoder)
                }
                // 有视频时音频解码器缺失不致命
                Err(e) if video_decoder.is_some() => {
                    warn!("⚠️ 音频流不可用，仅播放视频: {}", e);
                    None
                }
                Err(e) => return Err(e),
            },
            None => None,
        };
        if media_info.video_codec.is_empty() {
            media_info.video_codec = "none".to_string();
        }
        if media_info.audio_codec.is_empty() {
            media_info.audio_codec = "none".to_string();
        }

        // AV_TIME_BASE 为微秒；未知时为负数或 0
        let duration_us = input.duration();
        media_info.duration = if duration_us > 0 { duration_us / 1000 } else { 0 };

        let demuxer = Demuxer::new(input, media_info.video_stream_index, source.location());
        Ok(OpenedMedia {
            demuxer: Box::new(demuxer),
            video_decoder,
            audio_decoder,
            media_info,
        })
    }
}
