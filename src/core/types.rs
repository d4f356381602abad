use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 媒体源类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// 本地文件路径
    LocalFile(PathBuf),

    /// 网络流 URL
    NetworkStream {
        url: String,
        protocol: StreamProtocol,
    },
}

impl MediaSource {
    /// 从 URL 字符串解析媒体源
    pub fn from_url(url: &str) -> Self {
        if url.starts_with("rtsp://") {
            MediaSource::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::RTSP,
            }
        } else if url.starts_with("rtmp://") {
            MediaSource::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::RTMP,
            }
        } else if url.ends_with(".m3u8") || url.contains("/hls/") {
            MediaSource::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::HLS,
            }
        } else if url.starts_with("http://") || url.starts_with("https://") {
            MediaSource::NetworkStream {
                url: url.to_string(),
                protocol: StreamProtocol::HTTP,
            }
        } else {
            // 默认当作本地文件
            MediaSource::LocalFile(PathBuf::from(url))
        }
    }

    /// 判断是否为网络流
    pub fn is_network_stream(&self) -> bool {
        matches!(self, MediaSource::NetworkStream { .. })
    }

    /// 用于日志和 FFmpeg 打开的字符串形式
    pub fn location(&self) -> String {
        match self {
            MediaSource::LocalFile(path) => path.to_string_lossy().into_owned(),
            MediaSource::NetworkStream { url, .. } => url.clone(),
        }
    }
}

/// 流媒体协议类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// RTSP - 实时流协议（监控摄像头）
    RTSP,
    /// RTMP - 实时消息协议（直播流）
    RTMP,
    /// HLS - HTTP Live Streaming
    HLS,
    /// HTTP - 普通 HTTP 流
    HTTP,
}

impl StreamProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamProtocol::RTSP => "RTSP",
            StreamProtocol::RTMP => "RTMP",
            StreamProtocol::HLS => "HLS",
            StreamProtocol::HTTP => "HTTP",
        }
    }
}

/// 缓冲状态信息（用于监控和调试）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferStatus {
    /// 视频数据包队列长度
    pub video_packets: usize,

    /// 视频数据包队列字节数
    pub video_bytes: usize,

    /// 音频数据包队列长度
    pub audio_packets: usize,

    /// 音频数据包队列字节数
    pub audio_bytes: usize,

    /// 环形缓冲中已解码、待显示的视频帧数
    pub video_frames: usize,
}

/// 像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    RGBA,
    RGB24,
    YUV420P,
    YUYV422,
}

impl PixelFormat {
    /// 一帧图像需要的字节数（平面格式按各平面之和计算）
    pub fn frame_size(&self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::RGBA => w * h * 4,
            PixelFormat::RGB24 => w * h * 3,
            PixelFormat::YUYV422 => w * h * 2,
            PixelFormat::YUV420P => {
                let chroma = w.div_ceil(2) * h.div_ceil(2);
                w * h + chroma * 2
            }
        }
    }
}

/// 音频采样格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    F32,
}

/// 音频输出格式（解码器重采样的目标，也是音频设备的打开参数）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioSpec {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// 视频帧数据
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    pub pts: i64,           // 显示时间戳（毫秒）
    pub duration: i64,      // 帧持续时间（毫秒）
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,      // CPU 内存数据（各平面紧密排列）
}

impl VideoFrame {
    pub fn pts_seconds(&self) -> f64 {
        self.pts as f64 / 1000.0
    }
}

/// 音频帧数据
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub pts: i64,           // 显示时间戳（毫秒）
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
    pub data: Vec<f32>,     // 统一使用 f32 格式，交错排列
}

impl AudioFrame {
    pub fn pts_seconds(&self) -> f64 {
        self.pts as f64 / 1000.0
    }

    /// 这段 PCM 的播放时长（秒）
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        let samples_per_channel = self.data.len() / self.channels as usize;
        samples_per_channel as f64 / self.sample_rate as f64
    }
}

/// 引擎状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Closed,
    Opening,
    Playing,
    Paused,
    Seeking,
    Closing,
}

/// 媒体信息
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub duration: i64,          // 总时长（毫秒），未知时为 0
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_codec: String,
    pub audio_codec: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub video_stream_index: Option<usize>,
    pub audio_stream_index: Option<usize>,
}

impl MediaInfo {
    /// 单帧时长（毫秒），帧率未知时按 25fps 估算
    pub fn frame_duration_ms(&self) -> i64 {
        Self::frame_duration_for(self.fps)
    }

    pub fn frame_duration_for(fps: f64) -> i64 {
        if fps > 0.0 {
            (1000.0 / fps).round() as i64
        } else {
            40
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_source_from_url() {
        assert!(MediaSource::from_url("rtsp://cam/1").is_network_stream());
        assert!(MediaSource::from_url("https://host/live.m3u8").is_network_stream());
        assert_eq!(
            MediaSource::from_url("/tmp/movie.mkv"),
            MediaSource::LocalFile(PathBuf::from("/tmp/movie.mkv"))
        );
    }

    #[test]
    fn test_pixel_format_frame_size() {
        assert_eq!(PixelFormat::RGBA.frame_size(4, 2), 32);
        assert_eq!(PixelFormat::RGB24.frame_size(4, 2), 24);
        // 奇数尺寸的色度平面向上取整
        assert_eq!(PixelFormat::YUV420P.frame_size(3, 3), 9 + 2 * 4);
    }

    #[test]
    fn test_frame_duration_falls_back_to_25fps() {
        assert_eq!(MediaInfo::frame_duration_for(50.0), 20);
        assert_eq!(MediaInfo::frame_duration_for(0.0), 40);
        let info = MediaInfo {
            fps: 30.0,
            ..MediaInfo::default()
        };
        assert_eq!(info.frame_duration_ms(), 33);
    }

    #[test]
    fn test_audio_frame_duration() {
        let frame = AudioFrame {
            pts: 0,
            sample_rate: 48000,
            channels: 2,
            format: SampleFormat::F32,
            data: vec![0.0; 48000 * 2 / 10],
        };
        assert!((frame.duration_seconds() - 0.1).abs() < 1e-9);
    }
}
