use crate::core::{AudioFrame, AudioSpec, MediaInfo, MediaSource, PixelFormat, Result, VideoFrame};
use crate::player::worker::StopSignal;
#[cfg(feature = "ffmpeg")]
use ffmpeg_next as ffmpeg;

/// Packet 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Video,
    Audio,
}

/// 压缩数据本体，由具体的解封装实现决定
pub enum PacketPayload {
    #[cfg(feature = "ffmpeg")]
    Ffmpeg(ffmpeg::Packet),
    Bytes(Vec<u8>),
    /// 输入结束标记：解码线程收到后排空解码器内部缓存的帧
    EndOfInput,
}

/// 媒体包（可跨线程传递）
pub struct MediaPacket {
    pub stream_index: usize,
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    pub payload: PacketPayload,
}

// 实现 Send，允许跨线程传递：包在任一时刻只属于一个线程（解封装 → 队列 → 解码）
unsafe impl Send for MediaPacket {}

impl MediaPacket {
    pub fn end_of_input(stream_index: usize) -> Self {
        Self {
            stream_index,
            pts: None,
            dts: None,
            payload: PacketPayload::EndOfInput,
        }
    }

    pub fn is_end_of_input(&self) -> bool {
        matches!(self.payload, PacketPayload::EndOfInput)
    }

    /// 压缩数据字节数（用于队列字节上限）
    pub fn size(&self) -> usize {
        match &self.payload {
            #[cfg(feature = "ffmpeg")]
            PacketPayload::Ffmpeg(packet) => packet.size(),
            PacketPayload::Bytes(bytes) => bytes.len(),
            PacketPayload::EndOfInput => 0,
        }
    }
}

impl std::fmt::Debug for MediaPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaPacket")
            .field("stream_index", &self.stream_index)
            .field("pts", &self.pts)
            .field("dts", &self.dts)
            .field("size", &self.size())
            .finish()
    }
}

/// Demuxer 数据源抽象接口
///
/// 这个 trait 定义了所有 Demuxer 实现必须提供的方法
/// 不同的媒体源（本地文件、网络流、内存流等）可以实现这个接口
pub trait DemuxerSource: Send {
    /// 读取下一个媒体包
    ///
    /// 返回：
    /// - Ok(Some(packet)): 成功读取一个包
    /// - Ok(None): 到达文件末尾
    /// - Err(e): 读取错误（可能是暂时的，例如网络抖动）
    fn read_packet(&mut self) -> Result<Option<MediaPacket>>;

    /// Seek 到指定位置（毫秒）
    fn seek(&mut self, timestamp_ms: i64) -> Result<()>;

    /// 容器没有给出时长时，扫描整个输入得到时长（毫秒）并回到开头。
    /// 每读一个包检查一次 `stop`，被中断时返回 None
    fn probe_duration(&mut self, _stop: &StopSignal) -> Option<i64> {
        None
    }

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 视频解码器接口：解码并完成像素格式转换
pub trait VideoCodec: Send {
    /// 解码一个包，输出 0~n 帧
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>>;

    /// 输入结束：取出解码器里还缓存着的帧（例如重排序延迟的帧）
    fn drain(&mut self) -> Result<Vec<VideoFrame>> {
        Ok(Vec::new())
    }

    /// 清空解码器内部缓存（seek 后调用）
    fn flush(&mut self);

    fn info(&self) -> String;
}

/// 音频解码器接口：解码并重采样到输出格式
pub trait AudioCodec: Send {
    /// 解码一个包，输出 0~n 段 PCM
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<AudioFrame>>;

    /// 输入结束：取出解码器里剩余的采样
    fn drain(&mut self) -> Result<Vec<AudioFrame>> {
        Ok(Vec::new())
    }

    /// 清空解码器内部缓存（seek 后调用）
    fn flush(&mut self);

    fn info(&self) -> String;
}

/// 打开媒体时的输出参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenOptions {
    pub audio: AudioSpec,
    pub pixel_format: PixelFormat,
    pub stream_timeout_ms: u64,
}

/// 打开成功后得到的全部会话资源
pub struct OpenedMedia {
    pub demuxer: Box<dyn DemuxerSource>,
    pub video_decoder: Option<Box<dyn VideoCodec>>,
    pub audio_decoder: Option<Box<dyn AudioCodec>>,
    pub media_info: MediaInfo,
}

/// 媒体后端：负责打开容器、探测流信息、查找并打开解码器
///
/// 失败时返回的错误会让引擎回到 Closed，已经获取的资源随返回值一起释放。
pub trait MediaBackend: Send + Sync {
    fn open(&self, source: &MediaSource, options: &OpenOptions) -> Result<OpenedMedia>;
}
