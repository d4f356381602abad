use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[cfg(feature = "ffmpeg")]
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("无法打开文件: {0}")]
    OpenError(String),

    #[error("不支持的容器格式: {0}")]
    UnsupportedContainer(String),

    #[error("没有可播放的音频或视频流")]
    NoPlayableStream,

    #[error("找不到解码器: {0}")]
    DecoderNotFound(String),

    #[error("视频分辨率无效: {width}x{height}")]
    DegenerateResolution { width: u32, height: u32 },

    #[error("解码错误: {0}")]
    DecodeError(String),

    #[error("Seek 失败: {0}")]
    SeekError(String),

    #[error("音频输出错误: {0}")]
    AudioError(String),

    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("配置解析失败: {0}")]
    ConfigParse(#[from] serde_json::Error),
}

impl PlayerError {
    /// 是否属于媒体本身导致的打开失败（文件、容器、流或解码器问题）
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            PlayerError::OpenError(_)
                | PlayerError::UnsupportedContainer(_)
                | PlayerError::NoPlayableStream
                | PlayerError::DecoderNotFound(_)
                | PlayerError::DegenerateResolution { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;
