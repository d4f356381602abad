use crate::core::{AudioSpec, PixelFormat, PlayerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 播放引擎可调参数
///
/// 默认值沿用原有经验值：包队列 200/150 个包、15MB，环形缓冲 3 帧，
/// EOF 轮询 10ms，长等待上限 3 秒，送显提前量 5ms。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 视频包队列最大包数
    pub video_queue_packets: usize,
    /// 音频包队列最大包数
    pub audio_queue_packets: usize,
    /// 单个包队列最大字节数
    pub max_queue_bytes: usize,
    /// 视频帧环形缓冲容量
    pub frame_ring_capacity: usize,
    /// 到达 EOF 后检查是否排空的轮询间隔（毫秒）
    pub eof_poll_ms: u64,
    /// 帧显示时间落后超过该值（毫秒）且后面还有帧时直接丢弃
    pub frame_drop_lateness_ms: u64,
    /// 剩余等待时间小于该值（毫秒）时立即送显
    pub presentation_slack_ms: u64,
    /// 单次等待显示的最长睡眠（毫秒），超过则分段睡眠以便响应 seek/关闭
    pub long_sleep_cap_ms: u64,
    /// 音频输出格式
    pub audio: AudioSpec,
    /// 音频设备中最多预先缓冲多少毫秒的数据
    pub audio_buffer_ahead_ms: u64,
    /// 音视频偏差超过该值（毫秒）时让视频时钟跟随音频
    pub audio_sync_threshold_ms: u64,
    /// 视频帧输出像素格式
    pub pixel_format: PixelFormat,
    /// 网络流打开超时（毫秒）
    pub stream_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            video_queue_packets: 200,
            audio_queue_packets: 150,
            max_queue_bytes: 15 * 1024 * 1024,
            frame_ring_capacity: 3,
            eof_poll_ms: 10,
            frame_drop_lateness_ms: 0,
            presentation_slack_ms: 5,
            long_sleep_cap_ms: 3000,
            audio: AudioSpec::default(),
            audio_buffer_ahead_ms: 200,
            audio_sync_threshold_ms: 100,
            pixel_format: PixelFormat::RGBA,
            stream_timeout_ms: 5000,
        }
    }
}

impl EngineConfig {
    /// 从 JSON 字符串加载（缺省字段使用默认值）
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// 校验参数
    pub fn validate(&self) -> Result<()> {
        if self.video_queue_packets == 0 || self.audio_queue_packets == 0 {
            return Err(PlayerError::ConfigError("包队列容量必须大于 0".to_string()));
        }
        if self.max_queue_bytes == 0 {
            return Err(PlayerError::ConfigError("包队列字节上限必须大于 0".to_string()));
        }
        if self.frame_ring_capacity == 0 {
            return Err(PlayerError::ConfigError("环形缓冲容量必须大于 0".to_string()));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(PlayerError::ConfigError(format!(
                "音频格式无效: {} Hz, {} 声道",
                self.audio.sample_rate, self.audio.channels
            )));
        }
        if self.long_sleep_cap_ms == 0 {
            return Err(PlayerError::ConfigError("长等待上限必须大于 0".to_string()));
        }
        Ok(())
    }

    pub fn eof_poll(&self) -> Duration {
        Duration::from_millis(self.eof_poll_ms)
    }

    pub fn frame_drop_lateness(&self) -> f64 {
        self.frame_drop_lateness_ms as f64 / 1000.0
    }

    pub fn presentation_slack(&self) -> f64 {
        self.presentation_slack_ms as f64 / 1000.0
    }

    pub fn long_sleep_cap(&self) -> f64 {
        self.long_sleep_cap_ms as f64 / 1000.0
    }

    pub fn audio_buffer_ahead(&self) -> f64 {
        self.audio_buffer_ahead_ms as f64 / 1000.0
    }

    pub fn audio_sync_threshold(&self) -> f64 {
        self.audio_sync_threshold_ms as f64 / 1000.0
    }
}
