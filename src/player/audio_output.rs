use crate::core::{AudioSpec, Result};
#[cfg(feature = "audio-cpal")]
use crate::core::PlayerError;
#[cfg(feature = "audio-cpal")]
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
#[cfg(feature = "audio-cpal")]
use cpal::{Device, Stream, StreamConfig, SupportedStreamConfigRange};
#[cfg(feature = "audio-cpal")]
use crossbeam::queue::SegQueue;
#[cfg(feature = "audio-cpal")]
use log::{debug, error, info, warn};
#[cfg(feature = "audio-cpal")]
use parking_lot::Mutex;
#[cfg(feature = "audio-cpal")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "audio-cpal")]
use std::sync::Arc;

/// 音频输出设备接口
///
/// 交错排列的 f32 PCM 写进来，由设备按实时速度消费。
/// 引擎和音频解码线程共享同一个实例，所以方法都取 `&self`。
pub trait AudioSink: Send + Sync {
    /// 按请求的格式打开设备，返回设备实际使用的格式（可能回退）
    fn open(&self, spec: AudioSpec) -> Result<AudioSpec>;

    /// 写入一段 PCM
    fn write(&self, samples: &[f32]);

    /// 设置音量 (0.0 - 1.0)
    fn set_volume(&self, volume: f64);

    fn volume(&self) -> f64;

    /// 丢弃设备中尚未播放的数据（seek 时调用）
    fn reset(&self);

    fn close(&self);

    fn set_paused(&self, _paused: bool) {}

    /// 已写入但还没播放的时长（秒）
    fn buffered_seconds(&self) -> f64;
}

/// 音频输出 - 使用 cpal 播放音频
#[cfg(feature = "audio-cpal")]
pub struct AudioOutput {
    stream: Mutex<Option<ActiveStream>>,
    buffer: Arc<SegQueue<f32>>,
    volume: Arc<Mutex<f32>>,
    paused: Arc<AtomicBool>,
}

#[cfg(feature = "audio-cpal")]
struct ActiveStream {
    stream: Stream,
    spec: AudioSpec,
}

// cpal::Stream 本身不是 Send/Sync；流只在 open/close/set_paused 中通过互斥锁访问，
// 回调线程只接触 buffer/volume/paused 这几个线程安全的共享值
#[cfg(feature = "audio-cpal")]
unsafe impl Send for AudioOutput {}
#[cfg(feature = "audio-cpal")]
unsafe impl Sync for AudioOutput {}

#[cfg(feature = "audio-cpal")]
impl AudioOutput {
    pub fn new() -> Self {
        Self {
            stream: Mutex::new(None),
            buffer: Arc::new(SegQueue::new()),
            volume: Arc::new(Mutex::new(1.0)),
            paused: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 选出设备支持的配置（支持非标准配置自动回退）
    fn negotiate(device: &Device, spec: AudioSpec) -> Result<StreamConfig> {
        let requested = StreamConfig {
            channels: spec.channels,
            sample_rate: cpal::SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };
        if Self::is_supported(device, &requested)? {
            return Ok(requested);
        }

        warn!(
            "⚠️  音频设备不支持 {} Hz, {} 声道配置，回退到标准配置",
            spec.sample_rate, spec.channels
        );
        const FALLBACKS: [(u32, u16); 4] = [(48000, 2), (44100, 2), (48000, 1), (44100, 1)];
        for (rate, channels) in FALLBACKS {
            let fallback = StreamConfig {
                channels,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: cpal::BufferSize::Default,
            };
            if Self::is_supported(device, &fallback)? {
                info!("✅ 使用回退配置: {} Hz, {} 声道", rate, channels);
                return Ok(fallback);
            }
        }

        Err(PlayerError::AudioError(format!(
            "音频设备不支持任何标准配置 (原请求: {} Hz, {} 声道)",
            spec.sample_rate, spec.channels
        )))
    }

    fn is_supported(device: &Device, config: &StreamConfig) -> Result<bool> {
        let supported = device
            .supported_output_configs()
            .map_err(|e| PlayerError::AudioError(format!("无法获取支持的音频配置: {}", e)))?;
        Ok(supported.into_iter().any(|range| Self::is_config_compatible(config, &range)))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;
        rate_in_range && config.channels == supported.channels()
    }

    fn clear_buffer(&self) {
        while self.buffer.pop().is_some() {}
    }
}

#[cfg(feature = "audio-cpal")]
impl Default for AudioOutput {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "audio-cpal")]
impl AudioSink for AudioOutput {
    fn open(&self, spec: AudioSpec) -> Result<AudioSpec> {
        let mut active = self.stream.lock();
        if let Some(current) = active.as_ref() {
            if current.spec == spec {
                return Ok(current.spec);
            }
        }
        // 重新打开前先释放旧的流
        *active = None;
        self.clear_buffer();
        info!("初始化音频输出: {} Hz, {} 声道", spec.sample_rate, spec.channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioError("无法找到音频输出设备".to_string()))?;
        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let config = Self::negotiate(&device, spec)?;
        let actual = AudioSpec {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        let buffer = self.buffer.clone();
        let volume = self.volume.clone();
        let paused = self.paused.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    if paused.load(Ordering::Acquire) {
                        data.fill(0.0);
                        return;
                    }
                    let vol = *volume.lock();
                    for sample in data.iter_mut() {
                        *sample = buffer.pop().map_or(0.0, |value| value * vol);
                    }
                },
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioError(format!("创建音频流失败: {}", e)))?;

        stream
            .play()
            .map_err(|e| PlayerError::AudioError(format!("启动音频流失败: {}", e)))?;

        *active = Some(ActiveStream { stream, spec: actual });
        info!("音频输出已启动");
        Ok(actual)
    }

    fn write(&self, samples: &[f32]) {
        for sample in samples {
            self.buffer.push(*sample);
        }
    }

    fn set_volume(&self, volume: f64) {
        *self.volume.lock() = volume.clamp(0.0, 1.0) as f32;
    }

    fn volume(&self) -> f64 {
        *self.volume.lock() as f64
    }

    fn reset(&self) {
        self.clear_buffer();
    }

    fn close(&self) {
        if self.stream.lock().take().is_some() {
            info!("音频输出已停止");
        }
        self.clear_buffer();
        self.paused.store(false, Ordering::Release);
    }

    fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
        if let Some(active) = self.stream.lock().as_ref() {
            let result = if paused { active.stream.pause() } else { active.stream.play() };
            if let Err(e) = result {
                warn!("切换音频流暂停状态失败: {}", e);
            }
        }
    }

    fn buffered_seconds(&self) -> f64 {
        let spec = match self.stream.lock().as_ref() {
            Some(active) => active.spec,
            None => return 0.0,
        };
        let per_second = spec.sample_rate as f64 * spec.channels as f64;
        if per_second <= 0.0 {
            return 0.0;
        }
        self.buffer.len() as f64 / per_second
    }
}

#[cfg(feature = "audio-cpal")]
impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}
