use crate::core::{
    BufferStatus, EngineConfig, EngineState, MediaInfo, MediaSource, PixelFormat, PlayerError, Result, VideoFrame,
};
use crate::player::audio_output::AudioSink;
use crate::player::demuxer_source::{MediaBackend, OpenOptions};
use crate::player::demuxer_thread::{CoordinatorParts, DemuxerThread};
use crate::player::listener::{DecoderListener, FrameListener, Listeners};
use crate::player::pipeline::Pipeline;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

/// 一次打开的媒体：从 open 成功到 close 之间存在
struct Session {
    source: MediaSource,
    media_info: MediaInfo,
    pipeline: Arc<Pipeline>,
    // play() 之前解封装器和解码器放在这里，play() 时交给协调线程
    pending: Option<CoordinatorParts>,
    demuxer_thread: Option<DemuxerThread>,
    audio_open: bool,
}

/// 播放管理器 - 整体控制播放流程
///
/// 状态机：`Closed --open--> Opening --play--> Playing|Paused`，
/// `Playing <--pause_resume--> Paused`，seek 期间短暂处于 `Seeking`，
/// `close` 经过 `Closing` 回到 `Closed`。所有方法都取 `&self`，可以从任意线程调用。
pub struct PlaybackManager {
    backend: Arc<dyn MediaBackend>,
    sink: Arc<dyn AudioSink>,
    config: Mutex<EngineConfig>,
    listeners: Arc<Listeners>,
    state: Arc<Mutex<EngineState>>,
    session: Mutex<Option<Session>>,
    // 串行化 open/close/play，避免两个会话交错
    control: Mutex<()>,
    volume: Mutex<f64>,
    last_error: Mutex<Option<String>>,
}

impl PlaybackManager {
    pub fn new(backend: Arc<dyn MediaBackend>, sink: Arc<dyn AudioSink>, config: EngineConfig) -> Self {
        info!("{} 🎮 创建播放管理器...", super::log_ctx());
        Self {
            backend,
            sink,
            config: Mutex::new(config),
            listeners: Arc::new(Listeners::new()),
            state: Arc::new(Mutex::new(EngineState::Closed)),
            session: Mutex::new(None),
            control: Mutex::new(()),
            volume: Mutex::new(1.0),
            last_error: Mutex::new(None),
        }
    }

    /// 设置事件监听器（只保存弱引用）
    pub fn set_decoder_listener(&self, listener: Option<&Arc<dyn DecoderListener>>) {
        self.listeners.set_decoder_listener(listener);
    }

    /// 设置画面监听器（只保存弱引用）
    pub fn set_frame_listener(&self, listener: Option<&Arc<dyn FrameListener>>) {
        self.listeners.set_frame_listener(listener);
    }

    /// 打开本地文件
    pub fn open(&self, path: impl AsRef<Path>) -> bool {
        let source = MediaSource::LocalFile(path.as_ref().to_path_buf());
        self.try_open(source).is_ok()
    }

    /// 打开网络流（或任意 URL）
    pub fn open_stream(&self, url: &str) -> bool {
        self.try_open(MediaSource::from_url(url)).is_ok()
    }

    /// 打开媒体源，失败时返回具体错误；引擎保持 Closed
    pub fn try_open(&self, source: MediaSource) -> Result<MediaInfo> {
        let _control = self.control.lock();
        self.close_locked();

        info!("{} 📂 打开媒体: {}", super::log_ctx(), source.location());
        self.set_state(EngineState::Opening);
        *self.last_error.lock() = None;

        match self.open_session(source) {
            Ok(media_info) => {
                info!("{} 📎 媒体信息: {:?}", super::log_ctx(), media_info);
                self.listeners.notify(|l| l.file_loaded());
                Ok(media_info)
            }
            Err(e) => {
                if e.is_open_failure() {
                    warn!("{} ❌ 打开失败: {}", super::log_ctx(), e);
                } else {
                    error!("{} ❌ 打开失败: {}", super::log_ctx(), e);
                }
                *self.last_error.lock() = Some(e.to_string());
                self.set_state(EngineState::Closed);
                Err(e)
            }
        }
    }

    fn open_session(&self, source: MediaSource) -> Result<MediaInfo> {
        let config = self.config.lock().clone();

        // 先打开音频设备，解码器按设备实际格式重采样
        let device_spec = match self.sink.open(config.audio) {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!("{} ⚠️ 音频设备不可用，仅播放视频: {}", super::log_ctx(), e);
                None
            }
        };
        let options = OpenOptions {
            audio: device_spec.unwrap_or(config.audio),
            pixel_format: config.pixel_format,
            stream_timeout_ms: config.stream_timeout_ms,
        };

        let opened = match self.backend.open(&source, &options) {
            Ok(opened) => opened,
            Err(e) => {
                if device_spec.is_some() {
                    self.sink.close();
                }
                return Err(e);
            }
        };

        let mut audio_decoder = opened.audio_decoder;
        if device_spec.is_none() {
            audio_decoder = None;
        }
        let audio_open = audio_decoder.is_some();
        if device_spec.is_some() && !audio_open {
            self.sink.close();
        }
        if audio_open {
            self.sink.set_volume(*self.volume.lock());
        }
        if opened.video_decoder.is_none() && !audio_open {
            return Err(PlayerError::NoPlayableStream);
        }

        let media_info = opened.media_info;
        let pipeline = Arc::new(Pipeline::new(
            config,
            self.listeners.clone(),
            audio_open.then(|| self.sink.clone()),
            self.state.clone(),
            media_info.duration,
            media_info.frame_duration_ms(),
        ));
        let parts = CoordinatorParts {
            demuxer: opened.demuxer,
            video_decoder: opened.video_decoder,
            audio_decoder,
            video_stream: media_info.video_stream_index,
            audio_stream: media_info.audio_stream_index,
            network_stream: source.is_network_stream(),
        };

        *self.session.lock() = Some(Session {
            source,
            media_info: media_info.clone(),
            pipeline,
            pending: Some(parts),
            demuxer_thread: None,
            audio_open,
        });
        Ok(media_info)
    }

    /// 最近一次打开失败的原因
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// 关闭当前会话：停止全部线程并释放资源。没有会话时什么都不做
    pub fn close(&self) {
        let _control = self.control.lock();
        self.close_locked();
    }

    fn close_locked(&self) {
        // 先把会话取出来再停线程，停线程期间不持有会话锁
        let Some(mut session) = self.session.lock().take() else {
            return;
        };
        info!("{} ⏹️ 关闭: {}", super::log_ctx(), session.source.location());
        self.set_state(EngineState::Closing);

        if let Some(mut thread) = session.demuxer_thread.take() {
            thread.stop();
        }
        session.pipeline.video_queue.clear();
        session.pipeline.audio_queue.clear();
        session.pipeline.ring.clear();
        if session.audio_open {
            self.sink.close();
        }
        drop(session);

        self.set_state(EngineState::Closed);
        info!("{} ✅ 关闭完成，所有线程已清理", super::log_ctx());
        self.listeners.notify(|l| {
            l.file_released();
            l.decoder_closed();
            l.playing_finished();
        });
    }

    /// 启动播放线程，可以以暂停状态开始
    pub fn play(&self, start_paused: bool) {
        let _control = self.control.lock();
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            warn!("{} ⚠️ 没有打开的媒体，忽略 play", super::log_ctx());
            return;
        };
        let Some(parts) = session.pending.take() else {
            debug!("{} 播放线程已经启动", super::log_ctx());
            return;
        };

        let pipeline = session.pipeline.clone();
        pipeline.clock.start(start_paused);
        pipeline.pause_gate.set_paused(start_paused);
        if let Some(sink) = pipeline.sink.as_ref() {
            sink.set_paused(start_paused);
        }
        self.set_state(if start_paused {
            EngineState::Paused
        } else {
            EngineState::Playing
        });

        info!("{} 🎬 播放（start_paused={}）", super::log_ctx(), start_paused);
        match DemuxerThread::start(pipeline, parts) {
            Ok(thread) => session.demuxer_thread = Some(thread),
            Err(e) => {
                error!("{} ❌ 启动 Demuxer 线程失败: {}", super::log_ctx(), e);
                self.set_state(EngineState::Opening);
            }
        }
    }

    /// 切换暂停/播放。没有正在运行的会话时返回 false
    pub fn pause_resume(&self) -> bool {
        let Some(pipeline) = self.running_pipeline() else {
            return false;
        };

        if pipeline.pause_gate.is_paused() {
            let paused_for = pipeline.clock.resume();
            info!("{} ▶️ 恢复播放（暂停了 {:.3}s）", super::log_ctx(), paused_for);
            if let Some(sink) = pipeline.sink.as_ref() {
                sink.set_paused(false);
            }
            pipeline.pause_gate.set_paused(false);
            self.set_running_state(EngineState::Playing);
        } else {
            info!("{} ⏸️ 暂停", super::log_ctx());
            pipeline.clock.pause();
            pipeline.pause_gate.set_paused(true);
            if let Some(sink) = pipeline.sink.as_ref() {
                sink.set_paused(true);
            }
            self.set_running_state(EngineState::Paused);
        }
        // 显示线程可能正在等待一帧的显示时刻，让它重新检查暂停状态
        pipeline.ring.wake_all();
        true
    }

    /// 按比例 seek。`total_override_ms` < 0 时使用媒体总时长
    pub fn seek_by_percent(&self, fraction: f64, total_override_ms: i64) -> bool {
        let Some(pipeline) = self.running_pipeline() else {
            return false;
        };
        if !fraction.is_finite() {
            return false;
        }
        let total_ms = if total_override_ms < 0 {
            pipeline.duration_ms()
        } else {
            total_override_ms
        };
        let target_ms = (total_ms as f64 * fraction.clamp(0.0, 1.0)) as i64;
        info!("{} 🎯 Seek 到: {} ms（{:.1}%）", super::log_ctx(), target_ms, fraction * 100.0);
        pipeline.request_seek(target_ms);
        true
    }

    /// seek 到指定位置（毫秒）
    pub fn seek_to_ms(&self, position_ms: i64) -> bool {
        let Some(pipeline) = self.running_pipeline() else {
            return false;
        };
        info!("{} 🎯 Seek 到: {} ms", super::log_ctx(), position_ms);
        pipeline.request_seek(position_ms);
        true
    }

    /// 设置音量，超出 [0, 1] 的值直接忽略
    pub fn set_volume(&self, volume: f64) {
        if !(0.0..=1.0).contains(&volume) {
            debug!("{} 忽略无效音量: {}", super::log_ctx(), volume);
            return;
        }
        *self.volume.lock() = volume;
        let audio_open = self.session.lock().as_ref().is_some_and(|s| s.audio_open);
        if audio_open {
            self.sink.set_volume(volume);
        }
        self.listeners.notify(|l| l.volume_changed(volume));
    }

    pub fn volume(&self) -> f64 {
        *self.volume.lock()
    }

    /// 播放线程是否已经启动（暂停中也算）
    pub fn is_playing(&self) -> bool {
        self.running_pipeline().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.running_pipeline()
            .is_some_and(|pipeline| pipeline.pause_gate.is_paused())
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// 当前显示中的帧，没有则取环形缓冲读位置的帧
    pub fn current_frame(&self) -> Option<Arc<VideoFrame>> {
        let pipeline = self.running_pipeline()?;
        pipeline
            .ring
            .in_flight_frame()
            .or_else(|| pipeline.ring.current().map(|decoded| decoded.frame))
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.session.lock().as_ref().map(|session| {
            let mut info = session.media_info.clone();
            info.duration = session.pipeline.duration_ms();
            info
        })
    }

    /// 最近一次上报的播放位置（毫秒）
    pub fn position_ms(&self) -> i64 {
        self.session
            .lock()
            .as_ref()
            .map_or(0, |session| session.pipeline.position_ms())
    }

    /// 当前的显示时间基准（秒）
    pub fn clock_offset(&self) -> Option<f64> {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.pipeline.clock.offset())
    }

    pub fn buffer_status(&self) -> BufferStatus {
        self.session
            .lock()
            .as_ref()
            .map(|session| session.pipeline.buffer_status())
            .unwrap_or_default()
    }

    /// 修改视频输出像素格式（下一次打开生效）
    pub fn set_frame_format(&self, format: PixelFormat) {
        self.config.lock().pixel_format = format;
    }

    pub fn config(&self) -> EngineConfig {
        self.config.lock().clone()
    }

    /// 已经调用过 play() 的会话的管线
    fn running_pipeline(&self) -> Option<Arc<Pipeline>> {
        self.session
            .lock()
            .as_ref()
            .filter(|session| session.demuxer_thread.is_some())
            .map(|session| session.pipeline.clone())
    }

    fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
    }

    /// Seeking 期间只改暂停闸门，由协调线程在 seek 结束时决定最终状态
    fn set_running_state(&self, state: EngineState) {
        let mut current = self.state.lock();
        if *current != EngineState::Seeking {
            *current = state;
        }
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.close();
    }
}
