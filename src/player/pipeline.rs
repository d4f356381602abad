use crate::core::{BufferStatus, EngineConfig, EngineState, PlaybackClock};
use crate::player::audio_output::AudioSink;
use crate::player::frame_ring::FrameRing;
use crate::player::listener::Listeners;
use crate::player::packet_queue::PacketQueue;
use crate::player::worker::PauseGate;
use log::info;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

const NO_SEEK: i64 = -1;

/// 一个会话内各线程共享的播放管线
///
/// 由引擎创建，协调线程、解码线程和显示线程各持有一个 `Arc`。
/// 会话关闭时所有线程先被中断并 join，之后它才被释放。
pub struct Pipeline {
    pub config: EngineConfig,
    pub video_queue: PacketQueue,
    pub audio_queue: PacketQueue,
    pub ring: Arc<FrameRing>,
    pub clock: PlaybackClock,
    pub pause_gate: PauseGate,
    pub listeners: Arc<Listeners>,
    pub sink: Option<Arc<dyn AudioSink>>,
    pub state: Arc<Mutex<EngineState>>,
    seek_target: AtomicI64,
    // 上一次 seek 的目标减一帧：容器落在目标之前的关键帧上，早于它的解码结果不输出
    seek_floor_ms: AtomicI64,
    frame_duration_ms: i64,
    // 暂停中 seek 后，视频线程越过暂停闸门解出一帧预览
    seek_preview: AtomicBool,
    duration_ms: AtomicI64,
    position_ms: AtomicI64,
}

impl Pipeline {
    pub fn new(
        config: EngineConfig,
        listeners: Arc<Listeners>,
        sink: Option<Arc<dyn AudioSink>>,
        state: Arc<Mutex<EngineState>>,
        duration_ms: i64,
        frame_duration_ms: i64,
    ) -> Self {
        let clock = PlaybackClock::new();
        clock.set_audio_driven(sink.is_some());
        Self {
            video_queue: PacketQueue::new("video", config.video_queue_packets, config.max_queue_bytes),
            audio_queue: PacketQueue::new("audio", config.audio_queue_packets, config.max_queue_bytes),
            ring: Arc::new(FrameRing::new(config.frame_ring_capacity)),
            clock,
            pause_gate: PauseGate::new(false),
            listeners,
            sink,
            state,
            seek_target: AtomicI64::new(NO_SEEK),
            seek_floor_ms: AtomicI64::new(i64::MIN),
            frame_duration_ms: frame_duration_ms.max(1),
            seek_preview: AtomicBool::new(false),
            duration_ms: AtomicI64::new(duration_ms.max(0)),
            position_ms: AtomicI64::new(0),
            config,
        }
    }

    /// 请求 seek（毫秒）。新的请求覆盖尚未执行的旧请求
    pub fn request_seek(&self, target_ms: i64) {
        let target_ms = target_ms.max(0);
        let previous = self.seek_target.swap(target_ms, Ordering::AcqRel);
        if previous != NO_SEEK {
            info!(
                "{} ⏩ Seek 请求 {}ms 覆盖了尚未执行的 {}ms",
                super::log_ctx(),
                target_ms,
                previous
            );
        }
        // 让阻塞在满队列上的协调线程立刻丢弃手里的包
        self.video_queue.wake_all();
        self.audio_queue.wake_all();
    }

    /// 原子地取走待执行的 seek 目标
    pub fn take_seek(&self) -> Option<i64> {
        match self.seek_target.swap(NO_SEEK, Ordering::AcqRel) {
            NO_SEEK => None,
            target => Some(target),
        }
    }

    pub fn seek_pending(&self) -> bool {
        self.seek_target.load(Ordering::Acquire) != NO_SEEK
    }

    /// 记录已执行的 seek 目标，之后解码出的早于“目标 - 一帧”的单元被丢弃
    pub fn set_seek_floor(&self, target_ms: i64) {
        self.seek_floor_ms
            .store(target_ms - self.frame_duration_ms, Ordering::Release);
    }

    /// 该时间戳的解码单元是否落在 seek 目标之前（需要丢弃）
    pub fn before_seek_target(&self, pts_ms: i64) -> bool {
        pts_ms < self.seek_floor_ms.load(Ordering::Acquire)
    }

    pub fn request_seek_preview(&self) {
        self.seek_preview.store(true, Ordering::Release);
    }

    pub fn take_seek_preview(&self) -> bool {
        self.seek_preview.swap(false, Ordering::AcqRel)
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_ms.load(Ordering::Acquire)
    }

    pub fn set_duration_ms(&self, duration_ms: i64) {
        self.duration_ms.store(duration_ms.max(0), Ordering::Release);
    }

    /// 最近一次上报的播放位置（毫秒）
    pub fn position_ms(&self) -> i64 {
        self.position_ms.load(Ordering::Acquire)
    }

    /// 记录并上报播放位置
    pub fn report_position(&self, position_ms: i64) {
        self.position_ms.store(position_ms, Ordering::Release);
        let duration_ms = self.duration_ms();
        self.listeners
            .notify(|l| l.frame_position_changed(position_ms, duration_ms));
    }

    pub fn set_position_ms(&self, position_ms: i64) {
        self.position_ms.store(position_ms, Ordering::Release);
    }

    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    pub fn set_state(&self, state: EngineState) {
        *self.state.lock() = state;
    }

    /// Seek 结束后离开 Seeking：暂停闸门决定回到 Playing 还是 Paused
    pub fn leave_seeking(&self) {
        let mut state = self.state.lock();
        if *state == EngineState::Seeking {
            *state = if self.pause_gate.is_paused() {
                EngineState::Paused
            } else {
                EngineState::Playing
            };
        }
    }

    pub fn buffer_status(&self) -> BufferStatus {
        BufferStatus {
            video_packets: self.video_queue.len(),
            video_bytes: self.video_queue.bytes(),
            audio_packets: self.audio_queue.len(),
            audio_bytes: self.audio_queue.bytes(),
            video_frames: self.ring.occupancy(),
        }
    }

    /// 唤醒所有可能阻塞的等待点，让线程重新检查中断标志
    pub fn wake_all(&self) {
        self.video_queue.wake_all();
        self.audio_queue.wake_all();
        self.ring.wake_all();
        self.pause_gate.wake_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline() -> Pipeline {
        Pipeline::new(
            EngineConfig::default(),
            Arc::new(Listeners::new()),
            None,
            Arc::new(Mutex::new(EngineState::Playing)),
            100_000,
            40,
        )
    }

    #[test]
    fn test_seek_requests_coalesce() {
        let pipeline = pipeline();
        assert!(!pipeline.seek_pending());
        pipeline.request_seek(10_000);
        pipeline.request_seek(20_000);
        assert!(pipeline.seek_pending());
        assert_eq!(pipeline.take_seek(), Some(20_000));
        assert_eq!(pipeline.take_seek(), None);
    }

    #[test]
    fn test_negative_seek_clamped_to_start() {
        let pipeline = pipeline();
        pipeline.request_seek(-500);
        assert_eq!(pipeline.take_seek(), Some(0));
    }

    #[test]
    fn test_seek_floor_allows_one_frame_early() {
        let pipeline = pipeline();
        assert!(!pipeline.before_seek_target(0));

        pipeline.set_seek_floor(47_000);
        assert!(pipeline.before_seek_target(46_000));
        assert!(pipeline.before_seek_target(46_959));
        assert!(!pipeline.before_seek_target(46_960));
        assert!(!pipeline.before_seek_target(47_040));
    }

    #[test]
    fn test_leave_seeking_follows_pause_gate() {
        let pipeline = pipeline();
        pipeline.pause_gate.set_paused(true);
        pipeline.set_state(EngineState::Seeking);
        pipeline.leave_seeking();
        assert_eq!(pipeline.state(), EngineState::Paused);

        // 非 Seeking 状态不被覆盖
        pipeline.set_state(EngineState::Closing);
        pipeline.leave_seeking();
        assert_eq!(pipeline.state(), EngineState::Closing);
    }
}
