use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// 以位模式存放在 AtomicU64 中的 f64
#[derive(Debug)]
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }

    /// 读取-计算-CAS，失败（其他线程抢先写入）则重试
    fn add(&self, delta: f64) -> f64 {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return f64::from_bits(next),
                Err(actual) => current = actual,
            }
        }
    }
}

/// 播放时钟 - 用于音视频同步
///
/// 所有时间单位均为秒：
/// - `now()` 是单调递增的墙钟时间（从时钟创建开始计）
/// - `audio_time` 是音频线程已送出的媒体时间，按每段 PCM 的时长累加
/// - `offset` 是显示时间基准：一帧的显示时刻 = offset + pts
///
/// 暂停期间 offset 不变，恢复时 offset 加上暂停时长，所以已经排好的显示时刻
/// 整体后移，而不需要重新计算每一帧。
#[derive(Clone, Debug)]
pub struct PlaybackClock {
    inner: Arc<ClockInner>,
}

#[derive(Debug)]
struct ClockInner {
    epoch: Instant,
    audio_time: AtomicF64,
    offset: AtomicF64,
    pause_started: AtomicF64,
    paused: AtomicBool,
    anchor_pending: AtomicBool,
    audio_driven: AtomicBool,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClockInner {
                epoch: Instant::now(),
                audio_time: AtomicF64::new(0.0),
                offset: AtomicF64::new(0.0),
                pause_started: AtomicF64::new(0.0),
                paused: AtomicBool::new(false),
                anchor_pending: AtomicBool::new(true),
                audio_driven: AtomicBool::new(false),
            }),
        }
    }

    /// 当前墙钟时间（秒）
    pub fn now(&self) -> f64 {
        self.inner.epoch.elapsed().as_secs_f64()
    }

    /// 显示时间基准
    pub fn offset(&self) -> f64 {
        self.inner.offset.load()
    }

    /// pts（秒）对应的绝对显示时刻
    pub fn display_time(&self, pts_seconds: f64) -> f64 {
        self.offset() + pts_seconds
    }

    /// 平移显示时间基准
    pub fn shift_offset(&self, delta: f64) -> f64 {
        self.inner.offset.add(delta)
    }

    /// 声明该会话的时钟由音频驱动
    pub fn set_audio_driven(&self, audio_driven: bool) {
        self.inner.audio_driven.store(audio_driven, Ordering::Release);
    }

    pub fn is_audio_driven(&self) -> bool {
        self.inner.audio_driven.load(Ordering::Acquire)
    }

    /// 音频线程每送出一段 PCM 调用一次
    pub fn append_audio(&self, duration_seconds: f64) -> f64 {
        self.inner.audio_time.add(duration_seconds)
    }

    /// 已送出的音频媒体时间（秒）
    pub fn audio_time(&self) -> f64 {
        self.inner.audio_time.load()
    }

    /// 当前播放位置（秒）
    ///
    /// 音频驱动时是实际听到的位置：已送出的音频时间减去设备里还没播放的缓冲时长；
    /// 否则按墙钟和显示时间基准推算，暂停期间停在暂停时刻。
    pub fn position(&self, audio_latency_seconds: f64) -> f64 {
        if self.is_audio_driven() {
            return (self.audio_time() - audio_latency_seconds).max(0.0);
        }
        let reference = if self.is_paused() {
            self.inner.pause_started.load()
        } else {
            self.now()
        };
        (reference - self.offset()).max(0.0)
    }

    /// 开始播放（可以以暂停状态开始）
    pub fn start(&self, paused: bool) {
        self.inner.anchor_pending.store(true, Ordering::Release);
        if paused {
            self.pause();
        } else {
            self.inner.paused.store(false, Ordering::Release);
        }
    }

    /// 暂停：记录暂停开始时刻
    pub fn pause(&self) {
        self.inner.pause_started.store(self.now());
        self.inner.paused.store(true, Ordering::Release);
    }

    /// 恢复：offset += 暂停时长，返回暂停时长
    pub fn resume(&self) -> f64 {
        let paused_for = (self.now() - self.inner.pause_started.load()).max(0.0);
        self.shift_offset(paused_for);
        self.inner.paused.store(false, Ordering::Release);
        paused_for
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Seek 之后重置：音频时间跳到目标位置，等待下一帧重新锚定；
    /// 暂停中的 seek 把已经暂停的时长并入 offset，并从现在开始重新计时
    pub fn reset_for_seek(&self, target_seconds: f64) {
        if self.is_paused() {
            let now = self.now();
            let paused_for = (now - self.inner.pause_started.load()).max(0.0);
            self.shift_offset(paused_for);
            self.inner.pause_started.store(now);
        }
        self.inner.audio_time.store(target_seconds);
        self.inner.anchor_pending.store(true, Ordering::Release);
    }

    /// 开始或 seek 后的首个解码单元把 offset 锚定到自己的 pts。
    /// 只有第一个调用者生效，返回是否由本次调用完成锚定。
    pub fn anchor(&self, pts_seconds: f64) -> bool {
        if self
            .inner
            .anchor_pending
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let reference = if self.is_paused() {
            self.inner.pause_started.load()
        } else {
            self.now()
        };
        self.inner.offset.store(reference - pts_seconds);
        self.inner.audio_time.store(pts_seconds);
        true
    }

    /// 让视频跟随音频：音频实际听到的位置 = audio_time - latency，
    /// 偏差超过阈值时修正 offset，返回修正量
    pub fn resync_to_audio(&self, latency_seconds: f64, threshold_seconds: f64) -> Option<f64> {
        if self.is_paused() || self.inner.anchor_pending.load(Ordering::Acquire) {
            return None;
        }
        let heard = self.audio_time() - latency_seconds;
        let drift = self.offset() + heard - self.now();
        if drift.abs() > threshold_seconds {
            self.shift_offset(-drift);
            Some(drift)
        } else {
            None
        }
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_audio_accumulates_across_threads() {
        let clock = PlaybackClock::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = clock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        clock.append_audio(0.001);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!((clock.audio_time() - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_pause_resume_shifts_offset_by_paused_time() {
        let clock = PlaybackClock::new();
        clock.start(false);
        assert!(clock.anchor(0.0));
        let before = clock.offset();

        clock.pause();
        thread::sleep(Duration::from_millis(120));
        let paused_for = clock.resume();

        let shifted = clock.offset() - before;
        assert!((shifted - paused_for).abs() < 1e-9);
        assert!(shifted >= 0.11 && shifted < 0.5, "shifted = {}", shifted);
    }

    #[test]
    fn test_anchor_only_once_until_reset() {
        let clock = PlaybackClock::new();
        clock.start(false);
        assert!(clock.anchor(2.0));
        assert!(!clock.anchor(5.0));
        assert!((clock.audio_time() - 2.0).abs() < 1e-9);

        clock.reset_for_seek(50.0);
        assert!((clock.audio_time() - 50.0).abs() < 1e-9);
        assert!(clock.anchor(50.0));
        // 锚定后 50 秒处的帧应当马上显示
        assert!((clock.display_time(50.0) - clock.now()).abs() < 0.05);
    }

    #[test]
    fn test_anchor_while_paused_uses_pause_start() {
        let clock = PlaybackClock::new();
        clock.start(true);
        thread::sleep(Duration::from_millis(30));
        assert!(clock.anchor(10.0));
        // 暂停期间位置保持在锚点
        assert!((clock.position(0.0) - 10.0).abs() < 1e-6);
        thread::sleep(Duration::from_millis(30));
        clock.resume();
        assert!((clock.display_time(10.0) - clock.now()).abs() < 0.02);
    }

    #[test]
    fn test_audio_driven_position_excludes_device_buffer() {
        let clock = PlaybackClock::new();
        clock.set_audio_driven(true);
        clock.start(false);
        assert!(clock.anchor(30.0));
        clock.append_audio(0.5);
        assert!((clock.position(0.2) - 30.3).abs() < 1e-9);
        // 缓冲比已送出的还多时不会变成负数
        clock.reset_for_seek(0.0);
        assert_eq!(clock.position(0.5), 0.0);
    }

    #[test]
    fn test_resync_follows_audio() {
        let clock = PlaybackClock::new();
        clock.set_audio_driven(true);
        clock.start(false);
        clock.anchor(0.0);
        // 音频领先墙钟 1 秒
        clock.append_audio(1.0);
        let drift = clock.resync_to_audio(0.0, 0.1).expect("should resync");
        assert!(drift > 0.9);
        assert!(clock.resync_to_audio(0.0, 0.1).is_none());
    }
}
