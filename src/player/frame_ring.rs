use crate::core::VideoFrame;
use crate::player::worker::StopSignal;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

/// 环形缓冲中的一帧：图像 + 绝对显示时刻（秒）
#[derive(Debug, Clone)]
pub struct DecodedVideoFrame {
    pub frame: Arc<VideoFrame>,
    pub display_time: f64,
}

#[derive(Default)]
struct Slot {
    frame: Option<Arc<VideoFrame>>,
    display_time: f64,
}

struct RingState {
    slots: Vec<Slot>,
    write: usize,
    read: usize,
    busy: usize,
    // 当前读位置的帧已交给显示层，等待确认
    in_flight: bool,
    // 每次 clear 加一，旧的确认不会作用到新内容上
    generation: u64,
}

/// 已解码视频帧的固定容量环形缓冲
///
/// 单写者（视频解码线程）单读者（显示线程）。槽位是否空闲由占用计数决定，
/// 读者确认（acknowledge）后槽位才会被写者复用。
pub struct FrameRing {
    capacity: usize,
    state: Mutex<RingState>,
    cv: Condvar,
}

impl FrameRing {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(RingState {
                slots: (0..capacity).map(|_| Slot::default()).collect(),
                write: 0,
                read: 0,
                busy: 0,
                in_flight: false,
                generation: 0,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 写入一帧，缓冲满时阻塞；被中断返回 false
    pub fn publish(&self, frame: VideoFrame, display_time: f64, stop: &StopSignal) -> bool {
        {
            let mut state = self.state.lock();
            while state.busy == self.capacity {
                if stop.is_interrupted() {
                    return false;
                }
                self.cv.wait(&mut state);
            }
            if stop.is_interrupted() {
                return false;
            }
            let write = state.write;
            state.slots[write] = Slot {
                frame: Some(Arc::new(frame)),
                display_time,
            };
            state.write = (write + 1) % self.capacity;
            state.busy += 1;
        }
        self.cv.notify_all();
        true
    }

    /// 读位置的帧（占用数 > 0 时）
    pub fn current(&self) -> Option<DecodedVideoFrame> {
        let state = self.state.lock();
        Self::head(&state)
    }

    fn head(state: &RingState) -> Option<DecodedVideoFrame> {
        if state.busy == 0 {
            return None;
        }
        let slot = &state.slots[state.read];
        slot.frame.as_ref().map(|frame| DecodedVideoFrame {
            frame: frame.clone(),
            display_time: slot.display_time,
        })
    }

    /// 等待直到有帧可读且没有正在显示的帧，返回 (帧, 占用数, 代号)；被中断返回 None
    pub fn wait_for_frame(&self, stop: &StopSignal) -> Option<(DecodedVideoFrame, usize, u64)> {
        let mut state = self.state.lock();
        loop {
            if stop.is_interrupted() {
                return None;
            }
            if state.busy > 0 && !state.in_flight {
                if let Some(head) = Self::head(&state) {
                    return Some((head, state.busy, state.generation));
                }
            }
            self.cv.wait(&mut state);
        }
    }

    /// 标记读位置的帧已交给显示层；缓冲在此期间被清空则返回 false
    pub fn begin_display(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.busy == 0 {
            return false;
        }
        state.in_flight = true;
        true
    }

    /// 正在显示的帧
    pub fn in_flight_frame(&self) -> Option<Arc<VideoFrame>> {
        let state = self.state.lock();
        if !state.in_flight {
            return None;
        }
        Self::head(&state).map(|head| head.frame)
    }

    /// 确认读位置的帧已处理完：占用数减一，读指针前进
    pub fn acknowledge(&self, generation: u64) -> bool {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.busy == 0 {
                return false;
            }
            let read = state.read;
            state.slots[read].frame = None;
            state.busy -= 1;
            state.read = (read + 1) % self.capacity;
            state.in_flight = false;
        }
        self.cv.notify_all();
        true
    }

    /// 释放所有帧并复位读写指针
    pub fn clear(&self) {
        {
            let mut state = self.state.lock();
            for slot in state.slots.iter_mut() {
                slot.frame = None;
            }
            state.write = 0;
            state.read = 0;
            state.busy = 0;
            state.in_flight = false;
            state.generation = state.generation.wrapping_add(1);
        }
        self.cv.notify_all();
    }

    /// 把所有槽位的显示时刻基准设为 `display_time`（seek 后调用）
    pub fn set_display_time(&self, display_time: f64) {
        let mut state = self.state.lock();
        for slot in state.slots.iter_mut() {
            slot.display_time = display_time;
        }
    }

    /// 在缓冲上睡眠至多 `timeout`。缓冲被清空（代号变化）或被中断时返回 false，
    /// 其余情况（超时或有新帧写入）返回 true，由调用方重新计算剩余等待时间
    pub fn sleep_unless_cleared(&self, generation: u64, timeout: Duration, stop: &StopSignal) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || stop.is_interrupted() {
            return false;
        }
        self.cv.wait_for(&mut state, timeout);
        state.generation == generation && !stop.is_interrupted()
    }

    pub fn occupancy(&self) -> usize {
        self.state.lock().busy
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// (读指针, 写指针)
    pub fn cursors(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.read, state.write)
    }

    pub fn wake_all(&self) {
        let _guard = self.state.lock();
        self.cv.notify_all();
    }
}

/// 交给 `draw_frame` 的确认令牌
///
/// 渲染完成后调用 `finish()`；令牌被丢弃时也会自动确认，保证每帧恰好确认一次。
pub struct FrameToken {
    ring: Arc<FrameRing>,
    frame: Arc<VideoFrame>,
    generation: u64,
    finished: bool,
}

impl FrameToken {
    pub(crate) fn new(ring: Arc<FrameRing>, frame: Arc<VideoFrame>, generation: u64) -> Self {
        Self {
            ring,
            frame,
            generation,
            finished: false,
        }
    }

    /// 待绘制的帧
    pub fn frame(&self) -> &Arc<VideoFrame> {
        &self.frame
    }

    /// 渲染完成，释放槽位
    pub fn finish(mut self) {
        self.acknowledge();
    }

    fn acknowledge(&mut self) {
        if !self.finished {
            self.finished = true;
            self.ring.acknowledge(self.generation);
        }
    }
}

impl Drop for FrameToken {
    fn drop(&mut self) {
        self.acknowledge();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PixelFormat;
    use std::thread;

    fn frame(pts: i64) -> VideoFrame {
        VideoFrame {
            pts,
            duration: 40,
            width: 2,
            height: 2,
            format: PixelFormat::RGBA,
            data: vec![0; 16],
        }
    }

    #[test]
    fn test_occupancy_and_cursors_stay_in_range() {
        let ring = FrameRing::new(3);
        let stop = StopSignal::new();
        for round in 0..10i64 {
            let writes = (round % 3 + 1) as usize;
            for i in 0..writes {
                assert!(ring.publish(frame(round * 10 + i as i64), 0.0, &stop));
                assert!(ring.occupancy() <= 3);
            }
            let generation = ring.generation();
            while ring.occupancy() > 0 {
                assert!(ring.acknowledge(generation));
                let (read, write) = ring.cursors();
                assert!(read < 3 && write < 3);
            }
            assert!(!ring.acknowledge(generation));
            assert_eq!(ring.occupancy(), 0);
        }
    }

    #[test]
    fn test_publish_blocks_when_full() {
        let ring = Arc::new(FrameRing::new(2));
        let stop = StopSignal::new();
        ring.publish(frame(0), 0.0, &stop);
        ring.publish(frame(40), 0.0, &stop);

        let writer_ring = ring.clone();
        let writer_stop = stop.clone();
        let writer = thread::spawn(move || writer_ring.publish(frame(80), 0.0, &writer_stop));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ring.occupancy(), 2);

        assert!(ring.acknowledge(ring.generation()));
        assert!(writer.join().unwrap());
        assert_eq!(ring.occupancy(), 2);
        assert_eq!(ring.current().unwrap().frame.pts, 40);
    }

    #[test]
    fn test_publish_interrupted_when_full() {
        let ring = Arc::new(FrameRing::new(1));
        let stop = StopSignal::new();
        ring.publish(frame(0), 0.0, &stop);
        let writer_ring = ring.clone();
        let writer_stop = stop.clone();
        let writer = thread::spawn(move || writer_ring.publish(frame(40), 0.0, &writer_stop));
        thread::sleep(Duration::from_millis(30));
        stop.interrupt();
        ring.wake_all();
        assert!(!writer.join().unwrap());
        assert_eq!(ring.occupancy(), 1);
    }

    #[test]
    fn test_clear_invalidates_old_generation() {
        let ring = Arc::new(FrameRing::new(2));
        let stop = StopSignal::new();
        ring.publish(frame(0), 1.0, &stop);
        let (head, occupancy, generation) = ring.wait_for_frame(&stop).unwrap();
        assert_eq!(occupancy, 1);
        assert!(ring.begin_display(generation));
        let token = FrameToken::new(ring.clone(), head.frame, generation);

        ring.clear();
        ring.publish(frame(80), 2.0, &stop);
        // 旧令牌确认不会影响新内容
        token.finish();
        assert_eq!(ring.occupancy(), 1);
        assert_eq!(ring.current().unwrap().frame.pts, 80);
    }

    #[test]
    fn test_token_drop_acknowledges_once() {
        let ring = Arc::new(FrameRing::new(3));
        let stop = StopSignal::new();
        ring.publish(frame(0), 0.0, &stop);
        ring.publish(frame(40), 0.0, &stop);
        let (head, _, generation) = ring.wait_for_frame(&stop).unwrap();
        ring.begin_display(generation);
        assert_eq!(ring.in_flight_frame().unwrap().pts, 0);
        drop(FrameToken::new(ring.clone(), head.frame, generation));
        assert_eq!(ring.occupancy(), 1);
        assert!(ring.in_flight_frame().is_none());
    }

    #[test]
    fn test_clear_wakes_sleeper() {
        let ring = Arc::new(FrameRing::new(2));
        let stop = StopSignal::new();
        let generation = ring.generation();
        let sleeper_ring = ring.clone();
        let sleeper_stop = stop.clone();
        let sleeper = thread::spawn(move || {
            sleeper_ring.sleep_unless_cleared(generation, Duration::from_secs(10), &sleeper_stop)
        });
        thread::sleep(Duration::from_millis(30));
        ring.clear();
        assert!(!sleeper.join().unwrap());
    }

    #[test]
    fn test_set_display_time_baseline() {
        let ring = FrameRing::new(2);
        let stop = StopSignal::new();
        ring.publish(frame(0), 5.0, &stop);
        ring.set_display_time(9.0);
        assert_eq!(ring.current().unwrap().display_time, 9.0);
    }
}
