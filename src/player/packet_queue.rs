use crate::player::demuxer_source::MediaPacket;
use crate::player::worker::StopSignal;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// 有界包队列（单条流一个）
///
/// 同时受包数和字节数限制，任一上限达到时生产者阻塞（背压）。
/// 一把锁 + 一个条件变量：入队和出队都会唤醒另一端。
pub struct PacketQueue {
    name: &'static str,
    max_packets: usize,
    max_bytes: usize,
    state: Mutex<QueueState>,
    cv: Condvar,
}

struct QueueState {
    packets: VecDeque<MediaPacket>,
    bytes: usize,
    // 消费者正阻塞在空队列上（或没有消费者），用于判断是否已排空
    consumer_idle: bool,
}

impl PacketQueue {
    pub fn new(name: &'static str, max_packets: usize, max_bytes: usize) -> Self {
        Self {
            name,
            max_packets,
            max_bytes,
            state: Mutex::new(QueueState {
                packets: VecDeque::with_capacity(max_packets.min(1024)),
                bytes: 0,
                consumer_idle: true,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// 入队，队列满时阻塞。
    ///
    /// 等待期间 `abort()` 返回 true（有待执行的 seek 或线程被中断）时立即返回 false，
    /// 包不入队，由调用方丢弃。
    pub fn enqueue(&self, packet: MediaPacket, abort: impl Fn() -> bool) -> bool {
        let size = packet.size();
        {
            let mut state = self.state.lock();
            while state.bytes >= self.max_bytes || state.packets.len() >= self.max_packets {
                if abort() {
                    return false;
                }
                self.cv.wait(&mut state);
            }
            state.bytes += size;
            state.packets.push_back(packet);
        }
        self.cv.notify_all();
        true
    }

    /// 非阻塞出队，空队列返回 None
    pub fn dequeue(&self) -> Option<MediaPacket> {
        let packet = {
            let mut state = self.state.lock();
            Self::pop_locked(&mut state)
        };
        if packet.is_some() {
            self.cv.notify_all();
        }
        packet
    }

    /// 阻塞出队，直到有包或被中断（中断返回 None）
    pub fn pop_blocking(&self, stop: &StopSignal) -> Option<MediaPacket> {
        let packet = {
            let mut state = self.state.lock();
            loop {
                if stop.is_interrupted() {
                    state.consumer_idle = true;
                    return None;
                }
                if let Some(packet) = Self::pop_locked(&mut state) {
                    state.consumer_idle = false;
                    break packet;
                }
                state.consumer_idle = true;
                self.cv.wait(&mut state);
            }
        };
        self.cv.notify_all();
        Some(packet)
    }

    fn pop_locked(state: &mut QueueState) -> Option<MediaPacket> {
        let packet = state.packets.pop_front()?;
        let size = packet.size();
        debug_assert!(state.bytes >= size, "包队列字节计数出现负数");
        state.bytes -= size;
        Some(packet)
    }

    /// 清空队列，释放所有包，返回丢弃的包数
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut state = self.state.lock();
            let dropped = state.packets.len();
            state.packets = VecDeque::new();
            state.bytes = 0;
            state.consumer_idle = true;
            dropped
        };
        self.cv.notify_all();
        dropped
    }

    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().packets.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.state.lock().bytes
    }

    /// 队列为空且消费者已经处理完手上的包
    pub fn is_drained(&self) -> bool {
        let state = self.state.lock();
        state.packets.is_empty() && state.consumer_idle
    }

    /// 唤醒所有等待者，让它们重新检查 seek/中断条件
    pub fn wake_all(&self) {
        let _guard = self.state.lock();
        self.cv.notify_all();
    }
}
