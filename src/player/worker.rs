use log::{error, info};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 协作式中断标志
///
/// 线程在每个阻塞等待点和循环边界检查它；`sleep` 会被 `interrupt` 立即唤醒。
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    lock: Mutex<()>,
    cv: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let _guard = self.inner.lock.lock();
        self.inner.cv.notify_all();
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// 可中断睡眠，返回 false 表示被中断
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut guard = self.inner.lock.lock();
        if self.is_interrupted() {
            return false;
        }
        self.inner.cv.wait_for(&mut guard, duration);
        !self.is_interrupted()
    }
}

/// 暂停闸门：音视频解码线程和显示线程在每个工作单元前经过这里
#[derive(Default)]
pub struct PauseGate {
    paused: Mutex<bool>,
    cv: Condvar,
}

impl PauseGate {
    pub fn new(paused: bool) -> Self {
        Self {
            paused: Mutex::new(paused),
            cv: Condvar::new(),
        }
    }

    pub fn set_paused(&self, paused: bool) {
        *self.paused.lock() = paused;
        self.cv.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock()
    }

    /// 暂停时阻塞，返回 false 表示等待期间被中断
    pub fn wait_while_paused(&self, stop: &StopSignal) -> bool {
        let mut paused = self.paused.lock();
        while *paused {
            if stop.is_interrupted() {
                return false;
            }
            self.cv.wait(&mut paused);
        }
        !stop.is_interrupted()
    }

    /// 唤醒等待者让它们重新检查中断标志
    pub fn wake_all(&self) {
        let _guard = self.paused.lock();
        self.cv.notify_all();
    }
}

/// 带中断标志的工作线程，join 时取回线程的返回值（例如解码器）
pub struct WorkerThread<T> {
    name: String,
    stop: StopSignal,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> WorkerThread<T> {
    pub fn spawn<F>(name: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(StopSignal) -> T + Send + 'static,
    {
        let stop = StopSignal::new();
        let thread_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(thread_stop))?;
        info!("{} 🚀 {} 线程启动", super::log_ctx(), name);
        Ok(Self {
            name: name.to_string(),
            stop,
            handle: Some(handle),
        })
    }

    /// 设置中断标志；调用方还需要唤醒线程可能阻塞的队列/闸门
    pub fn interrupt(&self) {
        self.stop.interrupt();
    }

    /// 等待线程退出，线程 panic 时返回 None
    pub fn join(mut self) -> Option<T> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(value) => {
                info!("{} ✅ {} 线程已结束", super::log_ctx(), self.name);
                Some(value)
            }
            Err(_) => {
                error!("{} ❌ {} 线程异常退出", super::log_ctx(), self.name);
                None
            }
        }
    }
}

impl<T> Drop for WorkerThread<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.interrupt();
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_interrupt_wakes_sleep() {
        let worker = WorkerThread::spawn("sleeper", |stop| {
            let started = Instant::now();
            let completed = stop.sleep(Duration::from_secs(10));
            (completed, started.elapsed())
        })
        .unwrap();
        thread::sleep(Duration::from_millis(20));
        worker.interrupt();
        let (completed, elapsed) = worker.join().unwrap();
        assert!(!completed);
        assert!(elapsed < Duration::from_secs(5));
    }

    #[test]
    fn test_pause_gate_blocks_until_resumed() {
        let gate = Arc::new(PauseGate::new(true));
        let thread_gate = gate.clone();
        let worker = WorkerThread::spawn("gated", move |stop| thread_gate.wait_while_paused(&stop)).unwrap();
        thread::sleep(Duration::from_millis(20));
        gate.set_paused(false);
        assert_eq!(worker.join(), Some(true));
    }

    #[test]
    fn test_pause_gate_interrupted() {
        let gate = Arc::new(PauseGate::new(true));
        let thread_gate = gate.clone();
        let worker = WorkerThread::spawn("gated", move |stop| thread_gate.wait_while_paused(&stop)).unwrap();
        thread::sleep(Duration::from_millis(20));
        worker.interrupt();
        gate.wake_all();
        assert_eq!(worker.join(), Some(false));
    }
}
