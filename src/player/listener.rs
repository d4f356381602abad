use crate::player::frame_ring::FrameToken;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// 播放事件回调（由宿主 UI 实现）
///
/// 所有回调都可能在工作线程上触发，实现方需要自己保证线程安全。
pub trait DecoderListener: Send + Sync {
    /// 文件打开成功
    fn file_loaded(&self) {}
    /// 会话资源已释放
    fn file_released(&self) {}
    /// 解码器已关闭
    fn decoder_closed(&self) {}
    /// 播放结束（关闭时触发）
    fn playing_finished(&self) {}
    /// 当前播放位置（毫秒）和总时长（毫秒）
    fn frame_position_changed(&self, _position_ms: i64, _duration_ms: i64) {}
    /// 音量变化
    fn volume_changed(&self, _volume: f64) {}
    /// 音视频都已播放完毕，每个会话（或每次 seek 之后）只触发一次
    fn on_end_of_stream(&self) {}
}

/// 画面回调（由宿主渲染层实现）
pub trait FrameListener: Send + Sync {
    /// 新帧即将显示，可以提前准备纹理
    fn update_frame(&self) {}

    /// 绘制一帧。完成后调用 `token.finish()`，
    /// 或者直接丢弃令牌，两种方式都只确认一次。
    fn draw_frame(&self, token: FrameToken);
}

/// 监听器注册表：只保存弱引用，引擎不拥有监听器
#[derive(Default)]
pub struct Listeners {
    decoder: RwLock<Option<Weak<dyn DecoderListener>>>,
    frame: RwLock<Option<Weak<dyn FrameListener>>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_decoder_listener(&self, listener: Option<&Arc<dyn DecoderListener>>) {
        *self.decoder.write() = listener.map(Arc::downgrade);
    }

    pub fn set_frame_listener(&self, listener: Option<&Arc<dyn FrameListener>>) {
        *self.frame.write() = listener.map(Arc::downgrade);
    }

    /// 当前仍然存活的事件监听器
    pub fn decoder(&self) -> Option<Arc<dyn DecoderListener>> {
        self.decoder.read().as_ref().and_then(Weak::upgrade)
    }

    /// 当前仍然存活的画面监听器
    pub fn frame(&self) -> Option<Arc<dyn FrameListener>> {
        self.frame.read().as_ref().and_then(Weak::upgrade)
    }

    /// 对事件监听器调用一次回调，未设置或已释放时什么都不做
    pub fn notify(&self, event: impl FnOnce(&dyn DecoderListener)) {
        if let Some(listener) = self.decoder() {
            event(listener.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        loaded: AtomicUsize,
    }

    impl DecoderListener for Counter {
        fn file_loaded(&self) {
            self.loaded.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_listener_held_weakly() {
        let listeners = Listeners::new();
        let counter = Arc::new(Counter::default());
        let listener: Arc<dyn DecoderListener> = counter.clone();
        listeners.set_decoder_listener(Some(&listener));

        listeners.notify(|l| l.file_loaded());
        assert_eq!(counter.loaded.load(Ordering::SeqCst), 1);

        drop(listener);
        drop(counter);
        assert!(listeners.decoder().is_none());
        // 监听器释放后通知是空操作
        listeners.notify(|l| l.file_loaded());
    }
}
