//! 多线程媒体播放引擎
//!
//! 一个 Demuxer 线程读取压缩包并分发到音视频包队列，两个解码线程各自解码，
//! 视频帧写入固定容量的环形缓冲，由显示线程按 PTS 与播放时钟对齐后交给宿主绘制。
//! 宿主只和 [`PlaybackManager`] 打交道。

pub mod core;
pub mod player;

pub use crate::core::{
    BufferStatus, EngineConfig, EngineState, MediaInfo, MediaSource, PixelFormat, PlayerError, Result, VideoFrame,
};
pub use crate::player::{DecoderListener, FrameListener, FrameToken, PlaybackManager};
