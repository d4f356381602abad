// 播放引擎：解封装线程、解码线程、送显调度与对外的播放管理器

pub mod audio_output;
pub mod audio_worker;
pub mod demuxer_source;  // Demuxer / 解码器抽象接口
pub mod demuxer_thread;  // Demuxer 协调线程（seek、EOF）
pub mod display;
pub mod frame_ring;
pub mod listener;
pub mod manager;
pub mod packet_queue;
pub mod pipeline;
pub mod synthetic;
pub mod video_worker;
pub mod worker;

#[cfg(feature = "ffmpeg")]
pub mod decoder;
#[cfg(feature = "ffmpeg")]
pub mod demuxer;
#[cfg(feature = "ffmpeg")]
pub mod demuxer_factory;

pub use audio_output::AudioSink;
#[cfg(feature = "audio-cpal")]
pub use audio_output::AudioOutput;
pub use demuxer_source::{MediaBackend, OpenOptions, OpenedMedia};
#[cfg(feature = "ffmpeg")]
pub use demuxer_factory::FfmpegBackend;
pub use frame_ring::FrameToken;
pub use listener::{DecoderListener, FrameListener};
pub use manager::PlaybackManager;
pub use synthetic::{MemorySink, SyntheticBackend, SyntheticClip, SyntheticFailure};

/// 日志前缀：进程号 + 线程号
pub(crate) fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", std::process::id(), std::thread::current().id())
}
