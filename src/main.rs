use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::info;
use myy_engine::core::{EngineConfig, EngineState};
use myy_engine::player::{
    AudioSink, DecoderListener, FrameListener, FrameToken, MediaBackend, MemorySink, PlaybackManager,
    SyntheticBackend, SyntheticClip,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const USAGE: &str = "\
用法: myy-engine [选项] <文件路径或 URL>

选项:
  --synthetic <毫秒>    播放一段合成的测试片段，不需要输入文件
  --config <路径>       从 JSON 文件加载引擎参数
  --start-paused        以暂停状态开始，1 秒后恢复
  --seek <比例>         开始播放后 seek 到总时长的该比例（0~1）
  --volume <音量>       初始音量（0~1）
  -h, --help            显示帮助";

struct Flags {
    synthetic_ms: Option<i64>,
    config: Option<String>,
    start_paused: bool,
    seek: Option<f64>,
    volume: Option<f64>,
    input: Option<String>,
}

/// 命令行收到的播放事件
enum Event {
    Loaded,
    Position(i64, i64),
    Volume(f64),
    EndOfStream,
    Finished,
}

/// 把引擎回调转发到主线程
struct ChannelListener {
    tx: Sender<Event>,
}

impl DecoderListener for ChannelListener {
    fn file_loaded(&self) {
        let _ = self.tx.send(Event::Loaded);
    }

    fn playing_finished(&self) {
        let _ = self.tx.send(Event::Finished);
    }

    fn frame_position_changed(&self, position_ms: i64, duration_ms: i64) {
        let _ = self.tx.send(Event::Position(position_ms, duration_ms));
    }

    fn volume_changed(&self, volume: f64) {
        let _ = self.tx.send(Event::Volume(volume));
    }

    fn on_end_of_stream(&self) {
        let _ = self.tx.send(Event::EndOfStream);
    }
}

/// 没有窗口，只统计送显的帧数
#[derive(Default)]
struct FrameCounter {
    drawn: AtomicU64,
}

impl FrameListener for FrameCounter {
    fn draw_frame(&self, token: FrameToken) {
        self.drawn.fetch_add(1, Ordering::Relaxed);
        token.finish();
    }
}

fn parse_flags() -> Result<Option<Flags>> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        return Ok(None);
    }

    let flags = Flags {
        synthetic_ms: args.opt_value_from_str("--synthetic")?,
        config: args.opt_value_from_str("--config")?,
        start_paused: args.contains("--start-paused"),
        seek: args.opt_value_from_str("--seek")?,
        volume: args.opt_value_from_str("--volume")?,
        input: args
            .finish()
            .into_iter()
            .next()
            .and_then(|s| s.into_string().ok()),
    };
    Ok(Some(flags))
}

#[cfg(feature = "ffmpeg")]
fn build_backend(flags: &Flags) -> Result<Arc<dyn MediaBackend>> {
    match flags.synthetic_ms {
        Some(duration_ms) => Ok(Arc::new(SyntheticBackend::new(SyntheticClip::with_duration(duration_ms)))),
        None => Ok(Arc::new(myy_engine::player::FfmpegBackend::new()?)),
    }
}

#[cfg(not(feature = "ffmpeg"))]
fn build_backend(flags: &Flags) -> Result<Arc<dyn MediaBackend>> {
    if flags.synthetic_ms.is_none() {
        log::warn!("⚠️ 未启用 ffmpeg 特性，改为播放合成片段");
    }
    let duration_ms = flags.synthetic_ms.unwrap_or(10_000);
    Ok(Arc::new(SyntheticBackend::new(SyntheticClip::with_duration(duration_ms))))
}

fn build_sink(flags: &Flags) -> Arc<dyn AudioSink> {
    if flags.synthetic_ms.is_some() {
        return Arc::new(MemorySink::new());
    }
    #[cfg(feature = "audio-cpal")]
    {
        Arc::new(myy_engine::player::AudioOutput::new())
    }
    #[cfg(not(feature = "audio-cpal"))]
    {
        Arc::new(MemorySink::new())
    }
}

fn run_until_finished(manager: &PlaybackManager, events: &Receiver<Event>, frames: &FrameCounter) {
    let mut last_print = Instant::now();
    loop {
        match events.recv_timeout(Duration::from_millis(500)) {
            Ok(Event::Loaded) => info!("📎 媒体已加载"),
            Ok(Event::Position(position_ms, duration_ms)) => {
                if last_print.elapsed() >= Duration::from_secs(1) {
                    last_print = Instant::now();
                    let status = manager.buffer_status();
                    info!(
                        "⏱️ {:.1}s / {:.1}s  已送显 {} 帧  队列 v{}/a{}  环形缓冲 {}",
                        position_ms as f64 / 1000.0,
                        duration_ms as f64 / 1000.0,
                        frames.drawn.load(Ordering::Relaxed),
                        status.video_packets,
                        status.audio_packets,
                        status.video_frames
                    );
                }
            }
            Ok(Event::Volume(volume)) => info!("🔊 音量: {:.2}", volume),
            Ok(Event::EndOfStream) => {
                info!("🏁 播放完毕，共送显 {} 帧", frames.drawn.load(Ordering::Relaxed));
                return;
            }
            Ok(Event::Finished) => return,
            Err(RecvTimeoutError::Timeout) => {
                if manager.state() == EngineState::Closed {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let Some(flags) = parse_flags()? else {
        println!("{}", USAGE);
        return Ok(());
    };

    info!("🎬 MYY Engine 命令行启动");

    let config = match flags.config.as_deref() {
        Some(path) => EngineConfig::from_json_file(path).with_context(|| format!("加载配置失败: {}", path))?,
        None => EngineConfig::default(),
    };

    let manager = PlaybackManager::new(build_backend(&flags)?, build_sink(&flags), config);

    let (tx, rx) = crossbeam_channel::unbounded();
    let listener: Arc<dyn DecoderListener> = Arc::new(ChannelListener { tx });
    let frames = Arc::new(FrameCounter::default());
    let frame_listener: Arc<dyn FrameListener> = frames.clone();
    manager.set_decoder_listener(Some(&listener));
    manager.set_frame_listener(Some(&frame_listener));

    if let Some(volume) = flags.volume {
        manager.set_volume(volume);
    }

    let opened = match (flags.synthetic_ms, flags.input.as_deref()) {
        (Some(_), _) => manager.open("synthetic"),
        (None, Some(input)) if input.contains("://") => manager.open_stream(input),
        (None, Some(input)) => manager.open(input),
        (None, None) => {
            println!("{}", USAGE);
            return Ok(());
        }
    };
    if !opened {
        let reason = manager.last_error().unwrap_or_default();
        anyhow::bail!("打开失败: {}", reason);
    }

    manager.play(flags.start_paused);
    if let Some(fraction) = flags.seek {
        manager.seek_by_percent(fraction, -1);
    }
    if flags.start_paused {
        std::thread::sleep(Duration::from_secs(1));
        manager.pause_resume();
    }

    run_until_finished(&manager, &rx, &frames);
    manager.close();
    Ok(())
}
