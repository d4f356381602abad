use crossbeam_channel::{Receiver, Sender};
use myy_engine::core::{EngineConfig, EngineState};
use myy_engine::player::{
    AudioSink, DecoderListener, FrameListener, FrameToken, MemorySink, PlaybackManager, SyntheticBackend,
    SyntheticClip, SyntheticFailure,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Event {
    Loaded,
    Released,
    DecoderClosed,
    Finished,
    Position(i64, i64),
    Volume(f64),
    EndOfStream,
}

struct Recorder {
    tx: Sender<Event>,
}

impl DecoderListener for Recorder {
    fn file_loaded(&self) {
        let _ = self.tx.send(Event::Loaded);
    }
    fn file_released(&self) {
        let _ = self.tx.send(Event::Released);
    }
    fn decoder_closed(&self) {
        let _ = self.tx.send(Event::DecoderClosed);
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

#[derive(Default)]
struct Screen {
    drawn: AtomicUsize,
}

impl FrameListener for Screen {
    fn draw_frame(&self, token: FrameToken) {
        assert!(!token.frame().data.is_empty());
        self.drawn.fetch_add(1, Ordering::SeqCst);
        token.finish();
    }
}

/// 测试夹具：引擎 + 事件通道。监听器的强引用放在这里保持存活
struct Harness {
    manager: PlaybackManager,
    backend: Arc<SyntheticBackend>,
    sink: Arc<MemorySink>,
    events: Receiver<Event>,
    screen: Arc<Screen>,
    _listener: Arc<dyn DecoderListener>,
    _frame_listener: Arc<dyn FrameListener>,
}

impl Harness {
    fn new(clip: SyntheticClip) -> Self {
        Self::with_sink(clip, MemorySink::new())
    }

    fn with_sink(clip: SyntheticClip, sink: MemorySink) -> Self {
        let backend = Arc::new(SyntheticBackend::new(clip));
        let sink = Arc::new(sink);
        let manager = PlaybackManager::new(backend.clone(), sink.clone() as Arc<dyn AudioSink>, EngineConfig::default());

        let (tx, events) = crossbeam_channel::unbounded();
        let listener: Arc<dyn DecoderListener> = Arc::new(Recorder { tx });
        let screen = Arc::new(Screen::default());
        let frame_listener: Arc<dyn FrameListener> = screen.clone();
        manager.set_decoder_listener(Some(&listener));
        manager.set_frame_listener(Some(&frame_listener));

        Self {
            manager,
            backend,
            sink,
            events,
            screen,
            _listener: listener,
            _frame_listener: frame_listener,
        }
    }

    /// 在超时之前等到满足条件的事件
    fn wait_for(&self, timeout: Duration, mut matches: impl FnMut(&Event) -> bool) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            match self.events.recv_timeout(remaining) {
                Ok(event) if matches(&event) => return Some(event),
                Ok(_) => {}
                Err(_) => return None,
            }
        }
    }

    /// 取出目前已经收到的全部事件
    fn drain(&self) -> Vec<Event> {
        self.events.try_iter().collect()
    }
}

fn count(events: &[Event], wanted: Event) -> usize {
    events.iter().filter(|event| **event == wanted).count()
}

#[test]
fn test_open_close_open() {
    let harness = Harness::new(SyntheticClip::with_duration(5_000));
    let manager = &harness.manager;

    assert!(manager.open("first.mp4"));
    assert_eq!(manager.state(), EngineState::Opening);
    assert!(!manager.is_playing());
    assert_eq!(manager.media_info().map(|info| info.duration), Some(5_000));
    assert!(harness.sink.is_open());

    manager.close();
    assert_eq!(manager.state(), EngineState::Closed);
    assert!(manager.media_info().is_none());
    assert!(!harness.sink.is_open());

    assert!(manager.open("second.mp4"));
    manager.play(false);
    assert!(manager.is_playing());
    assert_eq!(manager.state(), EngineState::Playing);
    manager.close();

    assert_eq!(harness.backend.open_count(), 2);
    let events = harness.drain();
    assert_eq!(count(&events, Event::Loaded), 2);
    assert_eq!(count(&events, Event::Released), 2);
    assert_eq!(count(&events, Event::DecoderClosed), 2);
    assert_eq!(count(&events, Event::Finished), 2);
}

#[test]
fn test_open_replaces_running_session() {
    let harness = Harness::new(SyntheticClip::with_duration(60_000));
    let manager = &harness.manager;

    assert!(manager.open("a.mp4"));
    manager.play(false);
    thread::sleep(Duration::from_millis(100));

    // 再次 open 先关闭正在播放的会话
    assert!(manager.open("b.mp4"));
    assert_eq!(manager.state(), EngineState::Opening);
    assert!(!manager.is_playing());

    let events = harness.drain();
    assert_eq!(count(&events, Event::Released), 1);
    assert_eq!(count(&events, Event::Loaded), 2);
}

#[test]
fn test_seek_by_percent_reports_target_position() {
    let harness = Harness::new(SyntheticClip::with_duration(100_000));
    let manager = &harness.manager;

    assert!(manager.open("long.mp4"));
    manager.play(false);
    assert!(harness
        .wait_for(Duration::from_secs(5), |event| matches!(event, Event::Position(..)))
        .is_some());

    assert!(manager.seek_by_percent(0.5, -1));
    let reported = harness.wait_for(Duration::from_secs(5), |event| {
        matches!(event, Event::Position(position, _) if (*position - 50_000).abs() <= 120)
    });
    assert!(matches!(reported, Some(Event::Position(_, 100_000))), "{:?}", reported);
    assert!(harness.sink.reset_count() >= 1);
    assert!(matches!(manager.state(), EngineState::Playing | EngineState::Seeking));
}

#[test]
fn test_seek_with_override_and_clamping() {
    let harness = Harness::new(SyntheticClip::with_duration(20_000).video_only());
    let manager = &harness.manager;

    // 没有会话时 seek 无效
    assert!(!manager.seek_by_percent(0.5, -1));

    assert!(manager.open("clip.mp4"));
    manager.play(false);
    assert!(!manager.seek_by_percent(f64::NAN, -1));

    // 比例先夹到 [0, 1]
    assert!(manager.seek_by_percent(2.0, 10_000));
    let reported = harness.wait_for(Duration::from_secs(5), |event| {
        matches!(event, Event::Position(position, _) if (*position - 10_000).abs() <= 120)
    });
    assert!(reported.is_some());
}

#[test]
fn test_seek_while_paused_shows_preview_frame() {
    let harness = Harness::new(SyntheticClip::with_duration(30_000).video_only());
    let manager = &harness.manager;

    assert!(manager.open("clip.mp4"));
    manager.play(true);
    assert!(manager.is_paused());
    assert_eq!(manager.state(), EngineState::Paused);

    assert!(manager.seek_by_percent(0.5, -1));
    let reported = harness.wait_for(Duration::from_secs(5), |event| {
        matches!(event, Event::Position(position, _) if (*position - 15_000).abs() <= 40)
    });
    assert!(reported.is_some());

    thread::sleep(Duration::from_millis(100));
    assert_eq!(manager.state(), EngineState::Paused);
    let frame = manager.current_frame().expect("暂停时应当有预览帧");
    assert!((frame.pts - 15_000).abs() <= 40);
}

#[test]
fn test_pause_resume_shifts_clock_offset() {
    let harness = Harness::new(SyntheticClip::with_duration(30_000).video_only());
    let manager = &harness.manager;

    assert!(!manager.pause_resume());
    assert!(manager.open("clip.mp4"));
    manager.play(false);
    assert!(harness
        .wait_for(Duration::from_secs(5), |event| matches!(event, Event::Position(..)))
        .is_some());

    assert!(manager.pause_resume());
    assert!(manager.is_paused());
    assert_eq!(manager.state(), EngineState::Paused);
    let before = manager.clock_offset().unwrap();

    thread::sleep(Duration::from_millis(300));
    harness.drain();
    assert!(manager.pause_resume());
    assert!(!manager.is_paused());
    assert_eq!(manager.state(), EngineState::Playing);

    let shifted = manager.clock_offset().unwrap() - before;
    assert!((shifted - 0.3).abs() < 0.1, "shifted = {}", shifted);

    // 恢复后继续上报位置
    assert!(harness
        .wait_for(Duration::from_secs(5), |event| matches!(event, Event::Position(..)))
        .is_some());
}

#[test]
fn test_no_position_reports_while_paused() {
    let harness = Harness::new(SyntheticClip::with_duration(30_000).video_only());
    let manager = &harness.manager;

    assert!(manager.open("clip.mp4"));
    manager.play(false);
    thread::sleep(Duration::from_millis(200));
    assert!(manager.pause_resume());

    // 暂停前已经开始显示的那一帧可能还会上报一次
    thread::sleep(Duration::from_millis(100));
    harness.drain();
    thread::sleep(Duration::from_millis(300));
    let events = harness.drain();
    assert!(events.iter().all(|event| !matches!(event, Event::Position(..))), "{:?}", events);
}

#[test]
fn test_end_of_stream_fires_once() {
    let harness = Harness::new(SyntheticClip::with_duration(1_000));
    let manager = &harness.manager;

    assert!(manager.open("short.mp4"));
    manager.play(false);
    assert!(harness
        .wait_for(Duration::from_secs(10), |event| *event == Event::EndOfStream)
        .is_some());

    thread::sleep(Duration::from_millis(300));
    assert_eq!(count(&harness.drain(), Event::EndOfStream), 0);
    assert!(harness.screen.drawn.load(Ordering::SeqCst) > 0);
    assert!(harness.sink.samples_written() > 0);
    assert_eq!(manager.buffer_status().video_frames, 0);
}

#[test]
fn test_end_of_stream_not_repeated_after_seek() {
    let harness = Harness::new(SyntheticClip::with_duration(1_000).video_only());
    let manager = &harness.manager;

    assert!(manager.open("short.mp4"));
    manager.play(false);
    assert!(harness
        .wait_for(Duration::from_secs(10), |event| *event == Event::EndOfStream)
        .is_some());

    // seek 之后照常播放到结尾，但同一会话不再发第二次 end-of-stream
    assert!(manager.seek_by_percent(0.5, -1));
    assert!(harness
        .wait_for(Duration::from_secs(5), |event| {
            matches!(event, Event::Position(position, _) if *position >= 460)
        })
        .is_some());
    let again = harness.wait_for(Duration::from_secs(3), |event| *event == Event::EndOfStream);
    assert!(again.is_none(), "{:?}", again);
}

#[test]
fn test_seek_skips_frames_before_target() {
    // 每 2 秒一个关键帧，seek 会先落在 46s 的关键帧上
    let clip = SyntheticClip::with_duration(100_000).with_keyframe_interval(50);
    let harness = Harness::new(clip);
    let manager = &harness.manager;

    assert!(manager.open("gop.mp4"));
    manager.play(false);
    assert!(harness
        .wait_for(Duration::from_secs(5), |event| matches!(event, Event::Position(..)))
        .is_some());
    harness.drain();

    assert!(manager.seek_by_percent(0.47, -1));
    let reported = harness.wait_for(Duration::from_secs(5), |event| {
        matches!(event, Event::Position(position, _) if *position > 10_000)
    });
    assert!(
        matches!(reported, Some(Event::Position(position, _)) if (position - 47_000).abs() <= 120),
        "{:?}",
        reported
    );
}

#[test]
fn test_decoder_tail_shown_before_end_of_stream() {
    let clip = SyntheticClip::with_duration(1_000).video_only().with_decoder_delay(3);
    let harness = Harness::new(clip);
    let manager = &harness.manager;

    assert!(manager.open("reordered.mp4"));
    manager.play(false);
    let mut last_position = -1;
    let finished = harness.wait_for(Duration::from_secs(10), |event| {
        if let Event::Position(position, _) = event {
            last_position = last_position.max(*position);
        }
        *event == Event::EndOfStream
    });
    assert!(finished.is_some());
    // 最后一帧（960ms）来自解码器排空
    assert_eq!(last_position, 960);
}

#[test]
fn test_close_interrupts_duration_scan_of_endless_source() {
    let harness = Harness::new(SyntheticClip::live());
    let manager = &harness.manager;

    // 本地路径没有时长，会在启动解码线程之前扫描，而直播源读不到结尾
    assert!(manager.open("endless.ts"));
    manager.play(false);
    thread::sleep(Duration::from_millis(200));

    let started = Instant::now();
    manager.close();
    assert!(started.elapsed() < Duration::from_secs(2), "close took {:?}", started.elapsed());
    assert_eq!(manager.state(), EngineState::Closed);
    let events = harness.drain();
    assert!(events.iter().all(|event| !matches!(event, Event::Position(..))), "{:?}", events);
}

#[test]
fn test_network_stream_skips_duration_scan() {
    let harness = Harness::new(SyntheticClip::live());
    let manager = &harness.manager;

    assert!(manager.open_stream("rtsp://camera/live"));
    manager.play(false);
    let reported = harness.wait_for(Duration::from_secs(5), |event| matches!(event, Event::Position(..)));
    assert!(matches!(reported, Some(Event::Position(_, 0))), "{:?}", reported);
    manager.close();
    assert_eq!(manager.state(), EngineState::Closed);
}

#[test]
fn test_audio_only_reports_position() {
    let harness = Harness::new(SyntheticClip::with_duration(1_000).audio_only());
    let manager = &harness.manager;

    assert!(manager.open("music.mp3"));
    manager.play(false);
    assert!(harness
        .wait_for(Duration::from_secs(5), |event| matches!(event, Event::Position(..)))
        .is_some());
    assert!(harness
        .wait_for(Duration::from_secs(10), |event| *event == Event::EndOfStream)
        .is_some());
    assert!(manager.current_frame().is_none());
    assert_eq!(harness.screen.drawn.load(Ordering::SeqCst), 0);
}

#[test]
fn test_volume_outside_range_ignored() {
    let harness = Harness::new(SyntheticClip::with_duration(5_000));
    let manager = &harness.manager;
    assert!(manager.open("clip.mp4"));

    manager.set_volume(1.5);
    manager.set_volume(-0.1);
    manager.set_volume(f64::NAN);
    assert_eq!(manager.volume(), 1.0);

    manager.set_volume(0.3);
    assert_eq!(manager.volume(), 0.3);
    assert!((harness.sink.volume() - 0.3).abs() < 1e-9);

    let volumes: Vec<Event> = harness
        .drain()
        .into_iter()
        .filter(|event| matches!(event, Event::Volume(_)))
        .collect();
    assert_eq!(volumes, vec![Event::Volume(0.3)]);
}

#[test]
fn test_open_failure_stays_closed() {
    for failure in [
        SyntheticFailure::Open,
        SyntheticFailure::NoStreams,
        SyntheticFailure::DegenerateResolution,
        SyntheticFailure::MissingDecoder,
    ] {
        let clip = SyntheticClip {
            failure: Some(failure),
            ..SyntheticClip::default()
        };
        let harness = Harness::new(clip);
        let manager = &harness.manager;

        assert!(!manager.open("broken.mp4"), "{:?}", failure);
        assert_eq!(manager.state(), EngineState::Closed);
        assert!(manager.last_error().is_some());
        assert!(!harness.sink.is_open());
        assert!(manager.media_info().is_none());

        // 失败后的 close 是空操作
        manager.close();
        assert!(harness.drain().is_empty());
    }
}

#[test]
fn test_seek_failure_is_tolerated() {
    let clip = SyntheticClip {
        fail_seek: true,
        ..SyntheticClip::with_duration(30_000).video_only()
    };
    let harness = Harness::new(clip);
    let manager = &harness.manager;

    assert!(manager.open("clip.mp4"));
    manager.play(false);
    assert!(manager.seek_by_percent(0.8, -1));
    thread::sleep(Duration::from_millis(300));

    assert_eq!(manager.state(), EngineState::Playing);
    harness.drain();
    let reported = harness.wait_for(Duration::from_secs(5), |event| matches!(event, Event::Position(..)));
    // 位置没有跳到 24s，继续从开头播放
    assert!(matches!(reported, Some(Event::Position(position, _)) if position < 5_000), "{:?}", reported);
}

#[test]
fn test_decode_errors_are_skipped() {
    let clip = SyntheticClip {
        video_decode_error_every: 3,
        ..SyntheticClip::with_duration(1_000).video_only()
    };
    let harness = Harness::new(clip);
    let manager = &harness.manager;

    assert!(manager.open("damaged.mp4"));
    manager.play(false);
    assert!(harness
        .wait_for(Duration::from_secs(10), |event| *event == Event::EndOfStream)
        .is_some());
    let drawn = harness.screen.drawn.load(Ordering::SeqCst);
    assert!(drawn > 0 && drawn < 25, "drawn = {}", drawn);
}

#[test]
fn test_close_is_idempotent() {
    let harness = Harness::new(SyntheticClip::with_duration(5_000));
    let manager = &harness.manager;

    manager.close();
    assert!(harness.drain().is_empty());

    assert!(manager.open("clip.mp4"));
    manager.play(false);
    thread::sleep(Duration::from_millis(100));
    manager.close();
    manager.close();

    assert_eq!(manager.state(), EngineState::Closed);
    assert!(!manager.is_playing());
    assert!(!manager.pause_resume());
    let events = harness.drain();
    assert_eq!(count(&events, Event::Released), 1);
    assert_eq!(count(&events, Event::Finished), 1);
}

#[test]
fn test_unavailable_audio_device_plays_video_only() {
    let harness = Harness::with_sink(SyntheticClip::with_duration(1_000), MemorySink::unavailable());
    let manager = &harness.manager;

    assert!(manager.open("clip.mp4"));
    manager.play(false);
    assert!(harness
        .wait_for(Duration::from_secs(10), |event| *event == Event::EndOfStream)
        .is_some());
    assert!(harness.screen.drawn.load(Ordering::SeqCst) > 0);
    assert_eq!(harness.sink.samples_written(), 0);
}

#[test]
fn test_unavailable_audio_device_fails_audio_only_media() {
    let harness = Harness::with_sink(SyntheticClip::with_duration(1_000).audio_only(), MemorySink::unavailable());
    let manager = &harness.manager;

    assert!(!manager.open("music.mp3"));
    assert_eq!(manager.state(), EngineState::Closed);
    assert!(manager.last_error().is_some());
}

#[test]
fn test_dropped_listener_is_not_called() {
    let backend = Arc::new(SyntheticBackend::new(SyntheticClip::with_duration(1_000)));
    let sink: Arc<dyn AudioSink> = Arc::new(MemorySink::new());
    let manager = PlaybackManager::new(backend, sink, EngineConfig::default());

    let (tx, events) = crossbeam_channel::unbounded();
    let listener: Arc<dyn DecoderListener> = Arc::new(Recorder { tx });
    manager.set_decoder_listener(Some(&listener));
    drop(listener);

    assert!(manager.open("clip.mp4"));
    manager.play(false);
    thread::sleep(Duration::from_millis(200));
    manager.close();
    // 发送端随监听器一起释放
    assert!(events.try_iter().next().is_none());
}
