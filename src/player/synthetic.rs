//! 纯内存的合成媒体后端：不依赖 FFmpeg 和音频硬件，
//! 按设定的时长/帧率生成交错的音视频包，用于测试和无设备环境。

use crate::core::{
    AudioFrame, AudioSpec, MediaInfo, MediaSource, PixelFormat, PlayerError, Result, SampleFormat, VideoFrame,
};
use crate::player::audio_output::AudioSink;
use crate::player::demuxer_source::{
    AudioCodec, DemuxerSource, MediaBackend, MediaPacket, OpenOptions, OpenedMedia, PacketPayload, VideoCodec,
};
use crate::player::worker::StopSignal;
use log::{debug, info};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

const VIDEO_STREAM: usize = 0;
const AUDIO_STREAM: usize = 1;

/// 打开时要模拟的失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntheticFailure {
    /// 容器无法打开
    Open,
    /// 没有音视频流
    NoStreams,
    /// 视频分辨率为 0
    DegenerateResolution,
    /// 找不到视频解码器
    MissingDecoder,
}

/// 合成片段参数
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticClip {
    pub duration_ms: i64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub video: bool,
    pub audio: bool,
    /// 每个音频包的时长（毫秒）
    pub audio_chunk_ms: i64,
    /// 容器头里是否带时长；不带时需要扫描
    pub report_duration: bool,
    /// 直播源：包无限产生，没有结尾
    pub live: bool,
    /// 每 N 帧一个关键帧，seek 落在目标之前最近的关键帧上
    pub keyframe_interval: i64,
    /// 解码器延迟输出的帧数（模拟 B 帧重排序），输入结束时排空
    pub decoder_delay: usize,
    /// seek 是否被容器拒绝
    pub fail_seek: bool,
    /// 每 N 个视频包有一个解码失败（0 表示不失败）
    pub video_decode_error_every: usize,
    pub failure: Option<SyntheticFailure>,
}

impl Default for SyntheticClip {
    fn default() -> Self {
        Self {
            duration_ms: 10_000,
            fps: 25.0,
            width: 64,
            height: 36,
            video: true,
            audio: true,
            audio_chunk_ms: 20,
            report_duration: true,
            live: false,
            keyframe_interval: 1,
            decoder_delay: 0,
            fail_seek: false,
            video_decode_error_every: 0,
            failure: None,
        }
    }
}

impl SyntheticClip {
    pub fn with_duration(duration_ms: i64) -> Self {
        Self {
            duration_ms,
            ..Self::default()
        }
    }

    pub fn video_only(mut self) -> Self {
        self.audio = false;
        self
    }

    pub fn audio_only(mut self) -> Self {
        self.video = false;
        self
    }

    /// 没有时长、永远读不到结尾的直播源
    pub fn live() -> Self {
        Self {
            report_duration: false,
            live: true,
            ..Self::default()
        }
    }

    pub fn with_keyframe_interval(mut self, frames: i64) -> Self {
        self.keyframe_interval = frames.max(1);
        self
    }

    pub fn with_decoder_delay(mut self, frames: usize) -> Self {
        self.decoder_delay = frames;
        self
    }

    fn frame_ms(&self) -> f64 {
        1000.0 / self.fps
    }
}

/// 合成媒体后端
pub struct SyntheticBackend {
    clip: SyntheticClip,
    opens: AtomicUsize,
}

impl SyntheticBackend {
    pub fn new(clip: SyntheticClip) -> Self {
        Self {
            clip,
            opens: AtomicUsize::new(0),
        }
    }

    /// 成功打开的次数
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl MediaBackend for SyntheticBackend {
    fn open(&self, source: &MediaSource, options: &OpenOptions) -> Result<OpenedMedia> {
        let clip = &self.clip;
        let location = source.location();
        match clip.failure {
            Some(SyntheticFailure::Open) => {
                return Err(PlayerError::OpenError(format!("{}: 无法打开", location)));
            }
            Some(SyntheticFailure::NoStreams) => return Err(PlayerError::NoPlayableStream),
            Some(SyntheticFailure::DegenerateResolution) => {
                return Err(PlayerError::DegenerateResolution { width: 0, height: 0 });
            }
            Some(SyntheticFailure::MissingDecoder) => {
                return Err(PlayerError::DecoderNotFound("synthetic-video".to_string()));
            }
            None => {}
        }
        if !clip.video && !clip.audio {
            return Err(PlayerError::NoPlayableStream);
        }

        let media_info = MediaInfo {
            duration: if clip.report_duration { clip.duration_ms } else { 0 },
            width: if clip.video { clip.width } else { 0 },
            height: if clip.video { clip.height } else { 0 },
            fps: if clip.video { clip.fps } else { 0.0 },
            video_codec: if clip.video { "synthetic-video" } else { "none" }.to_string(),
            audio_codec: if clip.audio { "synthetic-pcm" } else { "none" }.to_string(),
            sample_rate: if clip.audio { options.audio.sample_rate } else { 0 },
            channels: if clip.audio { options.audio.channels } else { 0 },
            video_stream_index: clip.video.then_some(VIDEO_STREAM),
            audio_stream_index: clip.audio.then_some(AUDIO_STREAM),
        };

        let video_decoder: Option<Box<dyn VideoCodec>> = clip.video.then(|| {
            Box::new(SyntheticVideoCodec {
                width: clip.width,
                height: clip.height,
                format: options.pixel_format,
                frame_ms: clip.frame_ms().round() as i64,
                error_every: clip.video_decode_error_every,
                packets: 0,
                delay: clip.decoder_delay,
                held: VecDeque::new(),
            }) as Box<dyn VideoCodec>
        });
        let audio_decoder: Option<Box<dyn AudioCodec>> = clip
            .audio
            .then(|| Box::new(SyntheticAudioCodec { spec: options.audio }) as Box<dyn AudioCodec>);

        self.opens.fetch_add(1, Ordering::SeqCst);
        info!("🧪 打开合成媒体: {} ({}ms)", location, clip.duration_ms);
        Ok(OpenedMedia {
            demuxer: Box::new(SyntheticDemuxer::new(clip.clone(), location)),
            video_decoder,
            audio_decoder,
            media_info,
        })
    }
}

/// 按时间戳交错产生音视频包
pub struct SyntheticDemuxer {
    clip: SyntheticClip,
    location: String,
    next_video_frame: i64,
    next_audio_ms: i64,
}

impl SyntheticDemuxer {
    fn new(clip: SyntheticClip, location: String) -> Self {
        Self {
            clip,
            location,
            next_video_frame: 0,
            next_audio_ms: 0,
        }
    }

    fn video_pts(&self, frame: i64) -> i64 {
        (frame as f64 * self.clip.frame_ms()).round() as i64
    }

    fn in_range(&self, pts: i64) -> bool {
        self.clip.live || pts < self.clip.duration_ms
    }

    /// 包结束时刻（毫秒）
    fn packet_end(&self, packet: &MediaPacket) -> i64 {
        let pts = packet.pts.unwrap_or_default();
        match packet.stream_index {
            VIDEO_STREAM => pts + self.clip.frame_ms().round() as i64,
            _ => pts + payload_i64(packet),
        }
    }
}

impl DemuxerSource for SyntheticDemuxer {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let video_pts = self
            .clip
            .video
            .then(|| self.video_pts(self.next_video_frame))
            .filter(|pts| self.in_range(*pts));
        let audio_pts = Some(self.next_audio_ms).filter(|pts| self.clip.audio && self.in_range(*pts));

        let take_video = match (video_pts, audio_pts) {
            (Some(v), Some(a)) => v <= a,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => return Ok(None),
        };

        let packet = if take_video {
            let pts = video_pts.unwrap_or_default();
            self.next_video_frame += 1;
            MediaPacket {
                stream_index: VIDEO_STREAM,
                pts: Some(pts),
                dts: Some(pts),
                payload: PacketPayload::Bytes(self.next_video_frame.to_le_bytes().to_vec()),
            }
        } else {
            let pts = audio_pts.unwrap_or_default();
            let chunk = if self.clip.live {
                self.clip.audio_chunk_ms
            } else {
                self.clip.audio_chunk_ms.min(self.clip.duration_ms - pts)
            };
            self.next_audio_ms += self.clip.audio_chunk_ms;
            MediaPacket {
                stream_index: AUDIO_STREAM,
                pts: Some(pts),
                dts: Some(pts),
                payload: PacketPayload::Bytes(chunk.to_le_bytes().to_vec()),
            }
        };
        Ok(Some(packet))
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        if self.clip.fail_seek {
            return Err(PlayerError::SeekError(format!("{}: 容器拒绝 seek", self.location)));
        }
        let target = if self.clip.live {
            timestamp_ms.max(0)
        } else {
            timestamp_ms.clamp(0, self.clip.duration_ms)
        };
        // 和真实容器一样落在目标之前最近的关键帧上，音频跟着回到同一时刻
        let frame = (target as f64 / self.clip.frame_ms()).floor() as i64;
        let keyframe = frame / self.clip.keyframe_interval * self.clip.keyframe_interval;
        self.next_video_frame = keyframe;
        let landed = if self.clip.video { self.video_pts(keyframe) } else { target };
        let chunk = self.clip.audio_chunk_ms.max(1);
        self.next_audio_ms = landed / chunk * chunk;
        debug!("🧪 合成媒体 seek 到 {}ms（落在 {}ms）", target, landed);
        Ok(())
    }

    /// 从头读到尾找最后一个包的结束时刻，然后回到原来的位置
    fn probe_duration(&mut self, stop: &StopSignal) -> Option<i64> {
        if self.clip.report_duration {
            return None;
        }
        let resume_at = (self.next_video_frame, self.next_audio_ms);
        self.next_video_frame = 0;
        self.next_audio_ms = 0;

        let mut last_end: Option<i64> = None;
        let interrupted = loop {
            if stop.is_interrupted() {
                break true;
            }
            match self.read_packet() {
                Ok(Some(packet)) => {
                    let end = self.packet_end(&packet);
                    last_end = Some(last_end.map_or(end, |last| last.max(end)));
                }
                _ => break false,
            }
        };

        (self.next_video_frame, self.next_audio_ms) = resume_at;
        if interrupted {
            debug!("🧪 合成媒体时长扫描被中断");
            return None;
        }
        last_end
    }

    fn description(&self) -> String {
        format!("Synthetic({})", self.location)
    }
}

fn payload_i64(packet: &MediaPacket) -> i64 {
    match &packet.payload {
        PacketPayload::Bytes(bytes) if bytes.len() >= 8 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            i64::from_le_bytes(raw)
        }
        _ => 0,
    }
}

struct SyntheticVideoCodec {
    width: u32,
    height: u32,
    format: PixelFormat,
    frame_ms: i64,
    error_every: usize,
    packets: usize,
    delay: usize,
    held: VecDeque<VideoFrame>,
}

impl VideoCodec for SyntheticVideoCodec {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>> {
        self.packets += 1;
        if self.error_every > 0 && self.packets % self.error_every == 0 {
            return Err(PlayerError::DecodeError(format!("第 {} 个视频包损坏", self.packets)));
        }
        let pts = packet.pts.unwrap_or_default();
        let shade = (payload_i64(packet) % 256) as u8;
        self.held.push_back(VideoFrame {
            pts,
            duration: self.frame_ms,
            width: self.width,
            height: self.height,
            format: self.format,
            data: vec![shade; self.format.frame_size(self.width, self.height)],
        });
        let ready = self.held.len().saturating_sub(self.delay);
        Ok(self.held.drain(..ready).collect())
    }

    fn drain(&mut self) -> Result<Vec<VideoFrame>> {
        Ok(self.held.drain(..).collect())
    }

    fn flush(&mut self) {
        self.held.clear();
    }

    fn info(&self) -> String {
        format!("synthetic-video {}x{} {:?}", self.width, self.height, self.format)
    }
}

struct SyntheticAudioCodec {
    spec: AudioSpec,
}

impl AudioCodec for SyntheticAudioCodec {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<AudioFrame>> {
        let duration_ms = payload_i64(packet).max(0) as usize;
        let samples = duration_ms * self.spec.sample_rate as usize / 1000;
        Ok(vec![AudioFrame {
            pts: packet.pts.unwrap_or_default(),
            sample_rate: self.spec.sample_rate,
            channels: self.spec.channels,
            format: SampleFormat::F32,
            data: vec![0.0; samples * self.spec.channels as usize],
        }])
    }

    fn flush(&mut self) {}

    fn info(&self) -> String {
        format!("synthetic-pcm {} Hz {} ch", self.spec.sample_rate, self.spec.channels)
    }
}

/// 按实时速度“播放”的内存音频设备
pub struct MemorySink {
    state: Mutex<MemorySinkState>,
    fail_open: bool,
}

struct MemorySinkState {
    epoch: Instant,
    spec: Option<AudioSpec>,
    // 已写入数据播放完毕的时刻（秒，相对 epoch）
    queued_until: f64,
    // 暂停时剩余未播放的时长
    paused_remaining: Option<f64>,
    samples_written: u64,
    resets: usize,
    volume: f64,
}

impl MemorySinkState {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn buffered(&self) -> f64 {
        match self.paused_remaining {
            Some(remaining) => remaining,
            None => (self.queued_until - self.now()).max(0.0),
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemorySinkState {
                epoch: Instant::now(),
                spec: None,
                queued_until: 0.0,
                paused_remaining: None,
                samples_written: 0,
                resets: 0,
                volume: 1.0,
            }),
            fail_open: false,
        }
    }

    /// 打开总是失败的设备（模拟没有声卡）
    pub fn unavailable() -> Self {
        Self {
            fail_open: true,
            ..Self::new()
        }
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().spec.is_some()
    }

    pub fn samples_written(&self) -> u64 {
        self.state.lock().samples_written
    }

    pub fn reset_count(&self) -> usize {
        self.state.lock().resets
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for MemorySink {
    fn open(&self, spec: AudioSpec) -> Result<AudioSpec> {
        if self.fail_open {
            return Err(PlayerError::AudioError("没有可用的音频设备".to_string()));
        }
        let mut state = self.state.lock();
        state.spec = Some(spec);
        state.queued_until = state.now();
        state.paused_remaining = None;
        Ok(spec)
    }

    fn write(&self, samples: &[f32]) {
        let mut state = self.state.lock();
        let Some(spec) = state.spec else {
            return;
        };
        let per_second = spec.sample_rate as f64 * spec.channels as f64;
        if per_second <= 0.0 {
            return;
        }
        let duration = samples.len() as f64 / per_second;
        state.samples_written += samples.len() as u64;
        match state.paused_remaining.as_mut() {
            Some(remaining) => *remaining += duration,
            None => {
                let start = state.queued_until.max(state.now());
                state.queued_until = start + duration;
            }
        }
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().volume = volume.clamp(0.0, 1.0);
    }

    fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.queued_until = state.now();
        if state.paused_remaining.is_some() {
            state.paused_remaining = Some(0.0);
        }
        state.resets += 1;
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.spec = None;
        state.queued_until = state.now();
        state.paused_remaining = None;
    }

    fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock();
        match (paused, state.paused_remaining) {
            (true, None) => state.paused_remaining = Some(state.buffered()),
            (false, Some(remaining)) => {
                state.queued_until = state.now() + remaining;
                state.paused_remaining = None;
            }
            _ => {}
        }
    }

    fn buffered_seconds(&self) -> f64 {
        self.state.lock().buffered()
    }
}
