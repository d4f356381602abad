use crate::core::EngineState;
use crate::player::demuxer_source::{AudioCodec, DemuxerSource, MediaPacket, PacketType, VideoCodec};
use crate::player::pipeline::Pipeline;
use crate::player::worker::{StopSignal, WorkerThread};
use crate::player::{audio_worker, display, video_worker};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

// 读包出错（例如网络抖动）后的退避时间
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);
const LOG_FIRST_N: usize = 5;

/// 协调线程启动参数：解封装器、两个解码器和它们对应的流索引
pub struct CoordinatorParts {
    pub demuxer: Box<dyn DemuxerSource>,
    pub video_decoder: Option<Box<dyn VideoCodec>>,
    pub audio_decoder: Option<Box<dyn AudioCodec>>,
    pub video_stream: Option<usize>,
    pub audio_stream: Option<usize>,
    /// 网络流（直播）不扫描时长
    pub network_stream: bool,
}

/// Demuxer 线程管理器
///
/// 协调线程逐个读包并按流索引分发到有界包队列，同时负责：
/// - 启动和回收音视频解码线程、显示线程
/// - 在循环中执行 seek（中断并 join 解码线程 → 清空 → flush → 重启）
/// - 输入结束后向解码线程发送结束标记，等待全部排空，然后发出 end-of-stream（每个会话最多一次）
pub struct DemuxerThread {
    worker: Option<WorkerThread<()>>,
    pipeline: Arc<Pipeline>,
}

impl DemuxerThread {
    /// 启动 Demuxer 线程
    pub fn start(pipeline: Arc<Pipeline>, parts: CoordinatorParts) -> std::io::Result<Self> {
        let thread_pipeline = pipeline.clone();
        let worker = WorkerThread::spawn("demuxer", move |stop| {
            Coordinator::new(thread_pipeline, parts).run(&stop);
        })?;
        Ok(Self {
            worker: Some(worker),
            pipeline,
        })
    }

    /// 停止线程：设置中断标志 → 唤醒所有等待点 → join
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            info!("{} 🛑 DemuxerThread::stop()", super::log_ctx());
            worker.interrupt();
            self.pipeline.wake_all();
            worker.join();
        }
    }
}

impl Drop for DemuxerThread {
    fn drop(&mut self) {
        if self.worker.is_some() {
            warn!("{} ⚠ DemuxerThread 被 drop，但未调用 stop()，正在尝试优雅停止", super::log_ctx());
            self.stop();
        }
    }
}

/// 协调线程内部状态（只在协调线程上使用）
struct Coordinator {
    pipeline: Arc<Pipeline>,
    demuxer: Box<dyn DemuxerSource>,
    video_stream: Option<usize>,
    audio_stream: Option<usize>,
    network_stream: bool,
    // 解码线程运行时解码器在线程里，线程 join 后交还到这里
    video_decoder: Option<Box<dyn VideoCodec>>,
    audio_decoder: Option<Box<dyn AudioCodec>>,
    video_worker: Option<WorkerThread<Box<dyn VideoCodec>>>,
    audio_worker: Option<WorkerThread<Box<dyn AudioCodec>>>,
    display: Option<WorkerThread<()>>,
    end_of_input: bool,
    end_of_stream_sent: bool,
    video_packets: usize,
    audio_packets: usize,
}

impl Coordinator {
    fn new(pipeline: Arc<Pipeline>, parts: CoordinatorParts) -> Self {
        // 没有解码器的流不分发
        let video_stream = parts.video_stream.filter(|_| parts.video_decoder.is_some());
        let audio_stream = parts
            .audio_stream
            .filter(|_| parts.audio_decoder.is_some() && pipeline.sink.is_some());
        Self {
            pipeline,
            demuxer: parts.demuxer,
            video_stream,
            audio_stream,
            network_stream: parts.network_stream,
            video_decoder: parts.video_decoder,
            audio_decoder: parts.audio_decoder,
            video_worker: None,
            audio_worker: None,
            display: None,
            end_of_input: false,
            end_of_stream_sent: false,
            video_packets: 0,
            audio_packets: 0,
        }
    }

    fn run(mut self, stop: &StopSignal) {
        info!("{} 🎬 Demuxer 线程启动: {}", super::log_ctx(), self.demuxer.description());

        if self.pipeline.duration_ms() <= 0 && !self.network_stream {
            match self.demuxer.probe_duration(stop) {
                Some(duration_ms) => {
                    info!("{} ⏱️ 扫描得到时长: {}ms", super::log_ctx(), duration_ms);
                    self.pipeline.set_duration_ms(duration_ms);
                }
                None => debug!("{} 时长未知", super::log_ctx()),
            }
            if stop.is_interrupted() {
                info!("{} 🛑 Demuxer 线程在扫描时长时被停止", super::log_ctx());
                return;
            }
        }

        self.spawn_decoders();
        if self.video_stream.is_some() {
            let pipeline = self.pipeline.clone();
            match WorkerThread::spawn("display", move |stop| display::run(pipeline, stop)) {
                Ok(worker) => self.display = Some(worker),
                Err(e) => error!("{} ❌ 启动显示线程失败: {}", super::log_ctx(), e),
            }
        }

        while !stop.is_interrupted() {
            if let Some(target_ms) = self.pipeline.take_seek() {
                self.execute_seek(target_ms);
                continue;
            }

            if self.end_of_input {
                self.poll_end_of_stream();
                stop.sleep(self.pipeline.config.eof_poll());
                continue;
            }

            match self.demuxer.read_packet() {
                Ok(Some(packet)) => self.dispatch(packet, stop),
                Ok(None) => {
                    info!(
                        "{} 📄 Demuxer 到达文件末尾（{} 视频包，{} 音频包），等待播放完毕",
                        super::log_ctx(),
                        self.video_packets,
                        self.audio_packets
                    );
                    self.end_of_input = true;
                    self.send_end_of_input(stop);
                }
                Err(e) => {
                    warn!("{} ⚠️ 读取包失败: {}", super::log_ctx(), e);
                    stop.sleep(READ_ERROR_BACKOFF);
                }
            }
        }

        self.stop_decoders();
        if let Some(display) = self.display.take() {
            display.interrupt();
            self.pipeline.wake_all();
            display.join();
        }
        info!(
            "{} 🛑 Demuxer 线程退出（共读取 {} 视频包，{} 音频包）",
            super::log_ctx(),
            self.video_packets,
            self.audio_packets
        );
    }

    fn classify(&self, packet: &MediaPacket) -> Option<PacketType> {
        if Some(packet.stream_index) == self.video_stream {
            Some(PacketType::Video)
        } else if Some(packet.stream_index) == self.audio_stream {
            Some(PacketType::Audio)
        } else {
            None
        }
    }

    /// 按流索引把包放进对应队列；队列满时阻塞，有 seek 待执行时丢弃
    fn dispatch(&mut self, packet: MediaPacket, stop: &StopSignal) {
        let Some(kind) = self.classify(&packet) else {
            // 字幕/数据包等其他流
            return;
        };
        let pipeline = &self.pipeline;
        let queue = match kind {
            PacketType::Video => &pipeline.video_queue,
            PacketType::Audio => &pipeline.audio_queue,
        };
        if !queue.enqueue(packet, || pipeline.seek_pending() || stop.is_interrupted()) {
            debug!("{} 🗑️ 丢弃 {} 包（seek 待执行或线程中断）", super::log_ctx(), queue.name());
            return;
        }
        let count = match kind {
            PacketType::Video => {
                self.video_packets += 1;
                self.video_packets
            }
            PacketType::Audio => {
                self.audio_packets += 1;
                self.audio_packets
            }
        };
        if count <= LOG_FIRST_N {
            debug!("{} 📦 Demuxer 读取{}包 #{}", super::log_ctx(), queue.name(), count);
        }
    }

    /// 给每个解码线程排一个结束标记，让它们排空解码器里缓存的帧
    fn send_end_of_input(&self, stop: &StopSignal) {
        let pipeline = &self.pipeline;
        let streams = [
            (self.video_stream, &pipeline.video_queue),
            (self.audio_stream, &pipeline.audio_queue),
        ];
        for (stream, queue) in streams {
            let Some(index) = stream else {
                continue;
            };
            if !queue.enqueue(MediaPacket::end_of_input(index), || {
                pipeline.seek_pending() || stop.is_interrupted()
            }) {
                debug!("{} 🗑️ {} 结束标记未入队（seek 待执行或线程中断）", super::log_ctx(), queue.name());
            }
        }
    }

    /// 输入结束后：两条队列排空、解码线程空闲、环形缓冲为空时发出一次 end-of-stream
    fn poll_end_of_stream(&mut self) {
        if self.end_of_stream_sent || self.pipeline.pause_gate.is_paused() {
            return;
        }
        let pipeline = &self.pipeline;
        let drained = pipeline.video_queue.is_drained()
            && pipeline.audio_queue.is_drained()
            && pipeline.ring.occupancy() == 0;
        if drained {
            self.end_of_stream_sent = true;
            info!("{} 🏁 播放完毕", super::log_ctx());
            pipeline.listeners.notify(|l| l.on_end_of_stream());
        }
    }

    fn execute_seek(&mut self, target_ms: i64) {
        info!("{} ⏩ 执行 Seek: {}ms", super::log_ctx(), target_ms);
        let pipeline = self.pipeline.clone();
        pipeline.set_state(EngineState::Seeking);

        if let Err(e) = self.demuxer.seek(target_ms) {
            error!("{} ❌ Seek 失败，忽略本次请求: {}", super::log_ctx(), e);
            pipeline.leave_seeking();
            return;
        }

        self.stop_decoders();

        let dropped_video = pipeline.video_queue.clear();
        let dropped_audio = pipeline.audio_queue.clear();
        pipeline.ring.clear();
        debug!(
            "{} 🧹 清空队列：{} 视频包，{} 音频包",
            super::log_ctx(),
            dropped_video,
            dropped_audio
        );

        if let Some(decoder) = self.video_decoder.as_mut() {
            decoder.flush();
        }
        if let Some(decoder) = self.audio_decoder.as_mut() {
            decoder.flush();
        }
        if let Some(sink) = pipeline.sink.as_ref() {
            sink.reset();
        }

        pipeline.ring.set_display_time(pipeline.clock.now());
        pipeline.clock.reset_for_seek(target_ms as f64 / 1000.0);
        pipeline.set_seek_floor(target_ms);
        pipeline.set_position_ms(target_ms);

        // end-of-stream 已经发出过的会话不会再发第二次
        self.end_of_input = false;

        if pipeline.pause_gate.is_paused() {
            pipeline.request_seek_preview();
        }
        self.spawn_decoders();
        pipeline.leave_seeking();
        info!("{} ✅ Seek 完成: {}ms", super::log_ctx(), target_ms);
    }

    fn spawn_decoders(&mut self) {
        if self.video_stream.is_some() {
            if let Some(decoder) = self.video_decoder.take() {
                let pipeline = self.pipeline.clone();
                match WorkerThread::spawn("video-decoder", move |stop| video_worker::run(pipeline, decoder, stop)) {
                    Ok(worker) => self.video_worker = Some(worker),
                    Err(e) => error!("{} ❌ 启动视频解码线程失败: {}", super::log_ctx(), e),
                }
            }
        }
        if self.audio_stream.is_some() {
            if let Some(decoder) = self.audio_decoder.take() {
                let pipeline = self.pipeline.clone();
                let report_position = self.video_stream.is_none();
                match WorkerThread::spawn("audio-decoder", move |stop| {
                    audio_worker::run(pipeline, decoder, report_position, stop)
                }) {
                    Ok(worker) => self.audio_worker = Some(worker),
                    Err(e) => error!("{} ❌ 启动音频解码线程失败: {}", super::log_ctx(), e),
                }
            }
        }
    }

    /// 先中断全部解码线程，再唤醒等待点，最后逐个 join 并收回解码器
    fn stop_decoders(&mut self) {
        if let Some(worker) = self.video_worker.as_ref() {
            worker.interrupt();
        }
        if let Some(worker) = self.audio_worker.as_ref() {
            worker.interrupt();
        }
        self.pipeline.wake_all();

        if let Some(worker) = self.video_worker.take() {
            self.video_decoder = worker.join();
        }
        if let Some(worker) = self.audio_worker.take() {
            self.audio_decoder = worker.join();
        }
    }
}
