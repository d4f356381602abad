use crate::core::{PlayerError, Result};
use crate::player::demuxer_source::{DemuxerSource, MediaPacket, PacketPayload};
use crate::player::worker::StopSignal;
use ffmpeg_next as ffmpeg;
use ffmpeg_next::format;
use log::{debug, info, warn};

/// 解封装器 - 负责读取媒体文件并分离音视频流
pub struct Demuxer {
    input_ctx: format::context::Input,
    video_stream_index: Option<usize>,
    source_path: String, // 媒体源路径（用于描述）
}

impl Demuxer {
    pub fn new(input_ctx: format::context::Input, video_stream_index: Option<usize>, source_path: String) -> Self {
        Self {
            input_ctx,
            video_stream_index,
            source_path,
        }
    }

    /// 流的时间基（秒/单位）
    fn time_base(&self, stream_index: usize) -> f64 {
        self.input_ctx
            .stream(stream_index)
            .map(|stream| f64::from(stream.time_base()))
            .unwrap_or(0.0)
    }

    /// Seek 到指定位置（毫秒）
    fn seek_internal(&mut self, timestamp_ms: i64) -> Result<()> {
        let timestamp = timestamp_ms.max(0) * 1000; // 毫秒转微秒
        self.input_ctx
            .seek(timestamp, ..timestamp)
            .map_err(|e| PlayerError::SeekError(format!("{}ms: {}", timestamp_ms, e)))
    }
}

impl DemuxerSource for Demuxer {
    fn read_packet(&mut self) -> Result<Option<MediaPacket>> {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => Ok(Some(MediaPacket {
                stream_index: packet.stream(),
                pts: packet.pts(),
                dts: packet.dts(),
                payload: PacketPayload::Ffmpeg(packet),
            })),
            Err(ffmpeg::Error::Eof) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn seek(&mut self, timestamp_ms: i64) -> Result<()> {
        self.seek_internal(timestamp_ms)
    }

    /// 扫描整个文件找最后一个视频包的时间戳，然后回到开头
    fn probe_duration(&mut self, stop: &StopSignal) -> Option<i64> {
        let video_index = self.video_stream_index?;
        let time_base = self.time_base(video_index);
        if time_base <= 0.0 {
            return None;
        }
        info!("⏱️ 容器没有时长信息，扫描文件: {}", self.source_path);

        let mut last_end: Option<i64> = None;
        let mut packet = ffmpeg::Packet::empty();
        loop {
            if stop.is_interrupted() {
                info!("⏹️ 时长扫描被中断: {}", self.source_path);
                return None;
            }
            match packet.read(&mut self.input_ctx) {
                Ok(()) => {
                    if packet.stream() != video_index {
                        continue;
                    }
                    if let Some(pts) = packet.pts() {
                        let end = pts + packet.duration().max(0);
                        last_end = Some(last_end.map_or(end, |last| last.max(end)));
                    }
                }
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    debug!("扫描时长时读包失败: {}", e);
                    break;
                }
            }
        }

        if let Err(e) = self.seek_internal(0) {
            warn!("扫描时长后无法回到开头: {}", e);
        }
        last_end
            .map(|end| (end as f64 * time_base * 1000.0) as i64)
            .filter(|duration_ms| *duration_ms > 0)
    }

    fn description(&self) -> String {
        format!("FFmpeg Demuxer: {}", self.source_path)
    }
}
