use crate::player::demuxer_source::AudioCodec;
use crate::player::pipeline::Pipeline;
use crate::player::worker::StopSignal;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

const PACING_STEP: Duration = Duration::from_millis(5);
// 纯音频会话的位置上报间隔（毫秒）
const POSITION_REPORT_MS: i64 = 200;

/// 音频解码线程主体
///
/// 从音频包队列取包 → 解码（重采样到设备格式）→ 写入音频设备 → 推进播放时钟。
/// 设备里已缓冲的数据超过预读上限时按实时速度等待，时钟因此跟着设备走。
/// 线程结束时把解码器交还给协调线程（seek 后还要复用）。
pub fn run(
    pipeline: Arc<Pipeline>,
    mut decoder: Box<dyn AudioCodec>,
    report_position: bool,
    stop: StopSignal,
) -> Box<dyn AudioCodec> {
    let Some(sink) = pipeline.sink.clone() else {
        warn!("{} ⚠️ 没有音频设备，音频解码线程直接退出", super::log_ctx());
        return decoder;
    };
    let buffer_ahead = pipeline.config.audio_buffer_ahead();
    let sync_threshold = pipeline.config.audio_sync_threshold();
    let mut chunks: u64 = 0;
    let mut last_report: Option<i64> = None;

    'outer: loop {
        if !pipeline.pause_gate.wait_while_paused(&stop) {
            break;
        }
        let Some(packet) = pipeline.audio_queue.pop_blocking(&stop) else {
            break;
        };
        let decoded = if packet.is_end_of_input() {
            decoder.drain()
        } else {
            decoder.decode(&packet)
        };
        let frames = match decoded {
            Ok(frames) => frames,
            Err(e) => {
                warn!("{} ⚠️ 音频解码失败，跳过该包: {}", super::log_ctx(), e);
                continue;
            }
        };

        for frame in frames {
            if pipeline.before_seek_target(frame.pts) {
                continue;
            }
            if pipeline.clock.anchor(frame.pts_seconds()) {
                debug!("{} ⚓ 音频锚定时钟: pts={}ms", super::log_ctx(), frame.pts);
            }

            // 设备缓冲足够时等待，避免音频时间跑到墙钟前面太多
            while sink.buffered_seconds() > buffer_ahead {
                if !pipeline.pause_gate.wait_while_paused(&stop) || !stop.sleep(PACING_STEP) {
                    break 'outer;
                }
            }
            if stop.is_interrupted() {
                break 'outer;
            }

            sink.write(&frame.data);
            pipeline.clock.append_audio(frame.duration_seconds());
            chunks += 1;

            if let Some(drift) = pipeline
                .clock
                .resync_to_audio(sink.buffered_seconds(), sync_threshold)
            {
                debug!("{} 🔁 视频时钟跟随音频，修正 {:.3}s", super::log_ctx(), drift);
            }

            if report_position {
                let position_ms = (pipeline.clock.position(sink.buffered_seconds()) * 1000.0) as i64;
                let due = match last_report {
                    Some(last) => position_ms < last || position_ms - last >= POSITION_REPORT_MS,
                    None => true,
                };
                if due {
                    last_report = Some(position_ms);
                    pipeline.report_position(position_ms);
                }
            }
        }
    }

    info!("{} 🔊 音频解码线程退出，共送出 {} 段 PCM", super::log_ctx(), chunks);
    decoder
}
