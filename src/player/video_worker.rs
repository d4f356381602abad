use crate::player::demuxer_source::VideoCodec;
use crate::player::pipeline::Pipeline;
use crate::player::worker::StopSignal;
use log::{debug, info, warn};
use std::sync::Arc;

/// 视频解码线程主体
///
/// 从视频包队列取包 → 解码并转换像素格式 → 计算显示时刻 → 写入环形缓冲（满时阻塞）。
/// 收到输入结束标记时排空解码器。
/// 暂停中 seek 之后先越过暂停闸门输出一帧，让画面停在新位置。
pub fn run(pipeline: Arc<Pipeline>, mut decoder: Box<dyn VideoCodec>, stop: StopSignal) -> Box<dyn VideoCodec> {
    let mut published: u64 = 0;
    let mut skipped: u64 = 0;
    let mut preview = pipeline.take_seek_preview();

    'outer: loop {
        if !preview && !pipeline.pause_gate.wait_while_paused(&stop) {
            break;
        }
        let Some(packet) = pipeline.video_queue.pop_blocking(&stop) else {
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
                warn!("{} ⚠️ 视频解码失败，跳过该包: {}", super::log_ctx(), e);
                continue;
            }
        };

        for frame in frames {
            let pts_ms = frame.pts;
            // seek 落在目标之前的关键帧上，解到目标附近之前的帧不显示、不锚定
            if pipeline.before_seek_target(pts_ms) {
                skipped += 1;
                continue;
            }
            let pts = frame.pts_seconds();
            if pipeline.clock.anchor(pts) {
                debug!("{} ⚓ 视频锚定时钟: pts={}ms", super::log_ctx(), frame.pts);
            }
            let display_time = pipeline.clock.display_time(pts);
            if !pipeline.ring.publish(frame, display_time, &stop) {
                break 'outer;
            }
            published += 1;
            if preview {
                preview = false;
                pipeline.report_position(pts_ms);
                debug!("{} 🖼️ 暂停中 seek 的预览帧: pts={}ms", super::log_ctx(), pts_ms);
            }
        }
    }

    info!(
        "{} 🎞️ 视频解码线程退出，共输出 {} 帧，跳过 seek 目标之前的 {} 帧",
        super::log_ctx(),
        published,
        skipped
    );
    decoder
}
