use crate::player::frame_ring::FrameToken;
use crate::player::pipeline::Pipeline;
use crate::player::worker::StopSignal;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// 显示调度线程主体
///
/// 按帧的显示时刻把环形缓冲里的帧交给画面监听器。显示时刻每次都用当前时钟重新计算，
/// 暂停恢复和音频修正对已经排队的帧同样生效。
pub fn run(pipeline: Arc<Pipeline>, stop: StopSignal) {
    let ring = pipeline.ring.clone();
    let lateness = pipeline.config.frame_drop_lateness();
    let slack = pipeline.config.presentation_slack();
    let sleep_cap = pipeline.config.long_sleep_cap();
    let mut presented: u64 = 0;
    let mut dropped: u64 = 0;

    'outer: loop {
        if !pipeline.pause_gate.wait_while_paused(&stop) {
            break;
        }
        let Some((head, occupancy, generation)) = ring.wait_for_frame(&stop) else {
            break;
        };
        let pts = head.frame.pts_seconds();

        // 后面还有帧且这一帧已经过期：直接确认，不显示
        let due = pipeline.clock.display_time(pts);
        if occupancy > 1 && due < pipeline.clock.now() - lateness {
            if ring.acknowledge(generation) {
                dropped += 1;
                debug!(
                    "{} ⏭️ 丢弃过期帧 pts={}ms（晚了 {:.3}s）",
                    super::log_ctx(),
                    head.frame.pts,
                    pipeline.clock.now() - due
                );
            }
            continue;
        }

        if !ring.begin_display(generation) {
            continue;
        }
        if let Some(listener) = pipeline.listeners.frame() {
            listener.update_frame();
        }

        loop {
            if pipeline.pause_gate.is_paused() {
                if !pipeline.pause_gate.wait_while_paused(&stop) {
                    break 'outer;
                }
                continue;
            }
            let remaining = pipeline.clock.display_time(pts) - pipeline.clock.now();
            if remaining < slack {
                break;
            }
            let nap = Duration::from_secs_f64(remaining.min(sleep_cap));
            if !ring.sleep_unless_cleared(generation, nap, &stop) {
                if stop.is_interrupted() {
                    break 'outer;
                }
                // 缓冲在等待期间被 seek 清空，这一帧作废
                continue 'outer;
            }
        }

        pipeline.report_position(head.frame.pts);
        presented += 1;
        match pipeline.listeners.frame() {
            Some(listener) => listener.draw_frame(FrameToken::new(ring.clone(), head.frame, generation)),
            None => {
                ring.acknowledge(generation);
            }
        }
    }

    info!(
        "{} 🖥️ 显示线程退出，显示 {} 帧，丢弃 {} 帧",
        super::log_ctx(),
        presented,
        dropped
    );
}
