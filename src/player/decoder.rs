use crate::core::{AudioFrame, AudioSpec, MediaInfo, PixelFormat, PlayerError, Result, SampleFormat, VideoFrame};
use crate::player::demuxer_source::{AudioCodec, MediaPacket, PacketPayload, VideoCodec};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, format, software, util};
use log::{debug, warn};

fn ffmpeg_packet(packet: &MediaPacket) -> Result<&ffmpeg::Packet> {
    match &packet.payload {
        PacketPayload::Ffmpeg(packet) => Ok(packet),
        PacketPayload::Bytes(_) | PacketPayload::EndOfInput => {
            Err(PlayerError::DecodeError("不是 FFmpeg 数据包".to_string()))
        }
    }
}

/// 收集转换结果：单帧转换失败只丢这一帧，同一批里已经解出的帧保留
fn keep_converted<T>(converted: Result<T>, frames: &mut Vec<T>, kind: &str) {
    match converted {
        Ok(frame) => frames.push(frame),
        Err(e) => warn!("{}帧转换失败（已跳过）: {}", kind, e),
    }
}

fn to_ffmpeg_pixel(format: PixelFormat) -> util::format::Pixel {
    match format {
        PixelFormat::RGBA => util::format::Pixel::RGBA,
        PixelFormat::RGB24 => util::format::Pixel::RGB24,
        PixelFormat::YUV420P => util::format::Pixel::YUV420P,
        PixelFormat::YUYV422 => util::format::Pixel::YUYV422,
    }
}

/// 每个平面的 (每行字节数, 行数)
fn plane_layout(format: PixelFormat, width: u32, height: u32) -> Vec<(usize, usize)> {
    let (w, h) = (width as usize, height as usize);
    match format {
        PixelFormat::RGBA => vec![(w * 4, h)],
        PixelFormat::RGB24 => vec![(w * 3, h)],
        PixelFormat::YUYV422 => vec![(w * 2, h)],
        PixelFormat::YUV420P => {
            let chroma = (w.div_ceil(2), h.div_ceil(2));
            vec![(w, h), chroma, chroma]
        }
    }
}

/// 软件视频解码器：解码并转换到目标像素格式
pub struct VideoDecoder {
    decoder: codec::decoder::Video,
    scaler: Option<software::scaling::Context>,
    // scaler 对应的输入 (格式, 宽, 高)，变化时重建
    scaler_input: Option<(util::format::Pixel, u32, u32)>,
    output_format: PixelFormat,
    time_base: f64,
    fps: f64,
    frame_duration_ms: i64,
}

// SwsContext 本身不是 Send，但每个解码器实例任一时刻只在一个线程中使用
unsafe impl Send for VideoDecoder {}

impl VideoDecoder {
    /// 从视频流创建软件解码器
    pub fn from_stream(stream: &format::stream::Stream, output_format: PixelFormat) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().video()?;

        let time_base = f64::from(stream.time_base());
        let rate = stream.avg_frame_rate();
        let fps = if rate.denominator() != 0 { f64::from(rate) } else { 0.0 };
        let frame_duration_ms = MediaInfo::frame_duration_for(fps);

        debug!(
            "软件解码器: {}x{}, 格式: {:?} → {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format(),
            output_format
        );

        Ok(Self {
            decoder,
            scaler: None,
            scaler_input: None,
            output_format,
            time_base,
            fps,
            frame_duration_ms,
        })
    }

    /// 流参数中的分辨率
    pub fn dimensions(&self) -> (u32, u32) {
        (self.decoder.width(), self.decoder.height())
    }

    /// 平均帧率，未知时为 0
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// 转换帧格式并复制到连续内存
    fn convert_frame(&mut self, frame: &util::frame::Video) -> Result<VideoFrame> {
        let width = frame.width();
        let height = frame.height();
        let input = (frame.format(), width, height);

        if self.scaler_input != Some(input) {
            self.scaler = Some(software::scaling::Context::get(
                frame.format(),
                width,
                height,
                to_ffmpeg_pixel(self.output_format),
                width,
                height,
                software::scaling::Flags::BILINEAR,
            )?);
            self.scaler_input = Some(input);
        }
        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| PlayerError::DecodeError("像素格式转换器未初始化".to_string()))?;

        let mut converted = util::frame::Video::empty();
        scaler.run(frame, &mut converted)?;

        // 计算 PTS（毫秒）
        let pts = frame
            .timestamp()
            .map(|timestamp| (timestamp as f64 * self.time_base * 1000.0) as i64)
            .unwrap_or(0);

        let mut data = Vec::with_capacity(self.output_format.frame_size(width, height));
        for (plane, (row_bytes, rows)) in plane_layout(self.output_format, width, height)
            .into_iter()
            .enumerate()
        {
            let stride = converted.stride(plane);
            let plane_data = converted.data(plane);
            for y in 0..rows {
                let start = y * stride;
                data.extend_from_slice(&plane_data[start..start + row_bytes]);
            }
        }

        Ok(VideoFrame {
            pts,
            duration: self.frame_duration_ms,
            width,
            height,
            format: self.output_format,
            data,
        })
    }
}

impl VideoDecoder {
    /// 取出解码器当前能给出的全部帧
    fn receive_frames(&mut self) -> Vec<VideoFrame> {
        let mut frames = Vec::new();
        loop {
            let mut decoded_frame = util::frame::Video::empty();
            match self.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => keep_converted(self.convert_frame(&decoded_frame), &mut frames, "视频"),
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) => {
                    // 对于网络流，某些解码错误是可以容忍的
                    warn!("解码错误（已跳过）: {}", e);
                    break;
                }
            }
        }
        frames
    }
}

impl VideoCodec for VideoDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<VideoFrame>> {
        let packet = ffmpeg_packet(packet)?;

        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("视频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                self.decoder.flush();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }

        Ok(self.receive_frames())
    }

    fn drain(&mut self) -> Result<Vec<VideoFrame>> {
        match self.decoder.send_eof() {
            Ok(()) => {}
            // 已经处于排空状态
            Err(ffmpeg::Error::Eof) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        let frames = self.receive_frames();
        debug!("视频解码器排空，取出 {} 帧", frames.len());
        Ok(frames)
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn info(&self) -> String {
        format!("软件解码 → {:?}", self.output_format)
    }
}

/// 音频解码器：解码并重采样到输出设备格式（交错 f32）
pub struct AudioDecoder {
    decoder: codec::decoder::Audio,
    resampler: Option<software::resampling::Context>,
    time_base: f64,
    target: AudioSpec,
}

// SwrContext 同上，只在音频解码线程中使用
unsafe impl Send for AudioDecoder {}

impl AudioDecoder {
    /// 从音频流创建解码器（指定目标配置）
    pub fn from_stream(stream: &format::stream::Stream, target: AudioSpec) -> Result<Self> {
        let context = codec::context::Context::from_parameters(stream.parameters())?;
        let decoder = context.decoder().audio()?;

        debug!(
            "音频解码器: {} Hz, {} 声道 → 目标: {} Hz, {} 声道",
            decoder.rate(),
            decoder.channels(),
            target.sample_rate,
            target.channels
        );

        Ok(Self {
            decoder,
            resampler: None,
            time_base: f64::from(stream.time_base()),
            target,
        })
    }

    /// 转换音频帧为 f32 格式（支持声道转换和重采样）
    fn convert_frame(&mut self, frame: &util::frame::Audio) -> Result<AudioFrame> {
        if self.resampler.is_none() {
            let target_layout = match self.target.channels {
                1 => util::channel_layout::ChannelLayout::MONO,
                6 => util::channel_layout::ChannelLayout::_5POINT1,
                _ => util::channel_layout::ChannelLayout::STEREO,
            };
            // 部分解码器不给声道布局，按声道数推断
            let source_layout = if frame.channel_layout().is_empty() {
                util::channel_layout::ChannelLayout::default(frame.channels() as i32)
            } else {
                frame.channel_layout()
            };

            debug!(
                "🔧 初始化音频重采样器: {}Hz/{}ch → {}Hz/{}ch",
                frame.rate(),
                frame.channels(),
                self.target.sample_rate,
                self.target.channels
            );

            self.resampler = Some(software::resampling::Context::get(
                frame.format(),
                source_layout,
                frame.rate(),
                util::format::Sample::F32(util::format::sample::Type::Packed),
                target_layout,
                self.target.sample_rate,
            )?);
        }
        let resampler = self
            .resampler
            .as_mut()
            .ok_or_else(|| PlayerError::DecodeError("重采样器未初始化".to_string()))?;

        let mut resampled = util::frame::Audio::empty();
        resampler.run(frame, &mut resampled)?;

        // 计算 PTS（毫秒）
        let pts = frame
            .timestamp()
            .map(|timestamp| (timestamp as f64 * self.time_base * 1000.0) as i64)
            .unwrap_or(0);

        let sample_count = resampled.samples() * self.target.channels as usize;
        let bytes = resampled.data(0);
        let byte_count = (sample_count * 4).min(bytes.len());
        let data = bytes[..byte_count]
            .chunks_exact(4)
            .map(|raw| f32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]))
            .collect();

        Ok(AudioFrame {
            pts,
            sample_rate: self.target.sample_rate,
            channels: self.target.channels,
            format: SampleFormat::F32,
            data,
        })
    }
}

impl AudioDecoder {
    /// 取出解码器当前能给出的全部 PCM；一帧都没拿到时才把错误交给调用方
    fn receive_frames(&mut self) -> Result<Vec<AudioFrame>> {
        let mut frames = Vec::new();
        loop {
            let mut decoded_frame = util::frame::Audio::empty();
            match self.decoder.receive_frame(&mut decoded_frame) {
                Ok(()) => keep_converted(self.convert_frame(&decoded_frame), &mut frames, "音频"),
                Err(ffmpeg::Error::Other { errno: 11 }) => break, // EAGAIN
                Err(ffmpeg::Error::Eof) => break,
                Err(e) if frames.is_empty() => return Err(e.into()),
                Err(e) => {
                    warn!("音频解码错误（保留已解出的 {} 段）: {}", frames.len(), e);
                    break;
                }
            }
        }
        Ok(frames)
    }
}

impl AudioCodec for AudioDecoder {
    fn decode(&mut self, packet: &MediaPacket) -> Result<Vec<AudioFrame>> {
        let packet = ffmpeg_packet(packet)?;

        match self.decoder.send_packet(packet) {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => {
                debug!("音频解码器收到 EOF（send_packet），执行 flush 并忽略本次包");
                self.decoder.flush();
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        }

        self.receive_frames()
    }

    fn drain(&mut self) -> Result<Vec<AudioFrame>> {
        match self.decoder.send_eof() {
            Ok(()) => {}
            Err(ffmpeg::Error::Eof) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        }
        self.receive_frames()
    }

    fn flush(&mut self) {
        self.decoder.flush();
    }

    fn info(&self) -> String {
        format!(
            "音频解码 → {} Hz, {} 声道",
            self.target.sample_rate, self.target.channels
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plane_layout_matches_frame_size() {
        for format in [
            PixelFormat::RGBA,
            PixelFormat::RGB24,
            PixelFormat::YUV420P,
            PixelFormat::YUYV422,
        ] {
            let total: usize = plane_layout(format, 33, 17)
                .iter()
                .map(|(row_bytes, rows)| row_bytes * rows)
                .sum();
            assert_eq!(total, format.frame_size(33, 17), "{:?}", format);
        }
    }

    #[test]
    fn test_failed_conversion_keeps_batch() {
        let mut frames = vec![1];
        keep_converted(Ok(2), &mut frames, "视频");
        keep_converted(Err(PlayerError::DecodeError("bad".to_string())), &mut frames, "视频");
        keep_converted(Ok(3), &mut frames, "视频");
        assert_eq!(frames, vec![1, 2, 3]);
    }
}
