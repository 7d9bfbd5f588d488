//! # liu-bsf
//!
//! Liu 视频基本流转换器 (bitstream filter) 库.
//!
//! 本 crate 对标 FFmpeg 的 `h264_mp4toannexb`/`hevc_mp4toannexb` 一族
//! bitstream filter, 位于解复用器与解码器/硬件表面之间:
//! 把长度前缀 (AVCC/HVCC) 访问单元重整为 Annex B 字节流, 并在逐帧处理中
//! 检视、改写、按需注入承载 HDR 元数据的高层语法 NAL:
//!
//! - SEI 前缀中的 MDCV / CLL / HDR10+ (ITU-T T.35) 消息
//! - Dolby Vision RPU (UNSPEC62) 与增强层 (UNSPEC63), 含双轨 BL+EL 合并
//! - HDR10+ → DoVi P8.1 合成 (经外部合成器)
//!
//! ## 使用示例
//!
//! ```rust
//! use std::sync::Arc;
//! use liu_bsf::{BitstreamConverter, CodecId, NullProcessInfo, StreamHints};
//!
//! // 最小 avcC 记录: 1 个 SPS + 1 个 PPS
//! let extra_data = vec![
//!     0x01, 0x64, 0x00, 0x28, 0xFF, 0xE1, // 头部, lengthSize=4, numOfSPS=1
//!     0x00, 0x04, 0x67, 0x64, 0x00, 0x28, // SPS
//!     0x01, 0x00, 0x02, 0x68, 0xCE, // PPS
//! ];
//! let hints = StreamHints::new(CodecId::Avc, extra_data);
//!
//! let mut converter = BitstreamConverter::new(hints, Arc::new(NullProcessInfo));
//! converter.open(true).unwrap();
//!
//! // 一个 4 字节长度前缀的 IDR NAL
//! let packet = [0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84];
//! converter.convert(&packet, 0.0).unwrap();
//! assert!(converter.convert_buffer().starts_with(&[0x00, 0x00, 0x00, 0x01]));
//! ```

pub mod annexb;
pub mod converter;
pub mod extradata;
pub mod hdr;
pub mod hints;
pub mod process_info;
pub mod rpu;
pub mod sei;
pub mod sequence;

// 重导出常用类型
pub use converter::BitstreamConverter;
pub use hdr::{ContentLightLevel, HdrStaticMetadataInfo, MasteringDisplayColourVolume};
pub use hints::{CodecId, DoviConfig, DvElType, HdrType, HintsMediator, StreamHints};
pub use process_info::{
    DoviFrameMetadata, DoviStreamInfo, DoviStreamMetadata, NullProcessInfo, ProcessInfoSink,
};
pub use rpu::{
    DoviConversionMode, Hdr10PlusSynthesizer, PeakBrightnessSource, RpuHandle, RpuLibrary,
};
pub use sei::Hdr10PlusMetadata;
pub use sequence::{H264Sequence, Mpeg2Sequence, h264_sequence_header, mpeg2_sequence_header};
