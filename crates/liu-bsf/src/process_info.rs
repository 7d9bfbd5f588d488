//! 进程信息收集器接口.
//!
//! 转换器在解析/改写码流的过程中把观测到的 HDR/DoVi 元数据推送给
//! 进程信息收集器 (播放器 UI、OSD 等从那里读取). 推送可能发生在任意一次
//! Convert 调用中; 实现方负责自身的内部同步, 所有 setter 以 `&self` 调用.

use crate::hdr::HdrStaticMetadataInfo;
use crate::hints::{DoviConfig, DvElType, HdrType};

/// 每帧 Dolby Vision 元数据 (取自 RPU level 1)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DoviFrameMetadata {
    pub level1_min_pq: u16,
    pub level1_max_pq: u16,
    pub level1_avg_pq: u16,
    /// 显示时间戳 (秒)
    pub pts: f64,
}

/// 每流 Dolby Vision 元数据 (首帧捕获)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DoviStreamMetadata {
    pub source_min_pq: u16,
    pub source_max_pq: u16,
    pub has_level6_metadata: bool,
    pub level6_max_lum: u16,
    pub level6_min_lum: u16,
    pub level6_max_cll: u16,
    pub level6_max_fall: u16,
    /// 元数据版本标签, 如 "CMv4.0 1-0" 或 "CMv2.9"
    pub meta_version: String,
}

/// 每流 Dolby Vision 信息
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DoviStreamInfo {
    pub dovi_el_type: DvElType,
    pub dovi: DoviConfig,
    /// hints 是否携带了非空 DoVi 配置记录
    pub has_config: bool,
    /// RPU 是否解析出了头部
    pub has_header: bool,
}

/// 进程信息收集器
///
/// 全部方法提供空默认实现, 使不关心某类元数据的实现方只需覆写所需 setter.
pub trait ProcessInfoSink: Send + Sync {
    /// 源 HDR 类型 (Open 时及发现双元数据流时更新)
    fn set_video_source_hdr_type(&self, _hdr_type: HdrType) {}

    /// 双元数据流中 "另一种" HDR 类型
    fn set_video_source_additional_hdr_type(&self, _hdr_type: HdrType) {}

    /// HDR 静态元数据 (MDCV/CLL 变化时更新)
    fn set_video_hdr_static_metadata_info(&self, _info: HdrStaticMetadataInfo) {}

    /// 每帧 DoVi 元数据
    fn set_video_dovi_frame_metadata(&self, _metadata: DoviFrameMetadata) {}

    /// 每流 DoVi 元数据 (首帧)
    fn set_video_dovi_stream_metadata(&self, _metadata: DoviStreamMetadata) {}

    /// 每流 DoVi 信息 (首帧, 反映转换后的状态)
    fn set_video_dovi_stream_info(&self, _info: DoviStreamInfo) {}

    /// 转换前的源 DoVi 信息 (仅在 RPU 即将被替换时捕获)
    fn set_video_source_dovi_stream_info(&self, _info: DoviStreamInfo) {}
}

/// 丢弃一切通知的空实现
pub struct NullProcessInfo;

impl ProcessInfoSink for NullProcessInfo {}
