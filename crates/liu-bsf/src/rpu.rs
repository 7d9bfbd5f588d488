//! Dolby Vision RPU 库与 HDR10+ → DoVi 合成器的外部接口.
//!
//! RPU 的解析/改写与 HDR10+ 合成由第三方库完成, 本模块只定义转换器消费的
//! 契约. 库返回的资源以所有权建模: `RpuHandle` 与其产物离开作用域即释放,
//! 所有出错路径上不需要配对的 free 调用.
//!
//! 未注入实现时, 所有 DoVi 转换与 HDR10+ → DoVi 功能均不可用,
//! 相应的转换开关在 Open 时被拒绝.

use liu_core::LiuResult;

use crate::hdr::HdrStaticMetadataInfo;
use crate::sei::Hdr10PlusMetadata;

/// Dolby Vision RPU 转换模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoviConversionMode {
    /// 不转换, 原样发射
    #[default]
    None,
    /// Profile 7 FEL → MEL
    ToMel,
    /// Profile 7 → Profile 8.1
    To81,
}

/// HDR10+ → DoVi 合成的目标亮度来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeakBrightnessSource {
    /// 场景峰值亮度
    #[default]
    SceneMax,
    /// 帧峰值亮度
    FrameMax,
    /// MDCV 最大母带亮度
    MdcvMax,
    /// 固定值
    Fixed,
}

/// RPU 头部摘要
#[derive(Debug, Clone, Default)]
pub struct RpuHeader {
    /// 推测的 DoVi profile (4/5/7/8)
    pub guessed_profile: u8,
    /// 增强层类型描述 ("FEL"/"MEL"), 仅双层 profile 存在
    pub el_type: Option<String>,
}

/// level 1: 每帧动态亮度 (PQ 编码)
#[derive(Debug, Clone, Copy, Default)]
pub struct RpuLevel1 {
    pub min_pq: u16,
    pub max_pq: u16,
    pub avg_pq: u16,
}

/// level 6: HDR10 兼容静态元数据
#[derive(Debug, Clone, Copy, Default)]
pub struct RpuLevel6 {
    pub max_display_mastering_luminance: u16,
    pub min_display_mastering_luminance: u16,
    pub max_content_light_level: u16,
    pub max_frame_average_light_level: u16,
}

/// level 254: CMv4.0 版本信息
#[derive(Debug, Clone, Copy, Default)]
pub struct RpuLevel254 {
    pub dm_version_index: u8,
    pub dm_mode: u8,
}

/// RPU 中的 VDR DM 数据 (转换器消费的子集)
#[derive(Debug, Clone, Default)]
pub struct VdrDmData {
    pub source_min_pq: u16,
    pub source_max_pq: u16,
    pub level1: Option<RpuLevel1>,
    /// level 2 (按目标显示微调) 块数量
    pub level2_count: usize,
    pub level6: Option<RpuLevel6>,
    /// level 8 (CMv4.0 微调) 块数量
    pub level8_count: usize,
    pub level254: Option<RpuLevel254>,
}

/// 一次解析得到的 RPU 句柄
///
/// 解析、查询与改写共用同一个句柄; 写出产物是独立的 `Vec<u8>`.
pub trait RpuHandle {
    /// RPU 头部 (解析失败的流可能没有)
    fn header(&self) -> Option<RpuHeader>;

    /// VDR DM 数据
    fn vdr_dm_data(&self) -> Option<VdrDmData>;

    /// 按模式就地转换 RPU; 失败时句柄保持原状
    fn convert_with_mode(&mut self, mode: DoviConversionMode) -> LiuResult<()>;

    /// 序列化为 UNSPEC62 NAL 单元字节 (含 2 字节 NAL 头与防竞争字节)
    fn write_unspec62_nalu(&self) -> LiuResult<Vec<u8>>;
}

/// Dolby Vision RPU 解析/改写库
pub trait RpuLibrary: Send + Sync {
    /// 从 UNSPEC62 NAL 单元字节解析 RPU (输入含 2 字节 NAL 头)
    fn parse_unspec62_nalu(&self, nal: &[u8]) -> LiuResult<Box<dyn RpuHandle>>;
}

/// HDR10+ 色调映射元数据 → DoVi P8.1 RPU 合成器
pub trait Hdr10PlusSynthesizer: Send + Sync {
    /// 合成 UNSPEC62 NAL 单元字节; 返回空 Vec 表示本帧无法合成
    fn create_rpu_nalu(
        &self,
        metadata: &Hdr10PlusMetadata,
        peak_source: PeakBrightnessSource,
        hdr_static_metadata: &HdrStaticMetadataInfo,
    ) -> Vec<u8>;
}
