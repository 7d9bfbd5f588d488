//! 流提示 (stream hints) 数据模型与调解器.
//!
//! `StreamHints` 由打开流的一方填好 codec 与配置记录后移交给转换器,
//! 在流的生命周期内由转换器独占持有. 任何改变已发射码流宣告内容的组件
//! (RPU 移除/转换、HDR10+ → DoVi 合成、双元数据源发现) 都必须经由
//! [`HintsMediator`] 修改 hints, 由它配对完成对进程信息收集器的通知.

use std::sync::Arc;

use crate::process_info::ProcessInfoSink;
use crate::rpu::DoviConversionMode;

/// 编解码器标识
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecId {
    /// H.264 / AVC
    Avc,
    /// H.265 / HEVC
    Hevc,
}

/// HDR 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HdrType {
    /// SDR / 无 HDR 元数据
    #[default]
    None,
    /// HDR10 (静态元数据)
    Hdr10,
    /// HDR10+ (动态色调映射)
    Hdr10Plus,
    /// HLG
    Hlg,
    /// Dolby Vision
    DolbyVision,
}

/// Dolby Vision 增强层类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DvElType {
    /// 无增强层
    #[default]
    None,
    /// Full Enhancement Layer
    Fel,
    /// Minimal Enhancement Layer
    Mel,
}

/// Dolby Vision 配置记录 (dvcC/dvvC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DoviConfig {
    pub dv_version_major: u8,
    pub dv_version_minor: u8,
    pub dv_profile: u8,
    pub dv_level: u8,
    pub rpu_present_flag: bool,
    pub el_present_flag: bool,
    pub bl_present_flag: bool,
    pub dv_bl_signal_compatibility_id: u8,
}

impl DoviConfig {
    /// 是否携带了有效配置 (与空记录不同)
    pub fn is_configured(&self) -> bool {
        *self != Self::default()
    }
}

/// 流提示
///
/// 打开流前必须填好 `codec` 与 `extra_data` (AVCC/HVCC 配置记录字节).
#[derive(Debug, Clone)]
pub struct StreamHints {
    /// 编解码器标识
    pub codec: CodecId,
    /// 配置记录字节 (avcC/hvcC, 或 Annex B 形式的参数集)
    pub extra_data: Vec<u8>,
    /// HDR 类型
    pub hdr_type: HdrType,
    /// Dolby Vision 配置记录
    pub dovi: DoviConfig,
    /// Dolby Vision 增强层类型
    pub dovi_el_type: DvElType,
}

impl StreamHints {
    /// 以 codec 与配置记录创建流提示
    pub fn new(codec: CodecId, extra_data: Vec<u8>) -> Self {
        Self {
            codec,
            extra_data,
            hdr_type: HdrType::None,
            dovi: DoviConfig::default(),
            dovi_el_type: DvElType::None,
        }
    }
}

/// 流提示调解器
///
/// hints 变更的唯一入口. 变更与进程信息通知在此配对发生,
/// 保证 hints 宣告与实际发射的码流始终一致.
pub struct HintsMediator {
    hints: StreamHints,
    sink: Arc<dyn ProcessInfoSink>,
}

impl HintsMediator {
    pub fn new(hints: StreamHints, sink: Arc<dyn ProcessInfoSink>) -> Self {
        Self { hints, sink }
    }

    /// 当前 hints 快照 (只读)
    pub fn hints(&self) -> &StreamHints {
        &self.hints
    }

    /// 将源 HDR 类型发布给进程信息收集器 (Open 时调用一次)
    pub fn publish_source_hdr_type(&self) {
        self.sink.set_video_source_hdr_type(self.hints.hdr_type);
    }

    /// 首帧发现 HDR10+ 元数据时的 hints/通知处理
    ///
    /// `is_dual`: 源本身是 DoVi, 现在又发现了 HDR10+ (双元数据流).
    /// `consider_as_hdr10plus`: 按配置是否把该流当作 HDR10+ 源对待.
    pub fn note_hdr10plus_source(&mut self, is_dual: bool, consider_as_hdr10plus: bool) {
        if consider_as_hdr10plus {
            self.hints.hdr_type = HdrType::Hdr10Plus;
            self.sink.set_video_source_hdr_type(HdrType::Hdr10Plus);
            if is_dual {
                self.sink
                    .set_video_source_additional_hdr_type(HdrType::DolbyVision);
            }
        } else if is_dual {
            self.sink
                .set_video_source_additional_hdr_type(HdrType::Hdr10Plus);
        }
    }

    /// RPU 转换成功后的 hints 更新
    ///
    /// 转换到 MEL 或 P8.1 都会移除增强层; 转换到 P8.1 时同时改写
    /// profile 与 BL 兼容标识.
    pub fn apply_rpu_conversion(&mut self, mode: DoviConversionMode) {
        self.hints.dovi.el_present_flag = false;
        if mode == DoviConversionMode::To81 {
            self.hints.dovi.dv_profile = 8;
            self.hints.dovi.dv_bl_signal_compatibility_id = 1;
        }
    }

    /// HDR10+ → DoVi 合成生效时改写 hints 为 P8.1 单层 Dolby Vision
    pub fn apply_hdr10plus_synthesis(&mut self) {
        self.hints.hdr_type = HdrType::DolbyVision;
        self.hints.dovi.dv_version_major = 1;
        self.hints.dovi.dv_version_minor = 0;
        self.hints.dovi.dv_profile = 8;
        self.hints.dovi.dv_level = 6;
        self.hints.dovi.rpu_present_flag = true;
        self.hints.dovi.el_present_flag = false;
        self.hints.dovi.bl_present_flag = true;
        self.hints.dovi.dv_bl_signal_compatibility_id = 1;
    }

    /// 记录从 RPU 头部得到的增强层类型
    pub fn set_el_type(&mut self, el_type: DvElType) {
        self.hints.dovi_el_type = el_type;
    }

    /// 双轨合并中确认基础层数据在流动
    pub fn mark_bl_present(&mut self) {
        self.hints.dovi.bl_present_flag = true;
    }

    /// 双轨合并中确认增强层 NAL 实际被发射
    pub fn mark_el_present(&mut self) {
        self.hints.dovi.el_present_flag = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_info::NullProcessInfo;

    fn mediator(hdr_type: HdrType) -> HintsMediator {
        let mut hints = StreamHints::new(CodecId::Hevc, vec![]);
        hints.hdr_type = hdr_type;
        HintsMediator::new(hints, Arc::new(NullProcessInfo))
    }

    #[test]
    fn test_dovi_config_is_configured() {
        assert!(!DoviConfig::default().is_configured());
        let cfg = DoviConfig {
            dv_profile: 8,
            ..Default::default()
        };
        assert!(cfg.is_configured());
    }

    #[test]
    fn test_apply_rpu_conversion_to_81() {
        let mut m = mediator(HdrType::DolbyVision);
        m.hints.dovi.el_present_flag = true;
        m.hints.dovi.dv_profile = 7;

        m.apply_rpu_conversion(DoviConversionMode::To81);
        assert!(!m.hints().dovi.el_present_flag);
        assert_eq!(m.hints().dovi.dv_profile, 8);
        assert_eq!(m.hints().dovi.dv_bl_signal_compatibility_id, 1);
    }

    #[test]
    fn test_apply_rpu_conversion_to_mel_keeps_profile() {
        let mut m = mediator(HdrType::DolbyVision);
        m.hints.dovi.el_present_flag = true;
        m.hints.dovi.dv_profile = 7;

        m.apply_rpu_conversion(DoviConversionMode::ToMel);
        assert!(!m.hints().dovi.el_present_flag);
        assert_eq!(m.hints().dovi.dv_profile, 7);
    }

    #[test]
    fn test_apply_hdr10plus_synthesis() {
        let mut m = mediator(HdrType::Hdr10Plus);
        m.apply_hdr10plus_synthesis();

        let dovi = m.hints().dovi;
        assert_eq!(m.hints().hdr_type, HdrType::DolbyVision);
        assert_eq!(dovi.dv_profile, 8);
        assert_eq!(dovi.dv_level, 6);
        assert!(dovi.rpu_present_flag);
        assert!(dovi.bl_present_flag);
        assert!(!dovi.el_present_flag);
        assert_eq!(dovi.dv_bl_signal_compatibility_id, 1);
    }

    #[test]
    fn test_note_hdr10plus_source_rewrites_hdr_type() {
        let mut m = mediator(HdrType::Hdr10);
        m.note_hdr10plus_source(false, true);
        assert_eq!(m.hints().hdr_type, HdrType::Hdr10Plus);

        // 双元数据流且不按 HDR10+ 对待时, hdr_type 保持不变
        let mut m = mediator(HdrType::DolbyVision);
        m.note_hdr10plus_source(true, false);
        assert_eq!(m.hints().hdr_type, HdrType::DolbyVision);
    }
}
