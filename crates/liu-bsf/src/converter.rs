//! 按访问单元的码流转换器.
//!
//! 接收解复用器输出的长度前缀 (AVCC/HVCC) 数据包, 产出 Annex B 访问单元,
//! 过程中检视并按需改写承载 HDR 元数据的高层语法 NAL:
//!
//! - SEI 前缀 NAL 中的 MDCV/CLL/HDR10+ 消息
//! - Dolby Vision RPU (HEVC UNSPEC62) 与增强层 (UNSPEC63)
//!
//! 反方向 (`to_annexb=false`) 支持字节流 extradata → avcC 合成与
//! 3 字节 NAL 长度修补. 双轨 Dolby Vision 的 BL/EL 合并见
//! [`BitstreamConverter::convert_dual`].
//!
//! 转换器为单线程同步模型: 每次 convert 调用运行到结束, 输出缓冲的借用
//! 在下一次调用前有效.

use std::sync::Arc;

use bytes::BufMut;
use log::{debug, info, warn};

use liu_core::{LiuError, LiuResult};

use crate::annexb;
use crate::annexb::*;
use crate::extradata::{self, Prologue};
use crate::hdr::HdrStaticMetadataInfo;
use crate::hints::{CodecId, DvElType, HdrType, HintsMediator, StreamHints};
use crate::process_info::{
    DoviFrameMetadata, DoviStreamInfo, DoviStreamMetadata, ProcessInfoSink,
};
use crate::rpu::{
    DoviConversionMode, Hdr10PlusSynthesizer, PeakBrightnessSource, RpuLibrary,
};
use crate::sei::{self, Hdr10PlusMetadata};

/// 按访问单元的码流转换器
pub struct BitstreamConverter {
    mediator: HintsMediator,
    sink: Arc<dyn ProcessInfoSink>,
    rpu_library: Option<Arc<dyn RpuLibrary>>,
    hdr10plus_synthesizer: Option<Arc<dyn Hdr10PlusSynthesizer>>,

    codec: CodecId,
    opened: bool,
    to_annexb: bool,
    /// 长度前缀 → Annex B 重整是否启用
    convert_bitstream: bool,
    /// 字节流 extradata → avcC 的反向重整是否启用
    convert_bytestream: bool,
    /// 3 字节 NAL 长度字段 → 4 字节修补是否启用
    patch_3to4_nal_size: bool,

    /// 配置记录 (可能已修补或合成)
    extra_data: Vec<u8>,
    /// to_annexb 模式下的参数集前导序列
    prologue: Option<Prologue>,
    /// 前导序列的 Annex B 渲染 (extradata 访问器视图)
    prologue_annex_b: Vec<u8>,
    length_size: u8,
    first_idr: bool,
    idr_sps_pps_seen: bool,

    start_decode: bool,
    first_frame: bool,
    initial_hdr_type: HdrType,

    convert_dovi: DoviConversionMode,
    remove_dovi: bool,
    remove_hdr10plus: bool,
    convert_hdr10plus: bool,
    prefer_hdr10plus: bool,
    dual_priority_hdr10plus: bool,
    hdr10plus_peak_brightness_source: PeakBrightnessSource,

    hdr_static_metadata: HdrStaticMetadataInfo,

    /// 单一输出缓冲, 跨帧复用; 借用在下一次 convert 前有效
    output: Vec<u8>,
}

impl BitstreamConverter {
    /// 创建转换器, 接管流提示
    ///
    /// hints 必须已填好 codec 与配置记录.
    pub fn new(hints: StreamHints, sink: Arc<dyn ProcessInfoSink>) -> Self {
        let codec = hints.codec;
        Self {
            mediator: HintsMediator::new(hints, Arc::clone(&sink)),
            sink,
            rpu_library: None,
            hdr10plus_synthesizer: None,
            codec,
            opened: false,
            to_annexb: false,
            convert_bitstream: false,
            convert_bytestream: false,
            patch_3to4_nal_size: false,
            extra_data: Vec::new(),
            prologue: None,
            prologue_annex_b: Vec::new(),
            length_size: 4,
            first_idr: true,
            idr_sps_pps_seen: false,
            start_decode: false,
            first_frame: true,
            initial_hdr_type: HdrType::None,
            convert_dovi: DoviConversionMode::None,
            remove_dovi: false,
            remove_hdr10plus: false,
            convert_hdr10plus: false,
            prefer_hdr10plus: false,
            dual_priority_hdr10plus: false,
            hdr10plus_peak_brightness_source: PeakBrightnessSource::default(),
            hdr_static_metadata: HdrStaticMetadataInfo::default(),
            output: Vec::new(),
        }
    }

    /// 注入 Dolby Vision RPU 库
    pub fn set_rpu_library(&mut self, library: Arc<dyn RpuLibrary>) {
        self.rpu_library = Some(library);
    }

    /// 注入 HDR10+ → DoVi 合成器
    pub fn set_hdr10plus_synthesizer(&mut self, synthesizer: Arc<dyn Hdr10PlusSynthesizer>) {
        self.hdr10plus_synthesizer = Some(synthesizer);
    }

    pub fn set_convert_dovi(&mut self, mode: DoviConversionMode) {
        self.convert_dovi = mode;
    }

    pub fn set_convert_hdr10plus(&mut self, value: bool) {
        self.convert_hdr10plus = value;
    }

    pub fn set_prefer_hdr10plus_conversion(&mut self, value: bool) {
        self.prefer_hdr10plus = value;
    }

    pub fn set_hdr10plus_peak_brightness_source(&mut self, value: PeakBrightnessSource) {
        self.hdr10plus_peak_brightness_source = value;
    }

    pub fn set_dual_priority_hdr10plus(&mut self, value: bool) {
        self.dual_priority_hdr10plus = value;
    }

    pub fn set_remove_dovi(&mut self, value: bool) {
        self.remove_dovi = value;
    }

    pub fn set_remove_hdr10plus(&mut self, value: bool) {
        self.remove_hdr10plus = value;
    }

    /// 打开转换器: 校验并解析配置记录, 建立转换路径
    pub fn open(&mut self, to_annexb: bool) -> LiuResult<()> {
        self.to_annexb = to_annexb;
        self.convert_bitstream = false;
        self.convert_bytestream = false;
        self.patch_3to4_nal_size = false;
        self.initial_hdr_type = self.mediator.hints().hdr_type;
        self.mediator.publish_source_hdr_type();

        // 外部库缺席时, 依赖它们的转换开关在此拒绝
        if self.convert_dovi != DoviConversionMode::None && self.rpu_library.is_none() {
            return Err(LiuError::InvalidArgument(
                "未注入 DoVi RPU 库, 无法启用 RPU 转换".into(),
            ));
        }
        if self.convert_hdr10plus && self.hdr10plus_synthesizer.is_none() {
            return Err(LiuError::InvalidArgument(
                "未注入 HDR10+ 合成器, 无法启用 HDR10+ 转换".into(),
            ));
        }

        let extra = self.mediator.hints().extra_data.clone();
        match self.codec {
            CodecId::Avc => self.open_avc(&extra)?,
            CodecId::Hevc => self.open_hevc(&extra)?,
        }

        self.first_idr = true;
        self.idr_sps_pps_seen = false;
        self.start_decode = false;
        self.first_frame = true;
        self.opened = true;
        Ok(())
    }

    fn open_avc(&mut self, extra: &[u8]) -> LiuResult<()> {
        if extra.len() < 7 {
            return Err(LiuError::InvalidData(format!(
                "AVCC: 配置记录缺失或太短, len={}",
                extra.len()
            )));
        }

        if self.to_annexb {
            // 合法 avcC 记录始终以版本号 1 开头
            let prologue = extradata::parse_avcc(extra)?;
            info!("码流转换器: avcC → Annex B 初始化");
            self.length_size = prologue.length_size;
            self.prologue_annex_b = prologue.to_annex_b();
            self.prologue = Some(prologue);
            self.convert_bitstream = true;
            self.extra_data = extra.to_vec();
            return Ok(());
        }

        if extra[0] != 1 {
            if extra.starts_with(&[0x00, 0x00, 0x00, 0x01]) || extra.starts_with(&[0x00, 0x00, 0x01])
            {
                // x264 等输出的字节流 extradata: 合成 avcC 记录
                info!("码流转换器: Annex B → avcC 初始化");
                self.extra_data = extradata::build_avcc_from_annex_b(extra)?;
                self.convert_bytestream = true;
                return Ok(());
            }
            return Err(LiuError::InvalidData("AVCC: 无效的配置记录".into()));
        }

        let mut patched = extra.to_vec();
        if extradata::maybe_patch_3byte_nal_size(CodecId::Avc, &mut patched) {
            info!("码流转换器: 3 字节 NAL 长度修补初始化");
            self.patch_3to4_nal_size = true;
        }
        self.extra_data = patched;
        Ok(())
    }

    fn open_hevc(&mut self, extra: &[u8]) -> LiuResult<()> {
        if extra.len() < 23 {
            return Err(LiuError::InvalidData(format!(
                "HVCC: 配置记录缺失或太短, len={}",
                extra.len()
            )));
        }

        if self.to_annexb {
            // Amlogic 实况存在 configurationVersion==0 的 hvcC, 仅排除
            // 已经是字节流形态的 extradata
            if extra[0] != 0 || extra[1] != 0 || extra[2] > 1 {
                let prologue = extradata::parse_hvcc(extra)?;
                info!("码流转换器: hvcC → Annex B 初始化");
                self.length_size = prologue.length_size;
                self.prologue_annex_b = prologue.to_annex_b();
                self.prologue = Some(prologue);
                self.convert_bitstream = true;
                self.extra_data = extra.to_vec();
                return Ok(());
            }
            return Err(LiuError::InvalidData("HVCC: 无效的配置记录".into()));
        }

        if extra[0] != 1 {
            if extra.starts_with(&[0x00, 0x00, 0x00, 0x01]) || extra.starts_with(&[0x00, 0x00, 0x01])
            {
                return Err(LiuError::NotImplemented(
                    "HEVC: Annex B → hvcC 转换未实现".into(),
                ));
            }
            return Err(LiuError::InvalidData("HVCC: 无效的配置记录".into()));
        }

        let mut patched = extra.to_vec();
        if extradata::maybe_patch_3byte_nal_size(CodecId::Hevc, &mut patched) {
            info!("码流转换器: 3 字节 NAL 长度修补初始化");
            self.patch_3to4_nal_size = true;
        }
        self.extra_data = patched;
        Ok(())
    }

    /// 是否需要逐包重整
    pub fn need_convert(&self) -> bool {
        self.convert_bitstream
    }

    /// 当前 hints 快照
    pub fn hints(&self) -> &StreamHints {
        self.mediator.hints()
    }

    /// 转换后的访问单元, 借用在下一次 convert 前有效
    pub fn convert_buffer(&self) -> &[u8] {
        &self.output
    }

    pub fn convert_size(&self) -> usize {
        self.output.len()
    }

    /// extradata 访问器: to_annexb 时为参数集前导序列, 否则为配置记录
    pub fn extra_data(&self) -> &[u8] {
        if self.convert_bitstream {
            &self.prologue_annex_b
        } else {
            &self.extra_data
        }
    }

    /// 解码是否可以开始 (SPS/IDR/恢复点 之一已出现)
    pub fn can_start_decode(&self) -> bool {
        self.start_decode
    }

    /// 重置解码起始门控 (seek 后由调用方触发)
    pub fn reset_start_decode(&mut self) {
        self.start_decode = false;
    }

    /// 转换单轨数据包
    ///
    /// 失败时输出缓冲被清空, 转换器对后续数据包保持可用.
    pub fn convert(&mut self, data: &[u8], pts: f64) -> LiuResult<()> {
        if !self.opened {
            return Err(LiuError::InvalidArgument("转换器未打开".into()));
        }
        self.output.clear();

        let result = if self.to_annexb {
            if self.convert_bitstream {
                self.bitstream_convert(data, pts)
            } else {
                // 已是 Annex B, 透传
                self.output.extend_from_slice(data);
                Ok(())
            }
        } else if self.convert_bytestream {
            // Annex B → 4 字节长度前缀
            self.output = annexb::parse_nal_units(data);
            Ok(())
        } else if self.patch_3to4_nal_size {
            self.rewrite_3byte_lengths(data)
        } else {
            self.output.extend_from_slice(data);
            Ok(())
        };

        if let Err(e) = result {
            self.output.clear();
            return Err(e);
        }
        Ok(())
    }

    /// 转换双轨 Dolby Vision 数据包: BL 在前, EL 的 RPU/EL NAL 追加在后
    ///
    /// 两个缓冲均为 4 字节长度前缀 (convert_bitstream 关闭时为 Annex B,
    /// 会先行归一化). 末尾的 end-of-sequence NAL 推迟到最后发射.
    pub fn convert_dual(&mut self, bl_data: &[u8], el_data: &[u8], pts: f64) -> LiuResult<()> {
        if !self.opened {
            return Err(LiuError::InvalidArgument("转换器未打开".into()));
        }
        self.output.clear();

        let (bl_buf, el_buf): (Vec<u8>, Vec<u8>) = if self.convert_bitstream {
            (bl_data.to_vec(), el_data.to_vec())
        } else {
            (
                annexb::parse_nal_units(bl_data),
                annexb::parse_nal_units(el_data),
            )
        };

        let mut pending_hdr10plus: Option<Hdr10PlusMetadata> = None;
        let mut deferred_eos: Option<Vec<u8>> = None;
        let mut bl_seen = false;
        let mut el_emitted = false;

        // BL 数据
        let mut pos = 0usize;
        while bl_buf.len() - pos > 4 {
            let declared = u32::from_be_bytes([
                bl_buf[pos],
                bl_buf[pos + 1],
                bl_buf[pos + 2],
                bl_buf[pos + 3],
            ]) as usize;
            let size = declared.min(bl_buf.len() - pos - 4);
            pos += 4;
            if size == 0 {
                continue;
            }
            let nal = &bl_buf[pos..pos + size];
            let nal_type = (nal[0] >> 1) & 0x3F;

            match nal_type {
                HEVC_NAL_SEI_PREFIX => self.process_sei_prefix(nal, &mut pending_hdr10plus),
                HEVC_NAL_EOS_NUT => deferred_eos = Some(nal.to_vec()),
                _ => self.write_nal(nal, nal_type),
            }
            bl_seen = true;

            debug!("双轨合并: BL nal_type=[{}], size=[{}]", nal_type, size);
            pos += size;
        }
        if bl_seen {
            self.mediator.mark_bl_present();
        }

        // EL 数据: 仅 RPU 与包装后的 EL NAL 可进入输出
        let mut pos = 0usize;
        while el_buf.len() - pos > 4 {
            let declared = u32::from_be_bytes([
                el_buf[pos],
                el_buf[pos + 1],
                el_buf[pos + 2],
                el_buf[pos + 3],
            ]) as usize;
            let size = declared.min(el_buf.len() - pos - 4);
            pos += 4;
            if size == 0 {
                continue;
            }
            let nal = &el_buf[pos..pos + size];
            let nal_type = (nal[0] >> 1) & 0x3F;

            match nal_type {
                HEVC_NAL_UNSPEC62 => {
                    if !self.remove_dovi && pending_hdr10plus.is_none() {
                        self.process_dovi_rpu(nal, pts);
                    }
                }
                _ => {
                    if !self.remove_dovi
                        && pending_hdr10plus.is_none()
                        && self.convert_dovi == DoviConversionMode::None
                    {
                        self.write_el_nal(nal);
                        el_emitted = true;
                    }
                }
            }

            debug!("双轨合并: EL nal_type=[{}], size=[{}]", nal_type, size);
            pos += size;
        }
        if el_emitted {
            self.mediator.mark_el_present();
        }

        // HDR10+ 转换时, 合成的 DoVi RPU 作为访问单元最后一个 NAL
        if let Some(meta) = pending_hdr10plus.take() {
            self.add_dovi_rpu_nalu(&meta, pts);
        }

        // 推迟的 end of sequence
        if let Some(eos) = deferred_eos {
            self.write_nal(&eos, HEVC_NAL_EOS_NUT);
        }

        self.first_frame = false;
        Ok(())
    }

    // ============================================================
    // 单轨重整
    // ============================================================

    fn bitstream_convert(&mut self, data: &[u8], pts: f64) -> LiuResult<()> {
        let length_size = self.length_size as usize;
        let (nal_sps, nal_pps, nal_sei) = match self.codec {
            CodecId::Avc => (AVC_NAL_SPS, AVC_NAL_PPS, AVC_NAL_SEI),
            CodecId::Hevc => (HEVC_NAL_SPS, HEVC_NAL_PPS, HEVC_NAL_SEI_PREFIX),
        };

        let mut pending_hdr10plus: Option<Hdr10PlusMetadata> = None;
        let mut pos = 0usize;

        while pos < data.len() {
            if pos + length_size > data.len() {
                return Err(LiuError::InvalidData("数据包: NAL 长度字段截断".into()));
            }
            let mut nal_size = 0usize;
            for i in 0..length_size {
                nal_size = (nal_size << 8) | data[pos + i] as usize;
            }
            pos += length_size;

            if nal_size == 0 || pos + nal_size > data.len() {
                return Err(LiuError::InvalidData(format!(
                    "数据包: NAL 数据截断, declared_len={}, remain={}",
                    nal_size,
                    data.len() - pos
                )));
            }
            let nal = &data[pos..pos + nal_size];
            let unit_type = match self.codec {
                CodecId::Avc => nal[0] & 0x1F,
                CodecId::Hevc => (nal[0] >> 1) & 0x3F,
            };

            // 访问单元自带参数集时不再前置
            if self.first_idr && (unit_type == nal_sps || unit_type == nal_pps) {
                self.idr_sps_pps_seen = true;
            }

            if !self.start_decode
                && (unit_type == nal_sps
                    || self.is_idr(unit_type)
                    || (unit_type == nal_sei && self.sei_has_recovery_point(nal)))
            {
                self.start_decode = true;
            }

            if self.first_idr && self.is_idr(unit_type) && !self.idr_sps_pps_seen {
                // 仅在 IDR 图像的第一个访问单元处前置参数集
                let params: Vec<Vec<u8>> = self
                    .prologue
                    .as_ref()
                    .map(|p| p.nal_units.clone())
                    .unwrap_or_default();
                for param in &params {
                    let param_type = match self.codec {
                        CodecId::Avc => param[0] & 0x1F,
                        CodecId::Hevc => (param[0] >> 1) & 0x3F,
                    };
                    self.write_nal(param, param_type);
                }
                self.write_nal(nal, unit_type);
                self.first_idr = false;
            } else {
                // 已见过 IDR 后的普通切片重新武装前置逻辑, 等待下一个 IDR
                if !self.first_idr && self.is_slice(unit_type) {
                    self.first_idr = true;
                    self.idr_sps_pps_seen = false;
                }

                if self.codec == CodecId::Hevc {
                    match unit_type {
                        HEVC_NAL_SEI_PREFIX => {
                            self.process_sei_prefix(nal, &mut pending_hdr10plus)
                        }
                        HEVC_NAL_UNSPEC62 => {
                            if !self.remove_dovi && pending_hdr10plus.is_none() {
                                self.process_dovi_rpu(nal, pts);
                            }
                        }
                        HEVC_NAL_UNSPEC63 => {
                            if !self.remove_dovi
                                && pending_hdr10plus.is_none()
                                && self.convert_dovi == DoviConversionMode::None
                            {
                                self.write_nal(nal, unit_type);
                            }
                        }
                        _ => self.write_nal(nal, unit_type),
                    }
                } else {
                    self.write_nal(nal, unit_type);
                }
            }

            pos += nal_size;
        }

        // HDR10+ 转换时, 合成的 DoVi RPU 作为访问单元最后一个 NAL
        if let Some(meta) = pending_hdr10plus.take() {
            self.add_dovi_rpu_nalu(&meta, pts);
        }

        self.first_frame = false;
        Ok(())
    }

    /// 3 字节 NAL 长度 → 4 字节大端长度
    fn rewrite_3byte_lengths(&mut self, data: &[u8]) -> LiuResult<()> {
        let mut pos = 0usize;
        while pos < data.len() {
            if pos + 3 > data.len() {
                return Err(LiuError::InvalidData("数据包: 3 字节长度字段截断".into()));
            }
            let nal_size =
                ((data[pos] as usize) << 16) | ((data[pos + 1] as usize) << 8) | data[pos + 2] as usize;
            pos += 3;
            if pos + nal_size > data.len() {
                return Err(LiuError::InvalidData(format!(
                    "数据包: NAL 数据截断, declared_len={}, remain={}",
                    nal_size,
                    data.len() - pos
                )));
            }
            self.output.put_u32(nal_size as u32);
            self.output.extend_from_slice(&data[pos..pos + nal_size]);
            pos += nal_size;
        }
        Ok(())
    }

    // ============================================================
    // 按 NAL 分发
    // ============================================================

    fn process_sei_prefix(&mut self, nal: &[u8], pending: &mut Option<Hdr10PlusMetadata>) {
        let Ok((messages, clear)) = sei::parse_sei_rbsp(nal) else {
            // 解析失败的 SEI 原样透传
            self.write_nal(nal, HEVC_NAL_SEI_PREFIX);
            return;
        };

        let mut update = false;
        if let Some(mdcv) = sei::extract_mastering_display_colour_volume(&messages, &clear) {
            if self.hdr_static_metadata.apply_mdcv(&mdcv) {
                info!(
                    "HDR 静态元数据: MDCV 更新, max_lum=[{}], min_lum=[{}]",
                    self.hdr_static_metadata.max_lum, self.hdr_static_metadata.min_lum
                );
                update = true;
            }
        }
        if let Some(cll) = sei::extract_content_light_level(&messages, &clear) {
            if self.hdr_static_metadata.apply_cll(&cll) {
                info!(
                    "HDR 静态元数据: CLL 更新, max_cll=[{}], max_fall=[{}]",
                    self.hdr_static_metadata.max_cll, self.hdr_static_metadata.max_fall
                );
                update = true;
            }
        }
        if update {
            self.sink
                .set_video_hdr_static_metadata_info(self.hdr_static_metadata.clone());
        }

        let mut copy = true;
        if let Some(meta) = sei::extract_hdr10plus(&messages, &clear) {
            // 源本身是 DoVi 又发现 HDR10+ → 双元数据流
            let is_dual = self.initial_hdr_type == HdrType::DolbyVision;
            let consider_as_hdr10plus =
                !is_dual || self.dual_priority_hdr10plus || self.prefer_hdr10plus;

            if self.first_frame {
                self.mediator
                    .note_hdr10plus_source(is_dual, consider_as_hdr10plus);
            }

            let convert =
                consider_as_hdr10plus && self.convert_hdr10plus && !self.dual_priority_hdr10plus;
            if convert {
                *pending = Some(meta);
            }

            if convert || self.remove_hdr10plus {
                // 移除 HDR10+ 并保留其余消息
                let rewritten = sei::remove_hdr10plus_from_sei_nalu(nal);
                if !rewritten.is_empty() {
                    self.write_nal(&rewritten, HEVC_NAL_SEI_PREFIX);
                }
                copy = false;
            }
        }

        if copy {
            self.write_nal(nal, HEVC_NAL_SEI_PREFIX);
        }
    }

    fn process_dovi_rpu(&mut self, nal: &[u8], pts: f64) {
        let Some(library) = self.rpu_library.clone() else {
            self.write_nal(nal, HEVC_NAL_UNSPEC62);
            return;
        };

        let mut replaced: Option<Vec<u8>> = None;
        if self.convert_dovi != DoviConversionMode::None {
            match library.parse_unspec62_nalu(nal) {
                Ok(mut handle) => {
                    let header = handle.header();
                    if header.as_ref().map(|h| h.guessed_profile) == Some(7) {
                        let source_el_type = if self.first_frame {
                            header
                                .as_ref()
                                .map(|h| el_type_from_header(h.el_type.as_deref()))
                                .unwrap_or_default()
                        } else {
                            DvElType::None
                        };

                        match handle.convert_with_mode(self.convert_dovi) {
                            Ok(()) => match handle.write_unspec62_nalu() {
                                Ok(bytes) => {
                                    if self.first_frame {
                                        // 转换前捕获源 DoVi 信息
                                        let dovi = self.mediator.hints().dovi;
                                        self.sink.set_video_source_dovi_stream_info(
                                            DoviStreamInfo {
                                                dovi_el_type: source_el_type,
                                                dovi,
                                                has_config: dovi.is_configured(),
                                                has_header: true,
                                            },
                                        );
                                    }
                                    replaced = Some(bytes);
                                    self.mediator.apply_rpu_conversion(self.convert_dovi);
                                }
                                Err(e) => warn!("DoVi RPU 序列化失败: {}", e),
                            },
                            // 转换失败: 保留原 RPU, 不改 hints
                            Err(e) => warn!("DoVi RPU 转换失败, 保留原始 RPU: {}", e),
                        }
                    }
                }
                Err(e) => warn!("DoVi RPU 解析失败: {}", e),
            }
        }

        let nal_out: Vec<u8> = replaced.unwrap_or_else(|| nal.to_vec());
        self.publish_rpu_info(&*library, &nal_out, pts);
        self.write_nal(&nal_out, HEVC_NAL_UNSPEC62);
    }

    /// 解析 RPU 并发布每帧/每流元数据
    fn publish_rpu_info(&mut self, library: &dyn RpuLibrary, nal: &[u8], pts: f64) {
        let Ok(handle) = library.parse_unspec62_nalu(nal) else {
            warn!("DoVi RPU 元数据解析失败");
            return;
        };

        let dm = handle.vdr_dm_data();
        if let Some(level1) = dm.as_ref().and_then(|d| d.level1) {
            self.sink.set_video_dovi_frame_metadata(DoviFrameMetadata {
                level1_min_pq: level1.min_pq,
                level1_max_pq: level1.max_pq,
                level1_avg_pq: level1.avg_pq,
                pts,
            });
        }

        if !self.first_frame {
            return;
        }

        let mut stream_metadata = DoviStreamMetadata::default();
        if let Some(dm) = &dm {
            stream_metadata.source_min_pq = dm.source_min_pq;
            stream_metadata.source_max_pq = dm.source_max_pq;
            if let Some(level6) = dm.level6 {
                stream_metadata.has_level6_metadata = true;
                stream_metadata.level6_max_lum = level6.max_display_mastering_luminance;
                stream_metadata.level6_min_lum = level6.min_display_mastering_luminance;
                stream_metadata.level6_max_cll = level6.max_content_light_level;
                stream_metadata.level6_max_fall = level6.max_frame_average_light_level;
            }
            stream_metadata.meta_version = meta_version_label(dm);
        }
        self.sink.set_video_dovi_stream_metadata(stream_metadata);

        let header = handle.header();
        let mut el_type = DvElType::None;
        if let Some(h) = &header {
            if matches!(h.guessed_profile, 4 | 7) {
                el_type = el_type_from_header(h.el_type.as_deref());
            }
        }
        self.mediator.set_el_type(el_type);

        let dovi = self.mediator.hints().dovi;
        self.sink.set_video_dovi_stream_info(DoviStreamInfo {
            dovi_el_type: el_type,
            dovi,
            has_config: dovi.is_configured(),
            has_header: header.is_some(),
        });
    }

    /// 把 HDR10+ 元数据合成的 DoVi RPU 追加为访问单元最后一个 NAL
    fn add_dovi_rpu_nalu(&mut self, meta: &Hdr10PlusMetadata, pts: f64) {
        let Some(synthesizer) = self.hdr10plus_synthesizer.clone() else {
            return;
        };
        let nalu = synthesizer.create_rpu_nalu(
            meta,
            self.hdr10plus_peak_brightness_source,
            &self.hdr_static_metadata,
        );
        if nalu.is_empty() {
            return;
        }

        if self.first_frame {
            self.mediator.apply_hdr10plus_synthesis();
        }
        if let Some(library) = self.rpu_library.clone() {
            self.publish_rpu_info(&*library, &nalu, pts);
        }
        self.write_nal(&nalu, HEVC_NAL_UNSPEC62);
    }

    // ============================================================
    // 输出写入
    // ============================================================

    /// 以 Annex B 帧定界写出一个 NAL
    ///
    /// 访问单元首个 NAL 用 4 字节起始码, 其后用 3 字节; DoVi RPU (62)
    /// 始终用 4 字节.
    fn write_nal(&mut self, nal: &[u8], nal_type: u8) {
        let four_byte = self.output.is_empty()
            || (self.codec == CodecId::Hevc && nal_type == HEVC_NAL_UNSPEC62);
        if four_byte {
            self.output.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        } else {
            self.output.extend_from_slice(&[0x00, 0x00, 0x01]);
        }
        self.output.extend_from_slice(nal);
    }

    /// 以 5 字节分层起始码包装一个 EL NAL (双轨合并)
    fn write_el_nal(&mut self, nal: &[u8]) {
        self.output
            .extend_from_slice(&[0x00, 0x00, 0x01, HEVC_NAL_UNSPEC63 << 1, 0x01]);
        self.output.extend_from_slice(nal);
    }

    // ============================================================
    // NAL 类型判定
    // ============================================================

    fn is_idr(&self, unit_type: u8) -> bool {
        match self.codec {
            CodecId::Avc => unit_type == AVC_NAL_IDR_SLICE,
            CodecId::Hevc => matches!(
                unit_type,
                HEVC_NAL_IDR_W_RADL | HEVC_NAL_IDR_N_LP | HEVC_NAL_CRA_NUT
            ),
        }
    }

    fn is_slice(&self, unit_type: u8) -> bool {
        match self.codec {
            CodecId::Avc => unit_type == AVC_NAL_SLICE,
            CodecId::Hevc => matches!(
                unit_type,
                HEVC_NAL_TRAIL_N
                    | HEVC_NAL_TRAIL_R
                    | HEVC_NAL_TSA_N
                    | HEVC_NAL_TSA_R
                    | HEVC_NAL_STSA_N
                    | HEVC_NAL_STSA_R
                    | HEVC_NAL_BLA_W_LP
                    | HEVC_NAL_BLA_W_RADL
                    | HEVC_NAL_BLA_N_LP
                    | HEVC_NAL_CRA_NUT
                    | HEVC_NAL_RADL_N
                    | HEVC_NAL_RADL_R
                    | HEVC_NAL_RASL_N
                    | HEVC_NAL_RASL_R
            ),
        }
    }

    /// SEI NAL 是否携带恢复点, 按 codec 跳过 NAL 头
    fn sei_has_recovery_point(&self, nal: &[u8]) -> bool {
        match self.codec {
            CodecId::Avc => nal.len() > 1 && sei::has_recovery_point(&nal[1..]),
            CodecId::Hevc => nal.len() > 2 && sei::has_recovery_point(&nal[2..]),
        }
    }
}

// ============================================================
// 辅助函数
// ============================================================

fn el_type_from_header(el_type: Option<&str>) -> DvElType {
    match el_type {
        Some(s) if s.eq_ignore_ascii_case("FEL") => DvElType::Fel,
        Some(s) if s.eq_ignore_ascii_case("MEL") => DvElType::Mel,
        _ => DvElType::None,
    }
}

/// 元数据版本标签: level254 → CMv4.0, 否则 level1 → CMv2.9
fn meta_version_label(dm: &crate::rpu::VdrDmData) -> String {
    if let Some(level254) = dm.level254 {
        if dm.level8_count > 0 {
            format!(
                "CMv4.0 {}-{} {}-L8",
                level254.dm_version_index, level254.dm_mode, dm.level8_count
            )
        } else {
            format!("CMv4.0 {}-{}", level254.dm_version_index, level254.dm_mode)
        }
    } else if dm.level1.is_some() {
        if dm.level2_count > 0 {
            format!("CMv2.9 {}-L2", dm.level2_count)
        } else {
            "CMv2.9".to_string()
        }
    } else {
        String::new()
    }
}
