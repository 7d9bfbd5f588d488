//! 序列头解析: H.264 SPS 与 MPEG-2 sequence header.
//!
//! 用于序列变化检测: 调用方持有上一次的快照, 解析在快照上就地更新并报告
//! "是否有变化". 宽高为裁剪后的像素尺寸, `ratio` 为显示宽高比
//! (裁剪后宽高比乘以 SAR), `ratio_info` 为原始的 aspect_ratio 代码.

use log::debug;

use liu_core::{NalBitReader, LiuResult, Rational};

use crate::annexb;

/// H.264 序列快照
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct H264Sequence {
    pub width: u32,
    pub height: u32,
    pub ratio: f64,
    /// aspect_ratio_idc
    pub ratio_info: u32,
}

/// MPEG-2 序列快照
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Mpeg2Sequence {
    pub width: u32,
    pub height: u32,
    pub fps_rate: u32,
    pub fps_scale: u32,
    pub ratio: f64,
    /// aspect_ratio_information
    pub ratio_info: u32,
}

impl Mpeg2Sequence {
    /// 帧率
    pub fn fps(&self) -> Rational {
        Rational::new(self.fps_rate as i32, self.fps_scale as i32)
    }
}

/// 预定义的 SAR 表 (ITU-T H.264 表 E-1)
const SAR_TABLE: [Rational; 17] = [
    Rational::new(0, 1), // 0: 未指定
    Rational::new(1, 1),
    Rational::new(12, 11),
    Rational::new(10, 11),
    Rational::new(16, 11),
    Rational::new(40, 33),
    Rational::new(24, 11),
    Rational::new(20, 11),
    Rational::new(32, 11),
    Rational::new(80, 33),
    Rational::new(18, 11),
    Rational::new(15, 11),
    Rational::new(64, 33),
    Rational::new(160, 99),
    Rational::new(4, 3),
    Rational::new(3, 2),
    Rational::new(2, 1),
];

/// 在 Annex B 字节流中解析第一个 SPS, 更新快照并报告是否变化
pub fn h264_sequence_header(data: &[u8], sequence: &mut H264Sequence) -> LiuResult<bool> {
    let mut changed = false;

    for nal in annexb::split_nal_units(data) {
        if nal[0] & 0x1F != annexb::AVC_NAL_SPS {
            continue;
        }

        let mut br = NalBitReader::new(nal);
        br.skip_bits(8)?; // NAL 头

        let profile_idc = br.read_bits(8)? as u8;
        br.skip_bits(8)?; // constraint_set flags + 保留位
        br.skip_bits(8)?; // level_idc
        br.read_ue()?; // seq_parameter_set_id

        let mut chroma_format_idc = 1u32;
        let mut separate_colour_plane_flag = false;

        if is_high_profile(profile_idc) {
            chroma_format_idc = br.read_ue()?;
            if chroma_format_idc == 3 {
                separate_colour_plane_flag = br.read_bit()? == 1;
            }
            br.read_ue()?; // bit_depth_luma_minus8
            br.read_ue()?; // bit_depth_chroma_minus8
            br.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag

            if br.read_bit()? == 1 {
                // seq_scaling_matrix_present_flag: 仅跳过语法
                skip_scaling_lists(&mut br, chroma_format_idc)?;
            }
        }

        br.read_ue()?; // log2_max_frame_num_minus4

        let poc_type = br.read_ue()?;
        if poc_type == 0 {
            br.read_ue()?; // log2_max_pic_order_cnt_lsb_minus4
        } else if poc_type == 1 {
            br.skip_bits(1)?; // delta_pic_order_always_zero_flag
            br.read_se()?; // offset_for_non_ref_pic
            br.read_se()?; // offset_for_top_to_bottom_field
            let num_ref_in_cycle = br.read_ue()?;
            for _ in 0..num_ref_in_cycle {
                br.read_se()?; // offset_for_ref_frame[i]
            }
        }

        br.read_ue()?; // max_num_ref_frames
        br.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

        let pic_width = (br.read_ue()? + 1) * 16;
        let mut pic_height = (br.read_ue()? + 1) * 16;

        let frame_mbs_only_flag = br.read_bit()?;
        if frame_mbs_only_flag == 0 {
            pic_height *= 2;
            br.skip_bits(1)?; // mb_adaptive_frame_field_flag
        }

        br.skip_bits(1)?; // direct_8x8_inference_flag

        let mut frame_crop_right_offset = 0u32;
        let mut frame_crop_bottom_offset = 0u32;
        if br.read_bit()? == 1 {
            // frame_cropping_flag: 左/上偏移读取后不参与尺寸计算
            br.read_ue()?;
            frame_crop_right_offset = br.read_ue()?;
            br.read_ue()?;
            frame_crop_bottom_offset = br.read_ue()?;
        }

        let mut aspect_ratio_idc = 0u32;
        let mut sar_width = 0u32;
        let mut sar_height = 0u32;
        if br.read_bit()? == 1 {
            // vui_parameters_present_flag
            if br.read_bit()? == 1 {
                // aspect_ratio_info_present_flag
                aspect_ratio_idc = br.read_bits(8)?;
                if aspect_ratio_idc == 255 {
                    sar_width = br.read_bits(16)?;
                    sar_height = br.read_bits(16)?;
                }
            }
            // 其余 VUI 字段对序列检测无用, 不再读取
        }

        // 裁剪后尺寸
        let chroma_array_type = if separate_colour_plane_flag {
            0
        } else {
            chroma_format_idc
        };

        let sub_width_c = if chroma_format_idc == 3 { 1 } else { 2 };
        let crop_unit_x = if chroma_array_type != 0 { sub_width_c } else { 1 };
        let pic_width_cropped = pic_width.saturating_sub(crop_unit_x * frame_crop_right_offset);

        let sub_height_c = if chroma_format_idc <= 1 { 2 } else { 1 };
        let mut crop_unit_y = 2 - frame_mbs_only_flag;
        if chroma_array_type != 0 {
            crop_unit_y *= sub_height_c;
        }
        let pic_height_cropped = pic_height.saturating_sub(crop_unit_y * frame_crop_bottom_offset);

        if pic_width_cropped != sequence.width {
            changed = true;
            sequence.width = pic_width_cropped;
        }
        if pic_height_cropped != sequence.height {
            changed = true;
            sequence.height = pic_height_cropped;
        }

        // 显示宽高比
        let mut ratio = sequence.ratio;
        if pic_height_cropped != 0 {
            ratio = f64::from(pic_width_cropped) / f64::from(pic_height_cropped);
        }
        match aspect_ratio_idc {
            0 => {} // 未指定
            1..=16 => ratio *= SAR_TABLE[aspect_ratio_idc as usize].to_f64(),
            255 => {
                if sar_height != 0 {
                    ratio *= f64::from(sar_width) / f64::from(sar_height);
                } else {
                    ratio = 0.0;
                }
            }
            _ => {}
        }
        if aspect_ratio_idc != sequence.ratio_info {
            changed = true;
            sequence.ratio = ratio;
            sequence.ratio_info = aspect_ratio_idc;
        }

        if changed {
            debug!(
                "h264_sequence_header: width({}), height({}), ratio({}), {}x{}",
                pic_width_cropped, pic_height_cropped, ratio, sar_width, sar_height
            );
        }

        break;
    }

    Ok(changed)
}

/// 在字节流中解析 sequence_header_code (0xB3), 更新快照并报告是否变化
pub fn mpeg2_sequence_header(data: &[u8], sequence: &mut Mpeg2Sequence) -> LiuResult<bool> {
    let mut changed = false;

    for unit in annexb::split_nal_units(data) {
        if unit[0] != 0xB3 {
            continue;
        }

        let mut br = NalBitReader::new(unit);
        br.skip_bits(8)?; // sequence_header_code

        let width = br.read_bits(12)?;
        if width != sequence.width {
            changed = true;
            sequence.width = width;
        }
        let height = br.read_bits(12)?;
        if height != sequence.height {
            changed = true;
            sequence.height = height;
        }

        let ratio_info = br.read_bits(4)?;
        let ratio = match ratio_info {
            0x01 => 1.0,
            0x03 => 16.0 / 9.0,
            0x04 => 2.21,
            _ => 4.0 / 3.0,
        };
        if ratio_info != sequence.ratio_info {
            changed = true;
            sequence.ratio = ratio;
            sequence.ratio_info = ratio_info;
        }

        let rate_info = br.read_bits(4)?;
        let (fps_rate, fps_scale) = match rate_info {
            0x02 => (24000, 1000),
            0x03 => (25000, 1000),
            0x04 => (30000, 1001),
            0x05 => (30000, 1000),
            0x06 => (50000, 1000),
            0x07 => (60000, 1001),
            0x08 => (60000, 1000),
            _ => (24000, 1001),
        };
        if fps_rate != sequence.fps_rate || fps_scale != sequence.fps_scale {
            changed = true;
            sequence.fps_rate = fps_rate;
            sequence.fps_scale = fps_scale;
        }
    }

    Ok(changed)
}

// ============================================================
// 辅助函数
// ============================================================

/// 是否为 High Profile 或更高
fn is_high_profile(profile_idc: u8) -> bool {
    matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134
    )
}

/// 跳过 seq_scaling_list 语法
fn skip_scaling_lists(br: &mut NalBitReader, chroma_format_idc: u32) -> LiuResult<()> {
    let list_count = if chroma_format_idc != 3 { 8 } else { 12 };
    for idx in 0..list_count {
        if br.read_bit()? == 0 {
            continue;
        }
        let size = if idx < 6 { 16 } else { 64 };
        let mut last_scale = 8i32;
        let mut next_scale = 8i32;
        for _ in 0..size {
            if next_scale != 0 {
                let delta_scale = br.read_se()?;
                next_scale = (last_scale + delta_scale + 256).rem_euclid(256);
            }
            last_scale = if next_scale == 0 { last_scale } else { next_scale };
        }
    }
    Ok(())
}
