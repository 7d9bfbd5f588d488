//! 配置记录 (extradata) 重整.
//!
//! # AVCC / HVCC
//!
//! MP4/MKV 等容器以长度前缀的配置记录携带参数集:
//! - avcC (`AVCDecoderConfigurationRecord`): SPS/PPS 列表, 各带 16 位长度
//! - hvcC (`HEVCDecoderConfigurationRecord`): 21 字节头 + NAL 数组 (VPS/SPS/PPS)
//!
//! 转换为 Annex B 时, 参数集被提取为前导序列 (prologue), 在每个 IDR
//! 访问单元处内联; 反方向则从字节流 extradata 合成 avcC 记录.
//!
//! 部分封装器写出 3 字节 NAL 长度字段, 打开时探测并修补为 4 字节.

use bytes::BufMut;
use log::warn;

use liu_core::{LiuError, LiuResult};

use crate::annexb;
use crate::hints::CodecId;

/// SPS/PPS(/VPS) 前导序列
///
/// NAL 载荷按记录中的出现顺序保存, 不含起始码.
#[derive(Debug, Clone)]
pub struct Prologue {
    /// NAL 长度前缀字节数 (lengthSizeMinusOne + 1)
    pub length_size: u8,
    /// 参数集 NAL 载荷列表
    pub nal_units: Vec<Vec<u8>>,
}

impl Prologue {
    /// 渲染为 Annex B 字节流, 每个 NAL 前置 4 字节起始码
    pub fn to_annex_b(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for nal in &self.nal_units {
            out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
            out.extend_from_slice(nal);
        }
        out
    }
}

/// 解析 avcC 配置记录为前导序列
///
/// PPS 之后若跟随 `mvcC` 二级记录, 从其后继续提取 SPS/PPS 并追加.
pub fn parse_avcc(data: &[u8]) -> LiuResult<Prologue> {
    if data.len() < 7 {
        return Err(LiuError::InvalidData(format!(
            "AVCC: 配置记录太短, len={}",
            data.len()
        )));
    }
    if data[0] != 1 {
        return Err(LiuError::InvalidData(format!(
            "AVCC: configurationVersion 非法, value={}",
            data[0]
        )));
    }

    let length_size = (data[4] & 0x03) + 1;
    let mut pos = 5usize;
    let mut nal_units = Vec::new();
    let mut sps_seen = false;
    let mut pps_seen = false;
    let mut mvc_done = false;

    loop {
        // SPS 批
        let num_sps = (read_u8(data, &mut pos, "numOfSequenceParameterSets")? & 0x1F) as usize;
        if num_sps > 0 {
            sps_seen = true;
        }
        for i in 0..num_sps {
            nal_units.push(read_unit(data, &mut pos, "SPS", i)?);
        }

        // PPS 批
        let num_pps = read_u8(data, &mut pos, "numOfPictureParameterSets")? as usize;
        if num_pps > 0 {
            pps_seen = true;
        }
        for i in 0..num_pps {
            nal_units.push(read_unit(data, &mut pos, "PPS", i)?);
        }

        // mvcC 二级记录: PPS 之后剩余字节足够且偏移 8 处为 "mvcC" 时,
        // 跳过其头部并继续提取
        if !mvc_done
            && data.len().saturating_sub(pos) > 14
            && data.get(pos + 8..pos + 12) == Some(b"mvcC".as_slice())
        {
            pos += 17;
            mvc_done = true;
            continue;
        }
        break;
    }

    if !sps_seen {
        warn!("AVCC: 缺少 SPS, 产生的流可能无法播放");
    }
    if !pps_seen {
        warn!("AVCC: 缺少 PPS, 产生的流可能无法播放");
    }

    Ok(Prologue {
        length_size,
        nal_units,
    })
}

/// 解析 hvcC 配置记录为前导序列
///
/// 仅保留 VPS(32)/SPS(33)/PPS(34) 数组, 其余类型跳过.
pub fn parse_hvcc(data: &[u8]) -> LiuResult<Prologue> {
    if data.len() < 23 {
        return Err(LiuError::InvalidData(format!(
            "HVCC: 配置记录太短, len={}",
            data.len()
        )));
    }

    let length_size = (data[21] & 0x03) + 1;
    let num_arrays = data[22];
    let mut pos = 23usize;
    let mut nal_units = Vec::new();
    let mut sps_seen = false;
    let mut pps_seen = false;

    for _ in 0..num_arrays {
        let nal_type = read_u8(data, &mut pos, "array NAL_unit_type")? & 0x3F;
        let num_nalus = read_u16(data, &mut pos, "numNalus")? as usize;

        if nal_type == annexb::HEVC_NAL_SPS && num_nalus > 0 {
            sps_seen = true;
        } else if nal_type == annexb::HEVC_NAL_PPS && num_nalus > 0 {
            pps_seen = true;
        }

        for i in 0..num_nalus {
            let unit = read_unit(data, &mut pos, "参数集", i)?;
            if matches!(
                nal_type,
                annexb::HEVC_NAL_VPS | annexb::HEVC_NAL_SPS | annexb::HEVC_NAL_PPS
            ) {
                nal_units.push(unit);
            }
        }
    }

    if !sps_seen {
        warn!("HVCC: 缺少 SPS, 产生的流可能无法播放");
    }
    if !pps_seen {
        warn!("HVCC: 缺少 PPS, 产生的流可能无法播放");
    }

    Ok(Prologue {
        length_size,
        nal_units,
    })
}

/// 从 Annex B 字节流 extradata 合成 avcC 配置记录 (仅 H.264)
pub fn build_avcc_from_annex_b(data: &[u8]) -> LiuResult<Vec<u8>> {
    let prefixed = annexb::parse_nal_units(data);

    let mut sps: Option<&[u8]> = None;
    let mut pps: Option<&[u8]> = None;
    let mut pos = 0usize;
    while pos + 4 <= prefixed.len() {
        let len = u32::from_be_bytes([
            prefixed[pos],
            prefixed[pos + 1],
            prefixed[pos + 2],
            prefixed[pos + 3],
        ]) as usize;
        pos += 4;
        if len == 0 || pos + len > prefixed.len() {
            break;
        }
        let nal = &prefixed[pos..pos + len];
        match nal[0] & 0x1F {
            annexb::AVC_NAL_SPS => sps = Some(nal),
            annexb::AVC_NAL_PPS => pps = Some(nal),
            _ => {}
        }
        pos += len;
    }

    let sps = sps.ok_or_else(|| {
        LiuError::InvalidData("AVCC: 字节流 extradata 中未找到 SPS".into())
    })?;
    let pps = pps.ok_or_else(|| {
        LiuError::InvalidData("AVCC: 字节流 extradata 中未找到 PPS".into())
    })?;
    if sps.len() < 4 || sps.len() > u16::MAX as usize || pps.len() > u16::MAX as usize {
        return Err(LiuError::InvalidData(format!(
            "AVCC: 参数集长度非法, sps_len={}, pps_len={}",
            sps.len(),
            pps.len()
        )));
    }

    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.put_u8(1); // configurationVersion
    out.put_u8(sps[1]); // AVCProfileIndication
    out.put_u8(sps[2]); // profile_compatibility
    out.put_u8(sps[3]); // AVCLevelIndication
    out.put_u8(0xFF); // 6 位保留 + lengthSizeMinusOne=3
    out.put_u8(0xE1); // 3 位保留 + numOfSequenceParameterSets=1
    out.put_u16(sps.len() as u16);
    out.put_slice(sps);
    out.put_u8(1); // numOfPictureParameterSets
    out.put_u16(pps.len() as u16);
    out.put_slice(pps);
    Ok(out)
}

/// 探测 3 字节 NAL 长度字段并就地修补记录为 4 字节
///
/// 返回是否发生了修补; 修补后每个数据包的长度字段需同步改写.
/// HEVC 判据 `(byte4 & 0x3) == 2` 为经验启发式.
pub fn maybe_patch_3byte_nal_size(codec: CodecId, data: &mut [u8]) -> bool {
    if data.len() < 5 {
        return false;
    }
    match codec {
        CodecId::Avc if data[4] == 0xFE => {
            data[4] = 0xFF;
            true
        }
        CodecId::Hevc if (data[4] & 0x03) == 2 => {
            data[4] |= 0x03;
            true
        }
        _ => false,
    }
}

// ============================================================
// 内部工具函数
// ============================================================

fn read_u8(data: &[u8], pos: &mut usize, name: &str) -> LiuResult<u8> {
    let byte = *data
        .get(*pos)
        .ok_or_else(|| LiuError::InvalidData(format!("配置记录: {name} 字段截断")))?;
    *pos += 1;
    Ok(byte)
}

fn read_u16(data: &[u8], pos: &mut usize, name: &str) -> LiuResult<u16> {
    if *pos + 2 > data.len() {
        return Err(LiuError::InvalidData(format!("配置记录: {name} 字段截断")));
    }
    let value = u16::from_be_bytes([data[*pos], data[*pos + 1]]);
    *pos += 2;
    Ok(value)
}

/// 读取一个 16 位长度前缀的参数集单元, 长度越界即报错
fn read_unit(data: &[u8], pos: &mut usize, kind: &str, index: usize) -> LiuResult<Vec<u8>> {
    let unit_size = read_u16(data, pos, kind)? as usize;
    if unit_size == 0 {
        return Err(LiuError::InvalidData(format!(
            "配置记录: {kind} 长度非法, index={index}, len=0"
        )));
    }
    if *pos + unit_size > data.len() {
        return Err(LiuError::InvalidData(format!(
            "配置记录: {kind} 数据截断, index={index}, declared_len={unit_size}, remain={}",
            data.len() - *pos
        )));
    }
    let unit = data[*pos..*pos + unit_size].to_vec();
    *pos += unit_size;
    Ok(unit)
}
