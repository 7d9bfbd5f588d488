//! SEI (Supplemental Enhancement Information) 消息分类与改写.
//!
//! SEI 前缀 NAL 内是一串消息: 每条以若干 0xFF 累加再加末字节的方式编码
//! payload_type 与 payload_size, 随后是 payload_size 字节载荷,
//! 尾部以 rbsp_trailing_bits (0x80) 结束.
//!
//! 本模块在去除防竞争字节的散列缓冲上迭代消息, 识别:
//! - MDCV (type 137): 母带显示色域
//! - CLL (type 144): 内容亮度
//! - HDR10+ (type 4): ITU-T T.35 注册用户数据中的动态色调映射
//!
//! 并支持 "移除 HDR10+ 后按原顺序重组 SEI NAL" 的改写.

use liu_core::{LiuError, LiuResult, NalBitReader};

use crate::hdr::{ContentLightLevel, MasteringDisplayColourVolume};

/// user_data_registered_itu_t_t35
pub const SEI_USER_DATA_REGISTERED_ITU_T_T35: u32 = 4;
/// recovery_point
pub const SEI_RECOVERY_POINT: u32 = 6;
/// mastering_display_colour_volume
pub const SEI_MASTERING_DISPLAY_COLOUR_VOLUME: u32 = 137;
/// content_light_level_info
pub const SEI_CONTENT_LIGHT_LEVEL: u32 = 144;

/// 一条 SEI 消息在散列缓冲中的定位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeiMessage {
    pub payload_type: u32,
    pub payload_size: usize,
    /// 载荷在去防竞争缓冲中的偏移
    pub payload_offset: usize,
}

/// HDR10+ 色调映射元数据 (完整的 T.35 载荷字节)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hdr10PlusMetadata {
    pub payload: Vec<u8>,
}

/// 移除防竞争字节 (00 00 03 → 00 00)
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0x00 && data[i + 1] == 0x00 && data[i + 2] == 0x03 {
            out.push(0x00);
            out.push(0x00);
            i += 3;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// 插入防竞争字节 (00 00 后遇 <= 0x03 的字节时插入 0x03)
pub fn insert_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zero_run = 0u32;
    for &byte in data {
        if zero_run >= 2 && byte <= 0x03 {
            out.push(0x03);
            zero_run = 0;
        }
        out.push(byte);
        zero_run = if byte == 0x00 { zero_run + 1 } else { 0 };
    }
    out
}

/// 解析 HEVC SEI 前缀 NAL (含 2 字节 NAL 头) 为消息列表
///
/// 返回消息列表与去防竞争后的 RBSP 缓冲, 消息偏移指向该缓冲.
pub fn parse_sei_rbsp(nal: &[u8]) -> LiuResult<(Vec<SeiMessage>, Vec<u8>)> {
    if nal.len() < 2 {
        return Err(LiuError::InvalidData("SEI: NAL 数据太短".into()));
    }
    let clear = remove_emulation_prevention(&nal[2..]);

    let mut messages = Vec::new();
    let mut offset = 0usize;
    while offset < clear.len() {
        if is_rbsp_trailing_bits(&clear[offset..]) {
            break;
        }

        let payload_type = read_ff_coded_value(&clear, &mut offset, "payload_type")?;
        let payload_size = read_ff_coded_value(&clear, &mut offset, "payload_size")? as usize;
        let payload_end = offset.checked_add(payload_size).ok_or_else(|| {
            LiuError::InvalidData(format!("SEI: payload_size 溢出, value={}", payload_size))
        })?;
        if payload_end > clear.len() {
            return Err(LiuError::InvalidData(format!(
                "SEI: payload 截断, type={}, size={}, remain={}",
                payload_type,
                payload_size,
                clear.len() - offset
            )));
        }

        messages.push(SeiMessage {
            payload_type,
            payload_size,
            payload_offset: offset,
        });
        offset = payload_end;
    }

    Ok((messages, clear))
}

/// 提取 MDCV (24 字节载荷)
pub fn extract_mastering_display_colour_volume(
    messages: &[SeiMessage],
    clear: &[u8],
) -> Option<MasteringDisplayColourVolume> {
    let msg = messages
        .iter()
        .find(|m| m.payload_type == SEI_MASTERING_DISPLAY_COLOUR_VOLUME && m.payload_size == 24)?;
    let p = &clear[msg.payload_offset..msg.payload_offset + 24];

    let u16_at = |i: usize| u16::from_be_bytes([p[i], p[i + 1]]);
    let u32_at = |i: usize| u32::from_be_bytes([p[i], p[i + 1], p[i + 2], p[i + 3]]);

    Some(MasteringDisplayColourVolume {
        primaries: [
            [u16_at(0), u16_at(2)],
            [u16_at(4), u16_at(6)],
            [u16_at(8), u16_at(10)],
        ],
        white_point: [u16_at(12), u16_at(14)],
        max_luminance: u32_at(16),
        min_luminance: u32_at(20),
    })
}

/// 提取 CLL (4 字节载荷)
pub fn extract_content_light_level(
    messages: &[SeiMessage],
    clear: &[u8],
) -> Option<ContentLightLevel> {
    let msg = messages
        .iter()
        .find(|m| m.payload_type == SEI_CONTENT_LIGHT_LEVEL && m.payload_size == 4)?;
    let p = &clear[msg.payload_offset..msg.payload_offset + 4];
    Some(ContentLightLevel {
        max_cll: u16::from_be_bytes([p[0], p[1]]),
        max_fall: u16::from_be_bytes([p[2], p[3]]),
    })
}

/// 提取 HDR10+ 元数据
pub fn extract_hdr10plus(messages: &[SeiMessage], clear: &[u8]) -> Option<Hdr10PlusMetadata> {
    let msg = messages.iter().find(|m| is_hdr10plus(m, clear))?;
    Some(Hdr10PlusMetadata {
        payload: clear[msg.payload_offset..msg.payload_offset + msg.payload_size].to_vec(),
    })
}

/// 重组 SEI NAL, 去掉 HDR10+ 消息并保持其余消息原序
///
/// 返回空 Vec 表示没有剩余消息, 调用方应整体省略该 SEI NAL.
pub fn remove_hdr10plus_from_sei_nalu(nal: &[u8]) -> Vec<u8> {
    let Ok((messages, clear)) = parse_sei_rbsp(nal) else {
        return Vec::new();
    };

    let mut rbsp = Vec::new();
    let mut kept = 0usize;
    for msg in &messages {
        if is_hdr10plus(msg, &clear) {
            continue;
        }
        write_ff_coded_value(&mut rbsp, msg.payload_type);
        write_ff_coded_value(&mut rbsp, msg.payload_size as u32);
        rbsp.extend_from_slice(&clear[msg.payload_offset..msg.payload_offset + msg.payload_size]);
        kept += 1;
    }
    if kept == 0 {
        return Vec::new();
    }
    rbsp.push(0x80); // rbsp_trailing_bits

    let mut out = Vec::with_capacity(rbsp.len() + 2);
    out.extend_from_slice(&nal[..2]);
    out.extend_from_slice(&insert_emulation_prevention(&rbsp));
    out
}

/// SEI 载荷中是否存在恢复点 (recovery_point) 消息
///
/// `payload` 为 NAL 头之后的字节. 用于解码起始门控.
pub fn has_recovery_point(payload: &[u8]) -> bool {
    let mut offset = 0usize;
    loop {
        let Ok(payload_type) = read_ff_coded_value(payload, &mut offset, "payload_type") else {
            return false;
        };
        let Ok(payload_size) = read_ff_coded_value(payload, &mut offset, "payload_size") else {
            return false;
        };
        let payload_size = payload_size as usize;

        if payload_type == SEI_RECOVERY_POINT {
            let end = offset.saturating_add(payload_size).min(payload.len());
            let mut br = NalBitReader::new(&payload[offset..end]);
            return br.read_ue().is_ok();
        }

        offset = offset.saturating_add(payload_size);
        if offset >= payload.len() || payload[offset] == 0x80 {
            return false;
        }
    }
}

// ============================================================
// 内部工具函数
// ============================================================

fn is_hdr10plus(msg: &SeiMessage, clear: &[u8]) -> bool {
    if msg.payload_type != SEI_USER_DATA_REGISTERED_ITU_T_T35 || msg.payload_size < 7 {
        return false;
    }
    let p = &clear[msg.payload_offset..msg.payload_offset + msg.payload_size];
    // itu_t_t35_country_code=0xB5 (美国), terminal_provider_code=0x003C (三星),
    // provider_oriented_code=0x0001, application_identifier=4
    p[0] == 0xB5
        && u16::from_be_bytes([p[1], p[2]]) == 0x003C
        && u16::from_be_bytes([p[3], p[4]]) == 0x0001
        && p[5] == 4
}

fn is_rbsp_trailing_bits(rest: &[u8]) -> bool {
    if rest.is_empty() {
        return true;
    }
    rest[0] == 0x80 && rest[1..].iter().all(|v| *v == 0)
}

fn read_ff_coded_value(data: &[u8], offset: &mut usize, name: &str) -> LiuResult<u32> {
    let mut value = 0u32;
    loop {
        let byte = *data
            .get(*offset)
            .ok_or_else(|| LiuError::InvalidData(format!("SEI: {name} 截断")))?;
        *offset += 1;
        value = value
            .checked_add(u32::from(byte))
            .ok_or_else(|| LiuError::InvalidData(format!("SEI: {name} 溢出")))?;
        if byte != 0xFF {
            break;
        }
    }
    Ok(value)
}

fn write_ff_coded_value(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0xFF {
        out.push(0xFF);
        value -= 0xFF;
    }
    out.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 构造 HEVC SEI 前缀 NAL (含 2 字节头与防竞争字节)
    fn build_sei_nalu(messages: &[(u32, &[u8])]) -> Vec<u8> {
        let mut rbsp = Vec::new();
        for (payload_type, payload) in messages {
            write_ff_coded_value(&mut rbsp, *payload_type);
            write_ff_coded_value(&mut rbsp, payload.len() as u32);
            rbsp.extend_from_slice(payload);
        }
        rbsp.push(0x80);

        let mut nal = vec![(HEVC_SEI_PREFIX_TYPE << 1), 0x01];
        nal.extend_from_slice(&insert_emulation_prevention(&rbsp));
        nal
    }

    const HEVC_SEI_PREFIX_TYPE: u8 = 39;

    fn mdcv_payload() -> Vec<u8> {
        let mut p = Vec::new();
        for v in [8500u16, 39850, 6550, 2300, 35400, 14600, 15635, 16450] {
            p.extend_from_slice(&v.to_be_bytes());
        }
        p.extend_from_slice(&10_000_000u32.to_be_bytes()); // max_luminance
        p.extend_from_slice(&50u32.to_be_bytes()); // min_luminance
        p
    }

    fn cll_payload() -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&1000u16.to_be_bytes());
        p.extend_from_slice(&400u16.to_be_bytes());
        p
    }

    fn hdr10plus_payload() -> Vec<u8> {
        vec![0xB5, 0x00, 0x3C, 0x00, 0x01, 0x04, 0x01, 0x40, 0x00, 0x0C]
    }

    #[test]
    fn test_消息迭代() {
        let mdcv = mdcv_payload();
        let cll = cll_payload();
        let nal = build_sei_nalu(&[(137, &mdcv), (144, &cll)]);

        let (messages, _clear) = parse_sei_rbsp(&nal).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload_type, 137);
        assert_eq!(messages[0].payload_size, 24);
        assert_eq!(messages[1].payload_type, 144);
        assert_eq!(messages[1].payload_size, 4);
    }

    #[test]
    fn test_ff_coded_payload_type() {
        // payload_type 256 → FF 01
        let payload = [0u8; 3];
        let nal = build_sei_nalu(&[(256, &payload)]);
        let (messages, _) = parse_sei_rbsp(&nal).unwrap();
        assert_eq!(messages[0].payload_type, 256);
    }

    #[test]
    fn test_mdcv_提取() {
        let mdcv = mdcv_payload();
        let nal = build_sei_nalu(&[(137, &mdcv)]);
        let (messages, clear) = parse_sei_rbsp(&nal).unwrap();

        let parsed = extract_mastering_display_colour_volume(&messages, &clear).unwrap();
        assert_eq!(parsed.primaries[0], [8500, 39850]);
        assert_eq!(parsed.white_point, [15635, 16450]);
        assert_eq!(parsed.max_luminance, 10_000_000);
        assert_eq!(parsed.min_luminance, 50);
    }

    #[test]
    fn test_cll_提取() {
        let cll = cll_payload();
        let nal = build_sei_nalu(&[(144, &cll)]);
        let (messages, clear) = parse_sei_rbsp(&nal).unwrap();

        let parsed = extract_content_light_level(&messages, &clear).unwrap();
        assert_eq!(parsed.max_cll, 1000);
        assert_eq!(parsed.max_fall, 400);
    }

    #[test]
    fn test_hdr10plus_识别() {
        let h = hdr10plus_payload();
        let nal = build_sei_nalu(&[(4, &h)]);
        let (messages, clear) = parse_sei_rbsp(&nal).unwrap();

        let meta = extract_hdr10plus(&messages, &clear).unwrap();
        assert_eq!(meta.payload, h);
    }

    #[test]
    fn test_hdr10plus_tuple_mismatch_ignored() {
        // country_code 不匹配的 T.35 消息不是 HDR10+
        let other = [0xB4, 0x00, 0x3C, 0x00, 0x01, 0x04, 0x00];
        let nal = build_sei_nalu(&[(4, &other)]);
        let (messages, clear) = parse_sei_rbsp(&nal).unwrap();
        assert!(extract_hdr10plus(&messages, &clear).is_none());
    }

    #[test]
    fn test_remove_hdr10plus_preserves_order() {
        let mdcv = mdcv_payload();
        let h = hdr10plus_payload();
        let cll = cll_payload();
        let nal = build_sei_nalu(&[(137, &mdcv), (4, &h), (144, &cll)]);

        let rewritten = remove_hdr10plus_from_sei_nalu(&nal);
        assert!(!rewritten.is_empty());

        let (messages, clear) = parse_sei_rbsp(&rewritten).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].payload_type, 137);
        assert_eq!(messages[1].payload_type, 144);
        assert!(extract_hdr10plus(&messages, &clear).is_none());
        // 其余消息字节完好
        assert!(extract_mastering_display_colour_volume(&messages, &clear).is_some());
        assert!(extract_content_light_level(&messages, &clear).is_some());
    }

    #[test]
    fn test_remove_hdr10plus_sole_message_yields_empty() {
        let h = hdr10plus_payload();
        let nal = build_sei_nalu(&[(4, &h)]);
        assert!(remove_hdr10plus_from_sei_nalu(&nal).is_empty());
    }

    #[test]
    fn test_emulation_prevention_roundtrip() {
        // 向载荷中构造 00 00 序列, 验证防竞争字节往返不改变解析结果
        let tricky = [0x00, 0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x00, 0x00];
        let escaped = insert_emulation_prevention(&tricky);
        assert_ne!(escaped, tricky.to_vec());
        assert_eq!(remove_emulation_prevention(&escaped), tricky.to_vec());
    }

    #[test]
    fn test_emulation_prevention_in_sei_payload() {
        // 载荷带 00 00 01 序列的消息, 经 NAL 封装后应解析出原始字节
        let payload = [0xB5, 0x00, 0x3C, 0x00, 0x01, 0x04, 0x00, 0x00, 0x01, 0x00, 0x00];
        let nal = build_sei_nalu(&[(4, &payload)]);
        let (messages, clear) = parse_sei_rbsp(&nal).unwrap();
        let meta = extract_hdr10plus(&messages, &clear).unwrap();
        assert_eq!(meta.payload, payload);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        // 声明 10 字节载荷但只有 2 字节
        let nal = [0x4E, 0x01, 0x04, 0x0A, 0xB5, 0x00];
        assert!(parse_sei_rbsp(&nal).is_err());
    }

    #[test]
    fn test_recovery_point_probe() {
        // type=6, size=1, payload: ue(0) + exact_match + broken_link
        let payload = [0x06, 0x01, 0x90, 0x80];
        assert!(has_recovery_point(&payload));

        // 无恢复点消息
        let payload = [0x01, 0x01, 0x00, 0x80];
        assert!(!has_recovery_point(&payload));

        // 截断输入不越界
        let payload = [0x06];
        assert!(!has_recovery_point(&payload));
    }
}
