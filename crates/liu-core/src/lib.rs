//! # liu-core
//!
//! Liu 码流转换框架核心库, 提供统一错误类型与位级解析基础设施.
//!
//! 本 crate 对标 FFmpeg 的 libavutil, 为上层码流转换器提供底层支撑:
//! - [`error`]: 全框架共用的错误类型
//! - [`bitreader`]: 带防竞争字节 (emulation prevention) 剔除的 NAL 位读取器
//! - [`rational`]: 有理数类型, 用于宽高比与帧率

pub mod bitreader;
pub mod error;
pub mod rational;

// 重导出常用类型
pub use bitreader::NalBitReader;
pub use error::{LiuError, LiuResult};
pub use rational::Rational;
