//! 统一错误类型定义.
//!
//! 所有 Liu crate 共用的错误类型, 支持跨模块传播.

use thiserror::Error;

/// Liu 框架统一错误类型
#[derive(Debug, Error)]
pub enum LiuError {
    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 不支持的操作
    #[error("不支持的操作: {0}")]
    Unsupported(String),

    /// 无效数据 (损坏的码流、截断的配置记录等)
    #[error("无效数据: {0}")]
    InvalidData(String),

    /// 已到达流末尾
    #[error("已到达流末尾")]
    Eof,

    /// 功能未实现
    #[error("功能未实现: {0}")]
    NotImplemented(String),
}

/// Liu 框架统一 Result 类型
pub type LiuResult<T> = Result<T, LiuError>;
