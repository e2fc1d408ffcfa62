pub mod logger;
pub mod scheduler;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DigestError {
    #[error("配置错误: {0}")]
    ConfigError(String),

    #[error("非法的文档名: {0}")]
    InvalidDocumentName(String),

    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("邮件错误: {0}")]
    MailError(String),
}

pub type DigestResult<T> = Result<T, DigestError>;
