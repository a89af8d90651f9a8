use std::{io, path::PathBuf};

use rustls::{AlertDescription, Error as RustlsError};
use thiserror::Error;

/// TLS 客户端传输的错误码与分类。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 安全通道的任何致命错误在本层都只有一种处置（触发重连），但运维仍需区分“证书不被信任”
///   与“对端正常关闭”；因此错误在上报前先归入 [`FailureClass`] 并携带稳定错误码。
///
/// ## 逻辑（How）
/// - `OperationKind` 描述一类操作的错误码与默认文案；
/// - [`SessionError::class`] 根据 rustls 错误或 IO 错误推导分类，分类规则沿用 TLS 告警语义；
/// - [`TlsTransportError`] 覆盖配置加载与建连阶段，这些错误发生在状态机之外，直接返回给调用方。
///
/// ## 契约（What）
/// - 错误码形如 `spark.client.tls.*`，可直接用于日志聚合；
/// - 分类只影响日志与观测，不影响状态机的处置路径。
#[derive(Clone, Copy, Debug)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

pub const ENCRYPT: OperationKind = OperationKind {
    code: "spark.client.tls.encrypt_failed",
    message: "tls encrypt",
};

pub const DECRYPT: OperationKind = OperationKind {
    code: "spark.client.tls.decrypt_failed",
    message: "tls decrypt",
};

pub const SOCKET_WRITE: OperationKind = OperationKind {
    code: "spark.client.tls.socket_write_failed",
    message: "tls socket write",
};

pub const RESET: OperationKind = OperationKind {
    code: "spark.client.tls.reset_failed",
    message: "tls session reset",
};

pub const CONNECT: OperationKind = OperationKind {
    code: "spark.client.tls.connect_failed",
    message: "tcp connect",
};

/// 安全通道失败的粗粒度分类。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureClass {
    /// 对端发送 close_notify 或正常关闭。
    Shutdown,
    /// 记录损坏、解密失败或对端违反协议。
    Integrity,
    /// 证书链或身份校验失败。
    Authentication,
    /// 本地资源不足或配置不一致。
    Resource,
    /// 底层 IO 中断。
    Transport,
}

impl FailureClass {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::Shutdown => "shutdown",
            FailureClass::Integrity => "integrity",
            FailureClass::Authentication => "authentication",
            FailureClass::Resource => "resource",
            FailureClass::Transport => "transport",
        }
    }
}

/// 安全通道会话报告的致命错误。
///
/// would-block 不属于错误，由 [`crate::session::EncryptOutcome::WouldBlock`] 表达。
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("tls protocol failure: {0}")]
    Protocol(#[from] RustlsError),
    #[error("peer closed the secure channel")]
    Closed,
    #[error("tls record io failure: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    pub fn class(&self) -> FailureClass {
        match self {
            SessionError::Protocol(error) => categorize_rustls_error(error),
            SessionError::Closed => FailureClass::Shutdown,
            SessionError::Io(error) if error.kind() == io::ErrorKind::UnexpectedEof => {
                FailureClass::Shutdown
            }
            SessionError::Io(_) => FailureClass::Transport,
        }
    }

    /// 对端是否以正常方式关闭了会话。
    pub fn is_shutdown(&self) -> bool {
        self.class() == FailureClass::Shutdown
    }
}

/// 配置与建连阶段的错误。
#[derive(Debug, Error)]
pub enum TlsTransportError {
    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),
    #[error("failed to load root certificates from {path}: {reason}")]
    RootCertificates { path: PathBuf, reason: String },
    #[error("tls client configuration rejected: {0}")]
    Config(#[from] RustlsError),
    #[error("secure session setup failed: {0}")]
    Session(#[from] SessionError),
    #[error("tcp connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl TlsTransportError {
    /// 稳定错误码，便于日志聚合。
    pub fn code(&self) -> &'static str {
        match self {
            TlsTransportError::InvalidServerName(_) => "spark.client.tls.invalid_server_name",
            TlsTransportError::RootCertificates { .. } => "spark.client.tls.root_certificates",
            TlsTransportError::Config(_) => "spark.client.tls.config_rejected",
            TlsTransportError::Session(_) => RESET.code,
            TlsTransportError::Connect { .. } => CONNECT.code,
        }
    }
}

fn categorize_rustls_error(error: &RustlsError) -> FailureClass {
    use RustlsError::*;
    match error {
        InappropriateMessage { .. }
        | InappropriateHandshakeMessage { .. }
        | InvalidEncryptedClientHello(_)
        | InvalidMessage(_)
        | PeerMisbehaved(_)
        | DecryptError
        | EncryptError
        | PeerSentOversizedRecord => FailureClass::Integrity,
        NoCertificatesPresented
        | InvalidCertificate(_)
        | InvalidCertRevocationList(_)
        | UnsupportedNameType => FailureClass::Authentication,
        FailedToGetCurrentTime
        | FailedToGetRandomBytes
        | BadMaxFragmentSize
        | InconsistentKeys(_) => FailureClass::Resource,
        AlertReceived(alert) => alert_to_class(alert),
        _ => FailureClass::Integrity,
    }
}

fn alert_to_class(alert: &AlertDescription) -> FailureClass {
    use AlertDescription::*;
    match alert {
        CloseNotify | UserCanceled => FailureClass::Shutdown,
        BadCertificate
        | UnsupportedCertificate
        | CertificateRevoked
        | CertificateExpired
        | CertificateUnknown
        | UnknownCA
        | NoCertificate
        | CertificateUnobtainable
        | CertificateRequired
        | AccessDenied => FailureClass::Authentication,
        DecompressionFailure | InternalError => FailureClass::Resource,
        _ => FailureClass::Integrity,
    }
}
