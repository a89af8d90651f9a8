use std::{fmt, path::PathBuf, sync::Arc};

use arc_swap::ArcSwap;
use rustls::{
    ClientConfig, ClientConnection, RootCertStore,
    crypto::ring,
    pki_types::{CertificateDer, ServerName, pem::PemObject},
};

use crate::error::TlsTransportError;

/// TLS 客户端配置的热更新容器。
///
/// # 设计动机（Why）
/// - **重连即生效**：证书轮换或 ALPN 调整后，无需重建连接任务；下一次会话重置（通常发生在重连前）
///   自动读取最新快照；
/// - **模式选择**：`ArcSwap` 提供“读无锁、写常数时间”的 RCU 式广播，读取发生在每次新建会话时。
///
/// # 核心契约（What）
/// - `snapshot` 返回的 `Arc<ClientConfig>` 不随后续 `replace` 失效，正在使用旧配置的会话不受影响；
/// - `open` 以当前快照创建 `ClientConnection`，并关闭 rustls 自带的缓冲上限，
///   出站背压改由会话的密文暂存区阈值统一控制。
#[derive(Clone)]
pub struct HotReloadingClientConfig {
    inner: Arc<ArcSwap<ClientConfig>>,
}

impl HotReloadingClientConfig {
    pub fn new(initial: Arc<ClientConfig>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::new(initial)),
        }
    }

    #[inline]
    pub fn from_config(initial: ClientConfig) -> Self {
        Self::new(Arc::new(initial))
    }

    #[inline]
    pub fn snapshot(&self) -> Arc<ClientConfig> {
        self.inner.load_full()
    }

    /// 用新的配置替换当前快照，并返回旧值。
    #[inline]
    pub fn replace(&self, next: Arc<ClientConfig>) -> Arc<ClientConfig> {
        self.inner.swap(next)
    }

    /// 以当前快照创建一条新的客户端连接状态。
    pub fn open(
        &self,
        server_name: ServerName<'static>,
    ) -> Result<ClientConnection, rustls::Error> {
        let mut connection = ClientConnection::new(self.inner.load_full(), server_name)?;
        connection.set_buffer_limit(None);
        Ok(connection)
    }
}

impl fmt::Debug for HotReloadingClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotReloadingClientConfig")
            .finish_non_exhaustive()
    }
}

/// 构建客户端 TLS 配置所需的设置。
///
/// - `server_name`：SNI 与证书校验使用的主机名；
/// - `ca_file`：PEM 格式的信任根；
/// - `alpn`：按优先级排列的应用层协议标识。
#[derive(Clone, Debug, Default)]
pub struct TlsSettings {
    pub server_name: String,
    pub ca_file: Option<PathBuf>,
    pub alpn: Vec<String>,
}

impl TlsSettings {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            ..Self::default()
        }
    }

    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    pub fn with_alpn(mut self, protocol: impl Into<String>) -> Self {
        self.alpn.push(protocol.into());
        self
    }

    pub fn server_name(&self) -> Result<ServerName<'static>, TlsTransportError> {
        ServerName::try_from(self.server_name.clone())
            .map_err(|_| TlsTransportError::InvalidServerName(self.server_name.clone()))
    }

    /// 读取 `ca_file` 中的全部证书作为信任根。
    pub fn load_roots(&self) -> Result<RootCertStore, TlsTransportError> {
        let mut roots = RootCertStore::empty();
        let Some(path) = &self.ca_file else {
            return Ok(roots);
        };
        let root_error = |reason: String| TlsTransportError::RootCertificates {
            path: path.clone(),
            reason,
        };
        let certs =
            CertificateDer::pem_file_iter(path).map_err(|err| root_error(err.to_string()))?;
        for cert in certs {
            let cert = cert.map_err(|err| root_error(err.to_string()))?;
            roots.add(cert).map_err(|err| root_error(err.to_string()))?;
        }
        if roots.is_empty() {
            return Err(root_error("no certificates found".to_string()));
        }
        Ok(roots)
    }

    /// 以 ring 密码学后端构建客户端配置。
    pub fn build_client_config(&self) -> Result<ClientConfig, TlsTransportError> {
        let roots = self.load_roots()?;
        build_client_config(roots, &self.alpn)
    }
}

/// 以给定信任根构建客户端配置。
pub fn build_client_config(
    roots: RootCertStore,
    alpn: &[String],
) -> Result<ClientConfig, TlsTransportError> {
    let mut config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = alpn.iter().map(|p| p.as_bytes().to_vec()).collect();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_server_name_is_reported() {
        let settings = TlsSettings::new("not a hostname!");
        assert!(matches!(
            settings.server_name(),
            Err(TlsTransportError::InvalidServerName(_))
        ));
    }

    #[test]
    fn replace_is_visible_to_new_snapshots_only() {
        let first = Arc::new(build_client_config(RootCertStore::empty(), &[]).expect("配置"));
        let reloader = HotReloadingClientConfig::new(Arc::clone(&first));
        let held = reloader.snapshot();

        let second = Arc::new(
            build_client_config(RootCertStore::empty(), &["h2".to_string()]).expect("配置"),
        );
        let previous = reloader.replace(Arc::clone(&second));

        assert!(Arc::ptr_eq(&previous, &first));
        assert!(Arc::ptr_eq(&held, &first), "旧快照保持不变");
        assert_eq!(reloader.snapshot().alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn missing_ca_file_is_a_root_error() {
        let settings = TlsSettings::new("localhost").with_ca_file("/nonexistent/ca.pem");
        assert!(matches!(
            settings.load_roots(),
            Err(TlsTransportError::RootCertificates { .. })
        ));
    }
}
