use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use braid_core::contract::CallContext;
use braid_core::error::CoreError;
use braid_core::transport::{ByteChannel, ReadOutcome};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use thiserror::Error;
use tracing::debug;

use crate::channel::TlsChannel;
use crate::error;
use crate::hot_reload::{TlsContext, TlsContextSlot};
use crate::rustls_engine::RustlsEngine;

/// 密钥与信任材料的来源。
#[derive(Clone)]
pub enum TlsIdentitySource {
    /// 从 PEM 文件装载证书链、私钥与信任根。
    Files {
        cert_chain: PathBuf,
        private_key: PathBuf,
        trust_roots: PathBuf,
    },
    /// 直接提供已构建好的客户端/服务端配置。
    Prepared {
        client: Arc<ClientConfig>,
        server: Arc<ServerConfig>,
    },
}

/// TLS 相关的工厂配置。
#[derive(Clone)]
pub struct TlsSettings {
    /// 密钥与信任材料来源。
    pub identity: TlsIdentitySource,
}

/// 通道工厂的完整配置；`tls` 为 `None` 时工厂退化为明文直通。
#[derive(Clone, Default)]
pub struct FactorySettings {
    pub tls: Option<TlsSettings>,
}

/// 材料装载与上下文构建阶段的叶子错误。
///
/// # 意图（Why）
/// - 把文件 IO、PEM 解析与 `rustls` 配置构建的失败原因结构化，便于在
///   启动日志中直接定位出错的材料文件。
#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// 材料文件读取失败。
    #[error("读取 {} 失败: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 文件里没有可用的 PEM 条目。
    #[error("{} 中没有可用的 PEM 条目", path.display())]
    EmptyPem { path: PathBuf },
    /// `rustls` 拒绝了装载出的材料组合。
    #[error("TLS 配置构建失败: {source}")]
    Config {
        #[from]
        source: rustls::Error,
    },
    /// 客户端握手目标名称不合法。
    #[error("服务端名称不合法: {name}")]
    ServerName { name: String },
}

/// 工厂产出的通道：明文直通或 TLS 包装，两者在调用侧同形。
pub enum FactoryChannel<C: ByteChannel> {
    /// 原样返回的明文通道。
    Plain(C),
    /// 握手完成的 TLS 通道。
    Tls(TlsChannel<C>),
}

impl<C: ByteChannel> fmt::Debug for FactoryChannel<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryChannel::Plain(_) => f.debug_tuple("FactoryChannel::Plain").finish(),
            FactoryChannel::Tls(_) => f.debug_tuple("FactoryChannel::Tls").finish(),
        }
    }
}

impl<C: ByteChannel> ByteChannel for FactoryChannel<C> {
    fn read(&self, ctx: &CallContext, dst: &mut [u8]) -> Result<ReadOutcome, CoreError> {
        match self {
            FactoryChannel::Plain(channel) => channel.read(ctx, dst),
            FactoryChannel::Tls(channel) => channel.read(ctx, dst),
        }
    }

    fn write(&self, ctx: &CallContext, src: &[u8]) -> Result<usize, CoreError> {
        match self {
            FactoryChannel::Plain(channel) => channel.write(ctx, src),
            FactoryChannel::Tls(channel) => channel.write(ctx, src),
        }
    }

    fn close(&self, ctx: &CallContext) -> Result<(), CoreError> {
        match self {
            FactoryChannel::Plain(channel) => channel.close(ctx),
            FactoryChannel::Tls(channel) => channel.close(ctx),
        }
    }

    fn is_open(&self) -> bool {
        match self {
            FactoryChannel::Plain(channel) => channel.is_open(),
            FactoryChannel::Tls(channel) => channel.is_open(),
        }
    }
}

/// 通道工厂：按配置决定明文直通或 TLS 包装。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 调用方在建连处只面对一个工厂入口，是否启用加密完全由配置决定；
/// - 每条连接获得独立的引擎实例（按客户端/服务端模式配置），共享的只有
///   不可变的上下文快照。
///
/// ## 逻辑（How）
/// - 构造时一次性完成材料装载与上下文构建，失败即启动失败；
/// - 上下文存放在 [`TlsContextSlot`] 热更容器中，证书轮换只影响后续连接；
/// - `client_channel`/`server_channel` 为每条连接创建引擎并执行同步握手。
///
/// ## 契约（What）
/// - **错误语义**：材料装载失败返回 `braid.tls.provisioning`（启动期致命）；
///   单条连接的包装失败返回 `braid.tls.wrap`（可恢复，工厂继续可用），
///   与裸传输自身的 IO 错误域彼此独立。
///
/// ## 风险提示（Trade-offs）
/// - 工厂不持有也不回收传输：包装失败时传输的善后由调用方决定。
#[derive(Debug)]
pub struct ChannelFactory {
    context: Option<TlsContextSlot>,
}

impl ChannelFactory {
    /// 按配置构建工厂；TLS 启用时同步完成材料装载。
    pub fn from_settings(settings: FactorySettings) -> Result<Self, CoreError> {
        let context = match settings.tls {
            None => None,
            Some(tls) => {
                let context = build_context(&tls.identity)?;
                debug!("TLS 上下文构建完成");
                Some(TlsContextSlot::from_context(context))
            }
        };
        Ok(Self { context })
    }

    /// 构建明文直通工厂。
    pub fn plaintext() -> Self {
        Self { context: None }
    }

    /// 工厂是否启用了 TLS 包装。
    pub fn tls_enabled(&self) -> bool {
        self.context.is_some()
    }

    /// 热更容器入口；证书轮换时向其 `replace` 新快照。
    pub fn context_slot(&self) -> Option<&TlsContextSlot> {
        self.context.as_ref()
    }

    /// 以客户端模式包装一条出站连接。
    ///
    /// `server_name` 用于证书主机名校验与 SNI 发送。
    pub fn client_channel<C: ByteChannel>(
        &self,
        ctx: &CallContext,
        transport: C,
        server_name: &str,
    ) -> Result<FactoryChannel<C>, CoreError> {
        let Some(slot) = &self.context else {
            return Ok(FactoryChannel::Plain(transport));
        };
        let snapshot = slot.snapshot();
        let name = ServerName::try_from(server_name.to_owned()).map_err(|_| {
            error::wrap_error(error::provisioning_error(ProvisioningError::ServerName {
                name: server_name.to_owned(),
            }))
        })?;
        let engine = RustlsEngine::client(snapshot.client.clone(), name)
            .map_err(error::wrap_error)?;
        let channel =
            TlsChannel::wrap(ctx, transport, Box::new(engine)).map_err(error::wrap_error)?;
        Ok(FactoryChannel::Tls(channel))
    }

    /// 以服务端模式包装一条入站连接。
    pub fn server_channel<C: ByteChannel>(
        &self,
        ctx: &CallContext,
        transport: C,
    ) -> Result<FactoryChannel<C>, CoreError> {
        let Some(slot) = &self.context else {
            return Ok(FactoryChannel::Plain(transport));
        };
        let snapshot = slot.snapshot();
        let engine = RustlsEngine::server(snapshot.server.clone()).map_err(error::wrap_error)?;
        let channel =
            TlsChannel::wrap(ctx, transport, Box::new(engine)).map_err(error::wrap_error)?;
        Ok(FactoryChannel::Tls(channel))
    }
}

/// 从材料来源构建完整上下文。
fn build_context(identity: &TlsIdentitySource) -> Result<TlsContext, CoreError> {
    match identity {
        TlsIdentitySource::Prepared { client, server } => Ok(TlsContext {
            client: Arc::clone(client),
            server: Arc::clone(server),
        }),
        TlsIdentitySource::Files {
            cert_chain,
            private_key,
            trust_roots,
        } => {
            let chain = load_cert_chain(cert_chain)?;
            let key = load_private_key(private_key)?;
            let roots = load_trust_roots(trust_roots)?;
            let server = ServerConfig::builder()
                .with_no_client_auth()
                .with_single_cert(chain, key)
                .map_err(|source| {
                    error::provisioning_error(ProvisioningError::Config { source })
                })?;
            let client = ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth();
            Ok(TlsContext {
                client: Arc::new(client),
                server: Arc::new(server),
            })
        }
    }
}

fn open_pem(path: &Path) -> Result<BufReader<File>, CoreError> {
    File::open(path).map(BufReader::new).map_err(|source| {
        error::provisioning_error(ProvisioningError::Io {
            path: path.to_path_buf(),
            source,
        })
    })
}

fn load_cert_chain(path: &Path) -> Result<Vec<CertificateDer<'static>>, CoreError> {
    let mut reader = open_pem(path)?;
    let chain = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| {
            error::provisioning_error(ProvisioningError::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
    if chain.is_empty() {
        return Err(error::provisioning_error(ProvisioningError::EmptyPem {
            path: path.to_path_buf(),
        }));
    }
    Ok(chain)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CoreError> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| {
            error::provisioning_error(ProvisioningError::Io {
                path: path.to_path_buf(),
                source,
            })
        })?
        .ok_or_else(|| {
            error::provisioning_error(ProvisioningError::EmptyPem {
                path: path.to_path_buf(),
            })
        })
}

fn load_trust_roots(path: &Path) -> Result<RootCertStore, CoreError> {
    let mut reader = open_pem(path)?;
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|source| {
            error::provisioning_error(ProvisioningError::Io {
                path: path.to_path_buf(),
                source,
            })
        })?;
        roots
            .add(cert)
            .map_err(|source| error::provisioning_error(ProvisioningError::Config { source }))?;
    }
    if roots.is_empty() {
        return Err(error::provisioning_error(ProvisioningError::EmptyPem {
            path: path.to_path_buf(),
        }));
    }
    Ok(roots)
}
