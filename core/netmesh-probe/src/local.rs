//! A NetMeshBase that shadows external resources in-process.

use crate::{ProbeManager, ProbeResult};
use async_trait::async_trait;
use netmesh_comm::{CompositeTransport, Transport};
use netmesh_core::{MeshBaseConfig, MeshError, MeshResult, NetMeshBase, ProxyObtainHook};
use netmesh_store::Store;
use netmesh_types::{CoherenceSpecification, NetMeshBaseIdentifier};
use std::ops::Deref;
use std::sync::Arc;
use tracing::{debug, warn};

/// Makes sure a probe-managed partner has a shadow before a proxy towards
/// it is created.
struct ShadowOnObtain {
    manager: Arc<dyn ProbeManager>,
}

#[async_trait]
impl ProxyObtainHook for ShadowOnObtain {
    async fn before_obtain(
        &self,
        partner: &NetMeshBaseIdentifier,
        coherence: Option<&CoherenceSpecification>,
    ) -> MeshResult<()> {
        if !self.manager.manages(partner) {
            return Ok(());
        }
        debug!("Obtaining shadow for {}", partner);
        self.manager
            .obtain_for(partner, coherence.cloned())
            .await
            .map(|_| ())
            .map_err(|e| MeshError::Unavailable(partner.clone(), e.to_string()))
    }
}

/// A NetMeshBase whose partners include the shadows of a [`ProbeManager`].
///
/// Accessing an object of a probe-managed resource runs the resource's
/// Probe on first use; the shadow then serves replicas over an in-process
/// network while every other partner is reached over the primary
/// transport.
pub struct LocalNetMeshBase {
    base: NetMeshBase,
    manager: Arc<dyn ProbeManager>,
}

/// Builder for [`LocalNetMeshBase`].
pub struct LocalNetMeshBaseBuilder {
    primary: Arc<dyn Transport>,
    manager: Arc<dyn ProbeManager>,
    config: MeshBaseConfig,
    store: Option<Arc<dyn Store>>,
}

impl LocalNetMeshBaseBuilder {
    #[must_use]
    pub fn config(mut self, config: MeshBaseConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Opens the base. Shadows of restored proxies towards probe-managed
    /// resources are recreated.
    pub async fn open(self) -> ProbeResult<LocalNetMeshBase> {
        let transport = Arc::new(CompositeTransport::new(
            self.primary,
            self.manager.network().clone(),
        ));
        let hook = Arc::new(ShadowOnObtain {
            manager: self.manager.clone(),
        });
        let mut builder = NetMeshBase::builder(transport)
            .config(self.config)
            .obtain_hook(hook);
        if let Some(store) = self.store {
            builder = builder.store(store);
        }
        let base = builder.open()?;

        for proxy in base.proxies() {
            let partner = proxy.partner();
            if self.manager.manages(partner) {
                if let Err(e) = self.manager.obtain_for(partner, proxy.coherence()).await {
                    warn!("Failed to recreate shadow {}: {}", partner, e);
                }
            }
        }

        Ok(LocalNetMeshBase {
            base,
            manager: self.manager,
        })
    }
}

impl LocalNetMeshBase {
    /// Starts building a base reachable over `primary` whose probe-managed
    /// partners are shadowed by `manager`.
    pub fn builder(primary: Arc<dyn Transport>, manager: Arc<dyn ProbeManager>) -> LocalNetMeshBaseBuilder {
        LocalNetMeshBaseBuilder {
            primary,
            manager,
            config: MeshBaseConfig::default(),
            store: None,
        }
    }

    #[must_use]
    pub fn base(&self) -> &NetMeshBase {
        &self.base
    }

    #[must_use]
    pub fn probe_manager(&self) -> &Arc<dyn ProbeManager> {
        &self.manager
    }

    /// Closes the base and then every shadow.
    pub async fn close(&self) -> ProbeResult<()> {
        self.base.close().await?;
        for id in self.manager.shadow_identifiers() {
            self.manager.remove(&id).await;
        }
        Ok(())
    }
}

impl Deref for LocalNetMeshBase {
    type Target = NetMeshBase;

    fn deref(&self) -> &NetMeshBase {
        &self.base
    }
}
