use async_trait::async_trait;

use crate::crd::tekton_installer_set::NAMESPACE_SCOPED_INSTALLED;
use crate::error::Result;
use crate::manifest::{ApplyOptions, ResourceClient};

use super::{Buckets, Outcome, Phase, Progress};

/// Everything that is neither a CRD, cluster-scoped nor a workload:
/// ServiceAccounts, Roles, ConfigMaps, Secrets and ClusterRoleBindings
/// (which reference namespaced ServiceAccounts).
pub struct NamespaceScoped;

#[async_trait]
impl Phase for NamespaceScoped {
    fn condition(&self) -> &'static str {
        NAMESPACE_SCOPED_INSTALLED
    }

    async fn ensure(
        &self,
        client: &dyn ResourceClient,
        buckets: &Buckets,
        _progress: &mut Progress<'_>,
    ) -> Result<Outcome> {
        buckets
            .namespace_scoped
            .apply(client, &ApplyOptions::default())
            .await?;
        Ok(Outcome::Done)
    }
}
