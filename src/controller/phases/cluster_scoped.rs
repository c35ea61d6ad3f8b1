use async_trait::async_trait;

use crate::crd::tekton_installer_set::CLUSTER_SCOPED_INSTALLED;
use crate::error::Result;
use crate::manifest::{ApplyOptions, ResourceClient};

use super::{Buckets, Outcome, Phase, Progress};

pub struct ClusterScoped;

#[async_trait]
impl Phase for ClusterScoped {
    fn condition(&self) -> &'static str {
        CLUSTER_SCOPED_INSTALLED
    }

    async fn ensure(
        &self,
        client: &dyn ResourceClient,
        buckets: &Buckets,
        _progress: &mut Progress<'_>,
    ) -> Result<Outcome> {
        buckets
            .cluster_scoped
            .apply(client, &ApplyOptions::default())
            .await?;
        Ok(Outcome::Done)
    }
}
