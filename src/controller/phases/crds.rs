use async_trait::async_trait;

use crate::crd::tekton_installer_set::CRDS_INSTALLED;
use crate::error::Result;
use crate::manifest::{ApplyOptions, ResourceClient};

use super::{Buckets, Outcome, Phase, Progress};

/// CustomResourceDefinitions go first so the kinds they define resolve in
/// later phases.
pub struct Crds;

#[async_trait]
impl Phase for Crds {
    fn condition(&self) -> &'static str {
        CRDS_INSTALLED
    }

    async fn ensure(
        &self,
        client: &dyn ResourceClient,
        buckets: &Buckets,
        _progress: &mut Progress<'_>,
    ) -> Result<Outcome> {
        buckets.crds.apply(client, &ApplyOptions::default()).await?;
        Ok(Outcome::Done)
    }
}
