use crate::crd::tekton_dashboard::TektonDashboard;

use super::super::component::{Component, Slot};

impl Component for TektonDashboard {
    const MANIFEST_DIR: &'static str = "tekton-dashboard";
    const IMAGE_PREFIX: &'static str = "IMAGE_DASHBOARD_";
    const INSTALLER_TYPE: &'static str = "dashboard";
    const OPERAND: &'static str = "tektoncd-dashboard";

    /// One set, read from the flavour subdirectory.  Switching flavour
    /// changes the spec hash, so the set's manifests are replaced in place.
    fn slots(&self) -> Vec<Slot> {
        vec![Slot::in_dir(self.flavour())]
    }
}
