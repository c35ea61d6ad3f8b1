pub mod component;
pub mod components;
pub mod context;
pub mod extension;
pub mod helpers;
pub mod installer;
pub mod installer_set;
pub mod phases;
pub mod pvc;
pub mod registry;
pub mod target_namespace;
pub mod tekton_config;
pub mod transformers;
pub mod upgrade;
