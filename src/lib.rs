pub mod controller;
pub mod crd;
pub mod error;
pub mod helpers;
pub mod leader;
pub mod manifest;
pub mod platform;
