//! The reconciliation engine shared by every RukPak provisioner instance.
//!
//! A provisioner binary (see `rukpak-operator`) wires this crate's pieces
//! together: [`unpack`] resolves a Bundle's source into a [`fs::BundleFs`],
//! [`storage`] persists and serves that filesystem, [`render`] turns it into
//! cluster objects, and [`install`] drives a target cluster to match. The two
//! long-running controllers in [`controller`] are the event loops that call
//! these in sequence (§4.5 of the design).

pub mod config;
pub mod controller;
pub mod error;
pub mod fs;
pub mod install;
pub mod leader;
pub mod render;
pub mod storage;
pub mod unpack;
pub mod upload_cache;
pub mod upload_server;

pub use fs::BundleFs;
