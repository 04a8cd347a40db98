//! Secure messaging engine for NXP NTAG 424 DNA tags
//!
//! Configures SUN and SDM on the NDEF file of an NTAG 424 DNA over any
//! [`ntagkit_apdu_core::CardTransport`]:
//!
//! - [`SessionManager::connect`] runs the AES-128 EV2 handshake and keeps the
//!   [`SecureSession`] (transaction identifier and command counter)
//! - [`sdm::encode`] and [`sdm::verify`] render and check SUN/SDM mirrors offline
//! - [`Ntag424Config::plan`] validates a front end configuration into a [`WritePlan`]
//! - [`SessionManager`] owns the session state machine and applies plans
//! - [`Ntag424Service`] is the facade the UI layer calls
//!
//! With the `simulator` feature, [`simulator::SimulatedTag`] answers the
//! protocol in memory, with fault injection for tests.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]

mod auth;
pub mod commands;
mod config;
pub mod constants;
mod crypto;
mod error;
mod keys;
mod mirror;
pub mod ndef;
pub mod sdm;
mod secure_messaging;
mod service;
mod session;
#[cfg(any(test, feature = "simulator"))]
pub mod simulator;
pub mod types;
mod writer;

pub use config::{AccessRightCodes, KeyChange, Ntag424Config, WritePlan};
pub use error::{AuthError, Error, FormatError, Result, SdmError, WriteError};
pub use keys::{AesKey, KeyNo, KeySlot, KeyStore};
pub use mirror::MirrorSettings;
pub use ndef::NdefImage;
pub use sdm::{SdmKeys, SdmLayout, SdmReading, SdmTemplate};
pub use secure_messaging::{SecureSession, TransactionId};
pub use service::{Capabilities, Ntag424Service, TagInfo};
pub use session::{
    Activity, DEFAULT_COUNTER_HEADROOM, DEFAULT_IDLE_TIMEOUT, SessionConfig, SessionManager,
    SessionState,
};
pub use types::{CommMode, FileSettings, TagIdentity, Uid, VersionInfo};
pub use writer::{Ack, WriteStep};

pub use ntagkit_apdu_core::prelude::{CancelHandle, CardExecutor};
