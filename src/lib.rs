//! Modsec Relay Library
//!
//! Settlement-assurance layer for modsec cross-chain messages. A message emitted on a
//! source chain is attested off-chain by the [`verifier`] and, once attested, executed on
//! the destination chain by the [`executor`]. The two halves run independently and hand
//! off through the attestation [`storage`].

pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod message;
pub mod runtime;
pub mod service;
pub mod storage;
pub mod verifier;

// Re-export commonly used types
pub use chain::{EventSource, EvmClient, EvmSubmitter, SimulatedChain, TransactionSubmitter};
pub use config::{ChainFamily, Config};
pub use crypto::{AttestationSigner, SignatureScheme};
pub use error::RelayError;
pub use executor::{Executor, ExecutorSettings};
pub use message::{AttestationPayload, MessageId, ProtocolMessage};
pub use runtime::RelayServices;
pub use service::ServiceState;
pub use storage::{AttestationStore, HttpAttestationStore, InMemoryAttestationStore, StoreError};
pub use verifier::{Verifier, VerifierSettings};
