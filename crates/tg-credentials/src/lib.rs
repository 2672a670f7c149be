//! # tg-credentials
//!
//! Zero standing privilege for agent actions.
//!
//! The agent's own identity holds no privilege. After the governor ALLOWs
//! an action, the [`CredentialBroker`] exchanges the issuer identity for a
//! short-lived token scoped to exactly that tool and that action instance.
//! The token is valid once, for at most a minute.
//!
//! ## Key invariants
//!
//! - Issued only for ALLOW, and only while the session is not quarantined.
//! - At most one outstanding credential per action instance; none at all
//!   once the credential for that instance has been used.
//! - The ledger stores token hashes, never the tokens themselves.
//! - Exchange failure denies; there is no fallback identity.

pub mod broker;
pub mod credential;
pub mod error;
pub mod exchange;

pub use broker::{CredentialBroker, CredentialConfig, OpenGate, SessionGate};
pub use credential::{Credential, CredentialScope, CredentialState};
pub use error::CredentialError;
pub use exchange::{ExchangedToken, IdentityExchange, LocalTokenExchange, TokenRequest};
