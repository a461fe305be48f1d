#![forbid(unsafe_code)]
#![doc = r#"
Keyward

In-memory lifecycle management for API keys and CSRF tokens: generation,
validation, rotation, revocation, and background expiry.

Crate highlights
- API keys: versioned per identity, hashed at rest, scoped, rotated with a
  bounded history. The plaintext is returned once.
- CSRF tokens: one per session, compared in constant time, spent on each
  state-changing request.
- Expiry is enforced lazily on validation and eagerly by a per-manager
  background sweeper.

Modules
- `secret`: random secret generation, hashing, constant-time comparison.
- `store`: generic versioned credential table with a lookup index.
- `sweeper`: background expiry task.
- `api_keys`, `csrf`: the two managers.
- `adapter`: actix-web middlewares, extractors and error rendering.
- `server`: admin and session routes used by the binary.
- `config`, `error`, `util`: environment configuration, error kinds, helpers.

Note: all state is process-local; restarting the process drops every credential.
"#]

pub mod adapter;
pub mod api_keys;
pub mod config;
pub mod csrf;
pub mod error;
pub mod secret;
pub mod server;
pub mod store;
pub mod sweeper;
pub mod util;

pub use crate::adapter::{api_key_middleware, csrf_middleware, ApiKeyClaims, CsrfToken};
pub use crate::api_keys::{
    authorize, require_scopes, ApiKeyInfo, ApiKeyManager, GeneratedKey, KeyStatus,
};
pub use crate::config::{ApiKeyConfig, ApiKeyTransport, CsrfConfig};
pub use crate::csrf::{CsrfManager, CsrfTokenInfo};
pub use crate::error::{CredentialError, Result};
pub use crate::secret::{generate_prefixed, generate_secret};
