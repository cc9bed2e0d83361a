pub mod credentials;
pub mod jwt;
pub mod token;

// Re-export commonly used items
pub use credentials::{CredentialKind, CredentialSource, ServiceFile, get_service_data};
pub use jwt::{AssertionClaims, load_private_key, sign_assertion};
pub use token::{AccessToken, StaticTokenProvider, Token, TokenConfig, TokenProvider};
