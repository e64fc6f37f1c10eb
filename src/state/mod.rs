pub mod token;
pub mod token_store;

pub use token::{IdentitySource, TokenIdentity, TokenRecord};
pub use token_store::TokenStore;
