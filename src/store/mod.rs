//! Persistence: Domain Store (§4.1) and Response Store (§4.2), each its own
//! SQLite file behind a `Mutex<Connection>`, following the teacher's
//! key-store pattern (`keyvault-package/src/vault/store.rs`).

pub mod domain;
pub mod response;
