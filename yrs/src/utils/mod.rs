pub mod client_hasher;
