pub mod service;

pub use service::{Addressing, RegisterService};
