pub mod account;

pub use account::AccountContext;
