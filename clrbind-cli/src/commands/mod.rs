pub mod bind;
pub mod common;
pub mod identity;
pub mod inspect;
