pub mod instance;
pub mod material;
