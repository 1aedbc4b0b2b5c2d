pub mod acceleration;
pub mod build_info;
pub mod instance;
