pub mod responses;
pub mod service;
