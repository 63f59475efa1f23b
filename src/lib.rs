pub mod capture;
pub mod compositor;
pub mod config;
pub mod driver;
pub mod encoding;
pub mod error;
pub mod header_layout;
pub mod interval;
pub mod model;
pub mod pipeline;
pub mod scenario;
pub mod storage;
pub mod timeline;
